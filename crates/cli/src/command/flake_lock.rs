use clap::Args;

use sprout_lib::flake::LockFileMode;

/// How the lock file of a flake may be changed.
#[derive(Debug, Clone, Args)]
pub struct FlakeLockArgs {
  /// Ignore the existing lock file and lock every input again
  #[arg(long = "recreate-lock-file")]
  pub recreate_lock_file: bool,

  /// Do not write an updated lock file
  #[arg(long = "no-update-lock-file", action = clap::ArgAction::SetFalse)]
  pub save_lock_file: bool,

  /// Do not look up flake ids in the registries
  #[arg(long = "no-registries", action = clap::ArgAction::SetFalse)]
  pub use_registries: bool,
}

impl Default for FlakeLockArgs {
  fn default() -> Self {
    Self {
      recreate_lock_file: false,
      save_lock_file: true,
      use_registries: true,
    }
  }
}

impl FlakeLockArgs {
  pub fn lock_file_mode(&self) -> LockFileMode {
    LockFileMode::from_flags(self.recreate_lock_file, self.save_lock_file, self.use_registries)
  }
}
