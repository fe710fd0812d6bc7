//! Flakes: self-contained Lua projects with pinned inputs.
//!
//! A flake is a directory holding `flake.lua`, which returns
//!
//! ```lua
//! return {
//!   description = "my tools",
//!   inputs = { base = "github:example/base" },
//!   outputs = function(inputs)
//!     return { packages = { ["x86_64-linux"] = { hello = ... } } }
//!   end,
//! }
//! ```
//!
//! Inputs are pinned in `flake.lock` next to `flake.lua`; see [`resolve`].

pub mod fetch;
pub mod flake_ref;
pub mod lock;
pub mod registry;
pub mod resolve;

use std::path::PathBuf;

use thiserror::Error;

pub use flake_ref::{FlakeRef, looks_like_flake_ref};
pub use lock::{LockError, LockFile, LockedInput};
pub use registry::{Registries, Registry, RegistryError};
pub use resolve::{Flake, ResolvedFlake, ResolvedInput};

use crate::eval::Value;
use crate::store::StoreError;
use fetch::FetchError;

/// How the lock file of the top-level flake is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFileMode {
  /// Start from an empty lock file, fetch every input and write the result.
  RecreateLockFile,
  /// Add missing inputs in memory without writing the lock file.
  UseUpdatedLockFile,
  /// Add missing inputs and write the lock file.
  UpdateLockFile,
  /// Use the lock file as is: no registry lookups, nothing new fetched.
  AllPure,
}

impl LockFileMode {
  pub fn from_flags(recreate_lock_file: bool, save_lock_file: bool, use_registries: bool) -> Self {
    match (recreate_lock_file, save_lock_file, use_registries) {
      (true, _, _) => LockFileMode::RecreateLockFile,
      (false, false, _) => LockFileMode::UseUpdatedLockFile,
      (false, true, true) => LockFileMode::UpdateLockFile,
      (false, true, false) => LockFileMode::AllPure,
    }
  }

  pub fn allowed_to_write(self) -> bool {
    matches!(self, LockFileMode::UpdateLockFile | LockFileMode::RecreateLockFile)
  }

  pub fn recreate(self) -> bool {
    self == LockFileMode::RecreateLockFile
  }

  pub fn allowed_to_update(self) -> bool {
    self != LockFileMode::AllPure
  }

  pub fn allowed_to_use_registries(self) -> bool {
    self != LockFileMode::AllPure
  }
}

#[derive(Debug, Error)]
pub enum FlakeError {
  #[error("invalid flake reference '{input}': {reason}")]
  InvalidRef { input: String, reason: String },

  #[error(transparent)]
  Registry(#[from] RegistryError),

  #[error("cannot look up flake '{id}': registries are disabled")]
  RegistryDisabled { id: String },

  #[error("cannot find flake '{id}' in the flake registries")]
  LookupFailed { id: String },

  #[error("cycle detected in flake registries while resolving '{id}'")]
  RegistryCycle { id: String },

  #[error("source tree '{}' does not contain a '{}' file", .dir.display(), crate::consts::FLAKE_FILENAME)]
  NoFlakeFile { dir: PathBuf },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("cannot update flake dependency '{id}' in pure mode")]
  PureUpdate { id: String },

  #[error("the content hash of flake '{id}' ({actual}) doesn't match the hash recorded in the lock file ({expected})")]
  HashMismatch {
    id: String,
    expected: String,
    actual: String,
  },

  #[error("invalid flake at '{flake}': {message}")]
  Evaluation { flake: String, message: String },
}

/// A resolved flake together with its evaluated outputs.
#[derive(Debug, Clone)]
pub struct LoadedFlake {
  pub flake: Flake,
  pub lock: LockFile,
  pub outputs: Value,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn modes_from_flags() {
    assert_eq!(LockFileMode::from_flags(true, false, false), LockFileMode::RecreateLockFile);
    assert_eq!(LockFileMode::from_flags(true, true, true), LockFileMode::RecreateLockFile);
    assert_eq!(LockFileMode::from_flags(false, false, true), LockFileMode::UseUpdatedLockFile);
    assert_eq!(LockFileMode::from_flags(false, false, false), LockFileMode::UseUpdatedLockFile);
    assert_eq!(LockFileMode::from_flags(false, true, true), LockFileMode::UpdateLockFile);
    assert_eq!(LockFileMode::from_flags(false, true, false), LockFileMode::AllPure);
  }

  #[test]
  fn predicates() {
    use LockFileMode::*;
    assert!(UpdateLockFile.allowed_to_write());
    assert!(RecreateLockFile.allowed_to_write());
    assert!(!UseUpdatedLockFile.allowed_to_write());
    assert!(!AllPure.allowed_to_write());

    assert!(RecreateLockFile.recreate());
    assert!(!UpdateLockFile.recreate());

    assert!(!AllPure.allowed_to_update());
    assert!(!AllPure.allowed_to_use_registries());
    assert!(UseUpdatedLockFile.allowed_to_update());
    assert!(UseUpdatedLockFile.allowed_to_use_registries());
  }
}
