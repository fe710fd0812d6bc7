//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own store, config, data and cache directories, and runs
/// the binary from its own working directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Copies the package fixture to `packages.lua`.
  pub fn with_packages() -> Self {
    let env = Self::empty();
    env.write_file("packages.lua", &fixture_content("packages.lua"));
    env
  }

  /// Copies the flake fixture to `flake/flake.lua` and its input to `dep/flake.lua`.
  pub fn with_flake() -> Self {
    let env = Self::empty();
    env.write_file("flake/flake.lua", &fixture_content("flake.lua"));
    env.write_file("dep/flake.lua", &fixture_content("dep.lua"));
    env
  }

  pub fn path(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap_or_else(|_| self.temp.path().to_path_buf())
  }

  pub fn packages_path(&self) -> PathBuf {
    self.path().join("packages.lua")
  }

  pub fn flake_dir(&self) -> PathBuf {
    self.path().join("flake")
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.path().join(name);
    std::fs::create_dir_all(&p).unwrap();
    p
  }

  pub fn store_root(&self) -> PathBuf {
    self.dir("store-root")
  }

  pub fn config_path(&self) -> PathBuf {
    self.dir("config")
  }

  /// Store paths are named `<hash>-<name>` directly below this directory.
  pub fn store_dir(&self) -> PathBuf {
    self.store_root().join("store")
  }

  /// Get a pre-configured Command for the sprout binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `SPROUT_STORE`: isolated store root
  /// - `SPROUT_FLAKE_REGISTRY`: a global registry file that does not exist
  /// - `XDG_CONFIG_HOME`, `XDG_DATA_HOME`, `XDG_CACHE_HOME`: isolated directories
  pub fn sprout_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("sprout");
    cmd.current_dir(self.path());
    cmd.env_remove("RUST_LOG");
    cmd.env("SPROUT_STORE", self.store_root());
    cmd.env("SPROUT_FLAKE_REGISTRY", self.path().join("global-registry.json"));
    cmd.env("XDG_CONFIG_HOME", self.config_path());
    cmd.env("XDG_DATA_HOME", self.dir("data"));
    cmd.env("XDG_CACHE_HOME", self.dir("cache"));
    cmd
  }

  /// `sprout <args> -f packages.lua`.
  pub fn with_file(&self, args: &[&str]) -> Command {
    let mut cmd = self.sprout_cmd();
    cmd.args(args).arg("-f").arg(self.packages_path());
    cmd
  }

  /// Run a command expected to succeed and return its trimmed stdout.
  pub fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap().trim().to_string()
  }
}

/// Whether `path` names a store entry ending in `-<name>`.
pub fn is_store_path(path: &Path, store_dir: &Path, name: &str) -> bool {
  path.parent() == Some(store_dir)
    && path
      .file_name()
      .and_then(|n| n.to_str())
      .is_some_and(|n| n.ends_with(&format!("-{name}")))
}
