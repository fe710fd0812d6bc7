//! Lock files pinning flake inputs.
//!
//! `flake.lock` lives next to `flake.lua` and records, per input, the
//! reference as written, the locked reference it was fetched from and the
//! content hash of the fetched source. Inputs of inputs are nested.
//!
//! ```json
//! {
//!   "version": 1,
//!   "inputs": {
//!     "base": {
//!       "url": "github:example/base",
//!       "locked": "git+https://github.com/example/base.git?rev=a1b2...",
//!       "narHash": "sha256-...",
//!       "inputs": {}
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LOCK_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
  pub version: u32,
  #[serde(default)]
  pub inputs: BTreeMap<String, LockedInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedInput {
  /// The reference as written in `flake.lua`.
  pub url: String,
  /// Immutable reference the source was fetched from.
  pub locked: String,
  pub nar_hash: String,
  #[serde(default)]
  pub inputs: BTreeMap<String, LockedInput>,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to read lock file '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock file '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse lock file '{}': {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      inputs: BTreeMap::new(),
    }
  }

  /// Load a lock file.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(LockError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let lock: LockFile = serde_json::from_str(&content).map_err(|source| LockError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    if lock.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(lock.version));
    }

    Ok(Some(lock))
  }

  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    fs::write(path, content + "\n").map_err(|source| LockError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn get(&self, name: &str) -> Option<&LockedInput> {
    self.inputs.get(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn sample() -> LockFile {
    let nested = LockedInput {
      url: "path:/srv/base".to_string(),
      locked: "path:/srv/base".to_string(),
      nar_hash: "sha256-base".to_string(),
      inputs: BTreeMap::new(),
    };
    let mut lock = LockFile::new();
    lock.inputs.insert(
      "tools".to_string(),
      LockedInput {
        url: "github:example/tools".to_string(),
        locked: "git+https://github.com/example/tools.git?rev=0123456789abcdef0123456789abcdef01234567".to_string(),
        nar_hash: "sha256-tools".to_string(),
        inputs: BTreeMap::from([("base".to_string(), nested)]),
      },
    );
    lock
  }

  mod lock_file {
    use super::*;

    #[test]
    fn save_and_load() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("flake.lock");

      let original = sample();
      original.save(&path).unwrap();
      let loaded = LockFile::load(&path).unwrap().unwrap();

      assert_eq!(original, loaded);
      assert_eq!(loaded.get("tools").unwrap().inputs.len(), 1);
    }

    #[test]
    fn load_nonexistent_returns_none() {
      let temp = TempDir::new().unwrap();
      assert!(LockFile::load(&temp.path().join("flake.lock")).unwrap().is_none());
    }

    #[test]
    fn load_invalid_json_returns_error() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("flake.lock");
      fs::write(&path, "not valid json").unwrap();
      assert!(matches!(LockFile::load(&path), Err(LockError::Parse { .. })));
    }

    #[test]
    fn load_unsupported_version_returns_error() {
      let temp = TempDir::new().unwrap();
      let path = temp.path().join("flake.lock");
      fs::write(&path, r#"{"version": 999, "inputs": {}}"#).unwrap();
      assert!(matches!(LockFile::load(&path), Err(LockError::UnsupportedVersion(999))));
    }
  }

  mod serialization {
    use super::*;

    #[test]
    fn field_names() {
      let json = serde_json::to_string_pretty(&sample()).unwrap();
      assert!(json.contains(r#""version": 1"#));
      assert!(json.contains(r#""narHash": "sha256-tools""#));
      assert!(json.contains(r#""locked": "git+https://github.com/example/tools.git?rev="#));
    }

    #[test]
    fn nested_inputs_default_to_empty() {
      let input: LockedInput =
        serde_json::from_str(r#"{"url": "path:/a", "locked": "path:/a", "narHash": "sha256-x"}"#).unwrap();
      assert!(input.inputs.is_empty());
    }
  }
}
