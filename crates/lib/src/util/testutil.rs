//! Test helpers shared by the library's unit tests.

use std::path::Path;

use tempfile::TempDir;

use crate::store::{Derivation, LocalStore};

/// A `/bin/sh -c <script>` derivation with its outputs already computed.
pub fn sh_derivation(store_dir: &Path, name: &str, script: &str) -> Derivation {
  let mut drv = Derivation::new(name, crate::platform::current_system(), "/bin/sh");
  drv.args = vec!["-c".to_string(), script.to_string()];
  drv.compute_outputs(store_dir).unwrap();
  drv
}

/// A fresh local store rooted in a temporary directory.
pub fn temp_store() -> (TempDir, LocalStore) {
  let temp = TempDir::new().unwrap();
  let store = LocalStore::open(temp.path()).unwrap();
  (temp, store)
}

/// Write `content` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, content: &str) {
  let path = dir.join(name);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(path, content).unwrap();
}
