//! Hashing for store path names and store content.
//!
//! Store path names carry an [`ObjectHash`]: the first 32 hex characters of
//! a SHA-256 over a fingerprint. Store content is identified by a [`NarHash`]
//! computed by [`hash_path`] over a serialisation of the file tree that covers
//! names, file contents and link targets but no metadata.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::consts::STORE_HASH_LEN;

#[derive(Debug, Error)]
pub enum HashError {
  #[error("failed to read '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk '{root}': {source}")]
  Walk {
    root: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> HashError + '_ {
  move |source| HashError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Hash part of a store path name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl ObjectHash {
  fn truncate(digest: impl fmt::LowerHex) -> Self {
    let mut hex = format!("{digest:x}");
    hex.truncate(STORE_HASH_LEN);
    ObjectHash(hex)
  }

  /// Hash of fingerprint parts joined with `:`.
  pub fn of_parts(parts: &[&str]) -> Self {
    Self::truncate(Sha256::digest(parts.join(":").as_bytes()))
  }
}

/// Types whose JSON serialization determines their store identity.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, serde_json::Error> {
    let serialized = serde_json::to_vec(self)?;
    Ok(ObjectHash::truncate(Sha256::digest(&serialized)))
  }
}

/// Content hash of a store path, written `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NarHash(String);

impl fmt::Display for NarHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "sha256:{}", self.0)
  }
}

impl NarHash {
  /// The bare hex digest, without the algorithm prefix.
  pub fn hex(&self) -> &str {
    &self.0
  }
}

/// Hash the tree at `path`, skipping entries named in `exclude` at any depth.
///
/// Each entry contributes a tagged record in file-name order: `d` for
/// directories, `f`/`x` for plain and executable files followed by their
/// length and contents, `l` for symlinks followed by the target. A single file
/// hashes differently from a directory containing it.
pub fn hash_path(path: &Path, exclude: &[&str]) -> Result<NarHash, HashError> {
  hash_tree(path, |e| e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| exclude.contains(&n)))
}

/// Hash the tree at `path`, descending only into entries `keep` accepts.
pub fn hash_tree<P>(path: &Path, keep: P) -> Result<NarHash, HashError>
where
  P: FnMut(&DirEntry) -> bool,
{
  let mut hasher = Sha256::new();
  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(keep);

  for entry in walker {
    let entry = entry.map_err(|source| HashError::Walk {
      root: path.to_path_buf(),
      source,
    })?;
    let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
    let name = relative.to_string_lossy();
    let file_type = entry.file_type();

    if file_type.is_dir() {
      hasher.update(format!("d {name}\0"));
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(io_err(entry.path()))?;
      hasher.update(format!("l {name}\0{}\0", target.to_string_lossy()));
    } else if file_type.is_file() {
      let tag = if is_executable(entry.path())? { 'x' } else { 'f' };
      let size = entry
        .metadata()
        .map_err(|source| HashError::Walk {
          root: path.to_path_buf(),
          source,
        })?
        .len();
      hasher.update(format!("{tag} {name}\0{size}\0"));
      let mut file = fs::File::open(entry.path()).map_err(io_err(entry.path()))?;
      io::copy(&mut file, &mut hasher).map_err(io_err(entry.path()))?;
    }
  }

  Ok(NarHash(format!("{:x}", hasher.finalize())))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool, HashError> {
  use std::os::unix::fs::PermissionsExt;

  let meta = fs::metadata(path).map_err(io_err(path))?;
  Ok(meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool, HashError> {
  Ok(false)
}
