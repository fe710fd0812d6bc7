//! Store path names: `<store dir>/<hash>-<name>`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::consts::{DRV_EXTENSION, STORE_HASH_LEN};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorePathError {
  #[error("path '{0}' is not absolute")]
  NotAbsolute(PathBuf),

  #[error("path '{path}' is not in the store '{store_dir}'")]
  NotInStore { path: PathBuf, store_dir: PathBuf },

  #[error("'{0}' is not a valid store path name")]
  InvalidName(String),
}

/// An absolute path to a top-level entry of a store.
///
/// The file name is `<hash>-<name>` where the hash is `STORE_HASH_LEN` lowercase
/// hex characters and the name uses only `[A-Za-z0-9+-._?=]` and does not start
/// with a dot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(PathBuf);

impl StorePath {
  /// Compose a store path from its parts, validating the name.
  pub fn new(store_dir: &Path, hash: &str, name: &str) -> Result<Self, StorePathError> {
    let base = format!("{hash}-{name}");
    validate_base_name(&base)?;
    Ok(Self(store_dir.join(base)))
  }

  /// Parse a path that must be exactly a top-level entry of `store_dir`.
  pub fn parse(store_dir: &Path, path: &Path) -> Result<Self, StorePathError> {
    if !path.is_absolute() {
      return Err(StorePathError::NotAbsolute(path.to_path_buf()));
    }
    let parent = path.parent().ok_or_else(|| StorePathError::NotInStore {
      path: path.to_path_buf(),
      store_dir: store_dir.to_path_buf(),
    })?;
    if parent != store_dir {
      return Err(StorePathError::NotInStore {
        path: path.to_path_buf(),
        store_dir: store_dir.to_path_buf(),
      });
    }
    let base = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    validate_base_name(&base)?;
    Ok(Self(path.to_path_buf()))
  }

  /// The store path containing `path`, which may point anywhere below it.
  ///
  /// `/store/<hash>-hello/bin/hello` yields `/store/<hash>-hello`. Paths with
  /// `..` components are rejected, since they can leave the store path.
  pub fn containing(store_dir: &Path, path: &Path) -> Result<Self, StorePathError> {
    let not_in_store = || StorePathError::NotInStore {
      path: path.to_path_buf(),
      store_dir: store_dir.to_path_buf(),
    };
    if !path.is_absolute() {
      return Err(StorePathError::NotAbsolute(path.to_path_buf()));
    }
    let rest = path.strip_prefix(store_dir).map_err(|_| not_in_store())?;
    if rest.components().any(|c| c == Component::ParentDir) {
      return Err(not_in_store());
    }
    match rest.components().next() {
      Some(Component::Normal(first)) => Self::parse(store_dir, &store_dir.join(first)),
      _ => Err(not_in_store()),
    }
  }

  pub fn as_path(&self) -> &Path {
    &self.0
  }

  /// File name of the store path, `<hash>-<name>`.
  pub fn base_name(&self) -> String {
    self
      .0
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default()
  }

  pub fn hash_part(&self) -> String {
    self.base_name()[..STORE_HASH_LEN].to_string()
  }

  pub fn name(&self) -> String {
    self.base_name()[STORE_HASH_LEN + 1..].to_string()
  }

  pub fn is_derivation(&self) -> bool {
    self.base_name().ends_with(DRV_EXTENSION)
  }
}

impl fmt::Display for StorePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.display())
  }
}

impl AsRef<Path> for StorePath {
  fn as_ref(&self) -> &Path {
    &self.0
  }
}

impl Serialize for StorePath {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.0.to_string_lossy())
  }
}

impl<'de> Deserialize<'de> for StorePath {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let path = PathBuf::from(&raw);
    let store_dir = path
      .parent()
      .ok_or_else(|| serde::de::Error::custom(format!("'{raw}' has no parent directory")))?
      .to_path_buf();
    StorePath::parse(&store_dir, &path).map_err(serde::de::Error::custom)
  }
}

/// Whether `name` may follow the hash in a store path.
pub fn is_valid_name(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with('.')
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "+-._?=".contains(c))
}

fn validate_base_name(base: &str) -> Result<(), StorePathError> {
  let invalid = || StorePathError::InvalidName(base.to_string());
  if base.len() < STORE_HASH_LEN + 2 || !base.is_char_boundary(STORE_HASH_LEN) {
    return Err(invalid());
  }
  let (hash, rest) = base.split_at(STORE_HASH_LEN);
  let hash_ok = hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
  match rest.strip_prefix('-') {
    Some(name) if hash_ok && is_valid_name(name) => Ok(()),
    _ => Err(invalid()),
  }
}
