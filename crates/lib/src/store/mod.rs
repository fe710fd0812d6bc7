//! The content-addressed store.
//!
//! Everything the rest of the crate needs from a store goes through the
//! [`Store`] trait; [`LocalStore`] is the on-disk implementation.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── store/                  # store paths (immutable once valid)
//! │   ├── <hash>-<name>.drv
//! │   └── <hash>-<name>/
//! └── db/
//!     ├── info/<hash>.json    # validity records: references, deriver, narHash
//!     ├── derivers/<hash>     # output path -> drv path, recorded at instantiation
//!     └── .lock               # held exclusively while building
//! ```

pub mod builder;
pub mod derivation;
pub mod local;
pub mod lock;
pub mod path;
pub mod schedule;

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use derivation::Derivation;
pub use local::LocalStore;
pub use lock::{BuildLock, Holder, StoreLockError};
pub use path::{StorePath, StorePathError};

use crate::util::hash::HashError;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error(transparent)]
  Path(#[from] StorePathError),

  #[error("I/O error on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to (de)serialize store metadata: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("invalid derivation: {0}")]
  InvalidDerivation(String),

  #[error("derivation '{0}' does not exist in the store")]
  DerivationNotFound(StorePath),

  #[error("derivation '{drv_path}' has no output named '{output}'")]
  UnknownOutput { drv_path: StorePath, output: String },

  #[error("build of '{drv_path}' failed: {message}")]
  BuildFailed { drv_path: StorePath, message: String },

  #[error("dependency cycle detected among derivations")]
  CycleDetected,

  #[error(transparent)]
  Lock(#[from] StoreLockError),

  #[error(transparent)]
  Hash(#[from] HashError),

  #[error("failed to start build runtime: {0}")]
  Runtime(#[source] io::Error),
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
    let path = path.into();
    move |source| StoreError::Io { path, source }
  }
}

/// One derivation to realise, restricted to some of its outputs.
///
/// An empty `outputs` set means every output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildRequest {
  pub drv_path: StorePath,
  pub outputs: BTreeSet<String>,
}

impl BuildRequest {
  pub fn all_outputs(drv_path: StorePath) -> Self {
    Self {
      drv_path,
      outputs: BTreeSet::new(),
    }
  }
}

/// What realising a set of requests would do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingInfo {
  /// Derivations that would be built.
  pub will_build: BTreeSet<StorePath>,
  /// Requested outputs that are already valid.
  pub valid: BTreeSet<StorePath>,
}

/// Validity record of a store path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
  pub path: StorePath,
  pub nar_hash: String,
  pub references: BTreeSet<StorePath>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub deriver: Option<StorePath>,
}

/// Operations the installable pipeline needs from a store.
pub trait Store {
  fn store_dir(&self) -> &Path;

  /// Parse `path` as a top-level path of this store.
  fn parse_store_path(&self, path: &Path) -> Result<StorePath, StorePathError> {
    StorePath::parse(self.store_dir(), path)
  }

  fn is_store_path(&self, path: &Path) -> bool {
    self.parse_store_path(path).is_ok()
  }

  /// Compute the outputs of `drv`, write it to the store and return its path
  /// together with the completed derivation.
  fn instantiate(&self, drv: Derivation) -> Result<(StorePath, Derivation), StoreError>;

  fn read_derivation(&self, drv_path: &StorePath) -> Result<Derivation, StoreError>;

  /// Copy a file or directory into the store under a content-derived path.
  fn add_to_store(&self, name: &str, src: &Path) -> Result<StorePath, StoreError>;

  /// Realise every request. Blocks until all builds finish or one fails.
  fn build_paths(&self, requests: &[BuildRequest]) -> Result<(), StoreError>;

  /// Realise one derivation and return the requested output paths.
  fn realize(&self, drv_path: &StorePath, outputs: &BTreeSet<String>) -> Result<BTreeSet<StorePath>, StoreError> {
    let request = BuildRequest {
      drv_path: drv_path.clone(),
      outputs: outputs.clone(),
    };
    self.build_paths(std::slice::from_ref(&request))?;

    let drv = self.read_derivation(drv_path)?;
    let mut realised = BTreeSet::new();
    for (name, path) in drv.output_paths() {
      if outputs.is_empty() || outputs.contains(&name) {
        realised.insert(path);
      }
    }
    Ok(realised)
  }

  fn query_missing(&self, requests: &[BuildRequest]) -> Result<MissingInfo, StoreError>;

  fn is_valid_path(&self, path: &StorePath) -> Result<bool, StoreError>;

  fn query_path_info(&self, path: &StorePath) -> Result<Option<PathInfo>, StoreError>;

  /// The derivation that produces `path`, if one is recorded.
  fn query_deriver(&self, path: &StorePath) -> Result<Option<StorePath>, StoreError>;

  fn query_all_valid_paths(&self) -> Result<BTreeSet<StorePath>, StoreError>;

  /// `paths` plus everything they reference, transitively.
  fn closure(&self, paths: &BTreeSet<StorePath>) -> Result<BTreeSet<StorePath>, StoreError> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<StorePath> = paths.iter().cloned().collect();
    while let Some(path) = queue.pop_front() {
      if !seen.insert(path.clone()) {
        continue;
      }
      if let Some(info) = self.query_path_info(&path)? {
        queue.extend(info.references.into_iter().filter(|r| !seen.contains(r)));
      }
    }
    Ok(seen)
  }
}
