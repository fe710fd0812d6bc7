//! Flake registries: maps from flake identifiers to flake references.
//!
//! ```json
//! {
//!   "version": 1,
//!   "flakes": {
//!     "tools": { "uri": "github:example/tools" }
//!   }
//! }
//! ```
//!
//! Lookups consult the flag registry (`--override-flake`), then the user
//! registry, then the global registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{FlakeError, FlakeRef};
use crate::platform::paths::{global_registry_path, user_registry_path};

pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("failed to read flake registry '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write flake registry '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse flake registry '{}': {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize flake registry: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("flake registry '{}' has unsupported version {version}", .path.display())]
  UnsupportedVersion { path: PathBuf, version: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
  version: u32,
  #[serde(default)]
  flakes: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryEntry {
  uri: String,
}

/// One registry; entries are kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
  /// Directory relative references are resolved against.
  base: Option<PathBuf>,
  entries: BTreeMap<String, String>,
}

impl Registry {
  /// Read a registry file; a missing file is an empty registry.
  pub fn load(path: &Path) -> Result<Self, RegistryError> {
    let base = path.parent().map(Path::to_path_buf);
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Ok(Self {
          base,
          entries: BTreeMap::new(),
        });
      }
      Err(source) => {
        return Err(RegistryError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let file: RegistryFile = serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    if file.version != REGISTRY_VERSION {
      return Err(RegistryError::UnsupportedVersion {
        path: path.to_path_buf(),
        version: file.version,
      });
    }

    Ok(Self {
      base,
      entries: file.flakes.into_iter().map(|(id, entry)| (id, entry.uri)).collect(),
    })
  }

  pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
    let file = RegistryFile {
      version: REGISTRY_VERSION,
      flakes: self
        .entries
        .iter()
        .map(|(id, uri)| (id.clone(), RegistryEntry { uri: uri.clone() }))
        .collect(),
    };
    let write_err = |source| RegistryError::Write {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(write_err)?;
    }
    let content = serde_json::to_string_pretty(&file).map_err(RegistryError::Serialize)?;
    fs::write(path, content + "\n").map_err(write_err)
  }

  /// Registry built from `--override-flake FROM TO` pairs.
  pub fn from_overrides(overrides: impl IntoIterator<Item = (String, String)>) -> Self {
    Self {
      base: None,
      entries: overrides
        .into_iter()
        .map(|(from, to)| (from.strip_prefix("flake:").unwrap_or(&from).to_string(), to))
        .collect(),
    }
  }

  pub fn add(&mut self, id: impl Into<String>, uri: impl Into<String>) {
    self.entries.insert(id.into(), uri.into());
  }

  pub fn remove(&mut self, id: &str) -> bool {
    self.entries.remove(id).is_some()
  }

  pub fn get(&self, id: &str) -> Option<&str> {
    self.entries.get(id).map(String::as_str)
  }

  pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
    self.entries.iter().map(|(id, uri)| (id.as_str(), uri.as_str()))
  }

  fn resolve(&self, id: &str) -> Option<Result<FlakeRef, FlakeError>> {
    let uri = self.entries.get(id)?;
    Some(match &self.base {
      Some(base) => FlakeRef::parse_relative(uri, base),
      None => FlakeRef::parse(uri),
    })
  }
}

/// Which registry a listed entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySource {
  Flags,
  User,
  Global,
}

impl RegistrySource {
  pub fn as_str(self) -> &'static str {
    match self {
      RegistrySource::Flags => "flags",
      RegistrySource::User => "user",
      RegistrySource::Global => "global",
    }
  }
}

/// The registries consulted when resolving indirect flake references.
#[derive(Debug, Clone, Default)]
pub struct Registries {
  pub flags: Registry,
  pub user: Option<PathBuf>,
  pub global: Option<PathBuf>,
}

impl Registries {
  /// The user registry in the config directory plus `SPROUT_FLAKE_REGISTRY`, if set.
  pub fn from_env() -> Self {
    Self {
      flags: Registry::default(),
      user: Some(user_registry_path()),
      global: global_registry_path(),
    }
  }

  pub fn with_flags(mut self, flags: Registry) -> Self {
    self.flags = flags;
    self
  }

  /// All registries in lookup order.
  pub fn load_all(&self) -> Result<Vec<(RegistrySource, Registry)>, RegistryError> {
    let mut all = vec![(RegistrySource::Flags, self.flags.clone())];
    if let Some(user) = &self.user {
      all.push((RegistrySource::User, Registry::load(user)?));
    }
    if let Some(global) = &self.global {
      all.push((RegistrySource::Global, Registry::load(global)?));
    }
    Ok(all)
  }

  /// Follow indirect references until a direct one is reached.
  pub fn lookup(&self, flake_ref: &FlakeRef) -> Result<FlakeRef, FlakeError> {
    let registries = self.load_all()?;
    let mut current = flake_ref.clone();
    let mut seen = BTreeSet::new();

    while let FlakeRef::Indirect { id, git_ref, rev } = current {
      if !seen.insert(id.clone()) {
        return Err(FlakeError::RegistryCycle { id });
      }
      let target = registries
        .iter()
        .find_map(|(_, registry)| registry.resolve(&id))
        .ok_or_else(|| FlakeError::LookupFailed { id: id.clone() })??;
      debug!(id = %id, target = %target, "flake registry lookup");
      current = target.with_overrides(git_ref, rev);
    }

    Ok(current)
  }
}
