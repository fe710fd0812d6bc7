//! Flake resolution: from a reference to a locked tree of fetched sources.
//!
//! 1. The top-level reference is looked up in the registries (if indirect)
//!    and fetched.
//! 2. Its lock file is read, unless the mode recreates it.
//! 3. Inputs declared in `flake.lua` keep their lock entry when the entry was
//!    made for the same reference; other inputs are fetched and locked (their
//!    own inputs recursively) if the mode allows updates. Entries for inputs
//!    that are no longer declared are dropped.
//! 4. A changed lock file is written next to a local top-level flake when the
//!    mode allows writing.
//! 5. Every locked input is fetched from its locked reference and checked
//!    against the recorded content hash.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::fetch::SourceInfo;
use super::{FlakeError, FlakeRef, LockFile, LockFileMode, LockedInput};
use crate::consts::FLAKE_LOCK_FILENAME;

/// What `flake.lua` declares besides its outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlakeMetadata {
  pub description: Option<String>,
  /// Input name to flake reference, as written.
  pub inputs: BTreeMap<String, String>,
}

/// Registry lookup, fetching and metadata evaluation used during resolution.
pub trait FlakeSource {
  /// Resolve an indirect reference through the registries.
  fn lookup(&self, flake_ref: &FlakeRef) -> Result<FlakeRef, FlakeError>;

  fn fetch(&self, flake_ref: &FlakeRef) -> Result<SourceInfo, FlakeError>;

  fn metadata(&self, source: &SourceInfo) -> Result<FlakeMetadata, FlakeError>;
}

/// A fetched flake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flake {
  /// The reference as given.
  pub original: FlakeRef,
  /// The direct reference it was fetched from.
  pub resolved: FlakeRef,
  pub source: SourceInfo,
  pub description: Option<String>,
  pub inputs: BTreeMap<String, String>,
}

impl Flake {
  /// Parse the reference of input `name`; relative paths are relative to the flake.
  pub fn input_ref(&self, name: &str) -> Result<FlakeRef, FlakeError> {
    let raw = self.inputs.get(name).ok_or_else(|| FlakeError::Evaluation {
      flake: self.original.to_string(),
      message: format!("no input named '{name}'"),
    })?;
    FlakeRef::parse_relative(raw, &self.base_dir())
  }

  fn base_dir(&self) -> PathBuf {
    self
      .source
      .original_dir
      .clone()
      .unwrap_or_else(|| self.source.store_path.as_path().to_path_buf())
  }

  /// Where the lock file of this flake is read from.
  pub fn lock_path(&self) -> PathBuf {
    self.base_dir().join(FLAKE_LOCK_FILENAME)
  }
}

/// A locked input and its own locked inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
  pub flake: Flake,
  pub inputs: BTreeMap<String, ResolvedInput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFlake {
  pub flake: Flake,
  pub lock: LockFile,
  pub inputs: BTreeMap<String, ResolvedInput>,
}

/// Look up (if needed and allowed) and fetch a flake.
pub fn get_flake(src: &dyn FlakeSource, flake_ref: &FlakeRef, use_registries: bool) -> Result<Flake, FlakeError> {
  let resolved = match flake_ref {
    FlakeRef::Indirect { id, .. } if !use_registries => {
      return Err(FlakeError::RegistryDisabled { id: id.clone() });
    }
    FlakeRef::Indirect { .. } => src.lookup(flake_ref)?,
    direct => direct.clone(),
  };

  let source = src.fetch(&resolved)?;
  let metadata = src.metadata(&source)?;
  debug!(flake = %flake_ref, path = %source.store_path, "fetched flake");

  Ok(Flake {
    original: flake_ref.clone(),
    resolved,
    source,
    description: metadata.description,
    inputs: metadata.inputs,
  })
}

/// Compute the lock file of `flake_ref` and fetch every locked input.
pub fn resolve_flake(src: &dyn FlakeSource, flake_ref: &FlakeRef, mode: LockFileMode) -> Result<ResolvedFlake, FlakeError> {
  let flake = get_flake(src, flake_ref, mode.allowed_to_use_registries())?;

  let old_lock = if mode.recreate() {
    LockFile::new()
  } else {
    LockFile::load(&flake.lock_path())?.unwrap_or_default()
  };

  let lock = LockFile {
    inputs: update_locks(src, &flake, mode, &old_lock.inputs)?,
    ..LockFile::new()
  };

  if lock != old_lock {
    if mode.allowed_to_write() {
      match &flake.source.original_dir {
        Some(dir) => {
          let path = dir.join(FLAKE_LOCK_FILENAME);
          lock.save(&path)?;
          info!(path = %path.display(), "wrote lock file");
        }
        None => warn!(flake = %flake_ref, "cannot write lock file of remote flake"),
      }
    } else if mode != LockFileMode::AllPure {
      warn!(flake = %flake_ref, "using updated lock file without writing it");
    }
  }

  let inputs = realize_inputs(src, &lock.inputs)?;
  Ok(ResolvedFlake { flake, lock, inputs })
}

fn update_locks(
  src: &dyn FlakeSource,
  flake: &Flake,
  mode: LockFileMode,
  old: &BTreeMap<String, LockedInput>,
) -> Result<BTreeMap<String, LockedInput>, FlakeError> {
  let mut new = BTreeMap::new();

  for (name, url) in &flake.inputs {
    match old.get(name) {
      Some(entry) if entry.url == *url => {
        new.insert(name.clone(), entry.clone());
      }
      _ => {
        if !mode.allowed_to_update() {
          return Err(FlakeError::PureUpdate { id: name.clone() });
        }
        let input = get_flake(src, &flake.input_ref(name)?, mode.allowed_to_use_registries())?;
        let inputs = update_locks(src, &input, mode, &BTreeMap::new())?;
        info!(input = %name, locked = %input.source.locked, "locked flake input");
        new.insert(
          name.clone(),
          LockedInput {
            url: url.clone(),
            locked: input.source.locked.to_string(),
            nar_hash: input.source.nar_hash.clone(),
            inputs,
          },
        );
      }
    }
  }

  Ok(new)
}

fn realize_inputs(
  src: &dyn FlakeSource,
  inputs: &BTreeMap<String, LockedInput>,
) -> Result<BTreeMap<String, ResolvedInput>, FlakeError> {
  let mut resolved = BTreeMap::new();
  for (name, entry) in inputs {
    let locked = FlakeRef::parse(&entry.locked)?;
    let flake = get_flake(src, &locked, false)?;
    if flake.source.nar_hash != entry.nar_hash {
      return Err(FlakeError::HashMismatch {
        id: name.clone(),
        expected: entry.nar_hash.clone(),
        actual: flake.source.nar_hash,
      });
    }
    let children = realize_inputs(src, &entry.inputs)?;
    resolved.insert(
      name.clone(),
      ResolvedInput {
        flake,
        inputs: children,
      },
    );
  }
  Ok(resolved)
}
