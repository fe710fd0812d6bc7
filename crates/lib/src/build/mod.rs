//! Realising installables.
//!
//! Installables are first resolved into [`Buildable`]s. What happens next is
//! chosen by [`RealiseMode`]: build everything in one batch, only report what
//! a build would do, or insist that every output already exists.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::installable::{Installable, InstallableError};
use crate::store::{BuildRequest, Store, StoreError, StorePath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RealiseMode {
  #[default]
  Build,
  NoBuild,
  DryRun,
}

/// A derivation and the outputs wanted from it, or an existing store path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Buildable {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub drv_path: Option<StorePath>,
  pub outputs: BTreeMap<String, StorePath>,
}

impl Buildable {
  pub fn from_derivation(
    drv_path: StorePath,
    outputs: impl IntoIterator<Item = (String, StorePath)>,
  ) -> Self {
    Self {
      drv_path: Some(drv_path),
      outputs: outputs.into_iter().collect(),
    }
  }

  /// A store path with no known derivation.
  pub fn from_output(name: &str, path: StorePath) -> Self {
    Self {
      drv_path: None,
      outputs: BTreeMap::from([(name.to_string(), path)]),
    }
  }

  fn request(&self) -> Option<BuildRequest> {
    self.drv_path.as_ref().map(|drv_path| BuildRequest {
      drv_path: drv_path.clone(),
      outputs: self.outputs.keys().cloned().collect(),
    })
  }
}

/// Resolve every installable, then realise the result according to `mode`.
///
/// Resolution stops at the first installable that fails; nothing is built
/// in that case.
pub fn build(
  store: &dyn Store,
  mode: RealiseMode,
  installables: &[Installable],
) -> Result<Vec<Buildable>, InstallableError> {
  let mut resolved = Vec::new();
  for installable in installables {
    let what = installable.what();
    for buildable in installable.to_buildables(store)? {
      resolved.push((what.clone(), buildable));
    }
  }

  let requests: Vec<BuildRequest> = resolved.iter().filter_map(|(_, b)| b.request()).collect();

  match mode {
    RealiseMode::DryRun => {
      let missing = store
        .query_missing(&requests)
        .map_err(InstallableError::store(&joined(&resolved)))?;
      for drv_path in &missing.will_build {
        info!(drv = %drv_path, "would build");
      }
      for path in &missing.valid {
        info!(path = %path, "already valid");
      }
      for (_, buildable) in resolved.iter().filter(|(_, b)| b.drv_path.is_none()) {
        for path in buildable.outputs.values() {
          info!(path = %path, "would use");
        }
      }
    }
    RealiseMode::NoBuild => {
      for (what, buildable) in &resolved {
        ensure_valid(store, what, buildable.outputs.values())?;
      }
    }
    RealiseMode::Build => {
      for (what, buildable) in resolved.iter().filter(|(_, b)| b.drv_path.is_none()) {
        ensure_valid(store, what, buildable.outputs.values())?;
      }
      if !requests.is_empty() {
        debug!(count = requests.len(), "building derivations");
        store.build_paths(&requests).map_err(|e| build_error(&resolved, e))?;
      }
    }
  }

  Ok(resolved.into_iter().map(|(_, b)| b).collect())
}

fn ensure_valid<'a>(
  store: &dyn Store,
  what: &str,
  paths: impl IntoIterator<Item = &'a StorePath>,
) -> Result<(), InstallableError> {
  for path in paths {
    if !store.is_valid_path(path).map_err(InstallableError::store(what))? {
      return Err(InstallableError::MissingOutput {
        what: what.to_string(),
        path: path.clone(),
      });
    }
  }
  Ok(())
}

fn joined(resolved: &[(String, Buildable)]) -> String {
  let mut whats: Vec<&str> = Vec::new();
  for (what, _) in resolved {
    if !whats.contains(&what.as_str()) {
      whats.push(what);
    }
  }
  whats.join(", ")
}

/// Attribute a failed batch build to the installable that asked for the
/// failing derivation, or to all of them when it was a dependency.
fn build_error(resolved: &[(String, Buildable)], err: StoreError) -> InstallableError {
  match err {
    StoreError::BuildFailed { drv_path, message } => {
      let what = resolved
        .iter()
        .find(|(_, b)| b.drv_path.as_ref() == Some(&drv_path))
        .map(|(what, _)| what.clone())
        .unwrap_or_else(|| joined(resolved));
      InstallableError::BuildFailure {
        what,
        drv_path,
        message,
      }
    }
    source => InstallableError::Store {
      what: joined(resolved),
      source,
    },
  }
}

/// Realise `installables` and collect every output path.
pub fn to_store_paths(
  store: &dyn Store,
  mode: RealiseMode,
  installables: &[Installable],
) -> Result<BTreeSet<StorePath>, InstallableError> {
  let buildables = build(store, mode, installables)?;
  Ok(buildables.into_iter().flat_map(|b| b.outputs.into_values()).collect())
}

pub fn to_store_path(
  store: &dyn Store,
  mode: RealiseMode,
  installable: &Installable,
) -> Result<StorePath, InstallableError> {
  let mut buildables = build(store, mode, std::slice::from_ref(installable))?;
  let ambiguous = |count| InstallableError::Ambiguous {
    what: installable.what(),
    expected: "output path",
    count,
  };
  if buildables.len() != 1 {
    return Err(ambiguous(buildables.len()));
  }
  let outputs = buildables.remove(0).outputs;
  if outputs.len() != 1 {
    return Err(ambiguous(outputs.len()));
  }
  outputs.into_values().next().ok_or_else(|| ambiguous(0))
}

/// The derivations behind `installables`, without building anything.
///
/// Plain store paths are traced back to their deriver when `use_deriver` is
/// set; otherwise they contribute nothing.
pub fn to_derivations(
  store: &dyn Store,
  installables: &[Installable],
  use_deriver: bool,
) -> Result<BTreeSet<StorePath>, InstallableError> {
  let mut drvs = BTreeSet::new();
  for installable in installables {
    let what = installable.what();
    for buildable in installable.to_buildables(store)? {
      if let Some(drv_path) = buildable.drv_path {
        drvs.insert(drv_path);
        continue;
      }
      if !use_deriver {
        continue;
      }
      for path in buildable.outputs.into_values() {
        match store.query_deriver(&path).map_err(InstallableError::store(&what))? {
          Some(deriver) => {
            drvs.insert(deriver);
          }
          None => {
            return Err(InstallableError::NoDeriver {
              what: what.clone(),
              path,
            });
          }
        }
      }
    }
  }
  Ok(drvs)
}
