//! Derivations: immutable build recipes stored as `<hash>-<name>.drv`.
//!
//! Output paths are a function of the recipe alone: they are computed from the
//! hash of the derivation with every output path blanked, so instantiating the
//! same recipe twice always yields the same drv path and the same outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::StoreError;
use super::path::{StorePath, is_valid_name};
use crate::consts::DRV_EXTENSION;
use crate::util::hash::{Hashable, ObjectHash};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Derivation {
  pub name: String,
  pub system: String,
  pub builder: String,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Output name to output path; paths are `None` until the outputs are computed.
  pub outputs: BTreeMap<String, Option<StorePath>>,
  #[serde(default)]
  pub input_drvs: BTreeMap<StorePath, BTreeSet<String>>,
  #[serde(default)]
  pub input_srcs: BTreeSet<StorePath>,
}

impl Hashable for Derivation {}

impl Derivation {
  pub fn new(name: impl Into<String>, system: impl Into<String>, builder: impl Into<String>) -> Self {
    let mut outputs = BTreeMap::new();
    outputs.insert("out".to_string(), None);
    Self {
      name: name.into(),
      system: system.into(),
      builder: builder.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      outputs,
      input_drvs: BTreeMap::new(),
      input_srcs: BTreeSet::new(),
    }
  }

  pub fn output_names(&self) -> BTreeSet<String> {
    self.outputs.keys().cloned().collect()
  }

  pub fn output_path(&self, output: &str) -> Option<&StorePath> {
    self.outputs.get(output).and_then(Option::as_ref)
  }

  /// Output names paired with their computed paths.
  pub fn output_paths(&self) -> BTreeMap<String, StorePath> {
    self
      .outputs
      .iter()
      .filter_map(|(name, path)| path.clone().map(|p| (name.clone(), p)))
      .collect()
  }

  /// Compute every output path and expose it to the builder as an
  /// environment variable named after the output.
  pub fn compute_outputs(&mut self, store_dir: &Path) -> Result<(), StoreError> {
    if !is_valid_name(&self.name) {
      return Err(StoreError::InvalidDerivation(format!(
        "invalid derivation name '{}'",
        self.name
      )));
    }
    if self.outputs.is_empty() {
      return Err(StoreError::InvalidDerivation(format!(
        "derivation '{}' has no outputs",
        self.name
      )));
    }

    let names = self.output_names();
    for output in &names {
      self.outputs.insert(output.clone(), None);
      self.env.insert(output.clone(), String::new());
    }
    let masked = self.compute_hash().map_err(StoreError::Serialize)?;
    let store_dir_str = store_dir.to_string_lossy();

    for output in &names {
      let hash = ObjectHash::of_parts(&["output", output, &masked.0, &store_dir_str]);
      let path = StorePath::new(store_dir, &hash.0, &output_path_name(&self.name, output))?;
      self.env.insert(output.clone(), path.to_string());
      self.outputs.insert(output.clone(), Some(path));
    }
    Ok(())
  }

  /// The store path this derivation is written to. Outputs must be computed.
  pub fn drv_path(&self, store_dir: &Path) -> Result<StorePath, StoreError> {
    if self.outputs.values().any(Option::is_none) {
      return Err(StoreError::InvalidDerivation(format!(
        "outputs of '{}' have not been computed",
        self.name
      )));
    }
    let hash = self.compute_hash().map_err(StoreError::Serialize)?;
    let drv_hash = ObjectHash::of_parts(&["drv", &hash.0, &store_dir.to_string_lossy()]);
    Ok(StorePath::new(
      store_dir,
      &drv_hash.0,
      &format!("{}{}", self.name, DRV_EXTENSION),
    )?)
  }

  /// Every store path this derivation refers to: input derivations and sources.
  pub fn references(&self) -> BTreeSet<StorePath> {
    self
      .input_drvs
      .keys()
      .cloned()
      .chain(self.input_srcs.iter().cloned())
      .collect()
  }
}

/// `out` keeps the bare derivation name; other outputs get a `-<output>` suffix.
pub fn output_path_name(drv_name: &str, output: &str) -> String {
  if output == "out" {
    drv_name.to_string()
  } else {
    format!("{drv_name}-{output}")
  }
}
