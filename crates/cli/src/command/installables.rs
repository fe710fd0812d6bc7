use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;

use sprout_lib::build::{RealiseMode, to_store_path, to_store_paths};
use sprout_lib::installable::Installable;
use sprout_lib::store::StorePath;

use super::{SearchPaths, SourceExprArgs};

/// Zero or more installables; none means the default installable.
#[derive(Args, Default)]
pub struct InstallablesArgs {
  #[command(flatten)]
  pub source: SourceExprArgs,

  /// Store paths, flake references, attribute paths or `(expressions)`
  #[arg(value_name = "INSTALLABLES")]
  pub installables: Vec<String>,
}

impl InstallablesArgs {
  pub fn installables(&mut self, search: &dyn SearchPaths) -> Result<Vec<Installable>> {
    let strings = self.installables.clone();
    Ok(self.source.parse_installables(search, true, &strings)?)
  }
}

/// Exactly one installable, `.` when omitted.
#[derive(Args, Default)]
pub struct InstallableArg {
  #[command(flatten)]
  pub source: SourceExprArgs,

  #[arg(value_name = "INSTALLABLE", default_value = ".")]
  pub installable: String,
}

impl InstallableArg {
  pub fn installable(&mut self, search: &dyn SearchPaths) -> Result<Installable> {
    let input = self.installable.clone();
    Ok(self.source.parse_installable(search, &input)?)
  }
}

/// Installables realised to store paths, or every valid path with `--all`.
#[derive(Args, Default)]
pub struct StorePathsArgs {
  #[command(flatten)]
  pub source: SourceExprArgs,

  /// Include the closure of every path
  #[arg(short = 'r', long)]
  pub recursive: bool,

  /// Operate on every valid path in the store
  #[arg(long, conflicts_with = "installables")]
  pub all: bool,

  #[arg(value_name = "INSTALLABLES")]
  pub installables: Vec<String>,
}

impl StorePathsArgs {
  pub fn store_paths(&mut self, search: &dyn SearchPaths, mode: RealiseMode) -> Result<BTreeSet<StorePath>> {
    let strings = self.installables.clone();
    let installables = self.source.parse_installables(search, !self.all, &strings)?;
    let store = self.source.eval.get_store()?;
    let paths = if self.all {
      store.query_all_valid_paths().context("Failed to list valid paths")?
    } else {
      to_store_paths(store.as_ref(), mode, &installables)?
    };

    if self.recursive {
      return store.closure(&paths).context("Failed to compute closure");
    }
    Ok(paths)
  }
}

/// Exactly one installable that must realise to exactly one store path.
#[derive(Args, Default)]
pub struct StorePathArg {
  #[command(flatten)]
  pub source: SourceExprArgs,

  #[arg(value_name = "INSTALLABLE")]
  pub path: String,
}

impl StorePathArg {
  pub fn store_path(&mut self, search: &dyn SearchPaths, mode: RealiseMode) -> Result<StorePath> {
    let input = self.path.clone();
    let installable = self.source.parse_installable(search, &input)?;
    let store = self.source.eval.get_store()?;
    Ok(to_store_path(store.as_ref(), mode, &installable)?)
  }
}
