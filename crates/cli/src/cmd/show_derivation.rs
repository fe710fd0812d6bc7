//! Implementation of the `sprout show-derivation` command.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Context, Result};
use clap::Args;

use sprout_lib::build::to_derivations;
use sprout_lib::store::{Derivation, Store, StorePath};

use crate::command::{Command, InstallablesArgs, PackageSearch};
use crate::output::print_json;

#[derive(Args)]
pub struct ShowDerivationCommand {
  #[command(flatten)]
  args: InstallablesArgs,

  /// Include the derivations of all dependencies
  #[arg(short = 'r', long)]
  recursive: bool,
}

impl Command for ShowDerivationCommand {
  fn run(&mut self) -> Result<()> {
    let installables = self.args.installables(&PackageSearch)?;
    let store = self.args.source.eval.get_store()?;

    let roots = to_derivations(store.as_ref(), &installables, true)?;
    let drvs = read_derivations(store.as_ref(), roots, self.recursive)?;

    let json: BTreeMap<String, Derivation> = drvs.into_iter().map(|(path, drv)| (path.to_string(), drv)).collect();
    print_json(&json)
  }
}

fn read_derivations(
  store: &dyn Store,
  roots: BTreeSet<StorePath>,
  recursive: bool,
) -> Result<BTreeMap<StorePath, Derivation>> {
  let mut drvs = BTreeMap::new();
  let mut queue: VecDeque<StorePath> = roots.into_iter().collect();
  while let Some(drv_path) = queue.pop_front() {
    if drvs.contains_key(&drv_path) {
      continue;
    }
    let drv = store
      .read_derivation(&drv_path)
      .with_context(|| format!("Failed to read derivation '{drv_path}'"))?;
    if recursive {
      queue.extend(drv.input_drvs.keys().cloned());
    }
    drvs.insert(drv_path, drv);
  }
  Ok(drvs)
}
