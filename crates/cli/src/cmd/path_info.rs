//! Implementation of the `sprout path-info` command.

use anyhow::{Context, Result, anyhow};
use clap::Args;

use sprout_lib::build::RealiseMode;

use crate::command::{Command, PackageSearch, StorePathsArgs};
use crate::output::print_json;

#[derive(Args)]
pub struct PathInfoCommand {
  #[command(flatten)]
  paths: StorePathsArgs,

  /// Also print the content hash of each path
  #[arg(long)]
  hash: bool,

  /// Print validity records as JSON
  #[arg(long)]
  json: bool,
}

impl Command for PathInfoCommand {
  fn run(&mut self) -> Result<()> {
    let paths = self.paths.store_paths(&PackageSearch, RealiseMode::NoBuild)?;
    let store = self.paths.source.eval.get_store()?;

    let mut infos = Vec::new();
    for path in &paths {
      let info = store
        .query_path_info(path)
        .with_context(|| format!("Failed to query '{path}'"))?
        .ok_or_else(|| anyhow!("path '{path}' is not valid"))?;
      infos.push(info);
    }

    if self.json {
      return print_json(&infos);
    }
    for info in &infos {
      if self.hash {
        println!("{}\t{}", info.path, info.nar_hash);
      } else {
        println!("{}", info.path);
      }
    }
    Ok(())
  }
}
