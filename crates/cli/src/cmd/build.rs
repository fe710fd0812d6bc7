//! Implementation of the `sprout build` command.

use std::time::Instant;

use anyhow::Result;
use clap::Args;
use tracing::info;

use sprout_lib::build::{RealiseMode, build};

use crate::command::{Command, InstallablesArgs, PackageSearch};
use crate::output::{format_duration, print_info, print_json};

#[derive(Args)]
pub struct BuildCommand {
  #[command(flatten)]
  args: InstallablesArgs,

  /// Show what would be built without building anything
  #[arg(long, conflicts_with = "no_build")]
  dry_run: bool,

  /// Fail if an output is missing instead of building it
  #[arg(long)]
  no_build: bool,

  /// Print the realised derivations and outputs as JSON
  #[arg(long)]
  json: bool,
}

impl BuildCommand {
  fn mode(&self) -> RealiseMode {
    if self.dry_run {
      RealiseMode::DryRun
    } else if self.no_build {
      RealiseMode::NoBuild
    } else {
      RealiseMode::Build
    }
  }
}

impl Command for BuildCommand {
  fn run(&mut self) -> Result<()> {
    let start = Instant::now();
    let installables = self.args.installables(&PackageSearch)?;
    let store = self.args.source.eval.get_store()?;
    let mode = self.mode();

    let buildables = build(store.as_ref(), mode, &installables)?;
    info!(count = buildables.len(), elapsed = %format_duration(start.elapsed()), "realised installables");

    if self.json {
      return print_json(&buildables);
    }
    if mode == RealiseMode::DryRun {
      print_info("Dry run - nothing was built");
    }
    for buildable in &buildables {
      for path in buildable.outputs.values() {
        println!("{path}");
      }
    }
    Ok(())
  }
}
