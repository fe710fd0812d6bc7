//! Implementation of the `sprout eval` command.

use anyhow::{Context, Result};
use clap::Args;

use crate::command::{Command, InstallableArg, PackageSearch};
use crate::output::print_json;

#[derive(Args)]
pub struct EvalCommand {
  #[command(flatten)]
  arg: InstallableArg,

  /// Print the value as JSON, strings included
  #[arg(long)]
  json: bool,
}

impl Command for EvalCommand {
  fn run(&mut self) -> Result<()> {
    let installable = self.arg.installable(&PackageSearch)?;
    let evaluator = self.arg.source.eval.get_eval_state()?;
    let value = installable.to_value(evaluator.as_ref())?;
    let json = value
      .to_json()
      .with_context(|| format!("Failed to evaluate '{}'", installable.what()))?;

    match json {
      serde_json::Value::String(s) if !self.json => println!("{s}"),
      other => print_json(&other)?,
    }
    Ok(())
  }
}
