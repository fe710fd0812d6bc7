use std::collections::BTreeMap;

use anyhow::{Result, bail};
use clap::Args;
use serde_json::json;

use sprout_lib::eval::{Evaluator, Value};
use sprout_lib::flake::{FlakeRef, LockFileMode, LockedInput};

use super::FlakeArgs;
use crate::output::{print_json, print_mapping, print_stat, print_success, truncate_hash};

#[derive(Args)]
pub struct InfoArgs {
  #[command(flatten)]
  flake: FlakeArgs,

  /// Print the information, including output names, as JSON
  #[arg(long)]
  json: bool,
}

#[derive(Args)]
pub struct UpdateArgs {
  #[command(flatten)]
  flake: FlakeArgs,
}

pub fn info(args: &mut InfoArgs) -> Result<()> {
  let flake_ref = args.flake.flake_ref()?;
  let mode = args.flake.lock.lock_file_mode();
  let evaluator = args.flake.eval.get_eval_state()?;
  let loaded = evaluator.load_flake(&flake_ref, mode)?;
  let flake = &loaded.flake;

  if args.json {
    let outputs: Vec<String> = match loaded.outputs.force()? {
      Value::Attrs(attrs) => attrs.keys().cloned().collect(),
      _ => Vec::new(),
    };
    return print_json(&json!({
      "description": flake.description,
      "originalUrl": flake.original.to_string(),
      "resolvedUrl": flake.resolved.to_string(),
      "url": flake.source.locked.to_string(),
      "path": flake.source.store_path.to_string(),
      "revision": flake.source.rev,
      "narHash": flake.source.nar_hash,
      "outputs": outputs,
    }));
  }

  print_stat("Resolved URL", &flake.resolved.to_string());
  print_stat("Locked URL", &flake.source.locked.to_string());
  if let Some(description) = &flake.description {
    print_stat("Description", description);
  }
  print_stat("Path", &flake.source.store_path.to_string());
  if let Some(rev) = &flake.source.rev {
    print_stat("Revision", truncate_hash(rev));
  }
  print_stat("NAR hash", &flake.source.nar_hash);
  if !loaded.lock.inputs.is_empty() {
    println!("Inputs:");
    print_inputs(&loaded.lock.inputs, 0);
  }
  Ok(())
}

fn print_inputs(inputs: &BTreeMap<String, LockedInput>, depth: usize) {
  for (name, input) in inputs {
    print_mapping(&format!("{}{name}", "  ".repeat(depth)), &input.locked);
    print_inputs(&input.inputs, depth + 1);
  }
}

pub fn update(args: &mut UpdateArgs) -> Result<()> {
  let flake_ref = args.flake.flake_ref()?;
  if !matches!(flake_ref, FlakeRef::Path { .. }) {
    bail!("cannot update lock file of flake '{flake_ref}': it is not a local path");
  }
  let mode = LockFileMode::from_flags(true, true, args.flake.lock.use_registries);
  let evaluator = args.flake.eval.get_eval_state()?;
  let loaded = evaluator.load_flake(&flake_ref, mode)?;

  print_success(&format!("Updated {}", loaded.flake.lock_path().display()));
  for (name, input) in &loaded.lock.inputs {
    print_mapping(name, &input.locked);
  }
  Ok(())
}
