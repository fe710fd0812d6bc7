use anyhow::{Context, Result, bail};
use clap::Args;

use sprout_lib::flake::resolve::FlakeSource;
use sprout_lib::flake::{FlakeRef, Registries, Registry};
use sprout_lib::platform::paths::user_registry_path;

use crate::command::EvalArgs;
use crate::output::{print_mapping, print_success};

#[derive(Args)]
pub struct AddArgs {
  /// Flake id to add, with or without `flake:`
  #[arg(value_name = "FROM")]
  from: String,

  /// Flake reference the id resolves to
  #[arg(value_name = "TO")]
  to: String,
}

#[derive(Args)]
pub struct RemoveArgs {
  #[arg(value_name = "ID")]
  id: String,
}

#[derive(Args)]
pub struct PinArgs {
  #[command(flatten)]
  eval: EvalArgs,

  #[arg(value_name = "ID")]
  id: String,
}

fn registry_id(input: &str) -> String {
  input.strip_prefix("flake:").unwrap_or(input).to_string()
}

pub fn list() -> Result<()> {
  let registries = Registries::from_env()
    .load_all()
    .context("Failed to load flake registries")?;
  for (source, registry) in &registries {
    for (id, uri) in registry.entries() {
      print_mapping(&format!("{} flake:{id}", source.as_str()), uri);
    }
  }
  Ok(())
}

pub fn add(args: &AddArgs) -> Result<()> {
  FlakeRef::parse(&args.to).with_context(|| format!("Invalid flake reference '{}'", args.to))?;
  let path = user_registry_path();
  let mut registry = Registry::load(&path)?;
  let id = registry_id(&args.from);
  registry.add(&id, &args.to);
  registry.save(&path)?;
  print_success(&format!("Added flake:{id} to {}", path.display()));
  Ok(())
}

pub fn remove(args: &RemoveArgs) -> Result<()> {
  let path = user_registry_path();
  let mut registry = Registry::load(&path)?;
  let id = registry_id(&args.id);
  if !registry.remove(&id) {
    bail!("flake:{id} is not in the user registry");
  }
  registry.save(&path)?;
  print_success(&format!("Removed flake:{id}"));
  Ok(())
}

/// Replace the entry for `id` with the locked reference of what it resolves to now.
pub fn pin(args: &mut PinArgs) -> Result<()> {
  let id = registry_id(&args.id);
  let evaluator = args.eval.get_eval_state()?;
  let target = evaluator.lookup(&FlakeRef::parse(&format!("flake:{id}"))?)?;
  let source = evaluator.fetch(&target)?;

  let path = user_registry_path();
  let mut registry = Registry::load(&path)?;
  registry.add(&id, source.locked.to_string());
  registry.save(&path)?;
  print_success(&format!("Pinned flake:{id} to {}", source.locked));
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registry_ids_drop_the_scheme() {
    assert_eq!(registry_id("flake:tools"), "tools");
    assert_eq!(registry_id("tools"), "tools");
  }
}
