mod build;
mod eval;
mod flake;
mod ls_store;
mod path_info;
mod run;
mod show_derivation;

use crate::command::{CommandRegistry, CommandSpec, RegistryError};

/// The commands `sprout` ships with.
pub fn builtin_registry() -> Result<CommandRegistry, RegistryError> {
  let table = [
    ("build", CommandSpec::of::<build::BuildCommand>("Build installables and print their output paths")),
    ("eval", CommandSpec::of::<eval::EvalCommand>("Evaluate an installable and print its value")),
    ("run", CommandSpec::of::<run::RunCommand>("Run an app")),
    ("path-info", CommandSpec::of::<path_info::PathInfoCommand>("Show information about store paths")),
    (
      "show-derivation",
      CommandSpec::of::<show_derivation::ShowDerivationCommand>("Show the derivations behind installables as JSON"),
    ),
    ("ls-store", CommandSpec::of::<ls_store::LsStoreCommand>("List the files of a store path")),
    ("flake", CommandSpec::of::<flake::FlakeCommand>("Manage flakes and flake registries")),
  ];

  let mut registry = CommandRegistry::new();
  for (name, spec) in table {
    registry.register(name, spec)?;
  }
  Ok(registry)
}
