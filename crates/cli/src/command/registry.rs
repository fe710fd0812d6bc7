//! The table of subcommands `main` dispatches to.

use std::collections::BTreeMap;

use clap::{ArgMatches, Args, FromArgMatches};
use thiserror::Error;

use super::Command;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("command '{0}' is already registered")]
  Duplicate(String),
}

pub type Factory = fn(&ArgMatches) -> Result<Box<dyn Command>, clap::Error>;

/// How to describe, parse and construct one subcommand.
#[derive(Clone, Copy)]
pub struct CommandSpec {
  pub about: &'static str,
  /// Adds the command's arguments to its clap definition.
  pub augment: fn(clap::Command) -> clap::Command,
  pub factory: Factory,
}

impl CommandSpec {
  /// The description of a command whose arguments are derived with clap.
  pub fn of<T>(about: &'static str) -> Self
  where
    T: Args + FromArgMatches + Command + 'static,
  {
    Self {
      about,
      augment: T::augment_args,
      factory: |matches| Ok(Box::new(T::from_arg_matches(matches)?)),
    }
  }
}

#[derive(Default)]
pub struct CommandRegistry {
  commands: BTreeMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every command shipped with sprout.
  pub fn builtin() -> Result<Self, RegistryError> {
    crate::cmd::builtin_registry()
  }

  pub fn register(&mut self, name: &'static str, spec: CommandSpec) -> Result<(), RegistryError> {
    if self.commands.contains_key(name) {
      return Err(RegistryError::Duplicate(name.to_string()));
    }
    self.commands.insert(name, spec);
    Ok(())
  }

  pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
    self.commands.get(name)
  }

  /// Attach every registered command to `root` as a subcommand.
  pub fn augment(&self, mut root: clap::Command) -> clap::Command {
    for (name, spec) in &self.commands {
      root = root.subcommand((spec.augment)(clap::Command::new(*name).about(spec.about)));
    }
    root
  }
}
