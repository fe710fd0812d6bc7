//! Implementation of the `sprout flake` subcommands.

mod check;
mod info;
mod init;
mod registry;

use anyhow::Result;
use clap::{Args, Subcommand};

use sprout_lib::flake::FlakeRef;

use crate::command::{Command, EvalArgs, FlakeLockArgs};

#[derive(Args)]
pub struct FlakeCommand {
  #[command(subcommand)]
  action: FlakeAction,
}

#[derive(Subcommand)]
enum FlakeAction {
  /// List the entries of every flake registry
  List,
  /// Add or replace an entry in the user registry
  Add(registry::AddArgs),
  /// Remove an entry from the user registry
  Remove(registry::RemoveArgs),
  /// Pin a registry entry to the source it currently resolves to
  Pin(registry::PinArgs),
  /// Show the source and outputs of a flake
  Info(info::InfoArgs),
  /// Lock every input of a flake again and write the lock file
  Update(info::UpdateArgs),
  /// Evaluate the outputs of a flake and build its checks
  Check(check::CheckArgs),
  /// Create a flake.lua in the current directory
  Init(init::InitArgs),
  /// Copy the source of a flake into a directory
  Clone(init::CloneArgs),
}

impl Command for FlakeCommand {
  fn run(&mut self) -> Result<()> {
    match &mut self.action {
      FlakeAction::List => registry::list(),
      FlakeAction::Add(args) => registry::add(args),
      FlakeAction::Remove(args) => registry::remove(args),
      FlakeAction::Pin(args) => registry::pin(args),
      FlakeAction::Info(args) => info::info(args),
      FlakeAction::Update(args) => info::update(args),
      FlakeAction::Check(args) => check::check(args),
      FlakeAction::Init(args) => init::init(args),
      FlakeAction::Clone(args) => init::clone(args),
    }
  }
}

/// A flake reference argument plus what is needed to load it.
#[derive(Args)]
pub struct FlakeArgs {
  #[command(flatten)]
  pub eval: EvalArgs,

  #[command(flatten)]
  pub lock: FlakeLockArgs,

  /// The flake to operate on
  #[arg(value_name = "FLAKE", default_value = ".")]
  pub flake: String,
}

impl FlakeArgs {
  pub fn flake_ref(&self) -> Result<FlakeRef> {
    Ok(FlakeRef::parse(&self.flake)?)
  }
}
