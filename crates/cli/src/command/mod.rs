//! Building blocks shared by the subcommands.
//!
//! Each subcommand is a clap `Args` struct assembled from the capability
//! structs in this module (store access, evaluation, lock file flags, source
//! expressions and installables) and implements [`Command`].

pub mod eval;
pub mod flake_lock;
pub mod installables;
pub mod registry;
pub mod source_expr;
pub mod store;

use anyhow::Result;

pub use eval::EvalArgs;
pub use flake_lock::FlakeLockArgs;
pub use installables::{InstallableArg, InstallablesArgs, StorePathArg, StorePathsArgs};
pub use registry::{CommandRegistry, CommandSpec, RegistryError};
pub use source_expr::{PackageSearch, SearchPaths, SourceExprArgs};
pub use store::StoreArgs;

pub trait Command {
  fn run(&mut self) -> Result<()>;
}

/// Returned by a command that should exit with `code` without an error message.
#[derive(Debug, thiserror::Error)]
#[error("exited with status {0}")]
pub struct Exit(pub u8);
