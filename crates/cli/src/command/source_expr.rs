use std::path::PathBuf;
use std::rc::Rc;

use clap::Args;

use sprout_lib::installable::{Installable, InstallableError, SourceExprOptions, parse_installable, parse_installables};
use sprout_lib::platform::current_system;
use sprout_lib::store::Store;

use super::{EvalArgs, FlakeLockArgs};

/// Where a command looks for attributes inside a flake or expression.
///
/// The defaults find packages; commands looking for something else override
/// the methods.
pub trait SearchPaths {
  /// Tried for an empty fragment, and as `D.<fragment>` after the prefixes.
  fn default_attr_paths(&self, system: &str) -> Vec<String> {
    vec![format!("defaultPackage.{system}")]
  }

  fn prefixes(&self, system: &str) -> Vec<String> {
    vec![format!("packages.{system}."), format!("legacyPackages.{system}.")]
  }
}

/// The package search lists, unchanged.
pub struct PackageSearch;

impl SearchPaths for PackageSearch {}

/// Installables are parsed relative to `--file` or the default expression.
#[derive(Args, Default)]
pub struct SourceExprArgs {
  #[command(flatten)]
  pub eval: EvalArgs,

  #[command(flatten)]
  pub lock: FlakeLockArgs,

  /// Interpret attribute paths relative to this Lua file
  #[arg(short = 'f', long = "file", value_name = "FILE")]
  pub file: Option<PathBuf>,
}

impl SourceExprArgs {
  pub fn options(&self, search: &dyn SearchPaths, use_default_installables: bool) -> SourceExprOptions {
    let system = current_system();
    SourceExprOptions {
      file: self.file.clone(),
      lock_file_mode: self.lock.lock_file_mode(),
      default_attr_paths: search.default_attr_paths(&system),
      prefixes: search.prefixes(&system),
      use_default_installables,
    }
  }

  pub fn parse_installables(
    &mut self,
    search: &dyn SearchPaths,
    use_default_installables: bool,
    strings: &[String],
  ) -> Result<Vec<Installable>, InstallableError> {
    let opts = self.options(search, use_default_installables);
    let store = self.store_for(strings)?;
    parse_installables(store.as_ref(), &mut self.eval, &opts, strings)
  }

  pub fn parse_installable(&mut self, search: &dyn SearchPaths, input: &str) -> Result<Installable, InstallableError> {
    let opts = self.options(search, true);
    let store = self.store_for(&[input.to_string()])?;
    parse_installable(store.as_ref(), &mut self.eval, &opts, input)
  }

  fn store_for(&mut self, strings: &[String]) -> Result<Rc<dyn Store>, InstallableError> {
    self.eval.get_store().map_err(|source| InstallableError::Eval {
      what: strings.join(" "),
      source,
    })
  }
}
