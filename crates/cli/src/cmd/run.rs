//! Implementation of the `sprout run` command.
//!
//! The installable must evaluate to an app. Store paths in the app's context
//! that are not valid yet are built from their recorded derivers before the
//! program starts.

use std::collections::BTreeSet;
use std::process::{Command as Process, ExitStatus};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};

use sprout_lib::installable::InstallableError;
use sprout_lib::store::{BuildRequest, Store, StorePath};

use crate::command::{Command, Exit, InstallableArg, SearchPaths};

/// Apps live under `apps.<system>` with `defaultApp.<system>` as the default.
struct AppSearch;

impl SearchPaths for AppSearch {
  fn default_attr_paths(&self, system: &str) -> Vec<String> {
    vec![format!("defaultApp.{system}")]
  }

  fn prefixes(&self, system: &str) -> Vec<String> {
    vec![format!("apps.{system}.")]
  }
}

#[derive(Args)]
pub struct RunCommand {
  #[command(flatten)]
  arg: InstallableArg,

  /// Arguments passed to the program
  #[arg(last = true, value_name = "ARGS")]
  args: Vec<String>,
}

impl Command for RunCommand {
  fn run(&mut self) -> Result<()> {
    let installable = self.arg.installable(&AppSearch)?;
    let evaluator = self.arg.source.eval.get_eval_state()?;
    let store = self.arg.source.eval.get_store()?;

    let app = installable.to_app(evaluator.as_ref())?;
    realise_context(store.as_ref(), &installable.what(), &app.context)?;

    info!(program = %app.program.display(), "running app");
    let status = Process::new(&app.program)
      .args(&self.args)
      .status()
      .with_context(|| format!("Failed to run '{}'", app.program.display()))?;

    match exit_for(status) {
      Some(exit) => Err(exit.into()),
      None => Ok(()),
    }
  }
}

/// The exit a failed program passes on; killed programs exit with 1.
fn exit_for(status: ExitStatus) -> Option<Exit> {
  if status.success() {
    return None;
  }
  let code = status.code().and_then(|code| u8::try_from(code).ok()).unwrap_or(1);
  Some(Exit(code.max(1)))
}

/// Build every context path that is not valid yet, in one batch.
fn realise_context(store: &dyn Store, what: &str, context: &BTreeSet<StorePath>) -> Result<(), InstallableError> {
  let mut requests = BTreeSet::new();
  for path in context {
    if store.is_valid_path(path).map_err(InstallableError::store(what))? {
      continue;
    }
    let deriver = store
      .query_deriver(path)
      .map_err(InstallableError::store(what))?
      .ok_or_else(|| InstallableError::NoDeriver {
        what: what.to_string(),
        path: path.clone(),
      })?;
    debug!(path = %path, deriver = %deriver, "context path needs building");
    requests.insert(BuildRequest::all_outputs(deriver));
  }

  if requests.is_empty() {
    return Ok(());
  }
  let requests: Vec<BuildRequest> = requests.into_iter().collect();
  store
    .build_paths(&requests)
    .map_err(InstallableError::store(what))
}
