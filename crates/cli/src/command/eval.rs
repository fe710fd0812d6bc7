use std::rc::Rc;

use clap::Args;
use tracing::debug;

use sprout_lib::eval::{EvalError, Evaluator, LuaEvaluator};
use sprout_lib::flake::{Registries, Registry};
use sprout_lib::installable::EvaluatorProvider;
use sprout_lib::store::Store;

use super::StoreArgs;

/// A Lua evaluator on top of the store, created on first use.
#[derive(Args, Default)]
pub struct EvalArgs {
  #[command(flatten)]
  pub store: StoreArgs,

  /// Resolve flake id FROM to the flake reference TO
  #[arg(long = "override-flake", num_args = 2, value_names = ["FROM", "TO"], action = clap::ArgAction::Append)]
  pub override_flake: Vec<String>,

  #[arg(skip)]
  evaluator: Option<Rc<LuaEvaluator>>,
}

impl EvalArgs {
  pub fn get_store(&mut self) -> Result<Rc<dyn Store>, EvalError> {
    Ok(self.store.get_store()?)
  }

  pub fn registries(&self) -> Registries {
    let overrides = self
      .override_flake
      .chunks(2)
      .filter_map(|pair| match pair {
        [from, to] => Some((from.clone(), to.clone())),
        _ => None,
      });
    Registries::from_env().with_flags(Registry::from_overrides(overrides))
  }

  pub fn get_eval_state(&mut self) -> Result<Rc<LuaEvaluator>, EvalError> {
    if let Some(evaluator) = &self.evaluator {
      return Ok(evaluator.clone());
    }
    let store = self.get_store()?;
    debug!(overrides = self.override_flake.len() / 2, "starting evaluator");
    let evaluator = Rc::new(LuaEvaluator::new(store)?.with_registries(self.registries()));
    self.evaluator = Some(evaluator.clone());
    Ok(evaluator)
  }
}

impl EvalArgs {
  /// Release the evaluator; the store it holds stays open until `self` goes.
  fn drop_evaluator(&mut self) {
    if self.evaluator.take().is_some() {
      debug!("released evaluator");
    }
  }
}

impl EvaluatorProvider for EvalArgs {
  fn evaluator(&mut self) -> Result<Rc<dyn Evaluator>, EvalError> {
    Ok(self.get_eval_state()?)
  }
}

impl Drop for EvalArgs {
  fn drop(&mut self) {
    self.drop_evaluator();
  }
}
