//! Installables: what users name on the command line.
//!
//! | Variant     | Written as                         | Evaluable |
//! |-------------|------------------------------------|-----------|
//! | `StorePath` | `/sprout/store/<hash>-hello`       | no        |
//! | `AttrPath`  | `hello`, `packages.x86_64-linux.a` | yes       |
//! | `Flake`     | `.#hello`, `github:o/r#tools`      | yes       |
//! | `Expr`      | `(sprout.derivation{ ... })`       | yes       |
//!
//! See [`parse`] for how strings become installables.

pub mod parse;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use parse::{EvaluatorProvider, SourceExprOptions, parse_installable, parse_installables};

use crate::build::Buildable;
use crate::eval::{EvalError, Evaluator, Value};
use crate::flake::FlakeRef;
use crate::store::{Store, StoreError, StorePath};

#[derive(Debug, Error)]
pub enum InstallableError {
  #[error("'{what}' cannot be built: {reason}")]
  NotBuildable { what: String, reason: String },

  #[error("'{what}' has no expression to evaluate")]
  NotEvaluable { what: String },

  #[error("'{what}' must resolve to exactly one {expected}, but resolved to {count}")]
  Ambiguous {
    what: String,
    expected: &'static str,
    count: usize,
  },

  #[error("cannot find installable '{what}'")]
  Unresolved { what: String },

  #[error("build of '{what}' failed in '{drv_path}': {message}")]
  BuildFailure {
    what: String,
    drv_path: StorePath,
    message: String,
  },

  #[error("'{what}' is not an app: {reason}")]
  AppShape { what: String, reason: String },

  #[error("output '{path}' of '{what}' is not valid and building is disabled")]
  MissingOutput { what: String, path: StorePath },

  #[error("cannot determine the derivation that produced '{path}' for '{what}'")]
  NoDeriver { what: String, path: StorePath },

  #[error("error evaluating '{what}': {source}")]
  Eval {
    what: String,
    #[source]
    source: EvalError,
  },

  #[error("store error for '{what}': {source}")]
  Store {
    what: String,
    #[source]
    source: StoreError,
  },
}

impl InstallableError {
  pub fn eval(what: &str) -> impl FnOnce(EvalError) -> Self {
    let what = what.to_string();
    move |source| InstallableError::Eval { what, source }
  }

  pub fn store(what: &str) -> impl FnOnce(StoreError) -> Self {
    let what = what.to_string();
    move |source| InstallableError::Store { what, source }
  }

  /// The identifier of the installable the error is about.
  pub fn what(&self) -> &str {
    match self {
      InstallableError::NotBuildable { what, .. }
      | InstallableError::NotEvaluable { what }
      | InstallableError::Ambiguous { what, .. }
      | InstallableError::Unresolved { what }
      | InstallableError::BuildFailure { what, .. }
      | InstallableError::AppShape { what, .. }
      | InstallableError::MissingOutput { what, .. }
      | InstallableError::NoDeriver { what, .. }
      | InstallableError::Eval { what, .. }
      | InstallableError::Store { what, .. } => what,
    }
  }
}

/// A program to run together with the store paths it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
  pub context: BTreeSet<StorePath>,
  pub program: PathBuf,
}

#[derive(Debug, Clone)]
pub enum Installable {
  StorePath {
    path: StorePath,
  },
  AttrPath {
    attr_path: String,
    value: Value,
  },
  Flake {
    flake_ref: FlakeRef,
    attr: String,
    value: Value,
  },
  Expr {
    text: String,
    value: Value,
  },
}

impl Installable {
  pub fn what(&self) -> String {
    match self {
      Installable::StorePath { path } => path.to_string(),
      Installable::AttrPath { attr_path, .. } => attr_path.clone(),
      Installable::Flake { flake_ref, attr, .. } => format!("{flake_ref}#{attr}"),
      Installable::Expr { text, .. } => text.clone(),
    }
  }

  fn value(&self) -> Option<&Value> {
    match self {
      Installable::StorePath { .. } => None,
      Installable::AttrPath { value, .. } | Installable::Flake { value, .. } | Installable::Expr { value, .. } => {
        Some(value)
      }
    }
  }

  pub fn to_buildables(&self, store: &dyn Store) -> Result<Vec<Buildable>, InstallableError> {
    let what = self.what();
    let value = match (self, self.value()) {
      (Installable::StorePath { path }, _) => return Ok(vec![Buildable::from_output("out", path.clone())]),
      (_, Some(value)) => value.force().map_err(InstallableError::eval(&what))?,
      (_, None) => return Err(InstallableError::NotEvaluable { what }),
    };

    match value {
      Value::List(items) => items
        .iter()
        .map(|item| {
          let item = item.force().map_err(InstallableError::eval(&what))?;
          derivation_buildable(store, &what, &item)
        })
        .collect(),
      value => Ok(vec![derivation_buildable(store, &what, &value)?]),
    }
  }

  pub fn to_buildable(&self, store: &dyn Store) -> Result<Buildable, InstallableError> {
    let mut buildables = self.to_buildables(store)?;
    match buildables.len() {
      1 => Ok(buildables.remove(0)),
      count => Err(InstallableError::Ambiguous {
        what: self.what(),
        expected: "derivation",
        count,
      }),
    }
  }

  pub fn to_value(&self, evaluator: &dyn Evaluator) -> Result<Value, InstallableError> {
    match self.value() {
      Some(value) => evaluator.force(value).map_err(InstallableError::eval(&self.what())),
      None => Err(InstallableError::NotEvaluable { what: self.what() }),
    }
  }

  /// Interpret the value as `{ type = "app", program = "...", context = { ... } }`.
  ///
  /// `type` and `context` are optional. `program` must point into the store;
  /// the store path containing it is part of the context.
  pub fn to_app(&self, evaluator: &dyn Evaluator) -> Result<App, InstallableError> {
    let what = self.what();
    let value = self.to_value(evaluator)?;
    let store = evaluator.store();
    let shape = |reason: String| InstallableError::AppShape {
      what: what.clone(),
      reason,
    };
    let eval_err = |e: EvalError| InstallableError::Eval {
      what: what.clone(),
      source: e,
    };

    if !matches!(value, Value::Attrs(_)) {
      return Err(shape(format!("expected an attribute set, got {}", value.type_name())));
    }

    match value.get_attr("type").map_err(eval_err)? {
      None => {}
      Some(Value::String(t)) if t == "app" => {}
      Some(other) => return Err(shape(format!("'type' must be \"app\", got {}", describe(&other)))),
    }

    let program = match value.get_attr("program").map_err(eval_err)? {
      Some(Value::String(program)) => PathBuf::from(program),
      Some(other) => return Err(shape(format!("'program' must be a string, got {}", other.type_name()))),
      None => return Err(shape("missing attribute 'program'".to_string())),
    };
    let program_path = StorePath::containing(store.store_dir(), &program)
      .map_err(|_| shape(format!("program '{}' is not in the store", program.display())))?;

    let mut context = BTreeSet::from([program_path]);
    let entries = match value.get_attr("context").map_err(eval_err)? {
      None => Vec::new(),
      Some(Value::List(items)) => items,
      // `{}` has no way to say it is a list
      Some(Value::Attrs(attrs)) if attrs.is_empty() => Vec::new(),
      Some(other) => return Err(shape(format!("'context' must be a list, got {}", other.type_name()))),
    };
    for entry in entries {
      let entry = entry.force().map_err(eval_err)?;
      let path = match (&entry, entry.as_derivation().map_err(eval_err)?) {
        (_, Some(drv)) => drv.out_path,
        (Value::String(s), None) => s.clone(),
        (other, None) => {
          return Err(shape(format!(
            "context entries must be strings or derivations, got {}",
            other.type_name()
          )));
        }
      };
      let path = StorePath::containing(store.store_dir(), Path::new(&path))
        .map_err(|_| shape(format!("context entry '{path}' is not in the store")))?;
      context.insert(path);
    }

    Ok(App { context, program })
  }
}

fn describe(value: &Value) -> String {
  match value {
    Value::String(s) => format!("\"{s}\""),
    other => other.type_name().to_string(),
  }
}

fn derivation_buildable(store: &dyn Store, what: &str, value: &Value) -> Result<Buildable, InstallableError> {
  let drv = value
    .as_derivation()
    .map_err(InstallableError::eval(what))?
    .ok_or_else(|| InstallableError::NotBuildable {
      what: what.to_string(),
      reason: format!("expected a derivation or a list of derivations, got {}", value.type_name()),
    })?;
  let drv_path = store
    .parse_store_path(Path::new(&drv.drv_path))
    .map_err(|e| InstallableError::store(what)(e.into()))?;
  let out_path = store
    .parse_store_path(Path::new(&drv.out_path))
    .map_err(|e| InstallableError::store(what)(e.into()))?;
  Ok(Buildable::from_derivation(drv_path, [(drv.output_name, out_path)]))
}
