//! Expression evaluation.
//!
//! The [`Evaluator`] trait is what installables are resolved against;
//! [`LuaEvaluator`] implements it with an embedded Lua 5.4 interpreter.

pub mod convert;
pub mod globals;
pub mod loaders;
pub mod lua;
pub mod value;

use std::path::PathBuf;
use std::rc::Rc;

use thiserror::Error;

pub use lua::LuaEvaluator;
pub use value::{DerivationRecord, Thunk, Value};

use crate::flake::{FlakeError, FlakeRef, LoadedFlake, LockFileMode};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum EvalError {
  #[error("{0}")]
  Lua(String),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Flake(#[from] FlakeError),

  #[error("expected {expected} but found {found} in {context}")]
  TypeMismatch {
    expected: &'static str,
    found: &'static str,
    context: String,
  },

  #[error("attribute '{name}' missing from {context}")]
  MissingAttribute { name: String, context: String },

  #[error("invalid attribute path '{0}'")]
  InvalidAttrPath(String),

  #[error("infinite recursion encountered")]
  InfiniteRecursion,

  #[error("cannot read '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl From<mlua::Error> for EvalError {
  fn from(err: mlua::Error) -> Self {
    match err {
      mlua::Error::ExternalError(inner) => match inner.downcast_ref::<EvalError>() {
        Some(EvalError::InfiniteRecursion) => EvalError::InfiniteRecursion,
        _ => EvalError::Lua(inner.to_string()),
      },
      other => EvalError::Lua(other.to_string()),
    }
  }
}

/// Where the expression for attribute-path installables comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprSource {
  /// A file given with `--file`.
  File(PathBuf),
  /// `./default.lua`, else `default.lua` in the config directory, else an empty set.
  Default,
}

/// What the installable machinery needs from an evaluator.
pub trait Evaluator {
  fn store(&self) -> Rc<dyn Store>;

  /// The system string used for per-system attribute lookups.
  fn system(&self) -> &str;

  fn load_expression(&self, source: &ExprSource) -> Result<Value, EvalError>;

  /// Evaluate expression text such as `(sprout.derivation{...})`.
  fn eval_expression(&self, text: &str) -> Result<Value, EvalError>;

  fn load_flake(&self, flake_ref: &FlakeRef, mode: LockFileMode) -> Result<LoadedFlake, EvalError>;

  fn force(&self, value: &Value) -> Result<Value, EvalError> {
    value.force()
  }

  fn lookup_attr_path(&self, value: &Value, path: &str) -> Result<Option<Value>, EvalError> {
    value.lookup_attr_path(path)
  }
}
