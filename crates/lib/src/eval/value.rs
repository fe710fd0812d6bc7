//! Evaluator-independent values.
//!
//! Values produced by an evaluator are plain data except for [`Thunk`]s, which
//! defer a computation until forced and then remember its result.

use std::cell::{Cell, OnceCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::EvalError;

#[derive(Clone)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  String(String),
  List(Vec<Value>),
  Attrs(BTreeMap<String, Value>),
  Thunk(Thunk),
}

type Compute = Box<dyn Fn() -> Result<Value, EvalError>>;

struct ThunkInner {
  compute: Compute,
  value: OnceCell<Value>,
  forcing: Cell<bool>,
}

/// A deferred, memoized computation.
#[derive(Clone)]
pub struct Thunk(Rc<ThunkInner>);

impl Thunk {
  pub fn new(compute: impl Fn() -> Result<Value, EvalError> + 'static) -> Self {
    Thunk(Rc::new(ThunkInner {
      compute: Box::new(compute),
      value: OnceCell::new(),
      forcing: Cell::new(false),
    }))
  }

  /// Compute the value once; later calls return the remembered result.
  ///
  /// A failed computation is not remembered and runs again on the next call.
  pub fn force(&self) -> Result<Value, EvalError> {
    if let Some(value) = self.0.value.get() {
      return Ok(value.clone());
    }
    if self.0.forcing.replace(true) {
      return Err(EvalError::InfiniteRecursion);
    }
    let result = (self.0.compute)().and_then(|v| v.force());
    self.0.forcing.set(false);
    let value = result?;
    Ok(self.0.value.get_or_init(|| value).clone())
  }

  pub fn is_forced(&self) -> bool {
    self.0.value.get().is_some()
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Int(i) => write!(f, "{i}"),
      Value::Float(x) => write!(f, "{x}"),
      Value::String(s) => write!(f, "{s:?}"),
      Value::List(items) => f.debug_list().entries(items).finish(),
      Value::Attrs(attrs) => f.debug_map().entries(attrs).finish(),
      Value::Thunk(thunk) => match thunk.0.value.get() {
        Some(value) => value.fmt(f),
        None => write!(f, "<thunk>"),
      },
    }
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      (Value::Float(a), Value::Float(b)) => a == b,
      (Value::String(a), Value::String(b)) => a == b,
      (Value::List(a), Value::List(b)) => a == b,
      (Value::Attrs(a), Value::Attrs(b)) => a == b,
      (Value::Thunk(a), Value::Thunk(b)) => Rc::ptr_eq(&a.0, &b.0),
      _ => false,
    }
  }
}

/// The fields of a value with `type = "derivation"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationRecord {
  pub name: String,
  pub drv_path: String,
  pub out_path: String,
  pub output_name: String,
}

impl Value {
  pub fn attrs(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
    Value::Attrs(entries.into_iter().collect())
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Null => "null",
      Value::Bool(_) => "a boolean",
      Value::Int(_) => "an integer",
      Value::Float(_) => "a float",
      Value::String(_) => "a string",
      Value::List(_) => "a list",
      Value::Attrs(_) => "an attribute set",
      Value::Thunk(_) => "a thunk",
    }
  }

  /// Evaluate until the value is no longer a thunk.
  pub fn force(&self) -> Result<Value, EvalError> {
    match self {
      Value::Thunk(thunk) => thunk.force(),
      other => Ok(other.clone()),
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  /// Look up a direct attribute. `Ok(None)` when the value has no such attribute.
  pub fn get_attr(&self, name: &str) -> Result<Option<Value>, EvalError> {
    match self.force()? {
      Value::Attrs(attrs) => attrs.get(name).map(Value::force).transpose(),
      _ => Ok(None),
    }
  }

  /// Required string attribute; anything else is a type error mentioning `context`.
  pub fn get_string(&self, name: &str, context: &str) -> Result<Option<String>, EvalError> {
    match self.get_attr(name)? {
      None => Ok(None),
      Some(Value::String(s)) => Ok(Some(s)),
      Some(other) => Err(EvalError::TypeMismatch {
        expected: "a string",
        found: other.type_name(),
        context: format!("attribute '{name}' of {context}"),
      }),
    }
  }

  /// Follow a dotted attribute path, forcing each step.
  ///
  /// A missing attribute anywhere along the path yields `Ok(None)`; errors
  /// raised while forcing are returned as errors.
  pub fn lookup_attr_path(&self, path: &str) -> Result<Option<Value>, EvalError> {
    let mut current = self.force()?;
    for segment in parse_attr_path(path)? {
      match current.get_attr(&segment)? {
        Some(next) => current = next,
        None => return Ok(None),
      }
    }
    Ok(Some(current))
  }

  pub fn is_derivation(&self) -> Result<bool, EvalError> {
    Ok(matches!(self.get_attr("type")?, Some(Value::String(t)) if t == "derivation"))
  }

  /// Read the derivation fields if this is a derivation record.
  pub fn as_derivation(&self) -> Result<Option<DerivationRecord>, EvalError> {
    if !self.is_derivation()? {
      return Ok(None);
    }
    let context = "a derivation";
    let require = |name: &str| -> Result<String, EvalError> {
      self.get_string(name, context)?.ok_or_else(|| EvalError::MissingAttribute {
        name: name.to_string(),
        context: context.to_string(),
      })
    };
    Ok(Some(DerivationRecord {
      name: require("name")?,
      drv_path: require("drvPath")?,
      out_path: require("outPath")?,
      output_name: self
        .get_string("outputName", context)?
        .unwrap_or_else(|| "out".to_string()),
    }))
  }

  /// Deeply force the value into JSON. Derivations collapse to their output path.
  pub fn to_json(&self) -> Result<serde_json::Value, EvalError> {
    self.to_json_depth(0)
  }

  fn to_json_depth(&self, depth: usize) -> Result<serde_json::Value, EvalError> {
    const MAX_DEPTH: usize = 256;
    if depth > MAX_DEPTH {
      return Err(EvalError::InfiniteRecursion);
    }
    let forced = self.force()?;
    if let Some(drv) = forced.as_derivation()? {
      return Ok(serde_json::Value::String(drv.out_path));
    }
    Ok(match forced {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(b),
      Value::Int(i) => serde_json::Value::from(i),
      Value::Float(x) => serde_json::Value::from(x),
      Value::String(s) => serde_json::Value::String(s),
      Value::List(items) => serde_json::Value::Array(
        items
          .iter()
          .map(|v| v.to_json_depth(depth + 1))
          .collect::<Result<_, _>>()?,
      ),
      Value::Attrs(map) => {
        let mut object = serde_json::Map::new();
        for (key, value) in &map {
          object.insert(key.clone(), value.to_json_depth(depth + 1)?);
        }
        serde_json::Value::Object(object)
      }
      Value::Thunk(_) => return Err(EvalError::InfiniteRecursion),
    })
  }
}

/// Split `a.b."c.d"` into `["a", "b", "c.d"]`. The empty path has no segments.
pub fn parse_attr_path(path: &str) -> Result<Vec<String>, EvalError> {
  let mut segments = Vec::new();
  if path.is_empty() {
    return Ok(segments);
  }

  let mut current = String::new();
  let mut quoted = false;
  for c in path.chars() {
    match c {
      '"' => quoted = !quoted,
      '.' if !quoted => segments.push(std::mem::take(&mut current)),
      c => current.push(c),
    }
  }
  if quoted {
    return Err(EvalError::InvalidAttrPath(path.to_string()));
  }
  segments.push(current);

  if segments.iter().any(String::is_empty) {
    return Err(EvalError::InvalidAttrPath(path.to_string()));
  }
  Ok(segments)
}
