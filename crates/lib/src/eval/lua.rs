//! The Lua-backed [`Evaluator`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::prelude::*;
use tracing::debug;

use super::convert::lua_to_value;
use super::{EvalError, Evaluator, ExprSource, Value, globals, loaders};
use crate::consts::{DEFAULT_EXPR_FILENAME, FLAKE_FILENAME};
use crate::flake::fetch::{SourceInfo, fetch_flake};
use crate::flake::resolve::{FlakeMetadata, FlakeSource, resolve_flake};
use crate::flake::{Flake, FlakeError, FlakeRef, LoadedFlake, LockFileMode, Registries, ResolvedInput};
use crate::platform::current_system;
use crate::platform::paths::{cache_dir, config_dir};
use crate::store::{Store, StorePath};

pub struct LuaEvaluator {
  lua: Lua,
  store: Rc<dyn Store>,
  system: String,
  registries: Registries,
  cache_dir: PathBuf,
  /// Evaluated expression files by canonical path.
  files: RefCell<BTreeMap<PathBuf, Value>>,
  /// Fetched sources by the direct reference they were fetched from.
  sources: RefCell<BTreeMap<FlakeRef, SourceInfo>>,
  /// `flake.lua` tables by source path.
  flake_defs: RefCell<BTreeMap<StorePath, LuaTable>>,
  /// Called flakes by source path: the `self` table and the outputs table.
  called: RefCell<BTreeMap<StorePath, (LuaTable, LuaTable)>>,
}

impl LuaEvaluator {
  pub fn new(store: Rc<dyn Store>) -> Result<Self, EvalError> {
    Self::with_system(store, current_system())
  }

  pub fn with_system(store: Rc<dyn Store>, system: impl Into<String>) -> Result<Self, EvalError> {
    let system = system.into();
    let lua = Lua::new();
    loaders::install_loaders(&lua)?;
    globals::register_globals(&lua, store.clone(), &system)?;

    Ok(Self {
      lua,
      store,
      system,
      registries: Registries::from_env(),
      cache_dir: cache_dir(),
      files: RefCell::new(BTreeMap::new()),
      sources: RefCell::new(BTreeMap::new()),
      flake_defs: RefCell::new(BTreeMap::new()),
      called: RefCell::new(BTreeMap::new()),
    })
  }

  pub fn with_registries(mut self, registries: Registries) -> Self {
    self.registries = registries;
    self
  }

  pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
    self.cache_dir = cache_dir.into();
    self
  }

  pub fn registries(&self) -> &Registries {
    &self.registries
  }

  fn load_file(&self, path: &Path) -> Result<Value, EvalError> {
    let canonical = dunce::canonicalize(path).map_err(|source| EvalError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    if let Some(value) = self.files.borrow().get(&canonical) {
      return Ok(value.clone());
    }

    debug!(path = %canonical.display(), "evaluating file");
    let result = match loaders::load_file_with_dir(&self.lua, &canonical)? {
      LuaValue::Function(func) => func.call::<LuaValue>(self.lua.create_table()?)?,
      other => other,
    };
    let value = lua_to_value(&self.lua, result)?;
    self.files.borrow_mut().insert(canonical, value.clone());
    Ok(value)
  }

  fn flake_def(&self, source: &SourceInfo) -> Result<LuaTable, FlakeError> {
    if let Some(def) = self.flake_defs.borrow().get(&source.store_path) {
      return Ok(def.clone());
    }
    let eval_err = |e: LuaError| FlakeError::Evaluation {
      flake: source.locked.to_string(),
      message: e.to_string(),
    };

    let file = source.store_path.as_path().join(FLAKE_FILENAME);
    let def = match loaders::load_file_with_dir(&self.lua, &file).map_err(eval_err)? {
      LuaValue::Table(def) => def,
      other => {
        return Err(FlakeError::Evaluation {
          flake: source.locked.to_string(),
          message: format!("{FLAKE_FILENAME} must return a table, got {}", other.type_name()),
        });
      }
    };
    self
      .flake_defs
      .borrow_mut()
      .insert(source.store_path.clone(), def.clone());
    Ok(def)
  }

  /// Call the `outputs` function of `flake` with its resolved inputs.
  ///
  /// Returns the flake's `self` table, which carries source attributes and
  /// falls back to the outputs for everything else, plus the outputs table.
  fn call_flake(&self, flake: &Flake, inputs: &BTreeMap<String, ResolvedInput>) -> Result<(LuaTable, LuaTable), EvalError> {
    if let Some(called) = self.called.borrow().get(&flake.source.store_path) {
      return Ok(called.clone());
    }

    let lua = &self.lua;
    let args = lua.create_table()?;
    for (name, input) in inputs {
      let (input_self, _) = self.call_flake(&input.flake, &input.inputs)?;
      args.set(name.as_str(), input_self)?;
    }

    let self_table = lua.create_table()?;
    self_table.set("outPath", flake.source.store_path.to_string())?;
    self_table.set("narHash", flake.source.nar_hash.as_str())?;
    self_table.set("description", flake.description.as_deref())?;
    if let Some(rev) = &flake.source.rev {
      self_table.set("rev", rev.as_str())?;
      self_table.set("shortRev", &rev[..rev.len().min(7)])?;
    }
    args.set("self", self_table.clone())?;

    let def = self.flake_def(&flake.source)?;
    let outputs_fn: LuaFunction = match def.get::<LuaValue>("outputs")? {
      LuaValue::Function(f) => f,
      other => {
        return Err(
          FlakeError::Evaluation {
            flake: flake.original.to_string(),
            message: format!("'outputs' must be a function, got {}", other.type_name()),
          }
          .into(),
        );
      }
    };

    let dir = flake.source.store_path.as_path();
    let outputs = match loaders::with_current_dir(lua, dir, || outputs_fn.call::<LuaValue>(args))? {
      LuaValue::Table(outputs) => outputs,
      other => {
        return Err(
          FlakeError::Evaluation {
            flake: flake.original.to_string(),
            message: format!("'outputs' must return a table, got {}", other.type_name()),
          }
          .into(),
        );
      }
    };

    let mt = lua.create_table()?;
    mt.set("__index", outputs.clone())?;
    self_table.set_metatable(Some(mt))?;

    debug!(flake = %flake.original, "called flake outputs");
    self
      .called
      .borrow_mut()
      .insert(flake.source.store_path.clone(), (self_table.clone(), outputs.clone()));
    Ok((self_table, outputs))
  }
}

impl Evaluator for LuaEvaluator {
  fn store(&self) -> Rc<dyn Store> {
    self.store.clone()
  }

  fn system(&self) -> &str {
    &self.system
  }

  fn load_expression(&self, source: &ExprSource) -> Result<Value, EvalError> {
    match source {
      ExprSource::File(path) => self.load_file(path),
      ExprSource::Default => {
        let local = PathBuf::from(DEFAULT_EXPR_FILENAME);
        let user = config_dir().join(DEFAULT_EXPR_FILENAME);
        if local.is_file() {
          self.load_file(&local)
        } else if user.is_file() {
          self.load_file(&user)
        } else {
          Ok(Value::Attrs(BTreeMap::new()))
        }
      }
    }
  }

  fn eval_expression(&self, text: &str) -> Result<Value, EvalError> {
    let value: LuaValue = self
      .lua
      .load(format!("return {text}"))
      .set_name("=(expression)")
      .eval()?;
    lua_to_value(&self.lua, value)
  }

  fn load_flake(&self, flake_ref: &FlakeRef, mode: LockFileMode) -> Result<LoadedFlake, EvalError> {
    let resolved = resolve_flake(self, flake_ref, mode)?;
    let (_, outputs) = self.call_flake(&resolved.flake, &resolved.inputs)?;
    Ok(LoadedFlake {
      flake: resolved.flake,
      lock: resolved.lock,
      outputs: lua_to_value(&self.lua, LuaValue::Table(outputs))?,
    })
  }
}

impl FlakeSource for LuaEvaluator {
  fn lookup(&self, flake_ref: &FlakeRef) -> Result<FlakeRef, FlakeError> {
    self.registries.lookup(flake_ref)
  }

  fn fetch(&self, flake_ref: &FlakeRef) -> Result<SourceInfo, FlakeError> {
    if let Some(info) = self.sources.borrow().get(flake_ref) {
      return Ok(info.clone());
    }
    let info = fetch_flake(self.store.as_ref(), flake_ref, &self.cache_dir)?;
    let mut sources = self.sources.borrow_mut();
    sources.insert(flake_ref.clone(), info.clone());
    sources.insert(info.locked.clone(), info.clone());
    Ok(info)
  }

  fn metadata(&self, source: &SourceInfo) -> Result<FlakeMetadata, FlakeError> {
    let def = self.flake_def(source)?;
    let invalid = |message: String| FlakeError::Evaluation {
      flake: source.locked.to_string(),
      message,
    };

    let description = match def.get::<LuaValue>("description").map_err(|e| invalid(e.to_string()))? {
      LuaValue::Nil => None,
      LuaValue::String(s) => Some(s.to_string_lossy()),
      other => return Err(invalid(format!("'description' must be a string, got {}", other.type_name()))),
    };

    let mut inputs = BTreeMap::new();
    match def.get::<LuaValue>("inputs").map_err(|e| invalid(e.to_string()))? {
      LuaValue::Nil => {}
      LuaValue::Table(table) => {
        for pair in table.pairs::<LuaValue, LuaValue>() {
          let (name, url) = pair.map_err(|e| invalid(e.to_string()))?;
          match (name, url) {
            (LuaValue::String(name), LuaValue::String(url)) => {
              inputs.insert(name.to_string_lossy(), url.to_string_lossy());
            }
            (name, url) => {
              return Err(invalid(format!(
                "'inputs' must map names to flake reference strings, got {} = {}",
                name.type_name(),
                url.type_name()
              )));
            }
          }
        }
      }
      other => return Err(invalid(format!("'inputs' must be a table, got {}", other.type_name()))),
    }

    Ok(FlakeMetadata { description, inputs })
  }
}
