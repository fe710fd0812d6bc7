//! The `sprout` global table.
//!
//! - `sprout.system`, `sprout.os`, `sprout.arch`, `sprout.store_dir`
//! - `sprout.derivation{ name, builder, args?, env?, outputs?, system? }`
//! - `sprout.path(path, name?)` copies a file or directory into the store
//! - `sprout.app{ program, context? }` builds an app record

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::debug;

use super::loaders;
use crate::platform::System;
use crate::store::path::is_valid_name;
use crate::store::{Derivation, Store, StorePath};

/// Register `sprout` as a global of `lua`.
pub fn register_globals(lua: &Lua, store: Rc<dyn Store>, system: &str) -> LuaResult<()> {
  let sprout = lua.create_table()?;

  sprout.set("system", system)?;
  if let Ok(parsed) = system.parse::<System>() {
    sprout.set("os", parsed.os)?;
    sprout.set("arch", parsed.arch)?;
  }
  sprout.set("store_dir", store.store_dir().to_string_lossy().into_owned())?;

  let drv_store = store.clone();
  let default_system = system.to_string();
  let derivation = lua.create_function(move |lua, spec: LuaTable| {
    instantiate_derivation(lua, drv_store.as_ref(), &default_system, spec)
  })?;
  sprout.set("derivation", derivation)?;

  let path_store = store;
  let path = lua.create_function(move |lua, (path, name): (String, Option<String>)| {
    let resolved = loaders::resolve_path(lua, &path)?;
    let name = match name {
      Some(name) => name,
      None => default_source_name(&resolved),
    };
    let added = path_store
      .add_to_store(&name, &resolved)
      .map_err(LuaError::external)?;
    Ok(added.to_string())
  })?;
  sprout.set("path", path)?;

  let app = lua.create_function(|lua, spec: LuaTable| {
    let program: LuaValue = spec.get("program")?;
    let record = lua.create_table()?;
    record.set("type", "app")?;
    record.set("program", program)?;
    let context: Option<LuaTable> = spec.get("context")?;
    record.set("context", context.map_or_else(|| lua.create_table(), Ok)?)?;
    Ok(record)
  })?;
  sprout.set("app", app)?;

  lua.globals().set("sprout", sprout)?;
  Ok(())
}

fn default_source_name(path: &Path) -> String {
  let base = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let cleaned: String = base
    .trim_start_matches('.')
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || "+-._?=".contains(c) { c } else { '_' })
    .collect();
  if !is_valid_name(&cleaned) {
    "source".to_string()
  } else {
    cleaned
  }
}

fn instantiate_derivation(lua: &Lua, store: &dyn Store, default_system: &str, spec: LuaTable) -> LuaResult<LuaTable> {
  let name: String = spec
    .get::<Option<String>>("name")?
    .ok_or_else(|| LuaError::external("derivation: 'name' is required"))?;
  let builder: String = spec
    .get::<Option<String>>("builder")?
    .ok_or_else(|| LuaError::external(format!("derivation '{name}': 'builder' is required")))?;
  let system = spec
    .get::<Option<String>>("system")?
    .unwrap_or_else(|| default_system.to_string());

  let mut drv = Derivation::new(&name, system, builder);
  drv.args = spec.get::<Option<Vec<String>>>("args")?.unwrap_or_default();

  if let Some(env) = spec.get::<Option<LuaTable>>("env")? {
    for pair in env.pairs::<String, LuaValue>() {
      let (key, value) = pair?;
      drv.env.insert(key, env_string(lua, value)?);
    }
  }

  if let Some(outputs) = spec.get::<Option<Vec<String>>>("outputs")? {
    if outputs.is_empty() {
      return Err(LuaError::external(format!("derivation '{name}': 'outputs' must not be empty")));
    }
    drv.outputs = outputs.into_iter().map(|o| (o, None)).collect();
  }

  let mut texts: Vec<&str> = vec![drv.builder.as_str()];
  texts.extend(drv.args.iter().map(String::as_str));
  texts.extend(drv.env.values().map(String::as_str));
  let mentioned: BTreeSet<StorePath> = texts
    .iter()
    .flat_map(|text| find_store_paths(store.store_dir(), text))
    .collect();
  let (input_drvs, input_srcs) = classify_inputs(store, &mentioned).map_err(LuaError::external)?;
  drv.input_drvs = input_drvs;
  drv.input_srcs = input_srcs;

  let (drv_path, drv) = store.instantiate(drv).map_err(LuaError::external)?;
  debug!(name = %name, drv = %drv_path, "derivation instantiated");

  derivation_record(lua, &drv_path, &drv)
}

/// Lua values accepted in `env`: strings, numbers, booleans and derivation records.
fn env_string(lua: &Lua, value: LuaValue) -> LuaResult<String> {
  match value {
    LuaValue::String(s) => Ok(s.to_str()?.to_string()),
    LuaValue::Integer(i) => Ok(i.to_string()),
    LuaValue::Number(n) => Ok(n.to_string()),
    LuaValue::Boolean(b) => Ok(if b { "1".to_string() } else { String::new() }),
    LuaValue::Table(t) => t
      .get::<Option<String>>("outPath")?
      .ok_or_else(|| LuaError::external("env values must be strings or derivations")),
    other => Err(LuaError::FromLuaConversionError {
      from: other.type_name(),
      to: "env string".to_string(),
      message: Some(format!("unsupported value in {}", lua_location(lua))),
    }),
  }
}

fn lua_location(lua: &Lua) -> String {
  lua
    .inspect_stack(1, |debug| debug.source().short_src.map(|s| s.into_owned()))
    .flatten()
    .unwrap_or_else(|| "derivation env".to_string())
}

/// Store paths mentioned in `derivation` arguments become inputs: outputs of
/// known derivations become input derivations, other valid paths input sources.
fn classify_inputs(
  store: &dyn Store,
  mentioned: &BTreeSet<StorePath>,
) -> Result<(BTreeMap<StorePath, BTreeSet<String>>, BTreeSet<StorePath>), crate::store::StoreError> {
  let mut input_drvs: BTreeMap<StorePath, BTreeSet<String>> = BTreeMap::new();
  let mut input_srcs = BTreeSet::new();

  for path in mentioned {
    if path.is_derivation() {
      input_srcs.insert(path.clone());
      continue;
    }
    match store.query_deriver(path)? {
      Some(deriver) => {
        let producer = store.read_derivation(&deriver)?;
        let output = producer
          .output_paths()
          .into_iter()
          .find(|(_, p)| p == path)
          .map(|(name, _)| name)
          .unwrap_or_else(|| "out".to_string());
        input_drvs.entry(deriver).or_default().insert(output);
      }
      None if store.is_valid_path(path)? => {
        input_srcs.insert(path.clone());
      }
      None => {
        return Err(crate::store::StoreError::InvalidDerivation(format!(
          "'{path}' is neither a valid store path nor a derivation output"
        )));
      }
    }
  }
  Ok((input_drvs, input_srcs))
}

/// Every `<store_dir>/<hash>-<name>` occurring in `text`.
pub fn find_store_paths(store_dir: &Path, text: &str) -> BTreeSet<StorePath> {
  let prefix = format!("{}/", store_dir.to_string_lossy());
  let mut found = BTreeSet::new();
  let mut rest = text;
  while let Some(idx) = rest.find(&prefix) {
    let after = &rest[idx + prefix.len()..];
    let end = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || "+-._?=".contains(c)))
      .unwrap_or(after.len());
    if let Ok(path) = StorePath::parse(store_dir, &store_dir.join(&after[..end])) {
      found.insert(path);
    }
    rest = &after[end..];
  }
  found
}

/// The Lua table describing an instantiated derivation.
///
/// Top-level fields describe the first output (`out` when present); each
/// output is also available as a field holding its own record.
pub fn derivation_record(lua: &Lua, drv_path: &StorePath, drv: &Derivation) -> LuaResult<LuaTable> {
  let outputs = drv.output_paths();
  let names: Vec<String> = outputs.keys().cloned().collect();
  let main = if outputs.contains_key("out") {
    "out".to_string()
  } else {
    names.first().cloned().unwrap_or_else(|| "out".to_string())
  };

  let output_record = |output: &str, path: &StorePath| -> LuaResult<LuaTable> {
    let record = lua.create_table()?;
    record.set("type", "derivation")?;
    record.set("name", drv.name.as_str())?;
    record.set("system", drv.system.as_str())?;
    record.set("drvPath", drv_path.to_string())?;
    record.set("outPath", path.to_string())?;
    record.set("outputName", output)?;
    record.set("outputs", names.clone())?;
    Ok(record)
  };

  let top = match outputs.get(&main) {
    Some(path) => output_record(&main, path)?,
    None => return Err(LuaError::external(format!("derivation '{}' has no outputs", drv.name))),
  };
  for (name, path) in &outputs {
    top.set(name.as_str(), output_record(name, path)?)?;
  }

  let mt = lua.create_table()?;
  mt.set(
    "__tostring",
    lua.create_function(|_, record: LuaTable| record.get::<String>("outPath"))?,
  )?;
  top.set_metatable(Some(mt))?;
  Ok(top)
}
