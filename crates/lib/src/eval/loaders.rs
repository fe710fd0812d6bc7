//! File loading with a per-file `__dir` variable.
//!
//! Every file loaded through [`load_file_with_dir`], `dofile` or `require`
//! sees `__dir`, the directory containing it. The directory of the file being
//! evaluated is also kept in the registry so builtins such as `sprout.path`
//! resolve relative paths against the file that called them.

use std::fs;
use std::path::{Path, PathBuf};

use mlua::prelude::*;

const CURRENT_DIR_KEY: &str = "__sprout_current_dir";

/// Evaluate the Lua file at `path` in an environment carrying `__dir`.
pub fn load_file_with_dir(lua: &Lua, path: &Path) -> LuaResult<LuaValue> {
  let canonical = dunce::canonicalize(path)
    .map_err(|e| LuaError::external(format!("cannot resolve '{}': {}", path.display(), e)))?;
  let content = fs::read_to_string(&canonical)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical.display(), e)))?;
  let dir = canonical
    .parent()
    .unwrap_or(Path::new("."))
    .to_string_lossy()
    .into_owned();

  with_current_dir(lua, Path::new(&dir), || {
    let env = file_env(lua, &dir)?;
    lua
      .load(&content)
      .set_name(format!("@{}", canonical.display()))
      .set_environment(env)
      .eval::<LuaValue>()
  })
}

/// Run `f` with `dir` as the current file directory.
///
/// The previous directory is restored even when `f` fails.
pub fn with_current_dir<R>(lua: &Lua, dir: &Path, f: impl FnOnce() -> LuaResult<R>) -> LuaResult<R> {
  let prev_dir: Option<String> = lua.named_registry_value(CURRENT_DIR_KEY)?;
  lua.set_named_registry_value(CURRENT_DIR_KEY, dir.to_string_lossy().into_owned())?;
  let result = f();
  lua.set_named_registry_value(CURRENT_DIR_KEY, prev_dir)?;
  result
}

fn file_env(lua: &Lua, dir: &str) -> LuaResult<LuaTable> {
  let env = lua.create_table()?;
  env.set("__dir", dir)?;

  let mt = lua.create_table()?;
  mt.set("__index", lua.globals())?;
  mt.set("__newindex", lua.globals())?;
  env.set_metatable(Some(mt))?;
  Ok(env)
}

/// Directory of the file currently being evaluated, if any.
pub fn current_dir(lua: &Lua) -> LuaResult<Option<PathBuf>> {
  let dir: Option<String> = lua.named_registry_value(CURRENT_DIR_KEY)?;
  Ok(dir.map(PathBuf::from))
}

/// Resolve `path` against the current file's directory, or the working directory.
pub fn resolve_path(lua: &Lua, path: &str) -> LuaResult<PathBuf> {
  let path = Path::new(path);
  if path.is_absolute() {
    return Ok(path.to_path_buf());
  }
  match current_dir(lua)? {
    Some(dir) => Ok(dir.join(path)),
    None => Ok(path.to_path_buf()),
  }
}

fn create_lua_searcher(lua: &Lua) -> LuaResult<LuaFunction> {
  lua.create_function(|lua, modname: String| {
    let package: LuaTable = lua.globals().get("package")?;
    let search_path: String = package.get("path")?;
    let searchpath: LuaFunction = package.get("searchpath")?;
    let found: LuaMultiValue = searchpath.call((modname.clone(), search_path))?;

    match found.into_iter().next() {
      Some(LuaValue::String(file)) => {
        let file = file.to_str()?.to_string();
        let target = PathBuf::from(&file);
        let loader = lua.create_function(move |lua, _: LuaMultiValue| load_file_with_dir(lua, &target))?;
        Ok((LuaValue::Function(loader), file))
      }
      _ => Ok((LuaValue::Nil, format!("\n\tno file for module '{modname}'"))),
    }
  })
}

/// Replace `dofile` and the Lua file searcher used by `require`.
pub fn install_loaders(lua: &Lua) -> LuaResult<()> {
  let package: LuaTable = lua.globals().get("package")?;
  let searchers: LuaTable = package.get("searchers")?;
  searchers.set(2, create_lua_searcher(lua)?)?;

  let dofile = lua.create_function(|lua, path: Option<String>| match path {
    Some(path) => load_file_with_dir(lua, &resolve_path(lua, &path)?),
    None => Err(LuaError::external("dofile() without a path is not supported")),
  })?;
  lua.globals().set("dofile", dofile)?;

  Ok(())
}
