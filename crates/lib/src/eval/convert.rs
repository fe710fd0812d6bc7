//! Conversion of Lua values into [`Value`]s.

use std::collections::BTreeMap;
use std::ffi::c_void;

use mlua::prelude::*;

use super::{EvalError, Thunk, Value};

/// Convert a Lua value.
///
/// Tables whose keys are exactly `1..=n` become lists; any other table becomes
/// an attribute set (the empty table included). Functions become thunks that
/// call the function without arguments when forced. Thunks hold a handle to
/// `lua`, so they can be forced after the evaluator that made them is gone.
pub fn lua_to_value(lua: &Lua, value: LuaValue) -> Result<Value, EvalError> {
  let mut stack = Vec::new();
  convert(lua, value, &mut stack)
}

fn convert(lua: &Lua, value: LuaValue, stack: &mut Vec<*const c_void>) -> Result<Value, EvalError> {
  match value {
    LuaValue::Nil => Ok(Value::Null),
    LuaValue::Boolean(b) => Ok(Value::Bool(b)),
    LuaValue::Integer(i) => Ok(Value::Int(i)),
    LuaValue::Number(n) => Ok(Value::Float(n)),
    LuaValue::String(s) => Ok(Value::String(s.to_string_lossy())),
    LuaValue::Table(table) => convert_table(lua, table, stack),
    LuaValue::Function(func) => {
      let lua = lua.clone();
      Ok(Value::Thunk(Thunk::new(move || {
        let result: LuaValue = func.call(())?;
        lua_to_value(&lua, result)
      })))
    }
    other => Err(EvalError::TypeMismatch {
      expected: "a value",
      found: other.type_name(),
      context: "converted Lua value".to_string(),
    }),
  }
}

fn convert_table(lua: &Lua, table: LuaTable, stack: &mut Vec<*const c_void>) -> Result<Value, EvalError> {
  let ptr = table.to_pointer();
  if stack.contains(&ptr) {
    return Err(EvalError::InfiniteRecursion);
  }
  stack.push(ptr);
  let result = if is_sequence(&table)? {
    table
      .sequence_values::<LuaValue>()
      .map(|v| convert(lua, v?, stack))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::List)
  } else {
    let mut attrs = BTreeMap::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
      let (key, value) = pair?;
      let key = match key {
        LuaValue::String(s) => s.to_string_lossy(),
        LuaValue::Integer(i) => i.to_string(),
        other => {
          return Err(EvalError::TypeMismatch {
            expected: "a string key",
            found: other.type_name(),
            context: "attribute set".to_string(),
          });
        }
      };
      attrs.insert(key, convert(lua, value, stack)?);
    }
    Ok(Value::Attrs(attrs))
  };
  stack.pop();
  result
}

fn is_sequence(table: &LuaTable) -> Result<bool, EvalError> {
  let len = table.raw_len();
  if len == 0 {
    return Ok(false);
  }
  let mut count = 0;
  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, _) = pair?;
    match key {
      LuaValue::Integer(i) if i >= 1 && (i as usize) <= len => count += 1,
      _ => return Ok(false),
    }
  }
  Ok(count == len)
}
