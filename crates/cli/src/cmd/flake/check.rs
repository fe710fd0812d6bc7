//! `sprout flake check`: evaluate the known outputs of a flake and build its
//! checks for the current system.
//!
//! | Output                          | Must be           |
//! |---------------------------------|-------------------|
//! | `checks.<system>.<name>`        | derivation        |
//! | `packages.<system>.<name>`      | derivation        |
//! | `defaultPackage.<system>`       | derivation        |
//! | `apps.<system>.<name>`          | app               |
//! | `defaultApp.<system>`           | app               |
//! | `legacyPackages`                | anything          |

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{debug, warn};

use sprout_lib::build::{RealiseMode, build};
use sprout_lib::eval::{Evaluator, Value};
use sprout_lib::installable::Installable;
use sprout_lib::platform::current_system;

use super::FlakeArgs;
use crate::output::{format_duration, print_success, print_warning};

#[derive(Args)]
pub struct CheckArgs {
  #[command(flatten)]
  flake: FlakeArgs,

  /// Evaluate the checks without building them
  #[arg(long)]
  no_build: bool,
}

enum Kind {
  Derivation,
  App,
}

pub fn check(args: &mut CheckArgs) -> Result<()> {
  let start = Instant::now();
  let flake_ref = args.flake.flake_ref()?;
  let mode = args.flake.lock.lock_file_mode();
  let evaluator = args.flake.eval.get_eval_state()?;
  let store = args.flake.eval.get_store()?;
  let loaded = evaluator.load_flake(&flake_ref, mode)?;
  let system = current_system();

  let outputs = attrs(&loaded.outputs, "flake outputs")?;
  let mut checks = Vec::new();
  let mut checked = 0;

  for (name, value) in &outputs {
    let (members, kind) = match name.as_str() {
      "checks" | "packages" => (per_system_members(name, value)?, Kind::Derivation),
      "apps" => (per_system_members(name, value)?, Kind::App),
      "defaultPackage" => (per_system(name, value)?, Kind::Derivation),
      "defaultApp" => (per_system(name, value)?, Kind::App),
      "legacyPackages" => {
        debug!("not checking legacyPackages");
        continue;
      }
      other => {
        warn!(output = other, "unknown flake output");
        print_warning(&format!("unknown flake output '{other}'"));
        continue;
      }
    };

    for (attr, value) in members {
      let installable = Installable::Flake {
        flake_ref: flake_ref.clone(),
        attr: attr.clone(),
        value,
      };
      match kind {
        Kind::Derivation => {
          installable
            .to_buildable(store.as_ref())
            .with_context(|| format!("while checking flake output '{attr}'"))?;
        }
        Kind::App => {
          installable
            .to_app(evaluator.as_ref())
            .with_context(|| format!("while checking flake output '{attr}'"))?;
        }
      }
      checked += 1;
      if name == "checks" && attr.starts_with(&format!("checks.{system}.")) {
        checks.push(installable);
      }
    }
  }

  if !args.no_build && !checks.is_empty() {
    build(store.as_ref(), RealiseMode::Build, &checks)?;
  }

  print_success(&format!(
    "Checked {checked} outputs of {flake_ref} in {}",
    format_duration(start.elapsed())
  ));
  Ok(())
}

fn attrs(value: &Value, what: &str) -> Result<BTreeMap<String, Value>> {
  match value.force()? {
    Value::Attrs(attrs) => Ok(attrs),
    other => bail!("{what} must be an attribute set, got {}", other.type_name()),
  }
}

/// `<name>.<system>` for every system.
fn per_system(name: &str, value: &Value) -> Result<Vec<(String, Value)>> {
  Ok(
    attrs(value, &format!("output '{name}'"))?
      .into_iter()
      .map(|(system, v)| (format!("{name}.{system}"), v))
      .collect(),
  )
}

/// `<name>.<system>.<member>` for every system and member.
fn per_system_members(name: &str, value: &Value) -> Result<Vec<(String, Value)>> {
  let mut members = Vec::new();
  for (prefix, systems) in per_system(name, value)? {
    for (member, v) in attrs(&systems, &format!("output '{prefix}'"))? {
      members.push((format!("{prefix}.{member}"), v));
    }
  }
  Ok(members)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn systems() -> Value {
    Value::attrs([(
      "x86_64-linux".to_string(),
      Value::attrs([("a".to_string(), Value::Int(1)), ("b".to_string(), Value::Int(2))]),
    )])
  }

  #[test]
  fn members_are_named_by_full_attribute_path() {
    let names: Vec<String> = per_system_members("checks", &systems())
      .unwrap()
      .into_iter()
      .map(|(name, _)| name)
      .collect();
    assert_eq!(names, vec!["checks.x86_64-linux.a", "checks.x86_64-linux.b"]);
  }

  #[test]
  fn non_attribute_sets_are_rejected() {
    let err = per_system("defaultPackage", &Value::Int(3)).unwrap_err();
    assert!(err.to_string().contains("must be an attribute set"));
  }
}
