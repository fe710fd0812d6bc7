use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use walkdir::WalkDir;

use sprout_lib::consts::FLAKE_FILENAME;
use sprout_lib::flake::FlakeRef;
use sprout_lib::flake::resolve::FlakeSource;

use crate::command::EvalArgs;
use crate::output::print_success;

/// Written by `sprout flake init`.
pub const FLAKE_TEMPLATE: &str = r#"return {
  description = "A sprout flake",

  inputs = {},

  outputs = function(inputs)
    local hello = sprout.derivation {
      name = "hello",
      builder = "/bin/sh",
      args = { "-c", "echo 'Hello from sprout' > $out" },
    }

    return {
      packages = { [sprout.system] = { hello = hello } },
      defaultPackage = { [sprout.system] = hello },
    }
  end,
}
"#;

#[derive(Args)]
pub struct InitArgs {
  /// Directory to create the flake in
  #[arg(value_name = "DIR", default_value = ".")]
  dir: PathBuf,
}

#[derive(Args)]
pub struct CloneArgs {
  #[command(flatten)]
  eval: EvalArgs,

  #[arg(value_name = "FLAKE")]
  flake: String,

  /// Directory to copy the source into; must not exist
  #[arg(long, value_name = "DIR")]
  dest: PathBuf,
}

pub fn init(args: &InitArgs) -> Result<()> {
  let path = write_template(&args.dir)?;
  print_success(&format!("Created {}", path.display()));
  Ok(())
}

fn write_template(dir: &Path) -> Result<PathBuf> {
  let path = dir.join(FLAKE_FILENAME);
  if path.exists() {
    bail!("{} already exists", path.display());
  }
  fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
  fs::write(&path, FLAKE_TEMPLATE).with_context(|| format!("Failed to write {}", path.display()))?;
  Ok(path)
}

pub fn clone(args: &mut CloneArgs) -> Result<()> {
  if args.dest.exists() {
    bail!("{} already exists", args.dest.display());
  }
  let evaluator = args.eval.get_eval_state()?;
  let flake_ref = evaluator.lookup(&FlakeRef::parse(&args.flake)?)?;
  let source = evaluator.fetch(&flake_ref)?;

  copy_source(source.store_path.as_path(), &args.dest)?;
  print_success(&format!("Cloned {} into {}", source.locked, args.dest.display()));
  Ok(())
}

/// Copy a store tree to `dest`, leaving every copied file writable by its owner.
fn copy_source(src: &Path, dest: &Path) -> Result<()> {
  for entry in WalkDir::new(src) {
    let entry = entry.with_context(|| format!("Failed to read {}", src.display()))?;
    let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target).with_context(|| format!("Failed to create {}", target.display()))?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target).with_context(|| format!("Failed to link {}", target.display()))?;
      continue;
    } else {
      fs::copy(entry.path(), &target).with_context(|| format!("Failed to copy {}", entry.path().display()))?;
    }
    make_writable(&target)?;
  }
  Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
  std::os::windows::fs::symlink_file(link, target)
}

#[cfg(unix)]
fn make_writable(path: &Path) -> Result<()> {
  use std::os::unix::fs::PermissionsExt;

  let mut perms = fs::metadata(path)?.permissions();
  perms.set_mode(perms.mode() | 0o200);
  fs::set_permissions(path, perms).with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(windows)]
fn make_writable(path: &Path) -> Result<()> {
  let mut perms = fs::metadata(path)?.permissions();
  #[allow(clippy::permissions_set_readonly_false)]
  perms.set_readonly(false);
  fs::set_permissions(path, perms).with_context(|| format!("Failed to set permissions on {}", path.display()))
}
