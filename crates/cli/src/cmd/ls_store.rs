//! Implementation of the `sprout ls-store` command.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use walkdir::WalkDir;

use sprout_lib::build::RealiseMode;

use crate::command::{Command, PackageSearch, StorePathArg};

#[derive(Args)]
pub struct LsStoreCommand {
  #[command(flatten)]
  arg: StorePathArg,
}

impl Command for LsStoreCommand {
  fn run(&mut self) -> Result<()> {
    let path = self.arg.store_path(&PackageSearch, RealiseMode::Build)?;
    for line in list(path.as_path())? {
      println!("{line}");
    }
    Ok(())
  }
}

/// Every entry below `root`, relative to it. Directories end in `/`, links
/// show their target.
fn list(root: &Path) -> Result<Vec<String>> {
  let mut lines = Vec::new();
  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = entry.with_context(|| format!("Failed to list '{}'", root.display()))?;
    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let name = if relative.as_os_str().is_empty() {
      ".".to_string()
    } else {
      format!("./{}", relative.display())
    };

    let file_type = entry.file_type();
    let line = if file_type.is_symlink() {
      let target = std::fs::read_link(entry.path())
        .with_context(|| format!("Failed to read link '{}'", entry.path().display()))?;
      format!("{name} -> {}", target.display())
    } else if file_type.is_dir() {
      format!("{name}/")
    } else {
      name
    };
    lines.push(line);
  }
  Ok(lines)
}
