//! Runs a derivation's builder in an isolated environment.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::Derivation;

#[derive(Debug, Error)]
pub enum BuilderError {
  #[error("failed to spawn builder '{builder}': {source}")]
  Spawn {
    builder: String,
    #[source]
    source: std::io::Error,
  },

  #[error("builder '{builder}' exited with {}{}", describe_exit(.code), tail(.stderr))]
  Failed {
    builder: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("builder did not produce output '{output}' at {path}")]
  MissingOutput { output: String, path: String },

  #[error("failed to prepare build directory: {0}")]
  Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("code {code}"),
    None => "a signal".to_string(),
  }
}

fn tail(stderr: &str) -> String {
  let lines: Vec<&str> = stderr.lines().rev().take(10).collect();
  if lines.is_empty() {
    return String::new();
  }
  let mut out = String::from("; last lines of stderr:");
  for line in lines.into_iter().rev() {
    out.push_str("\n  ");
    out.push_str(line);
  }
  out
}

/// Run `drv.builder` with `drv.args` inside `build_dir`.
///
/// The environment is cleared and replaced by:
/// - `PATH=/path-not-set` so undeclared tools fail fast
/// - `HOME=/homeless-shelter`
/// - `TMPDIR`, `TMP`, `TEMP`, `TEMPDIR` pointing at `build_dir/tmp`
/// - `SPROUT_BUILD_TOP` set to `build_dir`
/// - the derivation's own `env`, which includes one variable per output path
///
/// Every output path must exist once the builder exits successfully.
pub async fn run_builder(drv: &Derivation, build_dir: &Path) -> Result<(), BuilderError> {
  info!(name = %drv.name, builder = %drv.builder, "running builder");

  let tmp_dir = build_dir.join("tmp");
  tokio::fs::create_dir_all(&tmp_dir).await?;

  for path in drv.output_paths().values() {
    remove_stale(path.as_path()).await?;
  }

  let mut command = Command::new(&drv.builder);
  command
    .args(&drv.args)
    .current_dir(build_dir)
    .env_clear()
    .env("PATH", "/path-not-set")
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", &tmp_dir)
    .env("TMP", &tmp_dir)
    .env("TEMP", &tmp_dir)
    .env("TEMPDIR", &tmp_dir)
    .env("SPROUT_BUILD_TOP", build_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    // 1980-01-01, the ZIP epoch
    .env("SOURCE_DATE_EPOCH", "315532800")
    .envs(&drv.env);

  debug!(working_dir = ?build_dir, args = ?drv.args, "spawning builder");

  let output = command.output().await.map_err(|source| BuilderError::Spawn {
    builder: drv.builder.clone(),
    source,
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout);
  let stderr = String::from_utf8_lossy(&output.stderr);
  if !stdout.is_empty() {
    debug!(stdout = %stdout.trim_end(), "builder stdout");
  }
  if !stderr.is_empty() {
    debug!(stderr = %stderr.trim_end(), "builder stderr");
  }

  if !output.status.success() {
    return Err(BuilderError::Failed {
      builder: drv.builder.clone(),
      code: output.status.code(),
      stderr: stderr.into_owned(),
    });
  }

  for (name, path) in drv.output_paths() {
    if tokio::fs::symlink_metadata(path.as_path()).await.is_err() {
      return Err(BuilderError::MissingOutput {
        output: name,
        path: path.to_string(),
      });
    }
  }

  Ok(())
}

async fn remove_stale(path: &Path) -> std::io::Result<()> {
  match tokio::fs::symlink_metadata(path).await {
    Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
    Ok(_) => tokio::fs::remove_file(path).await,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use crate::util::testutil::sh_derivation;
  use tempfile::TempDir;

  #[tokio::test]
  async fn builder_writes_output() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");
    std::fs::create_dir_all(&store_dir).unwrap();
    let drv = sh_derivation(&store_dir, "greeting", "echo hello > \"$out\"");
    let build_dir = temp.path().join("build");

    run_builder(&drv, &build_dir).await.unwrap();

    let out = drv.output_path("out").unwrap();
    assert_eq!(std::fs::read_to_string(out.as_path()).unwrap(), "hello\n");
  }

  #[tokio::test]
  async fn environment_is_isolated() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");
    std::fs::create_dir_all(&store_dir).unwrap();
    let drv = sh_derivation(&store_dir, "env", "echo \"$PATH:$HOME\" > \"$out\"");

    run_builder(&drv, &temp.path().join("build")).await.unwrap();

    let out = drv.output_path("out").unwrap();
    assert_eq!(
      std::fs::read_to_string(out.as_path()).unwrap(),
      "/path-not-set:/homeless-shelter\n"
    );
  }

  #[tokio::test]
  async fn failing_builder_reports_stderr() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");
    std::fs::create_dir_all(&store_dir).unwrap();
    let drv = sh_derivation(&store_dir, "broken", "echo boom >&2; exit 3");

    let err = run_builder(&drv, &temp.path().join("build")).await.unwrap_err();
    match &err {
      BuilderError::Failed { code, stderr, .. } => {
        assert_eq!(*code, Some(3));
        assert!(stderr.contains("boom"));
      }
      other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("boom"));
  }

  #[tokio::test]
  async fn missing_output_is_an_error() {
    let temp = TempDir::new().unwrap();
    let store_dir = temp.path().join("store");
    std::fs::create_dir_all(&store_dir).unwrap();
    let drv = sh_derivation(&store_dir, "lazy", "true");

    let err = run_builder(&drv, &temp.path().join("build")).await.unwrap_err();
    assert!(matches!(err, BuilderError::MissingOutput { .. }));
  }
}
