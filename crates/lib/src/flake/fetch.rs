//! Fetching flake sources into the store.
//!
//! Path flakes are copied into the store as they are. Git flakes are cloned
//! (or fetched) into the cache directory with their `.git` directory intact,
//! and the tree of the selected commit is then exported and copied into the
//! store, so uncommitted changes in the cache never leak into a source.
//!
//! # Cache Structure
//!
//! ```text
//! <cache>/git/<hash of url>/    # clone with .git, reused by later fetches
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use gix::object::tree::EntryKind;
use gix::remote::Direction;
use thiserror::Error;
use tracing::{debug, info};

use super::{FlakeError, FlakeRef};
use crate::consts::FLAKE_FILENAME;
use crate::store::{Store, StorePath};
use crate::util::hash::ObjectHash;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to create cache directory '{}': {source}", .path.display())]
  CreateCacheDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to clone repository '{url}': {source}")]
  Clone {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("failed to open repository at '{}': {source}", .path.display())]
  Open {
    path: PathBuf,
    #[source]
    source: Box<gix::open::Error>,
  },

  #[error("failed to fetch from '{url}': {source}")]
  Fetch {
    url: String,
    #[source]
    source: BoxError,
  },

  #[error("no remote configured for repository at '{}'", .0.display())]
  NoRemote(PathBuf),

  #[error("revision '{rev}' not found in '{url}'")]
  RevisionNotFound { url: String, rev: String },

  #[error("failed to export revision '{rev}': {source}")]
  Export {
    rev: String,
    #[source]
    source: BoxError,
  },

  #[error("flake reference '{0}' must be resolved through a registry before fetching")]
  Indirect(String),
}

/// Where a fetched flake lives and what it was fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
  pub store_path: StorePath,
  /// Immutable reference that fetches exactly this source again.
  pub locked: FlakeRef,
  pub nar_hash: String,
  pub rev: Option<String>,
  /// The local directory of a path flake, where its lock file is written.
  pub original_dir: Option<PathBuf>,
}

/// Fetch `flake_ref` and copy its source into the store.
pub fn fetch_flake(store: &dyn Store, flake_ref: &FlakeRef, cache_dir: &Path) -> Result<SourceInfo, FlakeError> {
  match flake_ref {
    FlakeRef::Path { path } => {
      if !path.join(FLAKE_FILENAME).is_file() {
        return Err(FlakeError::NoFlakeFile { dir: path.clone() });
      }
      let store_path = store.add_to_store("source", path)?;
      Ok(SourceInfo {
        nar_hash: nar_hash(store, &store_path)?,
        store_path,
        locked: flake_ref.clone(),
        rev: None,
        original_dir: Some(path.clone()),
      })
    }
    FlakeRef::Git { url, git_ref, rev } => {
      let git_cache = cache_dir.join("git");
      let (repo, commit) = fetch_git(url, git_ref.as_deref(), rev.as_deref(), &git_cache)?;

      let export = tempfile::Builder::new()
        .prefix("sprout-export-")
        .tempdir()
        .map_err(|e| FetchError::Export {
          rev: commit.clone(),
          source: Box::new(e),
        })?;
      export_commit(&repo, &commit, export.path())?;
      if !export.path().join(FLAKE_FILENAME).is_file() {
        return Err(FlakeError::NoFlakeFile {
          dir: PathBuf::from(flake_ref.to_string()),
        });
      }

      let store_path = store.add_to_store("source", export.path())?;
      Ok(SourceInfo {
        nar_hash: nar_hash(store, &store_path)?,
        store_path,
        locked: FlakeRef::Git {
          url: url.clone(),
          git_ref: git_ref.clone(),
          rev: Some(commit.clone()),
        },
        rev: Some(commit),
        original_dir: None,
      })
    }
    FlakeRef::Indirect { .. } => Err(FetchError::Indirect(flake_ref.to_string()).into()),
  }
}

fn nar_hash(store: &dyn Store, path: &StorePath) -> Result<String, FlakeError> {
  let info = store
    .query_path_info(path)?
    .ok_or_else(|| crate::store::StoreError::InvalidDerivation(format!("'{path}' was added but is not valid")))?;
  Ok(info.nar_hash)
}

/// Clone or update `url` under `cache_dir` and resolve the wanted commit.
///
/// `rev` wins over `git_ref`; with neither, the remote's default branch is used.
pub fn fetch_git(
  url: &str,
  git_ref: Option<&str>,
  rev: Option<&str>,
  cache_dir: &Path,
) -> Result<(gix::Repository, String), FetchError> {
  let repo_path = cache_dir.join(ObjectHash::of_parts(&[url]).0);

  if !cache_dir.exists() {
    fs::create_dir_all(cache_dir).map_err(|source| FetchError::CreateCacheDir {
      path: cache_dir.to_path_buf(),
      source,
    })?;
  }

  let repo = if repo_path.join(".git").exists() {
    debug!(url, path = %repo_path.display(), "opening cached repository");
    let repo = gix::open(&repo_path).map_err(|e| FetchError::Open {
      path: repo_path.clone(),
      source: Box::new(e),
    })?;
    let already_present = rev.is_some_and(|rev| repo.rev_parse_single(rev).is_ok());
    if !already_present {
      fetch_updates(&repo, url, &repo_path)?;
    }
    repo
  } else {
    info!(url, path = %repo_path.display(), "cloning repository");
    clone_repo(url, &repo_path)?
  };

  let commit = resolve_revision(&repo, url, git_ref, rev)?;
  debug!(url, rev = %commit, "resolved revision");
  Ok((repo, commit))
}

fn clone_repo(url: &str, dest: &Path) -> Result<gix::Repository, FetchError> {
  let clone_err = |e: BoxError| FetchError::Clone {
    url: url.to_string(),
    source: e,
  };

  let mut prepared = gix::prepare_clone(url, dest).map_err(|e| clone_err(Box::new(e)))?;
  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_err(Box::new(e)))?;
  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| clone_err(Box::new(e)))?;

  Ok(repo)
}

fn fetch_updates(repo: &gix::Repository, url: &str, repo_path: &Path) -> Result<(), FetchError> {
  debug!(url, "fetching updates");
  let fetch_err = |e: BoxError| FetchError::Fetch {
    url: url.to_string(),
    source: e,
  };

  let remote = repo
    .find_default_remote(Direction::Fetch)
    .ok_or_else(|| FetchError::NoRemote(repo_path.to_path_buf()))?
    .map_err(|e| fetch_err(Box::new(e)))?;

  remote
    .connect(Direction::Fetch)
    .map_err(|e| fetch_err(Box::new(e)))?
    .prepare_fetch(gix::progress::Discard, Default::default())
    .map_err(|e| fetch_err(Box::new(e)))?
    .receive(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| fetch_err(Box::new(e)))?;

  Ok(())
}

fn resolve_revision(
  repo: &gix::Repository,
  url: &str,
  git_ref: Option<&str>,
  rev: Option<&str>,
) -> Result<String, FetchError> {
  let candidates: Vec<String> = match (rev, git_ref) {
    (Some(rev), _) => vec![rev.to_string()],
    (None, Some(git_ref)) => vec![format!("refs/remotes/origin/{git_ref}"), format!("refs/tags/{git_ref}"), git_ref.to_string()],
    (None, None) => vec!["refs/remotes/origin/HEAD".to_string(), "HEAD".to_string()],
  };

  for spec in &candidates {
    let commit = repo
      .rev_parse_single(spec.as_str())
      .ok()
      .and_then(|id| id.object().ok())
      .and_then(|object| object.peel_to_commit().ok());
    if let Some(commit) = commit {
      return Ok(commit.id.to_string());
    }
  }

  Err(FetchError::RevisionNotFound {
    url: url.to_string(),
    rev: rev.or(git_ref).unwrap_or("HEAD").to_string(),
  })
}

/// Write the tree of `commit` to `dest`.
pub fn export_commit(repo: &gix::Repository, commit: &str, dest: &Path) -> Result<(), FetchError> {
  let export_err = |e: BoxError| FetchError::Export {
    rev: commit.to_string(),
    source: e,
  };

  let id = gix::ObjectId::from_hex(commit.as_bytes()).map_err(|e| export_err(Box::new(e)))?;
  let tree = repo
    .find_object(id)
    .map_err(|e| export_err(Box::new(e)))?
    .peel_to_tree()
    .map_err(|e| export_err(Box::new(e)))?;

  export_tree(repo, tree, dest).map_err(export_err)
}

fn export_tree(repo: &gix::Repository, tree: gix::Tree<'_>, dest: &Path) -> Result<(), BoxError> {
  fs::create_dir_all(dest)?;

  let mut entries = Vec::new();
  for entry in tree.iter() {
    let entry = entry?;
    entries.push((entry.filename().to_string(), entry.mode().kind(), entry.object_id()));
  }

  for (name, kind, oid) in entries {
    let target = dest.join(&name);
    match kind {
      EntryKind::Tree => {
        let subtree = repo.find_object(oid)?.peel_to_tree()?;
        export_tree(repo, subtree, &target)?;
      }
      EntryKind::Blob => {
        fs::write(&target, &repo.find_object(oid)?.data)?;
      }
      EntryKind::BlobExecutable => {
        fs::write(&target, &repo.find_object(oid)?.data)?;
        set_executable(&target)?;
      }
      EntryKind::Link => {
        let blob = repo.find_object(oid)?;
        write_link(&String::from_utf8_lossy(&blob.data), &target)?;
      }
      // Submodules are not fetched.
      EntryKind::Commit => {}
    }
  }
  Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
  Ok(())
}

#[cfg(unix)]
fn write_link(link: &str, target: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn write_link(link: &str, target: &Path) -> std::io::Result<()> {
  fs::write(target, link)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{temp_store, write_file};
  use tempfile::TempDir;

  mod path_flakes {
    use super::*;

    #[test]
    fn copies_source_into_store() {
      let (_store_dir, store) = temp_store();
      let flake = TempDir::new().unwrap();
      write_file(flake.path(), FLAKE_FILENAME, "return { outputs = function() return {} end }");
      write_file(flake.path(), "lib/util.lua", "return 1");

      let flake_ref = FlakeRef::Path {
        path: flake.path().to_path_buf(),
      };
      let info = fetch_flake(&store, &flake_ref, Path::new("/unused")).unwrap();

      assert_eq!(info.store_path.name(), "source");
      assert!(info.store_path.as_path().join("lib/util.lua").is_file());
      assert!(info.nar_hash.starts_with("sha256:"));
      assert_eq!(info.locked, flake_ref);
      assert_eq!(info.original_dir.as_deref(), Some(flake.path()));
    }

    #[test]
    fn same_content_same_hash() {
      let (_store_dir, store) = temp_store();
      let a = TempDir::new().unwrap();
      let b = TempDir::new().unwrap();
      for dir in [&a, &b] {
        write_file(dir.path(), FLAKE_FILENAME, "return {}");
      }
      let fetch = |dir: &TempDir| {
        fetch_flake(
          &store,
          &FlakeRef::Path {
            path: dir.path().to_path_buf(),
          },
          Path::new("/unused"),
        )
        .unwrap()
      };
      let (ia, ib) = (fetch(&a), fetch(&b));
      assert_eq!(ia.nar_hash, ib.nar_hash);
      assert_eq!(ia.store_path, ib.store_path);
    }

    #[test]
    fn missing_flake_file_is_an_error() {
      let (_store_dir, store) = temp_store();
      let dir = TempDir::new().unwrap();
      let result = fetch_flake(
        &store,
        &FlakeRef::Path {
          path: dir.path().to_path_buf(),
        },
        Path::new("/unused"),
      );
      assert!(matches!(result, Err(FlakeError::NoFlakeFile { .. })));
    }
  }

  #[test]
  fn indirect_refs_are_rejected() {
    let (_store_dir, store) = temp_store();
    let flake_ref = FlakeRef::Indirect {
      id: "tools".into(),
      git_ref: None,
      rev: None,
    };
    let result = fetch_flake(&store, &flake_ref, Path::new("/unused"));
    assert!(matches!(result, Err(FlakeError::Fetch(FetchError::Indirect(_)))));
  }

  // NOTE: Clone and fetch need network access and are left out of unit tests.
}
