//! A store kept in a local directory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::lock::BuildLock;
use super::schedule::{self, BuildGraph};
use super::{BuildRequest, Derivation, MissingInfo, PathInfo, Store, StoreError, StorePath};
use crate::util::hash::{ObjectHash, hash_path, hash_tree};

/// Names never copied into the store from a source tree.
const SOURCE_EXCLUDES: &[&str] = &[".git"];

/// How long `build_paths` waits for another process building into the same store.
const BUILD_LOCK_WAIT: Duration = Duration::from_secs(600);

pub struct LocalStore {
  root: PathBuf,
  store_dir: PathBuf,
  db_dir: PathBuf,
  max_jobs: usize,
}

impl LocalStore {
  /// Open (creating if needed) the store rooted at `root`.
  pub fn open(root: &Path) -> Result<Self, StoreError> {
    let store_dir = root.join("store");
    let db_dir = root.join("db");
    for dir in [store_dir.clone(), db_dir.join("info"), db_dir.join("derivers")] {
      fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
    }
    let root = dunce::canonicalize(root).map_err(StoreError::io(root))?;

    let max_jobs = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    debug!(root = %root.display(), max_jobs, "opened local store");

    Ok(Self {
      store_dir: root.join("store"),
      db_dir: root.join("db"),
      root,
      max_jobs,
    })
  }

  /// Open the store at the configured location (`SPROUT_STORE` or the data dir).
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(&crate::platform::paths::store_root())
  }

  pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
    self.max_jobs = max_jobs.max(1);
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn info_path(&self, path: &StorePath) -> PathBuf {
    self.db_dir.join("info").join(format!("{}.json", path.hash_part()))
  }

  fn deriver_path(&self, path: &StorePath) -> PathBuf {
    self.db_dir.join("derivers").join(path.hash_part())
  }

  /// Whether a source tree entry belongs in the store copy. Excluded names and
  /// the store itself are skipped when the source contains it.
  fn is_source_entry(&self, entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
      return true;
    }
    let excluded = entry
      .file_name()
      .to_str()
      .is_some_and(|name| SOURCE_EXCLUDES.contains(&name));
    !excluded && entry.path() != self.root
  }

  fn register(&self, info: &PathInfo) -> Result<(), StoreError> {
    let target = self.info_path(&info.path);
    let content = serde_json::to_string_pretty(info).map_err(StoreError::Serialize)?;
    write_atomic(&target, content.as_bytes())?;
    debug!(path = %info.path, references = info.references.len(), "registered valid path");
    Ok(())
  }

  /// Derivations that must be built to satisfy `requests`, in dependency order.
  fn plan(&self, requests: &[BuildRequest]) -> Result<(BuildGraph, BTreeMap<StorePath, Derivation>), StoreError> {
    let mut graph = BuildGraph::new();
    let mut drvs = BTreeMap::new();
    let mut memo = HashMap::new();
    for request in requests {
      self.visit(&request.drv_path, &request.outputs, &mut graph, &mut drvs, &mut memo)?;
    }
    Ok((graph, drvs))
  }

  /// Returns whether `drv_path` has to be built.
  fn visit(
    &self,
    drv_path: &StorePath,
    wanted: &BTreeSet<String>,
    graph: &mut BuildGraph,
    drvs: &mut BTreeMap<StorePath, Derivation>,
    memo: &mut HashMap<StorePath, bool>,
  ) -> Result<bool, StoreError> {
    if memo.get(drv_path) == Some(&true) {
      return Ok(true);
    }

    let drv = self.read_derivation(drv_path)?;
    let mut needs_build = false;
    for output in wanted_outputs(&drv, wanted) {
      let path = drv.output_path(&output).ok_or_else(|| StoreError::UnknownOutput {
        drv_path: drv_path.clone(),
        output: output.clone(),
      })?;
      if !self.is_valid_path(path)? {
        needs_build = true;
      }
    }
    memo.insert(drv_path.clone(), needs_build);
    if !needs_build {
      return Ok(false);
    }

    graph.add(drv_path);
    for (input, outputs) in &drv.input_drvs {
      if self.visit(input, outputs, graph, drvs, memo)? {
        graph.add_dependency(input, drv_path);
      }
    }
    drvs.insert(drv_path.clone(), drv);
    Ok(true)
  }

  fn register_outputs(&self, drv_path: &StorePath, drv: &Derivation) -> Result<(), StoreError> {
    let mut inputs: BTreeSet<StorePath> = drv.input_srcs.clone();
    for (input, outputs) in &drv.input_drvs {
      let input_drv = self.read_derivation(input)?;
      for (name, path) in input_drv.output_paths() {
        if outputs.is_empty() || outputs.contains(&name) {
          inputs.insert(path);
        }
      }
    }
    let mut candidates = self.closure(&inputs)?;
    candidates.extend(drv.output_paths().into_values());

    for path in drv.output_paths().into_values() {
      let references = scan_references(path.as_path(), &candidates)?;
      let nar_hash = hash_path(path.as_path(), &[])?;
      self.register(&PathInfo {
        path,
        nar_hash: nar_hash.to_string(),
        references,
        deriver: Some(drv_path.clone()),
      })?;
    }
    Ok(())
  }
}

impl Store for LocalStore {
  fn store_dir(&self) -> &Path {
    &self.store_dir
  }

  fn instantiate(&self, mut drv: Derivation) -> Result<(StorePath, Derivation), StoreError> {
    drv.compute_outputs(&self.store_dir)?;
    let drv_path = drv.drv_path(&self.store_dir)?;

    if !self.is_valid_path(&drv_path)? {
      let content = serde_json::to_string_pretty(&drv).map_err(StoreError::Serialize)?;
      write_atomic(drv_path.as_path(), content.as_bytes())?;
      let nar_hash = hash_path(drv_path.as_path(), &[])?;
      self.register(&PathInfo {
        path: drv_path.clone(),
        nar_hash: nar_hash.to_string(),
        references: drv.references(),
        deriver: None,
      })?;
      debug!(drv = %drv_path, "instantiated derivation");
    }

    for path in drv.output_paths().values() {
      let marker = self.deriver_path(path);
      if !marker.exists() {
        write_atomic(&marker, drv_path.to_string().as_bytes())?;
      }
    }

    Ok((drv_path, drv))
  }

  fn read_derivation(&self, drv_path: &StorePath) -> Result<Derivation, StoreError> {
    let content = match fs::read_to_string(drv_path.as_path()) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(StoreError::DerivationNotFound(drv_path.clone()));
      }
      Err(e) => return Err(StoreError::io(drv_path.as_path())(e)),
    };
    serde_json::from_str(&content).map_err(StoreError::Serialize)
  }

  fn add_to_store(&self, name: &str, src: &Path) -> Result<StorePath, StoreError> {
    let src = dunce::canonicalize(src).map_err(StoreError::io(src))?;
    let src = src.as_path();
    let nar_hash = hash_tree(src, |e| self.is_source_entry(e))?;
    let hash = ObjectHash::of_parts(&["source", name, nar_hash.hex(), &self.store_dir.to_string_lossy()]);
    let path = StorePath::new(&self.store_dir, &hash.0, name)?;

    if self.is_valid_path(&path)? {
      debug!(path = %path, "source already in store");
      return Ok(path);
    }

    let staging = tempfile::Builder::new()
      .prefix(".tmp-add-")
      .tempdir_in(&self.store_dir)
      .map_err(StoreError::io(&self.store_dir))?;
    let staged = staging.path().join("content");
    copy_tree(src, &staged, |e| self.is_source_entry(e))?;

    if path.as_path().exists() {
      remove_any(path.as_path())?;
    }
    fs::rename(&staged, path.as_path()).map_err(StoreError::io(path.as_path()))?;

    self.register(&PathInfo {
      path: path.clone(),
      nar_hash: nar_hash.to_string(),
      references: BTreeSet::new(),
      deriver: None,
    })?;
    info!(src = %src.display(), path = %path, "added to store");
    Ok(path)
  }

  fn build_paths(&self, requests: &[BuildRequest]) -> Result<(), StoreError> {
    let _lock = BuildLock::acquire(&self.db_dir, "build", BUILD_LOCK_WAIT)?;

    let (graph, drvs) = self.plan(requests)?;
    if graph.is_empty() {
      debug!(requests = requests.len(), "all requested outputs are valid");
      return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .map_err(StoreError::Runtime)?;
    let tmp_root = self.root.join("tmp");

    runtime.block_on(schedule::execute(
      &graph,
      &drvs,
      &tmp_root,
      self.max_jobs,
      |drv_path, drv| self.register_outputs(drv_path, drv),
    ))
  }

  fn query_missing(&self, requests: &[BuildRequest]) -> Result<MissingInfo, StoreError> {
    let (_, drvs) = self.plan(requests)?;
    let mut missing = MissingInfo {
      will_build: drvs.into_keys().collect(),
      valid: BTreeSet::new(),
    };

    for request in requests {
      let drv = self.read_derivation(&request.drv_path)?;
      for output in wanted_outputs(&drv, &request.outputs) {
        if let Some(path) = drv.output_path(&output)
          && self.is_valid_path(path)?
        {
          missing.valid.insert(path.clone());
        }
      }
    }
    Ok(missing)
  }

  fn is_valid_path(&self, path: &StorePath) -> Result<bool, StoreError> {
    Ok(self.info_path(path).exists() && fs::symlink_metadata(path.as_path()).is_ok())
  }

  fn query_path_info(&self, path: &StorePath) -> Result<Option<PathInfo>, StoreError> {
    if !self.is_valid_path(path)? {
      return Ok(None);
    }
    let info_path = self.info_path(path);
    let content = fs::read_to_string(&info_path).map_err(StoreError::io(&info_path))?;
    let info = serde_json::from_str(&content).map_err(StoreError::Serialize)?;
    Ok(Some(info))
  }

  fn query_deriver(&self, path: &StorePath) -> Result<Option<StorePath>, StoreError> {
    if let Some(PathInfo {
      deriver: Some(deriver), ..
    }) = self.query_path_info(path)?
    {
      return Ok(Some(deriver));
    }

    let marker = self.deriver_path(path);
    match fs::read_to_string(&marker) {
      Ok(content) => Ok(Some(self.parse_store_path(Path::new(content.trim()))?)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(StoreError::io(&marker)(e)),
    }
  }

  fn query_all_valid_paths(&self) -> Result<BTreeSet<StorePath>, StoreError> {
    let info_dir = self.db_dir.join("info");
    let mut paths = BTreeSet::new();
    for entry in fs::read_dir(&info_dir).map_err(StoreError::io(&info_dir))? {
      let entry = entry.map_err(StoreError::io(&info_dir))?;
      let content = fs::read_to_string(entry.path()).map_err(StoreError::io(entry.path()))?;
      match serde_json::from_str::<PathInfo>(&content) {
        Ok(info) if fs::symlink_metadata(info.path.as_path()).is_ok() => {
          paths.insert(info.path);
        }
        Ok(_) => {}
        Err(e) => warn!(file = %entry.path().display(), error = %e, "skipping unreadable path info"),
      }
    }
    Ok(paths)
  }
}

fn wanted_outputs(drv: &Derivation, wanted: &BTreeSet<String>) -> BTreeSet<String> {
  if wanted.is_empty() {
    drv.output_names()
  } else {
    wanted.clone()
  }
}

/// Store paths among `candidates` whose hash part occurs in the content,
/// symlink targets or names relative to `root`. The name of `root` itself is
/// never searched.
fn scan_references(root: &Path, candidates: &BTreeSet<StorePath>) -> Result<BTreeSet<StorePath>, StoreError> {
  let mut found = BTreeSet::new();
  let mut pending: Vec<(String, &StorePath)> = candidates.iter().map(|p| (p.hash_part(), p)).collect();

  for entry in WalkDir::new(root) {
    if pending.is_empty() {
      break;
    }
    let entry = entry.map_err(|e| StoreError::io(root)(io::Error::other(e)))?;
    let rel = entry.path().strip_prefix(root).unwrap_or(Path::new(""));
    let mut haystack = rel.to_string_lossy().into_owned().into_bytes();
    if entry.file_type().is_file() {
      haystack.extend(fs::read(entry.path()).map_err(StoreError::io(entry.path()))?);
    } else if entry.file_type().is_symlink() {
      let target = fs::read_link(entry.path()).map_err(StoreError::io(entry.path()))?;
      haystack.extend(target.to_string_lossy().as_bytes());
    }

    pending.retain(|(hash, path)| {
      let hit = contains(&haystack, hash.as_bytes());
      if hit {
        found.insert((*path).clone());
      }
      !hit
    });
  }
  Ok(found)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
  !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn copy_tree(src: &Path, dest: &Path, keep: impl FnMut(&DirEntry) -> bool) -> Result<(), StoreError> {
  let meta = fs::symlink_metadata(src).map_err(StoreError::io(src))?;
  if !meta.is_dir() {
    fs::copy(src, dest).map_err(StoreError::io(dest))?;
    return Ok(());
  }

  let walker = WalkDir::new(src).into_iter().filter_entry(keep);
  for entry in walker {
    let entry = entry.map_err(|e| StoreError::io(src)(io::Error::other(e)))?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(StoreError::io(&target))?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path()).map_err(StoreError::io(entry.path()))?;
      symlink(&link, &target).map_err(StoreError::io(&target))?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target).map_err(StoreError::io(&target))?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(target, link)
}

fn remove_any(path: &Path) -> Result<(), StoreError> {
  let meta = fs::symlink_metadata(path).map_err(StoreError::io(path))?;
  if meta.is_dir() {
    fs::remove_dir_all(path).map_err(StoreError::io(path))
  } else {
    fs::remove_file(path).map_err(StoreError::io(path))
  }
}

fn write_atomic(target: &Path, content: &[u8]) -> Result<(), StoreError> {
  let parent = target.parent().unwrap_or(Path::new("."));
  let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(StoreError::io(parent))?;
  io::Write::write_all(&mut tmp, content).map_err(StoreError::io(target))?;
  tmp
    .persist(target)
    .map_err(|e| StoreError::io(target)(e.error))?;
  Ok(())
}
