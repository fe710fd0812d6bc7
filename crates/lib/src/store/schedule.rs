//! Dependency-ordered, parallel execution of derivation builds.
//!
//! Derivations form a DAG through their input derivations. The DAG is split
//! into waves: every derivation in a wave depends only on derivations from
//! earlier waves, so a wave's builds run concurrently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::builder::{BuilderError, run_builder};
use super::{Derivation, StoreError, StorePath};

/// Derivations to build and the edges between them.
#[derive(Default)]
pub struct BuildGraph {
  graph: DiGraph<StorePath, ()>,
  nodes: HashMap<StorePath, NodeIndex>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, drv_path: &StorePath) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(drv_path) {
      return idx;
    }
    let idx = self.graph.add_node(drv_path.clone());
    self.nodes.insert(drv_path.clone(), idx);
    idx
  }

  /// Record that `dependent` needs `dependency` built first.
  pub fn add_dependency(&mut self, dependency: &StorePath, dependent: &StorePath) {
    let from = self.add(dependency);
    let to = self.add(dependent);
    self.graph.update_edge(from, to, ());
  }

  pub fn contains(&self, drv_path: &StorePath) -> bool {
    self.nodes.contains_key(drv_path)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Group derivations into waves of mutually independent builds.
  pub fn waves(&self) -> Result<Vec<Vec<StorePath>>, StoreError> {
    toposort(&self.graph, None).map_err(|_| StoreError::CycleDetected)?;

    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: HashSet<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|idx| in_degree[idx] == 0).copied().collect();
      if ready.is_empty() {
        return Err(StoreError::CycleDetected);
      }

      for idx in &ready {
        remaining.remove(idx);
        for dependent in self.graph.neighbors_directed(*idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&dependent) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<StorePath> = ready.into_iter().map(|idx| self.graph[idx].clone()).collect();
      wave.sort();
      waves.push(wave);
    }

    Ok(waves)
  }
}

/// Build every derivation in `graph`, wave by wave.
///
/// `on_built` runs for each successful build before the next wave starts. The
/// first failure stops scheduling once its wave has finished.
pub async fn execute(
  graph: &BuildGraph,
  derivations: &BTreeMap<StorePath, Derivation>,
  tmp_root: &Path,
  max_jobs: usize,
  mut on_built: impl FnMut(&StorePath, &Derivation) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
  let waves = graph.waves()?;
  info!(derivations = graph.len(), waves = waves.len(), "building derivations");

  let semaphore = Arc::new(Semaphore::new(max_jobs.max(1)));

  for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, builds = wave.len(), "executing wave");

    let mut join_set = JoinSet::new();
    for drv_path in wave {
      let drv = derivations
        .get(drv_path)
        .cloned()
        .ok_or_else(|| StoreError::DerivationNotFound(drv_path.clone()))?;
      let drv_path = drv_path.clone();
      let tmp_root: PathBuf = tmp_root.to_path_buf();
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        let result = build_one(&drv, &tmp_root).await;
        (drv_path, result)
      });
    }

    let mut failures = Vec::new();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((drv_path, Ok(()))) => {
          info!(drv = %drv_path, "build succeeded");
          if let Some(drv) = derivations.get(&drv_path) {
            on_built(&drv_path, drv)?;
          }
        }
        Ok((drv_path, Err(e))) => {
          error!(drv = %drv_path, error = %e, "build failed");
          failures.push((drv_path, e.to_string()));
        }
        Err(e) => {
          error!(error = %e, "build task panicked");
          return Err(StoreError::Runtime(std::io::Error::other(e)));
        }
      }
    }

    failures.sort();
    if let Some((drv_path, message)) = failures.into_iter().next() {
      return Err(StoreError::BuildFailed { drv_path, message });
    }
  }

  Ok(())
}

async fn build_one(drv: &Derivation, tmp_root: &Path) -> Result<(), BuilderError> {
  tokio::fs::create_dir_all(tmp_root).await?;
  let build_dir = tempfile::Builder::new()
    .prefix(&format!("build-{}-", drv.name))
    .tempdir_in(tmp_root)?;
  run_builder(drv, build_dir.path()).await
}
