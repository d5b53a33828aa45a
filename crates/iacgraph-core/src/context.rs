//! Per-scan state shared by workers.

use crate::compiler::{CompileOptions, TemplateCompiler};
use crate::config::{BackendKind, ScanConfig};
use crate::document::load_template;
use crate::error::{IacError, Result};
use crate::graph::{GraphBackend, SnapshotStore, TemplateGraph};
use crate::query::QueryLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Where compiled graphs are queried from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHandle {
    InMemory,
    /// Graphs are written to `dir` and reloaded. Files stay on disk after the scan.
    Snapshot { dir: PathBuf },
}

/// Counters collected over the life of a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub units: usize,
    pub templates: usize,
    pub nodes: usize,
    pub compile_failures: usize,
    pub elapsed_ms: u64,
}

/// Explicit scan state: configuration, backend and counters.
///
/// Shared across workers behind an `Arc`; counters are atomics so no lock is held while
/// compiling.
#[derive(Debug)]
pub struct ScanContext {
    config: ScanConfig,
    backend: BackendHandle,
    units: AtomicUsize,
    templates: AtomicUsize,
    nodes: AtomicUsize,
    compile_failures: AtomicUsize,
    snapshot_seq: AtomicU64,
    started: Instant,
}

impl ScanContext {
    pub fn open(config: ScanConfig) -> Result<Self> {
        let backend = match config.backend.kind {
            BackendKind::Memory => BackendHandle::InMemory,
            BackendKind::Snapshot => {
                let dir = config.backend.snapshot_dir();
                std::fs::create_dir_all(&dir).map_err(|e| {
                    IacError::GraphQueryBackend(format!(
                        "failed to create snapshot directory '{}': {}",
                        dir.display(),
                        e
                    ))
                })?;
                BackendHandle::Snapshot { dir }
            }
        };
        debug!(backend = ?backend, "scan context opened");
        Ok(Self::with_backend(config, backend))
    }

    /// Context with default configuration and the in-memory backend.
    pub fn in_memory() -> Self {
        Self::with_backend(ScanConfig::default(), BackendHandle::InMemory)
    }

    fn with_backend(config: ScanConfig, backend: BackendHandle) -> Self {
        Self {
            config,
            backend,
            units: AtomicUsize::new(0),
            templates: AtomicUsize::new(0),
            nodes: AtomicUsize::new(0),
            compile_failures: AtomicUsize::new(0),
            snapshot_seq: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn limits(&self) -> QueryLimits {
        self.config.limits
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            strict_references: self.config.scan.strict_references,
        }
    }

    /// Load and compile `paths` as one unit and hand back a read-only store.
    pub fn compile_paths(&self, paths: &[PathBuf]) -> Result<Box<dyn GraphBackend>> {
        self.units.fetch_add(1, Ordering::Relaxed);
        let result = self.compile_unit(paths);
        if result.is_err() {
            self.compile_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn compile_unit(&self, paths: &[PathBuf]) -> Result<Box<dyn GraphBackend>> {
        let docs = paths
            .iter()
            .map(|path| load_template(path))
            .collect::<Result<Vec<_>>>()?;

        let mut graph = TemplateGraph::new();
        let roots = TemplateCompiler::new(&mut graph)
            .with_options(self.compile_options())
            .compile_group(&docs)?;

        self.templates.fetch_add(roots.len(), Ordering::Relaxed);
        self.nodes.fetch_add(graph.node_count(), Ordering::Relaxed);

        match &self.backend {
            BackendHandle::InMemory => Ok(Box::new(graph)),
            BackendHandle::Snapshot { dir } => {
                let file = self.snapshot_path(dir);
                SnapshotStore::save(&graph, &file)?;
                debug!(path = %file.display(), "snapshot written");
                Ok(Box::new(SnapshotStore::load(&file)?))
            }
        }
    }

    fn snapshot_path(&self, dir: &Path) -> PathBuf {
        let seq = self.snapshot_seq.fetch_add(1, Ordering::Relaxed);
        dir.join(format!("unit-{}-{}.json", std::process::id(), seq))
    }

    /// End the scan and report what it did.
    pub fn close(self) -> ScanStats {
        let stats = ScanStats {
            units: self.units.into_inner(),
            templates: self.templates.into_inner(),
            nodes: self.nodes.into_inner(),
            compile_failures: self.compile_failures.into_inner(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        info!(
            units = stats.units,
            templates = stats.templates,
            nodes = stats.nodes,
            failures = stats.compile_failures,
            elapsed_ms = stats.elapsed_ms,
            "scan context closed"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::query;

    const TEMPLATE: &str = r#"
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    Properties:
      BucketName: !Sub "${AWS::StackName}-logs"
"#;

    #[test]
    fn test_in_memory_compile_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.yaml");
        std::fs::write(&path, TEMPLATE).unwrap();

        let ctx = ScanContext::in_memory();
        let graph = ctx.compile_paths(&[path.clone()]).unwrap();
        assert_eq!(graph.templates().len(), 1);
        assert!(ctx.compile_paths(&[dir.path().join("missing.yaml")]).is_err());

        let stats = ctx.close();
        assert_eq!(stats.units, 2);
        assert_eq!(stats.templates, 1);
        assert_eq!(stats.compile_failures, 1);
        assert!(stats.nodes > 0);
    }

    #[test]
    fn test_snapshot_backend_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.yaml");
        std::fs::write(&path, TEMPLATE).unwrap();
        let snapshots = dir.path().join("snapshots");

        let config = ScanConfig {
            backend: BackendConfig {
                kind: BackendKind::Snapshot,
                snapshot_dir: Some(snapshots.clone()),
            },
            ..Default::default()
        };
        let ctx = ScanContext::open(config).unwrap();
        let graph = ctx.compile_paths(&[path]).unwrap();

        let buckets = query::resources(graph.as_ref(), &["AWS::S3::Bucket"]);
        assert_eq!(buckets.len(), 1);
        assert_eq!(graph.node(buckets[0]).unwrap().line, 3);
        assert_eq!(std::fs::read_dir(&snapshots).unwrap().count(), 1);
    }

    #[test]
    fn test_lenient_references_follow_config() {
        let mut config = ScanConfig::default();
        config.scan.strict_references = false;
        let ctx = ScanContext::open(config).unwrap();
        assert!(!ctx.compile_options().strict_references);
        assert_eq!(ctx.backend(), &BackendHandle::InMemory);
    }
}
