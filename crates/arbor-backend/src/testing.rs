//! Test doubles for the engine's collaborators

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use arbor_core::{AnalyzerSet, Artifact, DiagnosticRecord, ProjectId, ProjectModel};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::bridge::{CompilationUnit, CompilerBackend, FileSystem, ProjectModelProvider};
use crate::providers::outline::OutlineBackend;

/// In-memory file system with injectable write failures.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, String>>,
    failing: Mutex<HashSet<PathBuf>>,
    writes: AtomicUsize,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with every document of a model.
    pub fn from_model(model: &ProjectModel) -> Self {
        let fs = Self::new();
        {
            let mut files = fs.files.lock();
            for document in model.projects.iter().flat_map(|p| &p.documents) {
                files.insert(document.path.clone(), document.content.clone());
            }
        }
        fs
    }

    /// Make every later write to `path` fail.
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        self.failing.lock().insert(path.into());
    }

    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read_text(&self, path: &Path) -> io::Result<String> {
        self.contents(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn write_text(&self, path: &Path, text: &str) -> io::Result<()> {
        if self.failing.lock().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("write to {} rejected", path.display()),
            ));
        }
        self.files.lock().insert(path.to_path_buf(), text.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Returns a fixed model for any root.
#[derive(Debug)]
pub struct StaticModelProvider {
    model: Mutex<Option<ProjectModel>>,
    loads: AtomicUsize,
}

impl StaticModelProvider {
    pub fn new(model: ProjectModel) -> Self {
        StaticModelProvider {
            model: Mutex::new(Some(model)),
            loads: AtomicUsize::new(0),
        }
    }

    /// A provider whose every load fails.
    pub fn failing() -> Self {
        StaticModelProvider {
            model: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Replace what subsequent loads return.
    pub fn set_model(&self, model: ProjectModel) {
        *self.model.lock() = Some(model);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn load(&self, root: &Path) -> Result<ProjectModel> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.model
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No project model at {}", root.display()))
    }
}

#[async_trait::async_trait]
impl ProjectModelProvider for StaticModelProvider {
    async fn load_model(&self, root: &Path) -> Result<ProjectModel> {
        self.load(root)
    }

    async fn load_single_project(&self, path: &Path) -> Result<ProjectModel> {
        self.load(path)
    }
}

/// Holds compiles until opened.
#[derive(Debug, Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

/// Wraps a backend and counts compiles per project.
pub struct CountingBackend {
    inner: Arc<dyn CompilerBackend>,
    compiles: Mutex<HashMap<ProjectId, usize>>,
    failing: Mutex<HashSet<ProjectId>>,
    delay: Option<Duration>,
    gate: Option<watch::Receiver<bool>>,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn CompilerBackend>) -> Self {
        CountingBackend {
            inner,
            compiles: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            delay: None,
            gate: None,
        }
    }

    /// Counting wrapper around [`OutlineBackend`].
    pub fn outline() -> Self {
        Self::new(Arc::new(OutlineBackend::new()))
    }

    /// Sleep before every compile.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block every compile until the returned gate is opened.
    pub fn gated(mut self) -> (Self, Gate) {
        let (tx, rx) = watch::channel(false);
        self.gate = Some(rx);
        (self, Gate { tx: Arc::new(tx) })
    }

    /// Make compiles of `project` fail.
    pub fn fail_project(&self, project: impl Into<ProjectId>) {
        self.failing.lock().insert(project.into());
    }

    pub fn compile_count(&self, project: &str) -> usize {
        self.compiles
            .lock()
            .get(&ProjectId::from(project))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_compiles(&self) -> usize {
        self.compiles.lock().values().sum()
    }
}

#[async_trait::async_trait]
impl CompilerBackend for CountingBackend {
    async fn compile(&self, unit: CompilationUnit) -> Result<Artifact> {
        *self.compiles.lock().entry(unit.project.clone()).or_default() += 1;

        if let Some(mut gate) = self.gate.clone() {
            gate.wait_for(|open| *open).await?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(&unit.project) {
            anyhow::bail!("Injected compile failure for {}", unit.project);
        }
        self.inner.compile(unit).await
    }

    fn diagnostics(&self, artifact: &Artifact) -> Vec<DiagnosticRecord> {
        self.inner.diagnostics(artifact)
    }

    async fn run_analyzers(
        &self,
        artifact: &Artifact,
        analyzers: &AnalyzerSet,
    ) -> Result<Vec<DiagnosticRecord>> {
        self.inner.run_analyzers(artifact, analyzers).await
    }

    fn environment(&self) -> String {
        self.inner.environment()
    }

    fn name(&self) -> &str {
        "counting"
    }
}
