//! Per-session state: model snapshot, lazy graph, pending edits, timestamps

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arbor_cache::BuildContext;
use arbor_core::{
    AnalyzerConfig, AnalyzerSet, DependencyGraph, DocumentOverrides, ProjectId, ProjectModel,
    SessionId,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

/// Where a session's model was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Workspace,
    Project,
}

/// Position in the edit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditPhase {
    Clean,
    Staged,
    Committed,
    RolledBack,
}

/// Speculative text of one document, not yet on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEdit {
    pub project: ProjectId,
    pub path: PathBuf,
    pub text: String,
}

/// Identity of a document with a pending edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingChange {
    pub project: ProjectId,
    pub path: PathBuf,
}

struct ModelState {
    model: Arc<ProjectModel>,
    graph: Option<Arc<DependencyGraph>>,
}

struct EditState {
    pending: BTreeMap<PathBuf, PendingEdit>,
    phase: EditPhase,
}

struct Activity {
    last_accessed: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
}

/// An analysis session. Shared behind an `Arc`; every lock is held only for
/// short synchronous sections.
pub struct Session {
    pub id: SessionId,
    pub root: PathBuf,
    pub source: SourceKind,
    pub analyzer_config: AnalyzerConfig,
    pub analyzers: AnalyzerSet,
    pub created_at: DateTime<Utc>,
    state: RwLock<ModelState>,
    edits: Mutex<EditState>,
    activity: Mutex<Activity>,
    prewarm: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("source", &self.source)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        id: SessionId,
        root: PathBuf,
        source: SourceKind,
        model: ProjectModel,
        analyzer_config: AnalyzerConfig,
        analyzers: AnalyzerSet,
    ) -> Self {
        let now = Utc::now();
        Session {
            id,
            root,
            source,
            analyzer_config,
            analyzers,
            created_at: now,
            state: RwLock::new(ModelState {
                model: Arc::new(model),
                graph: None,
            }),
            edits: Mutex::new(EditState {
                pending: BTreeMap::new(),
                phase: EditPhase::Clean,
            }),
            activity: Mutex::new(Activity {
                last_accessed: now,
                paused_at: None,
            }),
            prewarm: Mutex::new(None),
        }
    }

    pub fn model(&self) -> Arc<ProjectModel> {
        self.state.read().model.clone()
    }

    /// The dependency graph, built on first use after every model change.
    pub fn graph(&self) -> Arc<DependencyGraph> {
        self.build_context().graph
    }

    /// Model and graph of the same snapshot.
    pub fn build_context(&self) -> BuildContext {
        {
            let state = self.state.read();
            if let Some(graph) = &state.graph {
                return BuildContext::new(self.id.clone(), state.model.clone(), graph.clone());
            }
        }

        let mut state = self.state.write();
        let graph = match state.graph.clone() {
            Some(graph) => graph,
            None => {
                let graph = DependencyGraph::build(&state.model);
                for cycle in graph.cycles() {
                    tracing::warn!("Session {} has a reference cycle: {:?}", self.id, cycle);
                }
                let graph = Arc::new(graph);
                state.graph = Some(graph.clone());
                graph
            }
        };
        BuildContext::new(self.id.clone(), state.model.clone(), graph)
    }

    /// Replace the model and drop the graph built from the old one.
    pub fn replace_model(&self, model: ProjectModel) {
        let mut state = self.state.write();
        state.model = Arc::new(model);
        state.graph = None;
    }

    /// Fold new content of one document into the model. The graph is kept:
    /// document text never changes references.
    pub fn update_document(&self, path: &Path, content: &str) -> Option<ProjectId> {
        let mut state = self.state.write();
        let (project, _) = state.model.document(path)?;
        let project = project.id.clone();
        let updated = state.model.with_document_content(path, content)?;
        state.model = Arc::new(updated);
        Some(project)
    }

    pub fn touch(&self) {
        self.activity.lock().last_accessed = Utc::now();
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.activity.lock().last_accessed
    }

    /// Time since the last access.
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_accessed()).to_std().unwrap_or_default()
    }

    /// Returns false if the session was already paused.
    pub fn pause(&self) -> bool {
        let mut activity = self.activity.lock();
        if activity.paused_at.is_some() {
            return false;
        }
        activity.paused_at = Some(Utc::now());
        true
    }

    /// Returns false if the session was not paused.
    pub fn resume(&self) -> bool {
        self.activity.lock().paused_at.take().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.activity.lock().paused_at.is_some()
    }

    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.activity.lock().paused_at
    }

    pub fn phase(&self) -> EditPhase {
        self.edits.lock().phase
    }

    pub fn set_phase(&self, phase: EditPhase) {
        self.edits.lock().phase = phase;
    }

    pub fn pending_text(&self, path: &Path) -> Option<String> {
        self.edits.lock().pending.get(path).map(|edit| edit.text.clone())
    }

    pub fn stage(&self, edit: PendingEdit) {
        let mut edits = self.edits.lock();
        edits.pending.insert(edit.path.clone(), edit);
        edits.phase = EditPhase::Staged;
    }

    /// Snapshot of pending edits, ordered by path.
    pub fn pending_edits(&self) -> Vec<PendingEdit> {
        self.edits.lock().pending.values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.edits.lock().pending.len()
    }

    pub fn pending_changes(&self) -> Vec<PendingChange> {
        self.edits
            .lock()
            .pending
            .values()
            .map(|edit| PendingChange {
                project: edit.project.clone(),
                path: edit.path.clone(),
            })
            .collect()
    }

    /// Pending texts keyed by path, for speculative builds.
    pub fn overrides(&self) -> DocumentOverrides {
        self.edits
            .lock()
            .pending
            .iter()
            .map(|(path, edit)| (path.clone(), edit.text.clone()))
            .collect()
    }

    /// Clear the pending edit of `path` if it still holds `text`.
    pub fn clear_pending_if(&self, path: &Path, text: &str) -> bool {
        let mut edits = self.edits.lock();
        if edits.pending.get(path).is_some_and(|edit| edit.text == text) {
            edits.pending.remove(path);
            return true;
        }
        false
    }

    /// Drop every pending edit. Returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        let mut edits = self.edits.lock();
        let count = edits.pending.len();
        edits.pending.clear();
        count
    }

    pub fn set_prewarm(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.prewarm.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn abort_prewarm(&self) {
        if let Some(handle) = self.prewarm.lock().take() {
            handle.abort();
        }
    }

    /// True while a prewarm task is still running.
    pub fn is_prewarming(&self) -> bool {
        self.prewarm
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.prewarm.get_mut().take() {
            handle.abort();
        }
    }
}
