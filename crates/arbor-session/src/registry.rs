//! Session registry: lifecycle of analysis sessions
//!
//! Sessions live in a `DashMap` keyed by id. Each session owns a namespace
//! in the shared [`CompilationCache`]; ending or refreshing a session clears
//! that namespace.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arbor_backend::{AnalyzerLoader, FileSystem, ProjectModelProvider};
use arbor_cache::CompilationCache;
use arbor_core::{
    AnalyzerConfig, EngineError, ProjectId, ProjectModel, SessionId, SessionSettings,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::session::{EditPhase, Session, SourceKind};

/// Snapshot of a session for callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub root: PathBuf,
    pub source: SourceKind,
    pub project_count: usize,
    pub document_count: usize,
    pub reference_count: usize,
    pub pending_edits: usize,
    pub phase: EditPhase,
    pub analyzers: Vec<String>,
    pub cached_entries: usize,
    pub prewarming: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
}

pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    cache: CompilationCache,
    models: Arc<dyn ProjectModelProvider>,
    analyzers: Arc<dyn AnalyzerLoader>,
    files: Arc<dyn FileSystem>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        cache: CompilationCache,
        models: Arc<dyn ProjectModelProvider>,
        analyzers: Arc<dyn AnalyzerLoader>,
        files: Arc<dyn FileSystem>,
        settings: SessionSettings,
    ) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            cache,
            models,
            analyzers,
            files,
            settings,
        }
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn files(&self) -> &Arc<dyn FileSystem> {
        &self.files
    }

    /// Start a session over every project under a workspace root.
    pub async fn start_session(
        &self,
        root: &Path,
        analyzer_config: AnalyzerConfig,
    ) -> Result<SessionId, EngineError> {
        self.start(SourceKind::Workspace, root, analyzer_config).await
    }

    /// Start a session over a single project.
    pub async fn start_project_session(
        &self,
        path: &Path,
        analyzer_config: AnalyzerConfig,
    ) -> Result<SessionId, EngineError> {
        self.start(SourceKind::Project, path, analyzer_config).await
    }

    async fn start(
        &self,
        source: SourceKind,
        root: &Path,
        analyzer_config: AnalyzerConfig,
    ) -> Result<SessionId, EngineError> {
        let model = self.load(source, root).await?;
        let analyzers = self
            .analyzers
            .load_analyzers(&analyzer_config)
            .map_err(|e| EngineError::backend(format!("failed to load analyzers: {e:#}")))?;

        let id = SessionId::generate();
        let session = Arc::new(Session::new(
            id.clone(),
            root.to_path_buf(),
            source,
            model,
            analyzer_config,
            analyzers,
        ));
        tracing::info!(
            "Started session {} for {} ({} projects)",
            id,
            root.display(),
            session.model().projects.len()
        );

        self.sessions.insert(id.clone(), session.clone());
        self.prewarm(&session);
        Ok(id)
    }

    async fn load(&self, source: SourceKind, root: &Path) -> Result<ProjectModel, EngineError> {
        let loaded = match source {
            SourceKind::Workspace => self.models.load_model(root).await,
            SourceKind::Project => self.models.load_single_project(root).await,
        };
        loaded.map_err(|e| {
            EngineError::backend(format!("failed to load {}: {e:#}", root.display()))
        })
    }

    /// Compile leaf projects in the background.
    fn prewarm(&self, session: &Arc<Session>) {
        if !self.settings.prewarm {
            return;
        }
        let ctx = session.build_context();
        let leaves = ctx.graph.leaf_projects();
        if leaves.is_empty() {
            return;
        }

        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            let builds = leaves.iter().map(|leaf| cache.get_or_create(&ctx, leaf));
            let results = futures::future::join_all(builds).await;
            for (leaf, result) in leaves.iter().zip(results) {
                if let Err(e) = result {
                    tracing::warn!("Prewarm of {} in session {} failed: {}", leaf, ctx.session, e);
                }
            }
            tracing::debug!("Prewarmed {} leaf projects for session {}", leaves.len(), ctx.session);
        });
        session.set_prewarm(handle);
    }

    /// Look up a session without counting it as activity.
    pub fn find(&self, id: &SessionId) -> Result<Arc<Session>, EngineError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::SessionNotFound(id.clone()))
    }

    /// Look up a session and refresh its last-accessed time.
    pub fn get_session(&self, id: &SessionId) -> Result<Arc<Session>, EngineError> {
        let session = self.find(id)?;
        session.touch();
        Ok(session)
    }

    pub fn session_status(&self, id: &SessionId) -> Result<SessionStatus, EngineError> {
        let session = self.get_session(id)?;
        let model = session.model();
        let graph = session.graph();
        Ok(SessionStatus {
            id: session.id.clone(),
            root: session.root.clone(),
            source: session.source,
            project_count: model.projects.len(),
            document_count: model.document_count(),
            reference_count: graph.reference_count(),
            pending_edits: session.pending_count(),
            phase: session.phase(),
            analyzers: session.analyzers.names().to_vec(),
            cached_entries: self.cache.session_entry_count(id),
            prewarming: session.is_prewarming(),
            created_at: session.created_at,
            last_accessed: session.last_accessed(),
            paused_at: session.paused_at(),
        })
    }

    /// Reload the model from its source, discarding pending edits and every
    /// cached artifact of the session. On load failure the session is left
    /// as it was.
    pub async fn refresh_session(&self, id: &SessionId) -> Result<(), EngineError> {
        let session = self.get_session(id)?;
        let model = self.load(session.source, &session.root).await?;

        session.abort_prewarm();
        let discarded = session.discard_pending();
        session.set_phase(EditPhase::Clean);
        session.replace_model(model);
        self.cache.invalidate_session(id);
        tracing::info!("Refreshed session {} ({} pending edits discarded)", id, discarded);

        self.prewarm(&session);
        Ok(())
    }

    pub fn end_session(&self, id: &SessionId) -> Result<(), EngineError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| EngineError::SessionNotFound(id.clone()))?;
        session.abort_prewarm();
        self.cache.invalidate_session(id);
        tracing::info!("Ended session {}", id);
        Ok(())
    }

    /// Suspend file watching for a session. Cached state is kept.
    pub fn pause_session(&self, id: &SessionId) -> Result<(), EngineError> {
        if self.get_session(id)?.pause() {
            tracing::info!("Paused session {}", id);
        }
        Ok(())
    }

    pub fn resume_session(&self, id: &SessionId) -> Result<(), EngineError> {
        if self.get_session(id)?.resume() {
            tracing::info!("Resumed session {}", id);
        }
        Ok(())
    }

    pub fn is_paused(&self, id: &SessionId) -> Result<bool, EngineError> {
        Ok(self.find(id)?.is_paused())
    }

    /// End every session idle for longer than `threshold`.
    pub fn sweep_idle(&self, threshold: Duration) -> Vec<SessionId> {
        let idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let ended: Vec<SessionId> = idle
            .into_iter()
            .filter(|id| self.end_session(id).is_ok())
            .collect();
        if !ended.is_empty() {
            tracing::info!("Idle sweep ended {} sessions", ended.len());
        }
        ended
    }

    /// Re-read one document from disk and fold it into the session model.
    /// Returns the projects whose cached artifacts were invalidated.
    pub async fn reload_document(
        &self,
        id: &SessionId,
        path: &Path,
    ) -> Result<Vec<ProjectId>, EngineError> {
        let session = self.find(id)?;
        let model = session.model();
        let path = model.resolve_path(path);
        let (project, document) = model
            .document(&path)
            .ok_or_else(|| EngineError::DocumentNotFound(path.clone()))?;

        let content = self.files.read_text(&path).await.map_err(|e| {
            EngineError::backend(format!("failed to read {}: {e}", path.display()))
        })?;
        if content == document.content {
            return Ok(Vec::new());
        }

        let project = project.id.clone();
        session.update_document(&path, &content);
        let invalidated = self
            .cache
            .invalidate_downstream(id, &session.graph(), &project);
        tracing::debug!("Reloaded {} in session {}", path.display(), id);
        Ok(invalidated)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
