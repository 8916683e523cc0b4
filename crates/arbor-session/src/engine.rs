//! Caller-facing engine: one entry point per operation
//!
//! Every collaborator is injected through [`EngineServices`]; the engine owns
//! the cache, the session registry and the edit engine built on top of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arbor_backend::{AnalyzerLoader, CompilerBackend, FileSystem, ProjectModelProvider};
use arbor_cache::{CacheStats, CompilationCache};
use arbor_core::{
    AnalyzerConfig, DiagnosticRecord, DocumentEdit, EngineConfig, EngineError, OperationStatus,
    ProjectId, SessionId, TextChange,
};
use parking_lot::Mutex;
use serde::Serialize;

use crate::edits::{CommitReport, EditEngine, EditOutcome};
use crate::maintenance::Maintenance;
use crate::registry::{SessionRegistry, SessionStatus};
use crate::session::PendingChange;

/// External collaborators the engine is built from.
#[derive(Clone)]
pub struct EngineServices {
    pub backend: Arc<dyn CompilerBackend>,
    pub models: Arc<dyn ProjectModelProvider>,
    pub analyzers: Arc<dyn AnalyzerLoader>,
    pub files: Arc<dyn FileSystem>,
}

/// Diagnostics of one project, or why they could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectDiagnostics {
    pub project: ProjectId,
    pub diagnostics: Vec<DiagnosticRecord>,
    pub error: Option<EngineError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub projects: Vec<ProjectDiagnostics>,
}

impl DiagnosticsReport {
    pub fn status(&self) -> OperationStatus {
        let failed = self.projects.iter().filter(|p| p.error.is_some()).count();
        OperationStatus::from_counts(self.projects.len() - failed, failed)
    }

    pub fn error_count(&self) -> usize {
        self.projects
            .iter()
            .flat_map(|p| &p.diagnostics)
            .filter(|d| d.is_error())
            .count()
    }

    pub fn project(&self, project: &str) -> Option<&ProjectDiagnostics> {
        self.projects.iter().find(|p| p.project.as_str() == project)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub documents: usize,
    pub references: Vec<ProjectId>,
    pub dependents: Vec<ProjectId>,
}

/// Shape of a session's dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub projects: Vec<ProjectSummary>,
    pub topological_order: Vec<ProjectId>,
    pub leaves: Vec<ProjectId>,
    pub roots: Vec<ProjectId>,
    pub cycles: Vec<Vec<ProjectId>>,
}

pub struct Engine {
    config: EngineConfig,
    cache: CompilationCache,
    registry: Arc<SessionRegistry>,
    edits: EditEngine,
    maintenance: Mutex<Option<Maintenance>>,
}

impl Engine {
    pub fn new(services: EngineServices, config: EngineConfig) -> Self {
        let cache = CompilationCache::new(services.backend, config.cache.clone());
        let registry = Arc::new(SessionRegistry::new(
            cache.clone(),
            services.models,
            services.analyzers,
            services.files,
            config.sessions.clone(),
        ));
        let edits = EditEngine::new(registry.clone(), config.edits.clone());
        tracing::debug!("Engine created with backend {}", cache.backend().name());

        Engine {
            config,
            cache,
            registry,
            edits,
            maintenance: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the periodic cache and idle-session sweeps. No-op if running.
    pub fn start_maintenance(&self) {
        let mut maintenance = self.maintenance.lock();
        if maintenance.is_none() {
            *maintenance = Some(Maintenance::start(
                self.cache.clone(),
                self.registry.clone(),
                &self.config,
            ));
        }
    }

    /// Stop background sweeps and end every session.
    pub async fn shutdown(&self) {
        let maintenance = self.maintenance.lock().take();
        if let Some(maintenance) = maintenance {
            maintenance.shutdown().await;
        }
        for id in self.registry.session_ids() {
            if let Err(e) = self.registry.end_session(&id) {
                tracing::debug!("Session {} already ended: {}", id, e);
            }
        }
        tracing::info!("Engine shut down");
    }

    pub async fn start_session(
        &self,
        root: &Path,
        analyzers: AnalyzerConfig,
    ) -> Result<SessionId, EngineError> {
        self.registry.start_session(root, analyzers).await
    }

    pub async fn start_project_session(
        &self,
        path: &Path,
        analyzers: AnalyzerConfig,
    ) -> Result<SessionId, EngineError> {
        self.registry.start_project_session(path, analyzers).await
    }

    pub fn session_status(&self, session: &SessionId) -> Result<SessionStatus, EngineError> {
        self.registry.session_status(session)
    }

    pub async fn refresh_session(&self, session: &SessionId) -> Result<(), EngineError> {
        self.registry.refresh_session(session).await
    }

    pub fn end_session(&self, session: &SessionId) -> Result<(), EngineError> {
        self.registry.end_session(session)
    }

    pub fn pause_session(&self, session: &SessionId) -> Result<(), EngineError> {
        self.registry.pause_session(session)
    }

    pub fn resume_session(&self, session: &SessionId) -> Result<(), EngineError> {
        self.registry.resume_session(session)
    }

    pub async fn apply_edit(
        &self,
        session: &SessionId,
        file: impl Into<PathBuf>,
        changes: Vec<TextChange>,
    ) -> Result<EditOutcome, EngineError> {
        self.edits.apply_edit(session, file, changes).await
    }

    pub async fn apply_edits(
        &self,
        session: &SessionId,
        edits: Vec<DocumentEdit>,
    ) -> Result<EditOutcome, EngineError> {
        self.edits.apply_edits(session, edits).await
    }

    pub async fn commit_changes(&self, session: &SessionId) -> Result<CommitReport, EngineError> {
        self.edits.commit(session).await
    }

    pub fn rollback_changes(&self, session: &SessionId) -> Result<usize, EngineError> {
        self.edits.rollback(session)
    }

    pub fn pending_changes(&self, session: &SessionId) -> Result<Vec<PendingChange>, EngineError> {
        self.edits.pending_changes(session)
    }

    /// Diagnostics of the on-disk state (pending edits are not applied).
    /// With no project given, every project is reported in dependency order
    /// and a failing project does not stop the others. `include_analyzers`
    /// overrides the configured default for this call.
    pub async fn get_diagnostics(
        &self,
        session: &SessionId,
        project: Option<&ProjectId>,
        include_analyzers: Option<bool>,
    ) -> Result<DiagnosticsReport, EngineError> {
        let session = self.registry.get_session(session)?;
        let ctx = session.build_context();
        let include = include_analyzers.unwrap_or(self.config.edits.include_analyzers);

        if let Some(project) = project {
            let diagnostics = self
                .cache
                .get_diagnostics(&ctx, project, &session.analyzers, include)
                .await?;
            return Ok(DiagnosticsReport {
                projects: vec![ProjectDiagnostics {
                    project: project.clone(),
                    diagnostics: diagnostics.as_ref().clone(),
                    error: None,
                }],
            });
        }

        let mut projects = Vec::new();
        for id in ctx.graph.topological_order() {
            let result = self
                .cache
                .get_diagnostics(&ctx, &id, &session.analyzers, include)
                .await;
            projects.push(match result {
                Ok(diagnostics) => ProjectDiagnostics {
                    project: id,
                    diagnostics: diagnostics.as_ref().clone(),
                    error: None,
                },
                Err(error) => ProjectDiagnostics {
                    project: id,
                    diagnostics: Vec::new(),
                    error: Some(error),
                },
            });
        }
        Ok(DiagnosticsReport { projects })
    }

    /// Drop cached artifacts of a project and everything downstream of it.
    pub fn invalidate_project(
        &self,
        session: &SessionId,
        project: &ProjectId,
    ) -> Result<Vec<ProjectId>, EngineError> {
        let session = self.registry.get_session(session)?;
        let graph = session.graph();
        if !graph.contains(project) {
            return Err(EngineError::ProjectNotFound(project.clone()));
        }
        Ok(self.cache.invalidate_downstream(&session.id, &graph, project))
    }

    pub fn dependency_graph(&self, session: &SessionId) -> Result<GraphSummary, EngineError> {
        let session = self.registry.get_session(session)?;
        let ctx = session.build_context();
        let graph = &ctx.graph;

        let projects = ctx
            .model
            .projects
            .iter()
            .filter(|p| graph.contains(&p.id))
            .map(|p| ProjectSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                documents: p.documents.len(),
                references: graph.dependencies(&p.id),
                dependents: graph.dependents(&p.id),
            })
            .collect();

        Ok(GraphSummary {
            projects,
            topological_order: graph.topological_order(),
            leaves: graph.leaf_projects(),
            roots: graph.root_projects(),
            cycles: graph.cycles(),
        })
    }
}
