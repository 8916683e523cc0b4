//! Interfaces between the engine and its external collaborators

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arbor_core::{
    AnalyzerConfig, AnalyzerSet, Artifact, CompilerOptions, DiagnosticRecord, Document, ProjectId,
    ProjectModel, ProjectNode,
};

/// Everything a backend needs to compile one project.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub project: ProjectId,
    pub sources: Vec<Document>,
    /// Artifacts of the referenced projects, in reference order.
    pub references: Vec<Arc<Artifact>>,
    pub metadata_references: Vec<String>,
    pub options: CompilerOptions,
}

impl CompilationUnit {
    pub fn new(project: &ProjectNode, references: Vec<Arc<Artifact>>) -> Self {
        CompilationUnit {
            project: project.id.clone(),
            sources: project.documents.clone(),
            references,
            metadata_references: project.metadata_references.clone(),
            options: project.options.clone(),
        }
    }
}

/// Compiler backend. Must be a pure function of its inputs: the cache reuses
/// artifacts whenever the fingerprint of those inputs is unchanged.
#[async_trait::async_trait]
pub trait CompilerBackend: Send + Sync {
    /// Compile a project. Source that fails to parse still yields an artifact
    /// carrying the resulting errors; `Err` is reserved for backend faults.
    async fn compile(&self, unit: CompilationUnit) -> Result<Artifact>;

    /// Compiler diagnostics of an artifact produced by this backend.
    fn diagnostics(&self, artifact: &Artifact) -> Vec<DiagnosticRecord>;

    /// Run an analyzer set against an artifact produced by this backend.
    async fn run_analyzers(
        &self,
        artifact: &Artifact,
        analyzers: &AnalyzerSet,
    ) -> Result<Vec<DiagnosticRecord>>;

    /// Backend state outside the compiled inputs (version, locale, ...).
    /// Folded into every fingerprint.
    fn environment(&self) -> String {
        self.name().to_string()
    }

    /// Get backend name
    fn name(&self) -> &str;
}

/// Loads project models. Must be safe to call again for the same root.
#[async_trait::async_trait]
pub trait ProjectModelProvider: Send + Sync {
    /// Load every project under a workspace root.
    async fn load_model(&self, root: &Path) -> Result<ProjectModel>;

    /// Load a model consisting of a single project.
    async fn load_single_project(&self, path: &Path) -> Result<ProjectModel>;
}

/// Resolves analyzer configuration into a concrete, deterministic set.
pub trait AnalyzerLoader: Send + Sync {
    fn load_analyzers(&self, config: &AnalyzerConfig) -> Result<AnalyzerSet>;
}

/// Text file access used by commits and model loading.
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_text(&self, path: &Path) -> io::Result<String>;

    async fn write_text(&self, path: &Path, text: &str) -> io::Result<()>;
}
