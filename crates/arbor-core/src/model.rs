//! Core data structures for projects, sessions and diagnostics

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, FingerprintBuilder};

/// Identifier of a project inside a project model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        ProjectId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank ids are treated as malformed and skipped by the graph builder.
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        ProjectId(id.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> Self {
        ProjectId(id)
    }
}

/// Identifier of an analysis session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Allocate a fresh random session id.
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        SessionId(id.to_string())
    }
}

/// A single source document of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub content: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Document {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Compiler options, ordered so that fingerprints are deterministic.
pub type CompilerOptions = BTreeMap<String, String>;

/// Speculative document texts keyed by absolute path.
pub type DocumentOverrides = BTreeMap<PathBuf, String>;

/// A compilation unit: ordered documents, options and references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNode {
    pub id: ProjectId,
    pub name: String,
    pub documents: Vec<Document>,
    /// References to other projects of the same model, in declaration order.
    pub project_references: Vec<ProjectId>,
    /// External/metadata references (libraries outside the model).
    pub metadata_references: Vec<String>,
    pub options: CompilerOptions,
}

impl ProjectNode {
    pub fn new(id: impl Into<ProjectId>, name: impl Into<String>) -> Self {
        ProjectNode {
            id: id.into(),
            name: name.into(),
            documents: Vec::new(),
            project_references: Vec::new(),
            metadata_references: Vec::new(),
            options: CompilerOptions::new(),
        }
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.documents.push(Document::new(path, content));
        self
    }

    pub fn with_reference(mut self, project: impl Into<ProjectId>) -> Self {
        self.project_references.push(project.into());
        self
    }

    pub fn with_metadata_reference(mut self, reference: impl Into<String>) -> Self {
        self.metadata_references.push(reference.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Find a document of this project by absolute path.
    pub fn document(&self, path: &Path) -> Option<&Document> {
        self.documents.iter().find(|d| d.path == path)
    }

    /// True if any of this project's documents has an override.
    pub fn is_touched_by(&self, overrides: &DocumentOverrides) -> bool {
        self.documents.iter().any(|d| overrides.contains_key(&d.path))
    }

    /// Copy of this project with overridden document texts substituted.
    pub fn with_overrides(&self, overrides: &DocumentOverrides) -> ProjectNode {
        let mut project = self.clone();
        for document in &mut project.documents {
            if let Some(text) = overrides.get(&document.path) {
                document.content = text.clone();
            }
        }
        project
    }
}

/// A loaded snapshot of every project under a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectModel {
    pub root: PathBuf,
    pub projects: Vec<ProjectNode>,
}

impl ProjectModel {
    pub fn new(root: impl Into<PathBuf>, projects: Vec<ProjectNode>) -> Self {
        ProjectModel {
            root: root.into(),
            projects,
        }
    }

    /// Get a project by id.
    pub fn project(&self, id: &ProjectId) -> Option<&ProjectNode> {
        self.projects.iter().find(|p| &p.id == id)
    }

    /// Relative paths are interpreted against the model root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Find the project and document owning a path.
    pub fn document(&self, path: &Path) -> Option<(&ProjectNode, &Document)> {
        let path = self.resolve_path(path);
        self.projects
            .iter()
            .find_map(|p| p.document(&path).map(|d| (p, d)))
    }

    /// Total number of documents across all projects.
    pub fn document_count(&self) -> usize {
        self.projects.iter().map(|p| p.documents.len()).sum()
    }

    /// Copy of the model with one document's content replaced.
    /// Returns `None` when no project owns the path.
    pub fn with_document_content(&self, path: &Path, content: &str) -> Option<ProjectModel> {
        let path = self.resolve_path(path);
        let mut model = self.clone();
        let document = model
            .projects
            .iter_mut()
            .flat_map(|p| p.documents.iter_mut())
            .find(|d| d.path == path)?;
        document.content = content.to_string();
        Some(model)
    }
}

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Hidden => "hidden",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// A compiler or analyzer finding attributed to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub file: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
    pub project: ProjectId,
}

impl DiagnosticRecord {
    pub fn new(
        project: ProjectId,
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        DiagnosticRecord {
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
            file: PathBuf::new(),
            line: 0,
            column: 0,
            project,
        }
    }

    /// Attach a source location.
    pub fn at(mut self, file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self.column = column;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {} [{}] {}",
            self.file.display(),
            self.line,
            self.column,
            self.severity,
            self.rule_id,
            self.message
        )
    }
}

/// A byte range inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub length: usize,
}

impl TextSpan {
    pub fn new(start: usize, length: usize) -> Self {
        TextSpan { start, length }
    }

    /// `None` when `start + length` does not fit in a `usize`.
    pub fn checked_end(&self) -> Option<usize> {
        self.start.checked_add(self.length)
    }

    /// Exclusive end, saturating at `usize::MAX`.
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.length)
    }

    pub fn overlaps(&self, other: &TextSpan) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Replace `span` with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub span: TextSpan,
    pub new_text: String,
}

impl TextChange {
    pub fn new(start: usize, length: usize, new_text: impl Into<String>) -> Self {
        TextChange {
            span: TextSpan::new(start, length),
            new_text: new_text.into(),
        }
    }

    /// Insert text at an offset without removing anything.
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Self::new(offset, 0, text)
    }
}

/// A batch of changes targeting a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEdit {
    pub file: PathBuf,
    pub changes: Vec<TextChange>,
}

impl DocumentEdit {
    pub fn new(file: impl Into<PathBuf>, changes: Vec<TextChange>) -> Self {
        DocumentEdit {
            file: file.into(),
            changes,
        }
    }
}

/// Which analyzers a session wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub use_defaults: bool,
    pub additional: Vec<String>,
    pub disabled: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            use_defaults: true,
            additional: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

/// Resolved analyzer names plus a deterministic key used in cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalyzerSet {
    names: Vec<String>,
    key: Fingerprint,
}

impl AnalyzerSet {
    /// Names are sorted and deduplicated, so equal sets get equal keys.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        let mut builder = FingerprintBuilder::new("analyzer-set");
        builder.u64(names.len() as u64);
        for name in &names {
            builder.str(name);
        }

        AnalyzerSet {
            key: builder.finish(),
            names,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn key(&self) -> Fingerprint {
        self.key
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Compiled output of a project. The payload belongs to the backend that
/// produced it and is recovered with [`Artifact::payload`].
#[derive(Clone)]
pub struct Artifact {
    pub project: ProjectId,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Artifact {
    pub fn new<T: Any + Send + Sync>(project: ProjectId, payload: T) -> Self {
        Artifact {
            project,
            payload: Arc::new(payload),
        }
    }

    /// Downcast the backend payload.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}
