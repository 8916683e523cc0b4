//! Arbor Core — project model, dependency graph, fingerprints and diagnostic diff

pub mod config;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod model;


#[cfg(test)]
pub mod test_utils;

pub use config::{CacheSettings, ConfigError, EditSettings, EngineConfig, SessionSettings};
pub use diff::{DiagnosticDelta, DiagnosticKey};
pub use error::{EngineError, ErrorKind, OperationStatus};
pub use fingerprint::{Fingerprint, FingerprintBuilder, project_fingerprint};
pub use graph::DependencyGraph;
pub use model::{
    AnalyzerConfig, AnalyzerSet, Artifact, CompilerOptions, DiagnosticRecord, Document,
    DocumentEdit, DocumentOverrides, ProjectId, ProjectModel, ProjectNode, SessionId, Severity,
    TextChange, TextSpan,
};
