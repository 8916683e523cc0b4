//! Analysis sessions, virtual edits and the engine facade

pub mod edits;
pub mod engine;
pub mod maintenance;
pub mod registry;
pub mod session;

#[cfg(test)]
mod tests;

pub use edits::{CommitReport, EditEngine, EditOutcome, EditResult, FileFailure, ProjectImpact, apply_changes};
pub use engine::{DiagnosticsReport, Engine, EngineServices, GraphSummary, ProjectDiagnostics, ProjectSummary};
pub use maintenance::Maintenance;
pub use registry::{SessionRegistry, SessionStatus};
pub use session::{EditPhase, PendingChange, PendingEdit, Session, SourceKind};
