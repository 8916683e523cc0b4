//! Virtual edits: stage speculative document texts, preview their diagnostic
//! impact across the dependency closure, then commit or roll back.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use arbor_backend::FileSystem;
use arbor_core::{
    DiagnosticDelta, DocumentEdit, EditSettings, EngineError, OperationStatus, ProjectId,
    ProjectModel, SessionId, TextChange,
};
use serde::Serialize;

use crate::registry::SessionRegistry;
use crate::session::{EditPhase, PendingChange, PendingEdit, Session};

/// Result of staging one document edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditResult {
    pub file: PathBuf,
    pub project: Option<ProjectId>,
    pub error: Option<EngineError>,
}

impl EditResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Diagnostic impact of the staged edits on one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectImpact {
    pub project: ProjectId,
    pub delta: DiagnosticDelta,
    /// The speculative state has at least one error.
    pub has_errors: bool,
    pub error: Option<EngineError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditOutcome {
    pub edits: Vec<EditResult>,
    /// Affected projects in dependency order.
    pub projects: Vec<ProjectImpact>,
    pub has_errors: bool,
}

impl EditOutcome {
    pub fn status(&self) -> OperationStatus {
        let failed = self.edits.iter().filter(|e| !e.is_ok()).count();
        OperationStatus::from_counts(self.edits.len() - failed, failed)
    }

    pub fn impact(&self, project: &str) -> Option<&ProjectImpact> {
        self.projects.iter().find(|p| p.project.as_str() == project)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: EngineError,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CommitReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<FileFailure>,
    /// Projects whose cached artifacts were invalidated.
    pub invalidated: Vec<ProjectId>,
}

impl CommitReport {
    pub fn status(&self) -> OperationStatus {
        OperationStatus::from_counts(self.written.len(), self.failed.len())
    }

    /// `PartialFailure` when any write failed.
    pub fn into_result(self) -> Result<CommitReport, EngineError> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        let message = self
            .failed
            .iter()
            .map(|f| f.error.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(EngineError::PartialFailure {
            failed: self.failed.len(),
            total: self.failed.len() + self.written.len(),
            message,
        })
    }
}

/// Apply `changes` to `text`. Spans refer to `text`; they must lie within it,
/// fall on char boundaries and not overlap. Changes are applied from the
/// highest offset down, so earlier spans stay valid.
pub fn apply_changes(text: &str, changes: &[TextChange]) -> Result<String, EngineError> {
    for change in changes {
        let span = change.span;
        let Some(end) = span.checked_end() else {
            return Err(EngineError::invalid(format!(
                "span starting at {} with length {} overflows",
                span.start, span.length
            )));
        };
        if end > text.len() {
            return Err(EngineError::invalid(format!(
                "span {}..{} is out of bounds for a document of {} bytes",
                span.start,
                end,
                text.len()
            )));
        }
        if !text.is_char_boundary(span.start) || !text.is_char_boundary(end) {
            return Err(EngineError::invalid(format!(
                "span {}..{} does not fall on character boundaries",
                span.start, end
            )));
        }
    }

    let mut order: Vec<usize> = (0..changes.len()).collect();
    order.sort_by_key(|&i| (changes[i].span.start, changes[i].span.end()));
    for pair in order.windows(2) {
        let (a, b) = (changes[pair[0]].span, changes[pair[1]].span);
        if a.overlaps(&b) || (a == b && a.length > 0) {
            return Err(EngineError::invalid(format!(
                "spans {}..{} and {}..{} overlap",
                a.start,
                a.end(),
                b.start,
                b.end()
            )));
        }
    }

    // Same start: wider span first, then later changes first, so insertions
    // at one offset keep their request order.
    order.sort_by_key(|&i| Reverse((changes[i].span.start, changes[i].span.end(), i)));
    let mut result = text.to_string();
    for i in order {
        let change = &changes[i];
        result.replace_range(change.span.start..change.span.end(), &change.new_text);
    }
    Ok(result)
}

pub struct EditEngine {
    registry: Arc<SessionRegistry>,
    settings: EditSettings,
}

impl EditEngine {
    pub fn new(registry: Arc<SessionRegistry>, settings: EditSettings) -> Self {
        EditEngine { registry, settings }
    }

    fn files(&self) -> &Arc<dyn FileSystem> {
        self.registry.files()
    }

    /// Stage a single document edit. Fails with the edit's own error if it
    /// could not be staged.
    pub async fn apply_edit(
        &self,
        session: &SessionId,
        file: impl Into<PathBuf>,
        changes: Vec<TextChange>,
    ) -> Result<EditOutcome, EngineError> {
        let outcome = self
            .apply_edits(session, vec![DocumentEdit::new(file, changes)])
            .await?;
        if let Some(error) = outcome.edits.first().and_then(|e| e.error.clone()) {
            return Err(error);
        }
        Ok(outcome)
    }

    /// Stage a batch of document edits and diff diagnostics of every affected
    /// project against its cached state. A failing edit does not stop the rest
    /// of the batch.
    pub async fn apply_edits(
        &self,
        session_id: &SessionId,
        edits: Vec<DocumentEdit>,
    ) -> Result<EditOutcome, EngineError> {
        if edits.is_empty() {
            return Err(EngineError::invalid("edit batch is empty"));
        }
        let session = self.registry.get_session(session_id)?;
        let model = session.model();

        let mut results = Vec::with_capacity(edits.len());
        let mut edited = BTreeSet::new();
        for edit in edits {
            match stage_edit(&session, &model, &edit) {
                Ok(project) => {
                    edited.insert(project.clone());
                    results.push(EditResult {
                        file: edit.file,
                        project: Some(project),
                        error: None,
                    });
                }
                Err(error) => {
                    tracing::debug!("Edit of {} rejected: {}", edit.file.display(), error);
                    results.push(EditResult {
                        file: edit.file,
                        project: None,
                        error: Some(error),
                    });
                }
            }
        }

        let projects = self.diff_affected(&session, &edited).await;
        let has_errors = projects.iter().any(|p| p.has_errors);
        tracing::info!(
            "Staged {} of {} edits in session {}, {} projects affected",
            edited.len(),
            results.len(),
            session_id,
            projects.len()
        );

        Ok(EditOutcome {
            edits: results,
            projects,
            has_errors,
        })
    }

    async fn diff_affected(
        &self,
        session: &Session,
        edited: &BTreeSet<ProjectId>,
    ) -> Vec<ProjectImpact> {
        if edited.is_empty() {
            return Vec::new();
        }
        let ctx = session.build_context();
        let overrides = session.overrides();
        let include = self.settings.include_analyzers;
        let cache = self.registry.cache();

        let affected: HashSet<ProjectId> = edited
            .iter()
            .flat_map(|project| ctx.graph.downstream(project))
            .collect();
        let ordered: Vec<ProjectId> = ctx
            .graph
            .topological_order()
            .into_iter()
            .filter(|project| affected.contains(project))
            .collect();

        let impacts = ordered.iter().map(|project| {
            let ctx = &ctx;
            let overrides = &overrides;
            async move {
                let before = cache
                    .get_diagnostics(ctx, project, &session.analyzers, include)
                    .await;
                let after = cache
                    .speculative_diagnostics(ctx, project, overrides, &session.analyzers, include)
                    .await;
                match (before, after) {
                    (Ok(before), Ok(after)) => ProjectImpact {
                        project: project.clone(),
                        has_errors: after.iter().any(|d| d.is_error()),
                        delta: DiagnosticDelta::compute(&before, &after),
                        error: None,
                    },
                    (Err(error), _) | (_, Err(error)) => {
                        tracing::warn!("Could not diff diagnostics of {}: {}", project, error);
                        ProjectImpact {
                            project: project.clone(),
                            delta: DiagnosticDelta::default(),
                            has_errors: false,
                            error: Some(error),
                        }
                    }
                }
            }
        });
        futures::future::join_all(impacts).await
    }

    /// Write every pending edit to disk. A failed write is reported and
    /// leaves that edit pending; successful writes are kept either way.
    pub async fn commit(&self, session_id: &SessionId) -> Result<CommitReport, EngineError> {
        let session = self.registry.get_session(session_id)?;
        let pending = session.pending_edits();
        let mut report = CommitReport::default();

        for edit in pending {
            match self.files().write_text(&edit.path, &edit.text).await {
                Ok(()) => {
                    session.clear_pending_if(&edit.path, &edit.text);
                    session.update_document(&edit.path, &edit.text);
                    let invalidated = self.registry.cache().invalidate_downstream(
                        session_id,
                        &session.graph(),
                        &edit.project,
                    );
                    for project in invalidated {
                        if !report.invalidated.contains(&project) {
                            report.invalidated.push(project);
                        }
                    }
                    report.written.push(edit.path);
                }
                Err(e) => {
                    tracing::warn!("Commit of {} failed: {}", edit.path.display(), e);
                    report.failed.push(FileFailure {
                        error: EngineError::backend(format!(
                            "failed to write {}: {e}",
                            edit.path.display()
                        )),
                        path: edit.path,
                    });
                }
            }
        }

        if session.pending_count() == 0 && !report.written.is_empty() {
            session.set_phase(EditPhase::Committed);
        }
        tracing::info!(
            "Committed {} files in session {} ({} failed)",
            report.written.len(),
            session_id,
            report.failed.len()
        );
        Ok(report)
    }

    /// Discard every pending edit. Nothing on disk is touched.
    pub fn rollback(&self, session_id: &SessionId) -> Result<usize, EngineError> {
        let session = self.registry.get_session(session_id)?;
        let discarded = session.discard_pending();
        session.set_phase(EditPhase::RolledBack);
        tracing::info!("Rolled back {} pending edits in session {}", discarded, session_id);
        Ok(discarded)
    }

    pub fn pending_changes(&self, session_id: &SessionId) -> Result<Vec<PendingChange>, EngineError> {
        Ok(self.registry.get_session(session_id)?.pending_changes())
    }
}

/// Apply one edit on top of any pending text for its document and record
/// the result. Returns the owning project.
fn stage_edit(
    session: &Session,
    model: &ProjectModel,
    edit: &DocumentEdit,
) -> Result<ProjectId, EngineError> {
    let (project, document) = model
        .document(&edit.file)
        .ok_or_else(|| EngineError::DocumentNotFound(model.resolve_path(&edit.file)))?;

    let base = session
        .pending_text(&document.path)
        .unwrap_or_else(|| document.content.clone());
    let text = apply_changes(&base, &edit.changes)?;

    session.stage(PendingEdit {
        project: project.id.clone(),
        path: document.path.clone(),
        text,
    });
    Ok(project.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_apply_from_highest_offset() {
        let text = "def alpha\ndef beta\n";
        let changes = vec![
            TextChange::new(4, 5, "first"),
            TextChange::new(14, 4, "second"),
        ];
        assert_eq!(apply_changes(text, &changes).unwrap(), "def first\ndef second\n");
    }

    #[test]
    fn test_disjoint_changes_ignore_input_order() {
        let text = "def alpha\ndef beta\n";
        let rename = TextChange::new(4, 5, "gamma");
        let append = TextChange::insert(19, "use gamma\n");

        let forward = apply_changes(text, &[rename.clone(), append.clone()]).unwrap();
        let backward = apply_changes(text, &[append, rename]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, "def gamma\ndef beta\nuse gamma\n");
    }

    #[test]
    fn test_overflowing_span_rejected() {
        let overflow = apply_changes("abc", &[TextChange::new(usize::MAX, 2, "x")]);
        assert!(matches!(overflow, Err(EngineError::InvalidInput(_))));

        let mixed = apply_changes(
            "abc",
            &[TextChange::insert(0, "x"), TextChange::new(1, usize::MAX, "")],
        );
        assert!(matches!(mixed, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_insertions_at_same_offset_keep_order() {
        let changes = vec![TextChange::insert(0, "a"), TextChange::insert(0, "b")];
        assert_eq!(apply_changes("x", &changes).unwrap(), "abx");
    }

    #[test]
    fn test_replace_and_insert_at_same_offset() {
        let changes = vec![TextChange::new(0, 3, "new"), TextChange::insert(0, ">")];
        assert_eq!(apply_changes("old tail", &changes).unwrap(), ">new tail");
    }

    #[test]
    fn test_invalid_spans_rejected() {
        let out_of_bounds = apply_changes("abc", &[TextChange::new(2, 5, "")]);
        assert!(matches!(out_of_bounds, Err(EngineError::InvalidInput(_))));

        let overlapping = apply_changes(
            "abcdef",
            &[TextChange::new(0, 3, "x"), TextChange::new(2, 2, "y")],
        );
        assert!(matches!(overlapping, Err(EngineError::InvalidInput(_))));

        let duplicate = apply_changes("abc", &[TextChange::new(1, 1, "x"), TextChange::new(1, 1, "y")]);
        assert!(duplicate.is_err());

        let split_char = apply_changes("é", &[TextChange::new(1, 0, "x")]);
        assert!(matches!(split_char, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_change_list_is_identity() {
        assert_eq!(apply_changes("same", &[]).unwrap(), "same");
    }
}
