//! Unit tests for arbor-session module

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arbor_backend::BuiltinAnalyzerLoader;
use arbor_backend::testing::{CountingBackend, MemoryFileSystem, StaticModelProvider};
use arbor_core::{
    AnalyzerConfig, DocumentEdit, EngineConfig, EngineError, ErrorKind, OperationStatus, ProjectId,
    ProjectModel, ProjectNode, SessionId, TextChange,
};

use crate::{EditPhase, Engine, EngineServices};

const A: &str = "/repo/a/main.arb";
const B: &str = "/repo/b/main.arb";
const C: &str = "/repo/c/main.arb";

fn node(id: &str, content: &str, references: &[&str]) -> ProjectNode {
    let mut node = ProjectNode::new(id, id).with_document(format!("/repo/{id}/main.arb"), content);
    for reference in references {
        node = node.with_reference(*reference);
    }
    node
}

fn chain() -> ProjectModel {
    ProjectModel::new(
        "/repo",
        vec![
            node("a", "def alpha\n", &[]),
            node("b", "use alpha\ndef beta\n", &["a"]),
            node("c", "use alpha\nuse beta\n", &["b"]),
        ],
    )
}

struct Fixture {
    engine: Engine,
    backend: Arc<CountingBackend>,
    files: Arc<MemoryFileSystem>,
    models: Arc<StaticModelProvider>,
}

fn fixture_with(
    model: ProjectModel,
    config: EngineConfig,
    models: Option<StaticModelProvider>,
) -> Fixture {
    let backend = Arc::new(CountingBackend::outline());
    let files = Arc::new(MemoryFileSystem::from_model(&model));
    let models = Arc::new(models.unwrap_or_else(|| StaticModelProvider::new(model)));
    let services = EngineServices {
        backend: backend.clone(),
        models: models.clone(),
        analyzers: Arc::new(BuiltinAnalyzerLoader::new()),
        files: files.clone(),
    };
    Fixture {
        engine: Engine::new(services, config),
        backend,
        files,
        models,
    }
}

fn fixture() -> Fixture {
    let mut config = EngineConfig::default();
    config.sessions.prewarm = false;
    fixture_with(chain(), config, None)
}

async fn start(fixture: &Fixture) -> SessionId {
    fixture
        .engine
        .start_session(Path::new("/repo"), AnalyzerConfig::default())
        .await
        .unwrap()
}

fn rename_alpha(file: &str) -> DocumentEdit {
    DocumentEdit::new(file, vec![TextChange::new(4, 5, "omega")])
}

#[tokio::test]
async fn test_start_failure_registers_nothing() {
    let fixture = fixture_with(
        chain(),
        EngineConfig::default(),
        Some(StaticModelProvider::failing()),
    );
    let err = fixture
        .engine
        .start_session(Path::new("/repo"), AnalyzerConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendFailure);
    assert_eq!(fixture.engine.registry().session_count(), 0);
}

#[tokio::test]
async fn test_session_status() {
    let fixture = fixture();
    let id = start(&fixture).await;

    let status = fixture.engine.session_status(&id).unwrap();
    assert_eq!(status.project_count, 3);
    assert_eq!(status.document_count, 3);
    assert_eq!(status.reference_count, 2);
    assert_eq!(status.phase, EditPhase::Clean);
    assert_eq!(status.analyzers, vec!["naming", "todo-comment"]);
    assert!(status.paused_at.is_none());

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["source"], "workspace");
}

#[tokio::test]
async fn test_unknown_session() {
    let fixture = fixture();
    let missing = SessionId::from("missing");

    assert_eq!(
        fixture.engine.session_status(&missing).unwrap_err(),
        EngineError::SessionNotFound(missing.clone())
    );
    tokio_test::assert_err!(fixture.engine.apply_edits(&missing, vec![rename_alpha(A)]).await);
    tokio_test::assert_err!(fixture.engine.commit_changes(&missing).await);
    tokio_test::assert_err!(fixture.engine.end_session(&missing));
}

#[tokio::test]
async fn test_empty_batch_is_invalid() {
    let fixture = fixture();
    let id = start(&fixture).await;
    let err = fixture.engine.apply_edits(&id, Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_missing_document_fails_only_its_edit() {
    let fixture = fixture();
    let id = start(&fixture).await;

    let outcome = fixture
        .engine
        .apply_edits(
            &id,
            vec![rename_alpha("/repo/ghost.arb"), rename_alpha(A)],
        )
        .await
        .unwrap();
    assert_eq!(
        outcome.edits[0].error,
        Some(EngineError::DocumentNotFound(PathBuf::from("/repo/ghost.arb")))
    );
    assert!(outcome.edits[1].is_ok());
    assert_eq!(outcome.status(), OperationStatus::PartialSuccess);
    assert_eq!(fixture.engine.pending_changes(&id).unwrap().len(), 1);

    let err = fixture
        .engine
        .apply_edit(&id, "/repo/ghost.arb", vec![TextChange::insert(0, "x")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_invalid_span_fails_its_edit() {
    let fixture = fixture();
    let id = start(&fixture).await;

    let err = fixture
        .engine
        .apply_edit(&id, A, vec![TextChange::new(100, 1, "x")])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(fixture.engine.pending_changes(&id).unwrap().is_empty());
}

#[tokio::test]
async fn test_edits_stack_on_pending_text() {
    let fixture = fixture();
    let id = start(&fixture).await;

    fixture
        .engine
        .apply_edits(
            &id,
            vec![
                rename_alpha(A),
                DocumentEdit::new(A, vec![TextChange::insert(0, "// renamed\n")]),
            ],
        )
        .await
        .unwrap();

    let session = fixture.engine.registry().find(&id).unwrap();
    assert_eq!(
        session.pending_text(Path::new(A)).as_deref(),
        Some("// renamed\ndef omega\n")
    );
    assert_eq!(session.phase(), EditPhase::Staged);
    assert_eq!(fixture.files.contents(Path::new(A)).as_deref(), Some("def alpha\n"));
}

#[tokio::test]
async fn test_breaking_edit_reports_downstream_errors() {
    let fixture = fixture();
    let id = start(&fixture).await;

    let outcome = fixture
        .engine
        .apply_edit(&id, A, vec![TextChange::new(4, 5, "omega")])
        .await
        .unwrap();

    let order: Vec<_> = outcome.projects.iter().map(|p| p.project.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(outcome.has_errors);

    let a = outcome.impact("a").unwrap();
    assert!(a.delta.is_empty());
    for project in ["b", "c"] {
        let impact = outcome.impact(project).unwrap();
        assert_eq!(impact.delta.introduced.len(), 1, "{project}");
        assert_eq!(impact.delta.introduced[0].rule_id, "AR1002");
        assert_eq!(impact.delta.introduced[0].message, "cannot find `alpha` in scope");
        assert!(impact.delta.resolved.is_empty());
    }
    assert_eq!(fixture.files.write_count(), 0);

    // The on-disk state is still clean.
    let report = fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(report.error_count(), 0);
}

#[tokio::test]
async fn test_fixing_edit_reports_resolved() {
    let model = ProjectModel::new(
        "/repo",
        vec![node("a", "def omega\n", &[]), node("b", "use alpha\n", &["a"])],
    );
    let mut config = EngineConfig::default();
    config.sessions.prewarm = false;
    let fixture = fixture_with(model, config, None);
    let id = start(&fixture).await;

    let outcome = fixture
        .engine
        .apply_edit(&id, A, vec![TextChange::new(4, 5, "alpha")])
        .await
        .unwrap();
    let b = outcome.impact("b").unwrap();
    assert_eq!(b.delta.resolved.len(), 1);
    assert!(b.delta.introduced.is_empty());
    assert!(!outcome.has_errors);
}

#[tokio::test]
async fn test_partial_commit() {
    let fixture = fixture();
    let id = start(&fixture).await;

    fixture
        .engine
        .apply_edits(
            &id,
            vec![
                DocumentEdit::new(A, vec![TextChange::insert(10, "def gamma\n")]),
                DocumentEdit::new(B, vec![TextChange::insert(19, "def delta\n")]),
            ],
        )
        .await
        .unwrap();
    fixture.files.fail_writes_to(B);

    let report = fixture.engine.commit_changes(&id).await.unwrap();
    assert_eq!(report.written, vec![PathBuf::from(A)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, PathBuf::from(B));
    assert_eq!(report.status(), OperationStatus::PartialSuccess);

    assert_eq!(
        fixture.files.contents(Path::new(A)).as_deref(),
        Some("def alpha\ndef gamma\n")
    );
    let pending = fixture.engine.pending_changes(&id).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].path, PathBuf::from(B));
    assert_eq!(pending[0].project, ProjectId::from("b"));

    let session = fixture.engine.registry().find(&id).unwrap();
    let model = session.model();
    assert_eq!(model.document(Path::new(A)).unwrap().1.content, "def alpha\ndef gamma\n");
    assert_eq!(session.phase(), EditPhase::Staged);

    let err = report.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFailure);
}

#[tokio::test]
async fn test_commit_invalidates_downstream() {
    let fixture = fixture();
    let id = start(&fixture).await;
    fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(fixture.backend.total_compiles(), 3);

    fixture.engine.apply_edits(&id, vec![rename_alpha(A)]).await.unwrap();
    let speculative = fixture.backend.total_compiles();

    let report = fixture.engine.commit_changes(&id).await.unwrap();
    assert_eq!(report.status(), OperationStatus::Success);
    assert_eq!(
        report.invalidated,
        vec![ProjectId::from("a"), ProjectId::from("b"), ProjectId::from("c")]
    );
    assert_eq!(fixture.engine.session_status(&id).unwrap().phase, EditPhase::Committed);

    let diagnostics = fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(fixture.backend.total_compiles(), speculative + 3);
    assert_eq!(diagnostics.error_count(), 2);
}

#[tokio::test]
async fn test_rollback_discards_pending() {
    let fixture = fixture();
    let id = start(&fixture).await;

    fixture.engine.apply_edits(&id, vec![rename_alpha(A)]).await.unwrap();
    assert_eq!(fixture.engine.rollback_changes(&id).unwrap(), 1);

    assert!(fixture.engine.pending_changes(&id).unwrap().is_empty());
    assert_eq!(fixture.files.write_count(), 0);
    assert_eq!(fixture.engine.session_status(&id).unwrap().phase, EditPhase::RolledBack);

    let report = fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(report.error_count(), 0);
    assert_eq!(report.status(), OperationStatus::Success);
}

#[tokio::test]
async fn test_refresh_discards_pending_and_reloads() {
    let fixture = fixture();
    let id = start(&fixture).await;
    fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    fixture.engine.apply_edits(&id, vec![rename_alpha(A)]).await.unwrap();

    let mut model = chain();
    model.projects.push(node("d", "use beta\n", &["b"]));
    fixture.models.set_model(model);

    fixture.engine.refresh_session(&id).await.unwrap();
    let status = fixture.engine.session_status(&id).unwrap();
    assert_eq!(status.project_count, 4);
    assert_eq!(status.pending_edits, 0);
    assert_eq!(status.phase, EditPhase::Clean);
    assert_eq!(status.cached_entries, 0);
    assert_eq!(fixture.models.load_count(), 2);
}

#[tokio::test]
async fn test_end_session_clears_cache() {
    let fixture = fixture();
    let id = start(&fixture).await;
    fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(fixture.engine.cache().session_entry_count(&id), 3);

    fixture.engine.end_session(&id).unwrap();
    assert_eq!(fixture.engine.cache().session_entry_count(&id), 0);
    assert_eq!(
        fixture.engine.session_status(&id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_idle_sweep() {
    let fixture = fixture();
    let idle = start(&fixture).await;
    let registry = fixture.engine.registry();

    assert!(registry.sweep_idle(Duration::from_secs(3600)).is_empty());

    tokio::time::sleep(Duration::from_millis(30)).await;
    let active = start(&fixture).await;
    assert_eq!(registry.sweep_idle(Duration::from_millis(20)), vec![idle]);
    assert_eq!(registry.session_ids(), vec![active]);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let fixture = fixture();
    let id = start(&fixture).await;
    let registry = fixture.engine.registry();

    fixture.engine.pause_session(&id).unwrap();
    assert!(registry.is_paused(&id).unwrap());
    assert!(fixture.engine.session_status(&id).unwrap().paused_at.is_some());

    // Pausing twice is harmless.
    fixture.engine.pause_session(&id).unwrap();
    fixture.engine.resume_session(&id).unwrap();
    assert!(!registry.is_paused(&id).unwrap());
}

#[tokio::test]
async fn test_prewarm_compiles_leaves() {
    let fixture = fixture_with(chain(), EngineConfig::default(), None);
    let id = start(&fixture).await;

    let cache = fixture.engine.cache();
    for _ in 0..200 {
        if cache.is_cached(&id, &ProjectId::from("a")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cache.is_cached(&id, &ProjectId::from("a")));
    assert_eq!(fixture.backend.compile_count("a"), 1);
    assert_eq!(fixture.backend.compile_count("c"), 0);
}

#[tokio::test]
async fn test_reload_document_folds_disk_change() {
    use arbor_backend::FileSystem;

    let fixture = fixture();
    let id = start(&fixture).await;
    fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    let registry = fixture.engine.registry();

    assert!(registry.reload_document(&id, Path::new(B)).await.unwrap().is_empty());

    fixture
        .files
        .write_text(Path::new(B), "use gamma\ndef beta\n")
        .await
        .unwrap();
    let invalidated = registry.reload_document(&id, Path::new("b/main.arb")).await.unwrap();
    assert_eq!(invalidated, vec![ProjectId::from("b"), ProjectId::from("c")]);
    assert!(fixture.engine.cache().is_cached(&id, &ProjectId::from("a")));

    let report = fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(report.error_count(), 1);
    let b = report.project("b").unwrap();
    assert_eq!(b.diagnostics[0].rule_id, "AR1002");
    assert_eq!(b.diagnostics[0].message, "cannot find `gamma` in scope");
}

#[tokio::test]
async fn test_single_project_diagnostics() {
    let fixture = fixture();
    let id = start(&fixture).await;

    let report = fixture
        .engine
        .get_diagnostics(&id, Some(&ProjectId::from("b")), None)
        .await
        .unwrap();
    assert_eq!(report.projects.len(), 1);
    assert_eq!(fixture.backend.compile_count("c"), 0);

    let err = fixture
        .engine
        .get_diagnostics(&id, Some(&ProjectId::from("zz")), None)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ProjectNotFound(ProjectId::from("zz")));
}

#[tokio::test]
async fn test_analyzer_override_per_call() {
    let mut config = EngineConfig::default();
    config.sessions.prewarm = false;
    let model = ProjectModel::new("/repo", vec![node("a", "// TODO tidy\ndef alpha\n", &[])]);
    let fixture = fixture_with(model, config, None);
    let id = start(&fixture).await;

    let configured = fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    let rules: Vec<_> = configured.projects[0]
        .diagnostics
        .iter()
        .map(|d| d.rule_id.as_str())
        .collect();
    assert_eq!(rules, vec!["AR2001"]);

    let compiler_only = fixture
        .engine
        .get_diagnostics(&id, None, Some(false))
        .await
        .unwrap();
    assert!(compiler_only.projects[0].diagnostics.is_empty());
    assert_eq!(fixture.backend.compile_count("a"), 1);

    let forced = fixture
        .engine
        .get_diagnostics(&id, Some(&ProjectId::from("a")), Some(true))
        .await
        .unwrap();
    assert_eq!(forced.projects[0].diagnostics.len(), 1);
}

#[tokio::test]
async fn test_shutdown_after_explicit_end() {
    let fixture = fixture();
    let first = start(&fixture).await;
    let second = start(&fixture).await;
    fixture.engine.end_session(&first).unwrap();

    fixture.engine.shutdown().await;
    for id in [&first, &second] {
        let err = fixture.engine.get_diagnostics(id, None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[tokio::test]
async fn test_failing_project_does_not_stop_report() {
    let fixture = fixture();
    fixture.backend.fail_project("c");
    let id = start(&fixture).await;

    let report = fixture.engine.get_diagnostics(&id, None, None).await.unwrap();
    assert_eq!(report.status(), OperationStatus::PartialSuccess);
    assert!(report.project("a").unwrap().error.is_none());
    assert!(report.project("c").unwrap().error.is_some());
}

#[tokio::test]
async fn test_invalidate_project() {
    let fixture = fixture();
    let id = start(&fixture).await;
    fixture.engine.get_diagnostics(&id, None, None).await.unwrap();

    let invalidated = fixture.engine.invalidate_project(&id, &ProjectId::from("b")).unwrap();
    assert_eq!(invalidated, vec![ProjectId::from("b"), ProjectId::from("c")]);

    let err = fixture
        .engine
        .invalidate_project(&id, &ProjectId::from("zz"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_dependency_graph_summary() {
    let fixture = fixture();
    let id = start(&fixture).await;

    let summary = fixture.engine.dependency_graph(&id).unwrap();
    let order: Vec<_> = summary.topological_order.iter().map(ProjectId::as_str).collect();
    insta::assert_snapshot!(order.join(" -> "), @"a -> b -> c");
    assert_eq!(summary.leaves, vec![ProjectId::from("a")]);
    assert_eq!(summary.roots, vec![ProjectId::from("c")]);
    assert!(summary.cycles.is_empty());
    assert_eq!(summary.projects[1].dependents, vec![ProjectId::from("c")]);
}

#[tokio::test]
async fn test_shutdown_ends_sessions() {
    let fixture = fixture();
    start(&fixture).await;
    fixture.engine.start_maintenance();
    fixture.engine.start_maintenance();

    fixture.engine.shutdown().await;
    assert_eq!(fixture.engine.registry().session_count(), 0);
}
