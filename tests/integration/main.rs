//! Integration tests for Arbor
//!
//! These tests verify that the cache, sessions and edit engine work together
//! over a three-project chain: `a` <- `b` <- `c`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use arbor_backend::testing::{CountingBackend, MemoryFileSystem, StaticModelProvider};
use arbor_backend::{BuiltinAnalyzerLoader, ManifestModelProvider, TokioFileSystem, create_backend};
use arbor_core::{
    AnalyzerConfig, EngineConfig, OperationStatus, ProjectId, ProjectModel, ProjectNode, TextChange,
};
use arbor_session::{EditPhase, Engine, EngineServices};
use tempfile::TempDir;

const MANIFEST: &str = r#"
[[project]]
name = "a"
path = "a"

[[project]]
name = "b"
path = "b"
references = ["a"]

[[project]]
name = "c"
path = "c"
references = ["b"]
"#;

fn chain() -> ProjectModel {
    ProjectModel::new(
        "/repo",
        vec![
            ProjectNode::new("a", "a").with_document("/repo/a/main.arb", "def alpha\n"),
            ProjectNode::new("b", "b")
                .with_document("/repo/b/main.arb", "use alpha\ndef beta\n")
                .with_reference("a"),
            ProjectNode::new("c", "c")
                .with_document("/repo/c/main.arb", "use alpha\nuse beta\n")
                .with_reference("b"),
        ],
    )
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sessions.prewarm = false;
    config
}

fn write_workspace(dir: &Path) {
    std::fs::write(dir.join("arbor.toml"), MANIFEST).unwrap();
    for (project, content) in [
        ("a", "def alpha\n"),
        ("b", "use alpha\ndef beta\n"),
        ("c", "use alpha\nuse beta\n"),
    ] {
        std::fs::create_dir_all(dir.join(project)).unwrap();
        std::fs::write(dir.join(project).join("main.arb"), content).unwrap();
    }
}

/// Build once, hit the cache, preview a breaking edit, commit it, rebuild.
#[tokio::test]
async fn test_edit_lifecycle_recompiles_only_what_changed() {
    let model = chain();
    let backend = Arc::new(CountingBackend::outline());
    let files = Arc::new(MemoryFileSystem::from_model(&model));
    let engine = Engine::new(
        EngineServices {
            backend: backend.clone(),
            models: Arc::new(StaticModelProvider::new(model)),
            analyzers: Arc::new(BuiltinAnalyzerLoader::new()),
            files: files.clone(),
        },
        config(),
    );
    let session = engine
        .start_session(Path::new("/repo"), AnalyzerConfig::default())
        .await
        .unwrap();

    // First build compiles every project exactly once
    let report = engine.get_diagnostics(&session, None, None).await.unwrap();
    assert_eq!(report.status(), OperationStatus::Success);
    assert_eq!(report.error_count(), 0);
    for project in ["a", "b", "c"] {
        assert_eq!(backend.compile_count(project), 1, "{project}");
    }

    // Repeating is served from the cache
    engine.get_diagnostics(&session, None, None).await.unwrap();
    assert_eq!(backend.total_compiles(), 3);
    assert_eq!(engine.cache_stats().entries, 3);

    // A stray `}` discards a's definitions; c's text is untouched but breaks
    let outcome = engine
        .apply_edit(&session, "a/main.arb", vec![TextChange::insert(0, "}\n")])
        .await
        .unwrap();
    assert!(outcome.has_errors);
    let a = outcome.impact("a").unwrap();
    assert_eq!(a.delta.introduced[0].rule_id, "AR1001");
    let c = outcome.impact("c").unwrap();
    assert_eq!(c.delta.introduced.len(), 1);
    assert_eq!(c.delta.introduced[0].message, "cannot find `alpha` in scope");
    assert_eq!(files.write_count(), 0);

    let speculative = backend.total_compiles();
    engine.get_diagnostics(&session, None, None).await.unwrap();
    assert_eq!(backend.total_compiles(), speculative);

    // Committing writes the file and invalidates the whole chain
    let report = engine.commit_changes(&session).await.unwrap();
    assert_eq!(report.written, vec![PathBuf::from("/repo/a/main.arb")]);
    assert_eq!(
        files.contents(Path::new("/repo/a/main.arb")).as_deref(),
        Some("}\ndef alpha\n")
    );

    let report = engine.get_diagnostics(&session, None, None).await.unwrap();
    assert_eq!(backend.total_compiles(), speculative + 3);
    assert_eq!(report.error_count(), 3);
    assert_eq!(
        engine.session_status(&session).unwrap().phase,
        EditPhase::Committed
    );

    engine.shutdown().await;
}

/// Same flow against a real manifest workspace on disk
#[tokio::test]
async fn test_manifest_workspace_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace(temp_dir.path());

    let engine = Engine::new(
        EngineServices {
            backend: create_backend("outline").unwrap(),
            models: Arc::new(ManifestModelProvider::new()),
            analyzers: Arc::new(BuiltinAnalyzerLoader::new()),
            files: Arc::new(TokioFileSystem),
        },
        config(),
    );
    let session = engine
        .start_session(temp_dir.path(), AnalyzerConfig::default())
        .await
        .unwrap();

    let graph = engine.dependency_graph(&session).unwrap();
    assert_eq!(
        graph.topological_order,
        vec![ProjectId::from("a"), ProjectId::from("b"), ProjectId::from("c")]
    );

    engine
        .apply_edit(
            &session,
            "b/main.arb",
            vec![TextChange::insert(19, "def gamma\n")],
        )
        .await
        .unwrap();
    let report = tokio_test::assert_ok!(engine.commit_changes(&session).await);
    assert_eq!(report.status(), OperationStatus::Success);

    let on_disk = std::fs::read_to_string(temp_dir.path().join("b/main.arb")).unwrap();
    assert_eq!(on_disk, "use alpha\ndef beta\ndef gamma\n");
    assert!(!temp_dir.path().join("b/main.arb.arbor-tmp").exists());

    // A refresh re-reads the manifest and sees the committed text
    tokio_test::assert_ok!(engine.refresh_session(&session).await);
    let report = engine.get_diagnostics(&session, None, None).await.unwrap();
    assert_eq!(report.error_count(), 0);

    engine.shutdown().await;
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("arbor"));
    assert!(stdout.contains("Incremental diagnostics"));
}

/// `check` fails when a project has errors
#[test]
fn test_cli_check_exit_status() {
    let temp_dir = TempDir::new().unwrap();
    write_workspace(temp_dir.path());

    let clean = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .args(["--json", "--root"])
        .arg(temp_dir.path())
        .arg("check")
        .output()
        .expect("Failed to execute command");
    assert!(clean.status.success());
    let report: serde_json::Value = serde_json::from_slice(&clean.stdout).unwrap();
    assert_eq!(report["projects"].as_array().unwrap().len(), 3);

    std::fs::write(temp_dir.path().join("a/main.arb"), "def omega\n").unwrap();
    let broken = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--root")
        .arg(temp_dir.path())
        .arg("check")
        .output()
        .expect("Failed to execute command");
    assert!(!broken.status.success());
    let stdout = String::from_utf8_lossy(&broken.stdout);
    assert!(stdout.contains("[AR1002] cannot find `alpha` in scope"));
}
