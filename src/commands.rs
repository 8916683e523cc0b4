//! CLI command implementations

use arbor_backend::{BuiltinAnalyzerLoader, ManifestModelProvider, TokioFileSystem, create_backend};
use arbor_core::{AnalyzerConfig, EngineConfig, SessionId, TextChange};
use arbor_session::{DiagnosticsReport, EditOutcome, Engine, EngineServices};
use arbor_watcher::SessionWatcher;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_BACKEND: &str = "outline";

/// Options shared by every command
pub struct Options {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub project: bool,
    pub json: bool,
    /// Overrides `edits.include_analyzers` for reported diagnostics
    pub analyzers: Option<bool>,
}

/// Explicit `--config`, then `ARBOR_CONFIG`, then built-in defaults.
fn load_config(options: &Options) -> anyhow::Result<EngineConfig> {
    let path = options
        .config
        .clone()
        .or_else(|| std::env::var_os("ARBOR_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => {
            tracing::debug!("Loading configuration from {}", path.display());
            Ok(EngineConfig::load(&path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn build_engine(config: EngineConfig) -> anyhow::Result<Engine> {
    let backend_name =
        std::env::var("ARBOR_BACKEND").unwrap_or_else(|_| DEFAULT_BACKEND.to_string());
    let services = EngineServices {
        backend: create_backend(&backend_name)?,
        models: Arc::new(ManifestModelProvider),
        analyzers: Arc::new(BuiltinAnalyzerLoader::new()),
        files: Arc::new(TokioFileSystem),
    };
    Ok(Engine::new(services, config))
}

async fn open(options: &Options, config: EngineConfig) -> anyhow::Result<(Engine, SessionId)> {
    let engine = build_engine(config)?;
    let analyzers = AnalyzerConfig::default();
    let session = if options.project {
        engine.start_project_session(&options.root, analyzers).await?
    } else {
        engine.start_session(&options.root, analyzers).await?
    };
    Ok((engine, session))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &DiagnosticsReport) {
    for project in &report.projects {
        if let Some(error) = &project.error {
            println!("{}: failed: {}", project.project, error);
            continue;
        }
        for diagnostic in &project.diagnostics {
            println!("{}", diagnostic);
        }
    }
}

pub async fn check(options: Options, only: Option<String>) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let (engine, session) = open(&options, config).await?;

    let only = only.map(arbor_core::ProjectId::from);
    let report = engine.get_diagnostics(&session, only.as_ref(), options.analyzers).await?;
    if options.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    let stats = engine.cache_stats();
    tracing::info!(
        "Checked {} projects ({} compiles)",
        report.projects.len(),
        stats.compiles
    );
    engine.shutdown().await;

    let errors = report.error_count();
    if errors > 0 {
        anyhow::bail!("{} errors found", errors);
    }
    Ok(())
}

pub async fn graph(options: Options) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let (engine, session) = open(&options, config).await?;
    let summary = engine.dependency_graph(&session)?;

    if options.json {
        print_json(&summary)?;
    } else {
        for project in &summary.projects {
            let references: Vec<_> = project.references.iter().map(|p| p.as_str()).collect();
            println!(
                "{} ({} documents) -> [{}]",
                project.id,
                project.documents,
                references.join(", ")
            );
        }
        for cycle in &summary.cycles {
            let members: Vec<_> = cycle.iter().map(|p| p.as_str()).collect();
            println!("cycle: {}", members.join(" -> "));
        }
    }
    engine.shutdown().await;
    Ok(())
}

fn print_outcome(outcome: &EditOutcome) {
    for edit in &outcome.edits {
        if let Some(error) = &edit.error {
            println!("{}: {}", edit.file.display(), error);
        }
    }
    for impact in &outcome.projects {
        if let Some(error) = &impact.error {
            println!("{}: failed: {}", impact.project, error);
            continue;
        }
        for diagnostic in &impact.delta.introduced {
            println!("+ {}", diagnostic);
        }
        for diagnostic in &impact.delta.resolved {
            println!("- {}", diagnostic);
        }
    }
}

pub async fn preview(
    options: Options,
    file: PathBuf,
    start: usize,
    length: usize,
    text: String,
    commit: bool,
) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let (engine, session) = open(&options, config).await?;

    let outcome = engine
        .apply_edit(&session, file, vec![TextChange::new(start, length, text)])
        .await?;
    if options.json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }

    if commit {
        let report = engine.commit_changes(&session).await?;
        tracing::info!("Wrote {} files", report.written.len());
        report.into_result()?;
    } else {
        engine.rollback_changes(&session)?;
    }
    engine.shutdown().await;
    Ok(())
}

pub async fn watch(options: Options) -> anyhow::Result<()> {
    let config = load_config(&options)?;
    let (engine, session) = open(&options, config).await?;
    engine.start_maintenance();

    let report = engine.get_diagnostics(&session, None, options.analyzers).await?;
    print_report(&report);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = SessionWatcher::start(engine.registry().clone(), session.clone())?.with_updates(tx);
    let token = CancellationToken::new();
    let handle = tokio::spawn(watcher.run(token.clone()));
    tracing::info!("Watching {} (Ctrl-C to stop)", options.root.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = rx.recv() => {
                if update.is_none() {
                    break;
                }
                // Coalesce bursts of events into one report
                while rx.try_recv().is_ok() {}
                match engine.get_diagnostics(&session, None, options.analyzers).await {
                    Ok(report) if options.json => print_json(&report)?,
                    Ok(report) => print_report(&report),
                    Err(e) => tracing::warn!("Failed to collect diagnostics: {}", e),
                }
            }
        }
    }

    token.cancel();
    match handle.await {
        Ok(Err(e)) => tracing::error!("File watcher error: {}", e),
        Err(e) => tracing::error!("File watcher task failed: {}", e),
        Ok(Ok(())) => {}
    }
    engine.shutdown().await;
    Ok(())
}
