//! Session-scoped compilation cache with single-flight compiles
//!
//! Three tables back the cache, each a `DashMap` so that unrelated keys never
//! contend on a cache-wide lock:
//!
//! - `entries`: published artifacts, one per (session, project)
//! - `inflight`: compiles currently running, one per (session, project)
//! - `diagnostics`: diagnostic lists derived from published artifacts
//!
//! When a path holds locks on two tables it always takes `inflight` before
//! `entries`.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use arbor_backend::{CompilationUnit, CompilerBackend};
use arbor_core::{
    AnalyzerSet, Artifact, CacheSettings, DependencyGraph, DiagnosticRecord, DocumentOverrides,
    EngineError, Fingerprint, ProjectId, ProjectModel, SessionId, project_fingerprint,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type Outcome = Result<Arc<Artifact>, EngineError>;

/// The inputs a compile is resolved against: one session's model snapshot
/// and the graph built from it.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub session: SessionId,
    pub model: Arc<ProjectModel>,
    pub graph: Arc<DependencyGraph>,
}

impl BuildContext {
    pub fn new(session: SessionId, model: Arc<ProjectModel>, graph: Arc<DependencyGraph>) -> Self {
        BuildContext {
            session,
            model,
            graph,
        }
    }

    /// Build the graph from the model.
    pub fn from_model(session: SessionId, model: Arc<ProjectModel>) -> Self {
        let graph = Arc::new(DependencyGraph::build(&model));
        Self::new(session, model, graph)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
    pub session: SessionId,
    pub project: ProjectId,
}

impl EntryKey {
    fn new(session: &SessionId, project: &ProjectId) -> Self {
        EntryKey {
            session: session.clone(),
            project: project.clone(),
        }
    }
}

pub(crate) struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub artifact: Arc<Artifact>,
    /// Milliseconds since the cache epoch.
    last_accessed: AtomicU64,
}

impl CacheEntry {
    fn new(fingerprint: Fingerprint, artifact: Arc<Artifact>, now: u64) -> Self {
        CacheEntry {
            fingerprint,
            artifact,
            last_accessed: AtomicU64::new(now),
        }
    }

    pub fn last_accessed(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    fn touch(&self, now: u64) {
        self.last_accessed.fetch_max(now, Ordering::Relaxed);
    }
}

struct InFlight {
    ticket: u64,
    fingerprint: Fingerprint,
    rx: watch::Receiver<Option<Outcome>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct DiagnosticsKey {
    pub session: SessionId,
    pub project: ProjectId,
    analyzers: Fingerprint,
    include_analyzers: bool,
}

pub(crate) struct CachedDiagnostics {
    /// Fingerprint of the artifact the list was computed from.
    fingerprint: Fingerprint,
    diagnostics: Arc<Vec<DiagnosticRecord>>,
}

pub(crate) struct Inner {
    backend: Arc<dyn CompilerBackend>,
    pub settings: CacheSettings,
    epoch: Instant,
    pub entries: DashMap<EntryKey, CacheEntry>,
    inflight: DashMap<EntryKey, InFlight>,
    pub diagnostics: DashMap<DiagnosticsKey, CachedDiagnostics>,
    next_ticket: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
    pub evictions: AtomicU64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compiles: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct CompilationCache {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for CompilationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationCache")
            .field("backend", &self.inner.backend.name())
            .field("entries", &self.inner.entries.len())
            .field("inflight", &self.inner.inflight.len())
            .finish()
    }
}

impl CompilationCache {
    pub fn new(backend: Arc<dyn CompilerBackend>, settings: CacheSettings) -> Self {
        CompilationCache {
            inner: Arc::new(Inner {
                backend,
                settings,
                epoch: Instant::now(),
                entries: DashMap::new(),
                inflight: DashMap::new(),
                diagnostics: DashMap::new(),
                next_ticket: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                compiles: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CompilerBackend> {
        &self.inner.backend
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.inner.epoch.elapsed().as_millis() as u64
    }

    /// Fingerprint of a project and, transitively, of everything it compiles against.
    pub fn fingerprint(
        &self,
        ctx: &BuildContext,
        project: &ProjectId,
    ) -> Result<Fingerprint, EngineError> {
        let environment = self.inner.backend.environment();
        fingerprint_with(ctx, project, &environment, &mut HashMap::new())
    }

    /// Return the artifact for `project`, compiling it (and any stale
    /// dependencies) when no entry matches the current inputs.
    ///
    /// The compile runs in its own task: dropping the returned future does
    /// not abort it, and concurrent callers for the same key share it.
    pub fn get_or_create(&self, ctx: &BuildContext, project: &ProjectId) -> BoxFuture<'static, Outcome> {
        let resolving = self.resolve(ctx, project);
        async move { resolving.await.map(|(_, artifact)| artifact) }.boxed()
    }

    /// Like [`get_or_create`](Self::get_or_create), but returns
    /// [`EngineError::Cancelled`] as soon as `token` fires. The shared compile
    /// keeps running for other callers.
    pub async fn get_or_create_cancellable(
        &self,
        ctx: &BuildContext,
        project: &ProjectId,
        token: &CancellationToken,
    ) -> Outcome {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Request for {} in session {} cancelled", project, ctx.session);
                Err(EngineError::Cancelled)
            }
            outcome = self.get_or_create(ctx, project) => outcome,
        }
    }

    fn resolve(
        &self,
        ctx: &BuildContext,
        project: &ProjectId,
    ) -> BoxFuture<'static, Result<(Fingerprint, Arc<Artifact>), EngineError>> {
        let cache = self.clone();
        let ctx = ctx.clone();
        let project = project.clone();

        async move {
            let fingerprint = cache.fingerprint(&ctx, &project)?;
            let key = EntryKey::new(&ctx.session, &project);

            if let Some(artifact) = cache.lookup(&key, fingerprint) {
                cache.inner.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit for {} in session {}", project, ctx.session);
                return Ok((fingerprint, artifact));
            }
            cache.inner.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache miss for {} in session {}", project, ctx.session);

            let mut rx = cache.join_or_start(&ctx, key, fingerprint);
            let outcome = rx
                .wait_for(Option::is_some)
                .await
                .map(|value| value.clone())
                .map_err(|_| {
                    EngineError::backend(format!("compile of {project} ended without a result"))
                })?;

            match outcome {
                Some(result) => result.map(|artifact| (fingerprint, artifact)),
                None => Err(EngineError::backend(format!(
                    "compile of {project} ended without a result"
                ))),
            }
        }
        .boxed()
    }

    fn lookup(&self, key: &EntryKey, fingerprint: Fingerprint) -> Option<Arc<Artifact>> {
        let entry = self.inner.entries.get(key)?;
        if entry.fingerprint != fingerprint {
            return None;
        }
        entry.touch(self.now_millis());
        Some(entry.artifact.clone())
    }

    /// Subscribe to the compile producing `fingerprint` for `key`, starting
    /// one if none is running.
    fn join_or_start(
        &self,
        ctx: &BuildContext,
        key: EntryKey,
        fingerprint: Fingerprint,
    ) -> watch::Receiver<Option<Outcome>> {
        match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(running) if running.get().fingerprint == fingerprint => {
                tracing::debug!("Joining in-flight compile of {}", key.project);
                running.get().rx.clone()
            }
            slot => {
                // A compile may have published between our lookup and taking this slot.
                if let Some(artifact) = self.lookup(&key, fingerprint) {
                    return watch::channel(Some(Ok(artifact))).1;
                }

                let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                let record = InFlight {
                    ticket,
                    fingerprint,
                    rx: rx.clone(),
                };
                match slot {
                    Entry::Occupied(mut stale) => {
                        tracing::debug!("Superseding stale compile of {}", key.project);
                        stale.insert(record);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(record);
                    }
                }

                self.spawn_compile(ctx.clone(), key, ticket, fingerprint, tx);
                rx
            }
        }
    }

    fn spawn_compile(
        &self,
        ctx: BuildContext,
        key: EntryKey,
        ticket: u64,
        fingerprint: Fingerprint,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        let cache = self.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(cache.compile_project(&ctx, &key.project))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(EngineError::backend(format!("compile of {} panicked", key.project)))
                });

            cache.publish(key, ticket, fingerprint, &outcome);
            tx.send_replace(Some(outcome));
            cache.enforce_capacity();
        });
    }

    async fn compile_project(&self, ctx: &BuildContext, project: &ProjectId) -> Outcome {
        let node = ctx
            .model
            .project(project)
            .ok_or_else(|| EngineError::ProjectNotFound(project.clone()))?;

        let dependencies = ctx.graph.effective_dependencies(project);
        let references =
            try_join_all(dependencies.iter().map(|dep| self.get_or_create(ctx, dep))).await?;

        tracing::debug!(
            "Compiling {} for session {} against {} references",
            project,
            ctx.session,
            references.len()
        );
        self.inner.compiles.fetch_add(1, Ordering::Relaxed);
        let artifact = self
            .inner
            .backend
            .compile(CompilationUnit::new(node, references))
            .await
            .map_err(|e| EngineError::backend(format!("{project}: {e:#}")))?;
        Ok(Arc::new(artifact))
    }

    /// Store a finished compile unless it was invalidated or superseded while
    /// it ran.
    fn publish(&self, key: EntryKey, ticket: u64, fingerprint: Fingerprint, outcome: &Outcome) {
        if let Entry::Occupied(current) = self.inner.inflight.entry(key.clone()) {
            if current.get().ticket == ticket {
                if let Ok(artifact) = outcome {
                    let entry = CacheEntry::new(fingerprint, artifact.clone(), self.now_millis());
                    self.inner.entries.insert(key, entry);
                }
                current.remove();
                return;
            }
        }
        tracing::debug!(
            "Discarding superseded compile of {} in session {}",
            key.project,
            key.session
        );
    }

    /// Compiler diagnostics for `project`, plus analyzer diagnostics when
    /// `include_analyzers` is set. Cached per analyzer set and tied to the
    /// artifact they were computed from.
    pub async fn get_diagnostics(
        &self,
        ctx: &BuildContext,
        project: &ProjectId,
        analyzers: &AnalyzerSet,
        include_analyzers: bool,
    ) -> Result<Arc<Vec<DiagnosticRecord>>, EngineError> {
        let (fingerprint, artifact) = self.resolve(ctx, project).await?;
        let key = DiagnosticsKey {
            session: ctx.session.clone(),
            project: project.clone(),
            analyzers: analyzers.key(),
            include_analyzers,
        };

        if let Some(cached) = self.inner.diagnostics.get(&key) {
            if cached.fingerprint == fingerprint {
                return Ok(cached.diagnostics.clone());
            }
        }

        let diagnostics = Arc::new(
            self.collect_diagnostics(&artifact, analyzers, include_analyzers)
                .await?,
        );
        self.inner.diagnostics.insert(
            key,
            CachedDiagnostics {
                fingerprint,
                diagnostics: diagnostics.clone(),
            },
        );
        Ok(diagnostics)
    }

    async fn collect_diagnostics(
        &self,
        artifact: &Artifact,
        analyzers: &AnalyzerSet,
        include_analyzers: bool,
    ) -> Result<Vec<DiagnosticRecord>, EngineError> {
        let mut diagnostics = self.inner.backend.diagnostics(artifact);
        if include_analyzers && !analyzers.is_empty() {
            let found = self
                .inner
                .backend
                .run_analyzers(artifact, analyzers)
                .await
                .map_err(|e| {
                    EngineError::backend(format!("analyzers for {}: {e:#}", artifact.project))
                })?;
            diagnostics.extend(found);
        }
        Ok(diagnostics)
    }

    /// Build a throwaway artifact for `project` with `overrides` substituted
    /// for on-disk document texts. Projects whose dependency closure contains
    /// no overridden document come from the cache; the rest are rebuilt for
    /// this call only and never stored.
    pub async fn get_with_speculative_edits(
        &self,
        ctx: &BuildContext,
        project: &ProjectId,
        overrides: &DocumentOverrides,
    ) -> Outcome {
        let target = ctx
            .model
            .project(project)
            .ok_or_else(|| EngineError::ProjectNotFound(project.clone()))?;

        let affected: HashSet<ProjectId> = ctx
            .model
            .projects
            .iter()
            .filter(|p| p.is_touched_by(overrides))
            .flat_map(|p| ctx.graph.downstream(&p.id))
            .collect();
        if !affected.contains(&target.id) {
            return self.get_or_create(ctx, project).await;
        }

        let needed: HashSet<ProjectId> = ctx.graph.upstream(project).into_iter().collect();
        let mut built: HashMap<ProjectId, Arc<Artifact>> = HashMap::new();

        for id in ctx.graph.topological_order() {
            if !(needed.contains(&id) && affected.contains(&id)) {
                continue;
            }
            let node = ctx
                .model
                .project(&id)
                .ok_or_else(|| EngineError::ProjectNotFound(id.clone()))?;

            let mut references = Vec::new();
            for dependency in ctx.graph.effective_dependencies(&id) {
                let artifact = match built.get(&dependency) {
                    Some(artifact) => artifact.clone(),
                    None => self.get_or_create(ctx, &dependency).await?,
                };
                references.push(artifact);
            }

            tracing::debug!("Speculatively compiling {} for session {}", id, ctx.session);
            let unit = CompilationUnit::new(&node.with_overrides(overrides), references);
            let artifact = self
                .inner
                .backend
                .compile(unit)
                .await
                .map_err(|e| EngineError::backend(format!("{id}: {e:#}")))?;
            built.insert(id, Arc::new(artifact));
        }

        built
            .remove(project)
            .ok_or_else(|| EngineError::ProjectNotFound(project.clone()))
    }

    /// Diagnostics of the speculative artifact for `project`. Never cached.
    pub async fn speculative_diagnostics(
        &self,
        ctx: &BuildContext,
        project: &ProjectId,
        overrides: &DocumentOverrides,
        analyzers: &AnalyzerSet,
        include_analyzers: bool,
    ) -> Result<Vec<DiagnosticRecord>, EngineError> {
        let artifact = self
            .get_with_speculative_edits(ctx, project, overrides)
            .await?;
        self.collect_diagnostics(&artifact, analyzers, include_analyzers)
            .await
    }

    /// Drop everything cached for one project of a session.
    pub fn invalidate(&self, session: &SessionId, project: &ProjectId) {
        let key = EntryKey::new(session, project);
        self.inner.inflight.remove(&key);
        self.inner.entries.remove(&key);
        self.forget_diagnostics(&key);
    }

    /// Drop the diagnostic lists of one (session, project) for every
    /// analyzer set.
    pub(crate) fn forget_diagnostics(&self, key: &EntryKey) {
        self.inner
            .diagnostics
            .retain(|k, _| !(k.session == key.session && k.project == key.project));
    }

    /// Invalidate `project` and everything downstream of it.
    pub fn invalidate_downstream(
        &self,
        session: &SessionId,
        graph: &DependencyGraph,
        project: &ProjectId,
    ) -> Vec<ProjectId> {
        let mut closure = graph.downstream(project);
        if closure.is_empty() {
            closure.push(project.clone());
        }
        for id in &closure {
            self.invalidate(session, id);
        }
        tracing::debug!(
            "Invalidated {} projects downstream of {} in session {}",
            closure.len(),
            project,
            session
        );
        closure
    }

    /// Drop every entry, in-flight record and diagnostic list of a session.
    pub fn invalidate_session(&self, session: &SessionId) {
        self.inner.inflight.retain(|k, _| k.session != *session);
        self.inner.entries.retain(|k, _| k.session != *session);
        self.inner.diagnostics.retain(|k, _| k.session != *session);
        tracing::debug!("Invalidated cache for session {}", session);
    }

    /// True if a published entry exists for the key, whatever its fingerprint.
    pub fn is_cached(&self, session: &SessionId, project: &ProjectId) -> bool {
        self.inner
            .entries
            .contains_key(&EntryKey::new(session, project))
    }

    pub fn session_entry_count(&self, session: &SessionId) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|entry| entry.key().session == *session)
            .count()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            compiles: self.inner.compiles.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
        }
    }
}

fn fingerprint_with(
    ctx: &BuildContext,
    project: &ProjectId,
    environment: &str,
    memo: &mut HashMap<ProjectId, Fingerprint>,
) -> Result<Fingerprint, EngineError> {
    if let Some(fingerprint) = memo.get(project) {
        return Ok(*fingerprint);
    }
    let node = ctx
        .model
        .project(project)
        .ok_or_else(|| EngineError::ProjectNotFound(project.clone()))?;

    let mut dependencies = Vec::new();
    for dependency in ctx.graph.effective_dependencies(project) {
        let fingerprint = fingerprint_with(ctx, &dependency, environment, memo)?;
        dependencies.push((dependency, fingerprint));
    }

    let fingerprint = project_fingerprint(node, environment, &dependencies);
    memo.insert(project.clone(), fingerprint);
    Ok(fingerprint)
}
