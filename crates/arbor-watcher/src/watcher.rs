//! Filesystem watcher implementation

use anyhow::Result;
use arbor_backend::manifest::MANIFEST_FILE;
use arbor_core::{EngineError, ProjectId, SessionId};
use arbor_session::SessionRegistry;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File or directory created
    Created(PathBuf),
    /// File or directory modified
    Modified(PathBuf),
    /// File or directory removed
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(path) | WatchEvent::Modified(path) | WatchEvent::Removed(path) => {
                path
            }
        }
    }
}

/// File system watcher for monitoring source changes
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    watched_paths: HashSet<PathBuf>,
    root_path: PathBuf,
}

impl FileWatcher {
    /// Create a new file watcher for the given root path
    pub fn new(root_path: impl AsRef<Path>) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    Self::handle_notify_event(event, &event_tx);
                }
                Err(e) => {
                    error!("File system watch error: {}", e);
                }
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            watched_paths: HashSet::new(),
            root_path,
        })
    }

    /// Handle a notify event and convert to our watch events
    fn handle_notify_event(event: notify::Event, event_tx: &mpsc::UnboundedSender<WatchEvent>) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            if should_ignore_path(&path) {
                continue;
            }
            if let Err(e) = event_tx.send(make(path)) {
                warn!("Failed to send watch event: {}", e);
            }
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Watch a directory recursively
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {:?}", path);

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        self.watched_paths.insert(path.to_path_buf());
        Ok(())
    }

    /// Stop watching a path
    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Stopping watch for: {:?}", path);

        self.watcher.unwatch(path)?;
        self.watched_paths.remove(path);
        Ok(())
    }

    /// Get the event receiver
    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }

    /// Check if a path is being watched
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.contains(path)
    }
}

/// What a watch event did to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Not a tracked file, or the session is paused.
    Skipped,
    /// A known document was re-read; these projects were invalidated.
    Reloaded(Vec<ProjectId>),
    /// The project set may have changed; the whole model was reloaded.
    Refreshed,
}

/// Fold one watch event into a session.
///
/// Known documents are re-read in place. Manifest changes, removals and
/// new source files change the project set, so they reload the session.
pub async fn apply_event(
    registry: &SessionRegistry,
    session: &SessionId,
    event: &WatchEvent,
) -> Result<WatchOutcome, EngineError> {
    let path = event.path();
    if should_ignore_path(path) || registry.is_paused(session)? {
        return Ok(WatchOutcome::Skipped);
    }

    let known = registry.find(session)?.model().document(path).is_some();
    let refresh = match event {
        _ if is_manifest(path) => true,
        WatchEvent::Removed(_) => known,
        WatchEvent::Created(_) | WatchEvent::Modified(_) if known => {
            let invalidated = registry.reload_document(session, path).await?;
            return Ok(WatchOutcome::Reloaded(invalidated));
        }
        WatchEvent::Created(_) | WatchEvent::Modified(_) => is_source_file(path),
    };

    if refresh {
        registry.refresh_session(session).await?;
        Ok(WatchOutcome::Refreshed)
    } else {
        Ok(WatchOutcome::Skipped)
    }
}

/// Watcher service bound to one session
pub struct SessionWatcher {
    watcher: FileWatcher,
    registry: Arc<SessionRegistry>,
    session: SessionId,
    updates: Option<mpsc::UnboundedSender<WatchOutcome>>,
}

impl SessionWatcher {
    /// Start watching the root of an existing session
    pub fn start(registry: Arc<SessionRegistry>, session: SessionId) -> Result<Self> {
        let root = registry.find(&session)?.root.clone();
        let root = std::fs::canonicalize(&root).unwrap_or(root);

        let mut watcher = FileWatcher::new(&root)?;
        watcher.watch_directory(&root)?;
        info!("Started watching session {} at {:?}", session, root);

        Ok(Self {
            watcher,
            registry,
            session,
            updates: None,
        })
    }

    /// Report every event that changed the session on `tx`
    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<WatchOutcome>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Process file system events until cancelled or the session ends
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = self.watcher.event_receiver().recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let outcome = match apply_event(&self.registry, &self.session, &event).await {
                Ok(WatchOutcome::Skipped) => {
                    debug!("Skipped {:?}", event);
                    continue;
                }
                Ok(outcome) => outcome,
                Err(EngineError::SessionNotFound(_)) => {
                    info!("Session {} ended, stopping watcher", self.session);
                    break;
                }
                Err(e) => {
                    warn!("Failed to apply {:?}: {}", event, e);
                    continue;
                }
            };

            match &outcome {
                WatchOutcome::Reloaded(projects) => {
                    info!("{:?} invalidated {} projects", event.path(), projects.len());
                }
                _ => info!("{:?} changed the project set, session reloaded", event.path()),
            }
            if let Some(tx) = &self.updates {
                // No receiver just means nobody is listening any more
                let _ = tx.send(outcome);
            }
        }

        let root = self.watcher.root_path().to_path_buf();
        if self.watcher.is_watching(&root) {
            self.watcher.unwatch(&root)?;
        }
        Ok(())
    }
}

fn is_manifest(path: &Path) -> bool {
    path.file_name().and_then(|s| s.to_str()) == Some(MANIFEST_FILE)
}

/// Check if a file can hold outline source
fn is_source_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|s| s.to_str()), Some("arb"))
}

/// Check if a path should be ignored (e.g., target/, .git/, etc.)
fn should_ignore_path(path: &Path) -> bool {
    if path
        .file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| name.ends_with(".arbor-tmp"))
    {
        return true;
    }
    path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some("target" | ".git" | "node_modules")
        )
    })
}
