//! Background sweeps: cache entry age and session idleness

use std::sync::Arc;
use std::time::Duration;

use arbor_cache::CompilationCache;
use arbor_core::EngineConfig;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles of the running sweep tasks.
pub struct Maintenance {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Maintenance {
    pub fn start(
        cache: CompilationCache,
        registry: Arc<SessionRegistry>,
        config: &EngineConfig,
    ) -> Self {
        let token = CancellationToken::new();
        let max_age = config.cache.max_entry_age();
        let idle_timeout = config.sessions.idle_timeout();

        let handles = vec![
            spawn_periodic(token.clone(), config.cache.sweep_interval(), move || {
                cache.sweep_expired(max_age);
            }),
            spawn_periodic(token.clone(), config.sessions.idle_sweep_interval(), move || {
                registry.sweep_idle(idle_timeout);
            }),
        ];
        tracing::debug!("Started {} maintenance tasks", handles.len());

        Maintenance { token, handles }
    }

    /// Cancel the sweeps and wait for them to stop.
    pub async fn shutdown(self) {
        self.token.cancel();
        let drain = futures::future::join_all(self.handles);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            tracing::warn!("Maintenance tasks did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }
    }
}

/// Run `tick` every `period` until `token` is cancelled. The first run
/// happens one period after start.
fn spawn_periodic<F>(token: CancellationToken, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => tick(),
            }
        }
    })
}
