// src/pool/reaper.rs

use super::{SessionEntry, SessionPool};
use crate::core::metrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info};

/// A task that periodically evicts sessions whose last activity exceeds the
/// idle timeout, logging out their connections.
///
/// Eviction is silent from the client's perspective; the next `get` on an
/// evicted token simply reports the session as expired.
pub struct ReaperTask {
    pool: Arc<SessionPool>,
}

impl ReaperTask {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    /// Runs the main loop for the reaper task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Session reaper started. Scan interval: {:?}, idle timeout: {:?}.",
            self.pool.config.reap_interval, self.pool.config.idle_timeout
        );
        let mut interval = tokio::time::interval(self.pool.config.reap_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = self.reap_idle().await;
                    if reaped > 0 {
                        debug!("session reaper evicted {} idle sessions", reaped);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Session reaper shutting down.");
                    return;
                }
            }
        }
    }

    /// Scans the pool once and evicts every idle entry that is not currently
    /// serving a request.
    async fn reap_idle(&self) -> usize {
        let idle_timeout = self.pool.config.idle_timeout;
        let candidates: Vec<(String, SessionEntry)> = self
            .pool
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut reaped = 0;
        for (token, entry) in candidates {
            // A busy session is never evicted mid-request; it will be
            // reconsidered on the next scan.
            let Ok(mut inner) = entry.inner.clone().try_lock_owned() else {
                continue;
            };
            if inner.closed || inner.last_active.elapsed() < idle_timeout {
                continue;
            }

            inner.closed = true;
            self.pool.remove(&token);
            // The entry lock is held only for the logout call itself, and a
            // dead peer must not stall the scan.
            match timeout(self.pool.config.dial_timeout, inner.conn.logout()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("logout during reap for user {} failed: {e}", entry.username)
                }
                Err(_) => debug!("logout during reap for user {} timed out", entry.username),
            }
            drop(inner);

            metrics::SESSIONS_REAPED_TOTAL.inc();
            info!("reaped idle session for user {}", entry.username);
            reaped += 1;
        }
        reaped
    }
}
