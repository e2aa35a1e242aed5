// src/pool/mod.rs

//! The session and connection pool.
//!
//! Maps opaque bearer tokens to live, authenticated mail connections so that
//! one single-threaded protocol session can be shared safely across many
//! concurrent, stateless HTTP requests. Same-token access is strictly
//! serialized through a per-entry async mutex; distinct tokens never block
//! each other. The table itself is a `DashMap`, so inserts and removals never
//! wait on a long-running per-session operation.

mod reaper;
mod token;

pub use reaper::ReaperTask;
pub use token::new_token;

use crate::config::SessionConfig;
use crate::core::metrics;
use crate::core::TidemailError;
use crate::imap::{ConnectionFactory, MailConnection};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The mutable half of a session entry, protected by the per-entry mutex.
struct EntryInner {
    conn: Box<dyn MailConnection>,
    last_active: Instant,
    /// Set under the lock when the entry is deleted or reaped. A request that
    /// was already queued on the mutex when that happened must observe the
    /// session as expired instead of touching a logged-out connection.
    closed: bool,
}

/// One pooled session: the cached credentials for repair plus the locked
/// connection state. The credentials never leave this module.
#[derive(Clone)]
struct SessionEntry {
    username: String,
    credential: String,
    inner: Arc<Mutex<EntryInner>>,
}

/// Exclusive access to one pooled session for the duration of a request.
///
/// Dropping the guard releases the session to the next queued request, on
/// every exit path of the holder, including early returns on error.
pub struct SessionGuard {
    username: String,
    inner: OwnedMutexGuard<EntryInner>,
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl SessionGuard {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The live connection. Exclusively held until the guard is dropped.
    pub fn conn(&mut self) -> &mut dyn MailConnection {
        self.inner.conn.as_mut()
    }
}

/// The concurrency-safe table of live sessions.
///
/// Explicitly constructed and injectable; tests build isolated instances with
/// their own factory and tunables. The background [`ReaperTask`] is started
/// separately by the server.
pub struct SessionPool {
    entries: DashMap<String, SessionEntry>,
    factory: Arc<dyn ConnectionFactory>,
    config: SessionConfig,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: SessionConfig) -> Self {
        Self {
            entries: DashMap::new(),
            factory,
            config,
        }
    }

    /// Registers a freshly authenticated connection and returns the opaque
    /// token that resolves to it. Ownership of the connection transfers to
    /// the pool.
    pub fn put(
        &self,
        conn: Box<dyn MailConnection>,
        username: &str,
        credential: &str,
    ) -> Result<String, TidemailError> {
        // Check-then-insert: concurrent logins racing this check can overshoot
        // the cap by the number of in-flight puts. The cap is a coarse
        // resource limit, not an exact quota.
        if self.entries.len() >= self.config.max_sessions {
            warn!(
                "session pool is full ({} entries); rejecting login for {}",
                self.config.max_sessions, username
            );
            return Err(TidemailError::PoolExhausted);
        }

        // The token space makes a collision vanishingly unlikely, but an
        // existing entry must never be silently overwritten.
        let mut token = token::new_token()?;
        while self.entries.contains_key(&token) {
            token = token::new_token()?;
        }

        let entry = SessionEntry {
            username: username.to_string(),
            credential: credential.to_string(),
            inner: Arc::new(Mutex::new(EntryInner {
                conn,
                last_active: Instant::now(),
                closed: false,
            })),
        };
        self.entries.insert(token.clone(), entry);
        metrics::ACTIVE_SESSIONS.set(self.entries.len() as f64);
        debug!("registered session for user {username}");
        Ok(token)
    }

    /// Resolves a token to exclusive access to its live connection.
    ///
    /// Blocks (bounded by `acquire_timeout`) while another request holds the
    /// same session. If the connection has idled past `probe_after` it is
    /// probed first, and repaired with exactly one re-authentication attempt
    /// if the probe fails; a failed repair removes the entry. A connection
    /// known to be dead is never returned.
    pub async fn get(&self, token: &str) -> Result<SessionGuard, TidemailError> {
        let entry = match self.entries.get(token) {
            Some(e) => e.value().clone(),
            None => return Err(TidemailError::SessionExpired),
        };
        // The map shard reference is gone here; only the entry Arc is held
        // while awaiting the per-entry lock.

        let mut guard = timeout(self.config.acquire_timeout, entry.inner.clone().lock_owned())
            .await
            .map_err(|_| TidemailError::Timeout("waiting for session lock".to_string()))?;

        if guard.closed {
            return Err(TidemailError::SessionExpired);
        }

        if guard.last_active.elapsed() >= self.config.probe_after {
            // A peer that accepted the socket and then went silent must not
            // stall the request; the probe is bounded like the dial it may
            // trigger, and a timed-out probe counts as a dead connection.
            let probe = match timeout(self.config.dial_timeout, guard.conn.noop()).await {
                Ok(result) => result,
                Err(_) => Err(TidemailError::Timeout("liveness probe".to_string())),
            };
            if let Err(probe_err) = probe {
                debug!(
                    "liveness probe failed for user {}: {probe_err}",
                    entry.username
                );
                match self.factory.connect(&entry.username, &entry.credential).await {
                    Ok(fresh) => {
                        info!("re-established connection for user {}", entry.username);
                        metrics::SESSIONS_REPAIRED_TOTAL.inc();
                        guard.conn = fresh;
                    }
                    Err(reconnect_err) => {
                        guard.closed = true;
                        drop(guard);
                        self.remove(token);
                        metrics::SESSIONS_BROKEN_TOTAL.inc();
                        warn!(
                            "session for user {} is broken and was removed: {reconnect_err}",
                            entry.username
                        );
                        return Err(TidemailError::SessionBroken(reconnect_err.to_string()));
                    }
                }
            }
        }

        guard.last_active = Instant::now();
        Ok(SessionGuard {
            username: entry.username,
            inner: guard,
        })
    }

    /// Removes the entry (if present) and logs the connection out,
    /// best-effort. A logout failure is logged, never surfaced.
    pub async fn delete(&self, token: &str) {
        let Some(entry) = self.remove(token) else {
            return;
        };

        // The entry is already unmapped, so at most the current holder still
        // references it. If that holder does not release in time, dropping
        // the last Arc closes the transport anyway.
        match timeout(self.config.acquire_timeout, entry.inner.lock()).await {
            Ok(mut inner) => {
                inner.closed = true;
                match timeout(self.config.dial_timeout, inner.conn.logout()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("logout for user {} failed: {e}", entry.username),
                    Err(_) => warn!("logout for user {} timed out", entry.username),
                }
                debug!("session deleted for user {}", entry.username);
            }
            Err(_) => warn!(
                "session for user {} was still busy at delete; skipping logout",
                entry.username
            ),
        }
    }

    /// Logs out and drops every remaining session. Called once at shutdown.
    pub async fn shutdown(&self) {
        let tokens: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for token in tokens {
            self.delete(&token).await;
        }
        info!("session pool drained");
    }

    /// The number of live sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&self, token: &str) -> Option<SessionEntry> {
        let removed = self.entries.remove(token).map(|(_, entry)| entry);
        metrics::ACTIVE_SESSIONS.set(self.entries.len() as f64);
        removed
    }
}
