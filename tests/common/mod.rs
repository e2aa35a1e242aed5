// tests/common/mod.rs

//! Shared mock connection and factory for exercising the session pool
//! without a real mail server.
//!
//! **Note:** Not every helper is used by every test file; they are available
//! for use when needed.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidemail::TidemailError;
use tidemail::config::SessionConfig;
use tidemail::imap::{ConnectionFactory, MailConnection};

/// Observable state of one mock connection, shared with the test body.
#[derive(Debug)]
pub struct ConnProbe {
    pub alive: AtomicBool,
    pub hung: AtomicBool,
    pub noops: AtomicUsize,
    pub logged_out: AtomicBool,
}

impl ConnProbe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            hung: AtomicBool::new(false),
            noops: AtomicUsize::new(0),
            logged_out: AtomicBool::new(false),
        })
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Makes every subsequent call on the connection block forever, like a
    /// peer that accepted the socket and then went silent.
    pub fn hang(&self) {
        self.hung.store(true, Ordering::SeqCst);
    }

    pub fn noop_count(&self) -> usize {
        self.noops.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: u32,
    pub probe: Arc<ConnProbe>,
}

#[async_trait]
impl MailConnection for MockConnection {
    async fn noop(&mut self) -> Result<(), TidemailError> {
        self.probe.noops.fetch_add(1, Ordering::SeqCst);
        if self.probe.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.probe.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TidemailError::Protocol("connection reset".to_string()))
        }
    }

    async fn logout(&mut self) -> Result<(), TidemailError> {
        if self.probe.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.probe.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exec(&mut self, _command: &str) -> Result<Vec<String>, TidemailError> {
        if !self.probe.alive.load(Ordering::SeqCst) {
            return Err(TidemailError::Protocol("connection reset".to_string()));
        }
        Ok(vec![format!("* ID {}", self.id)])
    }
}

/// Factory that mints mock connections and records every connect attempt.
pub struct MockFactory {
    next_id: AtomicU32,
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
    pub probes: Mutex<Vec<Arc<ConnProbe>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(0),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            probes: Mutex::new(Vec::new()),
        })
    }

    /// Mints a connection directly, the way a login handler would before
    /// handing it to the pool.
    pub fn new_conn(&self) -> (Box<dyn MailConnection>, Arc<ConnProbe>) {
        let probe = ConnProbe::new();
        self.probes.lock().unwrap().push(probe.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        (
            Box::new(MockConnection {
                id,
                probe: probe.clone(),
            }),
            probe,
        )
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(
        &self,
        _username: &str,
        _credential: &str,
    ) -> Result<Box<dyn MailConnection>, TidemailError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TidemailError::Dial("mock server unreachable".to_string()));
        }
        Ok(self.new_conn().0)
    }
}

/// Pool tunables scaled down so lifecycle tests finish in milliseconds.
/// Probing is effectively disabled; tests that exercise repair set
/// `probe_after` to zero themselves.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        idle_timeout: Duration::from_millis(200),
        reap_interval: Duration::from_millis(25),
        probe_after: Duration::from_secs(3600),
        acquire_timeout: Duration::from_secs(1),
        dial_timeout: Duration::from_secs(1),
        max_sessions: 8,
    }
}
