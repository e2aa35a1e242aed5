// src/imap/mod.rs

//! The connection factory: dialing the upstream IMAP server, performing the
//! login handshake, and the narrow connection trait the session pool owns.
//!
//! Only the wire plumbing the factory itself needs lives here (a CRLF line
//! codec and a tagged command exchange). Mailbox and message parsing is the
//! business of whoever issues the commands.

mod client;
mod codec;
mod stream;

pub use client::{ImapClient, ImapConnector};
pub use codec::LineCodec;
pub use stream::AnyStream;

use crate::core::TidemailError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How the transport connection to the mail server is established.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Cleartext TCP.
    Plain,
    /// TLS with certificate verification against the webpki root store.
    Tls,
    /// TLS without certificate verification. For test setups only.
    TlsInsecure,
}

/// A live, authenticated mail-protocol connection.
///
/// The session pool owns exactly one of these per logged-in user and hands it
/// out to one request at a time. Implementations are not required to be safe
/// for concurrent use; the pool's serialization guarantee covers that.
#[async_trait]
pub trait MailConnection: Send + std::fmt::Debug {
    /// A cheap liveness probe. An error means the connection is unusable.
    async fn noop(&mut self) -> Result<(), TidemailError>;

    /// Terminates the protocol session. The connection is unusable afterwards.
    async fn logout(&mut self) -> Result<(), TidemailError>;

    /// Runs one protocol command and returns the untagged response lines.
    async fn exec(&mut self, command: &str) -> Result<Vec<String>, TidemailError>;
}

/// Produces fresh authenticated connections. The pool keeps one of these to
/// re-establish a session whose connection died underneath the user.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(
        &self,
        username: &str,
        credential: &str,
    ) -> Result<Box<dyn MailConnection>, TidemailError>;
}
