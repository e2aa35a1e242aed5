// src/imap/client.rs

//! The IMAP client side of the connection factory: dialing (with optional
//! TLS), the login handshake, and the tagged command exchange.

use super::codec::LineCodec;
use super::stream::AnyStream;
use super::{ConnectionFactory, MailConnection, TransportMode};
use crate::config::ImapConfig;
use crate::core::TidemailError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;

/// Opens transport connections to one configured IMAP endpoint and performs
/// the protocol-level login handshake.
pub struct ImapConnector {
    host: String,
    port: u16,
    mode: TransportMode,
    dial_timeout: Duration,
    tls: Option<TlsConnector>,
}

impl ImapConnector {
    pub fn new(imap: &ImapConfig, dial_timeout: Duration) -> Self {
        Self {
            host: imap.host.clone(),
            port: imap.port,
            mode: imap.mode,
            dial_timeout,
            tls: build_tls_connector(imap.mode),
        }
    }

    /// Opens a transport connection and consumes the server greeting. The
    /// returned client is connected but not yet authenticated.
    pub async fn dial(&self) -> Result<ImapClient, TidemailError> {
        let tcp = timeout(
            self.dial_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TidemailError::Timeout(format!("dial {}:{}", self.host, self.port)))?
        .map_err(|e| TidemailError::Dial(format!("{}:{}: {e}", self.host, self.port)))?;

        let stream = match (self.mode, &self.tls) {
            (TransportMode::Plain, _) => AnyStream::Tcp(tcp),
            (_, Some(connector)) => {
                let server_name = ServerName::try_from(self.host.clone()).map_err(|e| {
                    TidemailError::Tls(format!("invalid server name '{}': {e}", self.host))
                })?;
                let tls = timeout(self.dial_timeout, connector.connect(server_name, tcp))
                    .await
                    .map_err(|_| TidemailError::Timeout("TLS handshake".to_string()))?
                    .map_err(|e| TidemailError::Tls(e.to_string()))?;
                AnyStream::Tls(Box::new(tls))
            }
            (_, None) => {
                return Err(TidemailError::Internal(
                    "TLS mode configured but no TLS connector was built".to_string(),
                ));
            }
        };

        ImapClient::greet(stream, self.dial_timeout).await
    }
}

#[async_trait]
impl ConnectionFactory for ImapConnector {
    /// Dials and authenticates in one step, bounded by the dial timeout.
    async fn connect(
        &self,
        username: &str,
        credential: &str,
    ) -> Result<Box<dyn MailConnection>, TidemailError> {
        let client = self.dial().await?;
        let client = timeout(self.dial_timeout, client.login(username, credential))
            .await
            .map_err(|_| TidemailError::Timeout("login round trip".to_string()))??;
        Ok(Box::new(client))
    }
}

/// Builds the TLS client configuration for the given transport mode, once,
/// at connector construction time.
fn build_tls_connector(mode: TransportMode) -> Option<TlsConnector> {
    let config = match mode {
        TransportMode::Plain => return None,
        TransportMode::Tls => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        TransportMode::TlsInsecure => rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier::new()))
            .with_no_client_auth(),
    };
    Some(TlsConnector::from(Arc::new(config)))
}

/// The outcome of one tagged command exchange.
struct Reply {
    ok: bool,
    text: String,
    untagged: Vec<String>,
}

/// One IMAP connection speaking the tagged command/response exchange over a
/// framed CRLF line stream.
#[derive(Debug)]
pub struct ImapClient {
    framed: Framed<AnyStream, LineCodec>,
    tag_seq: u64,
}

impl ImapClient {
    /// Wraps a fresh transport stream and consumes the server greeting.
    async fn greet(stream: AnyStream, greet_timeout: Duration) -> Result<Self, TidemailError> {
        let mut framed = Framed::new(stream, LineCodec);
        let greeting = timeout(greet_timeout, framed.next())
            .await
            .map_err(|_| TidemailError::Timeout("waiting for server greeting".to_string()))?
            .ok_or_else(|| TidemailError::Dial("server closed the connection".to_string()))??;

        if greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH") {
            Ok(Self { framed, tag_seq: 0 })
        } else if greeting.starts_with("* BYE") {
            Err(TidemailError::Dial(format!(
                "server refused the connection: {greeting}"
            )))
        } else {
            Err(TidemailError::Protocol(format!(
                "unexpected greeting: {greeting}"
            )))
        }
    }

    /// Authenticates the connection. On a rejected login the half-open
    /// connection is torn down before the error is reported; it must never
    /// reach the pool.
    pub async fn login(
        mut self,
        username: &str,
        credential: &str,
    ) -> Result<Self, TidemailError> {
        let command = format!("LOGIN {} {}", quote(username)?, quote(credential)?);
        let reply = self.exchange(&command).await?;
        if reply.ok {
            return Ok(self);
        }

        debug!("login rejected for user {username}: {}", reply.text);
        if let Err(e) = self.run_logout().await {
            debug!("teardown after rejected login failed: {e}");
        }
        Err(TidemailError::AuthFailed)
    }

    /// Sends one tagged command and collects lines until the matching tagged
    /// completion arrives. `NO` is reported as a non-ok reply; `BAD` is a
    /// protocol error.
    async fn exchange(&mut self, command: &str) -> Result<Reply, TidemailError> {
        self.tag_seq += 1;
        let tag = format!("t{:04}", self.tag_seq);

        self.framed.send(format!("{tag} {command}")).await?;

        let mut untagged = Vec::new();
        loop {
            let line = self
                .framed
                .next()
                .await
                .ok_or_else(|| TidemailError::Protocol("connection closed mid-command".to_string()))??;

            if let Some(rest) = line.strip_prefix(&tag)
                && rest.starts_with(' ')
            {
                let status = rest.trim_start();
                if let Some(text) = status.strip_prefix("OK") {
                    return Ok(Reply {
                        ok: true,
                        text: text.trim().to_string(),
                        untagged,
                    });
                }
                if let Some(text) = status.strip_prefix("NO") {
                    return Ok(Reply {
                        ok: false,
                        text: text.trim().to_string(),
                        untagged,
                    });
                }
                return Err(TidemailError::Protocol(format!(
                    "server rejected command as malformed: {line}"
                )));
            }

            if line.starts_with('+') {
                // Continuation requests only follow literals, which this
                // client never sends.
                return Err(TidemailError::Protocol(
                    "unexpected continuation request".to_string(),
                ));
            }

            untagged.push(line);
        }
    }

    async fn run_logout(&mut self) -> Result<(), TidemailError> {
        let reply = self.exchange("LOGOUT").await?;
        if reply.ok {
            Ok(())
        } else {
            Err(TidemailError::Protocol(format!(
                "LOGOUT failed: {}",
                reply.text
            )))
        }
    }
}

#[async_trait]
impl MailConnection for ImapClient {
    async fn noop(&mut self) -> Result<(), TidemailError> {
        let reply = self.exchange("NOOP").await?;
        if reply.ok {
            Ok(())
        } else {
            Err(TidemailError::Protocol(format!(
                "NOOP failed: {}",
                reply.text
            )))
        }
    }

    async fn logout(&mut self) -> Result<(), TidemailError> {
        self.run_logout().await
    }

    async fn exec(&mut self, command: &str) -> Result<Vec<String>, TidemailError> {
        let reply = self.exchange(command).await?;
        if reply.ok {
            Ok(reply.untagged)
        } else {
            Err(TidemailError::Protocol(format!(
                "command failed: {}",
                reply.text
            )))
        }
    }
}

/// Renders a quoted string, escaping backslash and double quote. CR and LF
/// cannot appear in a quoted string at all.
fn quote(s: &str) -> Result<String, TidemailError> {
    if s.contains(['\r', '\n']) {
        return Err(TidemailError::InvalidRequest(
            "credentials may not contain line breaks".to_string(),
        ));
    }
    Ok(format!(
        "\"{}\"",
        s.replace('\\', "\\\\").replace('"', "\\\"")
    ))
}

/// Certificate verifier that accepts any certificate. Only reachable through
/// the `imaps+insecure` URL scheme.
#[derive(Debug)]
struct NoCertVerifier(rustls::crypto::CryptoProvider);

impl NoCertVerifier {
    fn new() -> Self {
        Self(rustls::crypto::aws_lc_rs::default_provider())
    }
}

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
