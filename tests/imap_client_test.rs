// tests/imap_client_test.rs

//! Connection factory behavior against an in-process scripted IMAP server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidemail::TidemailError;
use tidemail::config::ImapConfig;
use tidemail::imap::{ConnectionFactory, ImapConnector, MailConnection, TransportMode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// A single-connection fake IMAP server. It greets, answers LOGIN (password
/// "secret" succeeds), NOOP, EXAMINE, and LOGOUT, and records every command
/// line it receives.
async fn spawn_fake_server(log: Arc<Mutex<Vec<String>>>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"* OK fake IMAP server ready\r\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log.lock().unwrap().push(line.clone());
            let Some((tag, rest)) = line.split_once(' ') else {
                continue;
            };

            if rest.starts_with("LOGOUT") {
                let reply = format!("* BYE signing off\r\n{tag} OK LOGOUT completed\r\n");
                write_half.write_all(reply.as_bytes()).await.unwrap();
                break;
            }

            let reply = if rest.starts_with("LOGIN") {
                if rest.ends_with("\"secret\"") {
                    format!("{tag} OK LOGIN completed\r\n")
                } else {
                    format!("{tag} NO [AUTHENTICATIONFAILED] LOGIN failed\r\n")
                }
            } else if rest.starts_with("NOOP") {
                format!("{tag} OK NOOP completed\r\n")
            } else if rest.starts_with("EXAMINE") {
                format!("* 3 EXISTS\r\n* 0 RECENT\r\n{tag} OK [READ-ONLY] EXAMINE completed\r\n")
            } else {
                format!("{tag} BAD unknown command\r\n")
            };
            write_half.write_all(reply.as_bytes()).await.unwrap();
        }
    });

    addr
}

fn connector_for(addr: SocketAddr) -> ImapConnector {
    ImapConnector::new(
        &ImapConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            mode: TransportMode::Plain,
        },
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_connect_with_valid_credentials() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_fake_server(log.clone()).await;

    let connector = connector_for(addr);
    let mut conn = connector.connect("alice", "secret").await.unwrap();
    conn.noop().await.unwrap();
    conn.logout().await.unwrap();

    let seen = log.lock().unwrap();
    assert!(seen[0].contains("LOGIN \"alice\" \"secret\""));
    assert!(seen[1].contains("NOOP"));
    assert!(seen[2].contains("LOGOUT"));
}

#[tokio::test]
async fn test_rejected_login_reports_auth_failure_and_hangs_up() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_fake_server(log.clone()).await;

    let connector = connector_for(addr);
    let err = connector.connect("alice", "wrong").await.unwrap_err();
    assert_eq!(err, TidemailError::AuthFailed);

    // The half-open connection must be torn down, not leaked: the server
    // sees a LOGOUT right after the failed LOGIN.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = log.lock().unwrap();
    assert!(seen[0].contains("LOGIN"));
    assert!(seen[1].contains("LOGOUT"));
}

#[tokio::test]
async fn test_exec_returns_untagged_lines() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_fake_server(log).await;

    let connector = connector_for(addr);
    let mut conn = connector.connect("alice", "secret").await.unwrap();
    let untagged = conn.exec("EXAMINE \"INBOX\"").await.unwrap();
    assert_eq!(
        untagged,
        vec!["* 3 EXISTS".to_string(), "* 0 RECENT".to_string()]
    );
}

#[tokio::test]
async fn test_malformed_command_is_a_protocol_error() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_fake_server(log).await;

    let connector = connector_for(addr);
    let mut conn = connector.connect("alice", "secret").await.unwrap();
    let err = conn.exec("FROBNICATE").await.unwrap_err();
    assert!(matches!(err, TidemailError::Protocol(_)));
}

#[tokio::test]
async fn test_dial_failure_is_reported_as_dial_error() {
    // Bind-then-drop guarantees a port nothing is listening on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = connector_for(addr);
    let err = connector.connect("alice", "secret").await.unwrap_err();
    assert!(matches!(err, TidemailError::Dial(_)));
}

#[tokio::test]
async fn test_bye_greeting_is_a_dial_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream
            .write_all(b"* BYE server shutting down\r\n")
            .await
            .unwrap();
    });

    let connector = connector_for(addr);
    let err = connector.connect("alice", "secret").await.unwrap_err();
    assert!(matches!(err, TidemailError::Dial(_)));
}
