/*
 * broker.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Raven, a mail-retrieval and local-delivery server.
 *
 * Raven is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Raven is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Raven.  If not, see <http://www.gnu.org/licenses/>.
 */

//! SASL authentication broker: a Unix-socket line server that adapts PLAIN/LOGIN
//! onto an HTTPS credential-validation endpoint. One task per connection; no
//! shared mutable state across connections beyond the validation URL.

use crate::sasl::{credential_client, decode_login_response, encode_prompt, parse_plain_credentials, SaslMechanism};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Bounded wait for in-flight connection handlers to finish once shutdown is requested.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct BrokerConfig {
    pub credential_validation_url: String,
    pub default_auth_domain: Option<String>,
}

pub struct SaslBroker {
    socket_path: PathBuf,
    config: BrokerConfig,
    shutdown: Arc<Notify>,
    handlers: Mutex<JoinSet<()>>,
}

impl SaslBroker {
    pub fn new(socket_path: PathBuf, config: BrokerConfig) -> Self {
        Self { socket_path, config, shutdown: Arc::new(Notify::new()), handlers: Mutex::new(JoinSet::new()) }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "sasl broker listening");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let config = self.config.clone();
                    self.handlers.lock().await.spawn(async move {
                        if let Err(e) = handle_connection(stream, config).await {
                            debug!(error = %e, "sasl broker connection ended");
                        }
                    });
                }
            }
        }

        self.drain_handlers().await;
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    /// Waits for in-flight connection handlers to finish, up to `SHUTDOWN_DRAIN_TIMEOUT`;
    /// any still running past that are aborted rather than leaked.
    async fn drain_handlers(&self) {
        let mut handlers = self.handlers.lock().await;
        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("sasl broker shutdown timed out waiting for in-flight connections; aborting the rest");
            handlers.abort_all();
            while handlers.join_next().await.is_some() {}
        }
    }

    /// Idempotent: a second call while already shut down is a no-op.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

async fn handle_connection(stream: UnixStream, config: BrokerConfig) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    macro_rules! read_line {
        () => {{
            line.clear();
            let n = timeout(IDLE_TIMEOUT, reader.read_line(&mut line))
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "idle connection"))??;
            if n == 0 {
                return Ok(());
            }
            line.trim_end_matches(['\r', '\n']).to_string()
        }};
    }

    let handshake = read_line!();
    let mut parts = handshake.split('\t');
    if parts.next() != Some("VERSION") {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected VERSION"));
    }
    write_half.write_all(b"VERSION\t1\t2\n").await?;

    let cpid = read_line!();
    if !cpid.starts_with("CPID\t") {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected CPID"));
    }

    write_half.write_all(b"MECH\tPLAIN\tplaintext\n").await?;
    write_half.write_all(b"MECH\tLOGIN\tplaintext\n").await?;
    write_half.write_all(b"DONE\n").await?;

    loop {
        let frame = read_line!();
        let mut fields = frame.split('\t');
        match fields.next() {
            Some("AUTH") => {
                let id = fields.next().unwrap_or("").to_string();
                let mech_name = fields.next().unwrap_or("");
                let mechanism = match SaslMechanism::from_name(mech_name) {
                    Some(m) => m,
                    None => {
                        send_fail(&mut write_half, &id, "unsupported mechanism").await?;
                        continue;
                    }
                };
                let mut resp = None;
                for field in fields {
                    if let Some(r) = field.strip_prefix("resp=") {
                        resp = Some(r.to_string());
                    }
                }
                handle_auth(&mut reader, &mut write_half, &config, &id, mechanism, resp, &mut line).await?;
            }
            Some(other) => {
                warn!(frame = other, "unexpected sasl broker frame");
            }
            None => {}
        }
    }
}

async fn handle_auth(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    config: &BrokerConfig,
    id: &str,
    mechanism: SaslMechanism,
    initial_resp: Option<String>,
    line: &mut String,
) -> std::io::Result<()> {
    match mechanism {
        SaslMechanism::Plain => {
            let resp = match initial_resp {
                Some(r) => r,
                None => {
                    write_half.write_all(format!("CONT\t{}\n", id).as_bytes()).await?;
                    read_continuation(reader, line).await?
                }
            };
            match parse_plain_credentials(&resp) {
                Ok((_authzid, authcid, password)) => {
                    finish_validation(write_half, config, id, &authcid, &password).await
                }
                Err(_) => send_fail(write_half, id, "malformed PLAIN response").await,
            }
        }
        SaslMechanism::Login => {
            // The full multi-exchange form is not implemented: the broker always prompts
            // once for Username: and then fails, since gathering both username and password
            // would require holding per-connection state across two CONT round-trips that
            // nothing here currently drives from the IMAP/LMTP session side.
            write_half
                .write_all(format!("CONT\t{}\t{}\n", id, encode_prompt("Username:")).as_bytes())
                .await?;
            let _username_b64 = read_continuation(reader, line).await?;
            send_fail(write_half, id, "LOGIN mechanism not fully implemented").await
        }
    }
}

async fn read_continuation(
    reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>,
    line: &mut String,
) -> std::io::Result<String> {
    line.clear();
    let n = timeout(IDLE_TIMEOUT, reader.read_line(line))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "idle connection"))??;
    if n == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"));
    }
    let frame = line.trim_end_matches(['\r', '\n']);
    let mut fields = frame.split('\t');
    if fields.next() != Some("CONT") {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected CONT"));
    }
    let _id = fields.next();
    Ok(fields.next().unwrap_or("").to_string())
}

async fn finish_validation(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    config: &BrokerConfig,
    id: &str,
    authcid: &str,
    password: &str,
) -> std::io::Result<()> {
    let email = normalize_authcid(authcid, config.default_auth_domain.as_deref());
    let ok = credential_client::validate(&config.credential_validation_url, &email, password).await;
    if ok {
        write_half.write_all(format!("OK\t{}\tuser={}\n", id, email).as_bytes()).await
    } else {
        send_fail(write_half, id, "invalid credentials").await
    }
}

async fn send_fail(write_half: &mut tokio::net::unix::OwnedWriteHalf, id: &str, reason: &str) -> std::io::Result<()> {
    write_half.write_all(format!("FAIL\t{}\treason={}\n", id, reason).as_bytes()).await
}

/// Appends the configured default domain if `authcid` has no `@`.
fn normalize_authcid(authcid: &str, default_domain: Option<&str>) -> String {
    if authcid.contains('@') {
        authcid.to_string()
    } else if let Some(domain) = default_domain {
        format!("{}@{}", authcid, domain)
    } else {
        authcid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_default_domain_when_missing() {
        assert_eq!(normalize_authcid("alice", Some("example.com")), "alice@example.com");
        assert_eq!(normalize_authcid("alice@other.com", Some("example.com")), "alice@other.com");
        assert_eq!(normalize_authcid("alice", None), "alice");
    }
}
