/*
 * session.rs
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

//! Per-connection state machine: `NotAuthenticated -> Authenticated -> Selected`,
//! plus `Logout`. Reads one command line at a time, resolving `{N}`/`{N+}` literal
//! announcements by reading the announced byte count straight off the socket before
//! the rest of the line is tokenized.

use crate::error::{RavenError, Result};
use crate::imap::response::ResponseBatch;
use crate::imap::tokenizer::{self, Segment};
use crate::imap::{commands, ImapServerConfig};
use crate::net::MailStream;
use crate::store::{Store, User};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// RFC 3501 §5.4: 30 minutes with no command is a protocol violation a server may act on.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub enum SessionState {
    NotAuthenticated,
    Authenticated { user: User },
    Selected { user: User, mailbox: String, read_only: bool, last_exists: u32, last_recent: u32 },
    Logout,
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::NotAuthenticated | SessionState::Logout => None,
            SessionState::Authenticated { user } | SessionState::Selected { user, .. } => Some(user),
        }
    }
}

pub struct Session {
    // `BufReader<MailStream>` forwards `AsyncWrite` straight to the inner stream, so one
    // field serves both buffered reads and unbuffered writes. `Option` lets STARTTLS take
    // ownership of the inner stream, upgrade it, and put the rewrapped result back.
    stream: Option<BufReader<MailStream>>,
    pub store: Arc<Store>,
    tls_acceptor: Option<TlsAcceptor>,
    pub config: ImapServerConfig,
    pub state: SessionState,
    pub tls_active: bool,
    tls_pending_upgrade: bool,
}

impl Session {
    pub fn new(
        stream: MailStream,
        store: Arc<Store>,
        tls_acceptor: Option<TlsAcceptor>,
        config: ImapServerConfig,
    ) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            store,
            tls_acceptor,
            config,
            state: SessionState::NotAuthenticated,
            tls_active: false,
            tls_pending_upgrade: false,
        }
    }

    fn io(&mut self) -> &mut BufReader<MailStream> {
        self.stream.as_mut().expect("stream taken during upgrade")
    }

    pub async fn run(&mut self) -> Result<()> {
        let greeting = format!(
            "* OK [CAPABILITY {}] {} IMAP4rev1 ready\r\n",
            commands::capability_list(self),
            self.config.hostname
        );
        self.io().write_all(greeting.as_bytes()).await?;
        self.io().flush().await?;

        loop {
            let (tag, segments) = match self.read_command().await {
                Ok(Some(v)) => v,
                Ok(None) => break,
                Err(RavenError::Protocol(msg)) => {
                    let mut batch = ResponseBatch::new();
                    batch.tagged_bad("*", msg);
                    batch.write_to(self.io()).await?;
                    self.io().flush().await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let nodes = match tokenizer::parse(&segments) {
                Ok(n) => n,
                Err(e) => {
                    let mut batch = ResponseBatch::new();
                    batch.tagged_bad(&tag, e.to_string());
                    batch.write_to(self.io()).await?;
                    self.io().flush().await?;
                    continue;
                }
            };

            let batch = commands::dispatch(self, &tag, &nodes).await;
            batch.write_to(self.io()).await?;
            self.io().flush().await?;

            if matches!(self.state, SessionState::Logout) {
                break;
            }
            if self.tls_pending_upgrade {
                self.perform_tls_upgrade().await?;
            }
        }
        Ok(())
    }

    /// Reads one full command: the initial line plus any literal payloads it announces.
    /// Returns `Ok(None)` on a clean EOF (no partial command pending).
    async fn read_command(&mut self) -> Result<Option<(String, Vec<Segment>)>> {
        let mut segments = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = timeout(IDLE_TIMEOUT, self.io().read_line(&mut line))
                .await
                .map_err(|_| RavenError::TransientIO("idle timeout".to_string()))??;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            match tokenizer::literal_announcement(trimmed) {
                Some((size, non_sync, head)) => {
                    segments.push(Segment::Text(head.to_string()));
                    if !non_sync {
                        self.io().write_all(b"+ Ready for literal data\r\n").await?;
                        self.io().flush().await?;
                    }
                    let mut buf = vec![0u8; size];
                    self.io().read_exact(&mut buf).await?;
                    segments.push(Segment::Literal(buf));
                }
                None => {
                    segments.push(Segment::Text(trimmed.to_string()));
                    break;
                }
            }
        }
        let (tag, rest) = split_tag(&segments)?;
        if !rest.is_empty() {
            segments[0] = Segment::Text(rest);
        } else if matches!(segments.first(), Some(Segment::Text(_))) {
            segments.remove(0);
        }
        Ok(Some((tag, segments)))
    }

    pub fn request_tls_upgrade(&mut self) {
        self.tls_pending_upgrade = true;
    }

    /// Sends a bare SASL continuation line, for the AUTHENTICATE round-trip when
    /// the client gave no initial response (SASL-IR).
    pub async fn send_continuation(&mut self, text: &str) -> Result<()> {
        let line = if text.is_empty() { "+ \r\n".to_string() } else { format!("+ {}\r\n", text) };
        self.io().write_all(line.as_bytes()).await?;
        self.io().flush().await?;
        Ok(())
    }

    /// Reads one line as a SASL continuation response. The caller is responsible
    /// for recognizing a bare `*` as a client-initiated cancellation.
    pub async fn read_continuation(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = timeout(IDLE_TIMEOUT, self.io().read_line(&mut line))
            .await
            .map_err(|_| RavenError::TransientIO("idle timeout".to_string()))??;
        if n == 0 {
            return Err(RavenError::Protocol("connection closed during continuation".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn perform_tls_upgrade(&mut self) -> Result<()> {
        self.tls_pending_upgrade = false;
        let acceptor = self
            .tls_acceptor
            .clone()
            .ok_or_else(|| RavenError::Fatal("STARTTLS accepted with no TLS acceptor configured".to_string()))?;
        let plain = self.stream.take().expect("stream taken during upgrade");
        let inner = plain.into_inner();
        let upgraded = inner.upgrade(&acceptor).await?;
        self.stream = Some(BufReader::new(upgraded));
        self.tls_active = true;
        info!("imap connection upgraded to TLS");
        Ok(())
    }
}

fn split_tag(segments: &[Segment]) -> Result<(String, String)> {
    let Some(Segment::Text(first)) = segments.first() else {
        return Err(RavenError::Protocol("command must start with a tag".to_string()));
    };
    let trimmed = first.trim_start();
    let (tag, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    if tag.is_empty() {
        return Err(RavenError::Protocol("missing command tag".to_string()));
    }
    Ok((tag.to_string(), rest.trim_start().to_string()))
}
