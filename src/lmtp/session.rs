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

//! Per-connection LMTP state machine: `Greeted -> AfterLhlo -> HaveSender ->
//! HaveRecipient+ -> InData -> AfterData`. One session handles one message
//! transaction at a time; `MAIL`/`RCPT`/`DATA` reset back to `AfterLhlo` once
//! the per-recipient statuses for a transaction have been written.

use crate::error::{RavenError, Result};
use crate::lmtp::dot_unstuffer::DotUnstuffer;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{info, warn};

/// RFC 5321-style command timeout; this LMTP dialect uses the same figure for every
/// line outside DATA.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// DATA may legitimately take much longer: the client is streaming a whole message.
const DATA_TIMEOUT: Duration = Duration::from_secs(10 * 60);

enum State {
    Greeted,
    AfterLhlo,
    HaveSender,
    HaveRecipient,
}

#[derive(Clone)]
pub struct LmtpConfig {
    pub hostname: String,
    pub allowed_domains: Vec<String>,
    pub reject_unknown_user: bool,
    pub max_message_size: u64,
}

pub struct LmtpSession<S> {
    stream: BufReader<S>,
    store: Arc<Store>,
    config: LmtpConfig,
    state: State,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl<S> LmtpSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, store: Arc<Store>, config: LmtpConfig) -> Self {
        Self {
            stream: BufReader::new(stream),
            store,
            config,
            state: State::Greeted,
            sender: None,
            recipients: Vec::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let greeting = format!("220 {} LMTP ready\r\n", self.config.hostname);
        self.stream.write_all(greeting.as_bytes()).await?;
        self.stream.flush().await?;

        loop {
            let mut line = String::new();
            let n = match timeout(COMMAND_TIMEOUT, self.stream.read_line(&mut line)).await {
                Ok(res) => res?,
                Err(_) => {
                    let _ = self.stream.write_all(b"421 idle timeout\r\n").await;
                    return Ok(());
                }
            };
            if n == 0 {
                return Ok(());
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            if self.handle_line(line).await?.is_break() {
                return Ok(());
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> Result<ControlFlow> {
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let verb = verb.to_ascii_uppercase();
        match verb.as_str() {
            "LHLO" => self.cmd_lhlo(rest.trim()).await?,
            "MAIL" => self.cmd_mail(rest.trim()).await?,
            "RCPT" => self.cmd_rcpt(rest.trim()).await?,
            "DATA" => return self.cmd_data().await,
            "RSET" => self.cmd_rset().await?,
            "NOOP" => self.reply("250 OK").await?,
            "QUIT" => {
                self.reply("221 Bye").await?;
                return Ok(ControlFlow::Break);
            }
            _ => self.reply("500 unrecognized command").await?,
        }
        Ok(ControlFlow::Continue)
    }

    async fn reply(&mut self, text: &str) -> Result<()> {
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn cmd_lhlo(&mut self, domain: &str) -> Result<()> {
        if domain.is_empty() {
            return self.reply("501 LHLO requires a domain argument").await;
        }
        self.state = State::AfterLhlo;
        self.sender = None;
        self.recipients.clear();
        self.stream
            .write_all(format!("250-{}\r\n250-8BITMIME\r\n250 SIZE {}\r\n", self.config.hostname, self.config.max_message_size).as_bytes())
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn cmd_mail(&mut self, arg: &str) -> Result<()> {
        if matches!(self.state, State::Greeted) {
            return self.reply("503 send LHLO first").await;
        }
        let Some(addr) = parse_path(arg, "FROM:") else {
            return self.reply("501 malformed MAIL FROM").await;
        };
        self.sender = Some(addr);
        self.recipients.clear();
        self.state = State::HaveSender;
        self.reply("250 OK").await
    }

    async fn cmd_rcpt(&mut self, arg: &str) -> Result<()> {
        if !matches!(self.state, State::HaveSender | State::HaveRecipient) {
            return self.reply("503 need MAIL FROM before RCPT TO").await;
        }
        let Some(addr) = parse_path(arg, "TO:") else {
            return self.reply("501 malformed RCPT TO").await;
        };
        let Some((local_part, domain)) = addr.rsplit_once('@') else {
            return self.reply(&format!("550 5.1.3 <{}> Bad recipient address syntax", addr)).await;
        };
        if !self.config.allowed_domains.is_empty()
            && !self.config.allowed_domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
        {
            return self.reply(&format!("550 5.1.1 <{}> Relay denied", addr)).await;
        }
        if self.config.reject_unknown_user {
            let known = self.store.domain(domain).await.is_some()
                && self.store.find_user_by_email(&addr).await.is_some();
            let _ = local_part;
            if !known {
                return self.reply(&format!("550 5.1.1 <{}> User unknown", addr)).await;
            }
        }
        self.recipients.push(addr);
        self.state = State::HaveRecipient;
        self.reply("250 OK").await
    }

    async fn cmd_rset(&mut self) -> Result<()> {
        self.sender = None;
        self.recipients.clear();
        if !matches!(self.state, State::Greeted) {
            self.state = State::AfterLhlo;
        }
        self.reply("250 OK").await
    }

    async fn cmd_data(&mut self) -> Result<ControlFlow> {
        if self.recipients.is_empty() {
            self.reply("554 no valid recipients").await?;
            return Ok(ControlFlow::Continue);
        }
        self.reply("354 Start mail input; end with <CRLF>.<CRLF>").await?;

        let body = match timeout(DATA_TIMEOUT, self.read_data_body()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // A DATA timeout ends the connection outright, same as a command
                // timeout, rather than merely aborting the in-progress transaction.
                let _ = self.reply("421 timed out reading message data").await;
                return Ok(ControlFlow::Break);
            }
        };

        let body = match body {
            Some(b) => b,
            None => {
                // Size limit exceeded; the whole message is discarded, per recipient.
                for addr in &self.recipients {
                    self.stream.write_all(format!("552 5.3.4 <{}> Message size exceeds fixed maximum\r\n", addr).as_bytes()).await?;
                }
                self.stream.flush().await?;
                self.sender = None;
                self.recipients.clear();
                self.state = State::AfterLhlo;
                return Ok(ControlFlow::Continue);
            }
        };

        let recipients = std::mem::take(&mut self.recipients);
        for addr in &recipients {
            let status = self.deliver(addr, &body).await;
            self.stream.write_all(status.as_bytes()).await?;
        }
        self.stream.flush().await?;

        self.sender = None;
        self.state = State::AfterLhlo;
        Ok(ControlFlow::Continue)
    }

    /// Reads dot-stuffed message lines until the terminator, enforcing the size limit
    /// as bytes accumulate. `Ok(None)` signals an overrun; the caller discards the message.
    async fn read_data_body(&mut self) -> Result<Option<Vec<u8>>> {
        let mut unstuffer = DotUnstuffer::new();
        let mut body = Vec::new();
        let mut over_limit = false;
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = self.stream.read_until(b'\n', &mut line).await?;
            if n == 0 {
                return Err(RavenError::TransientIO("connection closed during DATA".to_string()));
            }
            unstuffer.process_chunk(&line, |chunk| {
                if !over_limit {
                    if body.len() + chunk.len() > self.config.max_message_size as usize {
                        over_limit = true;
                    } else {
                        body.extend_from_slice(chunk);
                    }
                }
            });
            if unstuffer.is_done() {
                break;
            }
        }
        Ok(if over_limit { None } else { Some(body) })
    }

    async fn deliver(&self, addr: &str, raw: &[u8]) -> String {
        let Some((local_part, domain)) = addr.rsplit_once('@') else {
            return format!("550 5.1.3 <{}> Bad recipient address syntax\r\n", addr);
        };
        match self.store.partition_for_user(domain, local_part).await {
            Ok(partition) => match partition.deliver_to_inbox(raw).await {
                Ok(_) => {
                    info!(recipient = %addr, "lmtp delivery complete");
                    format!("250 2.0.0 <{}> Ok\r\n", addr)
                }
                Err(e) => {
                    warn!(recipient = %addr, error = %e, "lmtp delivery failed");
                    format!("{} 5.1.1 <{}> {}\r\n", e.lmtp_code(), addr, e)
                }
            },
            Err(e) => {
                warn!(recipient = %addr, error = %e, "lmtp recipient resolution failed");
                format!("{} 5.1.1 <{}> {}\r\n", e.lmtp_code(), addr, e)
            }
        }
    }
}

enum ControlFlow {
    Continue,
    Break,
}

impl ControlFlow {
    fn is_break(&self) -> bool {
        matches!(self, ControlFlow::Break)
    }
}

/// Extracts the address out of `FROM:<addr>`/`TO:<addr>`, case-insensitive on the prefix,
/// tolerating the SIZE= and BODY= parameters some MTAs still append after the bracket.
fn parse_path(arg: &str, prefix: &str) -> Option<String> {
    let rest = arg.get(..prefix.len())?;
    if !rest.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = arg[prefix.len()..].trim_start();
    let rest = rest.strip_prefix('<')?;
    let (addr, _params) = rest.split_once('>')?;
    if addr.is_empty() {
        // MAIL FROM:<> is the null reverse-path, legal for bounce/DSN mail.
        return Some(String::new());
    }
    Some(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mail_from() {
        assert_eq!(parse_path("FROM:<a@b.com>", "FROM:"), Some("a@b.com".to_string()));
    }

    #[test]
    fn parses_rcpt_to_with_params() {
        assert_eq!(parse_path("TO:<a@b.com> SIZE=100", "TO:"), Some("a@b.com".to_string()));
    }

    #[test]
    fn null_reverse_path_is_legal() {
        assert_eq!(parse_path("FROM:<>", "FROM:"), Some(String::new()));
    }

    #[test]
    fn rejects_missing_brackets() {
        assert_eq!(parse_path("FROM:a@b.com", "FROM:"), None);
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(parse_path("TO:<a@b.com>", "FROM:"), None);
    }
}
