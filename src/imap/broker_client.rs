/*
 * broker_client.rs
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

//! Client side of the SASL broker's framed-line protocol, used by LOGIN and
//! AUTHENTICATE PLAIN. One short-lived Unix connection per authentication attempt.

use crate::sasl::{encode_plain, SaslMechanism};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticates one `authzid\0authcid\0password` triple against the broker
/// over `socket_path`. Returns `Ok(normalized_user)` on `OK`, `Err(reason)` on `FAIL`
/// or any protocol/transport problem.
pub async fn authenticate_plain(
    socket_path: &Path,
    authzid: &str,
    authcid: &str,
    password: &str,
) -> Result<String, String> {
    timeout(HANDSHAKE_TIMEOUT, run(socket_path, authcid, password, authzid))
        .await
        .map_err(|_| "broker handshake timed out".to_string())?
}

async fn run(socket_path: &Path, authcid: &str, password: &str, authzid: &str) -> Result<String, String> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| e.to_string())?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    write_half.write_all(b"VERSION\t1\t2\n").await.map_err(|e| e.to_string())?;
    write_half.write_all(format!("CPID\t{}\n", std::process::id()).as_bytes()).await.map_err(|e| e.to_string())?;

    // Drain the mechanism advertisement up to DONE.
    loop {
        line.clear();
        reader.read_line(&mut line).await.map_err(|e| e.to_string())?;
        if line.trim_end() == "DONE" {
            break;
        }
        if line.is_empty() {
            return Err("broker closed connection during handshake".to_string());
        }
    }

    let resp = encode_plain(authzid, authcid, password);
    let frame = format!("AUTH\t1\t{}\tservice=imap\tresp={}\n", SaslMechanism::Plain.name(), resp);
    write_half.write_all(frame.as_bytes()).await.map_err(|e| e.to_string())?;

    line.clear();
    reader.read_line(&mut line).await.map_err(|e| e.to_string())?;
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix("OK\t1\t") {
        let user = rest.strip_prefix("user=").unwrap_or(rest);
        return Ok(user.to_string());
    }
    if let Some(rest) = line.strip_prefix("FAIL\t1\t") {
        let reason = rest.strip_prefix("reason=").unwrap_or(rest);
        return Err(reason.to_string());
    }
    Err(format!("unexpected broker reply: {line}"))
}
