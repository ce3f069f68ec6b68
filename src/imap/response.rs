/*
 * response.rs
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

//! Response line formatting. Untagged-response ordering (EXISTS, RECENT, then
//! OK-coded status, then FLAGS, then PERMANENTFLAGS, then the tagged completion)
//! is enforced by the order callers append to a `ResponseBatch`, not by this module.

use crate::error::RavenError;
use crate::store::message::Flag;
use std::collections::BTreeSet;
use tokio::io::{AsyncWrite, AsyncWriteExt, Result as IoResult};

pub const PERMANENT_FLAGS: &[&str] = &["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft", "\\*"];
pub const SYSTEM_FLAGS: &[&str] = &["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft", "\\Recent"];

pub fn flags_to_atoms(flags: &BTreeSet<Flag>) -> String {
    flags.iter().map(Flag::as_imap_atom).collect::<Vec<_>>().join(" ")
}

enum Line {
    /// A plain text line; `write_to` appends the trailing CRLF.
    Text(String),
    /// Pre-framed bytes (a FETCH response carrying one or more literals); the
    /// caller has already included any CRLFs this line needs, including the
    /// final one.
    Raw(Vec<u8>),
}

/// Batches untagged lines and a pending tagged completion so a command handler
/// can build the whole response before writing (the ordering requirement is
/// satisfied by only ever pushing lines in canonical order).
#[derive(Default)]
pub struct ResponseBatch {
    lines: Vec<Line>,
}

impl ResponseBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn untagged(&mut self, body: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Text(format!("* {}", body.into())));
        self
    }

    /// Pushes a pre-framed untagged response whose body may contain literals
    /// (e.g. `* 3 FETCH (BODY[TEXT] {2}\r\nhi)`). `body` must already end in CRLF.
    pub fn untagged_raw(&mut self, mut body: Vec<u8>) -> &mut Self {
        let mut line = b"* ".to_vec();
        line.append(&mut body);
        self.lines.push(Line::Raw(line));
        self
    }

    pub fn continuation(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Text(format!("+ {}", text.into())));
        self
    }

    pub fn tagged_ok(&mut self, tag: &str, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Text(format!("{} OK {}", tag, text.into())));
        self
    }

    pub fn tagged_no(&mut self, tag: &str, code: Option<&str>, text: impl Into<String>) -> &mut Self {
        match code {
            Some(c) => self.lines.push(Line::Text(format!("{} NO {} {}", tag, c, text.into()))),
            None => self.lines.push(Line::Text(format!("{} NO {}", tag, text.into()))),
        }
        self
    }

    pub fn tagged_bad(&mut self, tag: &str, text: impl Into<String>) -> &mut Self {
        self.lines.push(Line::Text(format!("{} BAD {}", tag, text.into())));
        self
    }

    pub fn tagged_error(&mut self, tag: &str, err: &RavenError) -> &mut Self {
        match err.imap_response_code() {
            Some(code) => self.lines.push(Line::Text(format!("{} {} {} {}", tag, err.imap_keyword(), code, err))),
            None => self.lines.push(Line::Text(format!("{} {} {}", tag, err.imap_keyword(), err))),
        }
        self
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> IoResult<()> {
        for line in &self.lines {
            match line {
                Line::Text(s) => {
                    writer.write_all(s.as_bytes()).await?;
                    writer.write_all(b"\r\n").await?;
                }
                Line::Raw(bytes) => writer.write_all(bytes).await?,
            }
        }
        writer.flush().await
    }
}

/// Writes a literal-bearing FETCH data item: `NAME {len}\r\n<bytes>`.
pub fn literal_field(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + data.len() + 16);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(format!(" {{{}}}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(batch: &ResponseBatch) -> Vec<String> {
        batch
            .lines
            .iter()
            .map(|l| match l {
                Line::Text(s) => s.clone(),
                Line::Raw(b) => String::from_utf8_lossy(b).into_owned(),
            })
            .collect()
    }

    #[test]
    fn batch_preserves_push_order() {
        let mut batch = ResponseBatch::new();
        batch.untagged("1 EXISTS").untagged("0 RECENT").tagged_ok("a1", "SELECT completed");
        assert_eq!(rendered(&batch), vec!["* 1 EXISTS", "* 0 RECENT", "a1 OK SELECT completed"]);
    }

    #[test]
    fn literal_field_has_byte_count() {
        let out = literal_field("BODY[TEXT]", b"hi");
        assert_eq!(out, b"BODY[TEXT] {2}\r\nhi");
    }

    #[test]
    fn tagged_error_includes_response_code() {
        let mut batch = ResponseBatch::new();
        batch.tagged_error("a1", &RavenError::TryCreate("no such mailbox".to_string()));
        let lines = rendered(&batch);
        assert!(lines[0].contains("[TRYCREATE]"));
        assert!(lines[0].starts_with("a1 NO"));
    }
}
