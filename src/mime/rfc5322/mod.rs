/*
 * mod.rs
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

//! RFC 5322 message parser: envelope headers (Date, From, To, Cc, Subject, Message-ID),
//! feeding the IMAP `ENVELOPE` response (see `crate::mime::imap_format::format_envelope`).

mod address_parser;
mod date_time;
mod email_address;
mod handler;
mod message_id_list;

use crate::mime::handler::{MimeHandler, MimeParseError};
use crate::mime::parser::{HeaderValueDecoder, MimeParser};
use chrono::{DateTime, FixedOffset};

pub use email_address::EmailAddress;
pub use handler::MessageHandler;

use address_parser::parse_email_address_list;
use date_time::parse_rfc5322_date;
use message_id_list::parse_message_id_list;

/// A parsed `Message-ID`/`In-Reply-To` value: `<local@domain>`. Shared by both
/// headers since they use the same msg-id grammar (RFC 5322 §3.6.4).
#[derive(Debug, Clone)]
pub struct ContentID {
    local_part: String,
    domain: String,
}

impl ContentID {
    pub fn new(local_part: impl Into<String>, domain: impl Into<String>) -> Self {
        Self { local_part: local_part.into(), domain: domain.into() }
    }

    pub fn get_local_part(&self) -> &str {
        &self.local_part
    }

    pub fn get_domain(&self) -> &str {
        &self.domain
    }
}

impl std::fmt::Display for ContentID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}@{}>", self.local_part, self.domain)
    }
}

/// RFC 5322 envelope headers (top-level message only), covering the full IMAP
/// ENVELOPE tuple: From, Sender, Reply-To, To, Cc, Bcc, In-Reply-To, Message-ID.
#[derive(Debug, Default)]
pub struct EnvelopeHeaders {
    pub date: Option<DateTime<FixedOffset>>,
    pub from: Vec<EmailAddress>,
    pub sender: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: Option<String>,
    pub in_reply_to: Option<ContentID>,
    pub message_id: Option<ContentID>,
}

/// Adapter that implements MimeHandler and dispatches to a MessageHandler for RFC 5322 headers.
pub(crate) struct Rfc5322Adapter<H> {
    pub(crate) inner: H,
}

impl<H: MessageHandler> MimeHandler for Rfc5322Adapter<H> {
    fn set_locator(&mut self, locator: crate::mime::MimeLocator) {
        self.inner.set_locator(locator);
    }
    fn start_entity(&mut self, boundary: Option<&str>) -> Result<(), MimeParseError> {
        self.inner.start_entity(boundary)
    }
    fn content_type(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.inner.content_type(v)
    }
    fn content_disposition(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.inner.content_disposition(v)
    }
    fn content_transfer_encoding(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.inner.content_transfer_encoding(v)
    }
    fn content_id(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.inner.content_id(v)
    }
    fn content_description(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.inner.content_description(v)
    }
    fn mime_version(&mut self, v: &str) -> Result<(), MimeParseError> {
        self.inner.mime_version(v)
    }
    fn header(&mut self, name: &str, value: &str) -> Result<(), MimeParseError> {
        let name_lower = name.to_ascii_lowercase();
        match name_lower.as_str() {
            "date" | "resent-date" => {
                if let Some(dt) = parse_rfc5322_date(value) {
                    self.inner.date_header(name, dt)?;
                } else {
                    self.inner.unexpected_header(name, value)?;
                }
            }
            "from" | "sender" | "to" | "cc" | "bcc" | "reply-to"
            | "resent-from" | "return-path" | "resent-sender" | "resent-to"
            | "resent-cc" | "resent-bcc" | "resent-reply-to" | "envelope-to"
            | "delivered-to" | "x-original-to" | "errors-to" | "apparently-to" => {
                if let Some(addrs) = parse_email_address_list(value) {
                    self.inner.address_header(name, &addrs)?;
                } else {
                    self.inner.unexpected_header(name, value)?;
                }
            }
            "message-id" | "in-reply-to" | "references" | "resent-message-id" => {
                if let Some(ids) = parse_message_id_list(value) {
                    if !ids.is_empty() {
                        self.inner.message_id_header(name, &ids)?;
                    } else {
                        self.inner.unexpected_header(name, value)?;
                    }
                } else {
                    self.inner.unexpected_header(name, value)?;
                }
            }
            _ => MimeHandler::header(&mut self.inner, name, value)?,
        }
        Ok(())
    }
    fn end_headers(&mut self) -> Result<(), MimeParseError> {
        self.inner.end_headers()
    }
    fn body_content(&mut self, data: &[u8]) -> Result<(), MimeParseError> {
        self.inner.body_content(data)
    }
    fn unexpected_content(&mut self, data: &[u8]) -> Result<(), MimeParseError> {
        self.inner.unexpected_content(data)
    }
    fn end_entity(&mut self, boundary: Option<&str>) -> Result<(), MimeParseError> {
        self.inner.end_entity(boundary)
    }
}

/// Parser for RFC 5322 email messages. Wraps MimeParser and dispatches envelope headers to a MessageHandler.
pub struct MessageParser<H: MessageHandler> {
    parser: MimeParser<Rfc5322Adapter<H>>,
}

fn is_unstructured_header(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    matches!(n.as_str(), "subject" | "comments" | "keywords" | "received") || n.starts_with("x-")
}

fn is_address_header(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    matches!(
        n.as_str(),
        "from" | "sender" | "to" | "cc" | "bcc" | "reply-to"
            | "resent-from" | "return-path" | "resent-sender" | "resent-to"
            | "resent-cc" | "resent-bcc" | "resent-reply-to" | "envelope-to"
            | "delivered-to" | "x-original-to" | "errors-to" | "apparently-to"
    )
}

fn is_mime_header_no_rfc2047(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    matches!(
        n.as_str(),
        "content-type" | "content-disposition" | "content-transfer-encoding" | "content-id" | "mime-version" | "content-description"
    )
}

impl<H: MessageHandler> MessageParser<H> {
    pub fn new(handler: H) -> Self {
        Self::new_with_smtp_utf8(handler, false)
    }

    /// `smtp_utf8` should be set when the message arrived over an `SMTPUTF8`-negotiated
    /// LMTP session: header bytes are then trusted as UTF-8 first, falling back to
    /// ISO-8859-1 only on invalid sequences, instead of being treated as raw 8-bit.
    pub fn new_with_smtp_utf8(handler: H, smtp_utf8: bool) -> Self {
        let mut parser = MimeParser::new(Rfc5322Adapter { inner: handler });
        let decoder: HeaderValueDecoder = Box::new(move |name, value| {
            let raw = header_bytes_to_string(value, smtp_utf8);
            let raw = raw.trim();
            if is_mime_header_no_rfc2047(name) {
                raw.to_string()
            } else if is_unstructured_header(name) || is_address_header(name) {
                decode_header_value(value, smtp_utf8)
            } else {
                raw.to_string()
            }
        });
        parser.set_header_value_decoder(Some(decoder));
        Self { parser }
    }

    /// Process bytes; returns number of bytes consumed.
    pub fn receive(&mut self, buf: &[u8]) -> Result<usize, MimeParseError> {
        self.parser.receive(buf)
    }

    /// End of input.
    pub fn close(&mut self) -> Result<(), MimeParseError> {
        self.parser.close()
    }

    pub fn into_inner(self) -> H {
        self.parser.into_inner().inner
    }
}

const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Converts header value bytes to a string. When `smtp_utf8`, tries UTF-8 first
/// and falls back to a raw 8-bit (ISO-8859-1-style) reinterpretation on failure.
fn header_bytes_to_string(bytes: &[u8], smtp_utf8: bool) -> String {
    if smtp_utf8 {
        utf8_then_raw_8bit(bytes)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

fn utf8_then_raw_8bit(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.contains(REPLACEMENT_CHAR) => s.to_string(),
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Decodes a header value from raw bytes: RFC 2047 encoded-words first, then any
/// remaining raw 8-bit octets the encoded-word pass left behind.
fn decode_header_value(bytes: &[u8], smtp_utf8: bool) -> String {
    let raw = header_bytes_to_string(bytes, smtp_utf8);
    let decoded = decode_encoded_words(&raw);
    reinterpret_raw_8bit(&decoded)
}

/// Expands RFC 2047 encoded-words (`=?charset?q?text?=` / `=?charset?b?text?=`) in `s`.
fn decode_encoded_words(s: &str) -> String {
    let mut out = String::new();
    let bytes = s.as_bytes();
    let len = bytes.len();
    let mut pos = 0;

    while pos < len {
        match find_encoded_word_start(bytes, pos) {
            Some(start) => {
                out.push_str(std::str::from_utf8(&bytes[pos..start]).unwrap_or(""));
                pos = start;
                match decode_one_encoded_word(bytes, len, &mut pos) {
                    Some((decoded, end)) => {
                        out.push_str(&decoded);
                        pos = end;
                    }
                    None => {
                        out.push_str(std::str::from_utf8(&bytes[pos..(pos + 2).min(len)]).unwrap_or(""));
                        pos = (pos + 2).min(len);
                    }
                }
            }
            None => {
                out.push_str(std::str::from_utf8(&bytes[pos..]).unwrap_or(""));
                break;
            }
        }
    }
    out
}

fn find_encoded_word_start(bytes: &[u8], from: usize) -> Option<usize> {
    let rest = bytes.get(from..)?;
    rest.windows(2).position(|w| w == b"=?").map(|i| from + i)
}

fn decode_one_encoded_word(bytes: &[u8], len: usize, pos: &mut usize) -> Option<(String, usize)> {
    if *pos + 4 > len || &bytes[*pos..*pos + 2] != b"=?" {
        return None;
    }
    *pos += 2;
    let charset_start = *pos;
    let qmark1 = bytes[*pos..].iter().position(|&b| b == b'?')? + *pos;
    if qmark1 < charset_start + 1 || qmark1 + 2 >= len {
        return None;
    }
    let charset = std::str::from_utf8(&bytes[charset_start..qmark1]).ok()?.trim();
    let encoding = bytes[qmark1 + 1].to_ascii_lowercase();
    if bytes[qmark1 + 2] != b'?' {
        return None;
    }
    *pos = qmark1 + 3;
    let payload_start = *pos;
    let end_in_rest = bytes[*pos..].windows(2).position(|w| w[0] == b'?' && w[1] == b'=')?;
    let payload_end = *pos + end_in_rest;
    *pos = payload_end + 2;

    let payload = &bytes[payload_start..payload_end];
    let decoded_bytes = match encoding {
        b'b' => crate::mime::codec::decode_base64_whole(payload),
        b'q' => decode_q_payload(payload),
        _ => return None,
    };
    Some((charset_bytes_to_string(&decoded_bytes, charset), *pos))
}

/// Q-encoding is quoted-printable with `_` standing in for a literal space.
fn decode_q_payload(payload: &[u8]) -> Vec<u8> {
    let mut preprocessed = Vec::with_capacity(payload.len());
    for &b in payload {
        if b == b'_' {
            preprocessed.push(b' ');
        } else {
            preprocessed.push(b);
        }
    }
    crate::mime::codec::decode_quoted_printable_whole(&preprocessed)
}

fn charset_bytes_to_string(bytes: &[u8], charset: &str) -> String {
    match charset.to_ascii_lowercase().as_str() {
        "iso-8859-1" | "latin1" | "iso_8859-1" => bytes.iter().map(|&b| b as char).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Re-interprets a string's high-bit bytes as a single ISO-8859-1 run when UTF-8
/// decoding left each one as a standalone Latin-1 code point; does nothing once any
/// code point above U+00FF is present, since that can only mean real Unicode text.
fn reinterpret_raw_8bit(s: &str) -> String {
    let has_high = s.chars().any(|c| c as u32 > 0x7F);
    if !has_high || s.chars().any(|c| c as u32 > 0xFF) {
        return s.to_string();
    }
    let bytes: Vec<u8> = s.chars().map(|c| c as u8).collect();
    match std::str::from_utf8(&bytes) {
        Ok(t) if !t.contains(REPLACEMENT_CHAR) => t.to_string(),
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Handler that collects only envelope headers (for parse_envelope).
struct EnvelopeCollector {
    envelope: EnvelopeHeaders,
}

impl MimeHandler for EnvelopeCollector {
    fn header(&mut self, name: &str, value: &str) -> Result<(), MimeParseError> {
        if name.eq_ignore_ascii_case("subject") {
            self.envelope.subject = Some(value.to_string());
        }
        Ok(())
    }
}

impl MessageHandler for EnvelopeCollector {
    fn date_header(&mut self, name: &str, date: DateTime<FixedOffset>) -> Result<(), MimeParseError> {
        if name.eq_ignore_ascii_case("date") {
            self.envelope.date = Some(date);
        }
        Ok(())
    }
    fn address_header(&mut self, name: &str, addresses: &[EmailAddress]) -> Result<(), MimeParseError> {
        let addrs: Vec<EmailAddress> = addresses.to_vec();
        match name.to_ascii_lowercase().as_str() {
            "from" => self.envelope.from = addrs,
            "sender" => self.envelope.sender = addrs,
            "reply-to" => self.envelope.reply_to = addrs,
            "to" => self.envelope.to = addrs,
            "cc" => self.envelope.cc = addrs,
            "bcc" => self.envelope.bcc = addrs,
            _ => {}
        }
        Ok(())
    }
    fn message_id_header(&mut self, name: &str, ids: &[ContentID]) -> Result<(), MimeParseError> {
        let id = match ids.first() {
            Some(id) => ContentID::new(id.get_local_part(), id.get_domain()),
            None => return Ok(()),
        };
        if name.eq_ignore_ascii_case("message-id") {
            self.envelope.message_id = Some(id);
        } else if name.eq_ignore_ascii_case("in-reply-to") {
            self.envelope.in_reply_to = Some(id);
        }
        Ok(())
    }
}

/// Parse envelope headers only from raw message bytes (stops after headers; does not require full body).
pub fn parse_envelope(raw: &[u8]) -> Result<EnvelopeHeaders, MimeParseError> {
    let collector = EnvelopeCollector { envelope: EnvelopeHeaders::default() };
    let mut parser = MessageParser::new(collector);
    parser.receive(raw)?;
    parser.close()?;
    Ok(parser.into_inner().envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_envelope_simple() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: Hello\r\nDate: Fri, 21 Nov 1997 09:55:06 -0600\r\nMessage-ID: <id@host>\r\n\r\nBody";
        let env = parse_envelope(raw).unwrap();
        assert_eq!(env.from.len(), 1);
        assert_eq!(env.from[0].address(), "alice@example.com");
        assert_eq!(env.to.len(), 1);
        assert_eq!(env.to[0].address(), "bob@example.com");
        assert_eq!(env.subject.as_deref(), Some("Hello"));
        assert!(env.date.is_some());
        assert!(env.message_id.is_some());
        assert_eq!(env.message_id.as_ref().unwrap().get_local_part(), "id");
        assert_eq!(env.message_id.as_ref().unwrap().get_domain(), "host");
    }

    #[test]
    fn parse_envelope_decodes_rfc2047_subject() {
        let raw = b"From: alice@example.com\r\nTo: bob@example.com\r\nSubject: =?UTF-8?B?SGVsbG8=?=\r\nDate: Fri, 21 Nov 1997 09:55:06 -0600\r\n\r\nBody";
        let env = parse_envelope(raw).unwrap();
        assert_eq!(env.subject.as_deref(), Some("Hello"));
    }
}
