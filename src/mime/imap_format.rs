/*
 * imap_format.rs
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

//! Builds the IMAP `ENVELOPE` and `BODY`/`BODYSTRUCTURE` response strings.
//! ENVELOPE is built directly from the store's cached `Envelope`; BODYSTRUCTURE
//! walks the raw message through the shared MIME parser.

use crate::mime::content_disposition::parse_content_disposition;
use crate::mime::content_type::parse_content_type;
use crate::mime::handler::{MimeHandler, MimeParseError};
use crate::mime::parser::MimeParser;
use crate::store::message::{Address, Envelope};

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn nil_or_quote(s: &Option<String>) -> String {
    match s {
        Some(v) => quote(v),
        None => "NIL".to_string(),
    }
}

fn format_address(addr: &Address) -> String {
    format!(
        "({} NIL {} {})",
        nil_or_quote(&addr.display_name),
        quote(&addr.local_part),
        nil_or_quote(&addr.domain),
    )
}

fn format_address_list(addrs: &[Address]) -> String {
    if addrs.is_empty() {
        "NIL".to_string()
    } else {
        format!("({})", addrs.iter().map(format_address).collect::<Vec<_>>().join(""))
    }
}

/// Builds the ENVELOPE response list: `(date subject from sender reply-to to cc bcc in-reply-to message-id)`.
/// Per RFC 3501 §7.4.2, an empty From/Sender/Reply-To defaults to the From field's value.
pub fn format_envelope(envelope: &Envelope) -> String {
    let sender = if envelope.sender.is_empty() { &envelope.from } else { &envelope.sender };
    let reply_to = if envelope.reply_to.is_empty() { &envelope.from } else { &envelope.reply_to };
    format!(
        "({} {} {} {} {} {} {} {} {} {})",
        nil_or_quote(&envelope.date),
        nil_or_quote(&envelope.subject),
        format_address_list(&envelope.from),
        format_address_list(sender),
        format_address_list(reply_to),
        format_address_list(&envelope.to),
        format_address_list(&envelope.cc),
        format_address_list(&envelope.bcc),
        nil_or_quote(&envelope.in_reply_to),
        nil_or_quote(&envelope.message_id),
    )
}

/// One node of the parsed MIME entity tree: a leaf part or a multipart container.
#[derive(Debug, Default)]
pub struct PartNode {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub content_transfer_encoding: Option<String>,
    pub content_id: Option<String>,
    pub content_description: Option<String>,
    pub body: Vec<u8>,
    pub children: Vec<PartNode>,
    /// Every header seen for this entity, in declaration order, for BODY[n.HEADER]
    /// section requests (nested parts have no raw byte range to slice from).
    pub headers: Vec<(String, String)>,
}

/// Reconstructs a `Name: Value\r\n` block (with a trailing blank line) for a part
/// that was parsed out of its original byte stream.
pub fn format_header_block(node: &PartNode) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in &node.headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

impl PartNode {
    fn parsed_type(&self) -> (String, String, Vec<(String, String)>) {
        let raw = self.content_type.clone().unwrap_or_else(|| "text/plain".to_string());
        match parse_content_type(raw.trim()) {
            Some(ct) => {
                let params = ct.parameters().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                (ct.get_primary_type().to_ascii_lowercase(), ct.get_sub_type().to_ascii_lowercase(), params)
            }
            None => ("application".to_string(), "octet-stream".to_string(), Vec::new()),
        }
    }

    fn is_multipart(&self) -> bool {
        self.parsed_type().0.eq_ignore_ascii_case("multipart")
    }

    fn line_count(&self) -> usize {
        self.body.iter().filter(|&&b| b == b'\n').count() + 1
    }
}

/// Walks a 1-based MIME part path (`BODY[1.2]` style). A non-multipart message has
/// exactly one part, numbered `1`, which is the root node itself.
pub fn find_part<'a>(root: &'a PartNode, path: &[u32]) -> Option<&'a PartNode> {
    if root.children.is_empty() {
        return if path == [1] { Some(root) } else { None };
    }
    let mut current = root;
    for &p in path {
        if p == 0 {
            return None;
        }
        current = current.children.get((p - 1) as usize)?;
    }
    Some(current)
}

/// Parses raw message bytes into the MIME entity tree used for BODYSTRUCTURE.
pub fn parse_structure(raw: &[u8]) -> Result<PartNode, MimeParseError> {
    let mut parser = MimeParser::new(StructureCollector { stack: Vec::new() });
    parser.receive(raw)?;
    parser.close()?;
    Ok(parser.into_inner().into_root())
}

struct StructureCollector {
    stack: Vec<PartNode>,
}

impl StructureCollector {
    fn into_root(mut self) -> PartNode {
        self.stack.pop().unwrap_or_default()
    }
}

impl MimeHandler for StructureCollector {
    fn start_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        self.stack.push(PartNode::default());
        Ok(())
    }
    fn content_type(&mut self, v: &str) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.content_type = Some(v.to_string());
            top.headers.push(("Content-Type".to_string(), v.to_string()));
        }
        Ok(())
    }
    fn content_disposition(&mut self, v: &str) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.content_disposition = Some(v.to_string());
            top.headers.push(("Content-Disposition".to_string(), v.to_string()));
        }
        Ok(())
    }
    fn content_transfer_encoding(&mut self, v: &str) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.content_transfer_encoding = Some(v.to_string());
            top.headers.push(("Content-Transfer-Encoding".to_string(), v.to_string()));
        }
        Ok(())
    }
    fn content_id(&mut self, v: &str) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.content_id = Some(v.to_string());
            top.headers.push(("Content-ID".to_string(), v.to_string()));
        }
        Ok(())
    }
    fn content_description(&mut self, v: &str) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.content_description = Some(v.to_string());
            top.headers.push(("Content-Description".to_string(), v.to_string()));
        }
        Ok(())
    }
    fn header(&mut self, name: &str, value: &str) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.headers.push((name.to_string(), value.to_string()));
        }
        Ok(())
    }
    fn body_content(&mut self, data: &[u8]) -> Result<(), MimeParseError> {
        if let Some(top) = self.stack.last_mut() {
            top.body.extend_from_slice(data);
        }
        Ok(())
    }
    fn end_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        if let Some(node) = self.stack.pop() {
            match self.stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None => self.stack.push(node),
            }
        }
        Ok(())
    }
}

/// Formats a `BODY`/`BODYSTRUCTURE` item. `extended` adds the disposition/language/
/// location extension fields BODYSTRUCTURE carries beyond non-extensible BODY.
pub fn format_body(node: &PartNode, extended: bool) -> String {
    if node.is_multipart() {
        let (_, subtype, _) = node.parsed_type();
        let parts: String = node.children.iter().map(|c| format_body(c, extended)).collect();
        let mut out = format!("({}{})", parts, quote(&subtype));
        if extended {
            out = format!("({} {})", &out[1..out.len() - 1], extension_fields(node));
        }
        return out;
    }
    let (primary, subtype, params) = node.parsed_type();
    let param_list = if params.is_empty() {
        "NIL".to_string()
    } else {
        format!(
            "({})",
            params.iter().map(|(k, v)| format!("{} {}", quote(k), quote(v))).collect::<Vec<_>>().join(" ")
        )
    };
    let encoding = node.content_transfer_encoding.clone().unwrap_or_else(|| "7BIT".to_string());
    let mut fields = format!(
        "{} {} {} {} {} {} {}",
        quote(&primary),
        quote(&subtype),
        param_list,
        nil_or_quote(&node.content_id),
        nil_or_quote(&node.content_description),
        quote(&encoding.to_ascii_uppercase()),
        node.body.len(),
    );
    if primary.eq_ignore_ascii_case("text") {
        fields = format!("{} {}", fields, node.line_count());
    }
    let mut out = format!("({})", fields);
    if extended {
        out = format!("({} {})", &out[1..out.len() - 1], extension_fields(node));
    }
    out
}

fn extension_fields(node: &PartNode) -> String {
    let disposition = match node.content_disposition.as_deref().and_then(parse_content_disposition) {
        Some(cd) => {
            let params: Vec<(String, String)> =
                cd.parameters().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            let param_list = if params.is_empty() {
                "NIL".to_string()
            } else {
                format!(
                    "({})",
                    params.iter().map(|(k, v)| format!("{} {}", quote(k), quote(v))).collect::<Vec<_>>().join(" ")
                )
            };
            format!("({} {})", quote(cd.get_disposition_type()), param_list)
        }
        None => "NIL".to_string(),
    };
    format!("{} NIL NIL", disposition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_defaults_sender_and_reply_to_from_from() {
        let mut env = Envelope::default();
        env.subject = Some("Hi".to_string());
        env.from = vec![Address { display_name: None, local_part: "alice".to_string(), domain: Some("example.com".to_string()) }];
        let formatted = format_envelope(&env);
        assert!(formatted.contains("\"Hi\""));
        assert_eq!(formatted.matches("\"alice\"").count(), 3);
    }

    #[test]
    fn simple_text_plain_structure() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\n\r\nHello\r\nWorld\r\n";
        let node = parse_structure(raw).unwrap();
        let body = format_body(&node, false);
        assert!(body.starts_with("(\"text\" \"plain\""));
        assert!(body.contains("charset"));
    }

    #[test]
    fn multipart_structure_lists_children() {
        let raw = b"Content-Type: multipart/mixed; boundary=x\r\n\r\n--x\r\nContent-Type: text/plain\r\n\r\nA\r\n--x\r\nContent-Type: text/html\r\n\r\n<b>B</b>\r\n--x--";
        let node = parse_structure(raw).unwrap();
        let body = format_body(&node, false);
        assert!(body.contains("\"mixed\""));
        assert!(body.contains("\"plain\""));
        assert!(body.contains("\"html\""));
    }
}
