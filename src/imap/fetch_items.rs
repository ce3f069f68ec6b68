/*
 * fetch_items.rs
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

//! FETCH item grammar: macros (ALL/FAST/FULL) and individual data items,
//! including `BODY[section]`/`BODY.PEEK[section]` with an optional partial range.

use crate::error::{RavenError, Result};
use crate::imap::tokenizer::Node;

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// `BODY[]` / `RFC822` — the entire message.
    Full,
    Header,
    HeaderFields { names: Vec<String>, negate: bool },
    Text,
    /// `BODY[1.2]` — nested MIME part path (1-based at each level).
    Part(Vec<u32>),
    PartHeader(Vec<u32>),
    PartText(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchItem {
    Uid,
    Flags,
    InternalDate,
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    Rfc822Size,
    Envelope,
    BodyStructure,
    /// Non-extensible `BODY` (no extension data in BODYSTRUCTURE).
    Body,
    BodySection { section: Section, peek: bool, partial: Option<(u64, u64)> },
}

impl FetchItem {
    /// Whether a successful fetch of this item marks the message `\Seen`
    /// (anything that reads message content, unless it is a `.PEEK` section).
    pub fn sets_seen(&self) -> bool {
        matches!(
            self,
            FetchItem::Rfc822 | FetchItem::Rfc822Header | FetchItem::Rfc822Text
        ) || matches!(self, FetchItem::BodySection { peek: false, .. })
    }
}

/// Expands `ALL`/`FAST`/`FULL` shorthand names, returns `None` for anything else.
fn expand_macro(name: &str) -> Option<Vec<FetchItem>> {
    match name.to_ascii_uppercase().as_str() {
        "ALL" => Some(vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size, FetchItem::Envelope]),
        "FAST" => Some(vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size]),
        "FULL" => Some(vec![
            FetchItem::Flags,
            FetchItem::InternalDate,
            FetchItem::Rfc822Size,
            FetchItem::Envelope,
            FetchItem::Body,
        ]),
        _ => None,
    }
}

/// Parses the FETCH item argument: a bare macro, a single item, or a
/// parenthesized list of items.
pub fn parse(nodes: &[Node]) -> Result<Vec<FetchItem>> {
    if nodes.len() == 1 {
        if let Node::Atom(name) = &nodes[0] {
            if let Some(items) = expand_macro(name) {
                return Ok(items);
            }
        }
    }
    let flat: Vec<&Node> = match nodes {
        [Node::List(items)] => items.iter().collect(),
        other => other.iter().collect(),
    };
    let mut out = Vec::new();
    let mut i = 0;
    while i < flat.len() {
        let (item, consumed) = parse_one(&flat[i..])?;
        out.push(item);
        i += consumed;
    }
    if out.is_empty() {
        return Err(RavenError::Protocol("empty FETCH item list".to_string()));
    }
    Ok(out)
}

fn parse_one(nodes: &[&Node]) -> Result<(FetchItem, usize)> {
    let atom = match nodes.first() {
        Some(Node::Atom(a)) => a.clone(),
        _ => return Err(RavenError::Protocol("expected a FETCH item".to_string())),
    };
    let upper = atom.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("BODY.PEEK[").or_else(|| upper.strip_prefix("BODY[")) {
        let peek = upper.starts_with("BODY.PEEK");
        return parse_body_section(&atom, rest, peek);
    }
    match upper.as_str() {
        "UID" => Ok((FetchItem::Uid, 1)),
        "FLAGS" => Ok((FetchItem::Flags, 1)),
        "INTERNALDATE" => Ok((FetchItem::InternalDate, 1)),
        "RFC822" => Ok((FetchItem::Rfc822, 1)),
        "RFC822.HEADER" => Ok((FetchItem::Rfc822Header, 1)),
        "RFC822.TEXT" => Ok((FetchItem::Rfc822Text, 1)),
        "RFC822.SIZE" => Ok((FetchItem::Rfc822Size, 1)),
        "ENVELOPE" => Ok((FetchItem::Envelope, 1)),
        "BODYSTRUCTURE" => Ok((FetchItem::BodyStructure, 1)),
        "BODY" => Ok((FetchItem::Body, 1)),
        other => Err(RavenError::Protocol(format!("unrecognized FETCH item: {other}"))),
    }
}

fn parse_body_section(original: &str, rest_upper: &str, peek: bool) -> Result<(FetchItem, usize)> {
    let close = rest_upper
        .find(']')
        .ok_or_else(|| RavenError::Protocol("unterminated BODY[...] section".to_string()))?;
    let inside = &rest_upper[..close];
    let prefix_len = original.len() - rest_upper.len();
    let original_rest = &original[prefix_len..];
    let after_bracket = &original_rest[close + 1..];
    let partial = parse_partial(after_bracket)?;
    let section = parse_section(inside)?;
    Ok((FetchItem::BodySection { section, peek, partial }, 1))
}

fn parse_section(inside: &str) -> Result<Section> {
    if inside.is_empty() {
        return Ok(Section::Full);
    }
    if inside == "HEADER" {
        return Ok(Section::Header);
    }
    if inside == "TEXT" {
        return Ok(Section::Text);
    }
    if let Some(rest) = inside.strip_prefix("HEADER.FIELDS.NOT ") {
        return Ok(Section::HeaderFields { names: parse_field_names(rest)?, negate: true });
    }
    if let Some(rest) = inside.strip_prefix("HEADER.FIELDS ") {
        return Ok(Section::HeaderFields { names: parse_field_names(rest)?, negate: false });
    }
    // Numeric part path, optionally suffixed with .HEADER or .TEXT.
    if let Some(base) = inside.strip_suffix(".HEADER") {
        return Ok(Section::PartHeader(parse_part_path(base)?));
    }
    if let Some(base) = inside.strip_suffix(".TEXT") {
        return Ok(Section::PartText(parse_part_path(base)?));
    }
    Ok(Section::Part(parse_part_path(inside)?))
}

fn parse_part_path(s: &str) -> Result<Vec<u32>> {
    s.split('.')
        .map(|p| p.parse::<u32>().map_err(|_| RavenError::Protocol(format!("invalid MIME part path: {s}"))))
        .collect()
}

fn parse_field_names(s: &str) -> Result<Vec<String>> {
    let inner = s
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| RavenError::Protocol("expected a header field-name list".to_string()))?;
    Ok(inner.split_whitespace().map(|s| s.trim_matches('"').to_string()).collect())
}

fn parse_partial(after_bracket: &str) -> Result<Option<(u64, u64)>> {
    let trimmed = after_bracket.trim_start();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let inner = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| RavenError::Protocol("malformed partial range".to_string()))?;
    let (origin, length) = inner
        .split_once('.')
        .ok_or_else(|| RavenError::Protocol("malformed partial range".to_string()))?;
    let origin: u64 = origin.parse().map_err(|_| RavenError::Protocol("invalid partial origin".to_string()))?;
    let length: u64 = length.parse().map_err(|_| RavenError::Protocol("invalid partial length".to_string()))?;
    Ok(Some((origin, length)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::tokenizer::{parse as parse_nodes, Segment};

    fn nodes(s: &str) -> Vec<Node> {
        parse_nodes(&[Segment::Text(s.to_string())]).unwrap()
    }

    #[test]
    fn macro_all_expands() {
        let items = parse(&nodes("ALL")).unwrap();
        assert_eq!(items.len(), 4);
        assert!(items.contains(&FetchItem::Envelope));
    }

    #[test]
    fn single_item() {
        let items = parse(&nodes("UID")).unwrap();
        assert_eq!(items, vec![FetchItem::Uid]);
    }

    #[test]
    fn list_of_items() {
        let items = parse(&nodes("(FLAGS UID)")).unwrap();
        assert_eq!(items, vec![FetchItem::Flags, FetchItem::Uid]);
    }

    #[test]
    fn body_full_section() {
        let items = parse(&nodes("BODY[]")).unwrap();
        assert_eq!(items, vec![FetchItem::BodySection { section: Section::Full, peek: false, partial: None }]);
    }

    #[test]
    fn body_peek_with_partial() {
        let items = parse(&nodes("BODY.PEEK[TEXT]<0.1024>")).unwrap();
        assert_eq!(
            items,
            vec![FetchItem::BodySection { section: Section::Text, peek: true, partial: Some((0, 1024)) }]
        );
    }

    #[test]
    fn header_fields_section() {
        let items = parse(&nodes(r#"BODY[HEADER.FIELDS (FROM TO)]"#)).unwrap();
        assert_eq!(
            items,
            vec![FetchItem::BodySection {
                section: Section::HeaderFields { names: vec!["FROM".to_string(), "TO".to_string()], negate: false },
                peek: false,
                partial: None,
            }]
        );
    }

    #[test]
    fn nested_part_path() {
        let items = parse(&nodes("BODY[1.2.HEADER]")).unwrap();
        assert_eq!(
            items,
            vec![FetchItem::BodySection { section: Section::PartHeader(vec![1, 2]), peek: false, partial: None }]
        );
    }
}
