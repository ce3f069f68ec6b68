/*
 * tokenizer.rs
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

//! Atom/quoted-string/literal/list tokenizer for IMAP command arguments.
//!
//! A command line is assembled by the session reader as a sequence of
//! `Segment`s: plain text between literals, and raw byte literals read off
//! the wire once a `{N}` or `{N+}` announcement is seen. This keeps literal
//! bytes (which need not be valid text, e.g. an APPEND message body) out of
//! the text scanner entirely.

use crate::error::{RavenError, Result};

#[derive(Debug, Clone)]
pub enum Segment {
    Text(String),
    Literal(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Atom(String),
    QuotedString(String),
    Literal(Vec<u8>),
    ListStart,
    ListEnd,
}

/// A parsed command argument: an atom, string, literal, or parenthesized list.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Atom(String),
    QuotedString(String),
    Literal(Vec<u8>),
    List(Vec<Node>),
}

impl Node {
    /// Treats an atom or quoted string as plain text; decodes a literal as UTF-8
    /// (lossily, since mailbox names and credentials are expected to be text).
    pub fn as_text(&self) -> Option<String> {
        match self {
            Node::Atom(s) | Node::QuotedString(s) => Some(s.clone()),
            Node::Literal(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Node::List(_) => None,
        }
    }
}

/// Parses an assembled command's segments into a flat stream of nodes,
/// grouping `(...)` into nested `Node::List`s.
pub fn parse(segments: &[Segment]) -> Result<Vec<Node>> {
    let tokens = lex(segments)?;
    let mut iter = tokens.into_iter().peekable();
    let mut out = Vec::new();
    while iter.peek().is_some() {
        out.push(group_one(&mut iter)?);
    }
    Ok(out)
}

fn lex(segments: &[Segment]) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for segment in segments {
        match segment {
            Segment::Literal(bytes) => tokens.push(Token::Literal(bytes.clone())),
            Segment::Text(text) => lex_text(text, &mut tokens)?,
        }
    }
    Ok(tokens)
}

fn lex_text(text: &str, tokens: &mut Vec<Token>) -> Result<()> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::ListStart);
                i += 1;
            }
            ')' => {
                tokens.push(Token::ListEnd);
                i += 1;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    if i >= chars.len() {
                        return Err(RavenError::Protocol("unterminated quoted string".to_string()));
                    }
                    match chars[i] {
                        '"' => {
                            i += 1;
                            break;
                        }
                        '\\' if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        c => {
                            s.push(c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::QuotedString(s));
            }
            _ => {
                let start = i;
                let mut bracket_depth: u32 = 0;
                while i < chars.len() {
                    let c = chars[i];
                    if bracket_depth == 0 && matches!(c, ' ' | '\t' | '(' | ')' | '"') {
                        break;
                    }
                    match c {
                        '[' => bracket_depth += 1,
                        ']' => bracket_depth = bracket_depth.saturating_sub(1),
                        _ => {}
                    }
                    i += 1;
                }
                let atom: String = chars[start..i].iter().collect();
                if atom == "NIL" {
                    tokens.push(Token::QuotedString(String::new()));
                } else {
                    tokens.push(Token::Atom(atom));
                }
            }
        }
    }
    Ok(())
}

fn group_one<I: Iterator<Item = Token>>(iter: &mut std::iter::Peekable<I>) -> Result<Node> {
    match iter.next() {
        Some(Token::Atom(s)) => Ok(Node::Atom(s)),
        Some(Token::QuotedString(s)) => Ok(Node::QuotedString(s)),
        Some(Token::Literal(b)) => Ok(Node::Literal(b)),
        Some(Token::ListStart) => {
            let mut items = Vec::new();
            loop {
                match iter.peek() {
                    Some(Token::ListEnd) => {
                        iter.next();
                        break;
                    }
                    Some(_) => items.push(group_one(iter)?),
                    None => return Err(RavenError::Protocol("unterminated list".to_string())),
                }
            }
            Ok(Node::List(items))
        }
        Some(Token::ListEnd) => Err(RavenError::Protocol("unexpected ')'".to_string())),
        None => Err(RavenError::Protocol("unexpected end of command".to_string())),
    }
}

/// Checks whether a freshly-read command line ends with a literal announcement
/// (`{N}` or `{N+}`), returning the byte count and whether it is non-synchronizing
/// (`{N+}`, LITERAL+), plus the line with the announcement stripped.
pub fn literal_announcement(line: &str) -> Option<(usize, bool, &str)> {
    let trimmed = line.trim_end();
    let close = trimmed.strip_suffix('}')?;
    let open = close.rfind('{')?;
    let inner = &close[open + 1..];
    let (digits, non_sync) = match inner.strip_suffix('+') {
        Some(d) => (d, true),
        None => (inner, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let size: usize = digits.parse().ok()?;
    Some((size, non_sync, &trimmed[..open]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_atoms_and_quoted_strings() {
        let segs = vec![Segment::Text(r#"INBOX "My Folder""#.to_string())];
        let nodes = parse(&segs).unwrap();
        assert_eq!(
            nodes,
            vec![Node::Atom("INBOX".to_string()), Node::QuotedString("My Folder".to_string())]
        );
    }

    #[test]
    fn parses_nested_lists() {
        let segs = vec![Segment::Text("(FLAGS (\\Seen \\Answered))".to_string())];
        let nodes = parse(&segs).unwrap();
        assert_eq!(
            nodes,
            vec![Node::List(vec![
                Node::Atom("FLAGS".to_string()),
                Node::List(vec![Node::Atom("\\Seen".to_string()), Node::Atom("\\Answered".to_string())])
            ])]
        );
    }

    #[test]
    fn quoted_string_escapes() {
        let segs = vec![Segment::Text(r#""a\"b\\c""#.to_string())];
        let nodes = parse(&segs).unwrap();
        assert_eq!(nodes, vec![Node::QuotedString("a\"b\\c".to_string())]);
    }

    #[test]
    fn literal_segment_becomes_a_single_node() {
        let segs = vec![
            Segment::Text(" ".to_string()),
            Segment::Literal(b"hello world".to_vec()),
            Segment::Text(" {3}".to_string()),
        ];
        let nodes = parse(&segs).unwrap();
        assert_eq!(nodes[0], Node::Literal(b"hello world".to_vec()));
    }

    #[test]
    fn detects_literal_announcement() {
        let (size, non_sync, rest) = literal_announcement("a001 LOGIN {5}").unwrap();
        assert_eq!(size, 5);
        assert!(!non_sync);
        assert_eq!(rest, "a001 LOGIN ");
    }

    #[test]
    fn detects_non_synchronizing_literal() {
        let (size, non_sync, _) = literal_announcement("a001 LOGIN {5+}").unwrap();
        assert_eq!(size, 5);
        assert!(non_sync);
    }

    #[test]
    fn no_announcement_on_plain_line() {
        assert!(literal_announcement("a001 NOOP").is_none());
    }

    #[test]
    fn body_section_with_field_list_stays_one_atom() {
        let segs = vec![Segment::Text("BODY[HEADER.FIELDS (FROM TO)]".to_string())];
        let nodes = parse(&segs).unwrap();
        assert_eq!(nodes, vec![Node::Atom("BODY[HEADER.FIELDS (FROM TO)]".to_string())]);
    }

    #[test]
    fn body_section_inside_a_list_still_closes_the_list() {
        let segs = vec![Segment::Text("(FLAGS BODY[HEADER.FIELDS (FROM TO)])".to_string())];
        let nodes = parse(&segs).unwrap();
        assert_eq!(
            nodes,
            vec![Node::List(vec![
                Node::Atom("FLAGS".to_string()),
                Node::Atom("BODY[HEADER.FIELDS (FROM TO)]".to_string())
            ])]
        );
    }
}
