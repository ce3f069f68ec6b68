/*
 * search_parser.rs
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

//! Parses a SEARCH command's argument nodes into `store::search::SearchKey`.
//! Juxtaposed keys combine as an implicit AND; `CHARSET` must name UTF-8.

use crate::error::{RavenError, Result};
use crate::imap::sequence_set::SequenceSet;
use crate::imap::tokenizer::Node;
use crate::store::search::SearchKey;
use chrono::NaiveDate;

/// `max_seq`/`max_uid` resolve any bare `*` in a sequence-set or UID-set key.
pub fn parse(nodes: &[Node], max_seq: u32, max_uid: u32) -> Result<SearchKey> {
    let mut pos = 0;
    if let Some(Node::Atom(a)) = nodes.first() {
        if a.eq_ignore_ascii_case("CHARSET") {
            let charset = require_text(nodes, 1)?;
            if !charset.eq_ignore_ascii_case("UTF-8") {
                return Err(RavenError::Protocol(format!("[BADCHARSET (UTF-8)] unsupported charset {charset}")));
            }
            pos = 2;
        }
    }
    if pos >= nodes.len() {
        return Err(RavenError::Protocol("empty SEARCH key list".to_string()));
    }
    let mut keys = Vec::new();
    while pos < nodes.len() {
        let (key, consumed) = parse_one(&nodes[pos..], max_seq, max_uid)?;
        keys.push(key);
        pos += consumed;
    }
    Ok(if keys.len() == 1 { keys.into_iter().next().unwrap() } else { SearchKey::And(keys) })
}

fn parse_one(nodes: &[Node], max_seq: u32, max_uid: u32) -> Result<(SearchKey, usize)> {
    match nodes.first() {
        Some(Node::List(inner)) => Ok((parse(inner, max_seq, max_uid)?, 1)),
        Some(Node::Atom(a)) => {
            let upper = a.to_ascii_uppercase();
            match upper.as_str() {
                "ALL" => Ok((SearchKey::All, 1)),
                "ANSWERED" => Ok((SearchKey::Answered, 1)),
                "UNANSWERED" => Ok((SearchKey::Unanswered, 1)),
                "DELETED" => Ok((SearchKey::Deleted, 1)),
                "UNDELETED" => Ok((SearchKey::Undeleted, 1)),
                "SEEN" => Ok((SearchKey::Seen, 1)),
                "UNSEEN" => Ok((SearchKey::Unseen, 1)),
                "FLAGGED" => Ok((SearchKey::Flagged, 1)),
                "UNFLAGGED" => Ok((SearchKey::Unflagged, 1)),
                "DRAFT" => Ok((SearchKey::Draft, 1)),
                "UNDRAFT" => Ok((SearchKey::Undraft, 1)),
                "NEW" => Ok((SearchKey::New, 1)),
                "OLD" => Ok((SearchKey::Old, 1)),
                "RECENT" => Ok((SearchKey::Recent, 1)),
                "FROM" => Ok((SearchKey::From(require_text(nodes, 1)?), 2)),
                "TO" => Ok((SearchKey::To(require_text(nodes, 1)?), 2)),
                "CC" => Ok((SearchKey::Cc(require_text(nodes, 1)?), 2)),
                "BCC" => Ok((SearchKey::Bcc(require_text(nodes, 1)?), 2)),
                "SUBJECT" => Ok((SearchKey::Subject(require_text(nodes, 1)?), 2)),
                "BODY" => Ok((SearchKey::Body(require_text(nodes, 1)?), 2)),
                "TEXT" => Ok((SearchKey::Text(require_text(nodes, 1)?), 2)),
                "HEADER" => {
                    let name = require_text(nodes, 1)?;
                    let value = require_text(nodes, 2)?;
                    Ok((SearchKey::Header(name, value), 3))
                }
                "BEFORE" => Ok((SearchKey::Before(require_date(nodes, 1)?), 2)),
                "ON" => Ok((SearchKey::On(require_date(nodes, 1)?), 2)),
                "SINCE" => Ok((SearchKey::Since(require_date(nodes, 1)?), 2)),
                "SENTBEFORE" => Ok((SearchKey::SentBefore(require_date(nodes, 1)?), 2)),
                "SENTON" => Ok((SearchKey::SentOn(require_date(nodes, 1)?), 2)),
                "SENTSINCE" => Ok((SearchKey::SentSince(require_date(nodes, 1)?), 2)),
                "LARGER" => Ok((SearchKey::Larger(require_number(nodes, 1)?), 2)),
                "SMALLER" => Ok((SearchKey::Smaller(require_number(nodes, 1)?), 2)),
                "UID" => {
                    let text = require_text(nodes, 1)?;
                    let set = SequenceSet::parse(&text)?;
                    Ok((SearchKey::Uid(set.resolve(max_uid)), 2))
                }
                "NOT" => {
                    let (inner, consumed) = parse_one(&nodes[1..], max_seq, max_uid)?;
                    Ok((SearchKey::Not(Box::new(inner)), 1 + consumed))
                }
                "OR" => {
                    let (a, na) = parse_one(&nodes[1..], max_seq, max_uid)?;
                    let (b, nb) = parse_one(&nodes[1 + na..], max_seq, max_uid)?;
                    Ok((SearchKey::Or(Box::new(a), Box::new(b)), 1 + na + nb))
                }
                _ => {
                    let set = SequenceSet::parse(a)
                        .map_err(|_| RavenError::Protocol(format!("unrecognized SEARCH key: {a}")))?;
                    Ok((SearchKey::SequenceSet(set.resolve(max_seq)), 1))
                }
            }
        }
        Some(Node::QuotedString(s)) => {
            let set = SequenceSet::parse(s)?;
            Ok((SearchKey::SequenceSet(set.resolve(max_seq)), 1))
        }
        Some(Node::Literal(_)) => Err(RavenError::Protocol("literal not valid as a SEARCH key".to_string())),
        None => Err(RavenError::Protocol("expected a SEARCH key".to_string())),
    }
}

fn require_text(nodes: &[Node], idx: usize) -> Result<String> {
    nodes
        .get(idx)
        .and_then(Node::as_text)
        .ok_or_else(|| RavenError::Protocol("expected a string argument".to_string()))
}

fn require_number(nodes: &[Node], idx: usize) -> Result<u64> {
    require_text(nodes, idx)?
        .parse()
        .map_err(|_| RavenError::Protocol("expected a number".to_string()))
}

/// IMAP SEARCH dates are `DD-Mon-YYYY` (RFC 3501 `date-text`).
fn require_date(nodes: &[Node], idx: usize) -> Result<NaiveDate> {
    let text = require_text(nodes, idx)?;
    NaiveDate::parse_from_str(&text, "%d-%b-%Y").map_err(|_| RavenError::Protocol(format!("invalid date: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::tokenizer::{parse as parse_nodes, Segment};

    fn nodes(s: &str) -> Vec<Node> {
        parse_nodes(&[Segment::Text(s.to_string())]).unwrap()
    }

    #[test]
    fn simple_key() {
        let key = parse(&nodes("UNSEEN"), 10, 10).unwrap();
        assert!(matches!(key, SearchKey::Unseen));
    }

    #[test]
    fn implicit_and_of_juxtaposed_keys() {
        let key = parse(&nodes("SEEN FLAGGED"), 10, 10).unwrap();
        match key {
            SearchKey::And(keys) => assert_eq!(keys.len(), 2),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn or_takes_exactly_two_keys() {
        let key = parse(&nodes("OR SEEN FLAGGED"), 10, 10).unwrap();
        assert!(matches!(key, SearchKey::Or(_, _)));
    }

    #[test]
    fn header_takes_two_strings() {
        let key = parse(&nodes(r#"HEADER "X-Spam" "yes""#), 10, 10).unwrap();
        match key {
            SearchKey::Header(name, value) => {
                assert_eq!(name, "X-Spam");
                assert_eq!(value, "yes");
            }
            _ => panic!("expected Header"),
        }
    }

    #[test]
    fn bad_charset_is_rejected() {
        let err = parse(&nodes("CHARSET ISO-8859-1 ALL"), 10, 10).unwrap_err();
        assert!(matches!(err, RavenError::Protocol(m) if m.contains("BADCHARSET")));
    }

    #[test]
    fn bare_sequence_set_resolves_star() {
        let key = parse(&nodes("2:*"), 5, 5).unwrap();
        assert_eq!(key_seqs(&key), vec![2, 3, 4, 5]);
    }

    fn key_seqs(key: &SearchKey) -> Vec<u32> {
        match key {
            SearchKey::SequenceSet(v) => v.clone(),
            _ => panic!("expected SequenceSet"),
        }
    }
}
