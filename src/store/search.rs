/*
 * search.rs
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

//! SEARCH key grammar and evaluation against a loaded `Message` + its membership entry.

use crate::store::membership::MembershipEntry;
use crate::store::message::{Flag, Message};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone)]
pub enum SearchKey {
    All,
    Answered,
    Unanswered,
    Deleted,
    Undeleted,
    Seen,
    Unseen,
    Flagged,
    Unflagged,
    Draft,
    Undraft,
    New,
    Old,
    Recent,
    From(String),
    To(String),
    Cc(String),
    Bcc(String),
    Subject(String),
    Body(String),
    Text(String),
    Header(String, String),
    Before(NaiveDate),
    On(NaiveDate),
    Since(NaiveDate),
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    Larger(u64),
    Smaller(u64),
    Uid(Vec<u32>),
    SequenceSet(Vec<u32>),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    And(Vec<SearchKey>),
}

/// Context for one candidate message: its membership row (uid/flags/date), sequence number
/// in the current snapshot, and the parsed raw message.
pub struct SearchContext<'a> {
    pub message: &'a Message,
    pub membership: &'a MembershipEntry,
    pub sequence_number: u32,
}

pub fn evaluate(key: &SearchKey, ctx: &SearchContext<'_>) -> bool {
    match key {
        SearchKey::All => true,
        SearchKey::Answered => ctx.membership.flags.contains(&Flag::Answered),
        SearchKey::Unanswered => !ctx.membership.flags.contains(&Flag::Answered),
        SearchKey::Deleted => ctx.membership.flags.contains(&Flag::Deleted),
        SearchKey::Undeleted => !ctx.membership.flags.contains(&Flag::Deleted),
        SearchKey::Seen => ctx.membership.flags.contains(&Flag::Seen),
        SearchKey::Unseen => !ctx.membership.flags.contains(&Flag::Seen),
        SearchKey::Flagged => ctx.membership.flags.contains(&Flag::Flagged),
        SearchKey::Unflagged => !ctx.membership.flags.contains(&Flag::Flagged),
        SearchKey::Draft => ctx.membership.flags.contains(&Flag::Draft),
        SearchKey::Undraft => !ctx.membership.flags.contains(&Flag::Draft),
        SearchKey::Recent => ctx.membership.flags.contains(&Flag::Recent),
        SearchKey::New => ctx.membership.flags.contains(&Flag::Recent) && !ctx.membership.flags.contains(&Flag::Seen),
        SearchKey::Old => !ctx.membership.flags.contains(&Flag::Recent),
        SearchKey::From(s) => addr_contains(&ctx.message.envelope.from, s),
        SearchKey::To(s) => addr_contains(&ctx.message.envelope.to, s),
        SearchKey::Cc(s) => addr_contains(&ctx.message.envelope.cc, s),
        SearchKey::Bcc(s) => addr_contains(&ctx.message.envelope.bcc, s),
        SearchKey::Subject(s) => ctx
            .message
            .envelope
            .subject
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase()
            .contains(&s.to_ascii_lowercase()),
        SearchKey::Body(s) => body_text(ctx.message).to_ascii_lowercase().contains(&s.to_ascii_lowercase()),
        SearchKey::Text(s) => {
            let needle = s.to_ascii_lowercase();
            String::from_utf8_lossy(&ctx.message.raw).to_ascii_lowercase().contains(&needle)
        }
        SearchKey::Header(name, value) => header_contains(ctx.message, name, value),
        SearchKey::Before(date) => internal_date(ctx) < *date,
        SearchKey::On(date) => internal_date(ctx) == *date,
        SearchKey::Since(date) => internal_date(ctx) >= *date,
        SearchKey::SentBefore(date) => envelope_date(ctx.message).map(|d| d < *date).unwrap_or(false),
        SearchKey::SentOn(date) => envelope_date(ctx.message).map(|d| d == *date).unwrap_or(false),
        SearchKey::SentSince(date) => envelope_date(ctx.message).map(|d| d >= *date).unwrap_or(false),
        SearchKey::Larger(n) => ctx.message.size > *n,
        SearchKey::Smaller(n) => ctx.message.size < *n,
        SearchKey::Uid(uids) => uids.contains(&ctx.membership.uid),
        SearchKey::SequenceSet(seqs) => seqs.contains(&ctx.sequence_number),
        SearchKey::Not(inner) => !evaluate(inner, ctx),
        SearchKey::Or(a, b) => evaluate(a, ctx) || evaluate(b, ctx),
        SearchKey::And(keys) => keys.iter().all(|k| evaluate(k, ctx)),
    }
}

fn addr_contains(addrs: &[crate::store::message::Address], needle: &str) -> bool {
    let needle = needle.to_ascii_lowercase();
    addrs.iter().any(|a| {
        let full = match &a.domain {
            Some(d) => format!("{}@{}", a.local_part, d),
            None => a.local_part.clone(),
        };
        full.to_ascii_lowercase().contains(&needle)
            || a.display_name.as_deref().unwrap_or("").to_ascii_lowercase().contains(&needle)
    })
}

fn body_text(message: &Message) -> String {
    match message.raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(idx) => String::from_utf8_lossy(&message.raw[idx + 4..]).to_string(),
        None => String::new(),
    }
}

fn header_contains(message: &Message, name: &str, value: &str) -> bool {
    let header_end = message.raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(message.raw.len());
    let header_text = String::from_utf8_lossy(&message.raw[..header_end]);
    let needle = value.to_ascii_lowercase();
    header_text.lines().any(|line| {
        if let Some((k, v)) = line.split_once(':') {
            k.trim().eq_ignore_ascii_case(name) && v.to_ascii_lowercase().contains(&needle)
        } else {
            false
        }
    })
}

fn internal_date(ctx: &SearchContext<'_>) -> NaiveDate {
    DateTime::<Utc>::from_timestamp(ctx.membership.internal_date, 0)
        .map(|d| d.date_naive())
        .unwrap_or_default()
}

fn envelope_date(message: &Message) -> Option<NaiveDate> {
    let raw = message.envelope.date.as_deref()?;
    DateTime::parse_from_rfc2822(raw).ok().map(|d| d.date_naive())
}
