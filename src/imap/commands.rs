/*
 * commands.rs
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

//! Command dispatch: one function per RFC 3501 command, driven off the parsed
//! argument `Node`s. A handler either writes its own tagged `OK` into the batch
//! and returns `Ok(())`, or returns an error that `dispatch` turns into the
//! tagged `NO`/`BAD` completion.

use crate::error::{RavenError, Result};
use crate::imap::fetch_items::{self, FetchItem, Section};
use crate::imap::response::{flags_to_atoms, literal_field, ResponseBatch, PERMANENT_FLAGS, SYSTEM_FLAGS};
use crate::imap::search_parser;
use crate::imap::session::{Session, SessionState};
use crate::imap::SequenceSet;
use crate::imap::tokenizer::Node;
use crate::mime::imap_format::{find_part, format_body, format_envelope, format_header_block, parse_structure};
use crate::sasl::{parse_plain_credentials, SaslMechanism};
use crate::store::message::Flag;
use crate::store::partition::{FetchCandidate, StoreOp};
use crate::store::User;
use std::collections::BTreeSet;

pub fn capability_list(session: &Session) -> String {
    let mut caps = vec![
        "IMAP4rev1".to_string(),
        "UIDPLUS".to_string(),
        "IDLE".to_string(),
        "NAMESPACE".to_string(),
        "UNSELECT".to_string(),
        "LITERAL+".to_string(),
    ];
    if session.tls_active {
        caps.push("AUTH=PLAIN".to_string());
    } else {
        caps.push("STARTTLS".to_string());
        caps.push("LOGINDISABLED".to_string());
    }
    caps.join(" ")
}

pub async fn dispatch(session: &mut Session, tag: &str, nodes: &[Node]) -> ResponseBatch {
    let mut batch = ResponseBatch::new();
    let Some(command) = nodes.first().and_then(Node::as_text) else {
        batch.tagged_bad(tag, "missing command");
        return batch;
    };
    let upper = command.to_ascii_uppercase();
    let args = &nodes[1..];

    let result = if upper == "UID" {
        dispatch_uid(session, tag, args, &mut batch).await
    } else {
        dispatch_one(session, tag, &upper, args, &mut batch).await
    };

    if let Err(err) = result {
        batch.tagged_error(tag, &err);
    }
    batch
}

async fn dispatch_one(
    session: &mut Session,
    tag: &str,
    command: &str,
    args: &[Node],
    batch: &mut ResponseBatch,
) -> Result<()> {
    match command {
        "CAPABILITY" => cmd_capability(session, tag, batch),
        "NOOP" => {
            emit_mailbox_updates(session, batch).await?;
            batch.tagged_ok(tag, "NOOP completed");
            Ok(())
        }
        "LOGOUT" => cmd_logout(session, tag, batch),
        "STARTTLS" => cmd_starttls(session, tag, batch),
        "LOGIN" => cmd_login(session, tag, args, batch).await,
        "AUTHENTICATE" => cmd_authenticate(session, tag, args, batch).await,
        "SELECT" => cmd_select(session, tag, args, false, batch).await,
        "EXAMINE" => cmd_select(session, tag, args, true, batch).await,
        "CREATE" => cmd_create(session, tag, args, batch).await,
        "DELETE" => cmd_delete(session, tag, args, batch).await,
        "RENAME" => cmd_rename(session, tag, args, batch).await,
        "SUBSCRIBE" => cmd_subscribe(session, tag, args, batch).await,
        "UNSUBSCRIBE" => cmd_unsubscribe(session, tag, args, batch).await,
        "LIST" => cmd_list(session, tag, args, false, batch).await,
        "LSUB" => cmd_list(session, tag, args, true, batch).await,
        "STATUS" => cmd_status(session, tag, args, batch).await,
        "APPEND" => cmd_append(session, tag, args, batch).await,
        "CHECK" => {
            require_selected(session)?;
            emit_mailbox_updates(session, batch).await?;
            batch.tagged_ok(tag, "CHECK completed");
            Ok(())
        }
        "CLOSE" => cmd_close(session, tag, batch).await,
        "UNSELECT" => cmd_unselect(session, tag, batch).await,
        "EXPUNGE" => cmd_expunge(session, tag, batch).await,
        "SEARCH" => cmd_search(session, tag, args, false, batch).await,
        "FETCH" => cmd_fetch(session, tag, args, false, batch).await,
        "STORE" => cmd_store(session, tag, args, false, batch).await,
        "COPY" => cmd_copy(session, tag, args, false, batch).await,
        other => Err(RavenError::Protocol(format!("unrecognized command: {other}"))),
    }
}

async fn dispatch_uid(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let Some(sub) = args.first().and_then(Node::as_text) else {
        return Err(RavenError::Protocol("UID requires a subcommand".to_string()));
    };
    let rest = &args[1..];
    match sub.to_ascii_uppercase().as_str() {
        "FETCH" => cmd_fetch(session, tag, rest, true, batch).await,
        "STORE" => cmd_store(session, tag, rest, true, batch).await,
        "SEARCH" => cmd_search(session, tag, rest, true, batch).await,
        "COPY" => cmd_copy(session, tag, rest, true, batch).await,
        other => Err(RavenError::Protocol(format!("unsupported UID subcommand: {other}"))),
    }
}

fn require_authenticated(session: &Session) -> Result<User> {
    session
        .state
        .user()
        .cloned()
        .ok_or_else(|| RavenError::Protocol("command requires authentication".to_string()))
}

fn require_selected(session: &Session) -> Result<(User, String, bool)> {
    match &session.state {
        SessionState::Selected { user, mailbox, read_only, .. } => Ok((user.clone(), mailbox.clone(), *read_only)),
        _ => Err(RavenError::Protocol("command requires a selected mailbox".to_string())),
    }
}

fn text_arg(nodes: &[Node], idx: usize) -> Result<String> {
    nodes.get(idx).and_then(Node::as_text).ok_or_else(|| RavenError::Protocol("missing argument".to_string()))
}

fn now_secs() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64
}

fn quote_mailbox(name: &str) -> String {
    if name.chars().all(|c| !c.is_whitespace() && c != '"') {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn cmd_capability(session: &Session, tag: &str, batch: &mut ResponseBatch) -> Result<()> {
    batch.untagged(format!("CAPABILITY {}", capability_list(session)));
    batch.tagged_ok(tag, "CAPABILITY completed");
    Ok(())
}

fn cmd_logout(session: &mut Session, tag: &str, batch: &mut ResponseBatch) -> Result<()> {
    batch.untagged("BYE Raven IMAP4rev1 server signing off");
    session.state = SessionState::Logout;
    batch.tagged_ok(tag, "LOGOUT completed");
    Ok(())
}

fn cmd_starttls(session: &mut Session, tag: &str, batch: &mut ResponseBatch) -> Result<()> {
    if session.tls_active {
        return Err(RavenError::Protocol("already using TLS".to_string()));
    }
    batch.tagged_ok(tag, "begin TLS negotiation now");
    session.request_tls_upgrade();
    Ok(())
}

async fn resolve_user(session: &Session, email: &str) -> Result<User> {
    session.store.find_user_by_email(email).await.ok_or_else(|| RavenError::Auth(format!("no such user: {email}")))
}

async fn cmd_login(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    if !matches!(session.state, SessionState::NotAuthenticated) {
        return Err(RavenError::Protocol("already authenticated".to_string()));
    }
    if !session.tls_active {
        batch.tagged_no(tag, Some("[PRIVACYREQUIRED]"), "LOGIN requires an encrypted connection");
        return Ok(());
    }
    let username = text_arg(args, 0)?;
    let password = text_arg(args, 1)?;
    let socket = session.config.sasl_broker_socket.clone();
    let normalized = crate::imap::broker_client::authenticate_plain(&socket, "", &username, &password)
        .await
        .map_err(RavenError::Auth)?;
    let user = resolve_user(session, &normalized).await?;
    session.state = SessionState::Authenticated { user };
    batch.tagged_ok(tag, "LOGIN completed");
    Ok(())
}

async fn cmd_authenticate(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    if !matches!(session.state, SessionState::NotAuthenticated) {
        return Err(RavenError::Protocol("already authenticated".to_string()));
    }
    if !session.tls_active {
        batch.tagged_no(tag, Some("[PRIVACYREQUIRED]"), "AUTHENTICATE requires an encrypted connection");
        return Ok(());
    }
    let mechanism_name = text_arg(args, 0)?;
    let mechanism = SaslMechanism::from_name(&mechanism_name)
        .ok_or_else(|| RavenError::Protocol(format!("unsupported SASL mechanism: {mechanism_name}")))?;
    if mechanism != SaslMechanism::Plain {
        return Err(RavenError::Protocol(format!("unsupported SASL mechanism: {mechanism_name}")));
    }
    let response = match args.get(1).and_then(Node::as_text) {
        Some(r) => r,
        None => {
            session.send_continuation("").await?;
            let line = session.read_continuation().await?;
            if line.trim() == "*" {
                return Err(RavenError::Protocol("AUTHENTICATE cancelled".to_string()));
            }
            line
        }
    };
    let (authzid, authcid, password) =
        parse_plain_credentials(&response).map_err(|e| RavenError::Protocol(e.to_string()))?;
    let socket = session.config.sasl_broker_socket.clone();
    let normalized = crate::imap::broker_client::authenticate_plain(&socket, &authzid, &authcid, &password)
        .await
        .map_err(RavenError::Auth)?;
    let user = resolve_user(session, &normalized).await?;
    session.state = SessionState::Authenticated { user };
    batch.tagged_ok(tag, "AUTHENTICATE completed");
    Ok(())
}

async fn cmd_select(
    session: &mut Session,
    tag: &str,
    args: &[Node],
    read_only: bool,
    batch: &mut ResponseBatch,
) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let partition = session.store.open_partition(user.id).await?;
    let record = partition.get_mailbox(&name).await?;
    let snapshot = partition.snapshot(&name).await?;
    let exists = snapshot.len() as u32;
    let recent = snapshot.iter().filter(|c| c.flags.contains(&Flag::Recent)).count() as u32;
    let first_unseen = snapshot.iter().find(|c| !c.flags.contains(&Flag::Seen)).map(|c| c.sequence_number);

    batch.untagged(format!("{} EXISTS", exists));
    batch.untagged(format!("{} RECENT", recent));
    if let Some(seq) = first_unseen {
        batch.untagged(format!("OK [UNSEEN {seq}] message {seq} is first unseen"));
    }
    batch.untagged(format!("OK [UIDVALIDITY {}] UIDs valid", record.uid_validity));
    batch.untagged(format!("OK [UIDNEXT {}] predicted next UID", record.uid_next));
    batch.untagged(format!("FLAGS ({})", SYSTEM_FLAGS.join(" ")));
    let permanent = if read_only { String::new() } else { PERMANENT_FLAGS.join(" ") };
    batch.untagged(format!("OK [PERMANENTFLAGS ({permanent})] flags permitted"));

    session.state =
        SessionState::Selected { user, mailbox: name, read_only, last_exists: exists, last_recent: recent };
    let verb = if read_only { "EXAMINE" } else { "SELECT" };
    let mode = if read_only { "READ-ONLY" } else { "READ-WRITE" };
    batch.tagged_ok(tag, format!("[{mode}] {verb} completed"));
    Ok(())
}

/// Emits untagged `EXISTS`/`RECENT` only when the mailbox has changed since it was
/// last reported (at SELECT/EXAMINE, or the previous NOOP/CHECK), per RFC 3501 §5.2.
/// A no-op outside a selected mailbox.
async fn emit_mailbox_updates(session: &mut Session, batch: &mut ResponseBatch) -> Result<()> {
    let (user, mailbox, last_exists, last_recent) = match &session.state {
        SessionState::Selected { user, mailbox, last_exists, last_recent, .. } => {
            (user.clone(), mailbox.clone(), *last_exists, *last_recent)
        }
        _ => return Ok(()),
    };
    let partition = session.store.open_partition(user.id).await?;
    let snapshot = partition.snapshot(&mailbox).await?;
    let exists = snapshot.len() as u32;
    let recent = snapshot.iter().filter(|c| c.flags.contains(&Flag::Recent)).count() as u32;
    if exists != last_exists {
        batch.untagged(format!("{} EXISTS", exists));
    }
    if recent != last_recent {
        batch.untagged(format!("{} RECENT", recent));
    }
    if let SessionState::Selected { last_exists, last_recent, .. } = &mut session.state {
        *last_exists = exists;
        *last_recent = recent;
    }
    Ok(())
}

async fn cmd_create(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let partition = session.store.open_partition(user.id).await?;
    partition.create_mailbox(&name).await?;
    batch.tagged_ok(tag, "CREATE completed");
    Ok(())
}

async fn cmd_delete(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let partition = session.store.open_partition(user.id).await?;
    partition.delete_mailbox(&name).await?;
    batch.tagged_ok(tag, "DELETE completed");
    Ok(())
}

async fn cmd_rename(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let old = text_arg(args, 0)?;
    let new = text_arg(args, 1)?;
    let partition = session.store.open_partition(user.id).await?;
    partition.rename_mailbox(&old, &new).await?;
    batch.tagged_ok(tag, "RENAME completed");
    Ok(())
}

async fn cmd_subscribe(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let partition = session.store.open_partition(user.id).await?;
    partition.subscribe(&name).await?;
    batch.tagged_ok(tag, "SUBSCRIBE completed");
    Ok(())
}

async fn cmd_unsubscribe(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let partition = session.store.open_partition(user.id).await?;
    partition.unsubscribe(&name).await?;
    batch.tagged_ok(tag, "UNSUBSCRIBE completed");
    Ok(())
}

async fn cmd_list(
    session: &mut Session,
    tag: &str,
    args: &[Node],
    lsub: bool,
    batch: &mut ResponseBatch,
) -> Result<()> {
    let user = require_authenticated(session)?;
    let reference = text_arg(args, 0)?;
    let pattern = text_arg(args, 1)?;
    let partition = session.store.open_partition(user.id).await?;
    let entries =
        if lsub { partition.list_subscriptions(&reference, &pattern).await? } else { partition.list_mailboxes(&reference, &pattern).await? };
    let verb = if lsub { "LSUB" } else { "LIST" };
    for entry in entries {
        let mut attrs = Vec::new();
        if !entry.selectable {
            attrs.push("\\Noselect");
        }
        attrs.push(if entry.has_children { "\\HasChildren" } else { "\\HasNoChildren" });
        batch.untagged(format!("{verb} ({}) \"/\" {}", attrs.join(" "), quote_mailbox(&entry.name)));
    }
    batch.tagged_ok(tag, format!("{verb} completed"));
    Ok(())
}

async fn cmd_status(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let items: Vec<String> = match args.get(1) {
        Some(Node::List(items)) => items.iter().filter_map(Node::as_text).collect(),
        _ => return Err(RavenError::Protocol("STATUS requires an item list".to_string())),
    };
    let partition = session.store.open_partition(user.id).await?;
    let record = partition.get_mailbox(&name).await?;
    let snapshot = partition.snapshot(&name).await?;
    let mut parts = Vec::new();
    for item in &items {
        let upper = item.to_ascii_uppercase();
        let value: u64 = match upper.as_str() {
            "MESSAGES" => snapshot.len() as u64,
            "RECENT" => snapshot.iter().filter(|c| c.flags.contains(&Flag::Recent)).count() as u64,
            "UIDNEXT" => record.uid_next as u64,
            "UIDVALIDITY" => record.uid_validity as u64,
            "UNSEEN" => snapshot.iter().filter(|c| !c.flags.contains(&Flag::Seen)).count() as u64,
            other => return Err(RavenError::Protocol(format!("unrecognized STATUS item: {other}"))),
        };
        parts.push(format!("{upper} {value}"));
    }
    batch.untagged(format!("STATUS {} ({})", quote_mailbox(&name), parts.join(" ")));
    batch.tagged_ok(tag, "STATUS completed");
    Ok(())
}

async fn cmd_append(session: &mut Session, tag: &str, args: &[Node], batch: &mut ResponseBatch) -> Result<()> {
    let user = require_authenticated(session)?;
    let name = text_arg(args, 0)?;
    let mut idx = 1;
    let mut flags = BTreeSet::new();
    if let Some(Node::List(items)) = args.get(idx) {
        for item in items {
            if let Some(text) = item.as_text() {
                flags.insert(Flag::parse(&text));
            }
        }
        idx += 1;
    }
    let mut internal_date = now_secs();
    if let Some(Node::QuotedString(text)) = args.get(idx) {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(text) {
            internal_date = dt.timestamp();
            idx += 1;
        }
    }
    let raw: Vec<u8> = match args.get(idx) {
        Some(Node::Literal(bytes)) => bytes.clone(),
        Some(node) => node.as_text().map(String::into_bytes).unwrap_or_default(),
        None => return Err(RavenError::Protocol("APPEND requires a message literal".to_string())),
    };
    if raw.len() as u64 > session.config.max_message_size {
        return Err(RavenError::Protocol("[TOOBIG] message exceeds the configured size limit".to_string()));
    }
    let partition = session.store.open_partition(user.id).await?;
    let (uid, uidvalidity) = partition.append_message(&name, &raw, flags, internal_date).await?;
    batch.tagged_ok(tag, format!("[APPENDUID {uidvalidity} {uid}] APPEND completed"));
    Ok(())
}

async fn cmd_close(session: &mut Session, tag: &str, batch: &mut ResponseBatch) -> Result<()> {
    let (user, mailbox, read_only) = require_selected(session)?;
    if !read_only {
        let partition = session.store.open_partition(user.id).await?;
        partition.expunge(&mailbox).await?;
    }
    session.state = SessionState::Authenticated { user };
    batch.tagged_ok(tag, "CLOSE completed");
    Ok(())
}

async fn cmd_unselect(session: &mut Session, tag: &str, batch: &mut ResponseBatch) -> Result<()> {
    let (user, _, _) = require_selected(session)?;
    session.state = SessionState::Authenticated { user };
    batch.tagged_ok(tag, "UNSELECT completed");
    Ok(())
}

async fn cmd_expunge(session: &mut Session, tag: &str, batch: &mut ResponseBatch) -> Result<()> {
    let (user, mailbox, read_only) = require_selected(session)?;
    if read_only {
        return Err(RavenError::Protocol("mailbox is read-only".to_string()));
    }
    let partition = session.store.open_partition(user.id).await?;
    let removed = partition.expunge(&mailbox).await?;
    for seq in removed {
        batch.untagged(format!("{seq} EXPUNGE"));
    }
    batch.tagged_ok(tag, "EXPUNGE completed");
    Ok(())
}

async fn cmd_search(
    session: &mut Session,
    tag: &str,
    args: &[Node],
    uid_mode: bool,
    batch: &mut ResponseBatch,
) -> Result<()> {
    let (user, mailbox, _) = require_selected(session)?;
    let partition = session.store.open_partition(user.id).await?;
    let snapshot = partition.snapshot(&mailbox).await?;
    let max_seq = snapshot.len() as u32;
    let max_uid = snapshot.last().map(|c| c.uid).unwrap_or(0);
    let key = search_parser::parse(args, max_seq, max_uid)?;
    let hits = partition.search(&mailbox, &key).await?;
    let numbers: Vec<u32> = hits.into_iter().map(|(seq, uid)| if uid_mode { uid } else { seq }).collect();
    let body = numbers.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
    if body.is_empty() {
        batch.untagged("SEARCH");
    } else {
        batch.untagged(format!("SEARCH {body}"));
    }
    batch.tagged_ok(tag, "SEARCH completed");
    Ok(())
}

fn resolve_targets(snapshot: &[FetchCandidate], set: &SequenceSet, uid_mode: bool) -> Vec<u32> {
    let max = if uid_mode { snapshot.last().map(|c| c.uid).unwrap_or(0) } else { snapshot.len() as u32 };
    let wanted: BTreeSet<u32> = set.resolve(max).into_iter().collect();
    snapshot
        .iter()
        .filter(|c| wanted.contains(&if uid_mode { c.uid } else { c.sequence_number }))
        .map(|c| c.uid)
        .collect()
}

async fn cmd_fetch(
    session: &mut Session,
    tag: &str,
    args: &[Node],
    uid_mode: bool,
    batch: &mut ResponseBatch,
) -> Result<()> {
    let (user, mailbox, _) = require_selected(session)?;
    let set_text = text_arg(args, 0)?;
    let set = SequenceSet::parse(&set_text)?;
    let items = fetch_items::parse(&args[1..])?;
    let partition = session.store.open_partition(user.id).await?;
    let snapshot = partition.snapshot(&mailbox).await?;

    if !uid_mode {
        let max = snapshot.len() as u32;
        if set.resolve(max).into_iter().any(|n| n > max) {
            batch.tagged_bad(tag, "FETCH sequence number exceeds the number of messages in the mailbox");
            return Ok(());
        }
    }

    let wanted_uids: BTreeSet<u32> = resolve_targets(&snapshot, &set, uid_mode).into_iter().collect();

    let mut seen_uids = Vec::new();
    for candidate in &snapshot {
        if !wanted_uids.contains(&candidate.uid) {
            continue;
        }
        let line = render_fetch(candidate, &items, uid_mode)?;
        batch.untagged_raw(line);
        if items.iter().any(FetchItem::sets_seen) {
            seen_uids.push(candidate.uid);
        }
    }
    if !seen_uids.is_empty() {
        let mut seen = BTreeSet::new();
        seen.insert(Flag::Seen);
        partition.store_flags(&mailbox, &seen_uids, StoreOp::Add, seen).await?;
    }
    batch.tagged_ok(tag, "FETCH completed");
    Ok(())
}

async fn cmd_store(
    session: &mut Session,
    tag: &str,
    args: &[Node],
    uid_mode: bool,
    batch: &mut ResponseBatch,
) -> Result<()> {
    let (user, mailbox, read_only) = require_selected(session)?;
    if read_only {
        return Err(RavenError::Protocol("mailbox is read-only".to_string()));
    }
    let set_text = text_arg(args, 0)?;
    let set = SequenceSet::parse(&set_text)?;
    let mode_text = text_arg(args, 1)?.to_ascii_uppercase();
    let (op, silent) = match mode_text.as_str() {
        "FLAGS" => (StoreOp::Replace, false),
        "FLAGS.SILENT" => (StoreOp::Replace, true),
        "+FLAGS" => (StoreOp::Add, false),
        "+FLAGS.SILENT" => (StoreOp::Add, true),
        "-FLAGS" => (StoreOp::Remove, false),
        "-FLAGS.SILENT" => (StoreOp::Remove, true),
        other => return Err(RavenError::Protocol(format!("unrecognized STORE mode: {other}"))),
    };
    let flag_nodes: Vec<Node> = match args.get(2) {
        Some(Node::List(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => return Err(RavenError::Protocol("STORE requires a flag list".to_string())),
    };
    let flags: BTreeSet<Flag> = flag_nodes.iter().filter_map(Node::as_text).map(|s| Flag::parse(&s)).collect();

    let partition = session.store.open_partition(user.id).await?;
    let snapshot = partition.snapshot(&mailbox).await?;
    let target_uids = resolve_targets(&snapshot, &set, uid_mode);
    let results = partition.store_flags(&mailbox, &target_uids, op, flags).await?;
    if !silent {
        for r in &results {
            let mut line = format!("{} FETCH (FLAGS ({})", r.sequence_number, flags_to_atoms(&r.flags));
            if uid_mode {
                line.push_str(&format!(" UID {}", r.uid));
            }
            line.push_str(")\r\n");
            batch.untagged_raw(line.into_bytes());
        }
    }
    batch.tagged_ok(tag, "STORE completed");
    Ok(())
}

async fn cmd_copy(
    session: &mut Session,
    tag: &str,
    args: &[Node],
    uid_mode: bool,
    batch: &mut ResponseBatch,
) -> Result<()> {
    let (user, mailbox, _) = require_selected(session)?;
    let set_text = text_arg(args, 0)?;
    let set = SequenceSet::parse(&set_text)?;
    let dest = text_arg(args, 1)?;
    let partition = session.store.open_partition(user.id).await?;
    let snapshot = partition.snapshot(&mailbox).await?;
    let target_uids = resolve_targets(&snapshot, &set, uid_mode);
    let assigned = partition.copy(&mailbox, &target_uids, &dest).await?;
    if assigned.is_empty() {
        batch.tagged_ok(tag, "COPY completed");
        return Ok(());
    }
    let dest_record = partition.get_mailbox(&dest).await?;
    let src_uids: Vec<String> = assigned.iter().map(|(s, _)| s.to_string()).collect();
    let dst_uids: Vec<String> = assigned.iter().map(|(_, d)| d.to_string()).collect();
    batch.tagged_ok(
        tag,
        format!(
            "[COPYUID {} {} {}] COPY completed",
            dest_record.uid_validity,
            src_uids.join(","),
            dst_uids.join(",")
        ),
    );
    Ok(())
}

fn find_double_crlf(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn header_block(raw: &[u8]) -> Vec<u8> {
    match find_double_crlf(raw) {
        Some(pos) => raw[..pos + 4].to_vec(),
        None => raw.to_vec(),
    }
}

fn body_text(raw: &[u8]) -> &[u8] {
    match find_double_crlf(raw) {
        Some(pos) => &raw[pos + 4..],
        None => &[],
    }
}

/// Keeps (or, if `negate`, drops) the named header fields from an already-isolated
/// header block, handling simple RFC 5322 line folding.
fn filter_header_fields(header: &[u8], names: &[String], negate: bool) -> Vec<u8> {
    let text = String::from_utf8_lossy(header);
    let wanted: Vec<String> = names.iter().map(|n| n.to_ascii_uppercase()).collect();
    let mut out = String::new();
    let mut current: Option<(String, String)> = None;
    fn flush(current: &mut Option<(String, String)>, out: &mut String, wanted: &[String], negate: bool) {
        if let Some((name, value)) = current.take() {
            if wanted.contains(&name.to_ascii_uppercase()) != negate {
                out.push_str(&name);
                out.push_str(": ");
                out.push_str(&value);
                out.push_str("\r\n");
            }
        }
    }
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && current.is_some() {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        flush(&mut current, &mut out, &wanted, negate);
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.to_string(), value.trim().to_string()));
        }
    }
    flush(&mut current, &mut out, &wanted, negate);
    out.push_str("\r\n");
    out.into_bytes()
}

fn render_fetch(candidate: &FetchCandidate, items: &[FetchItem], uid_mode: bool) -> Result<Vec<u8>> {
    let will_see = items.iter().any(FetchItem::sets_seen);
    let mut effective_flags = candidate.flags.clone();
    if will_see {
        effective_flags.insert(Flag::Seen);
    }
    let mut parts: Vec<Vec<u8>> = Vec::new();
    if uid_mode && !items.contains(&FetchItem::Uid) {
        parts.push(format!("UID {}", candidate.uid).into_bytes());
    }
    for item in items {
        parts.push(render_item(candidate, item, &effective_flags)?);
    }
    let mut out = format!("{} FETCH (", candidate.sequence_number).into_bytes();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(part);
    }
    out.extend_from_slice(b")\r\n");
    Ok(out)
}

fn render_item(candidate: &FetchCandidate, item: &FetchItem, flags: &BTreeSet<Flag>) -> Result<Vec<u8>> {
    match item {
        FetchItem::Uid => Ok(format!("UID {}", candidate.uid).into_bytes()),
        FetchItem::Flags => Ok(format!("FLAGS ({})", flags_to_atoms(flags)).into_bytes()),
        FetchItem::InternalDate => {
            let dt = chrono::DateTime::from_timestamp(candidate.internal_date, 0).unwrap_or_default();
            Ok(format!("INTERNALDATE \"{}\"", dt.format("%d-%b-%Y %H:%M:%S +0000")).into_bytes())
        }
        FetchItem::Rfc822Size => Ok(format!("RFC822.SIZE {}", candidate.message.size).into_bytes()),
        FetchItem::Envelope => Ok(format!("ENVELOPE {}", format_envelope(&candidate.message.envelope)).into_bytes()),
        FetchItem::Rfc822 => Ok(literal_field("RFC822", &candidate.message.raw)),
        FetchItem::Rfc822Header => Ok(literal_field("RFC822.HEADER", &header_block(&candidate.message.raw))),
        FetchItem::Rfc822Text => Ok(literal_field("RFC822.TEXT", body_text(&candidate.message.raw))),
        FetchItem::BodyStructure => {
            let node = parse_structure(&candidate.message.raw).map_err(|e| RavenError::Fatal(e.to_string()))?;
            Ok(format!("BODYSTRUCTURE {}", format_body(&node, true)).into_bytes())
        }
        FetchItem::Body => {
            let node = parse_structure(&candidate.message.raw).map_err(|e| RavenError::Fatal(e.to_string()))?;
            Ok(format!("BODY {}", format_body(&node, false)).into_bytes())
        }
        FetchItem::BodySection { section, partial, .. } => render_body_section(candidate, section, *partial),
    }
}

fn render_body_section(candidate: &FetchCandidate, section: &Section, partial: Option<(u64, u64)>) -> Result<Vec<u8>> {
    let raw = &candidate.message.raw;
    let (name, mut data): (String, Vec<u8>) = match section {
        Section::Full => ("BODY[]".to_string(), raw.clone()),
        Section::Header => ("BODY[HEADER]".to_string(), header_block(raw)),
        Section::Text => ("BODY[TEXT]".to_string(), body_text(raw).to_vec()),
        Section::HeaderFields { names, negate } => {
            let header = header_block(raw);
            let verb = if *negate { "HEADER.FIELDS.NOT" } else { "HEADER.FIELDS" };
            (format!("BODY[{verb} ({})]", names.join(" ")), filter_header_fields(&header, names, *negate))
        }
        Section::Part(path) => {
            let root = parse_structure(raw).map_err(|e| RavenError::Fatal(e.to_string()))?;
            let node = find_part(&root, path).ok_or_else(|| RavenError::Protocol("no such MIME part".to_string()))?;
            (format!("BODY[{}]", path_label(path)), node.body.clone())
        }
        Section::PartHeader(path) => {
            let root = parse_structure(raw).map_err(|e| RavenError::Fatal(e.to_string()))?;
            let node = find_part(&root, path).ok_or_else(|| RavenError::Protocol("no such MIME part".to_string()))?;
            (format!("BODY[{}.HEADER]", path_label(path)), format_header_block(node))
        }
        Section::PartText(path) => {
            let root = parse_structure(raw).map_err(|e| RavenError::Fatal(e.to_string()))?;
            let node = find_part(&root, path).ok_or_else(|| RavenError::Protocol("no such MIME part".to_string()))?;
            (format!("BODY[{}.TEXT]", path_label(path)), node.body.clone())
        }
    };
    if let Some((origin, length)) = partial {
        let start = (origin as usize).min(data.len());
        let end = (start + length as usize).min(data.len());
        data = data[start..end].to_vec();
    }
    Ok(literal_field(&name, &data))
}

fn path_label(path: &[u32]) -> String {
    path.iter().map(u32::to_string).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_mailbox_only_when_needed() {
        assert_eq!(quote_mailbox("INBOX"), "INBOX");
        assert_eq!(quote_mailbox("My Folder"), "\"My Folder\"");
    }

    #[test]
    fn header_block_stops_at_blank_line() {
        let raw = b"Subject: hi\r\nFrom: a@b\r\n\r\nbody text";
        assert_eq!(header_block(raw), b"Subject: hi\r\nFrom: a@b\r\n\r\n".to_vec());
        assert_eq!(body_text(raw), b"body text");
    }

    #[test]
    fn filter_header_fields_keeps_only_named() {
        let header = b"Subject: hi\r\nFrom: a@b\r\nTo: c@d\r\n\r\n";
        let names = vec!["FROM".to_string()];
        let filtered = filter_header_fields(header, &names, false);
        assert_eq!(filtered, b"From: a@b\r\n\r\n".to_vec());
    }

    #[test]
    fn filter_header_fields_can_negate() {
        let header = b"Subject: hi\r\nFrom: a@b\r\n\r\n";
        let names = vec!["FROM".to_string()];
        let filtered = filter_header_fields(header, &names, true);
        assert_eq!(filtered, b"Subject: hi\r\n\r\n".to_vec());
    }

    #[test]
    fn path_label_joins_with_dots() {
        assert_eq!(path_label(&[1, 2, 3]), "1.2.3");
    }
}
