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

//! IMAP4rev1 session core: a TCP listener handing each connection to its own
//! per-connection state machine, plus the parsing/formatting primitives it uses.

mod broker_client;
pub mod commands;
pub mod fetch_items;
pub mod response;
pub mod search_parser;
mod sequence_set;
pub mod session;
pub mod tokenizer;
pub mod wildcard;

pub use sequence_set::SequenceSet;
pub use session::Session;

use crate::error::Result;
use crate::net;
use crate::store::Store;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ImapServerConfig {
    pub hostname: String,
    pub sasl_broker_socket: PathBuf,
    pub max_message_size: u64,
}

pub struct ImapServer {
    listen_addr: SocketAddr,
    store: Arc<Store>,
    tls_acceptor: Option<TlsAcceptor>,
    config: ImapServerConfig,
}

impl ImapServer {
    pub fn new(
        listen_addr: SocketAddr,
        store: Arc<Store>,
        tls_acceptor: Option<TlsAcceptor>,
        config: ImapServerConfig,
    ) -> Self {
        Self { listen_addr, store, tls_acceptor, config }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!(addr = %self.listen_addr, "imap server listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let store = self.store.clone();
            let tls_acceptor = self.tls_acceptor.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                debug!(%peer, "imap connection accepted");
                let stream = net::MailStream::Plain(socket);
                let mut session = Session::new(stream, store, tls_acceptor, config);
                if let Err(e) = session.run().await {
                    warn!(%peer, error = %e, "imap session ended with error");
                }
            });
        }
    }
}
