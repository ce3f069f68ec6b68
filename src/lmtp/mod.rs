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

//! LMTP ingress: a TCP listener and an optional Unix-socket listener, each handing
//! connections off to their own [`LmtpSession`]. Plain text only; this dialect has
//! no STARTTLS (local delivery is expected to run inside a trusted network).

mod dot_stuffer;
mod dot_unstuffer;
pub mod session;

pub use session::{LmtpConfig, LmtpSession};

use crate::error::Result;
use crate::store::Store;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info, warn};

pub struct LmtpServer {
    listen_addr: SocketAddr,
    unix_socket: Option<PathBuf>,
    store: Arc<Store>,
    config: LmtpConfig,
}

impl LmtpServer {
    pub fn new(listen_addr: SocketAddr, unix_socket: Option<PathBuf>, store: Arc<Store>, config: LmtpConfig) -> Self {
        Self { listen_addr, unix_socket, store, config }
    }

    pub async fn run(&self) -> Result<()> {
        match &self.unix_socket {
            Some(path) => {
                let tcp = self.run_tcp();
                let unix = self.run_unix(path.clone());
                let (tcp_res, unix_res) = tokio::join!(tcp, unix);
                tcp_res?;
                unix_res?;
            }
            None => self.run_tcp().await?,
        }
        Ok(())
    }

    async fn run_tcp(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!(addr = %self.listen_addr, "lmtp server listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let store = self.store.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                debug!(%peer, "lmtp tcp connection accepted");
                let mut session = LmtpSession::new(socket, store, config);
                if let Err(e) = session.run().await {
                    warn!(%peer, error = %e, "lmtp session ended with error");
                }
            });
        }
    }

    async fn run_unix(&self, path: PathBuf) -> Result<()> {
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "lmtp server listening on unix socket");
        loop {
            let (socket, _) = listener.accept().await?;
            let store = self.store.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                debug!("lmtp unix connection accepted");
                let mut session = LmtpSession::new(socket, store, config);
                if let Err(e) = session.run().await {
                    warn!(error = %e, "lmtp session ended with error");
                }
            });
        }
    }
}
