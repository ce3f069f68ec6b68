/*
 * main.rs
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

//! Daemon entrypoint: loads configuration, opens the store, and runs the LMTP,
//! IMAP and SASL broker listeners side by side until one of them exits or the
//! process receives a shutdown signal.

use raven::config::RavenConfig;
use raven::imap::{ImapServer, ImapServerConfig};
use raven::lmtp::{LmtpConfig, LmtpServer};
use raven::net;
use raven::sasl::broker::{BrokerConfig, SaslBroker};
use raven::store::Store;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RavenConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_level());

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "raven exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RavenConfig) -> std::io::Result<()> {
    let store = Arc::new(Store::open(config.data_dir.clone()).await.map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?);

    let tls_acceptor = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => {
            let server_config = net::load_server_config(cert, key)?;
            Some(net::acceptor(server_config))
        }
        _ => {
            info!("no TLS material configured; STARTTLS will be unavailable");
            None
        }
    };

    let hostname = hostname();

    let lmtp = LmtpServer::new(
        config.lmtp_listen,
        config.lmtp_unix_socket.clone(),
        store.clone(),
        LmtpConfig {
            hostname: hostname.clone(),
            allowed_domains: config.allowed_domains.clone(),
            reject_unknown_user: config.reject_unknown_user,
            max_message_size: config.max_message_size,
        },
    );

    let imap = ImapServer::new(
        config.imap_listen,
        store.clone(),
        tls_acceptor,
        ImapServerConfig {
            hostname: hostname.clone(),
            sasl_broker_socket: config.sasl_broker_socket.clone(),
            max_message_size: config.max_message_size,
        },
    );

    let broker = config.credential_validation_url.clone().map(|url| {
        SaslBroker::new(
            config.sasl_broker_socket.clone(),
            BrokerConfig { credential_validation_url: url, default_auth_domain: config.default_auth_domain.clone() },
        )
    });

    info!(lmtp = %config.lmtp_listen, imap = %config.imap_listen, "raven starting");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    match broker {
        Some(broker) => {
            tokio::select! {
                res = lmtp.run() => map_err(res),
                res = imap.run() => map_err(res),
                res = broker.run() => res,
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    broker.shutdown();
                    Ok(())
                }
            }
        }
        None => {
            info!("no credential_validation_url configured; SASL broker disabled, LOGIN/AUTHENTICATE will fail");
            tokio::select! {
                res = lmtp.run() => map_err(res),
                res = imap.run() => map_err(res),
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    Ok(())
                }
            }
        }
    }
}

fn map_err(res: raven::error::Result<()>) -> std::io::Result<()> {
    res.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "raven".to_string())
}
