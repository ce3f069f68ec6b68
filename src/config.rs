/*
 * config.rs
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

//! Process configuration. The CLI and full YAML config loader are external
//! collaborators; this module only covers what the core reads: the data
//! directory, listen addresses, TLS material, and the SASL broker wiring.
//! Config is a small JSON document pointed to by `RAVEN_CONFIG`.

use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct RavenConfig {
    /// Directory holding the shared partition and per-user maildirs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_lmtp_addr")]
    pub lmtp_listen: SocketAddr,
    pub lmtp_unix_socket: Option<PathBuf>,
    #[serde(default = "default_imap_addr")]
    pub imap_listen: SocketAddr,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub reject_unknown_user: bool,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u64,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    #[serde(default = "default_broker_socket")]
    pub sasl_broker_socket: PathBuf,
    pub default_auth_domain: Option<String>,
    pub credential_validation_url: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/raven")
}

fn default_lmtp_addr() -> SocketAddr {
    "127.0.0.1:24".parse().unwrap()
}

fn default_imap_addr() -> SocketAddr {
    "0.0.0.0:143".parse().unwrap()
}

fn default_max_message_size() -> u64 {
    50 * 1024 * 1024
}

fn default_broker_socket() -> PathBuf {
    PathBuf::from("/run/raven/sasl-broker.sock")
}

impl Default for RavenConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lmtp_listen: default_lmtp_addr(),
            lmtp_unix_socket: None,
            imap_listen: default_imap_addr(),
            allowed_domains: Vec::new(),
            reject_unknown_user: false,
            max_message_size: default_max_message_size(),
            tls_cert_path: None,
            tls_key_path: None,
            sasl_broker_socket: default_broker_socket(),
            default_auth_domain: None,
            credential_validation_url: None,
            log_level: None,
        }
    }
}

impl RavenConfig {
    /// Load from `RAVEN_CONFIG` if set, overlay `RAVEN_DATA_DIR`/`RAVEN_LOG_LEVEL`, else defaults.
    pub fn load() -> std::io::Result<Self> {
        let mut config = if let Ok(path) = env::var("RAVEN_CONFIG") {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?
        } else {
            RavenConfig::default()
        };
        if let Ok(dir) = env::var("RAVEN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = env::var("RAVEN_LOG_LEVEL") {
            config.log_level = Some(level);
        }
        Ok(config)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
