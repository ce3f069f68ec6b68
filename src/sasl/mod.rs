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

//! SASL server side: PLAIN and LOGIN only, adapted onto an HTTP credential
//! validator by the broker.

pub mod broker;
pub mod credential_client;
mod mechanism;
mod plain;

pub use mechanism::SaslMechanism;
pub use plain::{encode_plain, parse_plain_credentials};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

#[derive(Debug)]
pub struct SaslError {
    pub message: String,
}

impl SaslError {
    pub fn invalid(msg: &str) -> Self {
        Self { message: msg.to_string() }
    }

    pub fn plain_invalid() -> Self {
        Self::invalid("invalid PLAIN credentials format")
    }
}

impl std::fmt::Display for SaslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SaslError {}

/// Decode a base64 LOGIN continuation response (either the username or the password,
/// depending on which prompt was sent).
pub fn decode_login_response(b64: &str) -> Result<String, SaslError> {
    let raw = BASE64.decode(b64.trim()).map_err(|_| SaslError::invalid("invalid base64"))?;
    String::from_utf8(raw).map_err(|_| SaslError::invalid("LOGIN response not UTF-8"))
}

pub fn encode_prompt(prompt: &str) -> String {
    BASE64.encode(prompt.as_bytes())
}
