/*
 * plain.rs
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

//! PLAIN SASL (RFC 4616), server-side decode. Requires TLS.

use super::SaslError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Encode `authzid\0authcid\0password` and base64 it, for frames that carry `resp=<b64>`.
pub fn encode_plain(authzid: &str, authcid: &str, password: &str) -> String {
    let raw = format!("\0{}\0{}\0{}", authzid, authcid, password);
    BASE64.encode(raw.as_bytes())
}

/// Decode a base64 PLAIN response into `(authzid, authcid, password)`.
pub fn parse_plain_credentials(encoded: &str) -> Result<(String, String, String), SaslError> {
    let credentials = BASE64
        .decode(encoded.trim())
        .map_err(|_| SaslError::plain_invalid())?;
    let mut first = None;
    let mut second = None;
    for (i, &b) in credentials.iter().enumerate() {
        if b == 0 {
            if first.is_none() {
                first = Some(i);
            } else {
                second = Some(i);
                break;
            }
        }
    }
    let (f, s) = first.and_then(|f| second.map(|s| (f, s))).ok_or_else(SaslError::plain_invalid)?;
    let authzid = String::from_utf8(credentials[..f].to_vec()).map_err(|_| SaslError::plain_invalid())?;
    let authcid = String::from_utf8(credentials[f + 1..s].to_vec()).map_err(|_| SaslError::plain_invalid())?;
    let password = String::from_utf8(credentials[s + 1..].to_vec()).map_err(|_| SaslError::plain_invalid())?;
    Ok((authzid, authcid, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_credentials() {
        let encoded = encode_plain("", "alice", "hunter2");
        let (authzid, authcid, password) = parse_plain_credentials(&encoded).unwrap();
        assert_eq!(authzid, "");
        assert_eq!(authcid, "alice");
        assert_eq!(password, "hunter2");
    }
}
