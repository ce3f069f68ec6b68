/*
 * credential_client.rs
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

//! POSTs `{email, password}` to the configured credential-validation URL.
//! 2xx means valid; anything else (including a connection failure) means invalid.
//! Bounded to a 10s end-to-end timeout per the broker's contract.

use crate::http::post_json;
use std::time::Duration;
use tokio::time::timeout;

const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

/// `url` is a full `https://host[:port]/path` validation endpoint.
pub async fn validate(url: &str, email: &str, password: &str) -> bool {
    match timeout(VALIDATION_TIMEOUT, validate_inner(url, email, password)).await {
        Ok(result) => result.unwrap_or(false),
        Err(_) => false,
    }
}

async fn validate_inner(url: &str, email: &str, password: &str) -> std::io::Result<bool> {
    let parsed = ParsedUrl::parse(url).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid credential validation url")
    })?;
    let body = serde_json::json!({ "email": email, "password": password }).to_string();
    let status = post_json(&parsed.host, parsed.port, parsed.secure, &parsed.path, body.into_bytes()).await?;
    Ok((200..300).contains(&status))
}

struct ParsedUrl {
    secure: bool,
    host: String,
    port: u16,
    path: String,
}

impl ParsedUrl {
    fn parse(url: &str) -> Option<Self> {
        let (secure, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (false, rest)
        } else {
            return None;
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().ok()?),
            None => (authority.to_string(), if secure { 443 } else { 80 }),
        };
        Some(ParsedUrl { secure, host, port, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_url_with_default_port() {
        let p = ParsedUrl::parse("https://auth.example.com/v1/validate").unwrap();
        assert!(p.secure);
        assert_eq!(p.host, "auth.example.com");
        assert_eq!(p.port, 443);
        assert_eq!(p.path, "/v1/validate");
    }

    #[test]
    fn parses_explicit_port() {
        let p = ParsedUrl::parse("http://localhost:8080/check").unwrap();
        assert!(!p.secure);
        assert_eq!(p.port, 8080);
    }
}
