/*
 * handler.rs
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

//! MIME handler trait: the push-parser callback contract shared by every consumer
//! of `MimeParser` — the envelope collector feeding IMAP `ENVELOPE`, the
//! BODYSTRUCTURE builder in `imap_format`, and the RFC 5322 envelope adapter.

/// Handler for MIME parsing events (push model). `MimeParser::receive` calls these
/// in document order as it consumes complete lines; a handler that only cares about
/// some events overrides only those and leaves the rest as no-ops.
pub trait MimeHandler {
    fn set_locator(&mut self, _locator: MimeLocator) {}

    /// A new MIME part started, `boundary` set for multipart children.
    fn start_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        Ok(())
    }

    /// Raw Content-Type header value; drives BODYSTRUCTURE's type/subtype/parameters.
    fn content_type(&mut self, _content_type: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    /// Raw Content-Disposition header value; drives BODYSTRUCTURE's extension fields.
    fn content_disposition(&mut self, _value: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    fn content_transfer_encoding(&mut self, _encoding: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    fn content_id(&mut self, _id: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    fn content_description(&mut self, _description: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    fn mime_version(&mut self, _version: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    /// Unstructured or unknown header (RFC 5322). Called for headers not handled by content_type, etc.
    fn header(&mut self, _name: &str, _value: &str) -> Result<(), MimeParseError> {
        Ok(())
    }

    fn end_headers(&mut self) -> Result<(), MimeParseError> {
        Ok(())
    }

    /// Decoded part body bytes (base64/quoted-printable already applied).
    fn body_content(&mut self, _data: &[u8]) -> Result<(), MimeParseError> {
        Ok(())
    }

    /// Bytes seen after the final boundary or outside any recognized structure.
    fn unexpected_content(&mut self, _data: &[u8]) -> Result<(), MimeParseError> {
        Ok(())
    }

    fn end_entity(&mut self, _boundary: Option<&str>) -> Result<(), MimeParseError> {
        Ok(())
    }
}

/// Position within the MIME entity for error reporting.
#[derive(Debug, Clone)]
pub struct MimeLocator {
    pub offset: u64,
    pub line: u64,
    pub column: u64,
}

#[derive(Debug)]
pub struct MimeParseError {
    pub message: String,
    pub locator: Option<MimeLocator>,
}

impl std::fmt::Display for MimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MimeParseError {}
