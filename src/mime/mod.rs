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

//! Event-driven MIME and RFC 5322 message parsing (push/handler model, non-blocking buffer contract).
//! Feeds `imap_format`'s ENVELOPE/BODYSTRUCTURE rendering and the store's envelope cache.

mod codec;
mod content_disposition;
mod content_type;
mod handler;
pub mod imap_format;
mod parameter;
mod parser;
mod rfc5322;
mod utils;

pub use content_disposition::{parse_content_disposition, ContentDisposition};
pub use content_type::{parse_content_type, ContentType};
pub use handler::{MimeHandler, MimeLocator, MimeParseError};
pub use parameter::Parameter;
pub use parser::MimeParser;
pub use rfc5322::{parse_envelope, EmailAddress, EnvelopeHeaders, MessageHandler, MessageParser};
