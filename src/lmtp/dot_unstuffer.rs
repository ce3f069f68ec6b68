/*
 * dot_unstuffer.rs
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

//! Inverse of dot stuffing for SMTP/LMTP DATA (RFC 5321 §4.5.2): removes the
//! extra leading `.` from any stuffed line and recognizes the bare `.` line
//! that terminates the message.

#[derive(Clone, Copy, PartialEq)]
enum State {
    /// At the start of a line.
    LineStart,
    /// Saw a single `.` at line start; not yet known whether this is the
    /// terminator or a stuffed content line.
    Dot,
    /// Saw `.\r` at line start; one more `\n` confirms the terminator.
    DotCr,
    /// Mid-line.
    Normal,
    /// Saw `\r`, waiting for `\n`.
    Cr,
}

/// Strips dot-stuffing from a byte stream as it arrives, detecting the
/// terminating bare-dot line without requiring the caller to split input on
/// line boundaries first.
pub struct DotUnstuffer {
    state: State,
    done: bool,
}

impl Default for DotUnstuffer {
    fn default() -> Self {
        Self { state: State::LineStart, done: false }
    }
}

impl DotUnstuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminator line has been consumed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Processes one chunk of stuffed bytes, calling `out` for each unstuffed
    /// byte of message content. Returns the unconsumed tail of `chunk`: empty
    /// unless the terminator was found partway through, in which case the
    /// remainder belongs to whatever follows DATA (normally nothing, before
    /// the next command line).
    pub fn process_chunk<'a, F>(&mut self, chunk: &'a [u8], mut out: F) -> &'a [u8]
    where
        F: FnMut(&[u8]),
    {
        for i in 0..chunk.len() {
            if self.done {
                return &chunk[i..];
            }
            let b = chunk[i];
            match self.state {
                State::LineStart => match b {
                    b'.' => self.state = State::Dot,
                    b'\r' => {
                        out(&chunk[i..=i]);
                        self.state = State::Cr;
                    }
                    _ => {
                        out(&chunk[i..=i]);
                        self.state = State::Normal;
                    }
                },
                // A lone leading dot is swallowed here; a real stuffed line had two,
                // and the second one is ordinary content from this point on.
                State::Dot => match b {
                    b'\r' => self.state = State::DotCr,
                    _ => {
                        out(&chunk[i..=i]);
                        self.state = State::Normal;
                    }
                },
                State::DotCr => match b {
                    b'\n' => {
                        self.done = true;
                        self.state = State::LineStart;
                        return &chunk[i + 1..];
                    }
                    // Not actually the terminator: a line that is just "." followed by a
                    // bare CR with no LF. Put the swallowed dot and CR back.
                    b'\r' => {
                        out(b".\r");
                        out(&chunk[i..=i]);
                        self.state = State::Cr;
                    }
                    _ => {
                        out(b".\r");
                        out(&chunk[i..=i]);
                        self.state = State::Normal;
                    }
                },
                State::Normal => match b {
                    b'\r' => {
                        out(&chunk[i..=i]);
                        self.state = State::Cr;
                    }
                    _ => out(&chunk[i..=i]),
                },
                State::Cr => match b {
                    b'\n' => {
                        out(&chunk[i..=i]);
                        self.state = State::LineStart;
                    }
                    b'\r' => out(&chunk[i..=i]),
                    _ => {
                        out(&chunk[i..=i]);
                        self.state = State::Normal;
                    }
                },
            }
        }
        &[]
    }

    pub fn reset(&mut self) {
        self.state = State::LineStart;
        self.done = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(unstuffer: &mut DotUnstuffer, input: &[u8]) -> (Vec<u8>, usize) {
        let mut out = Vec::new();
        let leftover = unstuffer.process_chunk(input, |s| out.extend_from_slice(s));
        (out, leftover.len())
    }

    #[test]
    fn bare_terminator_ends_message() {
        let mut u = DotUnstuffer::new();
        let (out, leftover) = collect(&mut u, b".\r\n");
        assert!(out.is_empty());
        assert!(u.is_done());
        assert_eq!(leftover, 0);
    }

    #[test]
    fn doubled_dot_is_unstuffed() {
        let mut u = DotUnstuffer::new();
        let (out, _) = collect(&mut u, b"..\r\n.\r\n");
        assert_eq!(out, b".\r\n");
        assert!(u.is_done());
    }

    #[test]
    fn plain_lines_pass_through() {
        let mut u = DotUnstuffer::new();
        let (out, _) = collect(&mut u, b"Hello\r\nWorld\r\n.\r\n");
        assert_eq!(out, b"Hello\r\nWorld\r\n");
        assert!(u.is_done());
    }

    #[test]
    fn dot_only_at_line_start_is_significant() {
        let mut u = DotUnstuffer::new();
        let (out, _) = collect(&mut u, b"a.b\r\nc.d\r\n.\r\n");
        assert_eq!(out, b"a.b\r\nc.d\r\n");
        assert!(u.is_done());
    }

    #[test]
    fn chunked_across_calls() {
        let mut u = DotUnstuffer::new();
        let mut out = Vec::new();
        let leftover1 = u.process_chunk(b"Hi\r\n.", |s| out.extend_from_slice(s));
        assert!(leftover1.is_empty());
        assert!(!u.is_done());
        let leftover2 = u.process_chunk(b"\r\nmore", |s| out.extend_from_slice(s));
        assert_eq!(out, b"Hi\r\n");
        assert!(u.is_done());
        assert_eq!(leftover2, b"more");
    }

    #[test]
    fn roundtrips_with_dot_stuffer() {
        use crate::lmtp::dot_stuffer::DotStuffer;
        let original: &[u8] = b"Hi\r\n.\r\n.oops\r\nplain\r\n";
        let mut stuffed = Vec::new();
        let mut stuffer = DotStuffer::new();
        stuffer.process_chunk(original, |s| stuffed.extend_from_slice(s));
        stuffer.end_message(|s| stuffed.extend_from_slice(s));

        let mut unstuffer = DotUnstuffer::new();
        let mut restored = Vec::new();
        unstuffer.process_chunk(&stuffed, |s| restored.extend_from_slice(s));
        assert_eq!(restored, original);
        assert!(unstuffer.is_done());
    }
}
