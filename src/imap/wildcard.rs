/*
 * wildcard.rs
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

//! LIST/LSUB wildcard matcher: `*` matches zero or more characters including
//! the hierarchy delimiter, `%` matches zero or more characters but not `/`.

/// Matches `name` against `pattern` per RFC 3501 §6.3.8/§6.3.9 wildcard rules.
pub fn matches(pattern: &str, name: &str) -> bool {
    matches_bytes(pattern.as_bytes(), name.as_bytes())
}

fn matches_bytes(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some(b'*') => {
            for split in 0..=name.len() {
                if matches_bytes(&pattern[1..], &name[split..]) {
                    return true;
                }
            }
            false
        }
        Some(b'%') => {
            for split in 0..=name.len() {
                if name[..split].contains(&b'/') {
                    break;
                }
                if matches_bytes(&pattern[1..], &name[split..]) {
                    return true;
                }
            }
            false
        }
        Some(&c) => match name.first() {
            Some(&n) if n == c => matches_bytes(&pattern[1..], &name[1..]),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_crosses_delimiter() {
        assert!(matches("Work*", "Work/Projects/Raven"));
        assert!(matches("*", "Work/Projects"));
    }

    #[test]
    fn percent_does_not_cross_delimiter() {
        assert!(matches("Work/%", "Work/Projects"));
        assert!(!matches("Work/%", "Work/Projects/Raven"));
        assert!(matches("%", "Work"));
        assert!(!matches("%", "Work/Projects"));
    }

    #[test]
    fn literal_match() {
        assert!(matches("INBOX", "INBOX"));
        assert!(!matches("INBOX", "inbox"));
    }

    #[test]
    fn empty_pattern_matches_only_empty_name() {
        assert!(matches("", ""));
        assert!(!matches("", "INBOX"));
    }

    #[test]
    fn mixed_wildcards() {
        assert!(matches("%/%", "Work/Projects"));
        assert!(!matches("%/%", "Work/Projects/Raven"));
        assert!(matches("*/Raven", "Work/Projects/Raven"));
    }
}
