/*
 * sequence_set.rs
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

//! Shared grammar for sequence-set and UID-set arguments:
//! `set = range (',' range)*`, `range = num | num ':' num | num ':' '*'`.

use crate::error::{RavenError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Num(u32),
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Range {
    Single(u32),
    Span(Bound, Bound),
}

/// A parsed but unresolved sequence-set; `*` is only known once resolved
/// against the current highest sequence number or UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(Vec<Range>);

impl SequenceSet {
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(RavenError::Protocol("empty sequence set".to_string()));
        }
        let mut ranges = Vec::new();
        for part in s.split(',') {
            ranges.push(parse_range(part)?);
        }
        Ok(SequenceSet(ranges))
    }

    /// Expand into a sorted, deduplicated list of concrete numbers, substituting
    /// `*` with `max` (the highest current sequence number or UID). `max == 0`
    /// (empty mailbox) yields an empty result rather than a panic.
    pub fn resolve(&self, max: u32) -> Vec<u32> {
        let mut out = Vec::new();
        for range in &self.0 {
            match range {
                Range::Single(n) => out.push(*n),
                Range::Span(a, b) => {
                    let lo = bound_value(*a, max);
                    let hi = bound_value(*b, max);
                    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                    if max == 0 {
                        continue;
                    }
                    out.extend(lo..=hi);
                }
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn bound_value(b: Bound, max: u32) -> u32 {
    match b {
        Bound::Num(n) => n,
        Bound::Star => max,
    }
}

fn parse_range(s: &str) -> Result<Range> {
    if let Some((lo, hi)) = s.split_once(':') {
        Ok(Range::Span(parse_bound(lo)?, parse_bound(hi)?))
    } else {
        match parse_bound(s)? {
            Bound::Num(n) => Ok(Range::Single(n)),
            Bound::Star => Ok(Range::Span(Bound::Star, Bound::Star)),
        }
    }
}

fn parse_bound(s: &str) -> Result<Bound> {
    if s == "*" {
        Ok(Bound::Star)
    } else {
        s.parse::<u32>()
            .map(Bound::Num)
            .map_err(|_| RavenError::Protocol(format!("invalid sequence number: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_numbers() {
        let set = SequenceSet::parse("1,3,5").unwrap();
        assert_eq!(set.resolve(10), vec![1, 3, 5]);
    }

    #[test]
    fn range_with_star() {
        let set = SequenceSet::parse("2:*").unwrap();
        assert_eq!(set.resolve(5), vec![2, 3, 4, 5]);
    }

    #[test]
    fn bare_star_means_highest() {
        let set = SequenceSet::parse("*").unwrap();
        assert_eq!(set.resolve(7), vec![7]);
    }

    #[test]
    fn reversed_range_is_normalized() {
        let set = SequenceSet::parse("5:3").unwrap();
        assert_eq!(set.resolve(10), vec![3, 4, 5]);
    }

    #[test]
    fn empty_mailbox_yields_nothing_for_ranges() {
        let set = SequenceSet::parse("1:*").unwrap();
        assert!(set.resolve(0).is_empty());
    }

    #[test]
    fn duplicates_across_parts_are_removed() {
        let set = SequenceSet::parse("1:3,2:4").unwrap();
        assert_eq!(set.resolve(10), vec![1, 2, 3, 4]);
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(SequenceSet::parse("abc").is_err());
    }
}
