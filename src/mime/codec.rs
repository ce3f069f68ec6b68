/*
 * codec.rs
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

//! Content-Transfer-Encoding decoders (RFC 2045): base64 and quoted-printable.
//! Both take an explicit `src_pos`/`dst_pos` cursor pair rather than returning an
//! owned buffer, since the MIME parser feeds them one incomplete line at a time
//! and needs to carry an unconsumed tail (a partial base64 quantum, a trailing
//! `=XX` escape) into the next call. The same decoders also back RFC 2047
//! encoded-word bodies, where a whole word is always available at once.

use std::sync::OnceLock;

fn base64_decode_table() -> &'static [i8; 256] {
    static TABLE: OnceLock<[i8; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [-1i8; 256];
        t[32] = -2; // space
        t[9] = -2; // tab
        t[13] = -2; // \r
        t[10] = -2; // \n
        for i in 0..26u8 {
            t[(b'A' + i) as usize] = i as i8;
            t[(b'a' + i) as usize] = (26 + i) as i8;
        }
        for i in 0..10u8 {
            t[(b'0' + i) as usize] = (52 + i) as i8;
        }
        t[b'+' as usize] = 62;
        t[b'/' as usize] = 63;
        t
    })
}

const BASE64_WHITESPACE: i8 = -2;

/// Decodes base64 from `src` into `dst`, consuming only complete 4-char quanta
/// and leaving any remainder in `src` unconsumed. When `end_of_stream` is set,
/// flushes a trailing partial quantum (2 or 3 leftover sextets) instead of
/// waiting for padding. Returns the number of bytes consumed from `src`.
pub fn decode_base64(
    src: &[u8],
    src_pos: &mut usize,
    dst: &mut [u8],
    dst_pos: &mut usize,
    max_decode: usize,
    end_of_stream: bool,
) -> usize {
    let start_src = *src_pos;
    let mut quantum: u32 = 0;
    let mut quantum_bits: u32 = 0;
    let mut last_valid_src = *src_pos;
    let mut saw_padding = false;
    let dst_limit = (*dst_pos + max_decode).min(dst.len());

    while *src_pos < src.len() {
        let b = src[*src_pos];
        *src_pos += 1;
        let val = base64_decode_table()[b as usize];

        if val >= 0 {
            quantum = (quantum << 6) | (val as u32);
            quantum_bits += 6;
            if quantum_bits >= 24 {
                if *dst_pos + 3 <= dst_limit {
                    dst[*dst_pos] = (quantum >> 16) as u8;
                    dst[*dst_pos + 1] = (quantum >> 8) as u8;
                    dst[*dst_pos + 2] = quantum as u8;
                    *dst_pos += 3;
                    last_valid_src = *src_pos;
                    quantum = 0;
                    quantum_bits = 0;
                } else {
                    *src_pos = last_valid_src;
                    break;
                }
            }
        } else if val == BASE64_WHITESPACE {
            continue;
        } else if b == b'=' {
            saw_padding = true;
            break;
        }
    }

    if (saw_padding || end_of_stream) && quantum_bits >= 8 && *dst_pos < dst_limit {
        dst[*dst_pos] = (quantum >> (quantum_bits - 8)) as u8;
        *dst_pos += 1;
        if quantum_bits >= 16 && *dst_pos < dst_limit {
            dst[*dst_pos] = (quantum >> (quantum_bits - 16)) as u8;
            *dst_pos += 1;
        }
        last_valid_src = *src_pos;
    }

    *src_pos = last_valid_src;
    last_valid_src - start_src
}

const QP_HEX_DECODE: [i8; 256] = {
    let mut t = [-1i8; 256];
    let mut i = 0u8;
    while i < 10 {
        t[(b'0' + i) as usize] = i as i8;
        i = i.wrapping_add(1);
    }
    let mut i = 0u8;
    while i < 6 {
        t[(b'A' + i) as usize] = (10 + i) as i8;
        t[(b'a' + i) as usize] = (10 + i) as i8;
        i = i.wrapping_add(1);
    }
    t
};

/// Decodes quoted-printable from `src` into `dst`, handling `=XX` escapes and
/// soft line breaks (`=CRLF`, `=LF`). An incomplete trailing `=` escape is left
/// unconsumed unless `end_of_stream` is set. Returns bytes consumed from `src`.
pub fn decode_quoted_printable(
    src: &[u8],
    src_pos: &mut usize,
    dst: &mut [u8],
    dst_pos: &mut usize,
    max_decode: usize,
    end_of_stream: bool,
) -> usize {
    let start_src = *src_pos;
    let dst_limit = (*dst_pos + max_decode).min(dst.len());

    while *src_pos < src.len() && *dst_pos < dst_limit {
        let b = src[*src_pos];
        if b != b'=' {
            dst[*dst_pos] = b;
            *dst_pos += 1;
            *src_pos += 1;
            continue;
        }
        let remaining = src.len() - *src_pos;
        if remaining >= 3 {
            let hex1 = src[*src_pos + 1];
            let hex2 = src[*src_pos + 2];
            let v1 = QP_HEX_DECODE[hex1 as usize];
            let v2 = QP_HEX_DECODE[hex2 as usize];
            if v1 >= 0 && v2 >= 0 {
                dst[*dst_pos] = ((v1 << 4) | v2) as u8;
                *dst_pos += 1;
                *src_pos += 3;
                continue;
            }
            if hex1 == b'\r' && hex2 == b'\n' {
                *src_pos += 3;
                continue;
            }
            if hex1 == b'\n' {
                *src_pos += 2;
                continue;
            }
            dst[*dst_pos] = b;
            *dst_pos += 1;
            *src_pos += 1;
        } else if remaining == 2 {
            let next = src[*src_pos + 1];
            if next == b'\n' {
                *src_pos += 2;
                continue;
            }
            if next == b'\r' && !end_of_stream {
                break;
            }
            if end_of_stream {
                dst[*dst_pos] = b;
                *dst_pos += 1;
                *src_pos += 1;
            } else {
                break;
            }
        } else if end_of_stream {
            dst[*dst_pos] = b;
            *dst_pos += 1;
            *src_pos += 1;
        } else {
            break;
        }
    }
    *src_pos - start_src
}

/// One-shot decode of a complete base64 payload (RFC 2047 `?B?` encoded words).
pub fn decode_base64_whole(payload: &[u8]) -> Vec<u8> {
    let mut src_pos = 0;
    let mut dst = vec![0u8; payload.len() * 3 / 4 + 4];
    let mut dst_pos = 0;
    decode_base64(payload, &mut src_pos, &mut dst, &mut dst_pos, payload.len(), true);
    dst.truncate(dst_pos);
    dst
}

/// One-shot decode of a complete quoted-printable payload (RFC 2047 `?Q?` encoded words).
pub fn decode_quoted_printable_whole(payload: &[u8]) -> Vec<u8> {
    let mut src_pos = 0;
    let mut dst = vec![0u8; payload.len()];
    let mut dst_pos = 0;
    decode_quoted_printable(payload, &mut src_pos, &mut dst, &mut dst_pos, payload.len(), true);
    dst.truncate(dst_pos);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_whole_round_trip() {
        assert_eq!(decode_base64_whole(b"SGVsbG8="), b"Hello");
    }

    #[test]
    fn quoted_printable_whole_handles_escapes() {
        assert_eq!(decode_quoted_printable_whole(b"Caf=C3=A9"), b"Caf\xc3\xa9");
    }

    #[test]
    fn base64_streaming_leaves_partial_quantum_unconsumed() {
        let src = b"SGVs";
        let mut src_pos = 0;
        let mut dst = [0u8; 16];
        let mut dst_pos = 0;
        let consumed = decode_base64(src, &mut src_pos, &mut dst, &mut dst_pos, 16, false);
        assert_eq!(consumed, 4);
        assert_eq!(&dst[..dst_pos], b"Hel");
    }
}
