//! # Variable-Length Integer Encoding
//!
//! Length- and count-prefix encoding for every wire structure in the
//! crate: record counts, field bit widths, buffer lengths, ordinal gaps.
//! A leading marker byte selects the width, biased so that small values
//! (the overwhelmingly common case for gaps and widths) cost one byte.
//!
//! | Marker    | Total bytes | Value                                        |
//! |-----------|-------------|----------------------------------------------|
//! | 0 - 240   | 1           | the marker itself                            |
//! | 241 - 248 | 2           | `240 + ((marker - 241) << 8) + b[1]`         |
//! | 249       | 3           | `2288 + (b[1] << 8) + b[2]`                  |
//! | 250       | 4           | 3-byte big-endian                            |
//! | 251       | 5           | 4-byte big-endian                            |
//! | 255       | 9           | 8-byte big-endian                            |
//!
//! Markers 252-254 are reserved and rejected on decode.
//!
//! Encoders append to a `Vec<u8>` because every producer in this crate
//! builds streams tail-first; the decoder reads from a slice and reports
//! how many bytes it consumed so callers can advance their own cursor.
//!
//! All functions are pure and allocation-free apart from the `Vec` growth
//! of `put_varint`. Decoding a truncated or reserved-marker sequence
//! returns an error rather than panicking, which the fuzz targets rely on.

use eyre::{bail, ensure, Result};

/// Encoded byte length of `value`, without encoding it.
pub fn varint_len(value: u64) -> usize {
    if value <= 240 {
        1
    } else if value <= 2287 {
        2
    } else if value <= 67823 {
        3
    } else if value <= 0xFF_FFFF {
        4
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Appends the encoding of `value` to `out`.
pub fn put_varint(value: u64, out: &mut Vec<u8>) {
    if value <= 240 {
        out.push(value as u8);
    } else if value <= 2287 {
        let v = value - 240;
        out.push(((v >> 8) + 241) as u8);
        out.push((v & 0xFF) as u8);
    } else if value <= 67823 {
        let v = value - 2288;
        out.push(249);
        out.push((v >> 8) as u8);
        out.push((v & 0xFF) as u8);
    } else if value <= 0xFF_FFFF {
        out.push(250);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else if value <= 0xFFFF_FFFF {
        out.push(251);
        out.push((value >> 24) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.push(255);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Decodes one varint from the front of `buf`, returning the value and
/// the number of bytes consumed.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    let marker = buf[0];

    if marker <= 240 {
        Ok((marker as u64, 1))
    } else if marker <= 248 {
        ensure!(buf.len() >= 2, "truncated 2-byte varint");
        Ok((240 + ((marker as u64 - 241) << 8) + buf[1] as u64, 2))
    } else if marker == 249 {
        ensure!(buf.len() >= 3, "truncated 3-byte varint");
        Ok((2288 + ((buf[1] as u64) << 8) + buf[2] as u64, 3))
    } else if marker == 250 {
        ensure!(buf.len() >= 4, "truncated 4-byte varint");
        let value = ((buf[1] as u64) << 16) + ((buf[2] as u64) << 8) + buf[3] as u64;
        Ok((value, 4))
    } else if marker == 251 {
        ensure!(buf.len() >= 5, "truncated 5-byte varint");
        let value = ((buf[1] as u64) << 24)
            + ((buf[2] as u64) << 16)
            + ((buf[3] as u64) << 8)
            + buf[4] as u64;
        Ok((value, 5))
    } else if marker == 255 {
        ensure!(buf.len() >= 9, "truncated 9-byte varint");
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[1..9]);
        Ok((u64::from_be_bytes(raw), 9))
    } else {
        bail!("reserved varint marker: {}", marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARIES: [(u64, usize); 13] = [
        (0, 1),
        (1, 1),
        (240, 1),
        (241, 2),
        (2287, 2),
        (2288, 3),
        (67823, 3),
        (67824, 4),
        (0xFF_FFFF, 4),
        (0x100_0000, 5),
        (0xFFFF_FFFF, 5),
        (0x1_0000_0000, 9),
        (u64::MAX, 9),
    ];

    #[test]
    fn boundary_values_round_trip_at_expected_widths() {
        for &(value, expected_len) in &BOUNDARIES {
            let mut out = Vec::new();
            put_varint(value, &mut out);
            assert_eq!(out.len(), expected_len, "encoded width for {value}");
            assert_eq!(varint_len(value), expected_len, "varint_len for {value}");

            let (decoded, consumed) = decode_varint(&out).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, expected_len);
        }
    }

    #[test]
    fn appends_without_disturbing_prefix() {
        let mut out = vec![0xAB, 0xCD];
        put_varint(1000, &mut out);
        assert_eq!(&out[..2], &[0xAB, 0xCD]);

        let (decoded, consumed) = decode_varint(&out[2..]).unwrap();
        assert_eq!(decoded, 1000);
        assert_eq!(out.len(), 2 + consumed);
    }

    #[test]
    fn consecutive_values_decode_with_cursor() {
        let mut out = Vec::new();
        for &(value, _) in &BOUNDARIES {
            put_varint(value, &mut out);
        }

        let mut pos = 0;
        for &(value, _) in &BOUNDARIES {
            let (decoded, consumed) = decode_varint(&out[pos..]).unwrap();
            assert_eq!(decoded, value);
            pos += consumed;
        }
        assert_eq!(pos, out.len());
    }

    #[test]
    fn empty_buffer_fails() {
        assert!(decode_varint(&[]).is_err());
    }

    #[test]
    fn truncated_encodings_fail() {
        for encoded in [
            &[241u8][..],
            &[249, 0],
            &[250, 0, 0],
            &[251, 0, 0, 0],
            &[255, 0, 0, 0, 0, 0, 0, 0],
        ] {
            assert!(decode_varint(encoded).is_err(), "accepted {encoded:?}");
        }
    }

    #[test]
    fn reserved_markers_fail() {
        for marker in 252u8..=254 {
            let buf = [marker, 0, 0, 0, 0, 0, 0, 0, 0];
            assert!(decode_varint(&buf).is_err(), "accepted marker {marker}");
        }
    }
}
