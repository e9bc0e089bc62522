//! Optional compression behind a one-byte header.
//!
//! Chat text is redundant enough that zlib often cuts the number of DNS
//! round-trips in half, but tiny payloads (single tokens, short replies)
//! grow under compression. `pack` therefore deflates speculatively and
//! keeps whichever representation is smaller, tagging the result:
//! `0x00` body stored raw, `0x01` body is a zlib stream. `unpack`
//! honors the tag unconditionally.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::CodecError;

const HEADER_RAW: u8 = 0x00;
const HEADER_ZLIB: u8 = 0x01;

/// Largest inflated size `unpack` will produce. Bounds memory against a
/// hostile deflate bomb arriving over the tunnel.
const MAX_INFLATED_LEN: usize = 8 * 1024 * 1024;

/// Wrap `data` with the compression header, deflating when it pays off.
pub fn pack(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    let deflated = match encoder.write_all(data) {
        Ok(()) => encoder.finish().ok(),
        Err(_) => None,
    };

    match deflated {
        Some(z) if z.len() < data.len() => {
            let mut out = Vec::with_capacity(z.len() + 1);
            out.push(HEADER_ZLIB);
            out.extend_from_slice(&z);
            out
        }
        _ => {
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(HEADER_RAW);
            out.extend_from_slice(data);
            out
        }
    }
}

/// Strip the header written by [`pack`] and inflate if needed.
pub fn unpack(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match data.split_first() {
        Some((&HEADER_RAW, body)) => Ok(body.to_vec()),
        Some((&HEADER_ZLIB, body)) => {
            let mut inflated = Vec::new();
            let mut decoder = ZlibDecoder::new(body).take(MAX_INFLATED_LEN as u64 + 1);
            decoder
                .read_to_end(&mut inflated)
                .map_err(|err| CodecError::Inflate(err.to_string()))?;
            if inflated.len() > MAX_INFLATED_LEN {
                return Err(CodecError::Inflate("inflated payload too large".to_string()));
            }
            Ok(inflated)
        }
        _ => Err(CodecError::Header),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_compressible() {
        let data = "badger ".repeat(500);
        let packed = pack(data.as_bytes());
        assert_eq!(packed[0], HEADER_ZLIB);
        assert!(packed.len() < data.len());
        assert_eq!(unpack(&packed).unwrap(), data.as_bytes());
    }

    #[test]
    fn short_input_stays_raw() {
        let packed = pack(b"hi");
        assert_eq!(packed, vec![HEADER_RAW, b'h', b'i']);
        assert_eq!(unpack(&packed).unwrap(), b"hi");
    }

    #[test]
    fn empty_input_round_trips() {
        let packed = pack(b"");
        assert_eq!(unpack(&packed).unwrap(), b"");
    }

    #[test]
    fn missing_header_rejected() {
        assert!(matches!(unpack(b""), Err(CodecError::Header)));
    }

    #[test]
    fn unknown_header_rejected() {
        assert!(matches!(unpack(&[0x7f, 1, 2, 3]), Err(CodecError::Header)));
    }

    #[test]
    fn corrupt_zlib_body_rejected() {
        assert!(matches!(
            unpack(&[HEADER_ZLIB, 0xde, 0xad, 0xbe, 0xef]),
            Err(CodecError::Inflate(_))
        ));
    }
}
