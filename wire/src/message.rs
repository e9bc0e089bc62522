//! Whole-message and chunk framing.
//!
//! Two payload sizes matter on the wire:
//!
//! - Inbound, a sealed message is split across query names; each chunk
//!   must fit one DNS label next to the command labels and the suffix.
//! - Outbound, each response chunk is sealed on its own and must fit the
//!   first character-string of one TXT record.
//!
//! The capacity arithmetic lives here so the client and the server can
//! never disagree about it.

use crate::cipher::{self, Key};
use crate::compress;
use crate::encode;
use crate::error::{CipherError, CodecError};
use crate::{MAX_LABEL_LEN, MAX_NAME_LEN};

/// Digits budgeted for each of the `idx` and `total` labels.
const INDEX_DIGITS: usize = 4;

/// Largest plaintext the orchestrator may seal into one outbound chunk.
///
/// A 255-octet TXT string decodes to 159 raw bytes; subtracting the
/// envelope overhead (29) and the compression header (1) leaves 129.
/// 120 keeps headroom.
pub const OUTBOUND_PLAINTEXT_LIMIT: usize = 120;

/// Compress and encrypt a full message for the tunnel.
pub fn seal(key: &Key, text: &str) -> Result<Vec<u8>, CipherError> {
    cipher::seal(key, &compress::pack(text.as_bytes()))
}

/// Decrypt and decompress a full message.
pub fn open(key: &Key, envelope: &[u8]) -> Result<String, CodecError> {
    let packed = cipher::open(key, envelope)?;
    let bytes = compress::unpack(&packed)?;
    String::from_utf8(bytes).map_err(|_| CodecError::Utf8)
}

/// Seal one outbound chunk into a single TXT-ready base32 string.
pub fn seal_chunk(key: &Key, text: &str) -> Result<String, CipherError> {
    Ok(encode::encode_label(&seal(key, text)?))
}

/// Open one outbound chunk fetched from a TXT record.
pub fn open_chunk(key: &Key, encoded: &str) -> Result<String, CodecError> {
    open(key, &encode::decode_label(encoded)?)
}

/// Raw bytes one inbound chunk may carry for the given suffix and
/// session id, keeping the whole `msg` name within [`MAX_NAME_LEN`].
pub fn inbound_chunk_capacity(suffix: &str, sid_len: usize) -> usize {
    let overhead = "msg".len()
        + 1
        + sid_len
        + 1
        + INDEX_DIGITS
        + 1
        + INDEX_DIGITS
        + 1
        + 1
        + suffix.len();
    let payload_chars = MAX_NAME_LEN.saturating_sub(overhead).min(MAX_LABEL_LEN);
    encode::label_capacity(payload_chars)
}

/// Split a sealed message into payload chunks of at most `capacity` raw
/// bytes each. Deterministic; concatenating the chunks in index order
/// restores the envelope exactly. Encoding onto the label alphabet
/// happens when the chunk is placed into a query name.
pub fn split_envelope(envelope: &[u8], capacity: usize) -> Vec<Vec<u8>> {
    envelope
        .chunks(capacity.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
