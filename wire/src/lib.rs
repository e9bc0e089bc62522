//! Codec and wire-protocol library for the `warren` DNS chat tunnel.
//!
//! This crate holds everything both ends of the tunnel must agree on,
//! byte for byte:
//! - The `cipher` module implements the authenticated envelope every
//!   message and response chunk travels in.
//! - The `compress` module shrinks plaintext before encryption behind a
//!   one-byte header so receivers can tell compressed payloads from raw.
//! - The `encode` module maps arbitrary bytes onto the case-insensitive
//!   DNS label alphabet and back.
//! - The `message` module combines the three into seal/open/split
//!   operations sized against DNS name and TXT limits.
//! - The `command` module models the query-name grammar the server
//!   answers for and the client emits.
//!
//! Nothing in here performs I/O; the crate is deliberately pure so both
//! the server and the client link against the same arithmetic and the
//! same framing, and so every property can be unit tested without a
//! socket.

pub mod cipher;
pub mod command;
pub mod compress;
pub mod encode;
pub mod error;
pub mod message;

/// Maximum presentation-form length of a query name (RFC 1035).
pub const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single DNS label (RFC 1035).
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum octets in one TXT character-string.
pub const MAX_TXT_LEN: usize = 255;

/// Plaintext marker carried by the terminal response chunk of a
/// streamed turn. EOT keeps the marker out of any realistic chat text.
pub const EOF_SENTINEL: &str = "\x04";

/// In-band control message that resets a conversation.
pub const CLEAR_REQUEST: &str = "/clear";

/// Plaintext reply to a successful [`CLEAR_REQUEST`].
pub const CLEAR_REPLY: &str = "OK";

/// TXT reply for a `get` past the end of a finished turn. Cannot collide
/// with a real chunk: the smallest valid sealed chunk encodes to 48
/// base32 characters.
pub const PAST_END_REPLY: &str = "END";

/// TXT reply to the `tst` health probe.
pub const PROBE_REPLY: &str = "pong";

/// TXT acknowledgement for `msg`/`clr` when the client asked for TXT.
pub const ACK_REPLY: &str = "ok";
