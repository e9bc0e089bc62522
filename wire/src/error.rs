//! Error types shared by the codec modules.
//!
//! Three families, converted at layer boundaries instead of leaking the
//! originating library error:
//!
//! - [`CipherError`] is deliberately opaque. MAC mismatch, version
//!   mismatch and a malformed envelope all collapse into the same value
//!   so a caller (or an observer timing the caller) cannot tell which
//!   check failed.
//! - [`CodecError`] covers everything between raw bytes and plaintext:
//!   label decoding, the compression header, inflation and UTF-8.
//! - [`NameError`] covers the query-name grammar; the DNS layer maps it
//!   to NXDOMAIN.

pub type Result<T> = std::result::Result<T, CodecError>;

/// Authenticated decryption (or encryption) failed.
///
/// Carries no detail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherError;

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "authenticated encryption failure")
    }
}

impl std::error::Error for CipherError {}

/// A payload could not be decoded back into plaintext.
#[derive(Debug)]
pub enum CodecError {
    /// Input was not valid base32 for the tunnel alphabet.
    Label,
    /// The compression header byte was missing or unknown.
    Header,
    /// The compressed body failed to inflate.
    Inflate(String),
    /// Decrypted bytes were not valid UTF-8 text.
    Utf8,
    /// The envelope failed authenticated decryption.
    Cipher(CipherError),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Label => write!(f, "payload is not valid tunnel base32"),
            CodecError::Header => write!(f, "unknown compression header"),
            CodecError::Inflate(msg) => write!(f, "inflate failed: {}", msg),
            CodecError::Utf8 => write!(f, "decrypted payload is not UTF-8"),
            CodecError::Cipher(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CipherError> for CodecError {
    fn from(err: CipherError) -> Self {
        CodecError::Cipher(err)
    }
}

/// A query name did not match the tunnel grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// No labels left of the suffix.
    Empty,
    /// The leading label is not a known command verb.
    UnknownCommand(String),
    /// The session label is missing, empty, too long, or not alphanumeric.
    BadSession,
    /// `idx`/`total` failed to parse, or violate `total >= 1`,
    /// `idx < total`, or the chunk-count cap.
    BadIndex,
    /// The payload label is missing, over-long, or not tunnel base32.
    BadPayload,
    /// The command carried the wrong number of labels.
    BadShape,
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameError::Empty => write!(f, "no command labels before the suffix"),
            NameError::UnknownCommand(verb) => write!(f, "unknown command verb: {}", verb),
            NameError::BadSession => write!(f, "invalid session id label"),
            NameError::BadIndex => write!(f, "invalid chunk index or total"),
            NameError::BadPayload => write!(f, "invalid payload label"),
            NameError::BadShape => write!(f, "wrong label count for command"),
        }
    }
}

impl std::error::Error for NameError {}
