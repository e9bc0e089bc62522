//! Application-level error type and process exit codes.

use warren_wire::error::{CipherError, CodecError};

pub type Result<T> = std::result::Result<T, AppError>;

/// Enum to represent the failure classes the binary can exit with.
#[derive(Debug)]
pub enum AppError {
    /// Missing or malformed configuration (environment or flags).
    Config(String),

    /// The tunnel itself failed: socket errors, refused or timed-out
    /// queries, the server not answering the probe.
    Transport(String),

    /// A payload came back that the shared key cannot open.
    Decrypt,

    /// The upstream model endpoint failed on the server side of a local
    /// operation (key generation aside, the client never sees this).
    Upstream(String),

    /// Underlying I/O failure.
    Io(std::io::Error),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        AppError::Transport(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        AppError::Upstream(msg.into())
    }

    /// Process exit code for this failure: 1 configuration, 2 transport,
    /// 3 decrypt.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 1,
            AppError::Transport(_) | AppError::Io(_) | AppError::Upstream(_) => 2,
            AppError::Decrypt => 3,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "configuration error: {}", msg),
            AppError::Transport(msg) => write!(f, "transport error: {}", msg),
            AppError::Decrypt => write!(f, "key mismatch or corrupt channel"),
            AppError::Upstream(msg) => write!(f, "upstream error: {}", msg),
            AppError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<hickory_resolver::ResolveError> for AppError {
    fn from(err: hickory_resolver::ResolveError) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl From<CipherError> for AppError {
    fn from(_: CipherError) -> Self {
        AppError::Decrypt
    }
}

impl From<CodecError> for AppError {
    fn from(_: CodecError) -> Self {
        AppError::Decrypt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(AppError::config("x").exit_code(), 1);
        assert_eq!(AppError::transport("x").exit_code(), 2);
        assert_eq!(AppError::Decrypt.exit_code(), 3);
    }

    #[test]
    fn decrypt_message_names_the_key() {
        assert_eq!(
            AppError::Decrypt.to_string(),
            "key mismatch or corrupt channel"
        );
    }
}
