//! Error types for the replay server
//!
//! Codec, cipher and single-line parse errors are recoverable and are absorbed
//! where processing can continue. I/O failures on the connection or while
//! opening a session log end the session.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from reading or writing structured packet buffers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet too short: wanted {wanted} bytes, {remaining} remaining")]
    OutOfBounds { wanted: usize, remaining: usize },

    #[error("string of {0} bytes does not fit a u16 length prefix")]
    StringTooLong(usize),

    #[error("payload of {0} bytes does not fit a u16 frame length")]
    FrameTooLarge(usize),

    #[error("inner length {inner} exceeds decrypted body of {available} bytes")]
    InnerLength { inner: usize, available: usize },

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Errors from the block cipher
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("buffer length {0} is not a multiple of the 8 byte block size")]
    BlockSize(usize),
}

/// Errors from reading a recorded session log
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to open session log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read session log: {0}")]
    Io(#[from] io::Error),

    #[error("{reason} on line {line}; data: {raw}")]
    Parse {
        line: u64,
        raw: String,
        reason: LineError,
    },
}

impl LogError {
    /// A malformed line is skipped; anything else ends playback
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LogError::Parse { .. })
    }
}

/// Why a single session log line was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("parse error: invalid data format ({0} fields)")]
    FieldCount(usize),

    #[error("parse error: invalid packet type ({0})")]
    Direction(String),

    #[error("parse error: invalid timestamp format ({0})")]
    Timestamp(String),

    #[error("parse error: error decoding hex string ({0})")]
    Hex(String),
}

/// Errors that end a replay session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Transport(#[from] io::Error),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("session log task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors from the login handshake
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("connection error during login: {0}")]
    Io(#[from] io::Error),

    #[error("malformed login packet: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to decrypt login block: {0}")]
    Rsa(#[from] openssl::error::ErrorStack),

    #[error("decrypted login block does not start with a zero byte")]
    BadBlock,

    #[error("invalid session name {0:?}")]
    InvalidName(String),
}
