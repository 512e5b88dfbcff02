//! # Error Types
//!
//! Error handling for the relay and its protocol engine.
//!
//! Every failure the decoder can hit on adversarial input maps onto one
//! variant here, so the per-datagram boundary in the relay port can report
//! it and keep forwarding.
//!
//! ## Error Categories
//! - **Buffer underrun**: a read past the end of the datagram
//! - **Schema violations**: unknown tagged-variant keys, magic mismatches,
//!   values that do not fit the declared field
//! - **Fragment violations**: duplicate pieces, inconsistent compound sizes
//! - **Compression errors**: batch inflation failures and size limit violations
//! - **I/O and configuration errors**
//!
//! Unknown packet ids are not errors; dispatch tables report them as
//! "not handled".
//!
//! ## Example Usage
//! ```rust
//! use raknet_relay::core::cursor::Cursor;
//! use raknet_relay::error::{ProtocolError, Result};
//!
//! fn read_port(bytes: &[u8]) -> Result<u16> {
//!     Cursor::new(bytes).read_u16_be()
//! }
//!
//! assert!(matches!(
//!     read_port(&[0x4a]),
//!     Err(ProtocolError::BufferUnderrun { needed: 2, remaining: 1 })
//! ));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatch table errors
    pub const ERR_TABLE_WRITE_LOCK: &str = "Failed to acquire write lock on dispatch table";
    pub const ERR_TABLE_READ_LOCK: &str = "Failed to acquire read lock on dispatch table";

    /// Registry errors
    pub const ERR_REGISTRY_LOCK: &str = "Connection registry lock poisoned";
    pub const ERR_REGISTRY_FULL: &str = "Connection limit reached";

    /// Guard errors
    pub const ERR_GUARD_LOCK: &str = "Flood guard lock poisoned";

    /// Login errors
    pub const ERR_CHAIN_SEGMENTS: &str = "Chain token does not have three segments";
}

/// Primary error type for every protocol and relay operation
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Buffer underrun: needed {needed} bytes, {remaining} remaining")]
    BufferUnderrun { needed: usize, remaining: usize },

    #[error("Variable-length integer exceeds 128 bits")]
    VarIntOverflow,

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("undefined key: {0}")]
    UndefinedKey(i128),

    #[error("Duplicate tagged-variant case: {0}")]
    DuplicateCase(i128),

    #[error("Magic unmatched: {0}")]
    MagicMismatch(String),

    #[error("Missing record field: {0}")]
    MissingField(&'static str),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Already compound filled: {0}")]
    FragmentAlreadyFilled(u32),

    #[error("Compound size mismatch {expected}!={actual}")]
    CompoundSizeMismatch { expected: u32, actual: u32 },

    #[error("Fragment index {index} out of range for compound of {size}")]
    FragmentIndexOutOfRange { index: u32, size: u32 },

    #[error("Compound size not accepted: {0}")]
    OversizedCompound(u32),

    #[error("Fragment buffer over budget: {held} bytes held, limit {limit}")]
    FragmentBudgetExceeded { held: usize, limit: usize },

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Invalid login chain: {0}")]
    InvalidLoginChain(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for the read-past-end condition, whatever the requested width
    pub fn is_underrun(&self) -> bool {
        matches!(self, ProtocolError::BufferUnderrun { .. })
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
