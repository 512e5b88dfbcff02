//! # Core Protocol Components
//!
//! Low-level byte handling and declarative packet layouts.
//!
//! ## Components
//! - **Cursor**: forward-only reader/writer with fixed-width and varint codecs
//! - **Schema**: scalar, list, record and tagged-variant field descriptors
//!
//! ## Security
//! - Every read is bounds checked and fails with a buffer underrun
//! - Varints that would lose bits are rejected instead of truncated
//! - Tagged variants only accept discriminants from their static case table

pub mod cursor;
pub mod schema;
