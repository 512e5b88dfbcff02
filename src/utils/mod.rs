//! # Utility Modules
//!
//! Supporting utilities for compression, logging, and metrics.
//!
//! ## Components
//! - **Compression**: zlib inflate/deflate with a decompression size limit
//! - **Logging**: `tracing-subscriber` setup driven by [`crate::config::LoggingConfig`]
//! - **Metrics**: Thread-safe observability counters

pub mod compression;
pub mod logging;
pub mod metrics;

pub use metrics::global_metrics;
