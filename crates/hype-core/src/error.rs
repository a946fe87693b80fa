//! Typed error definitions for the hype monitor.
//!
//! [`HypeError`] covers domain failures that callers may want to match on.
//! Collaborator traits and I/O edges use `anyhow::Result`; every variant here
//! implements `std::error::Error` via `thiserror`, so it converts with `?`.

use thiserror::Error;

/// Domain-specific errors for the hype monitor.
#[derive(Debug, Error)]
pub enum HypeError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Input from an external collaborator rejected at the boundary
    /// (empty stream identifier, negative viewer count, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Durable percentile store read or write failure.
    #[error("store error: {0}")]
    Store(String),

    /// Outbound notification delivery failure.
    #[error("notify error: {0}")]
    Notify(String),

    /// Stream metadata (live flag, viewer count) lookup failure.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Chat connection or protocol error.
    #[error("chat error: {0}")]
    Chat(String),
}
