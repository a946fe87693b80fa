//! # hype-core
//!
//! Core crate of the hype monitor, providing:
//!
//! - **Types** (`types`): stream identity, chat messages, hype events
//! - **Configuration** (`config`): JSON config deserialization and validated settings
//! - **Error types** (`error`): domain-specific `HypeError` via thiserror
//! - **Rate window** (`rate_window`): trailing-window message rate
//! - **Order statistics** (`order_stats`): sorted samples and percentiles
//! - **Detector** (`detector`): idle/hype state machine
//! - **Monitor** (`monitor`): per-stream tick loop with store/save gates
//! - **Baseline** (`baseline`): percentile condensation and durable merge
//! - **Store** (`store`): percentile store trait, in-memory and JSON-file backends
//! - **Registry** (`registry`): per-stream monitors, tickers and background jobs
//! - **Collaborators** (`notify`, `metadata`): notification sinks, stream metadata
//! - **Time utilities** (`time_util`): epoch-ms clock and formatting
//! - **Logging** (`logging`): tracing-based structured logging

pub mod baseline;
pub mod config;
pub mod detector;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod monitor;
pub mod notify;
pub mod order_stats;
pub mod rate_window;
pub mod registry;
pub mod store;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
