//! Core data types: stream identity, inbound chat messages, hype events.

pub mod event;
pub mod stream;

pub use event::*;
pub use stream::*;
