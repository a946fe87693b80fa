//! # hype-api
//!
//! HTTP edges of the hype monitor:
//!
//! - **Helix** (`helix`): stream status and viewer counts over REST
//! - **Poller** (`poller`): periodic status polling into the registry
//! - **Webhook** (`webhook`): hype notifications posted to a chat webhook

pub mod helix;
pub mod poller;
pub mod webhook;

pub use helix::{HelixClient, StatusSource, StreamInfo};
pub use poller::{StatusChange, StatusPoller};
pub use webhook::WebhookSink;
