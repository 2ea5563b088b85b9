pub mod client;
pub mod webhook;

pub use client::AdminClient;
pub use webhook::{WebhookServer, WebhookState};
