//! Client and webhook adapter for the Facebook Messenger bot API.
//!
//! [`Webhook`] receives deliveries, checks their signature and hands
//! normalized [`Event`]s to an [`EventHandler`]. [`MessengerClient`] sends
//! messages, reads profiles and configures the bot.

pub mod client;
pub mod config;
pub mod event;
pub mod payload;
pub mod signature;
pub mod webhook;

pub use client::{Button, ClientConfig, ClientError, Greeting, MessengerClient, Profile, Reply};
pub use config::Config;
pub use event::{classify, Attachment, Event, EventKind};
pub use payload::{parse_batch, ParseError, RawEntryBatch};
pub use signature::verify_signature;
pub use webhook::{EventHandler, Webhook, WebhookConfig, WebhookError};
