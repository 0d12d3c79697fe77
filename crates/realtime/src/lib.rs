//! Realtime change-feed client for the skillfeed marketplace backend
//!
//! Joins websocket channels scoped to `{event, schema, table, filter}` and
//! delivers inserted or updated rows to callbacks. Channels also carry
//! ephemeral broadcast events such as chat typing indicators. Every
//! subscription must be torn down, either explicitly or by dropping it.

mod channel;
mod client;
mod error;
mod filters;
mod message;

pub use channel::{BroadcastChanges, ChannelBuilder, DatabaseChanges, Subscription};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use error::RealtimeError;
pub use filters::{DatabaseFilter, FilterOperator};
pub use message::{ChannelEvent, Payload, RealtimeMessage};
