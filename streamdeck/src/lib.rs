//! Client for the Stream Deck plugin protocol.
//!
//! The host launches the plugin as a child process, passes the connection
//! parameters on the command line, and speaks JSON frames over a local
//! WebSocket. This crate owns that boundary: registration parameter parsing,
//! inbound event decoding, outbound command encoding, and the socket tasks.

mod client;
mod commands;
mod error;
mod events;
mod registration;

pub use client::{connect, Client, CommandSink, Connection, EventStream};
pub use commands::Target;
pub use error::Error;
pub use events::{
    event_names, DidReceiveSettingsPayload, Event, KeyUpPayload, WillAppearPayload,
};
pub use registration::RegistrationParams;
