//! filehub - a small multi-client chat and file-sharing server.
//!
//! Clients authenticate, exchange broadcast chat messages, and transfer
//! files through a central server. Each connection multiplexes a
//! line-oriented text channel (commands, chat, replies) with a raw binary
//! channel (file payloads) over one TCP stream; framing discipline lives in
//! [`channel`], the wire codec in [`protocol`], and per-connection dispatch
//! in [`server`].

pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
