//! Client for the vcontrold heating-control daemon.
//!
//! vcontrold speaks a line-oriented text protocol over a single TCP
//! connection. This module maps each "send command, await response" call
//! onto that byte stream.
//!
//! # Protocol
//!
//! The daemon greets a new connection with its prompt, then answers every
//! newline-terminated command with a payload followed by the same prompt.
//! There is no length prefix and no message ID:
//!
//! ```text
//! S: vctrld>
//! C: getTempA\n
//! S: 23.5\nvctrld>
//! C: setBetriebsart WW\n
//! S: OK\nvctrld>
//! C: quit\n
//! S: <closes connection>
//! ```
//!
//! A get command fails when its payload starts with `ERR:`; a set command
//! succeeds only when its payload starts with `OK`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  TransportEvent  ┌─────────┐ oneshot ┌───────────┐
//! │ reader task      │─────────────────>│ Session │────────>│ caller    │
//! │ (transport.rs)   │                  │ (slot)  │         │ (client)  │
//! └──────────────────┘                  └─────────┘         └───────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vctrld_client::vcontrol::VControlClient;
//!
//! let client = VControlClient::new();
//! client.connect("localhost", 3002).await?;
//! let temp = client.get_data("getTempA").await?;
//! client.close().await?;
//! ```

mod client;
mod command;
mod error;
mod framing;
mod session;
mod transport;

pub use client::VControlClient;
pub use command::{SetArgs, ERROR_PREFIX, OK_PREFIX, QUIT_COMMAND};
pub use error::VControlError;
pub use framing::PROMPT;
pub use session::ConnectionState;
