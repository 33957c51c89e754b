//! vcontrold client library
//!
//! This library provides the components for talking to a vcontrold
//! heating-control daemon:
//!
//! - `vcontrol` - Async client for the daemon's prompt-delimited TCP protocol
//! - `config` - Client configuration from file and environment
//! - `mock` - An in-process daemon emulator for tests
//!
//! # Client
//!
//! ```ignore
//! use vctrld_client::config::ClientConfig;
//! use vctrld_client::vcontrol::VControlClient;
//!
//! let config = ClientConfig::load()?;
//! let client = VControlClient::with_config(&config);
//! client.connect(&config.host, config.port).await?;
//! let temp = client.get_data("getTempA").await?;
//! client.close().await?;
//! ```

pub mod config;
pub mod mock;
pub mod vcontrol;
