//! # BBS Core Module
//!
//! Everything between the TCP socket and the content store.
//!
//! ## Components
//!
//! - [`server`] - Accept loop, host key and SSH configuration
//! - [`connection`] - Per-connection SSH handler (auth, channel events)
//! - [`dispatch`] - Channel request dispatcher (pty, shell, window changes)
//! - [`terminal`] - Line discipline over the channel byte stream
//! - [`menu`] - Menu state machine driving one session
//! - [`session`] - Per-session state
//! - [`registry`] - Concurrent map of live sessions
//! - [`auth`] - Credential verification
//! - [`render`] - Shared screen fragments and time formatting
//!
//! ## Session Lifecycle
//!
//! ```text
//! TCP accept ─► SSH handshake ─► auth (password | none)
//!                                      │
//!                     session channel opened ─► registry entry created
//!                                      │
//!                 pty-req / shell ─► dispatcher      data ─► LineTerminal
//!                                      │
//!                               MenuEngine::run
//!                                      │
//!                 exit / disconnect ─► registry entry removed ─► channel closed
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sshbbs::bbs::BbsServer;
//! use sshbbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let server = BbsServer::new(config).await?;
//!     server.run().await
//! }
//! ```

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod menu;
pub mod registry;
pub mod render;
pub mod server;
pub mod session;
pub mod terminal;

pub use server::{BbsServer, ShutdownHandle};
