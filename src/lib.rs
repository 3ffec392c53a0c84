//! # sshbbs - Bulletin Board System over SSH
//!
//! A multi-user bulletin board reached with any SSH client. Each connection
//! gets a line-oriented, menu-driven terminal session for browsing boards,
//! reading threads, posting and replying.
//!
//! ## Features
//!
//! - **SSH Transport**: Password or anonymous (`none`) authentication, PTY and
//!   window-size negotiation, one interactive channel per connection.
//! - **Message Boards**: Paged board listings, threaded replies, recent posts.
//! - **Accounts**: Registration and login from inside the session, Argon2id
//!   password hashing, a sysop account that can create boards.
//! - **Session Registry**: Live view of who is online, with idle and session times.
//! - **Persistence**: Embedded sled database; an in-memory store for tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sshbbs::config::Config;
//! use sshbbs::bbs::BbsServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let server = BbsServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - SSH server, sessions, terminal line discipline and menus
//! - [`storage`] - Users, boards and posts behind the [`storage::ContentStore`] trait
//! - [`config`] - TOML configuration with defaults
//! - [`validation`] - Input validation and sanitization
//! - [`logutil`] - Helpers for single-line log output
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   BBS Server    │ ← SSH accept loop, auth, channel requests
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Menu Engine   │ ← One per interactive session
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Storage       │ ← Data persistence
//! │   Layer         │
//! └─────────────────┘
//! ```

pub mod bbs;
pub mod config;
pub mod logutil;
pub mod storage;
pub mod validation;
