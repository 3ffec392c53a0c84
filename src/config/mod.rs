//! # Configuration Management Module
//!
//! Everything the server reads at startup lives in one TOML file, loaded into
//! [`Config`]. Every section and field has a default, so a partial file (or
//! no file at all) still yields a runnable server.
//!
//! ## Configuration Structure
//!
//! - [`BbsConfig`] - identity of the board, anonymous access and session limits
//! - [`ServerConfig`] - SSH listener and authentication tuning
//! - [`StorageConfig`] - where the content database lives
//! - [`LoggingConfig`] - log level and log files
//! - [`SecurityConfig`] - optional Argon2 cost overrides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sshbbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("BBS Name: {}", config.bbs.name);
//!     println!("Listening on: {}", config.server.listen_addr);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bbs]
//! name = "Rust BBS System"
//! sysop = "sysop"
//! description = "A bulletin board system over SSH"
//! allow_anonymous = true
//! max_users = 100
//!
//! [server]
//! listen_addr = "0.0.0.0:2222"
//! host_key_path = "host_key"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "sshbbs.log"
//!
//! [security.argon2]
//! memory_kib = 19456
//! time_cost = 2
//! parallelism = 1
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bbs: BbsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: Option<SecurityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BbsConfig {
    pub name: String,
    /// Account name of the operator; seeded by `sysop-passwd`.
    pub sysop: String,
    pub description: String,
    /// Extra text shown under the welcome banner. Empty shows nothing.
    pub welcome_message: String,
    /// Accept SSH clients that authenticate with the `none` method.
    pub allow_anonymous: bool,
    /// Concurrent interactive sessions; `0` means unlimited.
    pub max_users: usize,
    /// Posts per page in a board listing.
    pub page_size: usize,
    pub recent_posts_limit: usize,
    /// Pause after a success notice, in milliseconds.
    pub notice_pause_ms: u64,
    /// Pause after an error message, in milliseconds.
    pub error_pause_ms: u64,
}

impl Default for BbsConfig {
    fn default() -> Self {
        BbsConfig {
            name: "Rust BBS System".to_string(),
            sysop: "sysop".to_string(),
            description: "A bulletin board system over SSH".to_string(),
            welcome_message: String::new(),
            allow_anonymous: true,
            max_users: 100,
            page_size: 20,
            recent_posts_limit: 20,
            notice_pause_ms: 1000,
            error_pause_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Ed25519 host key in PKCS#8 PEM; generated on first start when missing.
    pub host_key_path: String,
    pub max_auth_attempts: usize,
    /// Delay before answering a rejected authentication attempt.
    pub auth_rejection_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:2222".to_string(),
            host_key_path: "host_key".to_string(),
            max_auth_attempts: 3,
            auth_rejection_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { data_dir: "./data".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: Some("sshbbs.log".to_string()),
            security_file: Some("sshbbs-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Argon2 parameters from `[security.argon2]`. Unset fields fall back to
    /// the library defaults; `None` means use the defaults outright.
    pub fn argon2_params(&self) -> Option<argon2::Params> {
        use argon2::Params;
        let a = self.security.as_ref()?.argon2.as_ref()?;
        let builder = Params::DEFAULT;
        let mem = a.memory_kib.unwrap_or(builder.m_cost());
        let time = a.time_cost.unwrap_or(builder.t_cost());
        let para = a.parallelism.unwrap_or(builder.p_cost());
        Params::new(mem, time, para, None).ok()
    }
}
