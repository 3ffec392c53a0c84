//! Binary entrypoint for the sshbbs CLI.
//!
//! Commands:
//! - `start [--listen <addr>]` - run the SSH server until Ctrl-C or SIGTERM
//! - `init` - write a starter `config.toml` and seed the default boards
//! - `status` - print board and session statistics as JSON
//! - `sysop-passwd` - interactively set the sysop password (argon2 hashed)
//!
//! See the library crate docs for module-level details: `sshbbs::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use sshbbs::bbs::server::status_report;
use sshbbs::bbs::BbsServer;
use sshbbs::config::Config;
use sshbbs::storage::{ContentStore, NewUser, SledStore, StoreError};
use sshbbs::validation::validate_password;

/// Boards created by `init`.
const DEFAULT_BOARDS: &[(&str, &str)] = &[
    ("general", "General discussion"),
    ("tech", "Technology and programming"),
    ("random", "Random topics"),
];

#[derive(Parser)]
#[command(name = "sshbbs")]
#[command(about = "A Bulletin Board System served over SSH")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS server
    Start {
        /// Listen address, overriding `server.listen_addr` (e.g. 0.0.0.0:2222)
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Initialize a new BBS configuration and default boards
    Init,
    /// Show BBS status and statistics
    Status,
    /// Set or update the sysop (primary administrator) password
    SysopPasswd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match cli.command {
        Commands::Init => None,
        _ => Some(Config::load(&cli.config).await),
    };
    let pre_config = loaded.as_ref().and_then(|r| r.as_ref().ok().cloned());
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { listen } => {
            let mut config = match loaded {
                Some(Ok(config)) => config,
                Some(Err(e)) => {
                    warn!("{}; starting with default configuration", e);
                    Config::default()
                }
                None => Config::default(),
            };
            if let Some(addr) = listen {
                config.server.listen_addr = addr;
            }
            info!("Starting sshbbs v{}", env!("CARGO_PKG_VERSION"));

            let server = BbsServer::new(config).await?;
            let shutdown = server.shutdown_handle();
            tokio::spawn(async move {
                wait_for_signal().await;
                info!("Shutdown requested");
                shutdown.shutdown();
            });
            server.run().await?;
            info!("BBS server stopped");
        }
        Commands::Init => {
            info!("Initializing new BBS configuration");
            Config::create_default(&cli.config).await?;
            let config = Config::load(&cli.config).await?;

            let store = SledStore::open(&config.storage.data_dir, config.argon2_params())?;
            for (name, description) in DEFAULT_BOARDS {
                match store.create_board(name, description) {
                    Ok(board) => info!("Created board '{}' (id {})", board.name, board.id),
                    Err(StoreError::Duplicate(_)) => info!("Board '{}' already exists", name),
                    Err(e) => return Err(e.into()),
                }
            }
            store.flush()?;
            println!("BBS initialized. Configuration written to {}", cli.config);
            println!("Next: run `sshbbs sysop-passwd` to create the sysop account.");
        }
        Commands::Status => {
            let config = loaded.unwrap_or_else(|| Ok(Config::default()))?;
            // Fails while a running server holds the sled lock
            let store = SledStore::open(&config.storage.data_dir, config.argon2_params())?;
            let status = status_report(&config, &store, 0)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::SysopPasswd => {
            let config = loaded.unwrap_or_else(|| Ok(Config::default()))?;
            let sysop = config.bbs.sysop.clone();
            println!("Setting sysop password for '{}'.", sysop);
            // Prompt twice without echo
            let pass1 = rpassword::prompt_password("New password: ")?;
            if let Err(e) = validate_password(&pass1) {
                println!("Error: {}.", e);
                return Ok(());
            }
            let pass2 = rpassword::prompt_password("Confirm password: ")?;
            if pass1 != pass2 {
                println!("Error: passwords do not match.");
                return Ok(());
            }

            let store = SledStore::open(&config.storage.data_dir, config.argon2_params())?;
            set_sysop_password(&store, &sysop, &pass1)?;
            store.flush()?;
            println!("Sysop password updated successfully.");
        }
    }

    Ok(())
}

/// Create the sysop account, or reset its password and admin flag if it exists.
fn set_sysop_password(store: &dyn ContentStore, sysop: &str, password: &str) -> Result<()> {
    match store.get_user_by_name(sysop) {
        Ok(mut user) => {
            store.set_password(user.id, password)?;
            if !user.is_admin {
                user.is_admin = true;
                store.update_user(&user)?;
            }
            info!("Updated sysop account '{}'", sysop);
        }
        Err(StoreError::NotFound(_)) => {
            let user = store
                .create_user(NewUser::new(sysop, "", password).admin())
                .map_err(|e| anyhow!("could not create sysop account '{}': {}", sysop, e))?;
            info!("Created sysop account '{}' (id {})", user.username, user.id);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // russh is chatty at debug
    builder.filter_module("russh", log::LevelFilter::Warn);
    let file = config.as_ref().and_then(|c| c.logging.file.clone());
    let security_path = config.as_ref().and_then(|c| c.logging.security_file.clone());
    let opened = file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    if let Some(f) = opened {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if record.target() == "security" {
                write_security_line(security_path.as_deref(), &line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if record.target() == "security" {
                write_security_line(security_path.as_deref(), &line);
            }
            writeln!(fmt, "{}", line)
        });
    }
    let _ = builder.try_init();
}

fn write_security_line(path: Option<&str>, line: &str) {
    use std::io::Write;
    if let Some(path) = path {
        if let Ok(mut sf) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(sf, "{}", line);
        }
    }
}
