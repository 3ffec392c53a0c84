use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use russh::MethodSet;
use russh_keys::key::KeyPair;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::auth::StoreVerifier;
use super::connection::{ConnectionHandler, ServerState};
use super::menu::MenuOptions;
use super::registry::SessionRegistry;
use crate::config::Config;
use crate::storage::{ContentStore, SledStore};
use crate::validation::validate_sysop_name;

macro_rules! sec_log {
    ($($arg:tt)*) => { log::warn!(target: "security", $($arg)*); };
}
#[allow(unused_imports)]
pub(crate) use sec_log;

/// # BBS Server - Connection Acceptor
///
/// Owns the listening socket and the state every connection shares (content
/// store, session registry, SSH configuration).
///
/// ```text
///  TcpListener ──accept──► task per connection ──► russh handshake
///                                                    │
///                               ConnectionHandler ◄──┘
///                                 ├─ request dispatcher
///                                 └─ MenuEngine ──► ContentStore
/// ```
///
/// ## Usage
///
/// ```rust,no_run
/// use sshbbs::bbs::BbsServer;
/// use sshbbs::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::load("config.toml").await?;
///     let server = BbsServer::new(config).await?;
///     server.run().await
/// }
/// ```
///
/// `run` returns once [`ShutdownHandle::shutdown`] is called. Connections that
/// are still open keep running until their clients leave.
pub struct BbsServer {
    config: Config,
    state: Arc<ServerState>,
    ssh_config: Arc<russh::server::Config>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

/// Stops a running [`BbsServer`] accept loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

impl BbsServer {
    /// Open the sled store under `storage.data_dir` and build the server.
    pub async fn new(config: Config) -> Result<Self> {
        let store = SledStore::open(&config.storage.data_dir, config.argon2_params())
            .with_context(|| format!("failed to open content store in {}", config.storage.data_dir))?;
        Self::with_store(config, Arc::new(store))
    }

    /// Build a server over an existing store; the host key is loaded or
    /// generated at `server.host_key_path`.
    pub fn with_store(config: Config, store: Arc<dyn ContentStore>) -> Result<Self> {
        if let Err(e) = validate_sysop_name(&config.bbs.sysop) {
            return Err(anyhow!(
                "Invalid sysop name '{}': {}\n\n\
                SOLUTION: Edit your config.toml file and change the 'sysop' field to a valid name.\n\
                Valid sysop names must:\n\
                • Be 2-20 characters long\n\
                • Contain only letters, numbers, underscores, hyphens, and periods\n\
                • Not be a reserved system name",
                config.bbs.sysop,
                e
            ));
        }

        let host_key = load_or_generate_host_key(Path::new(&config.server.host_key_path))?;
        let mut methods = MethodSet::PASSWORD;
        if config.bbs.allow_anonymous {
            methods |= MethodSet::NONE;
        }
        let ssh_config = russh::server::Config {
            inactivity_timeout: None,
            auth_rejection_time: Duration::from_millis(config.server.auth_rejection_ms),
            auth_rejection_time_initial: Some(Duration::ZERO),
            max_auth_attempts: config.server.max_auth_attempts,
            methods,
            keys: vec![host_key],
            ..Default::default()
        };

        let state = ServerState {
            verifier: Arc::new(StoreVerifier::new(Arc::clone(&store))),
            store,
            registry: Arc::new(SessionRegistry::new()),
            menu: MenuOptions::from(&config.bbs),
            allow_anonymous: config.bbs.allow_anonymous,
            max_users: config.bbs.max_users,
        };
        let (shutdown_tx, _) = watch::channel(false);
        Ok(BbsServer {
            config,
            state: Arc::new(state),
            ssh_config: Arc::new(ssh_config),
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub fn store(&self) -> Arc<dyn ContentStore> {
        Arc::clone(&self.state.store)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: Arc::clone(&self.shutdown_tx) }
    }

    /// Bind `server.listen_addr` and serve until shut down. A bind failure is fatal.
    pub async fn run(&self) -> Result<()> {
        let addr = &self.config.server.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "BBS '{}' (sysop {}) listening on {}",
            self.config.bbs.name,
            self.config.bbs.sysop,
            listener.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into())
        );
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("connection from {}", peer);
                            let handler = ConnectionHandler::new(Arc::clone(&self.state), Some(peer));
                            let ssh_config = Arc::clone(&self.ssh_config);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(ssh_config, stream, handler).await {
                                    debug!("connection from {} ended: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => warn!("failed to accept connection: {}", e),
                    }
                }
            }
        }
        info!("listener closed; {} session(s) still active", self.state.registry.len());
        Ok(())
    }

    /// Board and session summary of this server.
    pub fn show_status(&self) -> Result<serde_json::Value> {
        status_report(&self.config, self.state.store.as_ref(), self.state.registry.len())
    }
}

/// Board and session summary for the `status` command. Needs only the store,
/// so it works without a host key or a bound listener.
pub fn status_report(config: &Config, store: &dyn ContentStore, active_sessions: usize) -> Result<serde_json::Value> {
    let boards = store.list_boards()?;
    let total: usize = boards.iter().map(|b| b.post_count).sum();
    Ok(json!({
        "name": config.bbs.name,
        "sysop": config.bbs.sysop,
        "listen_addr": config.server.listen_addr,
        "active_sessions": active_sessions,
        "total_posts": total,
        "boards": boards.iter().map(|b| json!({
            "id": b.id,
            "name": b.name,
            "description": b.description,
            "posts": b.post_count,
        })).collect::<Vec<_>>(),
    }))
}

async fn serve_connection(
    config: Arc<russh::server::Config>,
    stream: tokio::net::TcpStream,
    handler: ConnectionHandler,
) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let session = russh::server::run_stream(config, stream, handler).await?;
    session.await?;
    Ok(())
}

/// Load the server key, creating an Ed25519 key (PKCS#8 PEM, mode 0600) when
/// the file does not exist yet.
pub fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        return russh_keys::load_secret_key(path, None)
            .with_context(|| format!("failed to load host key {}", path.display()));
    }

    let key = KeyPair::generate_ed25519().ok_or_else(|| anyhow!("failed to generate Ed25519 host key"))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options
        .open(path)
        .with_context(|| format!("failed to create host key {}", path.display()))?;
    russh_keys::encode_pkcs8_pem(&key, file)
        .with_context(|| format!("failed to write host key {}", path.display()))?;
    info!("generated new host key at {}", path.display());
    Ok(key)
}
