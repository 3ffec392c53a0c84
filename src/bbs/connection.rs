//! Per-connection SSH handler: authentication and the interactive channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use russh::server::{Auth, Handle, Msg, Session as SshSession};
use russh::{Channel, ChannelId, CryptoVec, MethodSet, Pty};
use tokio::sync::mpsc;

use super::auth::{AuthError, CredentialVerifier};
use super::dispatch::{self, RequestHandle};
use super::menu::{MenuEngine, MenuOptions};
use super::registry::{SessionGuard, SessionRegistry};
use super::session::Session;
use super::server::sec_log;
use super::terminal::{LineTerminal, OutputSink, TerminalControl, TerminalError};
use crate::logutil::{escape_log, peer_label};
use crate::storage::{ContentStore, User, UserId};

/// Extension key carrying the verified account id.
pub const USER_ID_EXTENSION: &str = "user-id";

pub const SESSIONS_FULL_MESSAGE: &str = "All available sessions are in use. Please try again later.\r\n";

/// What the auth phase learned about the client.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub extensions: HashMap<String, String>,
}

impl Permissions {
    pub fn for_user(id: UserId) -> Self {
        let mut extensions = HashMap::new();
        extensions.insert(USER_ID_EXTENSION.to_string(), id.to_string());
        Permissions { extensions }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.extensions.get(USER_ID_EXTENSION)?.parse().ok()
    }
}

/// State shared by every connection of one server.
pub struct ServerState {
    pub store: Arc<dyn ContentStore>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub registry: Arc<SessionRegistry>,
    pub menu: MenuOptions,
    pub allow_anonymous: bool,
    pub max_users: usize,
}

/// Terminal output into an SSH channel.
pub struct ChannelSink {
    handle: Handle,
    channel: ChannelId,
}

impl ChannelSink {
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        ChannelSink { handle, channel }
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send(&self, bytes: &[u8]) -> Result<(), TerminalError> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(bytes))
            .await
            .map_err(|_| TerminalError::Disconnected)
    }
}

/// Queues feeding the engine and dispatcher of the open channel. Dropping this
/// ends both tasks.
struct OpenChannel {
    id: ChannelId,
    input: mpsc::UnboundedSender<Vec<u8>>,
    requests: RequestHandle,
}

pub struct ConnectionHandler {
    state: Arc<ServerState>,
    peer: Option<SocketAddr>,
    permissions: Permissions,
    channel: Option<OpenChannel>,
}

impl ConnectionHandler {
    pub fn new(state: Arc<ServerState>, peer: Option<SocketAddr>) -> Self {
        ConnectionHandler { state, peer, permissions: Permissions::default(), channel: None }
    }

    fn peer_label(&self) -> String {
        peer_label(self.peer)
    }

    /// Identity established during auth, if any. Anonymous clients start
    /// without one and pick at the login menu.
    fn resolve_identity(&self) -> Option<User> {
        let id = self.permissions.user_id()?;
        match self.state.store.get_user(id) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("authenticated user {} could not be loaded: {}", id, e);
                None
            }
        }
    }

    fn reject_full(&self, id: ChannelId, handle: Handle) {
        warn!("rejecting session from {}: {} sessions active", self.peer_label(), self.state.max_users);
        tokio::spawn(async move {
            let _ = handle.data(id, CryptoVec::from_slice(SESSIONS_FULL_MESSAGE.as_bytes())).await;
            let _ = handle.close(id).await;
        });
    }

    fn open_interactive(&mut self, id: ChannelId, handle: Handle, session: Arc<Session>, control: TerminalControl) {
        let state = Arc::clone(&self.state);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (requests, _dispatcher) = dispatch::start_dispatcher(control.clone());

        info!("session {} opened from {} as {}", session.id, self.peer_label(), escape_log(&session.display_name()));
        let guard = SessionGuard::new(Arc::clone(&state.registry), Arc::clone(&session));

        let term = LineTerminal::new(ChannelSink::new(handle.clone(), id), input_rx, control);
        let engine = MenuEngine::new(
            term,
            Arc::clone(&state.store),
            Arc::clone(&state.verifier),
            session,
            Arc::clone(&state.registry),
            state.menu.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                debug!("session {} ended with error: {}", guard.session().id, e);
            }
            let session_id = guard.session().id.clone();
            drop(guard);
            let _ = handle.close(id).await;
            info!("session {} closed", session_id);
        });

        self.channel = Some(OpenChannel { id, input: input_tx, requests });
    }

    fn open_requests(&self, channel: ChannelId) -> Option<&RequestHandle> {
        self.channel.as_ref().filter(|c| c.id == channel).map(|c| &c.requests)
    }

    /// Hand a request to the dispatcher and relay its answer to the client.
    async fn forward(&mut self, channel: ChannelId, name: &str, payload: Bytes, session: &mut SshSession) {
        let accepted = match self.open_requests(channel) {
            Some(requests) => requests.request(name, payload).await,
            None => false,
        };
        if accepted {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
    }

    fn close_channel(&mut self, channel: ChannelId) {
        if self.channel.as_ref().map(|c| c.id == channel).unwrap_or(false) {
            self.channel = None;
        }
    }
}

#[async_trait]
impl russh::server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        if self.state.allow_anonymous {
            debug!("anonymous login as '{}' from {}", escape_log(user), self.peer_label());
            return Ok(Auth::Accept);
        }
        Ok(Auth::Reject { proceed_with_methods: Some(MethodSet::PASSWORD) })
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.state.verifier.verify(user, password) {
            Ok(account) => {
                if let Err(e) = self.state.verifier.record_login(account.id) {
                    warn!("could not record login for {}: {}", escape_log(&account.username), e);
                }
                info!("password auth ok for {} from {}", escape_log(&account.username), self.peer_label());
                self.permissions = Permissions::for_user(account.id);
                Ok(Auth::Accept)
            }
            Err(AuthError::InvalidCredentials) => {
                sec_log!("ssh password auth failed for '{}' from {}", escape_log(user), self.peer_label());
                Ok(Auth::Reject { proceed_with_methods: Some(MethodSet::PASSWORD) })
            }
            Err(e) => {
                warn!("password auth backend error for '{}': {}", escape_log(user), e);
                Ok(Auth::Reject { proceed_with_methods: Some(MethodSet::PASSWORD) })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut SshSession,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() {
            debug!("refusing extra session channel from {}", self.peer_label());
            return Ok(false);
        }
        let id = channel.id();
        let handle = session.handle();
        let control = TerminalControl::new();
        let identity = self.resolve_identity();
        let max_users = self.state.max_users;
        match self.state.registry.try_create(identity, control.clone(), self.peer, max_users) {
            Some(session) => self.open_interactive(id, handle, session, control),
            None => self.reject_full(id, handle),
        }
        Ok(true)
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut SshSession) -> Result<(), Self::Error> {
        if let Some(open) = self.channel.as_ref().filter(|c| c.id == channel) {
            let _ = open.input.send(data.to_vec());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        let payload = dispatch::encode_pty_request(term, col_width, row_height, pix_width, pix_height);
        self.forward(channel, dispatch::PTY_REQ, payload, session).await;
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut SshSession) -> Result<(), Self::Error> {
        self.forward(channel, dispatch::SHELL, Bytes::new(), session).await;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        if let Some(requests) = self.open_requests(channel) {
            let payload = dispatch::encode_window_change(col_width, row_height, pix_width, pix_height);
            requests.notify(dispatch::WINDOW_CHANGE, payload);
        }
        Ok(())
    }

    async fn exec_request(&mut self, channel: ChannelId, _data: &[u8], session: &mut SshSession) -> Result<(), Self::Error> {
        self.forward(channel, dispatch::EXEC, Bytes::new(), session).await;
        Ok(())
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, session: &mut SshSession) -> Result<(), Self::Error> {
        debug!("subsystem '{}' requested by {}", escape_log(name), self.peer_label());
        self.forward(channel, dispatch::SUBSYSTEM, Bytes::new(), session).await;
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        self.forward(channel, dispatch::ENV, Bytes::new(), session).await;
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut SshSession) -> Result<(), Self::Error> {
        self.close_channel(channel);
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut SshSession) -> Result<(), Self::Error> {
        self.close_channel(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_round_trip_user_id() {
        assert_eq!(Permissions::default().user_id(), None);
        assert_eq!(Permissions::for_user(42).user_id(), Some(42));

        let mut garbled = Permissions::default();
        garbled.extensions.insert(USER_ID_EXTENSION.into(), "not-a-number".into());
        assert_eq!(garbled.user_id(), None);
    }
}
