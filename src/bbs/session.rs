use std::net::SocketAddr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::terminal::TerminalControl;
use crate::storage::User;

/// # Live Session
///
/// One interactive SSH channel. Sessions exist only in memory: the
/// [`SessionRegistry`](super::registry::SessionRegistry) creates them when a
/// channel is accepted and drops them when it closes.
///
/// ## Identity
///
/// - `user() == None` - nobody has logged in yet
/// - `user()` with id 0 - the guest chose "Continue as Guest"
/// - any other id - an authenticated member
///
/// The identity and activity timestamp sit behind their own locks so the menu
/// engine can update them while other sessions read the registry snapshot.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub peer: Option<SocketAddr>,
    pub created_at: DateTime<Utc>,
    terminal: TerminalControl,
    user: RwLock<Option<User>>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: String, user: Option<User>, terminal: TerminalControl, peer: Option<SocketAddr>) -> Self {
        let now = Utc::now();
        Session {
            id,
            peer,
            created_at: now,
            terminal,
            user: RwLock::new(user),
            last_activity: RwLock::new(now),
        }
    }

    pub fn terminal(&self) -> &TerminalControl {
        &self.terminal
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_user(&self, user: Option<User>) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = user;
    }

    /// Logged in with a real account (not a guest).
    pub fn is_member(&self) -> bool {
        self.user().map(|u| !u.is_guest()).unwrap_or(false)
    }

    pub fn is_admin(&self) -> bool {
        self.user().map(|u| u.is_admin).unwrap_or(false)
    }

    pub fn display_name(&self) -> String {
        self.user()
            .map(|u| u.username)
            .unwrap_or_else(|| "(logging in)".to_string())
    }

    /// Record user input.
    pub fn touch(&self) {
        *self.last_activity.write().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_duration(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn idle_time(&self) -> chrono::Duration {
        Utc::now() - self.last_activity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, admin: bool) -> User {
        User { id, username: format!("user{}", id), is_admin: admin, ..User::guest() }
    }

    #[test]
    fn identity_transitions() {
        let session = Session::new("abc".into(), None, TerminalControl::new(), None);
        assert!(session.user().is_none());
        assert!(!session.is_member());
        assert_eq!(session.display_name(), "(logging in)");

        session.set_user(Some(User::guest()));
        assert!(!session.is_member());
        assert_eq!(session.display_name(), "guest");

        session.set_user(Some(member(5, true)));
        assert!(session.is_member());
        assert!(session.is_admin());

        session.set_user(None);
        assert!(!session.is_admin());
    }

    #[test]
    fn touch_moves_last_activity_forward() {
        let session = Session::new("abc".into(), None, TerminalControl::new(), None);
        let before = session.last_activity();
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();
        assert!(session.last_activity() > before);
        assert!(session.idle_time() < chrono::Duration::seconds(1));
    }
}
