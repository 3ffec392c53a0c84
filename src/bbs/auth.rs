use std::sync::Arc;

use thiserror::Error;

use crate::storage::{ContentStore, StoreError, User, UserId};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential backend failure: {0}")]
    Store(#[from] StoreError),
}

/// Checks a principal/secret pair and records successful logins.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<User, AuthError>;
    fn record_login(&self, id: UserId) -> Result<(), StoreError>;
}

/// Verifier backed by the content store's account table.
#[derive(Clone)]
pub struct StoreVerifier {
    store: Arc<dyn ContentStore>,
}

impl StoreVerifier {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        StoreVerifier { store }
    }
}

impl CredentialVerifier for StoreVerifier {
    fn verify(&self, username: &str, password: &str) -> Result<User, AuthError> {
        match self.store.authenticate(username, password) {
            Ok(user) => Ok(user),
            Err(StoreError::InvalidCredentials) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Store(e)),
        }
    }

    fn record_login(&self, id: UserId) -> Result<(), StoreError> {
        self.store.update_last_login(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, NewUser};

    #[test]
    fn verify_maps_store_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user(NewUser::new("alice", "", "password1")).unwrap();
        let verifier = StoreVerifier::new(store.clone());

        assert_eq!(verifier.verify("alice", "password1").unwrap().id, alice.id);
        assert!(matches!(verifier.verify("alice", "wrong-pass"), Err(AuthError::InvalidCredentials)));
        assert!(matches!(verifier.verify("nobody", "password1"), Err(AuthError::InvalidCredentials)));

        verifier.record_login(alice.id).unwrap();
        assert!(store.get_user(alice.id).unwrap().last_login >= alice.last_login);
        assert!(matches!(verifier.record_login(999), Err(StoreError::NotFound(_))));
    }
}
