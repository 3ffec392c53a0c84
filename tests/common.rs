//! Shared fixtures for the integration tests: an in-memory store, a scripted
//! terminal that records everything written to it, and menu options without
//! pauses.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sshbbs::bbs::menu::MenuOptions;
use sshbbs::bbs::terminal::{LineTerminal, OutputSink, TerminalControl, TerminalError};
use sshbbs::storage::{Board, ContentStore, MemoryStore, NewUser, User};

/// Output sink that keeps every byte the session wrote.
#[derive(Clone, Default)]
pub struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl CaptureSink {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[async_trait]
impl OutputSink for CaptureSink {
    async fn send(&self, bytes: &[u8]) -> Result<(), TerminalError> {
        self.0.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }
}

/// Terminal fed with `input` up front; once it is consumed the terminal
/// reports a disconnect, which ends any menu loop.
pub fn scripted_terminal(input: &str) -> (LineTerminal<CaptureSink>, TerminalControl, CaptureSink) {
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(input.as_bytes().to_vec()).unwrap();
    drop(tx);
    let sink = CaptureSink::default();
    let control = TerminalControl::new();
    control.set_prompt("");
    (LineTerminal::new(sink.clone(), rx, control.clone()), control, sink)
}

pub fn fast_options() -> MenuOptions {
    MenuOptions {
        notice_pause: Duration::ZERO,
        error_pause: Duration::ZERO,
        ..MenuOptions::default()
    }
}

pub fn store_with_boards() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_board("general", "General discussion").unwrap();
    store.create_board("tech", "Technology and programming").unwrap();
    store
}

pub fn add_user(store: &dyn ContentStore, name: &str, password: &str) -> User {
    store.create_user(NewUser::new(name, format!("{}@example.com", name), password)).unwrap()
}

pub fn add_admin(store: &dyn ContentStore, name: &str, password: &str) -> User {
    store.create_user(NewUser::new(name, "", password).admin()).unwrap()
}

pub fn board_named(store: &dyn ContentStore, name: &str) -> Board {
    store
        .list_boards()
        .unwrap()
        .into_iter()
        .find(|b| b.name == name)
        .unwrap_or_else(|| panic!("no board named {}", name))
}
