//! # Storage Module - Accounts, Boards and Posts
//!
//! The menu engine and the auth gate talk to persistence only through the
//! [`ContentStore`] trait. Two implementations ship with the crate:
//!
//! - [`SledStore`] - the production store, an embedded sled database at
//!   `<data_dir>/bbs.db` with bincode-encoded records
//! - [`MemoryStore`] - an in-process store used by tests and throwaway servers
//!
//! ## Layout
//!
//! ```text
//! data/
//! └── bbs.db/         ← sled database
//!     ├── users       ← id → UserRecord
//!     ├── usernames   ← lowercase name → id
//!     ├── boards      ← id → BoardRecord
//!     ├── board_names ← lowercase name → id
//!     └── posts       ← id → PostRecord
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sshbbs::storage::{ContentStore, NewPost, NewUser, SledStore};
//!
//! fn main() -> Result<(), sshbbs::storage::StoreError> {
//!     let store = SledStore::open("./data", None)?;
//!     let alice = store.create_user(NewUser::new("alice", "alice@example.com", "correct horse"))?;
//!     let board = store.create_board("general", "General discussion")?;
//!     store.create_post(NewPost::topic(board.id, &alice, "Hello", "First!"))?;
//!     Ok(())
//! }
//! ```
//!
//! Passwords are stored as Argon2id PHC strings; see [`Passwords`].

pub mod errors;
pub mod memory;
pub mod password;
pub mod sled_store;
pub mod types;

pub use errors::StoreError;
pub use memory::MemoryStore;
pub use password::Passwords;
pub use sled_store::SledStore;
pub use types::{
    Board, BoardId, NewPost, NewUser, Post, PostId, User, UserId, GUEST_USER_ID,
};

use crate::validation::{self, ValidationError};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations required by the BBS.
///
/// Calls are synchronous and short; every implementation must be safe to share
/// between connection tasks behind an `Arc<dyn ContentStore>`.
pub trait ContentStore: Send + Sync {
    // --- accounts ---

    /// Validate and register an account. Fails with [`StoreError::Duplicate`]
    /// when the name is taken (case-insensitive).
    fn create_user(&self, new_user: NewUser) -> StoreResult<User>;
    fn get_user(&self, id: UserId) -> StoreResult<User>;
    fn get_user_by_name(&self, username: &str) -> StoreResult<User>;
    /// Persist email / admin flag changes. The username is immutable.
    fn update_user(&self, user: &User) -> StoreResult<()>;
    fn delete_user(&self, id: UserId) -> StoreResult<()>;
    /// Check a name/password pair. Unknown names and wrong passwords both map to
    /// [`StoreError::InvalidCredentials`].
    fn authenticate(&self, username: &str, password: &str) -> StoreResult<User>;
    fn update_last_login(&self, id: UserId) -> StoreResult<()>;
    fn set_password(&self, id: UserId, password: &str) -> StoreResult<()>;

    // --- boards ---

    fn create_board(&self, name: &str, description: &str) -> StoreResult<Board>;
    fn get_board(&self, id: BoardId) -> StoreResult<Board>;
    /// All boards ordered by name, with `post_count` filled in.
    fn list_boards(&self) -> StoreResult<Vec<Board>>;
    fn update_board(&self, board: &Board) -> StoreResult<()>;
    /// Removes the board and every post on it.
    fn delete_board(&self, id: BoardId) -> StoreResult<()>;

    // --- posts ---

    fn create_post(&self, new_post: NewPost) -> StoreResult<Post>;
    fn get_post(&self, id: PostId) -> StoreResult<Post>;
    /// Top-level posts of a board, most recently updated first.
    fn list_board_posts(&self, board_id: BoardId, limit: usize, offset: usize) -> StoreResult<Vec<Post>>;
    /// Replies to `post_id`, oldest first.
    fn list_replies(&self, post_id: PostId) -> StoreResult<Vec<Post>>;
    /// Newest posts across all boards, replies included.
    fn recent_posts(&self, limit: usize) -> StoreResult<Vec<Post>>;
    /// Persist title / content edits and bump `updated_at`.
    fn update_post(&self, post: &Post) -> StoreResult<()>;
    /// Removes the post and its replies.
    fn delete_post(&self, id: PostId) -> StoreResult<()>;
    fn count_board_posts(&self, board_id: BoardId) -> StoreResult<usize>;
}

/// Ordering shared by both stores for board listings: `updated_at` desc, newest id first on ties.
pub(crate) fn sort_board_listing(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
}

pub(crate) fn sort_replies(posts: &mut [Post]) {
    posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

pub(crate) fn sort_recent(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Check a [`NewUser`] and return the trimmed name. Admin accounts use the
/// stricter sysop rules, which also admit the name "sysop".
pub(crate) fn validate_new_user(new_user: &NewUser) -> StoreResult<String> {
    let username = if new_user.is_admin {
        validation::validate_sysop_name(&new_user.username)
    } else {
        validation::validate_user_name(&new_user.username)
    }
    .map_err(ValidationError::from)?;
    validation::validate_password(&new_user.password)?;
    Ok(username)
}

/// Validate a [`NewPost`], returning the cleaned `(title, content)`.
pub(crate) fn validate_new_post(new_post: &NewPost) -> StoreResult<(String, String)> {
    if new_post.author.is_guest() {
        return Err(ValidationError::GuestAuthor.into());
    }
    let title = if new_post.reply_to.is_some() && new_post.title.trim().is_empty() {
        String::new()
    } else {
        validation::validate_title(&new_post.title)?
    };
    let content = validation::sanitize_post_content(&new_post.content)?;
    Ok((title, content))
}
