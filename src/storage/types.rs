//! Records persisted by the content store and the identities handed to sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type BoardId = u64;
pub type PostId = u64;

/// Id reserved for the guest identity; stores never hand it out.
pub const GUEST_USER_ID: UserId = 0;

pub const USER_SCHEMA_VERSION: u8 = 1;
pub const BOARD_SCHEMA_VERSION: u8 = 1;
pub const POST_SCHEMA_VERSION: u8 = 1;

/// An account as seen by the rest of the system (never carries the password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
    pub is_admin: bool,
}

impl User {
    /// The sentinel identity used by "Continue as Guest".
    pub fn guest() -> Self {
        let now = Utc::now();
        User {
            id: GUEST_USER_ID,
            username: "guest".to_string(),
            email: String::new(),
            created_at: now,
            last_login: now,
            is_admin: false,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.id == GUEST_USER_ID
    }
}

/// Account registration request.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        NewUser {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            is_admin: false,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

/// Stored account row: the public [`User`] plus its Argon2 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub schema_version: u8,
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Filled in on read: every post on the board, replies included.
    #[serde(skip)]
    pub post_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardRecord {
    pub schema_version: u8,
    pub board: Board,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub board_id: BoardId,
    pub user_id: UserId,
    pub username: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `None` for a thread starter, `Some(parent)` for a reply.
    pub reply_to: Option<PostId>,
    /// Filled in on read.
    #[serde(skip)]
    pub replies: usize,
}

impl Post {
    /// Title used in listings; replies carry no title of their own.
    pub fn display_title(&self) -> String {
        match self.reply_to {
            Some(parent) if self.title.is_empty() => format!("Re: post #{}", parent),
            _ => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRecord {
    pub schema_version: u8,
    pub post: Post,
}

/// A post about to be written. Build with [`NewPost::topic`] or [`NewPost::reply`].
#[derive(Debug, Clone)]
pub struct NewPost {
    pub board_id: BoardId,
    pub author: User,
    pub title: String,
    pub content: String,
    pub reply_to: Option<PostId>,
}

impl NewPost {
    pub fn topic(board_id: BoardId, author: &User, title: impl Into<String>, content: impl Into<String>) -> Self {
        NewPost {
            board_id,
            author: author.clone(),
            title: title.into(),
            content: content.into(),
            reply_to: None,
        }
    }

    pub fn reply(board_id: BoardId, author: &User, parent: PostId, content: impl Into<String>) -> Self {
        NewPost {
            board_id,
            author: author.clone(),
            title: String::new(),
            content: content.into(),
            reply_to: Some(parent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_identity_uses_sentinel_id() {
        let guest = User::guest();
        assert!(guest.is_guest());
        assert_eq!(guest.username, "guest");
    }

    #[test]
    fn reply_builder_sets_parent_and_no_title() {
        let author = User { id: 7, ..User::guest() };
        let reply = NewPost::reply(1, &author, 42, "me too");
        assert_eq!(reply.reply_to, Some(42));
        assert!(reply.title.is_empty());

        let topic = NewPost::topic(1, &author, "Hello", "body");
        assert_eq!(topic.reply_to, None);
        assert_eq!(topic.title, "Hello");
    }

    #[test]
    fn display_title_falls_back_for_replies() {
        let now = Utc::now();
        let post = Post {
            id: 3,
            board_id: 1,
            user_id: 7,
            username: "alice".into(),
            title: String::new(),
            content: "x".into(),
            created_at: now,
            updated_at: now,
            reply_to: Some(2),
            replies: 0,
        };
        assert_eq!(post.display_title(), "Re: post #2");
    }
}
