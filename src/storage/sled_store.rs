use std::path::Path;

use argon2::Params;
use chrono::Utc;
use log::{debug, warn};
use sled::IVec;

use super::password::Passwords;
use super::types::{
    BoardRecord, PostRecord, UserRecord, BOARD_SCHEMA_VERSION, POST_SCHEMA_VERSION, USER_SCHEMA_VERSION,
};
use super::{
    sort_board_listing, sort_recent, sort_replies, validate_new_post, validate_new_user, Board, BoardId,
    ContentStore, NewPost, NewUser, Post, PostId, StoreError, StoreResult, User, UserId,
};
use crate::validation;

const TREE_USERS: &str = "users";
const TREE_USERNAMES: &str = "usernames";
const TREE_BOARDS: &str = "boards";
const TREE_BOARD_NAMES: &str = "board_names";
const TREE_POSTS: &str = "posts";
const TREE_BOARD_POSTS: &str = "board_posts";
const TREE_REPLIES: &str = "replies";

/// `board_posts` value for a top-level post; replies carry `REPLY_ENTRY`.
const TOP_LEVEL_ENTRY: &[u8] = &[1];
const REPLY_ENTRY: &[u8] = &[0];

/// Database directory name below the configured data dir.
pub const DB_DIR_NAME: &str = "bbs.db";

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn key_id(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// `owner ‖ child`, big-endian, so a prefix scan on `owner` yields its children in id order.
fn pair_key(owner: u64, child: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&owner.to_be_bytes());
    key[8..].copy_from_slice(&child.to_be_bytes());
    key
}

/// Sled-backed persistence for accounts, boards and posts.
pub struct SledStore {
    db: sled::Db,
    users: sled::Tree,
    usernames: sled::Tree,
    boards: sled::Tree,
    board_names: sled::Tree,
    posts: sled::Tree,
    /// `board_id ‖ post_id` for every post on a board.
    board_posts: sled::Tree,
    /// `parent_id ‖ reply_id` for every reply.
    replies: sled::Tree,
    passwords: Passwords,
}

impl SledStore {
    /// Open (or create) the store under `data_dir`. `argon2` overrides the
    /// default hashing cost.
    pub fn open<P: AsRef<Path>>(data_dir: P, argon2: Option<Params>) -> StoreResult<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db = sled::open(dir.join(DB_DIR_NAME))?;
        debug!("opened content store at {}", dir.join(DB_DIR_NAME).display());
        Ok(SledStore {
            users: db.open_tree(TREE_USERS)?,
            usernames: db.open_tree(TREE_USERNAMES)?,
            boards: db.open_tree(TREE_BOARDS)?,
            board_names: db.open_tree(TREE_BOARD_NAMES)?,
            posts: db.open_tree(TREE_POSTS)?,
            board_posts: db.open_tree(TREE_BOARD_POSTS)?,
            replies: db.open_tree(TREE_REPLIES)?,
            db,
            passwords: Passwords::with_params(argon2),
        })
    }

    /// Same as [`SledStore::open`] but with the cheapest Argon2 cost; tests only.
    pub fn open_for_tests<P: AsRef<Path>>(data_dir: P) -> StoreResult<Self> {
        let mut store = Self::open(data_dir, None)?;
        store.passwords = Passwords::fast();
        Ok(store)
    }

    fn serialize<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> StoreResult<T> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    /// Never returns 0, which is reserved for the guest identity.
    fn next_id(&self) -> StoreResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    /// Write dirty pages to disk; mutations already flush, this is for callers
    /// that exit right after a batch.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Claim `name` in an index tree; fails if another id already holds it.
    fn claim_name(tree: &sled::Tree, name: &str, id: u64, what: &str) -> StoreResult<()> {
        let key = name.to_lowercase();
        let claimed = tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(&id_key(id)[..]))?;
        if claimed.is_err() {
            return Err(StoreError::Duplicate(format!("{} '{}'", what, name)));
        }
        Ok(())
    }

    /// Undo a [`SledStore::claim_name`] that `id` made.
    fn release_name(tree: &sled::Tree, name: &str, id: u64) -> StoreResult<()> {
        let key = name.to_lowercase();
        let _ = tree.compare_and_swap(key.as_bytes(), Some(&id_key(id)[..]), None as Option<&[u8]>)?;
        Ok(())
    }

    fn user_record(&self, id: UserId) -> StoreResult<UserRecord> {
        let Some(bytes) = self.users.get(id_key(id))? else {
            return Err(StoreError::not_found(format!("user {}", id)));
        };
        let record: UserRecord = Self::deserialize(bytes)?;
        if record.schema_version != USER_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "user",
                expected: USER_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    fn put_user_record(&self, record: &UserRecord) -> StoreResult<()> {
        self.users.insert(id_key(record.user.id), Self::serialize(record)?)?;
        self.flush()
    }

    fn user_id_by_name(&self, username: &str) -> StoreResult<Option<UserId>> {
        let key = username.trim().to_lowercase();
        Ok(self.usernames.get(key.as_bytes())?.and_then(|v| key_id(&v)))
    }

    fn board_record(&self, id: BoardId) -> StoreResult<BoardRecord> {
        let Some(bytes) = self.boards.get(id_key(id))? else {
            return Err(StoreError::not_found(format!("board {}", id)));
        };
        let record: BoardRecord = Self::deserialize(bytes)?;
        if record.schema_version != BOARD_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "board",
                expected: BOARD_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    fn put_post(&self, post: &Post) -> StoreResult<()> {
        let record = PostRecord { schema_version: POST_SCHEMA_VERSION, post: post.clone() };
        self.posts.insert(id_key(post.id), Self::serialize(&record)?)?;
        Ok(())
    }

    fn decode_post(bytes: IVec) -> StoreResult<Post> {
        let record: PostRecord = Self::deserialize(bytes)?;
        if record.schema_version != POST_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                entity: "post",
                expected: POST_SCHEMA_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record.post)
    }

    /// A stored post, without its reply count.
    fn post_record(&self, id: PostId) -> StoreResult<Post> {
        match self.posts.get(id_key(id))? {
            Some(bytes) => Self::decode_post(bytes),
            None => Err(StoreError::not_found(format!("post {}", id))),
        }
    }

    /// Every stored post, without reply counts.
    fn all_posts(&self) -> StoreResult<Vec<Post>> {
        let mut posts = Vec::new();
        for entry in self.posts.iter() {
            let (_key, value) = entry?;
            posts.push(Self::decode_post(value)?);
        }
        Ok(posts)
    }

    /// Child ids and entry values under `owner` in a `pair_key` index.
    fn indexed(tree: &sled::Tree, owner: u64) -> StoreResult<Vec<(u64, IVec)>> {
        let mut children = Vec::new();
        for entry in tree.scan_prefix(id_key(owner)) {
            let (key, value) = entry?;
            if let Some(child) = key.get(8..).and_then(key_id) {
                children.push((child, value));
            }
        }
        Ok(children)
    }

    fn reply_count(&self, id: PostId) -> StoreResult<usize> {
        let mut count = 0;
        for entry in self.replies.scan_prefix(id_key(id)).keys() {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn with_reply_counts(&self, mut posts: Vec<Post>) -> StoreResult<Vec<Post>> {
        for post in posts.iter_mut() {
            post.replies = self.reply_count(post.id)?;
        }
        Ok(posts)
    }

    fn index_post(&self, post: &Post) -> StoreResult<()> {
        let entry = if post.reply_to.is_some() { REPLY_ENTRY } else { TOP_LEVEL_ENTRY };
        self.board_posts.insert(pair_key(post.board_id, post.id), entry)?;
        if let Some(parent) = post.reply_to {
            self.replies.insert(pair_key(parent, post.id), IVec::default())?;
        }
        Ok(())
    }

    /// Remove a post record and every index entry that names it.
    fn remove_post(&self, post: &Post) -> StoreResult<()> {
        self.posts.remove(id_key(post.id))?;
        self.board_posts.remove(pair_key(post.board_id, post.id))?;
        if let Some(parent) = post.reply_to {
            self.replies.remove(pair_key(parent, post.id))?;
        }
        Ok(())
    }
}

impl ContentStore for SledStore {
    fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let username = validate_new_user(&new_user)?;
        let password_hash = self.passwords.hash(&new_user.password)?;
        let id = self.next_id()?;
        Self::claim_name(&self.usernames, &username, id, "user")?;
        let now = Utc::now();
        let user = User {
            id,
            username,
            email: new_user.email.trim().to_string(),
            created_at: now,
            last_login: now,
            is_admin: new_user.is_admin,
        };
        let record = UserRecord { schema_version: USER_SCHEMA_VERSION, user: user.clone(), password_hash };
        if let Err(e) = self.put_user_record(&record) {
            if let Err(release) = Self::release_name(&self.usernames, &user.username, id) {
                warn!("username '{}' stays claimed after a failed write: {}", user.username, release);
            }
            return Err(e);
        }
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> StoreResult<User> {
        Ok(self.user_record(id)?.user)
    }

    fn get_user_by_name(&self, username: &str) -> StoreResult<User> {
        match self.user_id_by_name(username)? {
            Some(id) => self.get_user(id),
            None => Err(StoreError::not_found(format!("user '{}'", username))),
        }
    }

    fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut record = self.user_record(user.id)?;
        record.user.email = user.email.trim().to_string();
        record.user.is_admin = user.is_admin;
        self.put_user_record(&record)
    }

    fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let record = self.user_record(id)?;
        self.usernames.remove(record.user.username.to_lowercase().as_bytes())?;
        self.users.remove(id_key(id))?;
        self.flush()
    }

    fn authenticate(&self, username: &str, password: &str) -> StoreResult<User> {
        let Some(id) = self.user_id_by_name(username)? else {
            return Err(StoreError::InvalidCredentials);
        };
        let record = self.user_record(id)?;
        if self.passwords.verify(password, &record.password_hash)? {
            Ok(record.user)
        } else {
            Err(StoreError::InvalidCredentials)
        }
    }

    fn update_last_login(&self, id: UserId) -> StoreResult<()> {
        let mut record = self.user_record(id)?;
        record.user.last_login = Utc::now();
        self.put_user_record(&record)
    }

    fn set_password(&self, id: UserId, password: &str) -> StoreResult<()> {
        validation::validate_password(password)?;
        let mut record = self.user_record(id)?;
        record.password_hash = self.passwords.hash(password)?;
        self.put_user_record(&record)
    }

    fn create_board(&self, name: &str, description: &str) -> StoreResult<Board> {
        let name = validation::validate_board_name(name)?;
        let description = validation::validate_board_description(description)?;
        let id = self.next_id()?;
        Self::claim_name(&self.board_names, &name, id, "board")?;
        let board = Board { id, name, description, created_at: Utc::now(), post_count: 0 };
        let record = BoardRecord { schema_version: BOARD_SCHEMA_VERSION, board: board.clone() };
        self.boards.insert(id_key(id), Self::serialize(&record)?)?;
        self.flush()?;
        Ok(board)
    }

    fn get_board(&self, id: BoardId) -> StoreResult<Board> {
        let mut board = self.board_record(id)?.board;
        board.post_count = self.count_board_posts(id)?;
        Ok(board)
    }

    fn list_boards(&self) -> StoreResult<Vec<Board>> {
        let mut boards = Vec::new();
        for entry in self.boards.iter() {
            let (_key, value) = entry?;
            let record: BoardRecord = Self::deserialize(value)?;
            let mut board = record.board;
            board.post_count = self.count_board_posts(board.id)?;
            boards.push(board);
        }
        boards.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(boards)
    }

    fn update_board(&self, board: &Board) -> StoreResult<()> {
        let mut record = self.board_record(board.id)?;
        let name = validation::validate_board_name(&board.name)?;
        let description = validation::validate_board_description(&board.description)?;
        if name.to_lowercase() != record.board.name.to_lowercase() {
            Self::claim_name(&self.board_names, &name, board.id, "board")?;
            self.board_names.remove(record.board.name.to_lowercase().as_bytes())?;
        }
        record.board.name = name;
        record.board.description = description;
        self.boards.insert(id_key(board.id), Self::serialize(&record)?)?;
        self.flush()
    }

    fn delete_board(&self, id: BoardId) -> StoreResult<()> {
        let record = self.board_record(id)?;
        for (post_id, _) in Self::indexed(&self.board_posts, id)? {
            if let Some(bytes) = self.posts.get(id_key(post_id))? {
                self.remove_post(&Self::decode_post(bytes)?)?;
            }
            self.board_posts.remove(pair_key(id, post_id))?;
        }
        self.board_names.remove(record.board.name.to_lowercase().as_bytes())?;
        self.boards.remove(id_key(id))?;
        self.flush()
    }

    fn create_post(&self, new_post: NewPost) -> StoreResult<Post> {
        let (title, content) = validate_new_post(&new_post)?;
        self.board_record(new_post.board_id)?;
        if let Some(parent) = new_post.reply_to {
            let parent = self.post_record(parent)?;
            if parent.board_id != new_post.board_id {
                return Err(StoreError::not_found(format!("post {} on board {}", parent.id, new_post.board_id)));
            }
        }
        let now = Utc::now();
        let post = Post {
            id: self.next_id()?,
            board_id: new_post.board_id,
            user_id: new_post.author.id,
            username: new_post.author.username,
            title,
            content,
            created_at: now,
            updated_at: now,
            reply_to: new_post.reply_to,
            replies: 0,
        };
        self.put_post(&post)?;
        self.index_post(&post)?;
        self.flush()?;
        Ok(post)
    }

    fn get_post(&self, id: PostId) -> StoreResult<Post> {
        let mut post = self.post_record(id)?;
        post.replies = self.reply_count(id)?;
        Ok(post)
    }

    fn list_board_posts(&self, board_id: BoardId, limit: usize, offset: usize) -> StoreResult<Vec<Post>> {
        let mut posts = Vec::new();
        for (post_id, entry) in Self::indexed(&self.board_posts, board_id)? {
            if &entry[..] == TOP_LEVEL_ENTRY {
                posts.push(self.post_record(post_id)?);
            }
        }
        sort_board_listing(&mut posts);
        let page = posts.into_iter().skip(offset).take(limit).collect();
        self.with_reply_counts(page)
    }

    fn list_replies(&self, post_id: PostId) -> StoreResult<Vec<Post>> {
        let mut replies = Vec::new();
        for (reply_id, _) in Self::indexed(&self.replies, post_id)? {
            replies.push(self.post_record(reply_id)?);
        }
        sort_replies(&mut replies);
        Ok(replies)
    }

    fn recent_posts(&self, limit: usize) -> StoreResult<Vec<Post>> {
        let mut posts = self.all_posts()?;
        sort_recent(&mut posts);
        posts.truncate(limit);
        Ok(posts)
    }

    fn update_post(&self, post: &Post) -> StoreResult<()> {
        let mut stored = self.post_record(post.id)?;
        stored.title = if stored.reply_to.is_some() && post.title.trim().is_empty() {
            String::new()
        } else {
            validation::validate_title(&post.title)?
        };
        stored.content = validation::sanitize_post_content(&post.content)?;
        stored.updated_at = Utc::now();
        self.put_post(&stored)?;
        self.flush()
    }

    fn delete_post(&self, id: PostId) -> StoreResult<()> {
        let post = self.post_record(id)?;
        for reply in self.list_replies(id)? {
            self.remove_post(&reply)?;
        }
        self.remove_post(&post)?;
        self.flush()
    }

    fn count_board_posts(&self, board_id: BoardId) -> StoreResult<usize> {
        let mut count = 0;
        for entry in self.board_posts.scan_prefix(id_key(board_id)).keys() {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ids_skip_the_guest_sentinel() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open_for_tests(dir.path()).unwrap();
        let user = store.create_user(NewUser::new("alice", "a@example.com", "password1")).unwrap();
        assert_ne!(user.id, 0);
    }

    #[test]
    fn reopen_keeps_records() {
        let dir = TempDir::new().unwrap();
        let board_id = {
            let store = SledStore::open_for_tests(dir.path()).unwrap();
            store.create_board("general", "General discussion").unwrap().id
        };
        let store = SledStore::open_for_tests(dir.path()).unwrap();
        assert_eq!(store.get_board(board_id).unwrap().name, "general");
        assert!(dir.path().join(DB_DIR_NAME).exists());
    }

    #[test]
    fn renaming_a_board_releases_the_old_name() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open_for_tests(dir.path()).unwrap();
        let mut board = store.create_board("general", "").unwrap();
        board.name = "lobby".into();
        store.update_board(&board).unwrap();
        assert!(store.create_board("general", "again").is_ok());
        assert!(matches!(store.create_board("LOBBY", ""), Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn released_name_can_be_claimed_again() {
        let dir = TempDir::new().unwrap();
        let store = SledStore::open_for_tests(dir.path()).unwrap();
        SledStore::claim_name(&store.usernames, "Alice", 7, "user").unwrap();
        // Only the holder can release
        SledStore::release_name(&store.usernames, "alice", 8).unwrap();
        assert!(matches!(
            SledStore::claim_name(&store.usernames, "alice", 8, "user"),
            Err(StoreError::Duplicate(_))
        ));
        SledStore::release_name(&store.usernames, "ALICE", 7).unwrap();
        SledStore::claim_name(&store.usernames, "alice", 8, "user").unwrap();
        assert_eq!(store.user_id_by_name("alice").unwrap(), Some(8));
    }

    #[test]
    fn post_indexes_follow_creates_and_deletes_across_reopen() {
        let dir = TempDir::new().unwrap();
        let (board_id, kept_id) = {
            let store = SledStore::open_for_tests(dir.path()).unwrap();
            let author = store.create_user(NewUser::new("alice", "", "password1")).unwrap();
            let board = store.create_board("general", "").unwrap();
            let other = store.create_board("tech", "").unwrap();
            let kept = store.create_post(NewPost::topic(board.id, &author, "kept", "body")).unwrap();
            let gone = store.create_post(NewPost::topic(board.id, &author, "gone", "body")).unwrap();
            store.create_post(NewPost::reply(board.id, &author, kept.id, "r1")).unwrap();
            store.create_post(NewPost::reply(board.id, &author, gone.id, "r2")).unwrap();
            store.create_post(NewPost::topic(other.id, &author, "elsewhere", "body")).unwrap();
            store.delete_post(gone.id).unwrap();
            (board.id, kept.id)
        };

        let store = SledStore::open_for_tests(dir.path()).unwrap();
        assert_eq!(store.count_board_posts(board_id).unwrap(), 2);
        let listed = store.list_board_posts(board_id, 10, 0).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept_id);
        assert_eq!(listed[0].replies, 1);
        assert_eq!(store.replies.len(), 1);

        store.delete_board(board_id).unwrap();
        assert_eq!(store.replies.len(), 0);
        assert_eq!(store.board_posts.len(), 1);
        assert_eq!(store.posts.len(), 1);
    }
}
