use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::password::Passwords;
use super::{
    sort_board_listing, sort_recent, sort_replies, validate_new_post, validate_new_user, Board, BoardId,
    ContentStore, NewPost, NewUser, Post, PostId, StoreError, StoreResult, User, UserId,
};
use crate::validation;

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, (User, String)>,
    boards: BTreeMap<BoardId, Board>,
    posts: BTreeMap<PostId, Post>,
}

impl Tables {
    fn user_id_by_name(&self, username: &str) -> Option<UserId> {
        let wanted = username.trim().to_lowercase();
        self.users
            .values()
            .find(|(u, _)| u.username.to_lowercase() == wanted)
            .map(|(u, _)| u.id)
    }

    fn board_name_taken(&self, name: &str, except: Option<BoardId>) -> bool {
        let wanted = name.to_lowercase();
        self.boards
            .values()
            .any(|b| Some(b.id) != except && b.name.to_lowercase() == wanted)
    }

    fn reply_count(&self, id: PostId) -> usize {
        self.posts.values().filter(|p| p.reply_to == Some(id)).count()
    }
}

/// Volatile [`ContentStore`] kept entirely in process memory.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    passwords: Passwords,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
            passwords: Passwords::fast(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl ContentStore for MemoryStore {
    fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let username = validate_new_user(&new_user)?;
        let hash = self.passwords.hash(&new_user.password)?;
        let mut tables = self.write();
        if tables.user_id_by_name(&username).is_some() {
            return Err(StoreError::Duplicate(format!("user '{}'", username)));
        }
        let now = Utc::now();
        let user = User {
            id: self.next_id(),
            username,
            email: new_user.email.trim().to_string(),
            created_at: now,
            last_login: now,
            is_admin: new_user.is_admin,
        };
        tables.users.insert(user.id, (user.clone(), hash));
        Ok(user)
    }

    fn get_user(&self, id: UserId) -> StoreResult<User> {
        self.read()
            .users
            .get(&id)
            .map(|(u, _)| u.clone())
            .ok_or_else(|| StoreError::not_found(format!("user {}", id)))
    }

    fn get_user_by_name(&self, username: &str) -> StoreResult<User> {
        let id = self
            .read()
            .user_id_by_name(username)
            .ok_or_else(|| StoreError::not_found(format!("user '{}'", username)))?;
        self.get_user(id)
    }

    fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.write();
        let (stored, _) = tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::not_found(format!("user {}", user.id)))?;
        stored.email = user.email.trim().to_string();
        stored.is_admin = user.is_admin;
        Ok(())
    }

    fn delete_user(&self, id: UserId) -> StoreResult<()> {
        self.write()
            .users
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("user {}", id)))
    }

    fn authenticate(&self, username: &str, password: &str) -> StoreResult<User> {
        let (user, hash) = {
            let tables = self.read();
            let id = tables.user_id_by_name(username).ok_or(StoreError::InvalidCredentials)?;
            tables.users.get(&id).cloned().ok_or(StoreError::InvalidCredentials)?
        };
        if self.passwords.verify(password, &hash)? {
            Ok(user)
        } else {
            Err(StoreError::InvalidCredentials)
        }
    }

    fn update_last_login(&self, id: UserId) -> StoreResult<()> {
        let mut tables = self.write();
        let (user, _) = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("user {}", id)))?;
        user.last_login = Utc::now();
        Ok(())
    }

    fn set_password(&self, id: UserId, password: &str) -> StoreResult<()> {
        validation::validate_password(password)?;
        let hash = self.passwords.hash(password)?;
        let mut tables = self.write();
        let (_, stored) = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("user {}", id)))?;
        *stored = hash;
        Ok(())
    }

    fn create_board(&self, name: &str, description: &str) -> StoreResult<Board> {
        let name = validation::validate_board_name(name)?;
        let description = validation::validate_board_description(description)?;
        let mut tables = self.write();
        if tables.board_name_taken(&name, None) {
            return Err(StoreError::Duplicate(format!("board '{}'", name)));
        }
        let board = Board { id: self.next_id(), name, description, created_at: Utc::now(), post_count: 0 };
        tables.boards.insert(board.id, board.clone());
        Ok(board)
    }

    fn get_board(&self, id: BoardId) -> StoreResult<Board> {
        let tables = self.read();
        let mut board = tables
            .boards
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("board {}", id)))?;
        board.post_count = tables.posts.values().filter(|p| p.board_id == id).count();
        Ok(board)
    }

    fn list_boards(&self) -> StoreResult<Vec<Board>> {
        let tables = self.read();
        let mut boards: Vec<Board> = tables
            .boards
            .values()
            .map(|b| Board {
                post_count: tables.posts.values().filter(|p| p.board_id == b.id).count(),
                ..b.clone()
            })
            .collect();
        boards.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(boards)
    }

    fn update_board(&self, board: &Board) -> StoreResult<()> {
        let name = validation::validate_board_name(&board.name)?;
        let description = validation::validate_board_description(&board.description)?;
        let mut tables = self.write();
        if tables.board_name_taken(&name, Some(board.id)) {
            return Err(StoreError::Duplicate(format!("board '{}'", name)));
        }
        let stored = tables
            .boards
            .get_mut(&board.id)
            .ok_or_else(|| StoreError::not_found(format!("board {}", board.id)))?;
        stored.name = name;
        stored.description = description;
        Ok(())
    }

    fn delete_board(&self, id: BoardId) -> StoreResult<()> {
        let mut tables = self.write();
        if tables.boards.remove(&id).is_none() {
            return Err(StoreError::not_found(format!("board {}", id)));
        }
        tables.posts.retain(|_, p| p.board_id != id);
        Ok(())
    }

    fn create_post(&self, new_post: NewPost) -> StoreResult<Post> {
        let (title, content) = validate_new_post(&new_post)?;
        let mut tables = self.write();
        if !tables.boards.contains_key(&new_post.board_id) {
            return Err(StoreError::not_found(format!("board {}", new_post.board_id)));
        }
        if let Some(parent) = new_post.reply_to {
            match tables.posts.get(&parent) {
                Some(p) if p.board_id == new_post.board_id => {}
                _ => return Err(StoreError::not_found(format!("post {} on board {}", parent, new_post.board_id))),
            }
        }
        let now = Utc::now();
        let post = Post {
            id: self.next_id(),
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
        tables.posts.insert(post.id, post.clone());
        Ok(post)
    }

    fn get_post(&self, id: PostId) -> StoreResult<Post> {
        let tables = self.read();
        let mut post = tables
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("post {}", id)))?;
        post.replies = tables.reply_count(id);
        Ok(post)
    }

    fn list_board_posts(&self, board_id: BoardId, limit: usize, offset: usize) -> StoreResult<Vec<Post>> {
        let tables = self.read();
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|p| p.board_id == board_id && p.reply_to.is_none())
            .cloned()
            .collect();
        sort_board_listing(&mut posts);
        Ok(posts
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut p| {
                p.replies = tables.reply_count(p.id);
                p
            })
            .collect())
    }

    fn list_replies(&self, post_id: PostId) -> StoreResult<Vec<Post>> {
        let mut replies: Vec<Post> = self
            .read()
            .posts
            .values()
            .filter(|p| p.reply_to == Some(post_id))
            .cloned()
            .collect();
        sort_replies(&mut replies);
        Ok(replies)
    }

    fn recent_posts(&self, limit: usize) -> StoreResult<Vec<Post>> {
        let mut posts: Vec<Post> = self.read().posts.values().cloned().collect();
        sort_recent(&mut posts);
        posts.truncate(limit);
        Ok(posts)
    }

    fn update_post(&self, post: &Post) -> StoreResult<()> {
        let mut tables = self.write();
        let stored = tables
            .posts
            .get_mut(&post.id)
            .ok_or_else(|| StoreError::not_found(format!("post {}", post.id)))?;
        stored.title = if stored.reply_to.is_some() && post.title.trim().is_empty() {
            String::new()
        } else {
            validation::validate_title(&post.title)?
        };
        stored.content = validation::sanitize_post_content(&post.content)?;
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn delete_post(&self, id: PostId) -> StoreResult<()> {
        let mut tables = self.write();
        if tables.posts.remove(&id).is_none() {
            return Err(StoreError::not_found(format!("post {}", id)));
        }
        tables.posts.retain(|_, p| p.reply_to != Some(id));
        Ok(())
    }

    fn count_board_posts(&self, board_id: BoardId) -> StoreResult<usize> {
        Ok(self.read().posts.values().filter(|p| p.board_id == board_id).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_usernames_are_case_insensitive() {
        let store = MemoryStore::new();
        store.create_user(NewUser::new("Alice", "", "password1")).unwrap();
        let err = store.create_user(NewUser::new("alice", "", "password2")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn guests_cannot_author_posts() {
        let store = MemoryStore::new();
        let board = store.create_board("general", "").unwrap();
        let err = store
            .create_post(NewPost::topic(board.id, &User::guest(), "Hi", "there"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(validation::ValidationError::GuestAuthor)));
    }

    #[test]
    fn deleting_a_post_removes_its_replies() {
        let store = MemoryStore::new();
        let alice = store.create_user(NewUser::new("alice", "", "password1")).unwrap();
        let board = store.create_board("general", "").unwrap();
        let topic = store.create_post(NewPost::topic(board.id, &alice, "Hi", "there")).unwrap();
        store.create_post(NewPost::reply(board.id, &alice, topic.id, "again")).unwrap();
        assert_eq!(store.count_board_posts(board.id).unwrap(), 2);

        store.delete_post(topic.id).unwrap();
        assert_eq!(store.count_board_posts(board.id).unwrap(), 0);
    }
}
