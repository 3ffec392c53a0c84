//! # Menu-Driven Interaction Engine
//!
//! One [`MenuEngine`] runs per interactive channel. It owns the terminal and
//! walks a small state machine:
//!
//! ```text
//! Welcome ──► LoginMenu ◄──── logout ────┐
//!    │          │  login/register/guest  │
//!    └─────────►└──────────► MainMenu ───┘
//!                               │ exit
//!                               ▼
//!                              Exit
//! ```
//!
//! Sub-screens (board list, board view, post view, compose, admin panel) are
//! nested loops inside the main menu; leaving them always returns to the screen
//! that opened them. Store failures are shown inline and never change state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use super::auth::{AuthError, CredentialVerifier};
use super::registry::SessionRegistry;
use super::render;
use super::server::sec_log;
use super::session::Session;
use super::terminal::{Terminal, TerminalError};
use crate::config::BbsConfig;
use crate::logutil::escape_log;
use crate::storage::{Board, ContentStore, NewPost, NewUser, Post, User};

type MenuResult<T> = Result<T, TerminalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Welcome,
    LoginMenu,
    MainMenu,
    Exit,
}

/// Presentation knobs taken from `[bbs]`.
#[derive(Debug, Clone)]
pub struct MenuOptions {
    pub bbs_name: String,
    pub description: String,
    pub welcome_message: String,
    pub page_size: usize,
    pub recent_limit: usize,
    pub notice_pause: Duration,
    pub error_pause: Duration,
}

impl Default for MenuOptions {
    fn default() -> Self {
        MenuOptions::from(&BbsConfig::default())
    }
}

impl From<&BbsConfig> for MenuOptions {
    fn from(cfg: &BbsConfig) -> Self {
        MenuOptions {
            bbs_name: cfg.name.clone(),
            description: cfg.description.clone(),
            welcome_message: cfg.welcome_message.clone(),
            page_size: cfg.page_size.max(1),
            recent_limit: cfg.recent_posts_limit.max(1),
            notice_pause: Duration::from_millis(cfg.notice_pause_ms),
            error_pause: Duration::from_millis(cfg.error_pause_ms),
        }
    }
}

pub struct MenuEngine<T: Terminal> {
    term: T,
    store: Arc<dyn ContentStore>,
    verifier: Arc<dyn CredentialVerifier>,
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    options: MenuOptions,
}

impl<T: Terminal> MenuEngine<T> {
    /// `verifier` checks the login menu's credentials; the server passes the
    /// same one its SSH password auth uses.
    pub fn new(
        term: T,
        store: Arc<dyn ContentStore>,
        verifier: Arc<dyn CredentialVerifier>,
        session: Arc<Session>,
        registry: Arc<SessionRegistry>,
        options: MenuOptions,
    ) -> Self {
        MenuEngine { term, store, verifier, session, registry, options }
    }

    /// Drive the state machine until the user exits or the channel goes away.
    /// A disconnect is a normal end of session.
    pub async fn run(mut self) -> MenuResult<()> {
        let mut state = MenuState::Welcome;
        while state != MenuState::Exit {
            let step = match state {
                MenuState::Welcome => self.welcome().await,
                MenuState::LoginMenu => self.login_menu().await,
                MenuState::MainMenu => self.main_menu().await,
                MenuState::Exit => Ok(MenuState::Exit),
            };
            state = match step {
                Ok(next) => next,
                Err(TerminalError::Disconnected) | Err(TerminalError::Interrupted) => {
                    debug!("session {} input closed", self.session.id);
                    MenuState::Exit
                }
                Err(e) => return Err(e),
            };
        }
        Ok(())
    }

    // --- terminal helpers ---

    async fn print(&mut self, text: &str) -> MenuResult<()> {
        self.term.write(text).await
    }

    async fn println(&mut self, text: &str) -> MenuResult<()> {
        self.term.write(&format!("{}\n", text)).await
    }

    async fn clear(&mut self) -> MenuResult<()> {
        self.term.write(render::CLEAR_SCREEN).await
    }

    async fn header(&mut self, text: &str) -> MenuResult<()> {
        self.term.write(&render::header(text)).await
    }

    async fn rule(&mut self) -> MenuResult<()> {
        self.term.write(&render::rule()).await
    }

    async fn ask(&mut self, prompt: &str) -> MenuResult<String> {
        if !prompt.is_empty() {
            self.term.write(prompt).await?;
        }
        let line = self.term.read_line().await?;
        self.session.touch();
        Ok(line)
    }

    async fn ask_secret(&mut self, prompt: &str) -> MenuResult<String> {
        let line = self.term.read_password(prompt).await?;
        self.session.touch();
        Ok(line)
    }

    async fn fail(&mut self, msg: &str) -> MenuResult<()> {
        self.term.write(&render::error(msg)).await?;
        pause(self.options.error_pause).await;
        Ok(())
    }

    async fn notice(&mut self, msg: &str) -> MenuResult<()> {
        self.term.write(&render::success(msg)).await?;
        pause(self.options.notice_pause).await;
        Ok(())
    }

    async fn press_enter(&mut self) -> MenuResult<()> {
        self.ask("Press Enter to continue...").await.map(|_| ())
    }

    fn when(&self, t: chrono::DateTime<Utc>) -> String {
        render::format_time(t, Utc::now())
    }

    // --- top-level states ---

    async fn welcome(&mut self) -> MenuResult<MenuState> {
        self.clear().await?;
        let title = format!("Welcome to {}", self.options.bbs_name);
        self.header(&title).await?;
        self.println("").await?;
        if !self.options.description.is_empty() {
            let description = self.options.description.clone();
            self.println(&description).await?;
        }
        self.println("Connected via SSH").await?;
        if !self.options.welcome_message.is_empty() {
            let message = self.options.welcome_message.clone();
            self.println("").await?;
            self.println(&message).await?;
        }
        self.println("").await?;
        self.rule().await?;
        Ok(if self.session.is_member() { MenuState::MainMenu } else { MenuState::LoginMenu })
    }

    async fn login_menu(&mut self) -> MenuResult<MenuState> {
        self.println("").await?;
        self.header("Login Menu").await?;
        self.print("1. Login\n2. Register\n3. Continue as Guest\n4. Exit\n\n").await?;

        let choice = self.ask("Select option: ").await?;
        match choice.trim() {
            "1" => self.login().await?,
            "2" => self.register().await?,
            "3" => {
                self.session.set_user(Some(User::guest()));
                info!("session {} continuing as guest", self.session.id);
            }
            "4" => {
                self.println("Goodbye!").await?;
                return Ok(MenuState::Exit);
            }
            _ => self.fail("Invalid option").await?,
        }
        Ok(if self.session.user().is_some() { MenuState::MainMenu } else { MenuState::LoginMenu })
    }

    async fn main_menu(&mut self) -> MenuResult<MenuState> {
        let Some(user) = self.session.user() else {
            return Ok(MenuState::LoginMenu);
        };
        self.clear().await?;
        self.header(&format!("Main Menu - Welcome {}", user.username)).await?;
        self.println("").await?;
        self.print("1. Browse Boards\n2. Recent Posts\n3. Search\n4. User Profile\n5. Who's Online\n")
            .await?;
        if user.is_admin {
            self.println("6. Admin Panel").await?;
        }
        self.print("9. Logout\n0. Exit\n\n").await?;

        let choice = self.ask("Select option: ").await?;
        match choice.trim() {
            "1" => self.browse_boards().await?,
            "2" => self.recent_posts().await?,
            "3" => self.search().await?,
            "4" => self.profile(&user).await?,
            "5" => self.online_users().await?,
            "6" if user.is_admin => self.admin_panel(&user).await?,
            "9" => {
                self.session.set_user(None);
                info!("session {} logged out ({})", self.session.id, escape_log(&user.username));
                self.println("Logged out successfully").await?;
                pause(self.options.notice_pause).await;
                return Ok(MenuState::LoginMenu);
            }
            "0" => {
                self.println("Goodbye!").await?;
                return Ok(MenuState::Exit);
            }
            _ => self.fail("Invalid option").await?,
        }
        Ok(MenuState::MainMenu)
    }

    // --- account flows ---

    async fn login(&mut self) -> MenuResult<()> {
        self.clear().await?;
        self.header("Login").await?;
        let username = self.ask("Username: ").await?;
        let password = self.ask_secret("Password: ").await?;
        let username = username.trim();

        match self.verifier.verify(username, &password) {
            Ok(user) => {
                if let Err(e) = self.verifier.record_login(user.id) {
                    warn!("could not record login for {}: {}", escape_log(&user.username), e);
                }
                info!("session {} logged in as {}", self.session.id, escape_log(&user.username));
                let greeting = format!("Welcome back, {}!", user.username);
                self.session.set_user(Some(user));
                self.notice(&greeting).await
            }
            Err(AuthError::InvalidCredentials) => {
                sec_log!("menu login failed for '{}' (session {})", escape_log(username), self.session.id);
                self.fail("Invalid credentials").await
            }
            Err(e) => {
                warn!("login backend error: {}", e);
                self.fail(&format!("Login failed: {}", e)).await
            }
        }
    }

    async fn register(&mut self) -> MenuResult<()> {
        self.clear().await?;
        self.header("Register New Account").await?;
        let username = self.ask("Username: ").await?;
        let email = self.ask("Email: ").await?;
        let password = self.ask_secret("Password: ").await?;
        let confirm = self.ask_secret("Confirm Password: ").await?;

        if password != confirm {
            return self.fail("Passwords do not match").await;
        }
        match self.store.create_user(NewUser::new(username, email, password)) {
            Ok(user) => {
                info!("registered {} (session {})", escape_log(&user.username), self.session.id);
                self.session.set_user(Some(user));
                self.notice("Registration successful!").await
            }
            Err(e) => self.fail(&format!("Registration failed: {}", e)).await,
        }
    }

    // --- boards and posts ---

    async fn browse_boards(&mut self) -> MenuResult<()> {
        loop {
            self.clear().await?;
            self.header("Message Boards").await?;

            let boards = match self.store.list_boards() {
                Ok(boards) => boards,
                Err(e) => return self.fail(&format!("Error loading boards: {}", e)).await,
            };
            for (i, board) in boards.iter().enumerate() {
                let line = format!("{}. [{}] {} ({} posts)", i + 1, board.name, board.description, board.post_count);
                self.println(&line).await?;
            }
            self.println("").await?;
            self.println("Enter board number (0 to go back): ").await?;

            let choice = self.ask("> ").await?;
            let choice = choice.trim();
            if choice == "0" {
                return Ok(());
            }
            match choice.parse::<usize>() {
                Ok(n) if (1..=boards.len()).contains(&n) => self.view_board(&boards[n - 1]).await?,
                _ => self.fail("Invalid selection").await?,
            }
        }
    }

    async fn view_board(&mut self, board: &Board) -> MenuResult<()> {
        let page_size = self.options.page_size;
        let mut page = 0usize;
        loop {
            self.clear().await?;
            self.header(&format!("Board: {}", board.name)).await?;
            self.println(&board.description).await?;
            self.rule().await?;

            let posts = match self.store.list_board_posts(board.id, page_size, page * page_size) {
                Ok(posts) => posts,
                Err(e) => return self.fail(&format!("Error loading posts: {}", e)).await,
            };
            if posts.is_empty() {
                self.println("No posts yet. Be the first to post!").await?;
            }
            for (i, post) in posts.iter().enumerate() {
                let line = format!("{}. {} - by {} ({} replies)", i + 1, post.display_title(), post.username, post.replies);
                self.println(&line).await?;
                let when = format!("   {}", self.when(post.created_at));
                self.println(&when).await?;
            }

            let has_prev = page > 0;
            let has_next = posts.len() == page_size;
            let mut commands = String::from("Commands: (N)ew post, (V)iew post #, (R)efresh, (B)ack");
            if has_prev {
                commands.push_str(", (P)revious page");
            }
            if has_next {
                commands.push_str(", (F)orward page");
            }
            self.println("").await?;
            self.println(&commands).await?;

            let cmd = self.ask("> ").await?.trim().to_lowercase();
            match cmd.as_str() {
                "b" => return Ok(()),
                "r" => {}
                "n" => {
                    if self.session.is_member() {
                        self.compose(board.id, None).await?;
                    } else {
                        self.fail("Please login to post").await?;
                    }
                }
                "p" if has_prev => page -= 1,
                "f" if has_next => page += 1,
                other => {
                    let number = other.strip_prefix('v').unwrap_or(other).trim();
                    match number.parse::<usize>() {
                        Ok(n) if (1..=posts.len()).contains(&n) => self.view_post(&posts[n - 1]).await?,
                        _ => self.fail("Invalid selection").await?,
                    }
                }
            }
        }
    }

    async fn view_post(&mut self, post: &Post) -> MenuResult<()> {
        loop {
            self.clear().await?;
            self.header(&post.display_title()).await?;
            let byline = format!("Posted by {} on {}", post.username, self.when(post.created_at));
            self.println(&byline).await?;
            self.rule().await?;
            self.println(&post.content).await?;
            self.rule().await?;

            match self.store.list_replies(post.id) {
                Ok(replies) if !replies.is_empty() => {
                    self.println(&format!("--- {} Replies ---", replies.len())).await?;
                    for reply in &replies {
                        let byline = format!("By {} on {}:", reply.username, self.when(reply.created_at));
                        self.println("").await?;
                        self.println(&byline).await?;
                        self.println(&reply.content).await?;
                    }
                    self.rule().await?;
                }
                Ok(_) => {}
                Err(e) => self.term.write(&render::error(&format!("Error loading replies: {}", e))).await?,
            }

            self.println("").await?;
            self.println("Commands: (R)eply, (B)ack").await?;
            let cmd = self.ask("> ").await?.trim().to_lowercase();
            if cmd != "r" {
                return Ok(());
            }
            if self.session.is_member() {
                self.compose(post.board_id, Some(post)).await?;
            } else {
                self.fail("Please login to reply").await?;
            }
        }
    }

    /// Title (top-level only), then body lines until a line holding just `.`.
    async fn compose(&mut self, board_id: u64, parent: Option<&Post>) -> MenuResult<()> {
        self.clear().await?;
        self.header(if parent.is_some() { "Write Reply" } else { "New Post" }).await?;

        let title = match parent {
            None => self.ask("Title: ").await?,
            Some(_) => String::new(),
        };
        self.println("Content (type '.' on a new line to finish):").await?;
        let mut lines = Vec::new();
        loop {
            let line = self.ask("").await?;
            if line == "." {
                break;
            }
            lines.push(line);
        }
        let content = lines.join("\n");

        if parent.is_none() && title.trim().is_empty() {
            return self.fail("Title cannot be empty").await;
        }
        if content.trim().is_empty() {
            return self.fail("Content cannot be empty").await;
        }
        let Some(author) = self.session.user().filter(|u| !u.is_guest()) else {
            return self.fail("Please login to post").await;
        };

        let new_post = match parent {
            Some(p) => NewPost::reply(board_id, &author, p.id, content),
            None => NewPost::topic(board_id, &author, title, content),
        };
        match self.store.create_post(new_post) {
            Ok(post) => {
                debug!("post {} created on board {} by {}", post.id, board_id, escape_log(&author.username));
                self.notice("Post created successfully!").await
            }
            Err(e) => self.fail(&format!("Failed to create post: {}", e)).await,
        }
    }

    async fn recent_posts(&mut self) -> MenuResult<()> {
        self.clear().await?;
        self.header("Recent Posts").await?;
        let posts = match self.store.recent_posts(self.options.recent_limit) {
            Ok(posts) => posts,
            Err(e) => return self.fail(&format!("Error loading posts: {}", e)).await,
        };
        if posts.is_empty() {
            self.println("Nothing has been posted yet.").await?;
        }
        for (i, post) in posts.iter().enumerate() {
            self.println(&format!("{}. {} - by {}", i + 1, post.display_title(), post.username)).await?;
            let when = format!("   {}", self.when(post.created_at));
            self.println(&when).await?;
        }
        self.println("").await?;
        self.press_enter().await
    }

    async fn search(&mut self) -> MenuResult<()> {
        self.clear().await?;
        self.header("Search").await?;
        self.println("Search functionality coming soon...").await?;
        self.press_enter().await
    }

    async fn profile(&mut self, user: &User) -> MenuResult<()> {
        self.clear().await?;
        self.header("User Profile").await?;
        let mut text = format!("Username: {}\n", user.username);
        if !user.is_guest() {
            text.push_str(&format!(
                "Email: {}\nMember since: {}\nLast login: {}\n",
                user.email,
                self.when(user.created_at),
                self.when(user.last_login)
            ));
        }
        if user.is_admin {
            text.push_str("Status: Administrator\n");
        }
        self.print(&text).await?;
        self.println("").await?;
        self.press_enter().await
    }

    async fn online_users(&mut self) -> MenuResult<()> {
        self.clear().await?;
        self.header("Online Users").await?;
        let sessions = self.registry.list_active();
        self.println(&format!("{} connected", sessions.len())).await?;
        self.println("").await?;
        for (i, s) in sessions.iter().enumerate() {
            let marker = if s.id == self.session.id { " (you)" } else { "" };
            let line = format!(
                "{}. {}{} - online {}, idle {}",
                i + 1,
                s.display_name(),
                marker,
                render::format_duration(s.session_duration()),
                render::format_duration(s.idle_time())
            );
            self.println(&line).await?;
        }
        self.println("").await?;
        self.press_enter().await
    }

    // --- administration ---

    async fn admin_panel(&mut self, admin: &User) -> MenuResult<()> {
        self.clear().await?;
        self.header("Admin Panel").await?;
        self.print("1. Create Board\n2. Manage Users\n3. System Stats\n0. Back\n").await?;

        let choice = self.ask("Select option: ").await?;
        match choice.trim() {
            "1" => self.create_board(admin).await,
            "2" => {
                self.println("User management coming soon...").await?;
                self.press_enter().await
            }
            "3" => {
                self.println("System stats coming soon...").await?;
                self.press_enter().await
            }
            "0" => Ok(()),
            _ => self.fail("Invalid option").await,
        }
    }

    async fn create_board(&mut self, admin: &User) -> MenuResult<()> {
        self.clear().await?;
        self.header("Create New Board").await?;
        let name = self.ask("Board name: ").await?;
        let description = self.ask("Description: ").await?;

        match self.store.create_board(&name, &description) {
            Ok(board) => {
                sec_log!("admin {} created board '{}'", escape_log(&admin.username), escape_log(&board.name));
                self.notice("Board created successfully!").await
            }
            Err(e) => self.fail(&format!("Failed to create board: {}", e)).await,
        }
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
