//! Drives whole menu sessions through a scripted terminal.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{add_admin, add_user, board_named, fast_options, scripted_terminal, store_with_boards};
use sshbbs::bbs::auth::{AuthError, CredentialVerifier, StoreVerifier};
use sshbbs::bbs::menu::{MenuEngine, MenuOptions};
use sshbbs::bbs::registry::SessionRegistry;
use sshbbs::bbs::session::Session;
use sshbbs::storage::{ContentStore, MemoryStore, NewPost, StoreError, User, UserId};

struct Run {
    output: String,
    session: Arc<Session>,
}

/// Store-backed verifier that counts how often the menu consults it.
struct CountingVerifier {
    inner: StoreVerifier,
    verifies: AtomicUsize,
    logins: AtomicUsize,
}

impl CountingVerifier {
    fn new(store: &Arc<MemoryStore>) -> Self {
        CountingVerifier {
            inner: StoreVerifier::new(store.clone() as Arc<dyn ContentStore>),
            verifies: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
        }
    }
}

impl CredentialVerifier for CountingVerifier {
    fn verify(&self, username: &str, password: &str) -> Result<User, AuthError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(username, password)
    }

    fn record_login(&self, id: UserId) -> Result<(), StoreError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.inner.record_login(id)
    }
}

async fn run_session(
    store: &Arc<MemoryStore>,
    registry: &Arc<SessionRegistry>,
    user: Option<User>,
    options: MenuOptions,
    input: &str,
) -> Run {
    let verifier = Arc::new(StoreVerifier::new(store.clone() as Arc<dyn ContentStore>));
    run_session_with(store, verifier, registry, user, options, input).await
}

async fn run_session_with(
    store: &Arc<MemoryStore>,
    verifier: Arc<dyn CredentialVerifier>,
    registry: &Arc<SessionRegistry>,
    user: Option<User>,
    options: MenuOptions,
    input: &str,
) -> Run {
    let (term, control, sink) = scripted_terminal(input);
    let session = registry.create(user, control, None);
    let engine = MenuEngine::new(
        term,
        store.clone() as Arc<dyn ContentStore>,
        verifier,
        Arc::clone(&session),
        Arc::clone(registry),
        options,
    );
    engine.run().await.unwrap();
    Run { output: sink.text(), session }
}

async fn run_script(store: &Arc<MemoryStore>, input: &str) -> Run {
    run_session(store, &Arc::new(SessionRegistry::new()), None, fast_options(), input).await
}

#[tokio::test]
async fn anonymous_session_starts_at_welcome_and_login_menu() {
    let store = store_with_boards();
    let run = run_script(&store, "4\r").await;
    assert!(run.output.contains("Welcome to Rust BBS System"));
    assert!(run.output.contains("Connected via SSH"));
    assert!(run.output.contains("1. Login\r\n2. Register\r\n3. Continue as Guest\r\n4. Exit"));
    assert!(run.output.ends_with("Goodbye!\r\n"));
}

#[tokio::test]
async fn guest_can_browse_but_not_post() {
    let store = store_with_boards();
    let run = run_script(&store, "3\r1\r1\rn\rb\r0\r0\r").await;

    assert!(run.output.contains("Main Menu - Welcome guest"));
    assert!(run.output.contains("1. [general] General discussion (0 posts)"));
    // Refused "n" redraws the same board, then "b" returns to the list
    assert_eq!(run.output.matches("Board: general").count(), 2);
    assert_eq!(run.output.matches("1. [general] General discussion (0 posts)").count(), 2);
    assert!(run.output.contains("No posts yet. Be the first to post!"));
    assert!(run.output.contains("Please login to post"));
    assert!(!run.output.contains("Invalid option"));
    assert!(!run.output.contains("Invalid selection"));
    assert!(!run.output.contains("New Post"));
    assert!(store.recent_posts(10).unwrap().is_empty());
    assert_eq!(store.count_board_posts(board_named(store.as_ref(), "general").id).unwrap(), 0);
    assert!(run.session.user().unwrap().is_guest());
}

#[tokio::test]
async fn register_then_compose_multiline_post() {
    let store = store_with_boards();
    let script = concat!(
        "2\ralice\ralice@example.com\rpassword1\rpassword1\r",
        "1\r1\rn\rHello\ra\rb\r.\r",
        "b\r0\r0\r"
    );
    let run = run_script(&store, script).await;

    assert!(run.output.contains("Registration successful!"));
    assert!(run.output.contains("Main Menu - Welcome alice"));
    assert!(run.output.contains("Post created successfully!"));
    assert!(!run.output.contains("password1"), "passwords must not be echoed");

    let posts = store.recent_posts(10).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].title, "Hello");
    assert_eq!(posts[0].content, "a\nb");
    assert_eq!(posts[0].username, "alice");
    assert_eq!(run.session.user().unwrap().username, "alice");
}

#[tokio::test]
async fn mismatched_registration_passwords_create_nothing() {
    let store = store_with_boards();
    let run = run_script(&store, "2\rcarol\r\rpassword1\rpassword2\r4\r").await;
    assert!(run.output.contains("Passwords do not match"));
    assert!(store.get_user_by_name("carol").is_err());
}

#[tokio::test]
async fn login_failure_then_success() {
    let store = store_with_boards();
    let bob = add_user(store.as_ref(), "bob", "password1");
    let run = run_script(&store, "1\rbob\rwrong-pass\r1\rbob\rpassword1\r0\r").await;

    assert!(run.output.contains("Invalid credentials"));
    assert!(run.output.contains("Welcome back, bob!"));
    assert!(run.output.contains("Main Menu - Welcome bob"));
    assert!(!run.output.contains("6. Admin Panel"));
    assert_eq!(run.session.user().unwrap().id, bob.id);
    assert!(store.get_user(bob.id).unwrap().last_login >= bob.last_login);
}

#[tokio::test]
async fn login_menu_uses_the_supplied_verifier() {
    let store = store_with_boards();
    add_user(store.as_ref(), "bob", "password1");
    let verifier = Arc::new(CountingVerifier::new(&store));
    let registry = Arc::new(SessionRegistry::new());
    let script = "1\rbob\rwrong-pass\r1\rbob\rpassword1\r0\r";
    let run = run_session_with(&store, verifier.clone(), &registry, None, fast_options(), script).await;

    assert!(run.output.contains("Welcome back, bob!"));
    assert_eq!(verifier.verifies.load(Ordering::SeqCst), 2);
    assert_eq!(verifier.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reply_is_listed_under_the_post() {
    let store = store_with_boards();
    let alice = add_user(store.as_ref(), "alice", "password1");
    let bob = add_user(store.as_ref(), "bob", "password1");
    let general = board_named(store.as_ref(), "general");
    let topic = store.create_post(NewPost::topic(general.id, &alice, "Hello", "first!")).unwrap();

    let registry = Arc::new(SessionRegistry::new());
    let script = "1\r1\r1\rr\rme too\r.\rb\rb\r0\r0\r";
    let run = run_session(&store, &registry, Some(bob), fast_options(), script).await;

    assert!(!run.output.contains("Login Menu"), "authenticated sessions skip the login menu");
    assert!(run.output.contains("1. Hello - by alice (0 replies)"));
    assert!(run.output.contains("Write Reply"));
    assert!(run.output.contains("--- 1 Replies ---"));
    assert!(run.output.contains("By bob on just now:"));

    let replies = store.list_replies(topic.id).unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, "me too");
    assert_eq!(store.list_board_posts(general.id, 10, 0).unwrap().len(), 1);
}

#[tokio::test]
async fn empty_title_is_rejected() {
    let store = store_with_boards();
    let alice = add_user(store.as_ref(), "alice", "password1");
    let registry = Arc::new(SessionRegistry::new());
    let run = run_session(&store, &registry, Some(alice), fast_options(), "1\r1\rn\r\rbody\r.\rb\r0\r0\r").await;
    assert!(run.output.contains("Title cannot be empty"));
    assert!(store.recent_posts(10).unwrap().is_empty());
}

#[tokio::test]
async fn board_pages_forward_and_back() {
    let store = store_with_boards();
    let alice = add_user(store.as_ref(), "alice", "password1");
    let general = board_named(store.as_ref(), "general");
    for title in ["First", "Second", "Third"] {
        store.create_post(NewPost::topic(general.id, &alice, title, "body")).unwrap();
    }

    let options = MenuOptions { page_size: 1, ..fast_options() };
    let registry = Arc::new(SessionRegistry::new());
    let run = run_session(&store, &registry, Some(alice), options, "1\r1\rf\rp\rb\r0\r0\r").await;

    assert!(run.output.contains("1. Third - by alice"));
    assert!(run.output.contains("1. Second - by alice"));
    assert!(run.output.contains("(F)orward page"));
    assert!(run.output.contains("(P)revious page"));
}

#[tokio::test]
async fn admin_creates_board() {
    let store = store_with_boards();
    add_admin(store.as_ref(), "sysop", "password1");
    let run = run_script(&store, "1\rsysop\rpassword1\r6\r1\rannounce\rNews from the sysop\r0\r").await;

    assert!(run.output.contains("6. Admin Panel"));
    assert!(run.output.contains("Board created successfully!"));
    let board = board_named(store.as_ref(), "announce");
    assert_eq!(board.description, "News from the sysop");
}

#[tokio::test]
async fn admin_panel_is_hidden_from_members() {
    let store = store_with_boards();
    let bob = add_user(store.as_ref(), "bob", "password1");
    let registry = Arc::new(SessionRegistry::new());
    let run = run_session(&store, &registry, Some(bob), fast_options(), "6\r0\r").await;
    assert!(run.output.contains("Invalid option"));
    assert!(!run.output.contains("Admin Panel"));
}

#[tokio::test]
async fn logout_returns_to_login_menu() {
    let store = store_with_boards();
    let bob = add_user(store.as_ref(), "bob", "password1");
    let registry = Arc::new(SessionRegistry::new());
    let run = run_session(&store, &registry, Some(bob), fast_options(), "9\r4\r").await;
    assert!(run.output.contains("Logged out successfully"));
    assert!(run.output.contains("Login Menu"));
    assert!(run.session.user().is_none());
}

#[tokio::test]
async fn invalid_login_menu_choice_is_reported() {
    let store = store_with_boards();
    let run = run_script(&store, "x\r4\r").await;
    assert!(run.output.contains("Invalid option"));
    assert!(run.session.user().is_none());
}

#[tokio::test]
async fn online_list_marks_own_session() {
    let store = store_with_boards();
    let registry = Arc::new(SessionRegistry::new());
    let other = add_user(store.as_ref(), "carol", "password1");
    let (_t, control, _s) = scripted_terminal("");
    registry.create(Some(other), control, None);

    let bob = add_user(store.as_ref(), "bob", "password1");
    let run = run_session(&store, &registry, Some(bob), fast_options(), "5\r\r0\r").await;
    assert!(run.output.contains("Online Users"));
    assert!(run.output.contains("2 connected"));
    assert!(run.output.contains("bob (you)"));
    assert!(run.output.contains("carol - online"));
}

#[tokio::test]
async fn disconnect_mid_prompt_ends_cleanly() {
    let store = store_with_boards();
    let run = run_script(&store, "1\rbo").await;
    assert!(run.output.contains("Username: "));
    assert!(run.session.user().is_none());
}

#[tokio::test]
async fn ctrl_c_ends_the_session() {
    let store = store_with_boards();
    let run = run_script(&store, "\x03").await;
    assert!(run.output.ends_with("^C\r\n"));
}
