//! Input validation for account names, passwords, board names and post bodies.
//!
//! Everything typed at the terminal passes through here before it reaches the
//! content store, so stores can assume names are trimmed and bodies are free of
//! terminal control sequences.

use std::collections::HashSet;

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;
pub const BOARD_NAME_MAX_LEN: usize = 40;
pub const BOARD_DESCRIPTION_MAX_LEN: usize = 200;
pub const TITLE_MAX_LEN: usize = 120;
pub const CONTENT_MAX_BYTES: usize = 16 * 1024;

/// Username validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("Username is too short (minimum 2 characters)")]
    TooShort,

    #[error("Username is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Username cannot start or end with whitespace")]
    InvalidWhitespace,

    #[error("Username contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Username contains path separators (/ or \\)")]
    PathTraversal,

    #[error("Username is a reserved system name")]
    Reserved,
}

/// Rejections for everything that is not a username.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    Username(#[from] UsernameError),

    #[error("Password too short (minimum {} characters)", PASSWORD_MIN_LEN)]
    PasswordTooShort,

    #[error("Password too long (maximum {} characters)", PASSWORD_MAX_LEN)]
    PasswordTooLong,

    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} too long (max {max})")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains control characters")]
    ControlCharacters { field: &'static str },

    #[error("Guests cannot post")]
    GuestAuthor,
}

/// Username validation rules configuration
#[derive(Debug, Clone)]
pub struct UsernameRules {
    pub min_length: usize,
    pub max_length: usize,
    pub allow_spaces: bool,
    pub allow_unicode: bool,
    pub allow_reserved_sysop: bool,
}

impl UsernameRules {
    /// Conservative rules for sysop names
    pub fn sysop() -> Self {
        UsernameRules {
            min_length: 2,
            max_length: 20,
            allow_spaces: false,
            allow_unicode: false,
            allow_reserved_sysop: true,
        }
    }

    /// Rules for self-registered accounts
    pub fn user() -> Self {
        UsernameRules {
            min_length: 2,
            max_length: 30,
            allow_spaces: true,
            allow_unicode: true,
            allow_reserved_sysop: false,
        }
    }
}

/// Get set of reserved usernames that should not be allowed
fn reserved_names() -> HashSet<&'static str> {
    [
        // System/admin terms
        "admin", "administrator", "root", "system", "sysop", "operator",
        "guest", "anonymous", "nobody",
        // Menu terms that could cause confusion in listings
        "login", "logout", "register", "exit", "quit", "who", "help",
    ]
    .iter()
    .copied()
    .collect()
}

/// Validate a username according to the given rules
pub fn validate_username(username: &str, rules: &UsernameRules) -> Result<String, UsernameError> {
    let trimmed = username.trim();
    let length = trimmed.chars().count();

    if length < rules.min_length {
        return Err(UsernameError::TooShort);
    }
    if length > rules.max_length {
        return Err(UsernameError::TooLong { max: rules.max_length });
    }
    if trimmed != username {
        return Err(UsernameError::InvalidWhitespace);
    }

    let lower = trimmed.to_lowercase();
    if reserved_names().contains(lower.as_str()) && !(rules.allow_reserved_sysop && lower == "sysop") {
        return Err(UsernameError::Reserved);
    }

    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(UsernameError::PathTraversal);
    }

    let invalid: HashSet<char> = trimmed
        .chars()
        .filter(|&ch| {
            let valid = if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                true
            } else if ch == ' ' {
                rules.allow_spaces
            } else if ch.is_control() {
                false
            } else if !ch.is_ascii() {
                rules.allow_unicode
            } else {
                false
            };
            !valid
        })
        .collect();

    if !invalid.is_empty() {
        let mut chars: Vec<char> = invalid.into_iter().collect();
        chars.sort_unstable();
        let chars = chars
            .into_iter()
            .map(|c| if c.is_control() { format!("\\u{{{:04x}}}", c as u32) } else { c.to_string() })
            .collect::<String>();
        return Err(UsernameError::InvalidCharacters { chars });
    }

    Ok(trimmed.to_string())
}

/// Validate a sysop name with strict rules
pub fn validate_sysop_name(name: &str) -> Result<String, UsernameError> {
    validate_username(name, &UsernameRules::sysop())
}

/// Validate a regular user name
pub fn validate_user_name(name: &str) -> Result<String, UsernameError> {
    validate_username(name, &UsernameRules::user())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if password.len() > PASSWORD_MAX_LEN {
        return Err(ValidationError::PasswordTooLong);
    }
    Ok(())
}

fn validate_single_line(value: &str, field: &'static str, max: usize, required: bool) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if required && trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters { field });
    }
    Ok(trimmed.to_string())
}

/// Board names are unique, so they are compared case-insensitively by the stores.
pub fn validate_board_name(name: &str) -> Result<String, ValidationError> {
    validate_single_line(name, "Board name", BOARD_NAME_MAX_LEN, true)
}

pub fn validate_board_description(description: &str) -> Result<String, ValidationError> {
    validate_single_line(description, "Description", BOARD_DESCRIPTION_MAX_LEN, false)
}

pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    validate_single_line(title, "Title", TITLE_MAX_LEN, true)
}

/// Sanitize post content: strip control characters (keeping newlines and tabs)
/// and enforce the size limit. Empty bodies are rejected.
pub fn sanitize_post_content(content: &str) -> Result<String, ValidationError> {
    if content.len() > CONTENT_MAX_BYTES {
        return Err(ValidationError::TooLong { field: "Content", max: CONTENT_MAX_BYTES });
    }
    let sanitized: String = content
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect();
    if sanitized.trim().is_empty() {
        return Err(ValidationError::Empty { field: "Content" });
    }
    Ok(sanitized)
}
