//! Input validation for chat identities arriving from platform adapters.

use crate::economy::{EconomyError, Platform};

/// Identity validation errors with helpful messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("username cannot be empty")]
    EmptyUsername,

    #[error("username is too long (maximum {max} characters)")]
    UsernameTooLong { max: usize },

    #[error("username contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("platform id cannot be empty")]
    EmptyPlatformId,

    #[error("platform id is too long (maximum {max} characters)")]
    PlatformIdTooLong { max: usize },

    #[error("platform id cannot contain whitespace")]
    PlatformIdWhitespace,
}

impl From<IdentityError> for EconomyError {
    fn from(e: IdentityError) -> Self {
        EconomyError::InvalidInput(e.to_string())
    }
}

/// Per-platform limits on display names.
#[derive(Debug, Clone, Copy)]
pub struct UsernameRules {
    pub max_length: usize,
    pub allow_spaces: bool,
}

impl UsernameRules {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            // Twitch logins are 4-25 word characters; display names add case only.
            Platform::Twitch => UsernameRules {
                max_length: 25,
                allow_spaces: false,
            },
            Platform::Discord => UsernameRules {
                max_length: 32,
                allow_spaces: true,
            },
            Platform::Youtube => UsernameRules {
                max_length: 100,
                allow_spaces: true,
            },
        }
    }
}

/// Validate a chat username and return it trimmed.
pub fn validate_username(platform: Platform, username: &str) -> Result<String, IdentityError> {
    let rules = UsernameRules::for_platform(platform);
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::EmptyUsername);
    }
    if trimmed.chars().count() > rules.max_length {
        return Err(IdentityError::UsernameTooLong {
            max: rules.max_length,
        });
    }

    let mut invalid: Vec<char> = trimmed
        .chars()
        .filter(|c| c.is_control() || (*c == ' ' && !rules.allow_spaces))
        .collect();
    if !invalid.is_empty() {
        invalid.sort_unstable();
        invalid.dedup();
        let chars = invalid
            .iter()
            .map(|c| format!("\\u{{{:04x}}}", *c as u32))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(IdentityError::InvalidCharacters { chars });
    }

    Ok(trimmed.to_string())
}

/// Validate a platform's foreign id (opaque, but never blank or padded).
pub fn validate_platform_id(platform_id: &str) -> Result<String, IdentityError> {
    const MAX: usize = 128;
    if platform_id.is_empty() {
        return Err(IdentityError::EmptyPlatformId);
    }
    if platform_id.chars().count() > MAX {
        return Err(IdentityError::PlatformIdTooLong { max: MAX });
    }
    if platform_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdentityError::PlatformIdWhitespace);
    }
    Ok(platform_id.to_string())
}
