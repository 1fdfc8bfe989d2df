//! Connection authentication
//!
//! Turns the credential presented at connect time into an identity.
//! Two deployment modes:
//! - `TokenTable`: opaque tokens mapped to verified principals
//! - `HandleValidator`: the token is a self-declared handle

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::message::SYSTEM_SENDER;

/// Maximum handle length in characters
const MAX_HANDLE_LEN: usize = 32;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a credential and return the identity it belongs to.
    async fn authenticate(&self, token: &str) -> Result<String, AuthError>;
}

/// Static token → principal table
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, String>,
}

impl TokenTable {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for TokenTable {
    async fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Accepts any well-formed handle as the identity
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleValidator;

#[async_trait]
impl Authenticator for HandleValidator {
    async fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        let handle = token.trim();
        if handle.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if handle.chars().count() > MAX_HANDLE_LEN {
            return Err(AuthError::InvalidHandle(format!(
                "longer than {MAX_HANDLE_LEN} characters"
            )));
        }
        if handle
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(AuthError::InvalidHandle(
                "must not contain whitespace".to_string(),
            ));
        }
        if handle.eq_ignore_ascii_case(SYSTEM_SENDER) {
            return Err(AuthError::InvalidHandle(format!("'{handle}' is reserved")));
        }
        Ok(handle.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_table() {
        let auth = TokenTable::new(HashMap::from([(
            "secret".to_string(),
            "alice@example.com".to_string(),
        )]));

        assert_eq!(auth.authenticate("secret").await.unwrap(), "alice@example.com");
        assert!(matches!(
            auth.authenticate("wrong").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            auth.authenticate("").await,
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_handle_validation() {
        let auth = HandleValidator;

        assert_eq!(auth.authenticate("alice").await.unwrap(), "alice");
        assert_eq!(auth.authenticate(" bob ").await.unwrap(), "bob");
        assert!(matches!(
            auth.authenticate("").await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            auth.authenticate("a b").await,
            Err(AuthError::InvalidHandle(_))
        ));
        assert!(matches!(
            auth.authenticate("System").await,
            Err(AuthError::InvalidHandle(_))
        ));
        assert!(matches!(
            auth.authenticate(&"x".repeat(33)).await,
            Err(AuthError::InvalidHandle(_))
        ));
    }
}
