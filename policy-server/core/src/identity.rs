use crate::NETWORK_ADMIN_SCOPE;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The verified claims of a caller's bearer token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "scope", default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub user_name: String,
}

/// Exchanges the server's own client credentials for a service token.
#[async_trait::async_trait]
pub trait ExchangeToken: Send + Sync {
    async fn service_token(&self) -> Result<String>;
}

/// Verifies a caller's bearer token.
#[async_trait::async_trait]
pub trait VerifyToken: Send + Sync {
    async fn check_token(&self, token: &str) -> Result<TokenClaims>;
}

// === impl TokenClaims ===

impl TokenClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_admin(&self) -> bool {
        self.has_scope(NETWORK_ADMIN_SCOPE)
    }

    /// Returns true if any of the caller's scopes is in `allowed`.
    pub fn has_any_scope<S: AsRef<str>>(&self, allowed: &[S]) -> bool {
        allowed.iter().any(|s| self.has_scope(s.as_ref()))
    }
}

#[async_trait::async_trait]
impl<T: ExchangeToken + ?Sized> ExchangeToken for Arc<T> {
    async fn service_token(&self) -> Result<String> {
        (**self).service_token().await
    }
}

#[async_trait::async_trait]
impl<T: VerifyToken + ?Sized> VerifyToken for Arc<T> {
    async fn check_token(&self, token: &str) -> Result<TokenClaims> {
        (**self).check_token(token).await
    }
}
