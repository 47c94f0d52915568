use crate::core::{TokenClaims, VerifyToken};
use hyper::http;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("failed to verify token with uaa: {0}")]
    Verify(#[source] anyhow::Error),

    #[error(
        "provided scopes [{}] do not include allowed scopes [{}]",
        .provided.join(" "),
        .allowed.join(" ")
    )]
    Scope {
        provided: Vec<String>,
        allowed: Vec<&'static str>,
    },
}

/// Verifies the request's bearer token and requires one of `allowed` scopes.
pub(crate) async fn authenticate(
    verifier: &dyn VerifyToken,
    headers: &http::HeaderMap,
    allowed: &[&'static str],
) -> Result<TokenClaims, AuthError> {
    let token = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingHeader)?;
    let token = token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token);

    let claims = verifier
        .check_token(token)
        .await
        .map_err(AuthError::Verify)?;

    if !claims.has_any_scope(allowed) {
        return Err(AuthError::Scope {
            provided: claims.scopes,
            allowed: allowed.to_vec(),
        });
    }

    Ok(claims)
}

// === impl AuthError ===

impl AuthError {
    pub(crate) fn status(&self) -> http::StatusCode {
        match self {
            Self::MissingHeader => http::StatusCode::UNAUTHORIZED,
            Self::Verify(_) | Self::Scope { .. } => http::StatusCode::FORBIDDEN,
        }
    }
}
