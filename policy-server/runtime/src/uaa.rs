use crate::{
    core::{ExchangeToken, TokenClaims, VerifyToken},
    http_client::{self, HttpClient},
};
use anyhow::Result;
use serde::Deserialize;
use tracing::instrument;

/// Talks to UAA on behalf of the policy server.
#[derive(Clone, Debug)]
pub struct UaaClient {
    http: HttpClient,
    base_url: String,
    client_name: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

// === impl UaaClient ===

impl UaaClient {
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        client_name: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            client_name: client_name.into(),
            client_secret: client_secret.into(),
        }
    }

    fn credentials(&self) -> (&str, &str) {
        (&self.client_name, &self.client_secret)
    }
}

#[async_trait::async_trait]
impl ExchangeToken for UaaClient {
    #[instrument(skip(self), fields(client = %self.client_name))]
    async fn service_token(&self) -> Result<String> {
        let req = self.http.post_form(
            &http_client::join(&self.base_url, "/oauth/token"),
            self.credentials(),
            &[("grant_type", "client_credentials")],
        )?;
        let TokenResponse { access_token } = self.http.send(req).await?.json()?;
        Ok(access_token)
    }
}

#[async_trait::async_trait]
impl VerifyToken for UaaClient {
    #[instrument(skip_all)]
    async fn check_token(&self, token: &str) -> Result<TokenClaims> {
        let req = self.http.post_form(
            &http_client::join(&self.base_url, "/check_token"),
            self.credentials(),
            &[("token", token)],
        )?;
        let claims = self.http.send(req).await?.json()?;
        Ok(claims)
    }
}
