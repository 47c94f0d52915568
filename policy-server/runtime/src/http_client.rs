//! A small JSON client for the UAA and Cloud Controller APIs.

use bytes::Bytes;
use hyper::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::time;
use tracing::{debug, instrument};

#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no certificates found in CA bundle")]
    EmptyCaBundle,

    #[error("sending request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("decoding response: {0}")]
    Json(#[from] serde_json::Error),
}

/// A buffered upstream response.
#[derive(Debug)]
pub(crate) struct Response {
    pub(crate) status: StatusCode,
    pub(crate) body: Bytes,
}

// === impl HttpClient ===

impl HttpClient {
    /// Builds a client that speaks HTTP and HTTPS. Servers are verified
    /// against the built-in web PKI roots and any certificates in `ca_pem`.
    ///
    /// Every exchange, including connecting, must complete within `timeout`.
    pub fn new(timeout: time::Duration, ca_pem: Option<&[u8]>) -> Result<Self, UpstreamError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(timeout)
            .timeout(timeout);
        if let Some(pem) = ca_pem {
            let certs = reqwest::Certificate::from_pem_bundle(pem)?;
            if certs.is_empty() {
                return Err(UpstreamError::EmptyCaBundle);
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(method = %req.method(), uri = %req.url()))]
    pub(crate) async fn send(&self, req: reqwest::Request) -> Result<Response, UpstreamError> {
        let rsp = self.client.execute(req).await?;
        let status = rsp.status();
        let body = rsp.bytes().await?;
        debug!(%status);
        Ok(Response { status, body })
    }

    pub(crate) fn get(&self, uri: &str, bearer: &str) -> Result<reqwest::Request, UpstreamError> {
        let req = self
            .client
            .get(uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(bearer)
            .build()?;
        Ok(req)
    }

    /// Builds a form POST authenticated with HTTP basic credentials.
    pub(crate) fn post_form<F: Serialize + ?Sized>(
        &self,
        uri: &str,
        (user, password): (&str, &str),
        form: &F,
    ) -> Result<reqwest::Request, UpstreamError> {
        let req = self
            .client
            .post(uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .basic_auth(user, Some(password))
            .form(form)
            .build()?;
        Ok(req)
    }
}

// === impl Response ===

impl Response {
    /// Decodes a successful response, failing on any non-2xx status.
    pub(crate) fn json<T: DeserializeOwned>(self) -> Result<T, UpstreamError> {
        if !self.status.is_success() {
            return Err(UpstreamError::Status {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Joins a base URL and a path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
