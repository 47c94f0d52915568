//! Request and response plumbing shared by the API servers.

use crate::{
    authenticate::AuthError,
    core::{AccessError, ValidationError},
    store::StoreError,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{http, Response};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub(crate) type Body = http_body_util::Full<Bytes>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub(crate) enum BodyError {
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("failed reading request body: {0}")]
    Read(#[source] BoxError),

    #[error("invalid values passed to API: {0}")]
    Json(#[from] serde_json::Error),
}

/// Any failure an API request can end in.
#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Body(#[from] BodyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid query: {0}")]
    Query(#[from] serde_urlencoded::de::Error),

    #[error("one or more applications cannot be found or accessed")]
    Denied,

    #[error("checking access failed: {0}")]
    Access(#[from] AccessError),

    #[error("database create failed: {0}")]
    Store(#[from] StoreError),

    #[error("no tag found for {0}")]
    MissingTag(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Reads a request body of at most `limit` bytes and decodes it as JSON.
pub(crate) async fn read_json<B, T>(body: B, limit: usize) -> Result<T, BodyError>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
    T: DeserializeOwned,
{
    let bytes = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) if error.is::<LengthLimitError>() => return Err(BodyError::TooLarge(limit)),
        Err(error) => return Err(BodyError::Read(error)),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn json_response<T: Serialize>(status: http::StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("json response must be valid"),
        Err(error) => {
            tracing::error!(%error, "Failed to encode json response");
            empty_response(http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub(crate) fn error_response(
    status: http::StatusCode,
    error: impl std::fmt::Display,
) -> Response<Body> {
    json_response(
        status,
        &ErrorBody {
            error: &error.to_string(),
        },
    )
}

pub(crate) fn empty_response(status: http::StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::default())
        .expect("empty response must be valid")
}

pub(crate) fn not_found() -> Response<Body> {
    empty_response(http::StatusCode::NOT_FOUND)
}

// === impl ApiError ===

impl ApiError {
    pub(crate) fn status(&self) -> http::StatusCode {
        match self {
            Self::Auth(error) => error.status(),
            Self::Body(error) => error.status(),
            Self::Validation(_) | Self::Query(_) => http::StatusCode::BAD_REQUEST,
            Self::Denied => http::StatusCode::FORBIDDEN,
            Self::Access(_) | Self::Store(_) | Self::MissingTag(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub(crate) fn into_response(self) -> Response<Body> {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        } else {
            info!(error = %self, "Request rejected");
        }
        error_response(status, self)
    }
}

// === impl BodyError ===

impl BodyError {
    pub(crate) fn status(&self) -> http::StatusCode {
        match self {
            Self::TooLarge(_) => http::StatusCode::PAYLOAD_TOO_LARGE,
            Self::Read(_) | Self::Json(_) => http::StatusCode::BAD_REQUEST,
        }
    }
}

/// Reads the `id` query parameter as a comma-separated list of app guids.
pub(crate) fn query_ids(
    query: Option<&str>,
) -> Result<Option<Vec<String>>, serde_urlencoded::de::Error> {
    #[derive(serde::Deserialize)]
    struct Query {
        id: Option<String>,
    }

    let Query { id } = serde_urlencoded::from_str(query.unwrap_or_default())?;
    Ok(id.map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }))
}

#[cfg(test)]
pub(crate) async fn into_json(rsp: Response<Body>) -> serde_json::Value {
    let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_oversized_bodies() {
        let body = Body::from(r#"{"policies": []}"#);
        let error = read_json::<_, serde_json::Value>(body, 4).await.unwrap_err();
        assert!(matches!(error, BodyError::TooLarge(4)));
        assert_eq!(error.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let error = read_json::<_, serde_json::Value>(Body::from("{"), 1024)
            .await
            .unwrap_err();
        assert_eq!(error.status(), http::StatusCode::BAD_REQUEST);
        assert!(error.to_string().starts_with("invalid values passed to API"));
    }

    #[test]
    fn parses_id_lists() {
        assert_eq!(query_ids(None).unwrap(), None);
        assert_eq!(query_ids(Some("other=1")).unwrap(), None);
        assert_eq!(
            query_ids(Some("id=app1,app2")).unwrap(),
            Some(vec!["app1".to_string(), "app2".to_string()])
        );
        assert_eq!(
            query_ids(Some("id=app1%2C%20app2,")).unwrap(),
            Some(vec!["app1".to_string(), "app2".to_string()])
        );
    }
}
