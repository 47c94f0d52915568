use crate::http::{empty_response, not_found, Body, BoxError};
use futures::future;
use hyper::{http, Request, Response};
use prometheus_client::registry::Registry;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::watch;

/// Serves readiness, liveness and metrics.
#[derive(Clone)]
pub struct Admin {
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
}

// === impl Admin ===

impl Admin {
    pub fn new(ready: watch::Receiver<bool>, registry: Arc<Registry>) -> Self {
        Self { ready, registry }
    }

    fn handle_ready(&self) -> Response<Body> {
        if *self.ready.borrow() {
            text_response(http::StatusCode::OK, "ready\n".to_string())
        } else {
            text_response(
                http::StatusCode::INTERNAL_SERVER_ERROR,
                "not ready\n".to_string(),
            )
        }
    }

    fn handle_metrics(&self) -> Response<Body> {
        let mut buf = String::new();
        match prometheus_client::encoding::text::encode(&mut buf, &self.registry) {
            Ok(()) => text_response(http::StatusCode::OK, buf),
            Err(error) => {
                tracing::error!(%error, "Failed to encode metrics");
                empty_response(http::StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

impl<B> tower::Service<Request<B>> for Admin
where
    B: hyper::body::Body + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::Ready<Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        if !matches!(*req.method(), http::Method::GET | http::Method::HEAD) {
            let rsp = match req.uri().path() {
                "/ready" | "/live" | "/metrics" => {
                    empty_response(http::StatusCode::METHOD_NOT_ALLOWED)
                }
                _ => not_found(),
            };
            return future::ok(rsp);
        }

        let rsp = match req.uri().path() {
            "/ready" => self.handle_ready(),
            "/live" => text_response(http::StatusCode::OK, "live\n".to_string()),
            "/metrics" => self.handle_metrics(),
            _ => not_found(),
        };
        future::ok(rsp)
    }
}

fn text_response(status: http::StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .expect("text response must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get(admin: &Admin, path: &str) -> (http::StatusCode, String) {
        let rsp = admin
            .clone()
            .oneshot(Request::get(path).body(Body::default()).unwrap())
            .await
            .unwrap();
        let status = rsp.status();
        let body = rsp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn readiness_follows_the_watch() {
        let (ready_tx, ready_rx) = watch::channel(false);
        let admin = Admin::new(ready_rx, Arc::new(Registry::default()));

        let (status, body) = get(&admin, "/ready").await;
        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "not ready\n");

        ready_tx.send(true).unwrap();
        let (status, body) = get(&admin, "/ready").await;
        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(body, "ready\n");

        let (status, _) = get(&admin, "/live").await;
        assert_eq!(status, http::StatusCode::OK);
    }

    #[tokio::test]
    async fn exports_metrics() {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);
        metrics.access.denied();
        let (_ready_tx, ready_rx) = watch::channel(true);
        let admin = Admin::new(ready_rx, Arc::new(registry));

        let (status, body) = get(&admin, "/metrics").await;
        assert_eq!(status, http::StatusCode::OK);
        assert!(
            body.contains(r#"check_access_total{outcome="denied"} 1"#),
            "{body}"
        );
    }

    #[tokio::test]
    async fn rejects_other_methods() {
        let (_ready_tx, ready_rx) = watch::channel(true);
        let admin = Admin::new(ready_rx, Arc::new(Registry::default()));
        let rsp = admin
            .oneshot(Request::post("/ready").body(Body::default()).unwrap())
            .await
            .unwrap();
        assert_eq!(rsp.status(), http::StatusCode::METHOD_NOT_ALLOWED);
    }
}
