//! The external policy API, used by operators and developers.

use crate::{
    authenticate::authenticate,
    core::{
        policy::validate_policies, ExchangeToken, LookupSpaces, Policy, PolicyGuard, TokenClaims,
        VerifyToken, NETWORK_ADMIN_SCOPE, NETWORK_WRITE_SCOPE,
    },
    http::{json_response, not_found, query_ids, read_json, ApiError, Body, BoxError},
    metrics::Metrics,
    store::{Store, Tag},
};
use bytes::Bytes;
use futures::future;
use hyper::{
    http::{self, request::Parts},
    Request, Response,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio::time;
use tracing::{info, trace};

pub type Guard = PolicyGuard<Arc<dyn ExchangeToken>, Arc<dyn LookupSpaces>>;

const SERVER: &str = "external";

const WRITE_SCOPES: &[&str] = &[NETWORK_ADMIN_SCOPE, NETWORK_WRITE_SCOPE];
const ADMIN_SCOPES: &[&str] = &[NETWORK_ADMIN_SCOPE];

#[derive(Clone)]
pub struct ExternalApi {
    inner: Arc<Inner>,
}

struct Inner {
    verifier: Arc<dyn VerifyToken>,
    guard: Guard,
    store: Arc<dyn Store>,
    metrics: Metrics,
    max_body_bytes: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Route {
    CreatePolicies,
    DeletePolicies,
    ListPolicies,
    ListTags,
}

#[derive(Debug, Deserialize)]
struct PoliciesRequest {
    policies: Vec<Policy>,
}

#[derive(Debug, Serialize)]
struct PoliciesResponse {
    total_policies: usize,
    policies: Vec<Policy>,
}

#[derive(Debug, Serialize)]
struct TagsResponse {
    tags: Vec<Tag>,
}

#[derive(Debug, Serialize)]
struct Empty {}

// === impl ExternalApi ===

impl ExternalApi {
    pub fn new(
        verifier: Arc<dyn VerifyToken>,
        guard: Guard,
        store: Arc<dyn Store>,
        metrics: Metrics,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                verifier,
                guard,
                store,
                metrics,
                max_body_bytes,
            }),
        }
    }

    async fn handle<B>(self, route: Route, req: Request<B>) -> Response<Body>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start = time::Instant::now();
        let (parts, body) = req.into_parts();
        let res = match route {
            Route::CreatePolicies => self.create(&parts, body).await,
            Route::DeletePolicies => self.delete(&parts, body).await,
            Route::ListPolicies => self.list(&parts).await,
            Route::ListTags => self.tags(&parts).await,
        };
        let rsp = res.unwrap_or_else(ApiError::into_response);
        self.inner
            .metrics
            .http
            .observe(SERVER, route.name(), rsp.status(), start);
        rsp
    }

    async fn create<B>(&self, parts: &Parts, body: B) -> Result<Response<Body>, ApiError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let caller = self.authenticate(parts, WRITE_SCOPES).await?;
        let PoliciesRequest { policies } = read_json(body, self.inner.max_body_bytes).await?;
        validate_policies(&policies)?;
        self.authorize(&policies, &caller).await?;

        let store = &self.inner.store;
        self.inner
            .metrics
            .store
            .time("create", || store.create(&policies))?;
        info!(user = %caller.user_name, policies = policies.len(), "Created policies");
        Ok(json_response(http::StatusCode::OK, &Empty {}))
    }

    async fn delete<B>(&self, parts: &Parts, body: B) -> Result<Response<Body>, ApiError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let caller = self.authenticate(parts, WRITE_SCOPES).await?;
        let PoliciesRequest { policies } = read_json(body, self.inner.max_body_bytes).await?;
        validate_policies(&policies)?;
        self.authorize(&policies, &caller).await?;

        let store = &self.inner.store;
        self.inner
            .metrics
            .store
            .time("delete", || store.delete(&policies));
        info!(user = %caller.user_name, policies = policies.len(), "Deleted policies");
        Ok(json_response(http::StatusCode::OK, &Empty {}))
    }

    /// Lists policies. Callers without the admin scope only see policies
    /// they would be allowed to manage.
    async fn list(&self, parts: &Parts) -> Result<Response<Body>, ApiError> {
        let caller = self.authenticate(parts, WRITE_SCOPES).await?;
        let ids = query_ids(parts.uri.query())?;

        let store = &self.inner.store;
        let policies = self.inner.metrics.store.time("list", || match &ids {
            Some(ids) => store.by_guids(ids),
            None => store.all(),
        });

        let policies = self.inner.guard.visible_policies(policies, &caller).await?;

        Ok(json_response(
            http::StatusCode::OK,
            &PoliciesResponse {
                total_policies: policies.len(),
                policies,
            },
        ))
    }

    async fn tags(&self, parts: &Parts) -> Result<Response<Body>, ApiError> {
        self.authenticate(parts, ADMIN_SCOPES).await?;
        let store = &self.inner.store;
        let tags = self.inner.metrics.store.time("tags", || store.tags());
        Ok(json_response(http::StatusCode::OK, &TagsResponse { tags }))
    }

    async fn authenticate(
        &self,
        parts: &Parts,
        allowed: &[&'static str],
    ) -> Result<TokenClaims, ApiError> {
        let caller = authenticate(&*self.inner.verifier, &parts.headers, allowed).await?;
        trace!(user = %caller.user_name, scopes = ?caller.scopes);
        Ok(caller)
    }

    async fn authorize(&self, policies: &[Policy], caller: &TokenClaims) -> Result<(), ApiError> {
        let access = &self.inner.metrics.access;
        match self.inner.guard.check_access(policies, caller).await {
            Ok(true) => {
                access.authorized();
                Ok(())
            }
            Ok(false) => {
                access.denied();
                Err(ApiError::Denied)
            }
            Err(error) => {
                access.failed();
                Err(error.into())
            }
        }
    }
}

impl<B> tower::Service<Request<B>> for ExternalApi
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri());
        let Some(route) = Route::recognize(req.method(), req.uri().path()) else {
            return Box::pin(future::ok(not_found()));
        };

        let api = self.clone();
        Box::pin(async move { Ok(api.handle(route, req).await) })
    }
}

// === impl Route ===

impl Route {
    fn recognize(method: &http::Method, path: &str) -> Option<Self> {
        match (method, path.trim_end_matches('/')) {
            (&http::Method::POST, "/networking/v0/external/policies") => {
                Some(Self::CreatePolicies)
            }
            (&http::Method::POST, "/networking/v0/external/policies/delete") => {
                Some(Self::DeletePolicies)
            }
            (&http::Method::GET, "/networking/v0/external/policies") => Some(Self::ListPolicies),
            (&http::Method::GET, "/networking/v0/external/tags") => Some(Self::ListTags),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::CreatePolicies => "create_policies",
            Self::DeletePolicies => "delete_policies",
            Self::ListPolicies => "list_policies",
            Self::ListTags => "list_tags",
        }
    }
}
