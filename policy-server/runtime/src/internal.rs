//! The internal policy API, used by the per-cell agents that enforce policies.

use crate::{
    core::{Destination, Policy, Ports, Protocol},
    http::{json_response, not_found, query_ids, read_json, ApiError, Body, BoxError},
    metrics::Metrics,
    store::Store,
};
use ahash::AHashMap as HashMap;
use bytes::Bytes;
use futures::future;
use hyper::{
    http::{self, request::Parts},
    Request, Response,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio::time;
use tracing::{debug, trace};

const SERVER: &str = "internal";

#[derive(Clone)]
pub struct InternalApi {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    metrics: Metrics,
    max_body_bytes: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Route {
    ListPolicies,
    CreateSelfPolicy,
}

#[derive(Debug, Serialize)]
struct TaggedPolicies<'a> {
    total_policies: usize,
    policies: Vec<TaggedPolicy<'a>>,
}

#[derive(Debug, Serialize)]
struct TaggedPolicy<'a> {
    source: TaggedSource<'a>,
    destination: TaggedDestination<'a>,
}

#[derive(Debug, Serialize)]
struct TaggedSource<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TaggedDestination<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
    protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    ports: Ports,
}

/// An app asking to be reachable from its own instances.
#[derive(Debug, Deserialize)]
struct SelfPolicyRequest {
    id: String,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Serialize)]
struct SelfPolicyResponse {
    tag: String,
}

// === impl InternalApi ===

impl InternalApi {
    pub fn new(store: Arc<dyn Store>, metrics: Metrics, max_body_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
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
            Route::ListPolicies => self.list(&parts),
            Route::CreateSelfPolicy => self.create_self_policy(body).await,
        };
        let rsp = res.unwrap_or_else(ApiError::into_response);
        self.inner
            .metrics
            .http
            .observe(SERVER, route.name(), rsp.status(), start);
        rsp
    }

    /// Lists policies with the tags of the apps on either end.
    fn list(&self, parts: &Parts) -> Result<Response<Body>, ApiError> {
        let ids = query_ids(parts.uri.query())?;

        let store = &self.inner.store;
        let (policies, tags) = self.inner.metrics.store.time("list_tagged", || {
            let policies = match &ids {
                Some(ids) => store.by_guids(ids),
                None => store.all(),
            };
            (policies, store.tags())
        });
        let tags = tags
            .iter()
            .map(|t| (t.id.as_str(), t.tag.as_str()))
            .collect::<HashMap<_, _>>();

        let policies = policies
            .iter()
            .map(|policy| tagged(policy, &tags))
            .collect::<Vec<_>>();
        trace!(policies = policies.len());
        Ok(json_response(
            http::StatusCode::OK,
            &TaggedPolicies {
                total_policies: policies.len(),
                policies,
            },
        ))
    }

    /// Ensures an app may reach itself on `port` and returns its tag.
    async fn create_self_policy<B>(&self, body: B) -> Result<Response<Body>, ApiError>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let SelfPolicyRequest { id, port } = read_json(body, self.inner.max_body_bytes).await?;
        let destination = Destination::new(id.clone(), Protocol::Tcp, port, None)?;
        let policy = Policy::new(id.clone(), destination);
        policy.validate()?;

        let store = &self.inner.store;
        let tags = self.inner.metrics.store.time("create_self", || {
            store.create(std::slice::from_ref(&policy))?;
            Ok::<_, ApiError>(store.tags())
        })?;
        let tag = tags
            .into_iter()
            .find(|t| t.id == id)
            .map(|t| t.tag)
            .ok_or(ApiError::MissingTag(id))?;
        debug!(app = %policy.source.id, %tag, "Created self policy");

        Ok(json_response(
            http::StatusCode::OK,
            &SelfPolicyResponse { tag },
        ))
    }
}

impl<B> tower::Service<Request<B>> for InternalApi
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

fn tagged<'a>(policy: &'a Policy, tags: &HashMap<&'a str, &'a str>) -> TaggedPolicy<'a> {
    let Policy {
        source,
        destination,
    } = policy;
    TaggedPolicy {
        source: TaggedSource {
            id: &source.id,
            tag: tags.get(source.id.as_str()).copied(),
        },
        destination: TaggedDestination {
            id: &destination.id,
            tag: tags.get(destination.id.as_str()).copied(),
            protocol: destination.protocol,
            port: destination.port(),
            ports: destination.ports(),
        },
    }
}

// === impl Route ===

impl Route {
    fn recognize(method: &http::Method, path: &str) -> Option<Self> {
        match (method, path.trim_end_matches('/')) {
            (&http::Method::GET, "/networking/v0/internal/policies") => Some(Self::ListPolicies),
            (&http::Method::POST, "/networking/v0/internal/create-self-policy") => {
                Some(Self::CreateSelfPolicy)
            }
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ListPolicies => "list_tagged_policies",
            Self::CreateSelfPolicy => "create_self_policy",
        }
    }
}
