#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use netman_policy_server_core as core;

mod admin;
mod args;
mod authenticate;
mod cc;
mod external;
mod http;
mod http_client;
mod internal;
mod metrics;
mod server;
mod store;
mod uaa;

pub use self::{
    admin::Admin,
    args::Args,
    cc::CcClient,
    external::{ExternalApi, Guard},
    http_client::{HttpClient, UpstreamError},
    internal::InternalApi,
    metrics::Metrics,
    store::{MemoryStore, Store, StoreError, Tag},
    uaa::UaaClient,
};
