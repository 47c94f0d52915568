#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod guard;
mod identity;
pub mod policy;
mod space;

pub use self::{
    guard::{AccessError, PolicyGuard},
    identity::{ExchangeToken, TokenClaims, VerifyToken},
    policy::{Destination, Policy, Ports, Protocol, Source, ValidationError},
    space::{LookupSpaces, Space},
};

/// Grants access to every policy regardless of space membership.
pub const NETWORK_ADMIN_SCOPE: &str = "network.admin";

/// Grants access to policies between apps in spaces the caller belongs to.
pub const NETWORK_WRITE_SCOPE: &str = "network.write";
