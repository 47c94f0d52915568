use crate::{ExchangeToken, LookupSpaces, Policy, Space, TokenClaims};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// Decides whether a caller may manage a batch of policies.
///
/// Network admins may manage any policy. Any other caller must be a member of
/// every space that owns an app referenced by the batch.
#[derive(Clone, Debug)]
pub struct PolicyGuard<T, S> {
    tokens: T,
    spaces: S,
}

/// Upstream failures while checking access.
///
/// A denial is not an error: it is reported as `Ok(false)`.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("getting token: {0}")]
    ServiceToken(#[source] anyhow::Error),

    #[error("getting space guids: {0}")]
    SpaceGuids(#[source] anyhow::Error),

    // Space and membership lookups share this message.
    #[error("getting space with guid {guid}: {source}")]
    Space {
        guid: String,
        #[source]
        source: anyhow::Error,
    },
}

// === impl PolicyGuard ===

impl<T, S> PolicyGuard<T, S>
where
    T: ExchangeToken,
    S: LookupSpaces,
{
    pub fn new(tokens: T, spaces: S) -> Self {
        Self { tokens, spaces }
    }

    #[instrument(skip_all, fields(user = %caller.user_name, policies = policies.len()))]
    pub async fn check_access(
        &self,
        policies: &[Policy],
        caller: &TokenClaims,
    ) -> Result<bool, AccessError> {
        if caller.is_admin() {
            debug!("Caller is a network admin");
            return Ok(true);
        }

        let token = self
            .tokens
            .service_token()
            .await
            .map_err(AccessError::ServiceToken)?;

        let app_guids = unique(
            policies
                .iter()
                .flat_map(|p| p.app_ids())
                .map(str::to_string),
        );
        trace!(?app_guids);

        let space_guids = self
            .spaces
            .space_guids(&token, &app_guids)
            .await
            .map_err(AccessError::SpaceGuids)?;
        let space_guids = unique(space_guids);
        trace!(?space_guids);

        let mut spaces = Vec::<(String, Space)>::with_capacity(space_guids.len());
        for guid in space_guids {
            match self.spaces.space(&token, &guid).await {
                Ok(Some(space)) => spaces.push((guid, space)),
                Ok(None) => {
                    debug!(%guid, "Space not found");
                    return Ok(false);
                }
                Err(source) => return Err(AccessError::Space { guid, source }),
            }
        }

        for (guid, space) in spaces {
            match self.spaces.user_space(&token, &caller.user_id, &space).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(%guid, space = %space.name, "Caller is not a space member");
                    return Ok(false);
                }
                Err(source) => return Err(AccessError::Space { guid, source }),
            }
        }

        Ok(true)
    }

    /// Filters `policies` down to those the caller may see.
    ///
    /// A policy is visible when every app it references belongs to a space
    /// the caller is a member of. Policies that reference apps with no known
    /// space are hidden. The whole batch costs one token exchange and one app
    /// lookup, plus a space and a membership lookup per distinct space.
    #[instrument(skip_all, fields(user = %caller.user_name, policies = policies.len()))]
    pub async fn visible_policies(
        &self,
        policies: Vec<Policy>,
        caller: &TokenClaims,
    ) -> Result<Vec<Policy>, AccessError> {
        if caller.is_admin() || policies.is_empty() {
            return Ok(policies);
        }

        let token = self
            .tokens
            .service_token()
            .await
            .map_err(AccessError::ServiceToken)?;

        let app_guids = unique(
            policies
                .iter()
                .flat_map(|p| p.app_ids())
                .map(str::to_string),
        );
        let app_spaces = self
            .spaces
            .app_spaces(&token, &app_guids)
            .await
            .map_err(AccessError::SpaceGuids)?;
        let space_guids = unique(app_spaces.iter().map(|(_, space)| space.clone()));
        trace!(?space_guids);

        let mut member_of = HashSet::with_capacity(space_guids.len());
        for guid in space_guids {
            let space = match self.spaces.space(&token, &guid).await {
                Ok(Some(space)) => space,
                Ok(None) => {
                    debug!(%guid, "Space not found");
                    continue;
                }
                Err(source) => return Err(AccessError::Space { guid, source }),
            };
            match self.spaces.user_space(&token, &caller.user_id, &space).await {
                Ok(Some(_)) => {
                    member_of.insert(guid);
                }
                Ok(None) => trace!(%guid, space = %space.name, "Caller is not a space member"),
                Err(source) => return Err(AccessError::Space { guid, source }),
            }
        }

        let app_spaces = app_spaces.into_iter().collect::<HashMap<_, _>>();
        let visible = policies
            .into_iter()
            .filter(|policy| {
                policy.app_ids().into_iter().all(|app| {
                    app_spaces
                        .get(app)
                        .is_some_and(|space| member_of.contains(space))
                })
            })
            .collect::<Vec<_>>();
        debug!(visible = visible.len());
        Ok(visible)
    }
}

/// Removes duplicates, keeping the first occurrence of each value in order.
fn unique(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
