use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A platform space, identified by its name and owning organization.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    pub org_guid: String,
}

/// Models the platform's app and space membership APIs.
///
/// Every lookup is made with a service token obtained through
/// [`ExchangeToken`](crate::ExchangeToken).
#[async_trait::async_trait]
pub trait LookupSpaces: Send + Sync {
    /// Resolves the space owning each of the given apps.
    async fn space_guids(&self, token: &str, app_guids: &[String]) -> Result<Vec<String>>;

    /// Resolves `(app_guid, space_guid)` pairs for the given apps. Apps that
    /// do not exist are omitted.
    async fn app_spaces(&self, token: &str, app_guids: &[String])
        -> Result<Vec<(String, String)>>;

    /// Returns `None` if the space does not exist.
    async fn space(&self, token: &str, space_guid: &str) -> Result<Option<Space>>;

    /// Returns `None` if the user is not a member of the space.
    async fn user_space(&self, token: &str, user_guid: &str, space: &Space)
        -> Result<Option<Space>>;
}

#[async_trait::async_trait]
impl<T: LookupSpaces + ?Sized> LookupSpaces for Arc<T> {
    async fn space_guids(&self, token: &str, app_guids: &[String]) -> Result<Vec<String>> {
        (**self).space_guids(token, app_guids).await
    }

    async fn app_spaces(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<Vec<(String, String)>> {
        (**self).app_spaces(token, app_guids).await
    }

    async fn space(&self, token: &str, space_guid: &str) -> Result<Option<Space>> {
        (**self).space(token, space_guid).await
    }

    async fn user_space(
        &self,
        token: &str,
        user_guid: &str,
        space: &Space,
    ) -> Result<Option<Space>> {
        (**self).user_space(token, user_guid, space).await
    }
}
