use crate::{
    core::{LookupSpaces, Space},
    http_client::{self, HttpClient},
};
use anyhow::{bail, Result};
use hyper::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

/// The largest page the v3 apps API will return.
const MAX_PAGE_SIZE: usize = 5000;

/// Looks up apps, spaces and space members in the Cloud Controller.
#[derive(Clone, Debug)]
pub struct CcClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AppsResponse {
    resources: Vec<App>,
}

#[derive(Debug, Deserialize)]
struct App {
    guid: String,
    relationships: AppRelationships,
}

#[derive(Debug, Deserialize)]
struct AppRelationships {
    space: Relationship,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    data: RelationshipData,
}

#[derive(Debug, Deserialize)]
struct RelationshipData {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct SpaceResource {
    entity: SpaceEntity,
}

#[derive(Debug, Deserialize)]
struct SpaceEntity {
    name: String,
    organization_guid: String,
}

#[derive(Debug, Deserialize)]
struct SpacesResponse {
    resources: Vec<SpaceResource>,
}

// === impl CcClient ===

impl CcClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn apps(&self, token: &str, app_guids: &[String]) -> Result<AppsResponse> {
        let url = self.url(
            "/v3/apps",
            &[
                ("guids", app_guids.join(",")),
                ("per_page", MAX_PAGE_SIZE.to_string()),
            ],
        )?;
        let apps: AppsResponse = self.http.send(self.http.get(&url, token)?).await?.json()?;
        if apps.resources.len() != app_guids.len() {
            debug!(
                requested = app_guids.len(),
                found = apps.resources.len(),
                "Some apps were not found"
            );
        }
        Ok(apps)
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = http_client::join(&self.base_url, path);
        if query.is_empty() {
            return Ok(url);
        }
        Ok(format!("{url}?{}", serde_urlencoded::to_string(query)?))
    }
}

#[async_trait::async_trait]
impl LookupSpaces for CcClient {
    #[instrument(skip(self, token), fields(apps = app_guids.len()))]
    async fn space_guids(&self, token: &str, app_guids: &[String]) -> Result<Vec<String>> {
        Ok(self.apps(token, app_guids).await?.into_space_guids())
    }

    #[instrument(skip(self, token), fields(apps = app_guids.len()))]
    async fn app_spaces(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<Vec<(String, String)>> {
        Ok(self.apps(token, app_guids).await?.into_app_spaces())
    }

    #[instrument(skip(self, token))]
    async fn space(&self, token: &str, space_guid: &str) -> Result<Option<Space>> {
        let url = self.url(&format!("/v2/spaces/{space_guid}"), &[])?;
        let rsp = self.http.send(self.http.get(&url, token)?).await?;
        if rsp.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let space: SpaceResource = rsp.json()?;
        Ok(Some(space.into()))
    }

    #[instrument(skip(self, token, space), fields(space = %space.name))]
    async fn user_space(
        &self,
        token: &str,
        user_guid: &str,
        space: &Space,
    ) -> Result<Option<Space>> {
        let url = self.url(
            &format!("/v2/users/{user_guid}/spaces"),
            &[
                ("q", format!("name:{}", space.name)),
                ("q", format!("organization_guid:{}", space.org_guid)),
            ],
        )?;
        let spaces: SpacesResponse = self.http.send(self.http.get(&url, token)?).await?.json()?;
        spaces.into_single()
    }
}

// === impl AppsResponse ===

impl AppsResponse {
    fn into_space_guids(self) -> Vec<String> {
        self.resources
            .into_iter()
            .map(|app| {
                tracing::trace!(app = %app.guid, space = %app.relationships.space.data.guid);
                app.relationships.space.data.guid
            })
            .collect()
    }

    fn into_app_spaces(self) -> Vec<(String, String)> {
        self.resources
            .into_iter()
            .map(|app| (app.guid, app.relationships.space.data.guid))
            .collect()
    }
}

// === impl SpacesResponse ===

impl SpacesResponse {
    fn into_single(self) -> Result<Option<Space>> {
        let mut resources = self.resources.into_iter();
        let space = resources.next().map(Space::from);
        if resources.next().is_some() {
            bail!("found more than one matching space");
        }
        Ok(space)
    }
}

impl From<SpaceResource> for Space {
    fn from(SpaceResource { entity }: SpaceResource) -> Self {
        Space {
            name: entity.name,
            org_guid: entity.organization_guid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_app_spaces() {
        let apps: AppsResponse = serde_json::from_str(
            r#"{
                "pagination": { "total_results": 2 },
                "resources": [
                    {
                        "guid": "app-1",
                        "name": "frontend",
                        "relationships": { "space": { "data": { "guid": "space-1" } } }
                    },
                    {
                        "guid": "app-2",
                        "name": "backend",
                        "relationships": { "space": { "data": { "guid": "space-2" } } }
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(apps.into_space_guids(), ["space-1", "space-2"]);
    }

    #[test]
    fn maps_apps_to_spaces() {
        let apps: AppsResponse = serde_json::from_str(
            r#"{
                "resources": [
                    {
                        "guid": "app-1",
                        "relationships": { "space": { "data": { "guid": "space-1" } } }
                    },
                    {
                        "guid": "app-2",
                        "relationships": { "space": { "data": { "guid": "space-1" } } }
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            apps.into_app_spaces(),
            [
                ("app-1".to_string(), "space-1".to_string()),
                ("app-2".to_string(), "space-1".to_string()),
            ]
        );
    }

    #[test]
    fn decodes_v2_space() {
        let space: SpaceResource = serde_json::from_str(
            r#"{
                "metadata": { "guid": "space-guid-1" },
                "entity": { "name": "space-1", "organization_guid": "org-guid-1" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            Space::from(space),
            Space {
                name: "space-1".to_string(),
                org_guid: "org-guid-1".to_string(),
            }
        );
    }

    #[test]
    fn user_spaces() {
        let none: SpacesResponse =
            serde_json::from_str(r#"{ "total_results": 0, "resources": [] }"#).unwrap();
        assert_eq!(none.into_single().unwrap(), None);

        let one: SpacesResponse = serde_json::from_str(
            r#"{
                "total_results": 1,
                "resources": [
                    { "entity": { "name": "space-1", "organization_guid": "org-guid-1" } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            one.into_single().unwrap().map(|s| s.name),
            Some("space-1".to_string())
        );

        let many: SpacesResponse = serde_json::from_str(
            r#"{
                "total_results": 2,
                "resources": [
                    { "entity": { "name": "space-1", "organization_guid": "org-guid-1" } },
                    { "entity": { "name": "space-1", "organization_guid": "org-guid-1" } }
                ]
            }"#,
        )
        .unwrap();
        assert!(many.into_single().is_err());
    }

    #[test]
    fn builds_query_urls() {
        let cc = CcClient::new(
            HttpClient::new(std::time::Duration::from_secs(1), None).unwrap(),
            "http://cc.example.com/",
        );
        assert_eq!(
            cc.url(
                "/v2/users/user-1/spaces",
                &[
                    ("q", "name:space-1".to_string()),
                    ("q", "organization_guid:org-1".to_string()),
                ],
            )
            .unwrap(),
            "http://cc.example.com/v2/users/user-1/spaces?q=name%3Aspace-1&q=organization_guid%3Aorg-1"
        );
    }
}
