//! HTTP client for the workspace objects API.
//!
//! Uses reqwest with an optional `X-Api-Key` header. All routes hang off
//! `{api_base_url}/api/workspaces/{slug}/`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Instrument;
use url::Url;

use super::EntityApi;
use crate::error::ApiError;
use crate::types::{
    Attribute, AttributePayload, AttributeValue, Config, Entity, EntityDetails, EntityPayload,
    IssueAttributeValues, ValueSubmission,
};

pub struct HttpEntityApi {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpEntityApi {
    pub fn new(
        base_url: &str,
        api_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_token: api_token.map(str::to_string),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(
            &config.api_base_url,
            config.api_token.as_deref(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Absolute URL for a path below the workspace root.
    fn workspace_url(&self, scope: &str, path: &str) -> Result<Url, ApiError> {
        Ok(self
            .base_url
            .join(&format!("api/workspaces/{}/{}", scope, path))?)
    }

    fn values_url(&self, scope: &str, project: &str, issue: &str) -> Result<Url, ApiError> {
        self.workspace_url(
            scope,
            &format!("projects/{}/issues/{}/attribute-values/", project, issue),
        )
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.api_token {
            Some(ref token) => builder.header("X-Api-Key", token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.checked(builder).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(method, url).json(body)).await
    }

    /// Send and turn non-2xx responses into `ApiError::Status`.
    async fn checked(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let request = builder.build()?;
        let span = tracing::debug_span!(
            "objects_api",
            method = %request.method(),
            url = %request.url()
        );
        log::debug!("{} {}", request.method(), request.url());

        let resp = self.client.execute(request).instrument(span).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(resp)
    }
}

/// Pull `{"error": "..."}` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl EntityApi for HttpEntityApi {
    async fn list_entities(&self, scope: &str, project: &str) -> Result<Vec<Entity>, ApiError> {
        let mut url = self.workspace_url(scope, "entities/")?;
        url.query_pairs_mut().append_pair("project", project);
        self.send(self.request(Method::GET, url)).await
    }

    async fn create_entity(
        &self,
        scope: &str,
        payload: &EntityPayload,
    ) -> Result<Entity, ApiError> {
        let url = self.workspace_url(scope, "entities/")?;
        self.send_json(Method::POST, url, payload).await
    }

    async fn update_entity(
        &self,
        scope: &str,
        id: &str,
        payload: &EntityPayload,
    ) -> Result<Entity, ApiError> {
        let url = self.workspace_url(scope, &format!("entities/{}/", id))?;
        self.send_json(Method::PATCH, url, payload).await
    }

    async fn fetch_entity_details(
        &self,
        scope: &str,
        id: &str,
    ) -> Result<EntityDetails, ApiError> {
        let url = self.workspace_url(scope, &format!("entities/{}/", id))?;
        self.send(self.request(Method::GET, url)).await
    }

    async fn delete_entity(&self, scope: &str, id: &str) -> Result<(), ApiError> {
        let url = self.workspace_url(scope, &format!("entities/{}/", id))?;
        self.checked(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn create_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        payload: &AttributePayload,
    ) -> Result<Attribute, ApiError> {
        let url = self.workspace_url(scope, &format!("entities/{}/attributes/", parent))?;
        self.send_json(Method::POST, url, payload).await
    }

    async fn update_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        id: &str,
        payload: &AttributePayload,
    ) -> Result<Attribute, ApiError> {
        let url =
            self.workspace_url(scope, &format!("entities/{}/attributes/{}/", parent, id))?;
        self.send_json(Method::PATCH, url, payload).await
    }

    async fn delete_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        id: &str,
    ) -> Result<(), ApiError> {
        let url =
            self.workspace_url(scope, &format!("entities/{}/attributes/{}/", parent, id))?;
        self.checked(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn submit_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
        values: &ValueSubmission,
    ) -> Result<Vec<AttributeValue>, ApiError> {
        let url = self.values_url(scope, project, issue)?;
        let body = serde_json::json!({ "attribute_values": values });
        self.send_json(Method::POST, url, &body).await
    }

    async fn fetch_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
    ) -> Result<Vec<IssueAttributeValues>, ApiError> {
        let url = self.values_url(scope, project, issue)?;
        self.send(self.request(Method::GET, url)).await
    }

    async fn update_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
        updates: &BTreeMap<String, String>,
    ) -> Result<Vec<AttributeValue>, ApiError> {
        let url = self.values_url(scope, project, issue)?;
        let body = serde_json::json!({ "attribute_values": updates });
        self.send_json(Method::PATCH, url, &body).await
    }
}
