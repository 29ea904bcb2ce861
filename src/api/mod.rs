//! Remote API seam for objects and their attributes.
//!
//! The store only talks to the server through [`EntityApi`], so tests can swap
//! in an in-memory implementation.

pub mod client;
#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;

use crate::error::ApiError;
use std::collections::BTreeMap;

use crate::types::{
    Attribute, AttributePayload, AttributeValue, Entity, EntityDetails, EntityPayload,
    IssueAttributeValues, ValueSubmission,
};

/// Object and attribute endpoints, all scoped by workspace slug.
#[async_trait]
pub trait EntityApi: Send + Sync {
    async fn list_entities(&self, scope: &str, project: &str) -> Result<Vec<Entity>, ApiError>;

    async fn create_entity(&self, scope: &str, payload: &EntityPayload)
        -> Result<Entity, ApiError>;

    async fn update_entity(
        &self,
        scope: &str,
        id: &str,
        payload: &EntityPayload,
    ) -> Result<Entity, ApiError>;

    async fn fetch_entity_details(&self, scope: &str, id: &str)
        -> Result<EntityDetails, ApiError>;

    async fn delete_entity(&self, scope: &str, id: &str) -> Result<(), ApiError>;

    /// `payload.parent` names the owner: the object itself for a top-level
    /// attribute, or a select attribute for one of its options.
    async fn create_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        payload: &AttributePayload,
    ) -> Result<Attribute, ApiError>;

    async fn update_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        id: &str,
        payload: &AttributePayload,
    ) -> Result<Attribute, ApiError>;

    async fn delete_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        id: &str,
    ) -> Result<(), ApiError>;

    async fn submit_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
        values: &ValueSubmission,
    ) -> Result<Vec<AttributeValue>, ApiError>;

    /// Attributes that carry values on the issue, each with its stored values.
    async fn fetch_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
    ) -> Result<Vec<IssueAttributeValues>, ApiError>;

    /// Replace stored values, keyed by value id.
    async fn update_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
        updates: &BTreeMap<String, String>,
    ) -> Result<Vec<AttributeValue>, ApiError>;
}
