//! In-memory `EntityApi` for tests. Records every call it receives.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::EntityApi;
use crate::error::ApiError;
use crate::custom_attributes::values::value_type;
use crate::types::{
    Attribute, AttributePayload, AttributeValue, Entity, EntityDetails, EntityPayload,
    IssueAttributeValues, ValueSubmission,
};

#[derive(Default)]
pub(crate) struct FakeApi {
    entities: Mutex<HashMap<String, Entity>>,
    attributes: Mutex<HashMap<String, Vec<Attribute>>>,
    calls: Mutex<Vec<String>>,
    entity_patches: Mutex<Vec<EntityPayload>>,
    /// Stored values per issue.
    values: Mutex<HashMap<String, Vec<AttributeValue>>>,
    /// Response delay for updates, keyed by the patched display name.
    update_delays: Mutex<HashMap<String, u64>>,
    next_entity: AtomicUsize,
    fail: AtomicBool,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_requests(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_update(&self, display_name: &str, millis: u64) {
        self.update_delays
            .lock()
            .insert(display_name.to_string(), millis);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == name).count()
    }

    pub(crate) fn last_entity_patch(&self) -> Option<EntityPayload> {
        self.entity_patches.lock().last().cloned()
    }

    fn record(&self, name: &str) -> Result<(), ApiError> {
        self.calls.lock().push(name.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                message: "Something went wrong please try again later".to_string(),
            });
        }
        Ok(())
    }

    /// Top-level attribute with the given id, across all objects.
    fn find_attribute(&self, id: &str) -> Option<Attribute> {
        self.attributes
            .lock()
            .values()
            .flatten()
            .find(|a| a.id == id)
            .cloned()
    }

    fn not_found(id: &str) -> ApiError {
        ApiError::Status {
            status: 404,
            message: format!("{} not found", id),
        }
    }

    fn build_attribute(id: String, parent: &str, payload: &AttributePayload) -> Attribute {
        Attribute {
            id,
            parent: parent.to_string(),
            display_name: payload.display_name.clone().unwrap_or_default(),
            kind: payload.kind.unwrap_or(crate::custom_attributes::registry::AttributeType::Text),
            description: payload.description.clone().unwrap_or_default(),
            default_value: payload.default_value.clone(),
            extra_settings: payload.extra_settings.clone().unwrap_or_default(),
            is_multi: payload.is_multi.unwrap_or(false),
            is_required: payload.is_required.unwrap_or(false),
            children: Vec::new(),
        }
    }
}

#[async_trait]
impl EntityApi for FakeApi {
    async fn list_entities(&self, _scope: &str, project: &str) -> Result<Vec<Entity>, ApiError> {
        self.record("list_entities")?;
        Ok(self
            .entities
            .lock()
            .values()
            .filter(|e| e.project.as_deref() == Some(project))
            .cloned()
            .collect())
    }

    async fn create_entity(
        &self,
        _scope: &str,
        payload: &EntityPayload,
    ) -> Result<Entity, ApiError> {
        self.record("create_entity")?;
        let id = format!("E{}", self.next_entity.fetch_add(1, Ordering::SeqCst) + 1);
        let mut entity = Entity {
            id: Some(id.clone()),
            created_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        entity.apply_patch(payload);
        // Server-side normalization.
        entity.display_name = entity.display_name.trim().to_string();
        self.entities.lock().insert(id.clone(), entity.clone());
        self.attributes.lock().insert(id, Vec::new());
        Ok(entity)
    }

    async fn update_entity(
        &self,
        _scope: &str,
        id: &str,
        payload: &EntityPayload,
    ) -> Result<Entity, ApiError> {
        self.record("update_entity")?;
        self.entity_patches.lock().push(payload.clone());

        let delay = payload
            .display_name
            .as_ref()
            .and_then(|name| self.update_delays.lock().get(name).copied());
        if let Some(millis) = delay {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        let mut entities = self.entities.lock();
        let entity = entities.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        entity.apply_patch(payload);
        entity.updated_at = Some(chrono::Utc::now());
        Ok(entity.clone())
    }

    async fn fetch_entity_details(
        &self,
        _scope: &str,
        id: &str,
    ) -> Result<EntityDetails, ApiError> {
        self.record("fetch_entity_details")?;
        let entity = self
            .entities
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found(id))?;
        let children = self.attributes.lock().get(id).cloned().unwrap_or_default();
        Ok(EntityDetails { entity, children })
    }

    async fn delete_entity(&self, _scope: &str, id: &str) -> Result<(), ApiError> {
        self.record("delete_entity")?;
        self.entities
            .lock()
            .remove(id)
            .ok_or_else(|| Self::not_found(id))?;
        self.attributes.lock().remove(id);
        Ok(())
    }

    async fn create_entity_attribute(
        &self,
        _scope: &str,
        parent: &str,
        payload: &AttributePayload,
    ) -> Result<Attribute, ApiError> {
        self.record("create_entity_attribute")?;
        let owner = payload.parent.as_deref().unwrap_or(parent);
        let attribute = Self::build_attribute(uuid::Uuid::new_v4().to_string(), owner, payload);

        let mut attributes = self.attributes.lock();
        let attrs = attributes
            .get_mut(parent)
            .ok_or_else(|| Self::not_found(parent))?;
        if owner == parent {
            attrs.push(attribute.clone());
        } else {
            attrs
                .iter_mut()
                .find(|a| a.id == owner)
                .ok_or_else(|| Self::not_found(owner))?
                .children
                .push(attribute.clone());
        }
        Ok(attribute)
    }

    async fn update_entity_attribute(
        &self,
        _scope: &str,
        parent: &str,
        id: &str,
        payload: &AttributePayload,
    ) -> Result<Attribute, ApiError> {
        self.record("update_entity_attribute")?;
        let mut attributes = self.attributes.lock();
        let attrs = attributes
            .get_mut(parent)
            .ok_or_else(|| Self::not_found(parent))?;
        let pos = attrs
            .iter()
            .position(|a| a.id == id || a.children.iter().any(|o| o.id == id))
            .ok_or_else(|| Self::not_found(id))?;
        // Options live in their owner's children.
        let owner = &mut attrs[pos];
        let attribute = if owner.id == id {
            owner
        } else {
            owner
                .children
                .iter_mut()
                .find(|o| o.id == id)
                .ok_or_else(|| Self::not_found(id))?
        };
        if let Some(ref name) = payload.display_name {
            attribute.display_name = name.clone();
        }
        if let Some(ref description) = payload.description {
            attribute.description = description.clone();
        }
        if payload.default_value.is_some() {
            attribute.default_value = payload.default_value.clone();
        }
        if let Some(ref settings) = payload.extra_settings {
            attribute.extra_settings = settings.clone();
        }
        if let Some(required) = payload.is_required {
            attribute.is_required = required;
        }
        Ok(attribute.clone())
    }

    async fn delete_entity_attribute(
        &self,
        _scope: &str,
        parent: &str,
        id: &str,
    ) -> Result<(), ApiError> {
        self.record("delete_entity_attribute")?;
        let mut attributes = self.attributes.lock();
        let attrs = attributes
            .get_mut(parent)
            .ok_or_else(|| Self::not_found(parent))?;
        attrs.retain(|a| a.id != id);
        for attr in attrs.iter_mut() {
            attr.children.retain(|o| o.id != id);
        }
        Ok(())
    }

    async fn submit_attribute_values(
        &self,
        _scope: &str,
        _project: &str,
        issue: &str,
        values: &ValueSubmission,
    ) -> Result<Vec<AttributeValue>, ApiError> {
        self.record("submit_attribute_values")?;

        // Unknown attribute ids are skipped, like the server does.
        let mut saved = Vec::new();
        for (attribute_id, entry) in values {
            let Some(attribute) = self.find_attribute(attribute_id) else {
                continue;
            };
            for value in entry.values() {
                saved.push(AttributeValue {
                    id: Some(uuid::Uuid::new_v4().to_string()),
                    attribute_id: attribute_id.clone(),
                    value: value.to_string(),
                    value_type: value_type(attribute.kind),
                });
            }
        }

        self.values
            .lock()
            .entry(issue.to_string())
            .or_default()
            .extend(saved.iter().cloned());
        Ok(saved)
    }

    async fn fetch_attribute_values(
        &self,
        _scope: &str,
        _project: &str,
        issue: &str,
    ) -> Result<Vec<IssueAttributeValues>, ApiError> {
        self.record("fetch_attribute_values")?;
        let stored = self.values.lock().get(issue).cloned().unwrap_or_default();

        let mut grouped: BTreeMap<String, Vec<AttributeValue>> = BTreeMap::new();
        for value in stored {
            grouped
                .entry(value.attribute_id.clone())
                .or_default()
                .push(value);
        }
        Ok(grouped
            .into_iter()
            .filter_map(|(attribute_id, attribute_values)| {
                self.find_attribute(&attribute_id)
                    .map(|attribute| IssueAttributeValues {
                        attribute,
                        attribute_values,
                    })
            })
            .collect())
    }

    async fn update_attribute_values(
        &self,
        _scope: &str,
        _project: &str,
        issue: &str,
        updates: &BTreeMap<String, String>,
    ) -> Result<Vec<AttributeValue>, ApiError> {
        self.record("update_attribute_values")?;
        let mut values = self.values.lock();
        let rows = values.entry(issue.to_string()).or_default();

        let mut updated = Vec::new();
        for row in rows.iter_mut() {
            if let Some(value) = row.id.as_ref().and_then(|id| updates.get(id)) {
                row.value = value.clone();
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }
}
