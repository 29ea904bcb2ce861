//! Shared state for custom objects and their attributes.
//!
//! The store is the only writer of the object map and the per-object attribute
//! collections. Every write happens after the server confirmed it, so a failed
//! call leaves local state exactly as it was. Each successful mutation is
//! published as a [`StoreEvent`]; views hold a receiver from
//! [`EntityStore::subscribe`] and re-read when something they show changes.
//!
//! In-flight requests are never cancelled. A response that arrives after the
//! view that asked for it went away still merges into the store, and of two
//! overlapping writes to the same object the later response wins.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::api::EntityApi;
use crate::custom_attributes::forms::AttributeForm;
use crate::custom_attributes::registry::{self, AttributeType};
use crate::custom_attributes::values::{is_canonical_uuid, AttributeValues};
use crate::error::{ApiError, StoreError};
use crate::types::{
    Attribute, AttributePayload, AttributeValue, Entity, EntityDetails, EntityPayload,
    IssueAttributeValues, NewAttribute, ValueType, ENTITY_KIND,
};

/// Buffer for change notifications; slow subscribers see `Lagged` and re-read.
const EVENT_CHANNEL_SIZE: usize = 128;

/// Classes of remote operation, each with its own loading flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    FetchEntities,
    CreateEntity,
    UpdateEntity,
    FetchEntityDetails,
    DeleteEntity,
    CreateEntityAttribute,
    UpdateEntityAttribute,
    DeleteEntityAttribute,
    SubmitAttributeValues,
    FetchAttributeValues,
    UpdateAttributeValues,
}

/// Change notification published after the store's maps were updated.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    EntitiesLoaded { project: String },
    EntityChanged { id: String },
    EntityRemoved { id: String },
    AttributesLoaded { entity_id: String },
    AttributeChanged { entity_id: String, attribute_id: String },
    AttributeRemoved { entity_id: String, attribute_id: String },
    AttributeValuesSaved { issue: String, count: usize },
    AttributeValuesLoaded { issue: String, count: usize },
    AttributeValuesUpdated { issue: String, count: usize },
    LoadingChanged { kind: OperationKind, loading: bool },
}

pub struct EntityStore {
    api: Arc<dyn EntityApi>,
    entities: RwLock<HashMap<String, Entity>>,
    /// Absent until the object's details were fetched once.
    entity_attributes: RwLock<HashMap<String, BTreeMap<String, Attribute>>>,
    /// Stored values per issue; absent until fetched.
    issue_values: RwLock<HashMap<String, Vec<AttributeValue>>>,
    pending: Mutex<HashMap<OperationKind, usize>>,
    event_tx: broadcast::Sender<StoreEvent>,
}

/// Keeps an operation kind's loading flag raised while alive.
struct Loading<'a> {
    store: &'a EntityStore,
    kind: OperationKind,
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.store.finish(self.kind);
    }
}

fn require_scope(scope: &str) -> Result<(), StoreError> {
    if scope.trim().is_empty() {
        return Err(StoreError::MissingScope);
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl EntityStore {
    pub fn new(api: Arc<dyn EntityApi>) -> Self {
        let (event_tx, _event_rx) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            api,
            entities: RwLock::new(HashMap::new()),
            entity_attributes: RwLock::new(HashMap::new()),
            issue_values: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No receivers is fine; nobody is looking.
        let _ = self.event_tx.send(event);
    }

    // -------------------------------------------------------------------------
    // Loading flags
    // -------------------------------------------------------------------------

    fn begin(&self, kind: OperationKind) -> Loading<'_> {
        let raised = {
            let mut pending = self.pending.lock();
            let count = pending.entry(kind).or_insert(0);
            *count += 1;
            *count == 1
        };
        if raised {
            self.publish(StoreEvent::LoadingChanged { kind, loading: true });
        }
        Loading { store: self, kind }
    }

    fn finish(&self, kind: OperationKind) {
        let cleared = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&kind) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    pending.remove(&kind);
                    true
                }
                None => false,
            }
        };
        if cleared {
            self.publish(StoreEvent::LoadingChanged { kind, loading: false });
        }
    }

    /// True while at least one operation of `kind` is in flight, for any object.
    pub fn is_loading(&self, kind: OperationKind) -> bool {
        self.pending.lock().contains_key(&kind)
    }

    pub fn any_loading(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.read().get(id).cloned()
    }

    /// Known objects of a project, sorted by name.
    pub fn entities_for_project(&self, project: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .entities
            .read()
            .values()
            .filter(|e| e.project.as_deref() == Some(project))
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        entities
    }

    pub fn has_attributes(&self, entity_id: &str) -> bool {
        self.entity_attributes.read().contains_key(entity_id)
    }

    /// Attributes of an object, or `None` if its details were never fetched.
    pub fn attributes(&self, entity_id: &str) -> Option<Vec<Attribute>> {
        self.entity_attributes
            .read()
            .get(entity_id)
            .map(|attrs| attrs.values().cloned().collect())
    }

    pub fn attribute(&self, entity_id: &str, attribute_id: &str) -> Option<Attribute> {
        self.entity_attributes
            .read()
            .get(entity_id)
            .and_then(|attrs| attrs.get(attribute_id))
            .cloned()
    }

    /// Stored values of an issue, or `None` if they were never fetched.
    pub fn attribute_values(&self, issue: &str) -> Option<Vec<AttributeValue>> {
        self.issue_values.read().get(issue).cloned()
    }

    // -------------------------------------------------------------------------
    // Objects
    // -------------------------------------------------------------------------

    /// Load all objects of a project, replacing what the store knew about it.
    pub async fn fetch_entities(
        &self,
        scope: &str,
        project: &str,
    ) -> Result<Vec<Entity>, StoreError> {
        require_scope(scope)?;
        if project.trim().is_empty() {
            return Err(StoreError::MissingField("project"));
        }

        let _loading = self.begin(OperationKind::FetchEntities);
        let entities = self.api.list_entities(scope, project).await?;

        {
            let mut map = self.entities.write();
            map.retain(|_, e| e.project.as_deref() != Some(project));
            for entity in &entities {
                if let Some(id) = non_empty(entity.id.as_deref()) {
                    map.insert(id.to_string(), entity.clone());
                }
            }
            // Collections of objects the server no longer lists go too.
            self.entity_attributes
                .write()
                .retain(|id, _| map.contains_key(id));
        }

        log::info!("Loaded {} objects for project {}", entities.len(), project);
        self.publish(StoreEvent::EntitiesLoaded {
            project: project.to_string(),
        });
        Ok(entities)
    }

    /// Persist a new object. Needs a non-empty name and an owning project.
    pub async fn create_entity(
        &self,
        scope: &str,
        payload: EntityPayload,
    ) -> Result<Entity, StoreError> {
        require_scope(scope)?;
        if non_empty(payload.display_name.as_deref()).is_none() {
            return Err(StoreError::MissingField("display_name"));
        }
        if non_empty(payload.project.as_deref()).is_none() {
            return Err(StoreError::MissingField("project"));
        }

        let mut payload = payload;
        payload.kind.get_or_insert_with(|| ENTITY_KIND.to_string());

        let _loading = self.begin(OperationKind::CreateEntity);
        let entity = self
            .api
            .create_entity(scope, &payload)
            .await
            .inspect_err(|e| log::warn!("Failed to create object: {}", e))?;

        let id = non_empty(entity.id.as_deref())
            .ok_or_else(|| ApiError::Decode("created object has no id".to_string()))?
            .to_string();

        self.entities.write().insert(id.clone(), entity.clone());
        log::info!("Created object {} ({})", id, entity.display_name);
        self.publish(StoreEvent::EntityChanged { id });
        Ok(entity)
    }

    /// Patch a known object. Only the fields set in `patch` are sent; the
    /// server's answer replaces the local copy.
    pub async fn update_entity(
        &self,
        scope: &str,
        id: &str,
        patch: EntityPayload,
    ) -> Result<Entity, StoreError> {
        require_scope(scope)?;
        if !self.entities.read().contains_key(id) {
            return Err(StoreError::EntityNotFound(id.to_string()));
        }
        if patch.project.is_some() {
            return Err(StoreError::ImmutableField("project"));
        }
        if patch.kind.is_some() {
            return Err(StoreError::ImmutableField("type"));
        }

        let _loading = self.begin(OperationKind::UpdateEntity);
        let entity = self
            .api
            .update_entity(scope, id, &patch)
            .await
            .inspect_err(|e| log::warn!("Failed to update object {}: {}", id, e))?;

        self.entities.write().insert(id.to_string(), entity.clone());
        self.publish(StoreEvent::EntityChanged { id: id.to_string() });
        Ok(entity)
    }

    /// Fetch an object with its attributes, overwriting any cached collection.
    pub async fn fetch_entity_details(
        &self,
        scope: &str,
        id: &str,
    ) -> Result<EntityDetails, StoreError> {
        require_scope(scope)?;
        if id.trim().is_empty() {
            return Err(StoreError::EntityNotPersisted);
        }

        let _loading = self.begin(OperationKind::FetchEntityDetails);
        let details = self
            .api
            .fetch_entity_details(scope, id)
            .await
            .inspect_err(|e| log::warn!("Failed to fetch object {}: {}", id, e))?;

        let attributes: BTreeMap<String, Attribute> = details
            .children
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();
        let count = attributes.len();

        self.entities
            .write()
            .insert(id.to_string(), details.entity.clone());
        self.entity_attributes
            .write()
            .insert(id.to_string(), attributes);

        log::debug!("Fetched object {} with {} attributes", id, count);
        self.publish(StoreEvent::EntityChanged { id: id.to_string() });
        self.publish(StoreEvent::AttributesLoaded {
            entity_id: id.to_string(),
        });
        Ok(details)
    }

    /// Fetch details only if the attribute collection was never loaded.
    /// Returns `None` on a cache hit.
    pub async fn ensure_entity_details(
        &self,
        scope: &str,
        id: &str,
    ) -> Result<Option<EntityDetails>, StoreError> {
        if self.has_attributes(id) {
            log::debug!("Attributes for object {} already loaded", id);
            return Ok(None);
        }
        self.fetch_entity_details(scope, id).await.map(Some)
    }

    pub async fn delete_entity(&self, scope: &str, id: &str) -> Result<(), StoreError> {
        require_scope(scope)?;
        if !self.entities.read().contains_key(id) {
            return Err(StoreError::EntityNotFound(id.to_string()));
        }

        let _loading = self.begin(OperationKind::DeleteEntity);
        self.api
            .delete_entity(scope, id)
            .await
            .inspect_err(|e| log::warn!("Failed to delete object {}: {}", id, e))?;

        self.entities.write().remove(id);
        self.entity_attributes.write().remove(id);
        log::info!("Deleted object {}", id);
        self.publish(StoreEvent::EntityRemoved { id: id.to_string() });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    /// Add an attribute to a persisted object.
    ///
    /// The type tag is resolved before anything is sent; the type's label and
    /// defaults are merged under the caller's overrides. The new attribute is
    /// appended to the parent's collection when that collection is loaded.
    /// An unloaded collection stays unloaded so the next details fetch
    /// brings in the complete set.
    pub async fn create_entity_attribute(
        &self,
        scope: &str,
        request: NewAttribute,
    ) -> Result<Attribute, StoreError> {
        let kind = AttributeType::from_tag(&request.kind)?;
        require_scope(scope)?;
        let parent = non_empty(request.parent.as_deref())
            .ok_or(StoreError::EntityNotPersisted)?
            .to_string();
        if !self.entities.read().contains_key(&parent) {
            return Err(StoreError::EntityNotFound(parent));
        }

        let mut payload = registry::creation_payload(kind, request.overrides);
        payload.parent = Some(parent.clone());

        let _loading = self.begin(OperationKind::CreateEntityAttribute);
        let attribute = self
            .api
            .create_entity_attribute(scope, &parent, &payload)
            .await
            .inspect_err(|e| log::warn!("Failed to add {} attribute to {}: {}", kind, parent, e))?;

        if let Some(collection) = self.entity_attributes.write().get_mut(&parent) {
            collection.insert(attribute.id.clone(), attribute.clone());
        }

        log::info!(
            "Added {} attribute {} to object {}",
            kind,
            attribute.id,
            parent
        );
        self.publish(StoreEvent::AttributeChanged {
            entity_id: parent,
            attribute_id: attribute.id.clone(),
        });
        Ok(attribute)
    }

    /// Patch an attribute. The type and owner are fixed at creation.
    pub async fn update_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        id: &str,
        patch: AttributePayload,
    ) -> Result<Attribute, StoreError> {
        require_scope(scope)?;
        let existing = self
            .attribute(parent, id)
            .ok_or_else(|| StoreError::AttributeNotFound(id.to_string()))?;
        if let Some(kind) = patch.kind {
            if kind != existing.kind {
                return Err(StoreError::AttributeTypeImmutable {
                    from: existing.kind.to_string(),
                    to: kind.to_string(),
                });
            }
        }
        if patch.parent.as_deref().is_some_and(|p| p != parent) {
            return Err(StoreError::ImmutableField("parent"));
        }

        let _loading = self.begin(OperationKind::UpdateEntityAttribute);
        let attribute = self
            .api
            .update_entity_attribute(scope, parent, id, &patch)
            .await
            .inspect_err(|e| log::warn!("Failed to update attribute {}: {}", id, e))?;

        if let Some(collection) = self.entity_attributes.write().get_mut(parent) {
            collection.insert(id.to_string(), attribute.clone());
        }
        self.publish(StoreEvent::AttributeChanged {
            entity_id: parent.to_string(),
            attribute_id: id.to_string(),
        });
        Ok(attribute)
    }

    pub async fn delete_entity_attribute(
        &self,
        scope: &str,
        parent: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        require_scope(scope)?;
        if self.attribute(parent, id).is_none() {
            return Err(StoreError::AttributeNotFound(id.to_string()));
        }

        let _loading = self.begin(OperationKind::DeleteEntityAttribute);
        self.api
            .delete_entity_attribute(scope, parent, id)
            .await
            .inspect_err(|e| log::warn!("Failed to delete attribute {}: {}", id, e))?;

        if let Some(collection) = self.entity_attributes.write().get_mut(parent) {
            collection.remove(id);
        }
        self.publish(StoreEvent::AttributeRemoved {
            entity_id: parent.to_string(),
            attribute_id: id.to_string(),
        });
        Ok(())
    }

    /// Add an option to a select or multi-select attribute. Options are
    /// attributes owned by the select attribute.
    pub async fn create_attribute_option(
        &self,
        scope: &str,
        entity_id: &str,
        attribute_id: &str,
        display_name: &str,
    ) -> Result<Attribute, StoreError> {
        require_scope(scope)?;
        let name = display_name.trim();
        if name.is_empty() {
            return Err(StoreError::MissingField("display_name"));
        }
        let owner = self
            .attribute(entity_id, attribute_id)
            .ok_or_else(|| StoreError::AttributeNotFound(attribute_id.to_string()))?;
        if !owner.kind.has_options() {
            return Err(StoreError::InvalidAttribute(format!(
                "{} attributes have no options",
                owner.kind
            )));
        }

        let payload = AttributePayload {
            parent: Some(attribute_id.to_string()),
            display_name: Some(name.to_string()),
            kind: Some(owner.kind),
            ..Default::default()
        };

        let _loading = self.begin(OperationKind::CreateEntityAttribute);
        let option = self
            .api
            .create_entity_attribute(scope, entity_id, &payload)
            .await
            .inspect_err(|e| log::warn!("Failed to add option to {}: {}", attribute_id, e))?;

        if let Some(owner) = self
            .entity_attributes
            .write()
            .get_mut(entity_id)
            .and_then(|attrs| attrs.get_mut(attribute_id))
        {
            owner.children.push(option.clone());
        }

        log::info!("Added option {} to attribute {}", option.id, attribute_id);
        self.publish(StoreEvent::AttributeChanged {
            entity_id: entity_id.to_string(),
            attribute_id: attribute_id.to_string(),
        });
        Ok(option)
    }

    async fn rename_attribute_option(
        &self,
        scope: &str,
        entity_id: &str,
        attribute_id: &str,
        option_id: &str,
        display_name: &str,
    ) -> Result<Attribute, StoreError> {
        let patch = AttributePayload {
            display_name: Some(display_name.trim().to_string()),
            ..Default::default()
        };

        let _loading = self.begin(OperationKind::UpdateEntityAttribute);
        let option = self
            .api
            .update_entity_attribute(scope, entity_id, option_id, &patch)
            .await
            .inspect_err(|e| log::warn!("Failed to rename option {}: {}", option_id, e))?;

        if let Some(existing) = self
            .entity_attributes
            .write()
            .get_mut(entity_id)
            .and_then(|attrs| attrs.get_mut(attribute_id))
            .and_then(|owner| owner.children.iter_mut().find(|o| o.id == option_id))
        {
            *existing = option.clone();
        }
        Ok(option)
    }

    pub async fn delete_attribute_option(
        &self,
        scope: &str,
        entity_id: &str,
        attribute_id: &str,
        option_id: &str,
    ) -> Result<(), StoreError> {
        require_scope(scope)?;
        let owner = self
            .attribute(entity_id, attribute_id)
            .ok_or_else(|| StoreError::AttributeNotFound(attribute_id.to_string()))?;
        if !owner.children.iter().any(|o| o.id == option_id) {
            return Err(StoreError::AttributeNotFound(option_id.to_string()));
        }

        let _loading = self.begin(OperationKind::DeleteEntityAttribute);
        self.api
            .delete_entity_attribute(scope, entity_id, option_id)
            .await
            .inspect_err(|e| log::warn!("Failed to delete option {}: {}", option_id, e))?;

        if let Some(owner) = self
            .entity_attributes
            .write()
            .get_mut(entity_id)
            .and_then(|attrs| attrs.get_mut(attribute_id))
        {
            owner.children.retain(|o| o.id != option_id);
        }
        self.publish(StoreEvent::AttributeChanged {
            entity_id: entity_id.to_string(),
            attribute_id: attribute_id.to_string(),
        });
        Ok(())
    }

    /// Persist an edited settings form: option additions, renames and
    /// removals first, then the attribute patch.
    pub async fn save_attribute_form(
        &self,
        scope: &str,
        entity_id: &str,
        attribute_id: &str,
        form: &AttributeForm,
    ) -> Result<Attribute, StoreError> {
        require_scope(scope)?;
        let existing = self
            .attribute(entity_id, attribute_id)
            .ok_or_else(|| StoreError::AttributeNotFound(attribute_id.to_string()))?;
        if form.kind() != existing.kind {
            return Err(StoreError::AttributeTypeImmutable {
                from: existing.kind.to_string(),
                to: form.kind().to_string(),
            });
        }
        let payload = form.to_payload()?;

        if let Some(options) = form.options() {
            let kept: HashSet<&str> = options.iter().filter_map(|o| o.id.as_deref()).collect();
            for stale in existing
                .children
                .iter()
                .filter(|o| !kept.contains(o.id.as_str()))
            {
                self.delete_attribute_option(scope, entity_id, attribute_id, &stale.id)
                    .await?;
            }
            for option in options {
                match option.id.as_deref() {
                    None => {
                        self.create_attribute_option(
                            scope,
                            entity_id,
                            attribute_id,
                            &option.display_name,
                        )
                        .await?;
                    }
                    Some(id) => {
                        let renamed = existing
                            .children
                            .iter()
                            .any(|o| o.id == id && o.display_name != option.display_name.trim());
                        if renamed {
                            self.rename_attribute_option(
                                scope,
                                entity_id,
                                attribute_id,
                                id,
                                &option.display_name,
                            )
                            .await?;
                        }
                    }
                }
            }
        }

        self.update_entity_attribute(scope, entity_id, attribute_id, payload)
            .await
    }

    // -------------------------------------------------------------------------
    // Attribute values
    // -------------------------------------------------------------------------

    /// Save attribute values for one issue.
    pub async fn submit_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
        values: &AttributeValues,
    ) -> Result<Vec<AttributeValue>, StoreError> {
        require_scope(scope)?;
        if project.trim().is_empty() {
            return Err(StoreError::MissingField("project"));
        }
        if issue.trim().is_empty() {
            return Err(StoreError::MissingField("issue"));
        }
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let _loading = self.begin(OperationKind::SubmitAttributeValues);
        let saved = self
            .api
            .submit_attribute_values(scope, project, issue, &values.to_submission())
            .await
            .inspect_err(|e| log::warn!("Failed to save values for issue {}: {}", issue, e))?;

        if let Some(rows) = self.issue_values.write().get_mut(issue) {
            rows.extend(saved.iter().cloned());
        }

        self.publish(StoreEvent::AttributeValuesSaved {
            issue: issue.to_string(),
            count: saved.len(),
        });
        Ok(saved)
    }

    /// Load the attributes carrying values on an issue, replacing the cached
    /// values of that issue.
    pub async fn fetch_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
    ) -> Result<Vec<IssueAttributeValues>, StoreError> {
        require_scope(scope)?;
        if project.trim().is_empty() {
            return Err(StoreError::MissingField("project"));
        }
        if issue.trim().is_empty() {
            return Err(StoreError::MissingField("issue"));
        }

        let _loading = self.begin(OperationKind::FetchAttributeValues);
        let attributes = self
            .api
            .fetch_attribute_values(scope, project, issue)
            .await
            .inspect_err(|e| log::warn!("Failed to load values for issue {}: {}", issue, e))?;

        let rows: Vec<AttributeValue> = attributes
            .iter()
            .flat_map(|a| a.attribute_values.iter().cloned())
            .collect();
        let count = rows.len();
        self.issue_values.write().insert(issue.to_string(), rows);

        log::debug!("Loaded {} values for issue {}", count, issue);
        self.publish(StoreEvent::AttributeValuesLoaded {
            issue: issue.to_string(),
            count,
        });
        Ok(attributes)
    }

    /// Replace stored values, keyed by value id. When the issue's values are
    /// loaded, every id must be one of them and UUID-typed values must stay
    /// UUIDs.
    pub async fn update_attribute_values(
        &self,
        scope: &str,
        project: &str,
        issue: &str,
        updates: BTreeMap<String, String>,
    ) -> Result<Vec<AttributeValue>, StoreError> {
        require_scope(scope)?;
        if project.trim().is_empty() {
            return Err(StoreError::MissingField("project"));
        }
        if issue.trim().is_empty() {
            return Err(StoreError::MissingField("issue"));
        }
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(rows) = self.attribute_values(issue) {
            for (value_id, value) in &updates {
                let row = rows
                    .iter()
                    .find(|r| r.id.as_deref() == Some(value_id.as_str()))
                    .ok_or_else(|| StoreError::AttributeValueNotFound(value_id.clone()))?;
                if row.value_type == ValueType::Uuid && !is_canonical_uuid(value) {
                    return Err(StoreError::InvalidValue {
                        attribute_id: row.attribute_id.clone(),
                        reason: format!("'{}' is not a UUID", value),
                    });
                }
            }
        }

        let _loading = self.begin(OperationKind::UpdateAttributeValues);
        let updated = self
            .api
            .update_attribute_values(scope, project, issue, &updates)
            .await
            .inspect_err(|e| log::warn!("Failed to update values for issue {}: {}", issue, e))?;

        if let Some(rows) = self.issue_values.write().get_mut(issue) {
            for value in &updated {
                if let Some(row) = rows.iter_mut().find(|r| r.id.is_some() && r.id == value.id) {
                    *row = value.clone();
                }
            }
        }

        self.publish(StoreEvent::AttributeValuesUpdated {
            issue: issue.to_string(),
            count: updated.len(),
        });
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::api::EntityApi;
    use crate::custom_attributes::forms::{SelectOption, TypeSettings};

    fn store_with(api: Arc<FakeApi>) -> EntityStore {
        EntityStore::new(api)
    }

    fn bug_payload() -> EntityPayload {
        EntityPayload {
            display_name: Some("Bug".into()),
            project: Some("P1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_entity_stores_server_copy() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());

        let entity = store.create_entity("W1", bug_payload()).await.unwrap();

        assert_eq!(entity.id.as_deref(), Some("E1"));
        assert_eq!(entity.kind, "entity");
        assert_eq!(store.entity("E1").unwrap().display_name, "Bug");
        assert_eq!(api.call_count("create_entity"), 1);
    }

    #[tokio::test]
    async fn test_create_entity_requires_name_project_and_scope() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());

        let no_name = EntityPayload {
            display_name: Some("  ".into()),
            project: Some("P1".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.create_entity("W1", no_name).await,
            Err(StoreError::MissingField("display_name"))
        ));

        let no_project = EntityPayload {
            display_name: Some("Bug".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.create_entity("W1", no_project).await,
            Err(StoreError::MissingField("project"))
        ));

        assert!(matches!(
            store.create_entity("", bug_payload()).await,
            Err(StoreError::MissingScope)
        ));

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_leaves_store_untouched() {
        let api = Arc::new(FakeApi::new());
        api.fail_requests(true);
        let store = store_with(api.clone());

        let result = store.create_entity("W1", bug_payload()).await;

        assert!(matches!(result, Err(StoreError::Api(ApiError::Status { status: 500, .. }))));
        assert!(store.entities_for_project("P1").is_empty());
        assert!(!store.is_loading(OperationKind::CreateEntity));
    }

    #[tokio::test]
    async fn test_attribute_rejected_for_draft() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());

        let result = store
            .create_entity_attribute("W1", NewAttribute::new(None, "text"))
            .await;
        assert!(matches!(result, Err(StoreError::EntityNotPersisted)));

        let result = store
            .create_entity_attribute("W1", NewAttribute::new(Some(""), "text"))
            .await;
        assert!(matches!(result, Err(StoreError::EntityNotPersisted)));

        assert_eq!(api.call_count("create_entity_attribute"), 0);
    }

    #[tokio::test]
    async fn test_unknown_attribute_type_fails_before_network() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();

        let result = store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "rating"))
            .await;

        assert!(matches!(result, Err(StoreError::UnknownAttributeType(_))));
        assert_eq!(api.call_count("create_entity_attribute"), 0);
    }

    #[tokio::test]
    async fn test_ensure_details_is_cache_once() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();

        let first = store.ensure_entity_details("W1", "E1").await.unwrap();
        let second = store.ensure_entity_details("W1", "E1").await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(api.call_count("fetch_entity_details"), 1);
    }

    #[tokio::test]
    async fn test_update_is_partial_patch() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        let mut payload = bug_payload();
        payload.description = Some("Defects found in QA".into());
        payload.icon = Some("1f41e".into());
        store.create_entity("W1", payload).await.unwrap();

        let updated = store
            .update_entity(
                "W1",
                "E1",
                EntityPayload {
                    display_name: Some("Defect".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.display_name, "Defect");
        let stored = store.entity("E1").unwrap();
        assert_eq!(stored.description, "Defects found in QA");
        assert_eq!(stored.icon.as_deref(), Some("1f41e"));
        assert_eq!(stored.project.as_deref(), Some("P1"));
        assert_eq!(
            api.last_entity_patch().unwrap(),
            EntityPayload {
                display_name: Some("Defect".into()),
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_and_immutable() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());

        let result = store
            .update_entity("W1", "E9", EntityPayload::default())
            .await;
        assert!(matches!(result, Err(StoreError::EntityNotFound(_))));

        store.create_entity("W1", bug_payload()).await.unwrap();
        let result = store
            .update_entity(
                "W1",
                "E1",
                EntityPayload {
                    project: Some("P2".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::ImmutableField("project"))));
        assert_eq!(api.call_count("update_entity"), 0);
    }

    #[tokio::test]
    async fn test_last_response_wins() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();

        // Issued first but answered last.
        api.delay_update("Slow", 60);
        api.delay_update("Fast", 5);

        let slow = store.update_entity(
            "W1",
            "E1",
            EntityPayload {
                display_name: Some("Slow".into()),
                ..Default::default()
            },
        );
        let fast = store.update_entity(
            "W1",
            "E1",
            EntityPayload {
                display_name: Some("Fast".into()),
                ..Default::default()
            },
        );
        let (slow, fast) = tokio::join!(slow, fast);
        slow.unwrap();
        fast.unwrap();

        assert_eq!(store.entity("E1").unwrap().display_name, "Slow");
    }

    #[tokio::test]
    async fn test_attribute_defaults_from_registry() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();

        let attribute = store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "checkbox"))
            .await
            .unwrap();

        assert_eq!(attribute.display_name, "Checkbox");
        assert_eq!(attribute.default_value.as_deref(), Some("checked"));
        assert_eq!(attribute.extra_settings["representation"], "check");
    }

    #[tokio::test]
    async fn test_end_to_end_object_with_text_attribute() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());

        let entity = store.create_entity("W1", bug_payload()).await.unwrap();
        let id = entity.id.unwrap();
        assert_eq!(id, "E1");

        store.fetch_entity_details("W1", &id).await.unwrap();
        assert_eq!(store.attributes(&id), Some(Vec::new()));

        let attribute = store
            .create_entity_attribute("W1", NewAttribute::new(Some(&id), "text"))
            .await
            .unwrap();

        let attributes = store.attributes(&id).unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].id, attribute.id);
        assert_eq!(attributes[0].kind, AttributeType::Text);
        assert_eq!(attributes[0].parent, "E1");
        assert_eq!(attributes[0].display_name, "Text");
    }

    #[tokio::test]
    async fn test_attribute_not_cached_before_details_fetch() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();

        store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "text"))
            .await
            .unwrap();
        assert!(!store.has_attributes("E1"));

        let details = store.ensure_entity_details("W1", "E1").await.unwrap().unwrap();
        assert_eq!(details.children.len(), 1);
    }

    #[tokio::test]
    async fn test_attribute_type_is_immutable() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        let attribute = store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "text"))
            .await
            .unwrap();

        let result = store
            .update_entity_attribute(
                "W1",
                "E1",
                &attribute.id,
                AttributePayload {
                    kind: Some(AttributeType::Number),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::AttributeTypeImmutable { .. })));

        let renamed = store
            .update_entity_attribute(
                "W1",
                "E1",
                &attribute.id,
                AttributePayload {
                    display_name: Some("Summary".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.display_name, "Summary");
        assert_eq!(
            store.attribute("E1", &attribute.id).unwrap().display_name,
            "Summary"
        );
    }

    #[tokio::test]
    async fn test_delete_attribute_and_entity() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        let attribute = store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "url"))
            .await
            .unwrap();

        store
            .delete_entity_attribute("W1", "E1", &attribute.id)
            .await
            .unwrap();
        assert_eq!(store.attributes("E1"), Some(Vec::new()));

        store.delete_entity("W1", "E1").await.unwrap();
        assert!(store.entity("E1").is_none());
        assert!(!store.has_attributes("E1"));
    }

    #[tokio::test]
    async fn test_fetch_entities_replaces_project_objects() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        let mut task = bug_payload();
        task.display_name = Some("Asset".into());
        store.create_entity("W1", task).await.unwrap();

        let listed = store.fetch_entities("W1", "P1").await.unwrap();

        assert_eq!(listed.len(), 2);
        let names: Vec<_> = store
            .entities_for_project("P1")
            .into_iter()
            .map(|e| e.display_name)
            .collect();
        assert_eq!(names, vec!["Asset", "Bug"]);
    }

    #[tokio::test]
    async fn test_events_and_loading_flags() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        let mut rx = store.subscribe();

        store.create_entity("W1", bug_payload()).await.unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::LoadingChanged {
                kind: OperationKind::CreateEntity,
                loading: true
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::EntityChanged { id: "E1".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::LoadingChanged {
                kind: OperationKind::CreateEntity,
                loading: false
            }
        );
        assert!(!store.any_loading());
    }

    #[tokio::test]
    async fn test_loading_flag_spans_overlapping_calls() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        api.delay_update("Slow", 40);
        api.delay_update("Fast", 5);

        let slow = store.update_entity(
            "W1",
            "E1",
            EntityPayload {
                display_name: Some("Slow".into()),
                ..Default::default()
            },
        );
        let fast = async {
            store
                .update_entity(
                    "W1",
                    "E1",
                    EntityPayload {
                        display_name: Some("Fast".into()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            // The slow call is still pending.
            store.is_loading(OperationKind::UpdateEntity)
        };
        let (slow, still_loading) = tokio::join!(slow, fast);
        slow.unwrap();

        assert!(still_loading);
        assert!(!store.is_loading(OperationKind::UpdateEntity));
    }

    #[tokio::test]
    async fn test_submit_attribute_values() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        let mut overrides = AttributePayload::default();
        overrides.display_name = Some("Notes".into());
        let notes = store
            .create_entity_attribute(
                "W1",
                NewAttribute::new(Some("E1"), "text").with_overrides(overrides),
            )
            .await
            .unwrap();

        let mut values = AttributeValues::new();
        values.set(&notes, &["Reproducible on staging"]).unwrap();

        let saved = store
            .submit_attribute_values("W1", "P1", "ISSUE-1", &values)
            .await
            .unwrap();

        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].value_type, ValueType::Text);
        assert_eq!(api.call_count("submit_attribute_values"), 1);

        let empty = store
            .submit_attribute_values("W1", "P1", "ISSUE-1", &AttributeValues::new())
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert_eq!(api.call_count("submit_attribute_values"), 1);
    }

    async fn store_with_select(api: Arc<FakeApi>) -> (EntityStore, Attribute) {
        let store = store_with(api);
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        let mut overrides = AttributePayload::default();
        overrides.display_name = Some("Severity".into());
        let severity = store
            .create_entity_attribute(
                "W1",
                NewAttribute::new(Some("E1"), "select").with_overrides(overrides),
            )
            .await
            .unwrap();
        (store, severity)
    }

    #[tokio::test]
    async fn test_select_options_saved_through_form() {
        let api = Arc::new(FakeApi::new());
        let (store, severity) = store_with_select(api.clone()).await;

        let mut form = AttributeForm::for_attribute(&severity);
        form.options_mut().unwrap().push(SelectOption::new("High"));
        form.options_mut().unwrap().push(SelectOption::new("Low"));
        store
            .save_attribute_form("W1", "E1", &severity.id, &form)
            .await
            .unwrap();

        let saved = store.attribute("E1", &severity.id).unwrap();
        let names: Vec<_> = saved.children.iter().map(|o| o.display_name.as_str()).collect();
        assert_eq!(names, vec!["High", "Low"]);
        assert!(saved.children.iter().all(|o| o.parent == severity.id));

        // The saved option can now be the default and a stored value.
        let high = saved.children[0].id.clone();
        let mut form = AttributeForm::for_attribute(&saved);
        if let TypeSettings::Select(ref mut s) = form.settings {
            s.default_value = Some(high.clone());
        }
        let updated = store
            .save_attribute_form("W1", "E1", &severity.id, &form)
            .await
            .unwrap();
        assert_eq!(updated.default_value.as_deref(), Some(high.as_str()));

        let mut values = AttributeValues::new();
        values.set(&updated, &[high.as_str()]).unwrap();
        let rows = store
            .submit_attribute_values("W1", "P1", "ISSUE-1", &values)
            .await
            .unwrap();
        assert_eq!(rows[0].value_type, ValueType::Uuid);
    }

    #[tokio::test]
    async fn test_form_renames_and_removes_options() {
        let api = Arc::new(FakeApi::new());
        let (store, severity) = store_with_select(api.clone()).await;
        store
            .create_attribute_option("W1", "E1", &severity.id, "High")
            .await
            .unwrap();
        store
            .create_attribute_option("W1", "E1", &severity.id, "Low")
            .await
            .unwrap();

        let mut form = AttributeForm::for_attribute(&store.attribute("E1", &severity.id).unwrap());
        let options = form.options_mut().unwrap();
        options.retain(|o| o.display_name != "Low");
        options[0].display_name = "Critical".into();
        store
            .save_attribute_form("W1", "E1", &severity.id, &form)
            .await
            .unwrap();

        let saved = store.attribute("E1", &severity.id).unwrap();
        assert_eq!(saved.children.len(), 1);
        assert_eq!(saved.children[0].display_name, "Critical");
        assert_eq!(api.call_count("delete_entity_attribute"), 1);
    }

    #[tokio::test]
    async fn test_options_only_on_select_types() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        let notes = store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "text"))
            .await
            .unwrap();

        let result = store
            .create_attribute_option("W1", "E1", &notes.id, "High")
            .await;

        assert!(matches!(result, Err(StoreError::InvalidAttribute(_))));
        assert_eq!(api.call_count("create_entity_attribute"), 1);
    }

    #[tokio::test]
    async fn test_fetch_entities_drops_stale_collections() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        let mut asset = bug_payload();
        asset.display_name = Some("Asset".into());
        store.create_entity("W1", asset).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        store.fetch_entity_details("W1", "E2").await.unwrap();

        // Removed by someone else.
        api.delete_entity("W1", "E2").await.unwrap();
        store.fetch_entities("W1", "P1").await.unwrap();

        assert!(store.has_attributes("E1"));
        assert!(!store.has_attributes("E2"));
        assert!(store.entity("E2").is_none());
    }

    #[tokio::test]
    async fn test_fetch_and_update_attribute_values() {
        let api = Arc::new(FakeApi::new());
        let store = store_with(api.clone());
        store.create_entity("W1", bug_payload()).await.unwrap();
        store.fetch_entity_details("W1", "E1").await.unwrap();
        let notes = store
            .create_entity_attribute("W1", NewAttribute::new(Some("E1"), "text"))
            .await
            .unwrap();
        let mut values = AttributeValues::new();
        values.set(&notes, &["Flaky on CI"]).unwrap();
        store
            .submit_attribute_values("W1", "P1", "ISSUE-1", &values)
            .await
            .unwrap();
        assert!(store.attribute_values("ISSUE-1").is_none());

        let mut rx = store.subscribe();
        let read = store
            .fetch_attribute_values("W1", "P1", "ISSUE-1")
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].attribute.id, notes.id);
        assert_eq!(read[0].attribute_values[0].value, "Flaky on CI");
        assert!(!store.is_loading(OperationKind::FetchAttributeValues));

        let value_id = read[0].attribute_values[0].id.clone().unwrap();
        let updated = store
            .update_attribute_values(
                "W1",
                "P1",
                "ISSUE-1",
                BTreeMap::from([(value_id.clone(), "Fixed".to_string())]),
            )
            .await
            .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(store.attribute_values("ISSUE-1").unwrap()[0].value, "Fixed");

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&StoreEvent::AttributeValuesLoaded {
            issue: "ISSUE-1".into(),
            count: 1
        }));
        assert!(events.contains(&StoreEvent::AttributeValuesUpdated {
            issue: "ISSUE-1".into(),
            count: 1
        }));
    }

    #[tokio::test]
    async fn test_update_values_checked_against_loaded_rows() {
        let api = Arc::new(FakeApi::new());
        let (store, severity) = store_with_select(api.clone()).await;
        let high = store
            .create_attribute_option("W1", "E1", &severity.id, "High")
            .await
            .unwrap();
        let mut values = AttributeValues::new();
        values.set(&severity, &[high.id.as_str()]).unwrap();
        store
            .submit_attribute_values("W1", "P1", "ISSUE-1", &values)
            .await
            .unwrap();
        let read = store
            .fetch_attribute_values("W1", "P1", "ISSUE-1")
            .await
            .unwrap();
        let value_id = read[0].attribute_values[0].id.clone().unwrap();

        let unknown = store
            .update_attribute_values(
                "W1",
                "P1",
                "ISSUE-1",
                BTreeMap::from([("V404".to_string(), "x".to_string())]),
            )
            .await;
        assert!(matches!(unknown, Err(StoreError::AttributeValueNotFound(_))));

        let not_uuid = store
            .update_attribute_values(
                "W1",
                "P1",
                "ISSUE-1",
                BTreeMap::from([(value_id, "Critical".to_string())]),
            )
            .await;
        assert!(matches!(not_uuid, Err(StoreError::InvalidValue { .. })));
        assert_eq!(api.call_count("update_attribute_values"), 0);
    }
}
