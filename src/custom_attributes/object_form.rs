//! Create/edit flow for a single custom object.
//!
//! The form owns an explicit draft plus the set of fields the user changed.
//! It never writes to the store's maps itself; it asks the store and folds the
//! server's answer back into the draft.
//!
//! ```text
//! Empty ──edit──▶ Editing ──submit──▶ Submitting ──ok──▶ Persisted
//!                    ▲                     │
//!                    └──edit── Error ◀─err─┘
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use super::forms::AttributeForm;
use crate::error::{ErrorReport, StoreError};
use crate::store::{EntityStore, OperationKind};
use crate::types::{Attribute, Entity, EntityPayload, NewAttribute, ENTITY_KIND};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormState {
    Empty,
    Editing,
    Submitting,
    Persisted,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DraftField {
    DisplayName,
    Description,
    Icon,
}

/// Local copy of the object being edited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDraft {
    pub id: Option<String>,
    pub display_name: String,
    pub description: String,
    pub icon: Option<String>,
}

impl EntityDraft {
    /// Fold a server copy over the draft. The server wins every field.
    fn reconcile(&mut self, entity: &Entity) {
        if entity.is_persisted() {
            self.id = entity.id.clone();
        }
        self.display_name = entity.display_name.clone();
        self.description = entity.description.clone();
        self.icon = entity.icon.clone();
    }
}

/// Where the form was opened: the workspace and project from the current route.
#[derive(Debug, Clone, Default)]
pub struct FormContext {
    pub workspace: Option<String>,
    pub project: Option<String>,
}

impl FormContext {
    pub fn new(workspace: Option<&str>, project: Option<&str>) -> Self {
        Self {
            workspace: workspace.map(str::to_string),
            project: project.map(str::to_string),
        }
    }

    fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref().filter(|w| !w.is_empty())
    }

    fn project(&self) -> Option<&str> {
        self.project.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A guard failed (no workspace, no project, nothing changed); nothing was sent.
    Skipped,
    Created(Entity),
    Updated(Entity),
}

pub struct ObjectForm {
    store: Arc<EntityStore>,
    context: FormContext,
    draft: EntityDraft,
    dirty: BTreeSet<DraftField>,
    state: FormState,
    last_error: Option<ErrorReport>,
}

impl ObjectForm {
    /// Form for a new object.
    pub fn new(store: Arc<EntityStore>, context: FormContext) -> Self {
        Self {
            store,
            context,
            draft: EntityDraft::default(),
            dirty: BTreeSet::new(),
            state: FormState::Empty,
            last_error: None,
        }
    }

    /// Form for an object that already exists on the server. Call
    /// [`load_details`](Self::load_details) to fill in its fields.
    pub fn open_existing(store: Arc<EntityStore>, context: FormContext, id: &str) -> Self {
        let mut form = Self::new(store, context);
        form.draft.id = Some(id.to_string());
        if let Some(entity) = form.store.entity(id) {
            form.draft.reconcile(&entity);
        }
        form.state = FormState::Persisted;
        form
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn draft(&self) -> &EntityDraft {
        &self.draft
    }

    pub fn dirty_fields(&self) -> &BTreeSet<DraftField> {
        &self.dirty
    }

    pub fn last_error(&self) -> Option<&ErrorReport> {
        self.last_error.as_ref()
    }

    fn persisted_id(&self) -> Option<String> {
        self.draft.id.clone().filter(|id| !id.is_empty())
    }

    // -------------------------------------------------------------------------
    // Edits
    // -------------------------------------------------------------------------

    pub fn set_display_name(&mut self, value: impl Into<String>) {
        self.draft.display_name = value.into();
        self.touch(DraftField::DisplayName);
    }

    pub fn set_description(&mut self, value: impl Into<String>) {
        self.draft.description = value.into();
        self.touch(DraftField::Description);
    }

    pub fn set_icon(&mut self, value: Option<String>) {
        self.draft.icon = value.filter(|v| !v.is_empty());
        self.touch(DraftField::Icon);
    }

    fn touch(&mut self, field: DraftField) {
        self.dirty.insert(field);
        self.state = FormState::Editing;
    }

    // -------------------------------------------------------------------------
    // Store round trips
    // -------------------------------------------------------------------------

    /// Create the object, or patch the changed fields of an existing one.
    pub async fn submit(&mut self) -> Result<SubmitOutcome, StoreError> {
        let Some(workspace) = self.context.workspace().map(str::to_string) else {
            log::debug!("Object form submit skipped: no workspace");
            return Ok(SubmitOutcome::Skipped);
        };

        match self.persisted_id() {
            None => self.create(&workspace).await,
            Some(id) => self.update(&workspace, &id).await,
        }
    }

    async fn create(&mut self, workspace: &str) -> Result<SubmitOutcome, StoreError> {
        let Some(project) = self.context.project().map(str::to_string) else {
            log::debug!("Object form submit skipped: no project");
            return Ok(SubmitOutcome::Skipped);
        };

        let payload = EntityPayload {
            display_name: Some(self.draft.display_name.clone()),
            description: Some(self.draft.description.clone()),
            icon: Some(self.draft.icon.clone().unwrap_or_default()),
            project: Some(project),
            kind: Some(ENTITY_KIND.to_string()),
        };

        self.state = FormState::Submitting;
        match self.store.create_entity(workspace, payload).await {
            Ok(entity) => {
                self.settle(&entity);
                Ok(SubmitOutcome::Created(entity))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn update(&mut self, workspace: &str, id: &str) -> Result<SubmitOutcome, StoreError> {
        if self.dirty.is_empty() {
            return Ok(SubmitOutcome::Skipped);
        }

        let mut patch = EntityPayload::default();
        for field in &self.dirty {
            match field {
                DraftField::DisplayName => {
                    patch.display_name = Some(self.draft.display_name.clone())
                }
                DraftField::Description => {
                    patch.description = Some(self.draft.description.clone())
                }
                DraftField::Icon => patch.icon = Some(self.draft.icon.clone().unwrap_or_default()),
            }
        }

        self.state = FormState::Submitting;
        match self.store.update_entity(workspace, id, patch).await {
            Ok(entity) => {
                self.settle(&entity);
                Ok(SubmitOutcome::Updated(entity))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn settle(&mut self, entity: &Entity) {
        self.draft.reconcile(entity);
        self.dirty.clear();
        self.last_error = None;
        self.state = FormState::Persisted;
    }

    fn fail(&mut self, err: StoreError) -> StoreError {
        log::warn!("Object form submit failed: {}", err);
        self.last_error = Some(ErrorReport::from(&err));
        self.state = FormState::Error;
        err
    }

    /// Make sure the object's attributes are loaded. Fetches at most once per
    /// object; returns true when a fetch happened.
    pub async fn load_details(&mut self) -> Result<bool, StoreError> {
        let (Some(workspace), Some(id)) = (
            self.context.workspace().map(str::to_string),
            self.persisted_id(),
        ) else {
            return Ok(false);
        };

        match self.store.ensure_entity_details(&workspace, &id).await {
            Ok(Some(details)) => {
                self.draft.reconcile(&details.entity);
                self.dirty.clear();
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                self.last_error = Some(ErrorReport::from(&e));
                Err(e)
            }
        }
    }

    /// Add an attribute of the given type with the type's defaults.
    /// Returns `None` while the object is still a draft.
    pub async fn add_attribute(&mut self, tag: &str) -> Result<Option<Attribute>, StoreError> {
        let (Some(workspace), Some(id)) = (
            self.context.workspace().map(str::to_string),
            self.persisted_id(),
        ) else {
            return Ok(None);
        };

        self.store
            .create_entity_attribute(&workspace, NewAttribute::new(Some(&id), tag))
            .await
            .map(Some)
            .inspect_err(|e| self.last_error = Some(ErrorReport::from(e)))
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn attributes(&self) -> Vec<Attribute> {
        self.persisted_id()
            .and_then(|id| self.store.attributes(&id))
            .unwrap_or_default()
    }

    pub fn attribute_forms(&self) -> Vec<AttributeForm> {
        self.attributes()
            .iter()
            .map(AttributeForm::for_attribute)
            .collect()
    }

    pub fn is_loading_attributes(&self) -> bool {
        self.store.is_loading(OperationKind::FetchEntityDetails)
    }

    pub fn is_adding_attribute(&self) -> bool {
        self.store.is_loading(OperationKind::CreateEntityAttribute)
    }

    /// Discard the draft.
    pub fn close(&mut self) {
        self.draft = EntityDraft::default();
        self.dirty.clear();
        self.last_error = None;
        self.state = FormState::Empty;
    }
}
