use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::custom_attributes::registry::AttributeType;

/// Discriminator sent for user-defined objects.
pub const ENTITY_KIND: &str = "entity";

// =============================================================================
// Objects
// =============================================================================

/// A user-defined object as the server returns it.
///
/// An entity without `id` has never been persisted (a draft).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "type", default = "default_entity_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_entity_kind() -> String {
    ENTITY_KIND.to_string()
}

impl Entity {
    pub fn is_persisted(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Apply a partial patch. Fields absent from the patch are left as they are.
    pub fn apply_patch(&mut self, patch: &EntityPayload) {
        if let Some(ref name) = patch.display_name {
            self.display_name = name.clone();
        }
        if let Some(ref description) = patch.description {
            self.description = description.clone();
        }
        if let Some(ref icon) = patch.icon {
            self.icon = if icon.is_empty() { None } else { Some(icon.clone()) };
        }
        if let Some(ref project) = patch.project {
            self.project = Some(project.clone());
        }
        if let Some(ref kind) = patch.kind {
            self.kind = kind.clone();
        }
    }
}

/// Request body for creating or patching an object. `None` fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl EntityPayload {
    pub fn is_empty(&self) -> bool {
        self == &EntityPayload::default()
    }
}

/// `GET entities/{id}/` response: the object plus its attribute definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDetails {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(default)]
    pub children: Vec<Attribute>,
}

// =============================================================================
// Attributes
// =============================================================================

/// A typed field definition owned by exactly one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub extra_settings: Map<String, Value>,
    #[serde(default)]
    pub is_multi: bool,
    #[serde(default)]
    pub is_required: bool,
    /// Options of a select/multi-select attribute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Attribute>,
}

/// Request body for creating or patching an attribute. `None` fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AttributeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_settings: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_multi: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_required: Option<bool>,
}

impl AttributePayload {
    /// Shallow merge: every field set in `overrides` replaces the one in `self`.
    pub fn overlay(mut self, overrides: AttributePayload) -> Self {
        if overrides.parent.is_some() {
            self.parent = overrides.parent;
        }
        if overrides.display_name.is_some() {
            self.display_name = overrides.display_name;
        }
        if overrides.kind.is_some() {
            self.kind = overrides.kind;
        }
        if overrides.description.is_some() {
            self.description = overrides.description;
        }
        if overrides.default_value.is_some() {
            self.default_value = overrides.default_value;
        }
        if overrides.extra_settings.is_some() {
            self.extra_settings = overrides.extra_settings;
        }
        if overrides.is_multi.is_some() {
            self.is_multi = overrides.is_multi;
        }
        if overrides.is_required.is_some() {
            self.is_required = overrides.is_required;
        }
        self
    }
}

/// Request to add an attribute to a persisted object.
///
/// `kind` is the raw type tag as chosen in the UI; it is resolved through the
/// registry before anything is sent.
#[derive(Debug, Clone, Default)]
pub struct NewAttribute {
    pub parent: Option<String>,
    pub kind: String,
    pub overrides: AttributePayload,
}

impl NewAttribute {
    pub fn new(parent: Option<&str>, kind: &str) -> Self {
        Self {
            parent: parent.map(str::to_string),
            kind: kind.to_string(),
            overrides: AttributePayload::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: AttributePayload) -> Self {
        self.overrides = overrides;
        self
    }
}

// =============================================================================
// Attribute values
// =============================================================================

/// How the server stores an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Uuid,
    Text,
}

/// One stored value of an attribute on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub attribute_id: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

/// Submitted values of one attribute: a list for multi-valued attributes,
/// a single value otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueEntry {
    One(String),
    Many(Vec<String>),
}

impl ValueEntry {
    pub fn values(&self) -> Vec<&str> {
        match self {
            ValueEntry::One(value) => vec![value.as_str()],
            ValueEntry::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Submission body keyed by attribute id.
pub type ValueSubmission = BTreeMap<String, ValueEntry>;

/// An attribute as read back for one issue, with the values stored on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueAttributeValues {
    #[serde(flatten)]
    pub attribute: Attribute,
    #[serde(default)]
    pub attribute_values: Vec<AttributeValue>,
}

// =============================================================================
// Config
// =============================================================================

/// Configuration stored in ~/.objectdesk/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            workspace_slug: None,
            project_id: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
