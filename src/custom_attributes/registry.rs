//! Closed catalog of attribute types.
//!
//! Each type carries the label shown in the type picker and the payload merged
//! into a new attribute of that type. Adding a variant forces every `match` in
//! the crate (here and in the form dispatcher) to handle it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::StoreError;
use crate::types::AttributePayload;

/// The kind of attribute, as tagged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Checkbox,
    Datetime,
    Email,
    Files,
    MultiSelect,
    Number,
    Relation,
    Select,
    Text,
    Url,
}

/// Display metadata and creation defaults for one attribute type.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeTypeMeta {
    pub label: &'static str,
    pub initial_payload: AttributePayload,
}

impl AttributeType {
    /// Every supported type, in picker order.
    pub const ALL: [AttributeType; 10] = [
        AttributeType::Text,
        AttributeType::Number,
        AttributeType::Checkbox,
        AttributeType::Select,
        AttributeType::MultiSelect,
        AttributeType::Relation,
        AttributeType::Datetime,
        AttributeType::Files,
        AttributeType::Email,
        AttributeType::Url,
    ];

    /// Wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Checkbox => "checkbox",
            AttributeType::Datetime => "datetime",
            AttributeType::Email => "email",
            AttributeType::Files => "files",
            AttributeType::MultiSelect => "multi_select",
            AttributeType::Number => "number",
            AttributeType::Relation => "relation",
            AttributeType::Select => "select",
            AttributeType::Text => "text",
            AttributeType::Url => "url",
        }
    }

    /// Parse a wire tag. Unknown tags are an error, never a fallback.
    pub fn from_tag(tag: &str) -> Result<Self, StoreError> {
        AttributeType::ALL
            .into_iter()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| StoreError::UnknownAttributeType(tag.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttributeType::Checkbox => "Checkbox",
            AttributeType::Datetime => "Date Time",
            AttributeType::Email => "Email",
            AttributeType::Files => "Files",
            AttributeType::MultiSelect => "Multi Select",
            AttributeType::Number => "Number",
            AttributeType::Relation => "Relation",
            AttributeType::Select => "Select",
            AttributeType::Text => "Text",
            AttributeType::Url => "URL",
        }
    }

    /// Type-specific defaults merged into a new attribute.
    pub fn initial_payload(&self) -> AttributePayload {
        match self {
            AttributeType::Checkbox => AttributePayload {
                default_value: Some("checked".to_string()),
                extra_settings: Some(settings(json!({ "representation": "check" }))),
                ..Default::default()
            },
            AttributeType::Datetime => AttributePayload {
                extra_settings: Some(settings(json!({
                    "date_format": "DD-MM-YYYY",
                    "time_format": "12",
                    "hide_date": false,
                    "hide_time": false,
                }))),
                ..Default::default()
            },
            AttributeType::Files => AttributePayload {
                extra_settings: Some(settings(json!({
                    "file_formats": [".jpg", ".jpeg", ".png"],
                }))),
                ..Default::default()
            },
            AttributeType::MultiSelect => AttributePayload {
                is_multi: Some(true),
                ..Default::default()
            },
            AttributeType::Number => AttributePayload {
                extra_settings: Some(settings(json!({ "representation": "numerical" }))),
                ..Default::default()
            },
            AttributeType::Relation => AttributePayload {
                extra_settings: Some(settings(json!({ "relation_to": "cycle" }))),
                ..Default::default()
            },
            AttributeType::Email
            | AttributeType::Select
            | AttributeType::Text
            | AttributeType::Url => AttributePayload::default(),
        }
    }

    pub fn metadata(&self) -> AttributeTypeMeta {
        AttributeTypeMeta {
            label: self.label(),
            initial_payload: self.initial_payload(),
        }
    }

    /// Values of these types reference other records by UUID; everything else
    /// is stored as text.
    pub fn stores_uuid(&self) -> bool {
        matches!(
            self,
            AttributeType::Relation | AttributeType::Select | AttributeType::MultiSelect
        )
    }

    /// Select types own a list of option attributes.
    pub fn has_options(&self) -> bool {
        matches!(self, AttributeType::Select | AttributeType::MultiSelect)
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up the label and defaults for a wire tag.
pub fn lookup(tag: &str) -> Result<AttributeTypeMeta, StoreError> {
    AttributeType::from_tag(tag).map(|t| t.metadata())
}

/// Payload for a new attribute of `kind`: label and type defaults, then the
/// caller's overrides on top. The type itself cannot be overridden.
pub fn creation_payload(kind: AttributeType, overrides: AttributePayload) -> AttributePayload {
    let base = AttributePayload {
        display_name: Some(kind.label().to_string()),
        ..Default::default()
    };
    let mut payload = base.overlay(kind.initial_payload()).overlay(overrides);
    payload.kind = Some(kind);
    payload
}

fn settings(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
