//! Attribute values recorded against an issue.
//!
//! Relation, select and multi-select values reference other records and are
//! stored as UUIDs; every other type is stored as text. A multi-valued
//! attribute produces one row per value.

use std::collections::BTreeSet;

use uuid::Uuid;

use super::registry::AttributeType;
use crate::error::StoreError;
use crate::types::{Attribute, AttributeValue, ValueEntry, ValueSubmission, ValueType};

/// Storage class for values of an attribute type.
pub fn value_type(kind: AttributeType) -> ValueType {
    if kind.stores_uuid() {
        ValueType::Uuid
    } else {
        ValueType::Text
    }
}

/// Only the canonical lowercase hyphenated form counts.
pub fn is_canonical_uuid(value: &str) -> bool {
    Uuid::parse_str(value)
        .map(|u| u.hyphenated().to_string() == value)
        .unwrap_or(false)
}

/// Pending values for one issue, ready to submit.
#[derive(Debug, Clone, Default)]
pub struct AttributeValues {
    rows: Vec<AttributeValue>,
    /// Attributes whose values are submitted as a list.
    multi: BTreeSet<String>,
}

impl AttributeValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[AttributeValue] {
        &self.rows
    }

    /// Set the values of `attribute`, replacing any set before.
    pub fn set(&mut self, attribute: &Attribute, values: &[&str]) -> Result<(), StoreError> {
        let invalid = |reason: String| StoreError::InvalidValue {
            attribute_id: attribute.id.clone(),
            reason,
        };

        if !is_canonical_uuid(&attribute.id) {
            return Err(invalid("attribute id is not a UUID".to_string()));
        }
        if values.is_empty() && attribute.is_required {
            return Err(invalid(format!("{} is required", attribute.display_name)));
        }
        if values.len() > 1 && !attribute.is_multi {
            return Err(invalid(format!(
                "{} accepts a single value",
                attribute.display_name
            )));
        }

        let value_type = value_type(attribute.kind);
        if value_type == ValueType::Uuid {
            if let Some(bad) = values.iter().find(|v| !is_canonical_uuid(v)) {
                return Err(invalid(format!("'{}' is not a UUID", bad)));
            }
        }

        self.rows.retain(|r| r.attribute_id != attribute.id);
        if attribute.is_multi {
            self.multi.insert(attribute.id.clone());
        } else {
            self.multi.remove(&attribute.id);
        }
        self.rows.extend(values.iter().map(|v| AttributeValue {
            id: None,
            attribute_id: attribute.id.clone(),
            value: v.to_string(),
            value_type,
        }));
        Ok(())
    }

    pub fn clear(&mut self, attribute_id: &str) {
        self.rows.retain(|r| r.attribute_id != attribute_id);
        self.multi.remove(attribute_id);
    }

    /// Request body keyed by attribute id: a list for multi-valued attributes,
    /// the single value otherwise.
    pub fn to_submission(&self) -> ValueSubmission {
        let mut submission = ValueSubmission::new();
        for row in &self.rows {
            if self.multi.contains(&row.attribute_id) {
                match submission
                    .entry(row.attribute_id.clone())
                    .or_insert_with(|| ValueEntry::Many(Vec::new()))
                {
                    ValueEntry::Many(values) => values.push(row.value.clone()),
                    ValueEntry::One(_) => {}
                }
            } else {
                submission.insert(row.attribute_id.clone(), ValueEntry::One(row.value.clone()));
            }
        }
        submission
    }
}
