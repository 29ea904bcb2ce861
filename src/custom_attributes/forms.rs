//! Settings forms for attributes, one variant per attribute type.
//!
//! Callers hold an [`AttributeForm`] without caring which type it edits: the
//! form lists its own fields, validates itself and turns itself back into a
//! patch payload. Type-specific settings live in `extra_settings` on the wire
//! and are parsed into typed structs here.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use super::registry::AttributeType;
use crate::error::StoreError;
use crate::types::{Attribute, AttributePayload};

pub const DATE_FORMATS: &[&str] = &[
    "DD-MM-YYYY",
    "MM-DD-YYYY",
    "YYYY-MM-DD",
    "DD/MM/YYYY",
    "MM/DD/YYYY",
    "YYYY/MM/DD",
];

pub const TIME_FORMATS: &[&str] = &["12", "24"];

const CHECKBOX_REPRESENTATIONS: &[&str] = &["check", "toggle_switch"];
const NUMBER_REPRESENTATIONS: &[&str] = &["numerical", "bar", "ring"];
const RELATION_TARGETS: &[&str] = &["cycle", "module", "user"];

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex should compile")
    })
}

// =============================================================================
// Field descriptions
// =============================================================================

/// Kind of input a field needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Text,
    TextArea,
    Toggle,
    Number,
    Choice(&'static [&'static str]),
    /// Free-form list of strings (file extensions, option names).
    List,
}

/// One editable field of an attribute's settings form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    pub input: InputKind,
    pub required: bool,
}

const fn field(name: &'static str, label: &'static str, input: InputKind) -> FormField {
    FormField {
        name,
        label,
        input,
        required: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

// =============================================================================
// Typed settings
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CheckboxSettings {
    pub representation: String,
    pub default_checked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatetimeSettings {
    pub date_format: String,
    pub time_format: String,
    pub hide_date: bool,
    pub hide_time: bool,
}

/// Text, email and URL attributes only carry an optional default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSettings {
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesSettings {
    pub file_formats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberSettings {
    pub representation: String,
    /// Scale for bar and ring representations.
    pub divided_by: Option<u64>,
    pub show_number: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationSettings {
    pub relation_to: String,
}

/// An option of a select attribute. `id` is `None` until the option is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOption {
    pub id: Option<String>,
    pub display_name: String,
}

impl SelectOption {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectSettings {
    pub options: Vec<SelectOption>,
    /// Id of the preselected option.
    pub default_value: Option<String>,
}

/// Type-specific part of the form.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSettings {
    Checkbox(CheckboxSettings),
    Datetime(DatetimeSettings),
    Email(TextSettings),
    Files(FilesSettings),
    MultiSelect(SelectSettings),
    Number(NumberSettings),
    Relation(RelationSettings),
    Select(SelectSettings),
    Text(TextSettings),
    Url(TextSettings),
}

/// Editable settings of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeForm {
    pub display_name: String,
    pub description: String,
    pub is_required: bool,
    pub settings: TypeSettings,
}

fn str_setting(settings: &Map<String, Value>, key: &str, default: &str) -> String {
    settings
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn bool_setting(settings: &Map<String, Value>, key: &str) -> bool {
    settings.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn select_settings(attribute: &Attribute) -> SelectSettings {
    SelectSettings {
        options: attribute
            .children
            .iter()
            .map(|o| SelectOption {
                id: Some(o.id.clone()),
                display_name: o.display_name.clone(),
            })
            .collect(),
        default_value: attribute.default_value.clone(),
    }
}

fn text_settings(attribute: &Attribute) -> TextSettings {
    TextSettings {
        default_value: attribute.default_value.clone(),
    }
}

fn choice_error(field: &'static str, value: &str, allowed: &[&str]) -> Option<FieldError> {
    if allowed.contains(&value) {
        None
    } else {
        Some(FieldError::new(
            field,
            format!("'{}' is not one of {}", value, allowed.join(", ")),
        ))
    }
}

impl TypeSettings {
    pub fn kind(&self) -> AttributeType {
        match self {
            TypeSettings::Checkbox(_) => AttributeType::Checkbox,
            TypeSettings::Datetime(_) => AttributeType::Datetime,
            TypeSettings::Email(_) => AttributeType::Email,
            TypeSettings::Files(_) => AttributeType::Files,
            TypeSettings::MultiSelect(_) => AttributeType::MultiSelect,
            TypeSettings::Number(_) => AttributeType::Number,
            TypeSettings::Relation(_) => AttributeType::Relation,
            TypeSettings::Select(_) => AttributeType::Select,
            TypeSettings::Text(_) => AttributeType::Text,
            TypeSettings::Url(_) => AttributeType::Url,
        }
    }

    fn from_attribute(attribute: &Attribute) -> Self {
        let extra = &attribute.extra_settings;
        match attribute.kind {
            AttributeType::Checkbox => TypeSettings::Checkbox(CheckboxSettings {
                representation: str_setting(extra, "representation", "check"),
                default_checked: attribute.default_value.as_deref() != Some("unchecked"),
            }),
            AttributeType::Datetime => TypeSettings::Datetime(DatetimeSettings {
                date_format: str_setting(extra, "date_format", "DD-MM-YYYY"),
                time_format: str_setting(extra, "time_format", "12"),
                hide_date: bool_setting(extra, "hide_date"),
                hide_time: bool_setting(extra, "hide_time"),
            }),
            AttributeType::Email => TypeSettings::Email(text_settings(attribute)),
            AttributeType::Files => TypeSettings::Files(FilesSettings {
                file_formats: extra
                    .get("file_formats")
                    .and_then(Value::as_array)
                    .map(|formats| {
                        formats
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            AttributeType::MultiSelect => TypeSettings::MultiSelect(select_settings(attribute)),
            AttributeType::Number => TypeSettings::Number(NumberSettings {
                representation: str_setting(extra, "representation", "numerical"),
                divided_by: extra.get("divided_by").and_then(Value::as_u64),
                show_number: bool_setting(extra, "show_number"),
                default_value: attribute.default_value.clone(),
            }),
            AttributeType::Relation => TypeSettings::Relation(RelationSettings {
                relation_to: str_setting(extra, "relation_to", "cycle"),
            }),
            AttributeType::Select => TypeSettings::Select(select_settings(attribute)),
            AttributeType::Text => TypeSettings::Text(text_settings(attribute)),
            AttributeType::Url => TypeSettings::Url(text_settings(attribute)),
        }
    }

    fn fields(&self) -> Vec<FormField> {
        match self {
            TypeSettings::Checkbox(_) => vec![
                field(
                    "representation",
                    "Display as",
                    InputKind::Choice(CHECKBOX_REPRESENTATIONS),
                ),
                field("default_value", "Checked by default", InputKind::Toggle),
            ],
            TypeSettings::Datetime(_) => vec![
                field("date_format", "Date format", InputKind::Choice(DATE_FORMATS)),
                field("time_format", "Time format", InputKind::Choice(TIME_FORMATS)),
                field("hide_date", "Hide date", InputKind::Toggle),
                field("hide_time", "Hide time", InputKind::Toggle),
            ],
            TypeSettings::Email(_) | TypeSettings::Text(_) | TypeSettings::Url(_) => {
                vec![field("default_value", "Default value", InputKind::Text)]
            }
            TypeSettings::Files(_) => vec![FormField {
                required: true,
                ..field("file_formats", "Allowed formats", InputKind::List)
            }],
            TypeSettings::MultiSelect(_) | TypeSettings::Select(_) => vec![
                field("options", "Options", InputKind::List),
                field("default_value", "Default option", InputKind::Text),
            ],
            TypeSettings::Number(_) => vec![
                field(
                    "representation",
                    "Display as",
                    InputKind::Choice(NUMBER_REPRESENTATIONS),
                ),
                field("divided_by", "Divided by", InputKind::Number),
                field("show_number", "Show number", InputKind::Toggle),
                field("default_value", "Default value", InputKind::Number),
            ],
            TypeSettings::Relation(_) => vec![field(
                "relation_to",
                "Relates to",
                InputKind::Choice(RELATION_TARGETS),
            )],
        }
    }

    fn validate(&self, errors: &mut Vec<FieldError>) {
        match self {
            TypeSettings::Checkbox(s) => {
                errors.extend(choice_error(
                    "representation",
                    &s.representation,
                    CHECKBOX_REPRESENTATIONS,
                ));
            }
            TypeSettings::Datetime(s) => {
                errors.extend(choice_error("date_format", &s.date_format, DATE_FORMATS));
                errors.extend(choice_error("time_format", &s.time_format, TIME_FORMATS));
                if s.hide_date && s.hide_time {
                    errors.push(FieldError::new(
                        "hide_time",
                        "Date and time cannot both be hidden",
                    ));
                }
            }
            TypeSettings::Email(s) => {
                if let Some(ref value) = s.default_value {
                    if !value.is_empty() && !email_regex().is_match(value) {
                        errors.push(FieldError::new(
                            "default_value",
                            format!("'{}' is not an email address", value),
                        ));
                    }
                }
            }
            TypeSettings::Url(s) => {
                if let Some(ref value) = s.default_value {
                    if !value.is_empty() && url::Url::parse(value).is_err() {
                        errors.push(FieldError::new(
                            "default_value",
                            format!("'{}' is not a URL", value),
                        ));
                    }
                }
            }
            TypeSettings::Text(_) => {}
            TypeSettings::Files(s) => {
                if s.file_formats.is_empty() {
                    errors.push(FieldError::new(
                        "file_formats",
                        "At least one file format is required",
                    ));
                }
                for format in &s.file_formats {
                    if !format.starts_with('.') || format.len() < 2 {
                        errors.push(FieldError::new(
                            "file_formats",
                            format!("'{}' is not a file extension", format),
                        ));
                    }
                }
            }
            TypeSettings::MultiSelect(s) | TypeSettings::Select(s) => {
                let mut seen = std::collections::HashSet::new();
                for option in &s.options {
                    let name = option.display_name.trim().to_lowercase();
                    if name.is_empty() {
                        errors.push(FieldError::new("options", "Options need a name"));
                    } else if !seen.insert(name) {
                        errors.push(FieldError::new(
                            "options",
                            format!("'{}' is listed twice", option.display_name.trim()),
                        ));
                    }
                }
                if let Some(ref default) = s.default_value {
                    let saved_option = s
                        .options
                        .iter()
                        .any(|o| o.id.as_deref() == Some(default.as_str()));
                    if !default.is_empty() && !saved_option {
                        errors.push(FieldError::new(
                            "default_value",
                            "Default must be one of the saved options",
                        ));
                    }
                }
            }
            TypeSettings::Number(s) => {
                errors.extend(choice_error(
                    "representation",
                    &s.representation,
                    NUMBER_REPRESENTATIONS,
                ));
                if s.representation != "numerical" && !s.divided_by.is_some_and(|d| d > 0) {
                    errors.push(FieldError::new(
                        "divided_by",
                        "Bar and ring need a positive divisor",
                    ));
                }
                if let Some(ref value) = s.default_value {
                    if !value.is_empty() && value.parse::<f64>().is_err() {
                        errors.push(FieldError::new(
                            "default_value",
                            format!("'{}' is not a number", value),
                        ));
                    }
                }
            }
            TypeSettings::Relation(s) => {
                errors.extend(choice_error("relation_to", &s.relation_to, RELATION_TARGETS));
            }
        }
    }

    /// Write this type's settings into `payload`.
    fn fill_payload(&self, payload: &mut AttributePayload) {
        let (default_value, extra): (Option<String>, Option<Value>) = match self {
            TypeSettings::Checkbox(s) => (
                Some((if s.default_checked { "checked" } else { "unchecked" }).to_string()),
                Some(json!({ "representation": s.representation })),
            ),
            TypeSettings::Datetime(s) => (
                None,
                Some(json!({
                    "date_format": s.date_format,
                    "time_format": s.time_format,
                    "hide_date": s.hide_date,
                    "hide_time": s.hide_time,
                })),
            ),
            TypeSettings::Email(s) | TypeSettings::Text(s) | TypeSettings::Url(s) => {
                (s.default_value.clone(), None)
            }
            TypeSettings::Files(s) => (None, Some(json!({ "file_formats": s.file_formats }))),
            TypeSettings::MultiSelect(s) | TypeSettings::Select(s) => {
                (s.default_value.clone(), None)
            }
            TypeSettings::Number(s) => {
                let mut extra = json!({
                    "representation": s.representation,
                    "show_number": s.show_number,
                });
                if let Some(divided_by) = s.divided_by {
                    extra["divided_by"] = json!(divided_by);
                }
                (s.default_value.clone(), Some(extra))
            }
            TypeSettings::Relation(s) => (None, Some(json!({ "relation_to": s.relation_to }))),
        };

        payload.default_value = default_value;
        payload.extra_settings = extra.and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        });
        if let TypeSettings::MultiSelect(_) = self {
            payload.is_multi = Some(true);
        }
    }
}

impl AttributeForm {
    /// Build the form matching the attribute's type.
    pub fn for_attribute(attribute: &Attribute) -> Self {
        Self {
            display_name: attribute.display_name.clone(),
            description: attribute.description.clone(),
            is_required: attribute.is_required,
            settings: TypeSettings::from_attribute(attribute),
        }
    }

    /// Build a form from a raw type tag, as found in untyped server data.
    /// Unknown tags mean the server and this build disagree on the type set.
    pub fn for_tag(tag: &str, attribute: &Attribute) -> Result<Self, StoreError> {
        let kind = AttributeType::from_tag(tag)?;
        if kind != attribute.kind {
            return Err(StoreError::AttributeTypeImmutable {
                from: attribute.kind.to_string(),
                to: kind.to_string(),
            });
        }
        Ok(Self::for_attribute(attribute))
    }

    pub fn kind(&self) -> AttributeType {
        self.settings.kind()
    }

    /// Options of a select form. They are saved as child attributes by
    /// [`EntityStore::save_attribute_form`](crate::store::EntityStore::save_attribute_form),
    /// not through the patch payload.
    pub fn options(&self) -> Option<&[SelectOption]> {
        match self.settings {
            TypeSettings::MultiSelect(ref s) | TypeSettings::Select(ref s) => {
                Some(s.options.as_slice())
            }
            _ => None,
        }
    }

    pub fn options_mut(&mut self) -> Option<&mut Vec<SelectOption>> {
        match self.settings {
            TypeSettings::MultiSelect(ref mut s) | TypeSettings::Select(ref mut s) => {
                Some(&mut s.options)
            }
            _ => None,
        }
    }

    /// Fields to render, common ones first.
    pub fn fields(&self) -> Vec<FormField> {
        let mut fields = vec![
            FormField {
                required: true,
                ..field("display_name", "Title", InputKind::Text)
            },
            field("description", "Description", InputKind::TextArea),
            field("is_required", "Mandatory field", InputKind::Toggle),
        ];
        fields.extend(self.settings.fields());
        fields
    }

    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.display_name.trim().is_empty() {
            errors.push(FieldError::new("display_name", "Title is required"));
        }
        self.settings.validate(&mut errors);
        errors
    }

    /// Patch payload for this form. The type is never part of it.
    pub fn to_payload(&self) -> Result<AttributePayload, StoreError> {
        let errors = self.validate();
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StoreError::InvalidAttribute(message));
        }

        let mut payload = AttributePayload {
            display_name: Some(self.display_name.trim().to_string()),
            description: Some(self.description.clone()),
            is_required: Some(self.is_required),
            ..Default::default()
        };
        self.settings.fill_payload(&mut payload);
        Ok(payload)
    }
}
