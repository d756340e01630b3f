use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Reference to an item in a lookup list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupValue {
    pub id: i64,
    pub value: Option<String>,
}

/// A field value. Serialized as plain JSON so items stay schema-free when
/// authored; the list schema decides the final kind on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    Lookup(LookupValue),
    Opaque(Value),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Number(_) => "number",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::DateTime(_) => "date-time",
            FieldValue::Guid(_) => "guid",
            FieldValue::Lookup(_) => "lookup",
            FieldValue::Opaque(_) => "opaque",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Number(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FieldValue::Text(s),
            Value::Object(map) => match map.get("lookup_id").and_then(Value::as_i64) {
                Some(id) => FieldValue::Lookup(LookupValue {
                    id,
                    value: map
                        .get("lookup_value")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }),
                None => FieldValue::Opaque(Value::Object(map)),
            },
            other => FieldValue::Opaque(other),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Text(s) => Value::String(s),
            FieldValue::Integer(i) => json!(i),
            FieldValue::Number(n) => json!(n),
            FieldValue::Boolean(b) => Value::Bool(b),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FieldValue::Guid(g) => Value::String(g.to_string()),
            FieldValue::Lookup(l) => json!({ "lookup_id": l.id, "lookup_value": l.value }),
            FieldValue::Opaque(v) => v,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// A list item: fixed identity/location plus an open field map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    /// 0 for items not yet created.
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl ListItem {
    pub fn new(list: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            list: Some(list.into()),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn as_document(&self) -> Option<&Document> {
        self.document.as_ref()
    }
}

impl fmt::Display for ListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.list.as_deref().unwrap_or_default();
        match self.folder.as_deref().filter(|f| !f.is_empty()) {
            Some(folder) => write!(f, "{}/{}/{}/{}", list, folder, self.title, self.id),
            None => write!(f, "{}/{}/{}", list, self.title, self.id),
        }
    }
}

/// Content carried by document library items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_folder: Option<String>,
    #[serde(default)]
    pub file_content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Document {
    pub fn size(&self) -> u64 {
        self.file_content.len() as u64
    }
}
