use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::client::model::parse_braced_guid;
use crate::client::{FieldSchema, ListSchema};
use crate::model::{FieldValue, LookupValue};
use crate::names::FULL_NAME_SEPARATOR;

/// SharePoint `BaseType` of document libraries.
pub const DOCUMENT_LIBRARY_BASE_TYPE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Boolean,
    DateTime,
    Guid,
    Integer,
    Currency,
    Number,
    Text,
    Note,
    Lookup {
        site_id: Option<Uuid>,
        list_id: Option<Uuid>,
        field: Option<String>,
    },
    /// Any other SharePoint field type, readable and writable by raw name only.
    Other { code: i32 },
}

impl FieldKind {
    pub fn classify(field: &FieldSchema) -> Self {
        match field.type_kind {
            1 | 5 => FieldKind::Integer,
            2 => FieldKind::Text,
            3 => FieldKind::Note,
            4 => FieldKind::DateTime,
            7 => FieldKind::Lookup {
                site_id: field.lookup_web_id,
                list_id: field.lookup_list,
                field: field.lookup_field.clone(),
            },
            8 => FieldKind::Boolean,
            9 => FieldKind::Number,
            10 => FieldKind::Currency,
            14 => FieldKind::Guid,
            code => FieldKind::Other { code },
        }
    }

    pub fn is_lookup(&self) -> bool {
        matches!(self, FieldKind::Lookup { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub title: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub read_only: bool,
    pub hidden: bool,
}

impl FieldInfo {
    pub fn from_schema(field: &FieldSchema) -> Self {
        Self {
            name: field.internal_name.clone(),
            title: field.title.clone(),
            kind: FieldKind::classify(field),
            read_only: field.read_only,
            hidden: field.hidden,
        }
    }

    /// Converts `value` into the representation this field's kind expects.
    pub fn coerce(&self, value: FieldValue) -> Result<FieldValue, String> {
        if value == FieldValue::Null {
            return Ok(FieldValue::Null);
        }
        let mismatch = |v: &FieldValue| {
            format!(
                "cannot store a {} value in a {} field",
                v.kind_name(),
                kind_label(&self.kind)
            )
        };

        match &self.kind {
            FieldKind::Text | FieldKind::Note => match value {
                FieldValue::Text(_) => Ok(value),
                FieldValue::Integer(i) => Ok(FieldValue::Text(i.to_string())),
                FieldValue::Number(n) => Ok(FieldValue::Text(n.to_string())),
                FieldValue::Boolean(b) => Ok(FieldValue::Text(b.to_string())),
                FieldValue::DateTime(dt) => Ok(FieldValue::Text(dt.to_rfc3339())),
                FieldValue::Guid(g) => Ok(FieldValue::Text(g.to_string())),
                other => Err(mismatch(&other)),
            },
            FieldKind::Integer => match value {
                FieldValue::Integer(_) => Ok(value),
                FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                    Ok(FieldValue::Integer(n as i64))
                }
                FieldValue::Text(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|_| format!("'{}' is not an integer", s)),
                other => Err(mismatch(&other)),
            },
            FieldKind::Number | FieldKind::Currency => match value {
                FieldValue::Number(_) => Ok(value),
                FieldValue::Integer(i) => Ok(FieldValue::Number(i as f64)),
                FieldValue::Text(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(FieldValue::Number)
                    .map_err(|_| format!("'{}' is not a number", s)),
                other => Err(mismatch(&other)),
            },
            FieldKind::Boolean => match value {
                FieldValue::Boolean(_) => Ok(value),
                FieldValue::Integer(0) => Ok(FieldValue::Boolean(false)),
                FieldValue::Integer(1) => Ok(FieldValue::Boolean(true)),
                FieldValue::Text(ref s) => match s.trim().to_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(FieldValue::Boolean(true)),
                    "false" | "no" | "0" => Ok(FieldValue::Boolean(false)),
                    _ => Err(format!("'{}' is not a boolean", s)),
                },
                other => Err(mismatch(&other)),
            },
            FieldKind::DateTime => match value {
                FieldValue::DateTime(_) => Ok(value),
                FieldValue::Text(ref s) => parse_date_time(s)
                    .map(FieldValue::DateTime)
                    .ok_or_else(|| format!("'{}' is not a date", s)),
                other => Err(mismatch(&other)),
            },
            FieldKind::Guid => match value {
                FieldValue::Guid(_) => Ok(value),
                FieldValue::Text(ref s) => parse_braced_guid(s)
                    .map(FieldValue::Guid)
                    .ok_or_else(|| format!("'{}' is not a GUID", s)),
                other => Err(mismatch(&other)),
            },
            FieldKind::Lookup { .. } => match value {
                FieldValue::Lookup(_) => Ok(value),
                FieldValue::Integer(id) => Ok(FieldValue::Lookup(LookupValue { id, value: None })),
                FieldValue::Text(ref s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|id| FieldValue::Lookup(LookupValue { id, value: None }))
                    .map_err(|_| format!("'{}' is not a lookup item id", s)),
                other => Err(mismatch(&other)),
            },
            FieldKind::Other { .. } => Ok(value),
        }
    }

    /// Name and JSON value as written to SharePoint. Lookups are written
    /// through their `<name>Id` companion field.
    pub fn wire_entry(&self, value: FieldValue) -> (String, Value) {
        match (&self.kind, value) {
            (FieldKind::Lookup { .. }, FieldValue::Lookup(lookup)) => {
                (format!("{}Id", self.name), json!(lookup.id))
            }
            (FieldKind::Lookup { .. }, FieldValue::Null) => {
                (format!("{}Id", self.name), Value::Null)
            }
            (_, value) => (self.name.clone(), Value::from(value)),
        }
    }
}

fn kind_label(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Boolean => "boolean",
        FieldKind::DateTime => "date-time",
        FieldKind::Guid => "guid",
        FieldKind::Integer => "integer",
        FieldKind::Currency => "currency",
        FieldKind::Number => "number",
        FieldKind::Text => "text",
        FieldKind::Note => "note",
        FieldKind::Lookup { .. } => "lookup",
        FieldKind::Other { .. } => "other",
    }
}

fn parse_date_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Cached schema of one list. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListInfo {
    pub name: String,
    pub site_name: String,
    pub site_url: String,
    pub site_id: Option<Uuid>,
    pub list_id: Uuid,
    pub base_type: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<String>,
    pub fields: Vec<FieldInfo>,
}

impl ListInfo {
    pub fn from_schema(
        site_name: &str,
        site_url: &str,
        site_id: Option<Uuid>,
        schema: &ListSchema,
    ) -> Self {
        Self {
            name: schema.list.title.clone(),
            site_name: site_name.to_string(),
            site_url: site_url.trim_end_matches('/').to_string(),
            site_id,
            list_id: schema.list.id,
            base_type: schema.list.base_type,
            root_folder: schema.list.root_folder.clone(),
            fields: schema.fields.iter().map(FieldInfo::from_schema).collect(),
        }
    }

    /// `site/list`.
    pub fn full_name(&self) -> String {
        format!("{}{}{}", self.site_name, FULL_NAME_SEPARATOR, self.name)
    }

    /// `siteUrl/list`.
    pub fn qualified_name(&self) -> String {
        format!("{}{}{}", self.site_url, FULL_NAME_SEPARATOR, self.name)
    }

    pub fn is_document_library(&self) -> bool {
        self.base_type == DOCUMENT_LIBRARY_BASE_TYPE
    }

    /// Finds a field by internal name, then by display title.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.title == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ListHandle;

    fn schema_field(name: &str, type_kind: i32) -> FieldSchema {
        FieldSchema {
            internal_name: name.into(),
            title: format!("{} Title", name),
            type_kind,
            read_only: false,
            hidden: false,
            lookup_list: None,
            lookup_web_id: None,
            lookup_field: None,
        }
    }

    fn field(name: &str, type_kind: i32) -> FieldInfo {
        FieldInfo::from_schema(&schema_field(name, type_kind))
    }

    #[test]
    fn classification_follows_field_type_codes() {
        assert_eq!(field("a", 1).kind, FieldKind::Integer);
        assert_eq!(field("a", 5).kind, FieldKind::Integer);
        assert_eq!(field("a", 3).kind, FieldKind::Note);
        assert_eq!(field("a", 10).kind, FieldKind::Currency);
        assert_eq!(field("a", 14).kind, FieldKind::Guid);
        assert_eq!(field("a", 6).kind, FieldKind::Other { code: 6 });

        let mut lookup = schema_field("City", 7);
        let list_id = Uuid::new_v4();
        lookup.lookup_list = Some(list_id);
        lookup.lookup_field = Some("Title".into());
        match FieldKind::classify(&lookup) {
            FieldKind::Lookup { list_id: l, field, .. } => {
                assert_eq!(l, Some(list_id));
                assert_eq!(field.as_deref(), Some("Title"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn coercion_by_kind() {
        assert_eq!(
            field("n", 1).coerce(FieldValue::Number(4.0)),
            Ok(FieldValue::Integer(4))
        );
        assert!(field("n", 1).coerce(FieldValue::Number(4.5)).is_err());
        assert_eq!(
            field("n", 9).coerce(FieldValue::Text("2.5".into())),
            Ok(FieldValue::Number(2.5))
        );
        assert_eq!(
            field("b", 8).coerce(FieldValue::Text("Yes".into())),
            Ok(FieldValue::Boolean(true))
        );
        assert_eq!(
            field("t", 2).coerce(FieldValue::Integer(7)),
            Ok(FieldValue::Text("7".into()))
        );
        match field("d", 4).coerce(FieldValue::Text("2024-03-01".into())) {
            Ok(FieldValue::DateTime(dt)) => assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+00:00"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(field("x", 0).coerce(FieldValue::Null), Ok(FieldValue::Null));
        assert!(field("g", 14).coerce(FieldValue::Boolean(true)).is_err());
    }

    #[test]
    fn lookups_are_written_by_id() {
        let city = field("City", 7);
        let value = city.coerce(FieldValue::Integer(3)).unwrap();
        assert_eq!(city.wire_entry(value), ("CityId".to_string(), json!(3)));
        assert_eq!(
            field("Title", 2).wire_entry(FieldValue::Text("x".into())),
            ("Title".to_string(), json!("x"))
        );
    }

    #[test]
    fn list_info_lookup_by_name_then_title() {
        let schema = ListSchema {
            list: ListHandle {
                id: Uuid::nil(),
                title: "Docs".into(),
                base_type: 1,
                root_folder: Some("/sites/alpha/Docs".into()),
            },
            fields: vec![schema_field("Title", 2), schema_field("Amount", 9)],
        };
        let info = ListInfo::from_schema("alpha", "https://contoso/sites/alpha/", None, &schema);
        assert_eq!(info.full_name(), "alpha/Docs");
        assert_eq!(info.qualified_name(), "https://contoso/sites/alpha/Docs");
        assert!(info.is_document_library());
        assert_eq!(info.field("Amount").unwrap().name, "Amount");
        assert_eq!(info.field("Amount Title").unwrap().name, "Amount");
        assert!(info.field("Missing").is_none());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["fields"][1]["kind"], "number");
    }
}
