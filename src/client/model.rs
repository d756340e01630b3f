//! SharePoint REST payloads (`odata=nometadata` JSON).
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct WebResp {
    pub id: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct FolderResp {
    pub server_relative_url: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct ListResp {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub base_type: i32,
    #[serde(default)]
    pub root_folder: Option<FolderResp>,
    #[serde(default)]
    pub fields: Vec<FieldResp>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct FieldResp {
    pub internal_name: String,
    #[serde(default)]
    pub title: String,
    pub field_type_kind: i32,
    #[serde(default)]
    pub read_only_field: bool,
    #[serde(default)]
    pub hidden: bool,
    /// `{guid}` of the referenced list, lookup fields only.
    #[serde(default)]
    pub lookup_list: Option<String>,
    #[serde(default)]
    pub lookup_web_id: Option<Uuid>,
    #[serde(default)]
    pub lookup_field: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ItemsResp {
    pub value: Vec<Map<String, Value>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct ContextInfoResp {
    pub form_digest_value: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedItemResp {
    pub id: i64,
}

/// Parses `{5f1d...}` or a bare GUID; empty strings are absent.
pub fn parse_braced_guid(raw: &str) -> Option<Uuid> {
    let trimmed = raw.trim().trim_start_matches('{').trim_end_matches('}');
    if trimmed.is_empty() {
        return None;
    }
    Uuid::parse_str(trimmed).ok()
}
