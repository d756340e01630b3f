//! The site-specific step of the pipeline: rules, schema-aware field
//! mapping and the write itself.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::rules::ListItemUpdateRule;
use super::{OperationMessage, UpdateContext};
use crate::client::{ItemQuery, ListRef, RawItem};
use crate::error::{Result, SharePointError};
use crate::metadata::{ListInfo, ListKey, MetadataCache};
use crate::model::{Document, FieldValue, ListItem};
use crate::names::ListNameResolver;
use crate::site::SiteService;

const TITLE_FIELD: &str = "Title";

/// Value and messages produced by the core update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreOutcome {
    pub value: Option<Value>,
    pub messages: Vec<OperationMessage>,
}

#[async_trait]
pub trait UpdateCore: Send + Sync {
    async fn update_list_item(&self, item: &mut ListItem, ctx: &UpdateContext) -> Result<CoreOutcome>;

    async fn finalize(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes items to one site through its [`SiteService`].
pub struct SiteItemUpdater {
    site: Arc<SiteService>,
    metadata: Arc<MetadataCache>,
    resolver: ListNameResolver,
    rules: Vec<Arc<dyn ListItemUpdateRule>>,
    sync_id_field: String,
}

impl SiteItemUpdater {
    pub fn new(
        site: Arc<SiteService>,
        metadata: Arc<MetadataCache>,
        resolver: ListNameResolver,
        rules: Vec<Arc<dyn ListItemUpdateRule>>,
        sync_id_field: impl Into<String>,
    ) -> Self {
        Self {
            site,
            metadata,
            resolver,
            rules,
            sync_id_field: sync_id_field.into(),
        }
    }

    pub fn site(&self) -> &SiteService {
        &self.site
    }

    /// Maps the item's fields onto the list schema. Read-only fields are
    /// dropped with a warning, as are fields added by rules that the list
    /// does not define. Unknown `explicit` fields and bad values are errors.
    fn map_fields(
        &self,
        item: &ListItem,
        explicit: &BTreeSet<String>,
        info: &ListInfo,
        messages: &mut Vec<OperationMessage>,
    ) -> Result<RawItem> {
        let mut raw = RawItem::new();
        if !item.title.is_empty() && !item.fields.contains_key(TITLE_FIELD) {
            if let Some(title) = info.field(TITLE_FIELD).filter(|f| !f.read_only) {
                raw.insert(title.name.clone(), Value::String(item.title.clone()));
            }
        }

        for (name, value) in &item.fields {
            let Some(field) = info.field(name) else {
                if explicit.contains(name) {
                    return Err(SharePointError::UnknownField {
                        list: info.full_name(),
                        field: name.clone(),
                    });
                }
                debug!(list = %info.full_name(), field = %name, "list has no such field, skipping");
                messages.push(OperationMessage::warning(format!(
                    "field '{}' is not defined in list {} and was not written",
                    name,
                    info.full_name()
                )));
                continue;
            };
            if field.read_only {
                warn!(list = %info.full_name(), field = %field.name, "skipping read-only field");
                messages.push(OperationMessage::warning(format!(
                    "field '{}' of list {} is read-only and was not written",
                    field.name,
                    info.full_name()
                )));
                continue;
            }
            let value = field
                .coerce(value.clone())
                .map_err(|reason| SharePointError::InvalidFieldValue {
                    list: info.full_name(),
                    field: field.name.clone(),
                    reason,
                })?;
            let (key, value) = field.wire_entry(value);
            raw.insert(key, value);
        }
        Ok(raw)
    }

    /// Server-relative folder receiving a document: the library's root
    /// folder, or the item's subfolder below it.
    fn document_folder(&self, item: &ListItem, document: &Document, info: &ListInfo) -> Result<String> {
        if !info.is_document_library() {
            return Err(SharePointError::NotADocumentLibrary(info.full_name()));
        }
        if document.name.trim().is_empty() {
            return Err(SharePointError::InvalidFieldValue {
                list: info.full_name(),
                field: "FileLeafRef".to_string(),
                reason: format!("document of {} has no file name", item),
            });
        }
        let root = info
            .root_folder
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| anyhow::anyhow!("list {} has no root folder", info.full_name()))?;
        let root = root.trim_end_matches('/');
        Ok(match item.folder.as_deref().map(|f| f.trim_matches('/')) {
            Some(sub) if !sub.is_empty() => format!("{}/{}", root, sub),
            _ => root.to_string(),
        })
    }

    /// Finds an existing item carrying the same sync id.
    async fn find_synced_item(
        &self,
        item: &ListItem,
        info: &ListInfo,
        ctx: &UpdateContext,
    ) -> Result<Option<i64>> {
        let Some(field) = info.field(&self.sync_id_field) else {
            return Ok(None);
        };
        let sync_id = match item.fields.get(&self.sync_id_field) {
            Some(FieldValue::Text(s)) if !s.is_empty() => s.clone(),
            Some(FieldValue::Integer(i)) => i.to_string(),
            _ => return Ok(None),
        };
        let query = ItemQuery {
            filter: Some(format!("{} eq '{}'", field.name, sync_id.replace('\'', "''"))),
            select: vec!["Id".to_string()],
            top: Some(1),
        };
        let found = self
            .site
            .get_list_items(&info.list_id.to_string(), &query, &ctx.cancel)
            .await?;
        Ok(found
            .first()
            .and_then(|raw| raw.get("Id").or_else(|| raw.get("ID")))
            .and_then(Value::as_i64))
    }
}

#[async_trait]
impl UpdateCore for SiteItemUpdater {
    async fn update_list_item(&self, item: &mut ListItem, ctx: &UpdateContext) -> Result<CoreOutcome> {
        let path = self.resolver.resolve_item(item)?;
        let explicit: BTreeSet<String> = item.fields.keys().cloned().collect();
        for rule in &self.rules {
            debug!(rule = rule.name(), "applying rule");
            rule.apply(item, ctx)
                .await
                .map_err(SharePointError::from_anyhow)?;
        }

        let key = ListKey::site_list(self.site.name(), &path.list);
        let info = self.metadata.get_list_info(&key, &ctx.cancel).await?;

        let mut outcome = CoreOutcome::default();
        let fields = self.map_fields(item, &explicit, &info, &mut outcome.messages)?;
        let upload = match &item.document {
            Some(document) => Some((self.document_folder(item, document, &info)?, document)),
            None => None,
        };

        let mut target_id = item.id;
        if target_id == 0 {
            if let Some(existing) = self.find_synced_item(item, &info, ctx).await? {
                debug!(id = existing, "matched existing item by sync id");
                target_id = existing;
            }
        }

        let list = ListRef::Id(info.list_id);
        let id = match upload {
            Some((folder, document)) => {
                let id = self
                    .site
                    .upload_file(
                        &list,
                        target_id,
                        &folder,
                        &document.name,
                        &document.file_content,
                        &ctx.cancel,
                    )
                    .await?;
                debug!(id, folder = %folder, name = %document.name, "document content stored");
                if !fields.is_empty() {
                    self.site
                        .update_list_item(&list, id, &fields, &ctx.cancel)
                        .await?;
                }
                id
            }
            None => {
                self.site
                    .update_list_item(&list, target_id, &fields, &ctx.cancel)
                    .await?
            }
        };
        let created = target_id == 0;
        item.id = id;
        item.site = Some(self.site.name().to_string());

        info!(list = %info.full_name(), id, created, "list item written");
        outcome.messages.push(OperationMessage::info(format!(
            "{} item {} in list {}",
            if created { "created" } else { "updated" },
            id,
            info.full_name()
        )));
        outcome.value = Some(json!({
            "id": id,
            "list": info.full_name(),
            "created": created,
        }));
        Ok(outcome)
    }
}
