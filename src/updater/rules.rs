//! Rules applied to an item before it is written.
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::UpdateContext;
use crate::config::DefaultSettings;
use crate::error::SharePointError;
use crate::model::{FieldValue, ListItem};

#[async_trait]
pub trait ListItemUpdateRule: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, item: &mut ListItem, ctx: &UpdateContext) -> anyhow::Result<()>;
}

/// A rule that only concerns document library items.
#[async_trait]
pub trait DocumentUpdateRule: Send + Sync {
    fn name(&self) -> &str;

    /// Called only for items carrying a document.
    async fn apply_document(&self, item: &mut ListItem, ctx: &UpdateContext) -> anyhow::Result<()>;
}

/// Runs a [`DocumentUpdateRule`] as a list item rule, skipping plain items.
#[derive(Debug, Clone)]
pub struct DocumentRule<R>(pub R);

#[async_trait]
impl<R: DocumentUpdateRule> ListItemUpdateRule for DocumentRule<R> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn apply(&self, item: &mut ListItem, ctx: &UpdateContext) -> anyhow::Result<()> {
        if item.document.is_none() {
            return Ok(());
        }
        self.0.apply_document(item, ctx).await
    }
}

/// Fills configured default values for fields the item leaves unset.
#[derive(Debug, Clone, Default)]
pub struct DefaultFieldsRule {
    fields: BTreeMap<String, Value>,
}

impl DefaultFieldsRule {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

#[async_trait]
impl ListItemUpdateRule for DefaultFieldsRule {
    fn name(&self) -> &str {
        "default-fields"
    }

    async fn apply(&self, item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        for (name, value) in &self.fields {
            item.fields
                .entry(name.clone())
                .or_insert_with(|| FieldValue::from(value.clone()));
        }
        Ok(())
    }
}

/// Records which tool wrote the item.
#[derive(Debug, Clone)]
pub struct SyncToolRule {
    field: String,
}

impl SyncToolRule {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl ListItemUpdateRule for SyncToolRule {
    fn name(&self) -> &str {
        "sync-tool"
    }

    async fn apply(&self, item: &mut ListItem, ctx: &UpdateContext) -> anyhow::Result<()> {
        if let Some(tool) = ctx.sync_tool.as_deref().filter(|t| !t.is_empty()) {
            item.fields
                .insert(self.field.clone(), FieldValue::Text(tool.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxFileSizeRule {
    max: u64,
}

impl MaxFileSizeRule {
    /// `max == 0` accepts any size.
    pub fn new(max: u64) -> Self {
        Self { max }
    }
}

#[async_trait]
impl DocumentUpdateRule for MaxFileSizeRule {
    fn name(&self) -> &str {
        "max-file-size"
    }

    async fn apply_document(&self, item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        let Some(document) = item.as_document() else {
            return Ok(());
        };
        if self.max > 0 && document.size() > self.max {
            return Err(SharePointError::MaxFileSizeExceeded {
                name: document.name.clone(),
                size: document.size(),
                max: self.max,
            }
            .into());
        }
        Ok(())
    }
}

/// Copies the document's descriptive parts into their configured fields.
#[derive(Debug, Clone)]
pub struct DocumentFieldsRule {
    text_content_field: String,
    original_name_field: String,
    parent_id_field: String,
    group_field: String,
    keywords_field: String,
}

impl DocumentFieldsRule {
    pub fn new(defaults: &DefaultSettings) -> Self {
        Self {
            text_content_field: defaults.text_content_field.clone(),
            original_name_field: defaults.original_name_field.clone(),
            parent_id_field: defaults.parent_id_field.clone(),
            group_field: defaults.group_field.clone(),
            keywords_field: defaults.keywords_field.clone(),
        }
    }
}

#[async_trait]
impl DocumentUpdateRule for DocumentFieldsRule {
    fn name(&self) -> &str {
        "document-fields"
    }

    async fn apply_document(&self, item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        let Some(document) = item.document.clone() else {
            return Ok(());
        };
        let mut set = |field: &str, value: FieldValue| {
            if !field.is_empty() {
                item.fields.entry(field.to_string()).or_insert(value);
            }
        };
        if let Some(text) = document.text_content {
            set(&self.text_content_field, FieldValue::Text(text));
        }
        if let Some(name) = document.original_name {
            set(&self.original_name_field, FieldValue::Text(name));
        }
        if let Some(parent) = document.parent_id {
            set(&self.parent_id_field, FieldValue::Integer(parent));
        }
        if let Some(group) = document.group {
            set(&self.group_field, FieldValue::Text(group));
        }
        if !document.keywords.is_empty() {
            set(&self.keywords_field, FieldValue::Text(document.keywords.join("; ")));
        }
        Ok(())
    }
}

/// The standard rule set, in application order.
pub fn from_defaults(defaults: &DefaultSettings) -> Vec<Arc<dyn ListItemUpdateRule>> {
    vec![
        Arc::new(DocumentRule(MaxFileSizeRule::new(defaults.max_file_size))),
        Arc::new(DefaultFieldsRule::new(defaults.fields.clone())),
        Arc::new(DocumentRule(DocumentFieldsRule::new(defaults))),
        Arc::new(SyncToolRule::new(defaults.sync_tool_field.clone())),
    ]
}
