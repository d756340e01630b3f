//! List item update pipeline.
//!
//! A [`ListUpdater`] serves one site. It runs the registered behaviors'
//! `before_update` hooks in priority order, the site's [`UpdateCore`], then
//! the `after_update` hooks in reverse order. The first failing stage stops
//! the run; every outcome is reported as an [`UpdateResult`].
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::SharePointError;
use crate::model::ListItem;

pub mod aggregator;
pub mod behavior;
pub mod rules;
pub mod site_core;

pub use self::aggregator::{ListUpdaterFactory, SharePointUpdater, SiteListUpdaterFactory};
pub use self::behavior::{BehaviorRegistry, ListUpdaterBehavior};
pub use self::rules::ListItemUpdateRule;
pub use self::site_core::{CoreOutcome, SiteItemUpdater, UpdateCore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    NotStarted,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationMessage {
    pub level: MessageLevel,
    pub message: String,
}

impl OperationMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            message: message.into(),
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateResult {
    pub state: UpdateState,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub messages: Vec<OperationMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

impl Default for UpdateResult {
    fn default() -> Self {
        Self {
            state: UpdateState::NotStarted,
            elapsed: Duration::ZERO,
            messages: Vec::new(),
            value: None,
        }
    }
}

impl UpdateResult {
    /// A failed result for a run that never reached the pipeline.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        let mut result = Self::default();
        result.fail(error);
        result
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.state = UpdateState::Failed;
        self.messages.push(OperationMessage::error(error.to_string()));
    }

    pub fn is_success(&self) -> bool {
        self.state == UpdateState::Succeeded
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.level == MessageLevel::Error)
            .map(|m| m.message.as_str())
    }
}

/// Per-request context threaded through behaviors, rules and the core.
#[derive(Debug, Clone, Default)]
pub struct UpdateContext {
    pub cancel: CancellationToken,
    /// Stamped into the sync tool field when set.
    pub sync_tool: Option<String>,
}

impl UpdateContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            sync_tool: None,
        }
    }

    pub fn with_sync_tool(mut self, tool: impl Into<String>) -> Self {
        self.sync_tool = Some(tool.into());
        self
    }

    fn ensure_active(&self) -> Result<(), SharePointError> {
        if self.cancel.is_cancelled() {
            return Err(SharePointError::Cancelled);
        }
        Ok(())
    }
}

pub struct ListUpdater {
    site_name: String,
    behaviors: Vec<Arc<dyn ListUpdaterBehavior>>,
    core: Arc<dyn UpdateCore>,
}

impl std::fmt::Debug for ListUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListUpdater")
            .field("site_name", &self.site_name)
            .field(
                "behaviors",
                &self.behaviors.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ListUpdater {
    /// `behaviors` must already be in ascending priority order.
    pub fn new(
        site_name: impl Into<String>,
        behaviors: Vec<Arc<dyn ListUpdaterBehavior>>,
        core: Arc<dyn UpdateCore>,
    ) -> Self {
        Self {
            site_name: site_name.into(),
            behaviors,
            core,
        }
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    #[instrument(skip_all, fields(site = %self.site_name, item = %item))]
    pub async fn update_list_item(&self, item: &mut ListItem, ctx: &UpdateContext) -> UpdateResult {
        let started = Instant::now();
        let mut result = UpdateResult::default();
        match self.run_stages(item, ctx, &mut result).await {
            Ok(()) => result.state = UpdateState::Succeeded,
            Err(err) => {
                warn!(error = %format!("{:#}", err), "list item update failed");
                result.fail(format!("{:#}", err));
            }
        }
        result.elapsed = started.elapsed();
        debug!(elapsed_ms = result.elapsed.as_millis() as u64, state = ?result.state, "list item update done");
        result
    }

    async fn run_stages(
        &self,
        item: &mut ListItem,
        ctx: &UpdateContext,
        result: &mut UpdateResult,
    ) -> anyhow::Result<()> {
        for behavior in &self.behaviors {
            ctx.ensure_active()?;
            behavior.before_update(item, ctx).await.map_err(|err| {
                err.context(format!("behavior '{}' failed before update", behavior.name()))
            })?;
        }

        ctx.ensure_active()?;
        let outcome = self.core.update_list_item(item, ctx).await?;
        result.value = outcome.value;
        result.messages.extend(outcome.messages);

        for behavior in self.behaviors.iter().rev() {
            ctx.ensure_active()?;
            behavior.after_update(item, ctx).await.map_err(|err| {
                err.context(format!("behavior '{}' failed after update", behavior.name()))
            })?;
        }
        Ok(())
    }

    pub async fn finalize(&self) -> anyhow::Result<()> {
        self.core.finalize().await
    }
}
