use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::UpdateContext;
use crate::model::ListItem;
use crate::settings::SiteContext;

/// Hooks wrapped around the core update. Both default to no-ops.
#[async_trait]
pub trait ListUpdaterBehavior: Send + Sync {
    fn name(&self) -> &str;

    async fn before_update(&self, _item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_update(&self, _item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type BehaviorFactory =
    Arc<dyn Fn(&SiteContext) -> Arc<dyn ListUpdaterBehavior> + Send + Sync>;

struct Registration {
    priority: i32,
    name: String,
    factory: BehaviorFactory,
}

/// Behaviors in ascending priority; equal priorities keep registration order.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    entries: Vec<Arc<Registration>>,
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.priority, &e.name)))
            .finish()
    }
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, priority: i32, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&SiteContext) -> Arc<dyn ListUpdaterBehavior> + Send + Sync + 'static,
    {
        self.entries.push(Arc::new(Registration {
            priority,
            name: name.into(),
            factory: Arc::new(factory),
        }));
        // Stable, so ties stay in registration order.
        self.entries.sort_by_key(|e| e.priority);
        self
    }

    /// Registers a shared instance used for every site.
    pub fn register_shared(
        &mut self,
        priority: i32,
        behavior: Arc<dyn ListUpdaterBehavior>,
    ) -> &mut Self {
        let name = behavior.name().to_string();
        self.register(priority, name, move |_| behavior.clone())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the ordered behavior instances for one site.
    pub fn build(&self, site: &SiteContext) -> Vec<Arc<dyn ListUpdaterBehavior>> {
        self.entries.iter().map(|e| (e.factory)(site)).collect()
    }
}

/// Logs each item as it enters and leaves the pipeline.
#[derive(Debug, Clone)]
pub struct TracingBehavior {
    site: String,
}

impl TracingBehavior {
    pub fn new(site: impl Into<String>) -> Self {
        Self { site: site.into() }
    }
}

#[async_trait]
impl ListUpdaterBehavior for TracingBehavior {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn before_update(&self, item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        info!(site = %self.site, item = %item, "updating list item");
        Ok(())
    }

    async fn after_update(&self, item: &mut ListItem, _ctx: &UpdateContext) -> anyhow::Result<()> {
        info!(site = %self.site, item = %item, "list item updated");
        Ok(())
    }
}
