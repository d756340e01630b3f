use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use sharepoint_sync::client::{ItemQuery, RestSessionProvider};
use sharepoint_sync::config;
use sharepoint_sync::metadata::ListKey;
use sharepoint_sync::model::ListItem;
use sharepoint_sync::services::Services;
use sharepoint_sync::settings::SiteContext;
use sharepoint_sync::updater::behavior::TracingBehavior;
use sharepoint_sync::updater::{BehaviorRegistry, ListUpdaterBehavior, UpdateContext};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect every configured site and report which ones are usable
    Check,
    /// Print the cached schema of a list
    Schema {
        /// List full name, `<site>/<list>`
        list: String,
    },
    /// Query list items
    Items {
        /// List full name, `<site>/<list>`
        list: String,
        /// OData filter expression
        #[arg(long)]
        filter: Option<String>,
        /// Fields to select, comma separated
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
        #[arg(long)]
        top: Option<u32>,
    },
    /// Create or update one list item described by a JSON file
    Update {
        #[arg(long)]
        item: PathBuf,
        /// Value stamped into the sync tool field
        #[arg(long)]
        sync_tool: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let mut behaviors = BehaviorRegistry::new();
    behaviors.register(0, "tracing", |site: &SiteContext| {
        Arc::new(TracingBehavior::new(site.site_name.clone())) as Arc<dyn ListUpdaterBehavior>
    });

    let provider = RestSessionProvider::new(cfg.app.user_agent.clone());
    let services = Services::start(&cfg, &provider, behaviors).await;
    let outcome = run(&services, args.command).await;
    services.shutdown().await;

    if let Err(err) = &outcome {
        error!(error = %format!("{:#}", err), "command failed");
    }
    outcome
}

async fn run(services: &Services, command: Command) -> Result<()> {
    let cancel = services.cancel_token();
    match command {
        Command::Check => {
            let ready: Vec<&str> = services.updater.sites().collect();
            let sites: Vec<_> = services
                .store
                .list_sites()
                .map(|(name, settings)| {
                    let site = services.sites.get(name).ok();
                    json!({
                        "name": name,
                        "url": settings.site_url,
                        "ready": ready.contains(&name),
                        "title": site.as_ref().and_then(|s| s.title().map(str::to_string)),
                        "id": site.as_ref().and_then(|s| s.id()),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&sites)?);
            info!(ready = ready.len(), configured = sites.len(), "check finished");
            if ready.len() < sites.len() {
                bail!("{} of {} sites are not usable", sites.len() - ready.len(), sites.len());
            }
        }
        Command::Schema { list } => {
            let info = services
                .metadata
                .get_list_info(&ListKey::full_name(list), &cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(info.as_ref())?);
        }
        Command::Items {
            list,
            filter,
            select,
            top,
        } => {
            let path = services.resolver.resolve(Some(&list))?;
            let site = services.sites.get(&path.site)?;
            let query = ItemQuery {
                filter,
                select,
                top,
            };
            let items = site.get_list_items(&path.list, &query, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Command::Update { item, sync_tool } => {
            let raw = tokio::fs::read_to_string(&item)
                .await
                .with_context(|| format!("failed to read {}", item.display()))?;
            let mut list_item: ListItem = serde_json::from_str(&raw)
                .with_context(|| format!("invalid list item in {}", item.display()))?;
            let mut ctx = UpdateContext::new(cancel);
            ctx.sync_tool = sync_tool;

            let result = services.updater.update_list_item(&mut list_item, &ctx).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                bail!("update of {} failed", list_item);
            }
        }
    }
    Ok(())
}
