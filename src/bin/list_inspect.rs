use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use sharepoint_sync::client::{ListRef, RestSessionProvider, SessionProvider};
use sharepoint_sync::config;
use sharepoint_sync::metadata::{FieldKind, ListInfo};
use sharepoint_sync::names::ListNameResolver;
use sharepoint_sync::settings::SiteSettingsStore;

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// List full name, `<site>/<list>`
    #[arg(long)]
    list: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let store = SiteSettingsStore::new(cfg.sharepoint.clone());
    let path = ListNameResolver::new(&cfg.sharepoint.defaults).resolve(Some(&args.list))?;
    let (site_name, site) = store.site_settings(&path.site)?;
    let account = store.resolve_account(site_name, None)?;

    let provider = RestSessionProvider::new(cfg.app.user_agent.clone());
    let session = provider.connect(site, Some(&account)).await?;
    let web = session.web().await?;
    let schema = session.get_list_schema(&ListRef::parse(&path.list)).await?;
    let info = ListInfo::from_schema(site_name, &web.url, Some(web.id), &schema);

    println!("List: {} ({})", info.full_name(), info.list_id);
    println!("Fields:");
    for field in &info.fields {
        let kind = match &field.kind {
            FieldKind::Lookup { list_id, field, .. } => format!(
                "lookup -> {}/{}",
                list_id.map(|id| id.to_string()).unwrap_or_default(),
                field.as_deref().unwrap_or("Title")
            ),
            FieldKind::Other { code } => format!("other({})", code),
            other => format!("{:?}", other).to_lowercase(),
        };
        let flags = match (field.read_only, field.hidden) {
            (true, true) => " [read-only, hidden]",
            (true, false) => " [read-only]",
            (false, true) => " [hidden]",
            (false, false) => "",
        };
        println!("  {} ({}) -> {}{}", field.name, field.title, kind, flags);
    }
    Ok(())
}
