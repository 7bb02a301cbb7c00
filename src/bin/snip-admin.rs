use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use snip::cache::build_cache;
use snip::codegen::CodeGenerator;
use snip::config::Config;
use snip::models::Link;
use snip::resolver::{RedirectResolver, ResolverOptions};
use snip::storage;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "snip-admin")]
#[command(about = "Snip link management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shorten a URL on behalf of an owner
    Shorten {
        /// Numeric owner id
        owner_id: i64,
        url: String,
    },
    /// List every link created by an owner
    List { owner_id: i64 },
    /// Show click statistics for one link
    Stats { owner_id: i64, code: String },
    /// Delete a link owned by an owner
    Delete { owner_id: i64, code: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage = storage::connect(&config.database).await?;
    // With the in-process cache this only touches our own copy; a Redis cache is shared with the server
    let cache = build_cache(&config.cache).await?;
    let generator = CodeGenerator::new(Arc::clone(&storage), &config.codes)
        .context("invalid short code configuration")?;
    let resolver = RedirectResolver::new(
        storage,
        cache,
        generator,
        None,
        ResolverOptions::from_config(&config),
    );

    match cli.command {
        Commands::Shorten { owner_id, url } => {
            let link = resolver.shorten(owner_id, &url).await?;
            println!("✓ {} -> {}", link.short_code, link.original_url);
        }
        Commands::List { owner_id } => {
            let links = resolver.links_for_owner(owner_id).await?;
            if links.is_empty() {
                println!("No links for owner {}", owner_id);
            } else {
                println!("{:<12} {:>8}  {}", "CODE", "CLICKS", "URL");
                for link in links {
                    println!("{:<12} {:>8}  {}", link.short_code, link.clicks, link.original_url);
                }
            }
        }
        Commands::Stats { owner_id, code } => {
            let link = resolver.stats(&code, owner_id).await?;
            print_stats(&link);
        }
        Commands::Delete { owner_id, code } => {
            if resolver.delete(&code, owner_id).await? {
                println!("✓ Deleted '{}'", code);
            } else {
                bail!("no link '{}' owned by {}", code, owner_id);
            }
        }
    }

    Ok(())
}

fn print_stats(link: &Link) {
    let joined = |set: &std::collections::BTreeSet<String>| {
        if set.is_empty() {
            "-".to_string()
        } else {
            set.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };
    let time = |ms: Option<i64>| {
        ms.and_then(chrono::DateTime::from_timestamp_millis)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    };

    println!("Code:        {}", link.short_code);
    println!("URL:         {}", link.original_url);
    println!("Clicks:      {}", link.clicks);
    println!("First click: {}", time(link.first_click_at));
    println!("Last click:  {}", time(link.last_click_at));
    println!("Countries:   {}", joined(&link.countries));
    println!("Cities:      {}", joined(&link.cities));
    println!("Devices:     {}", joined(&link.devices));
    println!("OS:          {}", joined(&link.operating_systems));
    println!("Browsers:    {}", joined(&link.browsers));
}
