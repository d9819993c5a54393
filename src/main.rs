mod catalog;
mod config;
mod credentials;
mod fetch;
mod model;
mod pipeline;
mod sources;
mod text;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::Settings;
use crate::fetch::{Fetch, HttpFetcher};
use crate::model::{record_id, validate_record, Platform};
use crate::sources::envato::EnvatoSource;
use crate::sources::{framer, webflow, Source};

#[derive(Parser)]
#[command(name = "template_catalog", about = "Website template catalog aggregator")]
struct Cli {
    /// Catalog JSON file (overrides `catalog_path` from settings)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull ThemeForest items from the Envato API (needs ENVATO_API_TOKEN)
    Envato,
    /// Scrape the Webflow template listings
    Webflow,
    /// Scrape the Framer marketplace listings
    Framer,
    /// Run every source in turn
    All,
    /// Show catalog counts and schema issues
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(path) = cli.catalog {
        settings.catalog_path = path;
    }

    let result = match cli.command {
        Commands::Stats => print_stats(&settings),
        command => {
            let fetcher = HttpFetcher::new(settings.request_timeout())?;
            let platforms: &[Platform] = match command {
                Commands::Envato => &[Platform::ThemeForest],
                Commands::Webflow => &[Platform::Webflow],
                Commands::Framer => &[Platform::Framer],
                _ => &Platform::ALL,
            };
            let mut result = Ok(());
            for &platform in platforms {
                if let Err(e) = run_platform(platform, &settings, &fetcher).await {
                    // later sources still run
                    eprintln!("{} run failed: {:#}", platform, e);
                    result = Err(e);
                }
            }
            result
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_platform(platform: Platform, settings: &Settings, fetcher: &dyn Fetch) -> anyhow::Result<()> {
    let source: Box<dyn Source> = match platform {
        Platform::ThemeForest => {
            let Some(token) = credentials::resolve_token(credentials::TOKEN_VAR, &settings.env_file)
            else {
                warn!(
                    "{} not set (env or {}); skipping Envato, catalog left untouched",
                    credentials::TOKEN_VAR,
                    settings.env_file.display()
                );
                println!("Skipped {}: no API token.", platform);
                return Ok(());
            };
            Box::new(EnvatoSource::new(token, settings.envato.clone()))
        }
        Platform::Webflow => Box::new(webflow::source(settings.webflow.clone())),
        Platform::Framer => Box::new(framer::source(settings.framer.clone())),
    };

    let report = pipeline::run_source(source.as_ref(), fetcher, &settings.catalog_path).await?;
    println!(
        "Saved {} {} templates ({} from other platforms, {} total) to {}",
        report.fetched,
        report.platform,
        report.kept,
        report.total,
        settings.catalog_path.display()
    );
    Ok(())
}

fn print_stats(settings: &Settings) -> anyhow::Result<()> {
    let path = &settings.catalog_path;
    if !path.exists() {
        println!("No catalog at {}. Run a source first.", path.display());
        return Ok(());
    }

    let catalog = catalog::load(path);
    println!("Catalog:   {}", path.display());
    println!("Source:    {}", catalog.source);
    println!("Updated:   {}", catalog.last_updated);
    println!("Total:     {}", catalog.templates.len());
    let ids: Vec<Option<&str>> = catalog.templates.iter().map(record_id).collect();
    for platform in Platform::ALL {
        let count = ids.iter().flatten().filter(|id| platform.owns(id)).count();
        println!("  {:<12} {}", platform.name(), count);
    }
    let foreign = ids
        .iter()
        .filter(|id| id.and_then(Platform::from_id).is_none())
        .count();
    if foreign > 0 {
        println!("  {:<12} {}", "(unknown)", foreign);
    }

    let issues: Vec<_> = catalog.templates.iter().flat_map(validate_record).collect();
    println!("Issues:    {}", issues.len());
    for issue in issues.iter().take(20) {
        println!("  {}", issue);
    }
    if issues.len() > 20 {
        println!("  ... and {} more", issues.len() - 20);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
