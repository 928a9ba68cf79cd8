use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{error, info, warn};

use uniscrape::aggregate::{SiteScrapeResult, SiteStatus};
use uniscrape::config::{AppConfig, ConfigOverrides};
use uniscrape::core::{BatchSummary, UniScraper};
use uniscrape::logging::{init_logging, LogContext};

#[derive(Parser)]
#[command(name = "uniscrape")]
#[command(about = "Crawl institutional websites for admissions, fee and scholarship data")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<String>,

    #[arg(long, global = true, help = "Fetch directly without proxy rotation")]
    no_proxies: bool,

    #[arg(long, global = true, help = "Fixed delay between page requests in seconds")]
    delay: Option<f64>,

    #[arg(long, global = true, help = "Print results as JSON on stdout")]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every configured site
    ScrapeAll {
        #[arg(long, help = "Seconds to wait between sites")]
        site_delay: Option<u64>,
    },

    /// Scrape one configured site, matched by name
    ScrapeSite {
        #[arg(help = "Site name or a fragment of it")]
        name: String,
    },

    /// Scrape an ad-hoc URL
    ScrapeUrl {
        #[arg(help = "Seed URL")]
        url: String,
    },

    /// List configured sites
    ListSites,

    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from_file(path).await?;
            ConfigOverrides::apply(&mut config);
            config
        }
        None => AppConfig::load().await?,
    };
    apply_flags(&cli, &mut config);
    config.validate()?;

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;

    let context = LogContext::new("main", "startup");
    uniscrape::log_info!(context, "uniscrape v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::ListSites => list_sites(&config),
        Commands::Validate => {
            println!("Configuration is valid ({} sites)", config.sites.len());
            Ok(())
        }
        Commands::ScrapeAll { site_delay } => {
            if config.sites.is_empty() {
                return Err(anyhow::anyhow!("No sites configured"));
            }
            let delay = Duration::from_secs(site_delay.unwrap_or(config.fetch.delay_between_sites_seconds));
            let sites = config.sites.clone();

            let app = UniScraper::new(config).await?;
            watch_for_interrupt(&app);
            let summary = app.scrape_batch(&sites, delay).await;
            print_summary(&summary, cli.json)?;
            log_run_stats(&app).await;
            Ok(())
        }
        Commands::ScrapeSite { name } => {
            let site = config
                .find_site(&name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No configured site matches '{}'", name))?;

            let app = UniScraper::new(config).await?;
            watch_for_interrupt(&app);
            let result = app.scrape_site(&site).await;
            print_result(&result, cli.json)?;
            log_run_stats(&app).await;
            Ok(())
        }
        Commands::ScrapeUrl { url } => {
            let app = UniScraper::new(config).await?;
            watch_for_interrupt(&app);
            let result = app.scrape_url(&url).await;
            print_result(&result, cli.json)?;
            log_run_stats(&app).await;
            Ok(())
        }
    }
}

fn apply_flags(cli: &Cli, config: &mut AppConfig) {
    if cli.no_proxies {
        config.proxy.enabled = false;
    }

    if let Some(delay) = cli.delay {
        config.fetch.delay_min_seconds = delay;
        config.fetch.delay_max_seconds = delay;
    }
}

/// Raise the stop flag on Ctrl-C; the run ends after the page in flight
fn watch_for_interrupt(app: &UniScraper) {
    let stop = app.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, finishing the current page");
                stop.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

fn list_sites(config: &AppConfig) -> Result<()> {
    println!("{:<40} {:<20} {:<50}", "Name", "City", "URL");
    println!("{}", "-".repeat(110));

    for site in &config.sites {
        println!(
            "{:<40} {:<20} {:<50}",
            site.name,
            site.city.as_deref().unwrap_or("-"),
            site.url
        );
    }

    Ok(())
}

fn print_result(result: &SiteScrapeResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{} [{}]", result.site_name, result.status);
    println!("  URL:            {}", result.url);
    println!("  Pages fetched:  {}", result.pages_fetched);
    for (category, records) in &result.records {
        println!("  {:<15} {}", format!("{}:", category), records.len());
    }
    if let Some(message) = &result.error_message {
        println!("  Error:          {}", message);
    }

    Ok(())
}

fn print_summary(summary: &BatchSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{:<40} {:<10} {:>6} {:>8}", "Site", "Status", "Pages", "Records");
    println!("{}", "-".repeat(67));
    for result in &summary.results {
        println!(
            "{:<40} {:<10} {:>6} {:>8}",
            result.site_name, result.status, result.pages_fetched, result.total_records
        );
    }
    println!();
    println!(
        "{} completed, {} partial, {} failed, {} records in total",
        summary.completed, summary.partial, summary.failed, summary.total_records
    );
    if summary.interrupted {
        println!("Run interrupted before every site was visited");
    }

    let failed: Vec<_> = summary
        .results
        .iter()
        .filter(|r| r.status == SiteStatus::Failed)
        .collect();
    for result in failed {
        println!("  {}: {}", result.site_name, result.error_message.as_deref().unwrap_or("unknown error"));
    }

    Ok(())
}

async fn log_run_stats(app: &UniScraper) {
    let stats = app.stats().await;
    info!(
        "Requests: {} total, {} successful, {} failed ({} bot detections, {} timeouts, {} session refreshes)",
        stats.fetch.total_requests,
        stats.fetch.successful_requests,
        stats.fetch.failed_requests,
        stats.fetch.bot_detections,
        stats.fetch.timeouts,
        stats.fetch.session_refreshes
    );
    if let Some(proxies) = stats.proxies {
        info!(
            "Proxies: {} working, {} failed, average response {:?}",
            proxies.working, proxies.failed, proxies.avg_response_time
        );
    }
    info!(
        "Oracle: {} calls, {} failures, {} exhausted",
        stats.oracle.calls, stats.oracle.failures, stats.oracle.exhausted
    );
}
