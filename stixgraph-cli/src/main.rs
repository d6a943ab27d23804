//! stixgraph CLI
//!
//! Indicator lifecycle operations against a remote entity store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stixgraph_core::{IndicatorInput, PagingArgs, Principal, ValidityConfig, DEFAULT_PAGE_SIZE};
use stixgraph_domain::{
    FileCheckpoint, IndicatorService, NoCheckpoint, PatternExtractor, RetirementConfig,
    ServiceConfig, SharedCheckpoint, StixPatternExtractor,
};
use stixgraph_store::{HttpStore, HttpStoreConfig, TracingNotifier};

#[derive(Parser)]
#[command(name = "stixgraph")]
#[command(author, version, about = "stixgraph: indicator lifecycle engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,

    /// Entity store API (or set STIXGRAPH_STORE_URL env var)
    #[arg(long, env = "STIXGRAPH_STORE_URL", default_value = "http://127.0.0.1:4000/api")]
    store_url: String,

    /// Bearer token for the store (or set STIXGRAPH_STORE_TOKEN env var)
    #[arg(long, env = "STIXGRAPH_STORE_TOKEN")]
    token: Option<String>,

    /// Store request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// TTL tables in TOML (or set STIXGRAPH_VALIDITY_CONFIG env var)
    #[arg(long, env = "STIXGRAPH_VALIDITY_CONFIG")]
    validity_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an indicator from a JSON input file
    Add {
        /// Indicator input (JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Skip creating observables from the pattern
        #[arg(long)]
        no_observables: bool,

        /// Principal the creation is attributed to
        #[arg(long)]
        principal: Option<String>,
    },

    /// Show the validity window an input would receive
    Validity {
        /// Indicator input (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show one indicator by STIX id or internal id
    Show { id: String },

    /// List indicators
    List {
        /// Page size
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        first: usize,

        /// Resume after this cursor
        #[arg(long)]
        after: Option<String>,

        /// Match against name and aliases
        #[arg(long)]
        search: Option<String>,
    },

    /// List observables linked to an indicator
    Observables { indicator_id: String },

    /// Delete every indicator
    Clear {
        /// Keep the paging cursor here so an interrupted run can resume
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Indicators deleted per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },

    /// Print the observables a STIX pattern names
    Extract { pattern: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match &cli.command {
        Commands::Add {
            file,
            no_observables,
            principal,
        } => {
            let service = build_service(&cli, None, DEFAULT_PAGE_SIZE)?;
            add_indicator(&service, file, !no_observables, principal.as_deref()).await?;
        }
        Commands::Validity { file } => {
            let service = build_service(&cli, None, DEFAULT_PAGE_SIZE)?;
            let input = read_input(file)?;
            let window = service.compute_validity(&input).await?;
            println!("🕒 Key: {} (table '{}')", window.ttl_key, window.table);
            println!("   TTL: {} days", window.ttl_days);
            println!("   Valid: {} → {}", window.valid_from, window.valid_until);
        }
        Commands::Show { id } => {
            let service = build_service(&cli, None, DEFAULT_PAGE_SIZE)?;
            print_json(&service.find_by_id(id).await?)?;
        }
        Commands::List {
            first,
            after,
            search,
        } => {
            let service = build_service(&cli, None, DEFAULT_PAGE_SIZE)?;
            let mut args = PagingArgs::default().first(*first).after(after.clone());
            if let Some(search) = search {
                args = args.search(search);
            }
            list_indicators(&service, &args).await?;
        }
        Commands::Observables { indicator_id } => {
            let service = build_service(&cli, None, DEFAULT_PAGE_SIZE)?;
            let refs = service.observable_refs(indicator_id).await?;
            for observable in refs.nodes() {
                println!(
                    "{}  {:<18} {}",
                    observable.id, observable.observable_type, observable.observable_value
                );
            }
            println!("\n📊 {} observables", refs.page_info.global_count);
        }
        Commands::Clear {
            checkpoint,
            page_size,
        } => {
            let service = build_service(&cli, checkpoint.as_deref(), *page_size)?;
            let report = service.clear().await?;
            if let Some(cursor) = &report.resumed_from {
                println!("↩️  Resumed after cursor {}", cursor);
            }
            println!(
                "🧹 Deleted {} indicators over {} pages ({} already gone)",
                report.deleted, report.pages, report.already_missing
            );
        }
        Commands::Extract { pattern } => {
            let observables = StixPatternExtractor.extract(pattern);
            if observables.is_empty() {
                println!("No observables in pattern");
            }
            for observable in observables {
                println!("{:<18} {}", observable.observable_type, observable.value);
            }
        }
    }

    Ok(())
}

fn build_service(
    cli: &Cli,
    checkpoint: Option<&Path>,
    page_size: usize,
) -> Result<IndicatorService> {
    let validity = match &cli.validity_config {
        Some(path) => ValidityConfig::load(path)
            .with_context(|| format!("loading validity config {}", path.display()))?,
        None => ValidityConfig::default(),
    };

    let store = HttpStore::new(
        HttpStoreConfig::new(&cli.store_url)
            .with_token(cli.token.clone())
            .with_timeout(cli.timeout),
    )
    .context("configuring store client")?;
    info!("Using store at {}", cli.store_url);

    let checkpoint: SharedCheckpoint = match checkpoint {
        Some(path) => Arc::new(FileCheckpoint::new(path)),
        None => Arc::new(NoCheckpoint),
    };

    let config = ServiceConfig::default()
        .with_validity(validity)
        .with_retirement(RetirementConfig { page_size })
        .with_checkpoint(checkpoint);

    Ok(IndicatorService::new(
        Arc::new(store),
        Arc::new(TracingNotifier),
        config,
    ))
}

fn read_input(path: &Path) -> Result<IndicatorInput> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn add_indicator(
    service: &IndicatorService,
    file: &Path,
    create_observables: bool,
    principal: Option<&str>,
) -> Result<()> {
    let input = read_input(file)?;
    let principal = principal.map(|name| Principal::new(name, name));

    let created = service
        .add_indicator(principal.as_ref(), input, create_observables)
        .await?;
    let indicator = &created.indicator;

    println!("✅ Indicator {} created", indicator.id);
    if let Some(stix_id) = &indicator.stix_id_key {
        println!("   STIX id: {}", stix_id);
    }
    println!("   Score: {}", indicator.score);
    println!("   Valid: {} → {}", indicator.valid_from, indicator.valid_until);

    if let Some(report) = &created.observables {
        println!("🔗 {}", report.summary());
        for failure in &report.failures {
            println!(
                "   ⚠️  {} '{}': {}",
                failure.descriptor.observable_type, failure.descriptor.value, failure.error
            );
        }
    }

    Ok(())
}

async fn list_indicators(service: &IndicatorService, args: &PagingArgs) -> Result<()> {
    let page = service.find_all(args).await?;

    for indicator in page.nodes() {
        println!(
            "{}  {:<32} score {:>3}  until {}",
            indicator.id,
            indicator.name,
            indicator.score,
            indicator.valid_until.format("%Y-%m-%d")
        );
    }

    println!(
        "\n📊 {} of {} indicators",
        page.edges.len(),
        page.page_info.global_count
    );
    if page.page_info.has_next_page {
        if let Some(cursor) = page.last_cursor() {
            println!("   Next page: --after '{}'", cursor);
        }
    }

    Ok(())
}
