use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use counterstress::{
    Backoff, DEFAULT_CONCURRENCY, DEFAULT_TOTAL_UNITS, DurabilityMode, HarnessConfig,
    HttpStressConfig, RetryPolicy, StorageLocation, run_http_stress, run_store,
};
use counterstress::http::{DEFAULT_BASE_URL, DEFAULT_HTTP_UNITS};
use counterstress::retry::DEFAULT_MAX_ATTEMPTS;
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "counterstress")]
#[command(about = "Hammer one shared counter with concurrent increment transactions")]
pub struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run against the in-process transactional store
    Store(StoreArgs),
    /// Run against a counter service over HTTP
    Http(HttpArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Commit log path, or `:memory:`
    #[arg(long, default_value = ":memory:")]
    location: String,
    #[arg(long, default_value_t = 60_000)]
    busy_timeout_ms: u64,
    #[arg(long, default_value = "relaxed")]
    durability: DurabilityMode,
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    #[arg(long, default_value_t = DEFAULT_TOTAL_UNITS)]
    units: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    #[arg(long, default_value = "immediate")]
    backoff: Backoff,
    /// Random extra delay between attempts, up to this many milliseconds
    #[arg(long)]
    jitter_ms: Option<u64>,
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct HttpArgs {
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    url: String,
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
    #[arg(long, default_value_t = DEFAULT_HTTP_UNITS)]
    units: usize,
    /// Retry 429/503 answers with exponential backoff
    #[arg(long)]
    retry: bool,
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,
    #[arg(long)]
    json: bool,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        init_tracing(self.verbose);
        match self.command {
            Command::Store(args) => run_store_command(args).await,
            Command::Http(args) => run_http_command(args).await,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_store_command(args: StoreArgs) -> Result<()> {
    let mut config = HarnessConfig::new(StorageLocation::parse(&args.location))
        .busy_wait_timeout(Duration::from_millis(args.busy_timeout_ms))
        .durability_mode(args.durability)
        .concurrency(args.concurrency)
        .total_units(args.units)
        .max_attempts(args.max_attempts)
        .backoff(args.backoff);
    if let Some(ms) = args.jitter_ms {
        config = config.jitter(Duration::from_millis(ms));
    }

    let run = run_store(&config)
        .await
        .with_context(|| format!("stress run against {} failed", config.storage_location))?;
    print_report(&run.result, &run, args.json)
}

async fn run_http_command(args: HttpArgs) -> Result<()> {
    let config = HttpStressConfig {
        base_url: args.url,
        concurrency: args.concurrency,
        total_units: args.units,
        retry: args
            .retry
            .then(|| RetryPolicy::new(args.max_attempts).backoff(Backoff::exponential())),
        ..HttpStressConfig::default()
    };

    let report = run_http_stress(&config)
        .await
        .with_context(|| format!("stress run against {} failed", config.base_url))?;
    print_report(&report, &report, args.json)
}

fn print_report<D: Display, S: Serialize>(text: &D, json: &S, as_json: bool) -> Result<()> {
    if as_json {
        let out = serde_json::to_string_pretty(json).context("Failed to serialize report")?;
        println!("{out}");
    } else {
        println!("{text}");
    }
    Ok(())
}
