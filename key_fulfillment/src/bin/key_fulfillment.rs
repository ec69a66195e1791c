use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diesel::SqliteConnection;
use serde_json::json;
use tokio::sync::mpsc;

use key_fulfillment::clock::{Clock, SystemClock};
use key_fulfillment::config::{Config, load_config_path, normalize_config};
use key_fulfillment::db::{connection::connect_sqlite, migrate};
use key_fulfillment::fulfillment::notifier::LogNotifier;
use key_fulfillment::fulfillment::{FulfillmentOrchestrator, FulfillmentRun, OrderPlaced, consumer};
use key_fulfillment::inventory::{KeyInventory, StockKey};
use key_fulfillment::jobs::JobTracker;
use key_fulfillment::pricing::cache::PricingRuleCache;
use key_fulfillment::pricing::repo::load_rules_file;
use key_fulfillment::providers::ProviderSet;

#[derive(Parser)]
#[command(version, about = "Digital key fulfillment CLI")]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply pending schema migrations.
    Migrate,
    /// Stock keys from a JSON array file.
    ImportKeys {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Fulfill one order-placed signal (JSON file).
    Fulfill {
        #[arg(long, value_name = "FILE")]
        signal: PathBuf,
    },
    /// Fulfill every signal of a JSON-lines file through the channel consumer.
    Consume {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
    /// Run the order of an earlier fulfillment job again.
    Rerun {
        #[arg(long)]
        job: i32,
    },
    /// Revoke a key.
    Revoke {
        #[arg(long)]
        key: i32,
        #[arg(long)]
        reason: String,
    },
    /// Show a job.
    Job {
        #[arg(long)]
        id: i32,
    },
    /// Show available stock of a product.
    Stock {
        #[arg(long)]
        product: String,
    },
    /// Price a base amount (minor units) against the stored rules.
    Quote {
        #[arg(long)]
        base: i64,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "all")]
        provider: String,
    },
    /// Insert the `[[rules]]` of a TOML file.
    RulesLoad {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => load_config_path(p),
        None => {
            let mut cfg = Config::default();
            cfg.apply_env();
            normalize_config(&mut cfg)?;
            Ok(cfg)
        }
    }
}

fn build_orchestrator(cfg: &Config) -> Result<FulfillmentOrchestrator> {
    let providers = ProviderSet::from_ids(&cfg.enabled_wholesalers()?)
        .context("building configured providers")?;
    let clock = Arc::new(SystemClock);
    Ok(FulfillmentOrchestrator::new(
        KeyInventory::new(providers, cfg.provider_timeout(), clock.clone()),
        JobTracker::new(clock),
        Arc::new(LogNotifier),
        cfg.retry_policy(),
    ))
}

fn print_run(run: &FulfillmentRun) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "job": run.job, "result": run.result }))?
    );
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let s = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}

async fn consume_file(orch: &FulfillmentOrchestrator, conn: &mut SqliteConnection, file: &PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let mut signals = Vec::new();
    for (n, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let signal: OrderPlaced =
            serde_json::from_str(line).with_context(|| format!("line {}", n + 1))?;
        signals.push(signal);
    }
    let (tx, rx) = mpsc::channel(64);
    let producer = tokio::spawn(async move {
        for s in signals {
            if tx.send(s).await.is_err() {
                break;
            }
        }
    });
    let stats = consumer::run(orch, conn, rx).await;
    producer.await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;
    key_fulfillment::logging::init(&cfg.logging.level, cfg.logging.json)?;

    if let Cmd::Migrate = cli.cmd {
        return migrate::run_all(&cfg.database.url);
    }
    let mut conn = connect_sqlite(&cfg.database.url)?;

    match cli.cmd {
        Cmd::Migrate => {}
        Cmd::ImportKeys { file } => {
            let keys: Vec<StockKey> = read_json(&file)?;
            let inv = KeyInventory::new(ProviderSet::new(), cfg.provider_timeout(), Arc::new(SystemClock));
            let summary = inv.import_keys(&mut conn, &keys)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Cmd::Fulfill { signal } => {
            let signal: OrderPlaced = read_json(&signal)?;
            let orch = build_orchestrator(&cfg)?;
            print_run(&orch.fulfill(&mut conn, &signal).await?)?;
        }
        Cmd::Consume { file } => {
            let orch = build_orchestrator(&cfg)?;
            consume_file(&orch, &mut conn, &file).await?;
        }
        Cmd::Rerun { job } => {
            let orch = build_orchestrator(&cfg)?;
            print_run(&orch.rerun_job(&mut conn, job).await?)?;
        }
        Cmd::Revoke { key, reason } => {
            let inv = KeyInventory::new(ProviderSet::new(), cfg.provider_timeout(), Arc::new(SystemClock));
            let revoked = inv.revoke(&mut conn, key, &reason)?;
            println!(
                "{}",
                json!({ "key_id": revoked.id, "status": revoked.status, "order_id": revoked.order_id })
            );
        }
        Cmd::Job { id } => {
            let job = JobTracker::new(Arc::new(SystemClock)).get(&mut conn, id)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Cmd::Stock { product } => {
            let inv = KeyInventory::new(ProviderSet::new(), cfg.provider_timeout(), Arc::new(SystemClock));
            let available = inv.stock_level(&mut conn, &product)?;
            println!("{}", json!({ "product_id": product, "available": available }));
        }
        Cmd::Quote {
            base,
            category,
            provider,
        } => {
            let cache = PricingRuleCache::new();
            cache.refresh(&mut conn)?;
            let resolver = cfg.pricing_resolver();
            let margin = cache.applicable_margin(&resolver, base, category.as_deref(), &provider);
            let price = cache.calculate_price(&resolver, base, category.as_deref(), &provider);
            println!(
                "{}",
                json!({ "base": base, "margin_percentage": margin, "price": price })
            );
        }
        Cmd::RulesLoad { file } => {
            let n = load_rules_file(&mut conn, &file, SystemClock.now())?;
            println!("{}", json!({ "inserted": n }));
        }
    }

    Ok(())
}
