use anyhow::{Context, Result};
use clap::Parser;
use instrument_catalog::config::AppConfig;
use instrument_catalog::logic::{
    export_catalog, normalize_batch, CatalogSummary, ExportOptions, RawFieldMap, Reconciler,
};
use instrument_catalog::model::{CanonicalRecord, MergeStats};
use instrument_catalog::store::{InstrumentStore, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(name = "sync-instruments")]
#[clap(about = "Reconcile a JSON batch of instruments into the catalog database")]
struct Args {
    /// JSON array of canonical records, or scraped records with --raw
    #[clap(value_name = "FILE")]
    input: PathBuf,

    /// Normalize scraped field maps before reconciling
    #[clap(long)]
    raw: bool,

    /// Write the CSV sheets to this directory after the run
    #[clap(long, value_name = "DIR")]
    export_dir: Option<PathBuf>,

    /// Report what would change without writing
    #[clap(long)]
    dry_run: bool,
}

fn load_records(args: &Args) -> Result<Vec<CanonicalRecord>> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    if !args.raw {
        return serde_json::from_str(&text)
            .with_context(|| format!("{} is not a list of instruments", args.input.display()));
    }

    let raws: Vec<RawFieldMap> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a list of scraped instruments", args.input.display()))?;
    let batch = normalize_batch(&raws);
    for skipped in &batch.skipped {
        let names: Vec<&str> = skipped.fields.iter().map(|f| f.as_str()).collect();
        println!(
            "Skipped record {}: missing {}",
            skipped.index + 1,
            names.join(", ")
        );
    }
    Ok(batch.records)
}

fn print_stats(stats: &MergeStats, dry_run: bool) {
    let heading = if dry_run { "Dry run, nothing written" } else { "Synchronization finished" };
    println!("{}", heading);
    println!("  added:    {}", stats.added);
    println!("  updated:  {}", stats.updated);
    println!("  removed:  {}", stats.removed);
    println!("  warnings: {}", stats.warnings);
}

fn print_summary(summary: &CatalogSummary) {
    println!("\nCatalog: {} instruments", summary.total);
    for (group, count) in &summary.by_group {
        println!("  group {}: {}", group, count);
    }
    for (status, count) in &summary.by_status {
        println!("  status {}: {}", status, count);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = AppConfig::load()?;

    let records = load_records(&args)?;
    println!("Loaded {} instruments from {}", records.len(), args.input.display());

    let database_url = config.database_url();
    let store = SqliteStore::new(&database_url, config.max_connections()).await?;
    store.migrate().await?;
    println!("Connected to {}", database_url);

    let reconciler = Reconciler::new(Arc::new(store)).with_options(config.reconcile_options());

    let stats = if args.dry_run {
        reconciler.preview(&records).await?.stats
    } else {
        reconciler.run(&records).await?
    };
    print_stats(&stats, args.dry_run);

    let instruments = reconciler.store().snapshot().await?;
    print_summary(&CatalogSummary::from_instruments(&instruments));

    if let Some(dir) = &args.export_dir {
        if args.dry_run {
            println!("\nSkipping export in dry run");
        } else {
            let options = ExportOptions {
                today: chrono::Local::now().date_naive(),
                warning_days: config.export.expiry_warning_days,
            };
            let written = export_catalog(dir, &instruments, &options)?;
            println!("\nWrote {} sheets:", written.len());
            for path in written {
                println!("  {}", path.display());
            }
        }
    }

    Ok(())
}
