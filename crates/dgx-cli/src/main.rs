//! 🚀 dgx-cli: the front desk of the diagnostic counting office.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary loads config, sets up logging, picks a subcommand, and lets
//! the library do the counting. Then it prints the answer in a nice table,
//! because staring at raw NDJSON at 3am is nobody's idea of fun. 🦆

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use tracing::error;
use tracing_subscriber::EnvFilter;

use dgx::common::BucketDocument;
use dgx::ingest::IngestTally;
use dgx::rebuild::{RebuildError, RebuildSummary};
use dgx::{Operation, Outcome};

/// 🩺 Count diagnostics per place per day, and keep the counts honest.
#[derive(Debug, Parser)]
#[command(name = "dgx", version)]
struct Cli {
    /// 🔧 config file; skipped quietly if it isn't there (env vars still apply)
    #[arg(long, short, default_value = "dgx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📥 feed an NDJSON file of submissions through the incremental path
    Ingest { submissions: PathBuf },
    /// 🏗️ recompute every bucket from history (no collections = the trusted one)
    Rebuild { collections: Vec<String> },
    /// 🔍 print buckets
    Query {
        /// 📅 only this day, as YYYY-MMDD
        #[arg(long)]
        day: Option<String>,
        /// 📜 raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// 📤 dump raw reports with start <= timestamp < end, one JSON object per line
    Export {
        /// 🕰️ RFC 3339, inclusive
        #[arg(long)]
        start: DateTime<Utc>,
        /// 🕰️ RFC 3339, exclusive
        #[arg(long)]
        end: DateTime<Utc>,
        /// 📜 which collection (default: the trusted one)
        #[arg(long)]
        collection: Option<String>,
    },
}

/// 🚀 main(): where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config
/// 4. Run the thing
/// 5. Print the thing, or print why there is no thing
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG decides how chatty we are
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    // 🔒 a missing config file is fine, a config file we can't even stat is not
    let config_file = cli.config.as_path();
    let config_file_that_actually_exists = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the config file exists. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => None, // 💤 env vars only, then
    };

    let app_config = dgx::app_config::load_config(config_file_that_actually_exists)
        .context("💀 In dgx-cli, main, we couldn't load the config. Take a look at the file and the DGX_* env vars")?;

    let (operation, as_json) = match cli.command {
        Command::Ingest { submissions } => (Operation::Ingest { submissions }, false),
        Command::Rebuild { collections } => (Operation::Rebuild { collections }, false),
        Command::Query { day, json } => (Operation::Query { day }, json),
        Command::Export { start, end, collection } => (Operation::Export { collection, start, end }, false),
    };

    match dgx::run(app_config, operation).await {
        Ok(outcome) => {
            print_outcome(&outcome, as_json)?;
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // 🧅 peel the onion, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            if let Some(rebuild) = err.downcast_ref::<RebuildError>() {
                error!(
                    "🔧 hint: the rebuild got through {} reports and committed {} batches before it stopped. \
                     It's idempotent, so just run it again once the cause is fixed.",
                    rebuild.reports_processed, rebuild.batches_committed
                );
            }
            // 🗑️ Exit with prejudice.
            std::process::exit(1);
        }
    }
}

fn print_outcome(outcome: &Outcome, as_json: bool) -> Result<()> {
    match outcome {
        Outcome::Buckets(buckets) if as_json => {
            println!("{}", serde_json::to_string_pretty(buckets).context("💀 couldn't serialize the buckets")?);
        }
        Outcome::Buckets(buckets) => println!("{}", bucket_table(buckets)),
        Outcome::Ingested(tally) => println!("{}", tally_table(tally)),
        Outcome::Rebuilt(summary) => println!("{}", summary_table(summary)),
        Outcome::Exported(rows) => {
            for row in rows {
                println!("{}", serde_json::to_string(row).context("💀 couldn't serialize a report")?);
            }
        }
    }
    Ok(())
}

fn bucket_table(buckets: &[BucketDocument]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["locator", "day", "diagnostics", "total"]);
    for bucket in buckets {
        let diagnostics = bucket
            .diagnostics
            .iter()
            .map(|(diagnostic, count)| format!("{diagnostic}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            bucket.locator.clone(),
            bucket.daystamp.to_string(),
            diagnostics,
            bucket.diagnostics.total().to_string(),
        ]);
    }
    table
}

fn tally_table(tally: &IngestTally) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["outcome", "submissions"]);
    for (label, count) in [
        ("✅ aggregated", tally.aggregated),
        ("💤 unchanged", tally.unchanged),
        ("🚩 quarantined", tally.quarantined),
        ("🚫 rejected", tally.rejected),
        ("💀 failed", tally.failed),
    ] {
        table.add_row(vec![label.to_string(), count.to_string()]);
    }
    table
}

fn summary_table(summary: &RebuildSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["rebuild", ""]);
    for (label, count) in [
        ("📜 reports processed", summary.reports_processed),
        ("👥 sessions", summary.sessions),
        ("🪣 buckets", summary.buckets),
        ("📦 batches committed", summary.batches_committed),
    ] {
        table.add_row(vec![label.to_string(), count.to_string()]);
    }
    table
}
