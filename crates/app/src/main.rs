use anyhow::Context;
use bookkeeper_core::{CategoryId, DateRange, SortDirection, TransactionId, TransactionPatch};
use bookkeeper_storage::TransactionFilter;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{print_json, ImportAborted};
use config::Settings;

#[derive(Parser)]
#[command(name = "bookkeeper", about = "Bank statement import and fiscal month bookkeeping.")]
struct Cli {
    /// Settings file (default: BOOKKEEPER_CONFIG, then the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a bank statement CSV and categorize its rows.
    Import {
        file: PathBuf,
        /// Statement format name (default: settings `default_format`)
        #[arg(long)]
        format: Option<String>,
    },
    /// Resolve the salary-anchored fiscal month.
    FiscalMonth {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
        /// Income category id (default: settings `income_category_id`)
        #[arg(long)]
        income_category: Option<i64>,
    },
    /// List transactions booked between two dates (inclusive).
    Transactions {
        /// YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,
        /// YYYY-MM-DD
        #[arg(long)]
        to: NaiveDate,
        #[arg(long, conflicts_with_all = ["unclassified", "hidden"])]
        category: Option<i64>,
        #[arg(long, conflicts_with = "hidden")]
        unclassified: bool,
        #[arg(long)]
        hidden: bool,
        /// asc or desc
        #[arg(long, default_value = "asc")]
        order: SortDirection,
    },
    /// Show one transaction.
    Show { id: i64 },
    /// Change the category or hidden flag of a transaction.
    Patch {
        id: i64,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        hidden: Option<bool>,
    },
    /// List categories with their rules.
    Categories,
    /// Insert the categories declared in the settings file.
    SeedCategories,
    /// Apply the current rules to unclassified transactions.
    Recategorize {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("invalid log filter {filter:?}: {e}, falling back to info");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    init_tracing(&settings.log_filter);
    tracing::debug!(database = %settings.database_path.display(), "settings loaded");

    if let Some(dir) = settings.database_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }
    let db = bookkeeper_storage::create_db(&settings.database_path)
        .await
        .with_context(|| format!("opening {}", settings.database_path.display()))?;

    match cli.command {
        Command::Import { file, format } => {
            match commands::import(&db, &settings, &file, format.as_deref()).await {
                Ok(report) => print_json(&report),
                Err(err) => {
                    if let Some(aborted) = err.downcast_ref::<ImportAborted>() {
                        print_json(&aborted.report)?;
                    }
                    Err(err)
                }
            }
        }
        Command::FiscalMonth {
            month,
            year,
            income_category,
        } => print_json(&commands::fiscal_month(&db, &settings, month, year, income_category).await?),
        Command::Transactions {
            from,
            to,
            category,
            unclassified,
            hidden,
            order,
        } => {
            let filter = match (category, unclassified, hidden) {
                (Some(id), _, _) => TransactionFilter::Category(CategoryId(id)),
                (None, true, _) => TransactionFilter::Unclassified,
                (None, false, true) => TransactionFilter::Hidden,
                (None, false, false) => TransactionFilter::Visible,
            };
            let range = DateRange::new(from, to);
            print_json(&commands::transactions(&db, range, filter, order).await?)
        }
        Command::Show { id } => print_json(&commands::show(&db, TransactionId(id)).await?),
        Command::Patch {
            id,
            category,
            hidden,
        } => {
            let patch = TransactionPatch {
                category_id: category.map(CategoryId),
                hidden,
            };
            print_json(&commands::patch(&db, TransactionId(id), patch).await?)
        }
        Command::Categories => print_json(&commands::categories(&db).await?),
        Command::SeedCategories => print_json(&commands::seed_categories(&db, &settings).await?),
        Command::Recategorize { from, to } => {
            print_json(&commands::recategorize(&db, DateRange::new(from, to)).await?)
        }
    }
}
