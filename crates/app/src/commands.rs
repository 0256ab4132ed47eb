use anyhow::{bail, Context};
use bookkeeper_core::{
    fiscal_month_for_income_category, Category, CategoryId, DateRange, FiscalMonth,
    SortDirection, Transaction, TransactionId, TransactionList, TransactionPatch,
};
use bookkeeper_import::{CategoryMatcher, ImportError, ImportPipeline, ImportReport};
use bookkeeper_storage::{DbPool, SqliteStore, TransactionFilter};
use serde::Serialize;
use std::path::Path;

use crate::config::Settings;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{json}");
    Ok(())
}

/// Storage failed part way through an import. Rows listed in `report` stay
/// committed; the rest were never stored.
#[derive(Debug, thiserror::Error)]
#[error("stopped at row {row} with {} created and {} not stored", .report.created(), .report.failed())]
pub struct ImportAborted {
    pub row: usize,
    pub report: ImportReport,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

pub async fn import(
    db: &DbPool,
    settings: &Settings,
    file: &Path,
    format: Option<&str>,
) -> anyhow::Result<ImportReport> {
    let format = settings.resolve_format(format.unwrap_or(&settings.default_format))?;
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;

    let pipeline = ImportPipeline::new(SqliteStore::new(db.clone()));
    let report = match pipeline.import(&data, &format).await {
        Ok(report) => report,
        Err(ImportError::Store { row, report, source }) => {
            tracing::error!(
                file = %file.display(),
                row,
                created = report.created(),
                failed = report.failed(),
                "import aborted"
            );
            return Err(anyhow::Error::new(ImportAborted {
                row,
                report,
                source: source.into(),
            })
            .context(format!("importing {}", file.display())));
        }
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("importing {}", file.display())))
        }
    };

    tracing::info!(
        file = %file.display(),
        total = report.total,
        created = report.created(),
        duplicates = report.duplicates(),
        "import finished"
    );
    Ok(report)
}

pub async fn fiscal_month(
    db: &DbPool,
    settings: &Settings,
    month: u32,
    year: i32,
    income_category: Option<i64>,
) -> anyhow::Result<FiscalMonth> {
    let category = income_category
        .or(settings.income_category_id)
        .map(CategoryId)
        .context("no income category: pass --income-category or set income_category_id")?;

    let store = SqliteStore::new(db.clone());
    let fiscal = fiscal_month_for_income_category(&store, month, year, category)
        .await
        .with_context(|| format!("resolving fiscal month {year}-{month:02}"))?;
    Ok(fiscal)
}

pub async fn transactions(
    db: &DbPool,
    range: DateRange,
    filter: TransactionFilter,
    direction: SortDirection,
) -> anyhow::Result<TransactionList> {
    let list = bookkeeper_storage::list_transactions(db, range, filter, direction)
        .await
        .context("listing transactions")?;
    Ok(list)
}

pub async fn patch(
    db: &DbPool,
    id: TransactionId,
    patch: TransactionPatch,
) -> anyhow::Result<Transaction> {
    if patch.is_empty() {
        bail!("nothing to change: pass --category and/or --hidden");
    }
    if !bookkeeper_storage::patch_transaction(db, id, patch)
        .await
        .with_context(|| format!("updating transaction {id}"))?
    {
        bail!("transaction {id} not found");
    }
    show(db, id).await
}

pub async fn show(db: &DbPool, id: TransactionId) -> anyhow::Result<Transaction> {
    bookkeeper_storage::get_transaction(db, id)
        .await
        .with_context(|| format!("loading transaction {id}"))?
        .with_context(|| format!("transaction {id} not found"))
}

pub async fn categories(db: &DbPool) -> anyhow::Result<Vec<Category>> {
    let categories = bookkeeper_storage::get_categories(db)
        .await
        .context("loading categories")?;
    Ok(categories)
}

#[derive(Debug, Default, Serialize)]
pub struct SeedReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

/// Inserts the configured categories whose names are not taken yet.
/// Existing categories keep their rules.
pub async fn seed_categories(db: &DbPool, settings: &Settings) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();
    for seed in settings.seed_categories() {
        if bookkeeper_storage::find_category_by_name(db, &seed.name).await?.is_some() {
            report.existing.push(seed.name);
            continue;
        }
        let id = bookkeeper_storage::create_category(
            db,
            &seed.name,
            seed.description.as_deref(),
            seed.color.as_deref(),
        )
        .await
        .with_context(|| format!("creating category '{}'", seed.name))?;
        for rule in &seed.rules {
            bookkeeper_storage::add_category_rule(
                db,
                id,
                rule.mapping_field,
                &rule.pattern,
                rule.description.as_deref(),
            )
            .await
            .with_context(|| format!("adding rule {:?} to '{}'", rule.pattern, seed.name))?;
        }
        tracing::info!(category = %seed.name, %id, rules = seed.rules.len(), "seeded category");
        report.created.push(seed.name);
    }
    Ok(report)
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Recategorized {
    pub id: TransactionId,
    #[serde(rename = "categoryID")]
    pub category_id: CategoryId,
}

#[derive(Debug, Default, Serialize)]
pub struct RecategorizeReport {
    pub examined: usize,
    pub categorized: Vec<Recategorized>,
}

/// Runs the current rules over visible unclassified transactions in `range`.
pub async fn recategorize(db: &DbPool, range: DateRange) -> anyhow::Result<RecategorizeReport> {
    let matcher = CategoryMatcher::new(categories(db).await?)?;
    let unclassified = bookkeeper_storage::list_transactions(
        db,
        range,
        TransactionFilter::Unclassified,
        SortDirection::Ascending,
    )
    .await
    .context("listing unclassified transactions")?;

    let mut report = RecategorizeReport {
        examined: unclassified.items.len(),
        categorized: Vec::new(),
    };
    for (idx, category) in matcher.apply(&unclassified.items) {
        let Some(id) = unclassified.items[idx].id else {
            continue;
        };
        let patch = TransactionPatch {
            category_id: Some(category.id),
            hidden: None,
        };
        bookkeeper_storage::patch_transaction(db, id, patch)
            .await
            .with_context(|| format!("updating transaction {id}"))?;
        report.categorized.push(Recategorized {
            id,
            category_id: category.id,
        });
    }
    tracing::info!(
        examined = report.examined,
        categorized = report.categorized.len(),
        "recategorized"
    );
    Ok(report)
}
