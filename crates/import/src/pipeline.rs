use bookkeeper_core::{CategoryId, Fingerprint, InsertOutcome, TransactionId, TransactionStore};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::csv::{self, FileFormatSpec, FormatError};
use crate::rules::{CategoryMatcher, RuleError};

#[derive(Debug, Error)]
pub enum ImportError<E: std::error::Error + 'static> {
    #[error("parsing statement: {0}")]
    Format(#[from] FormatError),
    #[error("classifying transactions: {0}")]
    Rule(#[from] RuleError),
    #[error("loading categories: {0}")]
    Categories(#[source] E),
    /// Rows before `row` were committed and are listed in `report`.
    #[error("storing row {row}: {source}")]
    Store {
        row: usize,
        report: ImportReport,
        #[source]
        source: E,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportOutcome {
    Created { id: TransactionId },
    /// Already stored; the existing record was left untouched.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportEntry {
    /// Position among the parsed rows, starting at zero.
    pub row: usize,
    pub fingerprint: Fingerprint,
    /// Category assigned to a created row; always `None` for duplicates.
    pub category_id: Option<CategoryId>,
    #[serde(flatten)]
    pub outcome: ImportOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Number of rows parsed from the file.
    pub total: usize,
    pub entries: Vec<ImportEntry>,
}

impl ImportReport {
    pub fn created(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, ImportOutcome::Created { .. }))
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == ImportOutcome::Duplicate)
            .count()
    }

    /// Rows that were parsed but never committed because the import aborted.
    pub fn failed(&self) -> usize {
        self.total - self.entries.len()
    }
}

impl Serialize for ImportReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ImportReport", 5)?;
        state.serialize_field("total", &self.total)?;
        state.serialize_field("created", &self.created())?;
        state.serialize_field("duplicates", &self.duplicates())?;
        state.serialize_field("failed", &self.failed())?;
        state.serialize_field("entries", &self.entries)?;
        state.end()
    }
}

/// Orchestrates: parse → categorize → fingerprint → dedup check → insert.
pub struct ImportPipeline<S> {
    store: S,
}

impl<S: TransactionStore> ImportPipeline<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Imports one statement file.
    ///
    /// Nothing is stored if the file fails to parse or a rule pattern is
    /// invalid. Categories are loaded once, so every row is classified
    /// against the same snapshot. A storage failure stops the import; rows
    /// already inserted stay inserted.
    pub async fn import(
        &self,
        data: &[u8],
        format: &FileFormatSpec,
    ) -> Result<ImportReport, ImportError<S::Error>> {
        let transactions = csv::parse(data, format)?;
        tracing::debug!(format = %format.name, rows = transactions.len(), "parsed statement");

        let categories = self
            .store
            .category_list()
            .await
            .map_err(ImportError::Categories)?;
        let matcher = CategoryMatcher::new(categories).inspect_err(|e| {
            tracing::warn!("category rules are invalid: {e}");
        })?;

        let mut report = ImportReport {
            total: transactions.len(),
            entries: Vec::with_capacity(transactions.len()),
        };

        for (row, mut tx) in transactions.into_iter().enumerate() {
            tx.category = matcher.find_category(&tx).map(|c| c.summary());
            let fingerprint = tx.fingerprint();

            let outcome = match self.store_row(&tx, &fingerprint).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    tracing::warn!(row, "import aborted: {source}");
                    return Err(ImportError::Store { row, report, source });
                }
            };

            // A duplicate keeps whatever category the stored row has.
            let category_id = match outcome {
                ImportOutcome::Created { id } => {
                    tracing::debug!(row, %id, %fingerprint, "transaction created");
                    tx.category_id()
                }
                ImportOutcome::Duplicate => {
                    tracing::debug!(row, %fingerprint, "duplicate transaction skipped");
                    None
                }
            };

            report.entries.push(ImportEntry {
                row,
                fingerprint,
                category_id,
                outcome,
            });
        }

        tracing::info!(
            format = %format.name,
            total = report.total,
            created = report.created(),
            duplicates = report.duplicates(),
            "import finished"
        );
        Ok(report)
    }

    async fn store_row(
        &self,
        tx: &bookkeeper_core::Transaction,
        fingerprint: &Fingerprint,
    ) -> Result<ImportOutcome, S::Error> {
        if self.store.transaction_exists(fingerprint).await? {
            return Ok(ImportOutcome::Duplicate);
        }
        // The store may still refuse the row if another import won the race.
        Ok(match self.store.transaction_insert(tx, fingerprint).await? {
            InsertOutcome::Inserted(id) => ImportOutcome::Created { id },
            InsertOutcome::Duplicate => ImportOutcome::Duplicate,
        })
    }
}
