use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use super::category::{Category, CategoryId};
use super::fingerprint::Fingerprint;
use super::period::DateRange;
use super::transaction::{Transaction, TransactionId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl SortDirection {
    /// SQL keyword for this direction. Only ever produced from the enum.
    pub fn keyword(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => f.write_str("asc"),
            SortDirection::Descending => f.write_str("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sort direction: '{0}' (expected asc or desc)")]
pub struct UnknownSortDirection(pub String);

impl FromStr for SortDirection {
    type Err = UnknownSortDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            other => Err(UnknownSortDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransactionId),
    /// A transaction with the same fingerprint was already stored.
    Duplicate,
}

/// The persistence operations the import pipeline and the fiscal calendar
/// rely on. Implementations must enforce fingerprint uniqueness on insert.
pub trait TransactionStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// All categories with their rules, both in evaluation order.
    fn category_list(&self) -> impl Future<Output = Result<Vec<Category>, Self::Error>> + Send;

    fn transaction_exists(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    fn transaction_insert(
        &self,
        transaction: &Transaction,
        fingerprint: &Fingerprint,
    ) -> impl Future<Output = Result<InsertOutcome, Self::Error>> + Send;

    /// Transactions of `category` booked within `range`, ordered by booking date.
    fn income_transactions_in_range(
        &self,
        range: DateRange,
        category: CategoryId,
        direction: SortDirection,
    ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    categories: Vec<Category>,
    transactions: Vec<Transaction>,
    fingerprints: HashSet<Fingerprint>,
}

/// A [`TransactionStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(categories: Vec<Category>) -> Self {
        MemoryStore {
            state: Mutex::new(MemoryState {
                categories,
                ..Default::default()
            }),
        }
    }

    /// Stores transactions directly, assigning ids and skipping duplicates.
    pub fn extend(&self, transactions: impl IntoIterator<Item = Transaction>) {
        for tx in transactions {
            let fingerprint = tx.fingerprint();
            self.insert(tx, fingerprint);
        }
    }

    pub fn set_categories(&self, categories: Vec<Category>) {
        self.lock().categories = categories;
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().transactions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, mut tx: Transaction, fingerprint: Fingerprint) -> InsertOutcome {
        let mut state = self.lock();
        if !state.fingerprints.insert(fingerprint) {
            return InsertOutcome::Duplicate;
        }
        let id = TransactionId(state.transactions.len() as i64 + 1);
        tx.id = Some(id);
        state.transactions.push(tx);
        InsertOutcome::Inserted(id)
    }
}

impl TransactionStore for MemoryStore {
    type Error = Infallible;

    async fn category_list(&self) -> Result<Vec<Category>, Infallible> {
        Ok(self.lock().categories.clone())
    }

    async fn transaction_exists(&self, fingerprint: &Fingerprint) -> Result<bool, Infallible> {
        Ok(self.lock().fingerprints.contains(fingerprint))
    }

    async fn transaction_insert(
        &self,
        transaction: &Transaction,
        fingerprint: &Fingerprint,
    ) -> Result<InsertOutcome, Infallible> {
        Ok(self.insert(transaction.clone(), fingerprint.clone()))
    }

    async fn income_transactions_in_range(
        &self,
        range: DateRange,
        category: CategoryId,
        direction: SortDirection,
    ) -> Result<Vec<Transaction>, Infallible> {
        let mut found: Vec<Transaction> = self
            .lock()
            .transactions
            .iter()
            .filter(|t| t.category_id() == Some(category) && range.contains(t.booking_date))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.booking_date);
        if direction == SortDirection::Descending {
            found.reverse();
        }
        Ok(found)
    }
}
