pub mod category;
pub mod fingerprint;
pub mod period;
pub mod store;
pub mod transaction;

pub use category::{Category, CategoryId, CategoryRule, MappingField, RuleId, UnknownMappingField};
pub use fingerprint::Fingerprint;
pub use period::{
    fiscal_month_for_income_category, fiscal_start_date, income_window, month_start, next_month,
    DateRange, FiscalError, FiscalMonth, PeriodError, ANCHOR_TOLERANCE_DAYS,
};
pub use store::{InsertOutcome, MemoryStore, SortDirection, TransactionStore, UnknownSortDirection};
pub use transaction::{Transaction, TransactionId, TransactionList, TransactionPatch};
