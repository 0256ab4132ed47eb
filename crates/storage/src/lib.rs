pub mod db;

pub use db::{
    add_category_rule, create_category, create_db, find_category_by_name, get_categories,
    get_transaction, insert_transaction, list_transactions, patch_transaction,
    transaction_exists, DbPool, SqliteStore, TransactionFilter,
};
