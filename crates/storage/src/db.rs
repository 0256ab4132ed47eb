use bookkeeper_core::{
    Category, CategoryId, CategoryRule, DateRange, Fingerprint, InsertOutcome, MappingField,
    RuleId, SortDirection, Transaction, TransactionId, TransactionList, TransactionPatch,
    TransactionStore,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    tracing::debug!(path = %path.display(), "database ready");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            color TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS category_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER NOT NULL,
            mapping_field TEXT NOT NULL CHECK (mapping_field IN ('recipient', 'booking_text', 'purpose')),
            regex TEXT NOT NULL,
            description TEXT,
            FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            booking_date TEXT NOT NULL,
            valuta_date TEXT NOT NULL,
            recipient TEXT,
            booking_text TEXT NOT NULL,
            purpose TEXT,
            balance TEXT NOT NULL,
            amount TEXT NOT NULL,
            category_id INTEGER,
            hidden INTEGER NOT NULL DEFAULT 0,
            hash TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_booking_date ON transactions (booking_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── categories ────────────────────────────────────────────────────────────────

/// All categories ordered by id, each with its rules ordered by id.
pub async fn get_categories(pool: &DbPool) -> Result<Vec<Category>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (i64, String, Option<String>, Option<String>)>(
        "SELECT id, name, description, color FROM categories ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut categories: Vec<Category> = rows
        .into_iter()
        .map(|r| Category {
            id: CategoryId(r.0),
            name: r.1,
            description: r.2,
            color: r.3,
            rules: Vec::new(),
        })
        .collect();

    let rules = sqlx::query_as::<_, (i64, i64, String, String, Option<String>)>(
        "SELECT id, category_id, mapping_field, regex, description FROM category_rules ORDER BY category_id, id",
    )
    .fetch_all(pool)
    .await?;

    for (id, category_id, mapping_field, pattern, description) in rules {
        let category_id = CategoryId(category_id);
        let mapping_field = MappingField::from_str(&mapping_field)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        if let Ok(idx) = categories.binary_search_by_key(&category_id, |c| c.id) {
            categories[idx].rules.push(CategoryRule {
                id: RuleId(id),
                category_id,
                mapping_field,
                pattern,
                description,
            });
        }
    }

    Ok(categories)
}

pub async fn create_category(
    pool: &DbPool,
    name: &str,
    description: Option<&str>,
    color: Option<&str>,
) -> Result<CategoryId, sqlx::Error> {
    let result = sqlx::query("INSERT INTO categories (name, description, color) VALUES (?, ?, ?)")
        .bind(name)
        .bind(description)
        .bind(color)
        .execute(pool)
        .await?;
    Ok(CategoryId(result.last_insert_rowid()))
}

pub async fn find_category_by_name(
    pool: &DbPool,
    name: &str,
) -> Result<Option<CategoryId>, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(id.map(CategoryId))
}

/// Appends a rule to the end of the category's rule list. The pattern is
/// stored as given; callers validate it first.
pub async fn add_category_rule(
    pool: &DbPool,
    category_id: CategoryId,
    mapping_field: MappingField,
    pattern: &str,
    description: Option<&str>,
) -> Result<RuleId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO category_rules (category_id, mapping_field, regex, description) VALUES (?, ?, ?, ?)",
    )
    .bind(category_id.0)
    .bind(mapping_field.as_str())
    .bind(pattern)
    .bind(description)
    .execute(pool)
    .await?;
    Ok(RuleId(result.last_insert_rowid()))
}

// ── transactions ──────────────────────────────────────────────────────────────

/// Which transactions a listing returns, on top of the date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFilter {
    /// Everything not hidden.
    Visible,
    /// Transactions of one category, hidden ones included.
    Category(CategoryId),
    /// Visible transactions without a category.
    Unclassified,
    Hidden,
}

impl TransactionFilter {
    fn condition(self) -> &'static str {
        match self {
            TransactionFilter::Visible => "t.hidden = 0",
            TransactionFilter::Category(_) => "t.category_id = ?",
            TransactionFilter::Unclassified => "t.category_id IS NULL AND t.hidden = 0",
            TransactionFilter::Hidden => "t.hidden = 1",
        }
    }
}

const SELECT_TRANSACTIONS: &str = "\
    SELECT t.id, t.booking_date, t.valuta_date, t.recipient, t.booking_text, t.purpose, \
           t.balance, t.amount, t.hidden, c.id, c.name, c.description, c.color \
    FROM transactions AS t \
    LEFT JOIN categories AS c ON t.category_id = c.id";

type TransactionRow = (
    i64,
    NaiveDate,
    NaiveDate,
    Option<String>,
    String,
    Option<String>,
    String,
    String,
    bool,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn decode_decimal(text: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str(text).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn transaction_from_row(r: TransactionRow) -> Result<Transaction, sqlx::Error> {
    let category = match (r.9, r.10) {
        (Some(id), Some(name)) => Some(Category {
            id: CategoryId(id),
            name,
            description: r.11,
            color: r.12,
            rules: Vec::new(),
        }),
        _ => None,
    };
    Ok(Transaction {
        id: Some(TransactionId(r.0)),
        booking_date: r.1,
        valuta_date: r.2,
        recipient: r.3,
        booking_text: r.4,
        purpose: r.5,
        balance: decode_decimal(&r.6)?,
        amount: decode_decimal(&r.7)?,
        category,
        hidden: r.8,
    })
}

pub async fn list_transactions(
    pool: &DbPool,
    range: DateRange,
    filter: TransactionFilter,
    direction: SortDirection,
) -> Result<TransactionList, sqlx::Error> {
    let sql = format!(
        "{SELECT_TRANSACTIONS} WHERE t.booking_date BETWEEN ? AND ? AND {} ORDER BY t.booking_date {dir}, t.id {dir}",
        filter.condition(),
        dir = direction.keyword(),
    );

    let mut query = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(range.start)
        .bind(range.end);
    if let TransactionFilter::Category(id) = filter {
        query = query.bind(id.0);
    }

    let items = query
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(transaction_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TransactionList::new(items))
}

pub async fn get_transaction(
    pool: &DbPool,
    id: TransactionId,
) -> Result<Option<Transaction>, sqlx::Error> {
    let sql = format!("{SELECT_TRANSACTIONS} WHERE t.id = ?");
    sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(id.0)
        .fetch_optional(pool)
        .await?
        .map(transaction_from_row)
        .transpose()
}

pub async fn transaction_exists(
    pool: &DbPool,
    fingerprint: &Fingerprint,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM transactions WHERE hash = ?)")
        .bind(fingerprint.as_str())
        .fetch_one(pool)
        .await
}

/// Inserts unless a row with the same fingerprint exists; the unique index
/// on `hash` decides, so concurrent imports cannot both insert.
pub async fn insert_transaction(
    pool: &DbPool,
    tx: &Transaction,
    fingerprint: &Fingerprint,
) -> Result<InsertOutcome, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO transactions (
            booking_date, valuta_date, recipient, booking_text, purpose,
            balance, amount, category_id, hidden, hash
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (hash) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(tx.booking_date)
    .bind(tx.valuta_date)
    .bind(tx.recipient.as_deref())
    .bind(&tx.booking_text)
    .bind(tx.purpose.as_deref())
    .bind(tx.balance.to_string())
    .bind(tx.amount.to_string())
    .bind(tx.category_id().map(|c| c.0))
    .bind(tx.hidden)
    .bind(fingerprint.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(match id {
        Some(id) => InsertOutcome::Inserted(TransactionId(id)),
        None => InsertOutcome::Duplicate,
    })
}

/// Applies the set fields of `patch`. Returns false if no such transaction exists.
pub async fn patch_transaction(
    pool: &DbPool,
    id: TransactionId,
    patch: TransactionPatch,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE transactions SET category_id = COALESCE(?, category_id), hidden = COALESCE(?, hidden) WHERE id = ?",
    )
    .bind(patch.category_id.map(|c| c.0))
    .bind(patch.hidden)
    .bind(id.0)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// ── persistence collaborator ──────────────────────────────────────────────────

/// [`TransactionStore`] backed by the SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl TransactionStore for SqliteStore {
    type Error = sqlx::Error;

    async fn category_list(&self) -> Result<Vec<Category>, sqlx::Error> {
        get_categories(&self.pool).await
    }

    async fn transaction_exists(&self, fingerprint: &Fingerprint) -> Result<bool, sqlx::Error> {
        transaction_exists(&self.pool, fingerprint).await
    }

    async fn transaction_insert(
        &self,
        transaction: &Transaction,
        fingerprint: &Fingerprint,
    ) -> Result<InsertOutcome, sqlx::Error> {
        insert_transaction(&self.pool, transaction, fingerprint).await
    }

    async fn income_transactions_in_range(
        &self,
        range: DateRange,
        category: CategoryId,
        direction: SortDirection,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let list = list_transactions(&self.pool, range, TransactionFilter::Category(category), direction)
            .await?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookkeeper_core::fiscal_month_for_income_category;

    async fn test_db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tx(booking: NaiveDate, recipient: &str, amount: &str) -> Transaction {
        Transaction {
            recipient: Some(recipient.to_string()),
            balance: "1234.56".parse().unwrap(),
            ..Transaction::new(booking, "Lastschrift", amount.parse().unwrap())
        }
    }

    async fn insert(pool: &DbPool, t: &Transaction) -> TransactionId {
        match insert_transaction(pool, t, &t.fingerprint()).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Duplicate => panic!("unexpected duplicate"),
        }
    }

    fn may() -> DateRange {
        DateRange::new(date(2023, 5, 1), date(2023, 5, 31))
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (_dir, pool) = test_db().await;
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn categories_keep_rule_order() {
        let (_dir, pool) = test_db().await;
        let groceries = create_category(&pool, "Groceries", None, Some("#22c55e")).await.unwrap();
        let income = create_category(&pool, "Income", Some("Salary"), None).await.unwrap();
        add_category_rule(&pool, groceries, MappingField::Recipient, "lidl", None).await.unwrap();
        add_category_rule(&pool, income, MappingField::BookingText, "gehalt", None).await.unwrap();
        add_category_rule(&pool, groceries, MappingField::Recipient, "aldi", Some("discounter"))
            .await
            .unwrap();

        let categories = get_categories(&pool).await.unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].name, "Groceries");
        assert_eq!(categories[0].color.as_deref(), Some("#22c55e"));
        let patterns: Vec<_> = categories[0].rules.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, ["lidl", "aldi"]);
        assert_eq!(categories[1].rules[0].mapping_field, MappingField::BookingText);

        assert_eq!(find_category_by_name(&pool, "Income").await.unwrap(), Some(income));
        assert_eq!(find_category_by_name(&pool, "Rent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_round_trips_and_rejects_duplicates() {
        let (_dir, pool) = test_db().await;
        let category = create_category(&pool, "Groceries", None, None).await.unwrap();
        let mut t = tx(date(2023, 5, 22), "VISA LIDL", "-13.37");
        t.category = Some(Category::new(category, "Groceries"));
        t.purpose = None;
        let fp = t.fingerprint();

        assert!(!transaction_exists(&pool, &fp).await.unwrap());
        let id = insert(&pool, &t).await;
        assert!(transaction_exists(&pool, &fp).await.unwrap());
        assert_eq!(
            insert_transaction(&pool, &t, &fp).await.unwrap(),
            InsertOutcome::Duplicate
        );

        let stored = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.amount, "-13.37".parse::<Decimal>().unwrap());
        assert_eq!(stored.purpose, None);
        assert_eq!(stored.category_id(), Some(category));
        assert_eq!(stored.fingerprint(), fp);
    }

    #[tokio::test]
    async fn listing_filters() {
        let (_dir, pool) = test_db().await;
        let income = create_category(&pool, "Income", None, None).await.unwrap();

        let mut salary = tx(date(2023, 5, 25), "ACME AG", "2800.69");
        salary.category = Some(Category::new(income, "Income"));
        let salary_id = insert(&pool, &salary).await;
        let coffee = insert(&pool, &tx(date(2023, 5, 3), "Cafe", "-3.50")).await;
        let rent = insert(&pool, &tx(date(2023, 5, 1), "Landlord", "-900")).await;
        insert(&pool, &tx(date(2023, 6, 1), "Landlord", "-900")).await;

        assert!(patch_transaction(&pool, rent, TransactionPatch { hidden: Some(true), ..Default::default() })
            .await
            .unwrap());

        let visible = list_transactions(&pool, may(), TransactionFilter::Visible, SortDirection::Ascending)
            .await
            .unwrap();
        let ids: Vec<_> = visible.items.iter().map(|t| t.id.unwrap()).collect();
        assert_eq!(ids, [coffee, salary_id]);
        assert_eq!(visible.total, 2);
        assert_eq!(visible.sum, "2797.19".parse::<Decimal>().unwrap());

        let desc = list_transactions(&pool, may(), TransactionFilter::Visible, SortDirection::Descending)
            .await
            .unwrap();
        assert_eq!(desc.items[0].id, Some(salary_id));

        let unclassified = list_transactions(&pool, may(), TransactionFilter::Unclassified, SortDirection::Ascending)
            .await
            .unwrap();
        assert_eq!(unclassified.items.len(), 1);
        assert_eq!(unclassified.items[0].id, Some(coffee));

        let hidden = list_transactions(&pool, may(), TransactionFilter::Hidden, SortDirection::Ascending)
            .await
            .unwrap();
        assert_eq!(hidden.items[0].id, Some(rent));

        let by_category = list_transactions(&pool, may(), TransactionFilter::Category(income), SortDirection::Ascending)
            .await
            .unwrap();
        assert_eq!(by_category.items.len(), 1);
        assert_eq!(by_category.items[0].category.as_ref().unwrap().name, "Income");
    }

    #[tokio::test]
    async fn patch_sets_category_and_keeps_fingerprint() {
        let (_dir, pool) = test_db().await;
        let phone = create_category(&pool, "Phone", None, None).await.unwrap();
        let t = tx(date(2023, 5, 22), "Telekom Deutschland GmbH", "-25.99");
        let id = insert(&pool, &t).await;

        let patch = TransactionPatch {
            category_id: Some(phone),
            hidden: None,
        };
        assert!(patch_transaction(&pool, id, patch).await.unwrap());
        assert!(!patch_transaction(&pool, TransactionId(999), patch).await.unwrap());

        let stored = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.category_id(), Some(phone));
        assert!(!stored.hidden);
        assert!(transaction_exists(&pool, &t.fingerprint()).await.unwrap());
    }

    #[tokio::test]
    async fn store_resolves_fiscal_month() {
        let (_dir, pool) = test_db().await;
        let income = create_category(&pool, "Income", None, None).await.unwrap();
        let store = SqliteStore::new(pool);

        for (m, d) in [(1, 25), (2, 25), (3, 27)] {
            let mut t = tx(date(2020, m, d), "ACME AG", "3300.42");
            t.category = Some(Category::new(income, "Income"));
            store.transaction_insert(&t, &t.fingerprint()).await.unwrap();
        }

        let fm = fiscal_month_for_income_category(&store, 2, 2020, income).await.unwrap();
        assert_eq!((fm.start, fm.end), (date(2020, 1, 25), date(2020, 2, 24)));
    }
}
