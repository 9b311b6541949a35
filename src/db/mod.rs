//! The transaction store: reading, writing and managing the SQLite database.
//!
//! The store is the source of truth. Everything in the spreadsheet mirror can be rebuilt from it.

mod migrations;

use crate::error::Res;
use crate::model::{
    Amount, Category, MirrorRef, Month, MonthlySummary, NewTransaction, Status, StoreStats,
    Transaction, YearlySummary,
};
use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, trace};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SELECT_TRANSACTION: &str = "SELECT id, original_message, sender_id, conversation_id, \
    message_id, description, amount, category, transaction_date, confidence, status, \
    error_message, mirror_sheet, mirror_row, mirror_updated_at, created_at \
    FROM transactions";

/// Restricts which processed transactions are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeriodFilter {
    All,
    /// A calendar month in every year, matching the contents of a month sheet.
    Month(Month),
    Year(i32),
    MonthOfYear(Month, i32),
}

#[derive(Debug, Clone)]
pub(crate) struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Creates a new SQLite file at `path` with the current schema. Fails if a file already exists
    /// there.
    pub(crate) async fn init(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("A database already exists at '{}'", path.display());
        }
        let pool = connect(path, true).await?;

        sqlx::query("CREATE TABLE schema_version (version INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .context("Failed to create schema_version table")?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
            .execute(&pool)
            .await
            .context("Failed to insert initial schema version")?;

        migrations::run(&pool, 0, migrations::CURRENT_VERSION).await?;
        debug!("Created database at {}", path.display());
        Ok(Self { pool })
    }

    /// Opens the SQLite file at `path` and migrates it to the current schema if it is older.
    pub(crate) async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("The database file is missing '{}'", path.display());
        }
        let pool = connect(path, false).await?;
        let db = Self { pool };
        let version = db.schema_version().await?;
        if version > migrations::CURRENT_VERSION {
            bail!(
                "The database schema version {version} is newer than this program supports ({})",
                migrations::CURRENT_VERSION
            );
        }
        migrations::run(&db.pool, version, migrations::CURRENT_VERSION).await?;
        Ok(db)
    }

    async fn schema_version(&self) -> Res<i32> {
        let row: (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to query schema version")?;
        Ok(row.0)
    }

    /// Persists a new transaction and returns its store id.
    pub(crate) async fn append(&self, txn: &NewTransaction) -> Res<i64> {
        txn.validate().context("Refusing to store an invalid transaction")?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO transactions (original_message, sender_id, conversation_id, message_id, \
            description, amount, category, transaction_date, confidence, status, created_at, \
            updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&txn.original_message)
        .bind(&txn.source.sender_id)
        .bind(&txn.source.conversation_id)
        .bind(&txn.source.message_id)
        .bind(txn.description.trim())
        .bind(txn.amount.to_string())
        .bind(txn.category.to_string())
        .bind(txn.date.format(DATE_FORMAT).to_string())
        .bind(txn.confidence)
        .bind(txn.status.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to insert transaction")?;
        let id = result.last_insert_rowid();
        trace!("Stored transaction {id}");
        Ok(id)
    }

    pub(crate) async fn get(&self, id: i64) -> Res<Option<Transaction>> {
        let row = sqlx::query(&format!("{SELECT_TRANSACTION} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch transaction {id}"))?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    /// Processed transactions matching `filter`, ordered by date ascending, then id.
    pub(crate) async fn list_processed(&self, filter: PeriodFilter) -> Res<Vec<Transaction>> {
        let (condition, period) = match filter {
            PeriodFilter::All => ("", None),
            PeriodFilter::Month(month) => (
                " AND strftime('%m', transaction_date) = ?",
                Some(format!("{:02}", month.number())),
            ),
            PeriodFilter::Year(year) => (
                " AND strftime('%Y', transaction_date) = ?",
                Some(format!("{year:04}")),
            ),
            PeriodFilter::MonthOfYear(month, year) => (
                " AND strftime('%Y-%m', transaction_date) = ?",
                Some(format!("{year:04}-{:02}", month.number())),
            ),
        };
        let sql = format!(
            "{SELECT_TRANSACTION} WHERE status = 'processed'{condition} \
            ORDER BY transaction_date ASC, id ASC"
        );
        let mut query = sqlx::query(&sql);
        if let Some(period) = period {
            query = query.bind(period);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;
        rows.iter().map(transaction_from_row).collect()
    }

    /// The ids of all processed transactions, as strings, for comparing against mirror cells.
    pub(crate) async fn processed_ids(&self) -> Res<HashSet<String>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM transactions WHERE status = 'processed'")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch transaction ids")?;
        Ok(rows.into_iter().map(|(id,)| id.to_string()).collect())
    }

    pub(crate) async fn count_processed(&self) -> Res<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE status = 'processed'")
                .fetch_one(&self.pool)
                .await
                .context("Failed to count transactions")?;
        Ok(row.0.max(0) as u64)
    }

    /// Records where transaction `id` was written in the mirror.
    pub(crate) async fn update_mirror_ref(&self, id: i64, mirror_ref: &MirrorRef) -> Res<()> {
        self.update_mirror_refs(&[(id, mirror_ref.clone())]).await
    }

    /// Records mirror positions for many transactions in one database transaction.
    pub(crate) async fn update_mirror_refs(&self, refs: &[(i64, MirrorRef)]) -> Res<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        for (id, mirror_ref) in refs {
            let result = sqlx::query(
                "UPDATE transactions SET mirror_sheet = ?, mirror_row = ?, mirror_updated_at = ?, \
                updated_at = ? WHERE id = ?",
            )
            .bind(mirror_ref.sheet())
            .bind(mirror_ref.row() as i64)
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to update mirror reference of transaction {id}"))?;
            if result.rows_affected() == 0 {
                bail!("Transaction {id} does not exist");
            }
        }
        tx.commit()
            .await
            .context("Failed to commit mirror reference updates")
    }

    pub(crate) async fn monthly_summary(&self, month: Month, year: i32) -> Res<MonthlySummary> {
        let txns = self
            .list_processed(PeriodFilter::MonthOfYear(month, year))
            .await?;
        let mut summary = MonthlySummary {
            month: Some(month),
            year,
            ..Default::default()
        };
        for txn in &txns {
            summary.add(txn.category, txn.amount);
        }
        Ok(summary)
    }

    pub(crate) async fn yearly_summary(&self, year: i32) -> Res<YearlySummary> {
        let txns = self.list_processed(PeriodFilter::Year(year)).await?;
        let mut months: BTreeMap<Month, MonthlySummary> = BTreeMap::new();
        let mut yearly = YearlySummary {
            year,
            ..Default::default()
        };
        for txn in &txns {
            let month = months.entry(txn.month()).or_insert_with(|| MonthlySummary {
                month: Some(txn.month()),
                year,
                ..Default::default()
            });
            month.add(txn.category, txn.amount);
            if txn.category.is_spending() {
                yearly.total_spent += txn.amount;
            } else {
                yearly.savings += txn.amount;
            }
            yearly.transaction_count += 1;
        }
        yearly.months = months.into_values().collect();
        Ok(yearly)
    }

    pub(crate) async fn stats(&self) -> Res<StoreStats> {
        let txns = self.list_processed(PeriodFilter::All).await?;
        let first_date = txns.first().map(|t| t.date);
        let last_date = txns.last().map(|t| t.date);
        let period_days = match (first_date, last_date) {
            (Some(first), Some(last)) => (last - first).num_days() + 1,
            _ => 0,
        };
        Ok(StoreStats {
            transaction_count: txns.len() as u64,
            first_date,
            last_date,
            total_spent: txns
                .iter()
                .filter(|t| t.category.is_spending())
                .map(|t| t.amount)
                .sum(),
            period_days,
        })
    }

    /// Returns the cached interpretation output for `input_hash` unless it expired before `now`.
    pub(crate) async fn cached_interpretation(
        &self,
        input_hash: &str,
        now: DateTime<Utc>,
    ) -> Res<Option<String>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT output_json, expires_at FROM interpretation_cache WHERE input_hash = ?",
        )
        .bind(input_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read the interpretation cache")?;
        let Some((output, expires_at)) = row else {
            return Ok(None);
        };
        let expires_at = parse_timestamp(&expires_at)?;
        Ok((expires_at > now).then_some(output))
    }

    /// Stores (or replaces) the interpretation output for `input_hash`.
    pub(crate) async fn save_interpretation(
        &self,
        input_hash: &str,
        input_text: &str,
        output_json: &str,
        model: &str,
        ttl: chrono::Duration,
    ) -> Res<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO interpretation_cache \
            (input_hash, input_text, output_json, model, created_at, expires_at) \
            VALUES (?, ?, ?, ?, ?, ?) \
            ON CONFLICT(input_hash) DO UPDATE SET output_json = excluded.output_json, \
            model = excluded.model, created_at = excluded.created_at, \
            expires_at = excluded.expires_at",
        )
        .bind(input_hash)
        .bind(input_text)
        .bind(output_json)
        .bind(model)
        .bind(now.to_rfc3339())
        .bind((now + ttl).to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to write the interpretation cache")?;
        Ok(())
    }
}

async fn connect(path: &Path, create: bool) -> Res<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .context("Failed to parse SQLite connection string")?
        .create_if_missing(create);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database at {}", path.display()))
}

fn parse_timestamp(s: &str) -> Res<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{s}'"))?
        .with_timezone(&Utc))
}

fn transaction_from_row(row: &SqliteRow) -> Res<Transaction> {
    let id: i64 = row.try_get("id")?;
    let context = || format!("Invalid data in transaction {id}");

    let amount: String = row.try_get("amount")?;
    let category: String = row.try_get("category")?;
    let date: String = row.try_get("transaction_date")?;
    let status: String = row.try_get("status")?;
    let mirror_sheet: Option<String> = row.try_get("mirror_sheet")?;
    let mirror_row: Option<i64> = row.try_get("mirror_row")?;
    let mirror_updated_at: Option<String> = row.try_get("mirror_updated_at")?;
    let created_at: String = row.try_get("created_at")?;

    let mirror_ref = match (mirror_sheet, mirror_row) {
        (Some(sheet), Some(row)) if row >= 2 => Some(MirrorRef::new(sheet, row as usize)),
        _ => None,
    };

    Ok(Transaction {
        id,
        original_message: row.try_get("original_message")?,
        sender_id: row.try_get("sender_id")?,
        conversation_id: row.try_get("conversation_id")?,
        message_id: row.try_get("message_id")?,
        description: row.try_get("description")?,
        amount: Amount::from_str(&amount).with_context(context)?,
        category: Category::from_str(&category).with_context(context)?,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT).with_context(context)?,
        confidence: row.try_get("confidence")?,
        status: Status::from_str(&status).with_context(context)?,
        error_message: row.try_get("error_message")?,
        mirror_ref,
        mirror_updated_at: mirror_updated_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        created_at: parse_timestamp(&created_at)?,
    })
}
