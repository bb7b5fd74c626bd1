//! PostgreSQL storage implementation.
//!
//! Writes run in a transaction that locks the account row with
//! `SELECT ... FOR UPDATE`, which serializes writers per account. Lock
//! timeouts, serialization failures and deadlocks surface as
//! `StoreError::TransactionConflict`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::QueryAs;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use credits_core::{
    Account, AccountId, ApplyOutcome, EntryCursor, EntryId, LedgerEntry, Metadata, NewEntry,
    PlanCode,
};

use crate::error::{Result, StoreError};
use crate::{confirmed_entry, not_found, prepare_write, LedgerStore};

const ACCOUNT_COLUMNS: &str = "account_id, plan_code, cached_balance, cycle_anchor, disabled, \
                               next_sequence, created_at, updated_at";

const ENTRY_COLUMNS: &str =
    "account_id, entry_id, entry_type, amount, reason, metadata, status, sequence, created_at";

/// SQLSTATEs that mean "retry the whole transaction".
const RETRYABLE_SQLSTATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

#[derive(Debug, FromRow)]
struct AccountRow {
    account_id: String,
    plan_code: String,
    cached_balance: i64,
    cycle_anchor: Option<DateTime<Utc>>,
    disabled: bool,
    next_sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        Ok(Account {
            account_id: AccountId::try_from(self.account_id).map_err(corrupt)?,
            plan_code: PlanCode::try_from(self.plan_code).map_err(corrupt)?,
            cached_balance: self.cached_balance,
            cycle_anchor: self.cycle_anchor,
            disabled: self.disabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    account_id: String,
    entry_id: String,
    entry_type: String,
    amount: i64,
    reason: String,
    metadata: Json<Metadata>,
    status: String,
    sequence: i64,
    created_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self) -> Result<LedgerEntry> {
        Ok(LedgerEntry {
            entry_id: EntryId::try_from(self.entry_id).map_err(corrupt)?,
            account_id: AccountId::try_from(self.account_id).map_err(corrupt)?,
            entry_type: self.entry_type.parse()?,
            amount: self.amount,
            reason: self.reason,
            metadata: self.metadata.0,
            status: self.status.parse()?,
            sequence: u64::try_from(self.sequence).map_err(corrupt)?,
            created_at: self.created_at,
        })
    }
}

fn corrupt(err: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("corrupt row: {err}"))
}

/// Map a database error, classifying contention as retryable.
fn db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db
            .code()
            .as_deref()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code))
        {
            return StoreError::TransactionConflict(db.message().to_string());
        }
    }
    StoreError::Database(err.to_string())
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("value out of range: {value}")))
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn decode_entries(rows: Vec<EntryRow>) -> Result<Vec<LedgerEntry>> {
    rows.into_iter().map(EntryRow::into_entry).collect()
}

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!("Ledger schema migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(db_error)
    }

    async fn lock_account(
        tx: &mut Transaction<'static, Postgres>,
        account_id: &AccountId,
    ) -> Result<AccountRow> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE account_id = $1 FOR UPDATE"
        ))
        .bind(account_id.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| not_found(account_id))
    }

    /// Run a single-statement account update returning the new row.
    async fn update_returning(
        &self,
        account_id: &AccountId,
        query: QueryAs<'_, Postgres, AccountRow, PgArguments>,
    ) -> Result<Account> {
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found(account_id))?
            .into_account()
    }

    async fn fetch_entries(
        &self,
        query: QueryAs<'_, Postgres, EntryRow, PgArguments>,
    ) -> Result<Vec<LedgerEntry>> {
        decode_entries(query.fetch_all(&self.pool).await.map_err(db_error)?)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn create_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO ledger_accounts
                (account_id, plan_code, cached_balance, cycle_anchor, disabled,
                 next_sequence, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
            ON CONFLICT (account_id) DO NOTHING
            ",
        )
        .bind(account.account_id.as_str())
        .bind(account.plan_code.as_str())
        .bind(account.cached_balance)
        .bind(account.cycle_anchor)
        .bind(account.disabled)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE account_id = $1"
        ))
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(AccountRow::into_account)
        .transpose()
    }

    async fn update_plan(
        &self,
        account_id: &AccountId,
        plan_code: &PlanCode,
        cycle_anchor: DateTime<Utc>,
    ) -> Result<Account> {
        let sql = format!(
            "UPDATE ledger_accounts SET plan_code = $2, cycle_anchor = $3, updated_at = now() \
             WHERE account_id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let query = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account_id.as_str())
            .bind(plan_code.as_str())
            .bind(cycle_anchor);
        self.update_returning(account_id, query).await
    }

    async fn backfill_cycle_anchor(
        &self,
        account_id: &AccountId,
        anchor: DateTime<Utc>,
    ) -> Result<Account> {
        let sql = format!(
            "UPDATE ledger_accounts SET \
               updated_at = CASE WHEN cycle_anchor IS NULL THEN now() ELSE updated_at END, \
               cycle_anchor = COALESCE(cycle_anchor, $2) \
             WHERE account_id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let query = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account_id.as_str())
            .bind(anchor);
        self.update_returning(account_id, query).await
    }

    async fn overwrite_cached_balance(
        &self,
        account_id: &AccountId,
        balance: i64,
    ) -> Result<Account> {
        let sql = format!(
            "UPDATE ledger_accounts SET cached_balance = $2, updated_at = now() \
             WHERE account_id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let query = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account_id.as_str())
            .bind(balance);
        self.update_returning(account_id, query).await
    }

    async fn set_disabled(&self, account_id: &AccountId, disabled: bool) -> Result<Account> {
        let sql = format!(
            "UPDATE ledger_accounts SET disabled = $2, updated_at = now() \
             WHERE account_id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let query = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(account_id.as_str())
            .bind(disabled);
        self.update_returning(account_id, query).await
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    async fn apply_entry(&self, account_id: &AccountId, entry: &NewEntry) -> Result<ApplyOutcome> {
        let mut tx = self.begin().await?;
        let row = Self::lock_account(&mut tx, account_id).await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ledger_entries WHERE account_id = $1 AND entry_id = $2)",
        )
        .bind(account_id.as_str())
        .bind(entry.entry_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        if exists {
            return Ok(ApplyOutcome::AlreadyExists);
        }

        let sequence = u64::try_from(row.next_sequence).map_err(corrupt)?;
        let account = row.into_account()?;
        let balance = prepare_write(&account, entry)?;
        let now = Utc::now();
        let stored = confirmed_entry(account_id, entry, sequence, now)?;

        sqlx::query(&format!(
            "INSERT INTO ledger_entries ({ENTRY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(account_id.as_str())
        .bind(stored.entry_id.as_str())
        .bind(stored.entry_type.as_str())
        .bind(stored.amount)
        .bind(&stored.reason)
        .bind(Json(&stored.metadata))
        .bind(stored.status.as_str())
        .bind(to_sql_int(sequence)?)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "UPDATE ledger_accounts \
             SET cached_balance = $2, next_sequence = next_sequence + 1, updated_at = $3 \
             WHERE account_id = $1",
        )
        .bind(account_id.as_str())
        .bind(balance)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(ApplyOutcome::Written { balance })
    }

    async fn get_entry(
        &self,
        account_id: &AccountId,
        entry_id: &EntryId,
    ) -> Result<Option<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = $1 AND entry_id = $2"
        ))
        .bind(account_id.as_str())
        .bind(entry_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(EntryRow::into_entry)
        .transpose()
    }

    async fn list_entries_since(
        &self,
        account_id: &AccountId,
        cursor: &EntryCursor,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let base = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = $1");
        let order = "ORDER BY sequence ASC LIMIT $2";

        match cursor {
            EntryCursor::Start => {
                let sql = format!("{base} {order}");
                let query = sqlx::query_as::<_, EntryRow>(&sql)
                    .bind(account_id.as_str())
                    .bind(limit_param(limit));
                self.fetch_entries(query).await
            }
            EntryCursor::Entry(entry_id) => {
                // An unknown entry makes the subquery NULL, which matches nothing.
                let sql = format!(
                    "{base} AND sequence >= (SELECT sequence FROM ledger_entries \
                     WHERE account_id = $1 AND entry_id = $3) {order}"
                );
                let query = sqlx::query_as::<_, EntryRow>(&sql)
                    .bind(account_id.as_str())
                    .bind(limit_param(limit))
                    .bind(entry_id.as_str());
                self.fetch_entries(query).await
            }
            EntryCursor::Timestamp(at) => {
                let sql = format!("{base} AND created_at >= $3 {order}");
                let query = sqlx::query_as::<_, EntryRow>(&sql)
                    .bind(account_id.as_str())
                    .bind(limit_param(limit))
                    .bind(*at);
                self.fetch_entries(query).await
            }
            EntryCursor::Sequence(sequence) => {
                let sql = format!("{base} AND sequence >= $3 {order}");
                let query = sqlx::query_as::<_, EntryRow>(&sql)
                    .bind(account_id.as_str())
                    .bind(limit_param(limit))
                    .bind(i64::try_from(*sequence).unwrap_or(i64::MAX));
                self.fetch_entries(query).await
            }
        }
    }

    async fn list_recent_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = $1 \
             ORDER BY sequence DESC LIMIT $2"
        );
        let query = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(account_id.as_str())
            .bind(limit_param(limit));
        self.fetch_entries(query).await
    }

    async fn latest_entry_with_prefix(
        &self,
        account_id: &AccountId,
        prefix: &str,
    ) -> Result<Option<LedgerEntry>> {
        sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE account_id = $1 AND left(entry_id, length($2)) = $2 \
             ORDER BY sequence DESC LIMIT 1"
        ))
        .bind(account_id.as_str())
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(EntryRow::into_entry)
        .transpose()
    }

    async fn clear_all_entries(&self, account_id: &AccountId) -> Result<u64> {
        let mut tx = self.begin().await?;
        Self::lock_account(&mut tx, account_id).await?;

        let deleted = sqlx::query("DELETE FROM ledger_entries WHERE account_id = $1")
            .bind(account_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();

        sqlx::query(
            "UPDATE ledger_accounts SET cached_balance = 0, updated_at = now() WHERE account_id = $1",
        )
        .bind(account_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        tracing::debug!(account_id = %account_id, deleted, "Cleared PostgreSQL ledger");

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_sqlstates_cover_contention() {
        assert!(RETRYABLE_SQLSTATES.contains(&"40001"));
        assert!(RETRYABLE_SQLSTATES.contains(&"40P01"));
        assert!(!RETRYABLE_SQLSTATES.contains(&"23505"));
    }

    #[test]
    fn limit_saturates() {
        assert_eq!(limit_param(10), 10);
        assert_eq!(limit_param(usize::MAX), i64::MAX);
    }

    #[test]
    fn entry_row_rejects_unknown_type() {
        let row = EntryRow {
            account_id: "a".into(),
            entry_id: "E1".into(),
            entry_type: "bonus".into(),
            amount: 1,
            reason: "test".into(),
            metadata: Json(Metadata::new()),
            status: "confirmed".into(),
            sequence: 1,
            created_at: Utc::now(),
        };
        assert!(matches!(row.into_entry(), Err(StoreError::Serialization(_))));
    }
}
