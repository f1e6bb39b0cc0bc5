//! Database service for bank-service.

use crate::models::{
    Account, CreateAccount, Entry, Transfer, TransferTxParams, TransferTxResult,
};
use crate::services::metrics::{ACCOUNTS_CREATED, DB_QUERY_DURATION, TRANSFERS_TOTAL};
use futures::future::BoxFuture;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "bank-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Account Operations
    // -------------------------------------------------------------------------

    /// Create a new account.
    #[instrument(skip(self, input), fields(owner = %input.owner, currency = %input.currency))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&input.owner)
        .bind(input.balance)
        .bind(input.currency.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)))?;

        timer.observe_duration();
        ACCOUNTS_CREATED
            .with_label_values(&[input.currency.as_str()])
            .inc();

        info!(account_id = account.id, "Account created");

        Ok(account)
    }

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = id))]
    pub async fn get_account(&self, id: i64) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                AppError::NotFound(anyhow::anyhow!("Account {} not found", id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)),
        })?;

        timer.observe_duration();

        Ok(account)
    }

    /// List accounts ordered by id.
    #[instrument(skip(self))]
    pub async fn list_accounts(&self, limit: i64, offset: i64) -> Result<Vec<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list accounts: {}", e)))?;

        timer.observe_duration();

        Ok(accounts)
    }

    /// Set an account's balance to an absolute value.
    ///
    /// Administrative operation; transfers never call this. They adjust
    /// balances by delta inside their transaction instead.
    #[instrument(skip(self), fields(account_id = id))]
    pub async fn update_account(&self, id: i64, balance: i64) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(id)
        .bind(balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                AppError::NotFound(anyhow::anyhow!("Account {} not found", id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to update account: {}", e)),
        })?;

        timer.observe_duration();

        info!(account_id = account.id, "Account balance updated");

        Ok(account)
    }

    /// Delete an account.
    ///
    /// Accounts referenced by entries or transfers are protected by foreign
    /// keys and cannot be deleted.
    #[instrument(skip(self), fields(account_id = id))]
    pub async fn delete_account(&self, id: i64) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_account"])
            .start_timer();

        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete account: {}", e))
            })?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Account {} not found",
                id
            )));
        }

        info!(account_id = id, "Account deleted");

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Entry Operations
    // -------------------------------------------------------------------------

    /// Get an entry by ID.
    #[instrument(skip(self), fields(entry_id = id))]
    pub async fn get_entry(&self, id: i64) -> Result<Entry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                AppError::NotFound(anyhow::anyhow!("Entry {} not found", id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to get entry: {}", e)),
        })?;

        timer.observe_duration();

        Ok(entry)
    }

    /// List entries for an account ordered by id.
    #[instrument(skip(self), fields(account_id = account_id))]
    pub async fn list_entries(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list entries: {}", e)))?;

        timer.observe_duration();

        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Transfer Operations
    // -------------------------------------------------------------------------

    /// Get a transfer by ID.
    #[instrument(skip(self), fields(transfer_id = id))]
    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transfer"])
            .start_timer();

        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                AppError::NotFound(anyhow::anyhow!("Transfer {} not found", id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to get transfer: {}", e)),
        })?;

        timer.observe_duration();

        Ok(transfer)
    }

    /// List transfers touching either account, ordered by id.
    #[instrument(skip(self))]
    pub async fn list_transfers(
        &self,
        from_account_id: i64,
        to_account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transfers"])
            .start_timer();

        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $2
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list transfers: {}", e)))?;

        timer.observe_duration();

        Ok(transfers)
    }

    // -------------------------------------------------------------------------
    // Transfer Transaction
    // -------------------------------------------------------------------------

    /// Run `work` inside a database transaction.
    ///
    /// Commits when the closure returns Ok, rolls back when it returns Err.
    /// If the rollback itself fails, both errors are reported together so
    /// the original failure is never masked.
    async fn exec_tx<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, AppError>>,
    {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let outcome = work(&mut *tx).await;

        match outcome {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
                })?;
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rb_err) => Err(AppError::DatabaseError(anyhow::anyhow!(
                    "transaction error: {}; rollback error: {}",
                    err,
                    rb_err
                ))),
            },
        }
    }

    /// Move money from one account to another.
    ///
    /// A single transaction inserts the transfer record, writes a negative
    /// entry against the source account and a positive entry against the
    /// destination, and applies both balance deltas. The caller gets back
    /// every row the transfer wrote, with balances as of this transfer.
    ///
    /// The two balance updates always execute in ascending account-id order.
    /// Each update takes an exclusive row lock held until commit; a shared
    /// total order over those locks means two transfers running in opposite
    /// directions over the same pair of accounts cannot deadlock each other.
    ///
    /// Amounts are not validated here, with one exception: `i64::MIN` has no
    /// representable debit and is rejected before any row is written. Callers
    /// that need a positive amount or distinct accounts enforce that before
    /// calling; a self-transfer is well-defined and nets the balance to zero.
    #[instrument(
        skip(self, params),
        fields(
            from_account_id = params.from_account_id,
            to_account_id = params.to_account_id,
            amount = params.amount
        )
    )]
    pub async fn transfer_tx(
        &self,
        params: TransferTxParams,
    ) -> Result<TransferTxResult, AppError> {
        let debit = params.amount.checked_neg().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("amount {} cannot be debited", params.amount))
        })?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["transfer_tx"])
            .start_timer();

        let result = self
            .exec_tx(move |conn| {
                Box::pin(async move {
                    let transfer = Self::insert_transfer(conn, &params).await?;

                    let from_entry =
                        Self::insert_entry(conn, params.from_account_id, debit).await?;
                    let to_entry =
                        Self::insert_entry(conn, params.to_account_id, params.amount).await?;

                    // Lock rows in ascending account-id order.
                    let (from_account, to_account) =
                        if params.from_account_id < params.to_account_id {
                            let from_account = Self::add_account_balance(
                                conn,
                                params.from_account_id,
                                debit,
                            )
                            .await?;
                            let to_account = Self::add_account_balance(
                                conn,
                                params.to_account_id,
                                params.amount,
                            )
                            .await?;
                            (from_account, to_account)
                        } else {
                            let to_account = Self::add_account_balance(
                                conn,
                                params.to_account_id,
                                params.amount,
                            )
                            .await?;
                            let from_account = Self::add_account_balance(
                                conn,
                                params.from_account_id,
                                debit,
                            )
                            .await?;
                            (from_account, to_account)
                        };

                    Ok(TransferTxResult {
                        transfer,
                        from_entry,
                        to_entry,
                        from_account,
                        to_account,
                    })
                })
            })
            .await;

        timer.observe_duration();

        match &result {
            Ok(outcome) => {
                TRANSFERS_TOTAL.with_label_values(&["ok"]).inc();
                info!(transfer_id = outcome.transfer.id, "Transfer committed");
            }
            Err(e) => {
                TRANSFERS_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!(error = %e, "Transfer rolled back");
            }
        }

        result
    }

    /// Insert the transfer record.
    async fn insert_transfer(
        conn: &mut PgConnection,
        params: &TransferTxParams,
    ) -> Result<Transfer, AppError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert transfer: {}", e)))
    }

    /// Insert a ledger entry with a signed amount.
    async fn insert_entry(
        conn: &mut PgConnection,
        account_id: i64,
        amount: i64,
    ) -> Result<Entry, AppError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert entry: {}", e)))
    }

    /// Adjust an account balance by a signed delta and return the updated row.
    ///
    /// The UPDATE takes an exclusive lock on the account row that stays held
    /// until the surrounding transaction commits or rolls back.
    async fn add_account_balance(
        conn: &mut PgConnection,
        account_id: i64,
        delta: i64,
    ) -> Result<Account, AppError> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance + $1
            WHERE id = $2
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(delta)
        .bind(account_id)
        .fetch_one(conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                AppError::NotFound(anyhow::anyhow!("Account {} not found", account_id))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!(
                "Failed to update account balance: {}",
                e
            )),
        })
    }
}
