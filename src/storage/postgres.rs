use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};

use super::{OrderStore, Storage, StoreError, Transaction, TrackingLedger};
use crate::domain::order::{
    CustomerContact, Money, Order, OrderId, OrderStatus, PaymentStatus, StatusUpdate,
    TrackingEvent, TrackingToken, ValidatedDraft,
};

// ============================================================================
// PostgreSQL Storage
// ============================================================================
//
// - Write transactions lock the order row (`FOR UPDATE`) before touching it,
//   so two updates to the same order serialize; last commit wins.
// - Read transactions run REPEATABLE READ, READ ONLY: order row and history
//   come from one snapshot.
// - Every statement is bounded by `statement_timeout` server-side and by a
//   client-side timer; either expiry surfaces as `StoreError::Unavailable`.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        id BIGSERIAL PRIMARY KEY,
        customer_name VARCHAR(255) NOT NULL,
        customer_email VARCHAR(255) NOT NULL,
        customer_phone VARCHAR(50),
        items TEXT NOT NULL,
        total_amount NUMERIC(10, 2) NOT NULL CHECK (total_amount >= 0),
        status VARCHAR(100) NOT NULL DEFAULT 'pending',
        tracking_token VARCHAR(100) NOT NULL,
        payment_status VARCHAR(20) NOT NULL DEFAULT 'pending'
            CHECK (payment_status IN ('pending', 'paid', 'failed')),
        payment_reference VARCHAR(255),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT orders_tracking_token_key UNIQUE (tracking_token)
    )",
    "CREATE TABLE IF NOT EXISTS tracking_events (
        order_id BIGINT NOT NULL REFERENCES orders(id),
        sequence BIGINT NOT NULL,
        status VARCHAR(100) NOT NULL,
        location VARCHAR(255) NOT NULL DEFAULT '',
        message TEXT NOT NULL DEFAULT '',
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (order_id, sequence)
    )",
    "CREATE TABLE IF NOT EXISTS payment_references (
        reference VARCHAR(255) PRIMARY KEY,
        order_id BIGINT NOT NULL REFERENCES orders(id),
        issued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS orders_created_at_idx ON orders (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS payment_references_order_idx ON payment_references (order_id)",
];

const ORDER_COLUMNS: &str = "id, customer_name, customer_email, customer_phone, items, \
     total_amount, status, tracking_token, payment_status, payment_reference, created_at";

const EVENT_COLUMNS: &str = "order_id, sequence, status, location, message, recorded_at";

#[derive(Debug, Clone)]
pub struct PgStorageConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Bound on pool acquisition and on every statement.
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
    timeout: Duration,
}

impl PgStorage {
    pub async fn connect(config: &PgStorageConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error(e, "connect"))?;

        tracing::info!(
            max_connections = config.max_connections,
            timeout_ms = config.timeout.as_millis() as u64,
            "Connected to PostgreSQL"
        );

        Ok(Self::from_pool(pool, config.timeout))
    }

    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create the two relations if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            bounded(self.timeout, "ensure_schema", sqlx::query(statement).execute(&self.pool))
                .await?;
        }
        tracing::info!("Schema ready (orders, tracking_events)");
        Ok(())
    }

    async fn open(&self, read_only: bool) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = bounded(self.timeout, "begin", self.pool.begin()).await?;

        if read_only {
            bounded(
                self.timeout,
                "begin",
                sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                    .execute(&mut *tx),
            )
            .await?;
        }

        bounded(
            self.timeout,
            "begin",
            sqlx::query(&statement_timeout_sql(self.timeout)).execute(&mut *tx),
        )
        .await?;

        Ok(Box::new(PgTransaction {
            tx,
            timeout: self.timeout,
            read_only,
        }))
    }
}

#[async_trait]
impl Storage for PgStorage {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.open(false).await
    }

    async fn begin_read(&self) -> Result<Box<dyn Transaction>, StoreError> {
        self.open(true).await
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

// ============================================================================
// Transaction
// ============================================================================

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    timeout: Duration,
    read_only: bool,
}

impl PgTransaction {
    async fn fetch_order(
        &mut self,
        sql: &str,
        id: Option<i64>,
        token: Option<&str>,
    ) -> Result<Option<Order>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        if let Some(token) = token {
            query = query.bind(token.to_string());
        }

        let row = bounded(self.timeout, "fetch_order", query.fetch_optional(&mut *self.tx)).await?;
        row.as_ref().map(order_from_row).transpose()
    }
}

#[async_trait]
impl OrderStore for PgTransaction {
    async fn create(
        &mut self,
        draft: &ValidatedDraft,
        token: &TrackingToken,
    ) -> Result<Order, StoreError> {
        let sql = format!(
            "INSERT INTO orders (customer_name, customer_email, customer_phone, items, total_amount, tracking_token)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            ORDER_COLUMNS
        );

        let row = bounded(
            self.timeout,
            "create_order",
            sqlx::query(&sql)
                .bind(&draft.customer.name)
                .bind(&draft.customer.email)
                .bind(draft.customer.phone.as_deref())
                .bind(&draft.items)
                .bind(draft.total.amount())
                .bind(token.as_str())
                .fetch_one(&mut *self.tx),
        )
        .await?;

        order_from_row(&row)
    }

    async fn get_by_id(&mut self, id: OrderId) -> Result<Order, StoreError> {
        let lock = if self.read_only { "" } else { " FOR UPDATE" };
        let sql = format!("SELECT {} FROM orders WHERE id = $1{}", ORDER_COLUMNS, lock);

        self.fetch_order(&sql, Some(id.value()), None)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order {}", id)))
    }

    async fn get_by_tracking_token(&mut self, token: &TrackingToken) -> Result<Order, StoreError> {
        let sql = format!("SELECT {} FROM orders WHERE tracking_token = $1", ORDER_COLUMNS);

        self.fetch_order(&sql, None, Some(token.as_str()))
            .await?
            .ok_or_else(|| StoreError::NotFound("tracking token".to_string()))
    }

    async fn list_all(&mut self) -> Result<Vec<Order>, StoreError> {
        let sql = format!(
            "SELECT {} FROM orders ORDER BY created_at DESC, id DESC",
            ORDER_COLUMNS
        );

        let rows = bounded(
            self.timeout,
            "list_orders",
            sqlx::query(&sql).fetch_all(&mut *self.tx),
        )
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn update_status(
        &mut self,
        id: OrderId,
        status: &OrderStatus,
    ) -> Result<bool, StoreError> {
        let result = bounded(
            self.timeout,
            "update_status",
            sqlx::query("UPDATE orders SET status = $1 WHERE id = $2 AND status <> $1")
                .bind(status.as_str())
                .bind(id.value())
                .execute(&mut *self.tx),
        )
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Either unchanged or missing; tell the two apart.
        self.get_by_id(id).await.map(|_| false)
    }

    async fn update_payment_status(
        &mut self,
        id: OrderId,
        status: PaymentStatus,
    ) -> Result<bool, StoreError> {
        let result = bounded(
            self.timeout,
            "update_payment_status",
            sqlx::query("UPDATE orders SET payment_status = $1 WHERE id = $2 AND payment_status <> $1")
                .bind(status.as_str())
                .bind(id.value())
                .execute(&mut *self.tx),
        )
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.get_by_id(id).await.map(|_| false)
    }

    async fn set_payment_reference(
        &mut self,
        id: OrderId,
        reference: &str,
    ) -> Result<(), StoreError> {
        let result = bounded(
            self.timeout,
            "set_payment_reference",
            sqlx::query("UPDATE orders SET payment_reference = $1 WHERE id = $2")
                .bind(reference)
                .bind(id.value())
                .execute(&mut *self.tx),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", id)));
        }

        bounded(
            self.timeout,
            "set_payment_reference",
            sqlx::query(
                "INSERT INTO payment_references (reference, order_id) VALUES ($1, $2)
                 ON CONFLICT (reference) DO NOTHING",
            )
            .bind(reference)
            .bind(id.value())
            .execute(&mut *self.tx),
        )
        .await?;

        Ok(())
    }

    async fn payment_references(&mut self, id: OrderId) -> Result<Vec<String>, StoreError> {
        // NotFound for an unknown order rather than an empty list
        self.get_by_id(id).await?;

        bounded(
            self.timeout,
            "payment_references",
            sqlx::query_scalar(
                "SELECT reference FROM payment_references WHERE order_id = $1
                 ORDER BY issued_at, reference",
            )
            .bind(id.value())
            .fetch_all(&mut *self.tx),
        )
        .await
    }
}

#[async_trait]
impl TrackingLedger for PgTransaction {
    async fn append(
        &mut self,
        order_id: OrderId,
        update: &StatusUpdate,
    ) -> Result<TrackingEvent, StoreError> {
        // Aggregate over zero rows still yields one row, so the first entry
        // gets sequence 1. Timestamps never go backwards within an order.
        let sql = format!(
            "INSERT INTO tracking_events ({cols})
             SELECT $1, COALESCE(MAX(sequence), 0) + 1, $2, $3, $4,
                    GREATEST(NOW(), COALESCE(MAX(recorded_at), NOW()))
             FROM tracking_events WHERE order_id = $1
             RETURNING {cols}",
            cols = EVENT_COLUMNS
        );

        let row = bounded(
            self.timeout,
            "append_event",
            sqlx::query(&sql)
                .bind(order_id.value())
                .bind(update.status.as_str())
                .bind(&update.location)
                .bind(&update.message)
                .fetch_one(&mut *self.tx),
        )
        .await?;

        event_from_row(&row)
    }

    async fn list_for_order(&mut self, order_id: OrderId) -> Result<Vec<TrackingEvent>, StoreError> {
        let sql = format!(
            "SELECT {} FROM tracking_events WHERE order_id = $1
             ORDER BY recorded_at DESC, sequence DESC",
            EVENT_COLUMNS
        );

        let rows = bounded(
            self.timeout,
            "list_events",
            sqlx::query(&sql).bind(order_id.value()).fetch_all(&mut *self.tx),
        )
        .await?;

        if rows.is_empty() {
            let exists: bool = bounded(
                self.timeout,
                "list_events",
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                    .bind(order_id.value())
                    .fetch_one(&mut *self.tx),
            )
            .await?;
            if !exists {
                return Err(StoreError::NotFound(format!("order {}", order_id)));
            }
        }

        rows.iter().map(event_from_row).collect()
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let timeout = self.timeout;
        bounded(timeout, "commit", self.tx.commit()).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| map_sqlx_error(e, operation)),
        Err(_) => {
            tracing::warn!(
                operation = operation,
                timeout_ms = timeout.as_millis() as u64,
                "PostgreSQL call timed out"
            );
            Err(StoreError::Unavailable(format!(
                "{} timed out after {}ms",
                operation,
                timeout.as_millis()
            )))
        }
    }
}

fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = {}", timeout.as_millis().max(1))
}

fn map_sqlx_error(error: sqlx::Error, operation: &'static str) -> StoreError {
    match &error {
        sqlx::Error::RowNotFound => return StoreError::NotFound(operation.to_string()),
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => {
            tracing::error!(operation = operation, error = %error, "PostgreSQL unreachable");
            return StoreError::Unavailable(format!("{}: {}", operation, error));
        }
        sqlx::Error::Database(db_error) => {
            if let Some(mapped) = classify_sqlstate(
                db_error.code().as_deref(),
                db_error.constraint(),
                operation,
            ) {
                return mapped;
            }
        }
        _ => {}
    }

    tracing::error!(operation = operation, error = %error, "PostgreSQL error");
    StoreError::Backend(format!("{}: {}", operation, error))
}

fn classify_sqlstate(
    code: Option<&str>,
    constraint: Option<&str>,
    operation: &'static str,
) -> Option<StoreError> {
    match code? {
        // unique_violation
        "23505" if constraint == Some("orders_tracking_token_key") => {
            Some(StoreError::DuplicateTrackingToken)
        }
        // foreign_key_violation: ledger entry for a missing order
        "23503" => Some(StoreError::NotFound(format!("order ({})", operation))),
        // read_only_sql_transaction
        "25006" => Some(StoreError::ReadOnly),
        // query_canceled (statement_timeout), lock_not_available,
        // serialization_failure, deadlock_detected, admin/crash shutdown
        transient @ ("57014" | "55P03" | "40001" | "40P01" | "57P01" | "57P02" | "57P03") => Some(
            StoreError::Unavailable(format!("{} aborted (SQLSTATE {})", operation, transient)),
        ),
        _ => None,
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error(e, "decode_order");
    let corrupt = |e: crate::domain::order::OrderError| StoreError::Backend(format!("corrupt order row: {}", e));

    let status: String = row.try_get("status").map_err(decode)?;
    let payment_status: String = row.try_get("payment_status").map_err(decode)?;
    let token: String = row.try_get("tracking_token").map_err(decode)?;
    let total: Decimal = row.try_get("total_amount").map_err(decode)?;

    Ok(Order {
        id: OrderId(row.try_get("id").map_err(decode)?),
        tracking_token: TrackingToken::parse(token).map_err(corrupt)?,
        customer: CustomerContact {
            name: row.try_get("customer_name").map_err(decode)?,
            email: row.try_get("customer_email").map_err(decode)?,
            phone: row.try_get("customer_phone").map_err(decode)?,
        },
        items: row.try_get("items").map_err(decode)?,
        total: Money::new(total).map_err(corrupt)?,
        status: OrderStatus::new(status).map_err(corrupt)?,
        payment_status: PaymentStatus::parse(&payment_status).ok_or_else(|| {
            StoreError::Backend(format!("unknown payment status '{}'", payment_status))
        })?,
        payment_reference: row.try_get("payment_reference").map_err(decode)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
    })
}

fn event_from_row(row: &PgRow) -> Result<TrackingEvent, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error(e, "decode_event");
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(TrackingEvent {
        order_id: OrderId(row.try_get("order_id").map_err(decode)?),
        sequence: row.try_get("sequence").map_err(decode)?,
        status: OrderStatus::new(status)
            .map_err(|e| StoreError::Backend(format!("corrupt tracking row: {}", e)))?,
        location: row.try_get("location").map_err(decode)?,
        message: row.try_get("message").map_err(decode)?,
        recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at").map_err(decode)?,
    })
}

// ============================================================================
// Unit Tests
// ============================================================================
//
// Statement behaviour needs a live database; these cover the pure mapping.
//
