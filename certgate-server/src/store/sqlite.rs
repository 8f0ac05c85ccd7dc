//! SQLite-based storage implementation

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;

use super::{
    AccessCodeRecord, AccessStore, ActivityEntry, ActivityLevel, LoginFailure, NewActivity,
    NewNotification, NewPayment, NewWebhookEvent, Notification, NotificationChannel,
    NotificationStatus, ReconcileOutcome, StoreResult, TransactionRecord, User, UserId,
    WebhookEventRecord, ACTION_PAYMENT, CODE_ORIGIN_PAYMENT, PAYMENT_STATUS_PAID,
    TRANSACTION_COMPLETED, TRANSACTION_INITIAL_PURCHASE,
};
use crate::error::ServerError;

/// Current schema version
const SCHEMA_VERSION: i64 = 1;

/// Default number of pooled connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const USER_COLUMNS: &str = "id, email, name, phone, access_code, payment_status, \
     amount_paid_cents, currency, paid_at, expires_at, active, blocked, \
     failed_login_attempts, last_access_at, last_access_ip, registration_ip, created_at";

/// SQLite-backed store over a bounded connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the database at a `sqlite:` URL
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect_with(options, max_connections).await
    }

    /// Open or create a database file
    pub async fn open(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new().filename(path);
        Self::connect_with(options, DEFAULT_MAX_CONNECTIONS).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> StoreResult<Self> {
        let options = options
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn migrate(&self) -> StoreResult<()> {
        let current_version = self.schema_version().await?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                self.migrate_v1().await?;
            }

            sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
                .bind(SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    async fn schema_version(&self) -> StoreResult<i64> {
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        )
        .fetch_one(&self.pool)
        .await?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version.unwrap_or(0))
    }

    /// Migration to version 1: initial schema
    async fn migrate_v1(&self) -> StoreResult<()> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                phone TEXT,
                access_code TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                amount_paid_cents INTEGER NOT NULL DEFAULT 0,
                currency TEXT NOT NULL,
                paid_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                blocked INTEGER NOT NULL DEFAULT 0,
                failed_login_attempts INTEGER NOT NULL DEFAULT 0,
                last_access_at TEXT,
                last_access_ip TEXT,
                registration_ip TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS access_code_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                email TEXT NOT NULL,
                code TEXT NOT NULL,
                origin TEXT NOT NULL,
                issued_at TEXT NOT NULL,
                first_used_at TEXT,
                last_used_at TEXT,
                use_count INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                issued_ip TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_codes_user ON access_code_history(user_id);

            -- One transaction per checkout session
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                email TEXT NOT NULL,
                provider_session_id TEXT NOT NULL UNIQUE,
                payment_intent_id TEXT,
                amount_cents INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                ip TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER REFERENCES users(id),
                email TEXT,
                action TEXT NOT NULL,
                description TEXT NOT NULL,
                ip TEXT,
                level TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                channel TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT,
                message TEXT NOT NULL,
                status TEXT NOT NULL,
                provider TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS webhook_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                received_at TEXT NOT NULL,
                source_ip TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Outcome for a session that already has a transaction
    async fn existing_outcome(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Option<ReconcileOutcome>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT u.id, u.email, u.access_code, u.expires_at, u.name, u.phone \
             FROM transactions t JOIN users u ON u.id = t.user_id \
             WHERE t.provider_session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|row| -> Result<ReconcileOutcome, sqlx::Error> {
            Ok(ReconcileOutcome {
                user_id: UserId(row.try_get("id")?),
                email: row.try_get("email")?,
                code: row.try_get("access_code")?,
                expires_at: row.try_get("expires_at")?,
                name: row.try_get("name")?,
                phone: row.try_get("phone")?,
                newly_recorded: false,
            })
        })
        .transpose()
    }

    /// The reconciliation unit; runs inside an open transaction
    async fn reconcile_in_transaction(
        conn: &mut SqliteConnection,
        payment: &NewPayment,
    ) -> Result<ReconcileOutcome, sqlx::Error> {
        let details = &payment.details;

        if let Some(outcome) = Self::existing_outcome(conn, &details.session_id).await? {
            return Ok(outcome);
        }

        let now = Utc::now();
        let expires_at = now + payment.access_period;

        let existing: Option<(i64, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT id, name, phone FROM users WHERE email = ?")
                .bind(&details.email)
                .fetch_optional(&mut *conn)
                .await?;

        let (user_id, name, phone) = match existing {
            Some((id, stored_name, stored_phone)) => {
                sqlx::query(
                    "UPDATE users SET access_code = ?, \
                         name = COALESCE(?, name), \
                         phone = COALESCE(?, phone), \
                         payment_status = ?, \
                         amount_paid_cents = amount_paid_cents + ?, \
                         currency = ?, paid_at = ?, expires_at = ?, active = 1 \
                     WHERE id = ?",
                )
                .bind(&payment.code)
                .bind(&details.name)
                .bind(&details.phone)
                .bind(PAYMENT_STATUS_PAID)
                .bind(details.amount_cents)
                .bind(&details.currency)
                .bind(now)
                .bind(expires_at)
                .bind(id)
                .execute(&mut *conn)
                .await?;

                sqlx::query("UPDATE access_code_history SET active = 0 WHERE user_id = ?")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;

                (
                    id,
                    details.name.clone().or(stored_name),
                    details.phone.clone().or(stored_phone),
                )
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO users (email, name, phone, access_code, payment_status, \
                         amount_paid_cents, currency, paid_at, expires_at, active, blocked, \
                         failed_login_attempts, registration_ip, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, 0, ?, ?)",
                )
                .bind(&details.email)
                .bind(&details.name)
                .bind(&details.phone)
                .bind(&payment.code)
                .bind(PAYMENT_STATUS_PAID)
                .bind(details.amount_cents)
                .bind(&details.currency)
                .bind(now)
                .bind(expires_at)
                .bind(&payment.ip)
                .bind(now)
                .execute(&mut *conn)
                .await?;

                (
                    result.last_insert_rowid(),
                    details.name.clone(),
                    details.phone.clone(),
                )
            }
        };

        sqlx::query(
            "INSERT INTO access_code_history \
                 (user_id, email, code, origin, issued_at, use_count, active, issued_ip) \
             VALUES (?, ?, ?, ?, ?, 0, 1, ?)",
        )
        .bind(user_id)
        .bind(&details.email)
        .bind(&payment.code)
        .bind(CODE_ORIGIN_PAYMENT)
        .bind(now)
        .bind(&payment.ip)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "INSERT INTO transactions \
                 (user_id, email, provider_session_id, payment_intent_id, amount_cents, \
                  currency, status, kind, created_at, completed_at, ip) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&details.email)
        .bind(&details.session_id)
        .bind(&details.payment_intent_id)
        .bind(details.amount_cents)
        .bind(&details.currency)
        .bind(TRANSACTION_COMPLETED)
        .bind(TRANSACTION_INITIAL_PURCHASE)
        .bind(now)
        .bind(now)
        .bind(&payment.ip)
        .execute(&mut *conn)
        .await?;

        let activity = NewActivity::info(
            ACTION_PAYMENT,
            format!("Pago completado: {}", details.session_id),
        )
        .user(UserId(user_id))
        .email(&details.email)
        .ip(payment.ip.as_deref());
        insert_activity(&mut *conn, &activity, now).await?;

        Ok(ReconcileOutcome {
            user_id: UserId(user_id),
            email: details.email.clone(),
            code: payment.code.clone(),
            expires_at,
            name,
            phone,
            newly_recorded: true,
        })
    }
}

async fn insert_activity(
    conn: &mut SqliteConnection,
    entry: &NewActivity,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO activity_log (user_id, email, action, description, ip, level, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.user_id.map(|id| id.0))
    .bind(&entry.email)
    .bind(&entry.action)
    .bind(&entry.description)
    .bind(&entry.ip)
    .bind(entry.level.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value {value:?}").into(),
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        access_code: row.try_get("access_code")?,
        payment_status: row.try_get("payment_status")?,
        amount_paid_cents: row.try_get("amount_paid_cents")?,
        currency: row.try_get("currency")?,
        paid_at: row.try_get("paid_at")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
        blocked: row.try_get("blocked")?,
        failed_login_attempts: row.try_get("failed_login_attempts")?,
        last_access_at: row.try_get("last_access_at")?,
        last_access_ip: row.try_get("last_access_ip")?,
        registration_ip: row.try_get("registration_ip")?,
        created_at: row.try_get("created_at")?,
    })
}

fn access_code_from_row(row: &SqliteRow) -> Result<AccessCodeRecord, sqlx::Error> {
    Ok(AccessCodeRecord {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        email: row.try_get("email")?,
        code: row.try_get("code")?,
        origin: row.try_get("origin")?,
        issued_at: row.try_get("issued_at")?,
        first_used_at: row.try_get("first_used_at")?,
        last_used_at: row.try_get("last_used_at")?,
        use_count: row.try_get("use_count")?,
        active: row.try_get("active")?,
        issued_ip: row.try_get("issued_ip")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<TransactionRecord, sqlx::Error> {
    Ok(TransactionRecord {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        email: row.try_get("email")?,
        provider_session_id: row.try_get("provider_session_id")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        status: row.try_get("status")?,
        kind: row.try_get("kind")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
        ip: row.try_get("ip")?,
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<ActivityEntry, sqlx::Error> {
    let level: String = row.try_get("level")?;
    Ok(ActivityEntry {
        id: row.try_get("id")?,
        user_id: row.try_get::<Option<i64>, _>("user_id")?.map(UserId),
        email: row.try_get("email")?,
        action: row.try_get("action")?,
        description: row.try_get("description")?,
        ip: row.try_get("ip")?,
        level: ActivityLevel::parse(&level).ok_or_else(|| decode_error("level", &level))?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, sqlx::Error> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        channel: NotificationChannel::parse(&channel)
            .ok_or_else(|| decode_error("channel", &channel))?,
        recipient: row.try_get("recipient")?,
        subject: row.try_get("subject")?,
        message: row.try_get("message")?,
        status: NotificationStatus::parse(&status)
            .ok_or_else(|| decode_error("status", &status))?,
        provider: row.try_get("provider")?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
    })
}

fn webhook_event_from_row(row: &SqliteRow) -> Result<WebhookEventRecord, sqlx::Error> {
    Ok(WebhookEventRecord {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        event_type: row.try_get("event_type")?,
        event_id: row.try_get("event_id")?,
        payload: row.try_get("payload")?,
        received_at: row.try_get("received_at")?,
        source_ip: row.try_get("source_ip")?,
    })
}

#[async_trait]
impl AccessStore for SqliteStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let normalized = email.trim().to_lowercase();
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn reconcile_payment(&self, payment: &NewPayment) -> StoreResult<ReconcileOutcome> {
        // IMMEDIATE takes the write lock up front, so a concurrent caller for
        // the same session waits here and then sees our transaction row.
        // Dropping `tx` before commit rolls it back and releases the lock.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let err = match Self::reconcile_in_transaction(&mut *tx, payment).await {
            Ok(outcome) => match tx.commit().await {
                Ok(()) => return Ok(outcome),
                Err(err) => err,
            },
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                err
            }
        };

        if is_unique_violation(&err) {
            tracing::info!(
                session_id = %payment.details.session_id,
                "Session reconciled concurrently, returning stored outcome"
            );
            let mut conn = self.pool.acquire().await?;
            if let Some(outcome) =
                Self::existing_outcome(&mut conn, &payment.details.session_id).await?
            {
                return Ok(outcome);
            }
        }

        Err(err.into())
    }

    async fn record_login_failure(
        &self,
        user_id: UserId,
        threshold: i64,
    ) -> StoreResult<LoginFailure> {
        let row: Option<(i64, bool)> = sqlx::query_as(
            "UPDATE users SET failed_login_attempts = failed_login_attempts + 1, \
                 blocked = CASE WHEN failed_login_attempts + 1 >= ? THEN 1 ELSE blocked END \
             WHERE id = ? \
             RETURNING failed_login_attempts, blocked",
        )
        .bind(threshold)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let (attempts, blocked) =
            row.ok_or_else(|| ServerError::NotFound(format!("user {}", user_id.0)))?;
        Ok(LoginFailure { attempts, blocked })
    }

    async fn record_login_success(
        &self,
        user_id: UserId,
        code: &str,
        ip: Option<&str>,
    ) -> StoreResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, last_access_at = ?, last_access_ip = ? \
             WHERE id = ?",
        )
        .bind(now)
        .bind(ip)
        .bind(user_id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE access_code_history SET use_count = use_count + 1, \
                 first_used_at = COALESCE(first_used_at, ?), last_used_at = ? \
             WHERE user_id = ? AND code = ?",
        )
        .bind(now)
        .bind(now)
        .bind(user_id.0)
        .bind(code)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn log_activity(&self, entry: NewActivity) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_activity(&mut conn, &entry, Utc::now()).await?;
        Ok(())
    }

    async fn log_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO webhook_events \
                 (provider, event_type, event_id, payload, received_at, source_ip) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.provider)
        .bind(&event.event_type)
        .bind(&event.event_id)
        .bind(&event.payload)
        .bind(Utc::now())
        .bind(&event.source_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_notification(&self, notification: NewNotification) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO notifications (user_id, channel, recipient, subject, message, status, \
                 provider, attempts, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(notification.user_id.0)
        .bind(notification.channel.as_str())
        .bind(&notification.recipient)
        .bind(&notification.subject)
        .bind(&notification.message)
        .bind(notification.status.as_str())
        .bind(&notification.provider)
        .bind(notification.attempts)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_access_codes(&self, user_id: UserId) -> StoreResult<Vec<AccessCodeRecord>> {
        let rows = sqlx::query("SELECT * FROM access_code_history WHERE user_id = ? ORDER BY id")
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(access_code_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn list_transactions(&self, user_id: UserId) -> StoreResult<Vec<TransactionRecord>> {
        let rows = sqlx::query("SELECT * FROM transactions WHERE user_id = ? ORDER BY id")
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn list_activity(&self) -> StoreResult<Vec<ActivityEntry>> {
        let rows = sqlx::query("SELECT * FROM activity_log ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(activity_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        let rows = sqlx::query("SELECT * FROM notifications WHERE user_id = ? ORDER BY id")
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(notification_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn list_webhook_events(&self) -> StoreResult<Vec<WebhookEventRecord>> {
        let rows = sqlx::query("SELECT * FROM webhook_events ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(webhook_event_from_row)
            .collect::<Result<_, _>>()?)
    }
}
