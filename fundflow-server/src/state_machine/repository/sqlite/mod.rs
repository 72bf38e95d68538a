//! SQLite implementation of `WorkflowRepository`.
//!
//! Each entity is stored as a JSON `data` column next to the few columns that
//! queries filter or sort on. The JSON is the source of truth; the index
//! columns are rewritten with it on every write.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! # Forward Compatibility
//!
//! New fields on stored entities must be `#[serde(default)]` so that rows
//! written by older builds still deserialize.

mod records;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use fundflow_core::{
    AuditEntry, Disbursement, Fund, FundId, FundRequest, NotificationRequest, RequestId,
    RequestStatus, Review, RoutingRule, RuleId,
};

use super::{CommitUnit, RepositoryError, WorkflowRepository};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
pub(crate) const CURRENT_SCHEMA_VERSION: i64 = 2;

/// SQLite-backed workflow repository.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime. A single connection behind a mutex
/// serializes all access, so every `commit` transaction sees a stable view.
pub struct SqliteRepository {
    /// Exposed as `pub(crate)` so tests can corrupt rows directly.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` so committed decisions survive power loss
    /// - `busy_timeout = 5000ms`; a lock held longer than that surfaces as
    ///   `RepositoryError::Unavailable` and is retried by the engine
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;

                    // Student records and payment data live here.
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let dir_permissions = std::fs::Permissions::from_mode(0o700);
                        if let Err(e) = std::fs::set_permissions(parent, dir_permissions) {
                            warn!(
                                "Failed to set restrictive permissions on state directory: {}",
                                e
                            );
                        }
                    }
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory && !path_str.is_empty() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!(
                    "Failed to set restrictive permissions on database file: {}",
                    e
                );
            }
        }

        // SQLite silently keeps DELETE mode on filesystems without shared
        // memory support, so check what we actually got. In-memory databases
        // report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));

        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "Failed to enable WAL mode: SQLite returned '{}' instead of 'wal'. \
                     Place the state directory on a local filesystem.",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        // 0 means a fresh database.
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Version 1: funds, rules, requests and the records committed with them.
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS funds (
                    id TEXT PRIMARY KEY,
                    organization_id TEXT NOT NULL,
                    data TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS routing_rules (
                    id TEXT PRIMARY KEY,
                    fund_id TEXT NOT NULL REFERENCES funds(id),
                    step_order INTEGER NOT NULL,
                    data TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_rules_fund
                    ON routing_rules(fund_id, step_order, created_at);

                CREATE TABLE IF NOT EXISTS fund_requests (
                    id TEXT PRIMARY KEY,
                    fund_id TEXT NOT NULL REFERENCES funds(id),
                    status TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    data TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_requests_fund
                    ON fund_requests(fund_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_requests_status
                    ON fund_requests(status);

                CREATE TABLE IF NOT EXISTS reviews (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    request_id TEXT NOT NULL REFERENCES fund_requests(id),
                    data TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_reviews_request
                    ON reviews(request_id, seq);

                CREATE TABLE IF NOT EXISTS disbursements (
                    id TEXT PRIMARY KEY,
                    request_id TEXT NOT NULL UNIQUE REFERENCES fund_requests(id),
                    fund_id TEXT NOT NULL REFERENCES funds(id),
                    data TEXT NOT NULL,
                    paid_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_disbursements_fund
                    ON disbursements(fund_id, paid_at);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Version 2: audit log and notification outbox. Neither references
        // other tables; they are written after the commit they describe.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS audit_log (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    entity_id TEXT NOT NULL,
                    action TEXT NOT NULL,
                    data TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_audit_entity
                    ON audit_log(entity_id, seq);

                CREATE TABLE IF NOT EXISTS notifications (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    request_id TEXT NOT NULL,
                    template TEXT NOT NULL,
                    data TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    delivered_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_notifications_request
                    ON notifications(request_id, seq);
                CREATE INDEX IF NOT EXISTS idx_notifications_undelivered
                    ON notifications(delivered_at) WHERE delivered_at IS NULL;
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v2", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run `f` against the connection on the blocking pool.
    pub(super) async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

// =============================================================================
// Conversion helpers
// =============================================================================

/// Map a rusqlite error, treating lock contention as transient.
pub(super) fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> RepositoryError {
    move |e| match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            RepositoryError::unavailable(operation, e.to_string())
        }
        _ => RepositoryError::storage(operation, e.to_string()),
    }
}

pub(super) fn to_json<T: Serialize>(
    value: &T,
    operation: &'static str,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::storage(operation, e.to_string()))
}

pub(super) fn from_json<T: DeserializeOwned>(
    json: &str,
    what: &'static str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(json).map_err(|_| RepositoryError::corruption(what))
}

pub(super) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Collect the `data` column of every row `sql` returns.
fn query_data<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    operation: &'static str,
    what: &'static str,
) -> Result<Vec<T>, RepositoryError> {
    let mut stmt = conn.prepare(sql).map_err(sql_error(operation))?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(sql_error(operation))?;
    let mut items = Vec::new();
    for row in rows {
        let json = row.map_err(sql_error(operation))?;
        items.push(from_json(&json, what)?);
    }
    Ok(items)
}

fn get_data<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    operation: &'static str,
    what: &'static str,
) -> Result<Option<T>, RepositoryError> {
    let json: Option<String> = conn
        .query_row(sql, params, |row| row.get(0))
        .optional()
        .map_err(sql_error(operation))?;
    json.map(|j| from_json(&j, what)).transpose()
}

fn write_fund(tx: &Transaction<'_>, fund: &Fund) -> Result<(), RepositoryError> {
    tx.execute(
        "UPDATE funds SET data = ?2 WHERE id = ?1",
        params![fund.id.to_string(), to_json(fund, "serialize fund")?],
    )
    .map_err(sql_error("update fund"))?;
    Ok(())
}

fn write_request(
    tx: &Transaction<'_>,
    request: &FundRequest,
    expected_version: Option<u64>,
) -> Result<usize, RepositoryError> {
    let data = to_json(request, "serialize request")?;
    let version = i64::try_from(request.version)
        .map_err(|_| RepositoryError::storage("write request", "version out of range"))?;
    match expected_version {
        None => tx
            .execute(
                "INSERT INTO fund_requests (id, fund_id, status, version, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    request.id.to_string(),
                    request.fund_id.to_string(),
                    request.status.as_str(),
                    version,
                    data,
                    millis(request.created_at)
                ],
            )
            .map_err(sql_error("insert request")),
        Some(expected) => {
            let expected = i64::try_from(expected)
                .map_err(|_| RepositoryError::storage("write request", "version out of range"))?;
            tx.execute(
                "UPDATE fund_requests SET status = ?2, version = ?3, data = ?4
                 WHERE id = ?1 AND version = ?5",
                params![
                    request.id.to_string(),
                    request.status.as_str(),
                    version,
                    data,
                    expected
                ],
            )
            .map_err(sql_error("update request"))
        }
    }
}

fn apply_commit(conn: &mut Connection, unit: CommitUnit) -> Result<(), RepositoryError> {
    let tx = conn.transaction().map_err(sql_error("begin commit"))?;
    let request_id = unit.request.id;
    let request_key = request_id.to_string();

    let current: Option<FundRequest> = get_data(
        &tx,
        "SELECT data FROM fund_requests WHERE id = ?1",
        params![request_key],
        "commit",
        "request JSON",
    )?;
    match (&current, unit.expected_version) {
        // Replay of a commit that already went through.
        (Some(current), _) if *current == unit.request => return Ok(()),
        (Some(_), None) => return Err(RepositoryError::duplicate("request", request_id)),
        (Some(current), Some(expected)) if current.version != expected => {
            return Err(RepositoryError::Conflict {
                request_id,
                expected,
                found: current.version,
            })
        }
        (None, Some(_)) => return Err(RepositoryError::not_found("request", request_id)),
        _ => {}
    }

    // The request row goes first so that review and disbursement rows can
    // reference it.
    let written = write_request(&tx, &unit.request, unit.expected_version)?;
    if written != 1 {
        return Err(RepositoryError::Conflict {
            request_id,
            expected: unit.expected_version.unwrap_or_default(),
            found: current.map(|c| c.version).unwrap_or_default(),
        });
    }

    for review in &unit.new_reviews {
        tx.execute(
            "INSERT OR IGNORE INTO reviews (id, request_id, data) VALUES (?1, ?2, ?3)",
            params![
                review.id.to_string(),
                request_key,
                to_json(review, "serialize review")?
            ],
        )
        .map_err(sql_error("insert review"))?;
    }

    for resolution in &unit.resolutions {
        let mut review: Review = get_data(
            &tx,
            "SELECT data FROM reviews WHERE id = ?1 AND request_id = ?2",
            params![resolution.review_id.to_string(), request_key],
            "resolve review",
            "review JSON",
        )?
        .ok_or_else(|| RepositoryError::not_found("review", resolution.review_id))?;
        resolution.apply_to(&mut review);
        tx.execute(
            "UPDATE reviews SET data = ?2 WHERE id = ?1",
            params![review.id.to_string(), to_json(&review, "serialize review")?],
        )
        .map_err(sql_error("resolve review"))?;
    }

    if let Some(disbursement) = &unit.disbursement {
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM disbursements WHERE request_id = ?1",
                params![disbursement.request_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error("check disbursement"))?;
        match existing {
            Some(id) if id == disbursement.id.to_string() => {}
            Some(_) => {
                return Err(RepositoryError::duplicate(
                    "disbursement for request",
                    disbursement.request_id,
                ))
            }
            None => {
                tx.execute(
                    "INSERT INTO disbursements (id, request_id, fund_id, data, paid_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        disbursement.id.to_string(),
                        disbursement.request_id.to_string(),
                        disbursement.fund_id.to_string(),
                        to_json(disbursement, "serialize disbursement")?,
                        millis(disbursement.paid_at)
                    ],
                )
                .map_err(sql_error("insert disbursement"))?;
            }
        }
    }

    if let Some((fund_id, amount)) = unit.fund_debit {
        let mut fund: Fund = get_data(
            &tx,
            "SELECT data FROM funds WHERE id = ?1",
            params![fund_id.to_string()],
            "debit fund",
            "fund JSON",
        )?
        .ok_or_else(|| RepositoryError::not_found("fund", fund_id))?;
        fund.remaining_budget -= amount;
        write_fund(&tx, &fund)?;
    }

    // Dropping the transaction without commit rolls every write back.
    tx.commit().map_err(sql_error("commit"))?;
    Ok(())
}

// =============================================================================
// WorkflowRepository trait implementation
// =============================================================================

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn insert_fund(&self, fund: &Fund) -> Result<(), RepositoryError> {
        let id = fund.id;
        let organization_id = fund.organization_id.to_string();
        let data = to_json(fund, "serialize fund")?;
        let created_at = millis(fund.created_at);

        self.run("insert fund", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO funds (id, organization_id, data, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id.to_string(), organization_id, data, created_at],
                )
                .map_err(sql_error("insert fund"))?;
            if inserted == 0 {
                return Err(RepositoryError::duplicate("fund", id));
            }
            Ok(())
        })
        .await
    }

    async fn get_fund(&self, id: FundId) -> Result<Option<Fund>, RepositoryError> {
        self.run("get fund", move |conn| {
            get_data(
                conn,
                "SELECT data FROM funds WHERE id = ?1",
                params![id.to_string()],
                "get fund",
                "fund JSON",
            )
        })
        .await
    }

    async fn list_funds(&self) -> Result<Vec<Fund>, RepositoryError> {
        self.run("list funds", |conn| {
            query_data(
                conn,
                "SELECT data FROM funds ORDER BY created_at, id",
                [],
                "list funds",
                "fund JSON",
            )
        })
        .await
    }

    async fn set_fund_balance(
        &self,
        id: FundId,
        remaining: Decimal,
    ) -> Result<(), RepositoryError> {
        self.run("set fund balance", move |conn| {
            let tx = conn.transaction().map_err(sql_error("set fund balance"))?;
            let mut fund: Fund = get_data(
                &tx,
                "SELECT data FROM funds WHERE id = ?1",
                params![id.to_string()],
                "set fund balance",
                "fund JSON",
            )?
            .ok_or_else(|| RepositoryError::not_found("fund", id))?;
            fund.remaining_budget = remaining;
            write_fund(&tx, &fund)?;
            tx.commit().map_err(sql_error("set fund balance"))
        })
        .await
    }

    async fn list_rules(&self, fund_id: FundId) -> Result<Vec<RoutingRule>, RepositoryError> {
        self.run("list rules", move |conn| {
            query_data(
                conn,
                "SELECT data FROM routing_rules WHERE fund_id = ?1
                 ORDER BY step_order, created_at",
                params![fund_id.to_string()],
                "list rules",
                "rule JSON",
            )
        })
        .await
    }

    async fn get_rule(&self, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError> {
        self.run("get rule", move |conn| {
            get_data(
                conn,
                "SELECT data FROM routing_rules WHERE id = ?1",
                params![id.to_string()],
                "get rule",
                "rule JSON",
            )
        })
        .await
    }

    async fn put_rule(&self, rule: &RoutingRule) -> Result<(), RepositoryError> {
        let id = rule.id.to_string();
        let fund_id = rule.fund_id.to_string();
        let step_order = i64::from(rule.step_order);
        let data = to_json(rule, "serialize rule")?;
        let created_at = millis(rule.created_at);

        self.run("put rule", move |conn| {
            conn.execute(
                "INSERT INTO routing_rules (id, fund_id, step_order, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     fund_id = excluded.fund_id,
                     step_order = excluded.step_order,
                     data = excluded.data",
                params![id, fund_id, step_order, data, created_at],
            )
            .map_err(sql_error("put rule"))?;
            Ok(())
        })
        .await
    }

    async fn delete_rule(&self, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError> {
        self.run("delete rule", move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "DELETE FROM routing_rules WHERE id = ?1 RETURNING data",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_error("delete rule"))?;
            json.map(|j| from_json(&j, "rule JSON")).transpose()
        })
        .await
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<FundRequest>, RepositoryError> {
        self.run("get request", move |conn| {
            get_data(
                conn,
                "SELECT data FROM fund_requests WHERE id = ?1",
                params![id.to_string()],
                "get request",
                "request JSON",
            )
        })
        .await
    }

    async fn list_requests_for_fund(
        &self,
        fund_id: FundId,
    ) -> Result<Vec<FundRequest>, RepositoryError> {
        self.run("list requests", move |conn| {
            query_data(
                conn,
                "SELECT data FROM fund_requests WHERE fund_id = ?1 ORDER BY created_at, id",
                params![fund_id.to_string()],
                "list requests",
                "request JSON",
            )
        })
        .await
    }

    async fn list_requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<FundRequest>, RepositoryError> {
        let wanted: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        self.run("list requests by status", move |conn| {
            if wanted.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; wanted.len()].join(", ");
            let sql = format!(
                "SELECT data FROM fund_requests WHERE status IN ({}) ORDER BY created_at, id",
                placeholders
            );
            query_data(
                conn,
                &sql,
                rusqlite::params_from_iter(wanted.iter()),
                "list requests by status",
                "request JSON",
            )
        })
        .await
    }

    async fn list_reviews(&self, request_id: RequestId) -> Result<Vec<Review>, RepositoryError> {
        self.run("list reviews", move |conn| {
            query_data(
                conn,
                "SELECT data FROM reviews WHERE request_id = ?1 ORDER BY seq",
                params![request_id.to_string()],
                "list reviews",
                "review JSON",
            )
        })
        .await
    }

    async fn list_disbursements_for_fund(
        &self,
        fund_id: FundId,
    ) -> Result<Vec<Disbursement>, RepositoryError> {
        self.run("list disbursements", move |conn| {
            query_data(
                conn,
                "SELECT data FROM disbursements WHERE fund_id = ?1 ORDER BY paid_at, id",
                params![fund_id.to_string()],
                "list disbursements",
                "disbursement JSON",
            )
        })
        .await
    }

    async fn get_disbursement_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<Disbursement>, RepositoryError> {
        self.run("get disbursement", move |conn| {
            get_data(
                conn,
                "SELECT data FROM disbursements WHERE request_id = ?1",
                params![request_id.to_string()],
                "get disbursement",
                "disbursement JSON",
            )
        })
        .await
    }

    async fn commit(&self, unit: CommitUnit) -> Result<(), RepositoryError> {
        self.run("commit", move |conn| apply_commit(conn, unit)).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<bool, RepositoryError> {
        self.append_audit_impl(entry).await
    }

    async fn list_audit(&self, entity_id: &str) -> Result<Vec<AuditEntry>, RepositoryError> {
        self.list_audit_impl(entity_id).await
    }

    async fn enqueue_notification(
        &self,
        notification: &NotificationRequest,
    ) -> Result<bool, RepositoryError> {
        self.enqueue_notification_impl(notification).await
    }

    async fn list_notifications(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRequest>, RepositoryError> {
        self.list_notifications_impl(request_id).await
    }
}
