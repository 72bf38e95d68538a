//! Repository abstraction for workflow persistence.
//!
//! This module defines the `WorkflowRepository` trait that abstracts storage
//! for funds, routing rules, requests and the records hanging off them.
//! Implementations provide different backends (in-memory, SQLite).
//!
//! Everything a transition changes about a request is written through a
//! single [`CommitUnit`], which implementations apply atomically and guard
//! with a compare-and-swap on the request version. Audit and notification
//! writes are separate, insert-if-absent calls.

mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use rust_decimal::Decimal;

use fundflow_core::{
    AuditEntry, Disbursement, Fund, FundId, FundRequest, NotificationRequest, RequestId,
    RequestStatus, Review, RoutingRule, RuleId,
};

use super::effect::ReviewResolution;

/// Errors from a repository backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The request changed since it was read.
    #[error("request {request_id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        request_id: RequestId,
        expected: u64,
        found: u64,
    },

    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },

    /// Transient failure; the operation may be retried.
    #[error("store unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {0} in store")]
    Corruption(&'static str),
}

impl RepositoryError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        Self::Corruption(what)
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, id: impl ToString) -> Self {
        Self::Duplicate {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// All store writes of one transition, applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitUnit {
    /// The request as it must be stored.
    pub request: FundRequest,
    /// Version the stored request must still have; `None` inserts a new request.
    pub expected_version: Option<u64>,
    /// Reviews to insert. Ids already present are skipped.
    pub new_reviews: Vec<Review>,
    /// Decisions to record on pending reviews.
    pub resolutions: Vec<ReviewResolution>,
    pub disbursement: Option<Disbursement>,
    /// Amount to subtract from the fund's stored remaining balance.
    pub fund_debit: Option<(FundId, Decimal)>,
}

impl CommitUnit {
    /// A unit that only inserts a freshly created request.
    pub fn insert(request: FundRequest) -> Self {
        Self {
            request,
            expected_version: None,
            new_reviews: Vec::new(),
            resolutions: Vec::new(),
            disbursement: None,
            fund_debit: None,
        }
    }

    /// A unit that updates `request`, which must currently be at `expected`.
    pub fn update(request: FundRequest, expected: u64) -> Self {
        Self {
            expected_version: Some(expected),
            ..Self::insert(request)
        }
    }
}

/// Repository trait for workflow persistence (the entity store adapter).
///
/// Implementations must make `commit` all-or-nothing, and must treat a
/// replay of an already applied commit (same request, same resulting
/// version) as success so that callers can retry after a transient error.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    // Funds

    /// Insert a new fund. Fails with `Duplicate` if the id is taken.
    async fn insert_fund(&self, fund: &Fund) -> Result<(), RepositoryError>;

    async fn get_fund(&self, id: FundId) -> Result<Option<Fund>, RepositoryError>;

    async fn list_funds(&self) -> Result<Vec<Fund>, RepositoryError>;

    /// Overwrite the fund's stored remaining balance.
    ///
    /// Reserved for reconciliation; regular debits go through `commit`.
    async fn set_fund_balance(&self, id: FundId, remaining: Decimal)
        -> Result<(), RepositoryError>;

    // Routing rules

    async fn list_rules(&self, fund_id: FundId) -> Result<Vec<RoutingRule>, RepositoryError>;

    async fn get_rule(&self, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError>;

    /// Insert or replace a rule.
    async fn put_rule(&self, rule: &RoutingRule) -> Result<(), RepositoryError>;

    async fn delete_rule(&self, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError>;

    // Requests and their records

    async fn get_request(&self, id: RequestId) -> Result<Option<FundRequest>, RepositoryError>;

    async fn list_requests_for_fund(
        &self,
        fund_id: FundId,
    ) -> Result<Vec<FundRequest>, RepositoryError>;

    async fn list_requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<FundRequest>, RepositoryError>;

    /// Reviews of a request in creation order.
    async fn list_reviews(&self, request_id: RequestId) -> Result<Vec<Review>, RepositoryError>;

    async fn list_disbursements_for_fund(
        &self,
        fund_id: FundId,
    ) -> Result<Vec<Disbursement>, RepositoryError>;

    async fn get_disbursement_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<Disbursement>, RepositoryError>;

    /// Apply a transition's store writes atomically.
    async fn commit(&self, unit: CommitUnit) -> Result<(), RepositoryError>;

    // Audit log and notification outbox

    /// Append an audit entry. Returns `false` if an entry with the same id
    /// was already recorded.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<bool, RepositoryError>;

    /// Audit entries for one entity, oldest first.
    async fn list_audit(&self, entity_id: &str) -> Result<Vec<AuditEntry>, RepositoryError>;

    /// Queue a notification. Returns `false` if it was already queued.
    async fn enqueue_notification(
        &self,
        notification: &NotificationRequest,
    ) -> Result<bool, RepositoryError>;

    async fn list_notifications(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRequest>, RepositoryError>;
}
