//! Effect interpreter that applies transition results to the repository.
//!
//! The interpreter is the boundary between the pure state machine and the
//! store. Store effects are folded into one [`CommitUnit`] and committed
//! atomically. Audit entries and notifications are written afterwards; a
//! failure there is logged and counted but never undoes the commit. Log
//! effects are emitted last.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::effect::{Effect, LogLevel};
use super::repository::{CommitUnit, RepositoryError, WorkflowRepository};
use super::transition::TransitionResult;

/// Retry policy for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreRetry {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the n-th retry is `n * backoff`.
    pub backoff: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Operator-visible counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    commits: AtomicU64,
    conflicts_retried: AtomicU64,
    store_retries: AtomicU64,
    audit_failures: AtomicU64,
    notification_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub commits: u64,
    pub conflicts_retried: u64,
    pub store_retries: u64,
    /// Audit entries that could not be written. Each one is a gap in the trail.
    pub audit_failures: u64,
    pub notification_failures: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            store_retries: self.store_retries.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_conflict_retry(&self) {
        self.conflicts_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_audit_failure(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_store_retry<T, F, Fut>(
    retry: StoreRetry,
    stats: &EngineStats,
    operation: &str,
    mut op: F,
) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RepositoryError>>,
{
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "Transient store failure during {} (attempt {}/{}): {}",
                    operation, attempt, attempts, e
                );
                stats.store_retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(retry.backoff * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Effects of one transition, split by how they are applied.
struct Partitioned {
    unit: CommitUnit,
    audits: Vec<fundflow_core::AuditEntry>,
    notifications: Vec<fundflow_core::NotificationRequest>,
    logs: Vec<(LogLevel, String)>,
}

fn partition(result: TransitionResult, expected_version: Option<u64>) -> Partitioned {
    let mut unit = match expected_version {
        Some(expected) => CommitUnit::update(result.request, expected),
        None => CommitUnit::insert(result.request),
    };
    let mut audits = Vec::new();
    let mut notifications = Vec::new();
    let mut logs = Vec::new();

    for effect in result.effects {
        match effect {
            Effect::CreateReview(review) => unit.new_reviews.push(review),
            Effect::ResolveReview(resolution) => unit.resolutions.push(resolution),
            Effect::CreateDisbursement(disbursement) => unit.disbursement = Some(disbursement),
            Effect::DebitFund { fund_id, amount } => {
                let total = unit
                    .fund_debit
                    .map(|(_, existing)| existing + amount)
                    .unwrap_or(amount);
                unit.fund_debit = Some((fund_id, total));
            }
            Effect::Audit(entry) => audits.push(entry),
            Effect::Notify(notification) => notifications.push(notification),
            Effect::Log { level, message } => logs.push((level, message)),
        }
    }

    Partitioned {
        unit,
        audits,
        notifications,
        logs,
    }
}

/// Apply a transition result to the repository.
///
/// `expected_version` is the version the stored request must still have;
/// `None` inserts a new request. Only the commit can fail this call.
///
/// A commit that lands but reports `Unavailable` is retried as a replay. The
/// store sees the identical request already in place and reports success, so
/// the caller never sees a `Conflict` for its own write.
pub async fn apply_transition(
    repo: &dyn WorkflowRepository,
    retry: StoreRetry,
    stats: &EngineStats,
    result: TransitionResult,
    expected_version: Option<u64>,
) -> Result<(), RepositoryError> {
    let request_number = result.request.request_number.clone();
    let Partitioned {
        unit,
        audits,
        notifications,
        logs,
    } = partition(result, expected_version);

    with_store_retry(retry, stats, "commit", || repo.commit(unit.clone())).await?;
    stats.commits.fetch_add(1, Ordering::Relaxed);

    for entry in audits {
        let written =
            with_store_retry(retry, stats, "append audit", || repo.append_audit(&entry)).await;
        match written {
            Ok(true) => {}
            Ok(false) => debug!("Audit entry {} already recorded", entry.id),
            Err(e) => {
                stats.record_audit_failure();
                error!(
                    "Audit write failed for {} on {} {}: {}",
                    entry.action,
                    entry.entity_type.as_str(),
                    entry.entity_id,
                    e
                );
            }
        }
    }

    for notification in notifications {
        let queued = with_store_retry(retry, stats, "enqueue notification", || {
            repo.enqueue_notification(&notification)
        })
        .await;
        if let Err(e) = queued {
            stats.notification_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                "Failed to queue {} notification for {}: {}",
                notification.template.as_str(),
                request_number,
                e
            );
        }
    }

    for (level, message) in logs {
        match level {
            LogLevel::Debug => debug!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::repository::InMemoryRepository;
    use crate::state_machine::transition::fixtures::*;
    use crate::state_machine::RequestSnapshot;
    use fundflow_core::{BudgetEnforcement, Decision, RequestStatus};
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_partition_sums_debits_and_keeps_order() {
        let f = fund(BudgetEnforcement::None);
        let (snapshot, ctx) = submitted(&f, vec![], 100);
        let review = actionable(&snapshot);
        let (_, result) = step(&snapshot, &ctx, admin(), decide(&review, Decision::Approved));

        let audits_in_result = result
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::Audit(_)))
            .count();
        let parts = partition(result, Some(snapshot.request.version));
        assert_eq!(parts.unit.expected_version, Some(snapshot.request.version));
        assert_eq!(parts.unit.resolutions.len(), 1);
        assert_eq!(parts.audits.len(), audits_in_result);
        assert_eq!(parts.unit.request.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let stats = EngineStats::default();
        let calls = AtomicU32::new(0);
        let retry = StoreRetry {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let result = with_store_retry(retry, &stats, "probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RepositoryError::unavailable("probe", "busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(stats.snapshot().store_retries, 2);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let stats = EngineStats::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_store_retry(StoreRetry::default(), &stats, "probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RepositoryError::storage("probe", "disk full")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply_writes_commit_then_audit() {
        let repo = InMemoryRepository::new();
        let stats = EngineStats::default();
        let f = fund(BudgetEnforcement::None);
        repo.insert_fund(&f).await.unwrap();

        let draft = draft(&f, 100);
        repo.commit(CommitUnit::insert(draft.clone())).await.unwrap();
        let (snapshot, _) = submitted(&f, vec![], 100);
        let result = TransitionResult {
            request: snapshot.request.clone(),
            effects: snapshot
                .reviews
                .iter()
                .cloned()
                .map(Effect::CreateReview)
                .collect(),
        };
        apply_transition(&repo, StoreRetry::default(), &stats, result, Some(0))
            .await
            .unwrap();

        let stored = RequestSnapshot::new(
            repo.get_request(draft.id).await.unwrap().unwrap(),
            repo.list_reviews(draft.id).await.unwrap(),
        );
        assert_eq!(stored, snapshot);
        assert_eq!(stats.snapshot().commits, 1);
    }

    #[tokio::test]
    async fn test_commit_lost_in_transit_replays_as_success() {
        let repo = InMemoryRepository::new();
        let stats = EngineStats::default();
        let f = fund(BudgetEnforcement::None);
        repo.insert_fund(&f).await.unwrap();

        let draft = draft(&f, 100);
        repo.commit(CommitUnit::insert(draft.clone())).await.unwrap();
        let (snapshot, _) = submitted(&f, vec![], 100);
        let mut unit = CommitUnit::update(snapshot.request.clone(), 0);
        unit.new_reviews = snapshot.reviews.clone();

        // The first attempt is written, but its reply never arrives.
        let calls = AtomicU32::new(0);
        let retry = StoreRetry {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let result = with_store_retry(retry, &stats, "commit", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let unit = unit.clone();
            let repo = &repo;
            async move {
                repo.commit(unit).await?;
                if n == 0 {
                    Err(RepositoryError::unavailable("commit", "reply timed out"))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            repo.list_reviews(draft.id).await.unwrap().len(),
            snapshot.reviews.len()
        );
        assert_eq!(
            repo.get_request(draft.id).await.unwrap(),
            Some(snapshot.request)
        );
    }
}
