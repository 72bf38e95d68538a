//! Tests for SQLite repository implementation.

use chrono::Duration;
use rusqlite::params;
use rust_decimal::Decimal;
use serde_json::json;

use fundflow_core::{
    Actor, AuditAction, AuditEntry, AuditId, BudgetEnforcement, Decision, Disbursement,
    DisbursementId, EntityType, NotificationId, NotificationRequest, PaymentMethod, Recipient,
    RequestStatus, ReviewId, TemplateKey, UserId,
};

use super::{SqliteRepository, CURRENT_SCHEMA_VERSION};
use crate::state_machine::effect::ReviewResolution;
use crate::state_machine::repository::{CommitUnit, RepositoryError, WorkflowRepository};
use crate::state_machine::transition::fixtures::{draft, fund, now, rule, submitted, users};

use proptest::prelude::*;

fn disbursement(request: &fundflow_core::FundRequest, amount: i64) -> Disbursement {
    Disbursement {
        id: DisbursementId::derived(request.id.as_uuid(), "disbursement"),
        request_id: request.id,
        fund_id: request.fund_id,
        amount: Decimal::from(amount),
        method: PaymentMethod::DirectDeposit,
        paid_at: now(),
        paid_by: UserId::from("mgr"),
        notes: None,
        receipt_url: None,
    }
}

fn audit(entity_id: &str, n: u64) -> AuditEntry {
    let actor = Actor::new("adm", "Ada Admin", "ada@example.edu", []);
    AuditEntry::new(
        AuditId::derived(uuid::Uuid::nil(), &format!("audit-{n}")),
        &actor,
        AuditAction::RequestCreated,
        EntityType::FundRequest,
        entity_id,
        json!({ "n": n }),
        now() + Duration::seconds(n as i64),
    )
}

#[tokio::test]
async fn test_get_returns_none_for_missing() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    assert!(repo.get_fund(f.id).await.unwrap().is_none());
    assert!(repo.get_request(draft(&f, 10).id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_insert_fund_twice_is_duplicate() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let err = repo.insert_fund(&f).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Duplicate { entity: "fund", .. }));
    assert_eq!(repo.list_funds().await.unwrap(), vec![f]);
}

#[tokio::test]
async fn test_rules_are_listed_in_step_order() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();

    let dean = rule(&f, 2, "Dean", users(&["d1"]));
    let advisor = rule(&f, 1, "Advisor", users(&["a1"]));
    repo.put_rule(&dean).await.unwrap();
    repo.put_rule(&advisor).await.unwrap();

    let names: Vec<_> = repo
        .list_rules(f.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.step_name)
        .collect();
    assert_eq!(names, vec!["Advisor", "Dean"]);

    // Upsert keeps a single row.
    let mut moved = dean.clone();
    moved.step_order = 0;
    repo.put_rule(&moved).await.unwrap();
    let rules = repo.list_rules(f.id).await.unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].step_name, "Dean");

    assert_eq!(repo.delete_rule(dean.id).await.unwrap(), Some(moved));
    assert_eq!(repo.delete_rule(dean.id).await.unwrap(), None);
    assert!(repo.get_rule(dean.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_commit_is_compare_and_swap() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let mut r = draft(&f, 120);
    repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

    let err = repo.commit(CommitUnit::insert(r.clone())).await;
    // Same content is a replay, not a duplicate.
    assert!(err.is_ok());

    let mut other = r.clone();
    other.justification = "different".to_string();
    assert!(matches!(
        repo.commit(CommitUnit::insert(other)).await,
        Err(RepositoryError::Duplicate { .. })
    ));

    r.version = 1;
    repo.commit(CommitUnit::update(r.clone(), 0)).await.unwrap();

    let mut stale = r.clone();
    stale.version = 2;
    stale.justification = "changed".to_string();
    let err = repo.commit(CommitUnit::update(stale, 0)).await.unwrap_err();
    assert_eq!(
        err,
        RepositoryError::Conflict {
            request_id: r.id,
            expected: 0,
            found: 1
        }
    );
}

#[tokio::test]
async fn test_update_of_missing_request_is_not_found() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let r = draft(&f, 10);
    let err = repo.commit(CommitUnit::update(r, 0)).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { entity: "request", .. }));
}

#[tokio::test]
async fn test_commit_writes_reviews_and_resolutions() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let (snapshot, _) = submitted(&f, vec![], 100);
    let base = draft(&f, 100);
    repo.commit(CommitUnit::insert(base)).await.unwrap();

    let mut unit = CommitUnit::update(snapshot.request.clone(), 0);
    unit.new_reviews = snapshot.reviews.clone();
    repo.commit(unit.clone()).await.unwrap();
    // Replaying the same unit writes nothing new.
    repo.commit(unit).await.unwrap();

    let stored = repo.list_reviews(snapshot.request.id).await.unwrap();
    assert_eq!(stored, snapshot.reviews);

    let mut approved = snapshot.request.clone();
    approved.version += 1;
    approved.status = RequestStatus::Approved;
    let mut unit = CommitUnit::update(approved, snapshot.request.version);
    unit.resolutions.push(ReviewResolution {
        review_id: stored[0].id,
        decision: Decision::Approved,
        comments: Some("fine".to_string()),
        decided_by: UserId::from("adm"),
        decided_by_name: "Ada Admin".to_string(),
        decided_at: now(),
    });
    repo.commit(unit).await.unwrap();

    let review = &repo.list_reviews(snapshot.request.id).await.unwrap()[0];
    assert_eq!(review.decision, Decision::Approved);
    assert_eq!(review.comments.as_deref(), Some("fine"));
    assert_eq!(review.decided_by, Some(UserId::from("adm")));
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let r = draft(&f, 120);
    repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

    let mut next = r.clone();
    next.version = 1;
    next.status = RequestStatus::Paid;
    let mut unit = CommitUnit::update(next, 0);
    unit.disbursement = Some(disbursement(&r, 120));
    unit.resolutions.push(ReviewResolution {
        review_id: ReviewId::new(),
        decision: Decision::Approved,
        comments: None,
        decided_by: UserId::from("r1"),
        decided_by_name: "R1".to_string(),
        decided_at: now(),
    });
    unit.fund_debit = Some((f.id, Decimal::from(120)));
    assert!(matches!(
        repo.commit(unit).await,
        Err(RepositoryError::NotFound { entity: "review", .. })
    ));

    let stored = repo.get_request(r.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Draft);
    assert_eq!(stored.version, 0);
    assert!(repo.get_disbursement_for_request(r.id).await.unwrap().is_none());
    let stored_fund = repo.get_fund(f.id).await.unwrap().unwrap();
    assert_eq!(stored_fund.remaining_budget, Decimal::from(1000));
}

#[tokio::test]
async fn test_disbursement_debits_fund_once() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let r = draft(&f, 250);
    repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

    let mut paid = r.clone();
    paid.version = 1;
    paid.status = RequestStatus::Paid;
    let mut unit = CommitUnit::update(paid.clone(), 0);
    unit.disbursement = Some(disbursement(&r, 250));
    unit.fund_debit = Some((f.id, Decimal::from(250)));
    repo.commit(unit).await.unwrap();

    let mut again = paid.clone();
    again.version = 2;
    let mut unit = CommitUnit::update(again, 1);
    let mut second = disbursement(&r, 250);
    second.id = DisbursementId::new();
    unit.disbursement = Some(second);
    unit.fund_debit = Some((f.id, Decimal::from(250)));
    assert!(matches!(
        repo.commit(unit).await,
        Err(RepositoryError::Duplicate { .. })
    ));

    let stored_fund = repo.get_fund(f.id).await.unwrap().unwrap();
    assert_eq!(stored_fund.remaining_budget, Decimal::from(750));
    assert_eq!(repo.list_disbursements_for_fund(f.id).await.unwrap().len(), 1);
    assert_eq!(
        repo.get_disbursement_for_request(r.id).await.unwrap(),
        Some(disbursement(&r, 250))
    );
}

#[tokio::test]
async fn test_list_requests_by_status() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let a = draft(&f, 10);
    let mut b = draft(&f, 20);
    b.status = RequestStatus::InReview;
    repo.commit(CommitUnit::insert(a.clone())).await.unwrap();
    repo.commit(CommitUnit::insert(b.clone())).await.unwrap();

    let found = repo
        .list_requests_with_status(&[RequestStatus::InReview, RequestStatus::Submitted])
        .await
        .unwrap();
    assert_eq!(found, vec![b]);
    assert!(repo.list_requests_with_status(&[]).await.unwrap().is_empty());
    assert_eq!(repo.list_requests_for_fund(f.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_audit_log_is_append_only_and_ordered() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    assert!(repo.append_audit(&audit("req-1", 2)).await.unwrap());
    assert!(repo.append_audit(&audit("req-1", 1)).await.unwrap());
    assert!(repo.append_audit(&audit("req-2", 3)).await.unwrap());
    assert!(!repo.append_audit(&audit("req-1", 2)).await.unwrap());

    let trail = repo.list_audit("req-1").await.unwrap();
    let ns: Vec<_> = trail.iter().map(|e| e.details["n"].clone()).collect();
    // Insertion order, not timestamp order.
    assert_eq!(ns, vec![json!(2), json!(1)]);
}

#[tokio::test]
async fn test_notifications_are_queued_once() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    let r = draft(&f, 10);
    let notification = NotificationRequest {
        id: NotificationId::derived(r.id.as_uuid(), "notify-1-0"),
        request_id: r.id,
        recipient: Recipient::StaffQueue,
        template: TemplateKey::ReviewAssigned,
        context: json!({ "request_number": r.request_number }),
        created_at: now(),
    };
    assert!(repo.enqueue_notification(&notification).await.unwrap());
    assert!(!repo.enqueue_notification(&notification).await.unwrap());
    assert_eq!(
        repo.list_notifications(r.id).await.unwrap(),
        vec![notification]
    );
}

// =========================================================================
// On-disk persistence tests
// =========================================================================

/// Committed requests, reviews and fund balances survive a reopen.
#[tokio::test]
async fn test_on_disk_persistence_basic() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let f = fund(BudgetEnforcement::Warn);
    let (snapshot, _) = submitted(&f, vec![], 100);

    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        repo.insert_fund(&f).await.unwrap();
        repo.commit(CommitUnit::insert(draft(&f, 100))).await.unwrap();
        let mut unit = CommitUnit::update(snapshot.request.clone(), 0);
        unit.new_reviews = snapshot.reviews.clone();
        repo.commit(unit).await.unwrap();
        repo.set_fund_balance(f.id, Decimal::new(87_550, 2))
            .await
            .unwrap();
        repo.append_audit(&audit(&snapshot.request.id.to_string(), 1))
            .await
            .unwrap();
    }

    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        let stored = repo.get_request(snapshot.request.id).await.unwrap();
        assert_eq!(stored.as_ref(), Some(&snapshot.request));
        assert_eq!(
            repo.list_reviews(snapshot.request.id).await.unwrap(),
            snapshot.reviews
        );
        let stored_fund = repo.get_fund(f.id).await.unwrap().unwrap();
        assert_eq!(stored_fund.remaining_budget, Decimal::new(87_550, 2));
        assert_eq!(
            repo.list_audit(&snapshot.request.id.to_string())
                .await
                .unwrap()
                .len(),
            1
        );
    }
}

#[tokio::test]
async fn test_creates_parent_directory() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("nested")
        .join("deeply")
        .join("test.db");

    assert!(!db_path.parent().unwrap().exists());

    let repo = SqliteRepository::new(&db_path).unwrap();
    repo.insert_fund(&fund(BudgetEnforcement::None))
        .await
        .unwrap();

    assert!(db_path.exists());
}

#[tokio::test]
async fn test_schema_version_persisted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");

    {
        let _repo = SqliteRepository::new(&db_path).unwrap();
    }

    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}

/// A v1 database gains the audit and notification tables without losing data.
#[tokio::test]
async fn test_v1_to_v2_migration_keeps_requests() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let f = fund(BudgetEnforcement::Block);
    let r = draft(&f, 40);

    {
        let repo = SqliteRepository::new(&db_path).unwrap();
        repo.insert_fund(&f).await.unwrap();
        repo.commit(CommitUnit::insert(r.clone())).await.unwrap();
    }

    // Roll the file back to what a v1 build would have left behind.
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            r#"
            DROP TABLE audit_log;
            DROP TABLE notifications;
            UPDATE schema_version SET version = 1 WHERE id = 1;
            "#,
        )
        .unwrap();
    }

    let repo = SqliteRepository::new(&db_path).unwrap();
    assert_eq!(repo.get_request(r.id).await.unwrap(), Some(r.clone()));
    assert!(repo
        .append_audit(&audit(&r.id.to_string(), 1))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_newer_schema_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    {
        let _repo = SqliteRepository::new(&db_path).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE schema_version SET version = ?1 WHERE id = 1",
            params![CURRENT_SCHEMA_VERSION + 1],
        )
        .unwrap();
    }
    assert!(matches!(
        SqliteRepository::new(&db_path),
        Err(RepositoryError::Storage { operation: "schema version", .. })
    ));
}

/// Rows that no longer parse are reported, not silently dropped.
#[tokio::test]
async fn test_corrupt_row_is_reported() {
    let repo = SqliteRepository::new_in_memory().unwrap();
    let f = fund(BudgetEnforcement::Block);
    repo.insert_fund(&f).await.unwrap();
    let r = draft(&f, 40);
    repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

    {
        let conn = repo.conn.lock().unwrap();
        conn.execute(
            "UPDATE fund_requests SET data = 'not valid json' WHERE id = ?1",
            params![r.id.to_string()],
        )
        .unwrap();
    }

    assert_eq!(
        repo.get_request(r.id).await.unwrap_err(),
        RepositoryError::Corruption("request JSON")
    );
    assert!(repo.list_requests_for_fund(f.id).await.is_err());
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let _repo = SqliteRepository::new(&db_path).unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(
        journal_mode.to_lowercase(),
        "wal",
        "Database should be in WAL mode"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_state_dir_has_restrictive_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempfile::tempdir().unwrap();
    let state_dir = temp_dir.path().join("state");
    let db_path = state_dir.join("test.db");

    let _repo = SqliteRepository::new(&db_path).unwrap();

    let dir_mode = std::fs::metadata(&state_dir).unwrap().permissions().mode() & 0o777;
    assert_eq!(dir_mode, 0o700, "got {:o}", dir_mode);
    let file_mode = std::fs::metadata(&db_path).unwrap().permissions().mode() & 0o777;
    assert_eq!(file_mode, 0o600, "got {:o}", file_mode);
}

// =========================================================================
// Property tests
// =========================================================================

fn arb_status() -> impl Strategy<Value = RequestStatus> {
    prop_oneof![
        Just(RequestStatus::Draft),
        Just(RequestStatus::Submitted),
        Just(RequestStatus::InReview),
        Just(RequestStatus::NeedsInfo),
        Just(RequestStatus::Approved),
        Just(RequestStatus::Denied),
        Just(RequestStatus::Paid),
        Just(RequestStatus::Closed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Whatever is committed reads back identically after a reopen,
    /// including amounts with fractional cents.
    #[test]
    fn on_disk_requests_survive_reopen(
        cents in 1i64..10_000_000,
        status in arb_status(),
        round in 0u32..5,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let temp_dir = tempfile::tempdir().unwrap();
            let db_path = temp_dir.path().join("test.db");
            let f = fund(BudgetEnforcement::Block);
            let mut r = draft(&f, 1);
            r.requested_amount = Decimal::new(cents, 2);
            r.status = status;
            r.review_round = round;

            {
                let repo = SqliteRepository::new(&db_path).unwrap();
                repo.insert_fund(&f).await.unwrap();
                repo.commit(CommitUnit::insert(r.clone())).await.unwrap();
            }

            let repo = SqliteRepository::new(&db_path).unwrap();
            let stored = repo.get_request(r.id).await.unwrap();
            assert_eq!(stored, Some(r.clone()));
            let by_status = repo.list_requests_with_status(&[status]).await.unwrap();
            assert_eq!(by_status, vec![r]);
        });
    }
}
