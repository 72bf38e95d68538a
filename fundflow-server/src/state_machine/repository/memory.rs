//! In-memory implementation of `WorkflowRepository`.
//!
//! All data is held in memory and lost on restart. Used by tests and by
//! embedders that bring their own persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use fundflow_core::{
    AuditEntry, AuditId, Disbursement, Fund, FundId, FundRequest, NotificationId,
    NotificationRequest, RequestId, RequestStatus, Review, RoutingRule, RuleId,
};

use super::{CommitUnit, RepositoryError, WorkflowRepository};

#[derive(Default)]
struct Tables {
    funds: HashMap<FundId, Fund>,
    rules: HashMap<RuleId, RoutingRule>,
    requests: HashMap<RequestId, FundRequest>,
    /// Reviews per request, in insertion order.
    reviews: HashMap<RequestId, Vec<Review>>,
    disbursements: HashMap<RequestId, Disbursement>,
    audit: Vec<AuditEntry>,
    audit_ids: HashMap<AuditId, usize>,
    notifications: Vec<NotificationRequest>,
    notification_ids: HashMap<NotificationId, usize>,
}

/// In-memory workflow repository.
///
/// Every table sits behind one `RwLock`, which makes `commit` trivially
/// atomic: it validates everything first and only then mutates.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn insert_fund(&self, fund: &Fund) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.funds.contains_key(&fund.id) {
            return Err(RepositoryError::duplicate("fund", fund.id));
        }
        tables.funds.insert(fund.id, fund.clone());
        Ok(())
    }

    async fn get_fund(&self, id: FundId) -> Result<Option<Fund>, RepositoryError> {
        Ok(self.tables.read().await.funds.get(&id).cloned())
    }

    async fn list_funds(&self) -> Result<Vec<Fund>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(sorted_by(tables.funds.values().cloned().collect(), |f| {
            (f.created_at, f.id.as_uuid())
        }))
    }

    async fn set_fund_balance(
        &self,
        id: FundId,
        remaining: Decimal,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let fund = tables
            .funds
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("fund", id))?;
        fund.remaining_budget = remaining;
        Ok(())
    }

    async fn list_rules(&self, fund_id: FundId) -> Result<Vec<RoutingRule>, RepositoryError> {
        let tables = self.tables.read().await;
        let rules = tables
            .rules
            .values()
            .filter(|r| r.fund_id == fund_id)
            .cloned()
            .collect();
        Ok(sorted_by(rules, |r| (r.step_order, r.created_at)))
    }

    async fn get_rule(&self, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError> {
        Ok(self.tables.read().await.rules.get(&id).cloned())
    }

    async fn put_rule(&self, rule: &RoutingRule) -> Result<(), RepositoryError> {
        self.tables
            .write()
            .await
            .rules
            .insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError> {
        Ok(self.tables.write().await.rules.remove(&id))
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<FundRequest>, RepositoryError> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn list_requests_for_fund(
        &self,
        fund_id: FundId,
    ) -> Result<Vec<FundRequest>, RepositoryError> {
        let tables = self.tables.read().await;
        let requests = tables
            .requests
            .values()
            .filter(|r| r.fund_id == fund_id)
            .cloned()
            .collect();
        Ok(sorted_by(requests, |r| r.created_at))
    }

    async fn list_requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<FundRequest>, RepositoryError> {
        let tables = self.tables.read().await;
        let requests = tables
            .requests
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        Ok(sorted_by(requests, |r| r.created_at))
    }

    async fn list_reviews(&self, request_id: RequestId) -> Result<Vec<Review>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.reviews.get(&request_id).cloned().unwrap_or_default())
    }

    async fn list_disbursements_for_fund(
        &self,
        fund_id: FundId,
    ) -> Result<Vec<Disbursement>, RepositoryError> {
        let tables = self.tables.read().await;
        let disbursements = tables
            .disbursements
            .values()
            .filter(|d| d.fund_id == fund_id)
            .cloned()
            .collect();
        Ok(sorted_by(disbursements, |d| d.paid_at))
    }

    async fn get_disbursement_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Option<Disbursement>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .disbursements
            .get(&request_id)
            .cloned())
    }

    async fn commit(&self, unit: CommitUnit) -> Result<(), RepositoryError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let request_id = unit.request.id;

        // Validate before touching anything.
        match (tables.requests.get(&request_id), unit.expected_version) {
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

        let existing = tables.reviews.get(&request_id);
        for resolution in &unit.resolutions {
            let found = existing
                .map(|reviews| reviews.iter().any(|r| r.id == resolution.review_id))
                .unwrap_or(false);
            if !found {
                return Err(RepositoryError::not_found("review", resolution.review_id));
            }
        }
        if let Some(disbursement) = &unit.disbursement {
            if let Some(current) = tables.disbursements.get(&disbursement.request_id) {
                if current.id != disbursement.id {
                    return Err(RepositoryError::duplicate(
                        "disbursement for request",
                        disbursement.request_id,
                    ));
                }
            }
        }
        if let Some((fund_id, _)) = &unit.fund_debit {
            if !tables.funds.contains_key(fund_id) {
                return Err(RepositoryError::not_found("fund", fund_id));
            }
        }

        // Apply.
        let reviews = tables.reviews.entry(request_id).or_default();
        for review in unit.new_reviews {
            if !reviews.iter().any(|r| r.id == review.id) {
                reviews.push(review);
            }
        }
        for resolution in &unit.resolutions {
            if let Some(review) = reviews.iter_mut().find(|r| r.id == resolution.review_id) {
                resolution.apply_to(review);
            }
        }
        if let Some(disbursement) = unit.disbursement {
            tables
                .disbursements
                .insert(disbursement.request_id, disbursement);
        }
        if let Some((fund_id, amount)) = unit.fund_debit {
            if let Some(fund) = tables.funds.get_mut(&fund_id) {
                fund.remaining_budget -= amount;
            }
        }
        tables.requests.insert(request_id, unit.request);
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.audit_ids.contains_key(&entry.id) {
            return Ok(false);
        }
        let index = tables.audit.len();
        tables.audit.push(entry.clone());
        tables.audit_ids.insert(entry.id, index);
        Ok(true)
    }

    async fn list_audit(&self, entity_id: &str) -> Result<Vec<AuditEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn enqueue_notification(
        &self,
        notification: &NotificationRequest,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.notification_ids.contains_key(&notification.id) {
            return Ok(false);
        }
        let index = tables.notifications.len();
        tables.notifications.push(notification.clone());
        tables.notification_ids.insert(notification.id, index);
        Ok(true)
    }

    async fn list_notifications(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<NotificationRequest>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.request_id == request_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::effect::ReviewResolution;
    use chrono::Utc;
    use fundflow_core::{
        BudgetEnforcement, Decision, FundStatus, OrganizationId, PaymentMethod, ReviewerRef,
        StudentInfo, UserId,
    };
    use std::collections::BTreeSet;

    fn fund() -> Fund {
        Fund {
            id: FundId::new(),
            organization_id: OrganizationId::new(),
            name: "Hardship".to_string(),
            description: String::new(),
            eligibility_notes: None,
            start_date: None,
            end_date: None,
            total_budget: Decimal::from(500),
            remaining_budget: Decimal::from(500),
            max_request_amount: None,
            allowed_categories: BTreeSet::new(),
            requires_attachments: false,
            budget_enforcement: BudgetEnforcement::Block,
            status: FundStatus::Active,
            owner_id: UserId::from("owner"),
            created_at: Utc::now(),
        }
    }

    fn request(fund: &Fund) -> FundRequest {
        let id = RequestId::new();
        FundRequest {
            id,
            request_number: FundRequest::number_for(id),
            organization_id: fund.organization_id,
            fund_id: fund.id,
            fund_name: fund.name.clone(),
            student: StudentInfo {
                user_id: UserId::from("stu"),
                full_name: "Sam".to_string(),
                email: "sam@example.edu".to_string(),
                phone: None,
            },
            requested_amount: Decimal::from(120),
            intended_use_category: "Food".to_string(),
            use_description: String::new(),
            justification: "groceries".to_string(),
            attachments: vec![],
            status: RequestStatus::Draft,
            submitted_at: None,
            locked: false,
            current_step: None,
            routing_plan: vec![],
            active_step: None,
            review_round: 0,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn review(request: &FundRequest) -> Review {
        Review {
            id: fundflow_core::ReviewId::derived(request.id.as_uuid(), "review-0"),
            request_id: request.id,
            step_index: Some(0),
            step_name: "Staff Review".to_string(),
            reviewer: ReviewerRef::StaffQueue,
            round: 1,
            decision: Decision::Pending,
            comments: None,
            decided_by: None,
            decided_by_name: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_is_compare_and_swap() {
        let repo = InMemoryRepository::new();
        let f = fund();
        repo.insert_fund(&f).await.unwrap();
        let mut r = request(&f);
        repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

        r.version = 1;
        repo.commit(CommitUnit::update(r.clone(), 0)).await.unwrap();

        let mut stale = r.clone();
        stale.version = 2;
        stale.justification = "changed".to_string();
        let err = repo.commit(CommitUnit::update(stale, 0)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { found: 1, .. }));
    }

    #[tokio::test]
    async fn test_replayed_commit_is_a_no_op() {
        let repo = InMemoryRepository::new();
        let f = fund();
        repo.insert_fund(&f).await.unwrap();
        let mut r = request(&f);
        repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

        r.version = 1;
        let mut unit = CommitUnit::update(r.clone(), 0);
        unit.new_reviews.push(review(&r));
        repo.commit(unit.clone()).await.unwrap();
        repo.commit(unit).await.unwrap();

        assert_eq!(repo.list_reviews(r.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_applies_everything_or_nothing() {
        let repo = InMemoryRepository::new();
        let f = fund();
        repo.insert_fund(&f).await.unwrap();
        let r = request(&f);
        repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

        let mut next = r.clone();
        next.version = 1;
        next.status = RequestStatus::Paid;
        let mut unit = CommitUnit::update(next, 0);
        unit.resolutions.push(ReviewResolution {
            review_id: fundflow_core::ReviewId::new(),
            decision: Decision::Approved,
            comments: None,
            decided_by: UserId::from("r1"),
            decided_by_name: "R1".to_string(),
            decided_at: Utc::now(),
        });
        unit.fund_debit = Some((f.id, Decimal::from(120)));
        assert!(matches!(
            repo.commit(unit).await,
            Err(RepositoryError::NotFound { .. })
        ));

        let stored = repo.get_request(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Draft);
        let stored_fund = repo.get_fund(f.id).await.unwrap().unwrap();
        assert_eq!(stored_fund.remaining_budget, Decimal::from(500));
    }

    #[tokio::test]
    async fn test_second_disbursement_is_rejected() {
        let repo = InMemoryRepository::new();
        let f = fund();
        repo.insert_fund(&f).await.unwrap();
        let r = request(&f);
        repo.commit(CommitUnit::insert(r.clone())).await.unwrap();

        let pay = |version: u64, id: fundflow_core::DisbursementId| {
            let mut next = r.clone();
            next.version = version;
            let mut unit = CommitUnit::update(next, version - 1);
            unit.disbursement = Some(Disbursement {
                id,
                request_id: r.id,
                fund_id: f.id,
                amount: Decimal::from(100),
                method: PaymentMethod::Cash,
                paid_at: Utc::now(),
                paid_by: UserId::from("mgr"),
                notes: None,
                receipt_url: None,
            });
            unit.fund_debit = Some((f.id, Decimal::from(100)));
            unit
        };

        repo.commit(pay(1, fundflow_core::DisbursementId::new()))
            .await
            .unwrap();
        let err = repo
            .commit(pay(2, fundflow_core::DisbursementId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate { .. }));

        let stored_fund = repo.get_fund(f.id).await.unwrap().unwrap();
        assert_eq!(stored_fund.remaining_budget, Decimal::from(400));
    }

    #[tokio::test]
    async fn test_audit_append_is_idempotent() {
        let repo = InMemoryRepository::new();
        let actor = fundflow_core::Actor::new("adm", "Ada", "ada@example.edu", []);
        let entry = AuditEntry::new(
            AuditId::new(),
            &actor,
            fundflow_core::AuditAction::FundCreated,
            fundflow_core::EntityType::Fund,
            "fund-1",
            serde_json::json!({}),
            Utc::now(),
        );
        assert!(repo.append_audit(&entry).await.unwrap());
        assert!(!repo.append_audit(&entry).await.unwrap());
        assert_eq!(repo.list_audit("fund-1").await.unwrap().len(), 1);
    }
}
