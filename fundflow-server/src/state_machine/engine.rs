//! Workflow engine: the entry point for every operation on funds and requests.
//!
//! The engine loads a request snapshot, runs the pure transition function and
//! hands the result to the interpreter. Transitions for requests of the same
//! fund are serialized by a per-fund lock so that the budget check and the
//! commit it guards see the same ledger. Commits are compare-and-swap on the
//! request version; a conflict re-reads and re-runs the transition.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use fundflow_core::validation::{validate_draft, validate_fund};
use fundflow_core::{
    applicable_steps_for, build_plan, check_budget, validate_rule, Actor, Assignment, Attachment,
    AuditAction, AuditEntry, AuditId, BudgetCheck, BudgetEnforcement, BudgetTotals, Decision,
    Disbursement, EntityType, Fund, FundId, FundRequest, FundStatus, OrganizationId,
    PaymentMethod, Permission, PlannedStep, RequestId, RequestStatus, ReviewId, ReviewerRef,
    Role, RoutingRule, RuleId, StudentInfo, UserId, WorkflowError,
};

use super::effect::Effect;
use super::event::{DraftChanges, Event};
use super::interpreter::{
    apply_transition, with_store_retry, EngineStats, EngineStatsSnapshot, StoreRetry,
};
use super::repository::{RepositoryError, WorkflowRepository};
use super::state::{RequestSnapshot, TransitionContext};
use super::transition::{transition, Transition, TransitionResult};
use crate::error::EngineError;

/// Retry knobs of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub store_retry: StoreRetry,
    /// How many times a transition is re-run after losing a version race.
    pub conflict_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_retry: StoreRetry::default(),
            conflict_retry_attempts: 3,
        }
    }
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// =============================================================================
// Operation inputs and outputs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewFund {
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub eligibility_notes: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub total_budget: Decimal,
    #[serde(default)]
    pub max_request_amount: Option<Decimal>,
    #[serde(default)]
    pub allowed_categories: BTreeSet<String>,
    #[serde(default)]
    pub requires_attachments: bool,
    #[serde(default)]
    pub budget_enforcement: BudgetEnforcement,
    /// Defaults to the creating user.
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

/// A routing rule as submitted by a fund manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleInput {
    /// Present when replacing an existing rule.
    #[serde(default)]
    pub id: Option<RuleId>,
    pub step_order: u32,
    pub step_name: String,
    pub assignment: Assignment,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub sla_days: Option<u32>,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// An already uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentRef {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRequest {
    pub fund_id: FundId,
    pub requested_amount: Decimal,
    pub intended_use_category: String,
    #[serde(default)]
    pub use_description: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    /// Submit right away instead of leaving a draft.
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DecisionInput {
    pub review_id: ReviewId,
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub confirm_budget_override: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DisbursementInput {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Applied(RequestSnapshot),
    /// Warn-mode shortfall; nothing was written. Repeat with
    /// `confirm_budget_override` to proceed.
    BudgetConfirmationRequired(BudgetCheck),
}

/// A review waiting on the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingReview {
    pub request_id: RequestId,
    pub request_number: String,
    pub fund_id: FundId,
    pub fund_name: String,
    pub student_name: String,
    pub requested_amount: Decimal,
    pub review_id: ReviewId,
    pub step_name: String,
    pub reviewer: ReviewerRef,
    pub assigned_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub overdue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceReconciliation {
    pub fund_id: FundId,
    pub previous: Decimal,
    pub recomputed: Decimal,
    pub changed: bool,
}

// =============================================================================
// Engine
// =============================================================================

pub struct WorkflowEngine {
    repo: Arc<dyn WorkflowRepository>,
    config: EngineConfig,
    stats: EngineStats,
    fund_locks: Mutex<HashMap<FundId, Arc<Mutex<()>>>>,
    clock: Clock,
}

impl WorkflowEngine {
    pub fn new(repo: Arc<dyn WorkflowRepository>, config: EngineConfig) -> Self {
        Self {
            repo,
            config,
            stats: EngineStats::default(),
            fund_locks: Mutex::new(HashMap::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, for tests that depend on dates.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn fund_lock(&self, fund_id: FundId) -> Arc<Mutex<()>> {
        self.fund_locks
            .lock()
            .await
            .entry(fund_id)
            .or_default()
            .clone()
    }

    /// Run a store call with the transient-failure retry policy.
    async fn store<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        with_store_retry(self.config.store_retry, &self.stats, operation, op)
            .await
            .map_err(EngineError::from)
    }

    /// Best-effort audit write for actions outside the request state machine.
    async fn record_audit(&self, entry: AuditEntry) {
        let written = with_store_retry(self.config.store_retry, &self.stats, "append audit", || {
            self.repo.append_audit(&entry)
        })
        .await;
        if let Err(e) = written {
            self.stats.record_audit_failure();
            error!(
                "Audit write failed for {} on {} {}: {}",
                entry.action,
                entry.entity_type.as_str(),
                entry.entity_id,
                e
            );
        }
    }

    // =========================================================================
    // Funds and routing rules
    // =========================================================================

    pub async fn create_fund(&self, actor: &Actor, input: NewFund) -> Result<Fund, EngineError> {
        if !actor.can_manage_funds() {
            return Err(WorkflowError::unauthorized("only fund managers may create funds").into());
        }
        let now = self.now();
        let fund = Fund {
            id: FundId::new(),
            organization_id: input.organization_id,
            name: input.name.trim().to_string(),
            description: input.description,
            eligibility_notes: input.eligibility_notes,
            start_date: input.start_date,
            end_date: input.end_date,
            total_budget: input.total_budget,
            remaining_budget: input.total_budget,
            max_request_amount: input.max_request_amount,
            allowed_categories: input.allowed_categories,
            requires_attachments: input.requires_attachments,
            budget_enforcement: input.budget_enforcement,
            status: FundStatus::Active,
            owner_id: input.owner_id.unwrap_or_else(|| actor.id.clone()),
            created_at: now,
        };
        validate_fund(&fund)?;

        self.store("insert fund", || self.repo.insert_fund(&fund))
            .await?;
        info!("Created fund {} ({}) with budget {}", fund.name, fund.id, fund.total_budget);

        self.record_audit(AuditEntry::new(
            AuditId::derived(fund.id.as_uuid(), "audit-fund_created"),
            actor,
            AuditAction::FundCreated,
            EntityType::Fund,
            fund.id,
            json!({
                "name": fund.name,
                "total_budget": fund.total_budget,
                "budget_enforcement": fund.budget_enforcement,
            }),
            now,
        ))
        .await;
        Ok(fund)
    }

    pub async fn get_fund(&self, fund_id: FundId) -> Result<Fund, EngineError> {
        self.store("get fund", || self.repo.get_fund(fund_id))
            .await?
            .ok_or_else(|| EngineError::not_found("fund", fund_id))
    }

    pub async fn list_funds(&self) -> Result<Vec<Fund>, EngineError> {
        self.store("list funds", || self.repo.list_funds()).await
    }

    fn ensure_fund_editor(actor: &Actor, fund: &Fund) -> Result<(), WorkflowError> {
        if actor.can_manage_funds() || fund.is_owned_by(actor) {
            Ok(())
        } else {
            Err(WorkflowError::unauthorized(format!(
                "{} may not change routing of fund '{}'",
                actor.name, fund.name
            )))
        }
    }

    /// Create or replace a routing rule. Requests already submitted keep
    /// the plan they were given.
    pub async fn save_rule(
        &self,
        actor: &Actor,
        fund_id: FundId,
        input: RuleInput,
    ) -> Result<RoutingRule, EngineError> {
        let fund = self.get_fund(fund_id).await?;
        Self::ensure_fund_editor(actor, &fund)?;

        let existing = match input.id {
            Some(id) => self.store("get rule", || self.repo.get_rule(id)).await?,
            None => None,
        };
        if let Some(existing) = &existing {
            if existing.fund_id != fund_id {
                return Err(EngineError::not_found("rule", existing.id));
            }
        }

        let rule = RoutingRule {
            id: input.id.unwrap_or_default(),
            fund_id,
            step_order: input.step_order,
            step_name: input.step_name.trim().to_string(),
            assignment: input.assignment,
            min_amount: input.min_amount,
            max_amount: input.max_amount,
            categories: input.categories,
            sla_days: input.sla_days,
            permission: input.permission,
            is_active: input.is_active,
            created_at: existing.as_ref().map_or_else(|| self.now(), |r| r.created_at),
        };
        validate_rule(&rule)?;

        self.store("put rule", || self.repo.put_rule(&rule)).await?;
        info!(
            "Saved routing rule '{}' (step {}) for fund {}",
            rule.step_name, rule.step_order, fund.id
        );
        self.record_audit(AuditEntry::new(
            AuditId::new(),
            actor,
            AuditAction::RoutingRuleSaved,
            EntityType::RoutingRule,
            rule.id,
            json!({ "fund_id": fund_id, "rule": rule, "replaced": existing }),
            self.now(),
        ))
        .await;
        Ok(rule)
    }

    pub async fn delete_rule(
        &self,
        actor: &Actor,
        fund_id: FundId,
        rule_id: RuleId,
    ) -> Result<RoutingRule, EngineError> {
        let fund = self.get_fund(fund_id).await?;
        Self::ensure_fund_editor(actor, &fund)?;

        match self.store("get rule", || self.repo.get_rule(rule_id)).await? {
            Some(rule) if rule.fund_id == fund_id => {}
            _ => return Err(EngineError::not_found("rule", rule_id)),
        }
        let removed = self
            .store("delete rule", || self.repo.delete_rule(rule_id))
            .await?
            .ok_or_else(|| EngineError::not_found("rule", rule_id))?;

        info!("Deleted routing rule '{}' of fund {}", removed.step_name, fund_id);
        self.record_audit(AuditEntry::new(
            AuditId::new(),
            actor,
            AuditAction::RoutingRuleDeleted,
            EntityType::RoutingRule,
            rule_id,
            json!({ "fund_id": fund_id, "rule": removed }),
            self.now(),
        ))
        .await;
        Ok(removed)
    }

    pub async fn list_rules(&self, fund_id: FundId) -> Result<Vec<RoutingRule>, EngineError> {
        self.get_fund(fund_id).await?;
        self.store("list rules", || self.repo.list_rules(fund_id))
            .await
    }

    /// The plan a request with this amount and category would get right now.
    pub async fn preview_plan(
        &self,
        fund_id: FundId,
        amount: Decimal,
        category: &str,
    ) -> Result<Vec<PlannedStep>, EngineError> {
        let rules = self.list_rules(fund_id).await?;
        Ok(build_plan(&applicable_steps_for(amount, category, &rules)))
    }

    async fn budget_totals(&self, fund: &Fund) -> Result<BudgetTotals, EngineError> {
        let requests = self
            .store("list requests", || self.repo.list_requests_for_fund(fund.id))
            .await?;
        let disbursements = self
            .store("list disbursements", || {
                self.repo.list_disbursements_for_fund(fund.id)
            })
            .await?;
        Ok(BudgetTotals::from_records(fund, &requests, &disbursements))
    }

    /// Ledger check of `amount` against the fund. Reads only.
    pub async fn check_budget(
        &self,
        fund_id: FundId,
        amount: Decimal,
    ) -> Result<BudgetCheck, EngineError> {
        let fund = self.get_fund(fund_id).await?;
        Ok(check_budget(self.budget_totals(&fund).await?, amount))
    }

    /// Recompute the fund's display balance from its disbursements.
    pub async fn reconcile_fund_balance(
        &self,
        actor: &Actor,
        fund_id: FundId,
    ) -> Result<BalanceReconciliation, EngineError> {
        let lock = self.fund_lock(fund_id).await;
        let _guard = lock.lock().await;

        let fund = self.get_fund(fund_id).await?;
        if !actor.can_manage_funds() && !fund.is_owned_by(actor) {
            return Err(WorkflowError::unauthorized(format!(
                "{} may not reconcile fund '{}'",
                actor.name, fund.name
            ))
            .into());
        }
        let recomputed = self.budget_totals(&fund).await?.unpaid_balance();
        let report = BalanceReconciliation {
            fund_id,
            previous: fund.remaining_budget,
            recomputed,
            changed: fund.remaining_budget != recomputed,
        };
        if !report.changed {
            return Ok(report);
        }

        self.store("set fund balance", || {
            self.repo.set_fund_balance(fund_id, recomputed)
        })
        .await?;
        warn!(
            "Fund {} balance drifted: stored {}, recomputed {}",
            fund_id, report.previous, recomputed
        );
        self.record_audit(AuditEntry::new(
            AuditId::new(),
            actor,
            AuditAction::FundBalanceReconciled,
            EntityType::Fund,
            fund_id,
            json!({ "previous": report.previous, "recomputed": recomputed }),
            self.now(),
        ))
        .await;
        Ok(report)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    fn attachments(&self, actor: &Actor, refs: Vec<AttachmentRef>) -> Vec<Attachment> {
        let now = self.now();
        refs.into_iter()
            .map(|a| Attachment {
                name: a.name,
                url: a.url,
                uploaded_by: actor.id.clone(),
                uploaded_at: now,
            })
            .collect()
    }

    /// Create a draft owned by `actor`, submitting it when asked.
    pub async fn create_request(
        &self,
        actor: &Actor,
        input: NewRequest,
    ) -> Result<RequestSnapshot, EngineError> {
        if !actor.has_role(Role::Student) {
            return Err(WorkflowError::unauthorized("only students may create requests").into());
        }
        let fund = self.get_fund(input.fund_id).await?;
        let now = self.now();
        let id = RequestId::new();
        let request = FundRequest {
            id,
            request_number: FundRequest::number_for(id),
            organization_id: fund.organization_id,
            fund_id: fund.id,
            fund_name: fund.name.clone(),
            student: StudentInfo {
                user_id: actor.id.clone(),
                full_name: actor.name.clone(),
                email: actor.email.clone(),
                phone: input.phone,
            },
            requested_amount: input.requested_amount,
            intended_use_category: input.intended_use_category.trim().to_string(),
            use_description: input.use_description,
            justification: input.justification,
            attachments: self.attachments(actor, input.attachments),
            status: RequestStatus::Draft,
            submitted_at: None,
            locked: false,
            current_step: None,
            routing_plan: vec![],
            active_step: None,
            review_round: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        validate_draft(&fund, &request)?;

        let created = TransitionResult {
            effects: vec![Effect::Audit(AuditEntry::new(
                AuditId::derived(id.as_uuid(), "audit-0-request_created"),
                actor,
                AuditAction::RequestCreated,
                EntityType::FundRequest,
                id,
                json!({
                    "fund_id": fund.id,
                    "amount": request.requested_amount,
                    "category": request.intended_use_category,
                }),
                now,
            ))],
            request,
        };
        apply_transition(
            self.repo.as_ref(),
            self.config.store_retry,
            &self.stats,
            created,
            None,
        )
        .await?;
        info!("Created request {} against fund {}", FundRequest::number_for(id), fund.id);

        if input.submit {
            self.submit_request(actor, id).await
        } else {
            self.get_request(id).await
        }
    }

    pub async fn get_request(&self, request_id: RequestId) -> Result<RequestSnapshot, EngineError> {
        let request = self
            .store("get request", || self.repo.get_request(request_id))
            .await?
            .ok_or_else(|| EngineError::not_found("request", request_id))?;
        let reviews = self
            .store("list reviews", || self.repo.list_reviews(request_id))
            .await?;
        Ok(RequestSnapshot::new(request, reviews))
    }

    async fn context(
        &self,
        request: &FundRequest,
        actor: &Actor,
    ) -> Result<TransitionContext, EngineError> {
        let fund = self.get_fund(request.fund_id).await?;
        let rules = self
            .store("list rules", || self.repo.list_rules(fund.id))
            .await?;
        let budget = self.budget_totals(&fund).await?;
        Ok(TransitionContext {
            fund,
            rules,
            budget,
            actor: actor.clone(),
            now: self.now(),
        })
    }

    /// Run one event through the state machine and commit its result.
    async fn run_event(
        &self,
        actor: &Actor,
        request_id: RequestId,
        event: Event,
    ) -> Result<Transition, EngineError> {
        let fund_id = self.get_request(request_id).await?.request.fund_id;
        let lock = self.fund_lock(fund_id).await;
        let _guard = lock.lock().await;

        let mut conflicts = 0;
        loop {
            let snapshot = self.get_request(request_id).await?;
            let ctx = self.context(&snapshot.request, actor).await?;
            info!(
                "Processing {} for {} in status {} as {}",
                event.log_summary(),
                snapshot.request.request_number,
                snapshot.request.status,
                actor.id
            );

            let result = match transition(&snapshot, &ctx, event.clone())? {
                Transition::Applied(result) => result,
                pending => return Ok(pending),
            };
            let committed = apply_transition(
                self.repo.as_ref(),
                self.config.store_retry,
                &self.stats,
                result.clone(),
                Some(snapshot.request.version),
            )
            .await;

            match committed {
                Ok(()) => return Ok(Transition::Applied(result)),
                Err(RepositoryError::Conflict { .. })
                    if conflicts < self.config.conflict_retry_attempts =>
                {
                    conflicts += 1;
                    self.stats.record_conflict_retry();
                    warn!(
                        "Version conflict on {}; re-running {} (attempt {})",
                        snapshot.request.request_number,
                        event.action(),
                        conflicts
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run an event that can never ask for budget confirmation.
    async fn apply_event(
        &self,
        actor: &Actor,
        request_id: RequestId,
        event: Event,
    ) -> Result<TransitionResult, EngineError> {
        match self.run_event(actor, request_id, event).await? {
            Transition::Applied(result) => Ok(result),
            Transition::NeedsBudgetConfirmation(check) => Err(EngineError::Workflow(
                WorkflowError::BudgetExceeded {
                    remaining: check.remaining,
                    requested: check.requested,
                },
            )),
        }
    }

    pub async fn update_draft(
        &self,
        actor: &Actor,
        request_id: RequestId,
        changes: DraftChanges,
    ) -> Result<RequestSnapshot, EngineError> {
        self.apply_event(actor, request_id, Event::EditDraft(changes))
            .await?;
        self.get_request(request_id).await
    }

    pub async fn submit_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
    ) -> Result<RequestSnapshot, EngineError> {
        self.apply_event(actor, request_id, Event::Submit).await?;
        self.get_request(request_id).await
    }

    pub async fn decide(
        &self,
        actor: &Actor,
        request_id: RequestId,
        input: DecisionInput,
    ) -> Result<DecisionOutcome, EngineError> {
        let event = Event::Decide {
            review_id: input.review_id,
            decision: input.decision,
            comments: input.comments,
            confirm_budget_override: input.confirm_budget_override,
        };
        match self.run_event(actor, request_id, event).await? {
            Transition::Applied(_) => Ok(DecisionOutcome::Applied(
                self.get_request(request_id).await?,
            )),
            Transition::NeedsBudgetConfirmation(check) => {
                Ok(DecisionOutcome::BudgetConfirmationRequired(check))
            }
        }
    }

    pub async fn respond_to_info_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
        message: String,
        attachments: Vec<AttachmentRef>,
    ) -> Result<RequestSnapshot, EngineError> {
        let event = Event::RespondToInfoRequest {
            message,
            attachments: self.attachments(actor, attachments),
        };
        self.apply_event(actor, request_id, event).await?;
        self.get_request(request_id).await
    }

    pub async fn record_disbursement(
        &self,
        actor: &Actor,
        request_id: RequestId,
        input: DisbursementInput,
    ) -> Result<Disbursement, EngineError> {
        let event = Event::Disburse {
            amount: input.amount,
            method: input.method,
            notes: input.notes,
            receipt_url: input.receipt_url,
        };
        let result = self.apply_event(actor, request_id, event).await?;
        result
            .effects
            .into_iter()
            .find_map(|effect| match effect {
                Effect::CreateDisbursement(disbursement) => Some(disbursement),
                _ => None,
            })
            .ok_or_else(|| EngineError::not_found("disbursement for request", request_id))
    }

    pub async fn close_request(
        &self,
        actor: &Actor,
        request_id: RequestId,
        reason: Option<String>,
    ) -> Result<RequestSnapshot, EngineError> {
        self.apply_event(actor, request_id, Event::Close { reason })
            .await?;
        self.get_request(request_id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Reviews the actor can decide on now, oldest assignment first.
    pub async fn pending_reviews_for(&self, actor: &Actor) -> Result<Vec<PendingReview>, EngineError> {
        const OPEN: [RequestStatus; 2] = [RequestStatus::Submitted, RequestStatus::InReview];
        let requests = self
            .store("list open requests", || {
                self.repo.list_requests_with_status(&OPEN)
            })
            .await?;

        let now = self.now();
        let mut owners: HashMap<FundId, UserId> = HashMap::new();
        let mut pending = Vec::new();
        for request in requests {
            if request.is_student(actor) {
                continue;
            }
            if !owners.contains_key(&request.fund_id) {
                let fund = self.get_fund(request.fund_id).await?;
                owners.insert(fund.id, fund.owner_id);
            }
            let owns_fund = owners.get(&request.fund_id) == Some(&actor.id);

            let reviews = self
                .store("list reviews", || self.repo.list_reviews(request.id))
                .await?;
            let snapshot = RequestSnapshot::new(request, reviews);
            let step = snapshot.request.active_planned_step();
            let due_at = step
                .zip(snapshot.active_since())
                .and_then(|(step, since)| step.due_at(since));

            for review in snapshot.actionable_reviews() {
                if !(review.reviewer.matches(actor) || actor.is_admin() || owns_fund) {
                    continue;
                }
                pending.push(PendingReview {
                    request_id: snapshot.request.id,
                    request_number: snapshot.request.request_number.clone(),
                    fund_id: snapshot.request.fund_id,
                    fund_name: snapshot.request.fund_name.clone(),
                    student_name: snapshot.request.student.full_name.clone(),
                    requested_amount: snapshot.request.requested_amount,
                    review_id: review.id,
                    step_name: review.step_name.clone(),
                    reviewer: review.reviewer.clone(),
                    assigned_at: review.created_at,
                    due_at,
                    overdue: due_at.is_some_and(|due| due < now),
                });
            }
        }
        pending.sort_by_key(|p| p.assigned_at);
        Ok(pending)
    }

    /// Audit entries of an entity, oldest first. For a request this includes
    /// the entries of its disbursement.
    pub async fn audit_trail(&self, entity_id: &str) -> Result<Vec<AuditEntry>, EngineError> {
        let mut entries = self
            .store("list audit", || self.repo.list_audit(entity_id))
            .await?;
        if let Ok(request_id) = RequestId::from_str(entity_id) {
            let disbursement = self
                .store("get disbursement", || {
                    self.repo.get_disbursement_for_request(request_id)
                })
                .await?;
            if let Some(disbursement) = disbursement {
                let disbursement_id = disbursement.id.to_string();
                entries.extend(
                    self.store("list audit", || self.repo.list_audit(&disbursement_id))
                        .await?,
                );
                // sort_by_key is stable
                entries.sort_by_key(|e| e.recorded_at);
            }
        }
        Ok(entries)
    }
}
