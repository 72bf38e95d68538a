//! Persisted entities: funds, requests, routing rules, reviews and disbursements.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::actor::{Actor, Role};
use crate::ids::{DisbursementId, FundId, OrganizationId, RequestId, ReviewId, RuleId, UserId};

/// Use categories offered when a fund does not restrict them.
pub const DEFAULT_USE_CATEGORIES: &[&str] = &[
    "Tuition",
    "Books & Supplies",
    "Housing",
    "Food",
    "Transportation",
    "Medical",
    "Technology",
    "Childcare",
    "Emergency",
    "Other",
];

/// Step name used for the synthesized step when no routing rule applies.
pub const FALLBACK_STEP_NAME: &str = "Staff Review";

/// Step name of the review record carrying a student's reply to a Needs Info request.
pub const STUDENT_RESPONSE_STEP_NAME: &str = "Student Response";

// =============================================================================
// Fund
// =============================================================================

/// How a fund reacts when an approval would overcommit its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetEnforcement {
    #[default]
    None,
    Warn,
    Block,
}

impl BudgetEnforcement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundStatus {
    #[default]
    Active,
    Inactive,
    Archived,
}

/// A budgeted pool of money for student assistance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fund {
    pub id: FundId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: String,
    pub eligibility_notes: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_budget: Decimal,
    /// Display cache: `total_budget` minus paid disbursements.
    pub remaining_budget: Decimal,
    pub max_request_amount: Option<Decimal>,
    /// Empty means every category is allowed.
    pub allowed_categories: BTreeSet<String>,
    pub requires_attachments: bool,
    pub budget_enforcement: BudgetEnforcement,
    pub status: FundStatus,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Fund {
    /// Whether `category` may be used for a request against this fund.
    pub fn allows_category(&self, category: &str) -> bool {
        if self.allowed_categories.is_empty() {
            DEFAULT_USE_CATEGORIES.contains(&category)
        } else {
            self.allowed_categories.contains(category)
        }
    }

    /// Whether the fund accepts submissions on `date`.
    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.status == FundStatus::Active
            && self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }

    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        self.owner_id == actor.id
    }
}

// =============================================================================
// Fund request
// =============================================================================

/// Lifecycle status of a fund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Draft,
    Submitted,
    #[serde(rename = "In Review")]
    InReview,
    #[serde(rename = "Needs Info")]
    NeedsInfo,
    Approved,
    Denied,
    Paid,
    Closed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Submitted => "Submitted",
            Self::InReview => "In Review",
            Self::NeedsInfo => "Needs Info",
            Self::Approved => "Approved",
            Self::Denied => "Denied",
            Self::Paid => "Paid",
            Self::Closed => "Closed",
        }
    }

    /// Reviewers may record decisions only in these states.
    pub fn accepts_decisions(&self) -> bool {
        matches!(self, Self::Submitted | Self::InReview)
    }

    /// A human decision has been made; the review phase is over.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Denied | Self::Paid | Self::Closed
        )
    }

    pub fn can_close(&self) -> bool {
        matches!(self, Self::Approved | Self::Denied | Self::Paid)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentInfo {
    pub user_id: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Metadata of an uploaded file; the blob itself lives in file storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub uploaded_by: UserId,
    pub uploaded_at: DateTime<Utc>,
}

/// A student's application for money from a fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRequest {
    pub id: RequestId,
    /// Human readable reference shown to students and staff.
    pub request_number: String,
    pub organization_id: OrganizationId,
    pub fund_id: FundId,
    /// Read-model copy of the fund name; never used for decisions.
    pub fund_name: String,
    pub student: StudentInfo,
    pub requested_amount: Decimal,
    pub intended_use_category: String,
    pub use_description: String,
    pub justification: String,
    pub attachments: Vec<Attachment>,
    pub status: RequestStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub locked: bool,
    /// Label of the active step, for display.
    pub current_step: Option<String>,
    /// Review steps frozen at submission time.
    pub routing_plan: Vec<PlannedStep>,
    /// Index into `routing_plan` of the step awaiting a decision.
    pub active_step: Option<usize>,
    /// Bumped whenever a step is opened or re-opened; only reviews of the
    /// current round are actionable.
    pub review_round: u32,
    /// Optimistic concurrency counter, bumped on every committed write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FundRequest {
    pub fn active_planned_step(&self) -> Option<&PlannedStep> {
        self.active_step.and_then(|i| self.routing_plan.get(i))
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 >= self.routing_plan.len()
    }

    pub fn is_student(&self, actor: &Actor) -> bool {
        self.student.user_id == actor.id
    }

    /// Human readable reference derived from the request id.
    pub fn number_for(id: RequestId) -> String {
        let simple = id.0.simple().to_string().to_ascii_uppercase();
        format!("REQ-{}", &simple[..8])
    }
}

// =============================================================================
// Routing rules and plans
// =============================================================================

/// Who must act on a review step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignment {
    /// Any one of the listed users.
    Users { user_ids: Vec<UserId> },
    /// Anyone holding the role ("role queue").
    Role { role: Role },
    /// Any staff member; used only when no routing rule applies.
    AnyStaff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    ApproveDeny,
    RecommendOnly,
}

/// A configured policy describing one review step of a fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: RuleId,
    pub fund_id: FundId,
    pub step_order: u32,
    pub step_name: String,
    pub assignment: Assignment,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// Empty means every category.
    pub categories: BTreeSet<String>,
    pub sla_days: Option<u32>,
    pub permission: Permission,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One step of a request's frozen review plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    /// Rule the step was derived from; `None` for the fallback step.
    pub rule_id: Option<RuleId>,
    pub step_order: u32,
    pub step_name: String,
    pub assignment: Assignment,
    pub permission: Permission,
    pub sla_days: Option<u32>,
}

impl PlannedStep {
    pub fn from_rule(rule: &RoutingRule) -> Self {
        Self {
            rule_id: Some(rule.id),
            step_order: rule.step_order,
            step_name: rule.step_name.clone(),
            assignment: rule.assignment.clone(),
            permission: rule.permission,
            sla_days: rule.sla_days,
        }
    }

    /// The single step used when no routing rule applies to a request.
    pub fn fallback() -> Self {
        Self {
            rule_id: None,
            step_order: 0,
            step_name: FALLBACK_STEP_NAME.to_string(),
            assignment: Assignment::AnyStaff,
            permission: Permission::ApproveDeny,
            sla_days: None,
        }
    }

    /// `None` without an SLA, or when the deadline is past chrono's range.
    pub fn due_at(&self, activated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = Duration::try_days(i64::from(self.sla_days?))?;
        activated_at.checked_add_signed(days)
    }

    /// Reviewer addresses to create pending reviews for.
    pub fn reviewers(&self) -> Vec<ReviewerRef> {
        match &self.assignment {
            Assignment::Users { user_ids } => user_ids
                .iter()
                .map(|id| ReviewerRef::User {
                    user_id: id.clone(),
                })
                .collect(),
            Assignment::Role { role } => vec![ReviewerRef::RoleQueue { role: *role }],
            Assignment::AnyStaff => vec![ReviewerRef::StaffQueue],
        }
    }
}

// =============================================================================
// Reviews
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Pending,
    Approved,
    Denied,
    #[serde(rename = "Needs Info")]
    NeedsInfo,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Denied => "Denied",
            Self::NeedsInfo => "Needs Info",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressee of a review record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewerRef {
    User { user_id: UserId },
    RoleQueue { role: Role },
    StaffQueue,
}

impl ReviewerRef {
    /// Whether `actor` is the addressee of this review.
    pub fn matches(&self, actor: &Actor) -> bool {
        match self {
            Self::User { user_id } => *user_id == actor.id,
            Self::RoleQueue { role } => actor.has_role(*role),
            Self::StaffQueue => actor.is_staff(),
        }
    }

}

/// One reviewer's action, or pending assignment, on one step of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub request_id: RequestId,
    /// Index into the request's routing plan; `None` for student responses.
    pub step_index: Option<usize>,
    pub step_name: String,
    pub reviewer: ReviewerRef,
    /// Round of the request in which this review was opened.
    pub round: u32,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_by: Option<UserId>,
    pub decided_by_name: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Review {
    pub fn is_pending(&self) -> bool {
        self.decision == Decision::Pending
    }

    pub fn is_student_response(&self) -> bool {
        self.step_index.is_none()
    }
}

// =============================================================================
// Disbursements
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Check,
    DirectDeposit,
    PrepaidCard,
    Cash,
    Other,
}

/// A completed payment against an approved request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbursement {
    pub id: DisbursementId,
    pub request_id: RequestId,
    pub fund_id: FundId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub paid_by: UserId,
    pub notes: Option<String>,
    pub receipt_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fund(categories: &[&str]) -> Fund {
        Fund {
            id: FundId::new(),
            organization_id: OrganizationId::new(),
            name: "Emergency Aid".to_string(),
            description: String::new(),
            eligibility_notes: None,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            total_budget: Decimal::from(1000),
            remaining_budget: Decimal::from(1000),
            max_request_amount: None,
            allowed_categories: categories.iter().map(|c| c.to_string()).collect(),
            requires_attachments: false,
            budget_enforcement: BudgetEnforcement::None,
            status: FundStatus::Active,
            owner_id: UserId::from("owner"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unrestricted_fund_uses_default_categories() {
        let f = fund(&[]);
        assert!(f.allows_category("Housing"));
        assert!(!f.allows_category("Yacht"));
    }

    #[test]
    fn test_restricted_fund_only_allows_listed_categories() {
        let f = fund(&["Food"]);
        assert!(f.allows_category("Food"));
        assert!(!f.allows_category("Housing"));
    }

    #[test]
    fn test_fund_window_is_inclusive() {
        let f = fund(&[]);
        assert!(f.is_open_on(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
        assert!(f.is_open_on(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()));
        assert!(!f.is_open_on(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()));

        let mut inactive = fund(&[]);
        inactive.status = FundStatus::Inactive;
        assert!(!inactive.is_open_on(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()));
    }

    #[test]
    fn test_status_serializes_with_spaces() {
        let json = serde_json::to_string(&RequestStatus::NeedsInfo).unwrap();
        assert_eq!(json, "\"Needs Info\"");
    }

    #[test]
    fn test_request_number_format() {
        let number = FundRequest::number_for(RequestId::new());
        assert!(number.starts_with("REQ-"));
        assert_eq!(number.len(), 12);
    }

    #[test]
    fn test_role_queue_matches_role_holders_only() {
        let reviewer = Actor::new("r1", "Rae", "rae@example.edu", [Role::Reviewer]);
        let manager = Actor::new("m1", "Mo", "mo@example.edu", [Role::FundManager]);
        let queue = ReviewerRef::RoleQueue {
            role: Role::Reviewer,
        };
        assert!(queue.matches(&reviewer));
        assert!(!queue.matches(&manager));
        assert!(ReviewerRef::StaffQueue.matches(&manager));
    }

    #[test]
    fn test_due_at_saturates_to_none_on_overflow() {
        let mut step = PlannedStep::fallback();
        let activated = Utc::now();
        assert_eq!(step.due_at(activated), None);

        step.sla_days = Some(3);
        assert_eq!(step.due_at(activated), Some(activated + Duration::days(3)));

        step.sla_days = Some(u32::MAX);
        assert_eq!(step.due_at(activated), None);
        assert_eq!(step.due_at(DateTime::<Utc>::MAX_UTC), None);
    }
}
