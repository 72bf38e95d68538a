//! Effects (side effects as data).
//!
//! Effects describe what should happen as a result of a state transition.
//! They are pure data - the interpreter applies them to the store.
//! This separation enables testing the transition logic without a database.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fundflow_core::{
    AuditEntry, Decision, Disbursement, FundId, NotificationRequest, Review, ReviewId, UserId,
};

/// All effects that can be produced by state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    // =========================================================================
    // Store effects, committed together with the request update
    // =========================================================================
    /// Insert a new review record.
    CreateReview(Review),

    /// Record a decision on a pending review.
    ResolveReview(ReviewResolution),

    /// Insert the request's disbursement.
    CreateDisbursement(Disbursement),

    /// Decrease the fund's stored remaining balance.
    DebitFund { fund_id: FundId, amount: Decimal },

    // =========================================================================
    // Best-effort effects, applied after the commit
    // =========================================================================
    /// Append an audit record.
    Audit(AuditEntry),

    /// Queue a notification for delivery.
    Notify(NotificationRequest),

    /// Log a message (for debugging/tracing).
    Log { level: LogLevel, message: String },
}

impl Effect {
    /// Returns true if this effect belongs to the atomic commit.
    ///
    /// Audit and notification writes are deliberately outside it: their
    /// failure must not undo the transition they describe.
    pub fn is_store_write(&self) -> bool {
        matches!(
            self,
            Effect::CreateReview(_)
                | Effect::ResolveReview(_)
                | Effect::CreateDisbursement(_)
                | Effect::DebitFund { .. }
        )
    }
}

/// A decision recorded against an existing review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResolution {
    pub review_id: ReviewId,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_by: UserId,
    pub decided_by_name: String,
    pub decided_at: DateTime<Utc>,
}

impl ReviewResolution {
    /// Write the decision onto `review`.
    pub fn apply_to(&self, review: &mut Review) {
        review.decision = self.decision;
        review.comments = self.comments.clone();
        review.decided_by = Some(self.decided_by.clone());
        review.decided_by_name = Some(self.decided_by_name.clone());
        review.decided_at = Some(self.decided_at);
    }
}

/// Log level for logging effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
