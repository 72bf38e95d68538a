//! State seen by the transition function for a single request.
//!
//! The request's status is the machine state proper; the review records
//! carry which reviewers are waiting and what has been decided so far.

use chrono::{DateTime, Utc};
use serde::Serialize;

use fundflow_core::{
    Actor, BudgetTotals, Decision, Fund, FundRequest, Review, ReviewId, RoutingRule, UserId,
};

/// A request together with every review record it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSnapshot {
    pub request: FundRequest,
    pub reviews: Vec<Review>,
}

impl RequestSnapshot {
    pub fn new(request: FundRequest, reviews: Vec<Review>) -> Self {
        Self { request, reviews }
    }

    pub fn find_review(&self, id: ReviewId) -> Option<&Review> {
        self.reviews.iter().find(|r| r.id == id)
    }

    /// Pending reviews of the active step and current round, if the request
    /// accepts decisions.
    pub fn actionable_reviews(&self) -> Vec<&Review> {
        if !self.request.status.accepts_decisions() {
            return vec![];
        }
        let Some(active) = self.request.active_step else {
            return vec![];
        };
        let round = self.request.review_round;
        self.reviews
            .iter()
            .filter(|r| r.is_pending() && r.step_index == Some(active) && r.round == round)
            .collect()
    }

    /// Whether `review` is one the active step is waiting on.
    pub fn is_actionable(&self, review: &Review) -> bool {
        self.actionable_reviews().iter().any(|r| r.id == review.id)
    }

    /// Sequence number for the next review record; used to derive its id.
    pub fn next_review_seq(&self) -> usize {
        self.reviews.len()
    }

    /// The reviewer who most recently asked for more information on the active step.
    pub fn info_requester(&self) -> Option<(&UserId, &Review)> {
        let active = self.request.active_step?;
        self.reviews
            .iter()
            .filter(|r| r.step_index == Some(active) && r.decision == Decision::NeedsInfo)
            .max_by_key(|r| r.decided_at)
            .and_then(|r| r.decided_by.as_ref().map(|user| (user, r)))
    }

    /// When the active step became active: the earliest creation time of
    /// its reviews. Re-opening after Needs Info does not reset the clock.
    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        let active = self.request.active_step?;
        self.reviews
            .iter()
            .filter(|r| r.step_index == Some(active))
            .map(|r| r.created_at)
            .min()
    }
}

/// Everything besides the snapshot that a transition may consult.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub fund: Fund,
    /// Current rules of the fund; only read when a plan is frozen at submission.
    pub rules: Vec<RoutingRule>,
    /// Ledger totals read under the fund lock.
    pub budget: BudgetTotals,
    pub actor: Actor,
    pub now: DateTime<Utc>,
}
