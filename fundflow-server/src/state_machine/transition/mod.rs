//! Pure state transition function.
//!
//! The transition function is the core of the state machine. It takes a
//! request snapshot, the context of the action and an event, and returns the
//! updated request plus a list of effects. It performs no I/O; everything it
//! needs (fund, rules, ledger totals, clock) arrives in the context.
//!
//! Each status has its own handler module with co-located tests:
//! - `draft`: Draft edits and submission
//! - `review`: decisions while Submitted / In Review
//! - `needs_info`: the student's reply to a Needs Info decision
//! - `approved`: disbursement of an approved request
//! - `terminal`: Denied / Paid / Closed, and the administrative close

mod approved;
mod draft;
mod needs_info;
mod review;
mod terminal;

use serde_json::json;

use fundflow_core::{
    AuditAction, AuditEntry, AuditId, BudgetCheck, Decision, EntityType, FundRequest,
    NotificationId, NotificationRequest, Recipient, RequestStatus, Review, ReviewId, ReviewerRef,
    TemplateKey, WorkflowError,
};

use super::effect::{Effect, LogLevel, ReviewResolution};
use super::event::Event;
use super::state::{RequestSnapshot, TransitionContext};

/// Result of an applied transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    /// The request as it must be committed. Its `version` is already bumped.
    pub request: FundRequest,
    /// Effects to execute.
    pub effects: Vec<Effect>,
}

/// What the transition function decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(TransitionResult),
    /// Warn-mode shortfall; nothing may be written until the caller confirms.
    NeedsBudgetConfirmation(BudgetCheck),
}

impl Transition {
    /// The applied result, if the transition went through.
    pub fn applied(self) -> Option<TransitionResult> {
        match self {
            Transition::Applied(result) => Some(result),
            Transition::NeedsBudgetConfirmation(_) => None,
        }
    }
}

/// Pure state transition function.
///
/// Actions the current status does not permit fail with `InvalidTransition`
/// before anything is produced, except a reply to an information request,
/// which fails with `Unauthorized` whenever the request is not waiting on one.
pub fn transition(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    event: Event,
) -> Result<Transition, WorkflowError> {
    let status = snapshot.request.status;

    if matches!(event, Event::RespondToInfoRequest { .. }) && status != RequestStatus::NeedsInfo {
        return Err(WorkflowError::unauthorized(format!(
            "request {} is not waiting for information (status {})",
            snapshot.request.request_number, status
        )));
    }

    match status {
        RequestStatus::Draft => draft::handle(snapshot, ctx, event),
        RequestStatus::Submitted | RequestStatus::InReview => review::handle(snapshot, ctx, event),
        RequestStatus::NeedsInfo => needs_info::handle(snapshot, ctx, event),
        RequestStatus::Approved => approved::handle(snapshot, ctx, event),
        RequestStatus::Denied | RequestStatus::Paid | RequestStatus::Closed => {
            terminal::handle(snapshot, ctx, event)
        }
    }
}

fn reject(snapshot: &RequestSnapshot, event: &Event) -> Result<Transition, WorkflowError> {
    Err(WorkflowError::invalid_transition(
        snapshot.request.status,
        event.action(),
    ))
}

/// Accumulates the request update and effects of one transition.
///
/// Ids of everything it creates are derived from the request id and the
/// request version being written, so re-executing the same effects after a
/// transient store failure cannot create duplicates.
pub(crate) struct Changes<'a> {
    ctx: &'a TransitionContext,
    request: FundRequest,
    effects: Vec<Effect>,
    next_review_seq: usize,
    notices: usize,
}

impl<'a> Changes<'a> {
    pub(crate) fn new(snapshot: &RequestSnapshot, ctx: &'a TransitionContext) -> Self {
        let mut request = snapshot.request.clone();
        request.version += 1;
        request.updated_at = ctx.now;
        Self {
            ctx,
            request,
            effects: Vec::new(),
            next_review_seq: snapshot.next_review_seq(),
            notices: 0,
        }
    }

    pub(crate) fn request(&self) -> &FundRequest {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut FundRequest {
        &mut self.request
    }

    pub(crate) fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Make `index` the active step and open a pending review for each of its reviewers.
    pub(crate) fn open_step(&mut self, index: usize) -> Result<(), WorkflowError> {
        let step = self
            .request
            .routing_plan
            .get(index)
            .cloned()
            .ok_or_else(|| {
                WorkflowError::validation(format!(
                    "routing plan of {} has no step {}",
                    self.request.request_number, index
                ))
            })?;

        self.request.active_step = Some(index);
        self.request.current_step = Some(step.step_name.clone());
        self.request.review_round += 1;

        for reviewer in step.reviewers() {
            self.add_review(Some(index), &step.step_name, reviewer.clone(), None);
            self.notify(
                Recipient::from(&reviewer),
                TemplateKey::ReviewAssigned,
                json!({ "step_name": step.step_name }),
            );
        }
        Ok(())
    }

    /// Append a pending review record in the current round.
    pub(crate) fn add_review(
        &mut self,
        step_index: Option<usize>,
        step_name: &str,
        reviewer: ReviewerRef,
        comments: Option<String>,
    ) -> ReviewId {
        let id = ReviewId::derived(
            self.request.id.as_uuid(),
            &format!("review-{}", self.next_review_seq),
        );
        self.next_review_seq += 1;
        self.effects.push(Effect::CreateReview(Review {
            id,
            request_id: self.request.id,
            step_index,
            step_name: step_name.to_string(),
            reviewer,
            round: self.request.review_round,
            decision: Decision::Pending,
            comments,
            decided_by: None,
            decided_by_name: None,
            decided_at: None,
            created_at: self.ctx.now,
        }));
        id
    }

    /// Record the acting user's decision on `review`.
    pub(crate) fn resolve(&mut self, review: &Review, decision: Decision, comments: Option<String>) {
        self.effects.push(Effect::ResolveReview(ReviewResolution {
            review_id: review.id,
            decision,
            comments,
            decided_by: self.ctx.actor.id.clone(),
            decided_by_name: self.ctx.actor.name.clone(),
            decided_at: self.ctx.now,
        }));
    }

    pub(crate) fn audit(&mut self, action: AuditAction, details: serde_json::Value) {
        let entity_id = self.request.id;
        self.audit_entity(action, EntityType::FundRequest, entity_id, details);
    }

    pub(crate) fn audit_entity(
        &mut self,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl ToString,
        details: serde_json::Value,
    ) {
        let id = AuditId::derived(
            self.request.id.as_uuid(),
            &format!("audit-{}-{}", self.request.version, action),
        );
        self.effects.push(Effect::Audit(AuditEntry::new(
            id,
            &self.ctx.actor,
            action,
            entity_type,
            entity_id,
            details,
            self.ctx.now,
        )));
    }

    pub(crate) fn notify(
        &mut self,
        recipient: Recipient,
        template: TemplateKey,
        extra: serde_json::Value,
    ) {
        let id = NotificationId::derived(
            self.request.id.as_uuid(),
            &format!("notify-{}-{}", self.request.version, self.notices),
        );
        self.notices += 1;

        let mut context = json!({
            "request_number": self.request.request_number,
            "fund_name": self.request.fund_name,
            "student_name": self.request.student.full_name,
            "amount": self.request.requested_amount,
        });
        if let (Some(base), serde_json::Value::Object(extra)) = (context.as_object_mut(), extra) {
            base.extend(extra);
        }

        self.effects.push(Effect::Notify(NotificationRequest {
            id,
            request_id: self.request.id,
            recipient,
            template,
            context,
            created_at: self.ctx.now,
        }));
    }

    pub(crate) fn notify_student(&mut self, template: TemplateKey, extra: serde_json::Value) {
        let recipient = Recipient::User {
            user_id: self.request.student.user_id.clone(),
            email: Some(self.request.student.email.clone()),
        };
        self.notify(recipient, template, extra);
    }

    pub(crate) fn log(&mut self, level: LogLevel, message: String) {
        self.effects.push(Effect::Log { level, message });
    }

    pub(crate) fn finish(self) -> Result<Transition, WorkflowError> {
        Ok(Transition::Applied(TransitionResult {
            request: self.request,
            effects: self.effects,
        }))
    }
}



#[cfg(test)]
mod property_tests {
    use super::fixtures::*;
    use super::*;
    use fundflow_core::{BudgetEnforcement, RoutingRule};
    use proptest::prelude::*;

    /// A reviewer action: which decision to record on the current step.
    #[derive(Debug, Clone, Copy)]
    enum Action {
        Approve,
        Deny,
        AskThenApprove,
    }

    fn arb_action() -> impl Strategy<Value = Action> {
        prop_oneof![
            4 => Just(Action::Approve),
            1 => Just(Action::Deny),
            1 => Just(Action::AskThenApprove),
        ]
    }

    fn plan_rules(fund: &fundflow_core::Fund, steps: usize) -> Vec<RoutingRule> {
        (0..steps)
            .map(|i| {
                let id = format!("r{}", i);
                rule(fund, i as u32 + 1, &format!("Step {}", i + 1), users(&[id.as_str()]))
            })
            .collect()
    }

    /// Drive a request through `actions`, returning every intermediate snapshot.
    fn run(steps: usize, actions: &[Action]) -> Vec<RequestSnapshot> {
        let f = fund(BudgetEnforcement::None);
        let (mut snapshot, ctx) = submitted(&f, plan_rules(&f, steps), 100);
        let mut history = vec![snapshot.clone()];

        for action in actions {
            if !snapshot.request.status.accepts_decisions() {
                break;
            }
            let review = actionable(&snapshot);
            let who = match &review.reviewer {
                fundflow_core::ReviewerRef::User { user_id } => reviewer(user_id.as_str()),
                _ => admin(),
            };
            snapshot = match action {
                Action::Approve => step(&snapshot, &ctx, who, decide(&review, Decision::Approved)).0,
                Action::Deny => step(&snapshot, &ctx, who, decide(&review, Decision::Denied)).0,
                Action::AskThenApprove => {
                    let (asked, _) =
                        step(&snapshot, &ctx, who.clone(), decide(&review, Decision::NeedsInfo));
                    history.push(asked.clone());
                    let (answered, _) = step(
                        &asked,
                        &ctx,
                        student(),
                        Event::RespondToInfoRequest {
                            message: "receipt attached".to_string(),
                            attachments: vec![],
                        },
                    );
                    history.push(answered.clone());
                    let again = actionable(&answered);
                    step(&answered, &ctx, who, decide(&again, Decision::Approved)).0
                }
            };
            history.push(snapshot.clone());
        }
        history
    }

    proptest! {
        #[test]
        fn deny_short_circuits_remaining_steps(
            steps in 1usize..5,
            actions in proptest::collection::vec(arb_action(), 1..8),
        ) {
            let history = run(steps, &actions);
            let last = history.last().unwrap();
            if let Some(denied_at) = actions.iter().position(|a| matches!(a, Action::Deny)) {
                if denied_at < steps {
                    prop_assert_eq!(last.request.status, RequestStatus::Denied);
                    // No review was ever opened for a step after the denied one.
                    prop_assert!(last.reviews.iter().all(|r| r.step_index.map_or(true, |i| i <= denied_at)));
                    prop_assert!(last.actionable_reviews().is_empty());
                }
            }
        }

        #[test]
        fn approved_only_after_final_step(
            steps in 1usize..5,
            actions in proptest::collection::vec(arb_action(), 1..8),
        ) {
            for snapshot in run(steps, &actions) {
                if snapshot.request.status == RequestStatus::Approved {
                    let approved_steps: std::collections::BTreeSet<_> = snapshot
                        .reviews
                        .iter()
                        .filter(|r| r.decision == Decision::Approved)
                        .filter_map(|r| r.step_index)
                        .collect();
                    prop_assert_eq!(approved_steps.len(), steps);
                }
            }
        }

        #[test]
        fn locked_exactly_when_decided(
            steps in 1usize..5,
            actions in proptest::collection::vec(arb_action(), 1..8),
        ) {
            for snapshot in run(steps, &actions) {
                prop_assert_eq!(snapshot.request.locked, snapshot.request.status.is_decided());
            }
        }

        #[test]
        fn at_most_one_step_is_actionable(
            steps in 1usize..5,
            actions in proptest::collection::vec(arb_action(), 1..8),
        ) {
            for snapshot in run(steps, &actions) {
                let open: std::collections::BTreeSet<_> = snapshot
                    .actionable_reviews()
                    .iter()
                    .filter_map(|r| r.step_index)
                    .collect();
                prop_assert!(open.len() <= 1);
            }
        }
    }
}
