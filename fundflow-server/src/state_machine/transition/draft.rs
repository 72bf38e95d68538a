//! Draft state transitions.

use serde_json::json;

use fundflow_core::validation::{validate_draft, validate_submission};
use fundflow_core::{build_plan, compute_applicable_steps, AuditAction, WorkflowError};

use super::{reject, Changes, Transition};
use crate::state_machine::effect::LogLevel;
use crate::state_machine::event::{DraftChanges, Event};
use crate::state_machine::state::{RequestSnapshot, TransitionContext};

/// Handle transitions from Draft.
///
/// Only the request's own student may touch a draft. Reviewers cannot see
/// it, so decisions and payments are invalid here.
pub fn handle(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    event: Event,
) -> Result<Transition, WorkflowError> {
    match event {
        Event::EditDraft(changes) => {
            ensure_student(snapshot, ctx)?;
            edit(snapshot, ctx, changes)
        }
        Event::Submit => {
            ensure_student(snapshot, ctx)?;
            submit(snapshot, ctx)
        }
        other => reject(snapshot, &other),
    }
}

fn ensure_student(snapshot: &RequestSnapshot, ctx: &TransitionContext) -> Result<(), WorkflowError> {
    if snapshot.request.is_student(&ctx.actor) {
        Ok(())
    } else {
        Err(WorkflowError::unauthorized(
            "only the requesting student may change a draft",
        ))
    }
}

fn edit(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    changes: DraftChanges,
) -> Result<Transition, WorkflowError> {
    if snapshot.request.locked {
        return Err(WorkflowError::invalid_transition(
            snapshot.request.status,
            "edit",
        ));
    }

    let mut tx = Changes::new(snapshot, ctx);
    let mut changed = Vec::new();
    {
        let request = tx.request_mut();
        if let Some(amount) = changes.requested_amount {
            request.requested_amount = amount;
            changed.push("requested_amount");
        }
        if let Some(category) = changes.intended_use_category {
            request.intended_use_category = category;
            changed.push("intended_use_category");
        }
        if let Some(description) = changes.use_description {
            request.use_description = description;
            changed.push("use_description");
        }
        if let Some(justification) = changes.justification {
            request.justification = justification;
            changed.push("justification");
        }
        if let Some(phone) = changes.phone {
            request.student.phone = Some(phone);
            changed.push("phone");
        }
        if !changes.add_attachments.is_empty() {
            request.attachments.extend(changes.add_attachments);
            changed.push("attachments");
        }
    }

    validate_draft(&ctx.fund, tx.request())?;
    tx.audit(AuditAction::DraftUpdated, json!({ "fields": changed }));
    tx.finish()
}

fn submit(snapshot: &RequestSnapshot, ctx: &TransitionContext) -> Result<Transition, WorkflowError> {
    validate_submission(&ctx.fund, &snapshot.request, ctx.now.date_naive())?;

    let applicable = compute_applicable_steps(&snapshot.request, &ctx.rules);
    let plan = build_plan(&applicable);
    let step_names: Vec<_> = plan.iter().map(|s| s.step_name.clone()).collect();

    let mut tx = Changes::new(snapshot, ctx);
    {
        let request = tx.request_mut();
        request.status = fundflow_core::RequestStatus::Submitted;
        request.submitted_at = Some(ctx.now);
        request.locked = false;
        request.routing_plan = plan;
    }
    tx.open_step(0)?;

    tx.audit(
        AuditAction::RequestSubmitted,
        json!({
            "amount": snapshot.request.requested_amount,
            "category": snapshot.request.intended_use_category,
            "steps": step_names,
            "fallback": applicable.is_empty(),
        }),
    );
    tx.log(
        LogLevel::Info,
        format!(
            "{} submitted with {} review step(s)",
            snapshot.request.request_number,
            step_names.len()
        ),
    );
    tx.finish()
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::transition;
    use super::*;
    use crate::state_machine::effect::Effect;
    use fundflow_core::{
        Assignment, BudgetEnforcement, Decision, RequestStatus, ReviewerRef, Role, UserId,
        FALLBACK_STEP_NAME,
    };
    use rust_decimal::Decimal;

    #[test]
    fn test_submit_freezes_plan_and_opens_first_step() {
        let f = fund(BudgetEnforcement::None);
        let rules = vec![
            rule(&f, 2, "Finance", Assignment::Role { role: Role::FundManager }),
            rule(&f, 1, "Advisor", users(&["r1", "r2"])),
        ];
        let (snapshot, _) = submitted(&f, rules, 100);

        let request = &snapshot.request;
        assert_eq!(request.status, RequestStatus::Submitted);
        assert!(!request.locked);
        assert_eq!(request.submitted_at, Some(now()));
        assert_eq!(request.routing_plan.len(), 2);
        assert_eq!(request.routing_plan[0].step_name, "Advisor");
        assert_eq!(request.current_step.as_deref(), Some("Advisor"));
        assert_eq!(request.active_step, Some(0));

        // One pending review per listed user, all for step 0.
        assert_eq!(snapshot.reviews.len(), 2);
        assert!(snapshot
            .reviews
            .iter()
            .all(|r| r.step_index == Some(0) && r.decision == Decision::Pending));
        assert!(snapshot.reviews.iter().any(|r| r.reviewer
            == ReviewerRef::User {
                user_id: UserId::from("r2")
            }));
    }

    #[test]
    fn test_submit_without_rules_uses_staff_review() {
        let f = fund(BudgetEnforcement::None);
        let (snapshot, _) = submitted(&f, vec![], 100);
        assert_eq!(snapshot.request.routing_plan.len(), 1);
        assert_eq!(snapshot.request.routing_plan[0].step_name, FALLBACK_STEP_NAME);
        assert_eq!(snapshot.reviews[0].reviewer, ReviewerRef::StaffQueue);
    }

    #[test]
    fn test_only_student_may_submit() {
        let f = fund(BudgetEnforcement::None);
        let snapshot = RequestSnapshot::new(draft(&f, 100), vec![]);
        let err = transition(&snapshot, &ctx(&f, vec![], admin()), Event::Submit).unwrap_err();
        assert!(matches!(err, WorkflowError::Unauthorized { .. }));
    }

    #[test]
    fn test_submit_validates_request() {
        let f = fund(BudgetEnforcement::None);
        let mut request = draft(&f, 100);
        request.justification = "  ".to_string();
        let snapshot = RequestSnapshot::new(request, vec![]);
        let err = transition(&snapshot, &ctx(&f, vec![], student()), Event::Submit).unwrap_err();
        assert_eq!(err, WorkflowError::validation("justification is required"));
    }

    #[test]
    fn test_edit_updates_fields_and_audits() {
        let f = fund(BudgetEnforcement::None);
        let snapshot = RequestSnapshot::new(draft(&f, 100), vec![]);
        let changes = DraftChanges {
            requested_amount: Some(Decimal::from(150)),
            justification: Some("Rent is due".to_string()),
            ..Default::default()
        };
        let (after, result) = step(&snapshot, &ctx(&f, vec![], student()), student(), Event::EditDraft(changes));
        assert_eq!(after.request.requested_amount, Decimal::from(150));
        assert_eq!(after.request.justification, "Rent is due");
        assert_eq!(after.request.status, RequestStatus::Draft);

        let audit = result
            .effects
            .iter()
            .find_map(|e| match e {
                Effect::Audit(a) => Some(a),
                _ => None,
            })
            .unwrap();
        assert_eq!(audit.action, AuditAction::DraftUpdated);
        assert_eq!(audit.details["fields"], json!(["requested_amount", "justification"]));
    }

    #[test]
    fn test_edit_rejects_invalid_amount() {
        let f = fund(BudgetEnforcement::None);
        let snapshot = RequestSnapshot::new(draft(&f, 100), vec![]);
        let changes = DraftChanges {
            requested_amount: Some(Decimal::from(-5)),
            ..Default::default()
        };
        let err = transition(&snapshot, &ctx(&f, vec![], student()), Event::EditDraft(changes)).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[test]
    fn test_draft_rejects_decisions() {
        let f = fund(BudgetEnforcement::None);
        let snapshot = RequestSnapshot::new(draft(&f, 100), vec![]);
        let event = Event::Decide {
            review_id: fundflow_core::ReviewId::new(),
            decision: Decision::Approved,
            comments: None,
            confirm_budget_override: false,
        };
        let err = transition(&snapshot, &ctx(&f, vec![], admin()), event).unwrap_err();
        assert_eq!(err, WorkflowError::invalid_transition(RequestStatus::Draft, "approve"));
    }
}
