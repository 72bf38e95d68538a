//! Submitted / In Review transitions: recording reviewer decisions.

use serde_json::json;

use fundflow_core::{
    check_budget, enforce, AuditAction, BudgetVerdict, Decision, Permission, PlannedStep,
    RequestStatus, Review, ReviewId, TemplateKey, WorkflowError,
};

use super::{reject, Changes, Transition};
use crate::state_machine::effect::LogLevel;
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestSnapshot, TransitionContext};

/// Handle transitions while the request awaits reviewer decisions.
pub fn handle(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    event: Event,
) -> Result<Transition, WorkflowError> {
    match event {
        Event::Decide {
            review_id,
            decision,
            comments,
            confirm_budget_override,
        } => decide(
            snapshot,
            ctx,
            review_id,
            decision,
            normalize(comments),
            confirm_budget_override,
        ),
        other => reject(snapshot, &other),
    }
}

fn normalize(comments: Option<String>) -> Option<String> {
    comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn decide(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    review_id: ReviewId,
    decision: Decision,
    comments: Option<String>,
    confirm_budget_override: bool,
) -> Result<Transition, WorkflowError> {
    let request = &snapshot.request;
    let review = snapshot.find_review(review_id).ok_or_else(|| {
        WorkflowError::validation(format!(
            "review {} does not belong to request {}",
            review_id, request.request_number
        ))
    })?;

    if !snapshot.is_actionable(review) {
        // Already resolved, or superseded by a later round.
        return Err(WorkflowError::invalid_transition(request.status, "decide on"));
    }

    authorize(snapshot, ctx, review)?;

    let step_index = review.step_index.ok_or_else(|| {
        WorkflowError::validation("student responses cannot be decided")
    })?;
    let step = request.routing_plan.get(step_index).ok_or_else(|| {
        WorkflowError::validation(format!(
            "routing plan of {} has no step {}",
            request.request_number, step_index
        ))
    })?;

    match decision {
        Decision::Pending => Err(WorkflowError::validation(
            "decision must be Approved, Denied or Needs Info",
        )),
        Decision::Approved => approve(snapshot, ctx, review, step, step_index, comments, confirm_budget_override),
        Decision::Denied => {
            if step.permission == Permission::RecommendOnly {
                return Err(WorkflowError::unauthorized(format!(
                    "step '{}' may only recommend, not deny",
                    step.step_name
                )));
            }
            deny(snapshot, ctx, review, step, comments)
        }
        Decision::NeedsInfo => {
            let Some(question) = comments else {
                return Err(WorkflowError::validation(
                    "comments are required when requesting information",
                ));
            };
            request_info(snapshot, ctx, review, step, question)
        }
    }
}

/// The assigned reviewer, an admin, or the fund's owner may decide. Never the
/// student who filed the request.
fn authorize(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    review: &Review,
) -> Result<(), WorkflowError> {
    let actor = &ctx.actor;
    if snapshot.request.is_student(actor) {
        return Err(WorkflowError::unauthorized(
            "students cannot review their own request",
        ));
    }
    if !actor.is_staff() {
        return Err(WorkflowError::unauthorized("only staff may review requests"));
    }
    if review.reviewer.matches(actor) || actor.is_admin() || ctx.fund.is_owned_by(actor) {
        Ok(())
    } else {
        Err(WorkflowError::unauthorized(format!(
            "{} is not assigned to step '{}'",
            actor.name, review.step_name
        )))
    }
}

fn approve(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    review: &Review,
    step: &PlannedStep,
    step_index: usize,
    comments: Option<String>,
    confirm_budget_override: bool,
) -> Result<Transition, WorkflowError> {
    let request = &snapshot.request;

    // Budget can be consumed by other approvals while this request waits, so
    // every approval checks against the totals read under the fund lock.
    let check = check_budget(ctx.budget, request.requested_amount);
    let verdict = enforce(ctx.fund.budget_enforcement, check, confirm_budget_override)?;
    if let BudgetVerdict::ConfirmationRequired(check) = verdict {
        return Ok(Transition::NeedsBudgetConfirmation(check));
    }

    let mut tx = Changes::new(snapshot, ctx);
    tx.resolve(review, Decision::Approved, comments);

    if let BudgetVerdict::ProceedWithOverride(check) = verdict {
        tx.audit(
            AuditAction::BudgetOverrideConfirmed,
            json!({
                "remaining": check.remaining,
                "requested": check.requested,
                "step_name": step.step_name,
            }),
        );
        tx.log(
            LogLevel::Warn,
            format!(
                "{} approved over budget: {} requested, {} remaining",
                request.request_number, check.requested, check.remaining
            ),
        );
    }

    if request.is_last_step(step_index) {
        {
            let r = tx.request_mut();
            r.status = RequestStatus::Approved;
            r.locked = true;
            r.active_step = None;
            r.current_step = None;
        }
        tx.audit(
            AuditAction::RequestApproved,
            json!({
                "step_name": step.step_name,
                "amount": request.requested_amount,
            }),
        );
        tx.notify_student(TemplateKey::RequestApproved, json!({}));
        tx.log(
            LogLevel::Info,
            format!("{} approved at '{}'", request.request_number, step.step_name),
        );
    } else {
        {
            let r = tx.request_mut();
            r.status = RequestStatus::InReview;
            r.locked = false;
        }
        tx.open_step(step_index + 1)?;
        let next = tx.request().current_step.clone();
        tx.audit(
            AuditAction::StepApproved,
            json!({
                "step_name": step.step_name,
                "step_index": step_index,
                "next_step": next,
            }),
        );
    }
    tx.finish()
}

fn deny(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    review: &Review,
    step: &PlannedStep,
    comments: Option<String>,
) -> Result<Transition, WorkflowError> {
    let mut tx = Changes::new(snapshot, ctx);
    tx.resolve(review, Decision::Denied, comments.clone());
    {
        let r = tx.request_mut();
        r.status = RequestStatus::Denied;
        r.locked = true;
        r.active_step = None;
        r.current_step = None;
    }
    tx.audit(
        AuditAction::RequestDenied,
        json!({
            "step_name": step.step_name,
            "comments": comments,
        }),
    );
    tx.notify_student(TemplateKey::RequestDenied, json!({ "comments": comments }));
    tx.log(
        LogLevel::Info,
        format!(
            "{} denied at '{}'",
            snapshot.request.request_number, step.step_name
        ),
    );
    tx.finish()
}

fn request_info(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    review: &Review,
    step: &PlannedStep,
    question: String,
) -> Result<Transition, WorkflowError> {
    let mut tx = Changes::new(snapshot, ctx);
    tx.resolve(review, Decision::NeedsInfo, Some(question.clone()));
    {
        let r = tx.request_mut();
        r.status = RequestStatus::NeedsInfo;
        r.locked = false;
    }
    tx.audit(
        AuditAction::InfoRequested,
        json!({
            "step_name": step.step_name,
            "question": question,
        }),
    );
    tx.notify_student(
        TemplateKey::InfoRequested,
        json!({
            "step_name": step.step_name,
            "question": question,
            "reviewer_name": ctx.actor.name,
        }),
    );
    tx.finish()
}
