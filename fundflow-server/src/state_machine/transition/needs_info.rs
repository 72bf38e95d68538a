//! Needs Info transitions: the student's reply.

use serde_json::json;

use fundflow_core::{
    Attachment, AuditAction, RequestStatus, ReviewerRef, TemplateKey, WorkflowError,
    STUDENT_RESPONSE_STEP_NAME,
};

use super::{reject, Changes, Transition};
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestSnapshot, TransitionContext};

/// Handle transitions from Needs Info.
///
/// The request stays on the same step. Answering re-opens a review for the
/// reviewer who asked, and only that reviewer's review is actionable.
pub fn handle(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    event: Event,
) -> Result<Transition, WorkflowError> {
    match event {
        Event::RespondToInfoRequest {
            message,
            attachments,
        } => respond(snapshot, ctx, message, attachments),
        other => reject(snapshot, &other),
    }
}

fn respond(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    message: String,
    attachments: Vec<Attachment>,
) -> Result<Transition, WorkflowError> {
    let request = &snapshot.request;
    if !request.is_student(&ctx.actor) {
        return Err(WorkflowError::unauthorized(
            "only the requesting student may respond to an information request",
        ));
    }
    let message = message.trim().to_string();
    if message.is_empty() && attachments.is_empty() {
        return Err(WorkflowError::validation(
            "a response needs a message or an attachment",
        ));
    }

    let step_index = request.active_step.ok_or_else(|| {
        WorkflowError::validation(format!("{} has no active step", request.request_number))
    })?;
    let step = request.routing_plan.get(step_index).cloned().ok_or_else(|| {
        WorkflowError::validation(format!(
            "routing plan of {} has no step {}",
            request.request_number, step_index
        ))
    })?;

    // Re-address the step to whoever asked; fall back to the step's own
    // reviewers if the asking review carries no decider.
    let reviewers = match snapshot.info_requester() {
        Some((user_id, _)) => vec![ReviewerRef::User {
            user_id: user_id.clone(),
        }],
        None => step.reviewers(),
    };

    let mut tx = Changes::new(snapshot, ctx);
    let attachment_count = attachments.len();
    {
        let r = tx.request_mut();
        r.attachments.extend(attachments);
        r.status = RequestStatus::InReview;
        r.locked = false;
        r.review_round += 1;
    }

    tx.add_review(
        None,
        STUDENT_RESPONSE_STEP_NAME,
        ReviewerRef::User {
            user_id: request.student.user_id.clone(),
        },
        Some(message),
    );
    for reviewer in reviewers {
        tx.add_review(Some(step_index), &step.step_name, reviewer.clone(), None);
        tx.notify(
            (&reviewer).into(),
            TemplateKey::ReviewAssigned,
            json!({ "step_name": step.step_name, "student_responded": true }),
        );
    }

    tx.audit(
        AuditAction::StudentResponded,
        json!({
            "step_name": step.step_name,
            "attachments_added": attachment_count,
        }),
    );
    tx.finish()
}
