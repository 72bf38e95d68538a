//! Approved state transitions: recording the payment.

use rust_decimal::Decimal;
use serde_json::json;

use fundflow_core::validation::validate_payment;
use fundflow_core::{
    AuditAction, Disbursement, DisbursementId, EntityType, PaymentMethod, RequestStatus,
    TemplateKey, WorkflowError,
};

use super::{reject, terminal, Changes, Transition};
use crate::state_machine::effect::{Effect, LogLevel};
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestSnapshot, TransitionContext};

/// Handle transitions from Approved.
pub fn handle(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    event: Event,
) -> Result<Transition, WorkflowError> {
    match event {
        Event::Disburse {
            amount,
            method,
            notes,
            receipt_url,
        } => disburse(snapshot, ctx, amount, method, notes, receipt_url),
        Event::Close { reason } => terminal::close(snapshot, ctx, reason),
        other => reject(snapshot, &other),
    }
}

/// Record the one payment an approved request receives.
///
/// The disbursement id is derived from the request id alone, so a second
/// disbursement for the same request collides in the store even if the
/// status check were bypassed.
fn disburse(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    amount: Decimal,
    method: PaymentMethod,
    notes: Option<String>,
    receipt_url: Option<String>,
) -> Result<Transition, WorkflowError> {
    let actor = &ctx.actor;
    if !actor.can_manage_funds() && !ctx.fund.is_owned_by(actor) {
        return Err(WorkflowError::unauthorized(
            "only fund managers, admins or the fund owner may record payments",
        ));
    }
    validate_payment(amount)?;

    let request = &snapshot.request;
    let disbursement = Disbursement {
        id: DisbursementId::derived(request.id.as_uuid(), "disbursement"),
        request_id: request.id,
        fund_id: request.fund_id,
        amount,
        method,
        paid_at: ctx.now,
        paid_by: actor.id.clone(),
        notes,
        receipt_url,
    };

    let mut tx = Changes::new(snapshot, ctx);
    {
        let r = tx.request_mut();
        r.status = RequestStatus::Paid;
        r.locked = true;
    }
    tx.push(Effect::CreateDisbursement(disbursement.clone()));
    tx.push(Effect::DebitFund {
        fund_id: request.fund_id,
        amount,
    });

    tx.audit_entity(
        AuditAction::DisbursementRecorded,
        EntityType::Disbursement,
        disbursement.id,
        json!({
            "request_id": request.id,
            "request_number": request.request_number,
            "amount": amount,
            "approved_amount": request.requested_amount,
            "method": method,
        }),
    );
    tx.notify_student(
        TemplateKey::RequestPaid,
        json!({ "amount_paid": amount, "method": method }),
    );
    if amount != request.requested_amount {
        tx.log(
            LogLevel::Info,
            format!(
                "{} paid {} against an approved {}",
                request.request_number, amount, request.requested_amount
            ),
        );
    }
    tx.finish()
}
