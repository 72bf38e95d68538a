//! Terminal state transitions (Denied, Paid, Closed).

use serde_json::json;

use fundflow_core::{AuditAction, RequestStatus, WorkflowError};

use super::{reject, Changes, Transition};
use crate::state_machine::effect::LogLevel;
use crate::state_machine::event::Event;
use crate::state_machine::state::{RequestSnapshot, TransitionContext};

/// Handle transitions from terminal states.
///
/// Nothing but an administrative close leaves Denied or Paid, and nothing
/// leaves Closed.
pub fn handle(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    event: Event,
) -> Result<Transition, WorkflowError> {
    match event {
        Event::Close { reason } if snapshot.request.status.can_close() => {
            close(snapshot, ctx, reason)
        }
        other => reject(snapshot, &other),
    }
}

/// Archive a decided request. Admins only.
pub(super) fn close(
    snapshot: &RequestSnapshot,
    ctx: &TransitionContext,
    reason: Option<String>,
) -> Result<Transition, WorkflowError> {
    if !ctx.actor.is_admin() {
        return Err(WorkflowError::unauthorized("only admins may close requests"));
    }

    let previous = snapshot.request.status;
    let mut tx = Changes::new(snapshot, ctx);
    {
        let r = tx.request_mut();
        r.status = RequestStatus::Closed;
        r.locked = true;
        r.active_step = None;
        r.current_step = None;
    }
    tx.audit(
        AuditAction::RequestClosed,
        json!({
            "previous_status": previous,
            "reason": reason,
        }),
    );
    tx.log(
        LogLevel::Info,
        format!("{} closed from {}", snapshot.request.request_number, previous),
    );
    tx.finish()
}
