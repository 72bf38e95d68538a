//! Budget ledger.
//!
//! The ledger derives a fund's remaining budget from the records themselves:
//!
//! ```text
//! remaining = total_budget - paid - committed
//! ```
//!
//! where `committed` sums requests currently `Approved` (approved, not yet
//! paid) and `paid` sums disbursements. The stored `Fund::remaining_budget`
//! is only a display cache; enforcement always uses the computed value.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::model::{BudgetEnforcement, Disbursement, Fund, FundRequest, RequestStatus};

/// Committed and paid totals of one fund at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetTotals {
    pub total_budget: Decimal,
    pub committed: Decimal,
    pub paid: Decimal,
}

impl BudgetTotals {
    /// Sum the fund's approved-unpaid requests and its disbursements.
    ///
    /// Records belonging to other funds are ignored.
    pub fn from_records(
        fund: &Fund,
        requests: &[FundRequest],
        disbursements: &[Disbursement],
    ) -> Self {
        let committed = requests
            .iter()
            .filter(|r| r.fund_id == fund.id && r.status == RequestStatus::Approved)
            .map(|r| r.requested_amount)
            .sum();
        let paid = disbursements
            .iter()
            .filter(|d| d.fund_id == fund.id)
            .map(|d| d.amount)
            .sum();
        Self {
            total_budget: fund.total_budget,
            committed,
            paid,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.total_budget - self.paid - self.committed
    }

    /// Value the fund's display counter should hold.
    pub fn unpaid_balance(&self) -> Decimal {
        self.total_budget - self.paid
    }
}

/// Outcome of checking an amount against a fund's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub totals: BudgetTotals,
    pub remaining: Decimal,
    pub requested: Decimal,
    pub would_exceed: bool,
}

pub fn check_budget(totals: BudgetTotals, requested: Decimal) -> BudgetCheck {
    let remaining = totals.remaining();
    BudgetCheck {
        totals,
        remaining,
        requested,
        would_exceed: remaining < requested,
    }
}

/// What an approval may do given the fund's enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    /// Within budget, or enforcement is off.
    Proceed,
    /// Warn mode shortfall that the caller explicitly confirmed.
    ProceedWithOverride(BudgetCheck),
    /// Warn mode shortfall awaiting the caller's confirmation.
    ConfirmationRequired(BudgetCheck),
}

/// Apply `mode` to an approval of `check.requested`.
///
/// Block mode rejects a shortfall outright; warn mode asks for confirmation
/// and proceeds once given; `none` never checks.
pub fn enforce(
    mode: BudgetEnforcement,
    check: BudgetCheck,
    confirmed: bool,
) -> Result<BudgetVerdict, WorkflowError> {
    match mode {
        BudgetEnforcement::None => Ok(BudgetVerdict::Proceed),
        _ if !check.would_exceed => Ok(BudgetVerdict::Proceed),
        BudgetEnforcement::Block => Err(WorkflowError::BudgetExceeded {
            remaining: check.remaining,
            requested: check.requested,
        }),
        BudgetEnforcement::Warn if confirmed => Ok(BudgetVerdict::ProceedWithOverride(check)),
        BudgetEnforcement::Warn => Ok(BudgetVerdict::ConfirmationRequired(check)),
    }
}
