//! # Transfer
//!
//! Inter-store stock movement.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DRAFT ──DISPATCH──► DISPATCHED ──RECEIVE──► RECEIVED                   │
//! │    │                     │   └──RECEIVE (partial)──► PARTIAL_RECEIVED   │
//! │    │                     └──REPORT_SHORTAGES──────► PARTIAL_RECEIVED    │
//! │    └──CANCEL──► CANCELLED                                               │
//! │                                                                         │
//! │  PARTIAL_RECEIVED ──RECEIVE / REPORT_SHORTAGES / RESOLVE_SHORTAGES──►   │
//! │                     PARTIAL_RECEIVED | RECEIVED                         │
//! │                                                                         │
//! │  Per line, at all times:                                                │
//! │    dispatched == received + outstanding + lost                          │
//! │    0 ≤ shortage ≤ outstanding                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dispatch debits the origin (EPCs go IN_TRANSIT). Receive and
//! FOUND_AND_RESEND credit the destination. LOST_IN_ROUTE takes the
//! quantity out of the ledger for good and needs an elevated role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use super::{Effect, StateMachine, Transition};
use crate::error::{CoreError, CoreResult, ReasonCode, ValidationError};
use crate::types::{Disposition, EntityType, Role, StockOp, StockSelector, UnitRef};
use crate::validation::{validate_epc, validate_pool, validate_quantity, validate_sku, validate_store_id};

// =============================================================================
// States & Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Draft,
    Dispatched,
    PartialReceived,
    Received,
    Cancelled,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::Draft => "DRAFT",
            TransferStatus::Dispatched => "DISPATCHED",
            TransferStatus::PartialReceived => "PARTIAL_RECEIVED",
            TransferStatus::Received => "RECEIVED",
            TransferStatus::Cancelled => "CANCELLED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Dispatch,
    Receive,
    ReportShortages,
    ResolveShortages,
    Cancel,
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferAction::Dispatch => "DISPATCH",
            TransferAction::Receive => "RECEIVE",
            TransferAction::ReportShortages => "REPORT_SHORTAGES",
            TransferAction::ResolveShortages => "RESOLVE_SHORTAGES",
            TransferAction::Cancel => "CANCEL",
        })
    }
}

pub struct TransferMachine;

impl StateMachine for TransferMachine {
    type State = TransferStatus;
    type Action = TransferAction;

    const ENTITY: EntityType = EntityType::Transfer;

    fn allows(state: TransferStatus, action: TransferAction) -> bool {
        use TransferAction as A;
        use TransferStatus as S;
        matches!(
            (state, action),
            (S::Draft, A::Dispatch)
                | (S::Draft, A::Cancel)
                | (S::Dispatched, A::Receive)
                | (S::Dispatched, A::ReportShortages)
                | (S::PartialReceived, A::Receive)
                | (S::PartialReceived, A::ReportShortages)
                | (S::PartialReceived, A::ResolveShortages)
        )
    }
}

// =============================================================================
// Entity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferLine {
    pub id: String,
    pub line_no: i64,
    pub unit: UnitRef,
    pub qty: i64,
    pub dispatched_qty: i64,
    pub received_qty: i64,
    /// Dispatched but neither received nor written off. Only decreases.
    pub outstanding_qty: i64,
    /// Part of `outstanding_qty` reported missing at the destination.
    pub shortage_qty: i64,
    pub lost_qty: i64,
}

impl TransferLine {
    /// Quantity that may still be received normally.
    pub fn receivable(&self) -> i64 {
        self.outstanding_qty - self.shortage_qty
    }

    pub fn is_conserved(&self) -> bool {
        self.dispatched_qty == self.received_qty + self.outstanding_qty + self.lost_qty
            && self.outstanding_qty >= 0
            && self.shortage_qty >= 0
            && self.shortage_qty <= self.outstanding_qty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Transfer {
    pub id: String,
    pub tenant_id: String,
    pub origin_store_id: String,
    pub destination_store_id: String,
    pub pool: String,
    pub status: TransferStatus,
    pub lines: Vec<TransferLine>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// First line breaking conservation, if any.
    pub fn conservation_violation(&self) -> Option<&TransferLine> {
        self.lines.iter().find(|l| !l.is_conserved())
    }

    fn line_mut(&mut self, line_id: &str) -> CoreResult<&mut TransferLine> {
        self.lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| {
                CoreError::rule(
                    ReasonCode::UnknownLine,
                    format!("line {} is not part of this transfer", line_id),
                )
            })
    }

    fn derive_status(&self) -> TransferStatus {
        if self.lines.iter().all(|l| l.outstanding_qty == 0) {
            TransferStatus::Received
        } else if self
            .lines
            .iter()
            .any(|l| l.received_qty > 0 || l.shortage_qty > 0 || l.lost_qty > 0)
        {
            TransferStatus::PartialReceived
        } else {
            TransferStatus::Dispatched
        }
    }

    fn settle_status(&mut self, now: DateTime<Utc>) {
        self.status = self.derive_status();
        if self.status == TransferStatus::Received {
            self.completed_at = Some(now);
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewTransferLine {
    pub unit: UnitRef,
    pub qty: i64,
}

#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub id: String,
    pub tenant_id: String,
    pub origin_store_id: String,
    pub destination_store_id: String,
    pub pool: String,
    pub lines: Vec<NewTransferLine>,
    pub now: DateTime<Utc>,
}

/// A quantity against one line (receive, report shortage).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineQty {
    pub line_id: String,
    pub qty: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShortageResolution {
    FoundAndResend,
    LostInRoute,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ResolveShortage {
    pub line_id: String,
    pub qty: i64,
    pub resolution: ShortageResolution,
}

// =============================================================================
// Transitions
// =============================================================================

/// none → DRAFT.
pub fn create(req: NewTransfer) -> CoreResult<Transfer> {
    validate_store_id("origin_store_id", &req.origin_store_id)?;
    validate_store_id("destination_store_id", &req.destination_store_id)?;
    validate_pool(&req.pool)?;
    if req.origin_store_id == req.destination_store_id {
        return Err(CoreError::rule(
            ReasonCode::SameStore,
            "origin and destination store must differ",
        ));
    }
    if req.lines.is_empty() {
        return Err(CoreError::rule(
            ReasonCode::EmptyLines,
            "a transfer needs at least one line",
        ));
    }

    let mut lines = Vec::with_capacity(req.lines.len());
    for (idx, line) in req.lines.into_iter().enumerate() {
        match &line.unit {
            UnitRef::Epc(epc) => {
                validate_epc(epc)?;
                if line.qty != 1 {
                    return Err(ValidationError::OutOfRange {
                        field: "qty".to_string(),
                        min: 1,
                        max: 1,
                    }
                    .into());
                }
            }
            UnitRef::Sku(sku) => {
                validate_sku(sku)?;
                validate_quantity(line.qty)?;
            }
        }
        if lines.iter().any(|l: &TransferLine| l.unit == line.unit) {
            return Err(CoreError::rule(
                ReasonCode::DuplicateUnit,
                format!("{} appears on more than one line", line.unit),
            ));
        }
        let line_no = idx as i64 + 1;
        lines.push(TransferLine {
            id: format!("{}-{}", req.id, line_no),
            line_no,
            unit: line.unit,
            qty: line.qty,
            dispatched_qty: 0,
            received_qty: 0,
            outstanding_qty: 0,
            shortage_qty: 0,
            lost_qty: 0,
        });
    }

    Ok(Transfer {
        id: req.id,
        tenant_id: req.tenant_id,
        origin_store_id: req.origin_store_id,
        destination_store_id: req.destination_store_id,
        pool: req.pool,
        status: TransferStatus::Draft,
        lines,
        created_at: req.now,
        dispatched_at: None,
        completed_at: None,
    })
}

/// DRAFT → DISPATCHED. Debits every line at the origin.
pub fn dispatch(transfer: &Transfer, now: DateTime<Utc>) -> CoreResult<Transition<Transfer>> {
    TransferMachine::ensure(transfer.status, TransferAction::Dispatch)?;

    let mut after = transfer.clone();
    let mut effects = Vec::with_capacity(after.lines.len());
    for line in &mut after.lines {
        line.dispatched_qty = line.qty;
        line.outstanding_qty = line.qty;
        effects.push(Effect::Stock(StockOp::Debit {
            selector: StockSelector {
                unit: line.unit.clone(),
                location_id: transfer.origin_store_id.clone(),
                pool: transfer.pool.clone(),
            },
            qty: line.qty,
            disposition: Disposition::InTransit,
        }));
    }
    after.status = TransferStatus::Dispatched;
    after.dispatched_at = Some(now);

    Ok(Transition::new(transfer.clone(), after).with_effects(effects))
}

/// Credits the destination per line; partial receipts allowed.
pub fn receive(
    transfer: &Transfer,
    items: &[LineQty],
    now: DateTime<Utc>,
) -> CoreResult<Transition<Transfer>> {
    TransferMachine::ensure(transfer.status, TransferAction::Receive)?;
    require_items(items.len())?;

    let mut after = transfer.clone();
    let mut effects = Vec::with_capacity(items.len());
    for item in items {
        validate_quantity(item.qty)?;
        let line = after.line_mut(&item.line_id)?;
        if item.qty > line.receivable() {
            return Err(CoreError::rule(
                ReasonCode::ExceedsOutstanding,
                format!(
                    "line {}: receive qty {} exceeds outstanding {}",
                    line.line_no,
                    item.qty,
                    line.receivable()
                ),
            ));
        }
        line.received_qty += item.qty;
        line.outstanding_qty -= item.qty;
        effects.push(credit_destination(transfer, &line.unit, item.qty));
    }
    after.settle_status(now);

    Ok(Transition::new(transfer.clone(), after).with_effects(effects))
}

/// Marks part of the outstanding quantity as missing on arrival.
pub fn report_shortages(
    transfer: &Transfer,
    items: &[LineQty],
    now: DateTime<Utc>,
) -> CoreResult<Transition<Transfer>> {
    TransferMachine::ensure(transfer.status, TransferAction::ReportShortages)?;
    require_items(items.len())?;

    let mut after = transfer.clone();
    for item in items {
        validate_quantity(item.qty)?;
        let line = after.line_mut(&item.line_id)?;
        if item.qty > line.receivable() {
            return Err(CoreError::rule(
                ReasonCode::ExceedsOutstanding,
                format!(
                    "line {}: shortage qty {} exceeds outstanding {}",
                    line.line_no,
                    item.qty,
                    line.receivable()
                ),
            ));
        }
        line.shortage_qty += item.qty;
    }
    after.settle_status(now);

    Ok(Transition::new(transfer.clone(), after))
}

/// Resolves reported shortages: found and resent, or lost in route.
pub fn resolve_shortages(
    transfer: &Transfer,
    items: &[ResolveShortage],
    role: Role,
    now: DateTime<Utc>,
) -> CoreResult<Transition<Transfer>> {
    TransferMachine::ensure(transfer.status, TransferAction::ResolveShortages)?;
    require_items(items.len())?;
    if !role.is_elevated()
        && items
            .iter()
            .any(|i| i.resolution == ShortageResolution::LostInRoute)
    {
        return Err(CoreError::rule(
            ReasonCode::ElevatedRoleRequired,
            "LOST_IN_ROUTE requires MANAGER or ADMIN",
        ));
    }

    let mut after = transfer.clone();
    let mut effects = Vec::new();
    for item in items {
        validate_quantity(item.qty)?;
        let line = after.line_mut(&item.line_id)?;
        if item.qty > line.shortage_qty {
            return Err(CoreError::rule(
                ReasonCode::ExceedsShortage,
                format!(
                    "line {}: resolve qty {} exceeds reported shortage {}",
                    line.line_no, item.qty, line.shortage_qty
                ),
            ));
        }
        line.shortage_qty -= item.qty;
        line.outstanding_qty -= item.qty;
        match item.resolution {
            ShortageResolution::FoundAndResend => {
                line.received_qty += item.qty;
                effects.push(credit_destination(transfer, &line.unit, item.qty));
            }
            ShortageResolution::LostInRoute => {
                line.lost_qty += item.qty;
                // bucket quantity already left the origin total on dispatch
                if let UnitRef::Epc(epc) = &line.unit {
                    effects.push(Effect::Stock(StockOp::WriteOff { epc: epc.clone() }));
                }
            }
        }
    }
    after.settle_status(now);

    Ok(Transition::new(transfer.clone(), after).with_effects(effects))
}

/// DRAFT → CANCELLED. Nothing was debited yet, so there are no effects.
pub fn cancel(transfer: &Transfer) -> CoreResult<Transition<Transfer>> {
    TransferMachine::ensure(transfer.status, TransferAction::Cancel)?;
    let mut after = transfer.clone();
    after.status = TransferStatus::Cancelled;
    Ok(Transition::new(transfer.clone(), after))
}

fn require_items(len: usize) -> CoreResult<()> {
    if len == 0 {
        return Err(CoreError::rule(
            ReasonCode::EmptyLines,
            "at least one line quantity is required",
        ));
    }
    Ok(())
}

fn credit_destination(transfer: &Transfer, unit: &UnitRef, qty: i64) -> Effect {
    Effect::Stock(StockOp::Credit {
        selector: StockSelector {
            unit: unit.clone(),
            location_id: transfer.destination_store_id.clone(),
            pool: transfer.pool.clone(),
        },
        qty,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_POOL;

    const EPC: &str = "E2801160600002089C4A2B1F";

    fn draft(lines: Vec<NewTransferLine>) -> Transfer {
        create(NewTransfer {
            id: "tr-1".to_string(),
            tenant_id: "t-1".to_string(),
            origin_store_id: "s-a".to_string(),
            destination_store_id: "s-b".to_string(),
            pool: DEFAULT_POOL.to_string(),
            lines,
            now: Utc::now(),
        })
        .unwrap()
    }

    fn epc_line() -> NewTransferLine {
        NewTransferLine {
            unit: UnitRef::Epc(EPC.to_string()),
            qty: 1,
        }
    }

    fn sku_line(qty: i64) -> NewTransferLine {
        NewTransferLine {
            unit: UnitRef::Sku("SOCK-01".to_string()),
            qty,
        }
    }

    fn lq(line_id: &str, qty: i64) -> LineQty {
        LineQty {
            line_id: line_id.to_string(),
            qty,
        }
    }

    #[test]
    fn test_same_store_rejected() {
        let err = create(NewTransfer {
            id: "tr".to_string(),
            tenant_id: "t".to_string(),
            origin_store_id: "s-a".to_string(),
            destination_store_id: "s-a".to_string(),
            pool: DEFAULT_POOL.to_string(),
            lines: vec![sku_line(1)],
            now: Utc::now(),
        })
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::SameStore);
    }

    #[test]
    fn test_epc_line_must_be_qty_one() {
        let err = create(NewTransfer {
            id: "tr".to_string(),
            tenant_id: "t".to_string(),
            origin_store_id: "s-a".to_string(),
            destination_store_id: "s-b".to_string(),
            pool: DEFAULT_POOL.to_string(),
            lines: vec![NewTransferLine {
                unit: UnitRef::Epc(EPC.to_string()),
                qty: 2,
            }],
            now: Utc::now(),
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_dispatch_debits_origin_in_transit() {
        let t = draft(vec![epc_line(), sku_line(5)]);
        let tr = dispatch(&t, Utc::now()).unwrap();
        assert_eq!(tr.after.status, TransferStatus::Dispatched);
        let ops: Vec<_> = tr.stock_ops().collect();
        assert_eq!(ops.len(), 2);
        assert!(matches!(
            ops[0],
            StockOp::Debit { selector, qty: 1, disposition: Disposition::InTransit }
                if selector.location_id == "s-a"
        ));
        assert!(tr.after.lines.iter().all(|l| l.is_conserved()));
    }

    #[test]
    fn test_receive_before_dispatch_is_state_error() {
        let t = draft(vec![epc_line()]);
        let err = receive(&t, &[lq("tr-1-1", 1)], Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "TRANSFER in state DRAFT cannot perform RECEIVE");
    }

    #[test]
    fn test_cancel_after_dispatch_is_state_error() {
        let t = dispatch(&draft(vec![epc_line()]), Utc::now()).unwrap().after;
        let err = cancel(&t).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TRANSFER in state DISPATCHED cannot perform CANCEL"
        );
        assert!(cancel(&draft(vec![epc_line()])).is_ok());
    }

    #[test]
    fn test_epc_receive_two_rejected_then_one_completes() {
        let t = dispatch(&draft(vec![epc_line()]), Utc::now()).unwrap().after;

        let err = receive(&t, &[lq("tr-1-1", 2)], Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ExceedsOutstanding);

        let tr = receive(&t, &[lq("tr-1-1", 1)], Utc::now()).unwrap();
        assert_eq!(tr.after.status, TransferStatus::Received);
        assert!(tr.after.completed_at.is_some());
        assert!(matches!(
            tr.stock_ops().next(),
            Some(StockOp::Credit { selector, qty: 1 }) if selector.location_id == "s-b"
        ));
    }

    #[test]
    fn test_partial_receive_and_shortage_resolution() {
        let t = dispatch(&draft(vec![sku_line(10)]), Utc::now()).unwrap().after;

        let t = receive(&t, &[lq("tr-1-1", 6)], Utc::now()).unwrap().after;
        assert_eq!(t.status, TransferStatus::PartialReceived);
        assert_eq!(t.lines[0].outstanding_qty, 4);

        let t = report_shortages(&t, &[lq("tr-1-1", 3)], Utc::now()).unwrap().after;
        assert_eq!(t.lines[0].receivable(), 1);

        // shortage is hidden from normal receiving
        let err = receive(&t, &[lq("tr-1-1", 2)], Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ExceedsOutstanding);

        let found = ResolveShortage {
            line_id: "tr-1-1".to_string(),
            qty: 1,
            resolution: ShortageResolution::FoundAndResend,
        };
        let tr = resolve_shortages(&t, &[found], Role::Cashier, Utc::now()).unwrap();
        assert_eq!(tr.effects.len(), 1);
        let t = tr.after;
        assert_eq!(t.lines[0].received_qty, 7);

        let lost = ResolveShortage {
            line_id: "tr-1-1".to_string(),
            qty: 2,
            resolution: ShortageResolution::LostInRoute,
        };
        let err = resolve_shortages(&t, &[lost.clone()], Role::Cashier, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ElevatedRoleRequired);

        let tr = resolve_shortages(&t, &[lost], Role::Manager, Utc::now()).unwrap();
        assert!(tr.effects.is_empty());
        let t = tr.after;
        assert_eq!(t.lines[0].lost_qty, 2);
        assert_eq!(t.lines[0].outstanding_qty, 1);
        assert_eq!(t.status, TransferStatus::PartialReceived);
        assert!(t.conservation_violation().is_none());

        let t = receive(&t, &[lq("tr-1-1", 1)], Utc::now()).unwrap().after;
        assert_eq!(t.status, TransferStatus::Received);
        let line = &t.lines[0];
        assert_eq!(line.dispatched_qty, line.received_qty + line.outstanding_qty + line.lost_qty);
    }

    #[test]
    fn test_lost_epc_is_written_off() {
        let t = dispatch(&draft(vec![epc_line()]), Utc::now()).unwrap().after;
        let t = report_shortages(&t, &[lq("tr-1-1", 1)], Utc::now()).unwrap().after;
        assert_eq!(t.status, TransferStatus::PartialReceived);
        let tr = resolve_shortages(
            &t,
            &[ResolveShortage {
                line_id: "tr-1-1".to_string(),
                qty: 1,
                resolution: ShortageResolution::LostInRoute,
            }],
            Role::Admin,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tr.after.status, TransferStatus::Received);
        assert!(matches!(tr.stock_ops().next(), Some(StockOp::WriteOff { epc }) if epc == EPC));
    }

    #[test]
    fn test_resolve_more_than_shortage_rejected() {
        let t = dispatch(&draft(vec![sku_line(4)]), Utc::now()).unwrap().after;
        let t = report_shortages(&t, &[lq("tr-1-1", 1)], Utc::now()).unwrap().after;
        let err = resolve_shortages(
            &t,
            &[ResolveShortage {
                line_id: "tr-1-1".to_string(),
                qty: 2,
                resolution: ShortageResolution::FoundAndResend,
            }],
            Role::Manager,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ExceedsShortage);
    }

    #[test]
    fn test_unknown_line_rejected() {
        let t = dispatch(&draft(vec![sku_line(2)]), Utc::now()).unwrap().after;
        let err = receive(&t, &[lq("nope", 1)], Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::UnknownLine);
    }
}
