//! # PosCashSession
//!
//! A cashier's drawer at one store: OPEN → CLOSED.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OPEN ──CASH_IN / CASH_OUT / SALE_SETTLEMENT / REFUND──► OPEN           │
//! │  OPEN ──CLOSE(counted)──► CLOSED   difference = counted − expected      │
//! │  CLOSED ──anything──► rejected                                          │
//! │                                                                         │
//! │  expected_cash = opening + Σ in − Σ out + Σ settlements − Σ refunds     │
//! │  and is never allowed below zero.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "One OPEN session per store and cashier" is a uniqueness rule and lives
//! in the database as a partial unique index.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use super::{StateMachine, Transition};
use crate::error::{CoreError, CoreResult, ReasonCode};
use crate::money::Money;
use crate::types::EntityType;
use crate::validation::{validate_non_negative_amount, validate_positive_amount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashSessionStatus {
    Open,
    Closed,
}

impl fmt::Display for CashSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CashSessionStatus::Open => "OPEN",
            CashSessionStatus::Closed => "CLOSED",
        })
    }
}

/// Kind of drawer movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    CashIn,
    CashOut,
    SaleSettlement,
    Refund,
}

impl MovementKind {
    /// Signed effect on `expected_cash`.
    pub fn signed(&self, amount: Money) -> Money {
        match self {
            MovementKind::CashIn | MovementKind::SaleSettlement => amount,
            MovementKind::CashOut | MovementKind::Refund => -amount,
        }
    }

    pub const fn action(&self) -> CashSessionAction {
        match self {
            MovementKind::CashIn => CashSessionAction::CashIn,
            MovementKind::CashOut => CashSessionAction::CashOut,
            MovementKind::SaleSettlement => CashSessionAction::SaleSettlement,
            MovementKind::Refund => CashSessionAction::Refund,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashSessionAction {
    CashIn,
    CashOut,
    SaleSettlement,
    Refund,
    Close,
}

impl fmt::Display for CashSessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CashSessionAction::CashIn => "CASH_IN",
            CashSessionAction::CashOut => "CASH_OUT",
            CashSessionAction::SaleSettlement => "SALE_SETTLEMENT",
            CashSessionAction::Refund => "REFUND",
            CashSessionAction::Close => "CLOSE",
        })
    }
}

pub struct CashSessionMachine;

impl StateMachine for CashSessionMachine {
    type State = CashSessionStatus;
    type Action = CashSessionAction;

    const ENTITY: EntityType = EntityType::PosCashSession;

    fn allows(state: CashSessionStatus, _action: CashSessionAction) -> bool {
        // every action is an OPEN-only action; CLOSED is terminal
        state == CashSessionStatus::Open
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashSession {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub status: CashSessionStatus,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub opening_amount: Money,
    pub expected_cash: Money,
    pub counted_cash: Option<Money>,
    pub difference: Option<Money>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Closed by a forced day close rather than by the cashier.
    pub closed_by_day_close: bool,
}

/// Payload of the OPEN action.
#[derive(Debug, Clone)]
pub struct OpenSession {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub opening_amount: Money,
    pub business_date: NaiveDate,
    pub now: DateTime<Utc>,
}

/// none → OPEN.
pub fn open(req: OpenSession) -> CoreResult<CashSession> {
    validate_non_negative_amount("opening_amount", req.opening_amount)?;
    Ok(CashSession {
        id: req.id,
        tenant_id: req.tenant_id,
        store_id: req.store_id,
        cashier_id: req.cashier_id,
        status: CashSessionStatus::Open,
        business_date: req.business_date,
        opening_amount: req.opening_amount,
        expected_cash: req.opening_amount,
        counted_cash: None,
        difference: None,
        opened_at: req.now,
        closed_at: None,
        closed_by_day_close: false,
    })
}

/// OPEN → OPEN with `expected_cash` moved by the signed amount.
pub fn apply_movement(
    session: &CashSession,
    kind: MovementKind,
    amount: Money,
) -> CoreResult<Transition<CashSession>> {
    CashSessionMachine::ensure(session.status, kind.action())?;
    validate_positive_amount("amount", amount)?;

    let expected = session.expected_cash + kind.signed(amount);
    if expected.is_negative() {
        return Err(CoreError::rule(
            ReasonCode::NegativeCash,
            format!(
                "{} of {} would leave expected cash at {}",
                kind.action(),
                amount,
                expected
            ),
        ));
    }

    let mut after = session.clone();
    after.expected_cash = expected;
    Ok(Transition::new(session.clone(), after))
}

/// OPEN → CLOSED.
pub fn close(
    session: &CashSession,
    counted_cash: Money,
    now: DateTime<Utc>,
) -> CoreResult<Transition<CashSession>> {
    CashSessionMachine::ensure(session.status, CashSessionAction::Close)?;
    validate_non_negative_amount("counted_cash", counted_cash)?;

    let mut after = session.clone();
    after.status = CashSessionStatus::Closed;
    after.counted_cash = Some(counted_cash);
    after.difference = Some(counted_cash - session.expected_cash);
    after.closed_at = Some(now);
    Ok(Transition::new(session.clone(), after))
}

/// OPEN → CLOSED on behalf of a forced day close: counted is taken to be
/// expected, so the difference is zero.
pub fn close_for_day_close(
    session: &CashSession,
    now: DateTime<Utc>,
) -> CoreResult<Transition<CashSession>> {
    let mut transition = close(session, session.expected_cash, now)?;
    transition.after.closed_by_day_close = true;
    Ok(transition)
}
