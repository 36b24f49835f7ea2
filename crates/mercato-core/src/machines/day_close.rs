//! # PosCashDayClose
//!
//! Seals one business date at one store: none → CLOSED.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CLOSE_DAY                                                              │
//! │   ├── already closed for (tenant, store, date)  → DAY_ALREADY_CLOSED    │
//! │   ├── open sessions, no force                   → OPEN_SESSIONS_REMAIN  │
//! │   ├── force without reason                      → REASON_REQUIRED       │
//! │   ├── force by non-elevated role                → ELEVATED_ROLE_REQUIRED│
//! │   └── ok → snapshot of the day's sessions                               │
//! │                                                                         │
//! │  Forced close, open sessions handled per ForceCloseMode:                │
//! │   AUTO_CLOSE → closed now with counted = expected, included in snapshot │
//! │   IGNORE     → left OPEN, listed by id, excluded from the totals        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! After a close, cash movements dated on or before that business date are
//! refused for the store ([`ensure_date_open`]).

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use super::cash_session::{self, CashSession, CashSessionStatus};
use super::{StateMachine, Transition};
use crate::error::{CoreError, CoreResult, ReasonCode, ValidationError};
use crate::money::Money;
use crate::types::{EntityType, Role};
use crate::validation::validate_reason;

/// How a forced close treats sessions that are still OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ForceCloseMode {
    #[default]
    AutoClose,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    NotClosed,
    Closed,
}

impl fmt::Display for DayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DayState::NotClosed => "NONE",
            DayState::Closed => "CLOSED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayCloseAction {
    CloseDay,
}

impl fmt::Display for DayCloseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CLOSE_DAY")
    }
}

pub struct DayCloseMachine;

impl StateMachine for DayCloseMachine {
    type State = DayState;
    type Action = DayCloseAction;

    const ENTITY: EntityType = EntityType::PosCashDayClose;

    fn allows(state: DayState, _action: DayCloseAction) -> bool {
        state == DayState::NotClosed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DayCloseSnapshot {
    /// Sessions whose figures are in the totals.
    pub session_ids: Vec<String>,
    pub opening_total: Money,
    pub expected_cash_total: Money,
    pub counted_cash_total: Money,
    pub difference_total: Money,
    /// Sessions closed by this day close (AUTO_CLOSE).
    pub auto_closed_session_ids: Vec<String>,
    /// Sessions left open and excluded from the totals (IGNORE).
    pub open_session_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DayClose {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    pub forced: bool,
    pub reason: Option<String>,
    pub force_close_mode: Option<ForceCloseMode>,
    pub snapshot: DayCloseSnapshot,
    pub closed_by: String,
    #[ts(as = "String")]
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CloseDay {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub business_date: NaiveDate,
    pub force_if_open_sessions: bool,
    pub reason: Option<String>,
    pub mode: ForceCloseMode,
    pub actor_id: String,
    pub role: Role,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DayCloseOutcome {
    pub day_close: DayClose,
    /// Sessions closed on the way (AUTO_CLOSE only).
    pub closed_sessions: Vec<Transition<CashSession>>,
}

/// none → CLOSED.
///
/// `sessions` are the store's sessions for the business date plus any
/// session still OPEN from an earlier date.
pub fn close_day(
    state: DayState,
    req: CloseDay,
    sessions: &[CashSession],
) -> CoreResult<DayCloseOutcome> {
    if !DayCloseMachine::allows(state, DayCloseAction::CloseDay) {
        return Err(CoreError::rule(
            ReasonCode::DayAlreadyClosed,
            format!(
                "business date {} is already closed for store {}",
                req.business_date, req.store_id
            ),
        ));
    }

    let open: Vec<&CashSession> = sessions
        .iter()
        .filter(|s| s.status == CashSessionStatus::Open)
        .collect();

    let mut reason = None;
    let mut mode = None;
    if !open.is_empty() {
        if !req.force_if_open_sessions {
            return Err(CoreError::rule(
                ReasonCode::OpenSessionsRemain,
                format!("{} cash session(s) are still OPEN", open.len()),
            ));
        }
        reason = Some(
            validate_reason(req.reason.as_deref())
                .map_err(|_| {
                    CoreError::rule(
                        ReasonCode::ReasonRequired,
                        "a reason is required to force a day close",
                    )
                })?
                .to_string(),
        );
        if !req.role.is_elevated() {
            return Err(CoreError::rule(
                ReasonCode::ElevatedRoleRequired,
                "forcing a day close requires MANAGER or ADMIN",
            ));
        }
        mode = Some(req.mode);
    }

    let mut closed_sessions = Vec::new();
    let mut snapshot = DayCloseSnapshot::default();
    let mut included: Vec<CashSession> = sessions
        .iter()
        .filter(|s| s.status == CashSessionStatus::Closed)
        .cloned()
        .collect();

    match mode {
        Some(ForceCloseMode::AutoClose) => {
            for session in &open {
                let transition = cash_session::close_for_day_close(session, req.now)?;
                snapshot.auto_closed_session_ids.push(session.id.clone());
                included.push(transition.after.clone());
                closed_sessions.push(transition);
            }
        }
        Some(ForceCloseMode::Ignore) => {
            snapshot.open_session_ids = open.iter().map(|s| s.id.clone()).collect();
        }
        None => {}
    }

    for session in &included {
        snapshot.session_ids.push(session.id.clone());
        snapshot.opening_total += session.opening_amount;
        snapshot.expected_cash_total += session.expected_cash;
        snapshot.counted_cash_total += session.counted_cash.unwrap_or_default();
        snapshot.difference_total += session.difference.unwrap_or_default();
    }

    Ok(DayCloseOutcome {
        day_close: DayClose {
            id: req.id,
            tenant_id: req.tenant_id,
            store_id: req.store_id,
            business_date: req.business_date,
            forced: mode.is_some(),
            reason,
            force_close_mode: mode,
            snapshot,
            closed_by: req.actor_id,
            closed_at: req.now,
        },
        closed_sessions,
    })
}

/// Refuses a cash movement dated on or before the store's last closed day.
pub fn ensure_date_open(last_closed: Option<NaiveDate>, date: NaiveDate) -> CoreResult<()> {
    match last_closed {
        Some(closed) if date <= closed => Err(CoreError::rule(
            ReasonCode::DayAlreadyClosed,
            format!(
                "business date {} is closed (closed through {})",
                date, closed
            ),
        )),
        _ => Ok(()),
    }
}

/// Calendar date of `at` in a store's fixed UTC offset.
pub fn business_date(at: DateTime<Utc>, utc_offset_minutes: i32) -> CoreResult<NaiveDate> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
        ValidationError::OutOfRange {
            field: "utc_offset_minutes".to_string(),
            min: -1_439,
            max: 1_439,
        }
    })?;
    Ok(at.with_timezone(&offset).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machines::cash_session::{apply_movement, close, open, MovementKind, OpenSession};
    use chrono::TimeZone;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn session(id: &str, opening: i64) -> CashSession {
        open(OpenSession {
            id: id.to_string(),
            tenant_id: "t-1".to_string(),
            store_id: "s-1".to_string(),
            cashier_id: format!("cashier-{}", id),
            opening_amount: Money::from_cents(opening),
            business_date: date(),
            now: Utc::now(),
        })
        .unwrap()
    }

    fn request(force: bool, reason: Option<&str>, mode: ForceCloseMode, role: Role) -> CloseDay {
        CloseDay {
            id: "dc-1".to_string(),
            tenant_id: "t-1".to_string(),
            store_id: "s-1".to_string(),
            business_date: date(),
            force_if_open_sessions: force,
            reason: reason.map(str::to_string),
            mode,
            actor_id: "mgr".to_string(),
            role,
            now: Utc::now(),
        }
    }

    fn closed_session() -> CashSession {
        let s = session("a", 1_000);
        let s = apply_movement(&s, MovementKind::CashIn, Money::from_cents(500)).unwrap().after;
        close(&s, Money::from_cents(1_480), Utc::now()).unwrap().after
    }

    #[test]
    fn test_clean_close_snapshots_closed_sessions() {
        let out = close_day(
            DayState::NotClosed,
            request(false, None, ForceCloseMode::AutoClose, Role::Cashier),
            &[closed_session()],
        )
        .unwrap();
        let dc = out.day_close;
        assert!(!dc.forced);
        assert_eq!(dc.force_close_mode, None);
        assert_eq!(dc.snapshot.session_ids, vec!["a".to_string()]);
        assert_eq!(dc.snapshot.expected_cash_total.cents(), 1_500);
        assert_eq!(dc.snapshot.counted_cash_total.cents(), 1_480);
        assert_eq!(dc.snapshot.difference_total.cents(), -20);
    }

    #[test]
    fn test_duplicate_close_rejected() {
        let err = close_day(
            DayState::Closed,
            request(false, None, ForceCloseMode::AutoClose, Role::Manager),
            &[],
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::DayAlreadyClosed);
    }

    #[test]
    fn test_open_sessions_block_unforced_close() {
        let err = close_day(
            DayState::NotClosed,
            request(false, None, ForceCloseMode::AutoClose, Role::Manager),
            &[session("b", 100)],
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::OpenSessionsRemain);
    }

    #[test]
    fn test_force_needs_reason_and_elevated_role() {
        let open_sessions = [session("b", 100)];
        let err = close_day(
            DayState::NotClosed,
            request(true, Some("  "), ForceCloseMode::AutoClose, Role::Manager),
            &open_sessions,
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ReasonRequired);

        let err = close_day(
            DayState::NotClosed,
            request(true, Some("drawer jammed"), ForceCloseMode::AutoClose, Role::Cashier),
            &open_sessions,
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ElevatedRoleRequired);
    }

    #[test]
    fn test_forced_auto_close_includes_open_sessions() {
        let out = close_day(
            DayState::NotClosed,
            request(true, Some("drawer jammed"), ForceCloseMode::AutoClose, Role::Manager),
            &[closed_session(), session("b", 200)],
        )
        .unwrap();
        assert_eq!(out.closed_sessions.len(), 1);
        let auto = &out.closed_sessions[0].after;
        assert_eq!(auto.status, CashSessionStatus::Closed);
        assert_eq!(auto.counted_cash, Some(Money::from_cents(200)));

        let snap = &out.day_close.snapshot;
        assert!(out.day_close.forced);
        assert_eq!(out.day_close.force_close_mode, Some(ForceCloseMode::AutoClose));
        assert_eq!(snap.auto_closed_session_ids, vec!["b".to_string()]);
        assert!(snap.open_session_ids.is_empty());
        assert_eq!(snap.session_ids.len(), 2);
        assert_eq!(snap.expected_cash_total.cents(), 1_700);
    }

    #[test]
    fn test_forced_ignore_leaves_sessions_out() {
        let out = close_day(
            DayState::NotClosed,
            request(true, Some("late shift"), ForceCloseMode::Ignore, Role::Admin),
            &[closed_session(), session("b", 200)],
        )
        .unwrap();
        assert!(out.closed_sessions.is_empty());
        let snap = &out.day_close.snapshot;
        assert_eq!(snap.open_session_ids, vec!["b".to_string()]);
        assert_eq!(snap.session_ids, vec!["a".to_string()]);
        assert_eq!(snap.expected_cash_total.cents(), 1_500);
    }

    #[test]
    fn test_ensure_date_open() {
        let d = date();
        assert!(ensure_date_open(None, d).is_ok());
        assert!(ensure_date_open(Some(d.pred_opt().unwrap()), d).is_ok());
        assert_eq!(
            ensure_date_open(Some(d), d).unwrap_err().reason_code(),
            ReasonCode::DayAlreadyClosed
        );
        assert!(ensure_date_open(Some(d.succ_opt().unwrap()), d).is_err());
    }

    #[test]
    fn test_business_date_uses_store_offset() {
        let at = Utc.with_ymd_and_hms(2026, 6, 2, 2, 30, 0).unwrap();
        assert_eq!(business_date(at, 0).unwrap(), NaiveDate::from_ymd_opt(2026, 6, 2).unwrap());
        // UTC-5: still the evening of June 1st
        assert_eq!(business_date(at, -300).unwrap(), date());
        assert!(business_date(at, 24 * 60).is_err());
    }
}
