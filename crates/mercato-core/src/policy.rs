//! # Return Policy
//!
//! Per-tenant rules gating REFUND_ITEMS and EXCHANGE_ITEMS on a paid sale.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Gate order (first failure wins)                                        │
//! │                                                                         │
//! │  1. receipt required?          → RECEIPT_REQUIRED                       │
//! │  2. window elapsed?                                                     │
//! │     ├── no override            → RETURN_WINDOW_ELAPSED                  │
//! │     └── override, not elevated → ELEVATED_ROLE_REQUIRED                 │
//! │  3. every condition accepted?  → CONDITION_NOT_ACCEPTED                 │
//! │  4. refund method allowed?     → REFUND_METHOD_NOT_ALLOWED              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ReasonCode};
use crate::money::Money;
use crate::types::{ItemCondition, PaymentMethod, Role};

/// What happens to a returned serialized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpcReturnMode {
    /// Retire the sold EPC and re-issue the unit under a new RFID label.
    AssignNewEpc,
    /// Retire the sold EPC and collapse the unit into the PENDING bucket.
    ToPending,
}

/// Tenant return/exchange configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnPolicy {
    pub require_receipt: bool,
    pub accepted_conditions: Vec<ItemCondition>,
    pub allowed_refund_methods: Vec<PaymentMethod>,
    /// Fee withheld from the returned subtotal, in basis points.
    pub restocking_fee_bps: u32,
    pub return_window_days: u32,
    pub epc_return_mode: EpcReturnMode,
}

impl Default for ReturnPolicy {
    fn default() -> Self {
        Self {
            require_receipt: true,
            accepted_conditions: vec![
                ItemCondition::New,
                ItemCondition::Opened,
                ItemCondition::Damaged,
            ],
            allowed_refund_methods: vec![
                PaymentMethod::Cash,
                PaymentMethod::Card,
                PaymentMethod::Transfer,
            ],
            restocking_fee_bps: 0,
            return_window_days: 30,
            epc_return_mode: EpcReturnMode::AssignNewEpc,
        }
    }
}

/// Facts about one return request that the policy judges.
#[derive(Debug, Clone)]
pub struct ReturnContext<'a> {
    pub paid_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub receipt_presented: bool,
    pub manager_override: bool,
    pub role: Role,
    /// `None` when no money flows back to the customer (even exchange).
    pub refund_method: Option<PaymentMethod>,
    pub conditions: &'a [ItemCondition],
}

impl ReturnPolicy {
    /// Whether the return window has closed at `now`.
    pub fn window_elapsed(&self, paid_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - paid_at > Duration::days(i64::from(self.return_window_days))
    }

    /// Runs every gate for a return or exchange.
    pub fn authorize(&self, ctx: &ReturnContext<'_>) -> CoreResult<()> {
        if self.require_receipt && !ctx.receipt_presented {
            return Err(CoreError::rule(
                ReasonCode::ReceiptRequired,
                "receipt is required for returns",
            ));
        }

        if self.window_elapsed(ctx.paid_at, ctx.now) {
            if !ctx.manager_override {
                return Err(CoreError::rule(
                    ReasonCode::ReturnWindowElapsed,
                    format!(
                        "return window of {} days has elapsed",
                        self.return_window_days
                    ),
                ));
            }
            if !ctx.role.is_elevated() {
                return Err(CoreError::rule(
                    ReasonCode::ElevatedRoleRequired,
                    "manager override requires MANAGER or ADMIN",
                ));
            }
        }

        if let Some(rejected) = ctx
            .conditions
            .iter()
            .find(|c| !self.accepted_conditions.contains(*c))
        {
            return Err(CoreError::rule(
                ReasonCode::ConditionNotAccepted,
                format!("condition {} is not accepted", rejected.as_str()),
            ));
        }

        if let Some(method) = ctx.refund_method {
            if !self.allowed_refund_methods.contains(&method) {
                return Err(CoreError::rule(
                    ReasonCode::RefundMethodNotAllowed,
                    format!("refunds via {} are not allowed", method),
                ));
            }
        }

        Ok(())
    }

    /// Restocking fee on a returned subtotal.
    pub fn restocking_fee(&self, subtotal: Money) -> Money {
        subtotal.portion_bps(self.restocking_fee_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx<'a>(days_after: i64, conditions: &'a [ItemCondition]) -> ReturnContext<'a> {
        let paid_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        ReturnContext {
            paid_at,
            now: paid_at + Duration::days(days_after),
            receipt_presented: true,
            manager_override: false,
            role: Role::Cashier,
            refund_method: Some(PaymentMethod::Cash),
            conditions,
        }
    }

    #[test]
    fn test_default_policy_accepts_fresh_return() {
        let policy = ReturnPolicy::default();
        assert!(policy.authorize(&ctx(3, &[ItemCondition::New])).is_ok());
    }

    #[test]
    fn test_receipt_required() {
        let policy = ReturnPolicy::default();
        let mut c = ctx(1, &[ItemCondition::New]);
        c.receipt_presented = false;
        let err = policy.authorize(&c).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ReceiptRequired);
    }

    #[test]
    fn test_elapsed_window_needs_elevated_override() {
        let policy = ReturnPolicy::default();
        let conditions = [ItemCondition::New];

        let c = ctx(31, &conditions);
        assert_eq!(
            policy.authorize(&c).unwrap_err().reason_code(),
            ReasonCode::ReturnWindowElapsed
        );

        let mut c = ctx(31, &conditions);
        c.manager_override = true;
        assert_eq!(
            policy.authorize(&c).unwrap_err().reason_code(),
            ReasonCode::ElevatedRoleRequired
        );

        c.role = Role::Manager;
        assert!(policy.authorize(&c).is_ok());
    }

    #[test]
    fn test_condition_and_method_gates() {
        let policy = ReturnPolicy {
            accepted_conditions: vec![ItemCondition::New],
            allowed_refund_methods: vec![PaymentMethod::Card],
            ..ReturnPolicy::default()
        };

        let damaged = [ItemCondition::Damaged];
        assert_eq!(
            policy.authorize(&ctx(1, &damaged)).unwrap_err().reason_code(),
            ReasonCode::ConditionNotAccepted
        );

        let fresh = [ItemCondition::New];
        assert_eq!(
            policy.authorize(&ctx(1, &fresh)).unwrap_err().reason_code(),
            ReasonCode::RefundMethodNotAllowed
        );
    }

    #[test]
    fn test_restocking_fee() {
        let policy = ReturnPolicy {
            restocking_fee_bps: 1_000,
            ..ReturnPolicy::default()
        };
        assert_eq!(policy.restocking_fee(Money::from_cents(5_000)).cents(), 500);
    }
}
