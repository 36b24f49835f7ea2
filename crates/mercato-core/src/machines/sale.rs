//! # PosSale
//!
//! A point-of-sale ticket from draft to payment, plus post-sale returns.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DRAFT ──ADD_LINE / REMOVE_LINE──► DRAFT                                │
//! │  DRAFT ──CHECKOUT──► PAID          (debits stock, settles cash)         │
//! │  DRAFT ──CANCEL──► CANCELED                                             │
//! │  PAID ──REFUND_ITEMS / EXCHANGE_ITEMS──► PAID   (policy gated)          │
//! │                                                                         │
//! │  Tender rules at checkout (and on an exchange top-up):                  │
//! │    Σ payments ≥ total_due            else INSUFFICIENT_PAYMENT          │
//! │    Σ non-cash ≤ total_due            else CHANGE_REQUIRES_CASH          │
//! │    any CASH → OPEN cash session      else CASH_SESSION_REQUIRED         │
//! │    change = Σ payments − total_due   (always covered by cash)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Totals are recomputed from the lines by every transition; no payload
//! can set them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use super::{CashEffect, Effect, MovementKind, StateMachine, Transition};
use crate::error::{CoreError, CoreResult, ReasonCode, ValidationError};
use crate::money::Money;
use crate::policy::{EpcReturnMode, ReturnContext, ReturnPolicy};
use crate::types::{
    Disposition, EntityType, ItemCondition, MigrateTarget, PaymentMethod, Role, StockOp,
    StockSelector, UnitRef, QUARANTINE_POOL,
};
use crate::validation::{
    validate_epc, validate_non_negative_amount, validate_positive_amount, validate_quantity,
    validate_sku,
};

// =============================================================================
// States & Actions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Draft,
    Paid,
    Canceled,
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SaleStatus::Draft => "DRAFT",
            SaleStatus::Paid => "PAID",
            SaleStatus::Canceled => "CANCELED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleAction {
    AddLine,
    RemoveLine,
    Checkout,
    Cancel,
    RefundItems,
    ExchangeItems,
}

impl fmt::Display for SaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SaleAction::AddLine => "ADD_LINE",
            SaleAction::RemoveLine => "REMOVE_LINE",
            SaleAction::Checkout => "CHECKOUT",
            SaleAction::Cancel => "CANCEL",
            SaleAction::RefundItems => "REFUND_ITEMS",
            SaleAction::ExchangeItems => "EXCHANGE_ITEMS",
        })
    }
}

pub struct SaleMachine;

impl StateMachine for SaleMachine {
    type State = SaleStatus;
    type Action = SaleAction;

    const ENTITY: EntityType = EntityType::PosSale;

    fn allows(state: SaleStatus, action: SaleAction) -> bool {
        use SaleAction as A;
        match state {
            SaleStatus::Draft => matches!(
                action,
                A::AddLine | A::RemoveLine | A::Checkout | A::Cancel
            ),
            SaleStatus::Paid => matches!(action, A::RefundItems | A::ExchangeItems),
            SaleStatus::Canceled => false,
        }
    }
}

// =============================================================================
// Lines, Payments, Adjustments
// =============================================================================

/// Whether a line was rung up on the ticket or handed out by an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineOrigin {
    Sale,
    Exchange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub id: String,
    pub line_no: i64,
    pub sku: String,
    pub epc: Option<String>,
    pub qty: i64,
    pub unit_price: Money,
    pub discount: Money,
    pub returned_qty: i64,
    pub origin: LineOrigin,
}

impl SaleLine {
    pub fn gross(&self) -> Money {
        self.unit_price.multiply_quantity(self.qty)
    }

    pub fn line_total(&self) -> Money {
        self.gross() - self.discount
    }

    pub fn returnable(&self) -> i64 {
        self.qty - self.returned_qty
    }

    pub fn unit(&self) -> UnitRef {
        match &self.epc {
            Some(epc) => UnitRef::Epc(epc.clone()),
            None => UnitRef::Sku(self.sku.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSaleLine {
    pub sku: String,
    #[serde(default)]
    pub epc: Option<String>,
    pub qty: i64,
    pub unit_price: Money,
    #[serde(default)]
    pub discount: Money,
}

impl NewSaleLine {
    fn validate(&self) -> CoreResult<()> {
        validate_sku(&self.sku)?;
        validate_quantity(self.qty)?;
        if let Some(epc) = &self.epc {
            validate_epc(epc)?;
            if self.qty != 1 {
                return Err(ValidationError::OutOfRange {
                    field: "qty".to_string(),
                    min: 1,
                    max: 1,
                }
                .into());
            }
        }
        validate_non_negative_amount("unit_price", self.unit_price)?;
        validate_non_negative_amount("discount", self.discount)?;
        if self.discount > self.unit_price.multiply_quantity(self.qty) {
            return Err(ValidationError::InvalidFormat {
                field: "discount".to_string(),
                reason: "discount exceeds line amount".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Tender with its method-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentInput {
    Cash {
        amount: Money,
    },
    Card {
        amount: Money,
        auth_code: String,
        card_last4: String,
    },
    Transfer {
        amount: Money,
        reference: String,
    },
}

impl PaymentInput {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentInput::Cash { .. } => PaymentMethod::Cash,
            PaymentInput::Card { .. } => PaymentMethod::Card,
            PaymentInput::Transfer { .. } => PaymentMethod::Transfer,
        }
    }

    pub fn amount(&self) -> Money {
        match self {
            PaymentInput::Cash { amount }
            | PaymentInput::Card { amount, .. }
            | PaymentInput::Transfer { amount, .. } => *amount,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        validate_positive_amount("amount", self.amount())?;
        match self {
            PaymentInput::Cash { .. } => {}
            PaymentInput::Card {
                auth_code,
                card_last4,
                ..
            } => {
                if auth_code.trim().is_empty() {
                    return Err(ValidationError::required("auth_code").into());
                }
                if card_last4.len() != 4 || !card_last4.chars().all(|c| c.is_ascii_digit()) {
                    return Err(ValidationError::InvalidFormat {
                        field: "card_last4".to_string(),
                        reason: "must be 4 digits".to_string(),
                    }
                    .into());
                }
            }
            PaymentInput::Transfer { reference, .. } => {
                if reference.trim().is_empty() {
                    return Err(ValidationError::required("reference").into());
                }
            }
        }
        Ok(())
    }
}

/// Outcome of the tender rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tender {
    pub paid: Money,
    pub cash: Money,
    pub change: Money,
}

impl Tender {
    /// Cash that stays in the drawer.
    pub fn cash_kept(&self) -> Money {
        self.cash - self.change
    }
}

/// Applies the tender rules to `due`.
pub fn settle_tender(
    due: Money,
    payments: &[PaymentInput],
    cash_session_open: bool,
) -> CoreResult<Tender> {
    for payment in payments {
        payment.validate()?;
    }
    let paid: Money = payments.iter().map(PaymentInput::amount).sum();
    let cash: Money = payments
        .iter()
        .filter(|p| p.method() == PaymentMethod::Cash)
        .map(PaymentInput::amount)
        .sum();
    let non_cash = paid - cash;

    if paid < due {
        return Err(CoreError::rule(
            ReasonCode::InsufficientPayment,
            format!("payments {} do not cover total due {}", paid, due),
        ));
    }
    if non_cash > due {
        return Err(CoreError::rule(
            ReasonCode::ChangeRequiresCash,
            "change can only be given from CASH",
        ));
    }
    if cash.is_positive() && !cash_session_open {
        return Err(CoreError::rule(
            ReasonCode::CashSessionRequired,
            "OPEN cash session required for CASH",
        ));
    }

    Ok(Tender {
        paid,
        cash,
        change: paid - due,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleTotals {
    pub subtotal: Money,
    pub discount_total: Money,
    pub total_due: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentKind {
    Refund,
    Exchange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnedItem {
    pub line_id: String,
    pub qty: i64,
    pub condition: ItemCondition,
    pub value: Money,
}

/// One refund or exchange event against a paid sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleAdjustment {
    pub id: String,
    pub kind: AdjustmentKind,
    pub returned: Vec<ReturnedItem>,
    pub added_line_ids: Vec<String>,
    pub returned_subtotal: Money,
    pub restocking_fee: Money,
    /// Money handed back to the customer.
    pub refund_amount: Money,
    pub new_items_total: Money,
    /// `new_items_total − (returned_subtotal − restocking_fee)`; positive
    /// means the customer paid the difference.
    pub net_adjustment: Money,
    pub refund_method: Option<PaymentMethod>,
    pub payments: Vec<PaymentInput>,
    pub manager_override: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Entity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub receipt_number: String,
    pub pool: String,
    pub status: SaleStatus,
    pub lines: Vec<SaleLine>,
    pub totals: SaleTotals,
    pub payments: Vec<PaymentInput>,
    pub change_due: Money,
    pub adjustments: Vec<SaleAdjustment>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Totals over the lines rung up on the ticket.
    pub fn compute_totals(lines: &[SaleLine]) -> SaleTotals {
        let mut totals = SaleTotals::default();
        for line in lines.iter().filter(|l| l.origin == LineOrigin::Sale) {
            totals.subtotal += line.gross();
            totals.discount_total += line.discount;
        }
        totals.total_due = totals.subtotal - totals.discount_total;
        totals
    }

    fn recompute(&mut self) {
        self.totals = Sale::compute_totals(&self.lines);
    }

    fn next_line_no(&self) -> i64 {
        self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1
    }

    fn push_line(&mut self, line: NewSaleLine, origin: LineOrigin) -> String {
        let line_no = self.next_line_no();
        let id = format!("{}-{}", self.id, line_no);
        self.lines.push(SaleLine {
            id: id.clone(),
            line_no,
            sku: line.sku,
            epc: line.epc,
            qty: line.qty,
            unit_price: line.unit_price,
            discount: line.discount,
            returned_qty: 0,
            origin,
        });
        id
    }

    fn ensure_unique_epcs(&self) -> CoreResult<()> {
        let mut seen = std::collections::HashSet::new();
        for epc in self.lines.iter().filter_map(|l| l.epc.as_deref()) {
            if !seen.insert(epc) {
                return Err(CoreError::rule(
                    ReasonCode::DuplicateUnit,
                    format!("EPC {} is already on this sale", epc),
                ));
            }
        }
        Ok(())
    }

    fn debit_line(&self, line: &SaleLine) -> Effect {
        Effect::Stock(StockOp::Debit {
            selector: StockSelector {
                unit: line.unit(),
                location_id: self.store_id.clone(),
                pool: self.pool.clone(),
            },
            qty: line.qty,
            disposition: Disposition::Sold,
        })
    }
}

// =============================================================================
// Draft Transitions
// =============================================================================

#[derive(Debug, Clone)]
pub struct NewSale {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub receipt_number: String,
    pub pool: String,
    pub lines: Vec<NewSaleLine>,
    pub now: DateTime<Utc>,
}

/// none → DRAFT.
pub fn create(req: NewSale) -> CoreResult<Sale> {
    let mut sale = Sale {
        id: req.id,
        tenant_id: req.tenant_id,
        store_id: req.store_id,
        cashier_id: req.cashier_id,
        receipt_number: req.receipt_number,
        pool: req.pool,
        status: SaleStatus::Draft,
        lines: Vec::new(),
        totals: SaleTotals::default(),
        payments: Vec::new(),
        change_due: Money::zero(),
        adjustments: Vec::new(),
        created_at: req.now,
        paid_at: None,
        canceled_at: None,
    };
    for line in req.lines {
        line.validate()?;
        sale.push_line(line, LineOrigin::Sale);
    }
    sale.ensure_unique_epcs()?;
    sale.recompute();
    Ok(sale)
}

pub fn add_line(sale: &Sale, line: NewSaleLine) -> CoreResult<Transition<Sale>> {
    SaleMachine::ensure(sale.status, SaleAction::AddLine)?;
    line.validate()?;
    let mut after = sale.clone();
    after.push_line(line, LineOrigin::Sale);
    after.ensure_unique_epcs()?;
    after.recompute();
    Ok(Transition::new(sale.clone(), after))
}

pub fn remove_line(sale: &Sale, line_id: &str) -> CoreResult<Transition<Sale>> {
    SaleMachine::ensure(sale.status, SaleAction::RemoveLine)?;
    let mut after = sale.clone();
    let before_len = after.lines.len();
    after.lines.retain(|l| l.id != line_id);
    if after.lines.len() == before_len {
        return Err(CoreError::rule(
            ReasonCode::UnknownLine,
            format!("line {} is not part of this sale", line_id),
        ));
    }
    after.recompute();
    Ok(Transition::new(sale.clone(), after))
}

/// DRAFT → CANCELED.
pub fn cancel(sale: &Sale, now: DateTime<Utc>) -> CoreResult<Transition<Sale>> {
    SaleMachine::ensure(sale.status, SaleAction::Cancel)?;
    let mut after = sale.clone();
    after.status = SaleStatus::Canceled;
    after.canceled_at = Some(now);
    Ok(Transition::new(sale.clone(), after))
}

/// DRAFT → PAID. Debits every line and settles cash into the drawer.
pub fn checkout(
    sale: &Sale,
    payments: Vec<PaymentInput>,
    cash_session_open: bool,
    now: DateTime<Utc>,
) -> CoreResult<Transition<Sale>> {
    SaleMachine::ensure(sale.status, SaleAction::Checkout)?;
    if sale.lines.is_empty() {
        return Err(CoreError::rule(
            ReasonCode::EmptyLines,
            "cannot check out a sale without lines",
        ));
    }

    let tender = settle_tender(sale.totals.total_due, &payments, cash_session_open)?;

    let mut after = sale.clone();
    after.status = SaleStatus::Paid;
    after.payments = payments;
    after.change_due = tender.change;
    after.paid_at = Some(now);

    let mut effects: Vec<Effect> = sale.lines.iter().map(|l| sale.debit_line(l)).collect();
    if tender.cash_kept().is_positive() {
        effects.push(Effect::Cash(CashEffect {
            kind: MovementKind::SaleSettlement,
            amount: tender.cash_kept(),
        }));
    }

    Ok(Transition::new(sale.clone(), after).with_effects(effects))
}

// =============================================================================
// Returns
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ReturnItem {
    pub line_id: String,
    pub qty: i64,
    pub condition: ItemCondition,
    /// New label for an EPC unit when the policy re-issues EPCs.
    #[serde(default)]
    pub replacement_epc: Option<String>,
}

/// Facts the return gates need beyond the sale itself.
#[derive(Debug, Clone, Copy)]
pub struct ReturnAuthority {
    pub role: Role,
    pub receipt_presented: bool,
    pub manager_override: bool,
    pub cash_session_open: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub adjustment_id: String,
    pub items: Vec<ReturnItem>,
    pub refund_method: PaymentMethod,
}

#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub adjustment_id: String,
    pub returns: Vec<ReturnItem>,
    pub new_lines: Vec<NewSaleLine>,
    /// Top-up tender when the new items cost more.
    pub payments: Vec<PaymentInput>,
    /// Required when the returned value exceeds the new items.
    pub refund_method: Option<PaymentMethod>,
}

struct ReturnedValue {
    items: Vec<ReturnedItem>,
    subtotal: Money,
    effects: Vec<Effect>,
}

/// Marks returned quantities on `after` and builds their stock effects.
fn take_returns(
    after: &mut Sale,
    items: &[ReturnItem],
    mode: EpcReturnMode,
) -> CoreResult<ReturnedValue> {
    if items.is_empty() {
        return Err(CoreError::rule(
            ReasonCode::EmptyLines,
            "at least one item must be returned",
        ));
    }

    let store_id = after.store_id.clone();
    let sale_pool = after.pool.clone();
    let mut out = ReturnedValue {
        items: Vec::with_capacity(items.len()),
        subtotal: Money::zero(),
        effects: Vec::with_capacity(items.len()),
    };

    for item in items {
        validate_quantity(item.qty)?;
        let line = after
            .lines
            .iter_mut()
            .find(|l| l.id == item.line_id)
            .ok_or_else(|| {
                CoreError::rule(
                    ReasonCode::UnknownLine,
                    format!("line {} is not part of this sale", item.line_id),
                )
            })?;
        if item.qty > line.returnable() {
            return Err(CoreError::rule(
                ReasonCode::ExceedsReturnable,
                format!(
                    "line {}: return qty {} exceeds returnable {}",
                    line.line_no,
                    item.qty,
                    line.returnable()
                ),
            ));
        }

        let total = line.line_total();
        let value = total.prorate(line.returned_qty + item.qty, line.qty)
            - total.prorate(line.returned_qty, line.qty);
        line.returned_qty += item.qty;

        let pool = if item.condition == ItemCondition::Damaged {
            QUARANTINE_POOL.to_string()
        } else {
            sale_pool.clone()
        };
        let effect = match &line.epc {
            Some(epc) => {
                let target = match mode {
                    EpcReturnMode::ToPending => MigrateTarget::Pending,
                    EpcReturnMode::AssignNewEpc => {
                        let new_epc = item
                            .replacement_epc
                            .clone()
                            .ok_or_else(|| ValidationError::required("replacement_epc"))?;
                        validate_epc(&new_epc)?;
                        MigrateTarget::Rfid { new_epc }
                    }
                };
                StockOp::Migrate {
                    epc: epc.clone(),
                    target,
                    pool: Some(pool),
                }
            }
            None => StockOp::Credit {
                selector: StockSelector::sku(line.sku.clone(), store_id.clone(), pool),
                qty: item.qty,
            },
        };

        out.subtotal += value;
        out.effects.push(Effect::Stock(effect));
        out.items.push(ReturnedItem {
            line_id: item.line_id.clone(),
            qty: item.qty,
            condition: item.condition,
            value,
        });
    }

    Ok(out)
}

fn authorize_return(
    sale: &Sale,
    policy: &ReturnPolicy,
    authority: &ReturnAuthority,
    items: &[ReturnItem],
    refund_method: Option<PaymentMethod>,
) -> CoreResult<()> {
    let conditions: Vec<ItemCondition> = items.iter().map(|i| i.condition).collect();
    policy.authorize(&ReturnContext {
        // PAID sales always carry paid_at
        paid_at: sale.paid_at.unwrap_or(sale.created_at),
        now: authority.now,
        receipt_presented: authority.receipt_presented,
        manager_override: authority.manager_override,
        role: authority.role,
        refund_method,
        conditions: &conditions,
    })
}

fn cash_refund_effect(
    method: PaymentMethod,
    amount: Money,
    cash_session_open: bool,
) -> CoreResult<Option<Effect>> {
    if method != PaymentMethod::Cash || !amount.is_positive() {
        return Ok(None);
    }
    if !cash_session_open {
        return Err(CoreError::rule(
            ReasonCode::CashSessionRequired,
            "OPEN cash session required for CASH",
        ));
    }
    Ok(Some(Effect::Cash(CashEffect {
        kind: MovementKind::Refund,
        amount,
    })))
}

/// PAID → PAID. Refund = returned subtotal − restocking fee.
pub fn refund(
    sale: &Sale,
    req: RefundRequest,
    policy: &ReturnPolicy,
    authority: ReturnAuthority,
) -> CoreResult<Transition<Sale>> {
    SaleMachine::ensure(sale.status, SaleAction::RefundItems)?;
    authorize_return(sale, policy, &authority, &req.items, Some(req.refund_method))?;

    let mut after = sale.clone();
    let returned = take_returns(&mut after, &req.items, policy.epc_return_mode)?;
    let fee = policy.restocking_fee(returned.subtotal);
    let refund_amount = (returned.subtotal - fee).clamp_non_negative();

    let mut effects = returned.effects;
    if let Some(cash) =
        cash_refund_effect(req.refund_method, refund_amount, authority.cash_session_open)?
    {
        effects.push(cash);
    }

    after.adjustments.push(SaleAdjustment {
        id: req.adjustment_id,
        kind: AdjustmentKind::Refund,
        returned: returned.items,
        added_line_ids: Vec::new(),
        returned_subtotal: returned.subtotal,
        restocking_fee: fee,
        refund_amount,
        new_items_total: Money::zero(),
        net_adjustment: -refund_amount,
        refund_method: Some(req.refund_method),
        payments: Vec::new(),
        manager_override: authority.manager_override,
        created_at: authority.now,
    });

    Ok(Transition::new(sale.clone(), after).with_effects(effects))
}

/// PAID → PAID. Returned value and new items are netted into one adjustment.
pub fn exchange(
    sale: &Sale,
    req: ExchangeRequest,
    policy: &ReturnPolicy,
    authority: ReturnAuthority,
) -> CoreResult<Transition<Sale>> {
    SaleMachine::ensure(sale.status, SaleAction::ExchangeItems)?;
    if req.new_lines.is_empty() {
        return Err(CoreError::rule(
            ReasonCode::EmptyLines,
            "an exchange needs at least one new item",
        ));
    }
    for line in &req.new_lines {
        line.validate()?;
    }

    let mut after = sale.clone();
    let returned = take_returns(&mut after, &req.returns, policy.epc_return_mode)?;
    let fee = policy.restocking_fee(returned.subtotal);
    let credit = returned.subtotal - fee;

    let mut added_line_ids = Vec::with_capacity(req.new_lines.len());
    let mut new_items_total = Money::zero();
    for line in req.new_lines {
        new_items_total += line.unit_price.multiply_quantity(line.qty) - line.discount;
        added_line_ids.push(after.push_line(line, LineOrigin::Exchange));
    }
    after.ensure_unique_epcs()?;

    let net = new_items_total - credit;
    let refund_method = if net.is_negative() {
        Some(
            req.refund_method
                .ok_or_else(|| ValidationError::required("refund_method"))?,
        )
    } else {
        None
    };
    authorize_return(sale, policy, &authority, &req.returns, refund_method)?;

    let mut effects = returned.effects;
    for id in &added_line_ids {
        if let Some(line) = after.lines.iter().find(|l| &l.id == id) {
            effects.push(after.debit_line(line));
        }
    }

    let mut refund_amount = Money::zero();
    let mut payments = Vec::new();
    if net.is_positive() {
        let tender = settle_tender(net, &req.payments, authority.cash_session_open)?;
        if tender.cash_kept().is_positive() {
            effects.push(Effect::Cash(CashEffect {
                kind: MovementKind::SaleSettlement,
                amount: tender.cash_kept(),
            }));
        }
        payments = req.payments;
    } else if let Some(method) = refund_method {
        refund_amount = -net;
        if let Some(cash) = cash_refund_effect(method, refund_amount, authority.cash_session_open)? {
            effects.push(cash);
        }
    }

    after.recompute();
    after.adjustments.push(SaleAdjustment {
        id: req.adjustment_id,
        kind: AdjustmentKind::Exchange,
        returned: returned.items,
        added_line_ids,
        returned_subtotal: returned.subtotal,
        restocking_fee: fee,
        refund_amount,
        new_items_total,
        net_adjustment: net,
        refund_method,
        payments,
        manager_override: authority.manager_override,
        created_at: authority.now,
    });

    Ok(Transition::new(sale.clone(), after).with_effects(effects))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_POOL;
    use chrono::Duration;

    const EPC: &str = "E2801160600002089C4A2B1F";

    fn line(sku: &str, qty: i64, price: i64) -> NewSaleLine {
        NewSaleLine {
            sku: sku.to_string(),
            epc: None,
            qty,
            unit_price: Money::from_cents(price),
            discount: Money::zero(),
        }
    }

    fn draft(lines: Vec<NewSaleLine>) -> Sale {
        create(NewSale {
            id: "sale-1".to_string(),
            tenant_id: "t-1".to_string(),
            store_id: "s-1".to_string(),
            cashier_id: "u-1".to_string(),
            receipt_number: "R-0001".to_string(),
            pool: DEFAULT_POOL.to_string(),
            lines,
            now: Utc::now(),
        })
        .unwrap()
    }

    fn cash(cents: i64) -> PaymentInput {
        PaymentInput::Cash {
            amount: Money::from_cents(cents),
        }
    }

    fn card(cents: i64) -> PaymentInput {
        PaymentInput::Card {
            amount: Money::from_cents(cents),
            auth_code: "A1B2".to_string(),
            card_last4: "4242".to_string(),
        }
    }

    fn authority(now: DateTime<Utc>) -> ReturnAuthority {
        ReturnAuthority {
            role: Role::Cashier,
            receipt_presented: true,
            manager_override: false,
            cash_session_open: true,
            now,
        }
    }

    fn paid(lines: Vec<NewSaleLine>) -> Sale {
        let s = draft(lines);
        let due = s.totals.total_due.cents();
        checkout(&s, vec![card(due)], false, Utc::now()).unwrap().after
    }

    fn ret(line_id: &str, qty: i64, condition: ItemCondition) -> ReturnItem {
        ReturnItem {
            line_id: line_id.to_string(),
            qty,
            condition,
            replacement_epc: None,
        }
    }

    #[test]
    fn test_totals_are_derived() {
        let mut l = line("SHIRT", 2, 2_500);
        l.discount = Money::from_cents(500);
        let s = draft(vec![l, line("SOCK", 1, 300)]);
        assert_eq!(s.totals.subtotal.cents(), 5_300);
        assert_eq!(s.totals.discount_total.cents(), 500);
        assert_eq!(s.totals.total_due.cents(), 4_800);

        let s = remove_line(&s, "sale-1-2").unwrap().after;
        assert_eq!(s.totals.total_due.cents(), 4_500);
        let s = add_line(&s, line("CAP", 1, 1_000)).unwrap().after;
        assert_eq!(s.lines.last().unwrap().line_no, 2);
        assert_eq!(s.totals.total_due.cents(), 5_500);
    }

    #[test]
    fn test_card_and_cash_without_session_rejected() {
        let s = draft(vec![line("COAT", 1, 10_000)]);
        let err = checkout(&s, vec![card(6_000), cash(4_000)], false, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::CashSessionRequired);
        assert_eq!(err.to_string(), "OPEN cash session required for CASH");
    }

    #[test]
    fn test_checkout_debits_and_settles_cash_minus_change() {
        let mut l = line("SCARF", 1, 0);
        l.epc = Some(EPC.to_string());
        l.unit_price = Money::from_cents(7_000);
        let s = draft(vec![l, line("SOCK", 3, 1_000)]);

        let tr = checkout(&s, vec![card(6_000), cash(5_000)], true, Utc::now()).unwrap();
        assert_eq!(tr.after.status, SaleStatus::Paid);
        assert_eq!(tr.after.change_due.cents(), 1_000);

        let ops: Vec<_> = tr.stock_ops().collect();
        assert!(matches!(
            ops[0],
            StockOp::Debit { selector, qty: 1, disposition: Disposition::Sold }
                if selector.unit == UnitRef::Epc(EPC.to_string())
        ));
        assert!(matches!(ops[1], StockOp::Debit { qty: 3, .. }));

        let cash_effects: Vec<_> = tr.cash_effects().collect();
        assert_eq!(cash_effects.len(), 1);
        assert_eq!(cash_effects[0].kind, MovementKind::SaleSettlement);
        assert_eq!(cash_effects[0].amount.cents(), 4_000);
    }

    #[test]
    fn test_tender_rules() {
        let due = Money::from_cents(10_000);
        assert_eq!(
            settle_tender(due, &[card(9_000)], true).unwrap_err().reason_code(),
            ReasonCode::InsufficientPayment
        );
        assert_eq!(
            settle_tender(due, &[card(11_000)], true).unwrap_err().reason_code(),
            ReasonCode::ChangeRequiresCash
        );
        let t = settle_tender(due, &[card(9_000), cash(2_000)], true).unwrap();
        assert_eq!(t.change.cents(), 1_000);
        assert_eq!(t.cash_kept().cents(), 1_000);

        let missing_ref = PaymentInput::Transfer {
            amount: due,
            reference: " ".to_string(),
        };
        assert!(matches!(
            settle_tender(due, &[missing_ref], true),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_mutation_after_checkout_rejected() {
        let s = paid(vec![line("SOCK", 1, 500)]);
        assert_eq!(
            cancel(&s, Utc::now()).unwrap_err().to_string(),
            "POS_SALE in state PAID cannot perform CANCEL"
        );
        assert_eq!(
            add_line(&s, line("HAT", 1, 100)).unwrap_err().to_string(),
            "POS_SALE in state PAID cannot perform ADD_LINE"
        );
    }

    #[test]
    fn test_refund_with_restocking_fee_and_quarantine() {
        let s = paid(vec![line("BOOT", 2, 5_000)]);
        let policy = ReturnPolicy {
            restocking_fee_bps: 1_000,
            ..ReturnPolicy::default()
        };
        let tr = refund(
            &s,
            RefundRequest {
                adjustment_id: "adj-1".to_string(),
                items: vec![ret("sale-1-1", 1, ItemCondition::Damaged)],
                refund_method: PaymentMethod::Cash,
            },
            &policy,
            authority(Utc::now()),
        )
        .unwrap();

        let adj = tr.after.adjustments.last().unwrap();
        assert_eq!(adj.returned_subtotal.cents(), 5_000);
        assert_eq!(adj.restocking_fee.cents(), 500);
        assert_eq!(adj.refund_amount.cents(), 4_500);
        assert_eq!(tr.after.lines[0].returned_qty, 1);

        assert!(matches!(
            tr.stock_ops().next(),
            Some(StockOp::Credit { selector, qty: 1 }) if selector.pool == QUARANTINE_POOL
        ));
        let refund_cash = tr.cash_effects().next().unwrap();
        assert_eq!(refund_cash.kind, MovementKind::Refund);
        assert_eq!(refund_cash.amount.cents(), 4_500);
    }

    #[test]
    fn test_refund_epc_migrates_per_policy() {
        let mut l = line("BAG", 1, 9_000);
        l.epc = Some(EPC.to_string());
        let s = paid(vec![l]);

        let policy = ReturnPolicy {
            epc_return_mode: EpcReturnMode::ToPending,
            ..ReturnPolicy::default()
        };
        let tr = refund(
            &s,
            RefundRequest {
                adjustment_id: "adj-1".to_string(),
                items: vec![ret("sale-1-1", 1, ItemCondition::New)],
                refund_method: PaymentMethod::Card,
            },
            &policy,
            authority(Utc::now()),
        )
        .unwrap();
        assert!(matches!(
            tr.stock_ops().next(),
            Some(StockOp::Migrate { target: MigrateTarget::Pending, .. })
        ));
        assert_eq!(tr.cash_effects().count(), 0);

        // re-issue mode needs the replacement label
        let err = refund(
            &s,
            RefundRequest {
                adjustment_id: "adj-2".to_string(),
                items: vec![ret("sale-1-1", 1, ItemCondition::New)],
                refund_method: PaymentMethod::Card,
            },
            &ReturnPolicy::default(),
            authority(Utc::now()),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_cannot_return_more_than_sold() {
        let s = paid(vec![line("SOCK", 2, 500)]);
        let s = refund(
            &s,
            RefundRequest {
                adjustment_id: "adj-1".to_string(),
                items: vec![ret("sale-1-1", 2, ItemCondition::New)],
                refund_method: PaymentMethod::Card,
            },
            &ReturnPolicy::default(),
            authority(Utc::now()),
        )
        .unwrap()
        .after;
        let err = refund(
            &s,
            RefundRequest {
                adjustment_id: "adj-2".to_string(),
                items: vec![ret("sale-1-1", 1, ItemCondition::New)],
                refund_method: PaymentMethod::Card,
            },
            &ReturnPolicy::default(),
            authority(Utc::now()),
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ExceedsReturnable);
    }

    #[test]
    fn test_elapsed_window_needs_override() {
        let s = paid(vec![line("SOCK", 1, 500)]);
        let later = Utc::now() + Duration::days(45);
        let req = RefundRequest {
            adjustment_id: "adj-1".to_string(),
            items: vec![ret("sale-1-1", 1, ItemCondition::New)],
            refund_method: PaymentMethod::Card,
        };
        let err = refund(&s, req.clone(), &ReturnPolicy::default(), authority(later)).unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::ReturnWindowElapsed);

        let mut auth = authority(later);
        auth.manager_override = true;
        auth.role = Role::Manager;
        assert!(refund(&s, req, &ReturnPolicy::default(), auth).is_ok());
    }

    #[test]
    fn test_exchange_nets_into_one_adjustment() {
        let s = paid(vec![line("SHIRT-M", 1, 4_000)]);
        let tr = exchange(
            &s,
            ExchangeRequest {
                adjustment_id: "adj-x".to_string(),
                returns: vec![ret("sale-1-1", 1, ItemCondition::New)],
                new_lines: vec![line("SHIRT-L", 1, 5_500)],
                payments: vec![cash(2_000)],
                refund_method: None,
            },
            &ReturnPolicy::default(),
            authority(Utc::now()),
        )
        .unwrap();

        assert_eq!(tr.after.adjustments.len(), 1);
        let adj = &tr.after.adjustments[0];
        assert_eq!(adj.kind, AdjustmentKind::Exchange);
        assert_eq!(adj.net_adjustment.cents(), 1_500);
        assert_eq!(adj.added_line_ids, vec!["sale-1-2".to_string()]);
        // ticket totals only cover the original lines
        assert_eq!(tr.after.totals.total_due.cents(), 4_000);

        let settle = tr.cash_effects().next().unwrap();
        assert_eq!(settle.kind, MovementKind::SaleSettlement);
        assert_eq!(settle.amount.cents(), 1_500);
        assert_eq!(tr.stock_ops().count(), 2);
    }

    #[test]
    fn test_exchange_for_cheaper_item_refunds_difference() {
        let s = paid(vec![line("SHIRT-M", 1, 4_000)]);
        let req = ExchangeRequest {
            adjustment_id: "adj-x".to_string(),
            returns: vec![ret("sale-1-1", 1, ItemCondition::New)],
            new_lines: vec![line("TEE", 1, 2_500)],
            payments: vec![],
            refund_method: None,
        };
        let err = exchange(&s, req.clone(), &ReturnPolicy::default(), authority(Utc::now()))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let req = ExchangeRequest {
            refund_method: Some(PaymentMethod::Card),
            ..req
        };
        let tr = exchange(&s, req, &ReturnPolicy::default(), authority(Utc::now())).unwrap();
        let adj = &tr.after.adjustments[0];
        assert_eq!(adj.net_adjustment.cents(), -1_500);
        assert_eq!(adj.refund_amount.cents(), 1_500);
        assert_eq!(tr.cash_effects().count(), 0);
    }
}
