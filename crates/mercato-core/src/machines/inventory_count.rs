//! # InventoryCount
//!
//! Physical stock count of one (store, pool).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DRAFT ──START──► ACTIVE ◄──RESUME── PAUSED                             │
//! │                     │  └──PAUSE──────►  │                               │
//! │                     ├──SCAN──► ACTIVE   │                               │
//! │                     ├──CLOSE──► CLOSED ◄┤                               │
//! │  DRAFT/ACTIVE/PAUSED ──CANCEL──► CANCELLED                              │
//! │  CLOSED ──RECONCILE──► RECONCILED                                       │
//! │                                                                         │
//! │  Store lock: acquired on START, held while ACTIVE or PAUSED,            │
//! │  released on CLOSE or CANCEL.                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reconciliation compares the scans with the ledger as of reconcile time:
//!
//! | finding                         | delta           | stock op                    |
//! |---------------------------------|-----------------|-----------------------------|
//! | expected EPC not scanned        | MISSING_EPC     | debit → LOST                |
//! | scanned EPC never seen          | FOUND_EPC       | register as RFID            |
//! | scanned EPC RFID elsewhere      | RELOCATED_EPC   | debit there, credit here    |
//! | scanned EPC sold/lost/retired   | UNRESOLVED_EPC  | none                        |
//! | SKU counted ≠ bucket            | SKU_ADJUSTMENT  | credit or debit the bucket  |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use ts_rs::TS;

use super::{Effect, StateMachine, Transition};
use crate::error::{CoreError, CoreResult, ReasonCode, ValidationError};
use crate::types::{Disposition, EntityType, StockOp, StockSelector, StockStatus};
use crate::validation::{validate_epc, validate_quantity, validate_sku};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountStatus {
    Draft,
    Active,
    Paused,
    Closed,
    Cancelled,
    Reconciled,
}

impl CountStatus {
    pub const fn holds_lock(&self) -> bool {
        matches!(self, CountStatus::Active | CountStatus::Paused)
    }
}

impl fmt::Display for CountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CountStatus::Draft => "DRAFT",
            CountStatus::Active => "ACTIVE",
            CountStatus::Paused => "PAUSED",
            CountStatus::Closed => "CLOSED",
            CountStatus::Cancelled => "CANCELLED",
            CountStatus::Reconciled => "RECONCILED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountAction {
    Start,
    Pause,
    Resume,
    Scan,
    Close,
    Cancel,
    Reconcile,
}

impl fmt::Display for CountAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CountAction::Start => "START",
            CountAction::Pause => "PAUSE",
            CountAction::Resume => "RESUME",
            CountAction::Scan => "SCAN",
            CountAction::Close => "CLOSE",
            CountAction::Cancel => "CANCEL",
            CountAction::Reconcile => "RECONCILE",
        })
    }
}

pub struct CountMachine;

impl CountMachine {
    /// Target state of a legal action.
    fn target(state: CountStatus, action: CountAction) -> Option<CountStatus> {
        use CountAction as A;
        use CountStatus as S;
        match (state, action) {
            (S::Draft, A::Start) => Some(S::Active),
            (S::Active, A::Pause) => Some(S::Paused),
            (S::Paused, A::Resume) => Some(S::Active),
            (S::Active, A::Scan) => Some(S::Active),
            (S::Active | S::Paused, A::Close) => Some(S::Closed),
            (S::Draft | S::Active | S::Paused, A::Cancel) => Some(S::Cancelled),
            (S::Closed, A::Reconcile) => Some(S::Reconciled),
            _ => None,
        }
    }
}

impl StateMachine for CountMachine {
    type State = CountStatus;
    type Action = CountAction;

    const ENTITY: EntityType = EntityType::InventoryCount;

    fn allows(state: CountStatus, action: CountAction) -> bool {
        Self::target(state, action).is_some()
    }
}

/// What a transition does to the store lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockChange {
    Acquire,
    Release,
    Keep,
}

pub fn lock_change(from: CountStatus, to: CountStatus) -> LockChange {
    match (from.holds_lock(), to.holds_lock()) {
        (false, true) => LockChange::Acquire,
        (true, false) => LockChange::Release,
        _ => LockChange::Keep,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaKind {
    MissingEpc,
    FoundEpc,
    RelocatedEpc,
    UnresolvedEpc,
    SkuAdjustment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CountDelta {
    pub kind: DeltaKind,
    pub sku: String,
    pub epc: Option<String>,
    pub expected_qty: i64,
    pub counted_qty: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryCount {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub pool: String,
    pub name: String,
    pub status: CountStatus,
    pub scan_count: i64,
    pub deltas: Vec<CountDelta>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub started_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub reconciled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScanItem {
    pub sku: String,
    #[serde(default)]
    pub epc: Option<String>,
    pub qty: i64,
}

impl ScanItem {
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
        Ok(())
    }
}

/// Ledger contents of the counted (store, pool).
#[derive(Debug, Clone, Default)]
pub struct ExpectedStock {
    /// RFID units: epc → sku.
    pub epcs: BTreeMap<String, String>,
    /// PENDING buckets: sku → qty.
    pub buckets: BTreeMap<String, i64>,
}

/// Ledger row of a scanned EPC that is not expected here.
#[derive(Debug, Clone)]
pub struct KnownEpc {
    pub sku: String,
    pub status: StockStatus,
    pub location_id: String,
    pub pool: String,
}

#[derive(Debug, Clone)]
pub struct NewCount {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub pool: String,
    pub name: String,
    pub created_by: String,
    pub now: DateTime<Utc>,
}

/// none → DRAFT.
pub fn create(req: NewCount) -> CoreResult<InventoryCount> {
    if req.name.trim().is_empty() {
        return Err(ValidationError::required("name").into());
    }
    Ok(InventoryCount {
        id: req.id,
        tenant_id: req.tenant_id,
        store_id: req.store_id,
        pool: req.pool,
        name: req.name.trim().to_string(),
        status: CountStatus::Draft,
        scan_count: 0,
        deltas: Vec::new(),
        created_by: req.created_by,
        created_at: req.now,
        started_at: None,
        closed_at: None,
        reconciled_at: None,
    })
}

fn step(
    count: &InventoryCount,
    action: CountAction,
    now: DateTime<Utc>,
) -> CoreResult<InventoryCount> {
    let to = CountMachine::target(count.status, action)
        .ok_or_else(|| CoreError::invalid_transition(CountMachine::ENTITY, count.status, action))?;
    let mut after = count.clone();
    after.status = to;
    match action {
        CountAction::Start => after.started_at = Some(now),
        CountAction::Close => after.closed_at = Some(now),
        CountAction::Reconcile => after.reconciled_at = Some(now),
        _ => {}
    }
    Ok(after)
}

/// START, PAUSE, RESUME, CLOSE and CANCEL: status changes without payload.
pub fn transition(
    count: &InventoryCount,
    action: CountAction,
    now: DateTime<Utc>,
) -> CoreResult<Transition<InventoryCount>> {
    if matches!(action, CountAction::Scan | CountAction::Reconcile) {
        return Err(CoreError::rule(
            ReasonCode::InvalidInput,
            format!("{} carries a payload and has its own entry point", action),
        ));
    }
    let after = step(count, action, now)?;
    Ok(Transition::new(count.clone(), after))
}

/// Records a scan batch; only while ACTIVE.
pub fn scan(
    count: &InventoryCount,
    items: &[ScanItem],
    now: DateTime<Utc>,
) -> CoreResult<Transition<InventoryCount>> {
    let mut after = step(count, CountAction::Scan, now)?;
    if items.is_empty() {
        return Err(CoreError::rule(ReasonCode::EmptyLines, "scan batch is empty"));
    }
    for item in items {
        item.validate()?;
    }
    after.scan_count += items.len() as i64;
    Ok(Transition::new(count.clone(), after))
}

/// CLOSED → RECONCILED. Emits the stock ops that make the ledger match the scans.
pub fn reconcile(
    count: &InventoryCount,
    expected: &ExpectedStock,
    scans: &[ScanItem],
    known: &HashMap<String, KnownEpc>,
    now: DateTime<Utc>,
) -> CoreResult<Transition<InventoryCount>> {
    let mut after = step(count, CountAction::Reconcile, now)?;

    let mut scanned_epcs: BTreeMap<&str, &str> = BTreeMap::new();
    let mut counted_skus: BTreeMap<&str, i64> = BTreeMap::new();
    for item in scans {
        match &item.epc {
            Some(epc) => {
                scanned_epcs.entry(epc.as_str()).or_insert(item.sku.as_str());
            }
            None => *counted_skus.entry(item.sku.as_str()).or_insert(0) += item.qty,
        }
    }

    let mut deltas = Vec::new();
    let mut effects = Vec::new();

    for (epc, sku) in &expected.epcs {
        if scanned_epcs.contains_key(epc.as_str()) {
            continue;
        }
        deltas.push(CountDelta {
            kind: DeltaKind::MissingEpc,
            sku: sku.clone(),
            epc: Some(epc.clone()),
            expected_qty: 1,
            counted_qty: 0,
            delta: -1,
        });
        effects.push(Effect::Stock(StockOp::Debit {
            selector: StockSelector::epc(epc.clone(), &count.store_id, &count.pool),
            qty: 1,
            disposition: Disposition::Lost,
        }));
    }

    for (epc, sku) in &scanned_epcs {
        if expected.epcs.contains_key(*epc) {
            continue;
        }
        let (kind, delta) = match known.get(*epc) {
            None => {
                effects.push(Effect::Stock(StockOp::Register {
                    epc: epc.to_string(),
                    sku: sku.to_string(),
                    location_id: count.store_id.clone(),
                    pool: count.pool.clone(),
                }));
                (DeltaKind::FoundEpc, 1)
            }
            Some(unit) if unit.status == StockStatus::Rfid => {
                effects.push(Effect::Stock(StockOp::Debit {
                    selector: StockSelector::epc(*epc, &unit.location_id, &unit.pool),
                    qty: 1,
                    disposition: Disposition::InTransit,
                }));
                effects.push(Effect::Stock(StockOp::Credit {
                    selector: StockSelector::epc(*epc, &count.store_id, &count.pool),
                    qty: 1,
                }));
                (DeltaKind::RelocatedEpc, 1)
            }
            Some(_) => (DeltaKind::UnresolvedEpc, 0),
        };
        let sku = known
            .get(*epc)
            .map(|u| u.sku.clone())
            .unwrap_or_else(|| sku.to_string());
        deltas.push(CountDelta {
            kind,
            sku,
            epc: Some(epc.to_string()),
            expected_qty: 0,
            counted_qty: 1,
            delta,
        });
    }

    let skus: BTreeSet<&str> = expected
        .buckets
        .keys()
        .map(String::as_str)
        .chain(counted_skus.keys().copied())
        .collect();
    for sku in skus {
        let expected_qty = expected.buckets.get(sku).copied().unwrap_or(0);
        let counted_qty = counted_skus.get(sku).copied().unwrap_or(0);
        let delta = counted_qty - expected_qty;
        if delta == 0 {
            continue;
        }
        let selector = StockSelector::sku(sku, &count.store_id, &count.pool);
        effects.push(Effect::Stock(if delta > 0 {
            StockOp::Credit { selector, qty: delta }
        } else {
            StockOp::Debit {
                selector,
                qty: -delta,
                disposition: Disposition::Lost,
            }
        }));
        deltas.push(CountDelta {
            kind: DeltaKind::SkuAdjustment,
            sku: sku.to_string(),
            epc: None,
            expected_qty,
            counted_qty,
            delta,
        });
    }

    after.deltas = deltas;
    Ok(Transition::new(count.clone(), after).with_effects(effects))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_POOL;

    const E1: &str = "E28011606000020800000001";
    const E2: &str = "E28011606000020800000002";
    const E3: &str = "E28011606000020800000003";
    const E4: &str = "E28011606000020800000004";

    fn draft() -> InventoryCount {
        create(NewCount {
            id: "ic-1".to_string(),
            tenant_id: "t-1".to_string(),
            store_id: "s-1".to_string(),
            pool: DEFAULT_POOL.to_string(),
            name: "June cycle count".to_string(),
            created_by: "u-1".to_string(),
            now: Utc::now(),
        })
        .unwrap()
    }

    fn go(count: &InventoryCount, action: CountAction) -> InventoryCount {
        transition(count, action, Utc::now()).unwrap().after
    }

    fn epc_scan(epc: &str, sku: &str) -> ScanItem {
        ScanItem {
            sku: sku.to_string(),
            epc: Some(epc.to_string()),
            qty: 1,
        }
    }

    #[test]
    fn test_lifecycle_and_lock_changes() {
        let c = draft();
        let active = go(&c, CountAction::Start);
        assert_eq!(lock_change(c.status, active.status), LockChange::Acquire);
        let paused = go(&active, CountAction::Pause);
        assert_eq!(lock_change(active.status, paused.status), LockChange::Keep);
        let active = go(&paused, CountAction::Resume);
        let closed = go(&active, CountAction::Close);
        assert_eq!(lock_change(active.status, closed.status), LockChange::Release);
        assert!(closed.closed_at.is_some());
    }

    #[test]
    fn test_scan_only_while_active() {
        let c = draft();
        let err = scan(&c, &[epc_scan(E1, "TEE")], Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "INVENTORY_COUNT in state DRAFT cannot perform SCAN");

        let paused = go(&go(&c, CountAction::Start), CountAction::Pause);
        let err = scan(&paused, &[epc_scan(E1, "TEE")], Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "INVENTORY_COUNT in state PAUSED cannot perform SCAN");

        let active = go(&paused, CountAction::Resume);
        let t = scan(&active, &[epc_scan(E1, "TEE")], Utc::now()).unwrap();
        assert_eq!(t.after.scan_count, 1);
    }

    #[test]
    fn test_illegal_actions_name_state_and_action() {
        let c = draft();
        let err = transition(&c, CountAction::Close, Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "INVENTORY_COUNT in state DRAFT cannot perform CLOSE");

        let cancelled = go(&c, CountAction::Cancel);
        let err = transition(&cancelled, CountAction::Start, Utc::now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "INVENTORY_COUNT in state CANCELLED cannot perform START"
        );
    }

    #[test]
    fn test_reconcile_requires_closed() {
        let active = go(&draft(), CountAction::Start);
        let err = reconcile(
            &active,
            &ExpectedStock::default(),
            &[],
            &HashMap::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.reason_code(), ReasonCode::InvalidStateTransition);
    }

    #[test]
    fn test_reconcile_deltas() {
        let closed = go(&go(&draft(), CountAction::Start), CountAction::Close);

        let mut expected = ExpectedStock::default();
        expected.epcs.insert(E1.to_string(), "TEE".to_string());
        expected.epcs.insert(E2.to_string(), "TEE".to_string());
        expected.buckets.insert("SOCK".to_string(), 10);
        expected.buckets.insert("CAP".to_string(), 2);

        let mut known = HashMap::new();
        known.insert(
            E4.to_string(),
            KnownEpc {
                sku: "TEE".to_string(),
                status: StockStatus::Rfid,
                location_id: "s-2".to_string(),
                pool: DEFAULT_POOL.to_string(),
            },
        );

        let scans = vec![
            epc_scan(E1, "TEE"),
            epc_scan(E1, "TEE"),
            epc_scan(E3, "TEE"),
            epc_scan(E4, "TEE"),
            ScanItem {
                sku: "SOCK".to_string(),
                epc: None,
                qty: 7,
            },
            ScanItem {
                sku: "SOCK".to_string(),
                epc: None,
                qty: 1,
            },
            ScanItem {
                sku: "CAP".to_string(),
                epc: None,
                qty: 2,
            },
        ];

        let t = reconcile(&closed, &expected, &scans, &known, Utc::now()).unwrap();
        assert_eq!(t.after.status, CountStatus::Reconciled);

        let kinds: Vec<DeltaKind> = t.after.deltas.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeltaKind::MissingEpc,
                DeltaKind::FoundEpc,
                DeltaKind::RelocatedEpc,
                DeltaKind::SkuAdjustment
            ]
        );
        let sock = t.after.deltas.last().unwrap();
        assert_eq!((sock.expected_qty, sock.counted_qty, sock.delta), (10, 8, -2));

        let ops: Vec<_> = t.stock_ops().collect();
        assert_eq!(ops.len(), 5);
        assert!(matches!(ops[0], StockOp::Debit { disposition: Disposition::Lost, .. }));
        assert!(matches!(ops[1], StockOp::Register { epc, .. } if epc == E3));
        assert!(matches!(
            ops[2],
            StockOp::Debit { selector, disposition: Disposition::InTransit, .. }
                if selector.location_id == "s-2"
        ));
        assert!(matches!(ops[3], StockOp::Credit { selector, .. } if selector.location_id == "s-1"));
        assert!(matches!(ops[4], StockOp::Debit { qty: 2, .. }));
    }
}
