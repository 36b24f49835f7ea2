//! # Domain Types
//!
//! Identity, scope and stock-ledger vocabulary shared by every state machine.
//!
//! ## Type Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Type Relationships                              │
//! │                                                                         │
//! │  Actor ──── tenant_id ──── role ──── StoreScope (All | Stores[..])      │
//! │    │                                                                    │
//! │    └──► every command runs on behalf of exactly one Actor               │
//! │                                                                         │
//! │  StockSelector ──┬── UnitRef::Epc  (serialized, qty always 1)           │
//! │                  └── UnitRef::Sku  (PENDING bucket, qty ≥ 1)            │
//! │        + location_id + pool                                             │
//! │                                                                         │
//! │  StockOp = Debit | Credit | Register | Migrate | WriteOff               │
//! │    emitted by state machines, applied by the stock ledger               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

/// Pool every unit lands in unless a caller names another one.
pub const DEFAULT_POOL: &str = "sale";

/// Pool that damaged returns are credited to.
pub const QUARANTINE_POOL: &str = "quarantine";

// =============================================================================
// Entity Types
// =============================================================================

/// Entity kinds that own a state machine or ledger.
///
/// Used in transition errors and as `entity_type` in audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Stock,
    Transfer,
    PosSale,
    PosCashSession,
    PosCashDayClose,
    InventoryCount,
}

impl EntityType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Stock => "STOCK",
            EntityType::Transfer => "TRANSFER",
            EntityType::PosSale => "POS_SALE",
            EntityType::PosCashSession => "POS_CASH_SESSION",
            EntityType::PosCashDayClose => "POS_CASH_DAY_CLOSE",
            EntityType::InventoryCount => "INVENTORY_COUNT",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Actor & Scope
// =============================================================================

/// Role of the authenticated actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Cashier,
    Manager,
    Admin,
}

impl Role {
    /// Elevated roles may force a day close, write off transfer shortages
    /// and override an elapsed return window.
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Cashier => "CASHIER",
            Role::Manager => "MANAGER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stores an actor may touch inside their tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "store_ids", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreScope {
    /// Every store of the tenant.
    All,
    /// Only the listed stores.
    Stores(Vec<String>),
}

impl StoreScope {
    pub fn permits(&self, store_id: &str) -> bool {
        match self {
            StoreScope::All => true,
            StoreScope::Stores(ids) => ids.iter().any(|id| id == store_id),
        }
    }
}

/// The authenticated identity a mutation runs on behalf of.
///
/// Threaded explicitly through every call; there is no ambient
/// "current user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub user_id: String,
    pub tenant_id: String,
    pub role: Role,
    pub store_scope: StoreScope,
}

impl Actor {
    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }
}

// =============================================================================
// Stock Vocabulary
// =============================================================================

/// Status of a row in the stock pool ledger.
///
/// Only `Rfid` and `Pending` count towards the advertised total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    /// Serialized unit on the shelf.
    Rfid,
    /// Fungible bucket quantity.
    Pending,
    Sold,
    /// Retired label; the EPC is never issued again.
    NonReusableLabel,
    InTransit,
    Lost,
}

impl StockStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Rfid => "RFID",
            StockStatus::Pending => "PENDING",
            StockStatus::Sold => "SOLD",
            StockStatus::NonReusableLabel => "NON_REUSABLE_LABEL",
            StockStatus::InTransit => "IN_TRANSIT",
            StockStatus::Lost => "LOST",
        }
    }

    /// Whether units in this status are part of `TOTAL`.
    pub const fn is_available(&self) -> bool {
        matches!(self, StockStatus::Rfid | StockStatus::Pending)
    }
}

impl fmt::Display for StockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity half of a stock selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitRef {
    Epc(String),
    Sku(String),
}

impl UnitRef {
    pub fn is_epc(&self) -> bool {
        matches!(self, UnitRef::Epc(_))
    }

    pub fn epc(&self) -> Option<&str> {
        match self {
            UnitRef::Epc(epc) => Some(epc),
            UnitRef::Sku(_) => None,
        }
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRef::Epc(epc) => write!(f, "epc:{}", epc),
            UnitRef::Sku(sku) => write!(f, "sku:{}", sku),
        }
    }
}

/// Where a debit or credit applies: a unit identity at a (location, pool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockSelector {
    pub unit: UnitRef,
    pub location_id: String,
    pub pool: String,
}

impl StockSelector {
    pub fn epc(epc: impl Into<String>, location_id: impl Into<String>, pool: impl Into<String>) -> Self {
        StockSelector {
            unit: UnitRef::Epc(epc.into()),
            location_id: location_id.into(),
            pool: pool.into(),
        }
    }

    pub fn sku(sku: impl Into<String>, location_id: impl Into<String>, pool: impl Into<String>) -> Self {
        StockSelector {
            unit: UnitRef::Sku(sku.into()),
            location_id: location_id.into(),
            pool: pool.into(),
        }
    }
}

/// Terminal status of an EPC debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Sold,
    InTransit,
    Lost,
}

impl Disposition {
    pub const fn status(&self) -> StockStatus {
        match self {
            Disposition::Sold => StockStatus::Sold,
            Disposition::InTransit => StockStatus::InTransit,
            Disposition::Lost => StockStatus::Lost,
        }
    }
}

/// Where a retired EPC's unit goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "to", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrateTarget {
    /// Collapse into the PENDING bucket of the EPC's SKU.
    Pending,
    /// Re-issue the unit under a fresh EPC.
    Rfid { new_epc: String },
}

/// One instruction for the stock pool ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockOp {
    /// EPC: RFID at the selector → disposition. SKU: PENDING bucket −qty.
    Debit {
        selector: StockSelector,
        qty: i64,
        disposition: Disposition,
    },
    /// EPC: IN_TRANSIT → RFID at the selector. SKU: PENDING bucket +qty.
    Credit { selector: StockSelector, qty: i64 },
    /// A never-seen EPC enters the ledger as RFID.
    Register {
        epc: String,
        sku: String,
        location_id: String,
        pool: String,
    },
    /// Retire an RFID or SOLD EPC and re-home its unit.
    ///
    /// `pool` overrides the destination pool (damaged returns).
    Migrate {
        epc: String,
        target: MigrateTarget,
        pool: Option<String>,
    },
    /// IN_TRANSIT EPC declared lost.
    WriteOff { epc: String },
}

// =============================================================================
// Payments & Returns
// =============================================================================

/// Tender type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition of a returned item, as assessed at the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCondition {
    New,
    Opened,
    Damaged,
}

impl ItemCondition {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ItemCondition::New => "NEW",
            ItemCondition::Opened => "OPENED",
            ItemCondition::Damaged => "DAMAGED",
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
