//! # Commands
//!
//! Every state-changing request is one variant of [`Command`]. Payloads are
//! validated once, at deserialization and in the core state machine; nothing
//! downstream looks keys up in loose JSON.
//!
//! ```text
//! ┌────────────────────────────┬─────────────────────────────────────────────┐
//! │ Command                    │ Route (POST)                                │
//! ├────────────────────────────┼─────────────────────────────────────────────┤
//! │ ImportStock                │ /v1/stock/import                            │
//! │ MigrateStock               │ /v1/stock/migrate                           │
//! │ CreateTransfer             │ /v1/transfers                               │
//! │ DispatchTransfer           │ /v1/transfers/{id}/dispatch                 │
//! │ ReceiveTransfer            │ /v1/transfers/{id}/receive                  │
//! │ ReportTransferShortages    │ /v1/transfers/{id}/shortages                │
//! │ ResolveTransferShortages   │ /v1/transfers/{id}/shortages/resolve        │
//! │ CancelTransfer             │ /v1/transfers/{id}/cancel                   │
//! │ CreateSale                 │ /v1/sales                                   │
//! │ AddSaleLine                │ /v1/sales/{id}/lines                        │
//! │ RemoveSaleLine             │ /v1/sales/{id}/lines/{line}/remove          │
//! │ CheckoutSale               │ /v1/sales/{id}/checkout                     │
//! │ CancelSale                 │ /v1/sales/{id}/cancel                       │
//! │ RefundSale                 │ /v1/sales/{id}/refund                       │
//! │ ExchangeSale               │ /v1/sales/{id}/exchange                     │
//! │ OpenCashSession            │ /v1/cash/sessions                           │
//! │ CashIn / CashOut           │ /v1/cash/sessions/{id}/cash-in | cash-out   │
//! │ CloseCashSession           │ /v1/cash/sessions/{id}/close                │
//! │ CloseDay                   │ /v1/cash/day-close                          │
//! │ CreateCount                │ /v1/inventory-counts                        │
//! │ TransitionCount            │ /v1/inventory-counts/{id}/{action}          │
//! │ ScanCount                  │ /v1/inventory-counts/{id}/scans             │
//! │ ReconcileCount             │ /v1/inventory-counts/{id}/reconcile         │
//! └────────────────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! The concrete route (ids filled in) is the idempotency `endpoint`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use mercato_core::machines::day_close::ForceCloseMode;
use mercato_core::machines::inventory_count::{CountAction, ScanItem};
use mercato_core::machines::sale::{NewSaleLine, PaymentInput, ReturnItem};
use mercato_core::machines::transfer::{LineQty, NewTransferLine, ResolveShortage};
use mercato_core::{EntityType, MigrateTarget, Money, PaymentMethod};

/// All mutations go through the gateway as POST.
pub const MUTATION_METHOD: &str = "POST";

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportItem {
    pub sku: String,
    #[serde(default)]
    pub epc: Option<String>,
    #[serde(default = "one")]
    pub qty: i64,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStock {
    pub store_id: String,
    #[serde(default)]
    pub pool: Option<String>,
    pub items: Vec<ImportItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateStock {
    pub store_id: String,
    pub epc: String,
    pub target: MigrateTarget,
    /// Pool the migrated unit lands in; defaults to its current pool.
    #[serde(default)]
    pub pool: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub origin_store_id: String,
    pub destination_store_id: String,
    #[serde(default)]
    pub pool: Option<String>,
    pub lines: Vec<NewTransferLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRef {
    pub transfer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferQuantities {
    pub transfer_id: String,
    pub items: Vec<LineQty>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveTransferShortages {
    pub transfer_id: String,
    pub items: Vec<ResolveShortage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSale {
    pub store_id: String,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub lines: Vec<NewSaleLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRef {
    pub sale_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSaleLine {
    pub sale_id: String,
    pub line: NewSaleLine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveSaleLine {
    pub sale_id: String,
    pub line_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSale {
    pub sale_id: String,
    pub payments: Vec<PaymentInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundSale {
    pub sale_id: String,
    pub items: Vec<ReturnItem>,
    pub refund_method: PaymentMethod,
    #[serde(default)]
    pub receipt_presented: bool,
    #[serde(default)]
    pub manager_override: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSale {
    pub sale_id: String,
    pub returns: Vec<ReturnItem>,
    pub new_lines: Vec<NewSaleLine>,
    #[serde(default)]
    pub payments: Vec<PaymentInput>,
    #[serde(default)]
    pub refund_method: Option<PaymentMethod>,
    #[serde(default)]
    pub receipt_presented: bool,
    #[serde(default)]
    pub manager_override: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenCashSession {
    pub store_id: String,
    pub opening_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashMovementRequest {
    pub session_id: String,
    pub amount: Money,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseCashSession {
    pub session_id: String,
    pub counted_cash: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseDay {
    pub store_id: String,
    /// Defaults to today in the store's offset.
    #[serde(default)]
    pub business_date: Option<NaiveDate>,
    #[serde(default)]
    pub force_if_open_sessions: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// Overrides `[day_close] force_close_mode` for this request.
    #[serde(default)]
    pub force_close_mode: Option<ForceCloseMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCount {
    pub store_id: String,
    #[serde(default)]
    pub pool: Option<String>,
    pub name: String,
}

/// Payload-free count lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountLifecycle {
    Start,
    Pause,
    Resume,
    Close,
    Cancel,
}

impl CountLifecycle {
    pub const fn action(&self) -> CountAction {
        match self {
            CountLifecycle::Start => CountAction::Start,
            CountLifecycle::Pause => CountAction::Pause,
            CountLifecycle::Resume => CountAction::Resume,
            CountLifecycle::Close => CountAction::Close,
            CountLifecycle::Cancel => CountAction::Cancel,
        }
    }

    /// Path segment, e.g. `start`.
    pub const fn segment(&self) -> &'static str {
        match self {
            CountLifecycle::Start => "start",
            CountLifecycle::Pause => "pause",
            CountLifecycle::Resume => "resume",
            CountLifecycle::Close => "close",
            CountLifecycle::Cancel => "cancel",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "start" => Some(CountLifecycle::Start),
            "pause" => Some(CountLifecycle::Pause),
            "resume" => Some(CountLifecycle::Resume),
            "close" => Some(CountLifecycle::Close),
            "cancel" => Some(CountLifecycle::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for CountLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionCount {
    pub count_id: String,
    pub action: CountLifecycle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCount {
    pub count_id: String,
    pub items: Vec<ScanItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountRef {
    pub count_id: String,
}

// =============================================================================
// Command
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    ImportStock(ImportStock),
    MigrateStock(MigrateStock),

    CreateTransfer(CreateTransfer),
    DispatchTransfer(TransferRef),
    ReceiveTransfer(TransferQuantities),
    ReportTransferShortages(TransferQuantities),
    ResolveTransferShortages(ResolveTransferShortages),
    CancelTransfer(TransferRef),

    CreateSale(CreateSale),
    AddSaleLine(AddSaleLine),
    RemoveSaleLine(RemoveSaleLine),
    CheckoutSale(CheckoutSale),
    CancelSale(SaleRef),
    RefundSale(RefundSale),
    ExchangeSale(ExchangeSale),

    OpenCashSession(OpenCashSession),
    CashIn(CashMovementRequest),
    CashOut(CashMovementRequest),
    CloseCashSession(CloseCashSession),
    CloseDay(CloseDay),

    CreateCount(CreateCount),
    TransitionCount(TransitionCount),
    ScanCount(ScanCount),
    ReconcileCount(CountRef),
}

impl Command {
    /// Concrete route of this command; the idempotency endpoint.
    pub fn route(&self) -> String {
        match self {
            Command::ImportStock(_) => "/v1/stock/import".to_string(),
            Command::MigrateStock(_) => "/v1/stock/migrate".to_string(),

            Command::CreateTransfer(_) => "/v1/transfers".to_string(),
            Command::DispatchTransfer(c) => format!("/v1/transfers/{}/dispatch", c.transfer_id),
            Command::ReceiveTransfer(c) => format!("/v1/transfers/{}/receive", c.transfer_id),
            Command::ReportTransferShortages(c) => {
                format!("/v1/transfers/{}/shortages", c.transfer_id)
            }
            Command::ResolveTransferShortages(c) => {
                format!("/v1/transfers/{}/shortages/resolve", c.transfer_id)
            }
            Command::CancelTransfer(c) => format!("/v1/transfers/{}/cancel", c.transfer_id),

            Command::CreateSale(_) => "/v1/sales".to_string(),
            Command::AddSaleLine(c) => format!("/v1/sales/{}/lines", c.sale_id),
            Command::RemoveSaleLine(c) => {
                format!("/v1/sales/{}/lines/{}/remove", c.sale_id, c.line_id)
            }
            Command::CheckoutSale(c) => format!("/v1/sales/{}/checkout", c.sale_id),
            Command::CancelSale(c) => format!("/v1/sales/{}/cancel", c.sale_id),
            Command::RefundSale(c) => format!("/v1/sales/{}/refund", c.sale_id),
            Command::ExchangeSale(c) => format!("/v1/sales/{}/exchange", c.sale_id),

            Command::OpenCashSession(_) => "/v1/cash/sessions".to_string(),
            Command::CashIn(c) => format!("/v1/cash/sessions/{}/cash-in", c.session_id),
            Command::CashOut(c) => format!("/v1/cash/sessions/{}/cash-out", c.session_id),
            Command::CloseCashSession(c) => format!("/v1/cash/sessions/{}/close", c.session_id),
            Command::CloseDay(_) => "/v1/cash/day-close".to_string(),

            Command::CreateCount(_) => "/v1/inventory-counts".to_string(),
            Command::TransitionCount(c) => {
                format!("/v1/inventory-counts/{}/{}", c.count_id, c.action.segment())
            }
            Command::ScanCount(c) => format!("/v1/inventory-counts/{}/scans", c.count_id),
            Command::ReconcileCount(c) => format!("/v1/inventory-counts/{}/reconcile", c.count_id),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Command::ImportStock(_) | Command::MigrateStock(_) => EntityType::Stock,
            Command::CreateTransfer(_)
            | Command::DispatchTransfer(_)
            | Command::ReceiveTransfer(_)
            | Command::ReportTransferShortages(_)
            | Command::ResolveTransferShortages(_)
            | Command::CancelTransfer(_) => EntityType::Transfer,
            Command::CreateSale(_)
            | Command::AddSaleLine(_)
            | Command::RemoveSaleLine(_)
            | Command::CheckoutSale(_)
            | Command::CancelSale(_)
            | Command::RefundSale(_)
            | Command::ExchangeSale(_) => EntityType::PosSale,
            Command::OpenCashSession(_)
            | Command::CashIn(_)
            | Command::CashOut(_)
            | Command::CloseCashSession(_) => EntityType::PosCashSession,
            Command::CloseDay(_) => EntityType::PosCashDayClose,
            Command::CreateCount(_)
            | Command::TransitionCount(_)
            | Command::ScanCount(_)
            | Command::ReconcileCount(_) => EntityType::InventoryCount,
        }
    }

    /// Audit action name.
    pub fn action(&self) -> String {
        let name = match self {
            Command::ImportStock(_) => "STOCK_IMPORT",
            Command::MigrateStock(_) => "STOCK_MIGRATE",
            Command::CreateTransfer(_) => "TRANSFER_CREATE",
            Command::DispatchTransfer(_) => "TRANSFER_DISPATCH",
            Command::ReceiveTransfer(_) => "TRANSFER_RECEIVE",
            Command::ReportTransferShortages(_) => "TRANSFER_REPORT_SHORTAGES",
            Command::ResolveTransferShortages(_) => "TRANSFER_RESOLVE_SHORTAGES",
            Command::CancelTransfer(_) => "TRANSFER_CANCEL",
            Command::CreateSale(_) => "SALE_CREATE",
            Command::AddSaleLine(_) => "SALE_ADD_LINE",
            Command::RemoveSaleLine(_) => "SALE_REMOVE_LINE",
            Command::CheckoutSale(_) => "SALE_CHECKOUT",
            Command::CancelSale(_) => "SALE_CANCEL",
            Command::RefundSale(_) => "SALE_REFUND_ITEMS",
            Command::ExchangeSale(_) => "SALE_EXCHANGE_ITEMS",
            Command::OpenCashSession(_) => "CASH_SESSION_OPEN",
            Command::CashIn(_) => "CASH_IN",
            Command::CashOut(_) => "CASH_OUT",
            Command::CloseCashSession(_) => "CASH_SESSION_CLOSE",
            Command::CloseDay(_) => "CASH_DAY_CLOSE",
            Command::CreateCount(_) => "COUNT_CREATE",
            Command::TransitionCount(c) => return format!("COUNT_{}", c.action),
            Command::ScanCount(_) => "COUNT_SCAN",
            Command::ReconcileCount(_) => "COUNT_RECONCILE",
        };
        name.to_string()
    }

    /// Id of the existing entity the command acts on, if any.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Command::MigrateStock(c) => Some(c.epc.as_str()),
            Command::DispatchTransfer(c) | Command::CancelTransfer(c) => Some(c.transfer_id.as_str()),
            Command::ReceiveTransfer(c) | Command::ReportTransferShortages(c) => {
                Some(c.transfer_id.as_str())
            }
            Command::ResolveTransferShortages(c) => Some(c.transfer_id.as_str()),
            Command::AddSaleLine(c) => Some(c.sale_id.as_str()),
            Command::RemoveSaleLine(c) => Some(c.sale_id.as_str()),
            Command::CheckoutSale(c) => Some(c.sale_id.as_str()),
            Command::CancelSale(c) => Some(c.sale_id.as_str()),
            Command::RefundSale(c) => Some(c.sale_id.as_str()),
            Command::ExchangeSale(c) => Some(c.sale_id.as_str()),
            Command::CashIn(c) | Command::CashOut(c) => Some(c.session_id.as_str()),
            Command::CloseCashSession(c) => Some(c.session_id.as_str()),
            Command::TransitionCount(c) => Some(c.count_id.as_str()),
            Command::ScanCount(c) => Some(c.count_id.as_str()),
            Command::ReconcileCount(c) => Some(c.count_id.as_str()),
            Command::ImportStock(_)
            | Command::CreateTransfer(_)
            | Command::CreateSale(_)
            | Command::OpenCashSession(_)
            | Command::CloseDay(_)
            | Command::CreateCount(_) => None,
        }
    }

    /// Stores named directly in the payload. Each must belong to the tenant.
    pub fn referenced_stores(&self) -> Vec<&str> {
        match self {
            Command::ImportStock(c) => vec![c.store_id.as_str()],
            Command::MigrateStock(c) => vec![c.store_id.as_str()],
            Command::CreateTransfer(c) => vec![c.origin_store_id.as_str(), c.destination_store_id.as_str()],
            Command::CreateSale(c) => vec![c.store_id.as_str()],
            Command::OpenCashSession(c) => vec![c.store_id.as_str()],
            Command::CloseDay(c) => vec![c.store_id.as_str()],
            Command::CreateCount(c) => vec![c.store_id.as_str()],
            _ => Vec::new(),
        }
    }

    /// Store the actor acts at, when the payload names it.
    ///
    /// Commands on existing entities check the entity's store after loading.
    pub fn acting_store(&self) -> Option<&str> {
        match self {
            Command::CreateTransfer(c) => Some(c.origin_store_id.as_str()),
            other => other.referenced_stores().first().copied(),
        }
    }

    /// Whether success creates a new entity (201) rather than changing one (200).
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Command::CreateTransfer(_)
                | Command::CreateSale(_)
                | Command::OpenCashSession(_)
                | Command::CloseDay(_)
                | Command::CreateCount(_)
        )
    }
}
