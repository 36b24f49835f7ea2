//! # Entity Services
//!
//! One module per workflow entity. A service loads current state through
//! the unit of work, runs the core state machine, persists the `after`
//! snapshot and applies the transition's effects. It never commits; the
//! gateway does that after the stock invariant and audit writes succeed.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  load (tenant, id) ─► machine::action(before, payload) ─► Transition    │
//! │                                                             │           │
//! │        ┌────────────────────────────────────────────────────┘           │
//! │        ▼                                                                │
//! │  repo.update(after)   effects::apply_stock(ops)   effects::apply_cash   │
//! │        │                        │                        │              │
//! │        └──────────────► Applied { data, scopes, events } ◄┘              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use mercato_core::{Actor, EntityType};
use mercato_db::{StockScope, UnitOfWork};

use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::EngineResult;

pub mod cash;
pub mod day_close;
mod effects;
pub mod inventory_count;
pub mod sale;
pub mod stock;
pub mod transfer;

/// Per-request facts every service needs.
pub struct Context<'a> {
    pub actor: &'a Actor,
    pub config: &'a EngineConfig,
    /// Audit action of the command being applied.
    pub action: String,
    pub now: DateTime<Utc>,
}

impl Context<'_> {
    pub fn tenant_id(&self) -> &str {
        &self.actor.tenant_id
    }
}

/// One audit event to write on commit.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Value,
}

impl AuditEntry {
    pub fn new<T: Serialize>(
        action: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        before: Option<&T>,
        after: &T,
    ) -> EngineResult<Self> {
        Ok(AuditEntry {
            action: action.into(),
            entity_type,
            entity_id: entity_id.into(),
            before: before.map(serde_json::to_value).transpose()?,
            after: serde_json::to_value(after)?,
        })
    }
}

/// What a service did, before commit.
#[derive(Debug, Clone)]
pub struct Applied {
    /// Response `data`.
    pub data: Value,
    /// Ledger cells touched; verified before commit.
    pub scopes: Vec<StockScope>,
    pub events: Vec<AuditEntry>,
}

impl Applied {
    pub fn new(data: Value) -> Self {
        Applied {
            data,
            scopes: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Response `data` is the serialized entity.
    pub fn of<T: Serialize>(entity: &T) -> EngineResult<Self> {
        Ok(Applied::new(serde_json::to_value(entity)?))
    }

    pub fn with_scopes(mut self, scopes: Vec<StockScope>) -> Self {
        self.scopes.extend(scopes);
        self
    }

    pub fn with_event(mut self, event: AuditEntry) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = AuditEntry>) -> Self {
        self.events.extend(events);
        self
    }
}

/// Routes a command to its service.
pub async fn apply(uow: &mut UnitOfWork, ctx: &Context<'_>, command: &Command) -> EngineResult<Applied> {
    match command {
        Command::ImportStock(c) => stock::import(uow, ctx, c).await,
        Command::MigrateStock(c) => stock::migrate(uow, ctx, c).await,

        Command::CreateTransfer(c) => transfer::create(uow, ctx, c).await,
        Command::DispatchTransfer(c) => transfer::dispatch(uow, ctx, c).await,
        Command::ReceiveTransfer(c) => transfer::receive(uow, ctx, c).await,
        Command::ReportTransferShortages(c) => transfer::report_shortages(uow, ctx, c).await,
        Command::ResolveTransferShortages(c) => transfer::resolve_shortages(uow, ctx, c).await,
        Command::CancelTransfer(c) => transfer::cancel(uow, ctx, c).await,

        Command::CreateSale(c) => sale::create(uow, ctx, c).await,
        Command::AddSaleLine(c) => sale::add_line(uow, ctx, c).await,
        Command::RemoveSaleLine(c) => sale::remove_line(uow, ctx, c).await,
        Command::CheckoutSale(c) => sale::checkout(uow, ctx, c).await,
        Command::CancelSale(c) => sale::cancel(uow, ctx, c).await,
        Command::RefundSale(c) => sale::refund(uow, ctx, c).await,
        Command::ExchangeSale(c) => sale::exchange(uow, ctx, c).await,

        Command::OpenCashSession(c) => cash::open(uow, ctx, c).await,
        Command::CashIn(c) => cash::cash_in(uow, ctx, c).await,
        Command::CashOut(c) => cash::cash_out(uow, ctx, c).await,
        Command::CloseCashSession(c) => cash::close(uow, ctx, c).await,
        Command::CloseDay(c) => day_close::close_day(uow, ctx, c).await,

        Command::CreateCount(c) => inventory_count::create(uow, ctx, c).await,
        Command::TransitionCount(c) => inventory_count::transition(uow, ctx, c).await,
        Command::ScanCount(c) => inventory_count::scan(uow, ctx, c).await,
        Command::ReconcileCount(c) => inventory_count::reconcile(uow, ctx, c).await,
    }
}

/// Fresh entity id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
