//! Applies transition effects inside the caller's unit of work.

use chrono::NaiveDate;
use tracing::debug;

use mercato_core::machines::cash_session::{self, CashSession};
use mercato_core::machines::day_close::{business_date, ensure_date_open};
use mercato_core::{CashEffect, CoreError, EntityType, ReasonCode, StockOp};
use mercato_db::{CashMovement, StockScope, UnitOfWork};

use super::{new_id, AuditEntry, Context};
use crate::error::{EngineError, EngineResult};

/// Runs every stock op in order; returns the cells touched.
pub(crate) async fn apply_stock<'o>(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    ops: impl IntoIterator<Item = &'o StockOp>,
) -> EngineResult<Vec<StockScope>> {
    let mut scopes = Vec::new();
    for op in ops {
        scopes.extend(uow.stock().apply(ctx.tenant_id(), op, ctx.now).await?);
    }
    Ok(scopes)
}

/// Business date of `now` at the store, refused when already closed.
pub(crate) async fn open_business_date(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    store_id: &str,
) -> EngineResult<NaiveDate> {
    let store = uow
        .tenancy()
        .find_store(store_id)
        .await?
        .ok_or_else(|| EngineError::not_found("Store", store_id))?;
    let date = business_date(ctx.now, store.utc_offset_minutes)?;
    let last_closed = uow.cash().last_closed_date(ctx.tenant_id(), store_id).await?;
    ensure_date_open(last_closed, date)?;
    Ok(date)
}

/// Moves the actor's OPEN drawer at `store_id` by each cash effect.
pub(crate) async fn apply_cash<'e>(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    store_id: &str,
    sale_id: &str,
    effects: impl IntoIterator<Item = &'e CashEffect>,
) -> EngineResult<Vec<AuditEntry>> {
    let mut events = Vec::new();
    for effect in effects {
        let session = uow
            .cash()
            .find_open_session(ctx.tenant_id(), store_id, &ctx.actor.user_id)
            .await?
            .ok_or_else(|| {
                CoreError::rule(
                    ReasonCode::CashSessionRequired,
                    "OPEN cash session required for CASH",
                )
            })?;
        let date = open_business_date(uow, ctx, store_id).await?;
        let event = move_drawer(uow, ctx, &session, effect, date, None, Some(sale_id)).await?;
        events.push(event);
    }
    Ok(events)
}

/// Applies one movement to `session`, persists it and its ledger row.
pub(crate) async fn move_drawer(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    session: &CashSession,
    effect: &CashEffect,
    date: NaiveDate,
    reason: Option<&str>,
    sale_id: Option<&str>,
) -> EngineResult<AuditEntry> {
    let t = cash_session::apply_movement(session, effect.kind, effect.amount)?;
    uow.cash().update_session(&t.after).await?;
    uow.cash()
        .insert_movement(&CashMovement {
            id: new_id(),
            tenant_id: session.tenant_id.clone(),
            store_id: session.store_id.clone(),
            session_id: session.id.clone(),
            kind: effect.kind,
            amount: effect.amount,
            business_date: date,
            reason: reason.map(str::to_string),
            sale_id: sale_id.map(str::to_string),
            created_at: ctx.now,
        })
        .await?;
    debug!(
        session_id = %session.id,
        kind = %effect.kind.action(),
        amount = %effect.amount,
        expected_cash = %t.after.expected_cash,
        "Drawer moved"
    );
    AuditEntry::new(
        effect.kind.action().to_string(),
        EntityType::PosCashSession,
        &session.id,
        Some(&t.before),
        &t.after,
    )
}
