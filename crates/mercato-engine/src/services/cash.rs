//! Cash drawer sessions: open, cash in/out, close.

use mercato_core::machines::cash_session::{self, CashSession, MovementKind, OpenSession};
use mercato_core::{validation, CashEffect, EntityType};
use mercato_db::UnitOfWork;

use super::effects::{move_drawer, open_business_date};
use super::{new_id, Applied, AuditEntry, Context};
use crate::command::{CashMovementRequest, CloseCashSession, OpenCashSession};
use crate::error::{EngineError, EngineResult};
use crate::scope::ensure_store_permitted;

pub async fn open(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &OpenCashSession) -> EngineResult<Applied> {
    let date = open_business_date(uow, ctx, &cmd.store_id).await?;
    let session = cash_session::open(OpenSession {
        id: new_id(),
        tenant_id: ctx.tenant_id().to_string(),
        store_id: cmd.store_id.clone(),
        cashier_id: ctx.actor.user_id.clone(),
        opening_amount: cmd.opening_amount,
        business_date: date,
        now: ctx.now,
    })?;
    uow.cash().insert_session(&session).await?;

    let event = AuditEntry::new(&ctx.action, EntityType::PosCashSession, &session.id, None, &session)?;
    Ok(Applied::of(&session)?.with_event(event))
}

pub async fn cash_in(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    cmd: &CashMovementRequest,
) -> EngineResult<Applied> {
    movement(uow, ctx, cmd, MovementKind::CashIn).await
}

pub async fn cash_out(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    cmd: &CashMovementRequest,
) -> EngineResult<Applied> {
    movement(uow, ctx, cmd, MovementKind::CashOut).await
}

async fn movement(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    cmd: &CashMovementRequest,
    kind: MovementKind,
) -> EngineResult<Applied> {
    let session = load(uow, ctx, &cmd.session_id).await?;
    let reason = match cmd.reason.as_deref() {
        Some(reason) => Some(validation::validate_reason(Some(reason))?),
        None => None,
    };

    // state first: a movement on a CLOSED session is a state error, whatever the date
    cash_session::apply_movement(&session, kind, cmd.amount)?;
    let date = open_business_date(uow, ctx, &session.store_id).await?;

    let effect = CashEffect {
        kind,
        amount: cmd.amount,
    };
    let event = move_drawer(uow, ctx, &session, &effect, date, reason, None).await?;
    let data = event.after.clone();
    Ok(Applied::new(data).with_event(event))
}

pub async fn close(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CloseCashSession) -> EngineResult<Applied> {
    let session = load(uow, ctx, &cmd.session_id).await?;
    let t = cash_session::close(&session, cmd.counted_cash, ctx.now)?;
    uow.cash().update_session(&t.after).await?;

    let event = AuditEntry::new(&ctx.action, EntityType::PosCashSession, &session.id, Some(&t.before), &t.after)?;
    Ok(Applied::of(&t.after)?.with_event(event))
}

async fn load(uow: &mut UnitOfWork, ctx: &Context<'_>, id: &str) -> EngineResult<CashSession> {
    let session = uow
        .cash()
        .get_session(ctx.tenant_id(), id)
        .await?
        .ok_or_else(|| EngineError::not_found("PosCashSession", id))?;
    ensure_store_permitted(ctx.actor, &session.store_id)?;
    Ok(session)
}
