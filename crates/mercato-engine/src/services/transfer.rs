//! Store-to-store transfers.
//!
//! Origin-side actions (create, dispatch, cancel) are checked against the
//! origin store; receiving-side actions (receive, shortages) against the
//! destination.

use tracing::{info, warn};

use mercato_core::machines::transfer::{self, NewTransfer, Transfer};
use mercato_core::validation::validate_pool;
use mercato_core::{EntityType, Transition, DEFAULT_POOL};
use mercato_db::UnitOfWork;

use super::effects::apply_stock;
use super::{new_id, Applied, AuditEntry, Context};
use crate::command::{CreateTransfer, ResolveTransferShortages, TransferQuantities, TransferRef};
use crate::error::{EngineError, EngineResult};
use crate::scope::ensure_store_permitted;

#[derive(Clone, Copy)]
enum Side {
    Origin,
    Destination,
}

pub async fn create(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CreateTransfer) -> EngineResult<Applied> {
    let pool = cmd.pool.as_deref().unwrap_or(DEFAULT_POOL);
    validate_pool(pool)?;

    let created = transfer::create(NewTransfer {
        id: new_id(),
        tenant_id: ctx.tenant_id().to_string(),
        origin_store_id: cmd.origin_store_id.clone(),
        destination_store_id: cmd.destination_store_id.clone(),
        pool: pool.to_string(),
        lines: cmd.lines.clone(),
        now: ctx.now,
    })?;
    uow.transfers().insert(&created, ctx.now).await?;

    let event = AuditEntry::new(&ctx.action, EntityType::Transfer, &created.id, None, &created)?;
    Ok(Applied::of(&created)?.with_event(event))
}

pub async fn dispatch(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &TransferRef) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.transfer_id, Side::Origin).await?;
    let t = transfer::dispatch(&current, ctx.now)?;
    commit(uow, ctx, t).await
}

pub async fn receive(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &TransferQuantities) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.transfer_id, Side::Destination).await?;
    let t = transfer::receive(&current, &cmd.items, ctx.now)?;
    commit(uow, ctx, t).await
}

pub async fn report_shortages(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    cmd: &TransferQuantities,
) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.transfer_id, Side::Destination).await?;
    let t = transfer::report_shortages(&current, &cmd.items, ctx.now)?;
    commit(uow, ctx, t).await
}

pub async fn resolve_shortages(
    uow: &mut UnitOfWork,
    ctx: &Context<'_>,
    cmd: &ResolveTransferShortages,
) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.transfer_id, Side::Destination).await?;
    let t = transfer::resolve_shortages(&current, &cmd.items, ctx.actor.role, ctx.now)?;
    commit(uow, ctx, t).await
}

pub async fn cancel(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &TransferRef) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.transfer_id, Side::Origin).await?;
    let t = transfer::cancel(&current)?;
    commit(uow, ctx, t).await
}

async fn load(uow: &mut UnitOfWork, ctx: &Context<'_>, id: &str, side: Side) -> EngineResult<Transfer> {
    let current = uow
        .transfers()
        .get(ctx.tenant_id(), id)
        .await?
        .ok_or_else(|| EngineError::not_found("Transfer", id))?;
    let store_id = match side {
        Side::Origin => &current.origin_store_id,
        Side::Destination => &current.destination_store_id,
    };
    ensure_store_permitted(ctx.actor, store_id)?;
    Ok(current)
}

async fn commit(uow: &mut UnitOfWork, ctx: &Context<'_>, t: Transition<Transfer>) -> EngineResult<Applied> {
    if let Some(line) = t.after.conservation_violation() {
        warn!(transfer_id = %t.after.id, line_id = %line.id, "Transfer line quantities do not add up");
        return Err(EngineError::InvariantViolation(format!(
            "transfer {} line {} breaks quantity conservation",
            t.after.id, line.line_no
        )));
    }

    let scopes = apply_stock(uow, ctx, t.stock_ops()).await?;
    uow.transfers().update(&t.after, ctx.now).await?;

    if t.before.status != t.after.status {
        info!(
            transfer_id = %t.after.id,
            from = %t.before.status,
            to = %t.after.status,
            "Transfer status changed"
        );
    }

    let event = AuditEntry::new(&ctx.action, EntityType::Transfer, &t.after.id, Some(&t.before), &t.after)?;
    Ok(Applied::of(&t.after)?.with_scopes(scopes).with_event(event))
}
