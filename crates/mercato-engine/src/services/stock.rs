//! Stock import and EPC relabelling.

use serde_json::json;
use tracing::info;

use mercato_core::validation::{validate_epc, validate_pool, validate_quantity, validate_sku};
use mercato_core::{
    CoreError, EntityType, MigrateTarget, ReasonCode, StockOp, StockSelector, StockStatus,
    ValidationError, DEFAULT_POOL,
};
use mercato_db::UnitOfWork;

use super::effects::apply_stock;
use super::{new_id, Applied, AuditEntry, Context};
use crate::command::{ImportStock, MigrateStock};
use crate::error::{EngineError, EngineResult};

/// Registers EPC units as RFID and credits SKU quantities to PENDING buckets.
pub async fn import(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &ImportStock) -> EngineResult<Applied> {
    let pool = cmd.pool.as_deref().unwrap_or(DEFAULT_POOL);
    validate_pool(pool)?;
    if cmd.items.is_empty() {
        return Err(CoreError::rule(ReasonCode::EmptyLines, "nothing to import").into());
    }

    let mut ops = Vec::with_capacity(cmd.items.len());
    let mut registered = 0i64;
    let mut credited = 0i64;
    for item in &cmd.items {
        validate_sku(&item.sku)?;
        match &item.epc {
            Some(epc) => {
                validate_epc(epc)?;
                if item.qty != 1 {
                    return Err(ValidationError::OutOfRange {
                        field: "qty".to_string(),
                        min: 1,
                        max: 1,
                    }
                    .into());
                }
                registered += 1;
                ops.push(StockOp::Register {
                    epc: epc.clone(),
                    sku: item.sku.clone(),
                    location_id: cmd.store_id.clone(),
                    pool: pool.to_string(),
                });
            }
            None => {
                validate_quantity(item.qty)?;
                credited += item.qty;
                ops.push(StockOp::Credit {
                    selector: StockSelector::sku(&item.sku, &cmd.store_id, pool),
                    qty: item.qty,
                });
            }
        }
    }

    let scopes = apply_stock(uow, ctx, &ops).await?;
    let import_id = new_id();
    info!(
        import_id = %import_id,
        store_id = %cmd.store_id,
        pool = %pool,
        registered,
        credited,
        "Stock imported"
    );

    let data = json!({
        "import_id": import_id,
        "store_id": cmd.store_id,
        "pool": pool,
        "epcs_registered": registered,
        "units_credited": credited,
        "ops": ops,
    });
    let event = AuditEntry {
        action: ctx.action.clone(),
        entity_type: EntityType::Stock,
        entity_id: import_id,
        before: None,
        after: data.clone(),
    };
    Ok(Applied::new(data).with_scopes(scopes).with_event(event))
}

/// Retires the label of an RFID unit: the unit becomes PENDING or is
/// re-issued under a new EPC.
pub async fn migrate(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &MigrateStock) -> EngineResult<Applied> {
    validate_epc(&cmd.epc)?;
    if let MigrateTarget::Rfid { new_epc } = &cmd.target {
        validate_epc(new_epc)?;
    }
    if let Some(pool) = &cmd.pool {
        validate_pool(pool)?;
    }

    let unit = uow
        .stock()
        .find_epc(ctx.tenant_id(), &cmd.epc)
        .await?
        .ok_or_else(|| EngineError::not_found("StockUnit", &cmd.epc))?;
    if unit.location_id != cmd.store_id {
        return Err(CoreError::rule(
            ReasonCode::UnitNotAvailable,
            format!("EPC {} is not at store {}", cmd.epc, cmd.store_id),
        )
        .into());
    }
    // SOLD units only come back through a sale return
    if unit.status != StockStatus::Rfid {
        return Err(CoreError::rule(
            ReasonCode::UnitNotAvailable,
            format!("EPC {} is {} and cannot be migrated", cmd.epc, unit.status),
        )
        .into());
    }

    let before = json!({
        "epc": unit.epc,
        "sku": unit.sku,
        "location_id": unit.location_id,
        "pool": unit.pool,
        "status": unit.status,
    });
    let op = StockOp::Migrate {
        epc: cmd.epc.clone(),
        target: cmd.target.clone(),
        pool: cmd.pool.clone(),
    };
    let scopes = apply_stock(uow, ctx, [&op]).await?;

    let data = json!({
        "epc": cmd.epc,
        "sku": unit.sku,
        "target": cmd.target,
        "pool": cmd.pool.as_deref().unwrap_or(&unit.pool),
    });
    let event = AuditEntry {
        action: ctx.action.clone(),
        entity_type: EntityType::Stock,
        entity_id: cmd.epc.clone(),
        before: Some(before),
        after: data.clone(),
    };
    Ok(Applied::new(data).with_scopes(scopes).with_event(event))
}
