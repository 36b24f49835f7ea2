//! Read side. Reads never take the writer gate and never see a half-applied
//! mutation: every write commits as one transaction.

use mercato_core::Actor;
use mercato_db::{Database, LevelFilter, StockLedger, StockLevel};

use crate::error::EngineResult;
use crate::scope::ensure_store_permitted;

/// Stock levels of the actor's tenant, limited to the stores the actor may see.
pub async fn stock_levels(db: &Database, actor: &Actor, filter: &LevelFilter) -> EngineResult<Vec<StockLevel>> {
    if let Some(store_id) = &filter.location_id {
        ensure_store_permitted(actor, store_id)?;
    }

    let mut conn = db.acquire().await?;
    let levels = StockLedger::new(&mut conn)
        .levels(&actor.tenant_id, filter)
        .await?;
    Ok(levels
        .into_iter()
        .filter(|l| actor.store_scope.permits(&l.location_id))
        .collect())
}
