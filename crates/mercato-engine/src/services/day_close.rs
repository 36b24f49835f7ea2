//! Store day close.
//!
//! Closing a business date freezes cash for that store: later movements
//! dated on or before it are refused. When sessions are still OPEN the
//! request must be forced (reason plus elevated role) and the force-close
//! mode decides whether those sessions are closed here (`auto_close`) or
//! left open and kept out of the snapshot (`ignore`).

use tracing::info;

use mercato_core::machines::day_close::{self, business_date, DayState};
use mercato_core::{CoreError, EntityType, ReasonCode};
use mercato_db::UnitOfWork;

use super::{new_id, Applied, AuditEntry, Context};
use crate::command::CloseDay;
use crate::error::{EngineError, EngineResult};

pub async fn close_day(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CloseDay) -> EngineResult<Applied> {
    let tenant_id = ctx.tenant_id();
    let store = uow
        .tenancy()
        .find_store(&cmd.store_id)
        .await?
        .ok_or_else(|| EngineError::not_found("Store", &cmd.store_id))?;

    let today = business_date(ctx.now, store.utc_offset_minutes)?;
    let date = cmd.business_date.unwrap_or(today);
    if date > today {
        return Err(CoreError::rule(
            ReasonCode::BusinessDateInFuture,
            format!("business date {date} is after the store's current date {today}"),
        )
        .into());
    }
    let state = match uow.cash().find_day_close(tenant_id, &store.id, date).await? {
        Some(_) => DayState::Closed,
        None => DayState::NotClosed,
    };
    let sessions = uow.cash().sessions_for_day_close(tenant_id, &store.id, date).await?;
    let mode = cmd
        .force_close_mode
        .unwrap_or(ctx.config.day_close.force_close_mode);

    let outcome = day_close::close_day(
        state,
        day_close::CloseDay {
            id: new_id(),
            tenant_id: tenant_id.to_string(),
            store_id: store.id.clone(),
            business_date: date,
            force_if_open_sessions: cmd.force_if_open_sessions,
            reason: cmd.reason.clone(),
            mode,
            actor_id: ctx.actor.user_id.clone(),
            role: ctx.actor.role,
            now: ctx.now,
        },
        &sessions,
    )?;

    let mut events = Vec::with_capacity(outcome.closed_sessions.len() + 1);
    for t in &outcome.closed_sessions {
        uow.cash().update_session(&t.after).await?;
        events.push(AuditEntry::new(
            "CASH_SESSION_CLOSE",
            EntityType::PosCashSession,
            &t.after.id,
            Some(&t.before),
            &t.after,
        )?);
    }
    // the unique (tenant, store, date) row settles a lost race as DAY_ALREADY_CLOSED
    uow.cash().insert_day_close(&outcome.day_close).await?;

    let close = outcome.day_close;
    info!(
        store_id = %close.store_id,
        business_date = %close.business_date,
        forced = close.forced,
        auto_closed = close.snapshot.auto_closed_session_ids.len(),
        left_open = close.snapshot.open_session_ids.len(),
        "Business day closed"
    );
    events.push(AuditEntry::new(&ctx.action, EntityType::PosCashDayClose, &close.id, None, &close)?);
    Ok(Applied::of(&close)?.with_events(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{ctx, manager, seeded};
    use chrono::Duration;
    use mercato_core::ReasonCode;

    fn close_on(date: Option<chrono::NaiveDate>) -> CloseDay {
        CloseDay {
            store_id: "s-1".into(),
            business_date: date,
            force_if_open_sessions: false,
            reason: None,
            force_close_mode: None,
        }
    }

    #[tokio::test]
    async fn test_future_business_date_is_rejected() {
        let db = seeded().await;
        let config = EngineConfig::default();
        let manager = manager();
        let ctx = ctx(&manager, &config, "CASH_DAY_CLOSE");
        let mut uow = db.begin().await.unwrap();

        let tomorrow = business_date(ctx.now, 0).unwrap() + Duration::days(1);
        let err = close_day(&mut uow, &ctx, &close_on(Some(tomorrow))).await.unwrap_err();
        assert_eq!(err.reason_code(), Some(ReasonCode::BusinessDateInFuture));
        assert!(uow.cash().find_day_close("t-1", "s-1", tomorrow).await.unwrap().is_none());

        let applied = close_day(&mut uow, &ctx, &close_on(None)).await.unwrap();
        assert_eq!(applied.data["business_date"], business_date(ctx.now, 0).unwrap().to_string());
    }

    #[tokio::test]
    async fn test_past_business_date_can_be_closed() {
        let db = seeded().await;
        let config = EngineConfig::default();
        let manager = manager();
        let ctx = ctx(&manager, &config, "CASH_DAY_CLOSE");
        let mut uow = db.begin().await.unwrap();

        let yesterday = business_date(ctx.now, 0).unwrap() - Duration::days(1);
        close_day(&mut uow, &ctx, &close_on(Some(yesterday))).await.unwrap();
        assert!(uow.cash().find_day_close("t-1", "s-1", yesterday).await.unwrap().is_some());
    }
}
