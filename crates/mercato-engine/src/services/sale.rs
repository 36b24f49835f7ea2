//! POS sales: cart edits, checkout, refunds and exchanges.

use tracing::{debug, info};
use uuid::Uuid;

use mercato_core::machines::sale::{self, NewSale, ReturnAuthority, ReturnItem, Sale};
use mercato_core::machines::sale::{ExchangeRequest, RefundRequest};
use mercato_core::validation::validate_pool;
use mercato_core::{EntityType, EpcReturnMode, ReturnPolicy, Transition, DEFAULT_POOL};
use mercato_db::UnitOfWork;

use super::effects::{apply_cash, apply_stock};
use super::{new_id, Applied, AuditEntry, Context};
use crate::command::{AddSaleLine, CheckoutSale, CreateSale, ExchangeSale, RefundSale, RemoveSaleLine, SaleRef};
use crate::error::{EngineError, EngineResult};
use crate::scope::ensure_store_permitted;

pub async fn create(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CreateSale) -> EngineResult<Applied> {
    let pool = cmd.pool.as_deref().unwrap_or(DEFAULT_POOL);
    validate_pool(pool)?;

    let receipt_number = uow
        .sales()
        .next_receipt_number(ctx.tenant_id(), &cmd.store_id)
        .await?;
    let created = sale::create(NewSale {
        id: new_id(),
        tenant_id: ctx.tenant_id().to_string(),
        store_id: cmd.store_id.clone(),
        cashier_id: ctx.actor.user_id.clone(),
        receipt_number,
        pool: pool.to_string(),
        lines: cmd.lines.clone(),
        now: ctx.now,
    })?;
    uow.sales().insert(&created, ctx.now).await?;
    debug!(sale_id = %created.id, receipt = %created.receipt_number, "Sale drafted");

    let event = AuditEntry::new(&ctx.action, EntityType::PosSale, &created.id, None, &created)?;
    Ok(Applied::of(&created)?.with_event(event))
}

pub async fn add_line(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &AddSaleLine) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.sale_id).await?;
    let t = sale::add_line(&current, cmd.line.clone())?;
    commit(uow, ctx, t).await
}

pub async fn remove_line(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &RemoveSaleLine) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.sale_id).await?;
    let t = sale::remove_line(&current, &cmd.line_id)?;
    commit(uow, ctx, t).await
}

pub async fn cancel(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &SaleRef) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.sale_id).await?;
    let t = sale::cancel(&current, ctx.now)?;
    commit(uow, ctx, t).await
}

pub async fn checkout(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &CheckoutSale) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.sale_id).await?;
    let session_open = has_open_session(uow, ctx, &current.store_id).await?;
    let t = sale::checkout(&current, cmd.payments.clone(), session_open, ctx.now)?;
    let applied = commit(uow, ctx, t).await?;
    info!(
        sale_id = %cmd.sale_id,
        total_due = %current.totals.total_due,
        "Sale paid"
    );
    Ok(applied)
}

pub async fn refund(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &RefundSale) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.sale_id).await?;
    let policy = uow.tenancy().return_policy(ctx.tenant_id()).await?;
    let authority = ReturnAuthority {
        role: ctx.actor.role,
        receipt_presented: cmd.receipt_presented,
        manager_override: cmd.manager_override,
        cash_session_open: has_open_session(uow, ctx, &current.store_id).await?,
        now: ctx.now,
    };
    let t = sale::refund(
        &current,
        RefundRequest {
            adjustment_id: new_id(),
            items: with_replacement_epcs(&current, &policy, &cmd.items),
            refund_method: cmd.refund_method,
        },
        &policy,
        authority,
    )?;
    commit(uow, ctx, t).await
}

pub async fn exchange(uow: &mut UnitOfWork, ctx: &Context<'_>, cmd: &ExchangeSale) -> EngineResult<Applied> {
    let current = load(uow, ctx, &cmd.sale_id).await?;
    let policy = uow.tenancy().return_policy(ctx.tenant_id()).await?;
    let authority = ReturnAuthority {
        role: ctx.actor.role,
        receipt_presented: cmd.receipt_presented,
        manager_override: cmd.manager_override,
        cash_session_open: has_open_session(uow, ctx, &current.store_id).await?,
        now: ctx.now,
    };
    let t = sale::exchange(
        &current,
        ExchangeRequest {
            adjustment_id: new_id(),
            returns: with_replacement_epcs(&current, &policy, &cmd.returns),
            new_lines: cmd.new_lines.clone(),
            payments: cmd.payments.clone(),
            refund_method: cmd.refund_method,
        },
        &policy,
        authority,
    )?;
    commit(uow, ctx, t).await
}

async fn load(uow: &mut UnitOfWork, ctx: &Context<'_>, id: &str) -> EngineResult<Sale> {
    let current = uow
        .sales()
        .get(ctx.tenant_id(), id)
        .await?
        .ok_or_else(|| EngineError::not_found("PosSale", id))?;
    ensure_store_permitted(ctx.actor, &current.store_id)?;
    Ok(current)
}

async fn has_open_session(uow: &mut UnitOfWork, ctx: &Context<'_>, store_id: &str) -> EngineResult<bool> {
    let session = uow
        .cash()
        .find_open_session(ctx.tenant_id(), store_id, &ctx.actor.user_id)
        .await?;
    Ok(session.is_some())
}

/// Fills in a fresh label for returned EPC units when the policy re-issues
/// EPCs and the client did not supply one.
fn with_replacement_epcs(sale: &Sale, policy: &ReturnPolicy, items: &[ReturnItem]) -> Vec<ReturnItem> {
    let mut items = items.to_vec();
    if policy.epc_return_mode != EpcReturnMode::AssignNewEpc {
        return items;
    }
    for item in items.iter_mut().filter(|i| i.replacement_epc.is_none()) {
        let serialized = sale
            .lines
            .iter()
            .any(|l| l.id == item.line_id && l.epc.is_some());
        if serialized {
            item.replacement_epc = Some(Uuid::new_v4().simple().to_string().to_uppercase());
        }
    }
    items
}

async fn commit(uow: &mut UnitOfWork, ctx: &Context<'_>, t: Transition<Sale>) -> EngineResult<Applied> {
    let scopes = apply_stock(uow, ctx, t.stock_ops()).await?;
    let mut events = apply_cash(uow, ctx, &t.after.store_id, &t.after.id, t.cash_effects()).await?;
    uow.sales().save(&t.after, ctx.now).await?;

    events.insert(
        0,
        AuditEntry::new(&ctx.action, EntityType::PosSale, &t.after.id, Some(&t.before), &t.after)?,
    );
    Ok(Applied::of(&t.after)?.with_scopes(scopes).with_events(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::OpenCashSession;
    use crate::config::EngineConfig;
    use crate::services::cash;
    use crate::testing::{ctx, manager, seeded};
    use mercato_core::machines::sale::{NewSaleLine, PaymentInput, SaleStatus};
    use mercato_core::{ItemCondition, Money, PaymentMethod, ReasonCode, StockOp, StockStatus};

    const EPC: &str = "E28011606000020800000001";

    fn line(sku: &str, epc: Option<&str>, cents: i64) -> NewSaleLine {
        NewSaleLine {
            sku: sku.into(),
            epc: epc.map(str::to_string),
            qty: 1,
            unit_price: Money::from_cents(cents),
            discount: Money::zero(),
        }
    }

    async fn stocked(uow: &mut UnitOfWork, ctx: &Context<'_>) {
        let register = StockOp::Register {
            epc: EPC.into(),
            sku: "SKU-1".into(),
            location_id: "s-1".into(),
            pool: DEFAULT_POOL.into(),
        };
        uow.stock().apply(ctx.tenant_id(), &register, ctx.now).await.unwrap();
    }

    #[tokio::test]
    async fn test_split_tender_without_session_is_rejected() {
        let db = seeded().await;
        let config = EngineConfig::default();
        let manager = manager();
        let mut uow = db.begin().await.unwrap();
        stocked(&mut uow, &ctx(&manager, &config, "STOCK_IMPORT")).await;

        let created = create(
            &mut uow,
            &ctx(&manager, &config, "SALE_CREATE"),
            &CreateSale {
                store_id: "s-1".into(),
                pool: None,
                lines: vec![line("SKU-1", Some(EPC), 10_000)],
            },
        )
        .await
        .unwrap();
        let sale_id = created.data["id"].as_str().unwrap().to_string();

        let err = checkout(
            &mut uow,
            &ctx(&manager, &config, "SALE_CHECKOUT"),
            &CheckoutSale {
                sale_id,
                payments: vec![
                    PaymentInput::Card {
                        amount: Money::from_cents(6_000),
                        auth_code: "A1".into(),
                        card_last4: "4242".into(),
                    },
                    PaymentInput::Cash {
                        amount: Money::from_cents(4_000),
                    },
                ],
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.reason_code(), Some(ReasonCode::CashSessionRequired));
    }

    #[tokio::test]
    async fn test_checkout_then_refund_reissues_label() {
        let db = seeded().await;
        let config = EngineConfig::default();
        let manager = manager();
        let mut uow = db.begin().await.unwrap();
        stocked(&mut uow, &ctx(&manager, &config, "STOCK_IMPORT")).await;
        cash::open(
            &mut uow,
            &ctx(&manager, &config, "CASH_SESSION_OPEN"),
            &OpenCashSession {
                store_id: "s-1".into(),
                opening_amount: Money::from_cents(5_000),
            },
        )
        .await
        .unwrap();

        let created = create(
            &mut uow,
            &ctx(&manager, &config, "SALE_CREATE"),
            &CreateSale {
                store_id: "s-1".into(),
                pool: None,
                lines: vec![line("SKU-1", Some(EPC), 10_000)],
            },
        )
        .await
        .unwrap();
        let sale_id = created.data["id"].as_str().unwrap().to_string();
        let line_id = created.data["lines"][0]["id"].as_str().unwrap().to_string();

        let paid = checkout(
            &mut uow,
            &ctx(&manager, &config, "SALE_CHECKOUT"),
            &CheckoutSale {
                sale_id: sale_id.clone(),
                payments: vec![PaymentInput::Cash {
                    amount: Money::from_cents(10_000),
                }],
            },
        )
        .await
        .unwrap();
        assert_eq!(paid.data["status"], "PAID");
        assert_eq!(paid.events.len(), 2);
        let unit = uow.stock().find_epc("t-1", EPC).await.unwrap().unwrap();
        assert_eq!(unit.status, StockStatus::Sold);

        refund(
            &mut uow,
            &ctx(&manager, &config, "SALE_REFUND_ITEMS"),
            &RefundSale {
                sale_id: sale_id.clone(),
                items: vec![ReturnItem {
                    line_id,
                    qty: 1,
                    condition: ItemCondition::New,
                    replacement_epc: None,
                }],
                refund_method: PaymentMethod::Cash,
                receipt_presented: true,
                manager_override: false,
            },
        )
        .await
        .unwrap();

        let retired = uow.stock().find_epc("t-1", EPC).await.unwrap().unwrap();
        assert_eq!(retired.status, StockStatus::NonReusableLabel);

        let stored = uow.sales().get("t-1", &sale_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SaleStatus::Paid);
        assert_eq!(stored.adjustments.len(), 1);
        assert_eq!(stored.adjustments[0].refund_amount, Money::from_cents(10_000));
    }

    #[test]
    fn test_replacement_epc_only_for_serialized_lines() {
        let sale = sale::create(NewSale {
            id: "sale-1".into(),
            tenant_id: "t-1".into(),
            store_id: "s-1".into(),
            cashier_id: "u-1".into(),
            receipt_number: "R-1".into(),
            pool: DEFAULT_POOL.into(),
            lines: vec![line("SKU-1", Some(EPC), 100), line("SKU-2", None, 100)],
            now: chrono::Utc::now(),
        })
        .unwrap();
        let items: Vec<ReturnItem> = sale
            .lines
            .iter()
            .map(|l| ReturnItem {
                line_id: l.id.clone(),
                qty: 1,
                condition: ItemCondition::New,
                replacement_epc: None,
            })
            .collect();

        let filled = with_replacement_epcs(&sale, &ReturnPolicy::default(), &items);
        let epc = filled[0].replacement_epc.as_deref().unwrap();
        assert_eq!(epc.len(), 32);
        assert!(filled[1].replacement_epc.is_none());

        let pending = ReturnPolicy {
            epc_return_mode: EpcReturnMode::ToPending,
            ..ReturnPolicy::default()
        };
        assert!(with_replacement_epcs(&sale, &pending, &items)[0]
            .replacement_epc
            .is_none());
    }
}
