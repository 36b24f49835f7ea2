//! End-to-end scenarios through the gateway against an in-memory database.

use chrono::Utc;
use serde_json::Value;

use mercato_core::machines::day_close::ForceCloseMode;
use mercato_core::machines::inventory_count::ScanItem;
use mercato_core::machines::sale::{NewSaleLine, PaymentInput};
use mercato_core::machines::transfer::{LineQty, NewTransferLine};
use mercato_core::{Actor, MigrateTarget, Money, ReasonCode, Role, StoreScope, UnitRef};
use mercato_db::{AuditResult, Database, DbConfig, LevelFilter, Store};
use mercato_engine::command::{
    CashMovementRequest, CheckoutSale, CloseCashSession, CloseDay, CountRef, CreateCount,
    CreateSale, CreateTransfer, ImportItem, ImportStock, MigrateStock, OpenCashSession, ScanCount,
    TransferQuantities, TransferRef, TransitionCount,
};
use mercato_engine::queries::stock_levels;
use mercato_engine::{
    Command, CountLifecycle, EngineConfig, EngineError, Mutation, MutationGateway, MutationOutcome,
};

const EPC_A: &str = "E28011606000020800000A01";
const EPC_B: &str = "E28011606000020800000A02";

// =============================================================================
// Fixtures
// =============================================================================

async fn database() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let now = Utc::now();
    let mut uow = db.begin().await.unwrap();
    for (tenant, stores) in [("acme", ["north", "south"]), ("globex", ["east", "west"])] {
        uow.tenancy().insert_tenant(tenant, tenant, now).await.unwrap();
        for id in stores {
            uow.tenancy()
                .insert_store(&Store {
                    id: id.to_string(),
                    tenant_id: tenant.to_string(),
                    name: id.to_string(),
                    utc_offset_minutes: 0,
                    created_at: now,
                })
                .await
                .unwrap();
        }
    }
    uow.commit().await.unwrap();
    db
}

async fn gateway(config: EngineConfig) -> MutationGateway {
    MutationGateway::new(database().await, config)
}

fn user(id: &str, role: Role, scope: StoreScope) -> Actor {
    Actor {
        user_id: id.to_string(),
        tenant_id: "acme".to_string(),
        role,
        store_scope: scope,
    }
}

fn manager() -> Actor {
    user("manager-1", Role::Manager, StoreScope::All)
}

fn cashier() -> Actor {
    user("cashier-1", Role::Cashier, StoreScope::Stores(vec!["north".into()]))
}

/// Runs a command under a fresh key.
async fn run(gw: &MutationGateway, actor: &Actor, command: Command) -> Result<MutationOutcome, EngineError> {
    let key = uuid::Uuid::new_v4().to_string();
    run_keyed(gw, actor, command, &key).await
}

async fn run_keyed(
    gw: &MutationGateway,
    actor: &Actor,
    command: Command,
    key: &str,
) -> Result<MutationOutcome, EngineError> {
    let mutation = Mutation::from_command(command, key, format!("tx-{key}")).unwrap();
    gw.execute(actor, mutation).await
}

fn data(outcome: &MutationOutcome) -> &Value {
    &outcome.body["data"]
}

fn id_of(outcome: &MutationOutcome) -> String {
    data(outcome)["id"].as_str().unwrap().to_string()
}

fn import(store: &str, items: Vec<ImportItem>) -> Command {
    Command::ImportStock(ImportStock {
        store_id: store.into(),
        pool: None,
        items,
    })
}

fn epc_item(sku: &str, epc: &str) -> ImportItem {
    ImportItem {
        sku: sku.into(),
        epc: Some(epc.into()),
        qty: 1,
    }
}

fn sku_item(sku: &str, qty: i64) -> ImportItem {
    ImportItem {
        sku: sku.into(),
        epc: None,
        qty,
    }
}

fn open_session(store: &str, cents: i64) -> Command {
    Command::OpenCashSession(OpenCashSession {
        store_id: store.into(),
        opening_amount: Money::from_cents(cents),
    })
}

async fn assert_ledger_consistent(gw: &MutationGateway) {
    let levels = stock_levels(gw.database(), &manager(), &LevelFilter::default())
        .await
        .unwrap();
    for level in levels {
        assert_eq!(
            level.total,
            level.rfid + level.pending,
            "{} at {}/{}",
            level.sku,
            level.location_id,
            level.pool
        );
    }
}

async fn audit_count(gw: &MutationGateway) -> i64 {
    let mut uow = gw.database().begin().await.unwrap();
    uow.audit().count("acme").await.unwrap()
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn test_identical_retry_replays_without_second_mutation() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();
    let cmd = || import("north", vec![sku_item("SKU-1", 5)]);

    let first = run_keyed(&gw, &actor, cmd(), "import-1").await.unwrap();
    let second = run_keyed(&gw, &actor, cmd(), "import-1").await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.status, second.status);
    assert_eq!(first.body, second.body);

    let levels = stock_levels(gw.database(), &actor, &LevelFilter::default())
        .await
        .unwrap();
    assert_eq!(levels[0].pending, 5);
    assert_eq!(audit_count(&gw).await, 1);
}

#[tokio::test]
async fn test_same_key_different_body_conflicts() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();

    run_keyed(&gw, &actor, import("north", vec![sku_item("SKU-1", 5)]), "import-1")
        .await
        .unwrap();
    let err = run_keyed(&gw, &actor, import("north", vec![sku_item("SKU-1", 6)]), "import-1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IdempotencyKeyReused));
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn test_same_key_other_tenant_is_independent() {
    let gw = gateway(EngineConfig::default()).await;
    let acme = manager();
    let mut globex = manager();
    globex.tenant_id = "globex".into();

    run_keyed(&gw, &acme, import("north", vec![sku_item("SKU-1", 1)]), "shared-key")
        .await
        .unwrap();
    let other = run_keyed(&gw, &globex, import("east", vec![sku_item("SKU-1", 1)]), "shared-key")
        .await
        .unwrap();
    assert!(!other.replayed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_mutate_once() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let gw = gw.clone();
        let actor = actor.clone();
        handles.push(tokio::spawn(async move {
            run_keyed(&gw, &actor, import("north", vec![sku_item("SKU-1", 2)]), "race-1").await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) if !outcome.replayed => fresh += 1,
            Ok(_) => {}
            Err(EngineError::IdempotencyInProgress) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(fresh, 1);

    let levels = stock_levels(gw.database(), &actor, &LevelFilter::default())
        .await
        .unwrap();
    assert_eq!(levels[0].pending, 2);
    assert_eq!(audit_count(&gw).await, 1);
}

#[tokio::test]
async fn test_stored_rejection_is_replayed() {
    let gw = gateway(EngineConfig::default().store_business_rejections(true)).await;
    let actor = manager();
    let session = run(&gw, &actor, open_session("north", 0)).await.unwrap();
    let session_id = id_of(&session);
    run(
        &gw,
        &actor,
        Command::CloseCashSession(CloseCashSession {
            session_id: session_id.clone(),
            counted_cash: Money::zero(),
        }),
    )
    .await
    .unwrap();

    let cash_in = || {
        Command::CashIn(CashMovementRequest {
            session_id: session_id.clone(),
            amount: Money::from_cents(500),
            reason: None,
        })
    };
    let first = run_keyed(&gw, &actor, cash_in(), "late-cash-in").await.unwrap();
    assert_eq!(first.status, 422);
    assert_eq!(first.body["reason_code"], "INVALID_STATE_TRANSITION");

    let second = run_keyed(&gw, &actor, cash_in(), "late-cash-in").await.unwrap();
    assert!(second.replayed);
    assert_eq!(second.body, first.body);

    let mut uow = gw.database().begin().await.unwrap();
    let events = uow
        .audit()
        .for_entity("acme", "POS_CASH_SESSION", &session_id)
        .await
        .unwrap();
    let rejected = events
        .iter()
        .filter(|e| e.result == AuditResult::Rejected)
        .count();
    assert_eq!(rejected, 1);
}

// =============================================================================
// Scope
// =============================================================================

#[tokio::test]
async fn test_foreign_store_is_denied_before_any_effect() {
    let gw = gateway(EngineConfig::default()).await;
    let err = run(&gw, &manager(), import("east", vec![sku_item("SKU-1", 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CROSS_TENANT_ACCESS_DENIED");
    assert_eq!(err.http_status(), 403);
    assert_eq!(audit_count(&gw).await, 0);
}

#[tokio::test]
async fn test_cashier_outside_store_scope() {
    let gw = gateway(EngineConfig::default()).await;
    let err = run(&gw, &cashier(), open_session("south", 0)).await.unwrap_err();
    assert_eq!(err.code(), "STORE_SCOPE_MISMATCH");
    assert_eq!(err.http_status(), 403);
}

// =============================================================================
// Cash
// =============================================================================

#[tokio::test]
async fn test_cash_session_lifecycle() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = cashier();

    let opened = run(&gw, &actor, open_session("north", 10_000)).await.unwrap();
    assert_eq!(opened.status, 201);
    let session_id = id_of(&opened);

    let movement = |amount: i64| CashMovementRequest {
        session_id: session_id.clone(),
        amount: Money::from_cents(amount),
        reason: Some("float".into()),
    };
    run(&gw, &actor, Command::CashIn(movement(2_500))).await.unwrap();
    run(&gw, &actor, Command::CashOut(movement(1_000))).await.unwrap();

    let closed = run(
        &gw,
        &actor,
        Command::CloseCashSession(CloseCashSession {
            session_id: session_id.clone(),
            counted_cash: Money::from_cents(11_500),
        }),
    )
    .await
    .unwrap();
    assert_eq!(data(&closed)["status"], "CLOSED");
    assert_eq!(data(&closed)["expected_cash"], 11_500);
    assert_eq!(data(&closed)["difference"], 0);

    let err = run(&gw, &actor, Command::CashIn(movement(100))).await.unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::InvalidStateTransition));
    assert_eq!(err.http_status(), 422);
}

#[tokio::test]
async fn test_cash_out_cannot_go_negative() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = cashier();
    let session_id = id_of(&run(&gw, &actor, open_session("north", 1_000)).await.unwrap());

    let err = run(
        &gw,
        &actor,
        Command::CashOut(CashMovementRequest {
            session_id,
            amount: Money::from_cents(1_001),
            reason: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::NegativeCash));
}

#[tokio::test]
async fn test_second_open_session_rejected() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = cashier();
    run(&gw, &actor, open_session("north", 0)).await.unwrap();
    let err = run(&gw, &actor, open_session("north", 0)).await.unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::SessionAlreadyOpen));
}

// =============================================================================
// Sales
// =============================================================================

#[tokio::test]
async fn test_split_tender_needs_cash_session() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = cashier();
    run(&gw, &manager(), import("north", vec![epc_item("SKU-1", EPC_A)]))
        .await
        .unwrap();

    let sale = run(
        &gw,
        &actor,
        Command::CreateSale(CreateSale {
            store_id: "north".into(),
            pool: None,
            lines: vec![NewSaleLine {
                sku: "SKU-1".into(),
                epc: Some(EPC_A.into()),
                qty: 1,
                unit_price: Money::from_cents(10_000),
                discount: Money::zero(),
            }],
        }),
    )
    .await
    .unwrap();
    let sale_id = id_of(&sale);

    let checkout = || {
        Command::CheckoutSale(CheckoutSale {
            sale_id: sale_id.clone(),
            payments: vec![
                PaymentInput::Card {
                    amount: Money::from_cents(6_000),
                    auth_code: "AUTH-1".into(),
                    card_last4: "4242".into(),
                },
                PaymentInput::Cash {
                    amount: Money::from_cents(4_000),
                },
            ],
        })
    };
    let err = run(&gw, &actor, checkout()).await.unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::CashSessionRequired));

    // nothing was debited
    let levels = stock_levels(gw.database(), &actor, &LevelFilter::default())
        .await
        .unwrap();
    assert_eq!(levels[0].rfid, 1);

    run(&gw, &actor, open_session("north", 0)).await.unwrap();
    let paid = run(&gw, &actor, checkout()).await.unwrap();
    assert_eq!(data(&paid)["status"], "PAID");
    assert_ledger_consistent(&gw).await;
}

#[tokio::test]
async fn test_sold_epc_cannot_be_relabelled_back_into_stock() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();
    run(&gw, &actor, import("north", vec![epc_item("SKU-1", EPC_A)]))
        .await
        .unwrap();
    let sale = run(
        &gw,
        &actor,
        Command::CreateSale(CreateSale {
            store_id: "north".into(),
            pool: None,
            lines: vec![NewSaleLine {
                sku: "SKU-1".into(),
                epc: Some(EPC_A.into()),
                qty: 1,
                unit_price: Money::from_cents(2_500),
                discount: Money::zero(),
            }],
        }),
    )
    .await
    .unwrap();
    let paid = run(
        &gw,
        &actor,
        Command::CheckoutSale(CheckoutSale {
            sale_id: id_of(&sale),
            payments: vec![PaymentInput::Card {
                amount: Money::from_cents(2_500),
                auth_code: "AUTH-2".into(),
                card_last4: "4242".into(),
            }],
        }),
    )
    .await
    .unwrap();
    assert_eq!(data(&paid)["status"], "PAID");

    let err = run(
        &gw,
        &actor,
        Command::MigrateStock(MigrateStock {
            store_id: "north".into(),
            epc: EPC_A.into(),
            target: MigrateTarget::Pending,
            pool: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::UnitNotAvailable));

    let levels = stock_levels(gw.database(), &actor, &LevelFilter::default())
        .await
        .unwrap();
    assert!(levels.iter().all(|l| l.total == 0 && l.pending == 0));
    assert_ledger_consistent(&gw).await;
}

// =============================================================================
// Transfers
// =============================================================================

#[tokio::test]
async fn test_epc_transfer_receive_bounds() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();
    run(&gw, &actor, import("north", vec![epc_item("SKU-1", EPC_A)]))
        .await
        .unwrap();

    let created = run(
        &gw,
        &actor,
        Command::CreateTransfer(CreateTransfer {
            origin_store_id: "north".into(),
            destination_store_id: "south".into(),
            pool: None,
            lines: vec![NewTransferLine {
                unit: UnitRef::Epc(EPC_A.into()),
                qty: 1,
            }],
        }),
    )
    .await
    .unwrap();
    let transfer_id = id_of(&created);
    let line_id = data(&created)["lines"][0]["id"].as_str().unwrap().to_string();

    run(
        &gw,
        &actor,
        Command::DispatchTransfer(TransferRef {
            transfer_id: transfer_id.clone(),
        }),
    )
    .await
    .unwrap();

    let receive = |qty: i64| {
        Command::ReceiveTransfer(TransferQuantities {
            transfer_id: transfer_id.clone(),
            items: vec![LineQty {
                line_id: line_id.clone(),
                qty,
            }],
        })
    };
    let err = run(&gw, &actor, receive(2)).await.unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::ExceedsOutstanding));

    let received = run(&gw, &actor, receive(1)).await.unwrap();
    assert_eq!(data(&received)["status"], "RECEIVED");

    let south = stock_levels(
        gw.database(),
        &actor,
        &LevelFilter {
            location_id: Some("south".into()),
            ..LevelFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(south[0].rfid, 1);
    assert_ledger_consistent(&gw).await;
}

#[tokio::test]
async fn test_dispatch_without_stock_rolls_back() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();
    run(&gw, &actor, import("north", vec![sku_item("SKU-1", 2)]))
        .await
        .unwrap();

    let transfer_id = id_of(
        &run(
            &gw,
            &actor,
            Command::CreateTransfer(CreateTransfer {
                origin_store_id: "north".into(),
                destination_store_id: "south".into(),
                pool: None,
                lines: vec![
                    NewTransferLine {
                        unit: UnitRef::Sku("SKU-1".into()),
                        qty: 1,
                    },
                    NewTransferLine {
                        unit: UnitRef::Sku("SKU-2".into()),
                        qty: 1,
                    },
                ],
            }),
        )
        .await
        .unwrap(),
    );

    let err = run(&gw, &actor, Command::DispatchTransfer(TransferRef { transfer_id }))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::InsufficientStock));

    // the first line's debit did not survive
    let levels = stock_levels(gw.database(), &actor, &LevelFilter::default())
        .await
        .unwrap();
    assert_eq!(levels[0].pending, 2);
    assert_ledger_consistent(&gw).await;
}

// =============================================================================
// Day close
// =============================================================================

fn forced_close(mode: ForceCloseMode) -> Command {
    Command::CloseDay(CloseDay {
        store_id: "north".into(),
        business_date: None,
        force_if_open_sessions: true,
        reason: Some("power outage".into()),
        force_close_mode: Some(mode),
    })
}

#[tokio::test]
async fn test_day_close_requires_force_with_open_sessions() {
    let gw = gateway(EngineConfig::default()).await;
    run(&gw, &cashier(), open_session("north", 0)).await.unwrap();

    let err = run(
        &gw,
        &manager(),
        Command::CloseDay(CloseDay {
            store_id: "north".into(),
            business_date: None,
            force_if_open_sessions: false,
            reason: None,
            force_close_mode: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::OpenSessionsRemain));
}

#[tokio::test]
async fn test_forced_day_close_auto_closes_sessions() {
    let gw = gateway(EngineConfig::default()).await;
    let session_id = id_of(&run(&gw, &cashier(), open_session("north", 5_000)).await.unwrap());

    let closed = run(&gw, &manager(), forced_close(ForceCloseMode::AutoClose))
        .await
        .unwrap();
    assert_eq!(closed.status, 201);
    let snapshot = &data(&closed)["snapshot"];
    assert_eq!(snapshot["auto_closed_session_ids"][0], session_id.as_str());
    assert_eq!(snapshot["expected_cash_total"], 5_000);

    let err = run(&gw, &manager(), forced_close(ForceCloseMode::AutoClose))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::DayAlreadyClosed));
}

#[tokio::test]
async fn test_forced_day_close_ignore_leaves_sessions_open() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = cashier();
    let session_id = id_of(&run(&gw, &actor, open_session("north", 5_000)).await.unwrap());

    let closed = run(&gw, &manager(), forced_close(ForceCloseMode::Ignore))
        .await
        .unwrap();
    let snapshot = &data(&closed)["snapshot"];
    assert_eq!(snapshot["open_session_ids"][0], session_id.as_str());
    assert_eq!(snapshot["session_ids"].as_array().map(Vec::len), Some(0));

    // the date is frozen for cash even though the session stayed open
    let err = run(
        &gw,
        &actor,
        Command::CashIn(CashMovementRequest {
            session_id,
            amount: Money::from_cents(100),
            reason: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::DayAlreadyClosed));
}

#[tokio::test]
async fn test_cashier_cannot_force_day_close() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = cashier();
    run(&gw, &actor, open_session("north", 0)).await.unwrap();
    let err = run(&gw, &actor, forced_close(ForceCloseMode::AutoClose))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::ElevatedRoleRequired));
}

#[tokio::test]
async fn test_future_day_close_does_not_freeze_the_store() {
    let gw = gateway(EngineConfig::default()).await;
    let err = run(
        &gw,
        &manager(),
        Command::CloseDay(CloseDay {
            store_id: "north".into(),
            business_date: chrono::NaiveDate::from_ymd_opt(2099, 1, 1),
            force_if_open_sessions: false,
            reason: None,
            force_close_mode: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::BusinessDateInFuture));

    let opened = run(&gw, &cashier(), open_session("north", 0)).await.unwrap();
    assert_eq!(data(&opened)["status"], "OPEN");
}

// =============================================================================
// Inventory counts
// =============================================================================

fn count_step(count_id: &str, action: CountLifecycle) -> Command {
    Command::TransitionCount(TransitionCount {
        count_id: count_id.into(),
        action,
    })
}

#[tokio::test]
async fn test_count_lock_and_reconcile() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();
    run(
        &gw,
        &actor,
        import("north", vec![epc_item("SKU-1", EPC_A), sku_item("SKU-2", 4)]),
    )
    .await
    .unwrap();

    let new_count = |name: &str| {
        Command::CreateCount(CreateCount {
            store_id: "north".into(),
            pool: None,
            name: name.into(),
        })
    };
    let first = id_of(&run(&gw, &actor, new_count("weekly")).await.unwrap());
    let second = id_of(&run(&gw, &actor, new_count("spot")).await.unwrap());

    run(&gw, &actor, count_step(&first, CountLifecycle::Start)).await.unwrap();
    let err = run(&gw, &actor, count_step(&second, CountLifecycle::Start))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::StoreLocked));

    run(
        &gw,
        &actor,
        Command::ScanCount(ScanCount {
            count_id: first.clone(),
            items: vec![
                ScanItem {
                    sku: "SKU-1".into(),
                    epc: Some(EPC_B.into()),
                    qty: 1,
                },
                ScanItem {
                    sku: "SKU-2".into(),
                    epc: None,
                    qty: 3,
                },
            ],
        }),
    )
    .await
    .unwrap();
    run(&gw, &actor, count_step(&first, CountLifecycle::Close)).await.unwrap();

    // lock released by CLOSE
    run(&gw, &actor, count_step(&second, CountLifecycle::Start)).await.unwrap();

    let reconciled = run(
        &gw,
        &actor,
        Command::ReconcileCount(CountRef {
            count_id: first.clone(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(data(&reconciled)["status"], "RECONCILED");
    assert_eq!(data(&reconciled)["deltas"].as_array().map(Vec::len), Some(3));

    let levels = stock_levels(gw.database(), &actor, &LevelFilter::default())
        .await
        .unwrap();
    let sku1 = levels.iter().find(|l| l.sku == "SKU-1").unwrap();
    let sku2 = levels.iter().find(|l| l.sku == "SKU-2").unwrap();
    assert_eq!(sku1.rfid, 1);
    assert_eq!(sku2.pending, 3);
    assert_ledger_consistent(&gw).await;
}

#[tokio::test]
async fn test_count_cannot_reconcile_while_active() {
    let gw = gateway(EngineConfig::default()).await;
    let actor = manager();
    let count_id = id_of(
        &run(
            &gw,
            &actor,
            Command::CreateCount(CreateCount {
                store_id: "north".into(),
                pool: None,
                name: "weekly".into(),
            }),
        )
        .await
        .unwrap(),
    );
    run(&gw, &actor, count_step(&count_id, CountLifecycle::Start)).await.unwrap();

    let err = run(&gw, &actor, Command::ReconcileCount(CountRef { count_id }))
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), Some(ReasonCode::InvalidStateTransition));
    assert!(err.to_string().contains("ACTIVE"));
    assert!(err.to_string().contains("RECONCILE"));
}
