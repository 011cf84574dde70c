use kolbook::config::Config;
use kolbook::db::init_db;
use kolbook::domain::{
    CohortKey, CommissionStatus, Decimal, OrderRequest, Participant, ParticipantId, RatioTable,
    RelationshipRequest, Role, YearMonth,
};
use kolbook::{EngineError, Ledger, Repository, RollupCompiler};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    ledger: Ledger,
    compiler: RollupCompiler,
    _temp: TempDir,
}

async fn setup() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let config = Config::for_database(db_path);

    Harness {
        ledger: Ledger::new(repo.clone(), &config),
        compiler: RollupCompiler::new(repo, config.db_timeout()),
        _temp: temp_dir,
    }
}

async fn register(ledger: &Ledger, id: &str, role: Role) {
    ledger
        .register_participant(Participant::new(ParticipantId::new(id), id, role))
        .await
        .unwrap();
}

async fn assign(ledger: &Ledger, shop: &str, sponsor: &str, date: &str) {
    ledger
        .reassign(RelationshipRequest {
            shop_id: ParticipantId::new(shop),
            new_sponsor_id: ParticipantId::new(sponsor),
            effective_date: date.parse().unwrap(),
            reason: None,
            kind: None,
        })
        .await
        .unwrap();
}

fn order(shop: &str, date: &str, total: i64) -> OrderRequest {
    OrderRequest {
        shop_id: ParticipantId::new(shop),
        order_date: date.parse().unwrap(),
        total_amount: Some(Decimal::from_i64(total)),
        is_self_shop_order: false,
        line_items: vec![],
    }
}

fn may() -> YearMonth {
    YearMonth::new(2024, 5).unwrap()
}

#[tokio::test]
async fn test_reassignment_splits_history_between_sponsors() {
    let h = setup().await;
    register(&h.ledger, "shop-1", Role::Shop).await;
    register(&h.ledger, "kol-a", Role::Kol).await;
    register(&h.ledger, "ol-b", Role::Ol).await;
    assign(&h.ledger, "shop-1", "kol-a", "2024-01-01").await;
    assign(&h.ledger, "shop-1", "ol-b", "2024-05-16").await;

    let early = h.ledger.create_order(order("shop-1", "2024-05-15", 1_000_000)).await.unwrap();
    let late = h.ledger.create_order(order("shop-1", "2024-05-16", 1_000_000)).await.unwrap();

    assert_eq!(early.sponsor_id, Some(ParticipantId::new("kol-a")));
    assert_eq!(early.commission_amount, Decimal::from_i64(300_000));
    assert_eq!(late.sponsor_id, Some(ParticipantId::new("ol-b")));
    assert_eq!(late.commission_amount, Decimal::from_i64(200_000));

    let history = h.ledger.history(&ParticipantId::new("shop-1")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].ended_at, Some("2024-05-15".parse().unwrap()));
    assert!(history[1].is_active);
}

#[tokio::test]
async fn test_shop_shares_follow_order_mutations() {
    let h = setup().await;
    register(&h.ledger, "kol-a", Role::Kol).await;
    for shop in ["shop-1", "shop-2"] {
        register(&h.ledger, shop, Role::Shop).await;
        assign(&h.ledger, shop, "kol-a", "2024-01-01").await;
    }

    h.ledger.create_order(order("shop-1", "2024-05-03", 300)).await.unwrap();
    let second = h.ledger.create_order(order("shop-2", "2024-05-04", 100)).await.unwrap();

    let key = CohortKey::new(RatioTable::ShopSales, ParticipantId::new("kol-a"), may());
    let rows = h.ledger.cohort(&key).await.unwrap();
    let shares: Vec<(String, Decimal)> = rows.iter().map(|r| (r.item_id.clone(), r.ratio)).collect();
    assert_eq!(
        shares,
        vec![
            ("shop-1".to_string(), Decimal::from_i64(75)),
            ("shop-2".to_string(), Decimal::from_i64(25)),
        ]
    );

    h.ledger
        .set_order_status(&second.id, CommissionStatus::Cancelled)
        .await
        .unwrap();
    let rows = h.ledger.cohort(&key).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ratio, Decimal::hundred());
    assert!(h.ledger.verify_cohort(&key).await.unwrap().consistent);
}

#[tokio::test]
async fn test_paid_order_cannot_be_deleted() {
    let h = setup().await;
    register(&h.ledger, "shop-1", Role::Shop).await;
    register(&h.ledger, "kol-a", Role::Kol).await;
    assign(&h.ledger, "shop-1", "kol-a", "2024-01-01").await;

    let placed = h.ledger.create_order(order("shop-1", "2024-05-03", 500)).await.unwrap();
    h.ledger
        .set_order_status(&placed.id, CommissionStatus::Paid)
        .await
        .unwrap();

    let err = h.ledger.delete_order(&placed.id).await.unwrap_err();
    assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
    assert_eq!(err.kind(), "terminal_state_violation");
}

#[tokio::test]
async fn test_rollup_totals_orders_and_devices() {
    let h = setup().await;
    register(&h.ledger, "shop-1", Role::Shop).await;
    register(&h.ledger, "kol-a", Role::Kol).await;
    assign(&h.ledger, "shop-1", "kol-a", "2024-01-01").await;

    h.ledger.create_order(order("shop-1", "2024-05-03", 1_000_000)).await.unwrap();
    let cancelled = h.ledger.create_order(order("shop-1", "2024-05-04", 9_000_000)).await.unwrap();
    h.ledger
        .set_order_status(&cancelled.id, CommissionStatus::Cancelled)
        .await
        .unwrap();
    h.ledger
        .record_device_sale(kolbook::domain::DeviceSaleRequest {
            shop_id: ParticipantId::new("shop-1"),
            sale_date: "2024-05-10".parse().unwrap(),
            quantity: 2,
            device_name: None,
            serial_numbers: vec!["SN-1".to_string(), "SN-2".to_string()],
            notes: None,
        })
        .await
        .unwrap();

    let rollups = h.compiler.compile_period(may()).await.unwrap();
    assert_eq!(rollups.len(), 1);
    let kol = &rollups[0];
    assert_eq!(kol.subordinate_sales, Decimal::from_i64(1_000_000));
    assert_eq!(kol.subordinate_commission, Decimal::from_i64(300_000));
    assert_eq!(kol.device_units_net, 2);
    assert_eq!(kol.device_commission, Decimal::from_i64(3_000_000));
    assert_eq!(kol.total_commission, Decimal::from_i64(3_300_000));

    let stored = h
        .compiler
        .lookup(&ParticipantId::new("kol-a"), "202405".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(stored.total_commission, kol.total_commission);
}
