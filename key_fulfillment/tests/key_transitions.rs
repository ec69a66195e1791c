mod common;
use common::{assert_sqlite_pragmas, inventory, setup_db, stock};

use key_fulfillment::error::FulfillmentError;
use key_fulfillment::inventory::{ReserveRequest, StockKey};
use key_fulfillment::models::{KeySource, KeyStatus};
use key_fulfillment::providers::ProviderSet;

fn request(order: &str) -> ReserveRequest {
    ReserveRequest {
        product_id: "p1".into(),
        variant_id: None,
        order_id: order.into(),
        customer_id: "cus-1".into(),
        line_item_id: "li-1".into(),
        unit: 0,
    }
}

#[test]
fn connections_use_wal_and_busy_timeout() {
    let (db, mut conn) = setup_db();
    assert_sqlite_pragmas(&mut conn);
    assert_sqlite_pragmas(&mut db.connect());
}

#[tokio::test]
async fn revoking_a_delivered_key_blocks_redelivery() {
    let (_db, mut conn) = setup_db();
    stock(&mut conn, "p1", 1);
    let inv = inventory(ProviderSet::new());

    let key = inv.reserve(&mut conn, &request("ord-1")).await.unwrap();
    let delivered = inv.deliver(&mut conn, key.id).unwrap();
    assert_eq!(delivered.status, KeyStatus::Delivered);
    assert!(delivered.delivered_at.is_some());

    let revoked = inv.revoke(&mut conn, key.id, "refund").unwrap();
    assert_eq!(revoked.status, KeyStatus::Revoked);
    assert_eq!(revoked.order_id.as_deref(), Some("ord-1"));
    assert_eq!(revoked.metadata["revocation_reason"], "refund");
    assert!(revoked.revoked_at.is_some());

    let err = inv.deliver(&mut conn, key.id).unwrap_err();
    match err {
        FulfillmentError::InvalidTransition { entity, from, to, .. } => {
            assert_eq!(entity, "key");
            assert_eq!(from, "revoked");
            assert_eq!(to, "delivered");
        }
        other => panic!("expected InvalidTransition, got {other}"),
    }
}

#[tokio::test]
async fn deliver_is_idempotent() {
    let (_db, mut conn) = setup_db();
    stock(&mut conn, "p1", 1);
    let inv = inventory(ProviderSet::new());

    let key = inv.reserve(&mut conn, &request("ord-1")).await.unwrap();
    let once = inv.deliver(&mut conn, key.id).unwrap();
    let twice = inv.deliver(&mut conn, key.id).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn available_keys_cannot_be_delivered() {
    let (_db, mut conn) = setup_db();
    stock(&mut conn, "p1", 1);
    let inv = inventory(ProviderSet::new());

    let err = inv.deliver(&mut conn, 1).unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { ref from, .. } if from == "available"));
    assert!(matches!(
        inv.deliver(&mut conn, 99),
        Err(FulfillmentError::NotFound { entity: "key", id: 99 })
    ));
}

#[test]
fn revoking_unsold_stock_keeps_order_empty() {
    let (_db, mut conn) = setup_db();
    stock(&mut conn, "p1", 2);
    let inv = inventory(ProviderSet::new());

    let revoked = inv.revoke(&mut conn, 1, "leaked batch").unwrap();
    assert_eq!(revoked.status, KeyStatus::Revoked);
    assert!(revoked.order_id.is_none());
    assert_eq!(inv.stock_level(&mut conn, "p1").unwrap(), 1);

    // second revoke is a no-op and keeps the first reason
    let again = inv.revoke(&mut conn, 1, "other").unwrap();
    assert_eq!(again.metadata["revocation_reason"], "leaked batch");
    assert_eq!(again.revoked_at, revoked.revoked_at);

    assert!(matches!(
        inv.revoke(&mut conn, 2, " "),
        Err(FulfillmentError::Validation(_))
    ));
}

#[test]
fn import_skips_codes_already_on_file() {
    let (_db, mut conn) = setup_db();
    let inv = inventory(ProviderSet::new());
    let key = |code: &str, provider| StockKey {
        key_code: code.into(),
        product_id: "p1".into(),
        variant_id: None,
        provider,
        sku: Some("SKU-P1".into()),
        platform: "steam".into(),
        region: "EU".into(),
    };

    let first = inv
        .import_keys(&mut conn, &[key("A", KeySource::Local), key("B", KeySource::Local)])
        .unwrap();
    assert_eq!((first.inserted, first.duplicates), (2, 0));

    // same code from another source is a different key
    let second = inv
        .import_keys(&mut conn, &[key("A", KeySource::Local), key("A", KeySource::Kinguin)])
        .unwrap();
    assert_eq!((second.inserted, second.duplicates), (1, 1));
    assert_eq!(inv.stock_level(&mut conn, "p1").unwrap(), 3);

    let err = inv
        .import_keys(&mut conn, &[key("C", KeySource::Local), key("", KeySource::Local)])
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));
    assert_eq!(inv.stock_level(&mut conn, "p1").unwrap(), 3);
}
