//! End-to-end tests for the placement transaction and payment
//! reconciliation against a live Postgres.
//!
//! Each test skips itself when DATABASE_URL is not set so the suite stays
//! green on machines without a database.

use std::error::Error;
use std::sync::Arc;

use common::test_helpers::{create_test_pool, generate_unique_numeric_id, get_test_database_url};
use sqlx::PgPool;
use storefront::error::StoreError;
use storefront::model::{BasketLine, OrderStatus, PaymentStatus, PlaceOrder};
use storefront::order_storage::OrderStorage;
use storefront::webhook::{GatewayEvent, apply_event};
use tokio::sync::OnceCell;

type TestResult = Result<(), Box<dyn Error + Send + Sync>>;

static SCHEMA: OnceCell<()> = OnceCell::const_new();

async fn test_storage() -> Option<(OrderStorage, PgPool)> {
    let Some(url) = get_test_database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return None;
    };
    let pool = create_test_pool(&url).await.expect("connect test pool");
    SCHEMA
        .get_or_init(|| async {
            sqlx::raw_sql(include_str!("../migrations/0001_schema.sql"))
                .execute(&pool)
                .await
                .expect("apply schema");
        })
        .await;
    Some((OrderStorage::from_pool(pool.clone()), pool))
}

async fn seed_product(pool: &PgPool, price: i64, stock: i32) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO products (name, price, stock_quantity, is_active) \
         VALUES ($1, $2, $3, TRUE) RETURNING id",
    )
    .bind(format!("test-product-{}", generate_unique_numeric_id()))
    .bind(price)
    .bind(stock)
    .fetch_one(pool)
    .await
}

async fn stock_of(pool: &PgPool, product_id: i64) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT stock_quantity FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(pool)
        .await
}

async fn order_count(pool: &PgPool, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

async fn cart_count(pool: &PgPool, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cart_items WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

async fn seed_cart_line(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
    quantity: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO cart_items (user_id, product_id, quantity) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .execute(pool)
        .await?;
    Ok(())
}

fn basket(lines: Vec<BasketLine>) -> PlaceOrder {
    PlaceOrder {
        items: lines,
        address_id: None,
        notes: Some("leave at the door".to_string()),
    }
}

fn succeeded_event(reference: &str) -> GatewayEvent {
    GatewayEvent::from_body(
        format!(
            r#"{{"id":"evt_{reference}","type":"payment_intent.succeeded","data":{{"object":{{"id":"{reference}"}}}}}}"#
        )
        .as_bytes(),
    )
    .expect("event parses")
}

fn failed_event(reference: &str) -> GatewayEvent {
    GatewayEvent::from_body(
        format!(
            r#"{{"id":"evt_{reference}","type":"payment_intent.payment_failed","data":{{"object":{{"id":"{reference}"}}}}}}"#
        )
        .as_bytes(),
    )
    .expect("event parses")
}

#[tokio::test]
async fn placement_commits_order_items_stock_and_cart() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 2500, 3).await?;
    seed_cart_line(&pool, user_id, product_id, 1).await?;

    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    assert_eq!(order.total_amount, 2500);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(stock_of(&pool, product_id).await?, 2);
    assert_eq!(cart_count(&pool, user_id).await?, 0);

    let fetched = storage.get_order(user_id, order.id).await?;
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].unit_price, 2500);
    assert_eq!(fetched.items[0].quantity, 1);
    Ok(())
}

#[tokio::test]
async fn placement_captures_prices_per_line() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let p1 = seed_product(&pool, 1000, 5).await?;
    let p2 = seed_product(&pool, 250, 10).await?;

    let order = storage
        .place_order(
            user_id,
            &basket(vec![
                BasketLine {
                    product_id: p1,
                    quantity: 2,
                },
                BasketLine {
                    product_id: p2,
                    quantity: 3,
                },
            ]),
        )
        .await?;

    assert_eq!(order.total_amount, 2 * 1000 + 3 * 250);

    // Catalog price changes never retroactively alter the order.
    sqlx::query("UPDATE products SET price = 9999 WHERE id = $1")
        .bind(p1)
        .execute(&pool)
        .await?;
    let fetched = storage.get_order(user_id, order.id).await?;
    assert_eq!(fetched.order.total_amount, 2750);
    let line = fetched
        .items
        .iter()
        .find(|item| item.product_id == p1)
        .expect("line for p1");
    assert_eq!(line.unit_price, 1000);
    Ok(())
}

#[tokio::test]
async fn insufficient_stock_rolls_back_everything() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let in_stock = seed_product(&pool, 1000, 5).await?;
    let sold_out = seed_product(&pool, 500, 0).await?;
    seed_cart_line(&pool, user_id, in_stock, 2).await?;

    let err = storage
        .place_order(
            user_id,
            &basket(vec![
                BasketLine {
                    product_id: in_stock,
                    quantity: 2,
                },
                BasketLine {
                    product_id: sold_out,
                    quantity: 1,
                },
            ]),
        )
        .await
        .unwrap_err();

    match err {
        StoreError::InsufficientStock { product_id } => assert_eq!(product_id, sold_out),
        other => panic!("expected InsufficientStock, got {other:?}"),
    }

    assert_eq!(stock_of(&pool, in_stock).await?, 5);
    assert_eq!(order_count(&pool, user_id).await?, 0);
    assert_eq!(cart_count(&pool, user_id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn unknown_product_fails_the_whole_basket() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let real = seed_product(&pool, 1000, 5).await?;

    let err = storage
        .place_order(
            user_id,
            &basket(vec![
                BasketLine {
                    product_id: real,
                    quantity: 1,
                },
                BasketLine {
                    product_id: -1,
                    quantity: 1,
                },
            ]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::ProductNotFound(-1)));
    assert_eq!(stock_of(&pool, real).await?, 5);
    assert_eq!(order_count(&pool, user_id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn inactive_product_is_not_sellable() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 1000, 5).await?;
    sqlx::query("UPDATE products SET is_active = FALSE WHERE id = $1")
        .bind(product_id)
        .execute(&pool)
        .await?;

    let err = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ProductNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn concurrent_placements_never_oversell() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let storage = Arc::new(storage);
    let product_id = seed_product(&pool, 1000, 3).await?;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let storage = Arc::clone(&storage);
        let user_id = generate_unique_numeric_id();
        handles.push(tokio::spawn(async move {
            storage
                .place_order(
                    user_id,
                    &basket(vec![BasketLine {
                        product_id,
                        quantity: 2,
                    }]),
                )
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            successes += 1;
        }
    }

    // Stock of 3 can satisfy only one of two qty-2 placements serially.
    assert_eq!(successes, 1);
    assert_eq!(stock_of(&pool, product_id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn opposite_order_baskets_do_not_deadlock() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let storage = Arc::new(storage);
    let p1 = seed_product(&pool, 1000, 5).await?;
    let p2 = seed_product(&pool, 2000, 5).await?;

    // Same two products, lines submitted in opposite order. Row locks are
    // taken in canonical product order, so both placements must complete.
    let mut handles = Vec::new();
    for lines in [vec![(p1, 1), (p2, 1)], vec![(p2, 1), (p1, 1)]] {
        let storage = Arc::clone(&storage);
        let user_id = generate_unique_numeric_id();
        handles.push(tokio::spawn(async move {
            let items = lines
                .into_iter()
                .map(|(product_id, quantity)| BasketLine {
                    product_id,
                    quantity,
                })
                .collect();
            storage.place_order(user_id, &basket(items)).await
        }));
    }

    for handle in handles {
        handle.await??;
    }
    assert_eq!(stock_of(&pool, p1).await?, 3);
    assert_eq!(stock_of(&pool, p2).await?, 3);
    Ok(())
}

#[tokio::test]
async fn order_history_carries_address_and_product_details() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO products (name, price, stock_quantity, is_active, image_url) \
         VALUES ($1, 1800, 6, TRUE, $2) RETURNING id",
    )
    .bind(format!("og-kush-{user_id}"))
    .bind("https://cdn.example.com/og-kush.jpg")
    .fetch_one(&pool)
    .await?;
    let address_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO addresses (user_id, street_address, city, state, postal_code, country) \
         VALUES ($1, '12 High St', 'Denver', 'CO', '80202', 'US') RETURNING id",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    let order = storage
        .place_order(
            user_id,
            &PlaceOrder {
                items: vec![BasketLine {
                    product_id,
                    quantity: 2,
                }],
                address_id: Some(address_id),
                notes: None,
            },
        )
        .await?;

    let history = storage.get_orders_for_user(user_id).await?;
    let fetched = history
        .iter()
        .find(|entry| entry.order.id == order.id)
        .expect("placed order in history");

    let address = fetched.address.as_ref().expect("address joined in");
    assert_eq!(address.street_address, "12 High St");
    assert_eq!(address.postal_code, "80202");

    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].name, format!("og-kush-{user_id}"));
    assert_eq!(
        fetched.items[0].image_url.as_deref(),
        Some("https://cdn.example.com/og-kush.jpg")
    );
    Ok(())
}

#[tokio::test]
async fn admin_listing_joins_customer_details() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    sqlx::query(
        "INSERT INTO users (id, email, first_name, last_name) VALUES ($1, $2, 'Jo', 'Doe')",
    )
    .bind(user_id)
    .bind(format!("jo-{user_id}@example.com"))
    .execute(&pool)
    .await?;
    let product_id = seed_product(&pool, 1200, 3).await?;

    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    let listed = storage.list_orders(None, 200, 0).await?;
    let view = listed
        .iter()
        .find(|view| view.order.id == order.id)
        .expect("placed order in admin listing");
    assert_eq!(view.email.as_deref(), Some(format!("jo-{user_id}@example.com").as_str()));
    assert_eq!(view.first_name.as_deref(), Some("Jo"));
    Ok(())
}

#[tokio::test]
async fn charge_succeeded_settles_and_redelivery_is_idempotent() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 1500, 4).await?;
    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    let reference = format!("pi_test_{}", generate_unique_numeric_id());
    storage.set_payment_reference(order.id, &reference).await?;

    apply_event(&storage, &succeeded_event(&reference)).await?;
    let settled = storage.get_order(user_id, order.id).await?;
    assert_eq!(settled.order.payment_status, PaymentStatus::Paid);
    assert_eq!(settled.order.status, OrderStatus::Confirmed);

    // Redelivery of the identical event is a no-op producing the same state.
    apply_event(&storage, &succeeded_event(&reference)).await?;
    let redelivered = storage.get_order(user_id, order.id).await?;
    assert_eq!(redelivered.order.payment_status, PaymentStatus::Paid);
    assert_eq!(redelivered.order.status, OrderStatus::Confirmed);
    Ok(())
}

#[tokio::test]
async fn charge_failed_marks_payment_only() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 1500, 4).await?;
    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    let reference = format!("pi_test_{}", generate_unique_numeric_id());
    storage.set_payment_reference(order.id, &reference).await?;

    apply_event(&storage, &failed_event(&reference)).await?;
    let failed = storage.get_order(user_id, order.id).await?;
    assert_eq!(failed.order.payment_status, PaymentStatus::Failed);
    // Order status is untouched by a failed charge.
    assert_eq!(failed.order.status, OrderStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn settled_order_is_not_reverted_by_a_late_failure_event() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 1500, 4).await?;
    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    let reference = format!("pi_test_{}", generate_unique_numeric_id());
    storage.set_payment_reference(order.id, &reference).await?;

    apply_event(&storage, &succeeded_event(&reference)).await?;
    apply_event(&storage, &failed_event(&reference)).await?;

    let after = storage.get_order(user_id, order.id).await?;
    assert_eq!(after.order.payment_status, PaymentStatus::Paid);
    Ok(())
}

#[tokio::test]
async fn unmatched_reference_is_acknowledged_without_mutation() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 1500, 4).await?;
    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    // Event references an intent no order has ever stored.
    apply_event(&storage, &succeeded_event("pi_unknown_reference")).await?;

    let untouched = storage.get_order(user_id, order.id).await?;
    assert_eq!(untouched.order.payment_status, PaymentStatus::Unpaid);
    Ok(())
}

#[tokio::test]
async fn admin_status_update_and_listing() -> TestResult {
    let Some((storage, pool)) = test_storage().await else {
        return Ok(());
    };
    let user_id = generate_unique_numeric_id();
    let product_id = seed_product(&pool, 1500, 4).await?;
    let order = storage
        .place_order(
            user_id,
            &basket(vec![BasketLine {
                product_id,
                quantity: 1,
            }]),
        )
        .await?;

    let shipped = storage.update_status(order.id, OrderStatus::Shipped).await?;
    assert_eq!(shipped.status, OrderStatus::Shipped);

    let listed = storage
        .list_orders(Some(OrderStatus::Shipped), 100, 0)
        .await?;
    assert!(listed.iter().any(|view| view.order.id == order.id));

    let err = storage
        .update_status(-1, OrderStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::OrderNotFound(-1)));
    Ok(())
}
