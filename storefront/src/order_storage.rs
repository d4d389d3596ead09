//! Postgres storage for the order ledger.
//!
//! All multi-step writes run inside one sqlx transaction; dropping the
//! transaction on any error path rolls everything back, so the catalog,
//! cart, and ledger are never left partially updated.

use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::model::{
    AdminOrderRow, AdminOrderView, ModelId, Order, OrderDetailRow, OrderItem, OrderRow,
    OrderStatus, OrderWithItems, PaymentStatus, PlaceOrder,
};
use crate::pricing::{self, PricedLine, ProductQuote};

const ORDER_COLUMNS: &str = "id, user_id, address_id, total_amount, status, payment_status, \
                             payment_reference, notes, created_at, updated_at";

const ORDER_DETAIL_COLUMNS: &str =
    "o.id, o.user_id, o.address_id, o.total_amount, o.status, o.payment_status, \
     o.payment_reference, o.notes, o.created_at, o.updated_at, \
     a.street_address, a.city, a.state, a.postal_code, a.country";

const ADMIN_ORDER_COLUMNS: &str =
    "o.id, o.user_id, o.address_id, o.total_amount, o.status, o.payment_status, \
     o.payment_reference, o.notes, o.created_at, o.updated_at, \
     u.first_name, u.last_name, u.email";

pub struct OrderStorage {
    pub pool: PgPool,
}

impl OrderStorage {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert a proposed basket into a committed order with stock reserved
    /// and the cart emptied, as a single all-or-nothing unit.
    ///
    /// Each product row is read with `FOR UPDATE`, so two placements racing
    /// for the same limited stock serialize on the row lock; the conditional
    /// decrement is a second guard that can never drive stock negative.
    pub async fn place_order(
        &self,
        user_id: ModelId,
        request: &PlaceOrder,
    ) -> Result<Order, StoreError> {
        pricing::validate_basket(request)?;

        debug!(
            "Starting placement for user {} with {} basket lines",
            user_id,
            request.items.len()
        );
        let mut tx = self.pool.begin().await?;

        // Lock product rows in a canonical order; placements locking the
        // same products in client-supplied order can deadlock each other.
        let mut lines: Vec<_> = request.items.iter().collect();
        lines.sort_by_key(|line| line.product_id);

        let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
        for line in lines {
            let quote = sqlx::query_as::<_, ProductQuote>(
                "SELECT price, stock_quantity FROM products \
                 WHERE id = $1 AND is_active = TRUE \
                 FOR UPDATE",
            )
            .bind(line.product_id)
            .fetch_optional(&mut *tx)
            .await?;

            priced.push(pricing::price_line(line, quote.as_ref())?);
        }

        let total = pricing::basket_total(&priced);

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (user_id, address_id, total_amount, status, payment_status, notes) \
             VALUES ($1, $2, $3, 'pending', 'unpaid', $4) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(request.address_id)
        .bind(total)
        .bind(&request.notes)
        .fetch_one(&mut *tx)
        .await?;

        for line in &priced {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(order_row.id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;

            let decremented = sqlx::query(
                "UPDATE products SET stock_quantity = stock_quantity - $1 \
                 WHERE id = $2 AND stock_quantity >= $1",
            )
            .bind(line.quantity)
            .bind(line.product_id)
            .execute(&mut *tx)
            .await?;

            if decremented.rows_affected() == 0 {
                // Stock moved underneath us despite the row lock. Abort; the
                // dropped transaction rolls back every write above.
                error!(
                    "Stock decrement refused for product {} during order {}",
                    line.product_id, order_row.id
                );
                return Err(StoreError::InsufficientStock {
                    product_id: line.product_id,
                });
            }
        }

        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            "Placed order {} for user {} totalling {} minor units",
            order_row.id, user_id, total
        );
        Order::try_from(order_row)
    }

    /// Caller's order history, newest first, with line items and delivery
    /// address attached.
    pub async fn get_orders_for_user(
        &self,
        user_id: ModelId,
    ) -> Result<Vec<OrderWithItems>, StoreError> {
        let rows = sqlx::query_as::<_, OrderDetailRow>(&format!(
            "SELECT {ORDER_DETAIL_COLUMNS} FROM orders o \
             LEFT JOIN addresses a ON o.address_id = a.id \
             WHERE o.user_id = $1 ORDER BY o.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        self.attach_items(rows).await
    }

    /// One order, visible only to its owner.
    pub async fn get_order(
        &self,
        user_id: ModelId,
        order_id: ModelId,
    ) -> Result<OrderWithItems, StoreError> {
        let row = sqlx::query_as::<_, OrderDetailRow>(&format!(
            "SELECT {ORDER_DETAIL_COLUMNS} FROM orders o \
             LEFT JOIN addresses a ON o.address_id = a.id \
             WHERE o.id = $1 AND o.user_id = $2"
        ))
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::OrderNotFound(order_id))?;

        let mut with_items = self.attach_items(vec![row]).await?;
        Ok(with_items.remove(0))
    }

    /// Admin view: all orders with the customer joined in, optionally
    /// filtered by status, newest first.
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AdminOrderView>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, AdminOrderRow>(&format!(
                    "SELECT {ADMIN_ORDER_COLUMNS} FROM orders o \
                     LEFT JOIN users u ON o.user_id = u.id \
                     WHERE o.status = $1 \
                     ORDER BY o.created_at DESC LIMIT $2 OFFSET $3"
                ))
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AdminOrderRow>(&format!(
                    "SELECT {ADMIN_ORDER_COLUMNS} FROM orders o \
                     LEFT JOIN users u ON o.user_id = u.id \
                     ORDER BY o.created_at DESC LIMIT $1 OFFSET $2"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(AdminOrderView::try_from).collect()
    }

    /// Admin action: move an order to a new fulfilment status.
    pub async fn update_status(
        &self,
        order_id: ModelId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $1, updated_at = NOW() \
             WHERE id = $2 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::OrderNotFound(order_id))?;

        info!("Order {} moved to status {}", order_id, status.as_str());
        Order::try_from(row)
    }

    /// Persist the gateway's intent reference on the order it charges.
    pub async fn set_payment_reference(
        &self,
        order_id: ModelId,
        reference: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET payment_reference = $1, updated_at = NOW() WHERE id = $2")
            .bind(reference)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        debug!("Stored payment reference for order {}", order_id);
        Ok(())
    }

    /// Settle the order whose stored reference matches a succeeded charge.
    ///
    /// The `payment_status` filter encodes the forward-only state machine:
    /// an order that already failed is never flipped to paid, and a
    /// redelivered success event re-asserts `paid` harmlessly. Returns the
    /// number of orders touched (0 when the reference matched nothing).
    pub async fn mark_paid_by_reference(&self, reference: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE orders \
             SET payment_status = 'paid', status = 'confirmed', updated_at = NOW() \
             WHERE payment_reference = $1 AND payment_status IN ('unpaid', 'paid')",
        )
        .bind(reference)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Record a failed charge against the matching order. Order status is
    /// left untouched; only the payment leg fails.
    pub async fn mark_failed_by_reference(&self, reference: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE orders \
             SET payment_status = 'failed', updated_at = NOW() \
             WHERE payment_reference = $1 AND payment_status IN ('unpaid', 'failed')",
        )
        .bind(reference)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Current payment status of the order holding a gateway reference, if
    /// any. Used to classify why a charge event could not be applied.
    pub async fn payment_status_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentStatus>, StoreError> {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT payment_status FROM orders WHERE payment_reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        status.map(|s| s.parse()).transpose()
    }

    async fn attach_items(
        &self,
        rows: Vec<OrderDetailRow>,
    ) -> Result<Vec<OrderWithItems>, StoreError> {
        let ids: Vec<ModelId> = rows.iter().map(|row| row.id).collect();
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT oi.id, oi.order_id, oi.product_id, oi.quantity, oi.unit_price, \
                    p.name, p.image_url \
             FROM order_items oi \
             JOIN products p ON oi.product_id = p.id \
             WHERE oi.order_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} items across {} orders", items.len(), ids.len());

        rows.into_iter()
            .map(|row| {
                let order_id = row.id;
                let (order, address) = row.into_parts()?;
                let order_items = items
                    .iter()
                    .filter(|item| item.order_id == order_id)
                    .cloned()
                    .collect();
                Ok(OrderWithItems {
                    order,
                    address,
                    items: order_items,
                })
            })
            .collect()
    }
}
