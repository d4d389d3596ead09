//! Basket validation and pricing.
//!
//! The placement transaction re-reads each product inside the store
//! transaction and feeds the rows through these functions; prices quoted by
//! the client are never trusted. Everything here is pure so the rules can be
//! tested without a database.

use crate::error::StoreError;
use crate::model::{BasketLine, MinorUnits, ModelId, PlaceOrder};

/// Catalog state for one product as read inside the placement transaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductQuote {
    pub price: MinorUnits,
    pub stock_quantity: i32,
}

/// One basket line with its price captured from the live catalog read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ModelId,
    pub quantity: i32,
    pub unit_price: MinorUnits,
}

/// Reject malformed baskets before any store access.
pub fn validate_basket(order: &PlaceOrder) -> Result<(), StoreError> {
    if order.items.is_empty() {
        return Err(StoreError::Validation("basket is empty".to_string()));
    }
    for line in &order.items {
        if line.quantity <= 0 {
            return Err(StoreError::Validation(format!(
                "quantity for product {} must be positive",
                line.product_id
            )));
        }
    }
    Ok(())
}

/// Price one requested line against the catalog row read for it.
///
/// `None` means the product row was absent or inactive. A failure here
/// aborts the whole placement; nothing commits.
pub fn price_line(
    line: &BasketLine,
    quote: Option<&ProductQuote>,
) -> Result<PricedLine, StoreError> {
    let quote = quote.ok_or(StoreError::ProductNotFound(line.product_id))?;

    if quote.stock_quantity < line.quantity {
        return Err(StoreError::InsufficientStock {
            product_id: line.product_id,
        });
    }

    Ok(PricedLine {
        product_id: line.product_id,
        quantity: line.quantity,
        unit_price: quote.price,
    })
}

/// Total of a priced basket: Σ(unit price × quantity).
pub fn basket_total(lines: &[PricedLine]) -> MinorUnits {
    lines
        .iter()
        .map(|line| line.unit_price * MinorUnits::from(line.quantity))
        .sum()
}
