use thiserror::Error;

use crate::model::ModelId;

/// Error taxonomy for the storefront core.
///
/// Placement-time variants abort the enclosing transaction wholesale; the
/// store's commit is the single point of truth for whether an order exists.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input rejected before any store access.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Product missing or inactive.
    #[error("product {0} not found")]
    ProductNotFound(ModelId),

    /// Requested quantity exceeds current stock for the named product.
    #[error("insufficient stock for product {product_id}")]
    InsufficientStock { product_id: ModelId },

    /// Order missing or not visible to the caller.
    #[error("order {0} not found")]
    OrderNotFound(ModelId),

    /// Webhook signature verification failed; nothing was mutated.
    #[error("webhook signature verification failed: {0}")]
    Authenticity(String),

    /// The card gateway rejected or failed an outbound call.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Connection or transaction failure in the underlying store. Callers
    /// may retry; no partial state is ever left visible.
    #[error("store error: {0}")]
    Db(#[from] sqlx::Error),
}
