//! Greenleaf storefront backend.
//!
//! Order placement, payment reconciliation, and the HTTP surface for a
//! cannabis e-commerce store. Catalog and cart tables are shared with the
//! wider platform; this crate owns the order ledger.

pub mod error;
pub mod model;
pub mod order_storage;
pub mod payments;
pub mod pricing;
pub mod server;
pub mod webhook;
