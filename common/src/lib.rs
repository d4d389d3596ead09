pub mod config;

/// Common utilities shared across the Greenleaf storefront backend
///
/// This crate provides shared functionality used by the storefront services:
///
/// - Configuration loading for all executables
/// - Shared test utilities and database helpers

// Test helpers module - available for both development and test builds
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{
    create_test_pool, generate_unique_id, generate_unique_numeric_id, get_test_database_url,
};
