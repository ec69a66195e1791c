//! Provider abstraction for key wholesalers.
//!
//! This module defines the [`KeyProvider`] trait, the narrow capability the
//! fulfillment engine relies on when local stock for a product is exhausted.
//! Each wholesaler (Kinguin, CodesWholesale, ...) implements it to handle its
//! own API and credentials.
//!
//! The trait is async and object safe so a runtime-configured, ordered list of
//! `Arc<dyn KeyProvider>` can be tried one after another.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use key_providers::models::{CatalogEntry, ProviderKey};
//! use key_providers::providers::{KeyProvider, ProviderError};
//!
//! struct Shelf;
//!
//! #[async_trait]
//! impl KeyProvider for Shelf {
//!     fn name(&self) -> &str {
//!         "shelf"
//!     }
//!
//!     async fn fetch_key(&self, _product_id: &str) -> Result<ProviderKey, ProviderError> {
//!         Ok(ProviderKey {
//!             code: "XXXX-YYYY".into(),
//!             platform: "Steam".into(),
//!             region: "GLOBAL".into(),
//!         })
//!     }
//!
//!     async fn check_availability(&self, _product_id: &str) -> Result<bool, ProviderError> {
//!         Ok(true)
//!     }
//!
//!     async fn search_products(&self, _query: &str) -> Result<Vec<CatalogEntry>, ProviderError> {
//!         Ok(vec![])
//!     }
//! }
//! ```

pub mod codeswholesale;
pub mod kinguin;

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::{CatalogEntry, ProviderKey};

/// Capability contract for an external key wholesaler.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Stable lowercase provider code (e.g. "kinguin"); recorded on every key
    /// this provider supplies.
    fn name(&self) -> &str;

    /// Buys and returns one key for `product_id`.
    ///
    /// Returns [`ProviderError::OutOfStock`] when the wholesaler has nothing to
    /// sell; that is not a transient condition.
    async fn fetch_key(&self, product_id: &str) -> Result<ProviderKey, ProviderError>;

    /// Reports whether the wholesaler currently has stock for `product_id`.
    async fn check_availability(&self, product_id: &str) -> Result<bool, ProviderError>;

    /// Searches the wholesaler catalog. Not used on the allocation path.
    async fn search_products(&self, query: &str) -> Result<Vec<CatalogEntry>, ProviderError>;
}

/// Errors that can occur during the creation of a provider instance
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// API key contains invalid characters.
    #[snafu(display("Invalid API key format: {source}"))]
    InvalidApiKey {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a [`KeyProvider`] implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The provider's API answered with a non-success status.
    #[snafu(display("API error ({status}): {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// The wholesaler has no keys left for the product.
    #[snafu(display("Provider has no stock for product {product_id}"))]
    OutOfStock {
        product_id: String,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this specific provider.
    #[snafu(display("Invalid parameters for provider: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// An internal error occurred while processing data within the provider.
    #[snafu(display("Internal provider error: {message}"))]
    Internal {
        message: String,
        backtrace: Backtrace,
    },

    /// An error during provider configuration or initialization.
    #[snafu(display("Provider initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: ProviderInitError,
    },
}

impl ProviderError {
    /// Whether retrying the same call later could succeed.
    ///
    /// Network failures, timeouts, throttling (429) and 5xx answers are
    /// transient. Stock, validation and credential problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Reqwest { source, .. } => {
                source.is_timeout()
                    || source.is_connect()
                    || source.is_request()
                    || source.status().is_some_and(|s| s.is_server_error())
            }
            ProviderError::Api { status, .. } => is_transient_status(*status),
            ProviderError::OutOfStock { .. }
            | ProviderError::Validation { .. }
            | ProviderError::Internal { .. }
            | ProviderError::Init { .. } => false,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Turns a non-success HTTP response into [`ProviderError::Api`], or
/// [`ProviderError::OutOfStock`] when the wholesaler answers 404/409 for a
/// purchase.
pub(crate) async fn error_for_response(
    response: reqwest::Response,
    product_id: Option<&str>,
) -> ProviderError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown API error".to_string());

    match (status, product_id) {
        (404 | 409, Some(product_id)) => OutOfStockSnafu { product_id }.build(),
        _ => ApiSnafu { status, message }.build(),
    }
}
