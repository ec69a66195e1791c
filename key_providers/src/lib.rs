//! Wholesale key providers.
//!
//! The [`providers::KeyProvider`] trait is the capability contract the
//! fulfillment engine consumes when local stock runs out. Concrete adapters
//! live under [`providers`]; [`models`] holds the provider-neutral shapes they
//! return.

pub mod models;
pub mod providers;
