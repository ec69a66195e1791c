//! Digital key allocation and fulfillment engine.
//!
//! Keys live in SQLite (`digital_keys`) and move `available -> assigned ->
//! delivered`, or to `revoked` from anywhere. [`inventory::KeyInventory`]
//! allocates them with conditioned updates so concurrent workers never hand out
//! the same key twice; [`fulfillment::FulfillmentOrchestrator`] turns an
//! order-placed signal into delivered keys and records its progress through
//! [`jobs::JobTracker`]. [`pricing`] resolves sale prices from margin rules.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fulfillment;
pub mod inventory;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod schema;
pub mod tz;
