//! Kinguin eCommerce API adapter.

pub mod provider;
pub mod response;

pub use provider::KinguinProvider;
