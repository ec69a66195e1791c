//! Database utilities for connections and schema migrations.
//!
//! This module provides:
//! - SQLite connection helpers: [`connection::connect_sqlite`] applies WAL, foreign_keys=ON, and a 5000ms busy_timeout.
//! - Embedded Diesel migrations and runners: [`migrate::run_sqlite`] and [`migrate::run_all`],
//!   which accepts `sqlite:` / `sqlite://` URLs as well as bare file paths.
//!
//! Every worker process opens its own connection; the busy timeout is what lets
//! concurrent reservers queue on SQLite's single writer instead of failing fast.
//!
//! Example:
//! ```no_run
//! use key_fulfillment::db::{connection, migrate};
//!
//! let db_path = std::env::temp_dir().join("key_fulfillment_example.db");
//! migrate::run_all(db_path.to_str().unwrap()).expect("migrations");
//!
//! let _conn = connection::connect_sqlite(db_path.to_str().unwrap()).expect("connect");
//! ```

pub mod connection;
pub mod migrate;

/// Strips an optional `sqlite:` / `sqlite://` scheme so Diesel gets a plain path.
pub fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

#[cfg(test)]
mod tests {
    use super::sqlite_path;

    #[test]
    fn strips_sqlite_schemes() {
        assert_eq!(sqlite_path("sqlite://data/keys.db"), "data/keys.db");
        assert_eq!(sqlite_path("sqlite:keys.db"), "keys.db");
        assert_eq!(sqlite_path("/var/lib/keys.db"), "/var/lib/keys.db");
    }
}
