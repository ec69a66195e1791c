//! SQLite connection helpers.
//!
//! Provides [`connect_sqlite`] that opens a connection and applies the PRAGMAs
//! every engine connection relies on: WAL journaling, foreign_keys=ON, and a
//! 5000ms busy_timeout.
//!
//! Example:
//! ```no_run
//! use key_fulfillment::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("key_fulfillment_example.db");
//! let _conn = connect_sqlite(path.to_str().unwrap()).expect("open sqlite");
//! ```

use diesel::{Connection, RunQueryDsl, SqliteConnection, sql_query};

use crate::db::sqlite_path;

/// Open a SQLite connection and apply connection-wide PRAGMAs.
pub fn connect_sqlite(database_url: &str) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(sqlite_path(database_url))?;

    // busy_timeout first: switching to WAL may itself wait on another writer
    sql_query("PRAGMA busy_timeout=5000;").execute(&mut conn)?;
    sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(&mut conn)?;
    Ok(conn)
}
