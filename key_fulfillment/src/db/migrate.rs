//! set up migrations

use anyhow::anyhow;
use diesel::{Connection, SqliteConnection, connection::SimpleConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::sqlite_path;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by `run_sqlite` to bring the database schema up to date.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending Diesel migrations on a SQLite database at the given path.
///
/// This sets the SQLite journal mode to WAL and applies all embedded migrations, returning an error on failure.
pub fn run_sqlite(path: &str) -> anyhow::Result<()> {
    let mut conn = SqliteConnection::establish(path)?;
    conn.batch_execute("PRAGMA journal_mode=WAL;")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))?;

    tracing::info!(applied = applied.len(), "sqlite migrations up to date");
    Ok(())
}

/// Runs pending migrations for the given database URL.
///
/// Accepts `sqlite:`-prefixed URLs and bare file paths. Other schemes are
/// rejected: the engine's allocation guarantees are written against SQLite's
/// single-writer semantics.
pub fn run_all(database_url: &str) -> anyhow::Result<()> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        anyhow::bail!("Unsupported DATABASE_URL: {database_url}");
    }
    run_sqlite(sqlite_path(database_url))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn migrations_apply_on_temp_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_string_lossy().to_string();

        crate::db::migrate::run_sqlite(&path).expect("migration run");
        // second run is a no-op
        crate::db::migrate::run_sqlite(&path).expect("idempotent migration run");

        let mut conn = SqliteConnection::establish(&path).unwrap();

        conn.batch_execute(
            "INSERT INTO digital_keys (key_code, product_id, sku) VALUES ('K-1', 'p-1', 'sku-1')",
        )
        .unwrap();
    }

    #[test]
    fn postgres_urls_are_rejected() {
        let err = run_all("postgres://localhost/keys").unwrap_err();
        assert!(err.to_string().contains("Unsupported DATABASE_URL"));
    }
}
