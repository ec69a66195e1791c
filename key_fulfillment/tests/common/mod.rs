#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use key_fulfillment::clock::ManualClock;
use key_fulfillment::db::{connection, migrate};
use key_fulfillment::fulfillment::FulfillmentOrchestrator;
use key_fulfillment::fulfillment::notifier::{Delivery, DeliveryNotifier, NotifyError};
use key_fulfillment::fulfillment::retry::RetryPolicy;
use key_fulfillment::inventory::{KeyInventory, StockKey};
use key_fulfillment::jobs::JobTracker;
use key_fulfillment::models::KeySource;
use key_fulfillment::providers::{ProviderSet, Wholesaler};
use key_providers::models::{CatalogEntry, ProviderKey};
use key_providers::providers::{
    ApiSnafu, KeyProvider, OutOfStockSnafu, ProviderError, ValidationSnafu,
};
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

impl TestDb {
    /// Another connection to the same database file.
    pub fn connect(&self) -> SqliteConnection {
        connection::connect_sqlite(&self.path).expect("connect")
    }
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    migrate::run_all(&path).expect("migrations");

    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
    ))
}

pub fn inventory(providers: ProviderSet) -> KeyInventory {
    KeyInventory::new(providers, Duration::from_millis(100), clock())
}

/// Stocks `n` local keys `<product>-0000`, `<product>-0001`, ...
pub fn stock(conn: &mut SqliteConnection, product: &str, n: usize) {
    let keys: Vec<StockKey> = (0..n)
        .map(|i| StockKey {
            key_code: format!("{product}-{i:04}"),
            product_id: product.to_string(),
            variant_id: None,
            provider: KeySource::Local,
            sku: None,
            platform: "steam".into(),
            region: "EU".into(),
        })
        .collect();
    let summary = inventory(ProviderSet::new())
        .import_keys(conn, &keys)
        .expect("stock keys");
    assert_eq!(summary.inserted, n);
}

/// One scripted answer of a [`StubProvider`].
#[derive(Debug, Clone)]
pub enum Scripted {
    /// A fresh key; codes are `<prefix>-<call number>`.
    Key(&'static str),
    OutOfStock,
    /// 503, transient.
    Unavailable,
    /// 401, not transient.
    Unauthorized,
    /// Never answers; the caller's timeout fires.
    Hang,
    /// Always the same code.
    FixedKey(&'static str),
}

/// Provider answering from a script, then from `fallback`.
pub struct StubProvider {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(fallback: Scripted) -> Arc<Self> {
        Self::scripted(Vec::new(), fallback)
    }

    pub fn scripted(script: Vec<Scripted>, fallback: Scripted) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch_key(&self, product_id: &str) -> Result<ProviderKey, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match next {
            Scripted::Key(prefix) => Ok(ProviderKey {
                code: format!("{prefix}-{n}"),
                platform: "steam".into(),
                region: "GLOBAL".into(),
            }),
            Scripted::FixedKey(code) => Ok(ProviderKey {
                code: code.to_string(),
                platform: "steam".into(),
                region: "GLOBAL".into(),
            }),
            Scripted::OutOfStock => OutOfStockSnafu { product_id }.fail(),
            Scripted::Unavailable => ApiSnafu {
                status: 503u16,
                message: "maintenance",
            }
            .fail(),
            Scripted::Unauthorized => ApiSnafu {
                status: 401u16,
                message: "bad token",
            }
            .fail(),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ValidationSnafu { message: "unreachable" }.fail()
            }
        }
    }

    async fn check_availability(&self, _product_id: &str) -> Result<bool, ProviderError> {
        Ok(!matches!(self.fallback, Scripted::OutOfStock))
    }

    async fn search_products(&self, _query: &str) -> Result<Vec<CatalogEntry>, ProviderError> {
        Ok(vec![])
    }
}

pub fn providers(stubs: Vec<(Wholesaler, Arc<StubProvider>)>) -> ProviderSet {
    stubs
        .into_iter()
        .fold(ProviderSet::new(), |set, (id, stub)| set.with(id, stub))
}

/// Notifier that remembers every delivery and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub deliveries: Mutex<Vec<Delivery>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Arc<Self> {
        let n = Self::default();
        n.fail.store(true, Ordering::SeqCst);
        Arc::new(n)
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryNotifier for RecordingNotifier {
    async fn notify(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        self.deliveries.lock().unwrap().push(delivery.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("mail relay refused".into()));
        }
        Ok(())
    }
}

pub fn orchestrator(
    providers: ProviderSet,
    notifier: Arc<RecordingNotifier>,
) -> FulfillmentOrchestrator {
    let clock = clock();
    FulfillmentOrchestrator::new(
        KeyInventory::new(providers, Duration::from_millis(100), clock.clone()),
        JobTracker::new(clock),
        notifier,
        RetryPolicy::new(3, Duration::from_millis(1)),
    )
}
