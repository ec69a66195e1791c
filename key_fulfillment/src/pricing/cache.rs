//! Read-mostly snapshot of the live pricing rules.
//!
//! Readers take an `Arc<Vec<PricingRule>>` with one atomic load; a refresh
//! swaps in a whole new vector, so a price computed during a refresh sees
//! either the old or the new rule set, never a mix. The cache is owned by its
//! caller and passed where it is needed.

use std::sync::Arc;

use arc_swap::ArcSwap;
use diesel::SqliteConnection;

use super::{PricingResolver, repo};
use crate::error::Result;
use crate::models::PricingRule;

/// Atomically swappable rule snapshot. Starts empty.
#[derive(Debug)]
pub struct PricingRuleCache {
    rules: ArcSwap<Vec<PricingRule>>,
}

impl Default for PricingRuleCache {
    fn default() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl PricingRuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Vec<PricingRule>> {
        self.rules.load_full()
    }

    /// Reloads live rules from the database and swaps them in.
    /// Returns the number of rules now cached.
    pub fn refresh(&self, conn: &mut SqliteConnection) -> Result<usize> {
        let rules = repo::load_live_rules(conn)?;
        let n = rules.len();
        self.rules.store(Arc::new(rules));
        tracing::debug!(rules = n, "pricing rule cache refreshed");
        Ok(n)
    }

    /// Replaces the snapshot directly.
    pub fn replace(&self, rules: Vec<PricingRule>) {
        self.rules.store(Arc::new(rules));
    }

    /// Price against the current snapshot.
    pub fn calculate_price(
        &self,
        resolver: &PricingResolver,
        base: i64,
        category: Option<&str>,
        provider: &str,
    ) -> i64 {
        resolver.calculate_price(&self.rules.load(), base, category, provider)
    }

    /// Margin against the current snapshot.
    pub fn applicable_margin(
        &self,
        resolver: &PricingResolver,
        base: i64,
        category: Option<&str>,
        provider: &str,
    ) -> i32 {
        resolver.applicable_margin(&self.rules.load(), base, category, provider)
    }
}
