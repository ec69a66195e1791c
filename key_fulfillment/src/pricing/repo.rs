//! Statements against `pricing_rules`, plus the rules-file loader.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{SqliteConnection, insert_into, update};
use serde::Deserialize;

use crate::models::{NewPricingRule, PricingRule};
use crate::schema::pricing_rules::dsl as pr;
use crate::tz::to_rfc3339_millis;

/// Inserts a rule stamped with `now` and returns it.
pub fn insert_rule(
    conn: &mut SqliteConnection,
    rule: &NewPricingRule,
    now: DateTime<Utc>,
) -> QueryResult<PricingRule> {
    let ts = to_rfc3339_millis(now);
    insert_into(pr::pricing_rules)
        .values((rule, pr::created_at.eq(ts.as_str()), pr::updated_at.eq(ts.as_str())))
        .returning(PricingRule::as_returning())
        .get_result(conn)
}

/// Toggles `is_active`; returns rows changed.
pub fn set_rule_active(
    conn: &mut SqliteConnection,
    id: i32,
    active: bool,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    update(pr::pricing_rules)
        .filter(pr::id.eq(id))
        .filter(pr::deleted_at.is_null())
        .set((pr::is_active.eq(active), pr::updated_at.eq(to_rfc3339_millis(now))))
        .execute(conn)
}

/// Hides a rule from every snapshot.
pub fn soft_delete_rule(conn: &mut SqliteConnection, id: i32, now: DateTime<Utc>) -> QueryResult<usize> {
    let ts = to_rfc3339_millis(now);
    update(pr::pricing_rules)
        .filter(pr::id.eq(id))
        .filter(pr::deleted_at.is_null())
        .set((pr::deleted_at.eq(ts.as_str()), pr::updated_at.eq(ts.as_str())))
        .execute(conn)
}

/// Every non-deleted rule, active or not, in ascending id order.
pub fn load_live_rules(conn: &mut SqliteConnection) -> QueryResult<Vec<PricingRule>> {
    pr::pricing_rules
        .filter(pr::deleted_at.is_null())
        .order(pr::id.asc())
        .select(PricingRule::as_select())
        .load(conn)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<NewPricingRule>,
}

/// Parses a TOML rules file made of `[[rules]]` tables.
pub fn parse_rules_str(s: &str) -> anyhow::Result<Vec<NewPricingRule>> {
    let file: RulesFile = toml::from_str(s).context("parsing rules TOML")?;
    for (i, r) in file.rules.iter().enumerate() {
        if let (Some(min), Some(max)) = (r.min_price, r.max_price) {
            anyhow::ensure!(min <= max, "rule {i}: min_price {min} > max_price {max}");
        }
        anyhow::ensure!(!r.provider.trim().is_empty(), "rule {i}: provider must not be empty");
    }
    Ok(file.rules)
}

/// Reads and inserts every rule of a rules file in one transaction.
pub fn load_rules_file(
    conn: &mut SqliteConnection,
    path: impl AsRef<Path>,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rules = parse_rules_str(&s)?;
    let n = conn.immediate_transaction(|conn| {
        for r in &rules {
            insert_rule(conn, r, now)?;
        }
        QueryResult::Ok(rules.len())
    })?;
    tracing::info!(rules = n, path = %path.display(), "pricing rules loaded");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_with_defaults() {
        let rules = parse_rules_str(
            r#"
            [[rules]]
            margin_percentage = 20

            [[rules]]
            category_id = "action"
            category_name = "Action"
            provider = "kinguin"
            margin_percentage = 10
            priority = 5
            "#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].provider, "all");
        assert!(rules[0].is_active);
        assert_eq!(rules[1].category_id.as_deref(), Some("action"));
        assert_eq!(rules[1].priority, 5);
    }

    #[test]
    fn rejects_inverted_bounds_and_unknown_fields() {
        let err = parse_rules_str("[[rules]]\nmargin_percentage = 1\nmin_price = 10\nmax_price = 5\n")
            .unwrap_err();
        assert!(err.to_string().contains("min_price"));
        assert!(parse_rules_str("[[rules]]\nmargin_percentage = 1\nmargin = 2\n").is_err());
    }
}
