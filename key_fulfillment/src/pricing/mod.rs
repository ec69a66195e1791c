//! Pricing Resolver.
//!
//! Pure functions over a rule snapshot. [`select_rule`] is the only place a
//! rule is chosen, so [`PricingResolver::calculate_price`] and
//! [`PricingResolver::applicable_margin`] always agree.
//!
//! A rule is a candidate when it is active, its provider is `all` or the
//! requested provider, its category is unset or equal to the requested one, and
//! the base price lies inside its inclusive `[min_price, max_price]` bounds. The
//! candidate with the highest priority wins; among equal priorities the first
//! one in snapshot order (ascending id) wins.

pub mod cache;
pub mod repo;

use crate::models::PricingRule;
use crate::models::pricing::ALL_PROVIDERS;

/// Margin applied when no rule matches.
pub const DEFAULT_MARGIN_PERCENT: i32 = 20;

/// Does `rule` apply to this price query?
pub fn rule_matches(rule: &PricingRule, base: i64, category: Option<&str>, provider: &str) -> bool {
    if !rule.is_active {
        return false;
    }
    if rule.provider != ALL_PROVIDERS && rule.provider != provider {
        return false;
    }
    if let Some(rule_cat) = rule.category_id.as_deref()
        && category != Some(rule_cat)
    {
        return false;
    }
    if rule.min_price.is_some_and(|min| base < min) {
        return false;
    }
    if rule.max_price.is_some_and(|max| base > max) {
        return false;
    }
    true
}

/// Highest-priority matching rule; the earliest one wins a tie.
pub fn select_rule<'a>(
    rules: &'a [PricingRule],
    base: i64,
    category: Option<&str>,
    provider: &str,
) -> Option<&'a PricingRule> {
    rules
        .iter()
        .filter(|r| rule_matches(r, base, category, provider))
        .fold(None, |best: Option<&PricingRule>, r| match best {
            Some(b) if b.priority >= r.priority => Some(b),
            _ => Some(r),
        })
}

/// `round(base * (100 + margin) / 100)`, half away from zero, saturating at
/// the `i64` range.
pub fn apply_margin(base: i64, margin_percent: i32) -> i64 {
    let scaled = i128::from(base) * (100 + i128::from(margin_percent));
    let q = scaled / 100;
    let r = scaled % 100;
    let rounded = if r.abs() * 2 >= 100 { q + scaled.signum() } else { q };
    rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// Resolves sale prices from base prices.
#[derive(Debug, Clone, Copy)]
pub struct PricingResolver {
    default_margin: i32,
}

impl Default for PricingResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MARGIN_PERCENT)
    }
}

impl PricingResolver {
    pub fn new(default_margin: i32) -> Self {
        Self { default_margin }
    }

    pub fn default_margin(&self) -> i32 {
        self.default_margin
    }

    /// Margin percent the price calculation would use.
    pub fn applicable_margin(
        &self,
        rules: &[PricingRule],
        base: i64,
        category: Option<&str>,
        provider: &str,
    ) -> i32 {
        select_rule(rules, base, category, provider)
            .map_or(self.default_margin, |r| r.margin_percentage)
    }

    /// Sale price in minor units. `provider` is usually `"all"`.
    pub fn calculate_price(
        &self,
        rules: &[PricingRule],
        base: i64,
        category: Option<&str>,
        provider: &str,
    ) -> i64 {
        apply_margin(base, self.applicable_margin(rules, base, category, provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rule(id: i32, provider: &str, category: Option<&str>, margin: i32, priority: i32) -> PricingRule {
        PricingRule {
            id,
            category_id: category.map(str::to_string),
            category_name: String::new(),
            provider: provider.to_string(),
            margin_percentage: margin,
            min_price: None,
            max_price: None,
            is_active: true,
            priority,
        }
    }

    #[test]
    fn higher_priority_beats_larger_margin() {
        let rules = vec![
            rule(1, "all", None, 20, 0),
            rule(2, "kinguin", Some("action"), 10, 5),
        ];
        let r = PricingResolver::default();
        assert_eq!(r.calculate_price(&rules, 10_000, Some("action"), "kinguin"), 11_000);
        assert_eq!(r.applicable_margin(&rules, 10_000, Some("action"), "kinguin"), 10);
        // the specific rule does not apply to another provider
        assert_eq!(r.calculate_price(&rules, 10_000, Some("action"), "all"), 12_000);
    }

    #[test]
    fn default_margin_without_rules() {
        assert_eq!(PricingResolver::default().calculate_price(&[], 1000, None, "all"), 1200);
        assert_eq!(PricingResolver::new(35).calculate_price(&[], 1000, None, "all"), 1350);
    }

    #[test]
    fn bounds_and_inactive_rules_are_respected() {
        let mut bounded = rule(1, "all", None, 50, 10);
        bounded.min_price = Some(500);
        bounded.max_price = Some(1000);
        let mut off = rule(2, "all", None, 90, 99);
        off.is_active = false;
        let rules = vec![bounded, off];
        let r = PricingResolver::default();
        assert_eq!(r.applicable_margin(&rules, 500, None, "all"), 50);
        assert_eq!(r.applicable_margin(&rules, 1000, None, "all"), 50);
        assert_eq!(r.applicable_margin(&rules, 1001, None, "all"), 20);
        assert_eq!(r.applicable_margin(&rules, 499, None, "all"), 20);
    }

    #[test]
    fn category_rule_needs_a_category() {
        let rules = vec![rule(1, "all", Some("rpg"), 5, 1)];
        let r = PricingResolver::default();
        assert_eq!(r.applicable_margin(&rules, 100, None, "all"), 20);
        assert_eq!(r.applicable_margin(&rules, 100, Some("rpg"), "all"), 5);
    }

    #[test]
    fn equal_priority_keeps_first_rule() {
        let rules = vec![rule(1, "all", None, 15, 3), rule(2, "all", None, 25, 3)];
        assert_eq!(select_rule(&rules, 100, None, "all").map(|r| r.id), Some(1));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        // 5 * 1.1 = 5.5
        assert_eq!(apply_margin(5, 10), 6);
        // 5 * 1.3 = 6.5
        assert_eq!(apply_margin(5, 30), 7);
        // 1 * 1.2 = 1.2
        assert_eq!(apply_margin(1, 20), 1);
        assert_eq!(apply_margin(-5, 10), -6);
        assert_eq!(apply_margin(i64::MAX, 100), i64::MAX);
    }

    fn arb_rule() -> impl Strategy<Value = PricingRule> {
        (
            0i32..50,
            prop_oneof![Just("all"), Just("kinguin"), Just("codeswholesale")],
            proptest::option::of(prop_oneof![Just("action"), Just("rpg")]),
            -50i32..200,
            0i32..5,
            any::<bool>(),
        )
            .prop_map(|(id, p, c, m, prio, active)| {
                let mut r = rule(id, p, c, m, prio);
                r.is_active = active;
                r
            })
    }

    proptest! {
        #[test]
        fn margin_and_price_agree(
            rules in proptest::collection::vec(arb_rule(), 0..8),
            base in 0i64..1_000_000,
            cat in proptest::option::of(prop_oneof![Just("action"), Just("rpg")]),
            provider in prop_oneof![Just("all"), Just("kinguin")],
        ) {
            let r = PricingResolver::default();
            let margin = r.applicable_margin(&rules, base, cat, provider);
            prop_assert_eq!(r.calculate_price(&rules, base, cat, provider), apply_margin(base, margin));
            if let Some(chosen) = select_rule(&rules, base, cat, provider) {
                for other in rules.iter().filter(|x| rule_matches(x, base, cat, provider)) {
                    prop_assert!(chosen.priority >= other.priority);
                }
            }
        }
    }
}
