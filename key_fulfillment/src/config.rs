//! Engine configuration: TOML parsing, normalization and loading.
//!
//! ```toml
//! [database]
//! url = "sqlite://keys.db"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [fulfillment]
//! max_attempts = 3
//! base_delay_ms = 200
//! provider_timeout_ms = 5000
//!
//! [pricing]
//! default_margin = 20
//!
//! # tried in this order when local stock runs out
//! [providers.kinguin]
//! [providers.codeswholesale]
//! enabled = false
//! ```
//!
//! Every section is optional. Provider codes are trimmed and lowercased;
//! duplicates after normalization and unknown wholesalers are errors.
//! `DATABASE_URL` in the environment wins over `[database] url`.

use std::time::Duration;

use anyhow::{Context, bail, ensure};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::fulfillment::retry::RetryPolicy;
use crate::pricing::{DEFAULT_MARGIN_PERCENT, PricingResolver};
use crate::providers::Wholesaler;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
    #[serde(default)]
    pub fulfillment: FulfillmentCfg,
    #[serde(default)]
    pub pricing: PricingCfg,
    /// Wholesaler code -> settings, in fallback order.
    #[serde(default)]
    pub providers: IndexMap<String, ProviderCfg>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseCfg {
    pub url: String,
}

impl Default for DatabaseCfg {
    fn default() -> Self {
        Self {
            url: "sqlite://key_fulfillment.db".into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingCfg {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct FulfillmentCfg {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub provider_timeout_ms: u64,
}

impl Default for FulfillmentCfg {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            provider_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PricingCfg {
    pub default_margin: i32,
}

impl Default for PricingCfg {
    fn default() -> Self {
        Self {
            default_margin: DEFAULT_MARGIN_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProviderCfg {
    pub enabled: bool,
}

impl Default for ProviderCfg {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Enabled wholesalers in configured order. Call after [`normalize_config`].
    pub fn enabled_wholesalers(&self) -> anyhow::Result<Vec<Wholesaler>> {
        self.providers
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(code, _)| code.parse::<Wholesaler>().map_err(anyhow::Error::from))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fulfillment.max_attempts,
            Duration::from_millis(self.fulfillment.base_delay_ms),
        )
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.fulfillment.provider_timeout_ms)
    }

    pub fn pricing_resolver(&self) -> PricingResolver {
        PricingResolver::new(self.pricing.default_margin)
    }

    /// Replaces the database url when `url` is set and non-empty.
    pub fn override_database_url(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.database.url = url;
        }
    }

    /// Applies `DATABASE_URL` from the environment.
    pub fn apply_env(&mut self) {
        self.override_database_url(shared_utils::env::get_env_var("DATABASE_URL").ok());
    }
}

/// Normalizes provider codes in place and checks value ranges.
pub fn normalize_config(cfg: &mut Config) -> anyhow::Result<()> {
    let mut rebuilt: IndexMap<String, ProviderCfg> = IndexMap::new();
    for (raw_code, pcfg) in std::mem::take(&mut cfg.providers) {
        let code = raw_code.trim().to_lowercase();
        if code.is_empty() {
            bail!("provider code cannot be empty after trimming");
        }
        if rebuilt.contains_key(&code) {
            bail!("duplicate provider code after normalization: {code}");
        }
        code.parse::<Wholesaler>()
            .with_context(|| format!("provider {code:?} is not supported"))?;
        rebuilt.insert(code, pcfg);
    }
    cfg.providers = rebuilt;

    ensure!(!cfg.database.url.trim().is_empty(), "database.url cannot be empty");
    ensure!(cfg.fulfillment.max_attempts >= 1, "fulfillment.max_attempts must be at least 1");
    ensure!(
        cfg.fulfillment.provider_timeout_ms > 0,
        "fulfillment.provider_timeout_ms must be positive"
    );
    ensure!(
        cfg.pricing.default_margin >= -100,
        "pricing.default_margin below -100 would produce negative prices"
    );
    Ok(())
}

/// Parse and normalize a config from a TOML string.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<Config> {
    let mut cfg: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
    normalize_config(&mut cfg).context("invalid configuration")?;
    Ok(cfg)
}

/// Read, parse and normalize a config file, then apply environment overrides.
pub fn load_config_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    let mut cfg = load_config_str(&text)?;
    cfg.apply_env();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = load_config_str("").unwrap();
        assert_eq!(cfg.database.url, "sqlite://key_fulfillment.db");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.retry_policy(), RetryPolicy::new(3, Duration::from_millis(200)));
        assert_eq!(cfg.provider_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.pricing_resolver().default_margin(), 20);
        assert!(cfg.enabled_wholesalers().unwrap().is_empty());
    }

    #[test]
    fn providers_keep_order_and_skip_disabled() {
        let cfg = load_config_str(
            r#"
            [providers." CodesWholesale "]
            [providers.Kinguin]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.providers.keys().collect::<Vec<_>>(),
            vec!["codeswholesale", "kinguin"]
        );
        assert_eq!(cfg.enabled_wholesalers().unwrap(), vec![Wholesaler::CodesWholesale]);
    }

    #[test]
    fn rejects_unknown_and_duplicate_providers() {
        let err = load_config_str("[providers.g2a]\n").unwrap_err();
        assert!(format!("{err:#}").contains("not supported"));

        let err = load_config_str("[providers.kinguin]\n[providers.KINGUIN]\n").unwrap_err();
        assert!(format!("{err:#}").contains("duplicate provider code"));
    }

    #[test]
    fn rejects_unknown_keys_and_zero_attempts() {
        assert!(load_config_str("[database]\npath = \"x\"\n").is_err());
        let err = load_config_str("[fulfillment]\nmax_attempts = 0\n").unwrap_err();
        assert!(format!("{err:#}").contains("max_attempts"));
    }

    #[test]
    fn database_url_override() {
        let mut cfg = load_config_str("[database]\nurl = \"sqlite://a.db\"\n").unwrap();
        cfg.override_database_url(Some("  ".into()));
        assert_eq!(cfg.database.url, "sqlite://a.db");
        cfg.override_database_url(Some("sqlite://b.db".into()));
        assert_eq!(cfg.database.url, "sqlite://b.db");
    }

    #[test]
    fn snapshot_normalized_config() {
        let cfg = load_config_str(
            r#"
            [logging]
            json = true

            [fulfillment]
            max_attempts = 5

            [providers.KINGUIN]
            "#,
        )
        .unwrap();
        insta::assert_json_snapshot!(cfg, @r#"
        {
          "database": {
            "url": "sqlite://key_fulfillment.db"
          },
          "logging": {
            "level": "info",
            "json": true
          },
          "fulfillment": {
            "max_attempts": 5,
            "base_delay_ms": 200,
            "provider_timeout_ms": 5000
          },
          "pricing": {
            "default_margin": 20
          },
          "providers": {
            "kinguin": {
              "enabled": true
            }
          }
        }
        "#);
    }
}
