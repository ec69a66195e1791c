//! Provider registry: maps configured wholesaler codes to concrete adapters.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use key_providers::providers::codeswholesale::CodesWholesaleProvider;
use key_providers::providers::kinguin::KinguinProvider;
use key_providers::providers::{KeyProvider, ProviderInitError};
use serde::{Deserialize, Serialize};

use crate::models::{KeySource, UnknownVariant};

/// Wholesalers the engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wholesaler {
    Kinguin,
    #[serde(rename = "codeswholesale")]
    CodesWholesale,
}

impl Wholesaler {
    pub fn as_str(self) -> &'static str {
        KeySource::from(self).as_str()
    }
}

impl From<Wholesaler> for KeySource {
    fn from(w: Wholesaler) -> Self {
        match w {
            Wholesaler::Kinguin => KeySource::Kinguin,
            Wholesaler::CodesWholesale => KeySource::CodesWholesale,
        }
    }
}

impl fmt::Display for Wholesaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Wholesaler {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kinguin" => Ok(Wholesaler::Kinguin),
            "codeswholesale" => Ok(Wholesaler::CodesWholesale),
            other => Err(UnknownVariant {
                kind: "wholesaler",
                value: other.to_string(),
            }),
        }
    }
}

/// Build the adapter for `id`, reading its credentials from the environment.
pub fn build_provider(id: Wholesaler) -> Result<Arc<dyn KeyProvider>, ProviderInitError> {
    match id {
        Wholesaler::Kinguin => {
            let p = KinguinProvider::from_env()?;
            Ok(Arc::new(p))
        }
        Wholesaler::CodesWholesale => {
            let p = CodesWholesaleProvider::from_env()?;
            Ok(Arc::new(p))
        }
    }
}

/// Ordered fallback list consulted when local stock runs out.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: Vec<(Wholesaler, Arc<dyn KeyProvider>)>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a provider; earlier entries are tried first.
    pub fn with(mut self, id: Wholesaler, provider: Arc<dyn KeyProvider>) -> Self {
        self.providers.push((id, provider));
        self
    }

    /// Builds every listed wholesaler in order.
    pub fn from_ids(ids: &[Wholesaler]) -> Result<Self, ProviderInitError> {
        let mut set = Self::new();
        for &id in ids {
            set = set.with(id, build_provider(id)?);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Wholesaler, &Arc<dyn KeyProvider>)> {
        self.providers.iter().map(|(id, p)| (*id, p))
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|(id, _)| id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wholesaler_codes_round_trip() {
        for w in [Wholesaler::Kinguin, Wholesaler::CodesWholesale] {
            assert_eq!(w.as_str().parse::<Wholesaler>().unwrap(), w);
        }
        assert!("local".parse::<Wholesaler>().is_err());
    }
}
