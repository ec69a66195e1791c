use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::{get_env_var, get_env_var_or};
use snafu::ResultExt;

use crate::{
    models::{CatalogEntry, ProviderKey},
    providers::{
        ClientBuildSnafu, InvalidApiKeySnafu, KeyProvider, MissingEnvVarSnafu, OutOfStockSnafu,
        ProviderError, ProviderInitError, ReqwestSnafu, ValidationSnafu, error_for_response,
        kinguin::response::{DispatchRequest, DispatchResponse, KinguinProduct, SearchResponse},
    },
};

const DEFAULT_BASE_URL: &str = "https://gateway.kinguin.net/esa/api";
const SEARCH_LIMIT: u32 = 25;

pub struct KinguinProvider {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    _api_key: SecretString,
}

impl KinguinProvider {
    /// Creates a Kinguin provider from the environment.
    ///
    /// Reads the API key from `KINGUIN_API_KEY`; `KINGUIN_API_URL` optionally
    /// overrides the gateway address (sandbox, local mocks).
    pub fn from_env() -> Result<Self, ProviderInitError> {
        let api_key = SecretString::new(
            get_env_var("KINGUIN_API_KEY")
                .context(MissingEnvVarSnafu)?
                .into(),
        );
        let base_url = get_env_var_or("KINGUIN_API_URL", DEFAULT_BASE_URL);
        Self::new(api_key, base_url)
    }

    /// Creates a provider with explicit credentials and gateway address.
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderInitError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "X-Api-Key",
            header::HeaderValue::from_str(api_key.expose_secret()).context(InvalidApiKeySnafu)?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            // Kinguin throttles per key; stay well under the documented ceiling.
            limiter: RateLimiter::direct(Quota::per_second(nonzero!(10u32))),
            _api_key: api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl KeyProvider for KinguinProvider {
    fn name(&self) -> &str {
        "kinguin"
    }

    async fn fetch_key(&self, product_id: &str) -> Result<ProviderKey, ProviderError> {
        if product_id.trim().is_empty() {
            return ValidationSnafu {
                message: "product id is empty",
            }
            .fail();
        }

        self.limiter.until_ready().await;
        let response = self
            .client
            .post(self.url("/v2/order/dispatch"))
            .json(&DispatchRequest { product_id, qty: 1 })
            .send()
            .await
            .context(ReqwestSnafu)?;

        if !response.status().is_success() {
            return Err(error_for_response(response, Some(product_id)).await);
        }

        let dispatch = response
            .json::<DispatchResponse>()
            .await
            .context(ReqwestSnafu)?;

        tracing::debug!(product_id, dispatch_id = %dispatch.dispatch_id, "kinguin dispatch completed");

        match dispatch.keys.into_iter().next() {
            Some(key) => Ok(key.into_provider_key()),
            None => OutOfStockSnafu { product_id }.fail(),
        }
    }

    async fn check_availability(&self, product_id: &str) -> Result<bool, ProviderError> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get(self.url(&format!("/v1/products/{product_id}")))
            .send()
            .await
            .context(ReqwestSnafu)?;

        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(error_for_response(response, None).await);
        }

        let product = response
            .json::<KinguinProduct>()
            .await
            .context(ReqwestSnafu)?;
        Ok(product.qty > 0)
    }

    async fn search_products(&self, query: &str) -> Result<Vec<CatalogEntry>, ProviderError> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get(self.url("/v1/products"))
            .query(&[("name", query.to_string()), ("limit", SEARCH_LIMIT.to_string())])
            .send()
            .await
            .context(ReqwestSnafu)?;

        if !response.status().is_success() {
            return Err(error_for_response(response, None).await);
        }

        let page = response
            .json::<SearchResponse>()
            .await
            .context(ReqwestSnafu)?;
        Ok(page.results.into_iter().map(Into::into).collect())
    }
}
