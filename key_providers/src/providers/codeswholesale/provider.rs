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
        ProviderError, ProviderInitError, ReqwestSnafu, ValidationSnafu,
        codeswholesale::response::{CwsProduct, OrderLine, OrderRequest, OrderResponse, ProductsPage},
        error_for_response,
    },
};

const DEFAULT_BASE_URL: &str = "https://api.codeswholesale.com";

pub struct CodesWholesaleProvider {
    client: Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
    _token: SecretString,
}

impl CodesWholesaleProvider {
    /// Creates a CodesWholesale provider from the environment.
    ///
    /// Reads the bearer token from `CWS_API_TOKEN`; `CWS_API_URL` optionally
    /// overrides the API address (sandbox is `https://sandbox.codeswholesale.com`).
    pub fn from_env() -> Result<Self, ProviderInitError> {
        let token = SecretString::new(
            get_env_var("CWS_API_TOKEN")
                .context(MissingEnvVarSnafu)?
                .into(),
        );
        let base_url = get_env_var_or("CWS_API_URL", DEFAULT_BASE_URL);
        Self::new(token, base_url)
    }

    /// Creates a provider with an explicit bearer token and API address.
    pub fn new(
        token: SecretString,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderInitError> {
        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .context(InvalidApiKeySnafu)?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_second(nonzero!(5u32))),
            _token: token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl KeyProvider for CodesWholesaleProvider {
    fn name(&self) -> &str {
        "codeswholesale"
    }

    async fn fetch_key(&self, product_id: &str) -> Result<ProviderKey, ProviderError> {
        if product_id.trim().is_empty() {
            return ValidationSnafu {
                message: "product id is empty",
            }
            .fail();
        }

        self.limiter.until_ready().await;
        let body = OrderRequest {
            products: vec![OrderLine {
                product_id,
                quantity: 1,
            }],
        };
        let response = self
            .client
            .post(self.url("/v2/orders"))
            .json(&body)
            .send()
            .await
            .context(ReqwestSnafu)?;

        if !response.status().is_success() {
            return Err(error_for_response(response, Some(product_id)).await);
        }

        let order = response.json::<OrderResponse>().await.context(ReqwestSnafu)?;
        tracing::debug!(product_id, order_id = %order.order_id, "codeswholesale order placed");

        match order.first_text_key() {
            Some(key) => Ok(key),
            None => OutOfStockSnafu { product_id }.fail(),
        }
    }

    async fn check_availability(&self, product_id: &str) -> Result<bool, ProviderError> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get(self.url(&format!("/v2/products/{product_id}")))
            .send()
            .await
            .context(ReqwestSnafu)?;

        if response.status().as_u16() == 404 {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(error_for_response(response, None).await);
        }

        let product = response.json::<CwsProduct>().await.context(ReqwestSnafu)?;
        Ok(product.quantity > 0)
    }

    async fn search_products(&self, query: &str) -> Result<Vec<CatalogEntry>, ProviderError> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get(self.url("/v2/products"))
            .query(&[("q", query)])
            .send()
            .await
            .context(ReqwestSnafu)?;

        if !response.status().is_success() {
            return Err(error_for_response(response, None).await);
        }

        let page = response.json::<ProductsPage>().await.context(ReqwestSnafu)?;
        Ok(page.items.into_iter().map(Into::into).collect())
    }
}
