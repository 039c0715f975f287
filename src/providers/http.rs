use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::quote::{QuotePayload, QuoteRequest};
use crate::quote_provider::QuoteProvider;

/// Quoting service client. POSTs the one-field request body as JSON and
/// parses the quote payload. Transport-level retries are left to callers;
/// the engine retries implicitly through new candidates.
pub struct HttpQuoteProvider {
    base_url: String,
}

impl HttpQuoteProvider {
    pub fn new(base_url: &str) -> Self {
        HttpQuoteProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    #[instrument(
        name = "RateQuoteRequest",
        skip(self, request),
        fields(field = request.field().as_str(), amount = request.amount())
    )]
    async fn request_quote(&self, request: &QuoteRequest) -> Result<QuotePayload> {
        let url = format!("{}/v1/rates/quote", self.base_url);
        debug!("Requesting rate quote from {}", url);

        let client = reqwest::Client::builder()
            .user_agent("ratesync/0.1")
            .build()?;
        let response = client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for URL: {}", e, url))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Quote service returned {} for URL: {}",
                response.status(),
                url
            ));
        }

        let payload = response.json::<QuotePayload>().await?;
        debug!(rate = %payload.rate, expires_at = %payload.expires_at, "Received quote");

        Ok(payload)
    }
}
