use crate::models::{PriceQuote, PriceRequest};
use crate::oracle::{OracleError, PriceOracle};
use crate::retry::retry_oracle_operation;
use log::warn;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP adapter for the price oracle: one batched JSON POST per call against
/// a configurable quote endpoint. Batching keeps the engine at one
/// round-trip per reconstructed month.
pub struct HttpPriceOracle {
    http: Client,
    endpoint: String,
    headers: HeaderMap,
}

#[derive(Serialize)]
struct QuoteRequestBody<'a> {
    requests: &'a [PriceRequest],
}

#[derive(Debug, Deserialize)]
struct QuoteResponseBody {
    #[serde(default)]
    quotes: HashMap<String, QuoteEntry>,
}

/// Lenient response entry: endpoints differ on how they express absence, so
/// both a `found` flag and a nullable price are accepted.
#[derive(Debug, Deserialize)]
struct QuoteEntry {
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    found: Option<bool>,
}

impl HttpPriceOracle {
    pub fn new(endpoint: impl Into<String>, api_key: Option<&str>) -> Result<Self, OracleError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| OracleError::Transport("invalid oracle API key".to_string()))?;
            headers.insert("X-Api-Key", value);
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| OracleError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            headers,
        })
    }

    async fn post_batch(
        &self,
        requests: &[PriceRequest],
    ) -> Result<QuoteResponseBody, OracleError> {
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .json(&QuoteRequestBody { requests })
            .send()
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Transport(format!(
                "quote endpoint returned HTTP {}",
                status
            )));
        }

        response
            .json::<QuoteResponseBody>()
            .await
            .map_err(|err| OracleError::BadResponse(err.to_string()))
    }
}

impl PriceOracle for HttpPriceOracle {
    async fn closing_prices(
        &self,
        requests: &[PriceRequest],
    ) -> Result<HashMap<String, PriceQuote>, OracleError> {
        if requests.is_empty() {
            return Ok(HashMap::new());
        }

        let body = retry_oracle_operation!(
            format!("closing prices ({} instruments)", requests.len()),
            self.post_batch(requests)
        )?;

        let mut quotes = HashMap::with_capacity(body.quotes.len());
        for (symbol, entry) in body.quotes {
            let quote = match (entry.price, entry.found) {
                (Some(price), found) if price.is_finite() && price > 0.0 => PriceQuote {
                    price,
                    found: found.unwrap_or(true),
                },
                (_, Some(false)) | (None, _) => PriceQuote {
                    price: 0.0,
                    found: false,
                },
                (Some(price), _) => {
                    warn!(
                        "Discarding unusable quote {} for {}; treating as not found",
                        price, symbol
                    );
                    PriceQuote {
                        price: 0.0,
                        found: false,
                    }
                }
            };
            quotes.insert(symbol, quote);
        }
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_entries_tolerate_missing_fields() {
        let raw = r#"{"quotes":{"AAPL":{"price":185.5},"GONE":{"found":false},"NULLED":{"price":null}}}"#;
        let body: QuoteResponseBody = serde_json::from_str(raw).unwrap();

        assert_eq!(body.quotes.len(), 3);
        assert_eq!(body.quotes["AAPL"].price, Some(185.5));
        assert_eq!(body.quotes["GONE"].found, Some(false));
        assert_eq!(body.quotes["NULLED"].price, None);
    }

    #[test]
    fn rejects_bad_api_keys() {
        assert!(HttpPriceOracle::new("http://localhost", Some("bad\nkey")).is_err());
    }
}
