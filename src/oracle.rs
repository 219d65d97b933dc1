use crate::models::{PriceQuote, PriceRequest};
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

/// Gateway failures. Absence of a price is never an error; these cover only
/// transport-level problems that prevent the round-trip itself.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("price oracle request failed: {0}")]
    Transport(String),
    #[error("price oracle returned an unusable response: {0}")]
    BadResponse(String),
}

/// Resolves best-effort closing prices for a batch of (instrument, asset
/// class, as-of date) requests. Implementations must answer the whole batch
/// in one call; instruments without a price come back with `found == false`
/// or are simply missing from the map.
pub trait PriceOracle {
    fn closing_prices(
        &self,
        requests: &[PriceRequest],
    ) -> impl std::future::Future<Output = Result<HashMap<String, PriceQuote>, OracleError>> + Send;
}

/// In-memory oracle backed by a fixed quote table. Used for offline runs
/// (prices loaded from a file) and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    quotes: HashMap<(String, NaiveDate), f64>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, as_of: NaiveDate, price: f64) {
        self.quotes.insert((symbol.into(), as_of), price);
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl PriceOracle for StaticPriceOracle {
    async fn closing_prices(
        &self,
        requests: &[PriceRequest],
    ) -> Result<HashMap<String, PriceQuote>, OracleError> {
        let mut quotes = HashMap::with_capacity(requests.len());
        for request in requests {
            let key = (request.symbol.clone(), request.as_of);
            let quote = match self.quotes.get(&key) {
                Some(price) => PriceQuote {
                    price: *price,
                    found: true,
                },
                None => PriceQuote {
                    price: 0.0,
                    found: false,
                },
            };
            quotes.insert(request.symbol.clone(), quote);
        }
        Ok(quotes)
    }
}
