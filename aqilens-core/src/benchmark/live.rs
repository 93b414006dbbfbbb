//! Live benchmark providers.

use crate::benchmark::{BenchmarkMetric, BenchmarkReference};
use crate::error::BenchmarkError;
use async_trait::async_trait;
use std::time::Duration;

/// The latest observed AQI of one city, used to score a live source.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveQuery {
    pub city: String,
    pub latest_aqi: f64,
}

/// A source of reference figures fetched at run time.
#[async_trait]
pub trait BenchmarkProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, queries: &[LiveQuery]) -> Result<Vec<BenchmarkReference>, BenchmarkError>;
}

/// Run `provider.fetch` with a deadline of `per_query` for every query.
///
/// Providers are free to issue one request per city, so the overall budget
/// grows with the number of cities rather than being shared between them.
pub async fn fetch_with_timeout(
    provider: &dyn BenchmarkProvider,
    queries: &[LiveQuery],
    per_query: Duration,
) -> Result<Vec<BenchmarkReference>, BenchmarkError> {
    let count = u32::try_from(queries.len().max(1)).unwrap_or(u32::MAX);
    let deadline = per_query.saturating_mul(count);
    match tokio::time::timeout(deadline, provider.fetch(queries)).await {
        Ok(result) => result,
        Err(_) => Err(BenchmarkError::Timeout(deadline)),
    }
}

/// World Air Quality Index feed.
///
/// The reference for each city is the absolute difference between the
/// API's current AQI and the latest AQI in the dataset, reported as MAE.
pub struct WaqiProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl WaqiProvider {
    pub const SOURCE_NAME: &'static str = "waqi_live";

    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, BenchmarkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("aqilens/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout,
        })
    }

    fn feed_url(&self, city: &str) -> String {
        format!(
            "{}/feed/{}/?token={}",
            self.base_url,
            urlencoding::encode(&city.to_lowercase()),
            urlencoding::encode(&self.token)
        )
    }

    /// Current AQI of one city; the deadline covers the request and its body.
    async fn current_aqi(&self, city: &str) -> Result<f64, BenchmarkError> {
        tokio::time::timeout(self.timeout, self.request_aqi(city))
            .await
            .unwrap_or(Err(BenchmarkError::Timeout(self.timeout)))
    }

    async fn request_aqi(&self, city: &str) -> Result<f64, BenchmarkError> {
        let response = self.client.get(self.feed_url(city)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BenchmarkError::Api("rate limited".to_string()));
        }
        if !status.is_success() {
            return Err(BenchmarkError::Api(format!("HTTP {status}")));
        }
        let body: serde_json::Value = response.json().await?;
        parse_feed(&body)
    }
}

/// Extract the current AQI from a WAQI feed response.
pub(crate) fn parse_feed(body: &serde_json::Value) -> Result<f64, BenchmarkError> {
    match body["status"].as_str() {
        Some("ok") => {}
        Some(_) => {
            let message = body["data"].as_str().unwrap_or("unknown error");
            return Err(BenchmarkError::Api(message.to_string()));
        }
        None => return Err(BenchmarkError::Parse("missing status".to_string())),
    }
    let aqi = &body["data"]["aqi"];
    aqi.as_f64()
        .or_else(|| aqi.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|v: &f64| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| BenchmarkError::Parse(format!("no numeric aqi in response: {aqi}")))
}

#[async_trait]
impl BenchmarkProvider for WaqiProvider {
    fn name(&self) -> &str {
        Self::SOURCE_NAME
    }

    async fn fetch(&self, queries: &[LiveQuery]) -> Result<Vec<BenchmarkReference>, BenchmarkError> {
        let mut references = Vec::with_capacity(queries.len());
        let mut last_error = None;
        for query in queries {
            match self.current_aqi(&query.city).await {
                Ok(api_aqi) => {
                    tracing::debug!(city = %query.city, api_aqi, latest = query.latest_aqi, "WAQI reading");
                    references.push(BenchmarkReference::new(
                        Self::SOURCE_NAME,
                        &query.city,
                        BenchmarkMetric::Mae,
                        (api_aqi - query.latest_aqi).abs(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(city = %query.city, error = %e, "WAQI request failed");
                    last_error = Some(e);
                }
            }
        }
        match (references.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(references),
        }
    }
}
