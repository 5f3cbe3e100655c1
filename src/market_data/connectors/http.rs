use std::time::Duration;
use reqwest::Client;
use serde::de::DeserializeOwned;
use crate::error::{Error, Result};

pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("market_relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// GET `url` and decode the JSON body, mapping transport and status failures
/// to `SourceUnavailable` for `source`.
pub(crate) async fn get_json<T, Q>(client: &Client, source: &str, url: &str, query: &Q) -> Result<T>
where
    T: DeserializeOwned,
    Q: serde::Serialize + ?Sized,
{
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| Error::unavailable(source, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::unavailable(source, format!("HTTP {}: {}", status, body)));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::DeserializationError(format!("{}: {}", source, e)))
}

/// Venues encode decimals as JSON strings; accept either strings or numbers.
pub(crate) fn parse_decimal(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/{path}")
}
