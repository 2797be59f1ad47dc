//! Symbol Discovery
//!
//! Fetches the tradable pair list from the exchange REST API when no
//! symbols are configured. `GET {api_url}/symbols` returns lowercase pair
//! names (`["btcusd","ltcusd",...]`); subscribe requests want them upper-cased.

use std::time::Duration;

use reqwest::Client;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Symbol discovery errors.
#[derive(Debug, thiserror::Error)]
pub enum SymbolDiscoveryError {
    /// The request failed or the body was not a JSON string array.
    #[error("symbol request failed: {0}")]
    Request(String),

    /// Non-success status.
    #[error("symbol endpoint returned {0}")]
    Status(u16),

    /// The exchange listed no symbols.
    #[error("exchange returned no symbols")]
    Empty,
}

/// Fetch all symbols, upper-cased, in exchange order.
///
/// # Errors
///
/// Returns `SymbolDiscoveryError` if the endpoint fails or lists nothing.
pub async fn discover_symbols(api_url: &str) -> Result<Vec<String>, SymbolDiscoveryError> {
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SymbolDiscoveryError::Request(e.to_string()))?;

    let url = format!("{}/symbols", api_url.trim_end_matches('/'));
    tracing::info!(url = %url, "Discovering symbols");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| SymbolDiscoveryError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SymbolDiscoveryError::Status(status.as_u16()));
    }

    let names: Vec<String> = response
        .json()
        .await
        .map_err(|e| SymbolDiscoveryError::Request(e.to_string()))?;

    let mut symbols: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let symbol = name.trim().to_uppercase();
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        return Err(SymbolDiscoveryError::Empty);
    }

    tracing::info!(count = symbols.len(), "Symbols discovered");
    Ok(symbols)
}
