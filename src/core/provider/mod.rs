//! Provider abstraction over broker backends.
//!
//! The provider set is closed: `mock` (seeded random walk), `rest_a`
//! (2-step session auth + quote polling) and `rest_b` (OAuth + LTP polling
//! + historical candles). All of them sit behind one capability trait;
//! optional operations signal [`Error::NotSupported`] instead of being duck
//! typed away.

mod mock;
mod rest_a;
mod rest_b;
mod totp;

pub use mock::MockProvider;
pub use rest_a::RestAProvider;
pub use rest_b::{exchange_auth_code, normalize_interval, RestBProvider, TokenResponse};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::core::domain::Tick;
use crate::core::instrument::InstrumentMaster;
use crate::core::store::TokenStore;
use crate::error::{Error, Result};

/// Fixed per-request timeout for broker HTTP calls.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll cadence for the REST quote loops.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-symbol quote fields used to evaluate filter conditions.
pub type Snapshot = HashMap<String, serde_json::Map<String, serde_json::Value>>;

/// A broker backend normalized to the gateway's tick model.
///
/// Methods take `&self` with interior state so one `Arc<dyn
/// MarketDataProvider>` can be shared by a session's reader, tick pump and
/// universe loop. A provider instance belongs to exactly one session and is
/// dropped with it; the tick sequence restarts only with a new instance.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider tag stamped on every tick.
    fn name(&self) -> &'static str;

    /// Authenticate and obtain session credentials.
    async fn connect(&self) -> Result<()>;

    /// Replace the tracked symbol list with the given one.
    async fn subscribe(&self, symbols: &[String]) -> Result<()>;

    /// Full-replace alias for [`subscribe`](Self::subscribe).
    async fn set_subscriptions(&self, symbols: &[String]) -> Result<()> {
        self.subscribe(symbols).await
    }

    /// Next event of the infinite tick sequence. Suspends between polls;
    /// transient upstream failures are retried internally, never surfaced.
    async fn next_tick(&self) -> Result<Tick>;

    /// One-shot quote fields per symbol for filter evaluation.
    async fn snapshot(&self, _symbols: &[String]) -> Result<Snapshot> {
        Err(Error::NotSupported("snapshot"))
    }

    /// Historical ticks between `start` and `end`.
    async fn historical(
        &self,
        _symbols: &[String],
        _start: &str,
        _end: &str,
        _interval: Option<&str>,
    ) -> Result<Vec<Tick>> {
        Err(Error::NotSupported("historical"))
    }
}

/// Construct the provider for a session.
///
/// Dispatches on `override_provider` when given (the backtest endpoint uses
/// this), otherwise on the configured active provider.
pub fn build_provider(
    config: &Config,
    override_provider: Option<&str>,
    token_store: &Arc<TokenStore>,
    master: &Arc<InstrumentMaster>,
) -> Result<Arc<dyn MarketDataProvider>> {
    let name = override_provider.unwrap_or(&config.active_provider);
    match name {
        "mock" => Ok(Arc::new(MockProvider::new(config.mock.clone()))),
        "rest_a" => Ok(Arc::new(RestAProvider::new(config.rest_a.clone()))),
        "rest_b" => Ok(Arc::new(RestBProvider::new(
            config.rest_b.clone(),
            Arc::clone(token_store),
            Arc::clone(master),
        ))),
        other => Err(Error::Config(format!("Unknown provider: {other}"))),
    }
}

/// Best-effort float out of vendor JSON that mixes numbers and strings.
pub(crate) fn value_to_f64(value: Option<&serde_json::Value>) -> f64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
