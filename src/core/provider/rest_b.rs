//! OAuth broker backend: token lifecycle, LTP polling, historical candles.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{value_to_f64, MarketDataProvider, HTTP_TIMEOUT, POLL_INTERVAL};
use crate::config::RestBConfig;
use crate::core::domain::{parse_timestamp, Tick};
use crate::core::instrument::InstrumentMaster;
use crate::core::store::TokenStore;
use crate::error::{Error, Result};

/// Successful OAuth token-exchange payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Exchange an authorization code for an access token.
///
/// Shared by [`RestBProvider::connect`] and the listener's OAuth callback.
pub async fn exchange_auth_code(
    http: &Client,
    base_url: &str,
    api_key: &str,
    api_secret: &str,
    auth_code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let url = format!("{base_url}/login/authorization/token");
    let response = http
        .post(&url)
        .form(&[
            ("code", auth_code),
            ("client_id", api_key),
            ("client_secret", api_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Auth(format!("token exchange failed: {status} - {body}")));
    }

    let payload: TokenResponse = response.json().await?;
    if payload.access_token.trim().is_empty() {
        return Err(Error::Auth("token exchange response missing access_token".to_string()));
    }
    Ok(payload)
}

/// Normalize a user interval to the vendor's historical-candle segment.
///
/// `"2m"` → `"2minute"`, `"1d"` → `"day"`, `"3d"` → `"3day"`,
/// `"minutes/5"` → `"5minute"`; `day`/`week`/`month` pass through and
/// anything unrecognized is forwarded lower-cased.
#[must_use]
pub fn normalize_interval(interval: Option<&str>) -> String {
    let raw = interval.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return "1minute".to_string();
    }

    // Compound "unit/N" collapses to "N<unit initial>" and recurses.
    if let Some((unit, multiplier)) = raw.split_once('/') {
        let unit = unit.trim().to_lowercase();
        let multiplier = multiplier.trim();
        if !multiplier.is_empty() && multiplier.chars().all(|c| c.is_ascii_digit()) {
            if let Some(initial) = unit.chars().next() {
                return normalize_interval(Some(&format!("{multiplier}{initial}")));
            }
        }
        return raw.to_string();
    }

    let value = raw.to_lowercase();
    if let Some(count) = numeric_prefix(&value, 'm') {
        return format!("{count}minute");
    }
    if let Some(count) = numeric_prefix(&value, 'h') {
        return format!("{count}hour");
    }
    if let Some(count) = numeric_prefix(&value, 'd') {
        return if count == "1" {
            "day".to_string()
        } else {
            format!("{count}day")
        };
    }
    value
}

fn numeric_prefix(value: &str, suffix: char) -> Option<&str> {
    let count = value.strip_suffix(suffix)?;
    if !count.is_empty() && count.chars().all(|c| c.is_ascii_digit()) {
        Some(count)
    } else {
        None
    }
}

/// OAuth REST-polling provider.
///
/// `connect` resolves an access token in priority order: explicit config
/// value, cached valid token from the store, auth-code exchange. Freshly
/// obtained tokens are persisted so restarts skip the browser round trip.
pub struct RestBProvider {
    config: RestBConfig,
    http: Client,
    token_store: Arc<TokenStore>,
    master: Arc<InstrumentMaster>,
    access_token: parking_lot::RwLock<String>,
    subscriptions: parking_lot::RwLock<Vec<String>>,
    pending: Mutex<VecDeque<Tick>>,
}

impl RestBProvider {
    #[must_use]
    pub fn new(
        config: RestBConfig,
        token_store: Arc<TokenStore>,
        master: Arc<InstrumentMaster>,
    ) -> Self {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            warn!("Missing rest_b api key/secret; only a cached or explicit token will work");
        }
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            http,
            token_store,
            master,
            access_token: parking_lot::RwLock::new(String::new()),
            subscriptions: parking_lot::RwLock::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// `X|Y` is already an instrument key; bare symbols default to the NSE
    /// equity segment.
    fn normalize_symbol(symbol: &str) -> String {
        if symbol.contains('|') {
            symbol.to_string()
        } else {
            format!("NSE_EQ|{symbol}")
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.read())
    }

    async fn try_exchange_auth_code(&self) -> Result<()> {
        let c = &self.config;
        if c.api_key.is_empty()
            || c.api_secret.is_empty()
            || c.auth_code.is_empty()
            || c.redirect_uri.is_empty()
        {
            return Ok(());
        }

        match exchange_auth_code(
            &self.http,
            &c.base_url,
            &c.api_key,
            &c.api_secret,
            &c.auth_code,
            &c.redirect_uri,
        )
        .await
        {
            Ok(payload) => {
                *self.access_token.write() = payload.access_token.clone();
                if let Err(e) = self.token_store.save(
                    &payload.access_token,
                    payload.expires_in,
                    None,
                    payload.refresh_token.as_deref(),
                ) {
                    warn!(error = %e, "Failed to persist exchanged token");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Auth-code exchange failed");
                Ok(())
            }
        }
    }

    async fn poll_quotes(&self, symbols: &[String]) -> Result<Vec<Tick>> {
        let keys: Vec<String> = symbols.iter().map(|s| Self::normalize_symbol(s)).collect();
        let url = format!("{}/market-quote/ltp", self.config.base_url);
        debug!(%url, instruments = keys.len(), "Polling LTP");

        let response = self
            .http
            .get(&url)
            .query(&[("instrument_key", keys.join(","))])
            .header("Authorization", self.bearer())
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("LTP poll: {status} - {body}")));
        }

        let payload: Value = response.json().await?;
        let data = payload.get("data").unwrap_or(&payload);
        let Some(entries) = data.as_object() else {
            warn!("Unexpected LTP response shape");
            return Ok(Vec::new());
        };

        let mut ticks = Vec::with_capacity(entries.len());
        for (instrument_key, item) in entries {
            let Some(item) = item.as_object() else {
                continue;
            };
            let price = ["last_price", "ltp", "close", "last_traded_price"]
                .iter()
                .find_map(|key| item.get(*key).filter(|v| !v.is_null()))
                .map(|v| value_to_f64(Some(v)))
                .unwrap_or(0.0);
            let volume = item
                .get("volume")
                .or_else(|| item.get("volume_traded"))
                .map(|v| value_to_f64(Some(v)))
                .unwrap_or(0.0);
            let timestamp = parse_timestamp(
                item.get("exchange_timestamp")
                    .or_else(|| item.get("last_trade_time"))
                    .or_else(|| item.get("timestamp")),
            );
            let symbol = item
                .get("symbol")
                .or_else(|| item.get("instrument_key"))
                .and_then(Value::as_str)
                .unwrap_or(instrument_key)
                .to_string();

            ticks.push(Tick {
                symbol,
                price,
                volume,
                timestamp,
                provider: self.name().to_string(),
            });
        }
        Ok(ticks)
    }

    /// Dates may arrive as full timestamps; the candle API wants `YYYY-MM-DD`.
    fn date_only(value: &str) -> &str {
        value.split('T').next().unwrap_or(value)
    }
}

#[async_trait]
impl MarketDataProvider for RestBProvider {
    fn name(&self) -> &'static str {
        "rest_b"
    }

    async fn connect(&self) -> Result<()> {
        if !self.config.access_token.is_empty() {
            *self.access_token.write() = self.config.access_token.clone();
            // Keep the store warm so a later session can skip this path.
            match self.token_store.get_valid_token() {
                Ok(None) => {
                    if let Err(e) = self.token_store.save(&self.config.access_token, None, None, None) {
                        warn!(error = %e, "Failed to persist configured token");
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => warn!(error = %e, "Token store unavailable"),
            }
            info!("rest_b connected with configured token");
            return Ok(());
        }

        if let Ok(Some(cached)) = self.token_store.get_valid_token() {
            *self.access_token.write() = cached;
            info!("rest_b connected with cached token");
            return Ok(());
        }

        self.try_exchange_auth_code().await?;

        if self.access_token.read().is_empty() {
            return Err(Error::Auth(
                "missing rest_b access token; complete the OAuth flow at /provider/auth \
                 or configure REST_B_ACCESS_TOKEN (or auth code + redirect URI)"
                    .to_string(),
            ));
        }
        info!("rest_b connected");
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        *self.subscriptions.write() = symbols.to_vec();
        info!(?symbols, "rest_b subscribed");
        Ok(())
    }

    async fn next_tick(&self) -> Result<Tick> {
        loop {
            {
                let mut pending = self.pending.lock().await;
                if let Some(tick) = pending.pop_front() {
                    return Ok(tick);
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            let symbols = self.subscriptions.read().clone();
            if symbols.is_empty() {
                continue;
            }
            match self.poll_quotes(&symbols).await {
                Ok(ticks) => self.pending.lock().await.extend(ticks),
                Err(e) => warn!(error = %e, "LTP poll failed; retrying"),
            }
        }
    }

    /// One candle request per symbol; failed symbols are skipped, not fatal.
    async fn historical(
        &self,
        symbols: &[String],
        start: &str,
        end: &str,
        interval: Option<&str>,
    ) -> Result<Vec<Tick>> {
        if self.access_token.read().is_empty() {
            self.connect().await?;
        }

        let interval_segment = normalize_interval(interval);
        let start_date = Self::date_only(start);
        let end_date = Self::date_only(end);

        let mut ticks = Vec::new();
        for symbol in symbols {
            let instrument_key = self
                .master
                .instrument_key(symbol)
                .unwrap_or_else(|| Self::normalize_symbol(symbol));
            let encoded = urlencoding::encode(&instrument_key);
            let url = format!(
                "{}/historical-candle/{}/{}/{}/{}",
                self.config.base_url, encoded, interval_segment, end_date, start_date
            );

            let response = match self
                .http
                .get(&url)
                .header("Authorization", self.bearer())
                .header("Accept", "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Historical request failed");
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                warn!(symbol = %symbol, %status, "Historical request rejected");
                continue;
            }

            let payload: Value = match response.json().await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Historical response unreadable");
                    continue;
                }
            };
            let data = payload.get("data").unwrap_or(&payload);
            let candles = data
                .get("candles")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for candle in candles {
                let Some(fields) = candle.as_array() else {
                    continue;
                };
                if fields.len() < 5 {
                    continue;
                }
                ticks.push(Tick {
                    symbol: symbol.clone(),
                    price: value_to_f64(fields.get(4)),
                    volume: fields.get(5).map(|v| value_to_f64(Some(v))).unwrap_or(0.0),
                    timestamp: parse_timestamp(fields.first()),
                    provider: self.name().to_string(),
                });
            }
        }
        Ok(ticks)
    }
}
