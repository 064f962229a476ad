//! 2-step-auth broker backend: TOTP login, MPIN validate, quote polling.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::totp::totp_now;
use super::{value_to_f64, MarketDataProvider, HTTP_TIMEOUT, POLL_INTERVAL};
use crate::config::RestAConfig;
use crate::core::domain::Tick;
use crate::error::{Error, Result};

/// Vendor header required on every login call.
const FIN_KEY: (&str, &str) = ("neo-fin-key", "neotradeapi");

#[derive(Debug, Deserialize)]
struct LoginEnvelope {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
    sid: String,
    #[serde(rename = "baseUrl")]
    base_url: Option<String>,
}

#[derive(Debug, Clone)]
struct SessionCreds {
    token: String,
    sid: String,
    /// Validate may redirect the session to a different API host.
    base_url: String,
}

/// REST-polling provider with a two-step session login.
///
/// The broker has no push subscription; `subscribe` just swaps the list the
/// 1 Hz poll loop asks quotes for.
pub struct RestAProvider {
    config: RestAConfig,
    http: Client,
    session: parking_lot::RwLock<Option<SessionCreds>>,
    subscriptions: parking_lot::RwLock<Vec<String>>,
    pending: Mutex<VecDeque<Tick>>,
}

impl RestAProvider {
    #[must_use]
    pub fn new(config: RestAConfig) -> Self {
        if config.access_token.is_empty()
            || config.mobile.is_empty()
            || config.ucc.is_empty()
            || config.mpin.is_empty()
            || config.totp_secret.is_empty()
        {
            warn!("Missing rest_a credentials; connect will fail until they are set");
        }
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            http,
            session: parking_lot::RwLock::new(None),
            subscriptions: parking_lot::RwLock::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn require_credentials(&self) -> Result<()> {
        let c = &self.config;
        if c.access_token.is_empty()
            || c.mobile.is_empty()
            || c.ucc.is_empty()
            || c.mpin.is_empty()
            || c.totp_secret.is_empty()
        {
            return Err(Error::Auth(
                "rest_a credentials missing (access token, mobile, ucc, mpin, totp secret)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn login(&self) -> Result<LoginData> {
        let totp = totp_now(&self.config.totp_secret)?;
        let url = format!("{}/login/1.0/tradeApiLogin", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", &self.config.access_token)
            .header(FIN_KEY.0, FIN_KEY.1)
            .json(&serde_json::json!({
                "mobileNumber": self.config.mobile,
                "ucc": self.config.ucc,
                "totp": totp,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("login rejected: {status} - {body}")));
        }
        let envelope: LoginEnvelope = response.json().await?;
        Ok(envelope.data)
    }

    async fn validate(&self, view: &LoginData) -> Result<LoginData> {
        let url = format!("{}/login/1.0/tradeApiValidate", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", &self.config.access_token)
            .header(FIN_KEY.0, FIN_KEY.1)
            .header("sid", &view.sid)
            .header("Auth", &view.token)
            .json(&serde_json::json!({ "mpin": self.config.mpin }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("validate rejected: {status} - {body}")));
        }
        let envelope: LoginEnvelope = response.json().await?;
        Ok(envelope.data)
    }

    /// Canonical tokens pass through; bare symbols get the legacy cash-market
    /// shape the quotes endpoint expects.
    fn quote_key(symbol: &str) -> String {
        if symbol.contains('|') {
            symbol.to_string()
        } else {
            format!("nse_cm|{symbol}-EQ")
        }
    }

    async fn poll_quotes(&self, symbols: &[String]) -> Result<Vec<Tick>> {
        let session = self
            .session
            .read()
            .clone()
            .ok_or_else(|| Error::Auth("rest_a session not established".to_string()))?;

        let query: Vec<String> = symbols.iter().map(|s| Self::quote_key(s)).collect();
        let url = format!(
            "{}/script-details/1.0/quotes/neosymbol/{}/all",
            session.base_url,
            query.join(",")
        );
        debug!(%url, "Polling quotes");

        let response = self
            .http
            .get(&url)
            .header("Authorization", &self.config.access_token)
            .header("Auth", &session.token)
            .header("sid", &session.sid)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("quote poll: {status} - {body}")));
        }

        let payload: Value = response.json().await?;

        if let Some(object) = payload.as_object() {
            if object.get("stat").and_then(Value::as_str) == Some("Not_Ok") {
                let message = object
                    .get("emsg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                warn!(error = message, "Quote API rejected the request");
                return Ok(Vec::new());
            }
        }

        let Some(items) = payload.as_array() else {
            warn!("Unexpected quote response shape");
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let mut ticks = Vec::with_capacity(items.len());
        for item in items {
            let Some(item) = item.as_object() else {
                continue;
            };
            let symbol = item
                .get("display_symbol")
                .or_else(|| item.get("exchange_token"))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            if symbol.is_empty() {
                continue;
            }
            ticks.push(Tick {
                symbol,
                price: value_to_f64(item.get("ltp")),
                volume: value_to_f64(item.get("last_volume")),
                timestamp: now,
                provider: self.name().to_string(),
            });
        }
        Ok(ticks)
    }
}

#[async_trait]
impl MarketDataProvider for RestAProvider {
    fn name(&self) -> &'static str {
        "rest_a"
    }

    /// TOTP login, then MPIN validate. The validate response carries the
    /// session token, sid and possibly a redirected base URL.
    async fn connect(&self) -> Result<()> {
        self.require_credentials()?;
        info!("Connecting rest_a session");

        let view = self.login().await?;
        let session = self.validate(&view).await?;

        let base_url = session
            .base_url
            .clone()
            .unwrap_or_else(|| self.config.base_url.clone());
        info!(%base_url, "rest_a session established");
        *self.session.write() = Some(SessionCreds {
            token: session.token,
            sid: session.sid,
            base_url,
        });
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        *self.subscriptions.write() = symbols.to_vec();
        info!(?symbols, "rest_a subscribed");
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
            // One request per second keeps us far inside the vendor limit.
            tokio::time::sleep(POLL_INTERVAL).await;
            let symbols = self.subscriptions.read().clone();
            if symbols.is_empty() {
                continue;
            }
            match self.poll_quotes(&symbols).await {
                Ok(ticks) => self.pending.lock().await.extend(ticks),
                Err(e) => warn!(error = %e, "Quote poll failed; retrying"),
            }
        }
    }
}
