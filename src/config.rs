//! Gateway configuration.
//!
//! Everything is sourced from the environment (a `.env` file is honored via
//! dotenvy in `main`). Malformed numeric values fall back to their defaults
//! rather than failing startup; missing credentials are only an error once a
//! session actually tries to connect the affected provider.

use std::env;

/// Main gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the WebSocket/HTTP listener.
    pub bind_addr: String,
    /// Provider constructed for new sessions: `mock`, `rest_a` or `rest_b`.
    pub active_provider: String,
    pub auth_db_path: String,
    pub paper_db_path: String,
    /// Paper fills recorded by sessions of a `mock*` provider land here
    /// instead of `paper_db_path`, keeping simulated runs separate.
    pub mock_db_path: String,
    pub instruments_csv: String,
    pub rest_a: RestAConfig,
    pub rest_b: RestBConfig,
    pub mock: MockConfig,
}

/// Credentials for the 2-step (TOTP + MPIN) session-auth broker.
#[derive(Debug, Clone, Default)]
pub struct RestAConfig {
    /// Long-lived dashboard access token, sent as `Authorization` on every call.
    pub access_token: String,
    pub mobile: String,
    pub ucc: String,
    pub mpin: String,
    pub totp_secret: String,
    /// Login host; quote polling moves to the base URL returned by validate.
    pub base_url: String,
}

/// Credentials and endpoints for the OAuth broker.
#[derive(Debug, Clone, Default)]
pub struct RestBConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Explicit access token; takes priority over the token store.
    pub access_token: String,
    pub auth_code: String,
    pub redirect_uri: String,
    pub base_url: String,
    pub auth_dialog_url: String,
}

/// Random-walk parameters for the mock provider.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub symbols: Vec<String>,
    pub base_price: f64,
    pub max_deviation: f64,
    pub volatility: f64,
    pub mean_reversion: f64,
    pub interval_seconds: f64,
    pub seed: Option<u64>,
    pub volume_min: u64,
    pub volume_max: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["MOCK".to_string()],
            base_price: 100.0,
            max_deviation: 5.0,
            volatility: 0.5,
            mean_reversion: 0.1,
            interval_seconds: 0.5,
            seed: None,
            volume_min: 100,
            volume_max: 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".into(),
            active_provider: "mock".into(),
            auth_db_path: "auth.db".into(),
            paper_db_path: "paper_trades.db".into(),
            mock_db_path: "mock_trades.db".into(),
            instruments_csv: "data/instruments.csv".into(),
            rest_a: RestAConfig {
                base_url: "https://mis.kotaksecurities.com".into(),
                ..RestAConfig::default()
            },
            rest_b: RestBConfig {
                base_url: "https://api.upstox.com/v2".into(),
                auth_dialog_url: "https://api.upstox.com/v2/login/authorization/dialog".into(),
                ..RestBConfig::default()
            },
            mock: MockConfig::default(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mock_defaults = MockConfig::default();

        Self {
            bind_addr: var_or("TICKGATE_BIND", &defaults.bind_addr),
            active_provider: var_or("TICKGATE_PROVIDER", &defaults.active_provider),
            auth_db_path: var_or("TICKGATE_AUTH_DB_PATH", &defaults.auth_db_path),
            paper_db_path: var_or("TICKGATE_PAPER_DB_PATH", &defaults.paper_db_path),
            mock_db_path: var_or("TICKGATE_MOCK_DB_PATH", &defaults.mock_db_path),
            instruments_csv: var_or("TICKGATE_INSTRUMENTS_CSV", &defaults.instruments_csv),
            rest_a: RestAConfig {
                access_token: var_or("REST_A_ACCESS_TOKEN", ""),
                mobile: normalize_mobile(&var_or("REST_A_MOBILE", "")),
                ucc: var_or("REST_A_UCC", ""),
                mpin: var_or("REST_A_MPIN", ""),
                totp_secret: var_or("REST_A_TOTP_SECRET", ""),
                base_url: var_or("REST_A_BASE_URL", &defaults.rest_a.base_url),
            },
            rest_b: RestBConfig {
                api_key: var_or("REST_B_API_KEY", ""),
                api_secret: var_or("REST_B_API_SECRET", ""),
                access_token: var_or("REST_B_ACCESS_TOKEN", ""),
                auth_code: var_or("REST_B_AUTH_CODE", ""),
                redirect_uri: var_or("REST_B_REDIRECT_URI", ""),
                base_url: var_or("REST_B_BASE_URL", &defaults.rest_b.base_url),
                auth_dialog_url: var_or("REST_B_AUTH_DIALOG_URL", &defaults.rest_b.auth_dialog_url),
            },
            mock: MockConfig {
                symbols: parse_symbols(&var_or("MOCK_SYMBOLS", "MOCK")),
                base_price: parse_f64("MOCK_BASE_PRICE", mock_defaults.base_price),
                max_deviation: parse_f64("MOCK_MAX_DEVIATION", mock_defaults.max_deviation),
                volatility: parse_f64("MOCK_VOLATILITY", mock_defaults.volatility),
                mean_reversion: parse_f64("MOCK_MEAN_REVERSION", mock_defaults.mean_reversion),
                interval_seconds: parse_f64("MOCK_INTERVAL_SECONDS", mock_defaults.interval_seconds),
                seed: env::var("MOCK_SEED").ok().and_then(|v| v.trim().parse().ok()),
                volume_min: parse_u64("MOCK_VOLUME_MIN", mock_defaults.volume_min),
                volume_max: parse_u64("MOCK_VOLUME_MAX", mock_defaults.volume_max),
            },
        }
    }

    /// Paper fills from mock sessions go to their own file.
    #[must_use]
    pub fn paper_db_for_provider(&self, provider: &str) -> &str {
        if provider.starts_with("mock") {
            &self.mock_db_path
        } else {
            &self.paper_db_path
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_symbols(value: &str) -> Vec<String> {
    let symbols: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if symbols.is_empty() {
        vec!["MOCK".to_string()]
    } else {
        symbols
    }
}

/// Ten-digit local numbers get the +91 country prefix the login API expects.
fn normalize_mobile(mobile: &str) -> String {
    if mobile.len() == 10 && mobile.chars().all(|c| c.is_ascii_digit()) {
        format!("+91{mobile}")
    } else {
        mobile.to_string()
    }
}
