//! HTTP surface next to the WebSocket endpoint: health, backtest and the
//! OAuth redirect pair.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use super::state::AppState;
use crate::core::domain::Tick;
use crate::core::provider::{build_provider, exchange_auth_code, HTTP_TIMEOUT};
use crate::error::Result;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Fetch historical ticks through a one-shot provider instance. The request
/// may override the configured provider.
pub async fn backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> Response {
    match run_backtest(&state, &request).await {
        Ok(ticks) => Json(json!({"ticks": ticks})).into_response(),
        Err(e) => bad_request(&e.to_string()),
    }
}

async fn run_backtest(state: &AppState, request: &BacktestRequest) -> Result<Vec<Tick>> {
    let provider = build_provider(
        &state.config,
        request.provider.as_deref(),
        &state.token_store,
        &state.master,
    )?;
    provider.connect().await?;
    provider
        .historical(
            &request.symbols,
            &request.start,
            &request.end,
            request.interval.as_deref(),
        )
        .await
}

/// Kick off the OAuth flow: mint a state token and bounce the browser to the
/// broker's authorization dialog.
pub async fn provider_auth(State(state): State<AppState>) -> Response {
    let rest_b = &state.config.rest_b;
    if rest_b.api_key.is_empty() || rest_b.redirect_uri.is_empty() {
        return bad_request("Missing rest_b API key or redirect URI in environment.");
    }

    let state_token = state.oauth_states.issue();
    let url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&state={}",
        rest_b.auth_dialog_url,
        urlencoding::encode(&rest_b.api_key),
        urlencoding::encode(&rest_b.redirect_uri),
        urlencoding::encode(&state_token),
    );
    Redirect::temporary(&url).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// OAuth callback: validate the state, exchange the code, persist the token.
pub async fn provider_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        return bad_request("Missing auth code.");
    };

    if let Some(state_token) = params.state.as_deref() {
        if !state.oauth_states.consume(state_token) {
            return bad_request("Invalid or expired state.");
        }
    }

    let rest_b = &state.config.rest_b;
    if rest_b.api_key.is_empty() || rest_b.api_secret.is_empty() || rest_b.redirect_uri.is_empty()
    {
        return bad_request("Missing rest_b API key, secret, or redirect URI.");
    }

    let http = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new());
    let payload = match exchange_auth_code(
        &http,
        &rest_b.base_url,
        &rest_b.api_key,
        &rest_b.api_secret,
        &code,
        &rest_b.redirect_uri,
    )
    .await
    {
        Ok(payload) => payload,
        Err(e) => return bad_request(&e.to_string()),
    };

    if let Err(e) = state.token_store.save(
        &payload.access_token,
        payload.expires_in,
        None,
        payload.refresh_token.as_deref(),
    ) {
        error!(error = %e, "Failed to persist exchanged token");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Failed to persist token."})),
        )
            .into_response();
    }

    info!("OAuth token stored");
    "Auth stored. You can close this tab.".into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}
