//! REST provider integration against stub broker endpoints.

mod support;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use tickgate::config::{RestAConfig, RestBConfig};
use tickgate::core::instrument::InstrumentMaster;
use tickgate::core::provider::{MarketDataProvider, RestAProvider, RestBProvider};
use tickgate::core::store::TokenStore;

use support::{path_in, spawn_gateway, test_config};

// RFC 6238 reference secret, base32 for "12345678901234567890".
const TOTP_SECRET: &str = "GEZDGNBVGEZDGNBVGEZDGNBV";

async fn spawn_router(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn temp_token_store() -> (tempfile::TempDir, Arc<TokenStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TokenStore::open(dir.path().join("auth.db").to_str().unwrap()).expect("store");
    (dir, Arc::new(store))
}

/// Stub for the 2-step login broker: login, validate, quotes.
async fn spawn_rest_a_stub() -> SocketAddr {
    let app = Router::new()
        .route(
            "/login/1.0/tradeApiLogin",
            post(|| async { Json(json!({"data": {"token": "view-token", "sid": "view-sid"}})) }),
        )
        .route(
            "/login/1.0/tradeApiValidate",
            post(|| async { Json(json!({"data": {"token": "session-token", "sid": "session-sid"}})) }),
        )
        .route(
            "/script-details/1.0/quotes/neosymbol/:list/all",
            get(|| async {
                Json(json!([
                    {"ltp": "101.5", "last_volume": "10", "display_symbol": "RELIANCE-EQ"},
                    {"ltp": 99.0, "last_volume": 3, "exchange_token": 2885},
                ]))
            }),
        );
    spawn_router(app).await
}

#[tokio::test]
async fn rest_a_connects_and_streams_polled_quotes() {
    let stub = spawn_rest_a_stub().await;
    let provider = RestAProvider::new(RestAConfig {
        access_token: "dashboard-token".into(),
        mobile: "+919876543210".into(),
        ucc: "UCC1".into(),
        mpin: "123456".into(),
        totp_secret: TOTP_SECRET.into(),
        base_url: format!("http://{stub}"),
    });

    provider.connect().await.expect("connect");
    provider
        .subscribe(&["nse_cm|2885".into()])
        .await
        .expect("subscribe");

    let first = provider.next_tick().await.expect("tick");
    assert_eq!(first.symbol, "RELIANCE-EQ");
    assert_eq!(first.price, 101.5);
    assert_eq!(first.volume, 10.0);
    assert_eq!(first.provider, "rest_a");

    let second = provider.next_tick().await.expect("tick");
    assert_eq!(second.symbol, "2885");
    assert_eq!(second.price, 99.0);
}

#[tokio::test]
async fn rest_a_rejected_login_is_an_auth_error() {
    let app = Router::new().route(
        "/login/1.0/tradeApiLogin",
        post(|| async {
            (
                axum::http::StatusCode::UNAUTHORIZED,
                Json(json!({"error": "bad totp"})),
            )
        }),
    );
    let stub = spawn_router(app).await;

    let provider = RestAProvider::new(RestAConfig {
        access_token: "dashboard-token".into(),
        mobile: "+919876543210".into(),
        ucc: "UCC1".into(),
        mpin: "123456".into(),
        totp_secret: TOTP_SECRET.into(),
        base_url: format!("http://{stub}"),
    });

    let error = provider.connect().await.expect_err("must fail");
    assert!(matches!(error, tickgate::error::Error::Auth(_)));
}

/// Stub for the OAuth broker: LTP quotes and historical candles.
async fn spawn_rest_b_stub() -> SocketAddr {
    let app = Router::new()
        .route(
            "/market-quote/ltp",
            get(|| async {
                Json(json!({"status": "success", "data": {
                    "NSE_EQ|SBIN": {
                        "last_price": 10.5,
                        "volume": 100,
                        "exchange_timestamp": "2024-01-02T10:00:00+05:30",
                        "symbol": "SBIN",
                    },
                }}))
            }),
        )
        .route(
            "/historical-candle/:key/:interval/:end/:start",
            get(|| async {
                Json(json!({"status": "success", "data": {"candles": [
                    ["2024-01-02T00:00:00+05:30", 100.0, 110.0, 90.0, 105.0, 5000],
                    ["2024-01-03T00:00:00+05:30", 105.0, 112.0, 101.0, 108.5, 4000],
                ]}}))
            }),
        )
        .route(
            "/login/authorization/token",
            post(|| async { Json(json!({"access_token": "fresh", "expires_in": 60})) }),
        );
    spawn_router(app).await
}

fn rest_b_provider(stub: SocketAddr, store: Arc<TokenStore>, token: &str) -> RestBProvider {
    RestBProvider::new(
        RestBConfig {
            access_token: token.into(),
            base_url: format!("http://{stub}"),
            ..RestBConfig::default()
        },
        store,
        Arc::new(InstrumentMaster::empty()),
    )
}

#[tokio::test]
async fn rest_b_streams_normalized_ltp_quotes() {
    let stub = spawn_rest_b_stub().await;
    let (_dir, store) = temp_token_store();
    let provider = rest_b_provider(stub, store, "t");

    provider.connect().await.expect("connect");
    provider.subscribe(&["SBIN".into()]).await.expect("subscribe");

    let tick = provider.next_tick().await.expect("tick");
    assert_eq!(tick.symbol, "SBIN");
    assert_eq!(tick.price, 10.5);
    assert_eq!(tick.volume, 100.0);
    assert_eq!(tick.provider, "rest_b");
    assert_eq!(tick.timestamp.timestamp(), 1_704_169_800);
}

#[tokio::test]
async fn rest_b_connect_prefers_cached_token_and_persists_configured_one() {
    let stub = spawn_rest_b_stub().await;
    let (_dir, store) = temp_token_store();

    // Explicit token: connect succeeds and warms the store.
    let provider = rest_b_provider(stub, Arc::clone(&store), "explicit");
    provider.connect().await.expect("connect");
    assert_eq!(
        store.get_valid_token().expect("query").as_deref(),
        Some("explicit")
    );

    // No explicit token: the cached one is enough.
    let cached_only = rest_b_provider(stub, Arc::clone(&store), "");
    cached_only.connect().await.expect("connect from cache");
}

#[tokio::test]
async fn rest_b_exchanges_auth_code_as_a_last_resort() {
    let stub = spawn_rest_b_stub().await;
    let (_dir, store) = temp_token_store();
    let provider = RestBProvider::new(
        RestBConfig {
            api_key: "key".into(),
            api_secret: "secret".into(),
            auth_code: "code".into(),
            redirect_uri: "http://localhost/cb".into(),
            base_url: format!("http://{stub}"),
            ..RestBConfig::default()
        },
        Arc::clone(&store),
        Arc::new(InstrumentMaster::empty()),
    );

    provider.connect().await.expect("connect via exchange");
    assert_eq!(
        store.get_valid_token().expect("query").as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn rest_b_without_any_token_path_fails_auth() {
    let (_dir, store) = temp_token_store();
    let provider = RestBProvider::new(
        RestBConfig::default(),
        store,
        Arc::new(InstrumentMaster::empty()),
    );
    let error = provider.connect().await.expect_err("must fail");
    assert!(matches!(error, tickgate::error::Error::Auth(_)));
}

#[tokio::test]
async fn rest_b_historical_yields_one_tick_per_candle() {
    let stub = spawn_rest_b_stub().await;
    let (_dir, store) = temp_token_store();
    let provider = rest_b_provider(stub, store, "t");

    let ticks = provider
        .historical(
            &["SBIN".into()],
            "2024-01-02T00:00:00Z",
            "2024-01-04",
            Some("1d"),
        )
        .await
        .expect("historical");

    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[0].symbol, "SBIN");
    assert_eq!(ticks[0].price, 105.0);
    assert_eq!(ticks[0].volume, 5000.0);
    assert_eq!(ticks[1].price, 108.5);
}

#[tokio::test]
async fn backtest_endpoint_uses_the_provider_override() {
    let stub = spawn_rest_b_stub().await;
    let (_dir, mut config) = test_config();
    config.rest_b.access_token = "t".into();
    config.rest_b.base_url = format!("http://{stub}");
    let (addr, _state) = spawn_gateway(config).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/backtest"))
        .json(&json!({
            "symbols": ["SBIN"],
            "start": "2024-01-02",
            "end": "2024-01-04",
            "interval": "1d",
            "provider": "rest_b",
        }))
        .send()
        .await
        .expect("backtest request")
        .json()
        .await
        .expect("backtest json");

    let ticks = body["ticks"].as_array().expect("ticks array");
    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[0]["provider"], "rest_b");
    assert_eq!(ticks[0]["price"], 105.0);
}

#[tokio::test]
async fn backtest_without_historical_support_is_a_400() {
    let (_dir, config) = test_config();
    let (addr, _state) = spawn_gateway(config).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/backtest"))
        .json(&json!({
            "symbols": ["MOCK"],
            "start": "2024-01-02",
            "end": "2024-01-04",
        }))
        .send()
        .await
        .expect("backtest request");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn session_with_unauthenticated_provider_gets_an_error_frame() {
    let (dir, mut config) = test_config();
    config.active_provider = "rest_b".into();
    config.auth_db_path = path_in(&dir, "rest_b_auth.db");
    let (addr, _state) = spawn_gateway(config).await;

    let mut ws = support::connect(addr).await;
    let frame = support::next_json(&mut ws).await;
    assert_eq!(frame["action"], "error");
    assert!(frame["data"]["message"].as_str().is_some());
}
