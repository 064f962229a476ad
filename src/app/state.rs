//! Listener-scoped shared state.
//!
//! Everything a session or route handler needs is carried here explicitly;
//! there is no module-level mutable state anywhere in the gateway.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::core::instrument::InstrumentMaster;
use crate::core::store::TokenStore;
use crate::error::Result;

/// OAuth state-token lifetime.
const STATE_TTL_SECS: i64 = 600;

/// Shared state handed to every route and session.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub token_store: Arc<TokenStore>,
    pub master: Arc<InstrumentMaster>,
    pub oauth_states: Arc<OauthStates>,
}

impl AppState {
    /// Open the token store and load the instrument master once for the
    /// listener's lifetime.
    pub fn new(config: Config) -> Result<Self> {
        let token_store = Arc::new(TokenStore::open(&config.auth_db_path)?);
        let master = Arc::new(InstrumentMaster::load(&config.instruments_csv));
        Ok(Self {
            config: Arc::new(config),
            token_store,
            master,
            oauth_states: Arc::new(OauthStates::new()),
        })
    }
}

/// Outstanding OAuth redirect states. Expired entries are pruned lazily on
/// every issue/consume.
#[derive(Default)]
pub struct OauthStates {
    states: parking_lot::Mutex<HashMap<String, i64>>,
}

impl OauthStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh state token valid for ten minutes.
    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let mut states = self.states.lock();
        Self::prune(&mut states);
        states.insert(token.clone(), Utc::now().timestamp() + STATE_TTL_SECS);
        token
    }

    /// Validate and consume a state token. Each token is single-use.
    pub fn consume(&self, token: &str) -> bool {
        let mut states = self.states.lock();
        Self::prune(&mut states);
        states.remove(token).is_some()
    }

    fn prune(states: &mut HashMap<String, i64>) {
        let now = Utc::now().timestamp();
        states.retain(|_, expires_at| *expires_at > now);
    }

    #[cfg(test)]
    fn insert_expiring_at(&self, token: &str, expires_at: i64) {
        self.states.lock().insert(token.to_string(), expires_at);
    }
}
