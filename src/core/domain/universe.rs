//! Incremental universe updates emitted to sessions.

use serde::{Deserialize, Serialize};

/// Delta plus full current set. `added`/`removed` are relative to the
/// previously emitted set; `universe` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseUpdate {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub universe: Vec<String>,
    pub reason: String,
    pub timestamp: f64,
}

impl UniverseUpdate {
    #[must_use]
    pub fn new(added: Vec<String>, removed: Vec<String>, universe: Vec<String>, reason: &str) -> Self {
        Self {
            added,
            removed,
            universe,
            reason: reason.to_string(),
            timestamp: epoch_seconds(),
        }
    }
}

fn epoch_seconds() -> f64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(_) => 0.0,
    }
}
