//! Simulated provider: a bounded random walk per subscribed symbol.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;

use super::{MarketDataProvider, Snapshot};
use crate::config::MockConfig;
use crate::core::domain::Tick;
use crate::error::Result;

/// Deterministic tick generator. With a fixed seed and identical inputs two
/// instances produce bit-identical sequences; symbols are visited in sorted
/// order, one tick per subscribed symbol per interval.
pub struct MockProvider {
    config: MockConfig,
    state: Mutex<WalkState>,
    subscriptions: parking_lot::RwLock<Vec<String>>,
}

struct WalkState {
    rng: StdRng,
    prices: HashMap<String, f64>,
    day_volume: HashMap<String, f64>,
    pending: VecDeque<Tick>,
}

impl MockProvider {
    #[must_use]
    pub fn new(config: MockConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let subscriptions = config.symbols.clone();
        Self {
            config,
            state: Mutex::new(WalkState {
                rng,
                prices: HashMap::new(),
                day_volume: HashMap::new(),
                pending: VecDeque::new(),
            }),
            subscriptions: parking_lot::RwLock::new(subscriptions),
        }
    }

    /// One random-walk step towards the base price, clamped to the band.
    fn step(&self, state: &mut WalkState, symbol: &str) -> f64 {
        let base = self.config.base_price;
        let deviation = self.config.max_deviation.abs();
        let volatility = self.config.volatility;

        let current = state.prices.get(symbol).copied().unwrap_or(base);
        let step = if volatility > 0.0 {
            state.rng.gen_range(-volatility..=volatility)
        } else {
            0.0
        };
        let reverted = current + step + (base - current) * self.config.mean_reversion;
        let next = reverted.clamp(base - deviation, base + deviation);
        state.prices.insert(symbol.to_string(), next);
        next
    }

    fn volume(&self, state: &mut WalkState) -> f64 {
        let (lo, hi) = if self.config.volume_min <= self.config.volume_max {
            (self.config.volume_min, self.config.volume_max)
        } else {
            (self.config.volume_max, self.config.volume_min)
        };
        state.rng.gen_range(lo..=hi) as f64
    }

    fn generate_batch(&self, state: &mut WalkState) {
        let mut symbols = self.subscriptions.read().clone();
        symbols.sort();
        let now = Utc::now();
        for symbol in symbols {
            let price = self.step(state, &symbol);
            let volume = self.volume(state);
            *state.day_volume.entry(symbol.clone()).or_insert(0.0) += volume;
            state.pending.push_back(Tick {
                symbol,
                price,
                volume,
                timestamp: now,
                provider: self.name().to_string(),
            });
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        info!(symbols = ?self.config.symbols, "Mock provider connected");
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        *self.subscriptions.write() = symbols.to_vec();
        info!(?symbols, "Mock provider subscribed");
        Ok(())
    }

    async fn next_tick(&self) -> Result<Tick> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(tick) = state.pending.pop_front() {
                    return Ok(tick);
                }
            }
            tokio::time::sleep(Duration::from_secs_f64(
                self.config.interval_seconds.max(0.0),
            ))
            .await;
            if self.subscriptions.read().is_empty() {
                continue;
            }
            let mut state = self.state.lock().await;
            self.generate_batch(&mut state);
        }
    }

    /// Current walk price (base price before the first tick) plus cumulative
    /// emitted volume, for every requested symbol.
    async fn snapshot(&self, symbols: &[String]) -> Result<Snapshot> {
        let state = self.state.lock().await;
        let mut snapshot = Snapshot::new();
        for symbol in symbols {
            let mut row = serde_json::Map::new();
            let price = state
                .prices
                .get(symbol)
                .copied()
                .unwrap_or(self.config.base_price);
            row.insert("last_price".to_string(), json!(price));
            row.insert(
                "day_volume".to_string(),
                json!(state.day_volume.get(symbol).copied().unwrap_or(0.0)),
            );
            snapshot.insert(symbol.clone(), row);
        }
        Ok(snapshot)
    }
}
