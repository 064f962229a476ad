//! FilterSpec → concrete symbol list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::domain::{passes, CandidateSource, FilterSpec, SortDirection};
use crate::core::instrument::InstrumentMaster;
use crate::core::provider::{MarketDataProvider, Snapshot};
use crate::error::Result;

/// Index constituents are an external concern; until a real source is wired
/// in, the lookup returns a fixed pair so the flow stays testable.
const INDEX_STUB: [&str; 2] = ["NSE_CM|123", "NSE_CM|456"];

/// Expands a [`FilterSpec`] into candidates, then filters and ranks them
/// against a provider snapshot.
pub struct UniverseResolver {
    master: Arc<InstrumentMaster>,
    snapshot_warned: AtomicBool,
}

impl UniverseResolver {
    #[must_use]
    pub fn new(master: Arc<InstrumentMaster>) -> Self {
        Self {
            master,
            snapshot_warned: AtomicBool::new(false),
        }
    }

    /// First stage: candidate symbols in source order.
    #[must_use]
    pub fn candidates(&self, spec: &FilterSpec) -> Vec<String> {
        match &spec.candidates {
            CandidateSource::Watchlist { symbols } => symbols
                .iter()
                .map(|symbol| {
                    self.master.resolve(symbol).unwrap_or_else(|| {
                        warn!(symbol = %symbol, "Symbol not in instrument master, using as-is");
                        symbol.clone()
                    })
                })
                .collect(),
            CandidateSource::Index { name } => {
                debug!(index = %name, "Using stub index constituents");
                INDEX_STUB.iter().map(|s| (*s).to_string()).collect()
            }
            CandidateSource::InstrumentMaster { exchange, segment } => {
                self.master.tokens_for(exchange, segment)
            }
        }
    }

    /// Full resolution: candidates, conditions against a snapshot, optional
    /// sort, then the `max_symbols` prefix.
    ///
    /// A provider without snapshot support degrades to the unfiltered
    /// candidate prefix (warned once per resolver); transient snapshot
    /// failures bubble up so the caller can retry next refresh.
    pub async fn resolve(
        &self,
        spec: &FilterSpec,
        provider: &dyn MarketDataProvider,
    ) -> Result<Vec<String>> {
        let base = self.candidates(spec);
        if spec.conditions.is_empty() {
            return Ok(truncated(base, spec.max_symbols));
        }

        let snapshot = match provider.snapshot(&base).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_supported() => {
                if !self.snapshot_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        provider = provider.name(),
                        "Provider does not support snapshots; skipping dynamic conditions"
                    );
                }
                return Ok(truncated(base, spec.max_symbols));
            }
            Err(e) => return Err(e),
        };

        let mut selected: Vec<String> = base
            .into_iter()
            .filter(|symbol| {
                let Some(row) = snapshot.get(symbol) else {
                    return false;
                };
                spec.conditions.iter().all(|cond| {
                    row.get(&cond.field)
                        .filter(|v| !v.is_null())
                        .is_some_and(|v| passes(v, cond.op, &cond.value))
                })
            })
            .collect();

        sort_symbols(&mut selected, spec, &snapshot);
        Ok(truncated(selected, spec.max_symbols))
    }
}

/// Stable multi-key sort over numeric snapshot fields. Keys are applied in
/// spec order (later keys break ties); symbols missing a field sort after
/// every present value regardless of direction.
fn sort_symbols(symbols: &mut [String], spec: &FilterSpec, snapshot: &Snapshot) {
    for key in spec.sort.iter().rev() {
        symbols.sort_by(|a, b| {
            let va = numeric_field(snapshot, a, &key.field);
            let vb = numeric_field(snapshot, b, &key.field);
            match (va, vb) {
                (Some(x), Some(y)) => {
                    let ord = x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
                    if key.direction == SortDirection::Desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });
    }
}

fn numeric_field(snapshot: &Snapshot, symbol: &str, field: &str) -> Option<f64> {
    snapshot.get(symbol)?.get(field).and_then(Value::as_f64)
}

fn truncated(mut symbols: Vec<String>, max_symbols: usize) -> Vec<String> {
    symbols.truncate(max_symbols);
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use crate::core::domain::{FilterCondition, FilterOp, SortKey};
    use crate::core::provider::{MockProvider, RestAProvider};
    use serde_json::json;
    use std::io::Write;

    fn watchlist_spec(symbols: &[&str]) -> FilterSpec {
        serde_json::from_value(json!({
            "candidates": {"type": "watchlist", "symbols": symbols},
            "refresh_seconds": 0,
            "max_symbols": 50
        }))
        .unwrap()
    }

    fn master_with_reliance() -> Arc<InstrumentMaster> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instruments.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(
            b"symbol,exchange,series,isin,nse_scrip_code,bse_code\nRELIANCE,NSE,EQ,INE002A01018,2885,500325\n",
        )
        .unwrap();
        let master = Arc::new(InstrumentMaster::load(&path));
        drop(dir);
        master
    }

    #[test]
    fn watchlist_preserves_order_and_passes_unknowns_verbatim() {
        let resolver = UniverseResolver::new(master_with_reliance());
        let spec = watchlist_spec(&["RELIANCE", "UNKNOWN"]);
        assert_eq!(resolver.candidates(&spec), vec!["nse_cm|2885", "UNKNOWN"]);
    }

    #[test]
    fn index_source_returns_stub_constituents() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        let spec: FilterSpec = serde_json::from_value(json!({
            "candidates": {"type": "index", "name": "NIFTY50"}
        }))
        .unwrap();
        assert_eq!(resolver.candidates(&spec), vec!["NSE_CM|123", "NSE_CM|456"]);
    }

    #[tokio::test]
    async fn empty_conditions_return_capped_candidates() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        let provider = MockProvider::new(MockConfig::default());
        let mut spec = watchlist_spec(&["C", "B", "A"]);
        spec.max_symbols = 2;
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();
        assert_eq!(resolved, vec!["C", "B"]);
    }

    #[tokio::test]
    async fn conditions_filter_against_the_snapshot() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        let provider = MockProvider::new(MockConfig::default());
        let mut spec = watchlist_spec(&["TESTA", "TESTB"]);
        spec.conditions = vec![FilterCondition {
            field: "last_price".into(),
            op: FilterOp::Gt,
            value: json!(1),
        }];
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();
        assert_eq!(resolved, vec!["TESTA", "TESTB"]);

        spec.conditions[0].value = json!(1_000_000);
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn missing_field_fails_the_symbol() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        let provider = MockProvider::new(MockConfig::default());
        let mut spec = watchlist_spec(&["TESTA"]);
        spec.conditions = vec![FilterCondition {
            field: "open_interest".into(),
            op: FilterOp::Gt,
            value: json!(0),
        }];
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn snapshotless_provider_degrades_to_unfiltered_prefix() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        let provider = RestAProvider::new(crate::config::RestAConfig::default());
        let mut spec = watchlist_spec(&["A", "B", "C"]);
        spec.max_symbols = 2;
        spec.conditions = vec![FilterCondition {
            field: "last_price".into(),
            op: FilterOp::Gt,
            value: json!(1),
        }];
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();
        assert_eq!(resolved, vec!["A", "B"]);
        // Second call takes the same fallback; the warning fires only once.
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();
        assert_eq!(resolved, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn resolve_is_idempotent_for_an_unchanged_snapshot() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        let provider = MockProvider::new(MockConfig::default());
        let mut spec = watchlist_spec(&["TESTA", "TESTB"]);
        spec.conditions = vec![FilterCondition {
            field: "last_price".into(),
            op: FilterOp::Between,
            value: json!([1, 1000]),
        }];
        let first = resolver.resolve(&spec, &provider).await.unwrap();
        let second = resolver.resolve(&spec, &provider).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn sort_orders_by_snapshot_fields() {
        let resolver = UniverseResolver::new(Arc::new(InstrumentMaster::empty()));
        // Mock snapshot gives every unseen symbol the same base price, so use
        // day_volume ticks to differentiate: drive the walk first.
        let provider = MockProvider::new(MockConfig {
            symbols: vec![],
            seed: Some(7),
            interval_seconds: 0.0,
            ..MockConfig::default()
        });
        provider
            .subscribe(&["HIGH".into(), "LOW".into()])
            .await
            .unwrap();
        // Generate one batch so day_volume differs between symbols.
        let _ = provider.next_tick().await.unwrap();
        let _ = provider.next_tick().await.unwrap();

        let mut spec = watchlist_spec(&["LOW", "HIGH"]);
        spec.conditions = vec![FilterCondition {
            field: "last_price".into(),
            op: FilterOp::Gt,
            value: json!(0),
        }];
        spec.sort = vec![SortKey {
            field: "day_volume".into(),
            direction: SortDirection::Desc,
        }];
        let resolved = resolver.resolve(&spec, &provider).await.unwrap();

        let snapshot = provider
            .snapshot(&["LOW".into(), "HIGH".into()])
            .await
            .unwrap();
        let volume = |s: &str| snapshot[s]["day_volume"].as_f64().unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(volume(&resolved[0]) >= volume(&resolved[1]));
    }
}
