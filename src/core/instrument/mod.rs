//! In-memory instrument master.
//!
//! Loaded once from the instruments CSV
//! (`symbol,exchange,series,isin,nse_scrip_code,bse_code`) and read-only
//! afterwards. A missing file is a warning, never a setup failure: every
//! lookup simply resolves to nothing and callers fall back to raw symbols.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

/// One row of the instruments CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentRow {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub nse_scrip_code: String,
    #[serde(default)]
    pub bse_code: String,
}

/// Symbol → canonical-token map plus the raw rows for enumeration.
pub struct InstrumentMaster {
    rows: Vec<InstrumentRow>,
    by_symbol: HashMap<String, usize>,
}

impl InstrumentMaster {
    /// Load the CSV at `path`. Missing or unreadable files produce an empty
    /// master and a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Instrument master not found; symbol resolution disabled");
            return Self::empty();
        }

        let mut reader = match csv::Reader::from_path(path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open instrument master");
                return Self::empty();
            }
        };

        let mut rows = Vec::new();
        let mut by_symbol = HashMap::new();
        for record in reader.deserialize::<InstrumentRow>() {
            match record {
                Ok(row) if !row.symbol.trim().is_empty() => {
                    let key = row.symbol.trim().to_uppercase();
                    rows.push(row);
                    by_symbol.insert(key, rows.len() - 1);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping malformed instrument row"),
            }
        }

        info!(count = rows.len(), "Instrument master loaded");
        Self { rows, by_symbol }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            by_symbol: HashMap::new(),
        }
    }

    /// Canonical polling token for a user symbol, e.g.
    /// `"RELIANCE"` → `"nse_cm|2885"`. Case-insensitive on the symbol.
    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<String> {
        let row = self.row(symbol)?;
        if row.nse_scrip_code.is_empty() {
            return None;
        }
        Some(format!(
            "{}_cm|{}",
            row.exchange.to_lowercase(),
            row.nse_scrip_code
        ))
    }

    /// ISIN-based instrument key used by the OAuth broker's historical API,
    /// e.g. `"SBIN"` → `"NSE_EQ|INE062A01020"`.
    #[must_use]
    pub fn instrument_key(&self, symbol: &str) -> Option<String> {
        let row = self.row(symbol)?;
        if row.isin.is_empty() {
            return None;
        }
        Some(format!("NSE_EQ|{}", row.isin))
    }

    /// Canonical tokens of every instrument on the given exchange, in file
    /// order. The segment becomes part of the token (`cm` for the cash
    /// market, which is all the CSV carries).
    #[must_use]
    pub fn tokens_for(&self, exchange: &str, segment: &str) -> Vec<String> {
        let segment = if segment.is_empty() { "cm" } else { segment };
        self.rows
            .iter()
            .filter(|row| row.exchange.eq_ignore_ascii_case(exchange))
            .filter(|row| !row.nse_scrip_code.is_empty())
            .map(|row| {
                format!(
                    "{}_{}|{}",
                    row.exchange.to_lowercase(),
                    segment.to_lowercase(),
                    row.nse_scrip_code
                )
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row(&self, symbol: &str) -> Option<&InstrumentRow> {
        let index = *self.by_symbol.get(&symbol.trim().to_uppercase())?;
        self.rows.get(index)
    }
}
