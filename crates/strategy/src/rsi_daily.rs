//! Daily RSI breakout scan across the whole symbol universe.
//!
//! A symbol qualifies when its RSI crossed up through the threshold while the
//! prior period still sat below the lag cap. Qualifying candidates are ranked
//! by the size of the RSI jump so the largest movers get the limited
//! position slots first.

use common::MarketSnapshot;

use crate::config::RsiDailyParams;
use crate::indicators::rsi_series;

/// A symbol that passed the RSI breakout filter on the latest candle.
#[derive(Debug, Clone, PartialEq)]
pub struct RsiCandidate {
    pub symbol: String,
    pub rsi: f64,
    pub rsi_lag: f64,
}

impl RsiCandidate {
    /// Magnitude of the upward RSI jump; the ranking key.
    pub fn delta(&self) -> f64 {
        self.rsi - self.rsi_lag
    }
}

#[derive(Clone)]
pub struct RsiDailyEvaluator {
    params: RsiDailyParams,
}

impl RsiDailyEvaluator {
    pub fn new(params: RsiDailyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RsiDailyParams {
        &self.params
    }

    /// RSI column for one symbol's snapshot.
    pub fn enrich(&self, snapshot: &MarketSnapshot) -> Vec<Option<f64>> {
        rsi_series(&snapshot.closes(), self.params.rsi_window)
    }

    /// Filter and rank the universe. Snapshots too short for a lagged RSI
    /// simply drop out; the result is ordered by descending RSI jump.
    pub fn evaluate(&self, snapshots: &[MarketSnapshot]) -> Vec<RsiCandidate> {
        let mut candidates: Vec<RsiCandidate> = snapshots
            .iter()
            .filter_map(|snapshot| {
                let rsi = self.enrich(snapshot);
                let (last, lag) = match rsi.as_slice() {
                    [.., Some(lag), Some(last)] => (*last, *lag),
                    _ => return None,
                };

                let crossed_up = last >= self.params.rsi_threshold
                    && lag < self.params.rsi_lag_cap
                    && last >= lag;
                crossed_up.then(|| RsiCandidate {
                    symbol: snapshot.symbol.clone(),
                    rsi: last,
                    rsi_lag: lag,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.delta()
                .partial_cmp(&a.delta())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }
}
