//! Mean-reversion-ratio (MRAT) z-score strategy.
//!
//! The ratio of a fast SMA over a slow SMA is standardized against its own
//! rolling mean and stdev. Entries fire when the z-score pierced a threshold
//! within a short lookback and the last candles confirm the move.

use common::{MarketSnapshot, Signal};

use crate::config::MratZscoreParams;
use crate::indicators::{ratio_series, rolling_mean, rolling_std, sma_series};

/// Indicator columns aligned with the snapshot's candles.
#[derive(Debug, Clone)]
pub struct MratKpis {
    pub slow_ma: Vec<Option<f64>>,
    pub filter_ma: Vec<Option<f64>>,
    pub mrat: Vec<Option<f64>>,
    pub z_score: Vec<Option<f64>>,
}

#[derive(Clone)]
pub struct MratZscoreEvaluator {
    params: MratZscoreParams,
}

impl MratZscoreEvaluator {
    pub fn new(params: MratZscoreParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MratZscoreParams {
        &self.params
    }

    /// Compute indicator columns from the raw snapshot.
    pub fn enrich(&self, snapshot: &MarketSnapshot) -> MratKpis {
        let closes = snapshot.closes();
        let slow = self.params.slow_ma_length;

        let fast_ma = sma_series(&closes, self.params.fast_ma_length);
        let slow_ma = sma_series(&closes, slow);
        let filter_ma = sma_series(&closes, self.params.filter_ma_length);

        let mrat = ratio_series(&fast_ma, &slow_ma);
        let mean_mrat = rolling_mean(&mrat, slow);
        let stdev_mrat = rolling_std(&mrat, slow);

        let z_score = mrat
            .iter()
            .zip(mean_mrat.iter().zip(&stdev_mrat))
            .map(|(m, (mean, std))| match (m, mean, std) {
                (Some(m), Some(mean), Some(std)) if *std != 0.0 => Some((m - mean) / std),
                _ => None,
            })
            .collect();

        MratKpis {
            slow_ma,
            filter_ma,
            mrat,
            z_score,
        }
    }

    /// Decide on the enriched snapshot. The sell predicate is checked first
    /// so the outcome is deterministic even if both directions were armed.
    pub fn evaluate(&self, snapshot: &MarketSnapshot, kpis: &MratKpis) -> Signal {
        if self.is_sell_signal(snapshot, kpis) {
            Signal::Sell
        } else if self.is_buy_signal(snapshot, kpis) {
            Signal::Buy
        } else {
            Signal::None
        }
    }

    /// Whether an open long should be closed: the sell predicate holds and
    /// the position already carries at least the minimum PnL.
    pub fn should_close(&self, snapshot: &MarketSnapshot, kpis: &MratKpis, pnl_pct: f64) -> bool {
        pnl_pct >= self.params.tp_z_score_threshold && self.is_sell_signal(snapshot, kpis)
    }

    fn is_buy_signal(&self, snapshot: &MarketSnapshot, kpis: &MratKpis) -> bool {
        let threshold = self.params.z_score_threshold_buy;
        let crossed_below = self.z_in_lookback(kpis, |z| z <= -threshold);

        let rebound = match (snapshot.from_end(1), snapshot.from_end(2)) {
            (Some(prev), Some(before)) => prev.close > before.open && prev.high > before.high,
            _ => false,
        };

        let filter_under_slow = match (kpis.filter_ma.last(), kpis.slow_ma.last()) {
            (Some(Some(filter)), Some(Some(slow))) => filter < slow,
            _ => false,
        };

        crossed_below && rebound && filter_under_slow
    }

    fn is_sell_signal(&self, snapshot: &MarketSnapshot, kpis: &MratKpis) -> bool {
        let threshold = self.params.z_score_threshold_sell;
        let crossed_above = self.z_in_lookback(kpis, |z| z >= threshold);

        // Momentum fading: the previous candle's high undercut the one before.
        let fading = match (snapshot.from_end(1), snapshot.from_end(2)) {
            (Some(prev), Some(before)) => prev.high < before.high,
            _ => false,
        };

        crossed_above && fading
    }

    fn z_in_lookback(&self, kpis: &MratKpis, predicate: impl Fn(f64) -> bool) -> bool {
        let lookback = self.params.z_score_lookback_window.min(kpis.z_score.len());
        kpis.z_score[kpis.z_score.len() - lookback..]
            .iter()
            .flatten()
            .any(|&z| predicate(z))
    }
}
