//! Listing-backrun strategy: fade the violent first candles of a freshly
//! listed futures symbol when the move disagrees with the reference asset
//! (BTC) and carries real volume.

use common::{MarketSnapshot, Signal};
use tracing::debug;

use crate::config::ListingBackrunParams;

/// One candidate candle joined with the reference asset's candle for the
/// same bucket, plus the derived volatility/volume columns.
#[derive(Debug, Clone)]
pub struct BackrunRow {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Candidate USDT volume as a percentage of the reference's USDT volume.
    pub volume_ref_prop: f64,
    /// Reference-asset open->close move, percent.
    pub ref_move_pct: f64,
    /// Candidate open->low move, percent (negative on a drop).
    pub open_low_pct: f64,
    /// Candidate open->high move, percent.
    pub open_high_pct: f64,
}

#[derive(Clone)]
pub struct ListingBackrunEvaluator {
    params: ListingBackrunParams,
}

impl ListingBackrunEvaluator {
    pub fn new(params: ListingBackrunParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ListingBackrunParams {
        &self.params
    }

    /// Join candidate and reference snapshots row-wise and derive the
    /// volatility/volume columns. Ghost candles (range below the minimum)
    /// are dropped before evaluation.
    pub fn enrich(&self, candidate: &MarketSnapshot, reference: &MarketSnapshot) -> Vec<BackrunRow> {
        candidate
            .candles
            .iter()
            .zip(&reference.candles)
            .filter_map(|(c, r)| {
                if c.open <= 0.0 || r.open <= 0.0 {
                    return None;
                }
                let range_pct = (c.high - c.low) / c.open * 100.0;
                if range_pct < self.params.ghost_candle_min_range_pct {
                    debug!(symbol = %c.symbol, range_pct, "skipping ghost candle");
                    return None;
                }

                let volume_usdt = (c.close + c.open) / 2.0 * c.volume;
                let volume_ref_usdt = (r.close + r.open) / 2.0 * r.volume;
                if volume_ref_usdt <= 0.0 {
                    return None;
                }

                Some(BackrunRow {
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                    volume_ref_prop: volume_usdt / volume_ref_usdt * 100.0,
                    ref_move_pct: (r.close - r.open) / r.open * 100.0,
                    open_low_pct: (c.low - c.open) / c.open * 100.0,
                    open_high_pct: (c.high - c.open) / c.open * 100.0,
                })
            })
            .collect()
    }

    /// Decide on the listing candle (the oldest surviving row). Sell is
    /// checked first so the outcome is deterministic.
    pub fn evaluate(&self, rows: &[BackrunRow]) -> Signal {
        let Some(row) = rows.first() else {
            return Signal::None;
        };
        if self.is_sell_signal(row) {
            Signal::Sell
        } else if self.is_buy_signal(row) {
            Signal::Buy
        } else {
            Signal::None
        }
    }

    /// Candidate dumped intracandle while the reference moved up on enough
    /// relative volume.
    fn is_sell_signal(&self, row: &BackrunRow) -> bool {
        row.open_low_pct <= self.params.short_price_volatility_threshold
            && row.ref_move_pct >= self.params.short_btc_volatility_threshold
            && row.volume_ref_prop >= self.params.volume_btc_prop_threshold
    }

    /// Mirror: candidate spiked while the reference dropped.
    fn is_buy_signal(&self, row: &BackrunRow) -> bool {
        row.open_high_pct >= self.params.long_price_volatility_threshold
            && row.ref_move_pct <= self.params.long_btc_volatility_threshold
            && row.volume_ref_prop >= self.params.volume_btc_prop_threshold
    }
}
