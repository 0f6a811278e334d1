use common::{Error, MarginMode, OrderType, Result, Timeframe};
use serde::{Deserialize, Serialize};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// name = "ETH mean reversion"
/// symbol = "ETH/USDT:USDT"
///
/// [strategy.params]
/// kind = "mrat_zscore"
/// fast_ma_length = 9
/// slow_ma_length = 51
/// filter_ma_length = 100
///
/// [strategy.trading]
/// leverage = 5
/// stop_loss_pct = 6.0
/// take_profit_pct = 10.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

impl StrategyFileConfig {
    /// Load and validate the file. Any violation is a fatal `Error::Config`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read strategy config '{path}': {e}")))?;
        let cfg: StrategyFileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse strategy config '{path}': {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(Error::Config("no strategies configured".into()));
        }
        for s in &self.strategies {
            s.validate()?;
        }
        Ok(())
    }
}

/// One configured strategy instance. Validated once at startup and frozen.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name used in logs and notifications.
    pub name: String,
    /// Trading pair, e.g. "ETH/USDT:USDT". The listing-backrun variant
    /// scans the whole universe and ignores this beyond attribution.
    pub symbol: String,
    pub params: StrategyParams,
    #[serde(default)]
    pub trading: TradingParams,
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        validate_symbol(&self.symbol)?;
        self.params.validate()?;
        self.trading.validate()?;
        Ok(())
    }
}

fn validate_symbol(symbol: &str) -> Result<()> {
    // BASE/USDT:USDT with an uppercase alphanumeric base.
    let valid = symbol
        .strip_suffix("/USDT:USDT")
        .map(|base| {
            !base.is_empty() && base.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        })
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid symbol '{symbol}': expected BASE/USDT:USDT"
        )))
    }
}

/// Trading and risk parameters shared by all strategy variants.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TradingParams {
    pub leverage: u32,
    /// Stop loss percentage, e.g. 6.0 for 6%.
    pub stop_loss_pct: f64,
    /// Take profit percentage, e.g. 10.0 for 10%.
    pub take_profit_pct: f64,
    pub max_simultaneous_positions: usize,
    pub order_type: OrderType,
    pub margin_mode: MarginMode,
    /// Percentage of free equity committed to each new trade.
    pub equity_trade_pct: f64,
    /// How long to wait for an order to fill before abandoning it.
    pub order_timeout_secs: u64,
    /// Order submission attempts before giving up on a signal.
    pub max_retries: u32,
    pub long_enabled: bool,
    pub short_enabled: bool,
    /// Cadence of the supervisor's scan-evaluate-act loop.
    pub poll_interval_secs: u64,
    /// Optional supervision horizon for close monitoring, in days.
    /// `None` monitors until the exchange reports closure.
    pub max_position_open_days: Option<u32>,
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            leverage: 1,
            stop_loss_pct: 6.0,
            take_profit_pct: 10.0,
            max_simultaneous_positions: 1,
            order_type: OrderType::Market,
            margin_mode: MarginMode::Isolated,
            equity_trade_pct: 100.0,
            order_timeout_secs: 600,
            max_retries: 1,
            long_enabled: true,
            short_enabled: true,
            poll_interval_secs: 60,
            max_position_open_days: None,
        }
    }
}

impl TradingParams {
    pub fn validate(&self) -> Result<()> {
        if self.leverage < 1 {
            return Err(Error::Config("leverage must be >= 1".into()));
        }
        for (label, pct) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("equity_trade_pct", self.equity_trade_pct),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(Error::Config(format!("{label} must be within [0, 100], got {pct}")));
            }
        }
        if self.max_simultaneous_positions < 1 {
            return Err(Error::Config("max_simultaneous_positions must be >= 1".into()));
        }
        if self.max_retries < 1 {
            return Err(Error::Config("max_retries must be >= 1".into()));
        }
        Ok(())
    }
}

/// Strategy-variant parameters, discriminated by the `kind` tag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParams {
    MratZscore(MratZscoreParams),
    ListingBackrun(ListingBackrunParams),
    RsiDaily(RsiDailyParams),
}

impl StrategyParams {
    pub fn validate(&self) -> Result<()> {
        match self {
            StrategyParams::MratZscore(p) => p.validate(),
            StrategyParams::ListingBackrun(p) => p.validate(),
            StrategyParams::RsiDaily(p) => p.validate(),
        }
    }

    /// Serialized snapshot stored alongside each closed position.
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Mean-reversion-ratio z-score variant.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MratZscoreParams {
    pub fast_ma_length: usize,
    pub slow_ma_length: usize,
    pub filter_ma_length: usize,
    /// Z-score magnitude that arms a long entry (crossed below its negative).
    pub z_score_threshold_buy: f64,
    /// Z-score magnitude that arms a short entry.
    pub z_score_threshold_sell: f64,
    /// How many recent candles may carry the threshold crossing.
    pub z_score_lookback_window: usize,
    /// Minimum unrealized PnL (percent) before the sell predicate may close
    /// an open long.
    pub tp_z_score_threshold: f64,
    pub timeframe: Timeframe,
}

impl Default for MratZscoreParams {
    fn default() -> Self {
        Self {
            fast_ma_length: 9,
            slow_ma_length: 51,
            filter_ma_length: 100,
            z_score_threshold_buy: 2.22,
            z_score_threshold_sell: 2.22,
            z_score_lookback_window: 3,
            tp_z_score_threshold: 1.0,
            timeframe: Timeframe::H1,
        }
    }
}

impl MratZscoreParams {
    pub fn validate(&self) -> Result<()> {
        if self.fast_ma_length < 2 {
            return Err(Error::Config("fast_ma_length must be >= 2".into()));
        }
        if !(self.fast_ma_length < self.slow_ma_length
            && self.slow_ma_length < self.filter_ma_length)
        {
            return Err(Error::Config(
                "moving average lengths must satisfy fast < slow < filter".into(),
            ));
        }
        if self.z_score_lookback_window < 1 {
            return Err(Error::Config("z_score_lookback_window must be >= 1".into()));
        }
        if self.z_score_threshold_buy <= 0.0 || self.z_score_threshold_sell <= 0.0 {
            return Err(Error::Config("z-score thresholds must be positive".into()));
        }
        Ok(())
    }

    /// Window needed so the filter MA has at least one defined value.
    pub fn ohlcv_window(&self) -> usize {
        self.filter_ma_length + 1
    }
}

/// Newly listed symbol backrun variant.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListingBackrunParams {
    pub timeframe: Timeframe,
    pub ohlcv_window: usize,
    /// Reference asset for volume and volatility comparison.
    pub reference_symbol: String,
    /// Intracandle open->low drop (percent, negative) that arms a short.
    pub short_price_volatility_threshold: f64,
    /// Intracandle open->high jump (percent) that arms a long.
    pub long_price_volatility_threshold: f64,
    /// Reference-asset move (percent) required alongside a candidate drop.
    pub short_btc_volatility_threshold: f64,
    /// Reference-asset move (percent) ceiling alongside a candidate jump.
    pub long_btc_volatility_threshold: f64,
    /// Minimum candidate/reference USDT-volume proportion, percent.
    pub volume_btc_prop_threshold: f64,
    /// Candles whose high-low range (percent of open) is below this are
    /// ignored as ghost candles.
    pub ghost_candle_min_range_pct: f64,
}

impl Default for ListingBackrunParams {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M1,
            ohlcv_window: 5,
            reference_symbol: "BTC/USDT:USDT".to_string(),
            short_price_volatility_threshold: -10.0,
            long_price_volatility_threshold: 10.0,
            short_btc_volatility_threshold: 0.3,
            long_btc_volatility_threshold: -0.3,
            volume_btc_prop_threshold: 50.0,
            ghost_candle_min_range_pct: 0.5,
        }
    }
}

impl ListingBackrunParams {
    pub fn validate(&self) -> Result<()> {
        if self.ohlcv_window < 1 {
            return Err(Error::Config("ohlcv_window must be >= 1".into()));
        }
        if self.short_price_volatility_threshold >= 0.0 {
            return Err(Error::Config(
                "short_price_volatility_threshold must be negative".into(),
            ));
        }
        if self.long_price_volatility_threshold <= 0.0 {
            return Err(Error::Config(
                "long_price_volatility_threshold must be positive".into(),
            ));
        }
        if self.volume_btc_prop_threshold < 0.0 {
            return Err(Error::Config("volume_btc_prop_threshold must be >= 0".into()));
        }
        if self.ghost_candle_min_range_pct < 0.0 {
            return Err(Error::Config("ghost_candle_min_range_pct must be >= 0".into()));
        }
        validate_symbol(&self.reference_symbol)
    }
}

/// Daily RSI breakout variant.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RsiDailyParams {
    pub rsi_window: usize,
    /// RSI level a candidate must reach.
    pub rsi_threshold: f64,
    /// The prior period's RSI must still sit below this cap.
    pub rsi_lag_cap: f64,
    pub timeframe: Timeframe,
}

impl Default for RsiDailyParams {
    fn default() -> Self {
        Self {
            rsi_window: 14,
            rsi_threshold: 72.0,
            rsi_lag_cap: 72.0,
            timeframe: Timeframe::D1,
        }
    }
}

impl RsiDailyParams {
    pub fn validate(&self) -> Result<()> {
        if self.rsi_window < 2 {
            return Err(Error::Config("rsi_window must be >= 2".into()));
        }
        for (label, value) in [
            ("rsi_threshold", self.rsi_threshold),
            ("rsi_lag_cap", self.rsi_lag_cap),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{label} must be within [0, 100], got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn ohlcv_window(&self) -> usize {
        // One extra candle so the lagged RSI is defined on the latest row.
        self.rsi_window + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_tagged_strategy_file() {
        let toml = r#"
            [[strategy]]
            name = "ETH mean reversion"
            symbol = "ETH/USDT:USDT"

            [strategy.params]
            kind = "mrat_zscore"
            fast_ma_length = 5
            slow_ma_length = 20
            filter_ma_length = 50

            [strategy.trading]
            leverage = 5
            max_simultaneous_positions = 3

            [[strategy]]
            name = "listing sniper"
            symbol = "BTC/USDT:USDT"

            [strategy.params]
            kind = "listing_backrun"
            short_price_volatility_threshold = -20.0
        "#;
        let cfg: StrategyFileConfig = toml::from_str(toml).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.strategies.len(), 2);
        assert!(matches!(cfg.strategies[0].params, StrategyParams::MratZscore(_)));
        assert_eq!(cfg.strategies[0].trading.leverage, 5);
        match &cfg.strategies[1].params {
            StrategyParams::ListingBackrun(p) => {
                assert_eq!(p.short_price_volatility_threshold, -20.0);
                // untouched fields keep their defaults
                assert_eq!(p.volume_btc_prop_threshold, 50.0);
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_ma_lengths() {
        let params = MratZscoreParams {
            fast_ma_length: 60,
            slow_ma_length: 51,
            filter_ma_length: 100,
            ..MratZscoreParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_percentages() {
        let trading = TradingParams {
            equity_trade_pct: 120.0,
            ..TradingParams::default()
        };
        assert!(trading.validate().is_err());
    }

    #[test]
    fn rejects_malformed_symbols() {
        for bad in ["ethusdt", "ETH/USDT", "eth/USDT:USDT", "/USDT:USDT"] {
            assert!(validate_symbol(bad).is_err(), "accepted '{bad}'");
        }
        validate_symbol("1000PEPE/USDT:USDT").unwrap();
    }
}
