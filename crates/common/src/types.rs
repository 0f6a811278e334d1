use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle for a single symbol and time bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// An ordered (oldest-first) window of candles for one symbol.
///
/// Immutable once fetched; evaluators only ever read it.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub candles: Vec<Candle>,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.into(),
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Candle `n` positions back from the latest (`from_end(0)` == last).
    pub fn from_end(&self, n: usize) -> Option<&Candle> {
        let len = self.candles.len();
        if n < len {
            self.candles.get(len - 1 - n)
        } else {
            None
        }
    }
}

/// Side of an order or held position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Outcome of evaluating one snapshot: enter long, enter short, or stand by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    Buy,
    Sell,
    #[default]
    None,
}

impl Signal {
    pub fn side(self) -> Option<OrderSide> {
        match self {
            Signal::Buy => Some(OrderSide::Buy),
            Signal::Sell => Some(OrderSide::Sell),
            Signal::None => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == Signal::None
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::None => write!(f, "NONE"),
        }
    }
}

/// Whether the bot is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarginMode::Isolated => write!(f, "isolated"),
            MarginMode::Cross => write!(f, "cross"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

/// Whether an order opens a new position or closes an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Open,
    Close,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Open => write!(f, "open"),
            TradeSide::Close => write!(f, "close"),
        }
    }
}

/// Candle timeframe on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully resolved order, ready for submission to the exchange.
/// Consumed exactly once by `ExchangeService::create_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Amount in base-asset units, already sized from equity.
    pub amount: f64,
    pub order_type: OrderType,
    pub margin_mode: MarginMode,
    pub trade_side: TradeSide,
    pub reduce_only: bool,
    pub take_profit_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
}

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: f64,
    /// Fill or limit price when the exchange reports one.
    pub price: Option<f64>,
}

/// Live or historical position state as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    /// Contracts currently (or formerly) held.
    pub contracts: f64,
    pub hold_side: OrderSide,
    /// Unrealized PnL as a percentage of margin, when the exchange reports it.
    pub unrealized_pnl_pct: Option<f64>,
    /// Realized net profit as the exchange's decimal string. Kept verbatim so
    /// persisting it never loses precision. `None` until the close settles.
    pub net_profit: Option<String>,
    pub open_avg_price: f64,
    pub close_avg_price: Option<f64>,
    /// Position creation time, ms since epoch.
    pub ctime_ms: i64,
    /// Last update time (close time for historical rows), ms since epoch.
    pub utime_ms: i64,
}

/// An open (unfilled) order as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub amount: f64,
}

/// Terminal record of a closed position.
///
/// Built only when the exchange reports a realized net profit, persisted
/// at-most-once per close event, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub open_price: String,
    pub close_price: String,
    pub hold_side: OrderSide,
    /// RFC-3339 UTC timestamps.
    pub open_date: DateTime<Utc>,
    pub close_date: DateTime<Utc>,
    /// Exchange-reported net profit, verbatim decimal string.
    pub net_profit: String,
    /// Snapshot of the strategy parameters active when the position closed.
    pub strategy_params: String,
}

impl Position {
    /// Build the terminal record from an exchange historical-position row.
    /// Fails when the row has no settled net profit yet.
    pub fn from_history(info: &PositionInfo, strategy_params: String) -> crate::Result<Self> {
        let net_profit = info
            .net_profit
            .clone()
            .ok_or_else(|| crate::Error::InvalidInput("position has no net profit yet".into()))?;

        Ok(Position {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: info.symbol.clone(),
            open_price: info.open_avg_price.to_string(),
            close_price: info
                .close_avg_price
                .map(|p| p.to_string())
                .unwrap_or_default(),
            hold_side: info.hold_side,
            open_date: datetime_from_ms(info.ctime_ms),
            close_date: datetime_from_ms(info.utime_ms),
            net_profit,
            strategy_params,
        })
    }
}

/// Convert ms-epoch exchange timestamps to UTC datetimes.
/// Out-of-range values clamp to the epoch rather than panicking.
pub fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap())
}
