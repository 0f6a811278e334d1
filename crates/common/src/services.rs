use std::collections::HashSet;

use async_trait::async_trait;

use crate::{
    MarginMode, MarketSnapshot, OpenOrderRequest, OrderHandle, OrderInfo, Position, PositionInfo,
    Result, Timeframe,
};

/// Abstraction over the derivatives exchange.
///
/// `BitgetClient` implements this for live trading, `PaperExchange` for
/// simulation and tests. The orchestrator only ever talks to the exchange
/// through this trait; no component depends on a concrete client.
#[async_trait]
pub trait ExchangeService: Send + Sync {
    /// Fetch the most recent `window` candles for one symbol, oldest first.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: usize,
    ) -> Result<MarketSnapshot>;

    /// The full tradable futures-symbol universe.
    async fn fetch_all_futures_symbols(&self) -> Result<HashSet<String>>;

    /// Latest traded price for a symbol.
    async fn fetch_last_price(&self, symbol: &str) -> Result<f64>;

    /// Current position on `symbol`, or `None` when flat.
    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>>;

    /// All currently open positions.
    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>>;

    /// Closed-position history for `symbol` since `since_ms` (ms epoch),
    /// most recent first.
    async fn fetch_positions_history(
        &self,
        symbol: &str,
        since_ms: i64,
    ) -> Result<Vec<PositionInfo>>;

    /// Open (unfilled) orders; `None` means exchange-wide.
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OrderInfo>>;

    /// Free USDT balance available for new positions.
    async fn fetch_free_balance(&self) -> Result<f64>;

    /// Apply margin mode and leverage before order submission. Isolated mode
    /// requires setting long and short leverage separately.
    async fn set_margin_mode_and_leverage(
        &self,
        symbol: &str,
        margin_mode: MarginMode,
        leverage: u32,
    ) -> Result<()>;

    /// Submit an order. Exchange-level rejections surface as
    /// `Error::OrderRejected`; the caller decides whether to retry.
    async fn create_order(&self, request: &OpenOrderRequest) -> Result<OrderHandle>;
}

/// Outbound notification channel. Fire-and-forget: implementations log
/// delivery failures and never propagate them to the orchestrator.
#[async_trait]
pub trait NotifierService: Send + Sync {
    async fn send_message(&self, text: &str);
    async fn send_image(&self, image: &[u8], caption: &str);
}

/// Persistence for terminal position records.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    async fn insert_position(&self, position: &Position) -> Result<()>;
    async fn fetch_all_positions(&self) -> Result<Vec<Position>>;
}
