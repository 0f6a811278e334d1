//! Paper trading: real market data, simulated account.
//!
//! `PaperExchange` delegates every market-data call to an inner exchange and
//! simulates the account side in memory. Market orders fill instantly at the
//! last price with configurable slippage; TP/SL brackets are checked against
//! the live price whenever position state is queried, so the same lifecycle
//! monitoring code drives both live and paper runs unchanged.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    DatabaseService, Error, ExchangeService, MarginMode, MarketSnapshot, NotifierService,
    OpenOrderRequest, OrderHandle, OrderInfo, OrderSide, Position, PositionInfo, Result,
    Timeframe, TradeSide,
};

struct SimPosition {
    symbol: String,
    side: OrderSide,
    contracts: f64,
    entry_price: f64,
    leverage: u32,
    take_profit: Option<f64>,
    stop_loss: Option<f64>,
    opened_ms: i64,
}

struct ClosedPosition {
    info: PositionInfo,
}

struct Account {
    balance: f64,
    open: Vec<SimPosition>,
    closed: Vec<ClosedPosition>,
    leverage: u32,
    order_seq: u64,
}

/// Simulated exchange account over a real market-data source.
pub struct PaperExchange {
    market: Arc<dyn ExchangeService>,
    account: RwLock<Account>,
    /// Slippage in basis points applied to every fill.
    slippage_bps: f64,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn ExchangeService>, initial_balance: f64, slippage_bps: f64) -> Self {
        info!(
            balance = initial_balance,
            slippage_bps, "PaperExchange initialized"
        );
        Self {
            market,
            account: RwLock::new(Account {
                balance: initial_balance,
                open: Vec::new(),
                closed: Vec::new(),
                leverage: 1,
                order_seq: 0,
            }),
            slippage_bps,
        }
    }

    fn fill_price(&self, mid: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    /// Close `open[idx]` at `price`, realizing pnl into the balance and the
    /// history ledger. Caller holds the write lock.
    fn settle(account: &mut Account, idx: usize, price: f64) {
        let position = account.open.remove(idx);
        let direction = match position.side {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        };
        let pnl = (price - position.entry_price) * direction * position.contracts;
        account.balance += pnl;
        debug!(symbol = %position.symbol, pnl, "paper position settled");
        account.closed.push(ClosedPosition {
            info: PositionInfo {
                symbol: position.symbol,
                contracts: position.contracts,
                hold_side: position.side,
                unrealized_pnl_pct: None,
                net_profit: Some(pnl.to_string()),
                open_avg_price: position.entry_price,
                close_avg_price: Some(price),
                ctime_ms: position.opened_ms,
                utime_ms: Utc::now().timestamp_millis(),
            },
        });
    }

    /// Sweep open positions against the live price and settle any whose
    /// TP/SL bracket has been crossed.
    async fn check_brackets(&self) -> Result<()> {
        let symbols: Vec<String> = {
            let account = self.account.read().await;
            account.open.iter().map(|p| p.symbol.clone()).collect()
        };

        for symbol in symbols {
            let price = self.market.fetch_last_price(&symbol).await?;
            let mut account = self.account.write().await;
            let Some(idx) = account.open.iter().position(|p| p.symbol == symbol) else {
                continue;
            };
            let position = &account.open[idx];
            let exit = match position.side {
                OrderSide::Buy => position
                    .take_profit
                    .filter(|tp| price >= *tp)
                    .or(position.stop_loss.filter(|sl| price <= *sl)),
                OrderSide::Sell => position
                    .take_profit
                    .filter(|tp| price <= *tp)
                    .or(position.stop_loss.filter(|sl| price >= *sl)),
            };
            if let Some(exit_price) = exit {
                Self::settle(&mut account, idx, exit_price);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeService for PaperExchange {
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: usize,
    ) -> Result<MarketSnapshot> {
        self.market.fetch_ohlcv(symbol, timeframe, window).await
    }

    async fn fetch_all_futures_symbols(&self) -> Result<HashSet<String>> {
        self.market.fetch_all_futures_symbols().await
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<f64> {
        self.market.fetch_last_price(symbol).await
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        self.check_brackets().await?;
        let price = self.market.fetch_last_price(symbol).await?;
        let account = self.account.read().await;
        Ok(account.open.iter().find(|p| p.symbol == symbol).map(|p| {
            let direction = match p.side {
                OrderSide::Buy => 1.0,
                OrderSide::Sell => -1.0,
            };
            let pnl_pct =
                (price - p.entry_price) / p.entry_price * direction * p.leverage as f64 * 100.0;
            PositionInfo {
                symbol: p.symbol.clone(),
                contracts: p.contracts,
                hold_side: p.side,
                unrealized_pnl_pct: Some(pnl_pct),
                net_profit: None,
                open_avg_price: p.entry_price,
                close_avg_price: None,
                ctime_ms: p.opened_ms,
                utime_ms: p.opened_ms,
            }
        }))
    }

    async fn fetch_positions(&self) -> Result<Vec<PositionInfo>> {
        self.check_brackets().await?;
        let account = self.account.read().await;
        Ok(account
            .open
            .iter()
            .map(|p| PositionInfo {
                symbol: p.symbol.clone(),
                contracts: p.contracts,
                hold_side: p.side,
                unrealized_pnl_pct: None,
                net_profit: None,
                open_avg_price: p.entry_price,
                close_avg_price: None,
                ctime_ms: p.opened_ms,
                utime_ms: p.opened_ms,
            })
            .collect())
    }

    async fn fetch_positions_history(
        &self,
        symbol: &str,
        since_ms: i64,
    ) -> Result<Vec<PositionInfo>> {
        self.check_brackets().await?;
        let account = self.account.read().await;
        Ok(account
            .closed
            .iter()
            .filter(|c| c.info.symbol == symbol && c.info.utime_ms >= since_ms)
            .map(|c| c.info.clone())
            .collect())
    }

    async fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OrderInfo>> {
        // Market orders fill instantly; nothing ever rests.
        Ok(vec![])
    }

    async fn fetch_free_balance(&self) -> Result<f64> {
        Ok(self.account.read().await.balance)
    }

    async fn set_margin_mode_and_leverage(
        &self,
        _symbol: &str,
        _margin_mode: MarginMode,
        leverage: u32,
    ) -> Result<()> {
        self.account.write().await.leverage = leverage;
        Ok(())
    }

    async fn create_order(&self, request: &OpenOrderRequest) -> Result<OrderHandle> {
        let mid = self.market.fetch_last_price(&request.symbol).await?;
        let price = self.fill_price(mid, request.side);
        let mut account = self.account.write().await;
        account.order_seq += 1;
        let id = format!("paper-{}", account.order_seq);

        match request.trade_side {
            TradeSide::Open => {
                if account.open.iter().any(|p| p.symbol == request.symbol) {
                    return Err(Error::OrderRejected(format!(
                        "paper account already holds {}",
                        request.symbol
                    )));
                }
                let leverage = account.leverage;
                account.open.push(SimPosition {
                    symbol: request.symbol.clone(),
                    side: request.side,
                    contracts: request.amount,
                    entry_price: price,
                    leverage,
                    take_profit: request.take_profit_price,
                    stop_loss: request.stop_loss_price,
                    opened_ms: Utc::now().timestamp_millis(),
                });
                debug!(symbol = %request.symbol, side = %request.side, price, "paper fill");
            }
            TradeSide::Close => {
                let Some(idx) = account
                    .open
                    .iter()
                    .position(|p| p.symbol == request.symbol)
                else {
                    return Err(Error::OrderRejected(format!(
                        "no paper position to close on {}",
                        request.symbol
                    )));
                };
                Self::settle(&mut account, idx, price);
            }
        }

        Ok(OrderHandle {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            price: Some(price),
        })
    }
}

/// In-memory stand-in for the SQLite store; used by paper runs that should
/// leave no file behind and by tests.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Position>>,
}

#[async_trait]
impl DatabaseService for MemoryStore {
    async fn insert_position(&self, position: &Position) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|p| p.id == position.id) {
            return Ok(());
        }
        rows.push(position.clone());
        Ok(())
    }

    async fn fetch_all_positions(&self) -> Result<Vec<Position>> {
        Ok(self.rows.read().await.clone())
    }
}

/// Notifier that only logs. Keeps paper runs off Telegram.
pub struct NullNotifier;

#[async_trait]
impl NotifierService for NullNotifier {
    async fn send_message(&self, text: &str) {
        info!(text, "notification (paper)");
    }

    async fn send_image(&self, _image: &[u8], caption: &str) {
        info!(caption, "image notification (paper)");
    }
}
