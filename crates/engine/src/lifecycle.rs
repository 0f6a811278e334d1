//! Position lifecycle orchestration: admission gating, order submission and
//! the open -> monitor -> close protocol for one symbol at a time.
//!
//! Each monitored symbol runs as its own spawned task; the only state a task
//! touches lives in its own scope, so tasks never synchronize with each
//! other. The exchange itself is the source of truth for the admission gate,
//! re-queried at every decision point instead of cached locally.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

use common::{
    datetime_from_ms, DatabaseService, Error, ExchangeService, NotifierService, OpenOrderRequest,
    OrderHandle, OrderSide, Position, PositionInfo, Result, TradeSide,
};
use strategy::TradingParams;

/// Cadence for fill polling while an order is awaiting execution.
pub const OPEN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Cadence for close polling once a position is live. Closure normally comes
/// from exchange-side TP/SL, so a coarse interval is enough.
pub const CLOSE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Where a symbol's task currently sits in the open -> close protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Scanning,
    AwaitingFill,
    Open,
    Closing,
    Done,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Scanning => "scanning",
            TaskState::AwaitingFill => "awaiting_fill",
            TaskState::Open => "open",
            TaskState::Closing => "closing",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Services and identity shared by everything one strategy instance does.
/// Carries the instance name so every log line and notification is
/// attributable without any global state.
#[derive(Clone)]
pub struct StrategyContext {
    pub strategy_name: String,
    pub exchange: Arc<dyn ExchangeService>,
    pub notifier: Arc<dyn NotifierService>,
    pub database: Arc<dyn DatabaseService>,
}

/// Registry of spawned lifecycle tasks, kept so shutdown can enumerate and
/// cancel them instead of leaking fire-and-forget handles.
#[derive(Default)]
pub struct TaskRegistry {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|h| !h.is_finished());
        handles.push(tokio::spawn(fut));
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every outstanding task.
    pub fn abort_all(&self) {
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// Executes and supervises the open -> monitor -> close protocol.
#[derive(Clone)]
pub struct PositionOrchestrator {
    ctx: StrategyContext,
    trading: TradingParams,
    /// Serialized strategy parameters stored with each closed position.
    params_snapshot: String,
}

impl PositionOrchestrator {
    pub fn new(ctx: StrategyContext, trading: TradingParams, params_snapshot: String) -> Self {
        Self {
            ctx,
            trading,
            params_snapshot,
        }
    }

    pub fn trading(&self) -> &TradingParams {
        &self.trading
    }

    /// True while the live position + open-order count sits under the cap.
    ///
    /// Queried against the exchange at every decision point; concurrent
    /// checks may race, which keeps this a best-effort cap rather than a
    /// hard guarantee.
    pub async fn admission_gate_open(&self) -> Result<bool> {
        let positions = self.ctx.exchange.fetch_positions().await?;
        let orders = self.ctx.exchange.fetch_open_orders(None).await?;
        Ok(positions.len() + orders.len() < self.trading.max_simultaneous_positions)
    }

    /// Gate-check, submit and start monitoring a signal in one step.
    /// Returns `false` when nothing was submitted (side disabled or gate
    /// closed). The spawned monitor goes into `tasks` so shutdown can reach
    /// it.
    pub async fn execute_signal(
        &self,
        symbol: &str,
        side: OrderSide,
        tasks: &Arc<TaskRegistry>,
    ) -> Result<bool> {
        let enabled = match side {
            OrderSide::Buy => self.trading.long_enabled,
            OrderSide::Sell => self.trading.short_enabled,
        };
        if !enabled {
            info!(
                strategy = %self.ctx.strategy_name,
                symbol,
                side = %side,
                "signal suppressed: side disabled in config"
            );
            return Ok(false);
        }

        if !self.admission_gate_open().await? {
            info!(
                strategy = %self.ctx.strategy_name,
                symbol,
                max = self.trading.max_simultaneous_positions,
                "admission gate closed, skipping signal"
            );
            return Ok(false);
        }

        self.submit_entry(symbol, side).await?;

        let orchestrator = self.clone();
        let symbol = symbol.to_string();
        tasks.spawn(async move {
            match orchestrator.run_symbol_lifecycle(&symbol).await {
                Ok(record) => {
                    info!(
                        strategy = %orchestrator.ctx.strategy_name,
                        symbol = %symbol,
                        net_profit = %record.net_profit,
                        state = %TaskState::Done,
                        "lifecycle complete"
                    );
                }
                Err(e) => {
                    error!(
                        strategy = %orchestrator.ctx.strategy_name,
                        symbol = %symbol,
                        state = %TaskState::Failed,
                        error = %e,
                        "lifecycle failed"
                    );
                }
            }
        });
        Ok(true)
    }

    /// Size and submit the entry order with its TP/SL brackets attached.
    ///
    /// Margin mode and leverage are applied first; submission is retried up
    /// to `max_retries` times on transient failure, never on rejection.
    pub async fn submit_entry(&self, symbol: &str, side: OrderSide) -> Result<OrderHandle> {
        let price = self.ctx.exchange.fetch_last_price(symbol).await?;
        let free = self.ctx.exchange.fetch_free_balance().await?;
        let amount = risk::position_size(free, self.trading.equity_trade_pct, price)?;

        let request = OpenOrderRequest {
            symbol: symbol.to_string(),
            side,
            amount,
            order_type: self.trading.order_type,
            margin_mode: self.trading.margin_mode,
            trade_side: TradeSide::Open,
            reduce_only: false,
            take_profit_price: Some(risk::take_profit_price(
                price,
                Some(side),
                self.trading.take_profit_pct,
                self.trading.leverage,
            )),
            stop_loss_price: Some(risk::stop_loss_price(
                price,
                Some(side),
                self.trading.stop_loss_pct,
                self.trading.leverage,
            )),
        };

        self.ctx
            .exchange
            .set_margin_mode_and_leverage(symbol, self.trading.margin_mode, self.trading.leverage)
            .await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.ctx.exchange.create_order(&request).await {
                Ok(handle) => {
                    info!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        side = %side,
                        amount,
                        price,
                        state = %TaskState::AwaitingFill,
                        "order submitted"
                    );
                    return Ok(handle);
                }
                Err(e @ Error::OrderRejected(_)) => {
                    error!(strategy = %self.ctx.strategy_name, symbol, error = %e, "order rejected");
                    return Err(e);
                }
                Err(e) if e.is_transient() && attempt < self.trading.max_retries => {
                    warn!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        attempt,
                        error = %e,
                        "order submission failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit a reduce-only order closing the whole position.
    pub async fn submit_close(&self, position: &PositionInfo) -> Result<OrderHandle> {
        let side = match position.hold_side {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        };
        let request = OpenOrderRequest {
            symbol: position.symbol.clone(),
            side,
            amount: position.contracts,
            order_type: self.trading.order_type,
            margin_mode: self.trading.margin_mode,
            trade_side: TradeSide::Close,
            reduce_only: true,
            take_profit_price: None,
            stop_loss_price: None,
        };
        info!(
            strategy = %self.ctx.strategy_name,
            symbol = %position.symbol,
            contracts = position.contracts,
            "closing position"
        );
        self.ctx.exchange.create_order(&request).await
    }

    /// Poll until the exchange shows the position, or give up after
    /// `timeout`. Exactly one notification goes out for either outcome.
    ///
    /// Transient exchange errors burn one poll interval and are retried; a
    /// single blip must not abandon the fill watch while the order may still
    /// execute.
    pub async fn monitor_opening(&self, symbol: &str, timeout: Duration) -> Result<PositionInfo> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.ctx.exchange.fetch_position(symbol).await {
                Ok(Some(position)) => {
                    info!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        contracts = position.contracts,
                        state = %TaskState::Open,
                        "position opened"
                    );
                    self.notify(&format!("Position successfully open for {symbol}."))
                        .await;
                    return Ok(position);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        error = %e,
                        "position fetch failed, will retry"
                    );
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                warn!(
                    strategy = %self.ctx.strategy_name,
                    symbol,
                    waited_secs = timeout.as_secs(),
                    state = %TaskState::Failed,
                    "order not filled before timeout, abandoning"
                );
                self.notify(&format!(
                    "Order for {symbol} was not filled within {}s and was abandoned.",
                    timeout.as_secs()
                ))
                .await;
                return Err(Error::Timeout {
                    symbol: symbol.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }

            sleep(OPEN_POLL_INTERVAL).await;
        }
    }

    /// Poll position history until the exchange reports a settled net
    /// profit, then persist the terminal record at-most-once and notify.
    ///
    /// Transient exchange errors are logged and retried on the next poll;
    /// persistence failure is fatal for this symbol's task (an unrecorded
    /// financial outcome must never be swallowed). When
    /// `max_position_open_days` is set it bounds the loop; otherwise the
    /// poll runs until the exchange reports closure.
    pub async fn monitor_closing(
        &self,
        symbol: &str,
        opened_at: DateTime<Utc>,
    ) -> Result<Position> {
        let since_ms = opened_at.timestamp_millis();
        let horizon = self
            .trading
            .max_position_open_days
            .map(|days| Duration::from_secs(u64::from(days) * 86_400));
        let started = Instant::now();

        loop {
            match self.ctx.exchange.fetch_positions_history(symbol, since_ms).await {
                Ok(history) => {
                    if let Some(closed) = history.iter().find(|info| info.net_profit.is_some()) {
                        info!(
                            strategy = %self.ctx.strategy_name,
                            symbol,
                            state = %TaskState::Closing,
                            "close detected, persisting"
                        );
                        let record =
                            Position::from_history(closed, self.params_snapshot.clone())?;
                        self.persist_close(&record).await?;
                        self.notify(&format!(
                            "Position successfully closed for {symbol} with {}$ net profit",
                            record.net_profit
                        ))
                        .await;
                        return Ok(record);
                    }
                    info!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        "no settled net profit yet, polling again"
                    );
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        error = %e,
                        "history fetch failed, will retry"
                    );
                }
                Err(e) => return Err(e),
            }

            if let Some(max) = horizon {
                if started.elapsed() >= max {
                    warn!(
                        strategy = %self.ctx.strategy_name,
                        symbol,
                        state = %TaskState::Failed,
                        "close monitoring horizon exceeded, abandoning"
                    );
                    self.notify(&format!(
                        "Stopped monitoring {symbol}: the exchange never reported a close within the supervision horizon."
                    ))
                    .await;
                    return Err(Error::Timeout {
                        symbol: symbol.to_string(),
                        waited_secs: max.as_secs(),
                    });
                }
            }

            sleep(CLOSE_POLL_INTERVAL).await;
        }
    }

    /// The full per-symbol protocol: await the fill, then supervise until
    /// the exchange reports closure. Sequential composition is the ordering
    /// guarantee; no locks involved.
    pub async fn run_symbol_lifecycle(&self, symbol: &str) -> Result<Position> {
        let timeout = Duration::from_secs(self.trading.order_timeout_secs);
        let position = self.monitor_opening(symbol, timeout).await?;
        let opened_at = datetime_from_ms(position.ctime_ms);
        self.monitor_closing(symbol, opened_at).await
    }

    /// Insert the terminal record unless the same close event was already
    /// recorded. Database failures are wrapped as `Persistence` so the task
    /// boundary can tell them apart from exchange trouble.
    async fn persist_close(&self, record: &Position) -> Result<()> {
        let wrap = |e: Error| Error::Persistence {
            symbol: record.symbol.clone(),
            source: Box::new(e),
        };

        let existing = self.ctx.database.fetch_all_positions().await.map_err(wrap)?;
        if existing
            .iter()
            .any(|p| p.symbol == record.symbol && p.close_date == record.close_date)
        {
            info!(
                strategy = %self.ctx.strategy_name,
                symbol = %record.symbol,
                "close event already recorded, skipping insert"
            );
            return Ok(());
        }

        self.ctx.database.insert_position(record).await.map_err(wrap)?;
        info!(
            strategy = %self.ctx.strategy_name,
            symbol = %record.symbol,
            net_profit = %record.net_profit,
            "position recorded"
        );
        Ok(())
    }

    async fn notify(&self, body: &str) {
        let message = format!("### {} ###\n\n{body}", self.ctx.strategy_name);
        self.ctx.notifier.send_message(&message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        MarginMode, MarketSnapshot, OrderInfo, Timeframe,
    };
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted exchange double. `fill_after`/`settle_after` control how many
    /// polls pass before a position appears / settles; `None` means never.
    /// The first `position_fetch_failures` position polls error transiently.
    #[derive(Default)]
    struct ScriptedExchange {
        fill_after: Option<usize>,
        settle_after: Option<usize>,
        position_fetch_failures: usize,
        net_profit: String,
        open_positions: usize,
        open_orders: usize,
        position_polls: AtomicUsize,
        history_polls: AtomicUsize,
        orders_created: Mutex<Vec<OpenOrderRequest>>,
    }

    impl ScriptedExchange {
        fn position_info(&self, symbol: &str, net_profit: Option<String>) -> PositionInfo {
            PositionInfo {
                symbol: symbol.to_string(),
                contracts: 2.0,
                hold_side: OrderSide::Buy,
                unrealized_pnl_pct: Some(1.2),
                net_profit,
                open_avg_price: 100.0,
                close_avg_price: Some(101.5),
                ctime_ms: 1_700_000_000_000,
                utime_ms: 1_700_003_600_000,
            }
        }
    }

    #[async_trait]
    impl ExchangeService for ScriptedExchange {
        async fn fetch_ohlcv(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            _window: usize,
        ) -> Result<MarketSnapshot> {
            Ok(MarketSnapshot::new(symbol, Vec::new()))
        }

        async fn fetch_all_futures_symbols(&self) -> Result<HashSet<String>> {
            Ok(HashSet::new())
        }

        async fn fetch_last_price(&self, _symbol: &str) -> Result<f64> {
            Ok(100.0)
        }

        async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
            let polls = self.position_polls.fetch_add(1, Ordering::SeqCst);
            if polls < self.position_fetch_failures {
                return Err(Error::Exchange("position endpoint unavailable".into()));
            }
            Ok(match self.fill_after {
                Some(n) if polls >= n => Some(self.position_info(symbol, None)),
                _ => None,
            })
        }

        async fn fetch_positions(&self) -> Result<Vec<PositionInfo>> {
            Ok((0..self.open_positions)
                .map(|_| self.position_info("X/USDT:USDT", None))
                .collect())
        }

        async fn fetch_positions_history(
            &self,
            symbol: &str,
            _since_ms: i64,
        ) -> Result<Vec<PositionInfo>> {
            let polls = self.history_polls.fetch_add(1, Ordering::SeqCst);
            Ok(match self.settle_after {
                Some(n) if polls >= n => {
                    vec![self.position_info(symbol, Some(self.net_profit.clone()))]
                }
                _ => vec![],
            })
        }

        async fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<OrderInfo>> {
            Ok((0..self.open_orders)
                .map(|i| OrderInfo {
                    id: i.to_string(),
                    symbol: "X/USDT:USDT".into(),
                    side: OrderSide::Buy,
                    amount: 1.0,
                })
                .collect())
        }

        async fn fetch_free_balance(&self) -> Result<f64> {
            Ok(1_000.0)
        }

        async fn set_margin_mode_and_leverage(
            &self,
            _symbol: &str,
            _margin_mode: MarginMode,
            _leverage: u32,
        ) -> Result<()> {
            Ok(())
        }

        async fn create_order(&self, request: &OpenOrderRequest) -> Result<OrderHandle> {
            self.orders_created.lock().unwrap().push(request.clone());
            Ok(OrderHandle {
                id: "order-1".into(),
                symbol: request.symbol.clone(),
                side: request.side,
                amount: request.amount,
                price: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotifierService for RecordingNotifier {
        async fn send_message(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }

        async fn send_image(&self, _image: &[u8], _caption: &str) {}
    }

    #[derive(Default)]
    struct MemoryDb {
        rows: Mutex<Vec<Position>>,
        fail_inserts: bool,
    }

    #[async_trait]
    impl DatabaseService for MemoryDb {
        async fn insert_position(&self, position: &Position) -> Result<()> {
            if self.fail_inserts {
                return Err(Error::Other("insert refused".into()));
            }
            self.rows.lock().unwrap().push(position.clone());
            Ok(())
        }

        async fn fetch_all_positions(&self) -> Result<Vec<Position>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    struct Harness {
        exchange: Arc<ScriptedExchange>,
        notifier: Arc<RecordingNotifier>,
        database: Arc<MemoryDb>,
        orchestrator: PositionOrchestrator,
    }

    fn harness(exchange: ScriptedExchange, database: MemoryDb, trading: TradingParams) -> Harness {
        let exchange = Arc::new(exchange);
        let notifier = Arc::new(RecordingNotifier::default());
        let database = Arc::new(database);
        let ctx = StrategyContext {
            strategy_name: "test strategy".into(),
            exchange: exchange.clone(),
            notifier: notifier.clone(),
            database: database.clone(),
        };
        let orchestrator = PositionOrchestrator::new(ctx, trading, "{}".into());
        Harness {
            exchange,
            notifier,
            database,
            orchestrator,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unfilled_order_times_out_with_one_notification() {
        let h = harness(
            ScriptedExchange {
                fill_after: None,
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams::default(),
        );

        let result = h
            .orchestrator
            .monitor_opening("NEW/USDT:USDT", Duration::from_secs(600))
            .await;

        assert!(matches!(result, Err(Error::Timeout { waited_secs: 600, .. })));

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1, "expected exactly one timeout notification");
        assert!(messages[0].contains("not filled within 600s"));
        assert!(h.database.rows.lock().unwrap().is_empty(), "nothing may be persisted");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_position_fetch_error_does_not_abort_fill_polling() {
        let h = harness(
            ScriptedExchange {
                fill_after: Some(3),
                position_fetch_failures: 2,
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams::default(),
        );

        let position = h
            .orchestrator
            .monitor_opening("ETH/USDT:USDT", Duration::from_secs(600))
            .await
            .unwrap();
        assert!((position.contracts - 2.0).abs() < 1e-9);

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1, "expected exactly one opened notification");
        assert!(messages[0].contains("successfully open"));
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_persists_exact_net_profit_once() {
        let h = harness(
            ScriptedExchange {
                fill_after: Some(3),
                settle_after: Some(2),
                net_profit: "12.3456789012345".into(),
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams::default(),
        );

        let record = h
            .orchestrator
            .run_symbol_lifecycle("ETH/USDT:USDT")
            .await
            .unwrap();
        assert_eq!(record.net_profit, "12.3456789012345");

        let rows = h.database.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].net_profit, "12.3456789012345");

        let messages = h.notifier.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2); // opened + closed
        assert!(messages[0].contains("successfully open"));
        assert!(messages[1].contains("successfully closed"));
        assert!(messages[1].contains("12.3456789012345"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_close_monitoring_inserts_only_once() {
        let h = harness(
            ScriptedExchange {
                settle_after: Some(0),
                net_profit: "-3.25".into(),
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams::default(),
        );

        let opened_at = datetime_from_ms(1_700_000_000_000);
        h.orchestrator
            .monitor_closing("ETH/USDT:USDT", opened_at)
            .await
            .unwrap();
        h.orchestrator
            .monitor_closing("ETH/USDT:USDT", opened_at)
            .await
            .unwrap();

        assert_eq!(h.database.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_is_fatal_and_loud() {
        let h = harness(
            ScriptedExchange {
                settle_after: Some(0),
                net_profit: "7.5".into(),
                ..ScriptedExchange::default()
            },
            MemoryDb {
                fail_inserts: true,
                ..MemoryDb::default()
            },
            TradingParams::default(),
        );

        let result = h
            .orchestrator
            .monitor_closing("ETH/USDT:USDT", datetime_from_ms(1_700_000_000_000))
            .await;

        assert!(matches!(result, Err(Error::Persistence { .. })));
    }

    #[tokio::test]
    async fn admission_gate_counts_positions_and_orders() {
        let h = harness(
            ScriptedExchange {
                open_positions: 2,
                open_orders: 1,
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams {
                max_simultaneous_positions: 3,
                ..TradingParams::default()
            },
        );

        assert!(!h.orchestrator.admission_gate_open().await.unwrap());
    }

    #[tokio::test]
    async fn closed_gate_blocks_submission_for_any_candidate() {
        let h = harness(
            ScriptedExchange {
                open_positions: 1,
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams {
                max_simultaneous_positions: 1,
                ..TradingParams::default()
            },
        );

        let tasks = TaskRegistry::new();
        for symbol in ["AAA/USDT:USDT", "BBB/USDT:USDT", "CCC/USDT:USDT"] {
            let submitted = h
                .orchestrator
                .execute_signal(symbol, OrderSide::Buy, &tasks)
                .await
                .unwrap();
            assert!(!submitted);
        }
        assert!(h.exchange.orders_created.lock().unwrap().is_empty());
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_monitoring_horizon_bounds_the_poll() {
        let h = harness(
            ScriptedExchange {
                settle_after: None,
                ..ScriptedExchange::default()
            },
            MemoryDb::default(),
            TradingParams {
                max_position_open_days: Some(1),
                ..TradingParams::default()
            },
        );

        let result = h
            .orchestrator
            .monitor_closing("ETH/USDT:USDT", datetime_from_ms(1_700_000_000_000))
            .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(h.database.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_order_carries_brackets_and_sizing() {
        let h = harness(
            ScriptedExchange::default(),
            MemoryDb::default(),
            TradingParams {
                leverage: 5,
                equity_trade_pct: 50.0,
                take_profit_pct: 10.0,
                stop_loss_pct: 6.0,
                ..TradingParams::default()
            },
        );

        h.orchestrator
            .submit_entry("ETH/USDT:USDT", OrderSide::Buy)
            .await
            .unwrap();

        let orders = h.exchange.orders_created.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        // 50% of 1000 USDT at price 100 = 5 units
        assert!((order.amount - 5.0).abs() < 1e-9);
        assert!((order.take_profit_price.unwrap() - 102.0).abs() < 1e-9);
        assert!((order.stop_loss_price.unwrap() - 98.8).abs() < 1e-9);
        assert!(!order.reduce_only);
        assert_eq!(order.trade_side, TradeSide::Open);
    }
}
