//! The per-strategy supervision loop: scan, evaluate, act, sleep, repeat.
//!
//! One `StrategySupervisor` runs per configured strategy instance. The loop
//! never exits on error; a failed iteration is logged and retried after a
//! backoff so a flaky exchange call cannot kill a strategy.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use common::{ExchangeService, MarketSnapshot, OrderSide, Result};
use strategy::{
    Evaluator, ListingBackrunEvaluator, MratZscoreEvaluator, RsiDailyEvaluator, StrategyConfig,
};

use crate::lifecycle::{PositionOrchestrator, StrategyContext, TaskRegistry};
use crate::scanner::CandidateScanner;

/// Pause after a failed iteration before the loop tries again.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);
/// How long a fresh listing is polled for its first candles before giving up.
const FIRST_CANDLE_ATTEMPTS: usize = 60;
const FIRST_CANDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running supervisor. Dropping it does not stop the loop;
/// call `stop` for an orderly shutdown.
pub struct SupervisorHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    tasks: Arc<TaskRegistry>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Signal the loop to exit, wait for the current iteration to finish,
    /// then cancel any still-running lifecycle monitors. Open positions stay
    /// protected by their exchange-side TP/SL brackets.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
        self.tasks.abort_all();
        info!(strategy = %self.name, "supervisor stopped");
    }
}

/// Drives one configured strategy instance end to end.
pub struct StrategySupervisor {
    ctx: StrategyContext,
    config: StrategyConfig,
    evaluator: Evaluator,
    orchestrator: PositionOrchestrator,
    scanner: CandidateScanner,
    tasks: Arc<TaskRegistry>,
}

impl StrategySupervisor {
    pub fn new(ctx: StrategyContext, config: StrategyConfig) -> Self {
        let evaluator = Evaluator::from_params(&config.params);
        let orchestrator = PositionOrchestrator::new(
            ctx.clone(),
            config.trading.clone(),
            config.params.snapshot_json(),
        );
        let scanner = CandidateScanner::new(ctx.exchange.clone());
        Self {
            ctx,
            config,
            evaluator,
            orchestrator,
            scanner,
            tasks: TaskRegistry::new(),
        }
    }

    /// Spawn the supervision loop and return its control handle.
    pub fn start(self) -> SupervisorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let name = self.config.name.clone();
        let tasks = self.tasks.clone();
        let join = tokio::spawn(self.run(shutdown_rx));
        SupervisorHandle {
            name,
            shutdown,
            tasks,
            join,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            strategy = %self.config.name,
            kind = self.evaluator.kind(),
            symbol = %self.config.symbol,
            "supervisor started"
        );

        // The listing scanner needs a baseline universe before the first
        // sweep, otherwise every already-listed symbol counts as new.
        if matches!(self.evaluator, Evaluator::ListingBackrun(_)) {
            loop {
                match self.scanner.bootstrap().await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(strategy = %self.config.name, error = %e, "scanner bootstrap failed");
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            _ = sleep(ERROR_BACKOFF) => {}
                        }
                    }
                }
            }
        }

        let poll = Duration::from_secs(self.config.trading.poll_interval_secs);
        loop {
            if let Err(e) = self.tick().await {
                error!(strategy = %self.config.name, error = %e, "iteration failed");
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = sleep(ERROR_BACKOFF) => {}
                }
                continue;
            }
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = sleep(poll) => {}
            }
        }
    }

    async fn tick(&mut self) -> Result<()> {
        // The evaluator is parameters-only, so cloning it out frees `self`
        // for the scanner's mutable state.
        match self.evaluator.clone() {
            Evaluator::MratZscore(eval) => self.tick_mrat(&eval).await,
            Evaluator::ListingBackrun(eval) => self.tick_listing(&eval).await,
            Evaluator::RsiDaily(eval) => self.tick_rsi(&eval).await,
        }
    }

    /// Single-symbol mean-reversion iteration. While a position is open only
    /// the indicator-driven close exit is considered; entries resume once
    /// the symbol is flat again.
    async fn tick_mrat(&self, eval: &MratZscoreEvaluator) -> Result<()> {
        let params = eval.params();
        let snapshot = self
            .ctx
            .exchange
            .fetch_ohlcv(&self.config.symbol, params.timeframe, params.ohlcv_window())
            .await?;
        let kpis = eval.enrich(&snapshot);

        if let Some(position) = self.ctx.exchange.fetch_position(&self.config.symbol).await? {
            let pending = self
                .ctx
                .exchange
                .fetch_open_orders(Some(&self.config.symbol))
                .await?;
            if !pending.is_empty() {
                return Ok(());
            }
            if let Some(pnl_pct) = position.unrealized_pnl_pct {
                if eval.should_close(&snapshot, &kpis, pnl_pct) {
                    self.orchestrator.submit_close(&position).await?;
                }
            }
            return Ok(());
        }

        let signal = eval.evaluate(&snapshot, &kpis);
        if let Some(side) = signal.side() {
            info!(
                strategy = %self.config.name,
                symbol = %self.config.symbol,
                signal = %signal,
                "entry signal"
            );
            self.orchestrator
                .execute_signal(&self.config.symbol, side, &self.tasks)
                .await?;
        }
        Ok(())
    }

    /// Listing sweep: report fresh symbols, then watch each one in its own
    /// task until its first candles arrive and can be judged.
    async fn tick_listing(&mut self, eval: &ListingBackrunEvaluator) -> Result<()> {
        let fresh = self.scanner.scan().await?;
        if fresh.is_empty() {
            return Ok(());
        }

        info!(strategy = %self.config.name, candidates = ?fresh, "new listings detected");
        self.notify(&format!(
            "New candidate symbols found: {}",
            fresh.join(", ")
        ))
        .await;

        for symbol in fresh {
            let eval = eval.clone();
            let orchestrator = self.orchestrator.clone();
            let exchange = self.ctx.exchange.clone();
            let limit = self.scanner.fetch_limit();
            let name = self.config.name.clone();
            let tasks = self.tasks.clone();
            self.tasks.spawn(async move {
                if let Err(e) =
                    judge_listing(&name, exchange, limit, eval, orchestrator, tasks, &symbol).await
                {
                    warn!(strategy = %name, symbol = %symbol, error = %e, "candidate abandoned");
                }
            });
        }
        Ok(())
    }

    /// Universe RSI sweep: rank candidates, then submit top-down until the
    /// admission gate closes.
    async fn tick_rsi(&self, eval: &RsiDailyEvaluator) -> Result<()> {
        let params = eval.params();
        let mut universe: Vec<String> = self
            .ctx
            .exchange
            .fetch_all_futures_symbols()
            .await?
            .into_iter()
            .collect();
        universe.sort();

        let snapshots = self
            .scanner
            .fetch_universe_ohlcv(&universe, params.timeframe, params.ohlcv_window())
            .await;
        let candidates = eval.evaluate(&snapshots);
        if candidates.is_empty() {
            return Ok(());
        }
        info!(
            strategy = %self.config.name,
            candidates = candidates.len(),
            top = %candidates[0].symbol,
            "breakout candidates ranked"
        );

        for candidate in candidates {
            if !self.orchestrator.admission_gate_open().await? {
                info!(strategy = %self.config.name, "position budget exhausted for this sweep");
                break;
            }
            self.orchestrator
                .execute_signal(&candidate.symbol, OrderSide::Buy, &self.tasks)
                .await?;
        }
        Ok(())
    }

    async fn notify(&self, body: &str) {
        let message = format!("### {} ###\n\n{body}", self.config.name);
        self.ctx.notifier.send_message(&message).await;
    }
}

/// Wait (bounded) for a fresh listing's first candles, then evaluate and
/// act on them.
async fn judge_listing(
    name: &str,
    exchange: Arc<dyn ExchangeService>,
    limit: Arc<Semaphore>,
    eval: ListingBackrunEvaluator,
    orchestrator: PositionOrchestrator,
    tasks: Arc<TaskRegistry>,
    symbol: &str,
) -> Result<()> {
    let params = eval.params();
    let candidate = match await_first_candles(
        &exchange,
        &limit,
        symbol,
        params.timeframe,
        params.ohlcv_window,
    )
    .await
    {
        Some(snapshot) => snapshot,
        None => {
            warn!(strategy = %name, symbol, "no candles appeared for new listing");
            return Ok(());
        }
    };
    let reference = {
        let _permit = limit.acquire().await.ok();
        exchange
            .fetch_ohlcv(&params.reference_symbol, params.timeframe, params.ohlcv_window)
            .await?
    };

    let rows = eval.enrich(&candidate, &reference);
    let signal = eval.evaluate(&rows);
    if let Some(side) = signal.side() {
        info!(strategy = %name, symbol, signal = %signal, "listing signal");
        orchestrator.execute_signal(symbol, side, &tasks).await?;
    } else {
        info!(strategy = %name, symbol, "listing candles did not qualify");
    }
    Ok(())
}

/// Poll for the first candles of a just-listed symbol. The exchange may
/// error or return nothing for a while after the listing announcement.
async fn await_first_candles(
    exchange: &Arc<dyn ExchangeService>,
    limit: &Semaphore,
    symbol: &str,
    timeframe: common::Timeframe,
    window: usize,
) -> Option<MarketSnapshot> {
    for _ in 0..FIRST_CANDLE_ATTEMPTS {
        // The permit covers the fetch only, never the sleep between polls.
        let fetched = {
            let _permit = limit.acquire().await.ok();
            exchange.fetch_ohlcv(symbol, timeframe, window).await
        };
        match fetched {
            Ok(snapshot) if !snapshot.is_empty() => return Some(snapshot),
            Ok(_) => {}
            Err(e) => {
                warn!(symbol, error = %e, "first-candle fetch failed");
            }
        }
        sleep(FIRST_CANDLE_INTERVAL).await;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        datetime_from_ms, Candle, DatabaseService, MarginMode, NotifierService, OpenOrderRequest,
        OrderHandle, OrderInfo, OrderSide, Position, PositionInfo, Timeframe,
    };
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use strategy::{ListingBackrunParams, RsiDailyParams, StrategyParams, TradingParams};

    use crate::scanner::DEFAULT_FETCH_CONCURRENCY;

    fn candles(symbol: &str, closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: symbol.to_string(),
                timestamp: datetime_from_ms(i as i64 * 86_400_000),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect()
    }

    /// Exchange double for sweep tests: scripted closes per symbol, and
    /// every created order immediately counts as an open position so the
    /// admission gate tightens as orders go out.
    #[derive(Default)]
    struct SweepExchange {
        closes: HashMap<String, Vec<f64>>,
        orders: Mutex<Vec<OpenOrderRequest>>,
    }

    #[async_trait]
    impl ExchangeService for SweepExchange {
        async fn fetch_ohlcv(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            _window: usize,
        ) -> common::Result<MarketSnapshot> {
            let closes = self.closes.get(symbol).cloned().unwrap_or_default();
            Ok(MarketSnapshot::new(symbol, candles(symbol, &closes)))
        }

        async fn fetch_all_futures_symbols(&self) -> common::Result<HashSet<String>> {
            Ok(self.closes.keys().cloned().collect())
        }

        async fn fetch_last_price(&self, _symbol: &str) -> common::Result<f64> {
            Ok(10.0)
        }

        async fn fetch_position(&self, _symbol: &str) -> common::Result<Option<PositionInfo>> {
            Ok(None)
        }

        async fn fetch_positions(&self) -> common::Result<Vec<PositionInfo>> {
            let orders = self.orders.lock().unwrap();
            Ok(orders
                .iter()
                .map(|o| PositionInfo {
                    symbol: o.symbol.clone(),
                    contracts: o.amount,
                    hold_side: o.side,
                    unrealized_pnl_pct: None,
                    net_profit: None,
                    open_avg_price: 10.0,
                    close_avg_price: None,
                    ctime_ms: 0,
                    utime_ms: 0,
                })
                .collect())
        }

        async fn fetch_positions_history(
            &self,
            _symbol: &str,
            _since_ms: i64,
        ) -> common::Result<Vec<PositionInfo>> {
            Ok(vec![])
        }

        async fn fetch_open_orders(
            &self,
            _symbol: Option<&str>,
        ) -> common::Result<Vec<OrderInfo>> {
            Ok(vec![])
        }

        async fn fetch_free_balance(&self) -> common::Result<f64> {
            Ok(1_000.0)
        }

        async fn set_margin_mode_and_leverage(
            &self,
            _symbol: &str,
            _margin_mode: MarginMode,
            _leverage: u32,
        ) -> common::Result<()> {
            Ok(())
        }

        async fn create_order(&self, request: &OpenOrderRequest) -> common::Result<OrderHandle> {
            self.orders.lock().unwrap().push(request.clone());
            Ok(OrderHandle {
                id: format!("o{}", self.orders.lock().unwrap().len()),
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

    struct NullDb;

    #[async_trait]
    impl DatabaseService for NullDb {
        async fn insert_position(&self, _position: &Position) -> common::Result<()> {
            Ok(())
        }

        async fn fetch_all_positions(&self) -> common::Result<Vec<Position>> {
            Ok(vec![])
        }
    }

    /// Exchange double for listing tests: a scripted sequence of universes,
    /// and OHLCV calls that track their own peak concurrency. Candles are
    /// flat, so no candidate ever produces a signal.
    struct ListingExchange {
        universes: Mutex<Vec<HashSet<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ListingExchange {
        fn new(universes: Vec<HashSet<String>>) -> Self {
            Self {
                universes: Mutex::new(universes),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeService for ListingExchange {
        async fn fetch_ohlcv(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            _window: usize,
        ) -> common::Result<MarketSnapshot> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(MarketSnapshot::new(
                symbol,
                candles(symbol, &[1.0, 1.0, 1.0, 1.0, 1.0]),
            ))
        }

        async fn fetch_all_futures_symbols(&self) -> common::Result<HashSet<String>> {
            let mut universes = self.universes.lock().unwrap();
            Ok(if universes.len() > 1 {
                universes.remove(0)
            } else {
                universes[0].clone()
            })
        }

        async fn fetch_last_price(&self, _symbol: &str) -> common::Result<f64> {
            Ok(1.0)
        }

        async fn fetch_position(&self, _symbol: &str) -> common::Result<Option<PositionInfo>> {
            Ok(None)
        }

        async fn fetch_positions(&self) -> common::Result<Vec<PositionInfo>> {
            Ok(vec![])
        }

        async fn fetch_positions_history(
            &self,
            _symbol: &str,
            _since_ms: i64,
        ) -> common::Result<Vec<PositionInfo>> {
            Ok(vec![])
        }

        async fn fetch_open_orders(
            &self,
            _symbol: Option<&str>,
        ) -> common::Result<Vec<OrderInfo>> {
            Ok(vec![])
        }

        async fn fetch_free_balance(&self) -> common::Result<f64> {
            Ok(0.0)
        }

        async fn set_margin_mode_and_leverage(
            &self,
            _symbol: &str,
            _margin_mode: MarginMode,
            _leverage: u32,
        ) -> common::Result<()> {
            Ok(())
        }

        async fn create_order(&self, _request: &OpenOrderRequest) -> common::Result<OrderHandle> {
            unimplemented!("flat candles never qualify for an order")
        }
    }

    /// Breakout series from the RSI fixtures: lag RSI 66.67 (< 72 cap),
    /// last RSI grows with `g` past the 72 threshold.
    fn breakout(g: f64) -> Vec<f64> {
        vec![100.0, 102.0, 101.0, 101.0 + g]
    }

    fn rsi_supervisor(
        exchange: Arc<SweepExchange>,
        notifier: Arc<RecordingNotifier>,
        max_positions: usize,
    ) -> StrategySupervisor {
        let ctx = StrategyContext {
            strategy_name: "rsi sweep".into(),
            exchange,
            notifier,
            database: Arc::new(NullDb),
        };
        let config = StrategyConfig {
            name: "rsi sweep".into(),
            symbol: "BTC/USDT:USDT".into(),
            params: StrategyParams::RsiDaily(RsiDailyParams {
                rsi_window: 2,
                rsi_threshold: 72.0,
                rsi_lag_cap: 72.0,
                timeframe: Timeframe::D1,
            }),
            trading: TradingParams {
                max_simultaneous_positions: max_positions,
                ..TradingParams::default()
            },
        };
        StrategySupervisor::new(ctx, config)
    }

    #[tokio::test(start_paused = true)]
    async fn rsi_sweep_submits_ranked_candidates_until_budget_exhausted() {
        let exchange = Arc::new(SweepExchange {
            closes: HashMap::from([
                ("SMALL/USDT:USDT".to_string(), breakout(1.0)),
                ("BIG/USDT:USDT".to_string(), breakout(5.0)),
                ("MID/USDT:USDT".to_string(), breakout(2.0)),
            ]),
            ..SweepExchange::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let mut supervisor = rsi_supervisor(exchange.clone(), notifier, 2);

        supervisor.tick().await.unwrap();
        supervisor.tasks.abort_all();

        let submitted: Vec<String> = exchange
            .orders
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.symbol.clone())
            .collect();
        assert_eq!(
            submitted,
            vec!["BIG/USDT:USDT".to_string(), "MID/USDT:USDT".to_string()],
            "only the two strongest breakouts fit the position budget"
        );
        assert!(exchange
            .orders
            .lock()
            .unwrap()
            .iter()
            .all(|o| o.side == OrderSide::Buy));
    }

    #[tokio::test(start_paused = true)]
    async fn rsi_sweep_with_room_takes_every_candidate_in_rank_order() {
        let exchange = Arc::new(SweepExchange {
            closes: HashMap::from([
                ("SMALL/USDT:USDT".to_string(), breakout(1.0)),
                ("BIG/USDT:USDT".to_string(), breakout(5.0)),
            ]),
            ..SweepExchange::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let mut supervisor = rsi_supervisor(exchange.clone(), notifier, 10);

        supervisor.tick().await.unwrap();
        supervisor.tasks.abort_all();

        let submitted: Vec<String> = exchange
            .orders
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.symbol.clone())
            .collect();
        assert_eq!(
            submitted,
            vec!["BIG/USDT:USDT".to_string(), "SMALL/USDT:USDT".to_string()]
        );
    }

    fn listing_supervisor(
        exchange: Arc<ListingExchange>,
        notifier: Arc<RecordingNotifier>,
    ) -> StrategySupervisor {
        let ctx = StrategyContext {
            strategy_name: "listing sweep".into(),
            exchange,
            notifier,
            database: Arc::new(NullDb),
        };
        let config = StrategyConfig {
            name: "listing sweep".into(),
            symbol: "BTC/USDT:USDT".into(),
            params: StrategyParams::ListingBackrun(ListingBackrunParams::default()),
            trading: TradingParams::default(),
        };
        StrategySupervisor::new(ctx, config)
    }

    #[tokio::test(start_paused = true)]
    async fn listing_burst_keeps_candle_fetches_under_the_shared_cap() {
        let listed: HashSet<String> = (0..50).map(|i| format!("L{i}/USDT:USDT")).collect();
        let exchange = Arc::new(ListingExchange::new(vec![HashSet::new(), listed]));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut supervisor = listing_supervisor(exchange.clone(), notifier);

        supervisor.scanner.bootstrap().await.unwrap();
        supervisor.tick().await.unwrap();
        // Let every spawned candidate task fetch its candles and finish.
        sleep(Duration::from_secs(120)).await;

        assert!(
            exchange.max_in_flight.load(Ordering::SeqCst) <= DEFAULT_FETCH_CONCURRENCY,
            "observed {} concurrent candle fetches",
            exchange.max_in_flight.load(Ordering::SeqCst)
        );
        assert!(supervisor.tasks.is_empty());
    }
}
