//! Universe scanning: new-listing detection and bounded-concurrency OHLCV
//! fan-out over the whole futures universe.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use common::{ExchangeService, MarketSnapshot, Result, Timeframe};

/// Cap on in-flight OHLCV requests during a universe sweep.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 20;

/// Symbols in `current` that were absent from `known`, in stable order.
pub fn diff_symbols(known: &HashSet<String>, current: &HashSet<String>) -> Vec<String> {
    let mut fresh: Vec<String> = current.difference(known).cloned().collect();
    fresh.sort();
    fresh
}

/// Tracks the known futures universe and surfaces newly listed symbols.
///
/// The first sweep after start only seeds the baseline, so symbols listed
/// while the bot was down are never mistaken for fresh listings.
pub struct CandidateScanner {
    exchange: Arc<dyn ExchangeService>,
    known: HashSet<String>,
    limit: Arc<Semaphore>,
}

impl CandidateScanner {
    pub fn new(exchange: Arc<dyn ExchangeService>) -> Self {
        Self {
            exchange,
            known: HashSet::new(),
            limit: Arc::new(Semaphore::new(DEFAULT_FETCH_CONCURRENCY)),
        }
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    /// Shared request cap. Tasks fetching candles outside a universe sweep
    /// take permits from the same semaphore, so the cap holds across the
    /// whole strategy instance.
    pub fn fetch_limit(&self) -> Arc<Semaphore> {
        self.limit.clone()
    }

    /// Seed the baseline universe without reporting anything as new.
    pub async fn bootstrap(&mut self) -> Result<()> {
        self.known = self.exchange.fetch_all_futures_symbols().await?;
        debug!(universe = self.known.len(), "scanner baseline seeded");
        Ok(())
    }

    /// One sweep: fetch the universe, fold it into the baseline and return
    /// the symbols that were not known before.
    pub async fn scan(&mut self) -> Result<Vec<String>> {
        let current = self.exchange.fetch_all_futures_symbols().await?;
        let fresh = diff_symbols(&self.known, &current);
        // Delisted symbols stay in the baseline on purpose; a relisting is
        // not a new listing.
        self.known.extend(current);
        Ok(fresh)
    }

    /// Fetch recent candles for every symbol in `symbols`, at most
    /// `DEFAULT_FETCH_CONCURRENCY` requests in flight. Failed or too-short
    /// snapshots are dropped; a warning fires when more than 10% of the
    /// universe failed.
    pub async fn fetch_universe_ohlcv(
        &self,
        symbols: &[String],
        timeframe: Timeframe,
        window: usize,
    ) -> Vec<MarketSnapshot> {
        let fetches = symbols.iter().map(|symbol| {
            let exchange = self.exchange.clone();
            let limit = self.limit.clone();
            let symbol = symbol.clone();
            async move {
                // Semaphore is never closed, acquire cannot fail.
                let _permit = limit.acquire().await.ok();
                match exchange.fetch_ohlcv(&symbol, timeframe, window).await {
                    Ok(snapshot) if snapshot.len() >= window => Some(snapshot),
                    Ok(snapshot) => {
                        debug!(
                            symbol = %symbol,
                            have = snapshot.len(),
                            need = window,
                            "dropping short snapshot"
                        );
                        None
                    }
                    Err(e) => {
                        debug!(symbol = %symbol, error = %e, "universe fetch failed");
                        None
                    }
                }
            }
        });

        let snapshots: Vec<MarketSnapshot> =
            join_all(fetches).await.into_iter().flatten().collect();

        let failed = symbols.len().saturating_sub(snapshots.len());
        if !symbols.is_empty() && failed * 10 > symbols.len() {
            warn!(
                failed,
                total = symbols.len(),
                "more than 10% of universe fetches were dropped"
            );
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{
        Candle, MarginMode, OpenOrderRequest, OrderHandle, OrderInfo, PositionInfo,
        datetime_from_ms,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    fn set(symbols: &[&str]) -> HashSet<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_reports_only_unknown_symbols_sorted() {
        let known = set(&["BTC/USDT:USDT", "ETH/USDT:USDT"]);
        let current = set(&["ETH/USDT:USDT", "NEW/USDT:USDT", "AAA/USDT:USDT"]);
        assert_eq!(
            diff_symbols(&known, &current),
            vec!["AAA/USDT:USDT".to_string(), "NEW/USDT:USDT".to_string()]
        );
    }

    #[test]
    fn diff_is_empty_when_nothing_changed() {
        let known = set(&["BTC/USDT:USDT"]);
        assert!(diff_symbols(&known, &known.clone()).is_empty());
    }

    /// Exchange double whose universe can be swapped between scans and whose
    /// OHLCV calls count their own concurrency.
    struct UniverseExchange {
        universes: Mutex<Vec<HashSet<String>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        candles_per_symbol: usize,
    }

    impl UniverseExchange {
        fn new(universes: Vec<HashSet<String>>, candles_per_symbol: usize) -> Self {
            Self {
                universes: Mutex::new(universes),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                candles_per_symbol,
            }
        }
    }

    #[async_trait]
    impl ExchangeService for UniverseExchange {
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

            let candles = (0..self.candles_per_symbol)
                .map(|i| Candle {
                    symbol: symbol.to_string(),
                    timestamp: datetime_from_ms(i as i64 * 60_000),
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1.0,
                })
                .collect();
            Ok(MarketSnapshot::new(symbol, candles))
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
            unimplemented!("scanner tests never place orders")
        }
    }

    #[tokio::test]
    async fn bootstrap_then_scan_reports_new_listing_once() {
        let exchange = Arc::new(UniverseExchange::new(
            vec![
                set(&["BTC/USDT:USDT", "ETH/USDT:USDT"]),
                set(&["BTC/USDT:USDT", "ETH/USDT:USDT", "NEW/USDT:USDT"]),
                set(&["BTC/USDT:USDT", "ETH/USDT:USDT", "NEW/USDT:USDT"]),
            ],
            0,
        ));
        let mut scanner = CandidateScanner::new(exchange);

        scanner.bootstrap().await.unwrap();
        assert_eq!(scanner.known_len(), 2);

        let fresh = scanner.scan().await.unwrap();
        assert_eq!(fresh, vec!["NEW/USDT:USDT".to_string()]);

        // Same universe again: no repeat report.
        let fresh = scanner.scan().await.unwrap();
        assert!(fresh.is_empty());
    }

    #[tokio::test]
    async fn universe_fetch_respects_concurrency_cap() {
        let symbols: Vec<String> = (0..100).map(|i| format!("S{i}/USDT:USDT")).collect();
        let exchange = Arc::new(UniverseExchange::new(vec![HashSet::new()], 3));
        let scanner = CandidateScanner::new(exchange.clone());

        let snapshots = scanner
            .fetch_universe_ohlcv(&symbols, Timeframe::D1, 3)
            .await;

        assert_eq!(snapshots.len(), 100);
        assert!(
            exchange.max_in_flight.load(Ordering::SeqCst) <= DEFAULT_FETCH_CONCURRENCY,
            "observed {} concurrent fetches",
            exchange.max_in_flight.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn short_snapshots_are_dropped() {
        let symbols: Vec<String> = vec!["A/USDT:USDT".into(), "B/USDT:USDT".into()];
        let exchange = Arc::new(UniverseExchange::new(vec![HashSet::new()], 2));
        let scanner = CandidateScanner::new(exchange);

        let snapshots = scanner
            .fetch_universe_ohlcv(&symbols, Timeframe::D1, 5)
            .await;
        assert!(snapshots.is_empty());
    }
}
