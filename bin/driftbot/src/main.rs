use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{Config, DatabaseService, ExchangeService, NotifierService, TradingMode};
use engine::{BitgetClient, StrategyContext, StrategySupervisor};
use notifier::TelegramNotifier;
use paper::{MemoryStore, NullNotifier, PaperExchange};
use store::SqliteStore;
use strategy::StrategyFileConfig;

const PAPER_STARTING_BALANCE: f64 = 10_000.0;
const PAPER_SLIPPAGE_BPS: f64 = 2.0;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "DriftBot starting");

    let strategies = StrategyFileConfig::load(&cfg.strategy_config_path)
        .unwrap_or_else(|e| panic!("Failed to load strategy config: {e}"));
    info!(
        strategies = strategies.strategies.len(),
        path = %cfg.strategy_config_path,
        "Strategy config loaded"
    );

    // ── Services (injected based on TRADING_MODE) ─────────────────────────────
    let bitget = Arc::new(BitgetClient::new(
        &cfg.bitget_api_key,
        &cfg.bitget_secret,
        &cfg.bitget_passphrase,
    ));

    let (exchange, notifier, database): (
        Arc<dyn ExchangeService>,
        Arc<dyn NotifierService>,
        Arc<dyn DatabaseService>,
    ) = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode — orders go to Bitget");
            let database = SqliteStore::connect(&cfg.database_url)
                .await
                .unwrap_or_else(|e| panic!("Failed to open position store: {e}"));
            (
                bitget,
                Arc::new(TelegramNotifier::new(
                    cfg.telegram_token.clone(),
                    cfg.telegram_chat_id,
                )),
                Arc::new(database),
            )
        }
        TradingMode::Paper => {
            info!("Paper trading mode — simulated account over live market data");
            (
                Arc::new(PaperExchange::new(
                    bitget,
                    PAPER_STARTING_BALANCE,
                    PAPER_SLIPPAGE_BPS,
                )),
                Arc::new(NullNotifier),
                Arc::new(MemoryStore::default()),
            )
        }
    };

    // ── Supervisors, one per configured strategy ──────────────────────────────
    let mut handles = Vec::new();
    for config in strategies.strategies {
        let ctx = StrategyContext {
            strategy_name: config.name.clone(),
            exchange: exchange.clone(),
            notifier: notifier.clone(),
            database: database.clone(),
        };
        handles.push(StrategySupervisor::new(ctx, config).start());
    }
    info!(supervisors = handles.len(), "All supervisors started");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("Shutdown signal received, stopping supervisors");
    for handle in handles {
        handle.stop().await;
    }
    info!("Shutdown complete");
}
