use crate::TradingMode;

/// All process-level configuration loaded from environment variables at
/// startup. Missing required variables cause an immediate panic with a clear
/// message — the only failure mode allowed before the supervisor loops start.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials
    pub bitget_api_key: String,
    pub bitget_secret: String,
    pub bitget_passphrase: String,

    // Telegram
    pub telegram_token: String,
    pub telegram_chat_id: i64,

    // Trading
    pub trading_mode: TradingMode,

    // Database
    pub database_url: String,

    // Strategy config file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let telegram_chat_id = required_env("TELEGRAM_CHAT_ID")
            .parse::<i64>()
            .unwrap_or_else(|_| panic!("TELEGRAM_CHAT_ID must be a numeric chat id"));

        Config {
            bitget_api_key: required_env("BITGET_API_KEY"),
            bitget_secret: required_env("BITGET_SECRET"),
            bitget_passphrase: required_env("BITGET_PASSPHRASE"),
            telegram_token: required_env("TELEGRAM_TOKEN"),
            telegram_chat_id,
            trading_mode,
            database_url: required_env("DATABASE_URL"),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
