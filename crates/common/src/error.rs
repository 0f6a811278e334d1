use thiserror::Error;

/// Failure taxonomy for the whole bot.
///
/// `Config` aborts the process before the supervisor loop starts. `Exchange`
/// is transient: the current iteration is abandoned and the loop continues
/// after a backoff. `Timeout` and `Persistence` are terminal for one symbol's
/// lifecycle task only and must never take down sibling tasks.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("Order rejected by exchange: {0}")]
    OrderRejected(String),

    #[error("Order for {symbol} not filled within {waited_secs}s")]
    Timeout { symbol: String, waited_secs: u64 },

    #[error("Failed to persist position for {symbol}: {source}")]
    Persistence {
        symbol: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures that should only abort the current loop iteration.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Exchange(_) | Error::Http(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
