pub mod rsi;
pub mod sma;

pub use rsi::rsi_series;
pub use sma::{ratio_series, rolling_mean, rolling_std, sma_series};
