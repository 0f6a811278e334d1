//! Risk math shared by every strategy: take-profit / stop-loss price levels
//! and equity-based position sizing.
//!
//! All of it is pure and deterministic; the orchestrator feeds it live prices
//! and balances and submits the result, so nothing in here touches the
//! exchange.

use common::{Error, OrderSide, Result};

/// Price level at which the exchange should close the position in profit.
///
/// The target percentage is divided by leverage so the configured figure is a
/// return on margin, not on notional. Returns 0.0 when there is no side.
pub fn take_profit_price(
    price: f64,
    side: Option<OrderSide>,
    take_profit_pct: f64,
    leverage: u32,
) -> f64 {
    let adjustment = (take_profit_pct / 100.0) / leverage.max(1) as f64;
    match side {
        Some(OrderSide::Buy) => price * (1.0 + adjustment),
        Some(OrderSide::Sell) => price * (1.0 - adjustment),
        None => 0.0,
    }
}

/// Price level at which the exchange should cut the position at a loss.
/// Mirror image of [`take_profit_price`].
pub fn stop_loss_price(
    price: f64,
    side: Option<OrderSide>,
    stop_loss_pct: f64,
    leverage: u32,
) -> f64 {
    let adjustment = (stop_loss_pct / 100.0) / leverage.max(1) as f64;
    match side {
        Some(OrderSide::Buy) => price * (1.0 - adjustment),
        Some(OrderSide::Sell) => price * (1.0 + adjustment),
        None => 0.0,
    }
}

/// Base-asset amount to buy with `equity_trade_pct` percent of free equity
/// at the given price.
pub fn position_size(free_equity: f64, equity_trade_pct: f64, price: f64) -> Result<f64> {
    if price <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "cannot size a position at price {price}"
        )));
    }
    Ok(free_equity * equity_trade_pct / 100.0 / price)
}
