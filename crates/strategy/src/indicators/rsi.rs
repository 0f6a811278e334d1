//! RSI (Relative Strength Index) over a close series.
//!
//! Uses Wilder's smoothed moving average (same as TradingView / standard
//! RSI). The output is aligned with the input; positions before `window`
//! changes have accumulated are `None`.

pub fn rsi_series(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window < 2 || closes.len() < window + 1 {
        return out;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let initial = &changes[..window];
    let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / window as f64;
    let mut avg_loss =
        initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / window as f64;
    out[window] = Some(rsi_value(avg_gain, avg_loss));

    for (i, &change) in changes.iter().enumerate().skip(window) {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (window - 1) as f64 + gain) / window as f64;
        avg_loss = (avg_loss * (window - 1) as f64 + loss) / window as f64;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }

    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
