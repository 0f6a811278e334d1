//! Rolling-window series helpers.
//!
//! All functions return a vector aligned with the input: positions where the
//! window is incomplete (or contains an undefined value) hold `None`. Short
//! or empty inputs yield all-`None` output rather than failing.

/// Simple moving average over a window of raw values.
pub fn sma_series(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_mean(&values.iter().map(|&v| Some(v)).collect::<Vec<_>>(), window)
}

/// Rolling mean over a series that may already contain gaps.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Rolling population standard deviation (ddof = 0).
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| {
        let mean = w.iter().sum::<f64>() / w.len() as f64;
        let var = w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / w.len() as f64;
        var.sqrt()
    })
}

/// Element-wise ratio of two aligned series, `None` where either side is
/// undefined or the denominator is zero.
pub fn ratio_series(numer: &[Option<f64>], denom: &[Option<f64>]) -> Vec<Option<f64>> {
    numer
        .iter()
        .zip(denom)
        .map(|(n, d)| match (n, d) {
            (Some(n), Some(d)) if *d != 0.0 => Some(n / d),
            _ => None,
        })
        .collect()
}

fn rolling<F>(values: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    let mut buf = Vec::with_capacity(window);
    for i in (window - 1)..values.len() {
        buf.clear();
        let slice = &values[i + 1 - window..=i];
        if slice.iter().all(|v| v.is_some()) {
            buf.extend(slice.iter().flatten());
            out[i] = Some(f(&buf));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_warms_up_then_averages() {
        let series = sma_series(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(series, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn sma_on_short_input_is_all_none() {
        assert!(sma_series(&[1.0, 2.0], 5).iter().all(|v| v.is_none()));
        assert!(sma_series(&[], 5).is_empty());
    }

    #[test]
    fn rolling_std_uses_population_variance() {
        let values: Vec<Option<f64>> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .map(|&v| Some(v))
            .collect();
        let std = rolling_std(&values, 8);
        // Known population stdev of this series is exactly 2.
        assert!((std[7].unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn gaps_poison_only_their_windows() {
        let values = vec![Some(1.0), None, Some(3.0), Some(5.0)];
        let mean = rolling_mean(&values, 2);
        assert_eq!(mean, vec![None, None, None, Some(4.0)]);
    }

    #[test]
    fn ratio_skips_zero_denominators() {
        let ratio = ratio_series(&[Some(4.0), Some(2.0)], &[Some(2.0), Some(0.0)]);
        assert_eq!(ratio, vec![Some(2.0), None]);
    }
}
