/// rolling.rs — Trailing-window statistics shared by the strategies
///
/// Windows end at (and include) the current bar, so a value at t never
/// depends on bars after t.  NaN observations are skipped; a window with
/// fewer than `min_periods` observations yields NaN.
use statrs::statistics::Statistics;

pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling(values, window, min_periods.max(1), |obs| obs.mean())
}

/// Sample standard deviation (n−1) over the trailing window.
pub fn rolling_std(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling(values, window, min_periods.max(2), |obs| obs.std_dev())
}

fn rolling(values: &[f64], window: usize, min_periods: usize, stat: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|t| {
            let start = (t + 1).saturating_sub(window);
            let obs: Vec<f64> = values[start..=t].iter().copied().filter(|v| !v.is_nan()).collect();
            if obs.len() < min_periods { f64::NAN } else { stat(&obs) }
        })
        .collect()
}

/// OLS slope of `y` on `x` with an intercept, over rows where both are finite.
pub fn ols_slope(y: &[f64], x: &[f64]) -> Option<f64> {
    let (ys, xs): (Vec<f64>, Vec<f64>) = y
        .iter()
        .zip(x)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip();
    if xs.len() < 2 {
        return None;
    }
    let (x_bar, y_bar) = (xs.as_slice().mean(), ys.as_slice().mean());
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - x_bar) * (y - y_bar)).sum();
    let sxx: f64 = xs.iter().map(|x| (x - x_bar).powi(2)).sum();
    (sxx > 0.0).then(|| sxy / sxx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_with_min_periods_one() {
        let m = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 3, 1);
        assert_eq!(m, vec![1.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn std_needs_full_window() {
        let s = rolling_std(&[1.0, 2.0, 3.0, 5.0], 3, 3);
        assert!(s[0].is_nan() && s[1].is_nan());
        assert!((s[2] - 1.0).abs() < 1e-12);
        // 2, 3, 5 → mean 10/3, sample var 7/3
        assert!((s[3] - (7.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn nan_observations_are_skipped() {
        let m = rolling_mean(&[f64::NAN, 2.0, 4.0], 2, 2);
        assert!(m[0].is_nan() && m[1].is_nan());
        assert_eq!(m[2], 3.0);
    }

    #[test]
    fn slope_of_exact_line() {
        let x = [1.0, 2.0, 3.0, 4.0, f64::NAN];
        let y = [3.0, 5.0, 7.0, 9.0, 1.0];
        assert!((ols_slope(&y, &x).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(ols_slope(&[1.0, 1.0], &[2.0, 2.0]), None);
    }
}
