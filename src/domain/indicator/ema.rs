//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with first SMA, then EMA[i] = C[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_ema(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    if period == 0 || bars.is_empty() {
        return IndicatorSeries::empty(IndicatorType::Ema(period));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let raw = ema_of(&closes, period);

    let values = bars
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(i, (bar, ema))| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: i + 1 >= period,
            value: IndicatorValue::Simple(ema),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

/// EMA over an arbitrary input slice, 0.0 during warmup.
///
/// Shared by MACD (for the signal line) so both use the same SMA seed.
pub(crate) fn ema_of(inputs: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; inputs.len()];
    if period == 0 || inputs.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = inputs[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = ema;

    for i in period..inputs.len() {
        ema = inputs[i] * k + ema * (1.0 - k);
        out[i] = ema;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_bars::from_closes;

    fn value(series: &IndicatorSeries, i: usize) -> f64 {
        series.values[i].value.as_simple().unwrap()
    }

    #[test]
    fn ema_warmup() {
        let bars = from_closes(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        assert!(!series.values[0].valid);
        assert!(!series.values[1].valid);
        assert!(series.values[2].valid);
        assert!(series.values[3].valid);
        assert!(series.values[4].valid);
    }

    #[test]
    fn ema_period_1_tracks_close() {
        let bars = from_closes(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 1);

        assert!(series.values.iter().all(|p| p.valid));
        assert!((value(&series, 0) - 10.0).abs() < f64::EPSILON);
        assert!((value(&series, 1) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_seed_is_sma() {
        let bars = from_closes(&[10.0, 20.0, 30.0]);
        let series = calculate_ema(&bars, 3);

        let expected_sma = (10.0 + 20.0 + 30.0) / 3.0;
        assert!((value(&series, 2) - expected_sma).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_recursive_calculation() {
        let bars = from_closes(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        let series = calculate_ema(&bars, 3);

        let k = 2.0 / 4.0;
        let sma = 20.0;
        let ema_3 = 40.0 * k + sma * (1.0 - k);
        let ema_4 = 50.0 * k + ema_3 * (1.0 - k);

        assert!((value(&series, 3) - ema_3).abs() < f64::EPSILON);
        assert!((value(&series, 4) - ema_4).abs() < f64::EPSILON);
    }

    #[test]
    fn ema_equal_prices() {
        let bars = from_closes(&[100.0; 5]);
        let series = calculate_ema(&bars, 3);

        for i in 2..5 {
            assert!((value(&series, i) - 100.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn ema_empty_and_zero_period() {
        assert!(calculate_ema(&[], 3).values.is_empty());
        let bars = from_closes(&[10.0, 20.0]);
        assert!(calculate_ema(&bars, 0).values.is_empty());
    }

    #[test]
    fn ema_of_short_input_is_all_zero() {
        assert_eq!(ema_of(&[1.0, 2.0], 3), vec![0.0, 0.0]);
    }
}
