//! Stochastic oscillator.
//!
//! %K = 100 * (C - LL(k)) / (HH(k) - LL(k)), 50 when the range is zero.
//! %D = SMA(d) of %K.
//! Warmup: k - 1 + d - 1 bars.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_stochastic(bars: &[PriceBar], k_period: usize, d_period: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Stochastic { k_period, d_period };
    if k_period == 0 || d_period == 0 || bars.is_empty() {
        return IndicatorSeries::empty(indicator_type);
    }

    let mut k_values = vec![0.0; bars.len()];
    for i in (k_period - 1)..bars.len() {
        let window = &bars[i + 1 - k_period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = highest - lowest;
        k_values[i] = if range > 0.0 {
            100.0 * (bars[i].close - lowest) / range
        } else {
            50.0
        };
    }

    let warmup = k_period - 1 + d_period - 1;
    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let valid = i >= warmup;
            let (k, d) = if valid {
                let d = k_values[i + 1 - d_period..=i].iter().sum::<f64>() / d_period as f64;
                (k_values[i], d)
            } else {
                (0.0, 0.0)
            };
            IndicatorPoint {
                timestamp: bar.timestamp,
                valid,
                value: IndicatorValue::Stochastic { k, d },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}
