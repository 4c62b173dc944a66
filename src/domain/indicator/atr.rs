//! Average True Range (Wilder) and its rolling average.
//!
//! The first bar's true range is high - low. The seed is the mean of the first
//! n true ranges, then ATR[i] = (ATR[i-1] * (n-1) + TR[i]) / n.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_atr(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    if bars.len() < period || period == 0 {
        return IndicatorSeries::empty(IndicatorType::Atr(period));
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut results: Vec<IndicatorPoint> = Vec::with_capacity(bars.len());
    let mut atr = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let valid = i + 1 >= period;
        if i + 1 == period {
            atr = tr_values[..period].iter().sum::<f64>() / period as f64;
        } else if i + 1 > period {
            atr = (atr * (period - 1) as f64 + tr_values[i]) / period as f64;
        }
        results.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: IndicatorValue::Simple(if valid { atr } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values: results,
    }
}

/// Simple mean of the last `window` valid ATR values.
///
/// Used as the "normal" volatility level against which the current ATR is judged.
pub fn calculate_atr_average(bars: &[PriceBar], period: usize, window: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::AtrAverage { period, window };
    let atr = calculate_atr(bars, period);
    if atr.values.is_empty() || window == 0 {
        return IndicatorSeries::empty(indicator_type);
    }

    let first_valid = period - 1;
    let raw = atr.simple_values();
    let values = atr
        .values
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let valid = i + 1 >= first_valid + window;
            let avg = if valid {
                raw[i + 1 - window..=i].iter().sum::<f64>() / window as f64
            } else {
                0.0
            };
            IndicatorPoint {
                timestamp: point.timestamp,
                valid,
                value: IndicatorValue::Simple(avg),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}
