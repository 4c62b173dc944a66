//! Indicator engine: turns a bar window into the latest and previous indicator sets.
//!
//! Sets are recomputed from scratch on every call; nothing is cached between
//! calls, so the same window always yields the same sets.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::error::TradeguardError;
use crate::domain::indicator::{
    calculate_atr, calculate_atr_average, calculate_bollinger, calculate_ema, calculate_macd,
    calculate_roc, calculate_rsi, calculate_stochastic, IndicatorSeries, IndicatorType,
    IndicatorValue,
};
use crate::domain::ohlcv::{OhlcSeries, PriceBar};

/// Bars handed to the calculators when the series is longer than the lookback needs.
pub const DEFAULT_HISTORY_WINDOW: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_mult_x100: u32,
    pub atr_period: usize,
    pub atr_average_period: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub roc_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            ema_fast: 8,
            ema_slow: 21,
            ema_trend: 200,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_mult_x100: 200,
            atr_period: 14,
            atr_average_period: 50,
            stoch_k: 14,
            stoch_d: 3,
            roc_period: 10,
        }
    }
}

impl IndicatorConfig {
    /// Longest lookback plus one bar so that the previous set is also out of warmup.
    pub fn required_bars(&self) -> usize {
        let lookbacks = [
            self.ema_fast,
            self.ema_slow,
            self.ema_trend,
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal - 1,
            self.bollinger_period,
            self.atr_period + self.atr_average_period - 1,
            self.stoch_k + self.stoch_d - 1,
            self.roc_period + 1,
        ];
        lookbacks.into_iter().max().unwrap_or(0) + 1
    }

    pub fn ema_fast_type(&self) -> IndicatorType {
        IndicatorType::Ema(self.ema_fast)
    }

    pub fn ema_slow_type(&self) -> IndicatorType {
        IndicatorType::Ema(self.ema_slow)
    }

    pub fn ema_trend_type(&self) -> IndicatorType {
        IndicatorType::Ema(self.ema_trend)
    }

    pub fn rsi_type(&self) -> IndicatorType {
        IndicatorType::Rsi(self.rsi_period)
    }

    pub fn macd_type(&self) -> IndicatorType {
        IndicatorType::Macd {
            fast: self.macd_fast,
            slow: self.macd_slow,
            signal: self.macd_signal,
        }
    }

    pub fn bollinger_type(&self) -> IndicatorType {
        IndicatorType::Bollinger {
            period: self.bollinger_period,
            stddev_mult_x100: self.bollinger_mult_x100,
        }
    }

    pub fn atr_type(&self) -> IndicatorType {
        IndicatorType::Atr(self.atr_period)
    }

    pub fn atr_average_type(&self) -> IndicatorType {
        IndicatorType::AtrAverage {
            period: self.atr_period,
            window: self.atr_average_period,
        }
    }

    pub fn stochastic_type(&self) -> IndicatorType {
        IndicatorType::Stochastic {
            k_period: self.stoch_k,
            d_period: self.stoch_d,
        }
    }

    pub fn roc_type(&self) -> IndicatorType {
        IndicatorType::Roc(self.roc_period)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandReading {
    pub center: f64,
    pub upper: f64,
    pub lower: f64,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticReading {
    pub k: f64,
    pub d: f64,
}

/// Latest value of every configured indicator at one bar.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    config: IndicatorConfig,
    values: HashMap<IndicatorType, IndicatorValue>,
}

impl IndicatorSet {
    pub fn new(timestamp: DateTime<Utc>, close: f64, config: IndicatorConfig) -> Self {
        Self {
            timestamp,
            close,
            config,
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, indicator: IndicatorType, value: IndicatorValue) -> Self {
        self.values.insert(indicator, value);
        self
    }

    pub fn get(&self, indicator: &IndicatorType) -> Option<IndicatorValue> {
        self.values.get(indicator).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    fn simple(&self, indicator: IndicatorType) -> f64 {
        self.get(&indicator)
            .and_then(|v| v.as_simple())
            .unwrap_or(0.0)
    }

    pub fn ema_fast(&self) -> f64 {
        self.simple(self.config.ema_fast_type())
    }

    pub fn ema_slow(&self) -> f64 {
        self.simple(self.config.ema_slow_type())
    }

    pub fn ema_trend(&self) -> f64 {
        self.simple(self.config.ema_trend_type())
    }

    pub fn rsi(&self) -> f64 {
        self.simple(self.config.rsi_type())
    }

    pub fn atr(&self) -> f64 {
        self.simple(self.config.atr_type())
    }

    pub fn atr_average(&self) -> f64 {
        self.simple(self.config.atr_average_type())
    }

    pub fn roc(&self) -> f64 {
        self.simple(self.config.roc_type())
    }

    pub fn macd(&self) -> MacdReading {
        match self.get(&self.config.macd_type()) {
            Some(IndicatorValue::Macd {
                line,
                signal,
                histogram,
            }) => MacdReading {
                line,
                signal,
                histogram,
            },
            _ => MacdReading {
                line: 0.0,
                signal: 0.0,
                histogram: 0.0,
            },
        }
    }

    pub fn bollinger(&self) -> BandReading {
        match self.get(&self.config.bollinger_type()) {
            Some(IndicatorValue::Bollinger {
                upper,
                middle,
                lower,
                width,
            }) => BandReading {
                center: middle,
                upper,
                lower,
                width,
            },
            _ => BandReading {
                center: self.close,
                upper: self.close,
                lower: self.close,
                width: 0.0,
            },
        }
    }

    pub fn stochastic(&self) -> StochasticReading {
        match self.get(&self.config.stochastic_type()) {
            Some(IndicatorValue::Stochastic { k, d }) => StochasticReading { k, d },
            _ => StochasticReading { k: 50.0, d: 50.0 },
        }
    }
}

/// The set at the latest bar and the one before it, for slope checks.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub current: IndicatorSet,
    pub previous: IndicatorSet,
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    history_window: usize,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, bars: usize) -> Self {
        self.history_window = bars;
        self
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn required_bars(&self) -> usize {
        self.config.required_bars()
    }

    pub fn compute(&self, series: &OhlcSeries) -> Result<IndicatorSnapshot, TradeguardError> {
        let required = self.required_bars();
        let bars = series.window(self.history_window.max(required));
        if bars.len() < required {
            return Err(TradeguardError::InsufficientHistory {
                timeframe: series.timeframe,
                bars: bars.len(),
                required,
            });
        }
        self.compute_window(bars).ok_or(TradeguardError::InsufficientHistory {
            timeframe: series.timeframe,
            bars: bars.len(),
            required,
        })
    }

    fn compute_window(&self, bars: &[PriceBar]) -> Option<IndicatorSnapshot> {
        let c = &self.config;
        let all: Vec<IndicatorSeries> = vec![
            calculate_ema(bars, c.ema_fast),
            calculate_ema(bars, c.ema_slow),
            calculate_ema(bars, c.ema_trend),
            calculate_rsi(bars, c.rsi_period),
            calculate_macd(bars, c.macd_fast, c.macd_slow, c.macd_signal),
            calculate_bollinger(bars, c.bollinger_period, c.bollinger_mult_x100),
            calculate_atr(bars, c.atr_period),
            calculate_atr_average(bars, c.atr_period, c.atr_average_period),
            calculate_stochastic(bars, c.stoch_k, c.stoch_d),
            calculate_roc(bars, c.roc_period),
        ];

        let last = bars.len() - 1;
        let current = self.set_at(bars, &all, last)?;
        let previous = self.set_at(bars, &all, last - 1)?;
        Some(IndicatorSnapshot { current, previous })
    }

    fn set_at(
        &self,
        bars: &[PriceBar],
        all: &[IndicatorSeries],
        index: usize,
    ) -> Option<IndicatorSet> {
        let mut set = IndicatorSet::new(bars[index].timestamp, bars[index].close, self.config);
        for series in all {
            set.values
                .insert(series.indicator_type, series.valid_at(index)?);
        }
        Some(set)
    }
}
