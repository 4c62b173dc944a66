//! Per-timeframe directional vote from trend-following indicator rules.
//!
//! Each rule adds its weight to the BUY or SELL tally. Oscillators only count
//! while they sit inside their non-extreme band and move with the trend; an
//! extreme reading is treated as no evidence, never as a reversal call.

use std::fmt;
use std::str::FromStr;

use crate::domain::indicator_set::{IndicatorSet, IndicatorSnapshot};
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Buy,
    Sell,
    None,
}

impl Action {
    pub fn is_directional(&self) -> bool {
        !matches!(self, Action::None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::None => "NONE",
        };
        f.write_str(s)
    }
}

/// What to do when the BUY and SELL tallies are exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    #[default]
    None,
    /// Follow the sign of the rate-of-change reading.
    Momentum,
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TieBreak::None),
            "momentum" => Ok(TieBreak::Momentum),
            _ => Err(format!("unknown tie-break policy '{s}'")),
        }
    }
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::None => f.write_str("none"),
            TieBreak::Momentum => f.write_str("momentum"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleWeights {
    pub ema_cross: u32,
    pub price_ema: u32,
    pub trend_ema: u32,
    pub macd: u32,
    pub macd_histogram: u32,
    pub rsi: u32,
    pub stochastic: u32,
    pub bollinger: u32,
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            ema_cross: 2,
            price_ema: 1,
            trend_ema: 1,
            macd: 1,
            macd_histogram: 1,
            rsi: 1,
            stochastic: 1,
            bollinger: 1,
        }
    }
}

impl RuleWeights {
    pub fn total(&self) -> u32 {
        self.ema_cross
            + self.price_ema
            + self.trend_ema
            + self.macd
            + self.macd_histogram
            + self.rsi
            + self.stochastic
            + self.bollinger
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub weights: RuleWeights,
    pub rsi_extreme_low: f64,
    pub rsi_extreme_high: f64,
    pub rsi_buy_floor: f64,
    pub rsi_sell_ceiling: f64,
    pub stoch_extreme_low: f64,
    pub stoch_extreme_high: f64,
    pub signal_threshold: u32,
    pub tie_break: TieBreak,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: RuleWeights::default(),
            rsi_extreme_low: 20.0,
            rsi_extreme_high: 80.0,
            rsi_buy_floor: 40.0,
            rsi_sell_ceiling: 60.0,
            stoch_extreme_low: 20.0,
            stoch_extreme_high: 80.0,
            signal_threshold: 4,
            tie_break: TieBreak::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeVote {
    pub direction: Action,
    pub score: u32,
    pub timeframe: Timeframe,
    pub buy_tally: u32,
    pub sell_tally: u32,
    /// Rules that fired for the winning direction.
    pub fired: Vec<&'static str>,
}

impl TimeframeVote {
    pub fn none(timeframe: Timeframe) -> Self {
        Self {
            direction: Action::None,
            score: 0,
            timeframe,
            buy_tally: 0,
            sell_tally: 0,
            fired: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Tally {
    points: u32,
    fired: Vec<&'static str>,
}

impl Tally {
    fn add(&mut self, name: &'static str, weight: u32) {
        if weight > 0 {
            self.points += weight;
            self.fired.push(name);
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeframeScorer {
    config: ScoringConfig,
}

impl TimeframeScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Highest tally one direction can reach.
    pub fn max_score(&self) -> u32 {
        self.config.weights.total()
    }

    pub fn score(&self, timeframe: Timeframe, snapshot: &IndicatorSnapshot) -> TimeframeVote {
        let (buy, sell) = self.tally(&snapshot.current, &snapshot.previous);

        let direction = if buy.points > sell.points {
            Action::Buy
        } else if sell.points > buy.points {
            Action::Sell
        } else {
            self.break_tie(buy.points, &snapshot.current)
        };

        let (score, fired) = match direction {
            Action::Buy => (buy.points, buy.fired),
            Action::Sell => (sell.points, sell.fired),
            Action::None => (0, Vec::new()),
        };

        if direction == Action::None || score < self.config.signal_threshold {
            return TimeframeVote {
                buy_tally: buy.points,
                sell_tally: sell.points,
                ..TimeframeVote::none(timeframe)
            };
        }

        TimeframeVote {
            direction,
            score,
            timeframe,
            buy_tally: buy.points,
            sell_tally: sell.points,
            fired,
        }
    }

    fn break_tie(&self, tied_points: u32, current: &IndicatorSet) -> Action {
        if tied_points == 0 {
            return Action::None;
        }
        match self.config.tie_break {
            TieBreak::None => Action::None,
            TieBreak::Momentum => {
                let roc = current.roc();
                if roc > 0.0 {
                    Action::Buy
                } else if roc < 0.0 {
                    Action::Sell
                } else {
                    Action::None
                }
            }
        }
    }

    fn tally(&self, cur: &IndicatorSet, prev: &IndicatorSet) -> (Tally, Tally) {
        let w = &self.config.weights;
        let c = &self.config;
        let mut buy = Tally::default();
        let mut sell = Tally::default();
        let close = cur.close;

        let (fast, slow, prev_fast) = (cur.ema_fast(), cur.ema_slow(), prev.ema_fast());
        if fast > slow && fast > prev_fast {
            buy.add("ema_cross", w.ema_cross);
        } else if fast < slow && fast < prev_fast {
            sell.add("ema_cross", w.ema_cross);
        }

        if close > fast {
            buy.add("price_ema", w.price_ema);
        } else if close < fast {
            sell.add("price_ema", w.price_ema);
        }

        let trend = cur.ema_trend();
        if close > trend {
            buy.add("trend_ema", w.trend_ema);
        } else if close < trend {
            sell.add("trend_ema", w.trend_ema);
        }

        let (macd, prev_macd) = (cur.macd(), prev.macd());
        if macd.line > macd.signal {
            buy.add("macd", w.macd);
        } else if macd.line < macd.signal {
            sell.add("macd", w.macd);
        }
        if macd.histogram > 0.0 && macd.histogram > prev_macd.histogram {
            buy.add("macd_histogram", w.macd_histogram);
        } else if macd.histogram < 0.0 && macd.histogram < prev_macd.histogram {
            sell.add("macd_histogram", w.macd_histogram);
        }

        let (rsi, prev_rsi) = (cur.rsi(), prev.rsi());
        if rsi > c.rsi_extreme_low && rsi < c.rsi_extreme_high {
            if rsi >= c.rsi_buy_floor && rsi > prev_rsi {
                buy.add("rsi", w.rsi);
            } else if rsi <= c.rsi_sell_ceiling && rsi < prev_rsi {
                sell.add("rsi", w.rsi);
            }
        }

        let (stoch, prev_stoch) = (cur.stochastic(), prev.stochastic());
        if stoch.k > c.stoch_extreme_low && stoch.k < c.stoch_extreme_high {
            if stoch.k > stoch.d && stoch.k > prev_stoch.k {
                buy.add("stochastic", w.stochastic);
            } else if stoch.k < stoch.d && stoch.k < prev_stoch.k {
                sell.add("stochastic", w.stochastic);
            }
        }

        let (bands, prev_bands) = (cur.bollinger(), prev.bollinger());
        if close > bands.center && close < bands.upper && bands.center > prev_bands.center {
            buy.add("bollinger", w.bollinger);
        } else if close < bands.center && close > bands.lower && bands.center < prev_bands.center {
            sell.add("bollinger", w.bollinger);
        }

        (buy, sell)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::indicator::IndicatorValue;
    use crate::domain::indicator_set::{IndicatorConfig, IndicatorSet, IndicatorSnapshot};

    /// Readings for one bar, enough to drive every scoring rule.
    #[derive(Debug, Clone, Copy)]
    pub struct Reading {
        pub close: f64,
        pub ema_fast: f64,
        pub ema_slow: f64,
        pub ema_trend: f64,
        pub macd_line: f64,
        pub macd_signal: f64,
        pub macd_hist: f64,
        pub rsi: f64,
        pub stoch_k: f64,
        pub stoch_d: f64,
        pub bb_center: f64,
        pub bb_upper: f64,
        pub bb_lower: f64,
        pub atr: f64,
        pub atr_avg: f64,
        pub roc: f64,
    }

    impl Reading {
        /// Every rule neutral: nothing fires.
        pub fn neutral() -> Self {
            Self {
                close: 1.1,
                ema_fast: 1.1,
                ema_slow: 1.1,
                ema_trend: 1.1,
                macd_line: 0.0,
                macd_signal: 0.0,
                macd_hist: 0.0,
                rsi: 50.0,
                stoch_k: 50.0,
                stoch_d: 50.0,
                bb_center: 1.1,
                bb_upper: 1.11,
                bb_lower: 1.09,
                atr: 0.001,
                atr_avg: 0.001,
                roc: 0.0,
            }
        }

        pub fn set(&self, minute: i64) -> IndicatorSet {
            let cfg = IndicatorConfig::default();
            let ts = Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap() + Duration::minutes(minute);
            IndicatorSet::new(ts, self.close, cfg)
                .with_value(cfg.ema_fast_type(), IndicatorValue::Simple(self.ema_fast))
                .with_value(cfg.ema_slow_type(), IndicatorValue::Simple(self.ema_slow))
                .with_value(cfg.ema_trend_type(), IndicatorValue::Simple(self.ema_trend))
                .with_value(
                    cfg.macd_type(),
                    IndicatorValue::Macd {
                        line: self.macd_line,
                        signal: self.macd_signal,
                        histogram: self.macd_hist,
                    },
                )
                .with_value(cfg.rsi_type(), IndicatorValue::Simple(self.rsi))
                .with_value(
                    cfg.stochastic_type(),
                    IndicatorValue::Stochastic {
                        k: self.stoch_k,
                        d: self.stoch_d,
                    },
                )
                .with_value(
                    cfg.bollinger_type(),
                    IndicatorValue::Bollinger {
                        upper: self.bb_upper,
                        middle: self.bb_center,
                        lower: self.bb_lower,
                        width: (self.bb_upper - self.bb_lower) / self.bb_center,
                    },
                )
                .with_value(cfg.atr_type(), IndicatorValue::Simple(self.atr))
                .with_value(cfg.atr_average_type(), IndicatorValue::Simple(self.atr_avg))
                .with_value(cfg.roc_type(), IndicatorValue::Simple(self.roc))
        }
    }

    pub fn snapshot(prev: Reading, cur: Reading) -> IndicatorSnapshot {
        IndicatorSnapshot {
            current: cur.set(1),
            previous: prev.set(0),
        }
    }

    /// A clean uptrend where every BUY rule fires.
    pub fn bullish() -> IndicatorSnapshot {
        let prev = Reading {
            close: 1.1010,
            ema_fast: 1.1000,
            ema_slow: 1.0990,
            ema_trend: 1.0900,
            macd_line: 0.0008,
            macd_signal: 0.0005,
            macd_hist: 0.0003,
            rsi: 55.0,
            stoch_k: 60.0,
            stoch_d: 55.0,
            bb_center: 1.0995,
            bb_upper: 1.1030,
            bb_lower: 1.0960,
            ..Reading::neutral()
        };
        let cur = Reading {
            close: 1.1020,
            ema_fast: 1.1005,
            ema_slow: 1.0992,
            macd_line: 0.0010,
            macd_signal: 0.0006,
            macd_hist: 0.0004,
            rsi: 58.0,
            stoch_k: 65.0,
            stoch_d: 60.0,
            bb_center: 1.0998,
            bb_upper: 1.1035,
            bb_lower: 1.0961,
            roc: 0.2,
            ..prev
        };
        snapshot(prev, cur)
    }

    /// Mirror image of [`bullish`].
    pub fn bearish() -> IndicatorSnapshot {
        let prev = Reading {
            close: 1.0990,
            ema_fast: 1.1000,
            ema_slow: 1.1010,
            ema_trend: 1.1100,
            macd_line: -0.0008,
            macd_signal: -0.0005,
            macd_hist: -0.0003,
            rsi: 45.0,
            stoch_k: 40.0,
            stoch_d: 45.0,
            bb_center: 1.1005,
            bb_upper: 1.1040,
            bb_lower: 1.0970,
            ..Reading::neutral()
        };
        let cur = Reading {
            close: 1.0980,
            ema_fast: 1.0995,
            ema_slow: 1.1008,
            macd_line: -0.0010,
            macd_signal: -0.0006,
            macd_hist: -0.0004,
            rsi: 42.0,
            stoch_k: 35.0,
            stoch_d: 40.0,
            bb_center: 1.1002,
            bb_upper: 1.1039,
            bb_lower: 1.0965,
            roc: -0.2,
            ..prev
        };
        snapshot(prev, cur)
    }
}
