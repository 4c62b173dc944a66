//! Strategy profiles: timeframe set and weights, default stops and signal threshold.

use std::fmt;
use std::str::FromStr;

use crate::domain::scorer::TieBreak;
use crate::domain::stops::{StopSpec, StopUnit};
use crate::domain::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Scalping,
    Intraday,
    Swing,
    Hft,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Scalping,
        StrategyKind::Intraday,
        StrategyKind::Swing,
        StrategyKind::Hft,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Scalping => "scalping",
            StrategyKind::Intraday => "intraday",
            StrategyKind::Swing => "swing",
            StrategyKind::Hft => "hft",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.name() == lower)
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub kind: StrategyKind,
    /// Evaluated timeframes with their confluence weights, in evaluation order.
    pub timeframes: Vec<(Timeframe, f64)>,
    pub tp: StopSpec,
    pub sl: StopSpec,
    pub signal_threshold: u32,
    pub tie_break: TieBreak,
}

impl Strategy {
    /// Built-in profile for `kind`.
    pub fn profile(kind: StrategyKind) -> Self {
        use Timeframe::*;
        let (timeframes, tp, sl, signal_threshold) = match kind {
            StrategyKind::Scalping => (
                vec![(M1, 3.0), (M5, 2.0), (M15, 1.0)],
                StopSpec::tp(StopUnit::Pips, 20.0),
                StopSpec::sl(StopUnit::Pips, 10.0),
                4,
            ),
            StrategyKind::Intraday => (
                vec![(M5, 1.5), (M15, 3.0), (H1, 2.5)],
                StopSpec::tp(StopUnit::Pips, 40.0),
                StopSpec::sl(StopUnit::Pips, 20.0),
                4,
            ),
            StrategyKind::Swing => (
                vec![(H1, 1.0), (H4, 2.0), (D1, 3.0)],
                StopSpec::tp(StopUnit::PricePercent, 2.0),
                StopSpec::sl(StopUnit::PricePercent, 1.0),
                5,
            ),
            StrategyKind::Hft => (
                vec![(M1, 3.0)],
                StopSpec::tp(StopUnit::Pips, 8.0),
                StopSpec::sl(StopUnit::Pips, 5.0),
                3,
            ),
        };
        Strategy {
            kind,
            timeframes,
            tp,
            sl,
            signal_threshold,
            tie_break: TieBreak::None,
        }
    }

    pub fn weight(&self, timeframe: Timeframe) -> Option<f64> {
        self.timeframes
            .iter()
            .find(|(tf, _)| *tf == timeframe)
            .map(|(_, w)| *w)
    }

    pub fn timeframe_list(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.timeframes.iter().map(|(tf, _)| *tf)
    }
}

/// Parses `M1:3,M5:2,M15:1`. A bare timeframe gets weight 1.
pub fn parse_timeframe_weights(s: &str) -> Result<Vec<(Timeframe, f64)>, String> {
    let mut out: Vec<(Timeframe, f64)> = Vec::new();
    for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let (tf, weight) = match item.split_once(':') {
            Some((tf, w)) => {
                let weight: f64 = w
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid weight '{}' for {}", w.trim(), tf.trim()))?;
                (tf.trim().parse::<Timeframe>()?, weight)
            }
            None => (item.parse::<Timeframe>()?, 1.0),
        };
        if !(weight > 0.0) {
            return Err(format!("weight for {tf} must be positive"));
        }
        if out.iter().any(|(t, _)| *t == tf) {
            return Err(format!("timeframe {tf} listed twice"));
        }
        out.push((tf, weight));
    }
    if out.is_empty() {
        return Err("timeframe set is empty".to_string());
    }
    Ok(out)
}
