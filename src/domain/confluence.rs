//! Multi-timeframe confluence, market-context factors and the confidence gate.

use chrono::{DateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::domain::indicator_set::IndicatorSet;
use crate::domain::scorer::{Action, TimeframeVote};
use crate::domain::symbol::SymbolTier;

/// Largest swing any single context factor may apply to confidence.
pub const FACTOR_BOUND: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Grade {
    F,
    D,
    C,
    B,
    BPlus,
    A,
    APlus,
}

impl Grade {
    /// Best grade first.
    pub const ALL: [Grade; 7] = [
        Grade::APlus,
        Grade::A,
        Grade::BPlus,
        Grade::B,
        Grade::C,
        Grade::D,
        Grade::F,
    ];

    pub fn from_confidence(confidence: u8) -> Grade {
        match confidence {
            92..=u8::MAX => Grade::APlus,
            87..=91 => Grade::A,
            82..=86 => Grade::BPlus,
            75..=81 => Grade::B,
            68..=74 => Grade::C,
            60..=67 => Grade::D,
            _ => Grade::F,
        }
    }

    /// Suffix of the `grade_*` keys in `[account]`.
    pub fn key(&self) -> &'static str {
        match self {
            Grade::APlus => "a_plus",
            Grade::A => "a",
            Grade::BPlus => "b_plus",
            Grade::B => "b",
            Grade::C => "c",
            Grade::D => "d",
            Grade::F => "f",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityRegime {
    /// Classifies current ATR against its rolling average.
    pub fn from_atr(atr: f64, atr_average: f64) -> Self {
        if atr_average <= 0.0 {
            return VolatilityRegime::Normal;
        }
        let ratio = atr / atr_average;
        if ratio < 0.7 {
            VolatilityRegime::Low
        } else if ratio <= 1.5 {
            VolatilityRegime::Normal
        } else if ratio <= 3.0 {
            VolatilityRegime::High
        } else {
            VolatilityRegime::Extreme
        }
    }

    pub fn delta(&self) -> f64 {
        match self {
            VolatilityRegime::Low => -5.0,
            VolatilityRegime::Normal => 5.0,
            VolatilityRegime::High => -5.0,
            VolatilityRegime::Extreme => -15.0,
        }
    }
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolatilityRegime::Low => "low",
            VolatilityRegime::Normal => "normal",
            VolatilityRegime::High => "high",
            VolatilityRegime::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

impl FromStr for VolatilityRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(VolatilityRegime::Low),
            "normal" => Ok(VolatilityRegime::Normal),
            "high" => Ok(VolatilityRegime::High),
            "extreme" => Ok(VolatilityRegime::Extreme),
            _ => Err(format!("unknown volatility regime '{s}'")),
        }
    }
}

/// Trading session by UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRegime {
    Asian,
    London,
    Overlap,
    NewYork,
    OffHours,
}

impl SessionRegime {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=6 => SessionRegime::Asian,
            7..=12 => SessionRegime::London,
            13..=16 => SessionRegime::Overlap,
            17..=21 => SessionRegime::NewYork,
            _ => SessionRegime::OffHours,
        }
    }

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self::from_hour(ts.hour())
    }

    pub fn delta(&self) -> f64 {
        match self {
            SessionRegime::Overlap => 5.0,
            SessionRegime::London | SessionRegime::NewYork => 3.0,
            SessionRegime::Asian => -3.0,
            SessionRegime::OffHours => -8.0,
        }
    }
}

impl fmt::Display for SessionRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionRegime::Asian => "asian",
            SessionRegime::London => "london",
            SessionRegime::Overlap => "overlap",
            SessionRegime::NewYork => "new_york",
            SessionRegime::OffHours => "off_hours",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "asian" => Ok(SessionRegime::Asian),
            "london" => Ok(SessionRegime::London),
            "overlap" => Ok(SessionRegime::Overlap),
            "new_york" | "newyork" => Ok(SessionRegime::NewYork),
            "off_hours" | "offhours" => Ok(SessionRegime::OffHours),
            _ => Err(format!("unknown session '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketContext {
    pub volatility: VolatilityRegime,
    pub session: SessionRegime,
    pub tier: SymbolTier,
}

impl MarketContext {
    /// Context of the latest bar. The session comes from the bar timestamp, not the wall clock.
    pub fn from_set(set: &IndicatorSet, tier: SymbolTier) -> Self {
        Self {
            volatility: VolatilityRegime::from_atr(set.atr(), set.atr_average()),
            session: SessionRegime::from_timestamp(set.timestamp),
            tier,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfluenceResult {
    pub action: Action,
    pub confidence: u8,
    pub grade: Grade,
    /// Signal strength first, then each context adjustment in the order applied.
    pub factors: Vec<(String, f64)>,
    pub buy_aggregate: f64,
    pub sell_aggregate: f64,
}

impl ConfluenceResult {
    fn none(buy_aggregate: f64, sell_aggregate: f64) -> Self {
        Self {
            action: Action::None,
            confidence: 0,
            grade: Grade::F,
            factors: Vec::new(),
            buy_aggregate,
            sell_aggregate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfluenceAggregator {
    max_vote_score: u32,
}

impl ConfluenceAggregator {
    /// `max_vote_score` is the highest score a single timeframe can produce.
    pub fn new(max_vote_score: u32) -> Self {
        Self { max_vote_score }
    }

    pub fn aggregate(
        &self,
        votes: &[(TimeframeVote, f64)],
        context: &MarketContext,
    ) -> ConfluenceResult {
        let mut buy = 0.0;
        let mut sell = 0.0;
        let mut theoretical_max = 0.0;
        for (vote, weight) in votes {
            theoretical_max += self.max_vote_score as f64 * weight;
            let contribution = vote.score as f64 * weight;
            match vote.direction {
                Action::Buy => buy += contribution,
                Action::Sell => sell += contribution,
                Action::None => {}
            }
        }

        let (action, winning) = if buy > sell {
            (Action::Buy, buy)
        } else if sell > buy {
            (Action::Sell, sell)
        } else {
            return ConfluenceResult::none(buy, sell);
        };
        if theoretical_max <= 0.0 {
            return ConfluenceResult::none(buy, sell);
        }

        let base = (winning / theoretical_max * 100.0).min(100.0);
        let mut factors = vec![("signal_strength".to_string(), base)];

        let voting: Vec<&TimeframeVote> = votes
            .iter()
            .map(|(v, _)| v)
            .filter(|v| v.direction.is_directional())
            .collect();
        let opposing = voting.iter().filter(|v| v.direction != action).count();
        if opposing > 0 {
            factors.push(("opposition".to_string(), bounded(-5.0 * opposing as f64)));
        } else if voting.len() >= 2 {
            factors.push(("agreement".to_string(), bounded(10.0)));
        }

        factors.push((
            format!("volatility_{}", context.volatility),
            bounded(context.volatility.delta()),
        ));
        factors.push((
            format!("session_{}", context.session),
            bounded(context.session.delta()),
        ));

        let total: f64 = factors.iter().map(|(_, d)| d).sum();
        let confidence = total.round().clamp(0.0, 100.0) as u8;
        let grade = Grade::from_confidence(confidence);

        debug!(%action, confidence, %grade, buy, sell, "confluence");

        ConfluenceResult {
            action,
            confidence,
            grade,
            factors,
            buy_aggregate: buy,
            sell_aggregate: sell,
        }
    }
}

fn bounded(delta: f64) -> f64 {
    delta.clamp(-FACTOR_BOUND, FACTOR_BOUND)
}

/// Secondary conditions under which a below-minimum signal may still pass.
///
/// An empty list places no restriction on that dimension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RescueConditions {
    pub floor: u8,
    pub volatility: Vec<VolatilityRegime>,
    pub sessions: Vec<SessionRegime>,
    pub tiers: Vec<SymbolTier>,
}

impl RescueConditions {
    fn admits(&self, ctx: &MarketContext) -> bool {
        (self.volatility.is_empty() || self.volatility.contains(&ctx.volatility))
            && (self.sessions.is_empty() || self.sessions.contains(&ctx.session))
            && (self.tiers.is_empty() || self.tiers.contains(&ctx.tier))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Passed,
    Rescued { reason: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceGate {
    pub min_confidence: u8,
    pub rescue: Option<RescueConditions>,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            min_confidence: 68,
            rescue: None,
        }
    }
}

impl ConfidenceGate {
    pub fn evaluate(&self, result: &ConfluenceResult, ctx: &MarketContext) -> GateOutcome {
        if !result.action.is_directional() {
            return GateOutcome::Rejected {
                reason: "no directional signal".to_string(),
            };
        }
        if result.confidence >= self.min_confidence {
            return GateOutcome::Passed;
        }
        if let Some(rescue) = &self.rescue {
            if result.confidence >= rescue.floor && rescue.admits(ctx) {
                return GateOutcome::Rescued {
                    reason: format!(
                        "confidence {} below minimum {} rescued (volatility {}, session {}, tier {})",
                        result.confidence, self.min_confidence, ctx.volatility, ctx.session, ctx.tier
                    ),
                };
            }
        }
        GateOutcome::Rejected {
            reason: format!(
                "confidence {} below minimum {}",
                result.confidence, self.min_confidence
            ),
        }
    }
}
