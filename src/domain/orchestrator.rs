//! Per-cycle decision pipeline for one symbol.
//!
//! Bars flow into indicators, per-timeframe votes, confluence and the gate.
//! Only then is the shared account book read, once, for sizing and stops.
//! Everything before that point is private to the symbol's cycle.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::account::{AccountState, TradeCloseEvent};
use crate::domain::confluence::{
    ConfidenceGate, ConfluenceAggregator, GateOutcome, Grade, MarketContext,
};
use crate::domain::error::TradeguardError;
use crate::domain::indicator_set::{IndicatorEngine, IndicatorSnapshot};
use crate::domain::ohlcv::OhlcSeries;
use crate::domain::risk::{AccountBook, TrailingStopUpdate};
use crate::domain::scorer::{Action, TimeframeScorer, TimeframeVote};
use crate::domain::settings::Settings;
use crate::domain::sizing::{PositionSizer, SizingInput};
use crate::domain::stops::{calculate_stop_levels, StopRequest};
use crate::domain::strategy::Strategy;
use crate::domain::symbol::{ClassRulesTable, SymbolSpec, SymbolTier};
use crate::domain::timeframe::Timeframe;

/// Everything the broker reports for one symbol at one poll.
#[derive(Debug, Clone)]
pub struct BrokerSnapshot {
    pub symbol: String,
    pub spec: SymbolSpec,
    pub account: AccountState,
    pub series: HashMap<Timeframe, OhlcSeries>,
    pub server_time: DateTime<Utc>,
    /// Trades of this symbol closed since the previous poll.
    pub closed_trades: Vec<TradeCloseEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoActionReason {
    RiskHalt,
    InsufficientHistory,
    Data,
    NoSignal,
    GateRejected,
    BelowMinimumSize,
    ConstraintViolation,
}

impl NoActionReason {
    /// Reason for a cycle-level error. `None` for errors that must propagate.
    pub fn from_error(err: &TradeguardError) -> Option<Self> {
        match err {
            TradeguardError::RiskHalt { .. } => Some(NoActionReason::RiskHalt),
            TradeguardError::InsufficientHistory { .. } => Some(NoActionReason::InsufficientHistory),
            TradeguardError::ConstraintViolation { .. } => Some(NoActionReason::ConstraintViolation),
            TradeguardError::BelowMinimumSize { .. } => Some(NoActionReason::BelowMinimumSize),
            TradeguardError::Data { .. } | TradeguardError::Broker { .. } => Some(NoActionReason::Data),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NoActionReason::RiskHalt => "risk_halt",
            NoActionReason::InsufficientHistory => "insufficient_history",
            NoActionReason::Data => "data",
            NoActionReason::NoSignal => "no_signal",
            NoActionReason::GateRejected => "gate_rejected",
            NoActionReason::BelowMinimumSize => "below_minimum_size",
            NoActionReason::ConstraintViolation => "constraint_violation",
        }
    }
}

impl fmt::Display for NoActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoAction {
    pub symbol: String,
    pub reason: NoActionReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeDecision {
    pub symbol: String,
    pub action: Action,
    pub lots: f64,
    pub entry_price: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub confidence: u8,
    pub grade: Grade,
    pub decision_reasons: Vec<String>,
    pub risk_amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Decision(TradeDecision),
    NoAction(NoAction),
}

impl CycleOutcome {
    pub fn symbol(&self) -> &str {
        match self {
            CycleOutcome::Decision(d) => &d.symbol,
            CycleOutcome::NoAction(n) => &n.symbol,
        }
    }

    pub fn decision(&self) -> Option<&TradeDecision> {
        match self {
            CycleOutcome::Decision(d) => Some(d),
            CycleOutcome::NoAction(_) => None,
        }
    }

    pub fn no_action_reason(&self) -> Option<NoActionReason> {
        match self {
            CycleOutcome::Decision(_) => None,
            CycleOutcome::NoAction(n) => Some(n.reason),
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Decision(d) => write!(
                f,
                "{} {} {:.2} lots @ {} tp={} sl={} confidence={} grade={}",
                d.symbol, d.action, d.lots, d.entry_price, d.tp_price, d.sl_price, d.confidence, d.grade
            ),
            CycleOutcome::NoAction(n) => write!(f, "{} NONE {}: {}", n.symbol, n.reason, n.detail),
        }
    }
}

/// Signal side of a cycle: everything computed before the account is read.
struct Signal {
    action: Action,
    confidence: u8,
    grade: Grade,
    atr: f64,
    atr_average: f64,
    reasons: Vec<String>,
}

pub struct DecisionOrchestrator {
    strategy: Strategy,
    indicators: IndicatorEngine,
    scorer: TimeframeScorer,
    aggregator: ConfluenceAggregator,
    gate: ConfidenceGate,
    sizer: PositionSizer,
    classes: ClassRulesTable,
    forward_fill: bool,
    max_bar_age: Option<chrono::Duration>,
    book: Arc<AccountBook>,
}

impl DecisionOrchestrator {
    pub fn new(settings: &Settings, book: Arc<AccountBook>) -> Self {
        let scorer = TimeframeScorer::new(settings.scoring());
        let aggregator = ConfluenceAggregator::new(scorer.max_score());
        Self {
            strategy: settings.strategy.clone(),
            indicators: IndicatorEngine::new(settings.indicators),
            scorer,
            aggregator,
            gate: settings.gate.clone(),
            sizer: PositionSizer::new(settings.sizing.clone()),
            classes: settings.classes.clone(),
            forward_fill: settings.engine.forward_fill,
            max_bar_age: settings.engine.max_bar_age,
            book,
        }
    }

    pub fn book(&self) -> &Arc<AccountBook> {
        &self.book
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Runs one cycle. Every failure scoped to this cycle becomes a `NoAction`;
    /// only cancellation is returned as an error.
    pub fn evaluate_cycle(
        &self,
        snapshot: &BrokerSnapshot,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, TradeguardError> {
        if cancel.is_cancelled() {
            return Err(TradeguardError::Cancelled);
        }
        let outcome = match self.decide(snapshot) {
            Ok(outcome) => outcome,
            Err(err) => match NoActionReason::from_error(&err) {
                Some(reason) => no_action(&snapshot.symbol, reason, err.to_string()),
                None => return Err(err),
            },
        };
        if cancel.is_cancelled() {
            return Err(TradeguardError::Cancelled);
        }

        match &outcome {
            CycleOutcome::Decision(d) => info!(
                symbol = %d.symbol,
                action = %d.action,
                lots = d.lots,
                confidence = d.confidence,
                grade = %d.grade,
                "trade decision"
            ),
            CycleOutcome::NoAction(n) => {
                debug!(symbol = %n.symbol, reason = %n.reason, detail = %n.detail, "no action")
            }
        }
        Ok(outcome)
    }

    fn decide(&self, snapshot: &BrokerSnapshot) -> Result<CycleOutcome, TradeguardError> {
        let symbol = snapshot.symbol.as_str();
        if self.book.is_halted() {
            let reason = self
                .book
                .snapshot()
                .risk
                .halt_reason
                .unwrap_or_else(|| "trading halted".to_string());
            return Err(TradeguardError::RiskHalt { reason });
        }
        snapshot.spec.validate_quote()?;
        let (class, rules) = self.classes.resolve(&snapshot.spec);

        let signal = match self.signal(snapshot, class.tier())? {
            Ok(signal) => signal,
            Err(outcome) => return Ok(outcome),
        };

        // One consistent read of the account-wide state for the rest of the cycle.
        let book = self.book.snapshot();
        let size = self.sizer.size(&SizingInput {
            account: &book.account,
            rules: &rules,
            atr: signal.atr,
            atr_average: signal.atr_average,
            grade: signal.grade,
            governor_multiplier: book.multiplier,
        })?;

        let entry_price = match signal.action {
            Action::Buy => snapshot.spec.ask,
            _ => snapshot.spec.bid,
        };
        let levels = calculate_stop_levels(&StopRequest {
            entry_price,
            action: signal.action,
            tp: self.strategy.tp,
            sl: self.strategy.sl,
            rules: &rules,
            account: &book.account,
            lots: size.lots,
        })?;

        let mut reasons = signal.reasons;
        reasons.push(format!("class {class}"));
        if book.multiplier < 1.0 {
            reasons.push(format!("risk mode {} x{}", book.risk.mode, book.multiplier));
        }
        for role in &levels.clamped {
            reasons.push(format!("{role} clamped to minimum stop distance"));
        }

        Ok(CycleOutcome::Decision(TradeDecision {
            symbol: symbol.to_string(),
            action: signal.action,
            lots: size.lots,
            entry_price,
            tp_price: levels.tp_price,
            sl_price: levels.sl_price,
            confidence: signal.confidence,
            grade: signal.grade,
            decision_reasons: reasons,
            risk_amount: size.risk_amount,
        }))
    }

    /// Votes, confluence and gate. The inner `Err` is a finished no-signal outcome.
    fn signal(
        &self,
        snapshot: &BrokerSnapshot,
        tier: SymbolTier,
    ) -> Result<Result<Signal, CycleOutcome>, TradeguardError> {
        let symbol = snapshot.symbol.as_str();
        let mut votes: Vec<(TimeframeVote, f64)> = Vec::with_capacity(self.strategy.timeframes.len());
        let mut fastest: Option<(Timeframe, IndicatorSnapshot)> = None;

        for &(timeframe, weight) in &self.strategy.timeframes {
            let indicators = self.indicators_for(snapshot, timeframe)?;
            let vote = self.scorer.score(timeframe, &indicators);
            debug!(
                symbol,
                %timeframe,
                direction = %vote.direction,
                score = vote.score,
                "timeframe vote"
            );
            votes.push((vote, weight));
            if fastest.as_ref().is_none_or(|(tf, _)| timeframe < *tf) {
                fastest = Some((timeframe, indicators));
            }
        }
        let Some((_, fastest)) = fastest else {
            return Err(TradeguardError::data("strategy has no timeframes"));
        };

        let context = MarketContext::from_set(&fastest.current, tier);
        let result = self.aggregator.aggregate(&votes, &context);
        if !result.action.is_directional() {
            return Ok(Err(no_action(
                symbol,
                NoActionReason::NoSignal,
                format!(
                    "buy aggregate {:.2}, sell aggregate {:.2}",
                    result.buy_aggregate, result.sell_aggregate
                ),
            )));
        }

        let mut reasons = vec![format!(
            "{} confidence {} grade {}",
            result.action, result.confidence, result.grade
        )];
        for (vote, weight) in &votes {
            if vote.direction.is_directional() {
                reasons.push(format!(
                    "{} {} score {} x{}: {}",
                    vote.timeframe,
                    vote.direction,
                    vote.score,
                    weight,
                    vote.fired.join(",")
                ));
            }
        }
        reasons.extend(
            result
                .factors
                .iter()
                .map(|(name, delta)| format!("{name} {delta:+.1}")),
        );

        match self.gate.evaluate(&result, &context) {
            GateOutcome::Passed => {}
            GateOutcome::Rescued { reason } => {
                info!(symbol, confidence = result.confidence, %reason, "confidence gate rescue");
                reasons.push(format!("gate rescue: {reason}"));
            }
            GateOutcome::Rejected { reason } => {
                return Ok(Err(no_action(symbol, NoActionReason::GateRejected, reason)));
            }
        }

        Ok(Ok(Signal {
            action: result.action,
            confidence: result.confidence,
            grade: result.grade,
            atr: fastest.current.atr(),
            atr_average: fastest.current.atr_average(),
            reasons,
        }))
    }

    fn indicators_for(
        &self,
        snapshot: &BrokerSnapshot,
        timeframe: Timeframe,
    ) -> Result<IndicatorSnapshot, TradeguardError> {
        let series = snapshot.series.get(&timeframe).ok_or_else(|| {
            TradeguardError::data(format!("{}: no {timeframe} series", snapshot.symbol))
        })?;
        let series = if self.forward_fill {
            Cow::Owned(series.forward_fill()?)
        } else {
            Cow::Borrowed(series)
        };
        if let Some(max_age) = self.max_bar_age {
            series.ensure_fresh(snapshot.server_time, max_age)?;
        }
        self.indicators.compute(&series)
    }

    /// Trailing-stop proposals for this symbol's open positions, using the
    /// fastest timeframe's ATR.
    pub fn trailing_updates(
        &self,
        snapshot: &BrokerSnapshot,
    ) -> Result<Vec<TrailingStopUpdate>, TradeguardError> {
        let Some(timeframe) = self.strategy.timeframe_list().min() else {
            return Ok(Vec::new());
        };
        let (_, rules) = self.classes.resolve(&snapshot.spec);
        let indicators = self.indicators_for(snapshot, timeframe)?;
        Ok(self.book.trailing_updates(
            &snapshot.symbol,
            snapshot.spec.bid,
            snapshot.spec.ask,
            indicators.current.atr(),
            &rules,
        ))
    }
}

fn no_action(symbol: &str, reason: NoActionReason, detail: impl Into<String>) -> CycleOutcome {
    CycleOutcome::NoAction(NoAction {
        symbol: symbol.to_string(),
        reason,
        detail: detail.into(),
    })
}
