//! Decision sink that writes one line per outcome.

use std::io::{self, Write};

use parking_lot::Mutex;
use tracing::info;

use crate::domain::error::TradeguardError;
use crate::domain::orchestrator::CycleOutcome;
use crate::domain::risk::TrailingStopUpdate;
use crate::ports::decision_port::DecisionSink;

pub struct LogSink<W> {
    out: Mutex<W>,
}

impl LogSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LogSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_line(&self, line: &str) -> Result<(), TradeguardError> {
        let mut out = self.out.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

pub fn format_outcome(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Decision(d) => format!(
            "{outcome} risk={:.2} reasons=[{}]",
            d.risk_amount,
            d.decision_reasons.join("; ")
        ),
        CycleOutcome::NoAction(_) => outcome.to_string(),
    }
}

pub fn format_trailing(update: &TrailingStopUpdate) -> String {
    match update.previous_sl_price {
        Some(prev) => format!(
            "{} TRAIL #{} sl {} -> {}",
            update.symbol, update.ticket, prev, update.new_sl_price
        ),
        None => format!(
            "{} TRAIL #{} sl none -> {}",
            update.symbol, update.ticket, update.new_sl_price
        ),
    }
}

#[async_trait::async_trait]
impl<W: Write + Send + 'static> DecisionSink for LogSink<W> {
    async fn submit(&self, outcome: CycleOutcome) -> Result<(), TradeguardError> {
        if let CycleOutcome::Decision(d) = &outcome {
            info!(symbol = %d.symbol, action = %d.action, lots = d.lots, "decision submitted");
        }
        self.write_line(&format_outcome(&outcome))
    }

    async fn submit_trailing(&self, update: TrailingStopUpdate) -> Result<(), TradeguardError> {
        info!(symbol = %update.symbol, ticket = update.ticket, sl = update.new_sl_price, "trailing stop");
        self.write_line(&format_trailing(&update))
    }
}
