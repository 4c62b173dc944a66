//! Polling loop: one task per symbol, all sharing one account book.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::error::TradeguardError;
use crate::domain::orchestrator::{CycleOutcome, DecisionOrchestrator};
use crate::ports::broker_port::BrokerPort;
use crate::ports::decision_port::DecisionSink;

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub decisions: u64,
    pub no_actions: u64,
    pub errors: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Decision(_) => self.decisions += 1,
            CycleOutcome::NoAction(_) => self.no_actions += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.cycles += other.cycles;
        self.decisions += other.decisions;
        self.no_actions += other.no_actions;
        self.errors += other.errors;
    }
}

#[derive(Clone)]
pub struct Engine {
    orchestrator: Arc<DecisionOrchestrator>,
    broker: Arc<dyn BrokerPort>,
    sink: Arc<dyn DecisionSink>,
    poll_interval: Duration,
}

impl Engine {
    pub fn new(
        orchestrator: Arc<DecisionOrchestrator>,
        broker: Arc<dyn BrokerPort>,
        sink: Arc<dyn DecisionSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            broker,
            sink,
            poll_interval,
        }
    }

    pub fn orchestrator(&self) -> &Arc<DecisionOrchestrator> {
        &self.orchestrator
    }

    /// Polls every symbol until `cancel` fires. Symbols run concurrently;
    /// each symbol's cycles run strictly one after another.
    pub async fn run(&self, symbols: Vec<String>, cancel: CancellationToken) -> RunSummary {
        info!(symbols = symbols.len(), interval_s = self.poll_interval.as_secs_f64(), "engine started");
        let mut tasks = JoinSet::new();
        for symbol in symbols {
            let engine = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { engine.poll_symbol(symbol, cancel).await });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(stats) => summary.merge(stats),
                Err(e) => {
                    warn!(error = %e, "symbol task failed");
                    summary.errors += 1;
                }
            }
        }
        info!(
            cycles = summary.cycles,
            decisions = summary.decisions,
            errors = summary.errors,
            "engine stopped"
        );
        summary
    }

    async fn poll_symbol(&self, symbol: String, cancel: CancellationToken) -> RunSummary {
        let mut stats = RunSummary::default();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%symbol, "symbol loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    match self.cycle(&symbol, &cancel).await {
                        Ok(outcome) => stats.record(&outcome),
                        Err(TradeguardError::Cancelled) => break,
                        Err(err) => {
                            warn!(%symbol, error = %err, "cycle failed");
                            stats.errors += 1;
                        }
                    }
                }
            }
        }
        stats
    }

    /// One full cycle for `symbol`: fetch, update the account book, decide, hand off.
    pub async fn cycle(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, TradeguardError> {
        let snapshot = self.broker.fetch_snapshot(symbol).await?;
        self.orchestrator
            .book()
            .apply(&snapshot.closed_trades, Some(snapshot.account.clone()));

        let outcome = self.orchestrator.evaluate_cycle(&snapshot, cancel)?;

        match self.orchestrator.trailing_updates(&snapshot) {
            Ok(updates) => {
                for update in updates {
                    if let Err(err) = self.sink.submit_trailing(update).await {
                        warn!(symbol, error = %err, "trailing stop hand-off failed");
                    }
                }
            }
            Err(err) => debug!(symbol, error = %err, "trailing stops skipped"),
        }

        // Last point at which a stop request can keep the outcome from going out.
        if cancel.is_cancelled() {
            return Err(TradeguardError::Cancelled);
        }
        self.sink.submit(outcome.clone()).await?;
        Ok(outcome)
    }
}
