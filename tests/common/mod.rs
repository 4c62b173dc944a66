#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use tradeguard::domain::account::{AccountState, TradeCloseEvent};
use tradeguard::domain::error::TradeguardError;
pub use tradeguard::domain::ohlcv::{OhlcSeries, PriceBar};
use tradeguard::domain::orchestrator::{BrokerSnapshot, CycleOutcome};
use tradeguard::domain::risk::TrailingStopUpdate;
use tradeguard::domain::strategy::Strategy;
use tradeguard::domain::symbol::{ClassRulesTable, SymbolSpec};
pub use tradeguard::domain::timeframe::Timeframe;
use tradeguard::ports::broker_port::BrokerPort;
use tradeguard::ports::decision_port::DecisionSink;

pub fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Timestamp of the last generated bar, inside the London/New York overlap.
pub fn end_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap()
}

/// `count` bars of a steady trend ending at [`end_time`], each 10 pips tall.
pub fn trend_bars(timeframe: Timeframe, count: usize, step: f64) -> Vec<PriceBar> {
    let start_price = if step >= 0.0 { 1.05 } else { 1.05 - step * count as f64 };
    let first = end_time() - timeframe.duration() * (count as i32 - 1);
    (0..count)
        .map(|i| {
            let close = start_price + step * i as f64;
            PriceBar {
                timestamp: first + timeframe.duration() * i as i32,
                open: close - step,
                high: close + 0.0005,
                low: close - 0.0005,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

pub fn trend_series(symbol: &str, timeframe: Timeframe, count: usize, step: f64) -> OhlcSeries {
    OhlcSeries::from_bars(symbol, timeframe, trend_bars(timeframe, count, step)).unwrap()
}

/// Broker spec from the default class rules, quoted at `bid` with a one-pip spread.
pub fn spec_for(symbol: &str, bid: f64) -> SymbolSpec {
    let (_, rules) = ClassRulesTable::default().lookup(symbol);
    SymbolSpec {
        symbol: symbol.to_string(),
        pip_size: rules.pip_size,
        min_stop_distance_pips: rules.min_stop_distance_pips,
        price_digits: rules.price_digits,
        contract_size: rules.contract_size,
        bid,
        ask: bid + rules.pip_size,
    }
}

/// 400 trending bars per strategy timeframe, quoted at the last close.
pub fn trending_snapshot(symbol: &str, strategy: &Strategy, step: f64) -> BrokerSnapshot {
    let mut series = HashMap::new();
    let mut last_close = 0.0;
    for tf in strategy.timeframe_list() {
        let s = trend_series(symbol, tf, 400, step);
        last_close = s.last().map(|b| b.close).unwrap();
        series.insert(tf, s);
    }
    BrokerSnapshot {
        symbol: symbol.to_string(),
        spec: spec_for(symbol, last_close),
        account: AccountState::new(10_000.0, 10_000.0),
        series,
        server_time: end_time(),
        closed_trades: Vec::new(),
    }
}

/// Writes `bars` as `<SYMBOL>_<TF>.csv` under `dir`.
pub fn write_csv(dir: &Path, symbol: &str, timeframe: Timeframe, bars: &[PriceBar]) {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            b.timestamp.to_rfc3339(),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        )
        .unwrap();
    }
    std::fs::write(dir.join(format!("{symbol}_{timeframe}.csv")), out).unwrap();
}

pub fn close_event(symbol: &str, ticket: u64, pnl: f64) -> TradeCloseEvent {
    TradeCloseEvent {
        symbol: symbol.to_string(),
        ticket,
        pnl,
        close_reason: if pnl < 0.0 { "sl" } else { "tp" }.to_string(),
    }
}

pub struct MockBroker {
    pub snapshots: HashMap<String, BrokerSnapshot>,
    pub errors: HashMap<String, String>,
    pending: Mutex<Vec<TradeCloseEvent>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
            errors: HashMap::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_snapshot(mut self, snapshot: BrokerSnapshot) -> Self {
        self.snapshots.insert(snapshot.symbol.clone(), snapshot);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    /// Queued closes are delivered once, with the next snapshot of their symbol.
    pub fn push_close(&self, event: TradeCloseEvent) {
        self.pending.lock().push(event);
    }
}

#[async_trait::async_trait]
impl BrokerPort for MockBroker {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<BrokerSnapshot, TradeguardError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(TradeguardError::Broker {
                reason: reason.clone(),
            });
        }
        let mut snapshot = self
            .snapshots
            .get(symbol)
            .cloned()
            .ok_or_else(|| TradeguardError::Broker {
                reason: format!("no snapshot for {symbol}"),
            })?;
        let mut pending = self.pending.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = pending.drain(..).partition(|c| c.symbol == symbol);
        *pending = rest;
        snapshot.closed_trades = mine;
        Ok(snapshot)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub outcomes: Mutex<Vec<CycleOutcome>>,
    pub trailing: Mutex<Vec<TrailingStopUpdate>>,
}

impl RecordingSink {
    pub fn outcomes(&self) -> Vec<CycleOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn decisions(&self) -> usize {
        self.outcomes
            .lock()
            .iter()
            .filter(|o| o.decision().is_some())
            .count()
    }
}

#[async_trait::async_trait]
impl DecisionSink for RecordingSink {
    async fn submit(&self, outcome: CycleOutcome) -> Result<(), TradeguardError> {
        self.outcomes.lock().push(outcome);
        Ok(())
    }

    async fn submit_trailing(&self, update: TrailingStopUpdate) -> Result<(), TradeguardError> {
        self.trailing.lock().push(update);
        Ok(())
    }
}
