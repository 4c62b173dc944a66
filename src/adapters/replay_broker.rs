//! Broker stand-in that serves snapshots from CSV bar files.
//!
//! The quote is the last close of the fastest timeframe plus a fixed spread,
//! and the server time is that bar's timestamp. Account state and closed
//! trades are whatever the caller feeds in.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::adapters::csv_adapter::CsvBarAdapter;
use crate::domain::account::{AccountState, TradeCloseEvent};
use crate::domain::error::TradeguardError;
use crate::domain::orchestrator::BrokerSnapshot;
use crate::domain::symbol::{ClassRulesTable, SymbolSpec};
use crate::domain::timeframe::Timeframe;
use crate::ports::broker_port::BrokerPort;

/// Default spread in pips added to the bid.
pub const DEFAULT_SPREAD_PIPS: f64 = 1.0;

pub struct ReplayBroker {
    bars: CsvBarAdapter,
    timeframes: Vec<Timeframe>,
    classes: ClassRulesTable,
    spread_pips: f64,
    account: Mutex<AccountState>,
    pending_closes: Mutex<HashMap<String, Vec<TradeCloseEvent>>>,
}

impl ReplayBroker {
    pub fn new(
        bars: CsvBarAdapter,
        timeframes: Vec<Timeframe>,
        classes: ClassRulesTable,
        account: AccountState,
    ) -> Self {
        Self {
            bars,
            timeframes,
            classes,
            spread_pips: DEFAULT_SPREAD_PIPS,
            account: Mutex::new(account),
            pending_closes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_spread_pips(mut self, spread_pips: f64) -> Self {
        self.spread_pips = spread_pips;
        self
    }

    pub fn set_account(&self, account: AccountState) {
        *self.account.lock() = account;
    }

    /// Queues a close event for the next snapshot of its symbol.
    pub fn push_close(&self, event: TradeCloseEvent) {
        self.pending_closes
            .lock()
            .entry(event.symbol.clone())
            .or_default()
            .push(event);
    }

    fn load(&self, symbol: &str) -> Result<BrokerSnapshot, TradeguardError> {
        let fastest = self
            .timeframes
            .iter()
            .min()
            .copied()
            .ok_or_else(|| TradeguardError::data("replay broker has no timeframes"))?;

        let mut series = HashMap::with_capacity(self.timeframes.len());
        for &tf in &self.timeframes {
            series.insert(tf, self.bars.load_series(symbol, tf)?);
        }

        let (server_time, last_close) = series
            .get(&fastest)
            .and_then(|s| s.last())
            .map(|bar| (bar.timestamp, bar.close))
            .ok_or_else(|| TradeguardError::data(format!("{symbol} {fastest}: no bars")))?;
        let (_, rules) = self.classes.lookup(symbol);
        let bid = rules.round_price(last_close);
        let ask = rules.round_price(bid + self.spread_pips * rules.pip_size);

        Ok(BrokerSnapshot {
            symbol: symbol.to_string(),
            spec: SymbolSpec {
                symbol: symbol.to_string(),
                pip_size: rules.pip_size,
                min_stop_distance_pips: rules.min_stop_distance_pips,
                price_digits: rules.price_digits,
                contract_size: rules.contract_size,
                bid,
                ask,
            },
            account: self.account.lock().clone(),
            server_time,
            series,
            closed_trades: self
                .pending_closes
                .lock()
                .remove(symbol)
                .unwrap_or_default(),
        })
    }
}

#[async_trait::async_trait]
impl BrokerPort for ReplayBroker {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<BrokerSnapshot, TradeguardError> {
        self.load(symbol)
    }
}
