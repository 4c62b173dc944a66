//! Account, open position and trade-close types reported by the broker.

use crate::domain::scorer::Action;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub ticket: u64,
    pub symbol: String,
    pub action: Action,
    pub lots: f64,
    pub entry_price: f64,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
}

impl OpenPosition {
    /// Signed price distance in the position's favour at `price`.
    pub fn favourable_move(&self, price: f64) -> f64 {
        match self.action {
            Action::Buy => price - self.entry_price,
            Action::Sell => self.entry_price - price,
            Action::None => 0.0,
        }
    }

    /// True when `candidate` is strictly more protective than the current stop.
    pub fn improves_stop(&self, candidate: f64) -> bool {
        match (self.sl_price, self.action) {
            (None, Action::Buy | Action::Sell) => true,
            (Some(sl), Action::Buy) => candidate > sl,
            (Some(sl), Action::Sell) => candidate < sl,
            (_, Action::None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeCloseEvent {
    pub symbol: String,
    pub ticket: u64,
    pub pnl: f64,
    pub close_reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub open_positions: Vec<OpenPosition>,
}

impl AccountState {
    pub fn new(balance: f64, equity: f64) -> Self {
        Self {
            balance,
            equity,
            open_positions: Vec::new(),
        }
    }

    pub fn positions_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a OpenPosition> {
        self.open_positions.iter().filter(move |p| p.symbol == symbol)
    }

    pub fn position_count(&self) -> usize {
        self.open_positions.len()
    }
}
