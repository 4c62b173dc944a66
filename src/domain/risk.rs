//! Account-wide risk governor and the shared account book.
//!
//! The governor is a three-state machine (NORMAL, REDUCED, HALTED) driven by
//! trade closes and equity snapshots. HALTED only clears on an explicit
//! [`ResetKind::Full`]. The governor also decides trailing-stop moves for open
//! positions; those only ever ratchet in the position's favour.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::account::{AccountState, OpenPosition, TradeCloseEvent};
use crate::domain::scorer::Action;
use crate::domain::symbol::SymbolClassRules;

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub soft_drawdown_pct: f64,
    pub hard_drawdown_pct: f64,
    pub soft_loss_streak: u32,
    pub hard_loss_streak: u32,
    /// REDUCED relaxes to NORMAL once drawdown is back at or below this.
    pub recovery_drawdown_pct: f64,
    pub reduced_multiplier: f64,
    pub trail_atr_multiple: f64,
    pub trail_min_profit_pips: f64,
    pub trail_step_pips: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            soft_drawdown_pct: 10.0,
            hard_drawdown_pct: 20.0,
            soft_loss_streak: 3,
            hard_loss_streak: 5,
            recovery_drawdown_pct: 5.0,
            reduced_multiplier: 0.5,
            trail_atr_multiple: 2.0,
            trail_min_profit_pips: 0.0,
            trail_step_pips: 0.0,
        }
    }
}

/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskMode {
    Normal,
    Reduced,
    Halted,
}

impl fmt::Display for RiskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskMode::Normal => "NORMAL",
            RiskMode::Reduced => "REDUCED",
            RiskMode::Halted => "HALTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskState {
    pub consecutive_losses: u32,
    pub current_drawdown_pct: f64,
    pub peak_equity: f64,
    pub last_equity: f64,
    pub mode: RiskMode,
    pub halt_reason: Option<String>,
}

impl RiskState {
    pub fn new(equity: f64) -> Self {
        Self {
            consecutive_losses: 0,
            current_drawdown_pct: 0.0,
            peak_equity: equity,
            last_equity: equity,
            mode: RiskMode::Normal,
            halt_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskTransition {
    pub from: RiskMode,
    pub to: RiskMode,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Periodic re-anchor (e.g. daily rollover). Never clears HALTED.
    Baseline,
    /// Operator reset: back to NORMAL with a fresh baseline.
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStopUpdate {
    pub symbol: String,
    pub ticket: u64,
    pub new_sl_price: f64,
    pub previous_sl_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RiskGovernor {
    config: RiskConfig,
    state: RiskState,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig, starting_equity: f64) -> Self {
        Self {
            config,
            state: RiskState::new(starting_equity),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn mode(&self) -> RiskMode {
        self.state.mode
    }

    pub fn multiplier(&self) -> f64 {
        match self.state.mode {
            RiskMode::Normal => 1.0,
            RiskMode::Reduced => self.config.reduced_multiplier,
            RiskMode::Halted => 0.0,
        }
    }

    pub fn trading_allowed(&self) -> bool {
        self.state.mode != RiskMode::Halted
    }

    pub fn on_trade_closed(&mut self, event: &TradeCloseEvent) -> Option<RiskTransition> {
        if event.pnl < 0.0 {
            self.state.consecutive_losses += 1;
        } else if event.pnl > 0.0 {
            self.state.consecutive_losses = 0;
        }
        let equity = self.state.last_equity + event.pnl;
        self.mark_equity(equity);
        self.evaluate()
    }

    pub fn on_equity_snapshot(&mut self, equity: f64) -> Option<RiskTransition> {
        self.mark_equity(equity);
        self.evaluate()
    }

    pub fn reset(&mut self, kind: ResetKind, equity: f64) -> Option<RiskTransition> {
        let from = self.state.mode;
        match kind {
            ResetKind::Full => {
                self.state = RiskState::new(equity);
                info!(%from, equity, "risk governor fully reset");
            }
            ResetKind::Baseline => {
                self.state.peak_equity = equity;
                self.state.last_equity = equity;
                self.state.current_drawdown_pct = 0.0;
                if self.state.mode == RiskMode::Reduced
                    && self.state.consecutive_losses < self.config.soft_loss_streak
                {
                    self.state.mode = RiskMode::Normal;
                }
            }
        }
        (self.state.mode != from).then(|| RiskTransition {
            from,
            to: self.state.mode,
            reason: format!("{kind:?} reset"),
        })
    }

    fn mark_equity(&mut self, equity: f64) {
        let s = &mut self.state;
        s.last_equity = equity;
        if equity > s.peak_equity {
            s.peak_equity = equity;
        }
        s.current_drawdown_pct = if s.peak_equity > 0.0 {
            ((s.peak_equity - equity) / s.peak_equity * 100.0).max(0.0)
        } else {
            0.0
        };
    }

    fn evaluate(&mut self) -> Option<RiskTransition> {
        let c = &self.config;
        let s = &self.state;
        let from = s.mode;
        let dd = s.current_drawdown_pct;
        let losses = s.consecutive_losses;

        let (to, reason) = match from {
            RiskMode::Halted => return None,
            _ if dd >= c.hard_drawdown_pct => (
                RiskMode::Halted,
                format!("drawdown {dd:.2}% reached hard limit {}%", c.hard_drawdown_pct),
            ),
            _ if losses >= c.hard_loss_streak => (
                RiskMode::Halted,
                format!("{losses} consecutive losses reached hard limit {}", c.hard_loss_streak),
            ),
            RiskMode::Normal if dd >= c.soft_drawdown_pct => (
                RiskMode::Reduced,
                format!("drawdown {dd:.2}% reached soft limit {}%", c.soft_drawdown_pct),
            ),
            RiskMode::Normal if losses >= c.soft_loss_streak => (
                RiskMode::Reduced,
                format!("{losses} consecutive losses reached soft limit {}", c.soft_loss_streak),
            ),
            RiskMode::Reduced
                if dd <= c.recovery_drawdown_pct && losses < c.soft_loss_streak =>
            {
                (
                    RiskMode::Normal,
                    format!("drawdown {dd:.2}% back within recovery band {}%", c.recovery_drawdown_pct),
                )
            }
            _ => return None,
        };

        self.state.mode = to;
        if to == RiskMode::Halted {
            self.state.halt_reason = Some(reason.clone());
        }
        warn!(%from, %to, %reason, "risk mode changed");
        Some(RiskTransition { from, to, reason })
    }

    /// Proposed stop move for one position, or `None` when the stop should stay.
    ///
    /// The trail sits `max(atr × trail_atr_multiple, min stop distance)` behind the
    /// exit-side price (bid for longs, ask for shorts).
    pub fn trailing_update(
        &self,
        position: &OpenPosition,
        bid: f64,
        ask: f64,
        atr: f64,
        rules: &SymbolClassRules,
    ) -> Option<TrailingStopUpdate> {
        let (price, sign) = match position.action {
            Action::Buy => (bid, 1.0),
            Action::Sell => (ask, -1.0),
            Action::None => return None,
        };
        if !(price > 0.0) {
            return None;
        }

        let profit_pips = position.favourable_move(price) / rules.pip_size;
        if profit_pips < self.config.trail_min_profit_pips {
            return None;
        }

        let min = rules.min_stop_distance();
        let distance = (atr * self.config.trail_atr_multiple).max(min);
        let mut candidate = rules.round_price(price - sign * distance);
        if (price - candidate) * sign < min - rules.tick() * 1e-6 {
            candidate = rules.round_price(candidate - sign * rules.tick());
        }

        let step = self.config.trail_step_pips * rules.pip_size;
        let better = match position.sl_price {
            None => true,
            Some(sl) => position.improves_stop(candidate) && (candidate - sl) * sign > step,
        };
        better.then(|| TrailingStopUpdate {
            symbol: position.symbol.clone(),
            ticket: position.ticket,
            new_sl_price: candidate,
            previous_sl_price: position.sl_price,
        })
    }
}

/// Consistent copy of the shared account-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub risk: RiskState,
    pub multiplier: f64,
    pub account: AccountState,
}

/// Closed tickets remembered for de-duplication.
const APPLIED_TICKET_WINDOW: usize = 4_096;

/// Most recent applied tickets, oldest evicted first.
struct TicketWindow {
    capacity: usize,
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl TicketWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// False when `ticket` is already in the window.
    fn insert(&mut self, ticket: u64) -> bool {
        if !self.seen.insert(ticket) {
            return false;
        }
        self.order.push_back(ticket);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

struct BookInner {
    governor: RiskGovernor,
    account: AccountState,
    applied_tickets: TicketWindow,
}

/// Risk governor and account state behind one lock.
///
/// Every read-decide-write on either goes through a single short critical
/// section. Share it as `Arc<AccountBook>`.
pub struct AccountBook {
    inner: Mutex<BookInner>,
}

impl AccountBook {
    pub fn new(config: RiskConfig, account: AccountState) -> Self {
        let governor = RiskGovernor::new(config, account.equity);
        Self {
            inner: Mutex::new(BookInner {
                governor,
                account,
                applied_tickets: TicketWindow::new(APPLIED_TICKET_WINDOW),
            }),
        }
    }

    pub fn snapshot(&self) -> BookSnapshot {
        let inner = self.inner.lock();
        BookSnapshot {
            risk: inner.governor.state().clone(),
            multiplier: inner.governor.multiplier(),
            account: inner.account.clone(),
        }
    }

    pub fn mode(&self) -> RiskMode {
        self.inner.lock().governor.mode()
    }

    pub fn is_halted(&self) -> bool {
        self.mode() == RiskMode::Halted
    }

    /// Applies trade closes (each ticket at most once) and then the equity snapshot.
    pub fn apply(
        &self,
        closes: &[TradeCloseEvent],
        account: Option<AccountState>,
    ) -> Vec<RiskTransition> {
        let mut inner = self.inner.lock();
        let mut transitions = Vec::new();
        for event in closes {
            if !inner.applied_tickets.insert(event.ticket) {
                continue;
            }
            if let Some(t) = inner.governor.on_trade_closed(event) {
                transitions.push(t);
            }
        }
        if let Some(account) = account {
            let equity = account.equity;
            inner.account = account;
            if let Some(t) = inner.governor.on_equity_snapshot(equity) {
                transitions.push(t);
            }
        }
        transitions
    }

    pub fn record_close(&self, event: &TradeCloseEvent) -> Option<RiskTransition> {
        self.apply(std::slice::from_ref(event), None).pop()
    }

    pub fn reset(&self, kind: ResetKind) -> Option<RiskTransition> {
        let mut inner = self.inner.lock();
        let equity = inner.account.equity;
        inner.governor.reset(kind, equity)
    }

    pub fn trailing_updates(
        &self,
        symbol: &str,
        bid: f64,
        ask: f64,
        atr: f64,
        rules: &SymbolClassRules,
    ) -> Vec<TrailingStopUpdate> {
        let inner = self.inner.lock();
        inner
            .account
            .positions_for(symbol)
            .filter_map(|p| inner.governor.trailing_update(p, bid, ask, atr, rules))
            .collect()
    }
}
