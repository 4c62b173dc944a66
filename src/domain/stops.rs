//! Conversion of stop specifications into broker-legal absolute prices.
//!
//! | unit              | distance                                        |
//! |-------------------|-------------------------------------------------|
//! | `Pips`            | value × pip size                                |
//! | `Price`           | literal price, side-checked                     |
//! | `PricePercent`    | entry × value / 100                             |
//! | `BalancePercent`  | balance × value / 100, converted via pip value  |
//! | `EquityPercent`   | equity × value / 100, converted via pip value   |
//! | `Money`           | value, converted via pip value                  |
//!
//! Every distance is clamped up to the class minimum, then the price is rounded
//! to the instrument's digits and pushed out by a tick if rounding pulled it inside.

use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::domain::account::AccountState;
use crate::domain::error::TradeguardError;
use crate::domain::scorer::Action;
use crate::domain::symbol::SymbolClassRules;

const MAX_TICK_PUSHES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopUnit {
    Pips,
    Price,
    PricePercent,
    BalancePercent,
    EquityPercent,
    Money,
}

impl StopUnit {
    /// Units whose value is a percentage of price, balance or equity.
    pub fn is_percent(&self) -> bool {
        matches!(
            self,
            StopUnit::PricePercent | StopUnit::BalancePercent | StopUnit::EquityPercent
        )
    }

    fn is_currency(&self) -> bool {
        matches!(
            self,
            StopUnit::BalancePercent | StopUnit::EquityPercent | StopUnit::Money
        )
    }
}

impl fmt::Display for StopUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopUnit::Pips => "pips",
            StopUnit::Price => "price",
            StopUnit::PricePercent => "price_percent",
            StopUnit::BalancePercent => "balance_percent",
            StopUnit::EquityPercent => "equity_percent",
            StopUnit::Money => "money",
        };
        f.write_str(s)
    }
}

impl FromStr for StopUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pips" => Ok(StopUnit::Pips),
            "price" => Ok(StopUnit::Price),
            "price_percent" => Ok(StopUnit::PricePercent),
            "balance_percent" => Ok(StopUnit::BalancePercent),
            "equity_percent" => Ok(StopUnit::EquityPercent),
            "money" => Ok(StopUnit::Money),
            _ => Err(format!("unknown stop unit '{s}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRole {
    Tp,
    Sl,
}

impl fmt::Display for StopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopRole::Tp => f.write_str("TP"),
            StopRole::Sl => f.write_str("SL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopSpec {
    pub unit: StopUnit,
    pub value: f64,
    pub role: StopRole,
}

impl StopSpec {
    pub fn tp(unit: StopUnit, value: f64) -> Self {
        Self {
            unit,
            value,
            role: StopRole::Tp,
        }
    }

    pub fn sl(unit: StopUnit, value: f64) -> Self {
        Self {
            unit,
            value,
            role: StopRole::Sl,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StopRequest<'a> {
    pub entry_price: f64,
    pub action: Action,
    pub tp: StopSpec,
    pub sl: StopSpec,
    pub rules: &'a SymbolClassRules,
    pub account: &'a AccountState,
    /// Position size; only currency units depend on it.
    pub lots: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopLevels {
    pub tp_price: f64,
    pub sl_price: f64,
    pub tp_distance_pips: f64,
    pub sl_distance_pips: f64,
    /// Roles whose requested distance was raised to the minimum.
    pub clamped: Vec<StopRole>,
}

/// +1 when the level sits above entry, -1 when below.
fn direction(action: Action, role: StopRole) -> f64 {
    match (action, role) {
        (Action::Buy, StopRole::Tp) | (Action::Sell, StopRole::Sl) => 1.0,
        _ => -1.0,
    }
}

struct Level {
    price: f64,
    distance_pips: f64,
    clamped: bool,
}

pub fn calculate_stop_levels(req: &StopRequest<'_>) -> Result<StopLevels, TradeguardError> {
    if !req.action.is_directional() {
        return Err(TradeguardError::constraint(
            "stop levels requested for a NONE action",
        ));
    }
    if !(req.entry_price > 0.0) {
        return Err(TradeguardError::constraint(format!(
            "entry price {} is not positive",
            req.entry_price
        )));
    }
    if req.tp.role != StopRole::Tp || req.sl.role != StopRole::Sl {
        return Err(TradeguardError::constraint(
            "take-profit and stop-loss specs are swapped",
        ));
    }

    let tp = level(req, &req.tp)?;
    let sl = level(req, &req.sl)?;

    let clamped = [(StopRole::Tp, tp.clamped), (StopRole::Sl, sl.clamped)]
        .into_iter()
        .filter_map(|(role, c)| c.then_some(role))
        .collect();

    Ok(StopLevels {
        tp_price: tp.price,
        sl_price: sl.price,
        tp_distance_pips: tp.distance_pips,
        sl_distance_pips: sl.distance_pips,
        clamped,
    })
}

fn level(req: &StopRequest<'_>, spec: &StopSpec) -> Result<Level, TradeguardError> {
    let rules = req.rules;
    let entry = req.entry_price;
    let sign = direction(req.action, spec.role);
    let value = spec.value.abs();

    let requested = match spec.unit {
        StopUnit::Pips => value * rules.pip_size,
        StopUnit::Price => {
            let offset = (spec.value - entry) * sign;
            if offset <= 0.0 {
                return Err(TradeguardError::constraint(format!(
                    "{} {} price {} is on the wrong side of entry {}",
                    req.action, spec.role, spec.value, entry
                )));
            }
            offset
        }
        StopUnit::PricePercent => entry * value / 100.0,
        StopUnit::BalancePercent | StopUnit::EquityPercent | StopUnit::Money => {
            currency_distance(req, spec.unit, value)?
        }
    };

    if !requested.is_finite() {
        return Err(TradeguardError::constraint(format!(
            "{} distance for {} is not finite",
            spec.role, spec.unit
        )));
    }

    let min = rules.min_stop_distance();
    let clamped = requested < min;
    let distance = requested.max(min);
    if clamped {
        debug!(
            role = %spec.role,
            unit = %spec.unit,
            requested_pips = requested / rules.pip_size,
            min_pips = rules.min_stop_distance_pips,
            "stop distance clamped to minimum"
        );
    }

    let price = settle(entry, sign, distance, rules);
    if !(price > 0.0) {
        return Err(TradeguardError::constraint(format!(
            "{} {} {} {} puts the price at {} from entry {}",
            req.action, spec.role, spec.value, spec.unit, price, entry
        )));
    }
    Ok(Level {
        price,
        distance_pips: (price - entry).abs() / rules.pip_size,
        clamped,
    })
}

fn currency_distance(
    req: &StopRequest<'_>,
    unit: StopUnit,
    value: f64,
) -> Result<f64, TradeguardError> {
    debug_assert!(unit.is_currency());
    if !(req.lots > 0.0) {
        return Err(TradeguardError::constraint(format!(
            "{unit} stop needs a positive position size, got {} lots",
            req.lots
        )));
    }
    let amount = match unit {
        StopUnit::BalancePercent => req.account.balance * value / 100.0,
        StopUnit::EquityPercent => req.account.equity * value / 100.0,
        _ => value,
    };
    let pip_value = req.rules.pip_value(req.lots);
    Ok(amount / pip_value * req.rules.pip_size)
}

/// Rounds to digits, then steps outward one tick at a time until the level is
/// strictly on its side of entry and at least the minimum distance away.
fn settle(entry: f64, sign: f64, distance: f64, rules: &SymbolClassRules) -> f64 {
    let min = rules.min_stop_distance();
    let tick = rules.tick();
    let tolerance = tick * 1e-6;
    let mut price = rules.round_price(entry + sign * distance);
    for _ in 0..MAX_TICK_PUSHES {
        let offset = (price - entry) * sign;
        if offset > tolerance && offset >= min - tolerance {
            break;
        }
        price = rules.round_price(price + sign * tick);
    }
    price
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::InstrumentClass;
    use approx::assert_relative_eq;

    fn eurusd() -> SymbolClassRules {
        InstrumentClass::ForexMajor.default_rules()
    }

    fn account() -> AccountState {
        AccountState::new(10_000.0, 9_000.0)
    }

    fn request<'a>(
        action: Action,
        entry: f64,
        tp: StopSpec,
        sl: StopSpec,
        rules: &'a SymbolClassRules,
        account: &'a AccountState,
        lots: f64,
    ) -> StopRequest<'a> {
        StopRequest {
            entry_price: entry,
            action,
            tp,
            sl,
            rules,
            account,
            lots,
        }
    }

    #[test]
    fn balance_percent_take_profit() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.10000,
            StopSpec::tp(StopUnit::BalancePercent, 2.0),
            StopSpec::sl(StopUnit::Pips, 50.0),
            &rules,
            &acct,
            0.1,
        );
        let levels = calculate_stop_levels(&req).unwrap();
        assert_relative_eq!(levels.tp_price, 1.12000, epsilon = 1e-9);
        assert_relative_eq!(levels.tp_distance_pips, 200.0, epsilon = 1e-6);
        assert_relative_eq!(levels.sl_price, 1.09500, epsilon = 1e-9);
        assert!(levels.clamped.is_empty());
    }

    #[test]
    fn equity_percent_uses_equity() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.10000,
            StopSpec::tp(StopUnit::Pips, 30.0),
            StopSpec::sl(StopUnit::EquityPercent, 1.0),
            &rules,
            &acct,
            1.0,
        );
        // 90 currency / 10 per pip = 9 pips, below the 10 pip minimum
        let levels = calculate_stop_levels(&req).unwrap();
        assert_relative_eq!(levels.sl_price, 1.09900, epsilon = 1e-9);
        assert_eq!(levels.clamped, vec![StopRole::Sl]);
    }

    #[test]
    fn gold_distance_clamped_to_minimum() {
        let rules = InstrumentClass::Metal.default_rules();
        let acct = account();
        let req = request(
            Action::Buy,
            2000.00,
            StopSpec::tp(StopUnit::Pips, 10.0),
            StopSpec::sl(StopUnit::Pips, 150.0),
            &rules,
            &acct,
            0.1,
        );
        let levels = calculate_stop_levels(&req).unwrap();
        assert_relative_eq!(levels.tp_price, 2001.00, epsilon = 1e-9);
        assert_relative_eq!(levels.tp_distance_pips, 100.0, epsilon = 1e-6);
        assert_relative_eq!(levels.sl_price, 1998.50, epsilon = 1e-9);
        assert_eq!(levels.clamped, vec![StopRole::Tp]);
    }

    #[test]
    fn sell_price_tp_above_entry_is_violation() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Sell,
            1.10000,
            StopSpec::tp(StopUnit::Price, 1.10500),
            StopSpec::sl(StopUnit::Pips, 20.0),
            &rules,
            &acct,
            0.1,
        );
        assert!(matches!(
            calculate_stop_levels(&req),
            Err(TradeguardError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn sell_levels_are_mirrored() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Sell,
            1.10000,
            StopSpec::tp(StopUnit::Price, 1.09000),
            StopSpec::sl(StopUnit::PricePercent, 0.5),
            &rules,
            &acct,
            0.1,
        );
        let levels = calculate_stop_levels(&req).unwrap();
        assert_relative_eq!(levels.tp_price, 1.09000, epsilon = 1e-9);
        assert_relative_eq!(levels.sl_price, 1.10550, epsilon = 1e-9);
        assert!(levels.sl_price > 1.1 && levels.tp_price < 1.1);
    }

    #[test]
    fn price_inside_minimum_is_pushed_out() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.10000,
            StopSpec::tp(StopUnit::Price, 1.10020),
            StopSpec::sl(StopUnit::Pips, 20.0),
            &rules,
            &acct,
            0.1,
        );
        let levels = calculate_stop_levels(&req).unwrap();
        assert_relative_eq!(levels.tp_price, 1.10100, epsilon = 1e-9);
        assert_eq!(levels.clamped, vec![StopRole::Tp]);
    }

    #[test]
    fn money_stop_without_size_is_violation() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.10000,
            StopSpec::tp(StopUnit::Pips, 20.0),
            StopSpec::sl(StopUnit::Money, 50.0),
            &rules,
            &acct,
            0.0,
        );
        assert!(calculate_stop_levels(&req).is_err());
    }

    #[test]
    fn negative_values_are_taken_as_absolute() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.10000,
            StopSpec::tp(StopUnit::Pips, -40.0),
            StopSpec::sl(StopUnit::Pips, -20.0),
            &rules,
            &acct,
            0.1,
        );
        let levels = calculate_stop_levels(&req).unwrap();
        assert_relative_eq!(levels.tp_price, 1.10400, epsilon = 1e-9);
        assert_relative_eq!(levels.sl_price, 1.09800, epsilon = 1e-9);
    }

    #[test]
    fn rounding_never_lands_inside_minimum() {
        // off-grid entry: rounding the raw level would lose half a tick
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.100004,
            StopSpec::tp(StopUnit::Pips, 10.0),
            StopSpec::sl(StopUnit::Pips, 10.0),
            &rules,
            &acct,
            0.1,
        );
        let levels = calculate_stop_levels(&req).unwrap();
        let min = rules.min_stop_distance();
        assert!(levels.tp_price - 1.100004 >= min - 1e-12);
        assert!(1.100004 - levels.sl_price >= min - 1e-12);
    }

    #[test]
    fn none_action_is_rejected() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::None,
            1.1,
            StopSpec::tp(StopUnit::Pips, 10.0),
            StopSpec::sl(StopUnit::Pips, 10.0),
            &rules,
            &acct,
            0.1,
        );
        assert!(calculate_stop_levels(&req).is_err());
    }

    #[test]
    fn price_percent_past_entry_is_rejected() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Buy,
            1.1,
            StopSpec::tp(StopUnit::Pips, 20.0),
            StopSpec::sl(StopUnit::PricePercent, 150.0),
            &rules,
            &acct,
            0.1,
        );
        let err = calculate_stop_levels(&req).unwrap_err();
        assert!(matches!(err, TradeguardError::ConstraintViolation { .. }));
    }

    #[test]
    fn currency_stop_below_zero_is_rejected() {
        let rules = InstrumentClass::Crypto.default_rules();
        let acct = AccountState::new(10_000.0, 10_000.0);
        // 200 currency at 0.01 per pip is 20000 pips below a 3000 entry
        let req = request(
            Action::Buy,
            3000.0,
            StopSpec::tp(StopUnit::Pips, 100.0),
            StopSpec::sl(StopUnit::BalancePercent, 2.0),
            &rules,
            &acct,
            0.01,
        );
        let err = calculate_stop_levels(&req).unwrap_err();
        assert!(matches!(err, TradeguardError::ConstraintViolation { .. }));
    }

    #[test]
    fn sell_take_profit_below_zero_is_rejected() {
        let rules = eurusd();
        let acct = account();
        let req = request(
            Action::Sell,
            1.1,
            StopSpec::tp(StopUnit::Money, 20_000.0),
            StopSpec::sl(StopUnit::Pips, 20.0),
            &rules,
            &acct,
            0.1,
        );
        assert!(calculate_stop_levels(&req).is_err());
    }

    #[test]
    fn percent_units() {
        assert!(StopUnit::PricePercent.is_percent());
        assert!(StopUnit::EquityPercent.is_percent());
        assert!(!StopUnit::Money.is_percent());
        assert!(!StopUnit::Pips.is_percent());
    }

    #[test]
    fn units_parse() {
        assert_eq!("balance_percent".parse::<StopUnit>().unwrap(), StopUnit::BalancePercent);
        assert_eq!("PIPS".parse::<StopUnit>().unwrap(), StopUnit::Pips);
        assert!("points".parse::<StopUnit>().is_err());
    }
}
