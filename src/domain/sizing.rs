//! Position sizing from equity, per-trade risk, volatility, grade and the governor multiplier.

use crate::domain::account::AccountState;
use crate::domain::confluence::Grade;
use crate::domain::error::TradeguardError;
use crate::domain::symbol::SymbolClassRules;

pub const VOL_SCALAR_MIN: f64 = 0.25;
pub const VOL_SCALAR_MAX: f64 = 1.5;

/// Size multiplier per confluence grade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeMultipliers {
    values: [f64; 7],
}

impl Default for GradeMultipliers {
    fn default() -> Self {
        // same order as Grade::ALL
        Self {
            values: [2.5, 2.0, 1.5, 1.0, 0.5, 0.25, 0.0],
        }
    }
}

impl GradeMultipliers {
    fn index(grade: Grade) -> usize {
        Grade::ALL.iter().position(|g| *g == grade).unwrap_or(Grade::ALL.len() - 1)
    }

    pub fn get(&self, grade: Grade) -> f64 {
        self.values[Self::index(grade)]
    }

    pub fn set(&mut self, grade: Grade, multiplier: f64) {
        self.values[Self::index(grade)] = multiplier;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizingConfig {
    /// Percent of equity risked per trade at multiplier 1.0.
    pub risk_percentage_per_trade: f64,
    pub max_grade_multiplier: f64,
    /// Stop distance assumed for sizing, in multiples of the average ATR.
    pub atr_stop_multiple: f64,
    pub grade_multipliers: GradeMultipliers,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_percentage_per_trade: 1.0,
            max_grade_multiplier: 2.5,
            atr_stop_multiple: 1.5,
            grade_multipliers: GradeMultipliers::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SizingInput<'a> {
    pub account: &'a AccountState,
    pub rules: &'a SymbolClassRules,
    pub atr: f64,
    pub atr_average: f64,
    pub grade: Grade,
    pub governor_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSize {
    pub lots: f64,
    /// Currency at risk at `lots` over `stop_pips`.
    pub risk_amount: f64,
    pub stop_pips: f64,
    pub volatility_factor: f64,
    pub grade_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn size(&self, input: &SizingInput<'_>) -> Result<PositionSize, TradeguardError> {
        if !(input.governor_multiplier > 0.0) {
            return Err(TradeguardError::RiskHalt {
                reason: "risk multiplier is zero".to_string(),
            });
        }
        let equity = input.account.equity;
        if !(equity > 0.0) {
            return Err(TradeguardError::data(format!(
                "account equity {equity} is not positive"
            )));
        }

        let rules = input.rules;
        let atr_stop_pips = input.atr_average * self.config.atr_stop_multiple / rules.pip_size;
        let stop_pips = atr_stop_pips.max(rules.min_stop_distance_pips);
        let pip_value_per_lot = rules.pip_value(1.0);
        if !(stop_pips > 0.0 && pip_value_per_lot > 0.0) {
            return Err(TradeguardError::data(
                "cannot size without a stop distance or pip value",
            ));
        }

        let risk_budget =
            equity * self.config.risk_percentage_per_trade / 100.0 * input.governor_multiplier;
        let raw_lots = risk_budget / (stop_pips * pip_value_per_lot);

        let volatility_factor = if input.atr > 0.0 && input.atr_average > 0.0 {
            (input.atr_average / input.atr).clamp(VOL_SCALAR_MIN, VOL_SCALAR_MAX)
        } else {
            1.0
        };
        let grade_multiplier = self
            .config
            .grade_multipliers
            .get(input.grade)
            .min(self.config.max_grade_multiplier);

        let lots = (raw_lots * volatility_factor * grade_multiplier).min(rules.max_lot);
        let floored = rules.floor_lots(lots);
        if floored + 1e-9 < rules.min_lot {
            return Err(TradeguardError::BelowMinimumSize {
                lots: floored,
                min_lot: rules.min_lot,
            });
        }

        Ok(PositionSize {
            lots: floored,
            risk_amount: floored * stop_pips * pip_value_per_lot,
            stop_pips,
            volatility_factor,
            grade_multiplier,
        })
    }
}
