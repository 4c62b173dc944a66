//! Typed engine settings assembled from a [`ConfigPort`].
//!
//! Every key is optional and falls back to the built-in default. A present but
//! unparseable value is a `ConfigInvalid` error, never a silent default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::confluence::{ConfidenceGate, Grade, RescueConditions};
use crate::domain::error::TradeguardError;
use crate::domain::indicator_set::IndicatorConfig;
use crate::domain::risk::RiskConfig;
use crate::domain::scorer::{ScoringConfig, TieBreak};
use crate::domain::sizing::SizingConfig;
use crate::domain::stops::{StopSpec, StopUnit};
use crate::domain::strategy::{parse_timeframe_weights, Strategy, StrategyKind};
use crate::domain::symbol::{ClassRulesTable, InstrumentClass, SymbolClassRules};
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub symbols: Vec<String>,
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    /// `None` disables the staleness check.
    pub max_bar_age: Option<chrono::Duration>,
    pub forward_fill: bool,
    pub starting_balance: f64,
    pub starting_equity: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            data_dir: PathBuf::from("data"),
            poll_interval: Duration::from_secs(5),
            max_bar_age: None,
            forward_fill: false,
            starting_balance: 10_000.0,
            starting_equity: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub engine: EngineSettings,
    pub strategy: Strategy,
    pub indicators: IndicatorConfig,
    pub sizing: SizingConfig,
    pub risk: RiskConfig,
    pub gate: ConfidenceGate,
    pub classes: ClassRulesTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            strategy: Strategy::profile(StrategyKind::Scalping),
            indicators: IndicatorConfig::default(),
            sizing: SizingConfig::default(),
            risk: RiskConfig::default(),
            gate: ConfidenceGate::default(),
            classes: ClassRulesTable::default(),
        }
    }
}

impl Settings {
    pub fn load(config: &dyn ConfigPort) -> Result<Self, TradeguardError> {
        let settings = Settings {
            engine: read_engine(config)?,
            strategy: read_strategy(config)?,
            indicators: read_indicators(config)?,
            sizing: read_sizing(config)?,
            risk: read_risk(config)?,
            gate: read_gate(config)?,
            classes: read_classes(config)?,
        };
        crate::domain::config_validation::validate_settings(&settings)?;
        Ok(settings)
    }

    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig {
            signal_threshold: self.strategy.signal_threshold,
            tie_break: self.strategy.tie_break,
            ..ScoringConfig::default()
        }
    }
}

fn number<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, TradeguardError> {
    match config.get_string(section, key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            TradeguardError::invalid(section, key, format!("'{}' is not a valid number", raw.trim()))
        }),
        _ => Ok(default),
    }
}

fn named<T: FromStr<Err = String>>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, TradeguardError> {
    match config.get_string(section, key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .parse()
            .map(Some)
            .map_err(|reason| TradeguardError::invalid(section, key, reason)),
        _ => Ok(None),
    }
}

fn named_list<T: FromStr<Err = String>>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Vec<T>, TradeguardError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|reason| TradeguardError::invalid(section, key, reason)))
        .collect()
}

fn read_engine(config: &dyn ConfigPort) -> Result<EngineSettings, TradeguardError> {
    let defaults = EngineSettings::default();
    let symbols = config
        .get_string("engine", "symbols")
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let data_dir = config
        .get_string("engine", "data_dir")
        .map(PathBuf::from)
        .unwrap_or(defaults.data_dir);
    let poll_secs: u64 = number(config, "engine", "poll_interval_secs", 5)?;
    let max_age_secs: i64 = number(config, "engine", "max_bar_age_secs", 0)?;
    let starting_balance: f64 = number(config, "account", "balance", defaults.starting_balance)?;
    let starting_equity: f64 = number(config, "account", "equity", starting_balance)?;

    Ok(EngineSettings {
        symbols,
        data_dir,
        poll_interval: Duration::from_secs(poll_secs),
        max_bar_age: (max_age_secs > 0).then(|| chrono::Duration::seconds(max_age_secs)),
        forward_fill: config.get_bool("engine", "forward_fill", false),
        starting_balance,
        starting_equity,
    })
}

fn read_strategy(config: &dyn ConfigPort) -> Result<Strategy, TradeguardError> {
    let kind: StrategyKind = named(config, "engine", "strategy")?.unwrap_or(StrategyKind::Scalping);
    let mut strategy = Strategy::profile(kind);

    strategy.signal_threshold =
        number(config, "strategy", "signal_threshold", strategy.signal_threshold)?;
    if let Some(tie_break) = named::<TieBreak>(config, "strategy", "tie_break")? {
        strategy.tie_break = tie_break;
    }
    if let Some(raw) = config.get_string("strategy", "timeframes") {
        strategy.timeframes = parse_timeframe_weights(&raw)
            .map_err(|reason| TradeguardError::invalid("strategy", "timeframes", reason))?;
    }

    let tp_unit: StopUnit = named(config, "strategy", "tp_unit")?.unwrap_or(strategy.tp.unit);
    let tp_value = number(config, "strategy", "tp_value", strategy.tp.value)?;
    strategy.tp = StopSpec::tp(tp_unit, tp_value);

    let sl_unit: StopUnit = named(config, "strategy", "sl_unit")?.unwrap_or(strategy.sl.unit);
    let sl_value = number(config, "strategy", "sl_value", strategy.sl.value)?;
    strategy.sl = StopSpec::sl(sl_unit, sl_value);

    Ok(strategy)
}

fn read_indicators(config: &dyn ConfigPort) -> Result<IndicatorConfig, TradeguardError> {
    let d = IndicatorConfig::default();
    let s = "indicators";
    let bollinger_mult: f64 = number(config, s, "bollinger_mult", d.bollinger_mult_x100 as f64 / 100.0)?;
    if !(bollinger_mult > 0.0) {
        return Err(TradeguardError::invalid(s, "bollinger_mult", "must be positive"));
    }
    Ok(IndicatorConfig {
        ema_fast: number(config, s, "ema_fast", d.ema_fast)?,
        ema_slow: number(config, s, "ema_slow", d.ema_slow)?,
        ema_trend: number(config, s, "ema_trend", d.ema_trend)?,
        rsi_period: number(config, s, "rsi_period", d.rsi_period)?,
        macd_fast: number(config, s, "macd_fast", d.macd_fast)?,
        macd_slow: number(config, s, "macd_slow", d.macd_slow)?,
        macd_signal: number(config, s, "macd_signal", d.macd_signal)?,
        bollinger_period: number(config, s, "bollinger_period", d.bollinger_period)?,
        bollinger_mult_x100: (bollinger_mult * 100.0).round() as u32,
        atr_period: number(config, s, "atr_period", d.atr_period)?,
        atr_average_period: number(config, s, "atr_average_period", d.atr_average_period)?,
        stoch_k: number(config, s, "stoch_k", d.stoch_k)?,
        stoch_d: number(config, s, "stoch_d", d.stoch_d)?,
        roc_period: number(config, s, "roc_period", d.roc_period)?,
    })
}

fn read_sizing(config: &dyn ConfigPort) -> Result<SizingConfig, TradeguardError> {
    let d = SizingConfig::default();
    let s = "account";
    let mut grade_multipliers = d.grade_multipliers;
    for grade in Grade::ALL {
        let key = format!("grade_{}", grade.key());
        let value = number(config, s, &key, grade_multipliers.get(grade))?;
        grade_multipliers.set(grade, value);
    }
    Ok(SizingConfig {
        risk_percentage_per_trade: number(
            config,
            s,
            "risk_percentage_per_trade",
            d.risk_percentage_per_trade,
        )?,
        max_grade_multiplier: number(config, s, "max_grade_multiplier", d.max_grade_multiplier)?,
        atr_stop_multiple: number(config, s, "atr_stop_multiple", d.atr_stop_multiple)?,
        grade_multipliers,
    })
}

fn read_risk(config: &dyn ConfigPort) -> Result<RiskConfig, TradeguardError> {
    let d = RiskConfig::default();
    let s = "risk";
    Ok(RiskConfig {
        soft_drawdown_pct: number(config, s, "soft_drawdown_pct", d.soft_drawdown_pct)?,
        hard_drawdown_pct: number(config, s, "hard_drawdown_pct", d.hard_drawdown_pct)?,
        soft_loss_streak: number(config, s, "soft_loss_streak", d.soft_loss_streak)?,
        hard_loss_streak: number(config, s, "hard_loss_streak", d.hard_loss_streak)?,
        recovery_drawdown_pct: number(config, s, "recovery_drawdown_pct", d.recovery_drawdown_pct)?,
        reduced_multiplier: number(config, s, "reduced_multiplier", d.reduced_multiplier)?,
        trail_atr_multiple: number(config, s, "trail_atr_multiple", d.trail_atr_multiple)?,
        trail_min_profit_pips: number(config, s, "trail_min_profit_pips", d.trail_min_profit_pips)?,
        trail_step_pips: number(config, s, "trail_step_pips", d.trail_step_pips)?,
    })
}

fn read_classes(config: &dyn ConfigPort) -> Result<ClassRulesTable, TradeguardError> {
    let mut table = ClassRulesTable::default();
    for class in InstrumentClass::ALL {
        let section = format!("class.{}", class.name());
        let s = section.as_str();
        let d = table.get(class);
        let rules = SymbolClassRules {
            pip_size: number(config, s, "pip_size", d.pip_size)?,
            min_stop_distance_pips: number(config, s, "min_stop_distance_pips", d.min_stop_distance_pips)?,
            price_digits: number(config, s, "price_digits", d.price_digits)?,
            contract_size: number(config, s, "contract_size", d.contract_size)?,
            min_lot: number(config, s, "min_lot", d.min_lot)?,
            lot_step: number(config, s, "lot_step", d.lot_step)?,
            max_lot: number(config, s, "max_lot", d.max_lot)?,
        };
        rules.validate(s)?;
        table.set(class, rules);
    }
    Ok(table)
}

fn read_gate(config: &dyn ConfigPort) -> Result<ConfidenceGate, TradeguardError> {
    let min: u32 = number(config, "gate", "min_confidence", 68)?;
    Ok(ConfidenceGate {
        min_confidence: percent("min_confidence", min)?,
        rescue: read_rescue(config)?,
    })
}

/// Rescue settings are only read when `rescue_enabled` is set.
fn read_rescue(config: &dyn ConfigPort) -> Result<Option<RescueConditions>, TradeguardError> {
    if !config.get_bool("gate", "rescue_enabled", false) {
        return Ok(None);
    }
    let floor: u32 = number(config, "gate", "rescue_floor", 60)?;
    Ok(Some(RescueConditions {
        floor: percent("rescue_floor", floor)?,
        volatility: named_list(config, "gate", "rescue_volatility")?,
        sessions: named_list(config, "gate", "rescue_sessions")?,
        tiers: named_list(config, "gate", "rescue_tiers")?,
    }))
}

fn percent(key: &str, value: u32) -> Result<u8, TradeguardError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| TradeguardError::invalid("gate", key, "must be between 0 and 100"))
}
