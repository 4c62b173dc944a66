//! Configuration validation.
//!
//! Cross-field checks that run after every key has parsed. Per-key parse
//! failures are reported while loading; these catch combinations that parse
//! fine but cannot work together.

use crate::domain::error::TradeguardError;
use crate::domain::settings::Settings;

pub fn validate_settings(settings: &Settings) -> Result<(), TradeguardError> {
    validate_engine(settings)?;
    validate_strategy(settings)?;
    validate_indicators(settings)?;
    validate_account(settings)?;
    validate_risk(settings)?;
    validate_gate(settings)?;
    Ok(())
}

/// Extra checks for commands that evaluate symbols.
pub fn validate_runnable(settings: &Settings) -> Result<(), TradeguardError> {
    if settings.engine.symbols.is_empty() {
        return Err(TradeguardError::ConfigMissing {
            section: "engine".to_string(),
            key: "symbols".to_string(),
        });
    }
    Ok(())
}

fn validate_engine(settings: &Settings) -> Result<(), TradeguardError> {
    let engine = &settings.engine;
    if engine.poll_interval.is_zero() {
        return Err(TradeguardError::invalid(
            "engine",
            "poll_interval_secs",
            "poll_interval_secs must be positive",
        ));
    }
    if !(engine.starting_balance > 0.0) {
        return Err(TradeguardError::invalid("account", "balance", "balance must be positive"));
    }
    if !(engine.starting_equity > 0.0) {
        return Err(TradeguardError::invalid("account", "equity", "equity must be positive"));
    }
    Ok(())
}

fn validate_strategy(settings: &Settings) -> Result<(), TradeguardError> {
    let strategy = &settings.strategy;
    if strategy.timeframes.is_empty() {
        return Err(TradeguardError::invalid(
            "strategy",
            "timeframes",
            "timeframe set is empty",
        ));
    }
    if let Some((tf, _)) = strategy.timeframes.iter().find(|(_, w)| !(*w > 0.0)) {
        return Err(TradeguardError::invalid(
            "strategy",
            "timeframes",
            format!("weight for {tf} must be positive"),
        ));
    }
    for (spec, key) in [(&strategy.tp, "tp_value"), (&strategy.sl, "sl_value")] {
        if !(spec.value.is_finite() && spec.value != 0.0) {
            return Err(TradeguardError::invalid("strategy", key, format!("{key} must be non-zero")));
        }
        if spec.unit.is_percent() && spec.value.abs() >= 100.0 {
            return Err(TradeguardError::invalid(
                "strategy",
                key,
                format!("{key} must be below 100 for {}", spec.unit),
            ));
        }
    }
    Ok(())
}

fn validate_indicators(settings: &Settings) -> Result<(), TradeguardError> {
    let c = &settings.indicators;
    let periods = [
        ("ema_fast", c.ema_fast),
        ("ema_slow", c.ema_slow),
        ("ema_trend", c.ema_trend),
        ("rsi_period", c.rsi_period),
        ("macd_fast", c.macd_fast),
        ("macd_slow", c.macd_slow),
        ("macd_signal", c.macd_signal),
        ("bollinger_period", c.bollinger_period),
        ("atr_period", c.atr_period),
        ("atr_average_period", c.atr_average_period),
        ("stoch_k", c.stoch_k),
        ("stoch_d", c.stoch_d),
        ("roc_period", c.roc_period),
    ];
    for (key, period) in periods {
        if period == 0 {
            return Err(TradeguardError::invalid(
                "indicators",
                key,
                format!("{key} must be at least 1"),
            ));
        }
    }
    if c.ema_fast >= c.ema_slow {
        return Err(TradeguardError::invalid(
            "indicators",
            "ema_fast",
            "ema_fast must be shorter than ema_slow",
        ));
    }
    if c.macd_fast >= c.macd_slow {
        return Err(TradeguardError::invalid(
            "indicators",
            "macd_fast",
            "macd_fast must be shorter than macd_slow",
        ));
    }
    Ok(())
}

fn validate_account(settings: &Settings) -> Result<(), TradeguardError> {
    let sizing = &settings.sizing;
    let risk_pct = sizing.risk_percentage_per_trade;
    if !(risk_pct > 0.0 && risk_pct <= 100.0) {
        return Err(TradeguardError::invalid(
            "account",
            "risk_percentage_per_trade",
            "risk_percentage_per_trade must be in (0, 100]",
        ));
    }
    if !(sizing.max_grade_multiplier > 0.0) {
        return Err(TradeguardError::invalid(
            "account",
            "max_grade_multiplier",
            "max_grade_multiplier must be positive",
        ));
    }
    if !(sizing.atr_stop_multiple > 0.0) {
        return Err(TradeguardError::invalid(
            "account",
            "atr_stop_multiple",
            "atr_stop_multiple must be positive",
        ));
    }
    for grade in crate::domain::confluence::Grade::ALL {
        if sizing.grade_multipliers.get(grade) < 0.0 {
            let key = format!("grade_{}", grade.key());
            return Err(TradeguardError::invalid(
                "account",
                &key,
                "grade multipliers must be non-negative",
            ));
        }
    }
    Ok(())
}

fn validate_risk(settings: &Settings) -> Result<(), TradeguardError> {
    let r = &settings.risk;
    if !(r.soft_drawdown_pct > 0.0) {
        return Err(TradeguardError::invalid(
            "risk",
            "soft_drawdown_pct",
            "soft_drawdown_pct must be positive",
        ));
    }
    if r.soft_drawdown_pct >= r.hard_drawdown_pct {
        return Err(TradeguardError::invalid(
            "risk",
            "soft_drawdown_pct",
            "soft_drawdown_pct must be below hard_drawdown_pct",
        ));
    }
    if r.hard_drawdown_pct > 100.0 {
        return Err(TradeguardError::invalid(
            "risk",
            "hard_drawdown_pct",
            "hard_drawdown_pct cannot exceed 100",
        ));
    }
    if r.soft_loss_streak == 0 || r.soft_loss_streak >= r.hard_loss_streak {
        return Err(TradeguardError::invalid(
            "risk",
            "soft_loss_streak",
            "soft_loss_streak must be at least 1 and below hard_loss_streak",
        ));
    }
    if r.recovery_drawdown_pct < 0.0 || r.recovery_drawdown_pct >= r.soft_drawdown_pct {
        return Err(TradeguardError::invalid(
            "risk",
            "recovery_drawdown_pct",
            "recovery_drawdown_pct must be in [0, soft_drawdown_pct)",
        ));
    }
    if !(r.reduced_multiplier > 0.0 && r.reduced_multiplier <= 1.0) {
        return Err(TradeguardError::invalid(
            "risk",
            "reduced_multiplier",
            "reduced_multiplier must be in (0, 1]",
        ));
    }
    if !(r.trail_atr_multiple > 0.0) {
        return Err(TradeguardError::invalid(
            "risk",
            "trail_atr_multiple",
            "trail_atr_multiple must be positive",
        ));
    }
    if r.trail_min_profit_pips < 0.0 || r.trail_step_pips < 0.0 {
        return Err(TradeguardError::invalid(
            "risk",
            "trail_step_pips",
            "trailing thresholds must be non-negative",
        ));
    }
    Ok(())
}

fn validate_gate(settings: &Settings) -> Result<(), TradeguardError> {
    if let Some(rescue) = &settings.gate.rescue {
        if rescue.floor > settings.gate.min_confidence {
            return Err(TradeguardError::invalid(
                "gate",
                "rescue_floor",
                "rescue_floor must not exceed min_confidence",
            ));
        }
    }
    Ok(())
}
