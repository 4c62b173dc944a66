//! Domain error types.

use crate::domain::timeframe::Timeframe;

/// Top-level error type for tradeguard.
#[derive(Debug, thiserror::Error)]
pub enum TradeguardError {
    #[error("insufficient history on {timeframe}: have {bars} bars, need {required}")]
    InsufficientHistory {
        timeframe: Timeframe,
        bars: usize,
        required: usize,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    #[error("position size {lots} is below the minimum tradable size {min_lot}")]
    BelowMinimumSize { lots: f64, min_lot: f64 },

    #[error("trading halted by risk governor: {reason}")]
    RiskHalt { reason: String },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("broker error: {reason}")]
    Broker { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradeguardError {
    pub fn data(reason: impl Into<String>) -> Self {
        TradeguardError::Data {
            reason: reason.into(),
        }
    }

    pub fn constraint(reason: impl Into<String>) -> Self {
        TradeguardError::ConstraintViolation {
            reason: reason.into(),
        }
    }

    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        TradeguardError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures confined to one symbol's current cycle. A risk halt is
    /// account-wide and cancellation ends the loop, so neither is cycle-local.
    pub fn is_cycle_local(&self) -> bool {
        matches!(
            self,
            TradeguardError::InsufficientHistory { .. }
                | TradeguardError::Data { .. }
                | TradeguardError::ConstraintViolation { .. }
                | TradeguardError::BelowMinimumSize { .. }
                | TradeguardError::Broker { .. }
        )
    }
}

impl From<&TradeguardError> for std::process::ExitCode {
    fn from(err: &TradeguardError) -> Self {
        let code: u8 = match err {
            TradeguardError::Io(_) => 1,
            TradeguardError::ConfigParse { .. }
            | TradeguardError::ConfigMissing { .. }
            | TradeguardError::ConfigInvalid { .. } => 2,
            TradeguardError::Broker { .. } => 3,
            TradeguardError::ConstraintViolation { .. }
            | TradeguardError::BelowMinimumSize { .. } => 4,
            TradeguardError::Data { .. } | TradeguardError::InsufficientHistory { .. } => 5,
            TradeguardError::RiskHalt { .. } => 6,
            TradeguardError::Cancelled => 130,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_history_message() {
        let err = TradeguardError::InsufficientHistory {
            timeframe: Timeframe::M15,
            bars: 40,
            required: 251,
        };
        assert_eq!(
            err.to_string(),
            "insufficient history on M15: have 40 bars, need 251"
        );
    }

    #[test]
    fn cycle_local_classification() {
        assert!(TradeguardError::data("stale").is_cycle_local());
        assert!(TradeguardError::constraint("wrong side").is_cycle_local());
        assert!(
            TradeguardError::BelowMinimumSize {
                lots: 0.004,
                min_lot: 0.01
            }
            .is_cycle_local()
        );
        assert!(
            !TradeguardError::RiskHalt {
                reason: "5 consecutive losses".into()
            }
            .is_cycle_local()
        );
        assert!(!TradeguardError::Cancelled.is_cycle_local());
    }

    #[test]
    fn invalid_helper_fills_fields() {
        match TradeguardError::invalid("risk", "hard_drawdown_pct", "must exceed soft") {
            TradeguardError::ConfigInvalid {
                section,
                key,
                reason,
            } => {
                assert_eq!(section, "risk");
                assert_eq!(key, "hard_drawdown_pct");
                assert_eq!(reason, "must exceed soft");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
