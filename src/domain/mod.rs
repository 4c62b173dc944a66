//! Core domain types and decision logic.

pub mod account;
pub mod config_validation;
pub mod confluence;
pub mod error;
pub mod indicator;
pub mod indicator_set;
pub mod ohlcv;
pub mod orchestrator;
pub mod risk;
pub mod scorer;
pub mod settings;
pub mod sizing;
pub mod stops;
pub mod strategy;
pub mod symbol;
pub mod timeframe;
