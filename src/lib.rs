//! tradeguard: multi-timeframe trading-decision and risk engine.
//!
//! Hexagonal architecture: decision logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], the polling loop in [`runtime`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod logging;
pub mod ports;
pub mod runtime;
