//! Port traits: the boundaries between the decision core and the outside world.

pub mod broker_port;
pub mod config_port;
pub mod decision_port;
