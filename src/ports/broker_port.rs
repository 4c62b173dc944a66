//! Broker connectivity port.

use crate::domain::error::TradeguardError;
use crate::domain::orchestrator::BrokerSnapshot;

/// Read-only view of a broker: quotes, bars, the account and closed trades.
///
/// Each call returns the trades closed since the previous call for that
/// symbol, so a close event is normally seen once. The account book also
/// de-duplicates by ticket.
#[async_trait::async_trait]
pub trait BrokerPort: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<BrokerSnapshot, TradeguardError>;
}
