//! Order-execution side port: where decisions go.

use crate::domain::error::TradeguardError;
use crate::domain::orchestrator::CycleOutcome;
use crate::domain::risk::TrailingStopUpdate;

#[async_trait::async_trait]
pub trait DecisionSink: Send + Sync {
    /// Hands over a cycle outcome. A submitted decision is not revocable.
    async fn submit(&self, outcome: CycleOutcome) -> Result<(), TradeguardError>;

    async fn submit_trailing(&self, update: TrailingStopUpdate) -> Result<(), TradeguardError>;
}
