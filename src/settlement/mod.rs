//! Settlement: the wallet gateway seam and the background retrier.

pub mod gateway;
pub mod retrier;

pub use gateway::{InMemoryWallet, JournalEntry, SettlementGateway, SettlementOp};
pub use retrier::{RetrySummary, SettlementRetrier};

use std::{future::Future, time::Duration};

use crate::errors::SettlementError;

/// Bound a gateway call. An elapsed timeout reads as `Unavailable`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, SettlementError>
where
    F: Future<Output = Result<T, SettlementError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SettlementError::Unavailable(format!(
            "gateway call timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
