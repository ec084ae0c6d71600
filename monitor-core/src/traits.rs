use crate::error::CoreError;
use crate::types::LatestFloor;
use async_trait::async_trait;

/// Source of the newest reply in a thread.
///
/// `Ok(None)` means the thread had no usable posts this cycle; `Err` means
/// the lookup itself failed. Callers treat both as "no update".
#[async_trait]
pub trait FloorSource: Send + Sync {
    async fn latest_floor(&self, thread_id: u64) -> Result<Option<LatestFloor>, CoreError>;
}

/// Delivery channel for formatted notification text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), CoreError>;
}
