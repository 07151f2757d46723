pub mod aggregates;
pub mod device;
pub mod grid;
pub mod scheduler;
pub mod soe;
pub mod tariff;

use crate::storage::Store;
use anyhow::Result;
use async_trait::async_trait;

/// One data source polled by the scheduler. Implementations borrow the
/// gateway client and write through the shared store; errors are logged
/// by the scheduler and never stop a cycle.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one collection pass. Returns a human-readable summary used
    /// by forced-run reports.
    async fn collect(&self, store: &Store) -> Result<String>;
}
