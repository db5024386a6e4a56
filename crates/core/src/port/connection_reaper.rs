// Idle connection reaping port

use crate::error::Result;
use async_trait::async_trait;

/// Something that owns pooled connections and can close the stale ones
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionReaper: Send + Sync {
    /// Close connections idle longer than the configured timeout
    ///
    /// # Returns
    /// Number of connections closed
    async fn reap_idle(&self) -> Result<usize>;
}
