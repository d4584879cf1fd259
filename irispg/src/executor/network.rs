//! The pooled networked executor.
use std::sync::Arc;

use crate::Result;

use super::{Handle, Reclaim, SessionFactory, pool::{PoolConfig, PoolInner}};

/// Executes over network sessions drawn from a bounded pool.
///
/// On backend restart, dead idle sessions fail their checkout ping and
/// are transparently replaced, so callers only observe a reconnect.
pub struct NetworkExecutor {
    pool: Arc<PoolInner>,
}

impl NetworkExecutor {
    pub fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Self {
        Self { pool: PoolInner::new(factory, config) }
    }

    pub async fn acquire(&self) -> Result<Handle> {
        let (session, releaser) = self.pool.acquire().await?;
        Ok(Handle::new(
            session,
            Reclaim::Pool(releaser),
            self.pool.config().statement_timeout,
        ))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
