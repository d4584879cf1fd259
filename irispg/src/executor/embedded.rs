//! The in-process embedded executor.
use std::{sync::Arc, time::Duration};

use crate::Result;

use super::{Handle, Reclaim, SessionFactory};

/// Executes through the backend's in-process SQL entry point, available
/// when the server runs co-located inside the backend's scripting
/// runtime. Same contract as the networked executor, no pool: sessions
/// are cheap function-call wrappers.
pub struct EmbeddedExecutor {
    factory: Arc<dyn SessionFactory>,
    statement_timeout: Duration,
}

impl EmbeddedExecutor {
    pub fn new(factory: Arc<dyn SessionFactory>, statement_timeout: Duration) -> Self {
        Self { factory, statement_timeout }
    }

    pub async fn acquire(&self) -> Result<Handle> {
        let session = self.factory.connect().await?;
        Ok(Handle::new(session, Reclaim::Discard, self.statement_timeout))
    }
}
