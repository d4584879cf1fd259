//! Bounded backend connection pool.
//!
//! A fair FIFO pool: waiters queue on a semaphore, idle sessions are
//! health-checked on checkout and recycled after a configurable age.
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::Result;

use super::{BackendSession, ResourceError, SessionFactory};

/// Hard ceiling on base + overflow; beyond this the backend license and
/// the network both suffer.
pub const MAX_POOL_TOTAL: usize = 200;

/// Pool sizing and lifetimes.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Steady-state connections.
    pub size: usize,
    /// Burst connections on top of `size`.
    pub overflow: usize,
    /// How long an acquire may wait before failing.
    pub acquire_timeout: Duration,
    /// Sessions older than this are closed instead of reused.
    pub recycle: Duration,
    /// Per-call execute deadline stamped onto every handle.
    pub statement_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 50,
            overflow: 20,
            acquire_timeout: Duration::from_secs(30),
            recycle: Duration::from_secs(3600),
            statement_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Total connections this pool may hold, clamped to the ceiling.
    pub fn total(&self) -> usize {
        (self.size + self.overflow).clamp(1, MAX_POOL_TOTAL)
    }
}

struct Idle {
    session: Box<dyn BackendSession>,
    created: Instant,
}

pub(crate) struct PoolInner {
    factory: Arc<dyn SessionFactory>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<Idle>>,
    closed: AtomicBool,
    config: PoolConfig,
}

impl PoolInner {
    pub(crate) fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.total())),
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            factory,
            config,
        })
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Check out a session, waiting fairly behind earlier acquirers.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
    ) -> Result<(Box<dyn BackendSession>, Releaser)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ResourceError::new("connection pool is shut down").into());
        }

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            ResourceError::new(format!(
                "connection pool exhausted: waited {:.0}s with all {} connections in use",
                self.config.acquire_timeout.as_secs_f64(),
                self.config.total(),
            ))
        })?
        .expect("pool semaphore never closed");

        // reuse the most recently returned session that still answers
        loop {
            let idle = self.idle.lock().unwrap().pop_front();
            let Some(mut idle) = idle else { break };

            if idle.created.elapsed() > self.config.recycle {
                idle.session.close().await;
                continue;
            }
            if idle.session.ping().await.is_ok() {
                return Ok((idle.session, self.releaser(permit)));
            }
            // stale after a backend restart; close and look further
            idle.session.close().await;
        }

        let session = self.factory.connect().await?;
        Ok((session, self.releaser(permit)))
    }

    fn releaser(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Releaser {
        Releaser { pool: Arc::downgrade(self), permit: Some(permit), created: Instant::now() }
    }

    /// Stop handing out sessions and close everything idle.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        loop {
            let idle = self.idle.lock().unwrap().pop_front();
            match idle {
                Some(mut idle) => idle.session.close().await,
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// Returns a session to its pool when the owning handle drops.
#[derive(Debug)]
pub struct Releaser {
    pool: std::sync::Weak<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
    created: Instant,
}

impl Releaser {
    pub(crate) fn release(&mut self, session: Box<dyn BackendSession>, healthy: bool) {
        let permit = self.permit.take();
        let Some(pool) = self.pool.upgrade() else { return };

        if healthy && !pool.closed.load(Ordering::Acquire) {
            pool.idle
                .lock()
                .unwrap()
                .push_back(Idle { session, created: self.created });
        } else {
            // quarantined or shutting down: close out of line
            let mut session = session;
            tokio::spawn(async move { session.close().await });
        }
        drop(permit); // wakes the next FIFO waiter
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::executor::{ExecuteOutcome, RowStream};
    use crate::protocol::backend::FieldDescription;
    use crate::sql::BoundParam;
    use crate::types::Value;

    #[derive(Debug)]
    struct FakeSession {
        alive: bool,
    }

    #[async_trait]
    impl BackendSession for FakeSession {
        async fn execute(&mut self, _: &str, _: &[BoundParam]) -> Result<ExecuteOutcome> {
            Ok(ExecuteOutcome {
                columns: vec![FieldDescription::synthetic("x", 23, 4)],
                rows: RowStream::from_rows(vec![vec![Value::Int4(1)]]),
                tag: crate::executor::CommandTag::Select,
                rows_affected: 1,
            })
        }

        async fn describe(&mut self, _: &str) -> Result<Vec<FieldDescription>> {
            Ok(Vec::new())
        }

        async fn begin(&mut self) -> Result<()> { Ok(()) }
        async fn commit(&mut self) -> Result<()> { Ok(()) }
        async fn rollback(&mut self) -> Result<()> { Ok(()) }

        async fn bulk_insert(&mut self, _: &str, _: &[String], rows: &[Vec<String>]) -> Result<u64> {
            Ok(rows.len() as u64)
        }

        async fn stream_select(&mut self, _: &str) -> Result<(Vec<FieldDescription>, RowStream)> {
            Ok((Vec::new(), RowStream::empty()))
        }

        async fn ping(&mut self) -> Result<()> {
            if self.alive {
                Ok(())
            } else {
                Err(crate::executor::BackendError::new("gone", -999).into())
            }
        }

        async fn cancel(&mut self) -> Result<()> { Ok(()) }

        async fn close(&mut self) { }
    }

    struct FakeFactory {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn connect(&self) -> Result<Box<dyn BackendSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession { alive: true }))
        }
    }

    fn pool(size: usize) -> Arc<PoolInner> {
        PoolInner::new(
            Arc::new(FakeFactory { connects: AtomicUsize::new(0) }),
            PoolConfig {
                size,
                overflow: 0,
                acquire_timeout: Duration::from_millis(50),
                ..PoolConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn checkout_and_return() {
        let p = pool(2);
        let (session, mut releaser) = p.acquire().await.unwrap();
        assert_eq!(p.idle_len(), 0);
        releaser.release(session, true);
        assert_eq!(p.idle_len(), 1);
    }

    #[tokio::test]
    async fn reuses_idle_session() {
        let factory = Arc::new(FakeFactory { connects: AtomicUsize::new(0) });
        let p = PoolInner::new(
            factory.clone(),
            PoolConfig { size: 2, overflow: 0, ..PoolConfig::default() },
        );
        let (s, mut r) = p.acquire().await.unwrap();
        r.release(s, true);
        let (_s2, _r2) = p.acquire().await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let p = pool(1);
        let (_held, _r) = p.acquire().await.unwrap();
        let err = p.acquire().await.unwrap_err();
        assert!(err.to_string().contains("pool exhausted"));
    }

    #[tokio::test]
    async fn broken_session_not_reused() {
        let factory = Arc::new(FakeFactory { connects: AtomicUsize::new(0) });
        let p = PoolInner::new(
            factory.clone(),
            PoolConfig { size: 2, overflow: 0, ..PoolConfig::default() },
        );
        let (s, mut r) = p.acquire().await.unwrap();
        drop(s);
        // a quarantined session is closed, not pooled
        r.release(Box::new(FakeSession { alive: true }), false);
        assert_eq!(p.idle_len(), 0);
    }

    #[tokio::test]
    async fn dead_idle_replaced_on_checkout() {
        let factory = Arc::new(FakeFactory { connects: AtomicUsize::new(0) });
        let p = PoolInner::new(
            factory.clone(),
            PoolConfig { size: 2, overflow: 0, ..PoolConfig::default() },
        );
        let (_, mut r) = p.acquire().await.unwrap();
        r.release(Box::new(FakeSession { alive: false }), true);
        assert_eq!(p.idle_len(), 1);
        let (_s, _r) = p.acquire().await.unwrap();
        // dead idle session was discarded, fresh connect happened
        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        assert_eq!(p.idle_len(), 0);
    }

    #[test]
    fn total_clamped_to_ceiling() {
        let c = PoolConfig { size: 500, overflow: 100, ..PoolConfig::default() };
        assert_eq!(c.total(), MAX_POOL_TOTAL);
    }
}
