//! TCP listener and session supervisor.
use std::{sync::Arc, time::Duration};

use tokio::{net::TcpListener, task::JoinSet};
use tracing::Instrument;

use crate::{
    Result,
    catalog::Catalog,
    config::{ExecutorKind, ServerConfig},
    executor::{EmbeddedExecutor, Executor, NetworkExecutor, SessionFactory},
    session::{self, CancelRegistry, Session, Shared, Startup},
    sql::{SchemaMapper, SqlTranslator},
    stream::PgStream,
};

/// The server: one listener, one task per accepted connection, a shared
/// backend executor underneath.
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Wire the process-wide pieces together. `factory` opens backend
    /// sessions; which executor wraps it comes from the config.
    pub fn new(config: ServerConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let schema = Arc::new(SchemaMapper::new(config.schema.clone()));
        let catalog = Catalog::new(config.catalog_ttl);
        let translator = SqlTranslator::new(
            schema,
            catalog.generator().clone(),
            config.negate_inner_product,
        );
        let executor = match config.executor {
            ExecutorKind::Network => Executor::Network(Arc::new(NetworkExecutor::new(
                factory,
                config.pool.clone(),
            ))),
            ExecutorKind::Embedded => Executor::Embedded(Arc::new(EmbeddedExecutor::new(
                factory,
                config.pool.statement_timeout,
            ))),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                translator,
                catalog,
                executor,
                cancels: CancelRegistry::default(),
            }),
        }
    }

    /// Shared state, exposed for embedding applications that reconfigure
    /// the schema mapping or inspect the catalog at runtime.
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Accept connections until `shutdown` resolves, then stop accepting,
    /// give sessions the configured grace period, and drain the pool.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr = format!("{}:{}", self.shared.config.bind, self.shared.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "listening for PostgreSQL clients");
        self.serve_with_listener(listener, shutdown).await
    }

    /// [`serve`][Server::serve] over an externally bound listener, for
    /// embedders that bind sockets themselves.
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut shutdown = std::pin::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let _ = socket.set_nodelay(true);
                    let shared = self.shared.clone();
                    sessions.spawn(async move {
                        if let Err(err) = run_connection(socket, shared).await {
                            tracing::debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                _ = &mut shutdown => break,
                // reap finished sessions so the set does not grow unbounded
                Some(_) = sessions.join_next(), if !sessions.is_empty() => { }
            }
        }

        tracing::info!("shutdown requested; draining sessions");
        drop(listener);

        let grace = self.shared.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while sessions.join_next().await.is_some() { }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                remaining = sessions.len(),
                "grace period elapsed; aborting remaining sessions",
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() { }
        }

        self.shared.executor.close().await;
        Ok(())
    }
}

/// One connection from accept to close.
async fn run_connection(socket: tokio::net::TcpStream, shared: Arc<Shared>) -> Result<()> {
    let mut stream = PgStream::new(socket);
    stream.set_max_frame_len(shared.config.max_frame_len);

    let handshake_timeout = shared.config.auth.handshake_timeout;
    let startup = match tokio::time::timeout(
        handshake_timeout,
        session::authenticate(&mut stream, &shared.config),
    )
    .await
    {
        Ok(outcome) => outcome?,
        Err(_) => {
            return Err(handshake_timed_out(&mut stream, handshake_timeout).await);
        }
    };

    match startup {
        Startup::Cancel { process_id, secret_key } => {
            // a cancel connection carries nothing else; act and close
            shared.cancels.cancel(process_id, secret_key);
            Ok(())
        }
        Startup::Session(info) => {
            let span = tracing::info_span!("session", pid = info.process_id, user = %info.user);
            Session::new(stream, shared.clone(), info).run().instrument(span).await
        }
    }
}

async fn handshake_timed_out(stream: &mut PgStream, timeout: Duration) -> crate::Error {
    let err: crate::Error = session::AuthError::new(format!(
        "authentication handshake exceeded {:.0}s",
        timeout.as_secs_f64(),
    ))
    .into();
    let message = err.to_string();
    stream.send(crate::protocol::backend::ErrorResponse::new(err.sqlstate(), &message));
    let _ = stream.flush().await;
    err
}
