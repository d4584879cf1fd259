//! The backend executor: how translated SQL reaches IRIS.
//!
//! The backend is a black box providing sessions that execute SQL with
//! positional parameters and stream rows back. Two executors satisfy the
//! same surface: a pooled network client, and an in-process path used when
//! the server runs inside the backend's scripting runtime.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    Result,
    protocol::backend::FieldDescription,
    sql::BoundParam,
    types::Value,
};

mod embedded;
mod network;
mod pool;

pub use embedded::EmbeddedExecutor;
pub use network::NetworkExecutor;
pub use pool::PoolConfig;

/// An error reported by the backend, carrying its SQLCODE.
pub struct BackendError {
    message: String,
    sqlcode: i32,
    sqlstate: Option<String>,
}

impl BackendError {
    pub fn new(message: impl Into<String>, sqlcode: i32) -> Self {
        Self { message: message.into(), sqlcode, sqlstate: None }
    }

    /// Attach an explicit SQLSTATE instead of the SQLCODE-derived one.
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn sqlcode(&self) -> i32 {
        self.sqlcode
    }

    /// The SQLSTATE surfaced to the client; common IRIS SQLCODEs map to
    /// their PostgreSQL analogs, the rest report an internal error.
    pub fn sqlstate(&self) -> &str {
        if let Some(state) = &self.sqlstate {
            return state;
        }
        match self.sqlcode {
            -30 => "42P01",  // table or view not found
            -29 => "42703",  // field not found
            -1 | -12 | -25 => "42601", // parse errors
            -99 => "42501",  // privilege violation
            -114 | -110 => "55P03", // row/table lock unavailable
            _ => "XX000",
        }
    }
}

impl std::error::Error for BackendError { }

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend error [SQLCODE {}]: {}", self.sqlcode, self.message)
    }
}

impl std::fmt::Debug for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A statement or COPY step exceeded its deadline. The backend handle
/// involved is quarantined, never returned to the pool.
pub struct TimeoutError {
    pub elapsed: Duration,
}

impl std::error::Error for TimeoutError { }

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "statement timed out after {:.1}s", self.elapsed.as_secs_f64())
    }
}

impl std::fmt::Debug for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Pool exhausted or another resource bound was hit.
pub struct ResourceError {
    message: String,
}

impl ResourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::error::Error for ResourceError { }

impl std::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::fmt::Debug for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// What a statement did, for the CommandComplete tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTag {
    Select,
    Insert,
    Update,
    Delete,
    Copy,
    Begin,
    Commit,
    Rollback,
    Other(String),
}

impl CommandTag {
    /// Infer from the leading verb of a statement.
    pub fn of_sql(sql: &str) -> CommandTag {
        let verb: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        match verb.to_ascii_uppercase().as_str() {
            "SELECT" => CommandTag::Select,
            "INSERT" => CommandTag::Insert,
            "UPDATE" => CommandTag::Update,
            "DELETE" => CommandTag::Delete,
            "COPY" => CommandTag::Copy,
            "START" | "BEGIN" => CommandTag::Begin,
            "COMMIT" => CommandTag::Commit,
            "ROLLBACK" => CommandTag::Rollback,
            other => CommandTag::Other(other.to_string()),
        }
    }

    /// The CommandComplete text for `rows` affected/returned rows.
    pub fn render(&self, rows: u64) -> String {
        match self {
            CommandTag::Select => format!("SELECT {rows}"),
            CommandTag::Insert => format!("INSERT 0 {rows}"),
            CommandTag::Update => format!("UPDATE {rows}"),
            CommandTag::Delete => format!("DELETE {rows}"),
            CommandTag::Copy => format!("COPY {rows}"),
            CommandTag::Begin => "BEGIN".into(),
            CommandTag::Commit => "COMMIT".into(),
            CommandTag::Rollback => "ROLLBACK".into(),
            CommandTag::Other(verb) => verb.clone(),
        }
    }
}

/// Pull-based row stream; the producer owns whatever backend cursor is
/// behind it, so dropping the stream releases it.
pub struct RowStream {
    inner: Box<dyn RowSource>,
}

#[async_trait]
pub trait RowSource: Send {
    async fn next(&mut self) -> Result<Option<Vec<Value>>>;
}

impl RowStream {
    pub fn new(inner: impl RowSource + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }

    /// A fully materialized stream, for catalog answers and tests.
    pub fn from_rows(rows: Vec<Vec<Value>>) -> Self {
        struct Materialized(std::vec::IntoIter<Vec<Value>>);

        #[async_trait]
        impl RowSource for Materialized {
            async fn next(&mut self) -> Result<Option<Vec<Value>>> {
                Ok(self.0.next())
            }
        }

        Self::new(Materialized(rows.into_iter()))
    }

    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    pub async fn next(&mut self) -> Result<Option<Vec<Value>>> {
        self.inner.next().await
    }

    /// Drain into memory. COPY and DataRow paths must not use this; it
    /// exists for the bounded catalog result sets.
    pub async fn collect(mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RowStream")
    }
}

/// Everything one `execute` produces.
#[derive(Debug)]
pub struct ExecuteOutcome {
    pub columns: Vec<FieldDescription>,
    pub rows: RowStream,
    pub tag: CommandTag,
    pub rows_affected: u64,
}

impl ExecuteOutcome {
    /// An outcome with no result set.
    pub fn command(tag: CommandTag, rows_affected: u64) -> Self {
        Self { columns: Vec::new(), rows: RowStream::empty(), tag, rows_affected }
    }
}

/// One open backend session. Implementations wrap the product's client
/// library (networked) or its in-process SQL entry point (embedded).
#[async_trait]
pub trait BackendSession: Send + std::fmt::Debug {
    /// Execute SQL with positional parameters.
    async fn execute(&mut self, sql: &str, params: &[BoundParam]) -> Result<ExecuteOutcome>;

    /// Describe a statement without executing it: parameter count unknown
    /// to the caller plus output columns, when the backend can prepare.
    async fn describe(&mut self, sql: &str) -> Result<Vec<FieldDescription>>;

    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;

    /// Insert one pre-batched slice of rows. The COPY handler calls this
    /// once per batch.
    async fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64>;

    /// Stream a select without materializing it; used by COPY TO.
    async fn stream_select(&mut self, sql: &str) -> Result<(Vec<FieldDescription>, RowStream)>;

    /// Cheap liveness probe used on pool checkout.
    async fn ping(&mut self) -> Result<()>;

    /// Ask the backend to cancel whatever this session is running.
    async fn cancel(&mut self) -> Result<()>;

    async fn close(&mut self);
}

/// Creates backend sessions; the pool and the embedded path both go
/// through this seam, production wires the product's driver in here.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BackendSession>>;
}

/// The process-wide executor, shared by every connection.
#[derive(Clone)]
pub enum Executor {
    Network(Arc<NetworkExecutor>),
    Embedded(Arc<EmbeddedExecutor>),
}

impl Executor {
    /// Check out a backend handle. Networked executors may block up to the
    /// pool acquire deadline; embedded ones return immediately.
    pub async fn acquire(&self) -> Result<Handle> {
        match self {
            Executor::Network(ex) => ex.acquire().await,
            Executor::Embedded(ex) => ex.acquire().await,
        }
    }

    /// Stop handing out sessions and drain what is held.
    pub async fn close(&self) {
        if let Executor::Network(ex) = self {
            ex.close().await;
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Network(_) => f.write_str("Executor::Network"),
            Executor::Embedded(_) => f.write_str("Executor::Embedded"),
        }
    }
}

pub(crate) enum Reclaim {
    /// Return to the owning pool on drop.
    Pool(pool::Releaser),
    /// Close and forget; the embedded path.
    Discard,
}

/// A checked-out backend session with an enforced per-call deadline.
///
/// A timeout poisons the handle: the session is discarded instead of
/// returned, and the pool replaces it with a fresh connection. This is
/// the core defense against backend compiler hangs.
pub struct Handle {
    session: Option<Box<dyn BackendSession>>,
    reclaim: Reclaim,
    statement_timeout: Duration,
    poisoned: bool,
}

impl Handle {
    pub(crate) fn new(
        session: Box<dyn BackendSession>,
        reclaim: Reclaim,
        statement_timeout: Duration,
    ) -> Self {
        Self { session: Some(session), reclaim, statement_timeout, poisoned: false }
    }

    fn session(&mut self) -> &mut Box<dyn BackendSession> {
        self.session.as_mut().expect("session taken only on drop")
    }

    pub async fn execute(&mut self, sql: &str, params: &[BoundParam]) -> Result<ExecuteOutcome> {
        let timeout = self.statement_timeout;
        let session = self.session.as_mut().expect("session taken only on drop");
        match tokio::time::timeout(timeout, session.execute(sql, params)).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned = true;
                tracing::warn!(sql, "statement deadline exceeded; quarantining backend handle");
                Err(TimeoutError { elapsed: timeout }.into())
            }
        }
    }

    pub async fn describe(&mut self, sql: &str) -> Result<Vec<FieldDescription>> {
        let timeout = self.statement_timeout;
        let session = self.session.as_mut().expect("session taken only on drop");
        match tokio::time::timeout(timeout, session.describe(sql)).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned = true;
                Err(TimeoutError { elapsed: timeout }.into())
            }
        }
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.session().begin().await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.session().commit().await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.session().rollback().await
    }

    pub async fn bulk_insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64> {
        let timeout = self.statement_timeout;
        let session = self.session.as_mut().expect("session taken only on drop");
        match tokio::time::timeout(timeout, session.bulk_insert(table, columns, rows)).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned = true;
                Err(TimeoutError { elapsed: timeout }.into())
            }
        }
    }

    pub async fn stream_select(
        &mut self,
        sql: &str,
    ) -> Result<(Vec<FieldDescription>, RowStream)> {
        let timeout = self.statement_timeout;
        let session = self.session.as_mut().expect("session taken only on drop");
        match tokio::time::timeout(timeout, session.stream_select(sql)).await {
            Ok(result) => result,
            Err(_) => {
                self.poisoned = true;
                Err(TimeoutError { elapsed: timeout }.into())
            }
        }
    }

    pub async fn cancel(&mut self) -> Result<()> {
        self.session().cancel().await
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else { return };
        let healthy = !self.poisoned;
        match &mut self.reclaim {
            Reclaim::Pool(releaser) => releaser.release(session, healthy),
            Reclaim::Discard => {
                // close on a detached task; drop must not block
                let mut session = session;
                tokio::spawn(async move { session.close().await });
            }
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("poisoned", &self.poisoned).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_tags() {
        assert_eq!(CommandTag::of_sql("SELECT 1"), CommandTag::Select);
        assert_eq!(CommandTag::of_sql("  insert into t"), CommandTag::Insert);
        assert_eq!(CommandTag::of_sql("START TRANSACTION"), CommandTag::Begin);
        assert_eq!(CommandTag::Select.render(5), "SELECT 5");
        assert_eq!(CommandTag::Insert.render(3), "INSERT 0 3");
        assert_eq!(CommandTag::Copy.render(250), "COPY 250");
        assert_eq!(CommandTag::Begin.render(0), "BEGIN");
    }

    #[test]
    fn backend_error_sqlstate_mapping() {
        assert_eq!(BackendError::new("nope", -30).sqlstate(), "42P01");
        assert_eq!(BackendError::new("nope", -29).sqlstate(), "42703");
        assert_eq!(BackendError::new("nope", -1).sqlstate(), "42601");
        assert_eq!(BackendError::new("nope", -400).sqlstate(), "XX000");
        assert_eq!(
            BackendError::new("nope", -30).with_sqlstate("58000").sqlstate(),
            "58000",
        );
    }

    #[tokio::test]
    async fn materialized_row_stream() {
        let mut stream = RowStream::from_rows(vec![
            vec![Value::Int4(1)],
            vec![Value::Int4(2)],
        ]);
        assert_eq!(stream.next().await.unwrap(), Some(vec![Value::Int4(1)]));
        assert_eq!(stream.next().await.unwrap(), Some(vec![Value::Int4(2)]));
        assert_eq!(stream.next().await.unwrap(), None);
    }
}
