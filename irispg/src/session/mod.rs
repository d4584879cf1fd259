//! Per-connection session controller.
//!
//! One task per accepted socket. The controller owns the frame stream,
//! drives authentication, then dispatches messages: simple queries, the
//! extended Parse/Bind/Describe/Execute/Sync protocol, and the COPY
//! subprotocol. Exactly one ReadyForQuery goes out per logical boundary.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::{
    Error, ErrorKind, Result,
    catalog::{Catalog, CatalogError, CatalogRouter, RoutePlan},
    config::ServerConfig,
    copy::{CopyCommand, CopyDirection, CopyInState, CopyOutState},
    executor::{CommandTag, Executor, Handle, RowStream},
    protocol::{FrontendMessage, ProtocolError, backend, backend::FieldDescription, frontend},
    sql::{BoundParam, SqlTranslator, TxVerb, scan},
    stream::PgStream,
    types::{Value, oid},
};

mod auth;
mod extended;
mod scram;

pub use auth::{SessionInfo, Startup, authenticate};

use extended::{ExtendedState, Portal, PreparedStatement, SuspendedExecution};

/// Bad credentials, missing user, or a handshake protocol slip.
pub struct AuthError {
    message: String,
}

impl AuthError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::error::Error for AuthError { }

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::fmt::Debug for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Process-wide state every session shares.
pub struct Shared {
    pub config: ServerConfig,
    pub translator: SqlTranslator,
    pub catalog: Catalog,
    pub executor: Executor,
    pub cancels: CancelRegistry,
}

/// Cancellation keys handed out in BackendKeyData, addressable from a
/// second connection.
#[derive(Default)]
pub struct CancelRegistry {
    slots: Mutex<HashMap<i32, CancelSlot>>,
}

struct CancelSlot {
    secret_key: i32,
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelRegistry {
    pub fn register(&self, process_id: i32, secret_key: i32) -> (Arc<AtomicBool>, Arc<Notify>) {
        let flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        self.slots.lock().unwrap().insert(
            process_id,
            CancelSlot { secret_key, flag: flag.clone(), notify: notify.clone() },
        );
        (flag, notify)
    }

    pub fn unregister(&self, process_id: i32) {
        self.slots.lock().unwrap().remove(&process_id);
    }

    /// Fire the cancel addressed by (pid, secret); a wrong secret is
    /// silently ignored, exactly like upstream.
    pub fn cancel(&self, process_id: i32, secret_key: i32) {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get(&process_id) {
            if slot.secret_key == secret_key {
                slot.flag.store(true, Ordering::Release);
                slot.notify.notify_waiters();
                tracing::info!(process_id, "cancel request accepted");
            }
        }
    }
}

/// Transaction status as reported in ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TxStatus {
    fn tag(self) -> u8 {
        match self {
            TxStatus::Idle => b'I',
            TxStatus::InTransaction => b'T',
            TxStatus::Failed => b'E',
        }
    }
}

pub struct Session {
    stream: PgStream,
    shared: Arc<Shared>,
    info: SessionInfo,
    tx: TxStatus,
    /// Pinned backend handle while a transaction is open.
    tx_handle: Option<Handle>,
    ext: ExtendedState,
    /// Extended-protocol error seen; skip messages until Sync.
    draining: bool,
    cancel_flag: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
}

impl Session {
    pub fn new(stream: PgStream, shared: Arc<Shared>, info: SessionInfo) -> Self {
        let (cancel_flag, cancel_notify) =
            shared.cancels.register(info.process_id, info.secret_key);
        Self {
            stream,
            shared,
            info,
            tx: TxStatus::Idle,
            tx_handle: None,
            ext: ExtendedState::default(),
            draining: false,
            cancel_flag,
            cancel_notify,
        }
    }

    /// The message loop; returns when the client terminates or an
    /// unrecoverable error closes the connection.
    pub async fn run(mut self) -> Result<()> {
        let result = self.message_loop().await;
        self.shared.cancels.unregister(self.info.process_id);
        if let Some(mut handle) = self.tx_handle.take() {
            // disconnect mid-transaction rolls back
            let _ = handle.rollback().await;
        }
        let _ = self.stream.shutdown().await;
        result
    }

    async fn message_loop(&mut self) -> Result<()> {
        loop {
            let message = match self.stream.read_message().await {
                Ok(m) => m,
                Err(err) => {
                    if matches!(err.kind(), ErrorKind::Io(_)) {
                        // client went away; nothing left to report to
                        return Ok(());
                    }
                    self.report(&err).await?;
                    self.stream.flush().await?;
                    return Err(err);
                }
            };

            if self.draining && !matches!(message, FrontendMessage::Sync(_) | FrontendMessage::Terminate(_)) {
                continue;
            }

            match message {
                FrontendMessage::Terminate(_) => return Ok(()),
                FrontendMessage::Query(q) => {
                    self.cancel_flag.store(false, Ordering::Release);
                    self.handle_simple_query(q.sql).await?;
                }
                FrontendMessage::Parse(m) => {
                    if let Err(err) = self.on_parse(m) {
                        self.enter_draining(&err).await?;
                    }
                }
                FrontendMessage::Bind(m) => {
                    if let Err(err) = self.on_bind(m) {
                        self.enter_draining(&err).await?;
                    }
                }
                FrontendMessage::Describe(m) => {
                    if let Err(err) = self.on_describe(m).await {
                        self.enter_draining(&err).await?;
                    }
                }
                FrontendMessage::Execute(m) => {
                    self.cancel_flag.store(false, Ordering::Release);
                    if let Err(err) = self.on_execute(m).await {
                        self.fail_transaction();
                        self.enter_draining(&err).await?;
                    }
                }
                FrontendMessage::Close(m) => {
                    match m.kind {
                        b'S' => self.ext.close_statement(&m.name),
                        b'P' => self.ext.close_portal(&m.name),
                        _ => {
                            let err = ProtocolError::new("Close kind must be 'S' or 'P'").into();
                            self.enter_draining(&err).await?;
                            continue;
                        }
                    }
                    self.stream.send(backend::CloseComplete);
                }
                FrontendMessage::Flush(_) => {
                    self.stream.flush().await?;
                }
                FrontendMessage::Sync(_) => {
                    self.draining = false;
                    if self.tx == TxStatus::Idle {
                        // the implicit transaction ends here
                        self.ext.clear_portals();
                    }
                    self.ready().await?;
                }
                FrontendMessage::FunctionCall(_) => {
                    self.send_error("0A000", "the function call protocol is not supported");
                    self.ready().await?;
                }
                FrontendMessage::PasswordMessage(_) => {
                    let err: Error =
                        ProtocolError::unexpected("Password", "an authenticated session").into();
                    self.report(&err).await?;
                    return Err(err);
                }
                FrontendMessage::CopyData(_)
                | FrontendMessage::CopyDone(_)
                | FrontendMessage::CopyFail(_) => {
                    let err: Error =
                        ProtocolError::unexpected("CopyData", "a non-COPY state").into();
                    self.report(&err).await?;
                    return Err(err);
                }
            }
        }
    }

    // ---------- simple query protocol ----------

    async fn handle_simple_query(&mut self, sql: String) -> Result<()> {
        let statements = scan::split_statements(&sql);
        if statements.is_empty() {
            self.stream.send(backend::EmptyQueryResponse);
            self.ready().await?;
            return Ok(());
        }

        for statement in statements {
            match self.execute_simple(&statement).await {
                Ok(()) => { }
                Err(err) => {
                    self.fail_transaction();
                    self.report(&err).await?;
                    if err.is_fatal() {
                        // framing is not recoverable; close without RFQ
                        self.stream.flush().await?;
                        return Err(err);
                    }
                    break;
                }
            }
        }
        self.ready().await
    }

    async fn execute_simple(&mut self, statement: &str) -> Result<()> {
        if let Some(command) = CopyCommand::parse(statement) {
            return self.handle_copy(command).await;
        }

        let translated = self.shared.translator.translate(statement)?;
        match translated.verb {
            TxVerb::Begin => return self.tx_begin().await,
            TxVerb::Commit => return self.tx_commit().await,
            TxVerb::Rollback => return self.tx_rollback().await,
            TxVerb::None => { }
        }
        self.reject_if_failed()?;

        let (tag, rows) = self
            .run_query(&translated.sql, &[], &[], true, 0)
            .await
            .map(|(tag, rows, _)| (tag, rows))?;
        self.stream.send(backend::CommandComplete { tag: &tag.render(rows) });
        Ok(())
    }

    /// Route and execute one translated statement, emitting RowDescription
    /// (when `send_row_desc`) and DataRows. Returns the tag, the rows
    /// emitted, and a suspension when `max_rows` cut the stream short.
    async fn run_query(
        &mut self,
        sql: &str,
        params: &[BoundParam],
        result_formats: &[i16],
        send_row_desc: bool,
        max_rows: u64,
    ) -> Result<(CommandTag, u64, Option<SuspendedExecution>)> {
        match CatalogRouter::plan(sql) {
            RoutePlan::PgCatalog => {
                let (columns, rows) = self.emulate_catalog(sql, params).await?;
                if send_row_desc {
                    self.stream.send(backend::RowDescription { fields: &columns });
                }
                let mut sent = 0u64;
                for row in &rows {
                    send_data_row(&mut self.stream, row, result_formats);
                    sent += 1;
                }
                Ok((CommandTag::Select, sent, None))
            }
            plan => {
                let translate_schema_cols = plan == RoutePlan::InformationSchema;
                self.backend_query(
                    sql,
                    params,
                    result_formats,
                    send_row_desc,
                    max_rows,
                    translate_schema_cols,
                )
                .await
            }
        }
    }

    /// Execute against the backend and stream the result out.
    #[allow(clippy::too_many_arguments)]
    async fn backend_query(
        &mut self,
        sql: &str,
        params: &[BoundParam],
        result_formats: &[i16],
        send_row_desc: bool,
        max_rows: u64,
        translate_schema_cols: bool,
    ) -> Result<(CommandTag, u64, Option<SuspendedExecution>)> {
        let shared = self.shared.clone();
        let cancel = self.cancel_notify.clone();

        // a cancel that raced ahead of this statement still applies to it
        if self.cancel_flag.load(Ordering::Acquire) {
            return Err(crate::error::Canceled.into());
        }

        // split the borrows: the backend handle and the client stream are
        // driven simultaneously while rows flow through
        let stream = &mut self.stream;
        let mut temp = None;
        let handle = match self.tx_handle.as_mut() {
            Some(h) => h,
            None => {
                temp = Some(shared.executor.acquire().await?);
                temp.as_mut().unwrap()
            }
        };

        let outcome = tokio::select! {
            result = handle.execute(sql, params) => result?,
            _ = cancel.notified() => {
                let _ = handle.cancel().await;
                return Err(crate::error::Canceled.into());
            }
        };

        let columns = outcome.columns;
        let mut rows = outcome.rows;
        let tag = outcome.tag;

        if columns.is_empty() {
            return Ok((tag, outcome.rows_affected, None));
        }

        if send_row_desc {
            let described: Vec<FieldDescription> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| FieldDescription {
                    format: format_for(result_formats, i),
                    ..c.clone()
                })
                .collect();
            stream.send(backend::RowDescription { fields: &described });
        }

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let targets = if translate_schema_cols {
            shared.translator.schema().schema_column_targets(&names)
        } else {
            Vec::new()
        };

        let mut sent = 0u64;
        loop {
            if max_rows > 0 && sent >= max_rows {
                return Ok((
                    tag.clone(),
                    sent,
                    Some(SuspendedExecution { columns, rows, tag, sent }),
                ));
            }
            let next = tokio::select! {
                row = rows.next() => row?,
                _ = cancel.notified() => {
                    let _ = handle.cancel().await;
                    return Err(crate::error::Canceled.into());
                }
            };
            let Some(mut row) = next else { break };
            shared.translator.schema().translate_row(&mut row, &targets);
            send_data_row(stream, &row, result_formats);
            sent += 1;
            // large results flush incrementally for backpressure
            if sent % 256 == 0 {
                stream.flush().await?;
            }
        }
        Ok((tag, sent, None))
    }

    /// Serve a pg_catalog statement from the emulator.
    async fn emulate_catalog(
        &mut self,
        sql: &str,
        params: &[BoundParam],
    ) -> Result<(Vec<FieldDescription>, Vec<Vec<Value>>)> {
        let (sql, params) = CatalogRouter::rewrite_any(sql, params.to_vec());
        let sql = CatalogRouter::inline_params(&sql, &params);

        let mapping = self.shared.translator.schema().mapping();
        let shared = self.shared.clone();

        let snap = {
            let mut temp = None;
            let handle = match self.tx_handle.as_mut() {
                Some(h) => h,
                None => {
                    temp = Some(shared.executor.acquire().await?);
                    temp.as_mut().unwrap()
                }
            };
            shared.catalog.snapshot(handle, &mapping.backend).await?
        };

        let Some((names, mut rows)) =
            CatalogRouter::try_emulate(&snap, &sql, (&mapping.client, &mapping.backend))
        else {
            let prefix: String = sql.chars().take(120).collect();
            return Err(CatalogError::new(format!(
                "unsupported catalog query shape: {prefix}",
            ))
            .into());
        };

        let targets = self.shared.translator.schema().schema_column_targets(&names);
        for row in &mut rows {
            self.shared.translator.schema().translate_row(row, &targets);
        }

        let columns: Vec<FieldDescription> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let type_oid = rows
                    .iter()
                    .find_map(|r| match r.get(i) {
                        Some(Value::Null) | None => None,
                        Some(v) => Some(v.natural_oid()),
                    })
                    .unwrap_or(oid::TEXT);
                FieldDescription::synthetic(name.clone(), type_oid, crate::types::type_size(type_oid))
            })
            .collect();
        Ok((columns, rows))
    }

    // ---------- transactions ----------

    async fn tx_begin(&mut self) -> Result<()> {
        if self.tx != TxStatus::Idle {
            self.stream.send(backend::NoticeResponse {
                code: "25001",
                message: "there is already a transaction in progress",
            });
            self.stream.send(backend::CommandComplete { tag: "BEGIN" });
            return Ok(());
        }
        let mut handle = self.shared.executor.acquire().await?;
        handle.begin().await?;
        self.tx_handle = Some(handle);
        self.tx = TxStatus::InTransaction;
        self.stream.send(backend::CommandComplete { tag: "BEGIN" });
        Ok(())
    }

    async fn tx_commit(&mut self) -> Result<()> {
        match self.tx {
            TxStatus::Idle => {
                self.stream.send(backend::NoticeResponse {
                    code: "25P01",
                    message: "there is no transaction in progress",
                });
                self.stream.send(backend::CommandComplete { tag: "COMMIT" });
            }
            TxStatus::InTransaction => {
                if let Some(mut handle) = self.tx_handle.take() {
                    handle.commit().await?;
                }
                self.tx = TxStatus::Idle;
                self.stream.send(backend::CommandComplete { tag: "COMMIT" });
            }
            TxStatus::Failed => {
                // committing a failed transaction rolls it back
                if let Some(mut handle) = self.tx_handle.take() {
                    let _ = handle.rollback().await;
                }
                self.tx = TxStatus::Idle;
                self.stream.send(backend::CommandComplete { tag: "ROLLBACK" });
            }
        }
        Ok(())
    }

    async fn tx_rollback(&mut self) -> Result<()> {
        if self.tx == TxStatus::Idle {
            self.stream.send(backend::NoticeResponse {
                code: "25P01",
                message: "there is no transaction in progress",
            });
        } else if let Some(mut handle) = self.tx_handle.take() {
            handle.rollback().await?;
        }
        self.tx = TxStatus::Idle;
        self.stream.send(backend::CommandComplete { tag: "ROLLBACK" });
        Ok(())
    }

    fn fail_transaction(&mut self) {
        if self.tx == TxStatus::InTransaction {
            self.tx = TxStatus::Failed;
        }
    }

    fn reject_if_failed(&self) -> Result<()> {
        if self.tx == TxStatus::Failed {
            return Err(crate::catalog::CatalogError::new(
                "current transaction is aborted, commands ignored until end of transaction block",
            )
            .into());
        }
        Ok(())
    }

    // ---------- COPY ----------

    async fn handle_copy(&mut self, command: CopyCommand) -> Result<()> {
        self.reject_if_failed()?;
        match command.direction {
            CopyDirection::FromStdin => self.copy_in(command).await,
            CopyDirection::ToStdout => self.copy_out(command).await,
        }
    }

    async fn copy_in(&mut self, command: CopyCommand) -> Result<()> {
        let shared = self.shared.clone();
        let columns = command.columns.clone().unwrap_or_default();

        self.stream.send(backend::CopyInResponse {
            format: 0,
            column_count: columns.len() as u16,
        });
        self.stream.flush().await?;

        let mut temp = None;
        let handle = match self.tx_handle.as_mut() {
            Some(h) => h,
            None => {
                temp = Some(shared.executor.acquire().await?);
                temp.as_mut().unwrap()
            }
        };

        let mut state = CopyInState::new(
            &command,
            columns,
            shared.config.copy.batch_size,
            shared.config.copy.max_line_len,
        );
        let mut failure: Option<Error> = None;

        let outcome = loop {
            match self.stream.read_message().await? {
                FrontendMessage::CopyData(data) => {
                    if failure.is_none() {
                        if let Err(err) = state.feed(handle, &data.data).await {
                            // keep draining frames so the stream stays in
                            // sync, then report once
                            failure = Some(err);
                        }
                    }
                }
                FrontendMessage::CopyDone(_) => match failure {
                    Some(err) => break Err(err),
                    None => break state.finish(handle).await,
                },
                FrontendMessage::CopyFail(fail) => {
                    break Err(crate::catalog::CatalogError::new(format!(
                        "COPY from stdin failed: {}",
                        fail.message,
                    ))
                    .into());
                }
                FrontendMessage::Flush(_) | FrontendMessage::Sync(_) => { }
                FrontendMessage::Terminate(_) => {
                    return Err(ProtocolError::unexpected("Terminate", "COPY FROM").into());
                }
                other => {
                    return Err(ProtocolError::unexpected(other.name(), "COPY FROM").into());
                }
            }
        };

        let count = outcome?;
        self.stream.send(backend::CommandComplete { tag: &CommandTag::Copy.render(count) });
        tracing::info!(table = %command.table, rows = count, "COPY FROM STDIN finished");
        Ok(())
    }

    async fn copy_out(&mut self, command: CopyCommand) -> Result<()> {
        let shared = self.shared.clone();

        let source_sql = match &command.query {
            Some(query) => query.clone(),
            None => {
                let cols = match &command.columns {
                    Some(cols) => cols.join(", "),
                    None => "*".into(),
                };
                format!("SELECT {cols} FROM {}", command.table)
            }
        };
        let translated = self.shared.translator.translate(&source_sql)?;

        let mut temp = None;
        let handle = match self.tx_handle.as_mut() {
            Some(h) => h,
            None => {
                temp = Some(shared.executor.acquire().await?);
                temp.as_mut().unwrap()
            }
        };

        let (columns, rows) = handle.stream_select(&translated.sql).await?;
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

        self.stream.send(backend::CopyOutResponse {
            format: 0,
            column_count: names.len() as u16,
        });

        let mut state = CopyOutState::new(
            names,
            rows,
            command.options,
            shared.config.copy.chunk_size,
        );
        while let Some(chunk) = state.next_chunk().await? {
            self.stream.send(backend::CopyData { data: &chunk });
            self.stream.flush().await?;
        }

        self.stream.send(backend::CopyDone);
        self.stream.send(backend::CommandComplete {
            tag: &CommandTag::Copy.render(state.total),
        });
        tracing::info!(rows = state.total, "COPY TO STDOUT finished");
        Ok(())
    }

    // ---------- extended protocol ----------

    fn on_parse(&mut self, m: frontend::Parse) -> Result<()> {
        let translated = self.shared.translator.translate(&m.sql)?;
        let param_count = SqlTranslator::parameter_count(&m.sql)
            .max(m.param_oids.len());

        self.ext.store_statement(
            m.name,
            PreparedStatement {
                original_sql: m.sql,
                translated_sql: translated.sql,
                param_oids: m.param_oids,
                param_count,
                verb: translated.verb,
                columns: None,
            },
        );
        self.stream.send(backend::ParseComplete);
        Ok(())
    }

    fn on_bind(&mut self, m: frontend::Bind) -> Result<()> {
        let Some(stmt) = self.ext.statement(&m.statement) else {
            return Err(CatalogError::new(format!(
                "prepared statement \"{}\" does not exist",
                m.statement,
            ))
            .into());
        };

        let oids = stmt.described_param_oids();
        let params: Vec<BoundParam> = m
            .params
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                extended::decode_parameter(
                    value,
                    extended::parameter_format(&m.param_formats, i),
                    oids.get(i).copied().unwrap_or(0),
                )
            })
            .collect();

        // catalog statements keep numbered placeholders for ANY/inline
        // handling at execute time; everything else splices vectors and
        // goes positional now
        let (sql, params, verb) = if CatalogRouter::plan(&stmt.translated_sql) == RoutePlan::PgCatalog {
            (stmt.translated_sql.clone(), params, stmt.verb)
        } else {
            let (sql, params) = self
                .shared
                .translator
                .bind_parameters(&stmt.translated_sql, params)?;
            (sql, params, stmt.verb)
        };

        self.ext.store_portal(
            m.portal,
            Portal {
                statement_name: m.statement,
                sql,
                params,
                result_formats: m.result_formats,
                verb,
                suspended: None,
            },
        );
        self.stream.send(backend::BindComplete);
        Ok(())
    }

    async fn on_describe(&mut self, m: frontend::Describe) -> Result<()> {
        match m.kind {
            b'S' => {
                let Some(stmt) = self.ext.statement(&m.name) else {
                    return Err(CatalogError::new(format!(
                        "prepared statement \"{}\" does not exist",
                        m.name,
                    ))
                    .into());
                };
                let oids = stmt.described_param_oids();
                self.stream.send(backend::ParameterDescription { oids: &oids });

                if let Some(columns) = &stmt.columns {
                    let fields = columns.clone();
                    self.stream.send(backend::RowDescription { fields: &fields });
                    return Ok(());
                }
                let translated_sql = stmt.translated_sql.clone();
                match self.describe_backend(&translated_sql).await? {
                    Some(columns) if !columns.is_empty() => {
                        self.stream.send(backend::RowDescription { fields: &columns });
                        if let Some(stmt) = self.ext.statement_mut(&m.name) {
                            stmt.columns = Some(columns);
                        }
                    }
                    _ => self.stream.send(backend::NoData),
                }
            }
            b'P' => {
                let Some(portal) = self.ext.portal(&m.name) else {
                    return Err(CatalogError::new(format!(
                        "portal \"{}\" does not exist",
                        m.name,
                    ))
                    .into());
                };
                if let Some(suspended) = &portal.suspended {
                    let fields = suspended.columns.clone();
                    self.stream.send(backend::RowDescription { fields: &fields });
                    return Ok(());
                }
                let sql = portal.sql.clone();
                let params = portal.params.clone();

                if CatalogRouter::plan(&sql) == RoutePlan::PgCatalog {
                    // materialize the catalog answer now; Execute drains it
                    let (columns, rows) = self.emulate_catalog(&sql, &params).await?;
                    self.stream.send(backend::RowDescription { fields: &columns });
                    if let Some(portal) = self.ext.portal_mut(&m.name) {
                        portal.suspended = Some(SuspendedExecution {
                            columns,
                            rows: RowStream::from_rows(rows),
                            tag: CommandTag::Select,
                            sent: 0,
                        });
                    }
                    return Ok(());
                }
                match self.describe_backend(&sql).await? {
                    Some(columns) if !columns.is_empty() => {
                        self.stream.send(backend::RowDescription { fields: &columns });
                    }
                    _ => self.stream.send(backend::NoData),
                }
            }
            other => {
                return Err(ProtocolError::new(format!(
                    "Describe kind must be 'S' or 'P', got {:?}",
                    char::from(other),
                ))
                .into());
            }
        }
        Ok(())
    }

    async fn describe_backend(&mut self, sql: &str) -> Result<Option<Vec<FieldDescription>>> {
        let shared = self.shared.clone();
        let mut temp = None;
        let handle = match self.tx_handle.as_mut() {
            Some(h) => h,
            None => {
                temp = Some(shared.executor.acquire().await?);
                temp.as_mut().unwrap()
            }
        };
        match handle.describe(sql).await {
            Ok(columns) => Ok(Some(columns)),
            // a backend without prepared-describe support is not an error
            Err(err) if matches!(err.kind(), ErrorKind::Backend(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn on_execute(&mut self, m: frontend::Execute) -> Result<()> {
        let Some(portal) = self.ext.portal_mut(&m.portal) else {
            return Err(CatalogError::new(format!(
                "portal \"{}\" does not exist",
                m.portal,
            ))
            .into());
        };

        // resume a suspended execution first
        if let Some(mut suspended) = portal.suspended.take() {
            let result_formats = portal.result_formats.clone();
            let max = m.max_rows as u64;
            let mut sent = 0u64;
            loop {
                if max > 0 && sent >= max {
                    if let Some(portal) = self.ext.portal_mut(&m.portal) {
                        suspended.sent += sent;
                        portal.suspended = Some(suspended);
                    }
                    self.stream.send(backend::PortalSuspended);
                    return Ok(());
                }
                let Some(row) = suspended.rows.next().await? else { break };
                send_data_row(&mut self.stream, &row, &result_formats);
                sent += 1;
            }
            let total = suspended.sent + sent;
            self.stream.send(backend::CommandComplete {
                tag: &suspended.tag.render(total),
            });
            return Ok(());
        }

        let sql = portal.sql.clone();
        let params = portal.params.clone();
        let result_formats = portal.result_formats.clone();
        let verb = portal.verb;

        match verb {
            TxVerb::Begin => return self.tx_begin().await,
            TxVerb::Commit => return self.tx_commit().await,
            TxVerb::Rollback => return self.tx_rollback().await,
            TxVerb::None => { }
        }
        self.reject_if_failed()?;

        let (tag, sent, suspended) = self
            .run_query(&sql, &params, &result_formats, false, m.max_rows as u64)
            .await?;

        match suspended {
            Some(suspended) => {
                if let Some(portal) = self.ext.portal_mut(&m.portal) {
                    portal.suspended = Some(suspended);
                }
                self.stream.send(backend::PortalSuspended);
            }
            None => {
                self.stream.send(backend::CommandComplete { tag: &tag.render(sent) });
            }
        }
        Ok(())
    }

    // ---------- error reporting ----------

    /// Send one ErrorResponse for `err`; fatal errors also close.
    async fn report(&mut self, err: &Error) -> Result<()> {
        tracing::debug!(error = %err, sqlstate = err.sqlstate(), "reporting error to client");
        let message = err.to_string();
        self.stream.send(backend::ErrorResponse::new(err.sqlstate(), &message));
        Ok(())
    }

    fn send_error(&mut self, code: &str, message: &str) {
        self.stream.send(backend::ErrorResponse::new(code, message));
    }

    async fn enter_draining(&mut self, err: &Error) -> Result<()> {
        self.fail_transaction();
        self.report(err).await?;
        self.draining = true;
        if err.is_fatal() {
            self.stream.flush().await?;
            return Err(Error::from(ProtocolError::new(err.to_string())));
        }
        Ok(())
    }

    /// One ReadyForQuery per logical boundary, with a flush.
    async fn ready(&mut self) -> Result<()> {
        self.stream.send(backend::ReadyForQuery { tx_status: self.tx.tag() });
        self.stream.flush().await
    }
}

fn format_for(result_formats: &[i16], index: usize) -> i16 {
    match result_formats.len() {
        0 => 0,
        1 => result_formats[0],
        _ => result_formats.get(index).copied().unwrap_or(0),
    }
}

fn send_data_row(stream: &mut PgStream, row: &[Value], result_formats: &[i16]) {
    let values: Vec<Option<Bytes>> = row
        .iter()
        .enumerate()
        .map(|(i, v)| v.encode(format_for(result_formats, i)))
        .collect();
    stream.send(backend::DataRow { values: &values });
}
