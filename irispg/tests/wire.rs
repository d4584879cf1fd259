//! Wire-level tests: a raw client socket speaking protocol v3 against a
//! server backed by a scripted fake backend.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use irispg::{
    Result, Server, ServerConfig,
    executor::{
        BackendSession, CommandTag, ExecuteOutcome, RowStream, SessionFactory,
    },
    protocol::backend::FieldDescription,
    sql::BoundParam,
    types::Value,
};

// ---------- fake backend ----------

#[derive(Default)]
#[derive(Debug)]
struct BackendLog {
    executed: Vec<(String, Vec<BoundParam>)>,
    bulk_rows: Vec<Vec<String>>,
}

#[derive(Debug)]
struct FakeSession {
    log: Arc<Mutex<BackendLog>>,
}

#[async_trait]
impl BackendSession for FakeSession {
    async fn execute(&mut self, sql: &str, params: &[BoundParam]) -> Result<ExecuteOutcome> {
        self.log
            .lock()
            .unwrap()
            .executed
            .push((sql.to_string(), params.to_vec()));

        if sql.trim().eq_ignore_ascii_case("SELECT 1") {
            return Ok(ExecuteOutcome {
                columns: vec![FieldDescription::synthetic("1", 23, 4)],
                rows: RowStream::from_rows(vec![vec![Value::Int4(1)]]),
                tag: CommandTag::Select,
                rows_affected: 1,
            });
        }
        if sql.contains("VECTOR_COSINE") {
            let rows: Vec<Vec<Value>> = (1..=5).map(|i| vec![Value::Int4(i)]).collect();
            return Ok(ExecuteOutcome {
                columns: vec![FieldDescription::synthetic("id", 23, 4)],
                rows: RowStream::from_rows(rows),
                tag: CommandTag::Select,
                rows_affected: 5,
            });
        }
        if sql.contains("INFORMATION_SCHEMA.TABLES") {
            return Ok(result(
                &["TABLE_NAME", "TABLE_TYPE"],
                vec![
                    vec![Value::Text("users".into()), Value::Text("BASE TABLE".into())],
                    vec![Value::Text("orders".into()), Value::Text("BASE TABLE".into())],
                ],
            ));
        }
        if sql.contains("INFORMATION_SCHEMA.COLUMNS") {
            let row = |table: &str, col: &str, n: i32, typ: &str, ident: &str| {
                vec![
                    Value::Text(table.into()),
                    Value::Text(col.into()),
                    Value::Int4(n),
                    Value::Text(typ.into()),
                    Value::Null,
                    Value::Text("YES".into()),
                    Value::Null,
                    Value::Text(ident.into()),
                ]
            };
            return Ok(result(
                &[
                    "TABLE_NAME", "COLUMN_NAME", "ORDINAL_POSITION", "DATA_TYPE",
                    "CHARACTER_MAXIMUM_LENGTH", "IS_NULLABLE", "COLUMN_DEFAULT", "IS_IDENTITY",
                ],
                vec![
                    row("users", "id", 1, "INTEGER", "YES"),
                    row("users", "name", 2, "VARCHAR", "NO"),
                    row("orders", "id", 1, "INTEGER", "YES"),
                ],
            ));
        }
        if sql.contains("INFORMATION_SCHEMA.") {
            // constraint catalogs are empty in this fixture
            return Ok(result(&["x"], Vec::new()));
        }
        Ok(ExecuteOutcome::command(CommandTag::of_sql(sql), 0))
    }

    async fn describe(&mut self, _sql: &str) -> Result<Vec<FieldDescription>> {
        Ok(Vec::new())
    }

    async fn begin(&mut self) -> Result<()> { Ok(()) }
    async fn commit(&mut self) -> Result<()> { Ok(()) }
    async fn rollback(&mut self) -> Result<()> { Ok(()) }

    async fn bulk_insert(
        &mut self,
        _table: &str,
        _columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<u64> {
        let mut log = self.log.lock().unwrap();
        log.bulk_rows.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn stream_select(&mut self, _sql: &str) -> Result<(Vec<FieldDescription>, RowStream)> {
        Ok((
            vec![
                FieldDescription::synthetic("id", 23, 4),
                FieldDescription::synthetic("name", 25, -1),
            ],
            RowStream::from_rows(vec![
                vec![Value::Int4(1), Value::Text("John".into())],
                vec![Value::Int4(2), Value::Text("Jane".into())],
            ]),
        ))
    }

    async fn ping(&mut self) -> Result<()> { Ok(()) }
    async fn cancel(&mut self) -> Result<()> { Ok(()) }
    async fn close(&mut self) { }
}

fn result(names: &[&str], rows: Vec<Vec<Value>>) -> ExecuteOutcome {
    let affected = rows.len() as u64;
    ExecuteOutcome {
        columns: names
            .iter()
            .map(|n| FieldDescription::synthetic(*n, 25, -1))
            .collect(),
        rows: RowStream::from_rows(rows),
        tag: CommandTag::Select,
        rows_affected: affected,
    }
}

struct FakeFactory {
    log: Arc<Mutex<BackendLog>>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn connect(&self) -> Result<Box<dyn BackendSession>> {
        Ok(Box::new(FakeSession { log: self.log.clone() }))
    }
}

// ---------- raw client helpers ----------

struct RawClient {
    socket: TcpStream,
    buf: BytesMut,
}

#[derive(Debug)]
struct Frame {
    msgtype: u8,
    body: Vec<u8>,
}

impl RawClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            socket: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
        }
    }

    async fn send_startup(&mut self, user: &str, database: &str) {
        let mut body = BytesMut::new();
        body.put_i32(196_608);
        for (k, v) in [("user", user), ("database", database)] {
            body.put_slice(k.as_bytes());
            body.put_u8(0);
            body.put_slice(v.as_bytes());
            body.put_u8(0);
        }
        body.put_u8(0);

        let mut frame = BytesMut::new();
        frame.put_i32(4 + body.len() as i32);
        frame.put_slice(&body);
        self.socket.write_all(&frame).await.unwrap();
    }

    async fn send_ssl_request(&mut self) {
        let mut frame = BytesMut::new();
        frame.put_i32(8);
        frame.put_i32(80877103);
        self.socket.write_all(&frame).await.unwrap();
    }

    async fn send(&mut self, msgtype: u8, body: &[u8]) {
        let mut frame = BytesMut::new();
        frame.put_u8(msgtype);
        frame.put_i32(4 + body.len() as i32);
        frame.put_slice(body);
        self.socket.write_all(&frame).await.unwrap();
    }

    async fn send_query(&mut self, sql: &str) {
        let mut body = Vec::from(sql.as_bytes());
        body.push(0);
        self.send(b'Q', &body).await;
    }

    async fn read_byte(&mut self) -> u8 {
        while self.buf.is_empty() {
            self.fill().await;
        }
        self.buf.get_u8()
    }

    async fn read_frame(&mut self) -> Frame {
        loop {
            if self.buf.len() >= 5 {
                let mut header = &self.buf[1..5];
                let len = header.get_i32() as usize;
                if self.buf.len() >= 1 + len {
                    let msgtype = self.buf.get_u8();
                    self.buf.advance(4);
                    let body = self.buf.split_to(len - 4).to_vec();
                    return Frame { msgtype, body };
                }
            }
            self.fill().await;
        }
    }

    async fn fill(&mut self) {
        let n = self.socket.read_buf(&mut self.buf).await.unwrap();
        assert!(n > 0, "server closed the connection unexpectedly");
    }

    /// Read frames until ReadyForQuery, returning everything seen
    /// including the RFQ itself.
    async fn read_until_ready(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame().await;
            let done = frame.msgtype == b'Z';
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}

fn cstr(body: &[u8]) -> String {
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

async fn start_server() -> (std::net::SocketAddr, Arc<Mutex<BackendLog>>) {
    let log = Arc::new(Mutex::new(BackendLog::default()));
    let factory = Arc::new(FakeFactory { log: log.clone() });
    let server = Server::new(ServerConfig::default(), factory);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server
            .serve_with_listener(listener, std::future::pending())
            .await
            .unwrap();
    });
    (addr, log)
}

async fn handshake(client: &mut RawClient) -> Vec<Frame> {
    client.send_startup("alice", "USER").await;
    client.read_until_ready().await
}

// ---------- scenarios ----------

#[tokio::test]
async fn ssl_probe_gets_refusal_byte() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;

    client.send_ssl_request().await;
    assert_eq!(client.read_byte().await, b'N');

    // the client continues in the clear
    let frames = handshake(&mut client).await;
    assert_eq!(frames.last().unwrap().msgtype, b'Z');
}

#[tokio::test]
async fn handshake_emits_auth_params_key_ready() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;

    let frames = handshake(&mut client).await;

    // AuthenticationOk first
    assert_eq!(frames[0].msgtype, b'R');
    assert_eq!(&frames[0].body[..4], &[0, 0, 0, 0]);

    // ParameterStatus set includes a modern server_version
    let statuses: Vec<(String, String)> = frames
        .iter()
        .filter(|f| f.msgtype == b'S')
        .map(|f| {
            let name = cstr(&f.body);
            let value = cstr(&f.body[name.len() + 1..]);
            (name, value)
        })
        .collect();
    let version = statuses
        .iter()
        .find(|(n, _)| n == "server_version")
        .map(|(_, v)| v.clone())
        .expect("server_version must be reported");
    assert!(version.starts_with("16"));
    assert!(statuses.iter().any(|(n, v)| n == "client_encoding" && v == "UTF8"));
    assert!(statuses.iter().any(|(n, v)| n == "integer_datetimes" && v == "on"));

    // exactly one BackendKeyData and one ReadyForQuery('I')
    assert_eq!(frames.iter().filter(|f| f.msgtype == b'K').count(), 1);
    let ready = frames.last().unwrap();
    assert_eq!(ready.msgtype, b'Z');
    assert_eq!(ready.body, vec![b'I']);
}

#[tokio::test]
async fn simple_select_one() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client.send_query("SELECT 1").await;
    let frames = client.read_until_ready().await;

    let types: Vec<u8> = frames.iter().map(|f| f.msgtype).collect();
    assert_eq!(types, vec![b'T', b'D', b'C', b'Z']);

    // one column named "1", type oid 23
    let row_desc = &frames[0].body;
    assert_eq!(&row_desc[..2], &[0, 1]);
    assert_eq!(cstr(&row_desc[2..]), "1");

    // one row, value "1"
    let data = &frames[1].body;
    assert_eq!(&data[..2], &[0, 1]);
    assert_eq!(&data[2..6], &[0, 0, 0, 1]);
    assert_eq!(data[6], b'1');

    assert_eq!(cstr(&frames[2].body), "SELECT 1");
    assert_eq!(frames[3].body, vec![b'I']);
}

#[tokio::test]
async fn exactly_one_ready_per_batch() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client.send_query("SELECT 1; SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.iter().filter(|f| f.msgtype == b'Z').count(), 1);
    // two result sets arrived ahead of it
    assert_eq!(frames.iter().filter(|f| f.msgtype == b'C').count(), 2);
}

#[tokio::test]
async fn vector_query_rewritten_for_backend() {
    let (addr, log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client
        .send_query("SELECT id FROM vecs ORDER BY embedding <=> '[0.1,0.2,0.3]' LIMIT 5")
        .await;
    let frames = client.read_until_ready().await;

    assert_eq!(frames.iter().filter(|f| f.msgtype == b'D').count(), 5);
    let complete = frames.iter().find(|f| f.msgtype == b'C').unwrap();
    assert_eq!(cstr(&complete.body), "SELECT 5");

    let executed = log.lock().unwrap().executed.clone();
    let (sql, params) = executed.last().unwrap();
    assert_eq!(
        sql,
        "SELECT TOP 5 ID FROM VECS ORDER BY \
         VECTOR_COSINE(EMBEDDING, TO_VECTOR('[0.1,0.2,0.3]', FLOAT))",
    );
    assert!(params.is_empty());
}

#[tokio::test]
async fn extended_protocol_bound_vector() {
    let (addr, log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    // Parse: unnamed statement with $1 vector and $2 limit
    let mut body = Vec::new();
    body.push(0); // empty statement name
    body.extend_from_slice(b"SELECT id FROM vecs ORDER BY embedding <=> $1 LIMIT $2\0");
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&23u32.to_be_bytes());
    client.send(b'P', &body).await;

    // Bind: $1 = vector text, $2 = 5 (text)
    let mut body = Vec::new();
    body.push(0); // unnamed portal
    body.push(0); // unnamed statement
    body.extend_from_slice(&0u16.to_be_bytes()); // all-text params
    body.extend_from_slice(&2u16.to_be_bytes());
    let vec_text = b"[0.1,0.2,0.3]";
    body.extend_from_slice(&(vec_text.len() as i32).to_be_bytes());
    body.extend_from_slice(vec_text);
    body.extend_from_slice(&1i32.to_be_bytes());
    body.extend_from_slice(b"5");
    body.extend_from_slice(&0u16.to_be_bytes()); // default result formats
    client.send(b'B', &body).await;

    // Execute unnamed portal, no row limit, then Sync
    client.send(b'E', &[0, 0, 0, 0, 0]).await;
    client.send(b'S', &[]).await;

    let frames = client.read_until_ready().await;
    let types: Vec<u8> = frames.iter().map(|f| f.msgtype).collect();
    assert_eq!(types[0], b'1'); // ParseComplete
    assert_eq!(types[1], b'2'); // BindComplete
    assert_eq!(frames.iter().filter(|f| f.msgtype == b'D').count(), 5);
    assert!(types.contains(&b'C'));
    assert_eq!(frames.last().unwrap().msgtype, b'Z');

    // the backend saw the vector inlined and only the limit forwarded
    let executed = log.lock().unwrap().executed.clone();
    let (sql, params) = executed.last().unwrap();
    assert!(sql.contains("TO_VECTOR('[0.1,0.2,0.3]', FLOAT)"));
    assert!(sql.contains("TOP ?"));
    assert_eq!(params, &vec![BoundParam::Text("5".into())]);
}

#[tokio::test]
async fn copy_from_stdin_csv_with_header() {
    let (addr, log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client
        .send_query("COPY Patients FROM STDIN WITH (FORMAT CSV, HEADER)")
        .await;
    let copy_in = client.read_frame().await;
    assert_eq!(copy_in.msgtype, b'G');

    // 1 header + 250 rows, split across frames at an awkward boundary
    let mut payload = String::from("PatientID,FirstName,LastName\n");
    for i in 1..=250 {
        payload.push_str(&format!("{i},First{i},Last{i}\n"));
    }
    let bytes = payload.as_bytes();
    let split = bytes.len() / 2 + 3;
    client.send(b'd', &bytes[..split]).await;
    client.send(b'd', &bytes[split..]).await;
    client.send(b'c', &[]).await;

    let frames = client.read_until_ready().await;
    let complete = frames.iter().find(|f| f.msgtype == b'C').unwrap();
    assert_eq!(cstr(&complete.body), "COPY 250");
    assert_eq!(frames.last().unwrap().body, vec![b'I']);

    let rows = log.lock().unwrap().bulk_rows.clone();
    assert_eq!(rows.len(), 250);
    assert_eq!(rows[0], vec!["1", "First1", "Last1"]);
    assert_eq!(rows[249], vec!["250", "First250", "Last250"]);
}

#[tokio::test]
async fn copy_to_stdout_streams_csv() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client
        .send_query("COPY patients TO STDOUT WITH (FORMAT CSV, HEADER)")
        .await;
    let frames = client.read_until_ready().await;

    assert_eq!(frames[0].msgtype, b'H');
    let data: Vec<u8> = frames
        .iter()
        .filter(|f| f.msgtype == b'd')
        .flat_map(|f| f.body.clone())
        .collect();
    let text = String::from_utf8(data).unwrap();
    assert!(text.starts_with("id,name\n"));
    assert!(text.contains("1,John\n"));
    assert!(frames.iter().any(|f| f.msgtype == b'c'));
    let complete = frames.iter().find(|f| f.msgtype == b'C').unwrap();
    assert_eq!(cstr(&complete.body), "COPY 2");
}

#[tokio::test]
async fn catalog_introspection_join() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client
        .send_query(
            "SELECT c.relname, n.nspname FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = 'public' AND c.relkind IN ('r','v') \
             ORDER BY relname",
        )
        .await;
    let frames = client.read_until_ready().await;

    assert_eq!(frames[0].msgtype, b'T');
    let data: Vec<&Frame> = frames.iter().filter(|f| f.msgtype == b'D').collect();
    // both base tables appear exactly once
    assert_eq!(data.len(), 2);

    // row values: (relname, nspname); nspname reads back as public
    let first = &data[0].body;
    let mut buf = &first[..];
    assert_eq!(buf.get_u16(), 2);
    let len = buf.get_i32() as usize;
    let relname = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    let len = buf.get_i32() as usize;
    let nspname = String::from_utf8_lossy(&buf[..len]).into_owned();
    assert_eq!(relname, "orders");
    assert_eq!(nspname, "public");
}

#[tokio::test]
async fn catalog_function_call() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client.send_query("SELECT format_type(23, NULL)").await;
    let frames = client.read_until_ready().await;
    let data = frames.iter().find(|f| f.msgtype == b'D').unwrap();
    let text = String::from_utf8_lossy(&data.body[6..]).into_owned();
    assert_eq!(text, "integer");
}

#[tokio::test]
async fn begin_and_commit_report_tx_status() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client.send_query("BEGIN").await;
    let frames = client.read_until_ready().await;
    let complete = frames.iter().find(|f| f.msgtype == b'C').unwrap();
    assert_eq!(cstr(&complete.body), "BEGIN");
    assert_eq!(frames.last().unwrap().body, vec![b'T']);

    client.send_query("COMMIT").await;
    let frames = client.read_until_ready().await;
    let complete = frames.iter().find(|f| f.msgtype == b'C').unwrap();
    assert_eq!(cstr(&complete.body), "COMMIT");
    assert_eq!(frames.last().unwrap().body, vec![b'I']);
}

#[tokio::test]
async fn translation_error_never_reaches_backend() {
    let (addr, log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    // operator with no vector argument: the rewrite cannot produce a
    // bracketed literal, so validation rejects before execution
    client.send_query("SELECT embedding <=> FROM broken").await;
    let frames = client.read_until_ready().await;
    assert!(frames.iter().any(|f| f.msgtype == b'E'));
    assert_eq!(frames.last().unwrap().msgtype, b'Z');
    assert!(log.lock().unwrap().executed.is_empty());
}

#[tokio::test]
async fn empty_query_response() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client.send_query("").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].msgtype, b'I');
    assert_eq!(frames[1].msgtype, b'Z');
}

#[tokio::test]
async fn terminate_closes_cleanly() {
    let (addr, _log) = start_server().await;
    let mut client = RawClient::connect(addr).await;
    handshake(&mut client).await;

    client.send(b'X', &[]).await;
    // the server closes; a read returns 0 bytes
    let n = client.socket.read_buf(&mut client.buf).await.unwrap();
    assert_eq!(n, 0);
}
