//! Messages received from PostgreSQL clients.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, Bytes};

use super::{
    CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, PROTOCOL_VERSION, ProtocolError, SSL_REQUEST_CODE,
};
use crate::ext::BytesExt;

/// A type that can be decoded from a frontend message body.
pub trait FrontendProtocol: Sized {
    /// Try decode given bytes into message.
    ///
    /// Note that `body` is only the main body, **excluding** message type
    /// and length.
    fn decode(body: Bytes) -> Result<Self, ProtocolError>;
}

/// Typed messages a client may send after startup.
pub enum FrontendMessage {
    /// Identifies the message as a simple query.
    Query(Query),
    /// Identifies the message as a Parse command.
    Parse(Parse),
    /// Identifies the message as a Bind command.
    Bind(Bind),
    /// Identifies the message as a Describe command.
    Describe(Describe),
    /// Identifies the message as an Execute command.
    Execute(Execute),
    /// Identifies the message as a Close command.
    Close(Close),
    /// Identifies the message as a Sync command.
    Sync(Sync),
    /// Identifies the message as a Flush command.
    Flush(Flush),
    /// Identifies the message as a termination request.
    Terminate(Terminate),
    /// Identifies the message as a function call; not supported, but must
    /// be recognized so it can be rejected in-protocol.
    FunctionCall(FunctionCall),
    /// Password or SASL response; the payload meaning depends on the
    /// authentication exchange in progress.
    PasswordMessage(PasswordMessage),
    /// Identifies the message as COPY data.
    CopyData(CopyData),
    /// Identifies the message as a COPY completion indicator.
    CopyDone(CopyDone),
    /// Identifies the message as a COPY failure indicator.
    CopyFail(CopyFail),
}

macro_rules! match_frontend {
    ($($name:ident = $ty:literal,)*) => {
        $(
            impl $name {
                #[doc = concat!("`",stringify!($ty),"`")]
                pub const MSGTYPE: u8 = $ty;
            }
        )*

        impl FrontendMessage {
            /// Decode a message body given its type byte.
            pub fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as FrontendProtocol>::decode(body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }

            /// Returns the message type byte.
            pub const fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Message name for diagnostics.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$name(_) => stringify!($name),)*
                }
            }
        }
    };
}

match_frontend! {
    Query = b'Q',
    Parse = b'P',
    Bind = b'B',
    Describe = b'D',
    Execute = b'E',
    Close = b'C',
    Sync = b'S',
    Flush = b'H',
    Terminate = b'X',
    FunctionCall = b'F',
    PasswordMessage = b'p',
    CopyData = b'd',
    CopyDone = b'c',
    CopyFail = b'f',
}

/// The first, untyped frame of a connection.
///
/// For historical reasons, the very first message sent by the client has no
/// message-type byte: only a length, a code, and (for startup) parameters.
pub enum StartupMessage {
    /// Protocol 3.0 startup carrying `user`, optionally `database` and
    /// other run-time parameters.
    Startup {
        /// Name/value pairs in arrival order.
        params: Vec<(String, String)>,
    },
    /// `80877103`: client asks to negotiate SSL before startup.
    SslRequest,
    /// `80877104`: client asks to negotiate GSSAPI encryption.
    GssEncRequest,
    /// `80877102`: out-of-band cancellation addressed by key data.
    CancelRequest { process_id: i32, secret_key: i32 },
}

impl StartupMessage {
    /// Decode the untyped startup frame body (excluding the length itself).
    pub fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.remaining() < 4 {
            return Err(ProtocolError::truncated("startup"));
        }
        let code = body.get_i32();

        match code {
            SSL_REQUEST_CODE => Ok(Self::SslRequest),
            GSSENC_REQUEST_CODE => Ok(Self::GssEncRequest),
            CANCEL_REQUEST_CODE => {
                if body.remaining() < 8 {
                    return Err(ProtocolError::truncated("cancel request"));
                }
                Ok(Self::CancelRequest {
                    process_id: body.get_i32(),
                    secret_key: body.get_i32(),
                })
            }
            PROTOCOL_VERSION => {
                let mut params = Vec::new();
                // name/value pairs, terminated by a single nul
                loop {
                    let Some(name) = body.get_nul_string() else {
                        return Err(ProtocolError::truncated("startup parameters"));
                    };
                    if name.is_empty() {
                        break;
                    }
                    let Some(value) = body.get_nul_string() else {
                        return Err(ProtocolError::truncated("startup parameters"));
                    };
                    params.push((name, value));
                }
                Ok(Self::Startup { params })
            }
            other => Err(ProtocolError::new(format!(
                "unsupported protocol version or request code {other}",
            ))),
        }
    }
}

/// Identifies the message as a simple query.
pub struct Query {
    /// The query string itself.
    pub sql: String,
}

impl FrontendProtocol for Query {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let sql = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("Query"))?;
        Ok(Self { sql })
    }
}

/// Identifies the message as a Parse command.
pub struct Parse {
    /// Prepared statement name; an empty string selects the unnamed
    /// prepared statement.
    pub name: String,
    /// The query string to be parsed.
    pub sql: String,
    /// Parameter data type oids prespecified by the frontend.
    ///
    /// Zero means the type is left unspecified.
    pub param_oids: Vec<u32>,
}

impl FrontendProtocol for Parse {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let name = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("Parse"))?;
        let sql = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("Parse"))?;
        if body.remaining() < 2 {
            return Err(ProtocolError::truncated("Parse"));
        }
        let len = body.get_u16() as usize;
        if body.remaining() < len * 4 {
            return Err(ProtocolError::truncated("Parse"));
        }
        let mut param_oids = Vec::with_capacity(len);
        for _ in 0..len {
            param_oids.push(body.get_u32());
        }
        Ok(Self { name, sql, param_oids })
    }
}

/// Identifies the message as a Bind command.
pub struct Bind {
    /// The name of the destination portal; empty selects the unnamed portal.
    pub portal: String,
    /// The name of the source prepared statement.
    pub statement: String,
    /// Per-parameter format codes: 0 = text, 1 = binary.
    ///
    /// Zero entries means all-text, one entry applies to every parameter.
    pub param_formats: Vec<i16>,
    /// Parameter values; `None` is SQL NULL.
    pub params: Vec<Option<Bytes>>,
    /// Result-column format codes, same convention as `param_formats`.
    pub result_formats: Vec<i16>,
}

impl FrontendProtocol for Bind {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let truncated = || ProtocolError::truncated("Bind");

        let portal = body.get_nul_string().ok_or_else(truncated)?;
        let statement = body.get_nul_string().ok_or_else(truncated)?;

        if body.remaining() < 2 {
            return Err(truncated());
        }
        let nfmt = body.get_u16() as usize;
        if body.remaining() < nfmt * 2 {
            return Err(truncated());
        }
        let mut param_formats = Vec::with_capacity(nfmt);
        for _ in 0..nfmt {
            param_formats.push(body.get_i16());
        }

        if body.remaining() < 2 {
            return Err(truncated());
        }
        let nparams = body.get_u16() as usize;
        let mut params = Vec::with_capacity(nparams);
        for _ in 0..nparams {
            if body.remaining() < 4 {
                return Err(truncated());
            }
            let len = body.get_i32();
            if len < 0 {
                params.push(None);
                continue;
            }
            let len = len as usize;
            if body.remaining() < len {
                return Err(truncated());
            }
            params.push(Some(body.split_to(len)));
        }

        if body.remaining() < 2 {
            return Err(truncated());
        }
        let nres = body.get_u16() as usize;
        if body.remaining() < nres * 2 {
            return Err(truncated());
        }
        let mut result_formats = Vec::with_capacity(nres);
        for _ in 0..nres {
            result_formats.push(body.get_i16());
        }

        Ok(Self { portal, statement, param_formats, params, result_formats })
    }
}

/// Identifies the message as a Describe command.
pub struct Describe {
    /// `'S'` to describe a prepared statement; `'P'` to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal.
    pub name: String,
}

impl FrontendProtocol for Describe {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.remaining() < 1 {
            return Err(ProtocolError::truncated("Describe"));
        }
        let kind = body.get_u8();
        let name = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("Describe"))?;
        Ok(Self { kind, name })
    }
}

/// Identifies the message as an Execute command.
pub struct Execute {
    /// The name of the portal to execute.
    pub portal: String,
    /// Maximum number of rows to return; zero denotes "no limit".
    pub max_rows: u32,
}

impl FrontendProtocol for Execute {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let portal = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("Execute"))?;
        if body.remaining() < 4 {
            return Err(ProtocolError::truncated("Execute"));
        }
        Ok(Self { portal, max_rows: body.get_u32() })
    }
}

/// Identifies the message as a Close command.
pub struct Close {
    /// `'S'` to close a prepared statement; `'P'` to close a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to close.
    pub name: String,
}

impl FrontendProtocol for Close {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        if body.remaining() < 1 {
            return Err(ProtocolError::truncated("Close"));
        }
        let kind = body.get_u8();
        let name = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("Close"))?;
        Ok(Self { kind, name })
    }
}

macro_rules! unit_message {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name;

        impl FrontendProtocol for $name {
            fn decode(_: Bytes) -> Result<Self, ProtocolError> {
                Ok(Self)
            }
        }
    };
}

unit_message! {
    /// Identifies the message as a Sync command.
    Sync
}

unit_message! {
    /// Identifies the message as a Flush command.
    Flush
}

unit_message! {
    /// Identifies the message as a termination request.
    Terminate
}

unit_message! {
    /// Identifies the message as a COPY completion indicator.
    CopyDone
}

/// Identifies the message as a function call; carried opaquely.
pub struct FunctionCall {
    pub body: Bytes,
}

impl FrontendProtocol for FunctionCall {
    fn decode(body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { body })
    }
}

/// Password or SASL response payload.
///
/// The same `'p'` type byte carries PasswordMessage, SASLInitialResponse
/// and SASLResponse; only the authentication exchange knows which.
pub struct PasswordMessage {
    pub body: Bytes,
}

impl PasswordMessage {
    /// Interpret the payload as a cleartext password.
    pub fn as_password(&self) -> Result<&str, ProtocolError> {
        let body = &self.body[..];
        let body = body.strip_suffix(b"\0").unwrap_or(body);
        std::str::from_utf8(body)
            .map_err(|_| ProtocolError::new("password is not valid UTF-8"))
    }

    /// Interpret the payload as a SASLInitialResponse: mechanism name plus
    /// an optional initial client response.
    pub fn as_sasl_initial(&self) -> Result<(String, Bytes), ProtocolError> {
        let mut body = self.body.clone();
        let mechanism = body
            .get_nul_string()
            .ok_or_else(|| ProtocolError::truncated("SASLInitialResponse"))?;
        if body.remaining() < 4 {
            return Err(ProtocolError::truncated("SASLInitialResponse"));
        }
        let len = body.get_i32();
        let data = match len {
            -1 => Bytes::new(),
            n if n >= 0 && body.remaining() >= n as usize => body.split_to(n as usize),
            _ => return Err(ProtocolError::truncated("SASLInitialResponse")),
        };
        Ok((mechanism, data))
    }
}

impl FrontendProtocol for PasswordMessage {
    fn decode(body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { body })
    }
}

/// Identifies the message as COPY data.
pub struct CopyData {
    /// Data that forms part of a COPY data stream; messages need not have
    /// any particular alignment with data rows.
    pub data: Bytes,
}

impl FrontendProtocol for CopyData {
    fn decode(body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { data: body })
    }
}

/// Identifies the message as a COPY failure indicator.
pub struct CopyFail {
    /// An error message to report as the cause of failure.
    pub message: String,
}

impl FrontendProtocol for CopyFail {
    fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let message = body.get_nul_string().unwrap_or_default();
        Ok(Self { message })
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::ext::BufMutExt;

    #[test]
    fn decode_startup_params() {
        let mut buf = BytesMut::new();
        buf.put_i32(PROTOCOL_VERSION);
        buf.put_nul_string("user");
        buf.put_nul_string("alice");
        buf.put_nul_string("database");
        buf.put_nul_string("USER");
        buf.put_u8(0);

        let msg = StartupMessage::decode(buf.freeze()).unwrap();
        let StartupMessage::Startup { params } = msg else {
            panic!("expected startup");
        };
        assert_eq!(params[0], ("user".into(), "alice".into()));
        assert_eq!(params[1], ("database".into(), "USER".into()));
    }

    #[test]
    fn decode_ssl_request() {
        let mut buf = BytesMut::new();
        buf.put_i32(SSL_REQUEST_CODE);
        assert!(matches!(
            StartupMessage::decode(buf.freeze()).unwrap(),
            StartupMessage::SslRequest,
        ));
    }

    #[test]
    fn decode_cancel_request() {
        let mut buf = BytesMut::new();
        buf.put_i32(CANCEL_REQUEST_CODE);
        buf.put_i32(7777);
        buf.put_i32(-12345);
        let StartupMessage::CancelRequest { process_id, secret_key } =
            StartupMessage::decode(buf.freeze()).unwrap()
        else {
            panic!("expected cancel request");
        };
        assert_eq!(process_id, 7777);
        assert_eq!(secret_key, -12345);
    }

    #[test]
    fn decode_bind_with_null_param() {
        let mut buf = BytesMut::new();
        buf.put_nul_string(""); // portal
        buf.put_nul_string("s1"); // statement
        buf.put_u16(1);
        buf.put_i16(0);
        buf.put_u16(2);
        buf.put_i32(-1); // NULL
        buf.put_i32(2);
        buf.put_slice(b"42");
        buf.put_u16(0);

        let bind = Bind::decode(buf.freeze()).unwrap();
        assert_eq!(bind.statement, "s1");
        assert_eq!(bind.params.len(), 2);
        assert!(bind.params[0].is_none());
        assert_eq!(bind.params[1].as_deref(), Some(&b"42"[..]));
    }

    #[test]
    fn decode_query() {
        let mut buf = BytesMut::new();
        buf.put_nul_string("SELECT 1");
        let msg = FrontendMessage::decode(b'Q', buf.freeze()).unwrap();
        let FrontendMessage::Query(q) = msg else { panic!("expected query") };
        assert_eq!(q.sql, "SELECT 1");
    }

    #[test]
    fn unknown_msgtype_is_protocol_error() {
        assert!(FrontendMessage::decode(b'@', Bytes::new()).is_err());
    }
}
