//! Messages sent back to PostgreSQL clients.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
//!
//! Framing works by back-patching: [`write`] stamps the type byte, leaves
//! a four-byte hole, lets the message render its body, then fills the
//! hole with the measured length. Messages never have to know their own
//! size up front, which keeps variable-width bodies (error fields, row
//! descriptions, SASL payloads) trivial to emit.
use bytes::{BufMut, Bytes, BytesMut};

use crate::ext::{BufMutExt, UsizeExt};

/// A server→client message body.
pub trait BackendProtocol {
    /// Message type byte.
    const MSGTYPE: u8;

    /// Render the body only; [`write`] owns the type byte and length.
    fn encode(self, buf: &mut BytesMut);
}

/// Frame one message into `buf`: type byte, length (patched in after the
/// body is rendered, counting itself per the protocol), body.
pub fn write<M: BackendProtocol>(msg: M, buf: &mut BytesMut) {
    buf.put_u8(M::MSGTYPE);
    let len_at = buf.len();
    buf.put_u32(0); // patched below
    msg.encode(buf);

    let frame_len = (buf.len() - len_at).to_u32();
    buf[len_at..len_at + 4].copy_from_slice(&frame_len.to_be_bytes());
}

/// Specifies that the authentication was successful.
pub struct AuthenticationOk;

impl BackendProtocol for AuthenticationOk {
    const MSGTYPE: u8 = b'R';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i32(0);
    }
}

/// Specifies that a clear-text password is required.
pub struct AuthenticationCleartextPassword;

impl BackendProtocol for AuthenticationCleartextPassword {
    const MSGTYPE: u8 = b'R';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i32(3);
    }
}

/// Specifies that SASL authentication is required, listing the server's
/// mechanisms in order of preference.
pub struct AuthenticationSasl<'a> {
    pub mechanisms: &'a [&'a str],
}

impl BackendProtocol for AuthenticationSasl<'_> {
    const MSGTYPE: u8 = b'R';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i32(10);
        for mech in self.mechanisms {
            buf.put_nul_string(mech);
        }
        buf.put_u8(b'\0');
    }
}

/// SASL challenge data for the exchange in progress.
pub struct AuthenticationSaslContinue<'a> {
    pub data: &'a [u8],
}

impl BackendProtocol for AuthenticationSaslContinue<'_> {
    const MSGTYPE: u8 = b'R';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i32(11);
        buf.put_slice(self.data);
    }
}

/// SASL outcome "additional data", completing the exchange.
pub struct AuthenticationSaslFinal<'a> {
    pub data: &'a [u8],
}

impl BackendProtocol for AuthenticationSaslFinal<'_> {
    const MSGTYPE: u8 = b'R';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i32(12);
        buf.put_slice(self.data);
    }
}

/// Cancellation key data; the frontend must save these values to be able
/// to issue cancel requests later.
pub struct BackendKeyData {
    pub process_id: i32,
    pub secret_key: i32,
}

impl BackendProtocol for BackendKeyData {
    const MSGTYPE: u8 = b'K';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

/// A run-time parameter status report.
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl BackendProtocol for ParameterStatus<'_> {
    const MSGTYPE: u8 = b'S';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.name);
        buf.put_nul_string(self.value);
    }
}

/// Sent whenever the backend is ready for a new query cycle.
pub struct ReadyForQuery {
    /// `b'I'` idle, `b'T'` in transaction, `b'E'` in failed transaction.
    pub tx_status: u8,
}

impl BackendProtocol for ReadyForQuery {
    const MSGTYPE: u8 = b'Z';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_u8(self.tx_status);
    }
}

/// Describes one column of a result set.
///
/// In a RowDescription returned from the statement variant of Describe the
/// format code is not yet known and is always zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    /// The field name.
    pub name: String,
    /// Table oid when the field is a table column, otherwise zero.
    pub table_oid: u32,
    /// Attribute number when the field is a table column, otherwise zero.
    pub attnum: i16,
    /// The object ID of the field's data type.
    pub type_oid: u32,
    /// The data type size; negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier; meaning is type-specific.
    pub type_modifier: i32,
    /// Zero (text) or one (binary).
    pub format: i16,
}

impl FieldDescription {
    /// A synthetic text-format column not backed by any table.
    pub fn synthetic(name: impl Into<String>, type_oid: u32, type_size: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            attnum: 0,
            type_oid,
            type_size,
            type_modifier: -1,
            format: 0,
        }
    }
}

/// Identifies the message as a row description.
pub struct RowDescription<'a> {
    pub fields: &'a [FieldDescription],
}

impl BackendProtocol for RowDescription<'_> {
    const MSGTYPE: u8 = b'T';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_u16(self.fields.len().to_u16());
        for f in self.fields {
            buf.put_nul_string(&f.name);
            buf.put_u32(f.table_oid);
            buf.put_i16(f.attnum);
            buf.put_u32(f.type_oid);
            buf.put_i16(f.type_size);
            buf.put_i32(f.type_modifier);
            buf.put_i16(f.format);
        }
    }
}

/// Identifies the message as a data row; `None` cells are SQL NULL.
pub struct DataRow<'a> {
    pub values: &'a [Option<Bytes>],
}

impl BackendProtocol for DataRow<'_> {
    const MSGTYPE: u8 = b'D';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_u16(self.values.len().to_u16());
        for value in self.values {
            match value {
                Some(bytes) => {
                    buf.put_i32(bytes.len() as i32);
                    buf.put_slice(bytes);
                }
                // -1 indicates NULL, no value bytes follow
                None => buf.put_i32(-1),
            }
        }
    }
}

/// Identifies the message as a command-completed response.
pub struct CommandComplete<'a> {
    /// The command tag, e.g. `SELECT 5`, `INSERT 0 1`, `COPY 250`.
    pub tag: &'a str,
}

impl BackendProtocol for CommandComplete<'_> {
    const MSGTYPE: u8 = b'C';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.tag);
    }
}

/// Identifies the message as a response to an empty query string.
pub struct EmptyQueryResponse;

impl BackendProtocol for EmptyQueryResponse {
    const MSGTYPE: u8 = b'I';

    fn encode(self, _: &mut BytesMut) { }
}

/// Identifies the message as an error.
pub struct ErrorResponse<'a> {
    /// Severity field `S` (and `V`), always `ERROR` at this boundary.
    pub severity: &'a str,
    /// SQLSTATE code field `C`.
    pub code: &'a str,
    /// Primary human-readable message field `M`.
    pub message: &'a str,
    /// Optional detail field `D`.
    pub detail: Option<&'a str>,
    /// Optional error position field `P`, 1-indexed into the query text.
    pub position: Option<u32>,
}

impl<'a> ErrorResponse<'a> {
    pub fn new(code: &'a str, message: &'a str) -> Self {
        Self { severity: "ERROR", code, message, detail: None, position: None }
    }
}

impl BackendProtocol for ErrorResponse<'_> {
    const MSGTYPE: u8 = b'E';

    fn encode(self, buf: &mut BytesMut) {
        for (field, value) in [
            (b'S', self.severity),
            (b'V', self.severity),
            (b'C', self.code),
            (b'M', self.message),
        ] {
            buf.put_u8(field);
            buf.put_nul_string(value);
        }
        if let Some(detail) = self.detail {
            buf.put_u8(b'D');
            buf.put_nul_string(detail);
        }
        if let Some(position) = self.position {
            let mut itoa = itoa::Buffer::new();
            buf.put_u8(b'P');
            buf.put_nul_string(itoa.format(position));
        }
        buf.put_u8(b'\0');
    }
}

/// Identifies the message as a notice.
pub struct NoticeResponse<'a> {
    pub code: &'a str,
    pub message: &'a str,
}

impl BackendProtocol for NoticeResponse<'_> {
    const MSGTYPE: u8 = b'N';

    fn encode(self, buf: &mut BytesMut) {
        for (field, value) in [
            (b'S', "NOTICE"),
            (b'C', self.code),
            (b'M', self.message),
        ] {
            buf.put_u8(field);
            buf.put_nul_string(value);
        }
        buf.put_u8(b'\0');
    }
}

macro_rules! unit_message {
    ($(#[$meta:meta])* $name:ident = $ty:literal) => {
        $(#[$meta])*
        pub struct $name;

        impl BackendProtocol for $name {
            const MSGTYPE: u8 = $ty;

            fn encode(self, _: &mut BytesMut) { }
        }
    };
}

unit_message! {
    /// Identifies the message as a Parse-complete indicator.
    ParseComplete = b'1'
}

unit_message! {
    /// Identifies the message as a Bind-complete indicator.
    BindComplete = b'2'
}

unit_message! {
    /// Identifies the message as a Close-complete indicator.
    CloseComplete = b'3'
}

unit_message! {
    /// Identifies the message as a no-data indicator.
    NoData = b'n'
}

unit_message! {
    /// Identifies the message as a portal-suspended indicator; appears when
    /// an Execute row-count limit was reached.
    PortalSuspended = b's'
}

unit_message! {
    /// Identifies the message as a COPY completion indicator.
    CopyDone = b'c'
}

/// Identifies the message as a parameter description.
pub struct ParameterDescription<'a> {
    pub oids: &'a [u32],
}

impl BackendProtocol for ParameterDescription<'_> {
    const MSGTYPE: u8 = b't';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_u16(self.oids.len().to_u16());
        for oid in self.oids {
            buf.put_u32(*oid);
        }
    }
}

/// Identifies the message as a Start Copy In response; the frontend must
/// now send copy-in data.
pub struct CopyInResponse {
    /// Overall format: 0 textual, 1 binary.
    pub format: i8,
    /// Per-column format codes; all zero in textual mode.
    pub column_count: u16,
}

impl BackendProtocol for CopyInResponse {
    const MSGTYPE: u8 = b'G';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i8(self.format);
        buf.put_u16(self.column_count);
        for _ in 0..self.column_count {
            buf.put_i16(0);
        }
    }
}

/// Identifies the message as a Start Copy Out response.
pub struct CopyOutResponse {
    pub format: i8,
    pub column_count: u16,
}

impl BackendProtocol for CopyOutResponse {
    const MSGTYPE: u8 = b'H';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_i8(self.format);
        buf.put_u16(self.column_count);
        for _ in 0..self.column_count {
            buf.put_i16(0);
        }
    }
}

/// Identifies the message as COPY data sent to the client.
pub struct CopyData<'a> {
    pub data: &'a [u8],
}

impl BackendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_slice(self.data);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded<B: BackendProtocol>(msg: B) -> BytesMut {
        let mut buf = BytesMut::new();
        write(msg, &mut buf);
        buf
    }

    #[test]
    fn ready_for_query_frame() {
        let buf = encoded(ReadyForQuery { tx_status: b'I' });
        assert_eq!(&buf[..], &[b'Z', 0, 0, 0, 5, b'I']);
    }

    #[test]
    fn auth_ok_frame() {
        let buf = encoded(AuthenticationOk);
        assert_eq!(&buf[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn length_counts_itself_but_not_type_byte() {
        let buf = encoded(ParameterStatus { name: "TimeZone", value: "UTC" });
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[1..5]);
        // 4 (length) + "TimeZone\0" + "UTC\0"
        assert_eq!(u32::from_be_bytes(len) as usize, 4 + 9 + 4);
        assert_eq!(buf.len(), 1 + 4 + 9 + 4);
    }

    #[test]
    fn consecutive_frames_each_patched() {
        let mut buf = BytesMut::new();
        write(ParseComplete, &mut buf);
        write(BindComplete, &mut buf);
        assert_eq!(&buf[..], &[b'1', 0, 0, 0, 4, b'2', 0, 0, 0, 4]);
    }

    #[test]
    fn data_row_null_encoding() {
        let values = [Some(Bytes::from_static(b"1")), None];
        let buf = encoded(DataRow { values: &values });
        // 'D' + len + 2 columns + (len 1, "1") + (len -1)
        assert_eq!(buf[0], b'D');
        assert_eq!(&buf[5..7], &[0, 2]);
        assert_eq!(&buf[7..11], &[0, 0, 0, 1]);
        assert_eq!(buf[11], b'1');
        assert_eq!(&buf[12..16], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn row_description_layout() {
        let fields = [
            FieldDescription::synthetic("id", 23, 4),
            FieldDescription::synthetic("name", 25, -1),
        ];
        let buf = encoded(RowDescription { fields: &fields });
        assert_eq!(buf[0], b'T');
        assert_eq!(&buf[5..7], &[0, 2]);
        // per field: name + nul + 4 + 2 + 4 + 2 + 4 + 2; total body = 2 + 21 + 23
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[1..5]);
        assert_eq!(u32::from_be_bytes(len) as usize, 4 + 2 + 21 + 23);
    }

    #[test]
    fn error_response_fields() {
        let buf = encoded(ErrorResponse {
            position: Some(12),
            detail: Some("try harder"),
            ..ErrorResponse::new("42601", "syntax error")
        });
        let body = &buf[5..];
        assert!(body.starts_with(b"SERROR\0VERROR\0C42601\0"));
        assert!(body.ends_with(b"\0"));
    }

    #[test]
    fn copy_in_response_columns() {
        let buf = encoded(CopyInResponse { format: 0, column_count: 3 });
        assert_eq!(buf[0], b'G');
        // format byte, 3 columns, three zero format codes
        assert_eq!(&buf[5..], &[0, 0, 3, 0, 0, 0, 0, 0, 0]);
    }
}
