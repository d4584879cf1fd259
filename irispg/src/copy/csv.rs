//! Streaming CSV decode/encode for the COPY subprotocol.
//!
//! CopyData frames chop the stream at arbitrary byte boundaries, so the
//! decoder reassembles records across pushes: a record is only surfaced
//! once its terminating newline (outside quotes) has arrived.
use bytes::{Buf, BytesMut};

/// Malformed CSV input; carries the 1-based line number clients need to
/// find the bad row.
pub struct CsvError {
    message: String,
    line: u64,
}

impl CsvError {
    pub(crate) fn new(message: impl Into<String>, line: u64) -> Self {
        Self { message: message.into(), line }
    }

    pub fn line(&self) -> u64 {
        self.line
    }
}

impl std::error::Error for CsvError { }

impl std::fmt::Display for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed COPY data at line {}: {}", self.line, self.message)
    }
}

impl std::fmt::Debug for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// CSV shape options from the COPY statement's WITH clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub header: bool,
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { header: false, delimiter: b',' }
    }
}

/// Incremental CSV record decoder.
pub struct CsvDecoder {
    buf: BytesMut,
    opts: CsvOptions,
    max_line_len: usize,
    /// 1-based line of the record currently being assembled.
    line: u64,
    header_pending: bool,
}

impl CsvDecoder {
    pub fn new(opts: CsvOptions, max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            opts,
            max_line_len,
            line: 1,
            header_pending: opts.header,
        }
    }

    /// Append one CopyData chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// 1-based line number of the record currently being assembled.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// The next complete record, or `None` until more bytes arrive.
    /// A header row is consumed silently when the options ask for one.
    pub fn next_record(&mut self) -> Result<Option<Vec<String>>, CsvError> {
        loop {
            let Some(end) = self.find_record_end()? else {
                if self.buf.len() > self.max_line_len {
                    return Err(CsvError::new(
                        format!("line exceeds {} bytes", self.max_line_len),
                        self.line,
                    ));
                }
                return Ok(None);
            };

            let raw = self.buf.split_to(end.next_start);
            let record = parse_record(
                &raw[..end.record_len],
                self.opts.delimiter,
                self.line,
            )?;
            self.line += 1;

            if self.header_pending {
                self.header_pending = false;
                continue;
            }
            return Ok(Some(record));
        }
    }

    /// Flush a trailing record that has no final newline. Call once after
    /// CopyDone.
    pub fn finish(&mut self) -> Result<Option<Vec<String>>, CsvError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let raw = self.buf.split();
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        let record = parse_record(&raw, self.opts.delimiter, self.line)?;
        self.line += 1;
        if self.header_pending {
            self.header_pending = false;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Find the newline ending the current record, honoring quotes.
    fn find_record_end(&self) -> Result<Option<RecordEnd>, CsvError> {
        let bytes = &self.buf[..];
        let mut quoted = false;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => quoted = !quoted,
                b'\n' if !quoted => {
                    let record_len = if i > 0 && bytes[i - 1] == b'\r' { i - 1 } else { i };
                    return Ok(Some(RecordEnd { record_len, next_start: i + 1 }));
                }
                _ => { }
            }
            i += 1;
            if i > self.max_line_len {
                return Err(CsvError::new(
                    format!("line exceeds {} bytes", self.max_line_len),
                    self.line,
                ));
            }
        }
        Ok(None)
    }
}

struct RecordEnd {
    record_len: usize,
    next_start: usize,
}

/// Split one raw record into fields, handling quoted fields and doubled
/// quotes.
fn parse_record(raw: &[u8], delimiter: u8, line: u64) -> Result<Vec<String>, CsvError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| CsvError::new("record is not valid UTF-8", line))?;
    let bytes = text.as_bytes();

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut i = 0;

    while i <= bytes.len() {
        if i == bytes.len() || bytes[i] == delimiter {
            fields.push(std::mem::take(&mut field));
            i += 1;
            continue;
        }
        if bytes[i] == b'"' && field.is_empty() {
            // quoted field
            i += 1;
            loop {
                if i >= bytes.len() {
                    return Err(CsvError::new("unterminated quoted field", line));
                }
                if bytes[i] == b'"' {
                    if bytes.get(i + 1) == Some(&b'"') {
                        field.push('"');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                // multi-byte characters copied verbatim
                let ch_len = utf8_len(bytes[i]);
                field.push_str(&text[i..i + ch_len]);
                i += ch_len;
            }
            if i < bytes.len() && bytes[i] != delimiter {
                return Err(CsvError::new("unexpected data after closing quote", line));
            }
            continue;
        }
        let ch_len = utf8_len(bytes[i]);
        field.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    Ok(fields)
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xf0 => 4,
        b if b >= 0xe0 => 3,
        _ => 2,
    }
}

/// Append one row in CSV form, quoting only where required.
pub fn encode_row(out: &mut Vec<u8>, fields: &[String], delimiter: u8) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        let needs_quote = field
            .bytes()
            .any(|b| b == delimiter || b == b'"' || b == b'\n' || b == b'\r');
        if needs_quote {
            out.push(b'"');
            for b in field.bytes() {
                if b == b'"' {
                    out.push(b'"');
                }
                out.push(b);
            }
            out.push(b'"');
        } else {
            out.extend_from_slice(field.as_bytes());
        }
    }
    out.push(b'\n');
}

#[cfg(test)]
mod test {
    use super::*;

    fn decoder() -> CsvDecoder {
        CsvDecoder::new(CsvOptions::default(), 1024 * 1024)
    }

    #[test]
    fn single_chunk_rows() {
        let mut d = decoder();
        d.push(b"1,John,Smith\n2,Jane,Doe\n");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "John", "Smith"]);
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["2", "Jane", "Doe"]);
        assert!(d.next_record().unwrap().is_none());
    }

    #[test]
    fn record_split_across_chunks() {
        let mut d = decoder();
        d.push(b"1,Jo");
        assert!(d.next_record().unwrap().is_none());
        d.push(b"hn,Smith\n");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "John", "Smith"]);
    }

    #[test]
    fn header_skipped() {
        let mut d = CsvDecoder::new(
            CsvOptions { header: true, delimiter: b',' },
            1024,
        );
        d.push(b"PatientID,FirstName\n1,John\n");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "John"]);
    }

    #[test]
    fn quoted_field_with_delimiter_and_newline() {
        let mut d = decoder();
        d.push(b"1,\"Smith, John\",\"line1\nline2\"\n");
        assert_eq!(
            d.next_record().unwrap().unwrap(),
            vec!["1", "Smith, John", "line1\nline2"],
        );
    }

    #[test]
    fn doubled_quotes() {
        let mut d = decoder();
        d.push(b"1,\"say \"\"hi\"\"\"\n");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "say \"hi\""]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut d = decoder();
        d.push(b"1,a\r\n2,b\r\n");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "a"]);
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["2", "b"]);
    }

    #[test]
    fn trailing_record_without_newline() {
        let mut d = decoder();
        d.push(b"1,a\n2,b");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "a"]);
        assert!(d.next_record().unwrap().is_none());
        assert_eq!(d.finish().unwrap().unwrap(), vec!["2", "b"]);
    }

    #[test]
    fn line_length_bound() {
        let mut d = CsvDecoder::new(CsvOptions::default(), 16);
        d.push(&[b'x'; 64]);
        let err = d.next_record().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn error_carries_line_number() {
        let mut d = decoder();
        d.push(b"1,ok\n2,\"unterminated\n");
        assert!(d.next_record().unwrap().is_some());
        assert!(d.next_record().unwrap().is_none());
        let err = d.finish().unwrap_err();
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn encode_round_trip() {
        let mut out = Vec::new();
        encode_row(
            &mut out,
            &["1".into(), "Smith, John".into(), "say \"hi\"".into()],
            b',',
        );
        assert_eq!(out, b"1,\"Smith, John\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn empty_fields() {
        let mut d = decoder();
        d.push(b"1,,3\n");
        assert_eq!(d.next_record().unwrap().unwrap(), vec!["1", "", "3"]);
    }
}
