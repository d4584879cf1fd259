//! The COPY subprotocol: statement parsing and bulk transfer state.
//!
//! `COPY … FROM STDIN` consumes CopyData frames through a streaming CSV
//! decoder and feeds the backend in fixed-size batches; `COPY … TO
//! STDOUT` pulls rows and emits bounded CSV chunks. Neither direction
//! ever buffers a full result.
mod csv;

pub use csv::{CsvError, CsvOptions};

use crate::{
    Result,
    executor::{Handle, RowStream},
    sql::scan,
    types::Value,
};

/// Rows per bulk_insert call.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// CSV bytes per outbound CopyData frame.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Longest accepted CSV line.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    FromStdin,
    ToStdout,
}

/// A parsed COPY statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyCommand {
    /// Target (FROM) or source (TO) table; empty when copying a query.
    pub table: String,
    /// Explicit column list, if one was given.
    pub columns: Option<Vec<String>>,
    /// `COPY (SELECT …) TO STDOUT` carries the query instead of a table.
    pub query: Option<String>,
    pub direction: CopyDirection,
    pub options: CsvOptions,
}

impl CopyCommand {
    /// Parse a COPY statement; `None` when the SQL is not a COPY.
    ///
    /// Accepted shapes:
    /// `COPY t [(a,b)] FROM STDIN [WITH (FORMAT CSV[, HEADER][, DELIMITER 'c'])]`
    /// `COPY t [(a,b)] | (query) TO STDOUT [WITH …]`, plus the legacy
    /// `WITH CSV HEADER` spelling.
    pub fn parse(sql: &str) -> Option<CopyCommand> {
        let trimmed = sql.trim().trim_end_matches(';');
        let rest = strip_keyword(trimmed, "COPY")?;

        // optional parenthesized query source
        let (table, columns, query, rest) = if let Some(rest) = rest.strip_prefix('(') {
            let close = find_matching_paren(rest)?;
            let query = rest[..close].trim().to_string();
            (String::new(), None, Some(query), rest[close + 1..].trim_start())
        } else {
            let (table, rest) = take_identifier(rest)?;
            let (columns, rest) = if let Some(rest) = rest.trim_start().strip_prefix('(') {
                let close = find_matching_paren(rest)?;
                let cols = rest[..close]
                    .split(',')
                    .map(|c| c.trim().trim_matches('"').to_string())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>();
                (Some(cols), rest[close + 1..].trim_start())
            } else {
                (None, rest.trim_start())
            };
            (table, columns, None, rest)
        };

        let (direction, rest) = if let Some(rest) = strip_keyword(rest, "FROM") {
            (CopyDirection::FromStdin, strip_keyword(rest, "STDIN")?)
        } else if let Some(rest) = strip_keyword(rest, "TO") {
            (CopyDirection::ToStdout, strip_keyword(rest, "STDOUT")?)
        } else {
            return None;
        };

        if query.is_some() && direction == CopyDirection::FromStdin {
            return None;
        }

        let options = parse_with_clause(rest)?;
        Some(CopyCommand { table, columns, query, direction, options })
    }
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let s = s.trim_start();
    if s.len() >= keyword.len() && s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        let rest = &s[keyword.len()..];
        if rest.is_empty() || !rest.as_bytes()[0].is_ascii_alphanumeric() {
            return Some(rest);
        }
    }
    None
}

fn take_identifier(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return None;
    }
    if bytes[0] == b'"' {
        let close = s[1..].find('"')? + 1;
        return Some((s[1..close].to_string(), &s[close + 1..]));
    }
    let mut end = 0;
    while end < bytes.len() && (scan::is_ident_char(bytes[end]) || bytes[end] == b'.') {
        end += 1;
    }
    (end > 0).then(|| (s[..end].to_string(), &s[end..]))
}

/// Split WITH-clause items on commas outside quotes, so `DELIMITER ','`
/// stays one item.
fn split_options(inner: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in inner.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn find_matching_paren(after_open: &str) -> Option<usize> {
    let mut depth = 1i32;
    for (i, b) in after_open.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => { }
        }
    }
    None
}

/// Parse `WITH (FORMAT CSV, HEADER, DELIMITER ',')`, the legacy bare
/// `WITH CSV HEADER`, or nothing at all.
fn parse_with_clause(s: &str) -> Option<CsvOptions> {
    let s = s.trim();
    if s.is_empty() {
        return Some(CsvOptions::default());
    }
    let rest = strip_keyword(s, "WITH").unwrap_or(s);
    let rest = rest.trim();

    let mut opts = CsvOptions::default();
    if let Some(inner) = rest.strip_prefix('(') {
        let close = find_matching_paren(inner)?;
        if !inner[close + 1..].trim().is_empty() {
            return None;
        }
        for item in split_options(&inner[..close]) {
            let item = item.trim();
            let upper = item.to_ascii_uppercase();
            if upper.starts_with("FORMAT") {
                let format = upper["FORMAT".len()..].trim();
                if format != "CSV" && format != "TEXT" {
                    return None;
                }
            } else if upper == "HEADER" || upper == "HEADER TRUE" {
                opts.header = true;
            } else if upper == "HEADER FALSE" {
                opts.header = false;
            } else if upper.starts_with("DELIMITER") {
                let lit = item["DELIMITER".len()..].trim().trim_matches('\'');
                opts.delimiter = *lit.as_bytes().first()?;
            } else if !item.is_empty() {
                return None;
            }
        }
        return Some(opts);
    }

    // legacy: WITH CSV [HEADER] / bare CSV HEADER
    for word in rest.split_ascii_whitespace() {
        match word.to_ascii_uppercase().as_str() {
            "CSV" => { }
            "HEADER" => opts.header = true,
            _ => return None,
        }
    }
    Some(opts)
}

/// Accumulates COPY FROM rows and flushes them to the backend in batches.
pub struct CopyInState {
    decoder: csv::CsvDecoder,
    table: String,
    columns: Vec<String>,
    batch: Vec<Vec<String>>,
    batch_size: usize,
    total: u64,
}

impl CopyInState {
    pub fn new(
        command: &CopyCommand,
        columns: Vec<String>,
        batch_size: usize,
        max_line_len: usize,
    ) -> Self {
        Self {
            decoder: csv::CsvDecoder::new(command.options, max_line_len),
            table: command.table.clone(),
            columns,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            total: 0,
        }
    }

    /// Consume one CopyData frame, flushing any batches it completes.
    pub async fn feed(&mut self, handle: &mut Handle, data: &[u8]) -> Result<()> {
        self.decoder.push(data);
        while let Some(record) = self.decoder.next_record()? {
            let line = self.decoder.line() - 1;
            self.accept(record, line)?;
            if self.batch.len() >= self.batch_size {
                self.flush(handle).await?;
            }
        }
        Ok(())
    }

    /// Handle CopyDone: flush the trailing partial record and the last
    /// batch, returning the total row count.
    pub async fn finish(mut self, handle: &mut Handle) -> Result<u64> {
        if let Some(record) = self.decoder.finish()? {
            let line = self.decoder.line() - 1;
            self.accept(record, line)?;
        }
        if !self.batch.is_empty() {
            self.flush(handle).await?;
        }
        tracing::info!(table = %self.table, rows = self.total, "COPY FROM completed");
        Ok(self.total)
    }

    fn accept(&mut self, record: Vec<String>, line: u64) -> Result<()> {
        if !self.columns.is_empty() && record.len() != self.columns.len() {
            return Err(CsvError::new(
                format!(
                    "expected {} columns, found {}",
                    self.columns.len(),
                    record.len(),
                ),
                line,
            )
            .into());
        }
        self.batch.push(record);
        Ok(())
    }

    async fn flush(&mut self, handle: &mut Handle) -> Result<()> {
        let rows = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let inserted = handle.bulk_insert(&self.table, &self.columns, &rows).await?;
        self.total += inserted;
        Ok(())
    }
}

/// Drive a COPY TO result into CSV chunks.
pub struct CopyOutState {
    columns: Vec<String>,
    rows: RowStream,
    options: CsvOptions,
    chunk_size: usize,
    header_sent: bool,
    pub total: u64,
}

impl CopyOutState {
    pub fn new(
        columns: Vec<String>,
        rows: RowStream,
        options: CsvOptions,
        chunk_size: usize,
    ) -> Self {
        Self {
            columns,
            rows,
            options,
            chunk_size,
            header_sent: !options.header,
            total: 0,
        }
    }

    /// The next CSV chunk (≤ chunk_size unless one row exceeds it), or
    /// `None` when the stream is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.chunk_size.min(64 * 1024));

        if !self.header_sent {
            csv::encode_row(&mut out, &self.columns, self.options.delimiter);
            self.header_sent = true;
        }

        while out.len() < self.chunk_size {
            let Some(row) = self.rows.next().await? else { break };
            let fields: Vec<String> = row
                .iter()
                .map(|v| match v.encode_text() {
                    Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    None => String::new(),
                })
                .collect();
            csv::encode_row(&mut out, &fields, self.options.delimiter);
            self.total += 1;
        }

        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some(out))
    }
}

/// Render row values for COPY TO when the source is already `Value`s.
pub fn values_to_fields(row: &[Value]) -> Vec<String> {
    row.iter()
        .map(|v| match v.encode_text() {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => String::new(),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_copy_from_stdin() {
        let cmd = CopyCommand::parse("COPY Patients FROM STDIN WITH (FORMAT CSV, HEADER)").unwrap();
        assert_eq!(cmd.table, "Patients");
        assert_eq!(cmd.direction, CopyDirection::FromStdin);
        assert!(cmd.options.header);
        assert_eq!(cmd.options.delimiter, b',');
        assert!(cmd.columns.is_none());
    }

    #[test]
    fn parse_copy_with_columns() {
        let cmd = CopyCommand::parse(
            "COPY patients (id, first_name, last_name) FROM STDIN WITH (FORMAT CSV)",
        )
        .unwrap();
        assert_eq!(
            cmd.columns.unwrap(),
            vec!["id", "first_name", "last_name"],
        );
    }

    #[test]
    fn parse_copy_to_stdout() {
        let cmd = CopyCommand::parse("COPY patients TO STDOUT WITH (FORMAT CSV, HEADER)").unwrap();
        assert_eq!(cmd.direction, CopyDirection::ToStdout);
        assert!(cmd.query.is_none());
    }

    #[test]
    fn parse_copy_query_to_stdout() {
        let cmd = CopyCommand::parse(
            "COPY (SELECT id, name FROM patients WHERE active = 1) TO STDOUT WITH CSV",
        )
        .unwrap();
        assert_eq!(cmd.query.as_deref(), Some("SELECT id, name FROM patients WHERE active = 1"));
        assert_eq!(cmd.direction, CopyDirection::ToStdout);
    }

    #[test]
    fn parse_legacy_with_csv_header() {
        let cmd = CopyCommand::parse("COPY t FROM STDIN WITH CSV HEADER").unwrap();
        assert!(cmd.options.header);
    }

    #[test]
    fn parse_custom_delimiter() {
        let cmd = CopyCommand::parse("COPY t FROM STDIN WITH (FORMAT CSV, DELIMITER ';')").unwrap();
        assert_eq!(cmd.options.delimiter, b';');
    }

    #[test]
    fn parse_quoted_comma_delimiter() {
        let cmd = CopyCommand::parse("COPY t FROM STDIN WITH (FORMAT CSV, DELIMITER ',')").unwrap();
        assert_eq!(cmd.options.delimiter, b',');
    }

    #[test]
    fn parse_bare_copy() {
        let cmd = CopyCommand::parse("COPY t FROM STDIN").unwrap();
        assert!(!cmd.options.header);
    }

    #[test]
    fn non_copy_is_none() {
        assert!(CopyCommand::parse("SELECT 1").is_none());
        assert!(CopyCommand::parse("COPY t SOMEWHERE").is_none());
        // query sources cannot be a COPY FROM target
        assert!(CopyCommand::parse("COPY (SELECT 1) FROM STDIN").is_none());
    }

    #[tokio::test]
    async fn copy_out_chunks_with_header() {
        let rows = RowStream::from_rows(vec![
            vec![Value::Int4(1), Value::Text("John".into())],
            vec![Value::Int4(2), Value::Text("Jane".into())],
        ]);
        let mut out = CopyOutState::new(
            vec!["id".into(), "name".into()],
            rows,
            CsvOptions { header: true, delimiter: b',' },
            DEFAULT_CHUNK_SIZE,
        );
        let chunk = out.next_chunk().await.unwrap().unwrap();
        let text = String::from_utf8(chunk).unwrap();
        assert!(text.starts_with("id,name\n"));
        assert!(text.contains("1,John\n"));
        assert!(text.contains("2,Jane\n"));
        assert!(out.next_chunk().await.unwrap().is_none());
        assert_eq!(out.total, 2);
    }
}
