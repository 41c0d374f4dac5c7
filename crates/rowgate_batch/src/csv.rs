//! RFC 4180 CSV reading and writing.
//!
//! The reader is incremental: it pulls one record at a time from an async
//! buffered source, so an import never holds the whole file in memory.

use crate::error::CsvError;
use rowgate_core::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Default upper bound on a single record, in bytes.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1024 * 1024;

const BOM: char = '\u{feff}';

/// Quotes a field if it contains a separator, quote or line break.
pub fn quote_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        let escaped = field.replace('"', "\"\"");
        format!("\"{escaped}\"")
    } else {
        field.to_string()
    }
}

/// Formats fields as one CSV line, without a terminator.
pub fn format_record<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|f| quote_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Formats values as one CSV line; `Null` becomes an empty field.
pub fn format_values<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    format_record(values.into_iter().map(|v| v.to_string()))
}

/// Splits one complete record into fields.
fn parse_record(record: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = record.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_quotes = true;
        } else if ch == ',' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    fields
}

fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// One parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRecord {
    /// Line the record started on (1-based).
    pub line: usize,
    /// Field values, unquoted.
    pub fields: Vec<String>,
}

/// Incremental CSV reader over an async buffered source.
pub struct CsvReader<R> {
    reader: R,
    line: usize,
    max_record_len: usize,
}

impl<R: AsyncBufRead + Unpin> CsvReader<R> {
    /// Creates a reader with the default record size limit.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }

    /// Sets the record size limit.
    #[must_use]
    pub fn with_max_record_len(mut self, limit: usize) -> Self {
        self.max_record_len = limit;
        self
    }

    /// Reads the next record, skipping blank lines.
    ///
    /// Returns `Ok(None)` at end of input. A quoted field may span lines; its
    /// line breaks are kept as `\n`. No read pulls more than the remaining
    /// record budget from the source, even when a line has no terminator.
    pub async fn next_record(&mut self) -> Result<Option<CsvRecord>, CsvError> {
        loop {
            let start = self.line + 1;
            let mut record = String::new();
            let mut lines = 0usize;
            let mut quotes = 0usize;

            loop {
                let joined = record.len() + usize::from(lines > 0);
                let remaining = self.max_record_len.saturating_sub(joined);
                // Room for "\r\n", plus a BOM on the first line.
                let slack = if self.line == 0 { 2 + BOM.len_utf8() } else { 2 };
                let budget = remaining + slack;

                let mut bytes = Vec::new();
                let read = (&mut self.reader)
                    .take(budget as u64)
                    .read_until(b'\n', &mut bytes)
                    .await?;
                if read == 0 {
                    if lines == 0 {
                        return Ok(None);
                    }
                    return Err(CsvError::UnterminatedQuote { line: start });
                }
                if read == budget && !bytes.ends_with(b"\n") {
                    return Err(CsvError::RecordTooLarge {
                        line: start,
                        limit: self.max_record_len,
                    });
                }
                self.line += 1;

                let buf = String::from_utf8(bytes)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
                let mut text = trim_line_ending(&buf);
                if self.line == 1 {
                    text = text.strip_prefix(BOM).unwrap_or(text);
                }
                if lines > 0 {
                    record.push('\n');
                }
                record.push_str(text);
                lines += 1;
                quotes += text.matches('"').count();

                if record.len() > self.max_record_len {
                    return Err(CsvError::RecordTooLarge {
                        line: start,
                        limit: self.max_record_len,
                    });
                }
                if quotes % 2 == 0 {
                    break;
                }
            }

            if record.is_empty() {
                continue;
            }
            return Ok(Some(CsvRecord {
                line: start,
                fields: parse_record(&record),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(input: &str) -> Result<Vec<Vec<String>>, CsvError> {
        let mut reader = CsvReader::new(input.as_bytes());
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await? {
            records.push(record.fields);
        }
        Ok(records)
    }

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_field("plain"), "plain");
        assert_eq!(quote_field("a,b"), "\"a,b\"");
        assert_eq!(quote_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(quote_field("two\nlines"), "\"two\nlines\"");
        assert_eq!(format_record(["id", "name", "age"]), "id,name,age");
    }

    #[test]
    fn values_format_with_empty_null() {
        let values = [Value::Integer(1), Value::Null, Value::from("x,y"), Value::Bool(true)];
        assert_eq!(format_values(&values), "1,,\"x,y\",true");
    }

    #[tokio::test]
    async fn reads_simple_records() {
        let records = read_all("id,name\n1,John\n2,Jane\n").await.unwrap();
        assert_eq!(
            records,
            vec![strings(&["id", "name"]), strings(&["1", "John"]), strings(&["2", "Jane"])]
        );
    }

    #[tokio::test]
    async fn handles_bom_crlf_and_blank_lines() {
        let records = read_all("\u{feff}a,b\r\n\r\n1,2\r\n\n3,4").await.unwrap();
        assert_eq!(
            records,
            vec![strings(&["a", "b"]), strings(&["1", "2"]), strings(&["3", "4"])]
        );
    }

    #[tokio::test]
    async fn quoted_fields_span_lines() {
        let input = "note,n\n\"first line\nsecond, with comma\",1\n\"he said \"\"no\"\"\",2\n";
        let mut reader = CsvReader::new(input.as_bytes());
        reader.next_record().await.unwrap();
        let multi = reader.next_record().await.unwrap().unwrap();
        assert_eq!(multi.line, 2);
        assert_eq!(multi.fields, strings(&["first line\nsecond, with comma", "1"]));
        let escaped = reader.next_record().await.unwrap().unwrap();
        assert_eq!(escaped.line, 4);
        assert_eq!(escaped.fields, strings(&["he said \"no\"", "2"]));
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_fields_are_kept() {
        let records = read_all("a,b,c\n,,\n").await.unwrap();
        assert_eq!(records[1], strings(&["", "", ""]));
    }

    #[tokio::test]
    async fn unterminated_quote() {
        let err = read_all("a\n\"open\nstill open\n").await.unwrap_err();
        assert!(matches!(err, CsvError::UnterminatedQuote { line: 2 }));
    }

    #[tokio::test]
    async fn oversized_record() {
        let mut reader = CsvReader::new("a,b\n0123456789,x\n".as_bytes()).with_max_record_len(8);
        reader.next_record().await.unwrap();
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(err, CsvError::RecordTooLarge { line: 2, limit: 8 }));
    }

    #[tokio::test]
    async fn endless_line_is_bounded() {
        let source = tokio::io::BufReader::new(tokio::io::repeat(b'x'));
        let mut reader = CsvReader::new(source).with_max_record_len(64);
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(err, CsvError::RecordTooLarge { line: 1, limit: 64 }));
    }

    #[tokio::test]
    async fn records_at_the_limit_are_accepted() {
        let input = "\u{feff}abcdefg\r\nhijklmn\n\"ab\ncd\"\n";
        let mut reader = CsvReader::new(input.as_bytes()).with_max_record_len(7);
        assert_eq!(reader.next_record().await.unwrap().unwrap().fields, strings(&["abcdefg"]));
        assert_eq!(reader.next_record().await.unwrap().unwrap().fields, strings(&["hijklmn"]));
        let multi = reader.next_record().await.unwrap().unwrap();
        assert_eq!(multi.fields, strings(&["ab\ncd"]));
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_is_an_io_error() {
        let input: &[u8] = b"a\n\xff\xfe\n";
        let mut reader = CsvReader::new(input);
        reader.next_record().await.unwrap();
        assert!(matches!(reader.next_record().await, Err(CsvError::Io(_))));
    }

    #[tokio::test]
    async fn formatted_records_read_back() {
        let fields = strings(&["a,b", "quote \"q\"", "multi\nline", ""]);
        let line = format_record(&fields);
        let records = read_all(&line).await.unwrap();
        assert_eq!(records, vec![fields]);
    }
}
