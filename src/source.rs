//! Record sources: lazy, cancellable sequences of decoded records.
//!
//! A source is any iterator of `Result<Record, SourceError>`. The bundled
//! [`JsonLinesSource`] reads one JSON object per line and stops yielding as
//! soon as its [`CancelToken`] is cancelled.

use crate::model::Record;
use std::fmt;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared cancellation flag.
///
/// Cloning shares the flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Errors produced while reading records.
#[derive(Debug)]
pub enum SourceError {
    /// One input line could not be decoded. Reading continues.
    Decode { line: usize, message: String },
    /// The underlying reader failed. The source ends after yielding this.
    Io(io::Error),
}

impl SourceError {
    /// Whether the source keeps producing after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Decode { .. })
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Decode { line, message } => {
                write!(f, "undecodable record on line {}: {}", line, message)
            }
            SourceError::Io(e) => write!(f, "failed to read records: {}", e),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Decode { .. } => None,
            SourceError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for SourceError {
    fn from(e: io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// Anything that can feed the aggregation pool.
pub trait RecordSource: Iterator<Item = Result<Record, SourceError>> + Send {}

impl<T> RecordSource for T where T: Iterator<Item = Result<Record, SourceError>> + Send {}

/// Newline-delimited JSON records. Blank lines are skipped.
pub struct JsonLinesSource<R> {
    reader: R,
    cancel: CancelToken,
    buf: Vec<u8>,
    line: usize,
    finished: bool,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R, cancel: CancelToken) -> Self {
        Self {
            reader,
            cancel,
            buf: Vec::with_capacity(512),
            line: 0,
            finished: false,
        }
    }

    /// Number of input lines consumed so far.
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<Record, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                debug!(line = self.line, "record source cancelled");
                self.finished = true;
                return None;
            }

            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {
                    self.line += 1;
                    let trimmed = self.buf.trim_ascii();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_slice::<Record>(trimmed).map_err(|e| {
                        SourceError::Decode {
                            line: self.line,
                            message: e.to_string(),
                        }
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(SourceError::Io(e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};

    fn source(input: &str) -> JsonLinesSource<Cursor<Vec<u8>>> {
        JsonLinesSource::new(Cursor::new(input.as_bytes().to_vec()), CancelToken::new())
    }

    #[test]
    fn test_reads_records_and_skips_blank_lines() {
        let input = concat!(
            r#"{"id":"1","type":"event","name":"login","user_id":"u1","timestamp":10}"#,
            "\n\n   \n",
            r#"{"id":"2","type":"attributes","user_id":"u1","data":{"plan":"pro"},"timestamp":5}"#,
        );
        let records: Vec<Record> = source(input).map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "login");
        assert_eq!(records[1].data["plan"], "pro");
    }

    #[test]
    fn test_bad_line_is_recoverable() {
        let input = "{not json}\nnull\n{\"id\":\"3\",\"type\":\"event\",\"user_id\":\"u\"}\n";
        let items: Vec<_> = source(input).collect();

        assert_eq!(items.len(), 3);
        match &items[0] {
            Err(err @ SourceError::Decode { line: 1, .. }) => assert!(err.is_recoverable()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(items[1], Err(SourceError::Decode { line: 2, .. })));
        assert_eq!(items[2].as_ref().unwrap().id, "3");
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let mut bytes = b"{\"id\":\"".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\"}\n");
        let mut src = JsonLinesSource::new(Cursor::new(bytes), CancelToken::new());
        assert!(matches!(src.next(), Some(Err(SourceError::Decode { .. }))));
        assert!(src.next().is_none());
    }

    #[test]
    fn test_cancelled_source_stops_yielding() {
        let cancel = CancelToken::new();
        let input = "{\"id\":\"1\",\"type\":\"event\",\"user_id\":\"u\"}\n".repeat(10);
        let mut src = JsonLinesSource::new(Cursor::new(input.into_bytes()), cancel.clone());

        assert!(src.next().is_some());
        cancel.cancel();
        assert!(src.next().is_none());
        assert!(src.next().is_none());
        assert_eq!(src.lines_read(), 1);
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn test_read_failure_ends_the_source() {
        let mut src = JsonLinesSource::new(BufReader::new(FailingReader), CancelToken::new());
        match src.next() {
            Some(Err(err)) => assert!(!err.is_recoverable()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(src.next().is_none());
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
