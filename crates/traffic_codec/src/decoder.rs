//! Record decoding and the framed log reader.

use crate::error::{CodecError, CodecResult, FramingWarning};
use crate::record::LogRecord;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

/// Upper bound on the body buffer reserved up front.
/// Larger bodies still decode; the buffer just grows as bytes arrive.
const MAX_BODY_PREALLOC: usize = 1024 * 1024;

/// Decodes one header line into a record.
///
/// `line` may include its trailing newline. The record's `line_number` is
/// set to `line_number`, overriding any value stored in the JSON.
///
/// # Errors
///
/// Returns [`CodecError::MalformedHeader`] if the line is not a JSON object
/// with the required record fields.
pub fn decode_header(line: &[u8], line_number: u64) -> CodecResult<LogRecord> {
    let mut record: LogRecord = serde_json::from_slice(line)
        .map_err(|e| CodecError::malformed_header(line_number, e.to_string()))?;
    record.line_number = Some(line_number);
    Ok(record)
}

/// A record read from a log together with any framing problem found after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// The decoded record, body included.
    pub record: LogRecord,
    /// Set when the body was not followed by exactly one `\n`.
    pub warning: Option<FramingWarning>,
}

/// Streaming reader over a framed log.
///
/// Records are read one at a time, so memory use is bounded by the largest
/// single body rather than by the size of the log.
///
/// # Error Handling
///
/// - A header that fails to decode is returned as a recoverable
///   [`CodecError::MalformedHeader`]. Its body length is unknown, so no body
///   is read: the reader skips that line only. Until the next line that does
///   decode, further undecodable lines are treated as the broken record's
///   body and consumed without another error. A line that opens a JSON
///   object right after an empty line starts a new record, so if it fails
///   to decode it is reported as a separate error.
/// - A body cut short by end of file is returned as
///   [`CodecError::TruncatedBody`] and ends the stream.
/// - Terminator problems are attached to the record as a [`FramingWarning`].
/// - I/O errors are returned as-is and are not recoverable.
pub struct RecordReader<R> {
    inner: R,
    /// 1-based number of the next unread physical line.
    next_line: u64,
    /// Set after a malformed header until a line decodes again.
    recovering: bool,
    /// Lines skipped during the current recovery.
    skipped_lines: u64,
    /// Whether the last line skipped during recovery was empty.
    after_blank: bool,
    finished: bool,
    records_read: u64,
    line_buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> RecordReader<R> {
    /// Creates a reader positioned at the start of a log.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            next_line: 1,
            recovering: false,
            skipped_lines: 0,
            after_blank: false,
            finished: false,
            records_read: 0,
            line_buf: Vec::new(),
        }
    }

    /// Number of records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Number of physical lines consumed so far.
    pub fn lines_consumed(&self) -> u64 {
        self.next_line - 1
    }

    /// Returns true once end of file has been reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` at end of file. After a recoverable error the
    /// reader can be polled again.
    pub async fn next_record(&mut self) -> CodecResult<Option<DecodedRecord>> {
        let mut record = loop {
            if self.finished {
                return Ok(None);
            }

            self.line_buf.clear();
            let read = self.inner.read_until(b'\n', &mut self.line_buf).await?;
            if read == 0 {
                self.finish();
                return Ok(None);
            }

            let line_number = self.next_line;
            self.next_line += 1;

            match decode_header(&self.line_buf, line_number) {
                Ok(record) => {
                    if self.recovering {
                        debug!(
                            line_number,
                            skipped = self.skipped_lines,
                            "resynchronized on record header"
                        );
                    }
                    self.recovering = false;
                    self.skipped_lines = 0;
                    break record;
                }
                Err(err)
                    if self.recovering && !(self.after_blank && opens_object(&self.line_buf)) =>
                {
                    self.skipped_lines += 1;
                    self.after_blank = is_blank(&self.line_buf);
                    debug!(line_number, error = %err, "skipping undecodable line");
                }
                Err(err) => {
                    self.recovering = true;
                    self.skipped_lines = 0;
                    self.after_blank = false;
                    return Err(err);
                }
            }
        };

        let line_number = record.line();
        let expected = record.content_length;
        let mut body = Vec::with_capacity(expected.min(MAX_BODY_PREALLOC));
        (&mut self.inner)
            .take(expected as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() < expected {
            self.finished = true;
            return Err(CodecError::TruncatedBody {
                line_number,
                expected,
                found: body.len(),
            });
        }
        self.next_line += body.iter().filter(|&&b| b == b'\n').count() as u64;
        record.body = body.into();

        let warning = self.read_terminator(line_number).await?;
        self.records_read += 1;
        Ok(Some(DecodedRecord { record, warning }))
    }

    async fn read_terminator(&mut self, line_number: u64) -> CodecResult<Option<FramingWarning>> {
        self.line_buf.clear();
        let read = self.inner.read_until(b'\n', &mut self.line_buf).await?;
        if read == 0 {
            self.finish();
            return Ok(Some(FramingWarning::MissingTerminator { line_number }));
        }

        let terminated = self.line_buf.last() == Some(&b'\n');
        if terminated {
            self.next_line += 1;
        }
        let extra = self.line_buf.len() - usize::from(terminated);
        if extra == 0 {
            Ok(None)
        } else {
            Ok(Some(FramingWarning::TrailingData {
                line_number,
                bytes: extra,
            }))
        }
    }

    fn finish(&mut self) {
        if self.recovering && self.skipped_lines > 0 {
            debug!(
                skipped = self.skipped_lines,
                "reached end of file while resynchronizing"
            );
        }
        self.finished = true;
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn opens_object(line: &[u8]) -> bool {
    line.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_record;
    use crate::record::Protocol;

    fn frame(record: &LogRecord) -> Vec<u8> {
        encode_record(record).unwrap()
    }

    async fn read_all(bytes: &[u8]) -> Vec<CodecResult<Option<DecodedRecord>>> {
        let mut reader = RecordReader::new(bytes);
        let mut out = Vec::new();
        loop {
            let next = reader.next_record().await;
            let done = matches!(next, Ok(None));
            out.push(next);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn decode_header_assigns_line() {
        let line = br#"{"method":"GET","headers":{},"path":"/","protocol":"http","timestamp":1,"time_delta":0,"content_length":0,"line_number":99}"#;
        let record = decode_header(line, 4).unwrap();
        assert_eq!(record.method, "GET");
        assert_eq!(record.line_number, Some(4));
    }

    #[test]
    fn decode_header_rejects_missing_fields() {
        let err = decode_header(br#"{"method":"GET"}"#, 2).unwrap_err();
        assert!(matches!(err, CodecError::MalformedHeader { line_number: 2, .. }));
    }

    #[test]
    fn decode_header_ignores_unknown_fields() {
        let line = br#"{"method":"GET","headers":{},"path":"/","protocol":"https","timestamp":1,"time_delta":0,"content_length":0,"extra":true}"#;
        assert!(decode_header(line, 1).is_ok());
    }

    #[tokio::test]
    async fn reads_records_with_line_numbers() {
        let mut bytes = frame(&LogRecord::new("GET", "/a", Protocol::Http));
        bytes.extend(frame(
            &LogRecord::new("POST", "/b", Protocol::Http)
                .with_timing(10, 5)
                .with_body("line1\nline2"),
        ));
        bytes.extend(frame(&LogRecord::new("GET", "/c", Protocol::Http)));

        let mut reader = RecordReader::new(bytes.as_slice());
        let first = reader.next_record().await.unwrap().unwrap();
        assert_eq!(first.record.line_number, Some(1));
        assert_eq!(first.warning, None);

        let second = reader.next_record().await.unwrap().unwrap();
        assert_eq!(second.record.line_number, Some(3));
        assert_eq!(&second.record.body[..], b"line1\nline2");

        let third = reader.next_record().await.unwrap().unwrap();
        // header 3, body lines 4-5 (one embedded newline), terminator ends line 5
        assert_eq!(third.record.line_number, Some(6));
        assert!(reader.next_record().await.unwrap().is_none());
        assert_eq!(reader.records_read(), 3);
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn missing_empty_line_is_a_framing_warning() {
        // First record declares no body but the writer forgot the empty line.
        let mut bytes = encode_record(&LogRecord::new("GET", "/a", Protocol::Http)).unwrap();
        bytes.pop();
        bytes.extend(frame(&LogRecord::new("GET", "/b", Protocol::Http)));

        let mut reader = RecordReader::new(bytes.as_slice());
        let first = reader.next_record().await.unwrap().unwrap();
        match first.warning {
            Some(FramingWarning::TrailingData { line_number, bytes }) => {
                assert_eq!(line_number, 1);
                assert!(bytes > 0);
            }
            other => panic!("expected trailing data warning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trailing_bytes_after_body_are_reported() {
        let mut bytes = frame(&LogRecord::new("POST", "/a", Protocol::Http).with_body("{}"));
        // Replace the terminator with junk plus a terminator.
        bytes.pop();
        bytes.extend_from_slice(b"xyz\n");
        bytes.extend(frame(&LogRecord::new("GET", "/b", Protocol::Http)));

        let mut reader = RecordReader::new(bytes.as_slice());
        let first = reader.next_record().await.unwrap().unwrap();
        assert_eq!(&first.record.body[..], b"{}");
        assert_eq!(
            first.warning,
            Some(FramingWarning::TrailingData {
                line_number: 1,
                bytes: 3
            })
        );
        let second = reader.next_record().await.unwrap().unwrap();
        assert_eq!(second.record.path, "/b");
        assert_eq!(second.warning, None);
    }

    #[tokio::test]
    async fn missing_final_terminator_is_reported() {
        let mut bytes = frame(&LogRecord::new("POST", "/a", Protocol::Http).with_body("{}"));
        bytes.pop();
        let results = read_all(&bytes).await;
        let first = results[0].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(
            first.warning,
            Some(FramingWarning::MissingTerminator { line_number: 1 })
        );
        assert!(matches!(results[1], Ok(None)));
    }

    #[tokio::test]
    async fn malformed_header_reports_once_and_resynchronizes() {
        let mut bytes = Vec::new();
        for path in ["/1", "/2", "/3"] {
            bytes.extend(frame(&LogRecord::new("GET", path, Protocol::Http)));
        }
        bytes.extend_from_slice(b"{\"method\": \"GET\", oops\n\n");
        bytes.extend(frame(&LogRecord::new("GET", "/after", Protocol::Http)));

        let results = read_all(&bytes).await;
        let errors: Vec<&CodecError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line_number(), Some(7));
        assert!(errors[0].is_recoverable());

        let records: Vec<&DecodedRecord> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().and_then(|o| o.as_ref()))
            .collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].record.path, "/after");
        assert_eq!(records[3].record.line_number, Some(9));
    }

    #[tokio::test]
    async fn consecutive_malformed_records_are_each_reported() {
        let mut bytes = b"{bad one\n\n{bad two\n\n".to_vec();
        bytes.extend(frame(&LogRecord::new("GET", "/ok", Protocol::Http)));

        let results = read_all(&bytes).await;
        let lines: Vec<Option<u64>> = results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .map(CodecError::line_number)
            .collect();
        assert_eq!(lines, vec![Some(1), Some(3)]);

        let record = results[2].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(record.record.path, "/ok");
        assert_eq!(record.record.line_number, Some(5));
    }

    #[tokio::test]
    async fn body_of_malformed_record_is_not_reported() {
        // The broken record's JSON body sits right under its header.
        let mut bytes = b"{\"method\": oops\n{\"a\": 1}\n\n".to_vec();
        bytes.extend(frame(&LogRecord::new("GET", "/ok", Protocol::Http)));

        let results = read_all(&bytes).await;
        let errors = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(errors, 1);
        let record = results[1].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(record.record.line_number, Some(4));
    }

    #[tokio::test]
    async fn malformed_header_never_reads_a_body() {
        // The garbage line mentions a huge content_length; nothing may be consumed for it.
        let mut bytes = b"{\"content_length\": 100000\n".to_vec();
        bytes.extend(frame(&LogRecord::new("GET", "/next", Protocol::Http)));

        let mut reader = RecordReader::new(bytes.as_slice());
        assert!(reader.next_record().await.is_err());
        let next = reader.next_record().await.unwrap().unwrap();
        assert_eq!(next.record.path, "/next");
        assert_eq!(next.record.line_number, Some(2));
    }

    #[tokio::test]
    async fn truncated_body_ends_stream() {
        let mut bytes = frame(&LogRecord::new("POST", "/a", Protocol::Http).with_body("abcdef"));
        bytes.truncate(bytes.len() - 4);

        let mut reader = RecordReader::new(bytes.as_slice());
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::TruncatedBody {
                line_number: 1,
                expected: 6,
                found: 3
            }
        ));
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_input_is_end_of_stream() {
        let mut reader = RecordReader::new(&b""[..]);
        assert!(reader.next_record().await.unwrap().is_none());
        assert_eq!(reader.lines_consumed(), 0);
    }
}
