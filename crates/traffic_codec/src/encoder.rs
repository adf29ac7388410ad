//! Record encoding and the framed log writer.

use crate::error::{CodecError, CodecResult};
use crate::record::LogRecord;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encodes a record's header line (everything but the body).
///
/// The returned string has no trailing newline. `content_length` is written
/// exactly as stored on the record.
///
/// # Errors
///
/// Returns an error if the header cannot be serialized.
pub fn encode_header(record: &LogRecord) -> CodecResult<String> {
    serde_json::to_string(record).map_err(|e| CodecError::encoding(e.to_string()))
}

/// Encodes a complete framed record: header, newline, body, newline.
///
/// `content_length` is taken from the body so the frame is always
/// self-consistent.
///
/// # Errors
///
/// Returns an error if the header cannot be serialized.
pub fn encode_record(record: &LogRecord) -> CodecResult<Vec<u8>> {
    let header = if record.content_length == record.body.len() {
        encode_header(record)?
    } else {
        let mut fixed = record.clone();
        fixed.content_length = fixed.body.len();
        encode_header(&fixed)?
    };

    let mut frame = Vec::with_capacity(header.len() + record.body.len() + 2);
    frame.extend_from_slice(header.as_bytes());
    frame.push(b'\n');
    frame.extend_from_slice(&record.body);
    frame.push(b'\n');
    Ok(frame)
}

/// Appends framed records to an async sink.
///
/// This is the writing half used by capture hooks and test fixtures.
pub struct RecordWriter<W> {
    inner: W,
    records_written: u64,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    /// Creates a writer over the given sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            records_written: 0,
        }
    }

    /// Writes one framed record.
    pub async fn write_record(&mut self, record: &LogRecord) -> CodecResult<()> {
        let frame = encode_record(record)?;
        self.inner.write_all(&frame).await?;
        self.records_written += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flushes buffered output.
    pub async fn flush(&mut self) -> CodecResult<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and returns the underlying sink.
    pub async fn into_inner(mut self) -> CodecResult<W> {
        self.inner.flush().await?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Protocol;

    #[test]
    fn header_has_no_newline() {
        let record = LogRecord::new("GET", "/", Protocol::Http);
        let header = encode_header(&record).unwrap();
        assert!(!header.contains('\n'));
        assert!(header.starts_with('{'));
    }

    #[test]
    fn empty_body_still_gets_terminator() {
        let record = LogRecord::new("GET", "/a", Protocol::Http);
        let frame = encode_record(&record).unwrap();
        assert!(frame.ends_with(b"}\n\n"));
    }

    #[test]
    fn frame_length_is_corrected_from_body() {
        let mut record = LogRecord::new("POST", "/a", Protocol::Http).with_body("{}");
        record.content_length = 99;
        let frame = encode_record(&record).unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.contains("\"content_length\":2"));
        assert!(text.ends_with("\n{}\n"));
    }

    #[tokio::test]
    async fn writer_appends_frames() {
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .write_record(&LogRecord::new("GET", "/one", Protocol::Http))
            .await
            .unwrap();
        writer
            .write_record(&LogRecord::new("POST", "/two", Protocol::Https).with_body("x"))
            .await
            .unwrap();
        assert_eq!(writer.records_written(), 2);

        let bytes = writer.into_inner().await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches('\n').count(), 4);
        assert!(text.ends_with("\nx\n"));
    }
}
