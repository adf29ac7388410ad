//! # Traffic Codec
//!
//! Reading and writing captured HTTP traffic logs.
//!
//! A log is a sequence of framed records:
//!
//! ```text
//! <json-header>\n
//! <raw body bytes, exactly content_length long>\n
//! ```
//!
//! The header line holds every [`LogRecord`] field except the body. The
//! terminating newline after the body is always present, so a record with
//! no body is followed by an empty line.
//!
//! ## Usage
//!
//! ```
//! use traffic_codec::{decode_header, encode_header, LogRecord, Protocol};
//!
//! let mut record = LogRecord::new("GET", "/health", Protocol::Http)
//!     .with_header("accept", "application/json");
//! record.line_number = Some(1);
//!
//! let line = encode_header(&record).unwrap();
//! let decoded = decode_header(line.as_bytes(), 1).unwrap();
//! assert_eq!(record, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod headers;
mod record;

pub use decoder::{decode_header, DecodedRecord, RecordReader};
pub use encoder::{encode_header, encode_record, RecordWriter};
pub use error::{CodecError, CodecResult, FramingWarning};
pub use headers::Headers;
pub use record::{LogRecord, Protocol};
