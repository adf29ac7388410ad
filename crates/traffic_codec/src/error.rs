//! Error types for the codec crate.

use std::io;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding log records.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A header line could not be parsed into a record.
    #[error("malformed header on line {line_number}: {message}")]
    MalformedHeader {
        /// 1-based line of the offending header.
        line_number: u64,
        /// Description of the parse failure.
        message: String,
    },

    /// The file ended before `content_length` body bytes were read.
    #[error("truncated body for record on line {line_number}: expected {expected} bytes, found {found}")]
    TruncatedBody {
        /// Line of the record's header.
        line_number: u64,
        /// Declared content length.
        expected: usize,
        /// Bytes actually available.
        found: usize,
    },

    /// A record could not be serialized.
    #[error("encoding failed: {message}")]
    Encoding {
        /// Description of the encoding error.
        message: String,
    },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Create a malformed header error.
    pub fn malformed_header(line_number: u64, message: impl Into<String>) -> Self {
        Self::MalformedHeader {
            line_number,
            message: message.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Returns true if this error only affects one record and reading can
    /// continue with the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodecError::MalformedHeader { .. } | CodecError::TruncatedBody { .. }
        )
    }

    /// Line number the error refers to, if any.
    pub fn line_number(&self) -> Option<u64> {
        match self {
            CodecError::MalformedHeader { line_number, .. }
            | CodecError::TruncatedBody { line_number, .. } => Some(*line_number),
            _ => None,
        }
    }
}

/// A non-fatal framing problem found after a record body.
///
/// The record itself decoded fine and is still delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingWarning {
    /// Bytes other than the `\n` terminator followed the body.
    TrailingData {
        /// Line of the record's header.
        line_number: u64,
        /// Number of unexpected bytes before the next newline.
        bytes: usize,
    },
    /// The file ended right after the body without a terminator.
    MissingTerminator {
        /// Line of the record's header.
        line_number: u64,
    },
}

impl FramingWarning {
    /// Line of the record the warning belongs to.
    pub fn line_number(&self) -> u64 {
        match self {
            FramingWarning::TrailingData { line_number, .. }
            | FramingWarning::MissingTerminator { line_number } => *line_number,
        }
    }
}

impl std::fmt::Display for FramingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingWarning::TrailingData { line_number, bytes } => write!(
                f,
                "{bytes} unexpected bytes after body of record on line {line_number}"
            ),
            FramingWarning::MissingTerminator { line_number } => write!(
                f,
                "missing terminator after body of record on line {line_number}"
            ),
        }
    }
}
