use std::path::PathBuf;

/// Unified error type for the Serato binary-format stack.
///
/// Every variant carries enough context (offset, expected/actual bytes) to
/// diagnose a malformed file without a hex editor. Callers decide per file
/// class how to react: crate files are skipped and the sync continues, the
/// library index aborts its stage with the original bytes preserved, and
/// session files are skipped individually.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// A fixed tag or literal did not match the bytes on disk.
    #[error("expected {expected:?} at offset {offset}, found {actual:?}")]
    FormatMismatch {
        /// The tag or literal the codec required.
        expected: String,
        /// What was actually read (lossy ASCII rendering).
        actual: String,
        /// Byte offset of the mismatch.
        offset: usize,
    },

    /// The file ended in the middle of a field.
    ///
    /// Distinct from a clean end-of-file at a block boundary, which the
    /// codecs treat as the natural end of the record stream.
    #[error("truncated file: needed {needed} more bytes for {expected} at offset {offset}")]
    Truncated {
        /// What was being read when the data ran out.
        expected: &'static str,
        /// Byte offset where the read started.
        offset: usize,
        /// How many bytes were missing.
        needed: usize,
    },

    /// A UTF-16BE field was declared with an odd byte length.
    #[error("UTF-16BE field at offset {offset} has odd byte length {len}")]
    OddStringLength {
        /// Byte offset of the field payload.
        offset: usize,
        /// The declared (odd) length.
        len: usize,
    },

    /// A referenced file does not exist.
    #[error("file not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Wraps `std::io::Error` for file operations.
    #[error("I/O error: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the format crate.
pub type FormatResult<T> = Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FormatError>();
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FormatError = io_err.into();
        assert!(matches!(err, FormatError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn mismatch_message_names_both_sides() {
        let err = FormatError::FormatMismatch {
            expected: "vrsn".into(),
            actual: "xxxx".into(),
            offset: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("vrsn"));
        assert!(msg.contains("xxxx"));
    }

    #[test]
    fn truncated_message_has_offset_and_need() {
        let err = FormatError::Truncated {
            expected: "otrk length",
            offset: 42,
            needed: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains('3'));
        assert!(msg.contains("otrk length"));
    }
}
