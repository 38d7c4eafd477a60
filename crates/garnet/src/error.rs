//! Error types for the embedding bridge

use crate::exception::ExceptionError;
use crate::parser::ParserError;
use garnet_vm::MrbVType;
use std::num::ParseIntError;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The guest raised an exception
    #[error(transparent)]
    Exception(#[from] ExceptionError),

    /// Value has a different guest type than the requested host type
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        /// Requested host type
        expected: &'static str,
        /// Guest type tag of the value
        found: MrbVType,
    },

    /// Guest integer does not fit the requested host integer
    #[error("integer {0} out of range")]
    IntegerOutOfRange(i64),

    /// Decoding into a host shape failed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Source did not parse
    #[error(transparent)]
    Parse(#[from] ParserError),

    /// `call_block` needs at least the block argument
    #[error("args must be non-empty and have a proc at the end")]
    EmptyBlockArgs,

    /// Code generation was requested before a successful parse
    #[error("no parsed code to generate")]
    NoCode,
}

impl Error {
    /// The guest exception carried by this error, if any.
    pub fn exception(&self) -> Option<&ExceptionError> {
        match self {
            Error::Exception(e) => Some(e),
            Error::Decode(DecodeError::Exception { source, .. }) => Some(source),
            _ => None,
        }
    }
}

/// Decode failures. Every variant carries the path of the field being
/// decoded: `root`, then `.field`, `[i]` for array elements and
/// `.<entry i>` for map entries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    /// No conversion from the guest value to the destination shape
    #[error("unknown type: name={path} type={found}")]
    UnknownType { path: String, found: String },

    /// Map destinations must be keyed by strings
    #[error("non-string keys: name={path}")]
    NonStringKeys { path: String },

    /// A guest string did not parse as an integer
    #[error("failed to decode int: name={path}: {source}")]
    ParseInt {
        path: String,
        #[source]
        source: ParseIntError,
    },

    /// A guest integer does not fit the destination integer
    #[error("integer out of range: name={path} value={value}")]
    IntOutOfRange { path: String, value: i64 },

    /// The value nests deeper than the decoder follows
    #[error("maximum decode depth exceeded: name={path}")]
    MaxDepthExceeded { path: String },

    /// Reading a field ran guest code that raised
    #[error("exception while decoding: name={path}: {source}")]
    Exception {
        path: String,
        #[source]
        source: ExceptionError,
    },
}

impl DecodeError {
    /// Path of the field that failed.
    pub fn path(&self) -> &str {
        match self {
            DecodeError::UnknownType { path, .. }
            | DecodeError::NonStringKeys { path }
            | DecodeError::ParseInt { path, .. }
            | DecodeError::IntOutOfRange { path, .. }
            | DecodeError::MaxDepthExceeded { path }
            | DecodeError::Exception { path, .. } => path,
        }
    }

    pub(crate) fn unknown(path: &str, found: impl ToString) -> Self {
        DecodeError::UnknownType {
            path: path.to_string(),
            found: found.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_path() {
        let err = DecodeError::unknown("root.foo[1]", MrbVType::Nil);
        assert_eq!(err.path(), "root.foo[1]");
        assert_eq!(err.to_string(), "unknown type: name=root.foo[1] type=Nil");
    }

    #[test]
    fn test_parse_int_keeps_source() {
        let source = "abc".parse::<i64>().unwrap_err();
        let err = DecodeError::ParseInt {
            path: "root".to_string(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(Error::from(err).exception().is_none());
    }
}
