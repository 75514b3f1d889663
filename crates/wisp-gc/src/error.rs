//! Error types for wisp-gc
//!
//! Constructors and index operations report failures to the caller as
//! [`GcError`]. The collector phases have no error path: an inconsistency
//! found while marking or sweeping is a bug and panics.

use thiserror::Error;

use crate::value::Value;

/// Broad classification of a [`GcError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed argument: bad length, wrong type, improper list
    InvalidArgument,
    /// Index outside the container
    OutOfRange,
}

/// Errors signaled by weak-object operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GcError {
    /// Malformed argument
    #[error("{subr}: {message}")]
    InvalidArgument {
        /// Name of the failing operation
        subr: &'static str,
        /// Human-readable description
        message: String,
        /// Offending values
        args: Vec<Value>,
    },

    /// Index out of range
    #[error("{subr}: Argument out of range: {value:?}")]
    OutOfRange {
        /// Name of the failing operation
        subr: &'static str,
        /// The offending index
        value: Value,
    },
}

impl GcError {
    /// Create an invalid-argument error
    pub fn invalid_argument(
        subr: &'static str,
        message: impl Into<String>,
        args: impl Into<Vec<Value>>,
    ) -> Self {
        Self::InvalidArgument {
            subr,
            message: message.into(),
            args: args.into(),
        }
    }

    /// Create an invalid-argument error for an argument of the wrong type
    pub fn wrong_type_arg(subr: &'static str, position: usize, value: Value) -> Self {
        Self::invalid_argument(
            subr,
            format!("Wrong type argument in position {position}"),
            [value],
        )
    }

    /// Create an out-of-range error
    pub fn out_of_range(subr: &'static str, value: Value) -> Self {
        Self::OutOfRange { subr, value }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GcError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            GcError::OutOfRange { .. } => ErrorKind::OutOfRange,
        }
    }

    /// Name of the operation that failed
    pub fn subr(&self) -> &'static str {
        match self {
            GcError::InvalidArgument { subr, .. } | GcError::OutOfRange { subr, .. } => subr,
        }
    }

    /// Values the error was raised about
    pub fn args(&self) -> Vec<Value> {
        match self {
            GcError::InvalidArgument { args, .. } => args.clone(),
            GcError::OutOfRange { value, .. } => vec![*value],
        }
    }
}

/// Result type alias for weak-object operations
pub type GcResult<T> = Result<T, GcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GcError::out_of_range("vector-ref", Value::Int(9));
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert_eq!(err.subr(), "vector-ref");
        assert_eq!(err.to_string(), "vector-ref: Argument out of range: Int(9)");

        let err = GcError::wrong_type_arg("weak-car", 1, Value::Int(3));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "weak-car: Wrong type argument in position 1");
        assert_eq!(err.args(), vec![Value::Int(3)]);
    }
}
