//! Error types for the EmbSan instrumentation engine

use crate::ir::MemoryOrdering;
use thiserror::Error;

/// EmbSan errors
///
/// Unsupported access sizes, unsupported read-modify-write kinds and excluded
/// addresses are not errors: they are soft skips recorded in
/// [`InstrumentStats`](crate::instrument::InstrumentStats).
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Instrumentation defects
    /// Memory ordering the probe ABI cannot encode
    ///
    /// **Triggered by:** an atomic operation using `consume` ordering
    /// **Prevention:** front ends should strengthen `consume` to `acquire`
    #[error("Unsupported memory ordering {ordering:?} in func @{function}")]
    UnsupportedOrdering {
        /// Function containing the atomic operation
        function: String,
        /// Offending ordering
        ordering: MemoryOrdering,
    },

    /// Function is both race-checked and suppressed at runtime
    ///
    /// **Triggered by:** `FunctionAttrs { race_checked: true, suppressed: true }`
    #[error("Func @{function} is marked both race-checked and suppressed")]
    ConflictingAttributes {
        /// Function name
        function: String,
    },

    /// A probe symbol was requested that was never declared in the module
    #[error("Missing probe declaration: {name}")]
    MissingProbe {
        /// Probe symbol name
        name: String,
    },

    /// Structurally invalid IR encountered while instrumenting
    ///
    /// **Triggered by:** dangling instruction ids, blocks without terminators,
    /// out-of-range parameter indices
    #[error("Malformed IR in func @{function}: {message}")]
    MalformedIr {
        /// Function name
        function: String,
        /// Description of the problem
        message: String,
    },

    // Configuration errors
    /// Options could not be parsed or are inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Reference executor errors
    /// The reference executor could not evaluate an instruction
    #[error("Execution error: {0}")]
    Execution(String),

    /// Control reached an `unreachable` terminator
    #[error("Reached unreachable code in func @{function}")]
    Unreachable {
        /// Function name
        function: String,
    },

    /// An exception escaped the outermost executed frame
    #[error("Unhandled unwind out of func @{function}")]
    UnhandledUnwind {
        /// Function that resumed unwinding
        function: String,
    },

    /// Call to a function that is neither defined nor known to the executor
    #[error("Undefined function: {name}")]
    UndefinedFunction {
        /// Callee name
        name: String,
    },
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Instrumenting would produce wrong code; the function is left untouched
    Defect,
    /// Bad input to the engine (options, module)
    Input,
    /// Failure while executing IR in the reference executor
    Runtime,
}

impl Error {
    /// Create a malformed-IR error
    pub fn malformed(function: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::MalformedIr {
            function: function.into(),
            message: msg.into(),
        }
    }

    /// Create an execution error with a message
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::Execution(msg.into())
    }

    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::UnsupportedOrdering { .. } => ErrorSeverity::Defect,
            Error::ConflictingAttributes { .. } => ErrorSeverity::Defect,
            Error::MissingProbe { .. } => ErrorSeverity::Defect,
            Error::MalformedIr { .. } => ErrorSeverity::Defect,

            Error::Config(_) => ErrorSeverity::Input,

            Error::Execution(_)
            | Error::Unreachable { .. }
            | Error::UnhandledUnwind { .. }
            | Error::UndefinedFunction { .. } => ErrorSeverity::Runtime,
        }
    }

    /// True for errors that abort instrumentation of a function
    pub fn is_defect(&self) -> bool {
        self.classify() == ErrorSeverity::Defect
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for EmbSan operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defect_classification() {
        let err = Error::UnsupportedOrdering {
            function: "f".into(),
            ordering: MemoryOrdering::Consume,
        };
        assert!(err.is_defect());
        assert_eq!(
            err.to_string(),
            "Unsupported memory ordering Consume in func @f"
        );

        assert!(!Error::config("bad").is_defect());
        assert_eq!(
            Error::execution("boom").classify(),
            ErrorSeverity::Runtime
        );
    }

    #[test]
    fn test_json_error_becomes_config_error() {
        let err: Error = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert_eq!(err.classify(), ErrorSeverity::Input);
    }
}
