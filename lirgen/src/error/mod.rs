//! Error types and reporting

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, LowerError>;

/// Internal-consistency failures. Each one is a compiler defect, never
/// something the input program can trigger on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// `redefine` across types that are neither equal nor Int32/Boolean
    IncompatibleRedefinition,
    /// A must-reuse-input slot points at an operand not used at start
    ReuseInputNotAtStart,
    /// Deferred lowering re-entered a definition still being lowered
    ReentrantLowering,
    /// Single-register use of a value that owns several definitions
    AmbiguousUse,
    /// Use of an eager definition that was never bound
    UnboundDefinition,
    /// An operand or result type the selector has no lowering for
    UnexpectedType,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::IncompatibleRedefinition => "incompatible redefinition",
            Violation::ReuseInputNotAtStart => "reused input not used at start",
            Violation::ReentrantLowering => "re-entrant deferred lowering",
            Violation::AmbiguousUse => "ambiguous use of boxed value",
            Violation::UnboundDefinition => "use of unbound definition",
            Violation::UnexpectedType => "unexpected type",
        }
    }
}

/// Lowering error
#[derive(Debug, Error)]
pub enum LowerError {
    /// The virtual register ceiling was reached; the compilation is abandoned
    #[error("virtual register limit exhausted ({limit} registers)")]
    VregExhausted { limit: u32 },

    #[error("internal consistency violation ({}): {message}", violation.as_str())]
    Internal { violation: Violation, message: String },

    #[error("malformed MIR graph: {message}")]
    MalformedGraph { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LowerError {
    pub fn internal(violation: Violation, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(violation = violation.as_str(), "{message}");
        Self::Internal { violation, message }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedGraph {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The violation behind an internal error, if this is one
    pub fn violation(&self) -> Option<Violation> {
        match self {
            Self::Internal { violation, .. } => Some(*violation),
            _ => None,
        }
    }

    /// Only exhaustion may be recovered from, by falling back to an
    /// unoptimized execution path for the function.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::VregExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_exhaustion_is_recoverable() {
        assert!(LowerError::VregExhausted { limit: 4 }.is_recoverable());
        assert!(!LowerError::internal(Violation::AmbiguousUse, "x").is_recoverable());
        assert!(!LowerError::malformed("bad").is_recoverable());
    }

    #[test]
    fn test_internal_message() {
        let err = LowerError::internal(Violation::ReentrantLowering, "def 3");
        assert_eq!(err.violation(), Some(Violation::ReentrantLowering));
        assert_eq!(
            err.to_string(),
            "internal consistency violation (re-entrant deferred lowering): def 3"
        );
    }
}
