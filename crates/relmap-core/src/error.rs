//! Error types for session operations.

use std::fmt;

use crate::entity::EntityKey;

/// The primary error type for all session operations.
#[derive(Debug)]
pub enum Error {
    /// A different instance already occupies the key in a table's identity cache.
    IdentityConflict {
        /// Table whose cache rejected the instance.
        table: &'static str,
        /// The contested key.
        key: EntityKey,
    },
    /// A submit action value outside the known range.
    InvalidAction {
        /// The offending raw value.
        value: u8,
    },
    /// Pending items form a dependency cycle; commit order is undefined.
    CycleDetected {
        /// Tables of the items participating in the cycle, in discovery order.
        tables: Vec<&'static str>,
    },
    /// The session was configured with object tracking disabled.
    TrackingDisabled,
    /// Underlying store or executor failure.
    Provider(ProviderError),
    /// Row-to-entity conversion failure.
    Type(TypeError),
    /// Snapshot (de)serialization failure.
    Serde(String),
}

/// Failure reported by the underlying query provider.
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Create a provider error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Value conversion failure when reading a row.
#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Shorthand for a provider failure with a plain message.
    pub fn provider(message: impl Into<String>) -> Self {
        Error::Provider(ProviderError::new(message))
    }

    /// Whether this error left session state untouched.
    ///
    /// Identity conflicts and invalid actions are rejected before anything
    /// is tracked; cycle detection aborts before CRUD is issued.
    pub fn is_non_destructive(&self) -> bool {
        matches!(
            self,
            Error::IdentityConflict { .. }
                | Error::InvalidAction { .. }
                | Error::CycleDetected { .. }
                | Error::TrackingDisabled
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IdentityConflict { table, key } => {
                write!(
                    f,
                    "identity conflict in table '{}': a different instance already holds key {}",
                    table, key
                )
            }
            Error::InvalidAction { value } => {
                write!(f, "invalid submit action value {}", value)
            }
            Error::CycleDetected { tables } => {
                write!(f, "dependency cycle detected: {}", tables.join(" -> "))
            }
            Error::TrackingDisabled => write!(f, "object tracking is disabled for this session"),
            Error::Provider(e) => write!(f, "provider error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Serde(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Provider(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::Provider(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_covers_session_errors() {
        let conflict = Error::IdentityConflict {
            table: "customers",
            key: EntityKey::from_raw(7),
        };
        assert!(conflict.to_string().contains("customers"));
        assert!(conflict.is_non_destructive());

        let cycle = Error::CycleDetected {
            tables: vec!["orders", "customers"],
        };
        assert_eq!(
            cycle.to_string(),
            "dependency cycle detected: orders -> customers"
        );

        let action = Error::InvalidAction { value: 99 };
        assert!(action.to_string().contains("99"));
    }

    #[test]
    fn provider_error_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::Provider(ProviderError::with_source("execute failed", Box::new(io)));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_non_destructive());
    }
}
