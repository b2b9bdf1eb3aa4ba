//! Error types for the blueprint container.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by user code plugged into the container
/// (construction backends, converters, processors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Blueprint container errors
///
/// Every failure surfaced by the container, the repository, the value converter
/// and the dynamic reference proxies is one of these variants. The enum is `Clone`
/// so the same cause can be attached to a failure event and returned to callers.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::DiError;
///
/// let circular = DiError::Circular(vec!["a".into(), "b".into(), "a".into()]);
/// assert_eq!(circular.to_string(), "Circular dependency: a -> b -> a");
///
/// let missing = DiError::NoSuchComponent("db".into());
/// assert!(missing.to_string().contains("db"));
/// ```
#[derive(Debug, Clone, Error)]
pub enum DiError {
    /// Metadata is malformed or cannot be mapped onto a construction strategy
    #[error("Component definition error: {0}")]
    ComponentDefinition(String),
    /// No build plan and no instance under the requested name
    #[error("No component with id '{0}' could be found")]
    NoSuchComponent(String),
    /// Circular dependency detected (includes the cycle path)
    #[error("Circular dependency: {}", .0.join(" -> "))]
    Circular(Vec<String>),
    /// A constructor, factory, property setter or init hook failed
    #[error("Unable to create component '{name}': {source}")]
    Construction {
        name: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },
    /// The value converter could not produce the requested target type
    #[error("Unable to convert value {value} to type {target}{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Conversion {
        value: String,
        target: String,
        reason: Option<String>,
    },
    /// A dynamic reference could not be resolved to a live provider
    #[error("{reason}: {filter}")]
    ServiceUnavailable { filter: String, reason: String },
    /// A ref/idref names a component that is not declared
    #[error("Unresolved ref/idref to component: {0}")]
    UnresolvedReference(String),
    /// Mandatory dependencies did not become available in time
    #[error("Timeout waiting for mandatory dependencies: [{}]", .0.join(", "))]
    StartupTimeout(Vec<String>),
    /// Provider filter text could not be parsed
    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    /// A produced value does not have the requested Rust type
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    /// Operation not allowed in the current lifecycle state
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl DiError {
    /// Wraps a user-code failure into a construction error for `name`.
    pub fn construction(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        let source: BoxError = source.into();
        DiError::Construction {
            name: name.into(),
            source: Arc::from(source),
        }
    }

    /// Shorthand for a conversion failure.
    pub fn conversion(
        value: impl std::fmt::Debug,
        target: impl std::fmt::Display,
        reason: Option<String>,
    ) -> Self {
        DiError::Conversion {
            value: format!("{value:?}"),
            target: target.to_string(),
            reason,
        }
    }

    /// Shorthand for a definition error.
    pub fn definition(message: impl Into<String>) -> Self {
        DiError::ComponentDefinition(message.into())
    }
}

/// Result type for blueprint operations
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{DiError, DiResult};
///
/// fn lookup(name: &str) -> DiResult<u32> {
///     Err(DiError::NoSuchComponent(name.to_string()))
/// }
///
/// assert!(lookup("x").is_err());
/// ```
pub type DiResult<T> = Result<T, DiError>;
