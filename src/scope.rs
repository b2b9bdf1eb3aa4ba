//! Component scope definitions.

use serde::{Deserialize, Serialize};

/// Component scopes controlling instance caching behavior
///
/// Defines whether the repository caches the value a build plan produces.
///
/// # Scope Characteristics
///
/// - **Singleton**: Created once on first request, cached, destroyed on teardown
/// - **Prototype**: Created fresh on every request, never cached, never destroyed
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::Scope;
///
/// let scope: Scope = serde_json::from_str("\"prototype\"").unwrap();
/// assert_eq!(scope, Scope::Prototype);
/// assert!(Scope::default().is_singleton());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Single instance per repository, cached until teardown
    ///
    /// The value is created on first request, passed through the value
    /// converter and stored. Subsequent requests return the cached value.
    /// Singletons take part in the creation order and receive their
    /// destroy hook in reverse creation order.
    #[default]
    Singleton,
    /// New instance per request, never cached
    ///
    /// Non-shared components are rebuilt every time they are requested and
    /// are never tracked for teardown.
    Prototype,
}

impl Scope {
    /// Returns true for [`Scope::Singleton`].
    pub fn is_singleton(self) -> bool {
        matches!(self, Scope::Singleton)
    }
}
