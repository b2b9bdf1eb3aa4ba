//! Extension points run by the container between its two dependency passes.
//!
//! A component flagged as a processor is instantiated before the rest of the
//! graph. Its instance must expose one of the traits below as a view (see
//! [`Instance::with_view`](crate::Instance::with_view)):
//!
//! - [`RegistryProcessor`] rewrites the component definitions; the container
//!   then rebuilds and merges the build plans.
//! - [`BeanProcessor`] observes every bean around its init and destroy hooks.

use crate::error::DiResult;
use crate::metadata::ComponentDefinitionRegistry;
use crate::value::Value;

/// Rewrites component definitions before the second pass.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{BeanMetadata, ComponentDefinitionRegistry, DiResult, RegistryProcessor};
///
/// struct AddAudit;
///
/// impl RegistryProcessor for AddAudit {
///     fn process(&self, registry: &mut ComponentDefinitionRegistry) -> DiResult<()> {
///         if !registry.contains("audit") {
///             registry.register(BeanMetadata::new("audit", "Audit"))?;
///         }
///         Ok(())
///     }
/// }
///
/// let mut registry = ComponentDefinitionRegistry::new();
/// AddAudit.process(&mut registry).unwrap();
/// assert!(registry.contains("audit"));
/// ```
pub trait RegistryProcessor: Send + Sync {
    fn process(&self, registry: &mut ComponentDefinitionRegistry) -> DiResult<()>;
}

/// Hooks around bean initialisation and teardown.
///
/// Errors from the init hooks fail the creation of that bean; the destroy
/// hooks cannot fail.
pub trait BeanProcessor: Send + Sync {
    fn before_init(&self, _name: &str, _bean: &Value) -> DiResult<()> {
        Ok(())
    }

    fn after_init(&self, _name: &str, _bean: &Value) -> DiResult<()> {
        Ok(())
    }

    fn before_destroy(&self, _name: &str, _bean: &Value) {}

    fn after_destroy(&self, _name: &str) {}
}
