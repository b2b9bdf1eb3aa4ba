use serde::{Deserialize, Serialize};

use crate::error::{DiError, DiResult};
use crate::namespace::NamespaceHandlerRegistry;

use super::{ComponentDefinitionRegistry, ComponentMetadata};

/// Supplies the component definitions of one container.
pub trait MetadataSource: Send + Sync {
    /// Namespaces whose handlers must exist before the graph can be built.
    fn namespaces(&self) -> Vec<String>;

    /// Registers every definition, resolving custom elements through `handlers`.
    fn populate(
        &self,
        handlers: &NamespaceHandlerRegistry,
        registry: &mut ComponentDefinitionRegistry,
    ) -> DiResult<()>;
}

/// A serde-described set of component definitions.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{Blueprint, MetadataSource};
///
/// let blueprint = Blueprint::from_json(r#"{
///     "components": [
///         {"bean": {"id": "clock", "class": "Clock"}}
///     ]
/// }"#).unwrap();
/// assert_eq!(blueprint.components.len(), 1);
/// assert!(blueprint.namespaces().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blueprint {
    pub components: Vec<ComponentMetadata>,
    pub type_converters: Vec<String>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> DiResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| DiError::definition(format!("invalid blueprint: {e}")))
    }

    pub fn with_component(mut self, component: impl Into<ComponentMetadata>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Adds a component and marks it as a type converter.
    pub fn with_type_converter(mut self, component: impl Into<ComponentMetadata>) -> Self {
        let component = component.into();
        if let Some(id) = component.id() {
            self.type_converters.push(id.to_string());
        }
        self.components.push(component);
        self
    }
}

impl MetadataSource for Blueprint {
    fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = Vec::new();
        for component in &self.components {
            if let ComponentMetadata::Custom(custom) = component {
                if !namespaces.contains(&custom.namespace) {
                    namespaces.push(custom.namespace.clone());
                }
            }
        }
        namespaces
    }

    fn populate(
        &self,
        handlers: &NamespaceHandlerRegistry,
        registry: &mut ComponentDefinitionRegistry,
    ) -> DiResult<()> {
        for component in &self.components {
            match component {
                ComponentMetadata::Custom(custom) => {
                    let handler = handlers.handler(&custom.namespace).ok_or_else(|| {
                        DiError::IllegalState(format!(
                            "no handler for namespace '{}'",
                            custom.namespace
                        ))
                    })?;
                    let parsed = handler.parse(custom, registry)?;
                    if let ComponentMetadata::Custom(_) = parsed {
                        return Err(DiError::definition(format!(
                            "handler for '{}' returned another custom element",
                            custom.namespace
                        )));
                    }
                    registry.register(parsed)?;
                }
                other => registry.register(other.clone())?,
            }
        }
        for id in &self.type_converters {
            if !registry.contains(id) {
                return Err(DiError::definition(format!(
                    "type converter '{id}' is not a declared component"
                )));
            }
            registry.register_type_converter(id.clone());
        }
        Ok(())
    }
}
