use std::collections::HashMap;

use crate::error::{DiError, DiResult};

use super::ComponentMetadata;

/// Ordered store of top-level component definitions.
///
/// Registration order is preserved; eager components are instantiated in
/// this order. Registry processors may add, replace or remove definitions
/// between the two dependency passes.
#[derive(Debug, Clone, Default)]
pub struct ComponentDefinitionRegistry {
    order: Vec<String>,
    components: HashMap<String, ComponentMetadata>,
    type_converters: Vec<String>,
}

impl ComponentDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition; top-level components need a unique id.
    pub fn register(&mut self, component: impl Into<ComponentMetadata>) -> DiResult<()> {
        let component = component.into();
        let id = component
            .id()
            .ok_or_else(|| {
                DiError::definition(format!("top-level {} has no id", component.kind()))
            })?
            .to_string();
        if self.components.contains_key(&id) {
            return Err(DiError::definition(format!(
                "duplicate component id '{id}'"
            )));
        }
        self.order.push(id.clone());
        self.components.insert(id, component);
        Ok(())
    }

    /// Replaces an existing definition in place, or appends a new one.
    pub fn replace(&mut self, component: impl Into<ComponentMetadata>) -> DiResult<()> {
        let component = component.into();
        let Some(id) = component.id().map(str::to_string) else {
            return Err(DiError::definition("replacement component has no id"));
        };
        if !self.components.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.components.insert(id, component);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<ComponentMetadata> {
        let removed = self.components.remove(id)?;
        self.order.retain(|n| n != id);
        self.type_converters.retain(|n| n != id);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&ComponentMetadata> {
        self.components.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.components.contains_key(id)
    }

    /// Component ids in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentMetadata)> {
        self.order
            .iter()
            .filter_map(|id| self.components.get(id).map(|c| (id.as_str(), c)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Marks a registered component as a type converter.
    pub fn register_type_converter(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.type_converters.contains(&id) {
            self.type_converters.push(id);
        }
    }

    pub fn type_converters(&self) -> &[String] {
        &self.type_converters
    }

    pub fn reset(&mut self) {
        self.order.clear();
        self.components.clear();
        self.type_converters.clear();
    }
}
