//! Declarative component metadata.
//!
//! Metadata describes *what* to build, never how: beans with constructor
//! arguments and properties, references to external providers, publications
//! of components into the provider registry, and custom elements handled by
//! namespace handlers. Everything here is plain data and (de)serializes with
//! serde.

mod registry;
mod source;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scope::Scope;
use crate::types::TypeSpec;

pub use registry::ComponentDefinitionRegistry;
pub use source::{Blueprint, MetadataSource};

/// Default wait for a mandatory dynamic reference, in milliseconds.
pub const DEFAULT_REFERENCE_TIMEOUT_MS: u64 = 300_000;

/// When a top-level component is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activation {
    /// During activation, before the container reports active
    #[default]
    Eager,
    /// On first request
    Lazy,
}

/// Whether a dependency blocks activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    #[default]
    Mandatory,
    Optional,
}

/// Rebinding policy of a unary reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Damping {
    /// Keep the current provider while it remains registered
    #[default]
    Reluctant,
    /// Always follow the best provider
    Greedy,
}

/// How many values a publication hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublicationScope {
    /// One lazily created value shared by every consumer
    #[default]
    Singleton,
    /// One value per consumer, destroyed when that consumer releases it
    Consumer,
}

/// Condition under which a publication is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublicationGate {
    /// Every gating dependency is satisfied
    #[default]
    AllSatisfied,
    /// Every gating dependency has at least one provider, optional or not
    AllBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionKind {
    #[default]
    List,
    Set,
    Array,
}

/// A value position inside a component definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metadata {
    #[default]
    Null,
    /// Literal text, converted to `type` when given
    Value {
        text: String,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        value_type: Option<TypeSpec>,
    },
    /// The instance of another component
    Ref(String),
    /// The name of another component, checked to exist
    IdRef(String),
    Bean(Box<BeanMetadata>),
    Reference(Box<ReferenceMetadata>),
    ReferenceList(Box<ReferenceMetadata>),
    Service(Box<ServiceMetadata>),
    Collection {
        #[serde(default)]
        kind: CollectionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_type: Option<TypeSpec>,
        #[serde(default)]
        items: Vec<Metadata>,
    },
    Map {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_type: Option<TypeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_type: Option<TypeSpec>,
        #[serde(default)]
        entries: Vec<MapEntry>,
    },
    Props(BTreeMap<String, String>),
}

impl Metadata {
    pub fn value(text: impl Into<String>) -> Self {
        Metadata::Value {
            text: text.into(),
            value_type: None,
        }
    }

    pub fn typed_value(text: impl Into<String>, value_type: TypeSpec) -> Self {
        Metadata::Value {
            text: text.into(),
            value_type: Some(value_type),
        }
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Metadata::Ref(id.into())
    }

    pub fn list(items: impl IntoIterator<Item = Metadata>) -> Self {
        Metadata::Collection {
            kind: CollectionKind::List,
            value_type: None,
            items: items.into_iter().collect(),
        }
    }

    pub fn collection(
        kind: CollectionKind,
        value_type: Option<TypeSpec>,
        items: impl IntoIterator<Item = Metadata>,
    ) -> Self {
        Metadata::Collection {
            kind,
            value_type,
            items: items.into_iter().collect(),
        }
    }

    pub fn map(entries: impl IntoIterator<Item = (Metadata, Metadata)>) -> Self {
        Metadata::Map {
            key_type: None,
            value_type: None,
            entries: entries
                .into_iter()
                .map(|(key, value)| MapEntry { key, value })
                .collect(),
        }
    }

    pub fn props<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Metadata::Props(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn bean(bean: BeanMetadata) -> Self {
        Metadata::Bean(Box::new(bean))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub key: Metadata,
    pub value: Metadata,
}

/// Constructor or factory argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeanArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<TypeSpec>,
    pub value: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeanProperty {
    pub name: String,
    pub value: Metadata,
}

/// A component built by the construction backend.
///
/// Exactly one instantiation strategy applies: a constructor of `class`, a
/// static `factory_method` on `class`, or an instance `factory_method` on
/// the `factory_component`.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{BeanMetadata, Metadata, Scope};
///
/// let bean = BeanMetadata::new("greeter", "Greeter")
///     .arg(Metadata::value("hello"))
///     .property("target", Metadata::reference("world"))
///     .scope(Scope::Prototype)
///     .init_method("start");
/// assert_eq!(bean.arguments.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeanMetadata {
    pub id: Option<String>,
    pub class: Option<String>,
    pub factory_component: Option<String>,
    pub factory_method: Option<String>,
    pub arguments: Vec<BeanArgument>,
    pub properties: Vec<BeanProperty>,
    pub scope: Scope,
    pub activation: Activation,
    pub init_method: Option<String>,
    pub destroy_method: Option<String>,
    pub depends_on: Vec<String>,
    /// Instantiated between the two dependency passes
    pub processor: bool,
}

impl BeanMetadata {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Self {
        BeanMetadata {
            id: Some(id.into()),
            class: Some(class.into()),
            ..Default::default()
        }
    }

    /// An inline bean without an id.
    pub fn anonymous(class: impl Into<String>) -> Self {
        BeanMetadata {
            class: Some(class.into()),
            ..Default::default()
        }
    }

    pub fn arg(mut self, value: Metadata) -> Self {
        self.arguments.push(BeanArgument {
            index: None,
            value_type: None,
            value,
        });
        self
    }

    pub fn indexed_arg(mut self, index: usize, value: Metadata) -> Self {
        self.arguments.push(BeanArgument {
            index: Some(index),
            value_type: None,
            value,
        });
        self
    }

    pub fn typed_arg(mut self, value_type: TypeSpec, value: Metadata) -> Self {
        self.arguments.push(BeanArgument {
            index: None,
            value_type: Some(value_type),
            value,
        });
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: Metadata) -> Self {
        self.properties.push(BeanProperty {
            name: name.into(),
            value,
        });
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.activation = Activation::Lazy;
        self
    }

    pub fn init_method(mut self, method: impl Into<String>) -> Self {
        self.init_method = Some(method.into());
        self
    }

    pub fn destroy_method(mut self, method: impl Into<String>) -> Self {
        self.destroy_method = Some(method.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Static factory method on `class`.
    pub fn factory_method(mut self, method: impl Into<String>) -> Self {
        self.factory_method = Some(method.into());
        self
    }

    /// Instance factory method on another component.
    pub fn factory(mut self, component: impl Into<String>, method: impl Into<String>) -> Self {
        self.class = None;
        self.factory_component = Some(component.into());
        self.factory_method = Some(method.into());
        self
    }

    pub fn processor(mut self) -> Self {
        self.processor = true;
        self
    }
}

/// Reference listener: bind/unbind callbacks on another component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceListenerMetadata {
    pub component: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbind_method: Option<String>,
}

/// A dependency on providers from the provider registry.
///
/// The same shape describes unary references and reference lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceMetadata {
    pub id: Option<String>,
    pub interface: Option<String>,
    pub component_name: Option<String>,
    /// Extra LDAP-style filter
    pub filter: Option<String>,
    pub availability: Availability,
    /// Wait for a mandatory provider, in milliseconds
    pub timeout_ms: u64,
    pub damping: Damping,
    pub listeners: Vec<ReferenceListenerMetadata>,
    /// Component returned when an optional reference has no provider
    pub default_component: Option<String>,
    pub activation: Activation,
    pub depends_on: Vec<String>,
}

impl Default for ReferenceMetadata {
    fn default() -> Self {
        ReferenceMetadata {
            id: None,
            interface: None,
            component_name: None,
            filter: None,
            availability: Availability::Mandatory,
            timeout_ms: DEFAULT_REFERENCE_TIMEOUT_MS,
            damping: Damping::Reluctant,
            listeners: Vec::new(),
            default_component: None,
            activation: Activation::Eager,
            depends_on: Vec::new(),
        }
    }
}

impl ReferenceMetadata {
    pub fn new(id: impl Into<String>, interface: impl Into<String>) -> Self {
        ReferenceMetadata {
            id: Some(id.into()),
            interface: Some(interface.into()),
            ..Default::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.availability = Availability::Optional;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn component_name(mut self, name: impl Into<String>) -> Self {
        self.component_name = Some(name.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn greedy(mut self) -> Self {
        self.damping = Damping::Greedy;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.activation = Activation::Lazy;
        self
    }

    pub fn default_component(mut self, id: impl Into<String>) -> Self {
        self.default_component = Some(id.into());
        self
    }

    pub fn listener(
        mut self,
        component: Metadata,
        bind_method: Option<&str>,
        unbind_method: Option<&str>,
    ) -> Self {
        self.listeners.push(ReferenceListenerMetadata {
            component,
            bind_method: bind_method.map(str::to_string),
            unbind_method: unbind_method.map(str::to_string),
        });
        self
    }

    pub fn is_optional(&self) -> bool {
        self.availability == Availability::Optional
    }
}

/// Registration listener: register/unregister callbacks on another component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationListenerMetadata {
    pub component: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unregister_method: Option<String>,
}

/// Publication of a component into the provider registry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceMetadata {
    pub id: Option<String>,
    /// The published component, a `ref` or an inline bean
    pub component: Metadata,
    pub interfaces: Vec<String>,
    pub ranking: i32,
    pub properties: BTreeMap<String, Metadata>,
    pub scope: PublicationScope,
    pub gate: PublicationGate,
    pub listeners: Vec<RegistrationListenerMetadata>,
    pub activation: Activation,
    pub depends_on: Vec<String>,
}

impl ServiceMetadata {
    pub fn new(id: impl Into<String>, component: Metadata) -> Self {
        ServiceMetadata {
            id: Some(id.into()),
            component,
            ..Default::default()
        }
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn ranking(mut self, ranking: i32) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: Metadata) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn scope(mut self, scope: PublicationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn gate(mut self, gate: PublicationGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn listener(
        mut self,
        component: Metadata,
        register_method: Option<&str>,
        unregister_method: Option<&str>,
    ) -> Self {
        self.listeners.push(RegistrationListenerMetadata {
            component,
            register_method: register_method.map(str::to_string),
            unregister_method: unregister_method.map(str::to_string),
        });
        self
    }
}

/// An element owned by a namespace handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetadata {
    #[serde(default)]
    pub id: Option<String>,
    pub namespace: String,
    pub element: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl CustomMetadata {
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        element: impl Into<String>,
    ) -> Self {
        CustomMetadata {
            id: Some(id.into()),
            namespace: namespace.into(),
            element: element.into(),
            attributes: BTreeMap::new(),
            content: serde_json::Value::Null,
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A top-level component definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentMetadata {
    Bean(BeanMetadata),
    Reference(ReferenceMetadata),
    ReferenceList(ReferenceMetadata),
    Service(ServiceMetadata),
    Custom(CustomMetadata),
}

impl ComponentMetadata {
    pub fn id(&self) -> Option<&str> {
        match self {
            ComponentMetadata::Bean(b) => b.id.as_deref(),
            ComponentMetadata::Reference(r) | ComponentMetadata::ReferenceList(r) => {
                r.id.as_deref()
            }
            ComponentMetadata::Service(s) => s.id.as_deref(),
            ComponentMetadata::Custom(c) => c.id.as_deref(),
        }
    }

    pub fn activation(&self) -> Activation {
        match self {
            ComponentMetadata::Bean(b) => b.activation,
            ComponentMetadata::Reference(r) | ComponentMetadata::ReferenceList(r) => r.activation,
            ComponentMetadata::Service(s) => s.activation,
            ComponentMetadata::Custom(_) => Activation::Eager,
        }
    }

    pub fn depends_on(&self) -> &[String] {
        match self {
            ComponentMetadata::Bean(b) => &b.depends_on,
            ComponentMetadata::Reference(r) | ComponentMetadata::ReferenceList(r) => &r.depends_on,
            ComponentMetadata::Service(s) => &s.depends_on,
            ComponentMetadata::Custom(_) => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ComponentMetadata::Bean(_) => "bean",
            ComponentMetadata::Reference(_) => "reference",
            ComponentMetadata::ReferenceList(_) => "reference-list",
            ComponentMetadata::Service(_) => "service",
            ComponentMetadata::Custom(_) => "custom",
        }
    }

    pub fn as_bean(&self) -> Option<&BeanMetadata> {
        match self {
            ComponentMetadata::Bean(b) => Some(b),
            _ => None,
        }
    }
}

impl From<BeanMetadata> for ComponentMetadata {
    fn from(value: BeanMetadata) -> Self {
        ComponentMetadata::Bean(value)
    }
}

impl From<ServiceMetadata> for ComponentMetadata {
    fn from(value: ServiceMetadata) -> Self {
        ComponentMetadata::Service(value)
    }
}

impl From<CustomMetadata> for ComponentMetadata {
    fn from(value: CustomMetadata) -> Self {
        ComponentMetadata::Custom(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_defaults() {
        let reference: ReferenceMetadata = serde_json::from_str(r#"{"id": "db"}"#).unwrap();
        assert_eq!(reference.timeout_ms, DEFAULT_REFERENCE_TIMEOUT_MS);
        assert_eq!(reference.availability, Availability::Mandatory);
        assert_eq!(reference.damping, Damping::Reluctant);
    }

    #[test]
    fn component_metadata_json_shape() {
        let json = r#"{
            "bean": {
                "id": "greeter",
                "class": "Greeter",
                "arguments": [{"value": {"value": {"text": "42", "type": "i32"}}}],
                "properties": [{"name": "peer", "value": {"ref": "other"}}],
                "scope": "prototype"
            }
        }"#;
        let component: ComponentMetadata = serde_json::from_str(json).unwrap();
        let bean = component.as_bean().unwrap();
        assert_eq!(component.id(), Some("greeter"));
        assert_eq!(bean.scope, Scope::Prototype);
        assert_eq!(
            bean.arguments[0].value,
            Metadata::typed_value("42", TypeSpec::I32)
        );
        assert_eq!(bean.properties[0].value, Metadata::reference("other"));
    }
}
