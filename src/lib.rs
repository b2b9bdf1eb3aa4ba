//! # ferrous-blueprint
//!
//! Declarative dependency injection for a dynamic provider registry, in the
//! style of Aries Blueprint.
//!
//! ## Features
//!
//! - **Declarative components**: beans, references, reference lists and
//!   service publications described as metadata (serde JSON or code)
//! - **Lazy object graph**: build plans evaluated on first use, singletons
//!   cached, cycles reported with their path
//! - **Dynamic dependencies**: trackers follow a live provider registry;
//!   reference proxies wait for a provider up to a timeout
//! - **Conditional publication**: components are published only while the
//!   dependencies they need are satisfied
//! - **Two-pass lifecycle**: grace period, processors and type converters,
//!   eager activation, reverse-order teardown
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_blueprint::{
//!     Blueprint, ComponentMetadata, Container, Instance, LifecycleState, Pass, Properties,
//!     ProviderRegistry, ReferenceMetadata, ReferenceProxy, ServiceRegistry, ServiceSource, Value,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         "hello".to_string()
//!     }
//! }
//!
//! let registry: Arc<dyn ProviderRegistry> = Arc::new(ServiceRegistry::new());
//! let blueprint = Blueprint::new().with_component(ComponentMetadata::Reference(
//!     ReferenceMetadata::new("greeter", "Greeter").timeout_ms(1_000),
//! ));
//! let container = Container::builder()
//!     .name("app")
//!     .source(blueprint)
//!     .registry(registry.clone())
//!     .build()
//!     .unwrap();
//! container.start().unwrap();
//!
//! // no provider yet: the container waits
//! let waiting = LifecycleState::WaitingForDependencies(Pass::First);
//! assert!(container.wait_for_state(waiting, Duration::from_secs(5)));
//!
//! let english: Arc<dyn Greeter> = Arc::new(English);
//! registry
//!     .register(
//!         &["Greeter".to_string()],
//!         ServiceSource::Value(Value::Object(Instance::from_arc(english))),
//!         Properties::new(),
//!     )
//!     .unwrap();
//! container.await_active(Duration::from_secs(5)).unwrap();
//!
//! let greeter = container.get::<ReferenceProxy>("greeter").unwrap();
//! let text = greeter.call(|g: &Arc<dyn Greeter>| g.greet()).unwrap();
//! assert_eq!(text, "hello");
//! container.destroy();
//! ```
//!
//! ## Scopes
//!
//! - **Singleton**: created once per container and destroyed on teardown
//! - **Prototype**: created fresh on every request, never cached

pub mod backend;
pub mod config;
pub mod container;
pub mod convert;
pub mod error;
pub mod events;
pub mod filter;
pub mod lifecycle;
pub mod metadata;
pub mod namespace;
pub mod plan;
pub mod processor;
pub mod proxy;
pub mod publisher;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod scope;
pub mod tracker;
pub mod types;
pub mod value;

pub use backend::{Args, ClassDef, ClassRegistry, ConstructionBackend, Signature};
pub use config::{parse_duration, ContainerConfig};
pub use container::{Container, ContainerBuilder, WeakContainer};
pub use convert::{Converter, TypeConverter};
pub use error::{BoxError, DiError, DiResult};
pub use events::{ContainerEvent, ContainerListener, EventCollector, EventKind, LoggingListener};
pub use filter::Filter;
pub use lifecycle::{LifecycleState, Pass};
pub use metadata::{
    Activation, Availability, BeanArgument, BeanMetadata, BeanProperty, Blueprint, CollectionKind,
    ComponentDefinitionRegistry, ComponentMetadata, CustomMetadata, Damping, MapEntry, Metadata,
    MetadataSource, PublicationGate, PublicationScope, ReferenceListenerMetadata, ReferenceMetadata,
    RegistrationListenerMetadata, ServiceMetadata,
};
pub use namespace::{NamespaceHandler, NamespaceHandlerRegistry, NamespaceListener};
pub use plan::{BuildPlan, NameGenerator, PlanBuilder, PlanKind};
pub use processor::{BeanProcessor, RegistryProcessor};
pub use proxy::{Dynamic, ProviderList, ReferenceProxy};
pub use publisher::ConditionalPublisher;
pub use registry::{
    ConsumerId, ProviderRef, ProviderRegistry, ServiceEvent, ServiceFactory, ServiceListener,
    ServiceRegistration, ServiceRegistry, ServiceSource, SubscriptionId,
};
pub use repository::Repository;
pub use scheduler::{ScheduledTask, Scheduler, Task, TokioScheduler};
pub use scope::Scope;
pub use tracker::{
    Binding, BindingListener, Cardinality, DependencyTracker, SatisfactionListener, TrackerSettings,
};
pub use types::TypeSpec;
pub use value::{Convertible, FromValue, Instance, Properties, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_blueprint_activates() {
        let container = Container::builder()
            .name("empty")
            .publish_container(false)
            .build()
            .unwrap();
        container.start().unwrap();
        container.await_active(Duration::from_secs(5)).unwrap();
        assert_eq!(
            container.component_ids(),
            vec!["container".to_string(), "converter".to_string(), "registry".to_string()]
        );
        assert!(container.start().is_err());
        container.destroy();
        assert_eq!(container.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn builtin_container_component_points_back() {
        let container = Container::builder().name("self").build().unwrap();
        container.start().unwrap();
        container.await_active(Duration::from_secs(5)).unwrap();
        let weak = container.get::<WeakContainer>("container").unwrap();
        assert_eq!(weak.upgrade().unwrap().name(), "self");
        container.destroy();
    }
}
