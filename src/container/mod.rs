//! The blueprint container.
//!
//! A [`Container`] takes component definitions from a
//! [`MetadataSource`](crate::MetadataSource), waits for the namespace
//! handlers and mandatory dependencies it needs, runs processors, creates
//! its eager components and publishes its services. It keeps reacting to
//! providers appearing and disappearing until it is destroyed.

mod builder;
mod controller;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::ContainerConfig;
use crate::convert::Converter;
use crate::error::{DiError, DiResult};
use crate::events::ContainerListener;
use crate::lifecycle::LifecycleState;
use crate::metadata::ComponentMetadata;
use crate::registry::ProviderRegistry;
use crate::value::Value;

pub use builder::ContainerBuilder;
pub use controller::{CONTAINER_INTERFACE, CONTAINER_NAME, CONTAINER_VERSION, DEFAULT_COMPONENTS};

use controller::ContainerInner;

/// A running set of components built from declarative metadata.
///
/// Starting a container is asynchronous: [`Container::start`] queues the
/// lifecycle on the container's scheduler and returns. Use
/// [`Container::wait_for_state`], [`Container::await_active`] or an
/// [`EventCollector`](crate::EventCollector) to follow its progress.
///
/// The handle is cheap to clone; every clone refers to the same container.
///
/// # Examples
///
/// ```
/// use ferrous_blueprint::{Args, BeanMetadata, Blueprint, ClassDef, ClassRegistry, Container, Instance};
/// use std::time::Duration;
///
/// struct Clock { zone: String }
///
/// let classes = ClassRegistry::new().with_class(
///     ClassDef::new("Clock").constructor(
///         [ferrous_blueprint::TypeSpec::String],
///         |args: &Args| Ok(Instance::new(Clock { zone: args.get::<String>(0)? })),
///     ),
/// );
/// let blueprint = Blueprint::new().with_component(
///     BeanMetadata::new("clock", "Clock").arg(ferrous_blueprint::Metadata::value("UTC")),
/// );
///
/// let container = Container::builder()
///     .name("clocks")
///     .source(blueprint)
///     .backend(classes)
///     .build()
///     .unwrap();
/// container.start().unwrap();
/// container.await_active(Duration::from_secs(5)).unwrap();
///
/// let clock = container.get::<Clock>("clock").unwrap();
/// assert_eq!(clock.zone, "UTC");
/// container.destroy();
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// The provider registry this container consumes from and publishes to.
    pub fn registry(&self) -> &Arc<dyn ProviderRegistry> {
        &self.inner.registry
    }

    /// Queues the lifecycle; fails unless the container was never started.
    pub fn start(&self) -> DiResult<()> {
        self.inner.start()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// Waits until the container reaches `state`.
    ///
    /// Returns false on timeout, or as soon as the container fails or is
    /// destroyed without reaching `state`.
    pub fn wait_for_state(&self, state: LifecycleState, timeout: Duration) -> bool {
        self.inner.wait_for_state(state, timeout)
    }

    /// Waits for activation, returning the failure cause if the container
    /// failed instead.
    pub fn await_active(&self, timeout: Duration) -> DiResult<()> {
        if self.inner.wait_for_state(LifecycleState::Active, timeout) {
            return Ok(());
        }
        if let Some(cause) = self.inner.failure() {
            return Err(cause);
        }
        Err(DiError::IllegalState(format!(
            "container '{}' is {} after waiting {}",
            self.name(),
            self.state(),
            humantime::format_duration(timeout)
        )))
    }

    /// Why the container failed, if it did.
    pub fn failure(&self) -> Option<DiError> {
        self.inner.failure()
    }

    /// Creates (or returns the cached) component `name`.
    ///
    /// Available once the graph is built; a failed request does not affect
    /// the container or components created earlier.
    pub fn create(&self, name: &str) -> DiResult<Value> {
        self.inner.require_repository()?.create(name)
    }

    /// Creates several components in one request.
    pub fn create_all(&self, names: &[String]) -> DiResult<std::collections::HashMap<String, Value>> {
        self.inner.require_repository()?.create_all(names)
    }

    /// Creates component `name` and downcasts it.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> DiResult<Arc<T>> {
        let value = self.create(name)?;
        value.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            found: value.kind().to_string(),
        })
    }

    /// Names of every top-level component, built-in ones included.
    pub fn component_ids(&self) -> Vec<String> {
        self.inner.component_ids()
    }

    pub fn component_metadata(&self, id: &str) -> Option<ComponentMetadata> {
        self.inner.component_metadata(id)
    }

    /// Filters of mandatory dependencies without a provider.
    pub fn missing_dependencies(&self) -> Vec<String> {
        self.inner.missing_dependencies()
    }

    /// The converter of the current graph.
    pub fn converter(&self) -> Option<Arc<Converter>> {
        self.inner.repository().map(|repository| repository.converter().clone())
    }

    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.inner.events.add(listener);
    }

    /// Withdraws publications, destroys created components newest first and
    /// stops tracking. Calling it again does nothing.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn downgrade(&self) -> WeakContainer {
        self.inner.weak()
    }

    #[cfg(feature = "diagnostics")]
    pub fn to_debug_string(&self) -> String {
        self.inner.debug_string()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning container handle.
///
/// This is what the built-in `container` component and the container's own
/// publication hand out, so components can look things up without keeping
/// the container alive.
#[derive(Clone)]
pub struct WeakContainer {
    inner: Weak<ContainerInner>,
}

impl WeakContainer {
    pub fn upgrade(&self) -> Option<Container> {
        self.inner.upgrade().map(|inner| Container { inner })
    }
}

impl fmt::Debug for WeakContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.upgrade() {
            Some(inner) => write!(f, "WeakContainer({})", inner.name()),
            None => f.write_str("WeakContainer(<dropped>)"),
        }
    }
}
