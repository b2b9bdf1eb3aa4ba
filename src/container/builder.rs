use std::sync::Arc;
use std::time::Duration;

use crate::backend::{ClassRegistry, ConstructionBackend};
use crate::config::ContainerConfig;
use crate::error::DiResult;
use crate::events::ContainerListener;
use crate::metadata::{Blueprint, MetadataSource};
use crate::namespace::NamespaceHandlerRegistry;
use crate::registry::{ProviderRegistry, ServiceRegistry};
use crate::scheduler::{Scheduler, TokioScheduler};

use super::controller::{ContainerInner, Parts};
use super::Container;

/// Assembles a [`Container`] from its collaborators.
///
/// Anything not supplied gets a private default: an empty blueprint, an
/// empty [`ClassRegistry`], a fresh [`ServiceRegistry`], an empty handler
/// registry and the process-wide [`TokioScheduler`]. Containers that should
/// see each other's publications must share one provider registry.
///
/// # Examples
///
/// ```
/// use ferrous_blueprint::{Container, ContainerConfig, ServiceRegistry, ProviderRegistry};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let registry: Arc<dyn ProviderRegistry> = Arc::new(ServiceRegistry::new());
/// let container = Container::builder()
///     .config(ContainerConfig::new("empty").with_timeout(Duration::from_secs(1)))
///     .registry(registry.clone())
///     .build()
///     .unwrap();
/// assert_eq!(container.name(), "empty");
/// assert!(Arc::ptr_eq(container.registry(), &registry));
/// ```
#[derive(Default)]
pub struct ContainerBuilder {
    config: ContainerConfig,
    source: Option<Box<dyn MetadataSource>>,
    handlers: Option<Arc<NamespaceHandlerRegistry>>,
    registry: Option<Arc<dyn ProviderRegistry>>,
    backend: Option<Arc<dyn ConstructionBackend>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    listeners: Vec<Arc<dyn ContainerListener>>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn grace_period(mut self, grace_period: bool) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    pub fn publish_container(mut self, publish: bool) -> Self {
        self.config.publish_container = publish;
        self
    }

    pub fn source(mut self, source: impl MetadataSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn handlers(mut self, handlers: Arc<NamespaceHandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn backend(mut self, backend: impl ConstructionBackend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Shares one backend between several containers.
    pub fn shared_backend(mut self, backend: Arc<dyn ConstructionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ContainerListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Builds the container without starting it.
    ///
    /// Fails only when no scheduler was given and the shared runtime cannot
    /// be started.
    pub fn build(self) -> DiResult<Container> {
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::shared()?),
        };
        let inner = ContainerInner::new(Parts {
            config: self.config,
            source: self.source.unwrap_or_else(|| Box::new(Blueprint::new())),
            handlers: self.handlers.unwrap_or_default(),
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ServiceRegistry::new())),
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(ClassRegistry::new())),
            scheduler,
        });
        for listener in self.listeners {
            inner.events.add(listener);
        }
        Ok(Container { inner })
    }
}
