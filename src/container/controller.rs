//! The lifecycle controller behind a [`Container`](super::Container).
//!
//! Triggers (start, handler changes, tracker flips, the startup timeout)
//! are queued and drained by one scheduler task at a time; each trigger is
//! handled under the run lock, so the state loop never runs concurrently
//! with itself.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::backend::ConstructionBackend;
use crate::convert::{Converter, TypeConverter};
use crate::error::{DiError, DiResult};
use crate::events::{ContainerEvent, EventDispatcher, EventKind};
use crate::lifecycle::{dispatch, Action, LifecycleState, Pass, Trigger};
use crate::metadata::{Activation, ComponentDefinitionRegistry, ComponentMetadata, MetadataSource};
use crate::namespace::{NamespaceHandlerRegistry, NamespaceListener};
use crate::plan::{BuildPlan, NameGenerator, PlanBuilder};
use crate::processor::{BeanProcessor, RegistryProcessor};
use crate::publisher::ConditionalPublisher;
use crate::registry::{ConsumerId, ProviderRegistry, ServiceRegistration, ServiceSource};
use crate::repository::Repository;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::scope::Scope;
use crate::tracker::{DependencyTracker, SatisfactionListener};
use crate::value::{Instance, Properties, Value};
use crate::config::ContainerConfig;

use super::WeakContainer;

/// Interface under which an active container publishes itself.
pub const CONTAINER_INTERFACE: &str = "BlueprintContainer";
/// Property carrying the published container's name.
pub const CONTAINER_NAME: &str = "container.name";
/// Property carrying the published container's version.
pub const CONTAINER_VERSION: &str = "container.version";

/// Names every container resolves without declaring them.
pub const DEFAULT_COMPONENTS: [&str; 3] = ["container", "converter", "registry"];

#[derive(Default)]
struct Graph {
    definitions: ComponentDefinitionRegistry,
    repository: Option<Arc<Repository>>,
    trackers: Vec<Arc<DependencyTracker>>,
    publishers: Vec<Arc<ConditionalPublisher>>,
    names: NameGenerator,
}

#[derive(Default)]
struct TriggerQueue {
    pending: VecDeque<Trigger>,
    running: bool,
}

pub(crate) struct ContainerInner {
    pub(crate) config: ContainerConfig,
    me: Weak<ContainerInner>,
    source: Box<dyn MetadataSource>,
    handlers: Arc<NamespaceHandlerRegistry>,
    pub(crate) registry: Arc<dyn ProviderRegistry>,
    backend: Arc<dyn ConstructionBackend>,
    scheduler: Arc<dyn Scheduler>,
    pub(crate) events: EventDispatcher,
    consumer: ConsumerId,
    state: Mutex<LifecycleState>,
    state_changed: Condvar,
    queue: Mutex<TriggerQueue>,
    run_lock: ReentrantMutex<()>,
    graph: RwLock<Graph>,
    timeout: Mutex<Option<ScheduledTask>>,
    registration: Mutex<Option<ServiceRegistration>>,
    last_missing: Mutex<Option<Vec<String>>>,
    failure: Mutex<Option<DiError>>,
    destroyed: AtomicBool,
}

pub(crate) struct Parts {
    pub(crate) config: ContainerConfig,
    pub(crate) source: Box<dyn MetadataSource>,
    pub(crate) handlers: Arc<NamespaceHandlerRegistry>,
    pub(crate) registry: Arc<dyn ProviderRegistry>,
    pub(crate) backend: Arc<dyn ConstructionBackend>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
}

impl ContainerInner {
    pub(crate) fn new(parts: Parts) -> Arc<Self> {
        Arc::new_cyclic(|me| ContainerInner {
            config: parts.config,
            me: me.clone(),
            source: parts.source,
            handlers: parts.handlers,
            registry: parts.registry,
            backend: parts.backend,
            scheduler: parts.scheduler,
            events: EventDispatcher::default(),
            consumer: ConsumerId::next(),
            state: Mutex::new(LifecycleState::Unparsed),
            state_changed: Condvar::new(),
            queue: Mutex::new(TriggerQueue::default()),
            run_lock: ReentrantMutex::new(()),
            graph: RwLock::new(Graph::default()),
            timeout: Mutex::new(None),
            registration: Mutex::new(None),
            last_missing: Mutex::new(None),
            failure: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn weak(&self) -> WeakContainer {
        WeakContainer {
            inner: self.me.clone(),
        }
    }

    // ----- state -----

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(container = %self.config.name, from = %*state, to = %next, "lifecycle transition");
            *state = next;
            self.state_changed.notify_all();
        }
    }

    /// Blocks until the container is in `target`, giving up at the deadline
    /// or once the target can no longer be reached.
    pub(crate) fn wait_for_state(&self, target: LifecycleState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if *state == target {
                return true;
            }
            if *state == LifecycleState::Destroyed
                || (*state == LifecycleState::Failed && target != LifecycleState::Destroyed)
            {
                return false;
            }
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                return *state == target;
            }
        }
    }

    pub(crate) fn failure(&self) -> Option<DiError> {
        self.failure.lock().clone()
    }

    fn emit(&self, event: ContainerEvent) {
        self.events.dispatch(event);
    }

    fn event(&self, kind: EventKind) -> ContainerEvent {
        ContainerEvent::new(kind, self.config.name.clone())
    }

    // ----- trigger queue -----

    pub(crate) fn start(&self) -> DiResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(DiError::IllegalState(format!(
                "container '{}' has been destroyed",
                self.config.name
            )));
        }
        let state = self.state();
        if state != LifecycleState::Unparsed {
            return Err(DiError::IllegalState(format!(
                "container '{}' is already started (state {state})",
                self.config.name
            )));
        }
        let listener: Weak<dyn NamespaceListener> = self.me.clone();
        self.handlers.add_listener(listener);
        self.submit(Trigger::Start);
        Ok(())
    }

    fn submit(&self, trigger: Trigger) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let mut queue = self.queue.lock();
        queue.pending.push_back(trigger);
        if queue.running {
            return;
        }
        let Some(inner) = self.me.upgrade() else {
            return;
        };
        queue.running = true;
        drop(queue);
        self.scheduler.execute(Box::new(move || inner.drain()));
    }

    fn drain(&self) {
        loop {
            let trigger = {
                let mut queue = self.queue.lock();
                match queue.pending.pop_front() {
                    Some(trigger) => trigger,
                    None => {
                        queue.running = false;
                        return;
                    }
                }
            };
            self.handle(trigger);
        }
    }

    fn handle(&self, trigger: Trigger) {
        let _run = self.run_lock.lock();
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let state = self.state();
        let action = dispatch(state, &trigger);
        trace!(container = %self.config.name, state = %state, trigger = ?trigger, action = ?action, "trigger");
        match action {
            Action::Advance => {
                if let Err(e) = self.run_states() {
                    self.fail(e);
                }
            }
            Action::RefreshPublications => self.refresh_publications(),
            Action::Reset => self.reset(),
            Action::FailTimeout => {
                let missing = self.missing_dependencies();
                self.fail(DiError::StartupTimeout(missing));
            }
            Action::Ignore => {}
        }
    }

    // ----- state loop -----

    fn run_states(&self) -> DiResult<()> {
        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                return Ok(());
            }
            let state = self.state();
            match state {
                LifecycleState::Unparsed => {
                    self.emit(self.event(EventKind::Creating));
                    self.set_state(LifecycleState::WaitingForInfrastructure);
                }
                LifecycleState::WaitingForInfrastructure => {
                    let missing = self.handlers.missing(&self.source.namespaces());
                    if !missing.is_empty() {
                        info!(container = %self.config.name, namespaces = ?missing, "waiting for namespace handlers");
                        self.emit(self.event(EventKind::GracePeriod).with_dependencies(missing));
                        return Ok(());
                    }
                    self.build_graph()?;
                    self.schedule_timeout();
                    self.set_state(LifecycleState::GraphBuilt);
                }
                LifecycleState::GraphBuilt => {
                    self.set_state(LifecycleState::WaitingForDependencies(Pass::First));
                }
                LifecycleState::WaitingForDependencies(pass) => {
                    let missing = self.missing_dependencies();
                    if self.config.grace_period && !missing.is_empty() {
                        let mut last = self.last_missing.lock();
                        if last.as_ref() != Some(&missing) {
                            *last = Some(missing.clone());
                            drop(last);
                            self.emit(self.event(EventKind::GracePeriod).with_dependencies(missing));
                        }
                        return Ok(());
                    }
                    self.set_state(LifecycleState::DependenciesSatisfied(pass));
                }
                LifecycleState::DependenciesSatisfied(Pass::First) => {
                    self.process_components()?;
                    *self.last_missing.lock() = None;
                    self.set_state(LifecycleState::WaitingForDependencies(Pass::Second));
                }
                LifecycleState::DependenciesSatisfied(Pass::Second) => {
                    self.set_state(LifecycleState::Activating);
                }
                LifecycleState::Activating => {
                    self.activate()?;
                    self.set_state(LifecycleState::Active);
                    info!(container = %self.config.name, "container active");
                    self.emit(self.event(EventKind::Created));
                    return Ok(());
                }
                LifecycleState::Active | LifecycleState::Failed | LifecycleState::Destroyed => {
                    return Ok(())
                }
            }
        }
    }

    fn build_graph(&self) -> DiResult<()> {
        let mut definitions = ComponentDefinitionRegistry::new();
        self.source.populate(&self.handlers, &mut definitions)?;

        let converter = Arc::new(Converter::with_backend(self.backend.clone()));
        let repository = Repository::new(converter.clone(), self.backend.clone());
        for plan in self.default_plans(&converter) {
            repository.add_plan(plan)?;
        }
        let mut builder = PlanBuilder::new(&definitions, self.registry.clone(), self.consumer)
            .with_known_names(DEFAULT_COMPONENTS);
        for plan in builder.build_all()? {
            repository.add_plan(plan)?;
        }
        let names = builder.into_names();
        repository.validate()?;
        debug!(container = %self.config.name, components = definitions.len(), "graph built");

        *self.graph.write() = Graph {
            definitions,
            repository: Some(repository),
            trackers: Vec::new(),
            publishers: Vec::new(),
            names,
        };
        self.track();
        Ok(())
    }

    fn default_plans(&self, converter: &Arc<Converter>) -> Vec<Arc<BuildPlan>> {
        let container = Instance::new(self.weak()).with_class(CONTAINER_INTERFACE);
        let converter = Instance::from_arc(converter.clone()).with_class("Converter");
        let registry = Instance::from_arc(self.registry.clone()).with_class("ProviderRegistry");
        vec![
            Arc::new(BuildPlan::pass_through("container", Value::Object(container))),
            Arc::new(BuildPlan::pass_through("converter", Value::Object(converter))),
            Arc::new(BuildPlan::pass_through("registry", Value::Object(registry))),
        ]
    }

    /// Starts every tracker of the current graph and wires publications.
    fn track(&self) {
        let Some(repository) = self.repository() else {
            return;
        };
        let trackers = repository.all_trackers();
        let publishers = repository.bind_publishers();
        {
            let mut graph = self.graph.write();
            graph.trackers = trackers.clone();
            graph.publishers = publishers;
        }
        let listener: Weak<dyn SatisfactionListener> = self.me.clone();
        for tracker in &trackers {
            tracker.start(Some(listener.clone()));
        }
        debug!(container = %self.config.name, trackers = trackers.len(), "dependency tracking started");
    }

    fn untrack(&self) {
        let trackers = std::mem::take(&mut self.graph.write().trackers);
        for tracker in trackers {
            tracker.stop();
        }
    }

    fn schedule_timeout(&self) {
        if !self.config.grace_period {
            return;
        }
        let inner = self.me.clone();
        let task = self.scheduler.schedule(
            self.config.timeout,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.submit(Trigger::Timeout);
                }
            }),
        );
        if let Some(previous) = self.timeout.lock().replace(task) {
            previous.cancel();
        }
    }

    fn cancel_timeout(&self) {
        if let Some(task) = self.timeout.lock().take() {
            task.cancel();
        }
    }

    pub(crate) fn repository(&self) -> Option<Arc<Repository>> {
        self.graph.read().repository.clone()
    }

    pub(crate) fn require_repository(&self) -> DiResult<Arc<Repository>> {
        self.repository().ok_or_else(|| {
            DiError::IllegalState(format!(
                "container '{}' has no component graph in state {}",
                self.config.name,
                self.state()
            ))
        })
    }

    /// Filters of started trackers that are not satisfied, sorted.
    pub(crate) fn missing_dependencies(&self) -> Vec<String> {
        let graph = self.graph.read();
        let mut missing: Vec<String> = graph
            .trackers
            .iter()
            .filter(|tracker| !tracker.is_satisfied())
            .map(|tracker| tracker.filter().to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        missing.sort();
        missing
    }

    pub(crate) fn component_ids(&self) -> Vec<String> {
        match self.repository() {
            Some(repository) => repository
                .names()
                .into_iter()
                .filter(|name| !name.starts_with('#'))
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn component_metadata(&self, id: &str) -> Option<ComponentMetadata> {
        self.graph.read().definitions.get(id).cloned()
    }

    // ----- between the passes -----

    fn process_components(&self) -> DiResult<()> {
        let repository = self.require_repository()?;
        let (converters, processors, definitions) = {
            let graph = self.graph.read();
            let converters = graph.definitions.type_converters().to_vec();
            let processors: Vec<String> = graph
                .definitions
                .iter()
                .filter(|(_, component)| component.as_bean().is_some_and(|bean| bean.processor))
                .map(|(id, _)| id.to_string())
                .collect();
            (converters, processors, graph.definitions.clone())
        };

        for id in &converters {
            let value = repository.create(id)?;
            let converter = value.downcast::<dyn TypeConverter>().ok_or_else(|| {
                DiError::definition(format!("type converter '{id}' does not implement TypeConverter"))
            })?;
            repository.converter().register(converter);
            debug!(container = %self.config.name, converter = %id, "type converter registered");
        }

        let mut definitions = definitions;
        let mut changed = false;
        for id in &processors {
            let value = repository.create(id)?;
            let bean = value.downcast::<dyn BeanProcessor>();
            let registry = value.downcast::<dyn RegistryProcessor>();
            if bean.is_none() && registry.is_none() {
                return Err(DiError::definition(format!(
                    "processor '{id}' implements neither BeanProcessor nor RegistryProcessor"
                )));
            }
            if let Some(processor) = bean {
                repository.add_processor(processor);
            }
            if let Some(processor) = registry {
                processor.process(&mut definitions)?;
                changed = true;
            }
            debug!(container = %self.config.name, processor = %id, "processor applied");
        }

        if changed {
            self.merge(&repository, definitions)?;
        }
        Ok(())
    }

    /// Rebuilds plans from rewritten definitions. Components already created
    /// keep their plans; everything else is replaced, removed or added.
    fn merge(&self, repository: &Arc<Repository>, definitions: ComponentDefinitionRegistry) -> DiResult<()> {
        self.untrack();
        let names = std::mem::take(&mut self.graph.write().names);
        let mut builder = PlanBuilder::new(&definitions, self.registry.clone(), self.consumer)
            .with_names(names)
            .with_known_names(DEFAULT_COMPONENTS);
        let plans = builder.build_all()?;
        let names = builder.into_names();

        for name in repository.names() {
            let keep = DEFAULT_COMPONENTS.contains(&name.as_str())
                || definitions.contains(&name)
                || repository.is_instantiated(&name);
            if !keep {
                repository.remove_plan(&name)?;
            }
        }
        for plan in plans {
            if repository.is_instantiated(&plan.name) {
                trace!(component = %plan.name, "keeping plan of created component");
                continue;
            }
            repository.put_plan(plan)?;
        }
        repository.validate()?;
        {
            let mut graph = self.graph.write();
            graph.definitions = definitions;
            graph.names = names;
        }
        self.track();
        debug!(container = %self.config.name, "graph merged after registry processing");
        Ok(())
    }

    // ----- activation -----

    fn activate(&self) -> DiResult<()> {
        self.cancel_timeout();
        let repository = self.require_repository()?;
        let eager: Vec<String> = {
            let graph = self.graph.read();
            graph
                .definitions
                .iter()
                .filter(|(_, component)| component.activation() == Activation::Eager)
                .filter(|(_, component)| {
                    component.as_bean().map_or(true, |bean| bean.scope == Scope::Singleton)
                })
                .map(|(id, _)| id.to_string())
                .collect()
        };
        repository.create_all(&eager)?;
        self.refresh_publications();
        if self.config.publish_container {
            self.publish_self()?;
        }
        Ok(())
    }

    fn refresh_publications(&self) {
        let publishers = self.graph.read().publishers.clone();
        for publisher in publishers {
            if let Err(e) = publisher.refresh() {
                warn!(container = %self.config.name, service = %publisher.name(), error = %e, "unable to update publication");
            }
        }
    }

    fn publish_self(&self) -> DiResult<()> {
        let mut properties = Properties::new();
        properties.insert(CONTAINER_NAME.to_string(), Value::str(self.config.name.clone()));
        properties.insert(CONTAINER_VERSION.to_string(), Value::str(self.config.version.clone()));
        let value = Value::Object(Instance::new(self.weak()).with_class(CONTAINER_INTERFACE));
        let registration = self.registry.register(
            &[CONTAINER_INTERFACE.to_string()],
            ServiceSource::Value(value),
            properties,
        )?;
        *self.registration.lock() = Some(registration);
        Ok(())
    }

    fn unpublish_self(&self) {
        if let Some(registration) = self.registration.lock().take() {
            self.registry.unregister(&registration);
        }
    }

    // ----- teardown -----

    /// Withdraws publications, destroys created components and stops
    /// tracking, in that order.
    fn tidy_up(&self) {
        self.unpublish_self();
        let (publishers, repository) = {
            let graph = self.graph.read();
            (graph.publishers.clone(), graph.repository.clone())
        };
        for publisher in &publishers {
            publisher.unregister();
        }
        if let Some(repository) = repository {
            repository.destroy();
        }
        self.untrack();
    }

    fn fail(&self, cause: DiError) {
        error!(container = %self.config.name, error = %cause, "container failed");
        self.cancel_timeout();
        // read before the trackers stop
        let dependencies = match &cause {
            DiError::StartupTimeout(missing) => missing.clone(),
            _ => self.missing_dependencies(),
        };
        self.tidy_up();
        {
            let mut graph = self.graph.write();
            graph.repository = None;
            graph.publishers.clear();
        }
        *self.failure.lock() = Some(cause.clone());
        self.set_state(LifecycleState::Failed);
        self.emit(
            self.event(EventKind::Failure)
                .with_dependencies(dependencies)
                .with_cause(cause),
        );
    }

    fn reset(&self) {
        info!(container = %self.config.name, "namespace handler lost, rebuilding");
        self.cancel_timeout();
        self.tidy_up();
        *self.graph.write() = Graph::default();
        *self.last_missing.lock() = None;
        self.set_state(LifecycleState::WaitingForInfrastructure);
        if let Err(e) = self.run_states() {
            self.fail(e);
        }
    }

    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(self.event(EventKind::Destroying));
        self.cancel_timeout();
        let listener: Weak<dyn NamespaceListener> = self.me.clone();
        self.handlers.remove_listener(&listener);
        let _run = self.run_lock.lock();
        self.tidy_up();
        *self.graph.write() = Graph::default();
        self.set_state(LifecycleState::Destroyed);
        info!(container = %self.config.name, "container destroyed");
        self.emit(self.event(EventKind::Destroyed));
    }

    #[cfg(feature = "diagnostics")]
    pub(crate) fn debug_string(&self) -> String {
        use std::fmt::Write;

        let graph = self.graph.read();
        let mut out = String::new();
        let _ = writeln!(out, "container {} [{}]", self.config.name, self.state());
        if let Some(repository) = &graph.repository {
            for name in repository.names() {
                let Some(plan) = repository.plan(&name) else { continue };
                let created = if repository.is_instantiated(&name) { " (created)" } else { "" };
                let _ = writeln!(out, "  {name}: {}{created}", plan.kind_name());
            }
        }
        for tracker in &graph.trackers {
            let _ = writeln!(
                out,
                "  tracker {} {} satisfied={} providers={}",
                tracker.name(),
                tracker.filter(),
                tracker.is_satisfied(),
                tracker.providers().len()
            );
        }
        out
    }
}

impl SatisfactionListener for ContainerInner {
    fn satisfaction_changed(&self, tracker: &DependencyTracker) {
        self.submit(Trigger::DependencyChanged(tracker.filter().to_string()));
    }

    fn waiting(&self, tracker: &DependencyTracker) {
        self.emit(
            self.event(EventKind::Waiting)
                .with_dependencies(vec![tracker.filter().to_string()]),
        );
    }
}

impl NamespaceListener for ContainerInner {
    fn handler_registered(&self, namespace: &str) {
        self.submit(Trigger::HandlerRegistered(namespace.to_string()));
    }

    fn handler_unregistered(&self, namespace: &str) {
        self.submit(Trigger::HandlerUnregistered(namespace.to_string()));
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::SeqCst) {
            self.cancel_timeout();
            self.tidy_up();
        }
    }
}
