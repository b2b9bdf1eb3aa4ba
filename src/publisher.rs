//! Conditional publications.
//!
//! A [`ConditionalPublisher`] publishes one component into the provider
//! registry while its gating dependencies hold, and withdraws it when they
//! stop holding. The published value is created lazily, on the first
//! acquisition by a consumer, either once for everybody or once per
//! consumer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{DiError, DiResult};
use crate::filter::{COMPONENT_NAME, SERVICE_RANKING};
use crate::metadata::{PublicationGate, PublicationScope};
use crate::plan::{BuildPlan, CallbackPlan, PlanKind};
use crate::registry::{
    ConsumerId, ProviderRef, ProviderRegistry, ServiceFactory, ServiceRegistration, ServiceSource,
};
use crate::repository::Repository;
use crate::tracker::DependencyTracker;
use crate::value::{Properties, Value};

/// Everything a publisher needs to know about its publication.
pub struct PublisherPlan {
    pub name: String,
    pub service: Arc<BuildPlan>,
    pub interfaces: Vec<String>,
    pub ranking: i32,
    pub properties: Vec<(String, Arc<BuildPlan>)>,
    pub scope: PublicationScope,
    pub gate: PublicationGate,
    pub listeners: Vec<CallbackPlan>,
}

#[derive(Default)]
struct Publication {
    registration: Option<ServiceRegistration>,
    properties: Option<Properties>,
    listeners: Option<Vec<(Value, usize)>>,
}

pub struct ConditionalPublisher {
    plan: PublisherPlan,
    me: Weak<ConditionalPublisher>,
    registry: Arc<dyn ProviderRegistry>,
    repository: RwLock<Weak<Repository>>,
    trackers: RwLock<Vec<Arc<DependencyTracker>>>,
    registered: AtomicBool,
    publication: Mutex<Publication>,
    service: OnceCell<Value>,
    consumers: Mutex<HashMap<ConsumerId, Value>>,
}

impl ConditionalPublisher {
    pub fn new(plan: PublisherPlan, registry: Arc<dyn ProviderRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| ConditionalPublisher {
            plan,
            me: me.clone(),
            registry,
            repository: RwLock::new(Weak::new()),
            trackers: RwLock::new(Vec::new()),
            registered: AtomicBool::new(false),
            publication: Mutex::new(Publication::default()),
            service: OnceCell::new(),
            consumers: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn interfaces(&self) -> &[String] {
        &self.plan.interfaces
    }

    pub fn service_plan(&self) -> &Arc<BuildPlan> {
        &self.plan.service
    }

    pub fn property_plans(&self) -> &[(String, Arc<BuildPlan>)] {
        &self.plan.properties
    }

    pub fn listener_plans(&self) -> &[CallbackPlan] {
        &self.plan.listeners
    }

    pub(crate) fn attach(&self, repository: Weak<Repository>) {
        *self.repository.write() = repository;
    }

    /// Replaces the dependencies gating this publication.
    pub fn set_trackers(&self, trackers: Vec<Arc<DependencyTracker>>) {
        *self.trackers.write() = trackers;
    }

    pub fn trackers(&self) -> Vec<Arc<DependencyTracker>> {
        self.trackers.read().clone()
    }

    /// Whether the gate currently allows publication.
    pub fn all_satisfied(&self) -> bool {
        self.trackers.read().iter().all(|tracker| match self.plan.gate {
            PublicationGate::AllSatisfied => tracker.is_satisfied(),
            PublicationGate::AllBound => tracker.is_available(),
        })
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn registration(&self) -> Option<ServiceRegistration> {
        self.publication.lock().registration.clone()
    }

    /// Publishes when the gate allows it, withdraws otherwise.
    pub fn refresh(&self) -> DiResult<()> {
        if self.all_satisfied() {
            self.register().map(|_| ())
        } else {
            self.unregister();
            Ok(())
        }
    }

    /// Publishes the component; returns false when already published.
    pub fn register(&self) -> DiResult<bool> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        match self.publish() {
            Ok(properties) => {
                debug!(service = %self.plan.name, interfaces = ?self.plan.interfaces, "service registered");
                self.notify_listeners(true, &properties);
                Ok(true)
            }
            Err(e) => {
                self.registered.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn publish(&self) -> DiResult<Properties> {
        let repository = self.repository()?;
        let factory: Arc<dyn ServiceFactory> = self
            .me
            .upgrade()
            .ok_or_else(|| DiError::IllegalState("publisher dropped".into()))?;
        let mut publication = self.publication.lock();
        let properties = match &publication.properties {
            Some(properties) => properties.clone(),
            None => {
                let properties = self.evaluate_properties(&repository)?;
                publication.properties = Some(properties.clone());
                properties
            }
        };
        let registration = self.registry.register(
            &self.plan.interfaces,
            ServiceSource::Factory(factory),
            properties,
        )?;
        let properties = registration.reference().properties().clone();
        publication.registration = Some(registration);
        Ok(properties)
    }

    fn evaluate_properties(&self, repository: &Repository) -> DiResult<Properties> {
        let mut properties = Properties::new();
        for (key, plan) in &self.plan.properties {
            properties.insert(key.clone(), repository.create_plan(plan)?);
        }
        let component = match &self.plan.service.kind {
            PlanKind::Ref(name) => Some(name.clone()),
            _ if !self.plan.service.anonymous => Some(self.plan.service.name.clone()),
            _ => None,
        };
        if let Some(component) = component {
            properties.insert(COMPONENT_NAME.to_string(), Value::Str(component));
        }
        properties.insert(SERVICE_RANKING.to_string(), Value::Int(self.plan.ranking.into()));
        Ok(properties)
    }

    /// Withdraws the publication; returns false when it was not published.
    pub fn unregister(&self) -> bool {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return false;
        }
        let registration = self.publication.lock().registration.take();
        if let Some(registration) = registration {
            let properties = registration.reference().properties().clone();
            self.registry.unregister(&registration);
            debug!(service = %self.plan.name, "service unregistered");
            self.notify_listeners(false, &properties);
        }
        true
    }

    /// The shared published value, created on first use.
    pub fn service(&self) -> DiResult<Value> {
        self.service
            .get_or_try_init(|| self.repository()?.create_plan(&self.plan.service))
            .cloned()
    }

    /// Withdraws the publication and destroys per-consumer values.
    pub fn destroy(&self) {
        self.unregister();
        let consumers: Vec<Value> = self.consumers.lock().drain().map(|(_, v)| v).collect();
        if let Ok(repository) = self.repository() {
            for value in consumers {
                repository.destroy_value(&self.plan.service, &value);
            }
        }
    }

    fn repository(&self) -> DiResult<Arc<Repository>> {
        self.repository
            .read()
            .upgrade()
            .ok_or_else(|| DiError::IllegalState(format!("service '{}' is detached", self.plan.name)))
    }

    fn notify_listeners(&self, registered: bool, properties: &Properties) {
        if self.plan.listeners.is_empty() {
            return;
        }
        let repository = match self.repository() {
            Ok(repository) => repository,
            Err(e) => {
                warn!(service = %self.plan.name, error = %e, "registration listeners skipped");
                return;
            }
        };
        let listeners = match self.listener_instances(&repository) {
            Ok(listeners) => listeners,
            Err(e) => {
                warn!(service = %self.plan.name, error = %e, "unable to create registration listeners");
                return;
            }
        };
        let service = self.service().ok();
        for (target, index) in listeners {
            let listener = &self.plan.listeners[index];
            let method = if registered { &listener.on_add } else { &listener.on_remove };
            let Some(method) = method else { continue };
            if let Err(e) = repository.invoke_callback(&target, method, service.as_ref(), properties) {
                warn!(service = %self.plan.name, method = %method, error = %e, "registration listener failed");
            }
        }
    }

    fn listener_instances(&self, repository: &Repository) -> DiResult<Vec<(Value, usize)>> {
        let mut publication = self.publication.lock();
        if let Some(listeners) = &publication.listeners {
            return Ok(listeners.clone());
        }
        let mut listeners = Vec::with_capacity(self.plan.listeners.len());
        for (index, listener) in self.plan.listeners.iter().enumerate() {
            listeners.push((repository.create_plan(&listener.component)?, index));
        }
        publication.listeners = Some(listeners.clone());
        Ok(listeners)
    }
}

impl ServiceFactory for ConditionalPublisher {
    fn get_service(&self, consumer: ConsumerId, _provider: &ProviderRef) -> DiResult<Value> {
        match self.plan.scope {
            PublicationScope::Singleton => self.service(),
            PublicationScope::Consumer => {
                if let Some(existing) = self.consumers.lock().get(&consumer) {
                    return Ok(existing.clone());
                }
                let repository = self.repository()?;
                let value = repository.create_plan(&self.plan.service)?;
                let kept = self
                    .consumers
                    .lock()
                    .entry(consumer)
                    .or_insert_with(|| value.clone())
                    .clone();
                if !kept.same_instance(&value) {
                    // lost a race with another acquisition by the same consumer
                    repository.destroy_value(&self.plan.service, &value);
                }
                Ok(kept)
            }
        }
    }

    fn unget_service(&self, consumer: ConsumerId, _provider: &ProviderRef, value: Value) {
        if self.plan.scope != PublicationScope::Consumer {
            return;
        }
        {
            let mut consumers = self.consumers.lock();
            if consumers.get(&consumer).is_some_and(|tracked| tracked.same_instance(&value)) {
                consumers.remove(&consumer);
            }
        }
        if let Ok(repository) = self.repository() {
            repository.destroy_value(&self.plan.service, &value);
        }
    }
}

impl fmt::Debug for ConditionalPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalPublisher")
            .field("name", &self.plan.name)
            .field("interfaces", &self.plan.interfaces)
            .field("registered", &self.is_registered())
            .finish()
    }
}
