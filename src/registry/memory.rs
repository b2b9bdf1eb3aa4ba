use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{
    standard_properties, ConsumerId, ProviderRef, ProviderRegistry, ServiceEvent,
    ServiceFactory, ServiceListener, ServiceRegistration, ServiceSource, SubscriptionId,
};
use crate::error::DiResult;
use crate::filter::Filter;
use crate::value::{Properties, Value};

/// In-memory [`ProviderRegistry`].
///
/// Events are delivered synchronously on the mutating thread, after the
/// registry's own lock has been released, so listeners may call back into
/// the registry. Factory-backed providers are reference counted per consumer.
/// While `Unregistering` is dispatched the departing provider can still be
/// acquired, but it no longer shows up in lookups.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{Filter, Properties, ProviderRegistry, ServiceRegistry, ServiceSource, Value};
///
/// let registry = ServiceRegistry::new();
/// let registration = registry
///     .register(&["Clock".to_string()], ServiceSource::Value(Value::from("tick")), Properties::new())
///     .unwrap();
/// assert_eq!(registry.find(&Filter::interface("Clock")).len(), 1);
/// assert!(registry.unregister(&registration));
/// assert!(registry.find(&Filter::interface("Clock")).is_empty());
/// ```
#[derive(Default)]
pub struct ServiceRegistry {
    state: RwLock<State>,
    next_id: AtomicU64,
    next_subscription: AtomicU64,
}

#[derive(Default)]
struct State {
    services: BTreeMap<u64, Entry>,
    subscriptions: Vec<Subscription>,
}

struct Entry {
    reference: ProviderRef,
    source: ServiceSource,
    usage: HashMap<ConsumerId, Usage>,
    unregistering: bool,
}

struct Usage {
    count: usize,
    value: Value,
}

struct Subscription {
    id: SubscriptionId,
    filter: Filter,
    listener: Arc<dyn ServiceListener>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registered provider, best first.
    pub fn providers(&self) -> Vec<ProviderRef> {
        let mut all: Vec<ProviderRef> = self
            .state
            .read()
            .services
            .values()
            .filter(|e| !e.unregistering)
            .map(|e| e.reference.clone())
            .collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.state.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of consumers currently holding the provider.
    pub fn usage_count(&self, provider: &ProviderRef) -> usize {
        self.state
            .read()
            .services
            .get(&provider.id())
            .map(|e| e.usage.values().map(|u| u.count).sum())
            .unwrap_or(0)
    }

    fn listeners_for(
        state: &State,
        reference: &ProviderRef,
    ) -> Vec<Arc<dyn ServiceListener>> {
        state
            .subscriptions
            .iter()
            .filter(|s| s.filter.matches(reference.properties()))
            .map(|s| s.listener.clone())
            .collect()
    }

    fn dispatch(listeners: Vec<Arc<dyn ServiceListener>>, event: ServiceEvent) {
        for listener in listeners {
            listener.service_changed(&event);
        }
    }
}

impl ProviderRegistry for ServiceRegistry {
    fn find(&self, filter: &Filter) -> Vec<ProviderRef> {
        let mut found: Vec<ProviderRef> = self
            .state
            .read()
            .services
            .values()
            .filter(|e| !e.unregistering && filter.matches(e.reference.properties()))
            .map(|e| e.reference.clone())
            .collect();
        found.sort();
        found
    }

    fn subscribe(&self, filter: Filter, listener: Arc<dyn ServiceListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        trace!(filter = %filter, "subscribed");
        self.state.write().subscriptions.push(Subscription {
            id,
            filter,
            listener,
        });
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.state
            .write()
            .subscriptions
            .retain(|s| s.id != subscription);
    }

    fn acquire(&self, provider: &ProviderRef, consumer: ConsumerId) -> DiResult<Option<Value>> {
        let factory = {
            let mut state = self.state.write();
            let Some(entry) = state.services.get_mut(&provider.id()) else {
                return Ok(None);
            };
            if let Some(usage) = entry.usage.get_mut(&consumer) {
                usage.count += 1;
                return Ok(Some(usage.value.clone()));
            }
            match &entry.source {
                ServiceSource::Value(value) => {
                    entry.usage.insert(
                        consumer,
                        Usage {
                            count: 1,
                            value: value.clone(),
                        },
                    );
                    return Ok(Some(value.clone()));
                }
                ServiceSource::Factory(factory) => factory.clone(),
            }
        };

        // Built outside the lock: the factory may construct components that
        // consult this registry.
        let value = factory.get_service(consumer, provider)?;

        let mut state = self.state.write();
        let Some(entry) = state.services.get_mut(&provider.id()) else {
            drop(state);
            factory.unget_service(consumer, provider, value);
            return Ok(None);
        };
        if let Some(usage) = entry.usage.get_mut(&consumer) {
            usage.count += 1;
            let existing = usage.value.clone();
            drop(state);
            if !existing.same_instance(&value) {
                factory.unget_service(consumer, provider, value);
            }
            return Ok(Some(existing));
        }
        entry.usage.insert(
            consumer,
            Usage {
                count: 1,
                value: value.clone(),
            },
        );
        Ok(Some(value))
    }

    fn release(&self, provider: &ProviderRef, consumer: ConsumerId) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.services.get_mut(&provider.id()) else {
            return false;
        };
        let Some(usage) = entry.usage.get_mut(&consumer) else {
            return false;
        };
        usage.count -= 1;
        if usage.count > 0 {
            return true;
        }
        let released = entry.usage.remove(&consumer);
        let factory = match &entry.source {
            ServiceSource::Factory(factory) => Some(factory.clone()),
            ServiceSource::Value(_) => None,
        };
        drop(state);
        if let (Some(factory), Some(usage)) = (factory, released) {
            factory.unget_service(consumer, provider, usage.value);
        }
        true
    }

    fn register(
        &self,
        interfaces: &[String],
        source: ServiceSource,
        properties: Properties,
    ) -> DiResult<ServiceRegistration> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let reference = ProviderRef::new(id, standard_properties(id, interfaces, properties));
        let listeners = {
            let mut state = self.state.write();
            state.services.insert(
                id,
                Entry {
                    reference: reference.clone(),
                    source,
                    usage: HashMap::new(),
                    unregistering: false,
                },
            );
            Self::listeners_for(&state, &reference)
        };
        debug!(provider = id, interfaces = ?interfaces, "provider registered");
        Self::dispatch(listeners, ServiceEvent::Registered(reference.clone()));
        Ok(ServiceRegistration { reference })
    }

    fn set_properties(&self, registration: &ServiceRegistration, properties: Properties) -> bool {
        let (modified, ended, reference) = {
            let mut state = self.state.write();
            let Some(entry) = state.services.get_mut(&registration.id()) else {
                return false;
            };
            if entry.unregistering {
                return false;
            }
            let old = entry.reference.clone();
            let reference = ProviderRef::new(
                old.id(),
                standard_properties(old.id(), &old.interfaces(), properties),
            );
            entry.reference = reference.clone();
            let mut modified = Vec::new();
            let mut ended = Vec::new();
            for subscription in &state.subscriptions {
                let was = subscription.filter.matches(old.properties());
                let is = subscription.filter.matches(reference.properties());
                if is {
                    modified.push(subscription.listener.clone());
                } else if was {
                    ended.push(subscription.listener.clone());
                }
            }
            (modified, ended, reference)
        };
        Self::dispatch(modified, ServiceEvent::Modified(reference.clone()));
        Self::dispatch(ended, ServiceEvent::ModifiedEndMatch(reference));
        true
    }

    fn unregister(&self, registration: &ServiceRegistration) -> bool {
        let (reference, listeners) = {
            let mut state = self.state.write();
            let Some(entry) = state.services.get_mut(&registration.id()) else {
                return false;
            };
            if entry.unregistering {
                return false;
            }
            entry.unregistering = true;
            let reference = entry.reference.clone();
            (reference.clone(), Self::listeners_for(&state, &reference))
        };
        // listeners may still acquire the provider while the event is delivered
        Self::dispatch(listeners, ServiceEvent::Unregistering(reference));
        let Some(entry) = self.state.write().services.remove(&registration.id()) else {
            return false;
        };
        debug!(provider = registration.id(), "provider unregistered");
        if let ServiceSource::Factory(factory) = &entry.source {
            for (consumer, usage) in entry.usage {
                factory.unget_service(consumer, &entry.reference, usage.value);
            }
        }
        true
    }
}
