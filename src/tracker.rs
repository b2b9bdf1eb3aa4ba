//! Dependency trackers.
//!
//! A [`DependencyTracker`] follows the providers matching one filter in a
//! [`ProviderRegistry`]. It keeps the matching set sorted best first,
//! decides which provider is bound (all of them for a collection), caches
//! the acquired provider values, and notifies its owner whenever the
//! dependency becomes satisfied or unsatisfied.
//!
//! Registry events for one tracker are applied one at a time under a
//! reentrant event lock; listeners are always called without the state lock
//! held so they may call back into the tracker.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::DiResult;
use crate::filter::Filter;
use crate::metadata::Damping;
use crate::registry::{
    ConsumerId, ProviderRef, ProviderRegistry, ServiceEvent, ServiceListener, SubscriptionId,
};
use crate::value::Value;

/// One provider or every matching provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    #[default]
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerSettings {
    pub cardinality: Cardinality,
    pub optional: bool,
    pub damping: Damping,
}

/// Owner of a tracker, told about satisfaction and availability flips.
pub trait SatisfactionListener: Send + Sync {
    fn satisfaction_changed(&self, tracker: &DependencyTracker);

    /// A caller started blocking on this tracker.
    fn waiting(&self, _tracker: &DependencyTracker) {}
}

/// Told when providers are bound and unbound.
pub trait BindingListener: Send + Sync {
    fn bind(&self, provider: &ProviderRef, service: Option<&Value>);
    fn unbind(&self, provider: &ProviderRef, service: Option<&Value>);
}

/// Result of waiting for a provider.
#[derive(Debug, Clone)]
pub enum Binding {
    Bound(ProviderRef),
    Stopped,
    TimedOut,
}

#[derive(Default)]
struct TrackerState {
    /// Matching providers, best first
    providers: Vec<ProviderRef>,
    /// Bound provider for single cardinality
    bound: Option<ProviderRef>,
    services: HashMap<u64, (ProviderRef, Value)>,
    stopped: bool,
}

#[derive(Default)]
struct Changes {
    bind: Vec<ProviderRef>,
    unbind: Vec<ProviderRef>,
    release: Vec<(ProviderRef, Value)>,
}

pub struct DependencyTracker {
    name: String,
    filter: Filter,
    settings: TrackerSettings,
    registry: Arc<dyn ProviderRegistry>,
    consumer: ConsumerId,
    me: Weak<DependencyTracker>,
    started: AtomicBool,
    satisfied: AtomicBool,
    available: AtomicBool,
    events: ReentrantMutex<()>,
    state: Mutex<TrackerState>,
    changed: Condvar,
    listener: RwLock<Option<Weak<dyn SatisfactionListener>>>,
    binding_listeners: RwLock<Vec<Arc<dyn BindingListener>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl DependencyTracker {
    pub fn new(
        name: impl Into<String>,
        filter: Filter,
        registry: Arc<dyn ProviderRegistry>,
        consumer: ConsumerId,
        settings: TrackerSettings,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| DependencyTracker {
            name,
            filter,
            settings,
            registry,
            consumer,
            me: me.clone(),
            started: AtomicBool::new(false),
            satisfied: AtomicBool::new(false),
            available: AtomicBool::new(false),
            events: ReentrantMutex::new(()),
            state: Mutex::new(TrackerState::default()),
            changed: Condvar::new(),
            listener: RwLock::new(None),
            binding_listeners: RwLock::new(Vec::new()),
            subscription: Mutex::new(None),
        })
    }

    /// Name of the component that owns this tracker.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn is_optional(&self) -> bool {
        self.settings.optional
    }

    pub fn is_multiple(&self) -> bool {
        self.settings.cardinality == Cardinality::Multiple
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Optional, or at least one matching provider.
    pub fn is_satisfied(&self) -> bool {
        self.satisfied.load(Ordering::SeqCst)
    }

    /// At least one matching provider.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Currently bound provider (the best one for a collection).
    pub fn bound(&self) -> Option<ProviderRef> {
        let state = self.state.lock();
        match self.settings.cardinality {
            Cardinality::Single => state.bound.clone(),
            Cardinality::Multiple => state.providers.first().cloned(),
        }
    }

    /// Every matching provider, best first.
    pub fn providers(&self) -> Vec<ProviderRef> {
        self.state.lock().providers.clone()
    }

    /// Subscribes to the registry and binds the initial providers.
    ///
    /// Starting an already started tracker does nothing.
    pub fn start(&self, listener: Option<Weak<dyn SatisfactionListener>>) {
        let _events = self.events.lock();
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.listener.write() = listener;
        let subscriber: Arc<dyn ServiceListener> = Arc::new(Subscriber {
            tracker: self.me.clone(),
        });
        let subscription = self.registry.subscribe(self.filter.clone(), subscriber);
        *self.subscription.lock() = Some(subscription);

        let mut initial = self.registry.find(&self.filter);
        initial.sort();
        let binds = {
            let mut state = self.state.lock();
            state.stopped = false;
            state.providers = initial;
            match self.settings.cardinality {
                Cardinality::Single => {
                    state.bound = state.providers.first().cloned();
                    state.bound.iter().cloned().collect::<Vec<_>>()
                }
                Cardinality::Multiple => state.providers.clone(),
            }
        };
        debug!(tracker = %self.name, filter = %self.filter, providers = binds.len(), "tracker started");
        self.changed.notify_all();
        self.notify_bind(&binds);
        // the initial state is not a flip; the owner reads it after start
        let available = !self.state.lock().providers.is_empty();
        self.available.store(available, Ordering::SeqCst);
        self.satisfied
            .store(self.settings.optional || available, Ordering::SeqCst);
    }

    /// Unsubscribes, unbinds everything and releases acquired values.
    ///
    /// Callers blocked on the tracker wake up with [`Binding::Stopped`].
    pub fn stop(&self) {
        let _events = self.events.lock();
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(subscription) = self.subscription.lock().take() {
            self.registry.unsubscribe(subscription);
        }
        let (unbind, released) = {
            let mut state = self.state.lock();
            state.stopped = true;
            let bound = state.bound.take();
            let providers = std::mem::take(&mut state.providers);
            let unbind = match self.settings.cardinality {
                Cardinality::Single => bound.into_iter().collect(),
                Cardinality::Multiple => providers,
            };
            let released: Vec<(ProviderRef, Value)> =
                state.services.drain().map(|(_, entry)| entry).collect();
            (unbind, released)
        };
        self.changed.notify_all();
        self.notify_unbind(&unbind, &released);
        self.release(released);
        self.satisfied.store(false, Ordering::SeqCst);
        self.available.store(false, Ordering::SeqCst);
        *self.listener.write() = None;
        debug!(tracker = %self.name, "tracker stopped");
    }

    /// Adds a binding listener and replays the current bindings to it.
    pub fn add_binding_listener(&self, listener: Arc<dyn BindingListener>) {
        let _events = self.events.lock();
        self.binding_listeners.write().push(listener.clone());
        let current = {
            let state = self.state.lock();
            match self.settings.cardinality {
                Cardinality::Single => state.bound.iter().cloned().collect(),
                Cardinality::Multiple => state.providers.clone(),
            }
        };
        for provider in current {
            let service = self.acquire_for_listener(&provider);
            listener.bind(&provider, service.as_ref());
        }
    }

    pub fn clear_binding_listeners(&self) {
        self.binding_listeners.write().clear();
    }

    /// Applies one registry event.
    pub fn on_event(&self, event: &ServiceEvent) {
        let _events = self.events.lock();
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        let changes = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            match event {
                ServiceEvent::Registered(provider) | ServiceEvent::Modified(provider) => {
                    if self.filter.matches(provider.properties()) {
                        upsert(&mut state.providers, provider.clone());
                    } else {
                        state.providers.retain(|p| p.id() != provider.id());
                    }
                }
                ServiceEvent::ModifiedEndMatch(provider) | ServiceEvent::Unregistering(provider) => {
                    state.providers.retain(|p| p.id() != provider.id());
                }
            }
            self.rebind(&mut state, event)
        };
        trace!(
            tracker = %self.name,
            bind = changes.bind.len(),
            unbind = changes.unbind.len(),
            "tracker event applied"
        );
        self.changed.notify_all();
        self.notify_unbind(&changes.unbind, &changes.release);
        self.release(changes.release);
        self.notify_bind(&changes.bind);
        self.update_flags();
    }

    fn rebind(&self, state: &mut TrackerState, event: &ServiceEvent) -> Changes {
        let mut changes = Changes::default();
        let subject = event.provider();
        let tracked = state.providers.iter().any(|p| p.id() == subject.id());

        if self.settings.cardinality == Cardinality::Multiple {
            if tracked {
                changes.bind.push(current(&state.providers, subject));
            } else {
                changes.unbind.push(subject.clone());
                if let Some(entry) = state.services.remove(&subject.id()) {
                    changes.release.push(entry);
                }
            }
            return changes;
        }

        let best = state.providers.first().cloned();
        let next = match &state.bound {
            None => best,
            Some(bound) if !state.providers.contains(bound) => best,
            Some(_) if self.settings.damping == Damping::Greedy => best,
            Some(bound) => Some(current(&state.providers, bound)),
        };
        let previous = state.bound.clone();
        let refreshed = matches!(event, ServiceEvent::Modified(p) if next.as_ref() == Some(p));
        if previous != next {
            if let Some(previous) = previous {
                if let Some(entry) = state.services.remove(&previous.id()) {
                    changes.release.push(entry);
                }
                if next.is_none() {
                    changes.unbind.push(previous);
                }
            }
            changes.bind.extend(next.iter().cloned());
        } else if refreshed {
            changes.bind.extend(next.iter().cloned());
        }
        state.bound = next;
        changes
    }

    /// Blocks until a provider is bound, the tracker stops, or `timeout` elapses.
    ///
    /// The owner's [`SatisfactionListener::waiting`] is called once before
    /// the caller actually blocks.
    pub fn wait_for_binding(&self, timeout: Duration) -> Binding {
        {
            let state = self.state.lock();
            if let Some(bound) = self.bound_in(&state) {
                return Binding::Bound(bound);
            }
            if state.stopped {
                return Binding::Stopped;
            }
            if timeout.is_zero() {
                return Binding::TimedOut;
            }
        }
        if let Some(listener) = self.listener() {
            listener.waiting(self);
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(bound) = self.bound_in(&state) {
                return Binding::Bound(bound);
            }
            if state.stopped {
                return Binding::Stopped;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return match self.bound_in(&state) {
                    Some(bound) => Binding::Bound(bound),
                    None if state.stopped => Binding::Stopped,
                    None => Binding::TimedOut,
                };
            }
        }
    }

    fn bound_in(&self, state: &TrackerState) -> Option<ProviderRef> {
        match self.settings.cardinality {
            Cardinality::Single => state.bound.clone(),
            Cardinality::Multiple => state.providers.first().cloned(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Acquired value of `provider`, cached for the tracker's lifetime.
    ///
    /// `Ok(None)` when the provider went away or the tracker is stopped.
    pub fn service(&self, provider: &ProviderRef) -> DiResult<Option<Value>> {
        {
            let state = self.state.lock();
            if let Some((_, value)) = state.services.get(&provider.id()) {
                return Ok(Some(value.clone()));
            }
            if state.stopped {
                return Ok(None);
            }
        }
        let Some(value) = self.registry.acquire(provider, self.consumer)? else {
            return Ok(None);
        };
        let mut state = self.state.lock();
        let wanted = !state.stopped && state.providers.iter().any(|p| p.id() == provider.id());
        if !wanted {
            drop(state);
            self.registry.release(provider, self.consumer);
            return Ok(None);
        }
        if let Some((_, existing)) = state.services.get(&provider.id()) {
            let existing = existing.clone();
            drop(state);
            self.registry.release(provider, self.consumer);
            return Ok(Some(existing));
        }
        state
            .services
            .insert(provider.id(), (provider.clone(), value.clone()));
        Ok(Some(value))
    }

    fn acquire_for_listener(&self, provider: &ProviderRef) -> Option<Value> {
        match self.service(provider) {
            Ok(service) => service,
            Err(e) => {
                warn!(tracker = %self.name, provider = provider.id(), error = %e, "unable to acquire provider for binding");
                None
            }
        }
    }

    fn listener(&self) -> Option<Arc<dyn SatisfactionListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }

    fn notify_bind(&self, providers: &[ProviderRef]) {
        let listeners = self.binding_listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        for provider in providers {
            let service = self.acquire_for_listener(provider);
            for listener in &listeners {
                listener.bind(provider, service.as_ref());
            }
        }
    }

    fn notify_unbind(&self, providers: &[ProviderRef], released: &[(ProviderRef, Value)]) {
        let listeners = self.binding_listeners.read().clone();
        for provider in providers {
            let service = released
                .iter()
                .find(|(p, _)| p.id() == provider.id())
                .map(|(_, v)| v);
            for listener in &listeners {
                listener.unbind(provider, service);
            }
        }
    }

    fn release(&self, released: Vec<(ProviderRef, Value)>) {
        for (provider, _) in released {
            self.registry.release(&provider, self.consumer);
        }
    }

    fn update_flags(&self) {
        let available = !self.state.lock().providers.is_empty();
        let satisfied = self.settings.optional || available;
        let satisfied_flip = self.satisfied.swap(satisfied, Ordering::SeqCst) != satisfied;
        let available_flip = self.available.swap(available, Ordering::SeqCst) != available;
        if !(satisfied_flip || available_flip) {
            return;
        }
        debug!(tracker = %self.name, satisfied, available, "dependency changed");
        if let Some(listener) = self.listener() {
            listener.satisfaction_changed(self);
        }
    }
}

fn upsert(providers: &mut Vec<ProviderRef>, provider: ProviderRef) {
    providers.retain(|p| p.id() != provider.id());
    let at = providers
        .binary_search(&provider)
        .unwrap_or_else(|insert_at| insert_at);
    providers.insert(at, provider);
}

/// Freshest snapshot of `provider` in `providers`.
fn current(providers: &[ProviderRef], provider: &ProviderRef) -> ProviderRef {
    providers
        .iter()
        .find(|p| p.id() == provider.id())
        .cloned()
        .unwrap_or_else(|| provider.clone())
}

impl fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("name", &self.name)
            .field("filter", &self.filter.to_string())
            .field("satisfied", &self.is_satisfied())
            .field("available", &self.is_available())
            .finish()
    }
}

struct Subscriber {
    tracker: Weak<DependencyTracker>,
}

impl ServiceListener for Subscriber {
    fn service_changed(&self, event: &ServiceEvent) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.on_event(event);
        }
    }
}
