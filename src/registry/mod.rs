//! The provider registry: a live, mutable set of published providers.
//!
//! Containers consume providers through dependency trackers and publish
//! their own components through conditional publishers. Both sides only see
//! the [`ProviderRegistry`] trait; [`ServiceRegistry`] is the in-memory
//! implementation shared by every container in a process.

mod memory;

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::error::DiResult;
use crate::filter::{Filter, OBJECT_CLASS, SERVICE_ID, SERVICE_RANKING};
use crate::value::{Properties, Value};

pub use memory::ServiceRegistry;

/// Identifies a consumer of providers, one per container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConsumerId(NEXT.fetch_add(1, AtomicOrdering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Snapshot of a published provider.
///
/// Equality is by id. Ordering puts the *best* provider first: highest
/// ranking, then lowest id.
#[derive(Clone)]
pub struct ProviderRef {
    id: u64,
    properties: Arc<Properties>,
}

impl ProviderRef {
    pub(crate) fn new(id: u64, properties: Properties) -> Self {
        ProviderRef {
            id,
            properties: Arc::new(properties),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ranking(&self) -> i32 {
        self.properties
            .get(SERVICE_RANKING)
            .and_then(|v| v.get::<i32>())
            .unwrap_or(0)
    }

    pub fn interfaces(&self) -> Vec<String> {
        self.properties
            .get(OBJECT_CLASS)
            .and_then(|v| v.get::<Vec<String>>())
            .unwrap_or_default()
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl PartialEq for ProviderRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ProviderRef {}

impl PartialOrd for ProviderRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProviderRef {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRef")
            .field("id", &self.id)
            .field("ranking", &self.ranking())
            .field("interfaces", &self.interfaces())
            .finish()
    }
}

/// Change notification for subscribers.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A matching provider was published
    Registered(ProviderRef),
    /// A matching provider changed its properties and still matches
    Modified(ProviderRef),
    /// A provider that matched changed its properties and no longer matches
    ModifiedEndMatch(ProviderRef),
    /// A matching provider is being withdrawn
    Unregistering(ProviderRef),
}

impl ServiceEvent {
    pub fn provider(&self) -> &ProviderRef {
        match self {
            ServiceEvent::Registered(r)
            | ServiceEvent::Modified(r)
            | ServiceEvent::ModifiedEndMatch(r)
            | ServiceEvent::Unregistering(r) => r,
        }
    }
}

/// Receives registry events matching a subscription filter.
pub trait ServiceListener: Send + Sync {
    fn service_changed(&self, event: &ServiceEvent);
}

/// Produces provider values per consumer.
///
/// The registry calls [`ServiceFactory::get_service`] the first time a
/// consumer acquires the provider and [`ServiceFactory::unget_service`] when
/// that consumer's last use is released.
pub trait ServiceFactory: Send + Sync {
    fn get_service(&self, consumer: ConsumerId, provider: &ProviderRef) -> DiResult<Value>;
    fn unget_service(&self, consumer: ConsumerId, provider: &ProviderRef, value: Value);
}

/// What a publication hands out.
#[derive(Clone)]
pub enum ServiceSource {
    Value(Value),
    Factory(Arc<dyn ServiceFactory>),
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSource::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ServiceSource::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Handle returned by [`ProviderRegistry::register`].
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    reference: ProviderRef,
}

impl ServiceRegistration {
    pub fn reference(&self) -> &ProviderRef {
        &self.reference
    }

    pub fn id(&self) -> u64 {
        self.reference.id
    }
}

/// Identifies a subscription for [`ProviderRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live registry of providers.
pub trait ProviderRegistry: Send + Sync {
    /// Current providers matching `filter`, best first.
    fn find(&self, filter: &Filter) -> Vec<ProviderRef>;

    /// Subscribes to events for providers matching `filter`.
    fn subscribe(&self, filter: Filter, listener: Arc<dyn ServiceListener>) -> SubscriptionId;

    fn unsubscribe(&self, subscription: SubscriptionId);

    /// Obtains the provider's value for `consumer`, counting the use.
    fn acquire(&self, provider: &ProviderRef, consumer: ConsumerId) -> DiResult<Option<Value>>;

    /// Releases one use; returns false when the consumer held none.
    fn release(&self, provider: &ProviderRef, consumer: ConsumerId) -> bool;

    /// Publishes a provider under `interfaces`.
    fn register(
        &self,
        interfaces: &[String],
        source: ServiceSource,
        properties: Properties,
    ) -> DiResult<ServiceRegistration>;

    /// Replaces a provider's properties; returns false when it is gone.
    fn set_properties(&self, registration: &ServiceRegistration, properties: Properties) -> bool;

    /// Withdraws a provider; returns false when it was already gone.
    fn unregister(&self, registration: &ServiceRegistration) -> bool;
}

/// Properties every registration carries.
pub(crate) fn standard_properties(
    id: u64,
    interfaces: &[String],
    mut properties: Properties,
) -> Properties {
    properties.insert(
        OBJECT_CLASS.to_string(),
        Value::List(interfaces.iter().map(|i| Value::str(i.clone())).collect()),
    );
    properties.insert(SERVICE_ID.to_string(), Value::UInt(id));
    properties
        .entry(SERVICE_RANKING.to_string())
        .or_insert(Value::Int(0));
    properties
}
