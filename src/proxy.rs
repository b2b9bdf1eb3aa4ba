//! Dynamic references.
//!
//! Components never hold a provider directly. A unary reference injects a
//! [`ReferenceProxy`] which resolves the currently bound provider on every
//! call, blocking up to the reference timeout while none is bound. A
//! reference list injects a [`ProviderList`], a live view over every
//! matching provider.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::convert::Converter;
use crate::error::{DiError, DiResult};
use crate::registry::ProviderRef;
use crate::tracker::{Binding, DependencyTracker};
use crate::types::TypeSpec;
use crate::value::{Convertible, Instance, Value};

/// Class name carried by injected proxy instances.
pub const PROXY_CLASS: &str = "ReferenceProxy";
/// Class name carried by injected provider lists.
pub const LIST_CLASS: &str = "ProviderList";

/// Late-binding handle on a unary dependency.
///
/// # Examples
///
/// ```no_run
/// use ferrous_blueprint::{Args, ReferenceProxy};
/// use std::sync::Arc;
///
/// trait Db: Send + Sync {
///     fn query(&self) -> u32;
/// }
///
/// fn build(args: &Args) -> Result<u32, Box<dyn std::error::Error + Send + Sync>> {
///     let db = args.object::<ReferenceProxy>(0)?;
///     let rows = db.call(|db: &Arc<dyn Db>| db.query())?;
///     Ok(rows)
/// }
/// ```
pub struct ReferenceProxy {
    tracker: Arc<DependencyTracker>,
    timeout: Duration,
    default_service: Option<Value>,
}

impl ReferenceProxy {
    pub fn new(
        tracker: Arc<DependencyTracker>,
        timeout: Duration,
        default_service: Option<Value>,
    ) -> Self {
        ReferenceProxy {
            tracker,
            timeout,
            default_service,
        }
    }

    pub fn tracker(&self) -> &Arc<DependencyTracker> {
        &self.tracker
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Currently bound provider, without waiting.
    pub fn provider(&self) -> Option<ProviderRef> {
        self.tracker.bound()
    }

    pub fn is_available(&self) -> bool {
        self.tracker.is_available()
    }

    /// Resolves the bound provider's value.
    ///
    /// Waits up to the timeout for a mandatory reference. An optional
    /// reference without a provider yields its default component, or fails
    /// immediately when it has none.
    pub fn resolve(&self) -> DiResult<Value> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let provider = match self.tracker.bound() {
                Some(provider) => provider,
                None => match self.await_provider(deadline)? {
                    Some(provider) => provider,
                    None => {
                        return self
                            .default_service
                            .clone()
                            .ok_or_else(|| self.unavailable("No matching service for optional reference"))
                    }
                },
            };
            if let Some(service) = self.tracker.service(&provider)? {
                return Ok(service);
            }
            // the provider went away between binding and acquisition
            if Instant::now() >= deadline {
                return Err(self.unavailable("Timeout expired when waiting on service"));
            }
            thread::yield_now();
        }
    }

    /// `None` for an optional reference without a provider.
    fn await_provider(&self, deadline: Instant) -> DiResult<Option<ProviderRef>> {
        if self.tracker.is_stopped() {
            return Err(self.unavailable("The container has been destroyed"));
        }
        if self.tracker.is_optional() {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        debug!(reference = %self.tracker.name(), timeout = ?remaining, "waiting for provider");
        match self.tracker.wait_for_binding(remaining) {
            Binding::Bound(provider) => Ok(Some(provider)),
            Binding::Stopped => Err(self.unavailable("The container has been destroyed")),
            Binding::TimedOut => Err(self.unavailable("Timeout expired when waiting on service")),
        }
    }

    /// Resolves and downcasts the provider value.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Arc<T>> {
        let service = self.resolve()?;
        service.downcast::<T>().ok_or_else(|| DiError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            found: service.kind().to_string(),
        })
    }

    /// Runs `f` against the current provider.
    pub fn call<T, R, F>(&self, f: F) -> DiResult<R>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce(&Arc<T>) -> R,
    {
        let target = self.get::<T>()?;
        Ok(f(&target))
    }

    /// Typed view over this proxy.
    pub fn typed<T: ?Sized + Send + Sync + 'static>(self: &Arc<Self>) -> Dynamic<T> {
        Dynamic {
            proxy: self.clone(),
            _marker: PhantomData,
        }
    }

    fn unavailable(&self, reason: &str) -> DiError {
        DiError::ServiceUnavailable {
            filter: self.tracker.filter().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Debug for ReferenceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceProxy")
            .field("tracker", &self.tracker)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Typed late-binding handle.
///
/// Implement the service trait on `Dynamic<dyn Trait>` to forward calls,
/// or use [`Dynamic::call`] directly.
pub struct Dynamic<T: ?Sized> {
    proxy: Arc<ReferenceProxy>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Dynamic<T> {
    pub fn get(&self) -> DiResult<Arc<T>> {
        self.proxy.get::<T>()
    }

    pub fn call<R>(&self, f: impl FnOnce(&T) -> R) -> DiResult<R> {
        let target = self.get()?;
        Ok(f(&target))
    }

    pub fn proxy(&self) -> &Arc<ReferenceProxy> {
        &self.proxy
    }
}

impl<T: ?Sized> Clone for Dynamic<T> {
    fn clone(&self) -> Self {
        Dynamic {
            proxy: self.proxy.clone(),
            _marker: PhantomData,
        }
    }
}

/// Live view over every provider of a reference list.
pub struct ProviderList {
    tracker: Arc<DependencyTracker>,
}

impl ProviderList {
    pub fn new(tracker: Arc<DependencyTracker>) -> Self {
        ProviderList { tracker }
    }

    /// Matching providers, best first.
    pub fn providers(&self) -> Vec<ProviderRef> {
        self.tracker.providers()
    }

    pub fn len(&self) -> usize {
        self.tracker.providers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of the current providers; providers that vanish meanwhile are skipped.
    pub fn services(&self) -> DiResult<Vec<Value>> {
        let mut out = Vec::new();
        for provider in self.tracker.providers() {
            if let Some(service) = self.tracker.service(&provider)? {
                out.push(service);
            }
        }
        Ok(out)
    }

    /// Values that downcast to `T`.
    pub fn objects<T: ?Sized + Send + Sync + 'static>(&self) -> DiResult<Vec<Arc<T>>> {
        Ok(self
            .services()?
            .iter()
            .filter_map(Value::downcast::<T>)
            .collect())
    }
}

impl fmt::Debug for ProviderList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderList")
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Pending reference value, materialised by the converter.
///
/// Converting to `Any`, to the proxy class or to the reference interface
/// yields the proxy instance; converting to properties yields the bound
/// provider's properties.
pub(crate) struct ReferenceHolder {
    proxy: Arc<ReferenceProxy>,
    instance: Instance,
}

impl ReferenceHolder {
    pub(crate) fn new(proxy: Arc<ReferenceProxy>, interface: Option<&str>) -> Self {
        let mut instance = Instance::from_arc(proxy.clone()).with_class(PROXY_CLASS);
        if let Some(interface) = interface {
            instance = instance.with_interface(interface);
        }
        ReferenceHolder { proxy, instance }
    }
}

impl Convertible for ReferenceHolder {
    fn convert(&self, target: &TypeSpec, _converter: &Converter) -> DiResult<Value> {
        match target {
            TypeSpec::Any => Ok(Value::Object(self.instance.clone())),
            TypeSpec::Named(name) if self.instance.satisfies(name) => {
                Ok(Value::Object(self.instance.clone()))
            }
            TypeSpec::Properties | TypeSpec::Map(_, _) => {
                let provider = match self.proxy.provider() {
                    Some(provider) => Some(provider),
                    None if self.proxy.tracker().is_optional() => None,
                    None => match self.proxy.tracker().wait_for_binding(self.proxy.timeout()) {
                        Binding::Bound(provider) => Some(provider),
                        _ => None,
                    },
                };
                Ok(provider
                    .map(|p| Value::from_properties(p.properties()))
                    .unwrap_or(Value::Null))
            }
            other => Err(DiError::conversion(
                self.describe(),
                other,
                Some("a service reference only converts to its proxy or properties".into()),
            )),
        }
    }

    fn describe(&self) -> String {
        format!("reference {}", self.proxy.tracker().filter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::registry::{ConsumerId, ProviderRegistry, ServiceRegistry, ServiceSource};
    use crate::tracker::TrackerSettings;
    use crate::value::Properties;

    fn proxy(
        registry: &Arc<ServiceRegistry>,
        optional: bool,
        timeout: Duration,
        default_service: Option<Value>,
    ) -> Arc<ReferenceProxy> {
        let tracker = DependencyTracker::new(
            "greeter",
            Filter::interface("Greeter"),
            registry.clone() as Arc<dyn ProviderRegistry>,
            ConsumerId::next(),
            TrackerSettings {
                optional,
                ..Default::default()
            },
        );
        tracker.start(None);
        Arc::new(ReferenceProxy::new(tracker, timeout, default_service))
    }

    #[test]
    fn mandatory_reference_times_out() {
        let registry = Arc::new(ServiceRegistry::new());
        let proxy = proxy(&registry, false, Duration::from_millis(50), None);
        let started = Instant::now();
        let err = proxy.resolve().unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(45));
        assert!(matches!(err, DiError::ServiceUnavailable { .. }));
    }

    #[test]
    fn optional_reference_falls_back_to_default() {
        let registry = Arc::new(ServiceRegistry::new());
        let fallback = Value::object(String::from("nobody"));
        let proxy = proxy(&registry, true, Duration::from_secs(5), Some(fallback));
        assert_eq!(&*proxy.get::<String>().unwrap(), "nobody");

        registry
            .register(
                &["Greeter".into()],
                ServiceSource::Value(Value::object(String::from("hello"))),
                Properties::new(),
            )
            .unwrap();
        assert_eq!(&*proxy.get::<String>().unwrap(), "hello");
    }

    #[test]
    fn holder_converts_to_proxy_and_properties() {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .register(&["Greeter".into()], ServiceSource::Value(Value::from(1i64)), Properties::new())
            .unwrap();
        let proxy = proxy(&registry, false, Duration::from_secs(1), None);
        let holder = ReferenceHolder::new(proxy, Some("Greeter"));
        let converter = Converter::new();

        let object = holder.convert(&TypeSpec::named("Greeter"), &converter).unwrap();
        assert!(object.downcast::<ReferenceProxy>().is_some());
        let props = holder.convert(&TypeSpec::Properties, &converter).unwrap();
        assert!(props.get_key("service.id").is_some());
        assert!(holder.convert(&TypeSpec::I32, &converter).is_err());
    }
}
