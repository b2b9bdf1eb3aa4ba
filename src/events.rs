//! Container lifecycle events.
//!
//! Every container reports its progress as [`ContainerEvent`]s: creating,
//! grace period (with the still-missing dependencies), waiting on a dynamic
//! reference, created, failure, destroying and destroyed. Listeners are
//! called synchronously on the thread that drives the lifecycle; every
//! event is also logged through `tracing`.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::DiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Creating,
    Created,
    Destroying,
    Destroyed,
    Failure,
    /// Waiting for mandatory dependencies before activation
    GracePeriod,
    /// A caller is blocked on a dynamic reference
    Waiting,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Creating => "CREATING",
            EventKind::Created => "CREATED",
            EventKind::Destroying => "DESTROYING",
            EventKind::Destroyed => "DESTROYED",
            EventKind::Failure => "FAILURE",
            EventKind::GracePeriod => "GRACE_PERIOD",
            EventKind::Waiting => "WAITING",
        };
        f.write_str(name)
    }
}

/// One lifecycle notification.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub kind: EventKind,
    pub container: String,
    pub timestamp: SystemTime,
    /// Filters of the dependencies involved
    pub dependencies: Vec<String>,
    pub cause: Option<DiError>,
}

impl ContainerEvent {
    pub fn new(kind: EventKind, container: impl Into<String>) -> Self {
        ContainerEvent {
            kind,
            container: container.into(),
            timestamp: SystemTime::now(),
            dependencies: Vec::new(),
            cause: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_cause(mut self, cause: DiError) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Receives container events.
///
/// Calls are synchronous on the lifecycle thread; keep implementations
/// light. A panicking listener is logged and skipped.
pub trait ContainerListener: Send + Sync {
    fn container_event(&self, event: &ContainerEvent);
}

/// Delivers events to listeners and logs them.
#[derive(Default)]
pub(crate) struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn ContainerListener>>>,
}

impl EventDispatcher {
    pub(crate) fn add(&self, listener: Arc<dyn ContainerListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn dispatch(&self, event: ContainerEvent) {
        debug!(
            container = %event.container,
            event = %event.kind,
            dependencies = ?event.dependencies,
            "container event"
        );
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.container_event(&event)));
            if delivered.is_err() {
                warn!(container = %event.container, event = %event.kind, "event listener panicked");
            }
        }
    }
}

/// Built-in listener that writes events to `tracing` at a level matching
/// their severity.
///
/// # Examples
///
/// ```
/// use ferrous_blueprint::{ContainerEvent, ContainerListener, EventKind, LoggingListener};
///
/// let listener = LoggingListener::new();
/// listener.container_event(&ContainerEvent::new(EventKind::Created, "app"));
/// ```
#[derive(Debug, Default)]
pub struct LoggingListener;

impl LoggingListener {
    pub fn new() -> Self {
        LoggingListener
    }
}

impl ContainerListener for LoggingListener {
    fn container_event(&self, event: &ContainerEvent) {
        match event.kind {
            EventKind::Failure => error!(
                container = %event.container,
                dependencies = ?event.dependencies,
                cause = ?event.cause.as_ref().map(ToString::to_string),
                "container failed"
            ),
            EventKind::GracePeriod | EventKind::Waiting => info!(
                container = %event.container,
                dependencies = ?event.dependencies,
                "{}", event.kind
            ),
            _ => info!(container = %event.container, "{}", event.kind),
        }
    }
}

/// Recording listener that lets callers block until an event arrives.
///
/// Useful in tests and in embedding code that must wait for a container to
/// become active.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<ContainerEvent>>,
    arrived: Condvar,
}

impl EventCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ContainerEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// Waits until an event of `kind` has been recorded, returning it.
    pub fn wait_for(&self, kind: EventKind, timeout: Duration) -> Option<ContainerEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if let Some(event) = events.iter().find(|e| e.kind == kind) {
                return Some(event.clone());
            }
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.iter().find(|e| e.kind == kind).cloned();
            }
        }
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ContainerListener for EventCollector {
    fn container_event(&self, event: &ContainerEvent) {
        self.events.lock().push(event.clone());
        self.arrived.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panics;

    impl ContainerListener for Panics {
        fn container_event(&self, _event: &ContainerEvent) {
            panic!("listener failure");
        }
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let dispatcher = EventDispatcher::default();
        let collector = EventCollector::new();
        dispatcher.add(Arc::new(Panics));
        dispatcher.add(collector.clone());
        dispatcher.dispatch(ContainerEvent::new(EventKind::Creating, "c"));
        assert_eq!(collector.kinds(), vec![EventKind::Creating]);
    }

    #[test]
    fn wait_for_returns_recorded_event() {
        let collector = EventCollector::new();
        let remote = collector.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.container_event(
                &ContainerEvent::new(EventKind::Created, "c").with_dependencies(vec!["x".into()]),
            );
        });
        let event = collector
            .wait_for(EventKind::Created, Duration::from_secs(5))
            .unwrap();
        assert_eq!(event.dependencies, vec!["x".to_string()]);
        assert!(collector
            .wait_for(EventKind::Failure, Duration::from_millis(10))
            .is_none());
        handle.join().unwrap();
    }
}
