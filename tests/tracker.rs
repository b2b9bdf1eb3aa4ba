use ferrous_blueprint::filter::SERVICE_RANKING;
use ferrous_blueprint::{
    Binding, BindingListener, Cardinality, ConsumerId, Damping, DependencyTracker, Filter, Properties,
    ProviderRef, ProviderRegistry, SatisfactionListener, ServiceRegistration, ServiceRegistry,
    ServiceSource, TrackerSettings, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Flips(AtomicUsize);

impl Flips {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl SatisfactionListener for Flips {
    fn satisfaction_changed(&self, _tracker: &DependencyTracker) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Bindings(Mutex<Vec<String>>);

impl BindingListener for Bindings {
    fn bind(&self, provider: &ProviderRef, service: Option<&Value>) {
        let value = service.and_then(Value::as_i64).unwrap_or(-1);
        self.0.lock().unwrap().push(format!("bind:{}={value}", provider.id()));
    }

    fn unbind(&self, provider: &ProviderRef, _service: Option<&Value>) {
        self.0.lock().unwrap().push(format!("unbind:{}", provider.id()));
    }
}

fn registry() -> Arc<dyn ProviderRegistry> {
    Arc::new(ServiceRegistry::new())
}

fn tracker(registry: &Arc<dyn ProviderRegistry>, filter: Filter, settings: TrackerSettings) -> Arc<DependencyTracker> {
    DependencyTracker::new("db", filter, registry.clone(), ConsumerId::next(), settings)
}

fn start_with(tracker: &DependencyTracker, flips: &Arc<Flips>) {
    let weak: Weak<dyn SatisfactionListener> = Arc::downgrade(flips) as Weak<dyn SatisfactionListener>;
    tracker.start(Some(weak));
}

fn provide(registry: &Arc<dyn ProviderRegistry>, interface: &str, value: i64, properties: Properties) -> ServiceRegistration {
    registry
        .register(&[interface.to_string()], ServiceSource::Value(Value::from(value)), properties)
        .unwrap()
}

fn ranked(ranking: i64) -> Properties {
    let mut properties = Properties::new();
    properties.insert(SERVICE_RANKING.to_string(), Value::Int(ranking));
    properties
}

// ===== Satisfaction notifications =====

#[test]
fn test_mandatory_tracker_notifies_only_on_flips() {
    let registry = registry();
    let tracker = tracker(&registry, Filter::interface("Db"), TrackerSettings::default());
    let flips = Arc::new(Flips::default());
    start_with(&tracker, &flips);
    // the initial state is read, not reported
    assert_eq!(flips.count(), 0);
    assert!(!tracker.is_satisfied());

    let first = provide(&registry, "Db", 1, Properties::new());
    assert_eq!(flips.count(), 1);
    assert!(tracker.is_satisfied());

    provide(&registry, "Other", 9, Properties::new());
    let second = provide(&registry, "Db", 2, Properties::new());
    registry.unregister(&first);
    assert_eq!(flips.count(), 1);
    assert!(tracker.is_satisfied());

    registry.unregister(&second);
    assert_eq!(flips.count(), 2);
    assert!(!tracker.is_satisfied());
    tracker.stop();
}

#[test]
fn test_optional_tracker_reports_availability_flips() {
    let registry = registry();
    let settings = TrackerSettings { optional: true, ..Default::default() };
    let tracker = tracker(&registry, Filter::interface("Db"), settings);
    let flips = Arc::new(Flips::default());
    start_with(&tracker, &flips);
    assert!(tracker.is_satisfied());
    assert!(!tracker.is_available());

    let registration = provide(&registry, "Db", 1, Properties::new());
    assert!(tracker.is_available());
    registry.unregister(&registration);
    assert!(tracker.is_satisfied());
    assert!(!tracker.is_available());
    // one notification per availability flip, none for starting satisfied
    assert_eq!(flips.count(), 2);
    tracker.stop();
}

#[test]
fn test_starting_with_a_provider_is_silent() {
    let registry = registry();
    provide(&registry, "Db", 1, Properties::new());
    let tracker = tracker(&registry, Filter::interface("Db"), TrackerSettings::default());
    let flips = Arc::new(Flips::default());
    start_with(&tracker, &flips);

    assert!(tracker.is_satisfied());
    assert!(tracker.is_available());
    assert_eq!(flips.count(), 0);
    tracker.stop();
}

#[test]
fn test_property_change_out_of_filter_unbinds() {
    let registry = registry();
    let filter: Filter = "(&(objectClass=Db)(region=eu))".parse().unwrap();
    let tracker = tracker(&registry, filter, TrackerSettings::default());
    tracker.start(None);

    let mut eu = Properties::new();
    eu.insert("region".to_string(), Value::str("eu"));
    let registration = provide(&registry, "Db", 1, eu);
    assert_eq!(tracker.bound().map(|p| p.id()), Some(registration.id()));

    let mut us = Properties::new();
    us.insert("region".to_string(), Value::str("us"));
    assert!(registry.set_properties(&registration, us));
    assert!(tracker.bound().is_none());
    assert!(!tracker.is_satisfied());
    tracker.stop();
}

// ===== Binding =====

#[test]
fn test_greedy_follows_ranking_changes() {
    let registry = registry();
    let greedy = TrackerSettings { damping: Damping::Greedy, ..Default::default() };
    let tracker = tracker(&registry, Filter::interface("Db"), greedy);
    tracker.start(None);

    let a = provide(&registry, "Db", 1, ranked(1));
    let b = provide(&registry, "Db", 2, ranked(0));
    assert_eq!(tracker.bound().map(|p| p.id()), Some(a.id()));

    // raising b above a moves the binding
    assert!(registry.set_properties(&b, ranked(10)));
    assert_eq!(tracker.bound().map(|p| p.id()), Some(b.id()));
    tracker.stop();
}

#[test]
fn test_equal_ranking_prefers_oldest_provider() {
    let registry = registry();
    let first = provide(&registry, "Db", 1, ranked(3));
    provide(&registry, "Db", 2, ranked(3));
    let tracker = tracker(&registry, Filter::interface("Db"), TrackerSettings::default());
    tracker.start(None);
    assert_eq!(tracker.bound().map(|p| p.id()), Some(first.id()));
    assert_eq!(tracker.providers().len(), 2);
    tracker.stop();
}

#[test]
fn test_binding_listener_sees_replay_and_changes() {
    let registry = registry();
    let existing = provide(&registry, "Db", 7, Properties::new());
    let settings = TrackerSettings { cardinality: Cardinality::Multiple, ..Default::default() };
    let tracker = tracker(&registry, Filter::interface("Db"), settings);
    tracker.start(None);

    let bindings = Arc::new(Bindings::default());
    tracker.add_binding_listener(bindings.clone());
    let added = provide(&registry, "Db", 8, Properties::new());
    registry.unregister(&existing);
    tracker.stop();

    assert_eq!(
        *bindings.0.lock().unwrap(),
        vec![
            format!("bind:{}=7", existing.id()),
            format!("bind:{}=8", added.id()),
            format!("unbind:{}", existing.id()),
            format!("unbind:{}", added.id()),
        ]
    );
}

// ===== Waiting =====

#[test]
fn test_provider_arriving_before_deadline_is_returned() {
    let registry = registry();
    let tracker = tracker(&registry, Filter::interface("Db"), TrackerSettings::default());
    tracker.start(None);

    let late = {
        let registry = registry.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            provide(&registry, "Db", 1, Properties::new())
        })
    };
    let started = Instant::now();
    let binding = tracker.wait_for_binding(Duration::from_secs(5));
    let registration = late.join().unwrap();
    assert!(matches!(binding, Binding::Bound(ref p) if p.id() == registration.id()));
    assert!(started.elapsed() < Duration::from_secs(5));
    tracker.stop();
}

#[test]
fn test_wait_times_out_without_provider() {
    let registry = registry();
    let tracker = tracker(&registry, Filter::interface("Db"), TrackerSettings::default());
    tracker.start(None);

    let started = Instant::now();
    assert!(matches!(tracker.wait_for_binding(Duration::from_millis(80)), Binding::TimedOut));
    assert!(started.elapsed() >= Duration::from_millis(80));
    tracker.stop();
}
