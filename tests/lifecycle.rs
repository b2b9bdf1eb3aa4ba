use ferrous_blueprint::{
    Args, BeanMetadata, Blueprint, ClassDef, ClassRegistry, ComponentDefinitionRegistry,
    ComponentMetadata, Container, ContainerBuilder, CustomMetadata, DiError, DiResult,
    EventCollector, EventKind, Instance, LifecycleState, Metadata, NamespaceHandler,
    NamespaceHandlerRegistry, Pass, Properties, ProviderRegistry, ReferenceMetadata,
    ReferenceProxy, RegistryProcessor, ServiceRegistry, ServiceSource, TypeConverter, TypeSpec, Value,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

trait Db: Send + Sync {
    fn url(&self) -> String;
}

struct Postgres;

impl Db for Postgres {
    fn url(&self) -> String {
        "postgres://localhost".to_string()
    }
}

fn db_provider() -> ServiceSource {
    let db: Arc<dyn Db> = Arc::new(Postgres);
    ServiceSource::Value(Value::Object(Instance::from_arc(db)))
}

struct Repo {
    db: Arc<ReferenceProxy>,
}

fn repo_class() -> ClassDef {
    ClassDef::new("Repo").constructor([TypeSpec::named("Db")], |args: &Args| {
        Ok(Instance::new(Repo { db: args.object::<ReferenceProxy>(0)? }))
    })
}

fn db_blueprint() -> Blueprint {
    Blueprint::new()
        .with_component(ComponentMetadata::Reference(
            ReferenceMetadata::new("db", "Db").timeout_ms(1_000),
        ))
        .with_component(BeanMetadata::new("repo", "Repo").arg(Metadata::reference("db")))
}

fn builder(name: &str, registry: &Arc<dyn ProviderRegistry>, events: &Arc<EventCollector>) -> ContainerBuilder {
    Container::builder()
        .name(name)
        .registry(registry.clone())
        .listener(events.clone())
        .publish_container(false)
}

fn shared_registry() -> Arc<dyn ProviderRegistry> {
    Arc::new(ServiceRegistry::new())
}

// ===== Grace period =====

#[test]
fn test_two_pass_startup_waits_for_mandatory_reference() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let container = builder("two-pass", &registry, &events)
        .source(db_blueprint())
        .backend(ClassRegistry::new().with_class(repo_class()))
        .build()
        .unwrap();
    container.start().unwrap();

    let first = LifecycleState::WaitingForDependencies(Pass::First);
    assert!(container.wait_for_state(first, WAIT));
    let grace = events.wait_for(EventKind::GracePeriod, WAIT).unwrap();
    assert_eq!(grace.dependencies, vec!["(objectClass=Db)".to_string()]);
    assert_eq!(container.missing_dependencies(), vec!["(objectClass=Db)".to_string()]);
    assert_eq!(container.state(), first);

    registry.register(&["Db".to_string()], db_provider(), Properties::new()).unwrap();
    container.await_active(WAIT).unwrap();

    let repo = container.get::<Repo>("repo").unwrap();
    let url = repo.db.call(|db: &Arc<dyn Db>| db.url()).unwrap();
    assert_eq!(url, "postgres://localhost");
    assert!(container.missing_dependencies().is_empty());

    let kinds = events.kinds();
    assert_eq!(kinds.first(), Some(&EventKind::Creating));
    assert_eq!(kinds.last(), Some(&EventKind::Created));
    container.destroy();
}

#[test]
fn test_startup_timeout_fails_with_missing_filters() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let container = builder("timeout", &registry, &events)
        .source(db_blueprint())
        .backend(ClassRegistry::new().with_class(repo_class()))
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    container.start().unwrap();

    assert!(container.wait_for_state(LifecycleState::Failed, WAIT));
    match container.failure() {
        Some(DiError::StartupTimeout(missing)) => assert_eq!(missing, vec!["(objectClass=Db)"]),
        other => panic!("unexpected failure {other:?}"),
    }
    let failure = events.wait_for(EventKind::Failure, WAIT).unwrap();
    assert_eq!(failure.dependencies, vec!["(objectClass=Db)".to_string()]);
    assert!(matches!(container.create("repo"), Err(DiError::IllegalState(_))));

    // a provider arriving late does not revive the container
    registry.register(&["Db".to_string()], db_provider(), Properties::new()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(container.state(), LifecycleState::Failed);
    container.destroy();
}

#[test]
fn test_without_grace_period_activation_does_not_wait() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let blueprint = Blueprint::new()
        .with_component(ComponentMetadata::Reference(
            ReferenceMetadata::new("db", "Db").timeout_ms(50),
        ));
    let container = builder("impatient", &registry, &events)
        .source(blueprint)
        .grace_period(false)
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(WAIT).unwrap();

    assert!(!events.kinds().contains(&EventKind::GracePeriod));
    let proxy = container.get::<ReferenceProxy>("db").unwrap();
    let started = Instant::now();
    let result = proxy.call(|db: &Arc<dyn Db>| db.url());
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(matches!(result, Err(DiError::ServiceUnavailable { .. })));
    container.destroy();
}

#[test]
fn test_definition_errors_fail_the_container() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let blueprint = Blueprint::new()
        .with_component(BeanMetadata::new("orphan", "Repo").arg(Metadata::reference("missing")));
    let container = builder("broken", &registry, &events)
        .source(blueprint)
        .build()
        .unwrap();
    container.start().unwrap();

    let result = container.await_active(WAIT);
    assert!(matches!(result, Err(DiError::UnresolvedReference(name)) if name == "missing"));
    let failure = events.wait_for(EventKind::Failure, WAIT).unwrap();
    assert!(matches!(failure.cause, Some(DiError::UnresolvedReference(_))));
    container.destroy();
}

#[test]
fn test_failure_event_lists_unsatisfied_dependencies() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let blueprint = Blueprint::new()
        .with_component(ComponentMetadata::Reference(
            ReferenceMetadata::new("db", "Db").timeout_ms(50),
        ))
        .with_component(BeanMetadata::new("boom", "Boom"));
    let classes = ClassRegistry::new().with_class(
        ClassDef::new("Boom").constructor([], |_args: &Args| Err::<Instance, _>("no luck".into())),
    );
    let container = builder("boom", &registry, &events)
        .source(blueprint)
        .backend(classes)
        .grace_period(false)
        .build()
        .unwrap();
    container.start().unwrap();

    assert!(matches!(container.await_active(WAIT), Err(DiError::Construction { .. })));
    let failure = events.wait_for(EventKind::Failure, WAIT).unwrap();
    assert!(matches!(failure.cause, Some(DiError::Construction { .. })));
    assert_eq!(failure.dependencies, vec!["(objectClass=Db)".to_string()]);
    container.destroy();
}

#[test]
fn test_start_twice_is_rejected() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let container = builder("twice", &registry, &events).build().unwrap();
    container.start().unwrap();
    assert!(matches!(container.start(), Err(DiError::IllegalState(_))));
    container.await_active(WAIT).unwrap();
    container.destroy();
    assert!(container.start().is_err());
}

// ===== Namespace handlers =====

struct GreetingHandler;

impl NamespaceHandler for GreetingHandler {
    fn namespace(&self) -> &str {
        "urn:greetings"
    }

    fn parse(
        &self,
        element: &CustomMetadata,
        _registry: &ComponentDefinitionRegistry,
    ) -> DiResult<ComponentMetadata> {
        let id = element.id.clone().unwrap_or_default();
        let text = element.attributes.get("text").cloned().unwrap_or_default();
        Ok(BeanMetadata::new(id, "Text").arg(Metadata::value(text)).into())
    }
}

fn text_class() -> ClassDef {
    ClassDef::new("Text").constructor([TypeSpec::String], |args: &Args| {
        Ok(Instance::new(args.get::<String>(0)?))
    })
}

#[test]
fn test_container_waits_for_namespace_handler() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let handlers = Arc::new(NamespaceHandlerRegistry::new());
    let blueprint = Blueprint::new().with_component(
        CustomMetadata::new("hello", "urn:greetings", "greeting").attribute("text", "hi there"),
    );
    let container = builder("namespaces", &registry, &events)
        .source(blueprint)
        .backend(ClassRegistry::new().with_class(text_class()))
        .handlers(handlers.clone())
        .build()
        .unwrap();
    container.start().unwrap();

    let grace = events.wait_for(EventKind::GracePeriod, WAIT).unwrap();
    assert_eq!(grace.dependencies, vec!["urn:greetings".to_string()]);
    assert_eq!(container.state(), LifecycleState::WaitingForInfrastructure);

    handlers.register(Arc::new(GreetingHandler));
    container.await_active(WAIT).unwrap();
    assert_eq!(*container.get::<String>("hello").unwrap(), "hi there");

    // losing the handler tears the graph down until it comes back
    handlers.unregister("urn:greetings");
    assert!(container.wait_for_state(LifecycleState::WaitingForInfrastructure, WAIT));
    assert!(container.create("hello").is_err());

    handlers.register(Arc::new(GreetingHandler));
    container.await_active(WAIT).unwrap();
    assert_eq!(*container.get::<String>("hello").unwrap(), "hi there");
    container.destroy();
}

// ===== Registry processors =====

struct AddFarewell;

impl RegistryProcessor for AddFarewell {
    fn process(&self, registry: &mut ComponentDefinitionRegistry) -> DiResult<()> {
        registry.register(BeanMetadata::new("farewell", "Text").arg(Metadata::value("bye")))?;
        registry.replace(BeanMetadata::new("greeting", "Text").arg(Metadata::value("rewritten")))?;
        Ok(())
    }
}

#[test]
fn test_registry_processor_rewrites_definitions() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let classes = ClassRegistry::new()
        .with_class(text_class())
        .with_class(ClassDef::new("AddFarewell").constructor([], |_args: &Args| {
            let processor = Arc::new(AddFarewell);
            Ok(Instance::from_arc(processor.clone()).with_view(processor as Arc<dyn RegistryProcessor>))
        }));
    let blueprint = Blueprint::new()
        .with_component(BeanMetadata::new("processor", "AddFarewell").processor())
        .with_component(BeanMetadata::new("greeting", "Text").arg(Metadata::value("original")));
    let container = builder("processed", &registry, &events)
        .source(blueprint)
        .backend(classes)
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(WAIT).unwrap();

    assert!(container.component_ids().contains(&"farewell".to_string()));
    assert_eq!(*container.get::<String>("farewell").unwrap(), "bye");
    assert_eq!(*container.get::<String>("greeting").unwrap(), "rewritten");
    assert!(container.component_metadata("farewell").is_some());
    container.destroy();
}

#[test]
fn test_processor_without_processor_traits_fails() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let blueprint = Blueprint::new().with_component(BeanMetadata::new("fake", "Text").arg(Metadata::value("x")).processor());
    let container = builder("fake-processor", &registry, &events)
        .source(blueprint)
        .backend(ClassRegistry::new().with_class(text_class()))
        .build()
        .unwrap();
    container.start().unwrap();
    assert!(matches!(container.await_active(WAIT), Err(DiError::ComponentDefinition(_))));
}

// ===== Type converter components =====

struct Celsius(f64);

struct CelsiusConverter;

impl TypeConverter for CelsiusConverter {
    fn can_convert(&self, value: &Value, target: &TypeSpec) -> bool {
        value.as_str().is_some() && *target == TypeSpec::named("Celsius")
    }

    fn convert(&self, value: &Value, target: &TypeSpec) -> DiResult<Value> {
        let text = value.as_str().unwrap_or_default();
        let degrees = text
            .parse::<f64>()
            .map_err(|e| DiError::conversion(text, target, Some(e.to_string())))?;
        Ok(Value::Object(Instance::new(Celsius(degrees)).with_interface("Celsius")))
    }
}

struct Thermostat {
    target: Arc<Celsius>,
}

#[test]
fn test_type_converter_components_apply_to_the_graph() {
    let registry = shared_registry();
    let events = EventCollector::new();
    let classes = ClassRegistry::new()
        .with_class(ClassDef::new("CelsiusConverter").constructor([], |_args: &Args| {
            let converter = Arc::new(CelsiusConverter);
            Ok(Instance::from_arc(converter.clone()).with_view(converter as Arc<dyn TypeConverter>))
        }))
        .with_class(ClassDef::new("Thermostat").constructor(
            [TypeSpec::named("Celsius")],
            |args: &Args| Ok(Instance::new(Thermostat { target: args.object::<Celsius>(0)? })),
        ));
    let blueprint = Blueprint::new()
        .with_type_converter(BeanMetadata::new("celsius", "CelsiusConverter"))
        .with_component(BeanMetadata::new("thermostat", "Thermostat").arg(Metadata::value("21.5")));
    let container = builder("converters", &registry, &events)
        .source(blueprint)
        .backend(classes)
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(WAIT).unwrap();

    assert_eq!(container.get::<Thermostat>("thermostat").unwrap().target.0, 21.5);
    assert_eq!(container.converter().unwrap().converter_count(), 1);
    container.destroy();
}
