use ferrous_blueprint::{
    Args, BeanMetadata, BeanProcessor, Blueprint, ClassDef, ClassRegistry, Container, DiResult,
    EventCollector, EventKind, Instance, LifecycleState, Metadata, Scope, TypeSpec, Value,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Log = Arc<Mutex<Vec<String>>>;

struct Resource;

/// A class whose destroy method records the component's label.
fn resource_class(log: Log) -> ClassDef {
    ClassDef::new("Resource")
        .constructor([TypeSpec::String], |args: &Args| {
            let label = args.get::<String>(0)?;
            Ok(Instance::new(label))
        })
        .constructor([TypeSpec::String, TypeSpec::Any], |args: &Args| {
            let label = args.get::<String>(0)?;
            Ok(Instance::new(label))
        })
        .method("close", [], move |target: &Instance, _args: &Args| {
            let label = target.downcast::<String>().ok_or("not a resource")?;
            log.lock().unwrap().push(label.to_string());
            Ok(Value::Null)
        })
}

fn start(blueprint: Blueprint, classes: ClassRegistry) -> (Container, Arc<EventCollector>) {
    let events = EventCollector::new();
    let container = Container::builder()
        .name("disposal")
        .source(blueprint)
        .backend(classes)
        .publish_container(false)
        .listener(events.clone())
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(Duration::from_secs(5)).unwrap();
    (container, events)
}

// ===== Teardown order =====

#[test]
fn test_destroy_runs_in_reverse_creation_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let bean = |id: &str, after: Option<&str>| {
        let bean = BeanMetadata::new(id, "Resource")
            .arg(Metadata::value(id))
            .destroy_method("close");
        match after {
            Some(dep) => bean.arg(Metadata::reference(dep)),
            None => bean,
        }
    };
    let blueprint = Blueprint::new()
        .with_component(bean("c", Some("b")))
        .with_component(bean("b", Some("a")))
        .with_component(bean("a", None));
    let (container, _) = start(blueprint, ClassRegistry::new().with_class(resource_class(log.clone())));

    assert!(log.lock().unwrap().is_empty());
    container.destroy();
    assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
}

#[test]
fn test_prototypes_are_not_destroyed() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let blueprint = Blueprint::new()
        .with_component(
            BeanMetadata::new("each", "Resource")
                .arg(Metadata::value("each"))
                .scope(Scope::Prototype)
                .destroy_method("close"),
        )
        .with_component(
            BeanMetadata::new("once", "Resource")
                .arg(Metadata::value("once"))
                .destroy_method("close"),
        );
    let (container, _) = start(blueprint, ClassRegistry::new().with_class(resource_class(log.clone())));

    container.create("each").unwrap();
    container.create("each").unwrap();
    container.destroy();
    assert_eq!(*log.lock().unwrap(), vec!["once"]);
}

#[test]
fn test_failing_destroy_method_does_not_stop_teardown() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let classes = ClassRegistry::new()
        .with_class(resource_class(log.clone()))
        .with_class(
            ClassDef::new("Stubborn")
                .constructor([], |_args: &Args| Ok(Instance::new(Resource)))
                .method("close", [], |_target: &Instance, _args: &Args| {
                    Err::<Value, _>("cannot close".into())
                }),
        );
    let blueprint = Blueprint::new()
        .with_component(
            BeanMetadata::new("first", "Resource")
                .arg(Metadata::value("first"))
                .destroy_method("close"),
        )
        .with_component(BeanMetadata::new("stubborn", "Stubborn").destroy_method("close"));
    let (container, _) = start(blueprint, classes);

    container.destroy();
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
}

// ===== Bean processors =====

struct Audit {
    log: Log,
}

impl BeanProcessor for Audit {
    fn before_init(&self, name: &str, _bean: &Value) -> DiResult<()> {
        self.log.lock().unwrap().push(format!("before_init:{name}"));
        Ok(())
    }

    fn after_init(&self, name: &str, _bean: &Value) -> DiResult<()> {
        self.log.lock().unwrap().push(format!("after_init:{name}"));
        Ok(())
    }

    fn before_destroy(&self, name: &str, _bean: &Value) {
        self.log.lock().unwrap().push(format!("before_destroy:{name}"));
    }

    fn after_destroy(&self, name: &str) {
        self.log.lock().unwrap().push(format!("after_destroy:{name}"));
    }
}

#[test]
fn test_bean_processor_wraps_init_and_destroy() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let audit_log = log.clone();
    let classes = ClassRegistry::new()
        .with_class(ClassDef::new("Audit").constructor([], move |_args: &Args| {
            let audit = Arc::new(Audit { log: audit_log.clone() });
            Ok(Instance::from_arc(audit.clone()).with_view(audit as Arc<dyn BeanProcessor>))
        }))
        .with_class(ClassDef::new("Plain").constructor([], |_args: &Args| Ok(Instance::new(Resource))));
    let blueprint = Blueprint::new()
        .with_component(BeanMetadata::new("audit", "Audit").processor())
        .with_component(BeanMetadata::new("plain", "Plain"));
    let (container, _) = start(blueprint, classes);

    // the processor was created before it was registered, so it never saw itself
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before_init:plain".to_string(), "after_init:plain".to_string()]
    );

    container.destroy();
    let log = log.lock().unwrap();
    assert_eq!(log[2..4], ["before_destroy:plain", "after_destroy:plain"]);
}

// ===== Idempotence =====

#[test]
fn test_destroy_is_idempotent() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let blueprint = Blueprint::new().with_component(
        BeanMetadata::new("only", "Resource")
            .arg(Metadata::value("only"))
            .destroy_method("close"),
    );
    let (container, events) = start(blueprint, ClassRegistry::new().with_class(resource_class(log.clone())));

    container.destroy();
    container.destroy();
    assert_eq!(container.state(), LifecycleState::Destroyed);
    assert_eq!(*log.lock().unwrap(), vec!["only"]);

    let kinds = events.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Destroying).count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::Destroyed).count(), 1);
    assert!(container.create("only").is_err());
}

#[test]
fn test_dropping_the_last_handle_tears_down() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let blueprint = Blueprint::new().with_component(
        BeanMetadata::new("dropped", "Resource")
            .arg(Metadata::value("dropped"))
            .destroy_method("close"),
    );
    let (container, _) = start(blueprint, ClassRegistry::new().with_class(resource_class(log.clone())));

    drop(container);
    // the lifecycle thread may still hold the container for a moment
    let deadline = Instant::now() + Duration::from_secs(5);
    while log.lock().unwrap().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*log.lock().unwrap(), vec!["dropped"]);
}
