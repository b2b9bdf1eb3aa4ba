use ferrous_blueprint::{
    Args, BeanMetadata, Blueprint, ClassDef, ClassRegistry, Container, DiError, Instance,
    LifecycleState, Metadata, TypeSpec, Value, WeakContainer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Node {
    parts: Vec<Value>,
}

fn classes(created: Arc<AtomicUsize>) -> ClassRegistry {
    let unary = created.clone();
    ClassRegistry::new()
        .with_class(ClassDef::new("Leaf").constructor([], move |_args: &Args| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Instance::new(Node { parts: Vec::new() }))
        }))
        .with_class(
            ClassDef::new("Node")
                .constructor([TypeSpec::Any], move |args: &Args| {
                    unary.fetch_add(1, Ordering::SeqCst);
                    Ok(Instance::new(Node { parts: args.clone().into_inner() }))
                })
                .constructor([TypeSpec::Any, TypeSpec::Any], |args: &Args| {
                    Ok(Instance::new(Node { parts: args.clone().into_inner() }))
                }),
        )
}

fn start(blueprint: Blueprint, created: Arc<AtomicUsize>) -> Container {
    let container = Container::builder()
        .name("circular")
        .source(blueprint)
        .backend(classes(created))
        .publish_container(false)
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(Duration::from_secs(5)).unwrap();
    container
}

fn node(id: &str, refs: &[&str]) -> BeanMetadata {
    refs.iter()
        .fold(BeanMetadata::new(id, "Node").lazy(), |bean, r| bean.arg(Metadata::reference(*r)))
}

fn cycle_path(result: Result<Value, DiError>) -> Vec<String> {
    match result {
        Err(DiError::Circular(path)) => path,
        Err(other) => panic!("expected a cycle, got {other}"),
        Ok(_) => panic!("expected a cycle, got a value"),
    }
}

// ===== Cycle detection =====

#[test]
fn test_two_component_cycle_reports_path() {
    let blueprint = Blueprint::new()
        .with_component(node("a", &["b"]))
        .with_component(node("b", &["a"]));
    let container = start(blueprint, Arc::new(AtomicUsize::new(0)));

    assert_eq!(cycle_path(container.create("a")), vec!["a", "b", "a"]);
    assert_eq!(cycle_path(container.create("b")), vec!["b", "a", "b"]);
    container.destroy();
}

#[test]
fn test_self_reference_is_a_cycle() {
    let blueprint = Blueprint::new().with_component(node("me", &["me"]));
    let container = start(blueprint, Arc::new(AtomicUsize::new(0)));

    assert_eq!(cycle_path(container.create("me")), vec!["me", "me"]);
    container.destroy();
}

#[test]
fn test_cycle_through_inline_bean_skips_anonymous_steps() {
    let inner = BeanMetadata::anonymous("Node").arg(Metadata::reference("outer"));
    let blueprint = Blueprint::new()
        .with_component(BeanMetadata::new("outer", "Node").lazy().arg(Metadata::bean(inner)));
    let container = start(blueprint, Arc::new(AtomicUsize::new(0)));

    assert_eq!(cycle_path(container.create("outer")), vec!["outer", "outer"]);
    container.destroy();
}

#[test]
fn test_long_cycle_keeps_declaration_path() {
    let blueprint = Blueprint::new()
        .with_component(node("a", &["b"]))
        .with_component(node("b", &["c"]))
        .with_component(node("c", &["d"]))
        .with_component(node("d", &["b"]));
    let container = start(blueprint, Arc::new(AtomicUsize::new(0)));

    // the path starts where the cycle closes, not at the requested component
    assert_eq!(cycle_path(container.create("a")), vec!["b", "c", "d", "b"]);
    container.destroy();
}

#[test]
fn test_constructor_calling_back_into_the_container_is_a_cycle() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let classes = classes(Arc::new(AtomicUsize::new(0))).with_class(
        ClassDef::new("Selfish").constructor([TypeSpec::Any], move |args: &Args| {
            // bounded so a missed cycle fails the test instead of overflowing the stack
            if counted.fetch_add(1, Ordering::SeqCst) > 10 {
                return Err("constructor re-entered without a cycle error".into());
            }
            let container = args.object::<WeakContainer>(0)?.upgrade().ok_or("container dropped")?;
            container.create("a")?;
            Ok(Instance::new(()))
        }),
    );
    let blueprint = Blueprint::new().with_component(
        BeanMetadata::new("a", "Selfish")
            .lazy()
            .arg(Metadata::reference("container")),
    );
    let container = Container::builder()
        .name("reentrant")
        .source(blueprint)
        .backend(classes)
        .publish_container(false)
        .build()
        .unwrap();
    container.start().unwrap();
    container.await_active(Duration::from_secs(5)).unwrap();

    match container.create("a") {
        Err(DiError::Construction { name, source }) => {
            assert_eq!(name, "a");
            let cause = source.downcast_ref::<DiError>().map(ToString::to_string);
            assert_eq!(cause.as_deref(), Some("Circular dependency: a -> a"));
        }
        Err(other) => panic!("expected a construction error wrapping the cycle, got {other}"),
        Ok(_) => panic!("expected a cycle, got a value"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(container.state(), LifecycleState::Active);
    container.destroy();
}

// ===== Non-cyclic graphs =====

#[test]
fn test_diamond_creates_shared_dependency_once() {
    let created = Arc::new(AtomicUsize::new(0));
    let blueprint = Blueprint::new()
        .with_component(node("top", &["left", "right"]))
        .with_component(node("left", &["bottom"]))
        .with_component(node("right", &["bottom"]))
        .with_component(BeanMetadata::new("bottom", "Leaf").lazy());
    let container = start(blueprint, created.clone());

    let top = container.get::<Node>("top").unwrap();
    assert_eq!(top.parts.len(), 2);
    let left = top.parts[0].downcast::<Node>().unwrap();
    let right = top.parts[1].downcast::<Node>().unwrap();
    let (a, b) = (left.parts[0].as_instance().unwrap(), right.parts[0].as_instance().unwrap());
    assert!(a.ptr_eq(b));
    // one leaf plus the two unary nodes
    assert_eq!(created.load(Ordering::SeqCst), 3);
    container.destroy();
}

#[test]
fn test_cycle_does_not_poison_the_container() {
    let blueprint = Blueprint::new()
        .with_component(node("a", &["b"]))
        .with_component(node("b", &["a"]))
        .with_component(BeanMetadata::new("fine", "Leaf").lazy());
    let container = start(blueprint, Arc::new(AtomicUsize::new(0)));

    assert!(container.create("a").is_err());
    assert!(container.create("fine").is_ok());
    assert_eq!(container.state(), LifecycleState::Active);
    container.destroy();
}

#[test]
fn test_eager_cycle_fails_activation() {
    let blueprint = Blueprint::new()
        .with_component(BeanMetadata::new("a", "Node").arg(Metadata::reference("b")))
        .with_component(BeanMetadata::new("b", "Node").arg(Metadata::reference("a")));
    let container = Container::builder()
        .name("eager-cycle")
        .source(blueprint)
        .backend(classes(Arc::new(AtomicUsize::new(0))))
        .publish_container(false)
        .build()
        .unwrap();
    container.start().unwrap();

    let result = container.await_active(Duration::from_secs(5));
    assert!(matches!(result, Err(DiError::Circular(_))));
    assert_eq!(container.state(), LifecycleState::Failed);
    container.destroy();
}
