//! The repository: build plans by name plus the cache of created singletons.
//!
//! Every creation request runs under one reentrant instance lock, so a
//! singleton is created at most once even when several threads ask for it,
//! and nobody observes a singleton before its init hook ran. Teardown walks
//! the creation order backwards, so a component is destroyed before the
//! components it was built from.

mod context;
mod matching;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, RwLock};
use tracing::{debug, warn};

use crate::backend::{Args, ConstructionBackend, Signature};
use crate::convert::Converter;
use crate::error::{DiError, DiResult};
use crate::plan::{BuildPlan, PlanKind};
use crate::processor::BeanProcessor;
use crate::publisher::ConditionalPublisher;
use crate::registry::ProviderRef;
use crate::tracker::{BindingListener, DependencyTracker};
use crate::types::TypeSpec;
use crate::value::{Properties, Value};

pub use context::PUBLICATION_CLASS;

use context::{ExecutionContext, InFlight};

pub struct Repository {
    me: Weak<Repository>,
    plans: RwLock<HashMap<String, Arc<BuildPlan>>>,
    order: RwLock<Vec<String>>,
    instances: RwLock<HashMap<String, Value>>,
    creation_order: Mutex<Vec<String>>,
    instance_lock: ReentrantMutex<()>,
    in_flight: Mutex<InFlight>,
    converter: Arc<Converter>,
    backend: Arc<dyn ConstructionBackend>,
    processors: RwLock<Vec<Arc<dyn BeanProcessor>>>,
}

impl Repository {
    pub fn new(converter: Arc<Converter>, backend: Arc<dyn ConstructionBackend>) -> Arc<Self> {
        Arc::new_cyclic(|me| Repository {
            me: me.clone(),
            plans: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            instances: RwLock::new(HashMap::new()),
            creation_order: Mutex::new(Vec::new()),
            instance_lock: ReentrantMutex::new(()),
            in_flight: Mutex::new(InFlight::default()),
            converter,
            backend,
            processors: RwLock::new(Vec::new()),
        })
    }

    pub(crate) fn downgrade(&self) -> Weak<Repository> {
        self.me.clone()
    }

    pub fn converter(&self) -> &Arc<Converter> {
        &self.converter
    }

    pub fn backend(&self) -> &Arc<dyn ConstructionBackend> {
        &self.backend
    }

    /// Adds a plan under a new name.
    pub fn add_plan(&self, plan: Arc<BuildPlan>) -> DiResult<()> {
        let mut plans = self.plans.write();
        if plans.contains_key(&plan.name) {
            return Err(DiError::definition(format!(
                "name '{}' is already registered",
                plan.name
            )));
        }
        self.order.write().push(plan.name.clone());
        plans.insert(plan.name.clone(), plan);
        Ok(())
    }

    /// Adds or replaces a plan whose component has not been created yet.
    pub fn put_plan(&self, plan: Arc<BuildPlan>) -> DiResult<()> {
        if self.is_instantiated(&plan.name) {
            return Err(DiError::IllegalState(format!(
                "component '{}' is already instantiated",
                plan.name
            )));
        }
        let mut plans = self.plans.write();
        if plans.insert(plan.name.clone(), plan.clone()).is_none() {
            self.order.write().push(plan.name.clone());
        }
        Ok(())
    }

    /// Removes a plan whose component has not been created yet.
    pub fn remove_plan(&self, name: &str) -> DiResult<Option<Arc<BuildPlan>>> {
        if self.is_instantiated(name) {
            return Err(DiError::IllegalState(format!(
                "component '{name}' is already instantiated"
            )));
        }
        let removed = self.plans.write().remove(name);
        if removed.is_some() {
            self.order.write().retain(|n| n != name);
        }
        Ok(removed)
    }

    pub fn plan(&self, name: &str) -> Option<Arc<BuildPlan>> {
        self.plans.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plans.read().contains_key(name)
    }

    /// Plan names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Cached singleton, if created.
    pub fn instance(&self, name: &str) -> Option<Value> {
        self.instances.read().get(name).cloned()
    }

    pub fn is_instantiated(&self, name: &str) -> bool {
        self.instances.read().contains_key(name)
    }

    /// Names of created singletons, oldest first.
    pub fn creation_order(&self) -> Vec<String> {
        self.creation_order.lock().clone()
    }

    pub fn add_processor(&self, processor: Arc<dyn BeanProcessor>) {
        self.processors.write().push(processor);
    }

    pub(crate) fn processors(&self) -> Vec<Arc<dyn BeanProcessor>> {
        self.processors.read().clone()
    }

    pub(crate) fn store(&self, name: &str, value: Value) {
        self.instances.write().insert(name.to_string(), value);
        self.creation_order.lock().push(name.to_string());
    }

    fn in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock()
    }

    /// Cached singleton, or one staged by a request still running on this thread.
    fn cached(&self, name: &str) -> Option<Value> {
        self.instance(name).or_else(|| self.in_flight().staged(name))
    }

    /// Creates (or returns the cached) component `name`.
    pub fn create(&self, name: &str) -> DiResult<Value> {
        if let Some(value) = self.instance(name) {
            return Ok(value);
        }
        let plan = self
            .plan(name)
            .ok_or_else(|| DiError::NoSuchComponent(name.to_string()))?;
        self.create_plan(&plan)
    }

    /// Creates several components in one request.
    pub fn create_all(&self, names: &[String]) -> DiResult<HashMap<String, Value>> {
        let _guard = self.instance_lock.lock();
        let mut context = ExecutionContext::new(self);
        let mut created = HashMap::with_capacity(names.len());
        for name in names {
            let result = self
                .plan(name)
                .ok_or_else(|| DiError::NoSuchComponent(name.clone()))
                .and_then(|plan| context.create(&plan));
            match result {
                Ok(value) => {
                    created.insert(name.clone(), value);
                }
                Err(e) => {
                    context.abandon();
                    return Err(e);
                }
            }
        }
        context.finish()?;
        Ok(created)
    }

    /// Evaluates an arbitrary plan as one request.
    pub fn create_plan(&self, plan: &Arc<BuildPlan>) -> DiResult<Value> {
        let _guard = self.instance_lock.lock();
        let mut context = ExecutionContext::new(self);
        match context.create(plan) {
            Ok(value) => {
                context.finish()?;
                Ok(value)
            }
            Err(e) => {
                context.abandon();
                Err(e)
            }
        }
    }

    /// Checks every `ref`/`idref` target exists and every publication
    /// publishes something publishable.
    pub fn validate(&self) -> DiResult<()> {
        let plans: Vec<Arc<BuildPlan>> = self.plans.read().values().cloned().collect();
        for plan in plans {
            let mut failure = None;
            plan.walk(&mut |node| {
                if failure.is_some() {
                    return;
                }
                match &node.kind {
                    PlanKind::Ref(name) | PlanKind::IdRef(name) if !self.contains(name) => {
                        failure = Some(DiError::UnresolvedReference(name.clone()));
                    }
                    PlanKind::Service(publisher) => {
                        let target = self.resolve(publisher.service_plan());
                        let publishable = match &target.kind {
                            PlanKind::Service(_) => false,
                            PlanKind::Reference(r) => !r.tracker.is_multiple(),
                            _ => true,
                        };
                        if !publishable {
                            failure = Some(DiError::definition(format!(
                                "service '{}' cannot publish a {}",
                                publisher.name(),
                                target.kind_name()
                            )));
                        }
                    }
                    _ => {}
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }
        Ok(())
    }

    fn resolve(&self, plan: &Arc<BuildPlan>) -> Arc<BuildPlan> {
        match &plan.kind {
            PlanKind::Ref(name) => self.plan(name).unwrap_or_else(|| plan.clone()),
            _ => plan.clone(),
        }
    }

    /// Trackers reachable from `name`, following `ref`s transitively.
    pub fn trackers(&self, name: &str) -> Vec<Arc<DependencyTracker>> {
        match self.plan(name) {
            Some(plan) => self.plan_trackers(&plan),
            None => Vec::new(),
        }
    }

    /// Trackers reachable from an arbitrary plan.
    pub fn plan_trackers(&self, plan: &BuildPlan) -> Vec<Arc<DependencyTracker>> {
        let mut visited = HashSet::from([plan.name.clone()]);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_trackers(plan, &mut visited, &mut seen, &mut out);
        out
    }

    fn collect_trackers(
        &self,
        plan: &BuildPlan,
        visited: &mut HashSet<String>,
        seen: &mut HashSet<*const DependencyTracker>,
        out: &mut Vec<Arc<DependencyTracker>>,
    ) {
        let mut referenced = Vec::new();
        plan.walk(&mut |node| match &node.kind {
            PlanKind::Reference(reference) => {
                if seen.insert(Arc::as_ptr(&reference.tracker)) {
                    out.push(reference.tracker.clone());
                }
            }
            PlanKind::Ref(name) => referenced.push(name.clone()),
            _ => {}
        });
        for name in referenced {
            if visited.insert(name.clone()) {
                if let Some(target) = self.plan(&name) {
                    self.collect_trackers(&target, visited, seen, out);
                }
            }
        }
    }

    /// For every plan with dependencies, the trackers it transitively needs.
    pub fn satisfiables(&self) -> BTreeMap<String, Vec<Arc<DependencyTracker>>> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let trackers = self.trackers(&name);
                (!trackers.is_empty()).then_some((name, trackers))
            })
            .collect()
    }

    /// Every tracker owned by any plan, deduplicated.
    pub fn all_trackers(&self) -> Vec<Arc<DependencyTracker>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in self.names() {
            if let Some(plan) = self.plan(&name) {
                for tracker in plan.own_trackers() {
                    if seen.insert(Arc::as_ptr(&tracker)) {
                        out.push(tracker);
                    }
                }
            }
        }
        out
    }

    /// Every publication declared anywhere in the graph.
    pub fn publishers(&self) -> Vec<Arc<ConditionalPublisher>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in self.names() {
            if let Some(plan) = self.plan(&name) {
                plan.walk(&mut |node| {
                    if let PlanKind::Service(publisher) = &node.kind {
                        if seen.insert(Arc::as_ptr(publisher)) {
                            out.push(publisher.clone());
                        }
                    }
                });
            }
        }
        out
    }

    /// Attaches every publication to this repository and gates it on the
    /// trackers its published component needs.
    pub fn bind_publishers(&self) -> Vec<Arc<ConditionalPublisher>> {
        let publishers = self.publishers();
        for publisher in &publishers {
            publisher.set_trackers(self.plan_trackers(publisher.service_plan()));
            publisher.attach(self.downgrade());
        }
        publishers
    }

    /// Destroys every created singleton, newest first, and empties the cache.
    pub fn destroy(&self) {
        let _guard = self.instance_lock.lock();
        let order = std::mem::take(&mut *self.creation_order.lock());
        let mut instances = std::mem::take(&mut *self.instances.write());
        for name in order.iter().rev() {
            let Some(value) = instances.remove(name) else {
                continue;
            };
            if let Some(plan) = self.plan(name) {
                self.destroy_instance(&plan, &value);
            }
        }
        debug!(destroyed = order.len(), "repository destroyed");
    }

    /// Destroys a value produced by `plan` outside the singleton cache.
    pub(crate) fn destroy_value(&self, plan: &Arc<BuildPlan>, value: &Value) {
        let target = self.resolve(plan);
        if target.is_cached() {
            return;
        }
        self.destroy_instance(&target, value);
    }

    fn destroy_instance(&self, plan: &BuildPlan, value: &Value) {
        match &plan.kind {
            PlanKind::Bean(bean) => {
                let processors = self.processors();
                for processor in &processors {
                    processor.before_destroy(&plan.name, value);
                }
                if let Some(method) = &bean.destroy_method {
                    if let Err(e) = self.invoke_no_args(&plan.name, value, method) {
                        warn!(component = %plan.name, method = %method, error = %e, "destroy method failed");
                    }
                }
                for processor in &processors {
                    processor.after_destroy(&plan.name);
                }
            }
            PlanKind::Service(publisher) => publisher.destroy(),
            _ => {}
        }
    }

    pub(crate) fn invoke_no_args(&self, name: &str, target: &Value, method: &str) -> DiResult<()> {
        let index = self
            .backend
            .methods(target, method)
            .iter()
            .position(|sig| sig.arity() == 0)
            .ok_or_else(|| {
                DiError::definition(format!(
                    "no method '{method}' without arguments on component '{name}'"
                ))
            })?;
        self.backend
            .invoke(target, method, index, Args::default())
            .map(|_| ())
            .map_err(|e| DiError::construction(name, e))
    }

    /// Calls a listener method, choosing the signature by arity: service and
    /// properties, then properties or service alone, then no arguments.
    pub(crate) fn invoke_callback(
        &self,
        target: &Value,
        method: &str,
        service: Option<&Value>,
        properties: &Properties,
    ) -> DiResult<()> {
        let signatures = self.backend.methods(target, method);
        if signatures.is_empty() {
            return Err(DiError::definition(format!(
                "no callback method '{method}' on {target:?}"
            )));
        }
        let props = Value::from_properties(properties);
        let mut candidates: Vec<(usize, &Signature)> = signatures.iter().enumerate().collect();
        candidates.sort_by_key(|(_, sig)| std::cmp::Reverse(sig.arity()));
        for (index, signature) in candidates {
            if let Some(args) = self.callback_args(signature, service, &props) {
                return self
                    .backend
                    .invoke(target, method, index, Args::new(args))
                    .map(|_| ())
                    .map_err(|e| DiError::construction(method, e));
            }
        }
        Err(DiError::definition(format!(
            "no applicable signature for callback method '{method}'"
        )))
    }

    fn callback_args(
        &self,
        signature: &Signature,
        service: Option<&Value>,
        props: &Value,
    ) -> Option<Vec<Value>> {
        let convert = |value: &Value, ty: &TypeSpec| self.converter.convert(value, ty).ok();
        match signature.params.as_slice() {
            [] => Some(Vec::new()),
            [ty @ (TypeSpec::Properties | TypeSpec::Map(_, _))] => Some(vec![convert(props, ty)?]),
            [ty] => Some(vec![convert(service?, ty)?]),
            [service_ty, props_ty] => Some(vec![convert(service?, service_ty)?, convert(props, props_ty)?]),
            _ => None,
        }
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("plans", &self.names())
            .field("instances", &self.creation_order())
            .finish()
    }
}

/// Binding listener calling named methods on a component.
pub(crate) struct MethodListener {
    repository: Weak<Repository>,
    reference: String,
    target: Value,
    bind_method: Option<String>,
    unbind_method: Option<String>,
}

impl MethodListener {
    pub(crate) fn new(
        repository: Weak<Repository>,
        reference: String,
        target: Value,
        bind_method: Option<String>,
        unbind_method: Option<String>,
    ) -> Self {
        MethodListener {
            repository,
            reference,
            target,
            bind_method,
            unbind_method,
        }
    }

    fn call(&self, method: Option<&String>, provider: &ProviderRef, service: Option<&Value>) {
        let (Some(method), Some(repository)) = (method, self.repository.upgrade()) else {
            return;
        };
        if let Err(e) = repository.invoke_callback(&self.target, method, service, provider.properties()) {
            warn!(reference = %self.reference, method = %method, error = %e, "binding listener failed");
        }
    }
}

impl BindingListener for MethodListener {
    fn bind(&self, provider: &ProviderRef, service: Option<&Value>) {
        self.call(self.bind_method.as_ref(), provider, service);
    }

    fn unbind(&self, provider: &ProviderRef, service: Option<&Value>) {
        self.call(self.unbind_method.as_ref(), provider, service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ClassDef, ClassRegistry};
    use crate::plan::{ArgumentPlan, BeanPlan};
    use std::sync::atomic::AtomicUsize;

    #[allow(dead_code)]
    struct Counter(AtomicUsize);

    fn bean(name: &str, class: &str, arguments: Vec<Arc<BuildPlan>>) -> Arc<BuildPlan> {
        Arc::new(BuildPlan::new(
            name,
            PlanKind::Bean(BeanPlan {
                class: Some(class.into()),
                factory: None,
                factory_method: None,
                arguments: arguments
                    .into_iter()
                    .map(|plan| ArgumentPlan {
                        index: None,
                        ty: None,
                        plan,
                    })
                    .collect(),
                properties: Vec::new(),
                init_method: None,
                destroy_method: None,
            }),
        ))
    }

    fn reference(name: &str) -> Arc<BuildPlan> {
        let mut plan = BuildPlan::new(format!("#ref-{name}"), PlanKind::Ref(name.into()));
        plan.anonymous = true;
        Arc::new(plan)
    }

    fn repository() -> Arc<Repository> {
        let classes = ClassRegistry::new()
            .with_class(ClassDef::new("Counter").constructor([], |_args: &Args| {
                Ok(crate::value::Instance::new(Counter(AtomicUsize::new(0))))
            }))
            .with_class(ClassDef::new("Pair").constructor(
                [TypeSpec::Any, TypeSpec::Any],
                |args: &Args| Ok(Value::List(args.clone().into_inner())),
            ));
        Repository::new(Arc::new(Converter::new()), Arc::new(classes))
    }

    #[test]
    fn singletons_are_created_once() {
        let repo = repository();
        repo.add_plan(bean("c", "Counter", vec![])).unwrap();
        let first = repo.create("c").unwrap();
        let second = repo.create("c").unwrap();
        assert!(first.as_instance().unwrap().ptr_eq(second.as_instance().unwrap()));
        assert_eq!(repo.creation_order(), vec!["c".to_string()]);
    }

    #[test]
    fn cycles_report_the_path() {
        let repo = repository();
        repo.add_plan(bean("a", "Pair", vec![reference("b"), reference("b")])).unwrap();
        repo.add_plan(bean("b", "Pair", vec![reference("a"), reference("a")])).unwrap();
        match repo.create("a").unwrap_err() {
            DiError::Circular(path) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("unexpected error {other}"),
        }
        assert!(!repo.is_instantiated("a"));
    }

    #[test]
    fn plans_of_created_components_are_frozen() {
        let repo = repository();
        repo.add_plan(bean("c", "Counter", vec![])).unwrap();
        repo.create("c").unwrap();
        assert!(repo.put_plan(bean("c", "Counter", vec![])).is_err());
        assert!(repo.remove_plan("c").is_err());
        assert!(repo.add_plan(bean("c", "Counter", vec![])).is_err());
    }

    #[test]
    fn unknown_names_are_reported() {
        let repo = repository();
        assert!(matches!(repo.create("nope"), Err(DiError::NoSuchComponent(_))));
        repo.add_plan(bean("a", "Pair", vec![reference("x"), reference("x")])).unwrap();
        assert!(matches!(repo.validate(), Err(DiError::UnresolvedReference(name)) if name == "x"));
    }
}
