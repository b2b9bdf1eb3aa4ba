//! Per-request evaluation state.
//!
//! One [`ExecutionContext`] serves one creation request. Plans being
//! evaluated are pushed on a stack shared by every request nested on the
//! thread holding the instance lock, which is how cycles are detected even
//! when a constructor calls back into the container. Singletons built by a
//! request are staged and only reach the cache once every queued init hook
//! of that request has run.

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::backend::Args;
use crate::error::{DiError, DiResult};
use crate::metadata::CollectionKind;
use crate::plan::{BeanPlan, BuildPlan, PlanKind, ReferencePlan};
use crate::proxy::{ProviderList, ReferenceHolder, ReferenceProxy, LIST_CLASS};
use crate::types::TypeSpec;
use crate::value::{Instance, Value};

use super::matching::{self, ArgValue};
use super::{MethodListener, Repository};

/// Class name carried by service publication handles.
pub const PUBLICATION_CLASS: &str = "ServicePublication";

struct Frame {
    name: String,
    anonymous: bool,
}

/// Work in progress of the thread holding the instance lock.
#[derive(Default)]
pub(super) struct InFlight {
    stack: Vec<Frame>,
    staged: Vec<(String, Value)>,
}

impl InFlight {
    pub(super) fn staged(&self, name: &str) -> Option<Value> {
        self.staged
            .iter()
            .find(|(staged, _)| staged == name)
            .map(|(_, value)| value.clone())
    }
}

#[derive(Clone)]
struct PendingInit {
    name: String,
    value: Value,
    init_method: Option<String>,
}

/// Must only be created by the thread holding the repository's instance lock.
pub(crate) struct ExecutionContext<'r> {
    repository: &'r Repository,
    /// Staged singletons that belong to enclosing requests.
    mark: usize,
    pending: Vec<PendingInit>,
}

impl<'r> ExecutionContext<'r> {
    pub(crate) fn new(repository: &'r Repository) -> Self {
        let mark = repository.in_flight().staged.len();
        ExecutionContext {
            repository,
            mark,
            pending: Vec::new(),
        }
    }

    /// Evaluates `plan`, reusing cached and staged singletons.
    pub(crate) fn create(&mut self, plan: &Arc<BuildPlan>) -> DiResult<Value> {
        if plan.is_cached() {
            if let Some(value) = self.repository.cached(&plan.name) {
                return Ok(value);
            }
        }
        self.push(plan)?;
        let result = self.instantiate(plan);
        self.repository.in_flight().stack.pop();
        let value = self.repository.converter().convert(&result?, &TypeSpec::Any)?;
        if plan.is_cached() {
            self.repository
                .in_flight()
                .staged
                .push((plan.name.clone(), value.clone()));
        }
        trace!(component = %plan.name, kind = plan.kind_name(), "component created");
        Ok(value)
    }

    fn push(&mut self, plan: &BuildPlan) -> DiResult<()> {
        let mut in_flight = self.repository.in_flight();
        if let Some(start) = in_flight.stack.iter().position(|f| f.name == plan.name) {
            let mut path: Vec<String> = in_flight.stack[start..]
                .iter()
                .enumerate()
                .filter(|(i, frame)| *i == 0 || !frame.anonymous)
                .map(|(_, frame)| frame.name.clone())
                .collect();
            path.push(plan.name.clone());
            return Err(DiError::Circular(path));
        }
        in_flight.stack.push(Frame {
            name: plan.name.clone(),
            anonymous: plan.anonymous,
        });
        Ok(())
    }

    fn instantiate(&mut self, plan: &Arc<BuildPlan>) -> DiResult<Value> {
        for dependency in &plan.depends_on {
            self.create(dependency)?;
        }
        let converter = self.repository.converter();
        match &plan.kind {
            PlanKind::Null => Ok(Value::Null),
            PlanKind::Value { text, ty } => match ty {
                Some(ty) => converter.convert(&Value::Str(text.clone()), ty),
                None => Ok(Value::Str(text.clone())),
            },
            PlanKind::PassThrough(value) => Ok(value.clone()),
            PlanKind::Ref(name) => {
                let target = self
                    .repository
                    .plan(name)
                    .ok_or_else(|| DiError::NoSuchComponent(name.clone()))?;
                self.create(&target)
            }
            PlanKind::IdRef(name) => {
                if self.repository.contains(name) {
                    Ok(Value::Str(name.clone()))
                } else {
                    Err(DiError::UnresolvedReference(name.clone()))
                }
            }
            PlanKind::Bean(bean) => self.bean(plan, bean),
            PlanKind::Collection {
                kind,
                element,
                items,
            } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.typed(item, element.as_ref())?;
                    match kind {
                        CollectionKind::Set => Value::push_unique(&mut values, value),
                        CollectionKind::List | CollectionKind::Array => values.push(value),
                    }
                }
                Ok(match kind {
                    CollectionKind::List => Value::List(values),
                    CollectionKind::Set => Value::Set(values),
                    CollectionKind::Array => Value::Array(values),
                })
            }
            PlanKind::Map {
                key,
                value,
                entries,
            } => {
                let mut out = Vec::with_capacity(entries.len());
                for (key_plan, value_plan) in entries {
                    let k = self.typed(key_plan, key.as_ref())?;
                    let v = self.typed(value_plan, value.as_ref())?;
                    Value::insert_entry(&mut out, k, v);
                }
                Ok(Value::Map(out))
            }
            PlanKind::Props(props) => Ok(Value::Map(
                props
                    .iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::Str(v.clone())))
                    .collect(),
            )),
            PlanKind::Reference(reference) => self.reference(plan, reference),
            PlanKind::Service(publisher) => {
                publisher.attach(self.repository.downgrade());
                Ok(Value::Object(
                    Instance::from_arc(publisher.clone()).with_class(PUBLICATION_CLASS),
                ))
            }
        }
    }

    fn typed(&mut self, plan: &Arc<BuildPlan>, ty: Option<&TypeSpec>) -> DiResult<Value> {
        let value = self.create(plan)?;
        match ty {
            Some(ty) => self.repository.converter().convert(&value, ty),
            None => Ok(value),
        }
    }

    fn bean(&mut self, plan: &BuildPlan, bean: &BeanPlan) -> DiResult<Value> {
        let mut args = Vec::with_capacity(bean.arguments.len());
        for argument in &bean.arguments {
            args.push(ArgValue {
                index: argument.index,
                ty: argument.ty.clone(),
                value: self.typed(&argument.plan, argument.ty.as_ref())?,
            });
        }

        let backend = self.repository.backend().clone();
        let converter = self.repository.converter().clone();
        let value = match (&bean.factory, &bean.factory_method, &bean.class) {
            (Some(factory), Some(method), _) => {
                let target = self.create(factory)?;
                let signatures = backend.methods(&target, method);
                let what = format!("factory method '{method}'");
                let (index, values) = matching::select(&signatures, &args, &converter, &what)?;
                backend
                    .invoke(&target, method, index, Args::new(values))
                    .map_err(|e| DiError::construction(&plan.name, e))?
            }
            (None, Some(method), Some(class)) => {
                let signatures = backend.static_methods(class, method);
                let what = format!("static factory method '{method}' on class '{class}'");
                let (index, values) = matching::select(&signatures, &args, &converter, &what)?;
                backend
                    .invoke_static(class, method, index, Args::new(values))
                    .map_err(|e| DiError::construction(&plan.name, e))?
            }
            (None, None, Some(class)) => {
                let signatures = backend.constructors(class).ok_or_else(|| {
                    DiError::definition(format!(
                        "unknown class '{class}' for component '{}'",
                        plan.name
                    ))
                })?;
                let what = format!("constructor of class '{class}'");
                let (index, values) = matching::select(&signatures, &args, &converter, &what)?;
                backend
                    .construct(class, index, Args::new(values))
                    .map_err(|e| DiError::construction(&plan.name, e))?
            }
            _ => {
                return Err(DiError::definition(format!(
                    "component '{}' has neither a class nor a factory method",
                    plan.name
                )))
            }
        };

        for (property, property_plan) in &bean.properties {
            let raw = self.create(property_plan)?;
            let ty = backend.property_type(&value, property).ok_or_else(|| {
                DiError::definition(format!(
                    "no setter for property '{property}' on component '{}'",
                    plan.name
                ))
            })?;
            let converted = converter.convert(&raw, &ty)?;
            backend
                .set_property(&value, property, converted)
                .map_err(|e| DiError::construction(&plan.name, e))?;
        }

        self.pending.push(PendingInit {
            name: plan.name.clone(),
            value: value.clone(),
            init_method: bean.init_method.clone(),
        });
        Ok(value)
    }

    fn reference(&mut self, plan: &BuildPlan, reference: &ReferencePlan) -> DiResult<Value> {
        let default_service = match &reference.default_component {
            Some(default_plan) => Some(self.create(default_plan)?),
            None => None,
        };
        for listener in &reference.listeners {
            let target = self.create(&listener.component)?;
            reference.tracker.add_binding_listener(Arc::new(MethodListener::new(
                self.repository.downgrade(),
                plan.name.clone(),
                target,
                listener.on_add.clone(),
                listener.on_remove.clone(),
            )));
        }
        if reference.tracker.is_multiple() {
            let list = Arc::new(ProviderList::new(reference.tracker.clone()));
            return Ok(Value::Object(Instance::from_arc(list).with_class(LIST_CLASS)));
        }
        let proxy = Arc::new(ReferenceProxy::new(
            reference.tracker.clone(),
            Duration::from_millis(reference.timeout_ms),
            default_service,
        ));
        Ok(Value::Convertible(Arc::new(ReferenceHolder::new(
            proxy,
            reference.interface.as_deref(),
        ))))
    }

    /// Runs the queued init hooks, deepest dependencies first, then moves
    /// the request's singletons into the cache.
    ///
    /// If any hook fails, none of the request's singletons are cached.
    pub(crate) fn finish(self) -> DiResult<()> {
        let pending = self.pending.clone();
        for init in &pending {
            if let Err(e) = self.initialize(init) {
                self.abandon();
                return Err(e);
            }
        }
        let committed: Vec<(String, Value)> = {
            let mut in_flight = self.repository.in_flight();
            let mark = self.mark.min(in_flight.staged.len());
            in_flight.staged.drain(mark..).collect()
        };
        for (name, value) in committed {
            self.repository.store(&name, value);
        }
        Ok(())
    }

    /// Drops everything a failed request built; queued init hooks never run.
    pub(crate) fn abandon(self) {
        let discarded: Vec<String> = {
            let mut in_flight = self.repository.in_flight();
            let mark = self.mark.min(in_flight.staged.len());
            in_flight.staged.drain(mark..).map(|(name, _)| name).collect()
        };
        if !discarded.is_empty() {
            warn!(
                components = ?discarded,
                skipped_inits = self.pending.len(),
                "creation request failed, partial singletons discarded"
            );
        }
    }

    fn initialize(&self, pending: &PendingInit) -> DiResult<()> {
        let processors = self.repository.processors();
        for processor in &processors {
            processor.before_init(&pending.name, &pending.value)?;
        }
        if let Some(method) = &pending.init_method {
            self.repository
                .invoke_no_args(&pending.name, &pending.value, method)?;
        }
        for processor in &processors {
            processor.after_init(&pending.name, &pending.value)?;
        }
        Ok(())
    }
}
