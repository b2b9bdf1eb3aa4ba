//! Build plans: the executable form of component metadata.
//!
//! A [`BuildPlan`] is a named node describing how to produce one value.
//! Plans reference each other directly (inline values) or by name
//! ([`PlanKind::Ref`]), forming the graph the repository walks lazily.
//! Anonymous plans receive generated names that never collide with
//! declared ones.

mod builder;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::metadata::CollectionKind;
use crate::publisher::ConditionalPublisher;
use crate::scope::Scope;
use crate::tracker::DependencyTracker;
use crate::types::TypeSpec;
use crate::value::Value;

pub use builder::PlanBuilder;

/// How to produce one value.
pub struct BuildPlan {
    pub name: String,
    /// Generated name; never cached, never reported
    pub anonymous: bool,
    pub scope: Scope,
    /// Created before this plan is evaluated
    pub depends_on: Vec<Arc<BuildPlan>>,
    pub kind: PlanKind,
}

pub enum PlanKind {
    Null,
    /// Literal text, optionally converted
    Value { text: String, ty: Option<TypeSpec> },
    /// Returns the provided value unchanged
    PassThrough(Value),
    Ref(String),
    IdRef(String),
    Bean(BeanPlan),
    Collection {
        kind: CollectionKind,
        element: Option<TypeSpec>,
        items: Vec<Arc<BuildPlan>>,
    },
    Map {
        key: Option<TypeSpec>,
        value: Option<TypeSpec>,
        entries: Vec<(Arc<BuildPlan>, Arc<BuildPlan>)>,
    },
    Props(BTreeMap<String, String>),
    Reference(ReferencePlan),
    Service(Arc<ConditionalPublisher>),
}

pub struct ArgumentPlan {
    pub index: Option<usize>,
    pub ty: Option<TypeSpec>,
    pub plan: Arc<BuildPlan>,
}

pub struct BeanPlan {
    pub class: Option<String>,
    pub factory: Option<Arc<BuildPlan>>,
    pub factory_method: Option<String>,
    pub arguments: Vec<ArgumentPlan>,
    pub properties: Vec<(String, Arc<BuildPlan>)>,
    pub init_method: Option<String>,
    pub destroy_method: Option<String>,
}

/// A component whose methods are called back by name.
pub struct CallbackPlan {
    pub component: Arc<BuildPlan>,
    pub on_add: Option<String>,
    pub on_remove: Option<String>,
}

pub struct ReferencePlan {
    pub tracker: Arc<DependencyTracker>,
    pub interface: Option<String>,
    pub timeout_ms: u64,
    pub listeners: Vec<CallbackPlan>,
    pub default_component: Option<Arc<BuildPlan>>,
}

impl BuildPlan {
    pub fn new(name: impl Into<String>, kind: PlanKind) -> Self {
        BuildPlan {
            name: name.into(),
            anonymous: false,
            scope: Scope::Singleton,
            depends_on: Vec::new(),
            kind,
        }
    }

    /// Plan returning `value` as is.
    pub fn pass_through(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, PlanKind::PassThrough(value))
    }

    /// Whether the repository caches the produced value.
    pub fn is_cached(&self) -> bool {
        !self.anonymous && self.scope.is_singleton()
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            PlanKind::Null => "null",
            PlanKind::Value { .. } => "value",
            PlanKind::PassThrough(_) => "pass-through",
            PlanKind::Ref(_) => "ref",
            PlanKind::IdRef(_) => "idref",
            PlanKind::Bean(_) => "bean",
            PlanKind::Collection { .. } => "collection",
            PlanKind::Map { .. } => "map",
            PlanKind::Props(_) => "props",
            PlanKind::Reference(r) if r.tracker.is_multiple() => "reference-list",
            PlanKind::Reference(_) => "reference",
            PlanKind::Service(_) => "service",
        }
    }

    /// Direct children, inline and explicit dependencies, in evaluation order.
    pub fn children(&self) -> Vec<Arc<BuildPlan>> {
        let mut out: Vec<Arc<BuildPlan>> = self.depends_on.clone();
        match &self.kind {
            PlanKind::Bean(bean) => {
                out.extend(bean.factory.iter().cloned());
                out.extend(bean.arguments.iter().map(|a| a.plan.clone()));
                out.extend(bean.properties.iter().map(|(_, p)| p.clone()));
            }
            PlanKind::Collection { items, .. } => out.extend(items.iter().cloned()),
            PlanKind::Map { entries, .. } => {
                for (k, v) in entries {
                    out.push(k.clone());
                    out.push(v.clone());
                }
            }
            PlanKind::Reference(reference) => {
                out.extend(reference.listeners.iter().map(|l| l.component.clone()));
                out.extend(reference.default_component.iter().cloned());
            }
            PlanKind::Service(publisher) => {
                out.push(publisher.service_plan().clone());
                out.extend(publisher.property_plans().iter().map(|(_, p)| p.clone()));
                out.extend(publisher.listener_plans().iter().map(|l| l.component.clone()));
            }
            PlanKind::Null
            | PlanKind::Value { .. }
            | PlanKind::PassThrough(_)
            | PlanKind::Ref(_)
            | PlanKind::IdRef(_)
            | PlanKind::Props(_) => {}
        }
        out
    }

    /// Names this plan refers to through `Ref`/`IdRef`, recursively through inline plans.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.walk(&mut |plan| {
            if let PlanKind::Ref(name) | PlanKind::IdRef(name) = &plan.kind {
                names.push(name.clone());
            }
        });
        names
    }

    /// Pre-order walk over this plan and its inline children.
    pub fn walk(&self, visit: &mut dyn FnMut(&BuildPlan)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Trackers owned by this plan and its inline children, deduplicated.
    pub fn own_trackers(&self) -> Vec<Arc<DependencyTracker>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.walk(&mut |plan| {
            if let PlanKind::Reference(reference) = &plan.kind {
                if seen.insert(Arc::as_ptr(&reference.tracker)) {
                    out.push(reference.tracker.clone());
                }
            }
        });
        out
    }
}

impl fmt::Debug for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildPlan")
            .field("name", &self.name)
            .field("kind", &self.kind_name())
            .field("scope", &self.scope)
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Generates names for anonymous plans.
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    counter: u64,
    reserved: HashSet<String>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks names as taken.
    pub fn reserve<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
    }

    pub fn next_name(&mut self) -> String {
        loop {
            self.counter += 1;
            let name = format!("#plan-{}", self.counter);
            if self.reserved.insert(name.clone()) {
                return name;
            }
        }
    }
}
