use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::error::{DiError, DiResult};
use crate::filter::Filter;
use crate::metadata::{
    BeanMetadata, ComponentDefinitionRegistry, ComponentMetadata, Metadata, ReferenceMetadata,
    ServiceMetadata,
};
use crate::publisher::{ConditionalPublisher, PublisherPlan};
use crate::registry::{ConsumerId, ProviderRegistry};
use crate::scope::Scope;
use crate::tracker::{Cardinality, DependencyTracker, TrackerSettings};

use super::{ArgumentPlan, BeanPlan, BuildPlan, CallbackPlan, NameGenerator, PlanKind, ReferencePlan};

/// Turns component definitions into build plans.
///
/// Every `ref` must name a declared component (or one of the extra known
/// names); dependency trackers and publishers are created here, unstarted.
pub struct PlanBuilder<'a> {
    definitions: &'a ComponentDefinitionRegistry,
    registry: Arc<dyn ProviderRegistry>,
    consumer: ConsumerId,
    names: NameGenerator,
    known: HashSet<String>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        definitions: &'a ComponentDefinitionRegistry,
        registry: Arc<dyn ProviderRegistry>,
        consumer: ConsumerId,
    ) -> Self {
        let mut names = NameGenerator::new();
        names.reserve(definitions.names());
        PlanBuilder {
            definitions,
            registry,
            consumer,
            names,
            known: definitions.names().map(str::to_string).collect(),
        }
    }

    /// Continues an earlier generator so generated names stay unique.
    pub fn with_names(mut self, mut names: NameGenerator) -> Self {
        names.reserve(self.definitions.names());
        self.names = names;
        self
    }

    /// Names resolvable by `ref` besides the declared components.
    pub fn with_known_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.names.reserve(names.iter().cloned());
        self.known.extend(names);
        self
    }

    pub fn into_names(self) -> NameGenerator {
        self.names
    }

    /// Plans for every declared component, in declaration order.
    pub fn build_all(&mut self) -> DiResult<Vec<Arc<BuildPlan>>> {
        let ids: Vec<String> = self.definitions.names().map(str::to_string).collect();
        ids.iter().map(|id| self.build(id)).collect()
    }

    pub fn build(&mut self, id: &str) -> DiResult<Arc<BuildPlan>> {
        let definitions = self.definitions;
        let component = definitions
            .get(id)
            .ok_or_else(|| DiError::NoSuchComponent(id.to_string()))?;
        let plan = self.component(id.to_string(), false, component)?;
        trace!(component = id, kind = plan.kind_name(), "plan built");
        Ok(plan)
    }

    fn component(
        &mut self,
        name: String,
        anonymous: bool,
        component: &ComponentMetadata,
    ) -> DiResult<Arc<BuildPlan>> {
        match component {
            ComponentMetadata::Bean(bean) => self.bean(name, anonymous, bean),
            ComponentMetadata::Reference(reference) => {
                self.reference(name, anonymous, reference, Cardinality::Single)
            }
            ComponentMetadata::ReferenceList(reference) => {
                self.reference(name, anonymous, reference, Cardinality::Multiple)
            }
            ComponentMetadata::Service(service) => self.service(name, anonymous, service),
            ComponentMetadata::Custom(custom) => Err(DiError::definition(format!(
                "element '{}' of namespace '{}' was not resolved by a namespace handler",
                custom.element, custom.namespace
            ))),
        }
    }

    fn check_known(&self, id: &str) -> DiResult<()> {
        if self.known.contains(id) {
            Ok(())
        } else {
            Err(DiError::definition(format!(
                "reference to undeclared component '{id}'"
            )))
        }
    }

    fn reference_to(&mut self, id: &str) -> DiResult<Arc<BuildPlan>> {
        self.check_known(id)?;
        Ok(self.anonymous(PlanKind::Ref(id.to_string())))
    }

    fn anonymous(&mut self, kind: PlanKind) -> Arc<BuildPlan> {
        let mut plan = BuildPlan::new(self.names.next_name(), kind);
        plan.anonymous = true;
        plan.scope = Scope::Prototype;
        Arc::new(plan)
    }

    fn depends_on(&mut self, ids: &[String]) -> DiResult<Vec<Arc<BuildPlan>>> {
        ids.iter().map(|id| self.reference_to(id)).collect()
    }

    fn bean(&mut self, name: String, anonymous: bool, bean: &BeanMetadata) -> DiResult<Arc<BuildPlan>> {
        if bean.class.is_none() && bean.factory_method.is_none() {
            return Err(DiError::definition(format!(
                "bean '{name}' has neither a class nor a factory method"
            )));
        }
        if bean.factory_component.is_some() && bean.factory_method.is_none() {
            return Err(DiError::definition(format!(
                "bean '{name}' names a factory component without a factory method"
            )));
        }
        if bean.factory_component.is_none() && bean.class.is_none() {
            return Err(DiError::definition(format!(
                "bean '{name}' has a static factory method but no class"
            )));
        }
        let factory = bean
            .factory_component
            .as_deref()
            .map(|id| self.reference_to(id))
            .transpose()?;
        let mut arguments = Vec::with_capacity(bean.arguments.len());
        for argument in &bean.arguments {
            arguments.push(ArgumentPlan {
                index: argument.index,
                ty: argument.value_type.clone(),
                plan: self.value(&argument.value)?,
            });
        }
        let mut properties = Vec::with_capacity(bean.properties.len());
        for property in &bean.properties {
            properties.push((property.name.clone(), self.value(&property.value)?));
        }
        let mut plan = BuildPlan::new(
            name,
            PlanKind::Bean(BeanPlan {
                class: bean.class.clone(),
                factory,
                factory_method: bean.factory_method.clone(),
                arguments,
                properties,
                init_method: bean.init_method.clone(),
                destroy_method: bean.destroy_method.clone(),
            }),
        );
        plan.anonymous = anonymous;
        plan.scope = if anonymous { Scope::Prototype } else { bean.scope };
        plan.depends_on = self.depends_on(&bean.depends_on)?;
        Ok(Arc::new(plan))
    }

    fn reference(
        &mut self,
        name: String,
        anonymous: bool,
        reference: &ReferenceMetadata,
        cardinality: Cardinality,
    ) -> DiResult<Arc<BuildPlan>> {
        let filter = Filter::for_reference(
            reference.interface.as_deref(),
            reference.component_name.as_deref(),
            reference.filter.as_deref(),
        )?;
        let tracker = DependencyTracker::new(
            name.clone(),
            filter,
            self.registry.clone(),
            self.consumer,
            TrackerSettings {
                cardinality,
                optional: reference.is_optional(),
                damping: reference.damping,
            },
        );
        let mut listeners = Vec::with_capacity(reference.listeners.len());
        for listener in &reference.listeners {
            listeners.push(CallbackPlan {
                component: self.listener_component(&name, &listener.component)?,
                on_add: listener.bind_method.clone(),
                on_remove: listener.unbind_method.clone(),
            });
        }
        let default_component = reference
            .default_component
            .as_deref()
            .map(|id| self.reference_to(id))
            .transpose()?;
        let mut plan = BuildPlan::new(
            name,
            PlanKind::Reference(ReferencePlan {
                tracker,
                interface: reference.interface.clone(),
                timeout_ms: reference.timeout_ms,
                listeners,
                default_component,
            }),
        );
        plan.anonymous = anonymous;
        plan.depends_on = self.depends_on(&reference.depends_on)?;
        Ok(Arc::new(plan))
    }

    fn listener_component(&mut self, owner: &str, component: &Metadata) -> DiResult<Arc<BuildPlan>> {
        if matches!(component, Metadata::Null) {
            return Err(DiError::definition(format!(
                "listener of '{owner}' has no component"
            )));
        }
        self.value(component)
    }

    fn service(&mut self, name: String, anonymous: bool, service: &ServiceMetadata) -> DiResult<Arc<BuildPlan>> {
        if service.interfaces.is_empty() {
            return Err(DiError::definition(format!(
                "service '{name}' does not declare any interface"
            )));
        }
        if matches!(service.component, Metadata::Null) {
            return Err(DiError::definition(format!(
                "service '{name}' has no component to publish"
            )));
        }
        let component = self.value(&service.component)?;
        let mut properties = Vec::with_capacity(service.properties.len());
        for (key, value) in &service.properties {
            properties.push((key.clone(), self.value(value)?));
        }
        let mut listeners = Vec::with_capacity(service.listeners.len());
        for listener in &service.listeners {
            listeners.push(CallbackPlan {
                component: self.listener_component(&name, &listener.component)?,
                on_add: listener.register_method.clone(),
                on_remove: listener.unregister_method.clone(),
            });
        }
        let publisher = ConditionalPublisher::new(
            PublisherPlan {
                name: name.clone(),
                service: component,
                interfaces: service.interfaces.clone(),
                ranking: service.ranking,
                properties,
                scope: service.scope,
                gate: service.gate,
                listeners,
            },
            self.registry.clone(),
        );
        let mut plan = BuildPlan::new(name, PlanKind::Service(publisher));
        plan.anonymous = anonymous;
        plan.depends_on = self.depends_on(&service.depends_on)?;
        Ok(Arc::new(plan))
    }

    /// Plan for one value position; always anonymous.
    fn value(&mut self, metadata: &Metadata) -> DiResult<Arc<BuildPlan>> {
        let kind = match metadata {
            Metadata::Null => PlanKind::Null,
            Metadata::Value { text, value_type } => {
                if let Some(ty) = value_type.as_ref().filter(|ty| ty.is_container()) {
                    return Err(DiError::definition(format!(
                        "value type '{ty}' cannot be a collection"
                    )));
                }
                PlanKind::Value {
                    text: text.clone(),
                    ty: value_type.clone(),
                }
            }
            Metadata::Ref(id) => {
                self.check_known(id)?;
                PlanKind::Ref(id.clone())
            }
            Metadata::IdRef(id) => {
                self.check_known(id)?;
                PlanKind::IdRef(id.clone())
            }
            Metadata::Bean(bean) => {
                let name = self.names.next_name();
                return self.bean(name, true, bean);
            }
            Metadata::Reference(reference) => {
                let name = self.names.next_name();
                return self.reference(name, true, reference, Cardinality::Single);
            }
            Metadata::ReferenceList(reference) => {
                let name = self.names.next_name();
                return self.reference(name, true, reference, Cardinality::Multiple);
            }
            Metadata::Service(service) => {
                let name = self.names.next_name();
                return self.service(name, true, service);
            }
            Metadata::Collection {
                kind,
                value_type,
                items,
            } => PlanKind::Collection {
                kind: *kind,
                element: value_type.clone(),
                items: items.iter().map(|item| self.value(item)).collect::<DiResult<_>>()?,
            },
            Metadata::Map {
                key_type,
                value_type,
                entries,
            } => {
                let mut planned = Vec::with_capacity(entries.len());
                for entry in entries {
                    planned.push((self.value(&entry.key)?, self.value(&entry.value)?));
                }
                PlanKind::Map {
                    key: key_type.clone(),
                    value: value_type.clone(),
                    entries: planned,
                }
            }
            Metadata::Props(props) => PlanKind::Props(props.clone()),
        };
        Ok(self.anonymous(kind))
    }
}
