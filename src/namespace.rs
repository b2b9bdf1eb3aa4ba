//! Namespace handlers for custom metadata elements.
//!
//! A blueprint may contain [`CustomMetadata`] elements owned by a namespace.
//! The container cannot build its graph until a handler for every namespace
//! it uses is registered here; handlers come and go at runtime and the
//! registry tells interested containers about it.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::DiResult;
use crate::metadata::{ComponentDefinitionRegistry, ComponentMetadata, CustomMetadata};

/// Turns custom elements of one namespace into standard component metadata.
pub trait NamespaceHandler: Send + Sync {
    fn namespace(&self) -> &str;

    fn parse(
        &self,
        element: &CustomMetadata,
        registry: &ComponentDefinitionRegistry,
    ) -> DiResult<ComponentMetadata>;
}

/// Notified when handlers are registered or unregistered.
pub trait NamespaceListener: Send + Sync {
    fn handler_registered(&self, namespace: &str);
    fn handler_unregistered(&self, namespace: &str);
}

/// Shared, mutable set of namespace handlers.
#[derive(Default)]
pub struct NamespaceHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn NamespaceHandler>>>,
    listeners: RwLock<Vec<Weak<dyn NamespaceListener>>>,
}

impl NamespaceHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the namespace.
    pub fn register(&self, handler: Arc<dyn NamespaceHandler>) {
        let namespace = handler.namespace().to_string();
        self.handlers.write().insert(namespace.clone(), handler);
        debug!(namespace = %namespace, "namespace handler registered");
        for listener in self.live_listeners() {
            listener.handler_registered(&namespace);
        }
    }

    pub fn unregister(&self, namespace: &str) -> bool {
        let removed = self.handlers.write().remove(namespace).is_some();
        if removed {
            debug!(namespace = %namespace, "namespace handler unregistered");
            for listener in self.live_listeners() {
                listener.handler_unregistered(namespace);
            }
        }
        removed
    }

    pub fn handler(&self, namespace: &str) -> Option<Arc<dyn NamespaceHandler>> {
        self.handlers.read().get(namespace).cloned()
    }

    /// Namespaces from `required` that have no handler.
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        let handlers = self.handlers.read();
        required
            .iter()
            .filter(|ns| !handlers.contains_key(ns.as_str()))
            .cloned()
            .collect()
    }

    pub fn add_listener(&self, listener: Weak<dyn NamespaceListener>) {
        self.listeners.write().push(listener);
    }

    /// Drops a listener, comparing by identity.
    pub fn remove_listener(&self, listener: &Weak<dyn NamespaceListener>) {
        self.listeners.write().retain(|l| !Weak::ptr_eq(l, listener));
    }

    fn live_listeners(&self) -> Vec<Arc<dyn NamespaceListener>> {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::BeanMetadata;
    use parking_lot::Mutex;

    struct Echo;

    impl NamespaceHandler for Echo {
        fn namespace(&self) -> &str {
            "urn:echo"
        }

        fn parse(
            &self,
            element: &CustomMetadata,
            _registry: &ComponentDefinitionRegistry,
        ) -> DiResult<ComponentMetadata> {
            let id = element.id.clone().unwrap_or_default();
            Ok(BeanMetadata::new(id, element.element.clone()).into())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl NamespaceListener for Recorder {
        fn handler_registered(&self, namespace: &str) {
            self.0.lock().push(format!("+{namespace}"));
        }

        fn handler_unregistered(&self, namespace: &str) {
            self.0.lock().push(format!("-{namespace}"));
        }
    }

    #[test]
    fn reports_missing_namespaces() {
        let registry = NamespaceHandlerRegistry::new();
        let required = vec!["urn:echo".to_string(), "urn:other".to_string()];
        assert_eq!(registry.missing(&required).len(), 2);
        registry.register(Arc::new(Echo));
        assert_eq!(registry.missing(&required), vec!["urn:other".to_string()]);
    }

    #[test]
    fn notifies_live_listeners() {
        let registry = NamespaceHandlerRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn NamespaceListener> = Arc::downgrade(&recorder) as Weak<dyn NamespaceListener>;
        registry.add_listener(weak);
        registry.register(Arc::new(Echo));
        assert!(registry.unregister("urn:echo"));
        assert!(!registry.unregister("urn:echo"));
        assert_eq!(*recorder.0.lock(), vec!["+urn:echo", "-urn:echo"]);
    }
}
