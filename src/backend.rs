//! Construction backend: how classes named in metadata become objects.
//!
//! The repository never builds user types directly. It asks a
//! [`ConstructionBackend`] for the constructor and method signatures of a
//! class, picks a signature that fits the declared arguments, converts the
//! arguments and calls back into the backend. [`ClassRegistry`] is the
//! dispatch-table implementation: each [`ClassDef`] lists its constructors,
//! static factories, instance methods, property setters and an optional
//! from-string builder as closures.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, DiError};
use crate::types::TypeSpec;
use crate::value::{FromValue, Instance, Value};

/// Parameter types of one callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<TypeSpec>,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = TypeSpec>) -> Self {
        Signature {
            params: params.into_iter().collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Converted arguments handed to backend callables.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Args { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Result<&Value, BoxError> {
        self.values.get(index).ok_or_else(|| {
            DiError::IllegalState(format!("missing argument {index}")).into()
        })
    }

    /// Typed argument extraction.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, BoxError> {
        let value = self.value(index)?;
        T::from_value(value).ok_or_else(|| {
            DiError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: value.kind().to_string(),
            }
            .into()
        })
    }

    /// Shared handle argument, downcast from an object value.
    pub fn object<T: ?Sized + Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, BoxError> {
        self.get::<Arc<T>>(index)
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.values
    }
}

/// Builds and manipulates objects for the repository.
pub trait ConstructionBackend: Send + Sync {
    /// Constructor signatures, or `None` when the class is unknown.
    fn constructors(&self, class: &str) -> Option<Vec<Signature>>;

    fn construct(&self, class: &str, signature: usize, args: Args) -> Result<Value, BoxError>;

    /// Static factory method signatures on `class`.
    fn static_methods(&self, class: &str, method: &str) -> Vec<Signature>;

    fn invoke_static(
        &self,
        class: &str,
        method: &str,
        signature: usize,
        args: Args,
    ) -> Result<Value, BoxError>;

    /// Instance method signatures available on `target`.
    fn methods(&self, target: &Value, method: &str) -> Vec<Signature>;

    fn invoke(
        &self,
        target: &Value,
        method: &str,
        signature: usize,
        args: Args,
    ) -> Result<Value, BoxError>;

    /// Declared type of a settable property.
    fn property_type(&self, target: &Value, property: &str) -> Option<TypeSpec>;

    fn set_property(&self, target: &Value, property: &str, value: Value) -> Result<(), BoxError>;

    /// Builds an instance of `class` from a single string, if the class supports it.
    fn from_string(&self, _class: &str, _text: &str) -> Option<Result<Value, BoxError>> {
        None
    }
}

type CallFn = Arc<dyn Fn(&Args) -> Result<Value, BoxError> + Send + Sync>;
type MethodFn = Arc<dyn Fn(&Instance, &Args) -> Result<Value, BoxError> + Send + Sync>;
type SetterFn = Arc<dyn Fn(&Instance, Value) -> Result<(), BoxError> + Send + Sync>;
type FromStrFn = Arc<dyn Fn(&str) -> Result<Value, BoxError> + Send + Sync>;

/// A class description for [`ClassRegistry`].
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{ClassDef, ClassRegistry, ConstructionBackend, Args, TypeSpec, Instance};
///
/// struct Greeter { name: String }
///
/// let registry = ClassRegistry::new().with_class(
///     ClassDef::new("Greeter")
///         .constructor([TypeSpec::String], |args: &Args| {
///             Ok(Instance::new(Greeter { name: args.get::<String>(0)? }))
///         }),
/// );
///
/// let sigs = registry.constructors("Greeter").unwrap();
/// assert_eq!(sigs[0].params, vec![TypeSpec::String]);
/// ```
pub struct ClassDef {
    name: String,
    interfaces: Vec<String>,
    constructors: Vec<(Signature, CallFn)>,
    static_methods: HashMap<String, Vec<(Signature, CallFn)>>,
    methods: HashMap<String, Vec<(Signature, MethodFn)>>,
    properties: HashMap<String, (TypeSpec, SetterFn)>,
    from_str: Option<FromStrFn>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        ClassDef {
            name: name.into(),
            interfaces: Vec::new(),
            constructors: Vec::new(),
            static_methods: HashMap::new(),
            methods: HashMap::new(),
            properties: HashMap::new(),
            from_str: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares an interface name instances of this class satisfy.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn constructor<P, R, F>(mut self, params: P, f: F) -> Self
    where
        P: IntoIterator<Item = TypeSpec>,
        R: Into<Value>,
        F: Fn(&Args) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        self.constructors
            .push((Signature::new(params), Arc::new(move |args: &Args| f(args).map(Into::<Value>::into))));
        self
    }

    pub fn static_method<P, R, F>(mut self, method: impl Into<String>, params: P, f: F) -> Self
    where
        P: IntoIterator<Item = TypeSpec>,
        R: Into<Value>,
        F: Fn(&Args) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        self.static_methods
            .entry(method.into())
            .or_default()
            .push((Signature::new(params), Arc::new(move |args: &Args| f(args).map(Into::<Value>::into))));
        self
    }

    pub fn method<P, R, F>(mut self, method: impl Into<String>, params: P, f: F) -> Self
    where
        P: IntoIterator<Item = TypeSpec>,
        R: Into<Value>,
        F: Fn(&Instance, &Args) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        self.methods.entry(method.into()).or_default().push((
            Signature::new(params),
            Arc::new(move |target: &Instance, args: &Args| f(target, args).map(Into::<Value>::into)),
        ));
        self
    }

    pub fn property<F>(mut self, property: impl Into<String>, ty: TypeSpec, f: F) -> Self
    where
        F: Fn(&Instance, Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.properties.insert(property.into(), (ty, Arc::new(f)));
        self
    }

    pub fn from_string<R, F>(mut self, f: F) -> Self
    where
        R: Into<Value>,
        F: Fn(&str) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        self.from_str = Some(Arc::new(move |text: &str| f(text).map(Into::<Value>::into)));
        self
    }

    fn stamp(&self, value: Value) -> Value {
        match value {
            Value::Object(instance) if instance.class().is_empty() => {
                let instance = self
                    .interfaces
                    .iter()
                    .fold(instance.with_class(self.name.clone()), |i, iface| {
                        i.with_interface(iface.clone())
                    });
                Value::Object(instance)
            }
            other => other,
        }
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("interfaces", &self.interfaces)
            .field("constructors", &self.constructors.len())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Dispatch-table [`ConstructionBackend`].
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, Arc<ClassDef>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: ClassDef) -> Self {
        self.add(class);
        self
    }

    pub fn add(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    fn class(&self, class: &str) -> Result<&Arc<ClassDef>, BoxError> {
        self.classes
            .get(class)
            .ok_or_else(|| DiError::definition(format!("unknown class '{class}'")).into())
    }

    fn class_of(&self, target: &Value) -> Option<&Arc<ClassDef>> {
        target
            .as_instance()
            .and_then(|instance| self.classes.get(instance.class()))
    }
}

fn pick<'a, T>(entries: &'a [(Signature, T)], signature: usize, what: &str) -> Result<&'a T, BoxError> {
    entries
        .get(signature)
        .map(|(_, f)| f)
        .ok_or_else(|| DiError::IllegalState(format!("no signature {signature} for {what}")).into())
}

impl ConstructionBackend for ClassRegistry {
    fn constructors(&self, class: &str) -> Option<Vec<Signature>> {
        self.classes
            .get(class)
            .map(|def| def.constructors.iter().map(|(s, _)| s.clone()).collect())
    }

    fn construct(&self, class: &str, signature: usize, args: Args) -> Result<Value, BoxError> {
        let def = self.class(class)?;
        let ctor = pick(&def.constructors, signature, class)?;
        Ok(def.stamp(ctor(&args)?))
    }

    fn static_methods(&self, class: &str, method: &str) -> Vec<Signature> {
        self.classes
            .get(class)
            .and_then(|def| def.static_methods.get(method))
            .map(|entries| entries.iter().map(|(s, _)| s.clone()).collect())
            .unwrap_or_default()
    }

    fn invoke_static(
        &self,
        class: &str,
        method: &str,
        signature: usize,
        args: Args,
    ) -> Result<Value, BoxError> {
        let def = self.class(class)?;
        let entries = def.static_methods.get(method).ok_or_else(|| {
            BoxError::from(DiError::definition(format!("no static method '{method}' on '{class}'")))
        })?;
        pick(entries, signature, method)?(&args)
    }

    fn methods(&self, target: &Value, method: &str) -> Vec<Signature> {
        self.class_of(target)
            .and_then(|def| def.methods.get(method))
            .map(|entries| entries.iter().map(|(s, _)| s.clone()).collect())
            .unwrap_or_default()
    }

    fn invoke(
        &self,
        target: &Value,
        method: &str,
        signature: usize,
        args: Args,
    ) -> Result<Value, BoxError> {
        let instance = target.as_instance().ok_or_else(|| {
            BoxError::from(DiError::definition(format!(
                "cannot invoke '{method}' on a {} value",
                target.kind()
            )))
        })?;
        let entries = self
            .class_of(target)
            .and_then(|def| def.methods.get(method))
            .ok_or_else(|| {
                BoxError::from(DiError::definition(format!(
                    "no method '{method}' on '{}'",
                    instance.class()
                )))
            })?;
        pick(entries, signature, method)?(instance, &args)
    }

    fn property_type(&self, target: &Value, property: &str) -> Option<TypeSpec> {
        self.class_of(target)
            .and_then(|def| def.properties.get(property))
            .map(|(ty, _)| ty.clone())
    }

    fn set_property(&self, target: &Value, property: &str, value: Value) -> Result<(), BoxError> {
        let instance = target.as_instance().ok_or_else(|| {
            BoxError::from(DiError::definition(format!(
                "cannot set '{property}' on a {} value",
                target.kind()
            )))
        })?;
        let (_, setter) = self
            .class_of(target)
            .and_then(|def| def.properties.get(property))
            .ok_or_else(|| {
                BoxError::from(DiError::definition(format!(
                    "no setter for property '{property}' on '{}'",
                    instance.class()
                )))
            })?;
        setter(instance, value)
    }

    fn from_string(&self, class: &str, text: &str) -> Option<Result<Value, BoxError>> {
        let def = self.classes.get(class)?;
        let build = def.from_str.as_ref()?;
        Some(build(text).map(|v| def.stamp(v)))
    }
}
