//! Symbol registry of the native type universe.
//!
//! Native classes are registered once, up front, with their constructors,
//! methods and fields. The registry answers the questions the resolver
//! asks: which candidates carry a name, and whether one type may be passed
//! where another is declared.

pub mod args;
mod builtins;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::bridge::CallContext;
use crate::error::Fault;
use crate::types::{names, NativeType, Value};

pub type MethodBody =
    Arc<dyn Fn(&mut CallContext<'_>, &Value, Vec<Value>) -> Result<Value, Fault> + Send + Sync>;
pub type ConstructorBody =
    Arc<dyn Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value, Fault> + Send + Sync>;
pub type FieldGetter = Arc<dyn Fn(&Value) -> Result<Value, Fault> + Send + Sync>;
pub type FieldSetter = Arc<dyn Fn(&Value, Value) -> Result<(), Fault> + Send + Sync>;

/// Something overload resolution can choose between.
pub trait Candidate {
    fn params(&self) -> &[NativeType];

    /// Human-readable signature for diagnostics.
    fn signature(&self) -> String;
}

fn format_params(params: &[NativeType]) -> String {
    params
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct MethodDescriptor {
    pub name: Arc<str>,
    pub owner: Arc<str>,
    pub params: Vec<NativeType>,
    pub return_type: NativeType,
    pub is_static: bool,
    pub declares_errors: bool,
    /// `None` for interface methods, which only closures implement.
    pub body: Option<MethodBody>,
}

impl MethodDescriptor {
    pub fn new<F>(name: &str, params: &[NativeType], return_type: NativeType, body: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &Value, Vec<Value>) -> Result<Value, Fault>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: Arc::from(name),
            owner: Arc::from(names::OBJECT),
            params: params.to_vec(),
            return_type,
            is_static: false,
            declares_errors: false,
            body: Some(Arc::new(body)),
        }
    }

    pub fn abstract_method(name: &str, params: &[NativeType], return_type: NativeType) -> Self {
        Self {
            name: Arc::from(name),
            owner: Arc::from(names::OBJECT),
            params: params.to_vec(),
            return_type,
            is_static: false,
            declares_errors: false,
            body: None,
        }
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_declared_errors(mut self) -> Self {
        self.declares_errors = true;
        self
    }

    fn same_signature(&self, other: &MethodDescriptor) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.params == other.params
    }
}

impl Candidate for MethodDescriptor {
    fn params(&self) -> &[NativeType] {
        &self.params
    }

    fn signature(&self) -> String {
        format!(
            "{}{} {}.{}({})",
            if self.is_static { "static " } else { "" },
            self.return_type,
            self.owner,
            self.name,
            format_params(&self.params)
        )
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

pub struct ConstructorDescriptor {
    pub class: Arc<str>,
    pub params: Vec<NativeType>,
    pub declares_errors: bool,
    pub body: ConstructorBody,
}

impl Candidate for ConstructorDescriptor {
    fn params(&self) -> &[NativeType] {
        &self.params
    }

    fn signature(&self) -> String {
        format!("{}({})", self.class, format_params(&self.params))
    }
}

impl fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

pub struct FieldDescriptor {
    pub name: Arc<str>,
    pub ty: NativeType,
    pub is_static: bool,
    pub getter: FieldGetter,
    pub setter: Option<FieldSetter>,
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {}",
            if self.is_static { "static " } else { "" },
            self.ty,
            self.name
        )
    }
}

/// What kind of built-in storage a class instantiates, if any. Coercion
/// uses it to copy a peer composite into a declared collection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backing {
    #[default]
    None,
    List,
    Map,
}

#[derive(Debug)]
pub struct ClassDescriptor {
    pub name: Arc<str>,
    pub superclass: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub is_interface: bool,
    pub backing: Backing,
    pub methods: Vec<Arc<MethodDescriptor>>,
    pub constructors: Vec<Arc<ConstructorDescriptor>>,
    pub fields: Vec<Arc<FieldDescriptor>>,
}

impl ClassDescriptor {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            superclass: (name != names::OBJECT).then(|| Arc::from(names::OBJECT)),
            interfaces: Vec::new(),
            is_interface: false,
            backing: Backing::None,
            methods: Vec::new(),
            constructors: Vec::new(),
            fields: Vec::new(),
        }
    }
}

/// Immutable registry shared by every connection.
#[derive(Debug, Default)]
pub struct Registry {
    classes: HashMap<Arc<str>, Arc<ClassDescriptor>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry holding only the built-in classes.
    pub fn with_builtins() -> Arc<Registry> {
        RegistryBuilder::new().with_builtins().build()
    }

    pub fn class(&self, name: &str) -> Option<&Arc<ClassDescriptor>> {
        self.classes.get(name)
    }

    pub fn class_names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a type name refers to something this universe knows.
    pub fn type_exists(&self, name: &str) -> bool {
        match NativeType::parse(name) {
            NativeType::Primitive(_) => true,
            NativeType::Array(component) => self.type_exists(&component.to_string()),
            NativeType::Class(c) => self.classes.contains_key(&c),
            NativeType::Proxy(_) => false,
        }
    }

    /// Immediate superclass, following the platform rules: interfaces and
    /// `Object` have none, arrays and closures extend `Object`.
    pub fn superclass_of(&self, ty: &NativeType) -> Option<NativeType> {
        match ty {
            NativeType::Primitive(_) => None,
            NativeType::Class(name) if &**name == names::OBJECT => None,
            NativeType::Class(name) => match self.classes.get(name) {
                Some(desc) if desc.is_interface => None,
                Some(desc) => desc.superclass.as_ref().map(|s| NativeType::Class(s.clone())),
                None => Some(NativeType::object()),
            },
            NativeType::Array(_) | NativeType::Proxy(_) => Some(NativeType::object()),
        }
    }

    /// All supertypes of a class: itself, its superclass chain, then
    /// interfaces breadth-first, then `Object`.
    pub fn ancestors(&self, name: &str) -> Vec<Arc<str>> {
        let mut out: Vec<Arc<str>> = Vec::new();
        let mut seen: HashSet<Arc<str>> = HashSet::new();
        let mut interfaces: VecDeque<Arc<str>> = VecDeque::new();

        let mut current: Option<Arc<str>> = Some(Arc::from(name));
        while let Some(class) = current.take() {
            if !seen.insert(class.clone()) {
                break;
            }
            out.push(class.clone());
            if let Some(desc) = self.classes.get(&class) {
                interfaces.extend(desc.interfaces.iter().cloned());
                if !desc.is_interface {
                    current = desc.superclass.clone();
                }
            }
        }

        while let Some(iface) = interfaces.pop_front() {
            if !seen.insert(iface.clone()) {
                continue;
            }
            if let Some(desc) = self.classes.get(&iface) {
                interfaces.extend(desc.interfaces.iter().cloned());
            }
            out.push(iface);
        }

        let object: Arc<str> = Arc::from(names::OBJECT);
        if !seen.contains(&object) {
            out.push(object);
        }
        out
    }

    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sub == sup || sup == names::OBJECT || self.ancestors(sub).iter().any(|a| &**a == sup)
    }

    /// Whether a value of type `arg` may be passed where `param` is declared.
    pub fn is_assignable(&self, param: &NativeType, arg: &NativeType) -> bool {
        if param == arg {
            return true;
        }
        match (param, arg) {
            (NativeType::Primitive(_), _) | (_, NativeType::Primitive(_)) => false,
            (NativeType::Class(p), _) if &**p == names::OBJECT => true,
            (NativeType::Class(p), NativeType::Class(a)) => self.is_subclass(a, p),
            (NativeType::Class(p), NativeType::Proxy(ifaces)) => {
                ifaces.iter().any(|i| self.is_subclass(i, p))
            }
            (NativeType::Array(pc), NativeType::Array(ac)) => {
                if pc.is_primitive() || ac.is_primitive() {
                    pc == ac
                } else {
                    self.is_assignable(pc, ac)
                }
            }
            _ => false,
        }
    }

    /// Methods named `name` (ignoring case) visible on `owner`, most
    /// derived first. Overridden signatures appear once.
    pub fn methods_named(
        &self,
        owner: &NativeType,
        name: &str,
        static_only: bool,
    ) -> Vec<Arc<MethodDescriptor>> {
        let classes = match owner {
            NativeType::Primitive(_) => return Vec::new(),
            NativeType::Class(c) => self.ancestors(c),
            NativeType::Array(_) => vec![Arc::from(names::OBJECT)],
            NativeType::Proxy(ifaces) => {
                let mut all: Vec<Arc<str>> = Vec::new();
                for iface in ifaces.iter() {
                    for a in self.ancestors(iface) {
                        if !all.contains(&a) {
                            all.push(a);
                        }
                    }
                }
                all
            }
        };

        let mut found: Vec<Arc<MethodDescriptor>> = Vec::new();
        for class in classes {
            let Some(desc) = self.classes.get(&class) else {
                continue;
            };
            for method in &desc.methods {
                if !method.name.eq_ignore_ascii_case(name) || (static_only && !method.is_static) {
                    continue;
                }
                if found.iter().any(|m| m.same_signature(method)) {
                    continue;
                }
                found.push(method.clone());
            }
        }
        found
    }

    pub fn constructors(&self, class: &str) -> Vec<Arc<ConstructorDescriptor>> {
        self.classes
            .get(class)
            .map(|d| d.constructors.clone())
            .unwrap_or_default()
    }

    /// Field visible on `owner`, searching the superclass chain.
    pub fn find_field(
        &self,
        owner: &NativeType,
        name: &str,
        ignore_case: bool,
        static_only: bool,
    ) -> Option<Arc<FieldDescriptor>> {
        let NativeType::Class(class) = owner else {
            return None;
        };
        for ancestor in self.ancestors(class) {
            let Some(desc) = self.classes.get(&ancestor) else {
                continue;
            };
            let hit = desc.fields.iter().find(|f| {
                let matches = if ignore_case {
                    f.name.eq_ignore_ascii_case(name)
                } else {
                    &*f.name == name
                };
                matches && (!static_only || f.is_static)
            });
            if let Some(field) = hit {
                return Some(field.clone());
            }
        }
        None
    }

    /// Concrete storage a class instantiates.
    pub fn backing(&self, class: &str) -> Backing {
        self.classes
            .get(class)
            .filter(|d| !d.is_interface)
            .map(|d| d.backing)
            .unwrap_or_default()
    }

    /// Multi-line listing of a class's members.
    pub fn describe_class(&self, name: &str) -> Option<String> {
        let desc = self.classes.get(name)?;
        let mut out = format!(
            "{} {}",
            if desc.is_interface { "interface" } else { "class" },
            desc.name
        );
        if let Some(sup) = &desc.superclass {
            out.push_str(&format!(" extends {}", sup));
        }
        if !desc.interfaces.is_empty() {
            let ifaces: Vec<&str> = desc.interfaces.iter().map(|i| &**i).collect();
            out.push_str(&format!(" implements {}", ifaces.join(", ")));
        }
        for c in &desc.constructors {
            out.push_str(&format!("\n  new {}", c.signature()));
        }
        for f in &desc.fields {
            out.push_str(&format!("\n  {:?}", f));
        }
        for m in &desc.methods {
            out.push_str(&format!("\n  {}", m.signature()));
        }
        Some(out)
    }
}

/// Collects class descriptors before freezing them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    classes: HashMap<Arc<str>, ClassDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the built-in classes and the connection root.
    pub fn with_builtins(mut self) -> Self {
        builtins::register(&mut self);
        crate::bridge::register_root(&mut self);
        self
    }

    /// Start (or reopen) the class `name`.
    pub fn class(&mut self, name: &str) -> ClassBuilder<'_> {
        let desc = self
            .classes
            .remove(name)
            .unwrap_or_else(|| ClassDescriptor::new(name));
        ClassBuilder {
            registry: self,
            desc,
        }
    }

    /// Start an interface.
    pub fn interface(&mut self, name: &str) -> ClassBuilder<'_> {
        let mut builder = self.class(name);
        builder.desc.is_interface = true;
        builder.desc.superclass = None;
        builder
    }

    pub fn build(self) -> Arc<Registry> {
        let classes = self
            .classes
            .into_iter()
            .map(|(name, desc)| (name, Arc::new(desc)))
            .collect();
        Arc::new(Registry { classes })
    }
}

pub struct ClassBuilder<'a> {
    registry: &'a mut RegistryBuilder,
    desc: ClassDescriptor,
}

impl<'a> ClassBuilder<'a> {
    pub fn extends(mut self, superclass: &str) -> Self {
        self.desc.superclass = Some(Arc::from(superclass));
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.desc.interfaces.push(Arc::from(interface));
        self
    }

    pub fn backing(mut self, backing: Backing) -> Self {
        self.desc.backing = backing;
        self
    }

    pub fn constructor<F>(self, params: &[NativeType], body: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.add_constructor(params, false, body)
    }

    pub fn constructor_throwing<F>(self, params: &[NativeType], body: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.add_constructor(params, true, body)
    }

    fn add_constructor<F>(mut self, params: &[NativeType], declares_errors: bool, body: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, Vec<Value>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.desc.constructors.push(Arc::new(ConstructorDescriptor {
            class: self.desc.name.clone(),
            params: params.to_vec(),
            declares_errors,
            body: Arc::new(body),
        }));
        self
    }

    /// Instance method.
    pub fn method<F>(self, name: &str, params: &[NativeType], ret: NativeType, body: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &Value, Vec<Value>) -> Result<Value, Fault>
            + Send
            + Sync
            + 'static,
    {
        self.add_method(MethodDescriptor::new(name, params, ret, body))
    }

    /// Static method; the receiver passed to `body` is the class value.
    pub fn static_method<F>(self, name: &str, params: &[NativeType], ret: NativeType, body: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &Value, Vec<Value>) -> Result<Value, Fault>
            + Send
            + Sync
            + 'static,
    {
        self.add_method(MethodDescriptor::new(name, params, ret, body).with_static())
    }

    pub fn abstract_method(self, name: &str, params: &[NativeType], ret: NativeType) -> Self {
        self.add_method(MethodDescriptor::abstract_method(name, params, ret))
    }

    pub fn add_method(mut self, mut method: MethodDescriptor) -> Self {
        method.owner = self.desc.name.clone();
        self.desc.methods.push(Arc::new(method));
        self
    }

    /// Read-only field.
    pub fn field<G>(self, name: &str, ty: NativeType, is_static: bool, getter: G) -> Self
    where
        G: Fn(&Value) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.add_field(FieldDescriptor {
            name: Arc::from(name),
            ty,
            is_static,
            getter: Arc::new(getter),
            setter: None,
        })
    }

    /// Writable instance field.
    pub fn mutable_field<G, S>(self, name: &str, ty: NativeType, getter: G, setter: S) -> Self
    where
        G: Fn(&Value) -> Result<Value, Fault> + Send + Sync + 'static,
        S: Fn(&Value, Value) -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.add_field(FieldDescriptor {
            name: Arc::from(name),
            ty,
            is_static: false,
            getter: Arc::new(getter),
            setter: Some(Arc::new(setter)),
        })
    }

    fn add_field(mut self, field: FieldDescriptor) -> Self {
        self.desc.fields.push(Arc::new(field));
        self
    }

    /// Finish the class and add it to the registry.
    pub fn register(self) {
        let ClassBuilder { registry, desc } = self;
        registry.classes.insert(desc.name.clone(), desc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<Registry> {
        Registry::with_builtins()
    }

    #[test]
    fn test_builtin_hierarchy() {
        let r = registry();
        assert!(r.is_subclass("ArrayList", "List"));
        assert!(r.is_subclass("ArrayList", "Collection"));
        assert!(r.is_subclass("Integer", "Number"));
        assert!(r.is_subclass("IllegalArgumentException", "Throwable"));
        assert!(!r.is_subclass("HashMap", "Collection"));
    }

    #[test]
    fn test_superclass_walk() {
        let r = registry();
        assert_eq!(
            r.superclass_of(&NativeType::class("Integer")),
            Some(NativeType::class("Number"))
        );
        assert_eq!(
            r.superclass_of(&NativeType::class("Number")),
            Some(NativeType::object())
        );
        assert_eq!(r.superclass_of(&NativeType::object()), None);
        assert_eq!(r.superclass_of(&NativeType::class("List")), None);
        assert_eq!(r.superclass_of(&NativeType::INT), None);
    }

    #[test]
    fn test_assignability() {
        let r = registry();
        let object = NativeType::object();
        assert!(r.is_assignable(&object, &NativeType::class("String")));
        assert!(r.is_assignable(&object, &NativeType::array_of(NativeType::INT)));
        assert!(!r.is_assignable(&NativeType::INT, &NativeType::class("Integer")));
        assert!(r.is_assignable(
            &NativeType::array_of(NativeType::object()),
            &NativeType::array_of(NativeType::string())
        ));
        assert!(!r.is_assignable(
            &NativeType::array_of(NativeType::object()),
            &NativeType::array_of(NativeType::INT)
        ));
        assert!(r.is_assignable(&NativeType::class("Map"), &NativeType::class("PeerArray")));
    }

    #[test]
    fn test_proxy_assignability() {
        let r = registry();
        let proxy = NativeType::Proxy(Arc::from(vec![Arc::from("Runnable")]));
        assert!(r.is_assignable(&NativeType::class("Runnable"), &proxy));
        assert!(!r.is_assignable(&NativeType::class("List"), &proxy));
    }

    #[test]
    fn test_methods_named_ignores_case_and_overrides() {
        let mut b = RegistryBuilder::new();
        b.class("Base")
            .method("describe", &[], NativeType::string(), |_, _, _| Ok(Value::from("base")))
            .register();
        b.class("Derived")
            .extends("Base")
            .method("Describe", &[], NativeType::string(), |_, _, _| Ok(Value::from("derived")))
            .register();
        let r = b.build();

        let found = r.methods_named(&NativeType::class("Derived"), "DESCRIBE", false);
        assert_eq!(found.len(), 1);
        assert_eq!(&*found[0].owner, "Derived");
    }

    #[test]
    fn test_static_only_filter() {
        let r = registry();
        let statics = r.methods_named(&NativeType::class("Integer"), "parseInt", true);
        assert_eq!(statics.len(), 1);
        let none = r.methods_named(&NativeType::class("ArrayList"), "size", true);
        assert!(none.is_empty());
    }

    #[test]
    fn test_type_exists() {
        let r = registry();
        assert!(r.type_exists("int"));
        assert!(r.type_exists("ArrayList"));
        assert!(r.type_exists("String[]"));
        assert!(!r.type_exists("NoSuchType"));
    }

    #[test]
    fn test_backing() {
        let r = registry();
        assert_eq!(r.backing("LinkedList"), Backing::List);
        assert_eq!(r.backing("Hashtable"), Backing::Map);
        assert_eq!(r.backing("List"), Backing::None);
    }

    #[test]
    fn test_describe_class() {
        let r = registry();
        let text = r.describe_class("ArrayList").unwrap();
        assert!(text.starts_with("class ArrayList extends Object implements List"));
        assert!(text.contains("int ArrayList.size()"));
    }
}
