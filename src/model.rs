//! The class-model abstraction and the known-methods classification table.
//!
//! The concrete bytecode library that parses real class files is out of
//! scope; `ClassModel` is the minimum read-only view a rewrite-policy
//! engine needs to decide what to instrument, so the policy in
//! [`crate::rewriter`] can be written and tested against a plain Rust
//! stand-in ([`StaticClassModel`]) instead of a real parser.

use std::fmt;

use string_cache::DefaultAtom;

/// How the known-methods table classifies a single method of a
/// standard-library container class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    /// No capture, no lock: `size`, `iterator`, `equals`, …
    Immutable,
    /// Captured with an inline delta from the method's own return value;
    /// `synchronize? = false`.
    Documented,
    /// Rewritten to delegate to the `Documented` method per element.
    Replaceable,
    /// Wrapped with a before/after `Multiset` snapshot; `synchronize? = true`.
    Default,
}

impl MethodKind {
    /// Whether the rewriter must synchronize on the container's
    /// `ContainerLock` for a method of this kind.
    pub fn requires_synchronization(self) -> bool {
        matches!(self, MethodKind::Default)
    }
}

/// Which standard-library container family a class belongs to, for the
/// purpose of picking a known-methods table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFamily {
    List,
    Set,
    Map,
}

/// A method name plus descriptor, the unit the known-methods table and
/// `ClassModel::declared_methods` both classify and enumerate. Carries the
/// `static`/bridge flags the rewriter needs to decide which role (if any)
/// applies to a given method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: DefaultAtom,
    pub descriptor: DefaultAtom,
    pub is_static: bool,
    pub is_bridge: bool,
}

impl MethodSignature {
    pub fn new(name: &str, descriptor: &str) -> Self {
        MethodSignature {
            name: DefaultAtom::from(name),
            descriptor: DefaultAtom::from(descriptor),
            is_static: false,
            is_bridge: false,
        }
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_bridge(mut self) -> Self {
        self.is_bridge = true;
        self
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

/// Classifies a method of a class in `family` per the built-in known-methods
/// table. A class outside the standard library has no `ContainerFamily` and
/// every method defaults to [`MethodKind::Default`].
pub fn classify(family: ContainerFamily, method: &MethodSignature) -> MethodKind {
    match family {
        ContainerFamily::Map => classify_map(method),
        ContainerFamily::List | ContainerFamily::Set => classify_collection(method),
    }
}

fn classify_collection(method: &MethodSignature) -> MethodKind {
    match &*method.name {
        "size" | "isEmpty" | "contains" | "containsAll" | "iterator" | "toArray" | "equals"
        | "hashCode" | "toString" | "subList" | "listIterator" | "indexOf" | "lastIndexOf"
        | "get" | "clone" => MethodKind::Immutable,
        "add" if &*method.descriptor == "(Ljava/lang/Object;)Z" => MethodKind::Documented,
        "remove" if &*method.descriptor == "(Ljava/lang/Object;)Z" => MethodKind::Documented,
        "addAll" | "removeAll" | "retainAll" => MethodKind::Replaceable,
        _ => MethodKind::Default,
    }
}

fn classify_map(method: &MethodSignature) -> MethodKind {
    match &*method.name {
        "size" | "isEmpty" | "containsKey" | "containsValue" | "get" | "keySet" | "values"
        | "entrySet" | "equals" | "hashCode" | "toString" | "clone" => MethodKind::Immutable,
        "put" => MethodKind::Documented,
        "remove" if &*method.descriptor == "(Ljava/lang/Object;)Ljava/lang/Object;" => {
            MethodKind::Documented
        }
        "putAll" => MethodKind::Replaceable,
        _ => MethodKind::Default,
    }
}

/// A read-only view of a class: its name, superclass, declared interfaces,
/// nestmates, and declared method signatures. A real integration builds
/// this from whatever bytecode library it embeds; this crate never parses
/// `.class` bytes.
pub trait ClassModel {
    fn name(&self) -> &str;
    fn superclass(&self) -> Option<&str>;
    fn interfaces(&self) -> &[String];
    fn nestmates(&self) -> &[String];
    fn declared_methods(&self) -> &[MethodSignature];
    fn declared_fields(&self) -> &[FieldSignature];
}

/// A field this class itself declares: its name, descriptor, and whether
/// it is static. The field-owner role only inserts capture calls at writes
/// to fields the class declares, never to inherited ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSignature {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
}

impl FieldSignature {
    pub fn instance(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        FieldSignature {
            name: name.into(),
            descriptor: descriptor.into(),
            is_static: false,
        }
    }

    pub fn static_field(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        FieldSignature {
            name: name.into(),
            descriptor: descriptor.into(),
            is_static: true,
        }
    }
}

/// A [`ClassModel`] built from plain Rust structs, used by this crate's own
/// tests (and the demo binary) to exercise the rewrite-policy engine
/// end-to-end without any external parser.
#[derive(Clone, Debug, Default)]
pub struct StaticClassModel {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub nestmates: Vec<String>,
    pub declared_methods: Vec<MethodSignature>,
    pub declared_fields: Vec<FieldSignature>,
}

impl StaticClassModel {
    pub fn new(name: impl Into<String>) -> Self {
        StaticClassModel {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_superclass(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_nestmate(mut self, nestmate: impl Into<String>) -> Self {
        self.nestmates.push(nestmate.into());
        self
    }

    pub fn with_method(mut self, name: &str, descriptor: &str) -> Self {
        self.declared_methods.push(MethodSignature::new(name, descriptor));
        self
    }

    pub fn with_static_method(mut self, name: &str, descriptor: &str) -> Self {
        self.declared_methods
            .push(MethodSignature::new(name, descriptor).with_static());
        self
    }

    pub fn with_bridge_method(mut self, name: &str, descriptor: &str) -> Self {
        self.declared_methods
            .push(MethodSignature::new(name, descriptor).with_bridge());
        self
    }

    pub fn with_field(mut self, field: FieldSignature) -> Self {
        self.declared_fields.push(field);
        self
    }
}

impl ClassModel for StaticClassModel {
    fn name(&self) -> &str {
        &self.name
    }
    fn superclass(&self) -> Option<&str> {
        self.superclass.as_deref()
    }
    fn interfaces(&self) -> &[String] {
        &self.interfaces
    }
    fn nestmates(&self) -> &[String] {
        &self.nestmates
    }
    fn declared_methods(&self) -> &[MethodSignature] {
        &self.declared_methods
    }
    fn declared_fields(&self) -> &[FieldSignature] {
        &self.declared_fields
    }
}

/// A single field-write bytecode site the rewriter decided to instrument
/// (the field-owner role's output).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldWriteSite {
    pub field_name: String,
    pub is_static: bool,
}

/// The computed output of rewriting one class: which field writes to
/// instrument, the capture strategy chosen for each declared method of a
/// known container class, and which methods got the field-op-tracker
/// wrapping (the nestmate/static-method role). A real bytecode backend
/// would consume this to emit new class bytes; here it is either inspected
/// directly by tests or rendered as text when `DEBUG` is set.
#[derive(Clone, Debug)]
pub struct InstrumentationPlan {
    pub class_name: String,
    pub field_write_sites: Vec<FieldWriteSite>,
    pub method_strategies: Vec<(MethodSignature, MethodKind)>,
    pub field_op_tracked_methods: Vec<MethodSignature>,
}

impl InstrumentationPlan {
    pub fn new(class_name: impl Into<String>) -> Self {
        InstrumentationPlan {
            class_name: class_name.into(),
            field_write_sites: Vec::new(),
            method_strategies: Vec::new(),
            field_op_tracked_methods: Vec::new(),
        }
    }

    /// Renders a human-readable description of the plan, the stand-in this
    /// crate uses in place of dumping rewritten class bytes to
    /// `instrumented_<name>.class`.
    pub fn render(&self) -> String {
        let mut out = format!("class {}\n", self.class_name);
        for site in &self.field_write_sites {
            out.push_str(&format!(
                "  capture write: {} ({})\n",
                site.field_name,
                if site.is_static { "static" } else { "instance" }
            ));
        }
        for (method, kind) in &self.method_strategies {
            out.push_str(&format!("  {} -> {:?}\n", method, kind));
        }
        for method in &self.field_op_tracked_methods {
            out.push_str(&format!("  {} -> field-op tracker\n", method));
        }
        out
    }
}
