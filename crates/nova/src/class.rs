use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use crate::{
    env::Env,
    error::{ErrorKind, RunError, RunResult},
    mir::{MirFunction, Param},
    value::Value,
};

/// Member visibility recorded per method and per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// Modifier flags on a class declaration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassModifiers {
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub is_data: bool,
    pub is_annotation: bool,
    /// Single-instance `object` declaration.
    pub is_object: bool,
    pub is_enum: bool,
}

/// One entry of a class's ordered instance-initialiser list: field
/// initialisers interleaved with `init` blocks, run in declaration order
/// with `this` bound.
#[derive(Debug, Clone)]
pub enum Initializer {
    /// Assigns the thunk's result to the named instance field.
    Field(Arc<str>, Arc<MirFunction>),
    /// Runs the block for its effects.
    Block(Arc<MirFunction>),
}

/// A declared constructor.
///
/// The primary constructor is non-delegating; secondary constructors may
/// delegate to a sibling via `delegates`, a thunk evaluating the delegation
/// argument list.
#[derive(Debug, Clone)]
pub struct Constructor {
    pub params: Vec<Param>,
    /// Constructor body; `None` for the synthesized empty primary body.
    pub body: Option<Arc<MirFunction>>,
    /// Definition environment for parameter defaults and the body.
    pub captures: Env,
    /// `this(...)` delegation arguments, evaluated in the constructor's
    /// environment; the thunk returns a `List` of the sibling arguments.
    pub delegates: Option<Arc<MirFunction>>,
    pub is_primary: bool,
    /// Whether missing trailing arguments may be padded with `Null`.
    pub pad_with_null: bool,
}

impl Constructor {
    /// Declared parameter count, or -1 when the last parameter is vararg.
    #[must_use]
    pub fn arity(&self) -> i32 {
        if self.params.last().is_some_and(|p| p.vararg) {
            -1
        } else {
            self.params.len() as i32
        }
    }

    /// Number of parameters without a default value (and not vararg).
    #[must_use]
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none() && !p.vararg).count()
    }
}

/// Cached reflective descriptor for a class, built on first request.
#[derive(Debug, Clone)]
pub struct ClassMirror {
    pub name: Arc<str>,
    pub module: Arc<str>,
    pub fields: Vec<Arc<str>>,
    pub methods: Vec<Arc<str>>,
    pub modifiers: ClassModifiers,
}

/// A class descriptor.
///
/// The field layout is computed once at build time and frozen; instance field
/// access by name resolves to a slot index in O(1) via `field_index`. Statics
/// are the only mutable class state after registration.
pub struct ClassDef {
    name: Arc<str>,
    /// Name of the module that declared this class, for sealed-extension checks.
    defining_module: Arc<str>,
    superclass: Option<Arc<ClassDef>>,
    interfaces: Vec<Arc<InterfaceDef>>,
    /// Host class tags this class extends through the foreign bridge.
    foreign_supers: Vec<Arc<str>>,
    modifiers: ClassModifiers,
    /// Ordered instance-field names; slot indices follow this order.
    field_layout: Vec<Arc<str>>,
    field_index: AHashMap<Arc<str>, usize>,
    statics: RwLock<AHashMap<Arc<str>, Value>>,
    methods: AHashMap<Arc<str>, Value>,
    abstract_methods: AHashSet<Arc<str>>,
    method_visibility: AHashMap<Arc<str>, Visibility>,
    field_visibility: AHashMap<Arc<str>, Visibility>,
    constructors: Vec<Arc<Constructor>>,
    primary: Option<Arc<Constructor>>,
    /// Declared data-field order for `data` classes.
    data_order: Vec<Arc<str>>,
    /// Thunk evaluating the declared superclass constructor arguments,
    /// returning a `List`.
    super_args: Option<Arc<MirFunction>>,
    initializers: Vec<Initializer>,
    /// Enum entries in ordinal order, for `is_enum` classes.
    enum_entries: RwLock<Vec<Arc<EnumEntry>>>,
    /// Set after the first successful instantiation validation.
    validated: AtomicBool,
    /// Set after foreign unimplemented-method checks pass once.
    foreign_checked: AtomicBool,
    mirror: OnceLock<Arc<ClassMirror>>,
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("module", &self.defining_module)
            .field("fields", &self.field_layout)
            .finish_non_exhaustive()
    }
}

impl ClassDef {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn defining_module(&self) -> &str {
        &self.defining_module
    }

    #[must_use]
    pub fn superclass(&self) -> Option<&Arc<ClassDef>> {
        self.superclass.as_ref()
    }

    #[must_use]
    pub fn interfaces(&self) -> &[Arc<InterfaceDef>] {
        &self.interfaces
    }

    #[must_use]
    pub fn foreign_supers(&self) -> &[Arc<str>] {
        &self.foreign_supers
    }

    #[must_use]
    pub fn modifiers(&self) -> ClassModifiers {
        self.modifiers
    }

    #[must_use]
    pub fn field_layout(&self) -> &[Arc<str>] {
        &self.field_layout
    }

    /// Slot index of an instance field, in O(1).
    #[must_use]
    pub fn field_slot(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    #[must_use]
    pub fn data_order(&self) -> &[Arc<str>] {
        &self.data_order
    }

    #[must_use]
    pub fn constructors(&self) -> &[Arc<Constructor>] {
        &self.constructors
    }

    #[must_use]
    pub fn primary_constructor(&self) -> Option<&Arc<Constructor>> {
        self.primary.as_ref()
    }

    #[must_use]
    pub fn super_args(&self) -> Option<&Arc<MirFunction>> {
        self.super_args.as_ref()
    }

    #[must_use]
    pub fn initializers(&self) -> &[Initializer] {
        &self.initializers
    }

    /// Reads a static field.
    #[must_use]
    pub fn static_field(&self, name: &str) -> Option<Value> {
        self.statics.read().get(name).cloned()
    }

    /// Writes a static field.
    pub fn set_static(&self, name: Arc<str>, value: Value) {
        self.statics.write().insert(name, value);
    }

    /// Visibility of a declared method, defaulting to public.
    #[must_use]
    pub fn method_visibility(&self, name: &str) -> Visibility {
        self.method_visibility.get(name).copied().unwrap_or_default()
    }

    /// Visibility of a declared field, defaulting to public.
    #[must_use]
    pub fn field_visibility(&self, name: &str) -> Visibility {
        self.field_visibility.get(name).copied().unwrap_or_default()
    }

    /// Method declared directly on this class (no chain walk).
    #[must_use]
    pub fn own_method(&self, name: &str) -> Option<&Value> {
        self.methods.get(name)
    }

    /// Iterates the method table of this class only.
    pub fn own_methods(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.methods.iter()
    }

    /// Resolves `name` through the method table, then the superclass chain,
    /// then the default methods of each implemented interface in declaration
    /// order. The first hit wins; the result is an unbound callable.
    #[must_use]
    pub fn lookup_method(&self, name: &str) -> Option<Value> {
        let mut cursor = Some(self);
        while let Some(class) = cursor {
            if let Some(found) = class.methods.get(name) {
                return Some(found.clone());
            }
            cursor = class.superclass.as_deref();
        }
        let mut cursor = Some(self);
        while let Some(class) = cursor {
            for iface in &class.interfaces {
                if let Some(found) = iface.lookup_default(name) {
                    return Some(found);
                }
            }
            cursor = class.superclass.as_deref();
        }
        None
    }

    /// Abstract method names not overridden anywhere below their declaration.
    ///
    /// Walks this class and its supers plus interface abstract methods,
    /// returning those without a concrete implementation in the chain.
    #[must_use]
    pub fn unimplemented_abstract(&self) -> Vec<Arc<str>> {
        let mut missing = Vec::new();
        let mut seen = AHashSet::new();
        let mut cursor = Some(self);
        while let Some(class) = cursor {
            for name in &class.abstract_methods {
                if seen.insert(name.clone()) && self.lookup_method(name).is_none() {
                    missing.push(name.clone());
                }
            }
            for iface in &class.interfaces {
                iface.collect_abstract(&mut seen, &mut missing, self);
            }
            cursor = class.superclass.as_deref();
        }
        missing
    }

    /// Whether this class equals `other` or has it in its superclass chain.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Arc<ClassDef>) -> bool {
        let mut cursor = Some(self);
        while let Some(class) = cursor {
            if std::ptr::eq(class, Arc::as_ptr(other)) {
                return true;
            }
            cursor = class.superclass.as_deref();
        }
        false
    }

    /// Whether instantiation validation has already passed.
    pub(crate) fn is_validated(&self) -> bool {
        self.validated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_validated(&self) {
        self.validated.store(true, Ordering::Release);
    }

    pub(crate) fn is_foreign_checked(&self) -> bool {
        self.foreign_checked.load(Ordering::Acquire)
    }

    pub(crate) fn mark_foreign_checked(&self) {
        self.foreign_checked.store(true, Ordering::Release);
    }

    /// Enum entries in ordinal order.
    #[must_use]
    pub fn enum_entries(&self) -> Vec<Arc<EnumEntry>> {
        self.enum_entries.read().clone()
    }

    /// The cached reflective descriptor, built on first request.
    #[must_use]
    pub fn mirror(&self) -> Arc<ClassMirror> {
        self.mirror
            .get_or_init(|| {
                Arc::new(ClassMirror {
                    name: self.name.clone(),
                    module: self.defining_module.clone(),
                    fields: self.field_layout.clone(),
                    methods: self.methods.keys().cloned().collect(),
                    modifiers: self.modifiers,
                })
            })
            .clone()
    }
}

/// An entry of an enum class: a named singleton with an ordinal, its own
/// field values, and optional entry-specific method overrides.
#[derive(Debug)]
pub struct EnumEntry {
    owner: Arc<ClassDef>,
    name: Arc<str>,
    ordinal: usize,
    fields: RwLock<AHashMap<Arc<str>, Value>>,
    methods: AHashMap<Arc<str>, Value>,
}

impl EnumEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    #[must_use]
    pub fn owner(&self) -> &ClassDef {
        &self.owner
    }

    #[must_use]
    pub fn owner_arc(&self) -> &Arc<ClassDef> {
        &self.owner
    }

    /// Reads an entry field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_field(&self, name: Arc<str>, value: Value) {
        self.fields.write().insert(name, value);
    }

    /// Resolves a method: entry overrides first, then the enum class chain.
    #[must_use]
    pub fn lookup_method(&self, name: &str) -> Option<Value> {
        if let Some(found) = self.methods.get(name) {
            return Some(found.clone());
        }
        self.owner.lookup_method(name)
    }
}

/// A method slot on an interface: abstract unless a default body is present.
#[derive(Debug, Clone)]
pub struct InterfaceMethod {
    pub name: Arc<str>,
    pub default_impl: Option<Value>,
    pub is_static: bool,
}

impl InterfaceMethod {
    fn is_abstract(&self) -> bool {
        self.default_impl.is_none() && !self.is_static
    }
}

/// An interface descriptor.
#[derive(Debug)]
pub struct InterfaceDef {
    name: Arc<str>,
    extends: Vec<Arc<InterfaceDef>>,
    /// Declaration-ordered method slots.
    methods: Vec<InterfaceMethod>,
    sam: OnceLock<Option<Arc<str>>>,
}

impl InterfaceDef {
    #[must_use]
    pub fn new(name: impl AsRef<str>, extends: Vec<Arc<InterfaceDef>>, methods: Vec<InterfaceMethod>) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name.as_ref()),
            extends,
            methods,
            sam: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn extends(&self) -> &[Arc<InterfaceDef>] {
        &self.extends
    }

    #[must_use]
    pub fn methods(&self) -> &[InterfaceMethod] {
        &self.methods
    }

    /// Resolves a default method on this interface or its extends chain.
    #[must_use]
    pub fn lookup_default(&self, name: &str) -> Option<Value> {
        if let Some(m) = self.methods.iter().find(|m| &*m.name == name) {
            if let Some(body) = &m.default_impl {
                return Some(body.clone());
            }
        }
        for parent in &self.extends {
            if let Some(found) = parent.lookup_default(name) {
                return Some(found);
            }
        }
        None
    }

    fn collect_abstract(&self, seen: &mut AHashSet<Arc<str>>, missing: &mut Vec<Arc<str>>, target: &ClassDef) {
        for m in &self.methods {
            if m.is_abstract()
                && seen.insert(m.name.clone())
                && target.lookup_method(&m.name).is_none()
            {
                missing.push(m.name.clone());
            }
        }
        for parent in &self.extends {
            parent.collect_abstract(seen, missing, target);
        }
    }

    /// The single abstract method, when this interface is a SAM shape.
    ///
    /// Recognised when the interface has exactly one non-default non-static
    /// abstract method that is not `toString`/`hashCode`/`equals`.
    #[must_use]
    pub fn sam_method(&self) -> Option<Arc<str>> {
        self.sam
            .get_or_init(|| {
                let mut found: Option<Arc<str>> = None;
                for m in &self.methods {
                    if !m.is_abstract() || matches!(&*m.name, "toString" | "hashCode" | "equals") {
                        continue;
                    }
                    if found.is_some() {
                        return None;
                    }
                    found = Some(m.name.clone());
                }
                found
            })
            .clone()
    }
}

/// Fluent builder assembling a [`ClassDef`].
///
/// Used by the lowering collaborator's class registration pass and by tests.
/// The field layout freezes at `build`; the index map is derived then.
pub struct ClassBuilder {
    name: Arc<str>,
    defining_module: Arc<str>,
    superclass: Option<Arc<ClassDef>>,
    interfaces: Vec<Arc<InterfaceDef>>,
    foreign_supers: Vec<Arc<str>>,
    modifiers: ClassModifiers,
    field_layout: Vec<Arc<str>>,
    statics: AHashMap<Arc<str>, Value>,
    methods: AHashMap<Arc<str>, Value>,
    abstract_methods: AHashSet<Arc<str>>,
    method_visibility: AHashMap<Arc<str>, Visibility>,
    field_visibility: AHashMap<Arc<str>, Visibility>,
    constructors: Vec<Arc<Constructor>>,
    primary: Option<Arc<Constructor>>,
    data_order: Vec<Arc<str>>,
    super_args: Option<Arc<MirFunction>>,
    initializers: Vec<Initializer>,
}

impl ClassBuilder {
    #[must_use]
    pub fn new(name: impl AsRef<str>, defining_module: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            defining_module: Arc::from(defining_module.as_ref()),
            superclass: None,
            interfaces: Vec::new(),
            foreign_supers: Vec::new(),
            modifiers: ClassModifiers::default(),
            field_layout: Vec::new(),
            statics: AHashMap::new(),
            methods: AHashMap::new(),
            abstract_methods: AHashSet::new(),
            method_visibility: AHashMap::new(),
            field_visibility: AHashMap::new(),
            constructors: Vec::new(),
            primary: None,
            data_order: Vec::new(),
            super_args: None,
            initializers: Vec::new(),
        }
    }

    #[must_use]
    pub fn superclass(mut self, class: Arc<ClassDef>) -> Self {
        self.superclass = Some(class);
        self
    }

    #[must_use]
    pub fn interface(mut self, iface: Arc<InterfaceDef>) -> Self {
        self.interfaces.push(iface);
        self
    }

    #[must_use]
    pub fn foreign_super(mut self, tag: impl AsRef<str>) -> Self {
        self.foreign_supers.push(Arc::from(tag.as_ref()));
        self
    }

    #[must_use]
    pub fn modifiers(mut self, modifiers: ClassModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Appends an instance field to the frozen layout.
    #[must_use]
    pub fn field(mut self, name: impl AsRef<str>) -> Self {
        self.field_layout.push(Arc::from(name.as_ref()));
        self
    }

    #[must_use]
    pub fn field_with_visibility(mut self, name: impl AsRef<str>, vis: Visibility) -> Self {
        let name: Arc<str> = Arc::from(name.as_ref());
        self.field_visibility.insert(name.clone(), vis);
        self.field_layout.push(name);
        self
    }

    #[must_use]
    pub fn static_field(mut self, name: impl AsRef<str>, value: Value) -> Self {
        self.statics.insert(Arc::from(name.as_ref()), value);
        self
    }

    #[must_use]
    pub fn method(mut self, name: impl AsRef<str>, callable: Value) -> Self {
        self.methods.insert(Arc::from(name.as_ref()), callable);
        self
    }

    #[must_use]
    pub fn method_with_visibility(mut self, name: impl AsRef<str>, callable: Value, vis: Visibility) -> Self {
        let name: Arc<str> = Arc::from(name.as_ref());
        self.method_visibility.insert(name.clone(), vis);
        self.methods.insert(name, callable);
        self
    }

    #[must_use]
    pub fn abstract_method(mut self, name: impl AsRef<str>) -> Self {
        self.abstract_methods.insert(Arc::from(name.as_ref()));
        self
    }

    /// Appends a secondary constructor.
    #[must_use]
    pub fn constructor(mut self, ctor: Constructor) -> Self {
        self.constructors.push(Arc::new(ctor));
        self
    }

    /// Installs the primary constructor (also first in the constructor list).
    #[must_use]
    pub fn primary_constructor(mut self, ctor: Constructor) -> Self {
        let ctor = Arc::new(Constructor { is_primary: true, ..ctor });
        self.primary = Some(ctor.clone());
        self.constructors.insert(0, ctor);
        self
    }

    /// Declares the ordered data-field list and sets the `data` modifier.
    #[must_use]
    pub fn data_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.modifiers.is_data = true;
        self.data_order = names.into_iter().map(|n| Arc::from(n.as_ref())).collect();
        self
    }

    #[must_use]
    pub fn super_args(mut self, thunk: Arc<MirFunction>) -> Self {
        self.super_args = Some(thunk);
        self
    }

    #[must_use]
    pub fn initializer(mut self, init: Initializer) -> Self {
        self.initializers.push(init);
        self
    }

    /// Freezes the layout and produces the descriptor.
    ///
    /// Inherited fields come first in the layout, so superclass constructors
    /// write the same slots on every subclass instance.
    #[must_use]
    pub fn build(self) -> Arc<ClassDef> {
        let mut field_layout: Vec<Arc<str>> = self
            .superclass
            .as_ref()
            .map(|superclass| superclass.field_layout().to_vec())
            .unwrap_or_default();
        for name in self.field_layout {
            if !field_layout.contains(&name) {
                field_layout.push(name);
            }
        }
        let field_index = field_layout
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Arc::new(ClassDef {
            name: self.name,
            defining_module: self.defining_module,
            superclass: self.superclass,
            interfaces: self.interfaces,
            foreign_supers: self.foreign_supers,
            modifiers: self.modifiers,
            field_layout,
            field_index,
            statics: RwLock::new(self.statics),
            methods: self.methods,
            abstract_methods: self.abstract_methods,
            method_visibility: self.method_visibility,
            field_visibility: self.field_visibility,
            constructors: self.constructors,
            primary: self.primary,
            data_order: self.data_order,
            super_args: self.super_args,
            initializers: self.initializers,
            enum_entries: RwLock::new(Vec::new()),
            validated: AtomicBool::new(false),
            foreign_checked: AtomicBool::new(false),
            mirror: OnceLock::new(),
        })
    }
}

/// Creates an enum entry and installs it as a static on its owner class.
pub fn add_enum_entry(
    owner: &Arc<ClassDef>,
    name: impl AsRef<str>,
    methods: impl IntoIterator<Item = (Arc<str>, Value)>,
) -> Arc<EnumEntry> {
    let mut entries = owner.enum_entries.write();
    let entry = Arc::new(EnumEntry {
        owner: owner.clone(),
        name: Arc::from(name.as_ref()),
        ordinal: entries.len(),
        fields: RwLock::new(AHashMap::new()),
        methods: methods.into_iter().collect(),
    });
    entries.push(entry.clone());
    drop(entries);
    owner.set_static(entry.name.clone(), Value::Enum(entry.clone()));
    entry
}

/// The engine's class and interface registry.
///
/// Registration happens per loaded module: the registrar receives the batch
/// of classes declared together, enforces sealed-extension legality against
/// that membership, and then discards the batch bookkeeping.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: RwLock<AHashMap<Arc<str>, Arc<ClassDef>>>,
    interfaces: RwLock<AHashMap<Arc<str>, Arc<InterfaceDef>>>,
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one module's classes, checking sealed-extension legality.
    ///
    /// A sealed class may only be extended by classes declared in the same
    /// module; the batch itself forms the membership set for classes that
    /// extend a sibling being registered in the same call.
    pub fn register_module(&self, classes: &[Arc<ClassDef>]) -> RunResult<()> {
        for class in classes {
            if let Some(superclass) = class.superclass()
                && superclass.modifiers().is_sealed
                && superclass.defining_module() != class.defining_module()
            {
                return Err(RunError::raise(
                    ErrorKind::SealedExtension,
                    format!(
                        "sealed class '{}' (module {}) cannot be extended by '{}' (module {})",
                        superclass.name(),
                        superclass.defining_module(),
                        class.name(),
                        class.defining_module(),
                    ),
                ));
            }
        }
        let mut table = self.classes.write();
        for class in classes {
            table.insert(class.name_arc().clone(), class.clone());
        }
        Ok(())
    }

    pub fn register_interface(&self, iface: Arc<InterfaceDef>) {
        self.interfaces.write().insert(Arc::from(iface.name()), iface);
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.classes.read().get(name).cloned()
    }

    #[must_use]
    pub fn interface(&self, name: &str) -> Option<Arc<InterfaceDef>> {
        self.interfaces.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_class(name: &str, module: &str) -> ClassBuilder {
        ClassBuilder::new(name, module)
    }

    #[test]
    fn field_layout_indices_are_stable() {
        let class = simple_class("Point", "m").field("x").field("y").build();
        assert_eq!(class.field_slot("x"), Some(0));
        assert_eq!(class.field_slot("y"), Some(1));
        assert_eq!(class.field_slot("z"), None);
    }

    #[test]
    fn method_lookup_prefers_own_over_super() {
        let base = simple_class("Base", "m").method("f", Value::Int(1)).method("g", Value::Int(2)).build();
        let derived = simple_class("Derived", "m")
            .superclass(base)
            .method("f", Value::Int(10))
            .build();
        assert_eq!(derived.lookup_method("f"), Some(Value::Int(10)));
        assert_eq!(derived.lookup_method("g"), Some(Value::Int(2)));
        assert_eq!(derived.lookup_method("h"), None);
    }

    #[test]
    fn interface_defaults_resolve_after_supers() {
        let iface = InterfaceDef::new(
            "Greeter",
            vec![],
            vec![InterfaceMethod {
                name: Arc::from("greet"),
                default_impl: Some(Value::Int(7)),
                is_static: false,
            }],
        );
        let class = simple_class("C", "m").interface(iface).build();
        assert_eq!(class.lookup_method("greet"), Some(Value::Int(7)));
    }

    #[test]
    fn sealed_extension_across_modules_fails() {
        let sealed = simple_class("S", "m1")
            .modifiers(ClassModifiers { is_sealed: true, ..Default::default() })
            .build();
        let legal = simple_class("T1", "m1").superclass(sealed.clone()).build();
        let illegal = simple_class("T2", "m2").superclass(sealed).build();

        let registry = ClassRegistry::new();
        registry.register_module(&[legal]).unwrap();
        let err = registry.register_module(&[illegal]).unwrap_err();
        match err {
            RunError::Raise(raised) => assert_eq!(raised.kind, ErrorKind::SealedExtension),
            other => panic!("expected raise, got {other:?}"),
        }
    }

    #[test]
    fn sam_recognition() {
        let sam = InterfaceDef::new(
            "Runnable",
            vec![],
            vec![InterfaceMethod { name: Arc::from("run"), default_impl: None, is_static: false }],
        );
        assert_eq!(sam.sam_method().as_deref(), Some("run"));

        let not_sam = InterfaceDef::new(
            "Two",
            vec![],
            vec![
                InterfaceMethod { name: Arc::from("a"), default_impl: None, is_static: false },
                InterfaceMethod { name: Arc::from("b"), default_impl: None, is_static: false },
            ],
        );
        assert_eq!(not_sam.sam_method(), None);

        let object_shape = InterfaceDef::new(
            "Shape",
            vec![],
            vec![
                InterfaceMethod { name: Arc::from("toString"), default_impl: None, is_static: false },
                InterfaceMethod { name: Arc::from("apply"), default_impl: None, is_static: false },
            ],
        );
        assert_eq!(object_shape.sam_method().as_deref(), Some("apply"));
    }

    #[test]
    fn enum_entries_get_ordinals_and_statics() {
        let color = simple_class("Color", "m")
            .modifiers(ClassModifiers { is_enum: true, ..Default::default() })
            .build();
        let red = add_enum_entry(&color, "RED", []);
        let green = add_enum_entry(&color, "GREEN", []);
        assert_eq!(red.ordinal(), 0);
        assert_eq!(green.ordinal(), 1);
        assert!(matches!(color.static_field("RED"), Some(Value::Enum(_))));
    }
}
