//! The invocation runtime: parameter binding, callable dispatch, bound
//! methods, constructor orchestration, reified type parameters, and
//! extension-method resolution.

use std::{
    borrow::Cow,
    sync::{Arc, atomic::Ordering},
};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    class::{ClassDef, Constructor},
    env::Env,
    error::{ErrorKind, RunError, RunResult},
    host::HostObject,
    interp::Interp,
    mir::{MirFunction, Param, ParamDefault},
    object::Instance,
    value::Value,
};

/// Reserved binding prefix for reified type arguments.
pub const TYPE_ARG_PREFIX: &str = "__type$";

/// Arguments of one call: positional values, named values in supply order,
/// and textual type arguments for reified type parameters.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub pos: Vec<Value>,
    pub named: Vec<(Arc<str>, Value)>,
    pub type_args: Vec<Arc<str>>,
}

impl CallArgs {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn positional(pos: Vec<Value>) -> Self {
        Self { pos, ..Self::default() }
    }

    #[must_use]
    pub fn named(mut self, name: impl AsRef<str>, value: Value) -> Self {
        self.named.push((Arc::from(name.as_ref()), value));
        self
    }

    #[must_use]
    pub fn type_arg(mut self, name: impl AsRef<str>) -> Self {
        self.type_args.push(Arc::from(name.as_ref()));
        self
    }

    /// Total supplied argument count (positional + named).
    #[must_use]
    pub fn supplied(&self) -> usize {
        self.pos.len() + self.named.len()
    }
}

/// Binds caller arguments to declared parameters.
///
/// Returns the bound values in declaration order. `defaults_env` is the
/// parameter's lexical environment at definition time; default thunks run in
/// a child of it extended by previously bound parameters.
pub(crate) fn bind_params(
    interp: &mut Interp,
    params: &[Param],
    defaults_env: &Env,
    args: CallArgs,
) -> RunResult<Vec<(Arc<str>, Value)>> {
    let CallArgs { pos, mut named, .. } = args;
    let mut positional = pos.into_iter();
    let mut bound: Vec<(Arc<str>, Value)> = Vec::with_capacity(params.len());

    for param in params {
        // 1. a named argument of the same name wins
        if let Some(at) = named.iter().position(|(name, _)| *name == param.name) {
            let (_, value) = named.remove(at);
            bound.push((param.name.clone(), value));
            continue;
        }
        // 2. remaining positional arguments
        if positional.len() > 0 {
            if param.vararg {
                bound.push((param.name.clone(), Value::list(positional.by_ref().collect())));
            } else {
                let value = positional.next().expect("len checked above");
                bound.push((param.name.clone(), value));
            }
            continue;
        }
        // 3. the declared default, in the definition environment extended by
        //    previously bound parameters
        if let Some(default) = &param.default {
            let value = match default {
                ParamDefault::Const(value) => value.clone(),
                ParamDefault::Thunk(thunk) => {
                    let scope = defaults_env.child();
                    for (name, value) in &bound {
                        scope.define(name.clone(), value.clone());
                    }
                    call_thunk(interp, thunk, &scope)?
                }
            };
            bound.push((param.name.clone(), value));
            continue;
        }
        // 4. a vararg with nothing left binds the empty list
        if param.vararg {
            bound.push((param.name.clone(), Value::list(Vec::new())));
            continue;
        }
        // 5. nothing to bind
        return Err(RunError::raise(
            ErrorKind::MissingArgument,
            format!("missing argument for parameter '{}'", param.name),
        ));
    }

    let excess = positional.len();
    if excess > 0 {
        return Err(RunError::raise(
            ErrorKind::TooManyArguments,
            format!("{excess} excess positional argument(s)"),
        ));
    }
    if let Some((name, _)) = named.first() {
        return Err(RunError::raise(
            ErrorKind::UnknownNamedArgument,
            format!("unknown named argument '{name}'"),
        ));
    }
    Ok(bound)
}

/// Runs a zero-parameter MIR thunk against a given environment.
///
/// Thunks are synthesized glue (defaults, initialisers, delegation argument
/// lists); their frames do not count against the recursion limit.
pub(crate) fn call_thunk(interp: &mut Interp, thunk: &Arc<MirFunction>, env: &Env) -> RunResult<Value> {
    interp.run_function(thunk, env, Vec::new(), None, true)
}

/// Calls any callable value with the given arguments.
pub(crate) fn call_value(interp: &mut Interp, callee: &Value, args: CallArgs) -> RunResult<Value> {
    call_with_this(interp, None, callee, args)
}

/// Calls a method callable with an explicit receiver bound as `this`.
pub(crate) fn call_method(
    interp: &mut Interp,
    receiver: Value,
    callable: &Value,
    args: CallArgs,
) -> RunResult<Value> {
    call_with_this(interp, Some(receiver), callable, args)
}

fn call_with_this(
    interp: &mut Interp,
    this: Option<Value>,
    callee: &Value,
    args: CallArgs,
) -> RunResult<Value> {
    match callee {
        Value::Native(native) => {
            host_boundary(interp)?;
            let arity = native.arity();
            let mut args = args;
            if let Some(this) = this {
                args.pos.insert(0, this);
            }
            if arity >= 0 {
                let supplied = args.supplied();
                if supplied < arity as usize {
                    return Err(RunError::raise(
                        ErrorKind::MissingArgument,
                        format!("{} takes {arity} argument(s), got {supplied}", native.name()),
                    ));
                }
                if supplied > arity as usize {
                    return Err(RunError::raise(
                        ErrorKind::TooManyArguments,
                        format!("{} takes {arity} argument(s), got {supplied}", native.name()),
                    ));
                }
            }
            (native.imp())(interp, args).map_err(RunError::from)
        }
        Value::Function(closure) => {
            let function = &closure.function;
            let reified = reify_type_args(function, &args);
            let bound = bind_params(interp, &function.params, &closure.captures, args)?;
            let mut env = closure.captures.clone();
            if this.is_some() || reified.is_some() {
                env = env.child();
                if let Some(this) = this {
                    env.define(Arc::from("this"), this);
                }
                if let Some(map) = &reified {
                    for (name, text) in map {
                        env.define(
                            Arc::from(format!("{TYPE_ARG_PREFIX}{name}").as_str()),
                            Value::Str(text.clone()),
                        );
                    }
                }
            }
            let values = bound.into_iter().map(|(_, v)| v).collect();
            interp.run_function(function, &env, values, reified, false)
        }
        Value::Bound(bound) => call_with_this(interp, Some(bound.receiver.clone()), &bound.callable, args),
        Value::Class(class) => instantiate(interp, class, args),
        Value::Foreign(foreign) => {
            host_boundary(interp)?;
            foreign.object().call(&args.pos).map_err(RunError::from)
        }
        other => Err(RunError::raise(
            ErrorKind::TypeOp,
            format!("{} is not callable", other.type_name()),
        )),
    }
}

/// Maps caller type arguments onto the function's reified type parameters.
fn reify_type_args(function: &Arc<MirFunction>, args: &CallArgs) -> Option<AHashMap<Arc<str>, Arc<str>>> {
    if args.type_args.is_empty() || function.type_params.is_empty() {
        return None;
    }
    Some(
        function
            .type_params
            .iter()
            .zip(args.type_args.iter())
            .map(|(param, text)| (param.clone(), text.clone()))
            .collect(),
    )
}

/// Method-call dispatch on any receiver: declared methods, callable fields,
/// task-handle observers, host delegates, then extension methods.
pub(crate) fn call_virtual(
    interp: &mut Interp,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> RunResult<Value> {
    match receiver {
        Value::Object(instance) => {
            let class = instance.class();
            if let Some(method) = interp.shared.caches.method(class, name, &args) {
                return call_method(interp, receiver.clone(), &method, args);
            }
            if let Some(method) = class.lookup_method(name) {
                interp.shared.caches.insert_method(class, name, &args, &method);
                return call_method(interp, receiver.clone(), &method, args);
            }
            if let Some(field) = instance.get_field(name).filter(is_callable) {
                return call_value(interp, &field, args);
            }
            if let Some(delegate) = instance.delegate() {
                return foreign_invoke(interp, &delegate, name, args);
            }
            dispatch_extension(interp, receiver, name, args)
        }
        Value::Enum(entry) => {
            if let Some(method) = entry.lookup_method(name) {
                return call_method(interp, receiver.clone(), &method, args);
            }
            if let Some(field) = entry.field(name).filter(is_callable) {
                return call_value(interp, &field, args);
            }
            dispatch_extension(interp, receiver, name, args)
        }
        Value::Class(class) => {
            // static dispatch: class methods are called unbound
            if let Some(method) = class.lookup_method(name) {
                return call_value(interp, &method, args);
            }
            if let Some(field) = class.static_field(name).filter(is_callable) {
                return call_value(interp, &field, args);
            }
            dispatch_extension(interp, receiver, name, args)
        }
        Value::Future(task) | Value::Job(task) => {
            crate::concurrent::task_method(interp, task, matches!(receiver, Value::Job(_)), name, args)
        }
        Value::Foreign(foreign) => {
            // host methods win; extensions fill the gaps the host reports
            if interp.shared.extensions.resolve(receiver, name).is_some() {
                let delegate = foreign.object().clone();
                let names = interp
                    .shared
                    .caches
                    .host_method_names(foreign.class_tag(), || delegate.method_names());
                if !names.contains(name) {
                    return dispatch_extension(interp, receiver, name, args);
                }
            }
            let delegate = foreign.object().clone();
            foreign_invoke(interp, &delegate, name, args)
        }
        _ => dispatch_extension(interp, receiver, name, args),
    }
}

fn is_callable(value: &Value) -> bool {
    matches!(
        value,
        Value::Native(_) | Value::Function(_) | Value::Bound(_) | Value::Class(_)
    )
}

/// Extension-method resolution, in order: canonical type name, class
/// name for object receivers, `Any`, host exact class, host super types.
/// The receiver is prepended to the positional argument list.
fn dispatch_extension(interp: &mut Interp, receiver: &Value, name: &str, mut args: CallArgs) -> RunResult<Value> {
    let extension = interp.shared.extensions.resolve(receiver, name);
    match extension {
        Some(callable) => {
            args.pos.insert(0, receiver.clone());
            call_value(interp, &callable, args)
        }
        None => {
            // error messages keep the concrete class name for instances
            let shown = match receiver {
                Value::Object(instance) => Cow::Owned(instance.class().name().to_string()),
                other => other.type_name(),
            };
            Err(RunError::raise(
                ErrorKind::UndefinedProperty,
                format!("'{shown}' has no method '{name}'"),
            ))
        }
    }
}

/// Host-call boundary: wall clock and cancellation are observed here.
pub(crate) fn host_boundary(interp: &mut Interp) -> RunResult<()> {
    interp.guards.check_clock()?;
    if let Some(flag) = &interp.cancel
        && flag.load(Ordering::Relaxed)
    {
        return Err(RunError::raise(ErrorKind::Interrupted, "task cancelled"));
    }
    Ok(())
}

pub(crate) fn foreign_get(interp: &mut Interp, delegate: &Arc<dyn HostObject>, name: &str) -> RunResult<Value> {
    host_boundary(interp)?;
    delegate.get_property(name).map_err(RunError::from)
}

pub(crate) fn foreign_set(
    interp: &mut Interp,
    delegate: &Arc<dyn HostObject>,
    name: &str,
    value: Value,
) -> RunResult<()> {
    host_boundary(interp)?;
    delegate.set_property(name, value).map_err(RunError::from)
}

pub(crate) fn foreign_invoke(
    interp: &mut Interp,
    delegate: &Arc<dyn HostObject>,
    name: &str,
    args: CallArgs,
) -> RunResult<Value> {
    host_boundary(interp)?;
    delegate.invoke(name, &args.pos).map_err(RunError::from)
}

/// Instantiates a class: one-time validation, allocation, foreign delegate
/// synthesis, constructor selection, constructor execution.
pub(crate) fn instantiate(interp: &mut Interp, class: &Arc<ClassDef>, args: CallArgs) -> RunResult<Value> {
    // 1. one-time validation
    if !class.is_validated() {
        let modifiers = class.modifiers();
        if modifiers.is_annotation {
            return Err(RunError::raise(
                ErrorKind::InstantiateForbidden,
                format!("annotation class '{}' cannot be instantiated", class.name()),
            ));
        }
        if modifiers.is_abstract {
            return Err(RunError::raise(
                ErrorKind::InstantiateForbidden,
                format!("abstract class '{}' cannot be instantiated", class.name()),
            ));
        }
        let missing = class.unimplemented_abstract();
        if let Some(name) = missing.first() {
            return Err(RunError::raise(
                ErrorKind::UnimplementedAbstract,
                format!("'{}' does not implement abstract method '{name}'", class.name()),
            ));
        }
        class.mark_validated();
    }

    // 2. allocation
    let instance = Instance::new(class.clone());
    let this = Value::Object(instance.clone());

    // 3. foreign delegate synthesis; the bridge's unimplemented-method check
    // result is cached after the first success
    if !class.foreign_supers().is_empty() {
        synthesize_delegate(interp, class, &instance, &args.pos)?;
        if !class.is_foreign_checked() {
            class.mark_foreign_checked();
        }
    }

    // 4-5. constructor selection and execution; purely-positional calls go
    // through the bounded constructor-handle cache
    let selected = if args.named.is_empty() {
        let shape = crate::dispatch::shape_of(&args);
        interp.shared.caches.constructor(class, &shape).or_else(|| {
            let chosen = select_constructor(class.constructors(), args.supplied());
            if let Some(chosen) = &chosen {
                interp.shared.caches.insert_constructor(class, &shape, chosen.clone());
            }
            chosen
        })
    } else {
        select_constructor(class.constructors(), args.supplied())
    };
    match selected {
        Some((ctor, pad)) => {
            let mut args = args;
            for _ in 0..pad {
                args.pos.push(Value::Null);
            }
            run_constructor(interp, class, &this, &ctor, args)?;
        }
        None if args.supplied() > 0 => {
            return Err(RunError::raise(
                ErrorKind::NoMatchingConstructor,
                format!(
                    "no constructor of '{}' matches {} argument(s)",
                    class.name(),
                    args.supplied()
                ),
            ));
        }
        None => {
            // implicit zero-argument construction: just the initialiser list
            let env = interp.globals().child();
            env.define(Arc::from("this"), this.clone());
            run_initializers(interp, class, &this, &env)?;
        }
    }

    Ok(this)
}

/// Constructor selection, one ordered policy:
/// exact arity or vararg, then default-argument range match, then
/// pad-with-null. Declaration order breaks ties. Returns the chosen
/// constructor and how many `Null` paddings to append.
pub(crate) fn select_constructor(
    constructors: &[Arc<Constructor>],
    supplied: usize,
) -> Option<(Arc<Constructor>, usize)> {
    let exact = constructors
        .iter()
        .find(|c| c.arity() == supplied as i32 || c.arity() == -1);
    if let Some(ctor) = exact {
        return Some((ctor.clone(), 0));
    }
    let defaults = constructors
        .iter()
        .find(|c| c.required() <= supplied && supplied <= c.params.len());
    if let Some(ctor) = defaults {
        return Some((ctor.clone(), 0));
    }
    let padded = constructors
        .iter()
        .find(|c| c.pad_with_null && supplied < c.params.len());
    if let Some(ctor) = padded {
        let pad = ctor.params.len() - supplied;
        return Some((ctor.clone(), pad));
    }
    None
}

/// Executes one constructor against an already-allocated instance.
fn run_constructor(
    interp: &mut Interp,
    class: &Arc<ClassDef>,
    this: &Value,
    ctor: &Arc<Constructor>,
    args: CallArgs,
) -> RunResult<()> {
    // a-c: fresh scope over the captured environment, `this`, parameters
    let env = ctor.captures.child();
    env.define(Arc::from("this"), this.clone());
    let bound = bind_params(interp, &ctor.params, &ctor.captures, args)?;
    for (name, value) in &bound {
        env.define(name.clone(), value.clone());
    }

    if ctor.delegates.is_none() {
        // d: a primary constructor of a class with a super runs the declared
        // super-constructor argument list, then the super's first constructor
        // against the same instance
        if ctor.is_primary
            && let Some(superclass) = class.superclass()
        {
            let super_args = match class.super_args() {
                Some(thunk) => list_args(call_thunk(interp, thunk, &env)?)?,
                None => Vec::new(),
            };
            if let Some(super_ctor) = superclass.constructors().first() {
                let superclass = superclass.clone();
                run_constructor(interp, &superclass, this, &super_ctor.clone(), CallArgs::positional(super_args))?;
            }
        }
        // e: primary-constructor shorthand installs parameters as fields
        if let Value::Object(instance) = this {
            for (name, value) in &bound {
                instance.set_field(name, value.clone());
            }
        }
        // g: the instance-initialiser list, in declaration order
        run_initializers(interp, class, this, &env)?;
    } else if let Some(delegation) = &ctor.delegates {
        // f: evaluate delegation arguments, run the matching sibling first
        let sibling_args = list_args(call_thunk(interp, delegation, &env)?)?;
        let supplied = sibling_args.len();
        let sibling = class
            .constructors()
            .iter()
            .filter(|c| !Arc::ptr_eq(c, ctor))
            .find(|c| c.arity() == supplied as i32 || c.arity() == -1)
            .cloned();
        let Some(sibling) = sibling else {
            return Err(RunError::raise(
                ErrorKind::NoMatchingConstructor,
                format!(
                    "no sibling constructor of '{}' matches {supplied} delegated argument(s)",
                    class.name()
                ),
            ));
        };
        run_constructor(interp, class, this, &sibling, CallArgs::positional(sibling_args))?;
    }

    // h: the constructor body
    if let Some(body) = &ctor.body {
        let values = bound.into_iter().map(|(_, v)| v).collect();
        interp.run_function(body, &env, values, None, true)?;
    }
    Ok(())
}

fn run_initializers(interp: &mut Interp, class: &Arc<ClassDef>, this: &Value, env: &Env) -> RunResult<()> {
    for init in class.initializers() {
        match init {
            crate::class::Initializer::Field(name, thunk) => {
                let value = call_thunk(interp, thunk, env)?;
                if let Value::Object(instance) = this {
                    instance.set_field(name, value);
                }
            }
            crate::class::Initializer::Block(thunk) => {
                call_thunk(interp, thunk, env)?;
            }
        }
    }
    Ok(())
}

fn list_args(value: Value) -> RunResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.read().clone()),
        other => Err(RunError::internal(format!(
            "argument-list thunk returned {}, expected List",
            other.type_name()
        ))),
    }
}

/// Synthesizes and attaches the foreign delegate for a class with foreign
/// super types, passing the declared super-constructor
/// arguments when present, otherwise the caller's arguments.
fn synthesize_delegate(
    interp: &mut Interp,
    class: &Arc<ClassDef>,
    instance: &Arc<Instance>,
    caller_args: &[Value],
) -> RunResult<()> {
    let bridge = interp.shared.host_bridge.read().clone();
    let Some(bridge) = bridge else {
        return Err(RunError::raise(
            ErrorKind::ForeignAccess,
            format!(
                "class '{}' extends foreign types but no host bridge is installed",
                class.name()
            ),
        ));
    };
    let declared = match (class.super_args(), class.primary_constructor()) {
        (Some(thunk), Some(primary)) => {
            let scope = primary.captures.child();
            Some(list_args(call_thunk(interp, thunk, &scope)?)?)
        }
        _ => None,
    };
    let args = declared.as_deref().unwrap_or(caller_args);
    let delegate = bridge.synthesize_delegate(class, args).map_err(RunError::from)?;
    instance.attach_delegate(delegate);
    Ok(())
}

/// The extension-method registry: per-type-name method vectors with the
/// `Any` bucket checked last, plus host-class buckets for foreign receivers.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    by_type: RwLock<AHashMap<Arc<str>, AHashMap<Arc<str>, Value>>>,
    any: RwLock<AHashMap<Arc<str>, Value>>,
    host_exact: RwLock<AHashMap<Arc<str>, AHashMap<Arc<str>, Value>>>,
    host_super: RwLock<AHashMap<Arc<str>, AHashMap<Arc<str>, Value>>>,
}

impl ExtensionRegistry {
    /// Registers a language-level extension. The type name `Any` lands in
    /// the last-checked bucket.
    pub fn register(&self, type_name: &str, method: &str, callable: Value) {
        if type_name == "Any" {
            self.any.write().insert(Arc::from(method), callable);
            return;
        }
        self.by_type
            .write()
            .entry(Arc::from(type_name))
            .or_default()
            .insert(Arc::from(method), callable);
    }

    /// Registers a host extension keyed by the exact host class tag.
    pub fn register_host(&self, class_tag: &str, method: &str, callable: Value) {
        self.host_exact
            .write()
            .entry(Arc::from(class_tag))
            .or_default()
            .insert(Arc::from(method), callable);
    }

    /// Registers a host extension keyed by a host superclass or interface tag.
    pub fn register_host_super(&self, class_tag: &str, method: &str, callable: Value) {
        self.host_super
            .write()
            .entry(Arc::from(class_tag))
            .or_default()
            .insert(Arc::from(method), callable);
    }

    /// Resolution order: canonical type name; class name for object
    /// receivers; `Any`; host exact class; host supers.
    #[must_use]
    pub(crate) fn resolve(&self, receiver: &Value, method: &str) -> Option<Value> {
        let by_type = self.by_type.read();
        if let Some(found) = by_type
            .get(&*receiver.type_name())
            .and_then(|bucket| bucket.get(method))
        {
            return Some(found.clone());
        }
        if let Value::Object(instance) = receiver
            && let Some(found) = by_type
                .get(instance.class().name())
                .and_then(|bucket| bucket.get(method))
        {
            return Some(found.clone());
        }
        drop(by_type);
        if let Some(found) = self.any.read().get(method) {
            return Some(found.clone());
        }
        if let Value::Foreign(foreign) = receiver {
            if let Some(found) = self
                .host_exact
                .read()
                .get(foreign.class_tag())
                .and_then(|bucket| bucket.get(method))
            {
                return Some(found.clone());
            }
            let host_super = self.host_super.read();
            for tag in foreign.object().super_tags() {
                if let Some(found) = host_super.get(&tag).and_then(|bucket| bucket.get(method)) {
                    return Some(found.clone());
                }
            }
        }
        None
    }
}
