//! The embedding surface: engine construction, registration APIs, and the
//! eval entry points.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::{
    class::{ClassDef, ClassRegistry, InterfaceDef},
    concurrent::WorkerPool,
    dispatch::DispatchCaches,
    env::Env,
    error::{EngineError, Exception, RunError},
    host::{HostBridge, adapt_to_sam},
    interp::Interp,
    invoke::{CallArgs, ExtensionRegistry, call_value},
    io::{ConsoleStreams, StdStreams},
    limits::SecurityPolicy,
    mir::MirModule,
    modules,
    value::Value,
};

/// The source→MIR collaborator. The core does not lex or parse; hosts
/// install a lowering implementation to enable the `eval` entry points.
pub trait Lowering: Send + Sync {
    fn lower(&self, source: &str, file: &str) -> Result<MirModule, Exception>;
}

/// Processor invoked by the lowering collaborator for annotation classes.
pub trait AnnotationProcessor: Send + Sync {
    fn process(&self, class: &Arc<ClassDef>, args: &[Value]) -> Result<(), Exception>;
}

/// State shared between the main interpreter and every worker's child
/// interpreter: read-mostly tables, bounded caches, streams, and the global
/// active-task counter.
pub struct EngineShared {
    pub(crate) builtins: Env,
    pub(crate) globals: Env,
    pub(crate) classes: ClassRegistry,
    pub(crate) extensions: ExtensionRegistry,
    pub(crate) annotations: RwLock<AHashMap<Arc<str>, Arc<dyn AnnotationProcessor>>>,
    pub(crate) caches: DispatchCaches,
    pub(crate) policy: RwLock<SecurityPolicy>,
    pub(crate) streams: Mutex<Box<dyn ConsoleStreams>>,
    pub(crate) cli_args: RwLock<Vec<String>>,
    pub(crate) active_tasks: Arc<AtomicUsize>,
    pub(crate) scheduler: Mutex<Option<Arc<WorkerPool>>>,
    pub(crate) host_bridge: RwLock<Option<Arc<dyn HostBridge>>>,
    pub(crate) lowering: RwLock<Option<Arc<dyn Lowering>>>,
}

impl EngineShared {
    /// The worker pool, created on first use with one worker per CPU.
    pub(crate) fn pool(shared: &Arc<Self>) -> Arc<WorkerPool> {
        let mut guard = shared.scheduler.lock();
        if let Some(pool) = &*guard {
            return pool.clone();
        }
        let pool = WorkerPool::new(shared, num_cpus::get());
        *guard = Some(pool.clone());
        pool
    }
}

/// The Nova engine: shared state plus the embedding-thread interpreter.
///
/// # Example
///
/// ```
/// use nova::{Engine, Value, mir::FunctionBuilder};
///
/// let mut engine = Engine::new();
/// let mut b = FunctionBuilder::new("main");
/// let r = b.reg();
/// b.const_int(r, 41);
/// let one = b.reg();
/// b.const_int(one, 1);
/// let out = b.reg();
/// b.add(out, r, one);
/// b.ret(out);
/// let module = nova::mir::MirModule {
///     name: "demo".into(),
///     file: "demo.nova".into(),
///     entry: b.build(),
///     source: None,
/// };
/// assert_eq!(engine.eval_mir(&module).unwrap(), Value::Int(42));
/// ```
pub struct Engine {
    shared: Arc<EngineShared>,
    main: Interp,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        let builtins = Env::root();
        register_core_builtins(&builtins);
        let globals = Env::global_over(&builtins);
        let shared = Arc::new(EngineShared {
            builtins,
            globals,
            classes: ClassRegistry::new(),
            extensions: ExtensionRegistry::default(),
            annotations: RwLock::new(AHashMap::new()),
            caches: DispatchCaches::new(),
            policy: RwLock::new(SecurityPolicy::default()),
            streams: Mutex::new(Box::new(StdStreams)),
            cli_args: RwLock::new(Vec::new()),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            scheduler: Mutex::new(None),
            host_bridge: RwLock::new(None),
            lowering: RwLock::new(None),
        });
        let main = Interp::new(shared.clone());
        Self { shared, main }
    }

    /// The global environment.
    #[must_use]
    pub fn globals(&self) -> Env {
        self.shared.globals.clone()
    }

    /// Evaluates source through the installed lowering collaborator, in a
    /// fresh scope over the globals.
    pub fn eval(&mut self, source: &str) -> Result<Value, EngineError> {
        self.eval_with_file(source, "<eval>")
    }

    /// Like [`Engine::eval`] with an explicit file name for errors.
    pub fn eval_with_file(&mut self, source: &str, file: &str) -> Result<Value, EngineError> {
        let env = self.shared.globals.child();
        self.execute_module(source, file, &env)
    }

    /// Evaluates source directly against the global scope, so declarations
    /// persist across calls. The sealed-builtins boundary applies.
    pub fn eval_repl(&mut self, source: &str) -> Result<Value, EngineError> {
        let env = self.shared.globals.clone();
        self.execute_module(source, "<repl>", &env)
    }

    /// Lowers and executes source against a caller-supplied environment.
    pub fn execute_module(&mut self, source: &str, file: &str, env: &Env) -> Result<Value, EngineError> {
        let lowering = self.shared.lowering.read().clone();
        let Some(lowering) = lowering else {
            return Err(EngineError::NoFrontend);
        };
        let module = lowering.lower(source, file).map_err(EngineError::Lowering)?;
        self.eval_mir_in(&module, env).map_err(EngineError::Runtime)
    }

    /// Executes an in-memory MIR module in a fresh scope over the globals.
    pub fn eval_mir(&mut self, module: &MirModule) -> Result<Value, Exception> {
        let env = self.shared.globals.child();
        self.eval_mir_in(module, &env)
    }

    /// Executes an in-memory MIR module against a caller-supplied
    /// environment.
    pub fn eval_mir_in(&mut self, module: &MirModule, env: &Env) -> Result<Value, Exception> {
        self.main
            .run_module(module, env)
            .map_err(RunError::into_exception)
    }

    /// Calls a callable value from the host with positional arguments.
    pub fn call(&mut self, callable: &Value, args: Vec<Value>) -> Result<Value, Exception> {
        self.call_with(callable, CallArgs::positional(args))
    }

    /// Calls a callable value from the host with full argument structure
    /// (named arguments, reified type arguments).
    pub fn call_with(&mut self, callable: &Value, args: CallArgs) -> Result<Value, Exception> {
        self.main.guards.reset();
        call_value(&mut self.main, callable, args).map_err(RunError::into_exception)
    }

    /// Registers a native function into the sealed builtins scope.
    pub fn register_native(
        &self,
        name: &str,
        arity: i32,
        imp: impl Fn(&mut Interp, CallArgs) -> Result<Value, Exception> + Send + Sync + 'static,
    ) {
        self.shared.builtins.define(Arc::from(name), modules::native(name, arity, imp));
    }

    /// Declares a global binding. Fails when it would shadow a builtin.
    pub fn register_global(&self, name: &str, value: Value) -> Result<(), Exception> {
        self.shared
            .globals
            .declare(Arc::from(name), value)
            .map_err(RunError::into_exception)
    }

    /// Registers a language-level extension method for a type name
    /// (use `"Any"` for the universal bucket).
    pub fn register_extension(
        &self,
        type_name: &str,
        method_name: &str,
        imp: impl Fn(&mut Interp, CallArgs) -> Result<Value, Exception> + Send + Sync + 'static,
    ) {
        let callable = modules::native(method_name, -1, imp);
        self.shared.extensions.register(type_name, method_name, callable);
    }

    /// Registers an extension callable value (native or MIR function).
    pub fn register_extension_value(&self, type_name: &str, method_name: &str, callable: Value) {
        self.shared.extensions.register(type_name, method_name, callable);
    }

    /// Registers a host extension keyed by the exact host class tag.
    pub fn register_host_extension(&self, class_tag: &str, method_name: &str, callable: Value) {
        self.shared.extensions.register_host(class_tag, method_name, callable);
    }

    /// Registers a host extension keyed by a host superclass/interface tag.
    pub fn register_host_super_extension(&self, class_tag: &str, method_name: &str, callable: Value) {
        self.shared.extensions.register_host_super(class_tag, method_name, callable);
    }

    /// Registers an annotation processor by name.
    pub fn register_annotation_processor(&self, name: &str, processor: Arc<dyn AnnotationProcessor>) {
        self.shared.annotations.write().insert(Arc::from(name), processor);
    }

    /// The annotation processor registered under `name`.
    #[must_use]
    pub fn annotation_processor(&self, name: &str) -> Option<Arc<dyn AnnotationProcessor>> {
        self.shared.annotations.read().get(name).cloned()
    }

    /// Registers one module's classes: sealed-extension checks, global
    /// bindings, and `object` singleton construction.
    pub fn register_classes(&mut self, classes: &[Arc<ClassDef>]) -> Result<(), Exception> {
        self.shared
            .classes
            .register_module(classes)
            .map_err(RunError::into_exception)?;
        for class in classes {
            self.shared
                .globals
                .define(class.name_arc().clone(), Value::Class(class.clone()));
            if class.modifiers().is_object {
                let instance = crate::invoke::instantiate(&mut self.main, class, CallArgs::empty())
                    .map_err(RunError::into_exception)?;
                class.set_static(Arc::from("INSTANCE"), instance);
            }
        }
        Ok(())
    }

    /// Registers an interface and binds it globally.
    pub fn register_interface(&self, iface: Arc<InterfaceDef>) {
        self.shared.classes.register_interface(iface.clone());
        self.shared
            .globals
            .define(Arc::from(iface.name()), Value::Interface(iface));
    }

    /// Loads a `nova.`-prefixed builtin module into the globals.
    pub fn load_builtin_module(&self, name: &str) -> bool {
        modules::load_module(name, &self.shared.globals)
    }

    /// Adapts a callable to a SAM interface proxy.
    pub fn adapt_callable(&self, iface: &Arc<InterfaceDef>, callable: Value) -> Result<Value, Exception> {
        adapt_to_sam(&self.shared, iface, callable).map_err(RunError::into_exception)
    }

    /// Replaces the engine's streams, returning the previous ones.
    pub fn set_streams(&self, streams: Box<dyn ConsoleStreams>) -> Box<dyn ConsoleStreams> {
        std::mem::replace(&mut *self.shared.streams.lock(), streams)
    }

    /// Sets the command-line arguments visible to Nova code.
    pub fn set_cli_args(&self, args: Vec<String>) {
        *self.shared.cli_args.write() = args;
    }

    /// Installs the security policy for subsequent executions, including
    /// worker tasks started after this call.
    pub fn set_security_policy(&mut self, policy: SecurityPolicy) {
        *self.shared.policy.write() = policy;
        self.main = Interp::new(self.shared.clone());
    }

    /// Installs a worker pool of the given width as the task scheduler.
    pub fn set_scheduler(&self, workers: usize) {
        let pool = WorkerPool::new(&self.shared, workers);
        *self.shared.scheduler.lock() = Some(pool);
    }

    /// Installs the source→MIR lowering collaborator.
    pub fn set_lowering(&self, lowering: Arc<dyn Lowering>) {
        *self.shared.lowering.write() = Some(lowering);
    }

    /// Installs the foreign-runtime bridge collaborator.
    pub fn set_host_bridge(&self, bridge: Arc<dyn HostBridge>) {
        *self.shared.host_bridge.write() = Some(bridge);
    }

    /// The number of currently active async tasks.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.shared.active_tasks.load(Ordering::Acquire)
    }

    /// A class registered under `name`, if any.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<Arc<ClassDef>> {
        self.shared.classes.class(name)
    }
}

/// The baseline builtins present in every engine: printing, string
/// conversion, and type inspection.
fn register_core_builtins(builtins: &Env) {
    builtins.define(
        Arc::from("print"),
        modules::native("print", -1, |interp, args| {
            let text = args
                .pos
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(" ");
            interp.write_out(&text)?;
            Ok(Value::Unit)
        }),
    );
    builtins.define(
        Arc::from("println"),
        modules::native("println", -1, |interp, args| {
            let mut text = args
                .pos
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(" ");
            text.push('\n');
            interp.write_out(&text)?;
            Ok(Value::Unit)
        }),
    );
    builtins.define(
        Arc::from("str"),
        modules::native("str", 1, |_, args| {
            Ok(Value::str(args.pos.first().map(Value::display).unwrap_or_default()))
        }),
    );
    builtins.define(
        Arc::from("typeName"),
        modules::native("typeName", 1, |_, args| {
            Ok(args
                .pos
                .first()
                .map_or(Value::Null, |v| Value::str(v.type_name())))
        }),
    );
}
