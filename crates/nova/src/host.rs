//! The host-object bridge: opaque foreign references, the collaborator
//! traits for delegate synthesis and SAM adaptation, and the in-process
//! functional SAM proxy.
//!
//! Foreign-class generation itself belongs to a collaborator; this module
//! only defines the surface foreign callables and functional interfaces
//! round-trip through.

use std::{fmt, sync::Arc, thread, thread::ThreadId};

use ahash::AHashSet;

use crate::{
    class::{ClassDef, InterfaceDef},
    engine::EngineShared,
    error::{ErrorKind, Exception, RunError, RunResult},
    interp::Interp,
    invoke::{self, CallArgs},
    value::Value,
};

/// An opaque host object reachable from Nova code.
///
/// Implementations are supplied by the embedding host or the foreign-bridge
/// collaborator. All entry points take `&self`; hosts manage their own
/// interior mutability and thread safety.
pub trait HostObject: Send + Sync + fmt::Debug {
    /// The host class tag, used for extension dispatch and display.
    fn class_tag(&self) -> &str;

    /// Host superclass and interface tags, outermost first.
    fn super_tags(&self) -> Vec<Arc<str>> {
        Vec::new()
    }

    /// The object's public method names, consulted through the bounded
    /// presence cache when extensions compete with host methods.
    fn method_names(&self) -> AHashSet<Arc<str>> {
        AHashSet::new()
    }

    /// Reads a property.
    fn get_property(&self, name: &str) -> Result<Value, Exception> {
        Err(Exception::new(
            ErrorKind::ForeignAccess,
            format!("'{}' has no readable property '{name}'", self.class_tag()),
        ))
    }

    /// Writes a property.
    fn set_property(&self, name: &str, _value: Value) -> Result<(), Exception> {
        Err(Exception::new(
            ErrorKind::ForeignAccess,
            format!("'{}' has no writable property '{name}'", self.class_tag()),
        ))
    }

    /// Invokes a method.
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, Exception>;

    /// Invokes the object itself, for callable host values.
    fn call(&self, _args: &[Value]) -> Result<Value, Exception> {
        Err(Exception::new(
            ErrorKind::ForeignAccess,
            format!("'{}' is not callable", self.class_tag()),
        ))
    }
}

/// A foreign value: the host object plus its identity.
#[derive(Debug)]
pub struct ForeignObject {
    object: Arc<dyn HostObject>,
}

impl ForeignObject {
    #[must_use]
    pub fn new(object: Arc<dyn HostObject>) -> Arc<Self> {
        Arc::new(Self { object })
    }

    /// Wraps a host object directly into a value.
    #[must_use]
    pub fn value(object: Arc<dyn HostObject>) -> Value {
        Value::Foreign(Self::new(object))
    }

    #[must_use]
    pub fn class_tag(&self) -> &str {
        self.object.class_tag()
    }

    #[must_use]
    pub fn object(&self) -> &Arc<dyn HostObject> {
        &self.object
    }
}

/// The foreign-runtime collaborator: synthesizes delegates for classes with
/// foreign super types and adapts callables to host SAM interfaces.
pub trait HostBridge: Send + Sync {
    /// Builds the delegate instance backing a Nova class that extends
    /// foreign types, given the resolved super-constructor arguments.
    fn synthesize_delegate(&self, class: &Arc<ClassDef>, args: &[Value]) -> Result<Arc<dyn HostObject>, Exception>;

    /// Adapts a callable to a host proxy for a SAM interface. The default
    /// bridge has no foreign runtime and reports the interface unsupported.
    fn adapt_sam(&self, iface: &Arc<InterfaceDef>, _callable: Value) -> Result<Value, Exception> {
        Err(Exception::new(
            ErrorKind::ForeignAccess,
            format!("no foreign runtime available to proxy '{}'", iface.name()),
        ))
    }
}

/// Adapts a callable to a SAM interface.
///
/// Routes through the installed host bridge when present; otherwise builds
/// the in-process [`FunctionalSamProxy`]. One SAM invocation performs exactly
/// one callable call with positional argument order preserved.
pub(crate) fn adapt_to_sam(
    shared: &Arc<EngineShared>,
    iface: &Arc<InterfaceDef>,
    callable: Value,
) -> RunResult<Value> {
    let Some(method) = iface.sam_method() else {
        return Err(RunError::raise(
            ErrorKind::TypeOp,
            format!("interface '{}' is not a functional interface", iface.name()),
        ));
    };
    if let Some(bridge) = shared.host_bridge.read().clone() {
        return bridge.adapt_sam(iface, callable).map_err(RunError::from);
    }
    Ok(ForeignObject::value(Arc::new(FunctionalSamProxy {
        shared: shared.clone(),
        tag: Arc::from(iface.name()),
        method,
        callable,
        owner: thread::current().id(),
    })))
}

/// In-process SAM proxy: routes the single abstract method back into a Nova
/// callable.
///
/// When invoked from a thread other than the one that created it, the proxy
/// runs the callable on a fresh child interpreter clone rather than touching
/// the owner's mutable state.
pub struct FunctionalSamProxy {
    shared: Arc<EngineShared>,
    tag: Arc<str>,
    method: Arc<str>,
    callable: Value,
    owner: ThreadId,
}

impl fmt::Debug for FunctionalSamProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionalSamProxy")
            .field("interface", &self.tag)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl FunctionalSamProxy {
    fn run(&self, args: &[Value]) -> Result<Value, Exception> {
        if thread::current().id() != self.owner {
            log::trace!("SAM proxy '{}' invoked from non-owner thread", self.tag);
        }
        // a child interpreter: shared read-mostly tables, fresh per-thread state
        let mut interp = Interp::new(self.shared.clone());
        invoke::call_value(&mut interp, &self.callable, CallArgs::positional(args.to_vec()))
            .map_err(RunError::into_exception)
    }
}

impl HostObject for FunctionalSamProxy {
    fn class_tag(&self) -> &str {
        &self.tag
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, Exception> {
        if method == &*self.method || method == "invoke" {
            return self.run(args);
        }
        match method {
            "toString" => Ok(Value::str(format!("{}$proxy", self.tag))),
            "hashCode" => Ok(Value::Int(0)),
            "equals" => Ok(Value::Bool(false)),
            _ => Err(Exception::new(
                ErrorKind::ForeignAccess,
                format!("'{}' proxy has no method '{method}'", self.tag),
            )),
        }
    }

    fn call(&self, args: &[Value]) -> Result<Value, Exception> {
        self.run(args)
    }
}
