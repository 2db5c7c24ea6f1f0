use std::{fmt, sync::Arc};

use crate::{
    env::Env,
    error::Exception,
    interp::Interp,
    invoke::CallArgs,
    mir::MirFunction,
    value::Value,
};

/// Implementation signature for host-provided native functions.
///
/// Natives receive the calling interpreter (for I/O, overload dispatch, and
/// nested calls) and the bound arguments.
pub type NativeImpl = Box<dyn Fn(&mut Interp, CallArgs) -> Result<Value, Exception> + Send + Sync>;

/// A function implemented by the host.
pub struct NativeFunction {
    name: Arc<str>,
    /// Declared parameter count; -1 accepts any number of arguments.
    arity: i32,
    imp: NativeImpl,
}

impl NativeFunction {
    pub fn new(name: impl AsRef<str>, arity: i32, imp: NativeImpl) -> Arc<Self> {
        Arc::new(Self {
            name: Arc::from(name.as_ref()),
            arity,
            imp,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn arity(&self) -> i32 {
        self.arity
    }

    pub(crate) fn imp(&self) -> &NativeImpl {
        &self.imp
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// A MIR function paired with its capture environment.
///
/// Capture-free module functions still carry the module environment so
/// `LoadCapture` resolves module-level names.
#[derive(Debug, Clone)]
pub struct Closure {
    pub function: Arc<MirFunction>,
    pub captures: Env,
}

impl Closure {
    #[must_use]
    pub fn new(function: Arc<MirFunction>, captures: Env) -> Arc<Self> {
        Arc::new(Self { function, captures })
    }
}

/// A (receiver, callable) pair produced by member access.
///
/// Calling a bound method prepends nothing: the receiver is delivered through
/// the implicit `this` binding, and the callable keeps its declared arity.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub callable: Value,
}

impl BoundMethod {
    #[must_use]
    pub fn new(receiver: Value, callable: Value) -> Arc<Self> {
        Arc::new(Self { receiver, callable })
    }

    /// Display name of the underlying callable.
    #[must_use]
    pub fn callable_name(&self) -> Arc<str> {
        match &self.callable {
            Value::Native(native) => Arc::from(native.name()),
            Value::Function(closure) => closure.function.name.clone(),
            Value::Bound(inner) => inner.callable_name(),
            other => Arc::from(&*other.type_name()),
        }
    }
}
