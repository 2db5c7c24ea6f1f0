use std::{fmt, sync::Arc};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    error::{ErrorKind, RunError, RunResult},
    value::Value,
};

/// A lexically nested name→value binding container.
///
/// Environments form a parent chain; lookup walks the chain leaf-first.
/// Cloning an `Env` clones the handle, not the bindings, so closures capture
/// their definition scope by reference.
///
/// The chain is not thread-safe: workers never write to a
/// parent environment; each child interpreter layers fresh children on top of
/// the shared global scope, which is read-mostly after startup.
#[derive(Clone)]
pub struct Env {
    inner: Arc<EnvInner>,
}

struct EnvInner {
    vars: RwLock<AHashMap<Arc<str>, Value>>,
    parent: Option<Env>,
    /// Set on the global scope: declarations here may not shadow a name
    /// defined in the sealed builtins scope directly beneath it.
    guards_builtins: bool,
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("bindings", &self.inner.vars.read().len())
            .field("depth", &self.depth())
            .finish()
    }
}

impl Env {
    /// Creates a root environment with no parent (the builtins scope).
    #[must_use]
    pub fn root() -> Self {
        Self {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(AHashMap::new()),
                parent: None,
                guards_builtins: false,
            }),
        }
    }

    /// Creates the global scope on top of a sealed builtins scope.
    ///
    /// Declarations in this scope fail when they would redefine a builtin;
    /// inner scopes may still shadow freely.
    #[must_use]
    pub fn global_over(builtins: &Self) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(AHashMap::new()),
                parent: Some(builtins.clone()),
                guards_builtins: true,
            }),
        }
    }

    /// Creates a child scope of this environment.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                vars: RwLock::new(AHashMap::new()),
                parent: Some(self.clone()),
                guards_builtins: false,
            }),
        }
    }

    /// Whether two handles refer to the same scope.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.inner.parent.clone();
        while let Some(env) = cursor {
            depth += 1;
            cursor = env.inner.parent.clone();
        }
        depth
    }

    /// Looks up `name`, walking the chain leaf-first.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.inner.vars.read().get(name) {
                return Some(value.clone());
            }
            match &scope.inner.parent {
                Some(parent) => scope = parent,
                None => return None,
            }
        }
    }

    /// Declares a new binding in this scope.
    ///
    /// Fails on the global scope when `name` is already defined by the sealed
    /// builtins scope beneath it.
    pub fn declare(&self, name: Arc<str>, value: Value) -> RunResult<()> {
        if self.inner.guards_builtins
            && let Some(builtins) = &self.inner.parent
            && builtins.inner.vars.read().contains_key(&*name)
        {
            return Err(RunError::raise(
                ErrorKind::TypeOp,
                format!("cannot redefine built-in '{name}' at global scope"),
            ));
        }
        self.inner.vars.write().insert(name, value);
        Ok(())
    }

    /// Inserts a binding without the sealed-builtins check.
    ///
    /// Used by the engine to register builtins and by parameter binding,
    /// where names are already validated.
    pub fn define(&self, name: Arc<str>, value: Value) {
        self.inner.vars.write().insert(name, value);
    }

    /// Assigns to an existing binding, walking the chain leaf-first.
    ///
    /// Returns false when no scope in the chain defines `name`.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut scope = self;
        loop {
            {
                let mut vars = scope.inner.vars.write();
                if let Some(slot) = vars.get_mut(name) {
                    *slot = value;
                    return true;
                }
            }
            match &scope.inner.parent {
                Some(parent) => scope = parent,
                None => return false,
            }
        }
    }

    /// Whether `name` is bound in this scope only (not the chain).
    #[must_use]
    pub fn defines_locally(&self, name: &str) -> bool {
        self.inner.vars.read().contains_key(name)
    }
}
