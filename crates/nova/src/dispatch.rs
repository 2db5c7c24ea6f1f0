//! Bounded method/constructor/field caches and host-signature selection.
//!
//! Cache keys pair pointer-equal class identity with interned name and an
//! argument-type shape, so hits are an equality and hash over fixed-size
//! arrays. All caches are capacity-bounded LRU; insertion is single-mutator
//! behind a mutex.

use std::{num::NonZeroUsize, sync::Arc};

use ahash::AHashSet;
use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
    class::{ClassDef, Constructor},
    invoke::CallArgs,
    value::{TypeTag, Value},
};

/// Capacity of the method and constructor caches.
const METHOD_CACHE_CAPACITY: usize = 4096;
/// Capacity of the getter/setter and host-method-name caches.
const FIELD_CACHE_CAPACITY: usize = 1024;

/// An argument-type shape. `TypeTag::Null` entries mark `null` arguments,
/// which are compatible with any non-primitive target.
pub(crate) type ArgShape = SmallVec<[TypeTag; 4]>;

/// Derives the shape of a call's positional arguments.
pub(crate) fn shape_of(args: &CallArgs) -> ArgShape {
    args.pos.iter().map(Value::type_tag).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    /// Pointer identity of the receiver class.
    class: usize,
    name: Arc<str>,
    shape: ArgShape,
    is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CtorKey {
    class: usize,
    shape: ArgShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FieldKey {
    class: usize,
    name: Arc<str>,
}

/// A pre-resolved field accessor: the layout slot when the field is in the
/// frozen layout, otherwise an overflow/static access.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldHandle {
    pub slot: Option<usize>,
}

/// The four bounded handle caches plus the host method-name presence cache.
pub(crate) struct DispatchCaches {
    methods: Mutex<LruCache<MethodKey, Value>>,
    constructors: Mutex<LruCache<CtorKey, (Arc<Constructor>, usize)>>,
    getters: Mutex<LruCache<FieldKey, FieldHandle>>,
    setters: Mutex<LruCache<FieldKey, FieldHandle>>,
    /// Host class tag → its public method names, making "does class X have a
    /// method called Y?" O(1).
    host_methods: Mutex<LruCache<Arc<str>, Arc<AHashSet<Arc<str>>>>>,
}

impl std::fmt::Debug for DispatchCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCaches")
            .field("methods", &self.methods.lock().len())
            .field("constructors", &self.constructors.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for DispatchCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchCaches {
    pub fn new() -> Self {
        let method_cap = NonZeroUsize::new(METHOD_CACHE_CAPACITY).expect("nonzero");
        let field_cap = NonZeroUsize::new(FIELD_CACHE_CAPACITY).expect("nonzero");
        Self {
            methods: Mutex::new(LruCache::new(method_cap)),
            constructors: Mutex::new(LruCache::new(method_cap)),
            getters: Mutex::new(LruCache::new(field_cap)),
            setters: Mutex::new(LruCache::new(field_cap)),
            host_methods: Mutex::new(LruCache::new(field_cap)),
        }
    }

    /// Cached method resolution for a class receiver.
    pub fn method(&self, class: &Arc<ClassDef>, name: &str, args: &CallArgs) -> Option<Value> {
        let key = MethodKey {
            class: Arc::as_ptr(class) as usize,
            name: Arc::from(name),
            shape: shape_of(args),
            is_static: false,
        };
        self.methods.lock().get(&key).cloned()
    }

    pub fn insert_method(&self, class: &Arc<ClassDef>, name: &str, args: &CallArgs, callable: &Value) {
        let key = MethodKey {
            class: Arc::as_ptr(class) as usize,
            name: Arc::from(name),
            shape: shape_of(args),
            is_static: false,
        };
        if let Some((evicted, _)) = self.methods.lock().push(key, callable.clone()) {
            log::debug!("method cache evicted {}#{}", evicted.class, evicted.name);
        }
    }

    /// Cached constructor selection: the chosen constructor plus the number
    /// of null paddings its selection implied.
    pub fn constructor(&self, class: &Arc<ClassDef>, shape: &ArgShape) -> Option<(Arc<Constructor>, usize)> {
        let key = CtorKey {
            class: Arc::as_ptr(class) as usize,
            shape: shape.clone(),
        };
        self.constructors.lock().get(&key).cloned()
    }

    pub fn insert_constructor(&self, class: &Arc<ClassDef>, shape: &ArgShape, chosen: (Arc<Constructor>, usize)) {
        let key = CtorKey {
            class: Arc::as_ptr(class) as usize,
            shape: shape.clone(),
        };
        if self.constructors.lock().push(key, chosen).is_some() {
            log::debug!("constructor cache evicted an entry for {}", class.name());
        }
    }

    /// Cached getter handle.
    pub fn getter(&self, class: &Arc<ClassDef>, name: &str) -> Option<FieldHandle> {
        let key = FieldKey {
            class: Arc::as_ptr(class) as usize,
            name: Arc::from(name),
        };
        self.getters.lock().get(&key).copied()
    }

    pub fn insert_getter(&self, class: &Arc<ClassDef>, name: &str, handle: FieldHandle) {
        let key = FieldKey {
            class: Arc::as_ptr(class) as usize,
            name: Arc::from(name),
        };
        self.getters.lock().push(key, handle);
    }

    /// Cached setter handle.
    pub fn setter(&self, class: &Arc<ClassDef>, name: &str) -> Option<FieldHandle> {
        let key = FieldKey {
            class: Arc::as_ptr(class) as usize,
            name: Arc::from(name),
        };
        self.setters.lock().get(&key).copied()
    }

    pub fn insert_setter(&self, class: &Arc<ClassDef>, name: &str, handle: FieldHandle) {
        let key = FieldKey {
            class: Arc::as_ptr(class) as usize,
            name: Arc::from(name),
        };
        self.setters.lock().push(key, handle);
    }

    /// The public method names of a host class, computed once per tag.
    pub fn host_method_names(
        &self,
        tag: &str,
        compute: impl FnOnce() -> AHashSet<Arc<str>>,
    ) -> Arc<AHashSet<Arc<str>>> {
        let mut cache = self.host_methods.lock();
        if let Some(found) = cache.get(tag) {
            return found.clone();
        }
        let names = Arc::new(compute());
        cache.push(Arc::from(tag), names.clone());
        names
    }
}

/// A host method signature, used for overload selection on foreign calls.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub params: Vec<TypeTag>,
    pub vararg: bool,
}

/// Whether an argument tag is acceptable for a parameter tag, allowing
/// numeric widening and `null` for non-primitive targets.
fn assignable(param: TypeTag, arg: TypeTag) -> bool {
    if param == arg {
        return true;
    }
    if arg == TypeTag::Null {
        return !param.is_number() && param != TypeTag::Bool && param != TypeTag::Char;
    }
    matches!(
        (param, arg),
        (TypeTag::Long, TypeTag::Int)
            | (TypeTag::Float, TypeTag::Int | TypeTag::Long)
            | (TypeTag::Double, TypeTag::Int | TypeTag::Long | TypeTag::Float)
    )
}

/// Widening distance between a parameter and an argument tag; lower is
/// narrower. Exact matches rank 0.
fn widening_rank(param: TypeTag, arg: TypeTag) -> u8 {
    if param == arg {
        return 0;
    }
    match (param, arg) {
        (TypeTag::Long, TypeTag::Int) => 1,
        (TypeTag::Float, TypeTag::Long) => 1,
        (TypeTag::Float, TypeTag::Int) => 2,
        (TypeTag::Double, TypeTag::Float) => 1,
        (TypeTag::Double, TypeTag::Long) => 2,
        (TypeTag::Double, TypeTag::Int) => 3,
        _ => 1,
    }
}

fn sig_matches(sig: &MethodSig, shape: &[TypeTag]) -> bool {
    if sig.vararg {
        let fixed = sig.params.len().saturating_sub(1);
        if shape.len() < fixed {
            return false;
        }
        let element = *sig.params.last().unwrap_or(&TypeTag::Null);
        sig.params[..fixed]
            .iter()
            .zip(shape)
            .all(|(p, a)| assignable(*p, *a))
            && shape[fixed..].iter().all(|a| assignable(element, *a))
    } else {
        sig.params.len() == shape.len()
            && sig.params.iter().zip(shape).all(|(p, a)| assignable(*p, *a))
    }
}

/// Selects the method signature for an argument shape: exact
/// non-vararg match first, then vararg matches, then the most specific among
/// the remaining candidates (non-vararg preferred, element-wise narrower
/// parameters win).
#[must_use]
pub fn select_signature(sigs: &[MethodSig], shape: &[TypeTag]) -> Option<usize> {
    // exact non-vararg match
    let exact = sigs.iter().position(|sig| {
        !sig.vararg && sig.params.len() == shape.len() && sig.params.iter().zip(shape).all(|(p, a)| p == a)
    });
    if exact.is_some() {
        return exact;
    }

    let mut candidates: Vec<usize> = (0..sigs.len()).filter(|i| sig_matches(&sigs[*i], shape)).collect();
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0]),
        _ => {
            // most-specific: non-vararg beats vararg, then narrower params
            candidates.sort_by(|&a, &b| {
                let (sa, sb) = (&sigs[a], &sigs[b]);
                sa.vararg
                    .cmp(&sb.vararg)
                    .then_with(|| total_rank(sa, shape).cmp(&total_rank(sb, shape)))
                    .then_with(|| a.cmp(&b))
            });
            Some(candidates[0])
        }
    }
}

fn total_rank(sig: &MethodSig, shape: &[TypeTag]) -> u32 {
    shape
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let param = if sig.vararg && i >= sig.params.len().saturating_sub(1) {
                sig.params.last().copied().unwrap_or(TypeTag::Null)
            } else {
                sig.params.get(i).copied().unwrap_or(TypeTag::Null)
            };
            u32::from(widening_rank(param, *arg))
        })
        .sum()
}
