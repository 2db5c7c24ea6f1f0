#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the 32-bit Int contract")]
#![expect(clippy::module_name_repetitions, reason = "public names stay descriptive on re-export")]

mod class;
mod concurrent;
mod dispatch;
mod engine;
mod env;
mod error;
mod function;
mod host;
mod interp;
mod invoke;
mod io;
mod limits;
pub mod mir;
mod modules;
mod object;
mod ops;
mod value;

pub use crate::{
    class::{
        ClassBuilder, ClassDef, ClassMirror, ClassModifiers, ClassRegistry, Constructor, EnumEntry,
        Initializer, InterfaceDef, InterfaceMethod, Visibility, add_enum_entry,
    },
    concurrent::{TaskHandle, TaskKind, WorkerPool},
    dispatch::{MethodSig, select_signature},
    engine::{AnnotationProcessor, Engine, EngineShared, Lowering},
    env::Env,
    error::{CodeLoc, EngineError, ErrorKind, Exception, StackFrame},
    function::{BoundMethod, Closure, NativeFunction},
    host::{ForeignObject, FunctionalSamProxy, HostBridge, HostObject},
    interp::Interp,
    invoke::{CallArgs, ExtensionRegistry, TYPE_ARG_PREFIX},
    io::{CollectStrings, ConsoleStreams, NullStreams, SharedCollect, StdStreams},
    limits::{DEFAULT_MAX_RECURSION_DEPTH, SecurityPolicy},
    modules::{MODULE_PREFIX, load_module},
    object::Instance,
    ops::BinOp,
    value::{ListRef, MapRef, MapStore, RangeValue, TypeTag, Value},
};
