//! The register-oriented intermediate representation the interpreter
//! executes.
//!
//! A function is a list of basic blocks, each a list of instructions. The
//! lowering collaborator produces these in memory; their on-wire shape is not
//! part of this crate's contract. `FunctionBuilder` is the assembly surface
//! shared by the lowering pass and the test suite.

pub use builder::FunctionBuilder;
pub use op::Op;

mod builder;
mod op;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::value::Value;

/// Constant payload attached to an instruction.
#[derive(Debug, Clone)]
pub enum Extra {
    /// Integer payload for `ConstInt`/`ConstLong`.
    Int(i64),
    /// Floating payload for `ConstFloat`/`ConstDouble`.
    Num(f64),
    Bool(bool),
    Str(Arc<str>),
    /// An identifier payload: environment, field, or method name.
    Name(Arc<str>),
    /// A jump target block id.
    Block(u32),
    /// Range constructor inclusivity.
    Range { inclusive: bool },
}

impl Extra {
    pub(crate) fn as_block(&self) -> Option<u32> {
        match self {
            Self::Block(b) => Some(*b),
            _ => None,
        }
    }

    pub(crate) fn as_name(&self) -> Option<&Arc<str>> {
        match self {
            Self::Name(n) => Some(n),
            _ => None,
        }
    }
}

/// One MIR instruction.
#[derive(Debug, Clone)]
pub struct Inst {
    pub op: Op,
    /// Destination register, or -1 when the instruction produces no value.
    pub dst: i32,
    /// Source register indices. Calls put the callee/receiver first.
    pub args: SmallVec<[u32; 2]>,
    pub extra: Option<Extra>,
    /// 1-based source line, 0 when unknown.
    pub line: u32,
}

/// A basic block: a straight-line instruction list.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub insts: Vec<Inst>,
}

/// A catch clause: failures raised in any covered block transfer to
/// `target` with the caught value written to `reg`.
///
/// Clauses are ordered innermost-first; the first clause covering the
/// raising block wins.
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub blocks: SmallVec<[u32; 4]>,
    pub target: u32,
    pub reg: u32,
}

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Arc<str>,
    pub default: Option<ParamDefault>,
    /// A vararg parameter consumes all remaining positional arguments.
    pub vararg: bool,
}

impl Param {
    #[must_use]
    pub fn required(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            default: None,
            vararg: false,
        }
    }

    #[must_use]
    pub fn with_default(name: impl AsRef<str>, default: ParamDefault) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            default: Some(default),
            vararg: false,
        }
    }

    #[must_use]
    pub fn vararg(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            default: None,
            vararg: true,
        }
    }
}

/// A parameter default: a constant, or a thunk evaluated in the parameter's
/// definition environment extended by previously bound parameters.
#[derive(Debug, Clone)]
pub enum ParamDefault {
    Const(Value),
    Thunk(Arc<MirFunction>),
}

/// A compiled MIR function.
///
/// Parameters occupy registers `0..params.len()` on frame entry;
/// `frame_size` covers parameters and temporaries.
#[derive(Debug)]
pub struct MirFunction {
    pub name: Arc<str>,
    pub params: Vec<Param>,
    /// Reified type parameter names, bound from caller-supplied type
    /// arguments under the reserved `__type$` prefix.
    pub type_params: Vec<Arc<str>>,
    pub frame_size: usize,
    pub blocks: Vec<Block>,
    pub catches: Vec<CatchClause>,
    /// File the function was lowered from, for stack traces.
    pub file: Option<Arc<str>>,
}

impl MirFunction {
    /// Declared parameter count, or -1 when the last parameter is vararg.
    #[must_use]
    pub fn arity(&self) -> i32 {
        if self.params.last().is_some_and(|p| p.vararg) {
            -1
        } else {
            self.params.len() as i32
        }
    }
}

/// An in-memory module produced by the lowering collaborator: the entry
/// thunk plus the source text for error reporting.
#[derive(Debug, Clone)]
pub struct MirModule {
    pub name: Arc<str>,
    pub file: Arc<str>,
    pub entry: Arc<MirFunction>,
    /// Module source, consulted for the offending line on errors.
    pub source: Option<Arc<str>>,
}
