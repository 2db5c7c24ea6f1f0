use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    env::Env,
    error::{RunError, RunResult},
    mir::MirFunction,
    value::Value,
};

/// One register of a frame.
///
/// `Raw` is the unboxed-integer fast path: arithmetic on two raw registers
/// stays in native integers without touching `Value`. The raw representation
/// is never observable outside the frame; every escaping read goes through
/// [`Frame::get`], which boxes on demand.
#[derive(Debug, Clone, Default)]
pub(crate) enum Slot {
    /// Not yet written. Reads are an internal error (malformed MIR).
    #[default]
    Empty,
    Boxed(Value),
    /// An unboxed integer, widened to 64 bits.
    Raw(i64),
}

/// The per-invocation interpreter state: register file, current position,
/// tail-recursion counter, and reified type arguments.
#[derive(Debug)]
pub(crate) struct Frame {
    pub function: Arc<MirFunction>,
    /// Capture environment for `LoadEnv`/`StoreEnv`/`LoadCapture`.
    pub env: Env,
    pub regs: Vec<Slot>,
    /// Current basic-block id.
    pub block: u32,
    /// Program counter within the block.
    pub pc: usize,
    /// Folded tail-recursion iterations, surfaced in stack traces only when
    /// an error is raised while the folded loop is live.
    pub tce_count: u32,
    /// Reified type parameter names → textual type names.
    pub reified: Option<AHashMap<Arc<str>, Arc<str>>>,
}

impl Frame {
    pub fn new(
        function: Arc<MirFunction>,
        env: Env,
        bound: Vec<Value>,
        reified: Option<AHashMap<Arc<str>, Arc<str>>>,
    ) -> Self {
        let mut regs = vec![Slot::Empty; function.frame_size.max(bound.len())];
        for (i, value) in bound.into_iter().enumerate() {
            regs[i] = Slot::Boxed(value);
        }
        Self {
            function,
            env,
            regs,
            block: 0,
            pc: 0,
            tce_count: 0,
            reified,
        }
    }

    /// The safe accessor: materialises a register as a `Value`.
    ///
    /// Raw integers narrow to `Int` when they fit in 32 bits, otherwise
    /// `Long`. This is the only way a raw register leaves the frame.
    pub fn get(&self, reg: u32) -> RunResult<Value> {
        match &self.regs[reg as usize] {
            Slot::Boxed(value) => Ok(value.clone()),
            Slot::Raw(raw) => Ok(box_raw(*raw)),
            Slot::Empty => Err(RunError::internal(format!("read of uninitialized register r{reg}"))),
        }
    }

    /// The raw view of a register, when it holds an unboxed integer.
    pub fn raw(&self, reg: u32) -> Option<i64> {
        match &self.regs[reg as usize] {
            Slot::Raw(raw) => Some(*raw),
            _ => None,
        }
    }

    /// Writes a boxed value. `dst` of -1 discards.
    pub fn set(&mut self, dst: i32, value: Value) {
        if dst >= 0 {
            self.regs[dst as usize] = Slot::Boxed(value);
        }
    }

    /// Writes a raw integer without boxing. `dst` of -1 discards.
    pub fn set_raw(&mut self, dst: i32, raw: i64) {
        if dst >= 0 {
            self.regs[dst as usize] = Slot::Raw(raw);
        }
    }

    /// Copies a register, preserving the raw representation.
    pub fn copy(&mut self, dst: i32, src: u32) {
        if dst >= 0 {
            self.regs[dst as usize] = self.regs[src as usize].clone();
        }
    }

    /// Repositions execution at the start of a block.
    pub fn jump(&mut self, block: u32) {
        self.block = block;
        self.pc = 0;
    }
}

/// Boxes a raw integer per the materialisation rule.
#[must_use]
pub(crate) fn box_raw(raw: i64) -> Value {
    match i32::try_from(raw) {
        Ok(v) => Value::Int(v),
        Err(_) => Value::Long(raw),
    }
}
