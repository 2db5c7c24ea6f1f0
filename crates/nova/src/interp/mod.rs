//! The MIR register interpreter.
//!
//! The execution loop is a per-instruction `match` over opcodes, with no
//! inline caches. Two-register integer arithmetic runs unboxed in the
//! frame's raw representation; any value that escapes the frame (argument,
//! field write, return, environment export) is read through the safe
//! accessor, which boxes on demand.

mod frame;

pub(crate) use frame::Frame;

use std::sync::{Arc, atomic::AtomicBool};

use ahash::AHashMap;

use crate::{
    engine::EngineShared,
    env::Env,
    error::{ErrorKind, Exception, Raised, RunError, RunResult, StackFrame},
    function::BoundMethod,
    invoke::{self, CallArgs},
    limits::Guards,
    mir::{Extra, Inst, MirFunction, MirModule, Op},
    ops::{self, BinOp},
    value::{MapStore, RangeValue, Value},
};

/// Truncation width of one argument in a stack-trace parameter summary.
const SUMMARY_ARG_WIDTH: usize = 24;
/// Number of arguments shown in a stack-trace parameter summary.
const SUMMARY_ARG_COUNT: usize = 4;

/// A single-threaded interpreter: per-thread mutable state over the engine's
/// shared read-mostly tables.
///
/// The main interpreter lives on the embedding thread; each worker thread
/// builds its own child from the same shared state, so no mutable
/// interpreter state ever crosses threads.
pub struct Interp {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) guards: Guards,
    /// Cancellation flag of the task this interpreter is running, polled at
    /// loop back-edges and host-call boundaries.
    pub(crate) cancel: Option<Arc<AtomicBool>>,
}

impl Interp {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        let policy = shared.policy.read().clone();
        Self {
            shared,
            guards: Guards::new(policy),
            cancel: None,
        }
    }

    /// The engine's global environment.
    #[must_use]
    pub fn globals(&self) -> Env {
        self.shared.globals.clone()
    }

    /// Writes to the engine's standard output stream.
    pub fn write_out(&self, text: &str) -> Result<(), Exception> {
        self.shared.streams.lock().write_out(text)
    }

    /// Writes to the engine's standard error stream.
    pub fn write_err(&self, text: &str) -> Result<(), Exception> {
        self.shared.streams.lock().write_err(text)
    }

    /// Reads a line from the engine's standard input stream.
    pub fn read_line(&self) -> Result<Option<String>, Exception> {
        self.shared.streams.lock().read_line()
    }

    /// The host-supplied command-line arguments.
    #[must_use]
    pub fn cli_args(&self) -> Vec<String> {
        self.shared.cli_args.read().clone()
    }

    /// Runs a module's entry thunk in a fresh scope over the globals.
    pub(crate) fn run_module(&mut self, module: &MirModule, env: &Env) -> RunResult<Value> {
        self.guards.reset();
        self.run_function(&module.entry, env, Vec::new(), None, false)
    }

    /// Executes one function frame to completion.
    ///
    /// `bound` seeds the parameter registers; `env` is the capture
    /// environment. Constructor frames (`is_ctor`) skip the recursion-depth
    /// check.
    pub(crate) fn run_function(
        &mut self,
        function: &Arc<MirFunction>,
        env: &Env,
        bound: Vec<Value>,
        reified: Option<AHashMap<Arc<str>, Arc<str>>>,
        is_ctor: bool,
    ) -> RunResult<Value> {
        if is_ctor {
            self.guards.enter_frame_unchecked();
        } else {
            self.guards.enter_frame()?;
        }
        let mut frame = Frame::new(function.clone(), env.clone(), bound, reified);
        let result = self.exec_frame(&mut frame);
        self.guards.exit_frame();
        result.map_err(|err| attach_frame(err, &frame))
    }

    /// The dispatch loop.
    fn exec_frame(&mut self, frame: &mut Frame) -> RunResult<Value> {
        let function = frame.function.clone();
        loop {
            let Some(block) = function.blocks.get(frame.block as usize) else {
                return Ok(Value::Unit);
            };
            let Some(inst) = block.insts.get(frame.pc) else {
                // implicit fallthrough to the next block
                let next = frame.block + 1;
                if (next as usize) < function.blocks.len() {
                    frame.jump(next);
                    continue;
                }
                return Ok(Value::Unit);
            };
            frame.pc += 1;

            match self.step(frame, inst) {
                Ok(StepExit::Continue) => {}
                Ok(StepExit::Return(value)) => return Ok(value),
                Err(RunError::Raise(raised)) if raised.kind.is_catchable() => {
                    let clause = function
                        .catches
                        .iter()
                        .find(|clause| clause.blocks.contains(&frame.block));
                    match clause {
                        Some(clause) => {
                            frame.set(clause.reg as i32, raised.catch_value());
                            frame.jump(clause.target);
                        }
                        None => return Err(RunError::Raise(raised)),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn step(&mut self, frame: &mut Frame, inst: &Inst) -> RunResult<StepExit> {
        match inst.op {
            Op::ConstInt => {
                let Some(Extra::Int(v)) = &inst.extra else {
                    return Err(RunError::internal("ConstInt without integer payload"));
                };
                frame.set_raw(inst.dst, *v);
            }
            Op::ConstLong => {
                let Some(Extra::Int(v)) = &inst.extra else {
                    return Err(RunError::internal("ConstLong without integer payload"));
                };
                frame.set(inst.dst, Value::Long(*v));
            }
            Op::ConstFloat => {
                let Some(Extra::Num(v)) = &inst.extra else {
                    return Err(RunError::internal("ConstFloat without numeric payload"));
                };
                frame.set(inst.dst, Value::Float(*v as f32));
            }
            Op::ConstDouble => {
                let Some(Extra::Num(v)) = &inst.extra else {
                    return Err(RunError::internal("ConstDouble without numeric payload"));
                };
                frame.set(inst.dst, Value::Double(*v));
            }
            Op::ConstString => {
                let Some(Extra::Str(s)) = &inst.extra else {
                    return Err(RunError::internal("ConstString without string payload"));
                };
                frame.set(inst.dst, Value::Str(s.clone()));
            }
            Op::ConstBool => {
                let Some(Extra::Bool(b)) = &inst.extra else {
                    return Err(RunError::internal("ConstBool without bool payload"));
                };
                frame.set(inst.dst, Value::Bool(*b));
            }
            Op::ConstNull => frame.set(inst.dst, Value::Null),
            Op::ConstUnit => frame.set(inst.dst, Value::Unit),

            Op::Move => frame.copy(inst.dst, inst.args[0]),

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let (a, b) = (inst.args[0], inst.args[1]);
                // unboxed fast path: both operands raw, 32-bit wrapping
                if let (Some(x), Some(y)) = (frame.raw(a), frame.raw(b)) {
                    let raw = raw_arith(inst.op, x as i32, y as i32)?;
                    frame.set_raw(inst.dst, i64::from(raw));
                } else {
                    let lhs = frame.get(a)?;
                    let rhs = frame.get(b)?;
                    let result = ops::binary(self, bin_op(inst.op), &lhs, &rhs)?;
                    frame.set(inst.dst, result);
                }
            }
            Op::Neg => {
                if let Some(x) = frame.raw(inst.args[0]) {
                    frame.set_raw(inst.dst, i64::from((x as i32).wrapping_neg()));
                } else {
                    let value = frame.get(inst.args[0])?;
                    frame.set(inst.dst, ops::negate(&value)?);
                }
            }
            Op::Not => {
                let value = frame.get(inst.args[0])?;
                frame.set(inst.dst, Value::Bool(!value.is_truthy()));
            }

            Op::CmpEq | Op::CmpNe => {
                let (a, b) = (inst.args[0], inst.args[1]);
                let equal = if let (Some(x), Some(y)) = (frame.raw(a), frame.raw(b)) {
                    x == y
                } else {
                    frame.get(a)? == frame.get(b)?
                };
                frame.set(inst.dst, Value::Bool(equal == (inst.op == Op::CmpEq)));
            }
            Op::CmpLt | Op::CmpLe | Op::CmpGt | Op::CmpGe => {
                let (a, b) = (inst.args[0], inst.args[1]);
                let ordering = if let (Some(x), Some(y)) = (frame.raw(a), frame.raw(b)) {
                    x.cmp(&y)
                } else {
                    let lhs = frame.get(a)?;
                    let rhs = frame.get(b)?;
                    ops::compare(self, &lhs, &rhs)?
                };
                let holds = match inst.op {
                    Op::CmpLt => ordering.is_lt(),
                    Op::CmpLe => ordering.is_le(),
                    Op::CmpGt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                frame.set(inst.dst, Value::Bool(holds));
            }

            Op::Jump => frame.jump(target(inst)?),
            Op::JumpBack => {
                self.guards.on_back_edge(self.cancel.as_deref())?;
                frame.jump(target(inst)?);
            }
            Op::TailJump => {
                self.guards.on_back_edge(self.cancel.as_deref())?;
                frame.tce_count = frame.tce_count.saturating_add(1);
                frame.jump(target(inst)?);
            }
            Op::BranchTrue | Op::BranchFalse => {
                let truthy = match frame.raw(inst.args[0]) {
                    Some(raw) => raw != 0,
                    None => frame.get(inst.args[0])?.is_truthy(),
                };
                if truthy == (inst.op == Op::BranchTrue) {
                    frame.jump(target(inst)?);
                }
            }

            Op::NewList => {
                let mut items = Vec::with_capacity(inst.args.len());
                for reg in &inst.args {
                    items.push(frame.get(*reg)?);
                }
                frame.set(inst.dst, Value::list(items));
            }
            Op::NewMap => {
                let mut entries = MapStore::default();
                for pair in inst.args.chunks(2) {
                    let key = frame.get(pair[0])?;
                    let value = frame.get(pair[1])?;
                    entries.insert(key, value);
                }
                frame.set(inst.dst, Value::map(entries));
            }
            Op::NewRange => {
                let Some(Extra::Range { inclusive }) = &inst.extra else {
                    return Err(RunError::internal("NewRange without inclusivity payload"));
                };
                let start = frame.get(inst.args[0])?;
                let end = frame.get(inst.args[1])?;
                let (Some(start), Some(end)) = (start.as_index(), end.as_index()) else {
                    return Err(RunError::raise(ErrorKind::TypeOp, "range bounds must be integers"));
                };
                frame.set(inst.dst, Value::Range(RangeValue { start, end, inclusive: *inclusive }));
            }
            Op::GetIndex => {
                let container = frame.get(inst.args[0])?;
                let index = frame.get(inst.args[1])?;
                frame.set(inst.dst, ops::get_index(&container, &index)?);
            }
            Op::SetIndex => {
                let container = frame.get(inst.args[0])?;
                let index = frame.get(inst.args[1])?;
                let value = frame.get(inst.args[2])?;
                ops::set_index(&container, &index, value)?;
            }

            Op::LoadEnv => {
                let name = name(inst)?;
                match frame.env.lookup(name) {
                    Some(value) => frame.set(inst.dst, value),
                    None => {
                        // reified type arguments also resolve from the frame
                        if let Some(reified) = &frame.reified
                            && let Some(param) = name.strip_prefix(invoke::TYPE_ARG_PREFIX)
                            && let Some(text) = reified.get(param)
                        {
                            frame.set(inst.dst, Value::Str(text.clone()));
                        } else {
                            return Err(RunError::raise(
                                ErrorKind::UndefinedProperty,
                                format!("name '{name}' is not defined"),
                            ));
                        }
                    }
                }
            }
            Op::StoreEnv => {
                let value = frame.get(inst.args[0])?;
                let name = name(inst)?;
                if !frame.env.assign(name, value) {
                    return Err(RunError::raise(
                        ErrorKind::UndefinedProperty,
                        format!("assignment to undeclared name '{name}'"),
                    ));
                }
            }
            Op::DeclareEnv => {
                let value = frame.get(inst.args[0])?;
                let name_arc = inst
                    .extra
                    .as_ref()
                    .and_then(Extra::as_name)
                    .ok_or_else(|| RunError::internal("DeclareEnv without name payload"))?;
                frame.env.declare(name_arc.clone(), value)?;
            }
            // capture access is lowering-verified: a missing binding means
            // malformed MIR, unlike LoadEnv's dynamic lookup
            Op::LoadCapture => {
                let name = name(inst)?;
                match frame.env.lookup(name) {
                    Some(value) => frame.set(inst.dst, value),
                    None => {
                        return Err(RunError::internal(format!(
                            "captured name '{name}' missing from environment"
                        )));
                    }
                }
            }
            Op::StoreCapture => {
                let value = frame.get(inst.args[0])?;
                let name = name(inst)?;
                if !frame.env.assign(name, value) {
                    return Err(RunError::internal(format!(
                        "captured name '{name}' missing from environment"
                    )));
                }
            }

            Op::GetField => {
                let receiver = frame.get(inst.args[0])?;
                let value = self.get_field(&receiver, name(inst)?)?;
                frame.set(inst.dst, value);
            }
            Op::SetField => {
                let receiver = frame.get(inst.args[0])?;
                let value = frame.get(inst.args[1])?;
                self.set_field(&receiver, name(inst)?, value)?;
            }

            Op::Call => {
                let callee = frame.get(inst.args[0])?;
                let args = self.collect_args(frame, &inst.args[1..])?;
                let result = invoke::call_value(self, &callee, CallArgs::positional(args))?;
                frame.set(inst.dst, result);
            }
            Op::CallVirtual => {
                let receiver = frame.get(inst.args[0])?;
                let args = self.collect_args(frame, &inst.args[1..])?;
                let result = invoke::call_virtual(self, &receiver, name(inst)?, CallArgs::positional(args))?;
                frame.set(inst.dst, result);
            }
            Op::New => {
                let class = frame.get(inst.args[0])?;
                let args = self.collect_args(frame, &inst.args[1..])?;
                let result = match &class {
                    Value::Class(class) => invoke::instantiate(self, class, CallArgs::positional(args))?,
                    Value::Interface(iface) => {
                        return Err(RunError::raise(
                            ErrorKind::InstantiateForbidden,
                            format!("cannot instantiate interface '{}'", iface.name()),
                        ));
                    }
                    other => {
                        return Err(RunError::raise(
                            ErrorKind::TypeOp,
                            format!("{} is not a class", other.type_name()),
                        ));
                    }
                };
                frame.set(inst.dst, result);
            }

            Op::Throw => {
                let value = frame.get(inst.args[0])?;
                return Err(Raised::thrown(value).into());
            }
            Op::Break => {
                let label = inst.extra.as_ref().and_then(Extra::as_name).cloned();
                return Err(RunError::Break(label));
            }
            Op::Continue => {
                let label = inst.extra.as_ref().and_then(Extra::as_name).cloned();
                return Err(RunError::Continue(label));
            }
            Op::Return => return Ok(StepExit::Return(frame.get(inst.args[0])?)),
            Op::ReturnUnit => return Ok(StepExit::Return(Value::Unit)),
        }
        Ok(StepExit::Continue)
    }

    fn collect_args(&self, frame: &Frame, regs: &[u32]) -> RunResult<Vec<Value>> {
        let mut args = Vec::with_capacity(regs.len());
        for reg in regs {
            args.push(frame.get(*reg)?);
        }
        Ok(args)
    }

    /// Member read used by `GetField`: layout slot, overflow, bound method,
    /// static, then the receiver-shape fallbacks.
    fn get_field(&mut self, receiver: &Value, name: &str) -> RunResult<Value> {
        match receiver {
            Value::Object(instance) => {
                let class = instance.class();
                let handle = self.shared.caches.getter(class, name).unwrap_or_else(|| {
                    let handle = crate::dispatch::FieldHandle { slot: class.field_slot(name) };
                    self.shared.caches.insert_getter(class, name, handle);
                    handle
                });
                if let Some(slot) = handle.slot {
                    if let Some(found) = instance.slot(slot) {
                        return Ok(found);
                    }
                }
                if let Some(found) = instance.get_field(name) {
                    return Ok(found);
                }
                if let Some(method) = instance.class().lookup_method(name) {
                    return Ok(Value::Bound(BoundMethod::new(receiver.clone(), method)));
                }
                if let Some(found) = instance.class().static_field(name) {
                    return Ok(found);
                }
                if let Some(delegate) = instance.delegate() {
                    return invoke::foreign_get(self, &delegate, name);
                }
                Err(undefined_member(instance.class().name(), name))
            }
            Value::Enum(entry) => {
                if let Some(found) = entry.field(name) {
                    return Ok(found);
                }
                match name {
                    "name" => Ok(Value::Str(Arc::from(entry.name()))),
                    "ordinal" => Ok(Value::Int(entry.ordinal() as i32)),
                    _ => match entry.lookup_method(name) {
                        Some(method) => Ok(Value::Bound(BoundMethod::new(receiver.clone(), method))),
                        None => Err(undefined_member(&receiver.type_name(), name)),
                    },
                }
            }
            Value::Class(class) => class
                .static_field(name)
                .or_else(|| class.lookup_method(name))
                .ok_or_else(|| undefined_member(class.name(), name)),
            Value::Function(closure) => closure
                .captures
                .lookup(name)
                .ok_or_else(|| undefined_member("Function", name)),
            Value::Pair(pair) => match name {
                "first" => Ok(pair.0.clone()),
                "second" => Ok(pair.1.clone()),
                _ => Err(undefined_member("Pair", name)),
            },
            Value::Range(range) => match name {
                "start" => Ok(Value::Long(range.start)),
                "end" => Ok(Value::Long(range.end)),
                _ => Err(undefined_member("Range", name)),
            },
            Value::Foreign(foreign) => {
                let delegate = foreign.object().clone();
                invoke::foreign_get(self, &delegate, name)
            }
            other => Err(undefined_member(&other.type_name(), name)),
        }
    }

    fn set_field(&mut self, receiver: &Value, name: &str, value: Value) -> RunResult<()> {
        match receiver {
            Value::Object(instance) => {
                let class = instance.class();
                let handle = self.shared.caches.setter(class, name).unwrap_or_else(|| {
                    let handle = crate::dispatch::FieldHandle { slot: class.field_slot(name) };
                    self.shared.caches.insert_setter(class, name, handle);
                    handle
                });
                match handle.slot {
                    Some(slot) => instance.set_slot(slot, value),
                    None => instance.set_field(name, value),
                }
                Ok(())
            }
            Value::Enum(entry) => {
                entry.set_field(Arc::from(name), value);
                Ok(())
            }
            Value::Class(class) => {
                class.set_static(Arc::from(name), value);
                Ok(())
            }
            // field writes on a function value export into its captures
            Value::Function(closure) => {
                if !closure.captures.assign(name, value.clone()) {
                    closure.captures.define(Arc::from(name), value);
                }
                Ok(())
            }
            Value::Foreign(foreign) => {
                let delegate = foreign.object().clone();
                invoke::foreign_set(self, &delegate, name, value)
            }
            other => Err(RunError::raise(
                ErrorKind::TypeOp,
                format!("cannot assign property '{name}' on {}", other.type_name()),
            )),
        }
    }
}

/// Non-error outcomes of one instruction.
enum StepExit {
    Continue,
    Return(Value),
}

fn bin_op(op: Op) -> BinOp {
    match op {
        Op::Add => BinOp::Add,
        Op::Sub => BinOp::Sub,
        Op::Mul => BinOp::Mul,
        Op::Div => BinOp::Div,
        Op::Mod => BinOp::Mod,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

/// 32-bit wrapping arithmetic on the raw fast path.
fn raw_arith(op: Op, a: i32, b: i32) -> RunResult<i32> {
    Ok(match op {
        Op::Add => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Mul => a.wrapping_mul(b),
        Op::Div => {
            if b == 0 {
                return Err(RunError::raise(ErrorKind::ArithZero, "division by zero"));
            }
            a.wrapping_div(b)
        }
        Op::Mod => {
            if b == 0 {
                return Err(RunError::raise(ErrorKind::ArithZero, "modulo by zero"));
            }
            a.wrapping_rem(b)
        }
        _ => unreachable!("not an arithmetic opcode"),
    })
}

fn target(inst: &Inst) -> RunResult<u32> {
    inst.extra
        .as_ref()
        .and_then(Extra::as_block)
        .ok_or_else(|| RunError::internal(format!("{} without block payload", inst.op)))
}

fn name(inst: &Inst) -> RunResult<&str> {
    inst.extra
        .as_ref()
        .and_then(Extra::as_name)
        .map(|n| &**n)
        .ok_or_else(|| RunError::internal(format!("{} without name payload", inst.op)))
}

fn undefined_member(type_name: &str, member: &str) -> RunError {
    RunError::raise(
        ErrorKind::UndefinedProperty,
        format!("'{type_name}' has no member '{member}'"),
    )
}

/// Appends this frame to an unwinding raise: display name, a brief parameter
/// summary, the active line, and the folded tail-recursion count.
fn attach_frame(err: RunError, frame: &Frame) -> RunError {
    match err {
        RunError::Raise(mut raised) => {
            let line = frame
                .function
                .blocks
                .get(frame.block as usize)
                .and_then(|b| b.insts.get(frame.pc.saturating_sub(1)))
                .map_or(0, |inst| inst.line);
            if raised.location.is_none()
                && line > 0
                && let Some(file) = &frame.function.file
            {
                raised.location = Some(crate::error::CodeLoc {
                    file: file.clone(),
                    line,
                    column: 1,
                    length: 0,
                });
            }
            raised.push_frame(StackFrame {
                name: frame.function.name.to_string(),
                summary: summarize_params(frame),
                line,
                folded: frame.tce_count,
            });
            RunError::Raise(raised)
        }
        other => other,
    }
}

/// Formats the bound parameters of a frame, e.g. `(2, "ab", ...)`.
///
/// Computed only when an error is being formed.
fn summarize_params(frame: &Frame) -> String {
    let count = frame.function.params.len();
    let mut out = String::from("(");
    for i in 0..count.min(SUMMARY_ARG_COUNT) {
        if i > 0 {
            out.push_str(", ");
        }
        match frame.get(i as u32) {
            Ok(value) => {
                let mut text = value.repr();
                if text.len() > SUMMARY_ARG_WIDTH {
                    text.truncate(SUMMARY_ARG_WIDTH);
                    text.push('…');
                }
                out.push_str(&text);
            }
            Err(_) => out.push('?'),
        }
    }
    if count > SUMMARY_ARG_COUNT {
        out.push_str(", ...");
    }
    out.push(')');
    out
}
