//! Security-policy enforcement: loop budgets, wall clock, recursion depth,
//! and tail-recursion folding in stack traces.

use std::sync::Arc;

use nova::{
    Closure, Engine, ErrorKind, SecurityPolicy, Value,
    mir::{FunctionBuilder, MirFunction, MirModule, Op},
};

fn module(entry: Arc<MirFunction>) -> MirModule {
    MirModule {
        name: "test".into(),
        file: "test.nova".into(),
        entry,
        source: None,
    }
}

/// `while (true) {}` as MIR: a single block ending in a back-edge.
fn infinite_loop() -> Arc<MirFunction> {
    let mut f = FunctionBuilder::new("main");
    let body = f.block();
    f.jump(body);
    f.switch_to(body);
    f.jump_back(body);
    f.build()
}

/// A loop taking exactly `n` back-edges.
fn counted_loop(n: i32) -> Arc<MirFunction> {
    let mut f = FunctionBuilder::new("main");
    let i = f.reg();
    f.const_int(i, n);
    let zero = f.reg();
    f.const_int(zero, 0);
    let one = f.reg();
    f.const_int(one, 1);
    let head = f.block();
    let exit = f.block();
    f.jump(head);
    f.switch_to(head);
    let done = f.reg();
    f.cmp(Op::CmpLe, done, i, zero);
    f.branch_true(done, exit);
    f.sub(i, i, one);
    f.jump_back(head);
    f.switch_to(exit);
    f.ret_unit();
    f.build()
}

/// The (limit+1)th back-edge fails with `ResourceLimit`.
#[test]
fn loop_limit_boundary() {
    let mut engine = Engine::new();
    engine.set_security_policy(SecurityPolicy::unlimited().max_loop_iterations(10));
    // 10 back-edges complete
    assert!(engine.eval_mir(&module(counted_loop(9))).is_ok());

    let mut engine = Engine::new();
    engine.set_security_policy(SecurityPolicy::unlimited().max_loop_iterations(10));
    let err = engine.eval_mir(&module(infinite_loop())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
}

#[test]
fn wall_clock_limit_stops_loops() {
    let mut engine = Engine::new();
    engine.set_security_policy(SecurityPolicy::unlimited().max_execution_ms(50));
    let err = engine.eval_mir(&module(infinite_loop())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
}

/// `fun f(n) = if (n <= 0) 0 else f(n - 1)`
fn recursive_fn() -> Arc<MirFunction> {
    let mut f = FunctionBuilder::new("f");
    let n = f.add_param("n");
    let zero = f.reg();
    f.const_int(zero, 0);
    let base = f.block();
    let stop = f.reg();
    f.cmp(Op::CmpLe, stop, n, zero);
    f.branch_true(stop, base);
    let callee = f.reg();
    f.load_env(callee, "f");
    let one = f.reg();
    f.const_int(one, 1);
    let next = f.reg();
    f.sub(next, n, one);
    let out = f.reg();
    f.call(out, callee, [next]);
    f.ret(out);
    f.switch_to(base);
    let z = f.reg();
    f.const_int(z, 0);
    f.ret(z);
    f.build()
}

/// Depth stays within the limit; exceeding fails with `RecursionLimit`.
#[test]
fn recursion_limit_boundary() {
    let mut engine = Engine::new();
    engine.set_security_policy(SecurityPolicy::unlimited().max_recursion_depth(64));
    let f = Value::Function(Closure::new(recursive_fn(), engine.globals()));
    engine.register_global("f", f.clone()).unwrap();

    assert_eq!(engine.call(&f, vec![Value::Int(40)]).unwrap(), Value::Int(0));
    let err = engine.call(&f, vec![Value::Int(100)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimit);
}

#[test]
fn recursion_trace_folds_old_frames() {
    let mut engine = Engine::new();
    engine.set_security_policy(SecurityPolicy::unlimited().max_recursion_depth(500));
    let f = Value::Function(Closure::new(recursive_fn(), engine.globals()));
    engine.register_global("f", f.clone()).unwrap();

    let err = engine.call(&f, vec![Value::Int(1000)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursionLimit);
    let text = err.to_string();
    assert!(text.contains("frames omitted"), "expected folded trace, got:\n{text}");
}

/// Tail-recursion rewritten to a back-branch: the folded iteration count is
/// attached to the frame when an error is raised inside the folded loop.
#[test]
fn tail_jump_counts_folded_iterations() {
    let mut f = FunctionBuilder::new("countdown");
    let n = f.add_param("n");
    let zero = f.reg();
    f.const_int(zero, 0);
    let thrower = f.block();
    let stop = f.reg();
    f.cmp(Op::CmpLe, stop, n, zero);
    f.branch_true(stop, thrower);
    let one = f.reg();
    f.const_int(one, 1);
    f.sub(n, n, one);
    f.tail_jump();
    f.switch_to(thrower);
    let msg = f.reg();
    f.const_string(msg, "done");
    f.throw(msg);
    let function = f.build();

    let mut engine = Engine::new();
    let callable = Value::Function(Closure::new(function, engine.globals()));
    let err = engine.call(&callable, vec![Value::Int(3)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserThrown);
    let frame = &err.frames()[0];
    assert_eq!(frame.name, "countdown");
    assert_eq!(frame.folded, 3);
}

/// Straight-line programs never trip the guards.
#[test]
fn straight_line_code_cannot_overrun_limits() {
    let mut engine = Engine::new();
    engine.set_security_policy(
        SecurityPolicy::unlimited()
            .max_loop_iterations(1)
            .max_execution_ms(10_000),
    );
    let mut f = FunctionBuilder::new("main");
    let mut acc = f.reg();
    f.const_int(acc, 0);
    for _ in 0..100 {
        let one = f.reg();
        f.const_int(one, 1);
        let next = f.reg();
        f.add(next, acc, one);
        acc = next;
    }
    f.ret(acc);
    assert_eq!(engine.eval_mir(&module(f.build())).unwrap(), Value::Int(100));
}
