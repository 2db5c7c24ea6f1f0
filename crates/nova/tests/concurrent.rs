//! Structured-concurrency tests: Futures, Jobs, cancellation, the task
//! quota, and the global active-task counter.

use std::{sync::Arc, thread, time::Duration};

use nova::{
    Closure, Engine, ErrorKind, NativeFunction, SecurityPolicy, Value,
    mir::{FunctionBuilder, MirFunction},
};

fn adder() -> Arc<MirFunction> {
    let mut f = FunctionBuilder::new("work");
    let a = f.reg();
    f.const_int(a, 40);
    let b = f.reg();
    f.const_int(b, 2);
    let out = f.reg();
    f.add(out, a, b);
    f.ret(out);
    f.build()
}

fn looper() -> Arc<MirFunction> {
    let mut f = FunctionBuilder::new("spin");
    let body = f.block();
    f.jump(body);
    f.switch_to(body);
    f.jump_back(body);
    f.build()
}

fn sleeper(ms: u64) -> Value {
    Value::Native(NativeFunction::new(
        "sleeper",
        0,
        Box::new(move |_, _| {
            thread::sleep(Duration::from_millis(ms));
            Ok(Value::Unit)
        }),
    ))
}

fn spawn_native(engine: &Engine, which: &str) -> Value {
    engine.load_builtin_module("nova.concurrent");
    engine.globals().lookup(which).expect("module registered")
}

#[test]
fn future_get_returns_the_value_and_is_idempotent() {
    let mut engine = Engine::new();
    let spawn = spawn_native(&engine, "async");
    let work = Value::Function(Closure::new(adder(), engine.globals()));
    let future = engine.call(&spawn, vec![work]).unwrap();
    let Value::Future(handle) = &future else { panic!("expected future") };

    assert_eq!(handle.get().unwrap(), Value::Int(42));
    // get after completion keeps answering
    assert_eq!(handle.get().unwrap(), Value::Int(42));
    assert!(handle.is_completed());
    assert_eq!(engine.active_tasks(), 0);
}

#[test]
fn future_arguments_flow_to_the_callable() {
    let mut engine = Engine::new();
    let spawn = spawn_native(&engine, "async");
    let double = {
        let mut f = FunctionBuilder::new("double");
        let n = f.add_param("n");
        let two = f.reg();
        f.const_int(two, 2);
        let out = f.reg();
        f.mul(out, n, two);
        f.ret(out);
        f.build()
    };
    let work = Value::Function(Closure::new(double, engine.globals()));
    let future = engine.call(&spawn, vec![work, Value::Int(21)]).unwrap();
    let Value::Future(handle) = future else { panic!() };
    assert_eq!(handle.get().unwrap(), Value::Int(42));
}

#[test]
fn failures_surface_on_get() {
    let mut engine = Engine::new();
    let spawn = spawn_native(&engine, "async");
    let thrower = {
        let mut f = FunctionBuilder::new("boom");
        let msg = f.reg();
        f.const_string(msg, "worker failure");
        f.throw(msg);
        f.build()
    };
    let work = Value::Function(Closure::new(thrower, engine.globals()));
    let future = engine.call(&spawn, vec![work]).unwrap();
    let Value::Future(handle) = future else { panic!() };
    let err = handle.get().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserThrown);
    assert_eq!(engine.active_tasks(), 0);
}

#[test]
fn get_with_timeout_fails_on_slow_tasks() {
    let mut engine = Engine::new();
    let spawn = spawn_native(&engine, "async");
    let future = engine.call(&spawn, vec![sleeper(500)]).unwrap();
    let Value::Future(handle) = future else { panic!() };
    let err = handle.get_timeout(Duration::from_millis(30)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    // the task itself still completes and releases its quota slot
    handle.join().unwrap();
    assert_eq!(engine.active_tasks(), 0);
}

/// A cancelled running job observes the flag at a loop back-edge and joins
/// as Interrupted; a job cancelled before starting joins as Unit.
#[test]
fn cancellation_is_observed_at_back_edges() {
    let mut engine = Engine::new();
    let launch = spawn_native(&engine, "launch");
    let work = Value::Function(Closure::new(looper(), engine.globals()));
    let job = engine.call(&launch, vec![work]).unwrap();
    let Value::Job(handle) = job else { panic!("expected job") };

    // give the worker a chance to start spinning
    thread::sleep(Duration::from_millis(50));
    handle.cancel();
    assert!(handle.is_cancelled());

    match handle.join() {
        Ok(()) => {}
        Err(err) => assert_eq!(err.kind(), ErrorKind::Interrupted),
    }
    // the counter returns to its pre-launch value within bounded time
    for _ in 0..100 {
        if engine.active_tasks() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(engine.active_tasks(), 0);
}

#[test]
fn cancel_before_start_never_runs() {
    let mut engine = Engine::new();
    engine.set_scheduler(1);
    let launch = spawn_native(&engine, "launch");

    // occupy the single worker, then queue and immediately cancel
    let blocker = engine.call(&launch, vec![sleeper(150)]).unwrap();
    let queued = engine.call(&launch, vec![sleeper(0)]).unwrap();
    let Value::Job(queued) = queued else { panic!() };
    queued.cancel();
    assert!(queued.is_cancelled());
    queued.join().unwrap();

    let Value::Job(blocker) = blocker else { panic!() };
    blocker.join().unwrap();
    assert_eq!(engine.active_tasks(), 0);
}

/// Task creation past the quota fails and rolls the counter back.
#[test]
fn task_quota_is_enforced() {
    let mut engine = Engine::new();
    engine.set_security_policy(SecurityPolicy::default().max_async_tasks(2));
    let spawn = spawn_native(&engine, "async");

    let first = engine.call(&spawn, vec![sleeper(200)]).unwrap();
    let second = engine.call(&spawn, vec![sleeper(200)]).unwrap();
    let err = engine.call(&spawn, vec![sleeper(0)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);

    let Value::Future(first) = first else { panic!() };
    let Value::Future(second) = second else { panic!() };
    first.join().unwrap();
    second.join().unwrap();
    assert_eq!(engine.active_tasks(), 0);

    // quota slots freed by completion are reusable
    let again = engine.call(&spawn, vec![sleeper(0)]).unwrap();
    let Value::Future(again) = again else { panic!() };
    again.join().unwrap();
    assert_eq!(engine.active_tasks(), 0);
}

#[test]
fn jobs_expose_observers() {
    let mut engine = Engine::new();
    let launch = spawn_native(&engine, "launch");
    let job = engine.call(&launch, vec![sleeper(50)]).unwrap();
    let Value::Job(handle) = job else { panic!() };
    assert!(!handle.is_cancelled());
    handle.join().unwrap();
    assert!(handle.is_completed());
    assert!(!handle.is_active());
}
