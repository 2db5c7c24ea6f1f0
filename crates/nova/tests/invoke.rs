//! Invocation-runtime tests: parameter binding, bound methods, extension
//! dispatch, reified type parameters, SAM adaptation, and host objects.

use std::sync::Arc;

use nova::{
    CallArgs, ClassBuilder, Closure, Engine, ErrorKind, Exception, ForeignObject, HostObject,
    InterfaceDef, InterfaceMethod, TYPE_ARG_PREFIX, Value,
    mir::{FunctionBuilder, MirFunction, Param, ParamDefault},
};

fn closure(engine: &Engine, function: Arc<MirFunction>) -> Value {
    Value::Function(Closure::new(function, engine.globals()))
}

/// `fun join(a, b, rest...)` returning `[a, b, rest]`.
fn vararg_fn() -> Arc<MirFunction> {
    let mut f = FunctionBuilder::new("join");
    let a = f.push_param(Param::required("a"));
    let b = f.push_param(Param::required("b"));
    let rest = f.push_param(Param::vararg("rest"));
    let out = f.reg();
    f.new_list(out, [a, b, rest]);
    f.ret(out);
    f.build()
}

#[test]
fn vararg_collects_remaining_positionals() {
    let mut engine = Engine::new();
    let f = closure(&engine, vararg_fn());
    let result = engine
        .call(&f, vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)])
        .unwrap();
    let Value::List(items) = result else { panic!() };
    let items = items.read();
    assert_eq!(items[0], Value::Int(1));
    assert_eq!(items[1], Value::Int(2));
    let Value::List(rest) = &items[2] else { panic!() };
    assert_eq!(*rest.read(), vec![Value::Int(3), Value::Int(4)]);
}

#[test]
fn vararg_with_nothing_left_binds_empty_list() {
    let mut engine = Engine::new();
    let f = closure(&engine, vararg_fn());
    let result = engine.call(&f, vec![Value::Int(1), Value::Int(2)]).unwrap();
    let Value::List(items) = result else { panic!() };
    let Value::List(rest) = &items.read()[2] else { panic!() };
    assert!(rest.read().is_empty());
}

#[test]
fn binding_error_taxonomy() {
    let mut engine = Engine::new();
    let two = {
        let mut f = FunctionBuilder::new("two");
        let a = f.push_param(Param::required("a"));
        f.push_param(Param::required("b"));
        f.ret(a);
        f.build()
    };
    let f = closure(&engine, two);

    let err = engine.call(&f, vec![Value::Int(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingArgument);

    let err = engine
        .call(&f, vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyArguments);

    let err = engine
        .call_with(
            &f,
            CallArgs::positional(vec![Value::Int(1), Value::Int(2)]).named("c", Value::Int(9)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownNamedArgument);
}

#[test]
fn named_arguments_win_over_position() {
    let mut engine = Engine::new();
    let pair = {
        let mut f = FunctionBuilder::new("pair");
        let a = f.push_param(Param::required("a"));
        let b = f.push_param(Param::required("b"));
        let out = f.reg();
        f.new_list(out, [a, b]);
        f.ret(out);
        f.build()
    };
    let f = closure(&engine, pair);
    // `a` is named, the positional argument flows to `b`
    let result = engine
        .call_with(
            &f,
            CallArgs::positional(vec![Value::Int(2)]).named("a", Value::Int(1)),
        )
        .unwrap();
    let Value::List(items) = result else { panic!() };
    assert_eq!(*items.read(), vec![Value::Int(1), Value::Int(2)]);
}

/// Default expressions run in the definition environment extended by the
/// parameters already bound.
#[test]
fn default_thunk_sees_earlier_parameters() {
    let mut engine = Engine::new();
    let default = {
        let mut f = FunctionBuilder::new("width$default");
        let w = f.reg();
        f.load_env(w, "height");
        let two = f.reg();
        f.const_int(two, 2);
        let out = f.reg();
        f.mul(out, w, two);
        f.ret(out);
        f.build()
    };
    let sized = {
        let mut f = FunctionBuilder::new("sized");
        f.push_param(Param::required("height"));
        let width = f.push_param(Param::with_default("width", ParamDefault::Thunk(default)));
        f.ret(width);
        f.build()
    };
    let f = closure(&engine, sized);
    assert_eq!(engine.call(&f, vec![Value::Int(10)]).unwrap(), Value::Int(20));
    assert_eq!(
        engine.call(&f, vec![Value::Int(10), Value::Int(7)]).unwrap(),
        Value::Int(7)
    );
}

#[test]
fn bound_method_carries_receiver() {
    let mut engine = Engine::new();
    let get_x = {
        let mut f = FunctionBuilder::new("getX");
        let this = f.reg();
        f.load_env(this, "this");
        let out = f.reg();
        f.get_field(out, this, "x");
        f.ret(out);
        f.build()
    };
    let class = ClassBuilder::new("Holder", "m")
        .field("x")
        .method("getX", closure(&engine, get_x))
        .build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();
    let obj = engine.call(&Value::Class(class), vec![]).unwrap();
    let Value::Object(instance) = &obj else { panic!() };
    instance.set_field("x", Value::Int(31));
    engine.register_global("h", obj).unwrap();

    // member access produces a BoundMethod callable later
    let mut f = FunctionBuilder::new("main");
    let h = f.reg();
    f.load_env(h, "h");
    let method = f.reg();
    f.get_field(method, h, "getX");
    let out = f.reg();
    f.call(out, method, []);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::Int(31));
}

/// Extension methods resolve by canonical type name with the receiver
/// prepended, and the `Any` bucket is checked last.
#[test]
fn extension_dispatch_order() {
    let mut engine = Engine::new();
    engine.register_extension("Int", "describe", |_, args| {
        Ok(Value::str(format!("int:{}", args.pos[0].display())))
    });
    engine.register_extension("Any", "describe", |_, args| {
        Ok(Value::str(format!("any:{}", args.pos[0].display())))
    });

    let run = |engine: &mut Engine, load: &str| {
        let mut f = FunctionBuilder::new("main");
        let recv = f.reg();
        f.load_env(recv, load);
        let out = f.reg();
        f.call_virtual(out, recv, "describe", []);
        f.ret(out);
        let module = nova::mir::MirModule {
            name: "t".into(),
            file: "t.nova".into(),
            entry: f.build(),
            source: None,
        };
        engine.eval_mir(&module).unwrap()
    };

    engine.register_global("n", Value::Int(7)).unwrap();
    engine.register_global("s", Value::str("x")).unwrap();
    assert_eq!(run(&mut engine, "n"), Value::str("int:7"));
    // String has no specific bucket; the Any bucket answers
    assert_eq!(run(&mut engine, "s"), Value::str("any:x"));
}

/// An extension registered under the canonical `Object` name applies to
/// instances of any class; the concrete class name is the later tier.
#[test]
fn generic_object_extensions_apply_to_any_class() {
    let mut engine = Engine::new();
    let class = ClassBuilder::new("Gadget", "m").build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();
    engine.register_extension("Object", "tag", |_, args| {
        Ok(Value::str(args.pos[0].type_name()))
    });
    let obj = engine.call(&Value::Class(class), vec![]).unwrap();
    engine.register_global("g", obj).unwrap();

    let mut f = FunctionBuilder::new("main");
    let g = f.reg();
    f.load_env(g, "g");
    let out = f.reg();
    f.call_virtual(out, g, "tag", []);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::str("Object"));
}

/// Closures read and write captured bindings through the dedicated capture
/// opcodes; state persists across calls and is visible to the capture scope.
#[test]
fn captures_are_shared_and_mutable() {
    let mut engine = Engine::new();
    let state = engine.globals().child();
    state.define("count".into(), Value::Int(0));

    let bump = {
        let mut f = FunctionBuilder::new("bump");
        let cur = f.reg();
        f.load_capture(cur, "count");
        let one = f.reg();
        f.const_int(one, 1);
        let next = f.reg();
        f.add(next, cur, one);
        f.store_capture("count", next);
        f.ret(next);
        f.build()
    };
    let callable = Value::Function(Closure::new(bump, state.clone()));
    assert_eq!(engine.call(&callable, vec![]).unwrap(), Value::Int(1));
    assert_eq!(engine.call(&callable, vec![]).unwrap(), Value::Int(2));
    assert_eq!(state.lookup("count"), Some(Value::Int(2)));
}

#[test]
fn class_name_extensions_apply_to_objects() {
    let mut engine = Engine::new();
    let class = ClassBuilder::new("Widget", "m").build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();
    engine.register_extension("Widget", "kind", |_, _| Ok(Value::str("widget")));
    let obj = engine.call(&Value::Class(class), vec![]).unwrap();
    engine.register_global("w", obj).unwrap();

    let mut f = FunctionBuilder::new("main");
    let w = f.reg();
    f.load_env(w, "w");
    let out = f.reg();
    f.call_virtual(out, w, "kind", []);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::str("widget"));
}

/// Reified type arguments bind under the reserved prefix.
#[test]
fn reified_type_parameters_are_readable() {
    let mut engine = Engine::new();
    let type_of = {
        let mut f = FunctionBuilder::new("typeOf");
        f.type_param("T");
        let out = f.reg();
        f.load_env(out, &format!("{TYPE_ARG_PREFIX}T"));
        f.ret(out);
        f.build()
    };
    let f = closure(&engine, type_of);
    let result = engine
        .call_with(&f, CallArgs::empty().type_arg("String"))
        .unwrap();
    assert_eq!(result, Value::str("String"));
}

/// One SAM invocation is one callable call with positional order preserved.
#[test]
fn sam_adaptation_round_trips() {
    let mut engine = Engine::new();
    let iface = InterfaceDef::new(
        "BiFunction",
        vec![],
        vec![InterfaceMethod {
            name: Arc::from("apply"),
            default_impl: None,
            is_static: false,
        }],
    );
    let sub = {
        let mut f = FunctionBuilder::new("sub");
        let a = f.add_param("a");
        let b = f.add_param("b");
        let out = f.reg();
        f.sub(out, a, b);
        f.ret(out);
        f.build()
    };
    let callable = closure(&engine, sub);
    let proxy = engine.adapt_callable(&iface, callable).unwrap();

    let Value::Foreign(foreign) = &proxy else { panic!("expected proxy") };
    // argument order is preserved: 10 - 3, not 3 - 10
    let result = foreign
        .object()
        .invoke("apply", &[Value::Int(10), Value::Int(3)])
        .unwrap();
    assert_eq!(result, Value::Int(7));
}

#[test]
fn non_sam_interface_cannot_adapt() {
    let engine = Engine::new();
    let iface = InterfaceDef::new(
        "TwoMethods",
        vec![],
        vec![
            InterfaceMethod { name: Arc::from("a"), default_impl: None, is_static: false },
            InterfaceMethod { name: Arc::from("b"), default_impl: None, is_static: false },
        ],
    );
    let err = engine.adapt_callable(&iface, Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeOp);
}

#[derive(Debug)]
struct Point2 {
    x: i32,
}

impl HostObject for Point2 {
    fn class_tag(&self) -> &str {
        "host.Point2"
    }

    fn super_tags(&self) -> Vec<Arc<str>> {
        vec![Arc::from("host.Shape")]
    }

    fn get_property(&self, name: &str) -> Result<Value, Exception> {
        match name {
            "x" => Ok(Value::Int(self.x)),
            _ => Err(Exception::new(ErrorKind::ForeignAccess, "no such property")),
        }
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, Exception> {
        match method {
            "shifted" => {
                let delta = args.first().and_then(|v| match v {
                    Value::Int(d) => Some(*d),
                    _ => None,
                });
                Ok(Value::Int(self.x + delta.unwrap_or(0)))
            }
            _ => Err(Exception::new(ErrorKind::ForeignAccess, "no such method")),
        }
    }
}

#[test]
fn foreign_objects_route_through_the_bridge() {
    let mut engine = Engine::new();
    let host = ForeignObject::value(Arc::new(Point2 { x: 5 }));
    engine.register_global("p", host).unwrap();

    let mut f = FunctionBuilder::new("main");
    let p = f.reg();
    f.load_env(p, "p");
    let x = f.reg();
    f.get_field(x, p, "x");
    let delta = f.reg();
    f.const_int(delta, 2);
    let shifted = f.reg();
    f.call_virtual(shifted, p, "shifted", [delta]);
    let out = f.reg();
    f.new_list(out, [x, shifted]);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    let Value::List(items) = engine.eval_mir(&module).unwrap() else { panic!() };
    assert_eq!(*items.read(), vec![Value::Int(5), Value::Int(7)]);
}

/// Host-super extensions answer when neither exact tag nor Any matches.
#[test]
fn host_super_extensions_resolve_last() {
    let mut engine = Engine::new();
    engine.register_host_super_extension(
        "host.Shape",
        "describe",
        nova_test_native(|args| Ok(Value::str(format!("shape:{}", args.pos.len())))),
    );
    let host = ForeignObject::value(Arc::new(Point2 { x: 1 }));
    engine.register_global("p", host).unwrap();

    let mut f = FunctionBuilder::new("main");
    let p = f.reg();
    f.load_env(p, "p");
    let out = f.reg();
    f.call_virtual(out, p, "describe", []);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    // receiver prepended: one positional argument
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::str("shape:1"));
}

fn nova_test_native(
    f: impl Fn(CallArgs) -> Result<Value, Exception> + Send + Sync + 'static,
) -> Value {
    Value::Native(nova::NativeFunction::new("test", -1, Box::new(move |_, args| f(args))))
}
