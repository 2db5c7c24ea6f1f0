//! Class-model and constructor-orchestration tests: primary/secondary
//! chaining, delegation, data equality, sealed extension, abstract and
//! annotation rules, enum entries, and operator overloads.

use std::sync::Arc;

use nova::{
    ClassBuilder, ClassModifiers, Closure, Constructor, Engine, ErrorKind, Initializer,
    InterfaceDef, InterfaceMethod, Value,
    mir::{FunctionBuilder, MirFunction, Param, ParamDefault},
};

fn closure(engine: &Engine, function: Arc<MirFunction>) -> Value {
    Value::Function(Closure::new(function, engine.globals()))
}

fn plain_ctor(engine: &Engine, params: Vec<Param>) -> Constructor {
    Constructor {
        params,
        body: None,
        captures: engine.globals(),
        delegates: None,
        is_primary: false,
        pad_with_null: false,
    }
}

/// `class A(x, y) { init { sum = x + y } }` with a secondary
/// `constructor(z): this(z, 0)`.
#[test]
fn constructor_delegation_chains_to_primary() {
    let mut engine = Engine::new();

    let init = {
        let mut f = FunctionBuilder::new("A$init");
        let this = f.reg();
        f.load_env(this, "this");
        let x = f.reg();
        f.load_env(x, "x");
        let y = f.reg();
        f.load_env(y, "y");
        let sum = f.reg();
        f.add(sum, x, y);
        f.set_field(this, "sum", sum);
        f.ret_unit();
        f.build()
    };
    let delegation = {
        let mut f = FunctionBuilder::new("A$this");
        let z = f.reg();
        f.load_env(z, "z");
        let zero = f.reg();
        f.const_int(zero, 0);
        let out = f.reg();
        f.new_list(out, [z, zero]);
        f.ret(out);
        f.build()
    };

    let primary = Constructor {
        is_primary: true,
        ..plain_ctor(&engine, vec![Param::required("x"), Param::required("y")])
    };
    let secondary = Constructor {
        delegates: Some(delegation),
        ..plain_ctor(&engine, vec![Param::required("z")])
    };
    let class = ClassBuilder::new("A", "m")
        .field("x")
        .field("y")
        .field("sum")
        .primary_constructor(primary)
        .constructor(secondary)
        .initializer(Initializer::Block(init))
        .build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();

    let value = engine.call(&Value::Class(class), vec![Value::Int(7)]).unwrap();
    let Value::Object(obj) = value else { panic!("expected object") };
    assert_eq!(obj.get_field("x"), Some(Value::Int(7)));
    assert_eq!(obj.get_field("y"), Some(Value::Int(0)));
    assert_eq!(obj.get_field("sum"), Some(Value::Int(7)));
}

#[test]
fn primary_shorthand_installs_params_as_fields() {
    let mut engine = Engine::new();
    let primary = Constructor {
        is_primary: true,
        ..plain_ctor(&engine, vec![Param::required("name")])
    };
    let class = ClassBuilder::new("Tag", "m").field("name").primary_constructor(primary).build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();

    let value = engine
        .call(&Value::Class(class), vec![Value::str("core")])
        .unwrap();
    let Value::Object(obj) = value else { panic!() };
    assert_eq!(obj.get_field("name"), Some(Value::str("core")));
}

#[test]
fn constructor_defaults_and_named_arguments() {
    let mut engine = Engine::new();
    let primary = Constructor {
        is_primary: true,
        ..plain_ctor(
            &engine,
            vec![
                Param::required("host"),
                Param::with_default("port", ParamDefault::Const(Value::Int(80))),
            ],
        )
    };
    let class = ClassBuilder::new("Server", "m")
        .field("host")
        .field("port")
        .primary_constructor(primary)
        .build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();

    let value = engine
        .call(&Value::Class(class.clone()), vec![Value::str("localhost")])
        .unwrap();
    let Value::Object(obj) = value else { panic!() };
    assert_eq!(obj.get_field("port"), Some(Value::Int(80)));

    let value = engine
        .call_with(
            &Value::Class(class.clone()),
            nova::CallArgs::positional(vec![Value::str("h")]).named("port", Value::Int(8080)),
        )
        .unwrap();
    let Value::Object(obj) = value else { panic!() };
    assert_eq!(obj.get_field("port"), Some(Value::Int(8080)));

    let err = engine
        .call(&Value::Class(class), vec![Value::str("h"), Value::Int(1), Value::Int(2)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoMatchingConstructor);
}

/// Superclass constructor chaining through the declared argument list.
#[test]
fn super_constructor_runs_against_same_instance() {
    let mut engine = Engine::new();
    let base_primary = Constructor {
        is_primary: true,
        ..plain_ctor(&engine, vec![Param::required("base")])
    };
    let base = ClassBuilder::new("Base", "m").field("base").primary_constructor(base_primary).build();

    let super_args = {
        let mut f = FunctionBuilder::new("Derived$super");
        let v = f.reg();
        f.load_env(v, "x");
        let out = f.reg();
        f.new_list(out, [v]);
        f.ret(out);
        f.build()
    };
    let derived_primary = Constructor {
        is_primary: true,
        ..plain_ctor(&engine, vec![Param::required("x")])
    };
    let derived = ClassBuilder::new("Derived", "m")
        .superclass(base.clone())
        .field("x")
        .primary_constructor(derived_primary)
        .super_args(super_args)
        .build();
    engine.register_classes(&[base, derived.clone()]).unwrap();

    let value = engine.call(&Value::Class(derived), vec![Value::Int(5)]).unwrap();
    let Value::Object(obj) = value else { panic!() };
    assert_eq!(obj.get_field("x"), Some(Value::Int(5)));
    // the super constructor's shorthand wrote into the same instance
    assert_eq!(obj.get_field("base"), Some(Value::Int(5)));
}

/// Data-class equality is element-wise over the declared order.
#[test]
fn data_class_equality_and_display() {
    let mut engine = Engine::new();
    let primary = Constructor {
        is_primary: true,
        ..plain_ctor(&engine, vec![Param::required("x"), Param::required("y")])
    };
    let class = ClassBuilder::new("Point", "m")
        .field("x")
        .field("y")
        .data_fields(["x", "y"])
        .primary_constructor(primary)
        .build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();

    let a = engine
        .call(&Value::Class(class.clone()), vec![Value::Int(1), Value::Int(2)])
        .unwrap();
    let b = engine
        .call(&Value::Class(class.clone()), vec![Value::Int(1), Value::Int(2)])
        .unwrap();
    let c = engine
        .call(&Value::Class(class), vec![Value::Int(1), Value::Int(3)])
        .unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.display(), "Point(x=1, y=2)");
}

/// Extending a sealed class from another module fails.
#[test]
fn sealed_extension_across_modules() {
    let mut engine = Engine::new();
    let sealed = ClassBuilder::new("S", "m1")
        .modifiers(ClassModifiers { is_sealed: true, ..Default::default() })
        .build();
    engine.register_classes(std::slice::from_ref(&sealed)).unwrap();

    let same_module = ClassBuilder::new("T1", "m1").superclass(sealed.clone()).build();
    engine.register_classes(std::slice::from_ref(&same_module)).unwrap();

    let other_module = ClassBuilder::new("T2", "m2").superclass(sealed).build();
    let err = engine.register_classes(std::slice::from_ref(&other_module)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SealedExtension);
}

#[test]
fn abstract_and_annotation_classes_refuse_instantiation() {
    let mut engine = Engine::new();
    let abstract_class = ClassBuilder::new("Shape", "m")
        .modifiers(ClassModifiers { is_abstract: true, ..Default::default() })
        .build();
    let annotation = ClassBuilder::new("Marker", "m")
        .modifiers(ClassModifiers { is_annotation: true, ..Default::default() })
        .build();
    engine
        .register_classes(&[abstract_class.clone(), annotation.clone()])
        .unwrap();

    let err = engine.call(&Value::Class(abstract_class), vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstantiateForbidden);
    let err = engine.call(&Value::Class(annotation), vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstantiateForbidden);
}

#[test]
fn unimplemented_abstract_method_is_rejected() {
    let mut engine = Engine::new();
    let base = ClassBuilder::new("Base", "m")
        .modifiers(ClassModifiers { is_abstract: true, ..Default::default() })
        .abstract_method("area")
        .build();

    let incomplete = ClassBuilder::new("Incomplete", "m").superclass(base.clone()).build();
    engine.register_classes(&[base.clone(), incomplete.clone()]).unwrap();
    let err = engine.call(&Value::Class(incomplete), vec![]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnimplementedAbstract);

    let area = {
        let mut f = FunctionBuilder::new("area");
        let r = f.reg();
        f.const_int(r, 4);
        f.ret(r);
        f.build()
    };
    let complete = ClassBuilder::new("Complete", "m")
        .superclass(base)
        .method("area", closure(&engine, area))
        .build();
    engine.register_classes(std::slice::from_ref(&complete)).unwrap();
    assert!(engine.call(&Value::Class(complete), vec![]).is_ok());
}

/// Operator overload fallback chain on object operands.
#[test]
fn operator_overload_and_inc_fallback() {
    let mut engine = Engine::new();

    let plus = {
        let mut f = FunctionBuilder::new("plus");
        let other = f.add_param("other");
        let this = f.reg();
        f.load_env(this, "this");
        let x = f.reg();
        f.get_field(x, this, "x");
        let out = f.reg();
        f.add(out, x, other);
        f.ret(out);
        f.build()
    };
    let with_plus_ctor = Constructor {
        is_primary: true,
        ..plain_ctor(&engine, vec![Param::required("x")])
    };
    let with_plus = ClassBuilder::new("Acc", "m")
        .field("x")
        .primary_constructor(with_plus_ctor)
        .method("plus", closure(&engine, plus))
        .build();

    let inc = {
        let mut f = FunctionBuilder::new("inc");
        let r = f.reg();
        f.const_int(r, 99);
        f.ret(r);
        f.build()
    };
    let with_inc = ClassBuilder::new("Counter", "m")
        .method("inc", closure(&engine, inc))
        .build();
    engine.register_classes(&[with_plus.clone(), with_inc.clone()]).unwrap();

    let acc = engine.call(&Value::Class(with_plus), vec![Value::Int(10)]).unwrap();
    engine.register_global("acc", acc).unwrap();
    let counter = engine.call(&Value::Class(with_inc), vec![]).unwrap();
    engine.register_global("counter", counter).unwrap();

    // acc + 5 routes through plus(other)
    let mut f = FunctionBuilder::new("main");
    let obj = f.reg();
    f.load_env(obj, "acc");
    let five = f.reg();
    f.const_int(five, 5);
    let out = f.reg();
    f.add(out, obj, five);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::Int(15));

    // counter + 1 falls back to inc()
    let mut f = FunctionBuilder::new("main");
    let obj = f.reg();
    f.load_env(obj, "counter");
    let one = f.reg();
    f.const_int(one, 1);
    let out = f.reg();
    f.add(out, obj, one);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::Int(99));
}

#[test]
fn interface_default_methods_dispatch() {
    let mut engine = Engine::new();
    let greet = {
        let mut f = FunctionBuilder::new("greet");
        let r = f.reg();
        f.const_string(r, "hello");
        f.ret(r);
        f.build()
    };
    let iface = InterfaceDef::new(
        "Greeter",
        vec![],
        vec![InterfaceMethod {
            name: Arc::from("greet"),
            default_impl: Some(closure(&engine, greet)),
            is_static: false,
        }],
    );
    engine.register_interface(iface.clone());
    let class = ClassBuilder::new("C", "m").interface(iface).build();
    engine.register_classes(std::slice::from_ref(&class)).unwrap();
    let obj = engine.call(&Value::Class(class), vec![]).unwrap();
    engine.register_global("c", obj).unwrap();

    let mut f = FunctionBuilder::new("main");
    let c = f.reg();
    f.load_env(c, "c");
    let out = f.reg();
    f.call_virtual(out, c, "greet", []);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    assert_eq!(engine.eval_mir(&module).unwrap(), Value::str("hello"));
}

#[test]
fn enum_entries_are_identity_singletons() {
    let mut engine = Engine::new();
    let color = ClassBuilder::new("Color", "m")
        .modifiers(ClassModifiers { is_enum: true, ..Default::default() })
        .build();
    engine.register_classes(std::slice::from_ref(&color)).unwrap();
    let red = nova::add_enum_entry(&color, "RED", []);
    let _green = nova::add_enum_entry(&color, "GREEN", []);

    // Color.RED resolves through the class statics and compares by identity
    let mut f = FunctionBuilder::new("main");
    let class = f.reg();
    f.load_env(class, "Color");
    let a = f.reg();
    f.get_field(a, class, "RED");
    let b = f.reg();
    f.get_field(b, class, "RED");
    let same = f.reg();
    f.cmp(nova::mir::Op::CmpEq, same, a, b);
    let name = f.reg();
    f.get_field(name, a, "name");
    let ordinal = f.reg();
    f.get_field(ordinal, a, "ordinal");
    let out = f.reg();
    f.new_list(out, [same, name, ordinal]);
    f.ret(out);
    let module = nova::mir::MirModule {
        name: "t".into(),
        file: "t.nova".into(),
        entry: f.build(),
        source: None,
    };
    let Value::List(items) = engine.eval_mir(&module).unwrap() else { panic!() };
    assert_eq!(
        *items.read(),
        vec![Value::Bool(true), Value::str("RED"), Value::Int(0)]
    );
    assert_eq!(red.ordinal(), 0);
}

#[test]
fn object_singleton_gets_instance_static() {
    let mut engine = Engine::new();
    let single = ClassBuilder::new("Config", "m")
        .modifiers(ClassModifiers { is_object: true, ..Default::default() })
        .build();
    engine.register_classes(std::slice::from_ref(&single)).unwrap();
    let instance = single.static_field("INSTANCE").expect("registrar stores INSTANCE");
    assert!(matches!(instance, Value::Object(_)));
}
