//! The builtin module registry.
//!
//! Module names use the `nova.` prefix followed by up to three segments;
//! loading resolves by longest-prefix match and runs the matching native
//! registration function against a target environment. The real standard
//! library plugs into this seam; the registrations here are the native
//! surface the core and its tests exercise.

use std::{fmt::Write as _, sync::Arc, thread, time::Duration};

use crate::{
    env::Env,
    error::{ErrorKind, Exception},
    function::NativeFunction,
    interp::Interp,
    invoke::{self, CallArgs},
    value::Value,
};

/// Prefix of every builtin module name.
pub const MODULE_PREFIX: &str = "nova.";

/// Maximum number of segments after the prefix considered for matching.
const MAX_SEGMENTS: usize = 3;

type RegisterFn = fn(&Env);

/// Known modules, keyed by their post-prefix path.
const REGISTRY: &[(&str, RegisterFn)] = &[
    ("io", register_io),
    ("text", register_text),
    ("json", register_json),
    ("time", register_time),
    ("http", register_http),
    ("test", register_test),
    ("system", register_system),
    ("concurrent", register_concurrent),
];

/// Loads a builtin module into `target`, resolving by longest-prefix match.
///
/// Returns false when the name carries the `nova.` prefix but matches no
/// registered module; names without the prefix are not builtin modules and
/// also return false.
pub fn load_module(name: &str, target: &Env) -> bool {
    let Some(rest) = name.strip_prefix(MODULE_PREFIX) else {
        return false;
    };
    let segments: Vec<&str> = rest.split('.').take(MAX_SEGMENTS).collect();
    for take in (1..=segments.len()).rev() {
        let candidate = segments[..take].join(".");
        if let Some((_, register)) = REGISTRY.iter().find(|(key, _)| *key == candidate) {
            register(target);
            return true;
        }
    }
    false
}

/// Builds a native function value.
pub(crate) fn native(
    name: &str,
    arity: i32,
    f: impl Fn(&mut Interp, CallArgs) -> Result<Value, Exception> + Send + Sync + 'static,
) -> Value {
    Value::Native(NativeFunction::new(name, arity, Box::new(f)))
}

fn define(env: &Env, name: &str, value: Value) {
    env.define(Arc::from(name), value);
}

fn register_io(env: &Env) {
    define(env, "print", native("print", -1, |interp, args| {
        interp.write_out(&join_display(&args.pos))?;
        Ok(Value::Unit)
    }));
    define(env, "println", native("println", -1, |interp, args| {
        let mut text = join_display(&args.pos);
        text.push('\n');
        interp.write_out(&text)?;
        Ok(Value::Unit)
    }));
    define(env, "eprintln", native("eprintln", -1, |interp, args| {
        let mut text = join_display(&args.pos);
        text.push('\n');
        interp.write_err(&text)?;
        Ok(Value::Unit)
    }));
    define(env, "readLine", native("readLine", 0, |interp, _args| {
        Ok(match interp.read_line()? {
            Some(line) => Value::str(line),
            None => Value::Null,
        })
    }));
}

fn join_display(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&value.display());
    }
    out
}

fn register_text(env: &Env) {
    define(env, "length", native("length", 1, |_, args| {
        string_arg(&args, 0, "length").map(|s| Value::Int(s.chars().count() as i32))
    }));
    define(env, "upper", native("upper", 1, |_, args| {
        string_arg(&args, 0, "upper").map(|s| Value::str(s.to_uppercase()))
    }));
    define(env, "lower", native("lower", 1, |_, args| {
        string_arg(&args, 0, "lower").map(|s| Value::str(s.to_lowercase()))
    }));
    define(env, "trim", native("trim", 1, |_, args| {
        string_arg(&args, 0, "trim").map(|s| Value::str(s.trim()))
    }));
    define(env, "split", native("split", 2, |_, args| {
        let text = string_arg(&args, 0, "split")?;
        let sep = string_arg(&args, 1, "split")?;
        Ok(Value::list(text.split(&*sep).map(Value::str).collect()))
    }));
}

fn register_json(env: &Env) {
    define(env, "stringify", native("stringify", 1, |_, args| {
        let value = args.pos.first().cloned().unwrap_or(Value::Null);
        let mut out = String::new();
        json_encode(&value, &mut out, 0)?;
        Ok(Value::str(out))
    }));
}

fn json_encode(value: &Value, out: &mut String, depth: u16) -> Result<(), Exception> {
    if depth > 128 {
        return Err(Exception::new(ErrorKind::TypeOp, "value is too deeply nested for JSON"));
    }
    match value {
        Value::Null | Value::Unit => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_) => {
            out.push_str(&value.display());
        }
        Value::Str(s) => json_escape(s, out),
        Value::Char(_) => json_escape(&value.display(), out),
        Value::Enum(entry) => json_escape(entry.name(), out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.read().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                json_encode(item, out, depth + 1)?;
            }
            out.push(']');
        }
        Value::Pair(pair) => {
            out.push('[');
            json_encode(&pair.0, out, depth + 1)?;
            out.push(',');
            json_encode(&pair.1, out, depth + 1)?;
            out.push(']');
        }
        Value::Map(entries) => {
            out.push('{');
            for (i, (key, item)) in entries.read().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                json_escape(&key.display(), out);
                out.push(':');
                json_encode(item, out, depth + 1)?;
            }
            out.push('}');
        }
        Value::Object(instance) if instance.class().modifiers().is_data => {
            out.push('{');
            for (i, name) in instance.class().data_order().iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                json_escape(name, out);
                out.push(':');
                let field = instance.get_field(name).unwrap_or(Value::Null);
                json_encode(&field, out, depth + 1)?;
            }
            out.push('}');
        }
        other => {
            return Err(Exception::new(
                ErrorKind::TypeOp,
                format!("{} is not JSON-serializable", other.type_name()),
            ));
        }
    }
    Ok(())
}

fn json_escape(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn register_time(env: &Env) {
    define(env, "nowMillis", native("nowMillis", 0, |_, _| {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Value::Long(now.as_millis() as i64))
    }));
    define(env, "sleepMillis", native("sleepMillis", 1, |interp, args| {
        let ms = args.pos.first().and_then(Value::as_index).unwrap_or(0).max(0) as u64;
        let mut remaining = ms;
        // sleep in slices so cancellation and the wall clock stay observable
        while remaining > 0 {
            invoke::host_boundary(interp).map_err(crate::error::RunError::into_exception)?;
            let slice = remaining.min(10);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
        Ok(Value::Unit)
    }));
}

fn register_http(env: &Env) {
    define(env, "request", native("request", -1, |_, _| {
        Err(Exception::new(
            ErrorKind::ForeignAccess,
            "network access is not available in the sandboxed core",
        ))
    }));
}

fn register_test(env: &Env) {
    define(env, "assertTrue", native("assertTrue", -1, |_, args| {
        let holds = args.pos.first().is_some_and(Value::is_truthy);
        if holds {
            Ok(Value::Unit)
        } else {
            let message = args.pos.get(1).map_or_else(|| "assertion failed".to_owned(), Value::display);
            Err(Exception::new(ErrorKind::UserThrown, message))
        }
    }));
    define(env, "assertEquals", native("assertEquals", 2, |_, args| {
        let expected = &args.pos[0];
        let actual = &args.pos[1];
        if expected == actual {
            Ok(Value::Unit)
        } else {
            Err(Exception::new(
                ErrorKind::UserThrown,
                format!("expected {} but was {}", expected.repr(), actual.repr()),
            ))
        }
    }));
    define(env, "fail", native("fail", -1, |_, args| {
        let message = args.pos.first().map_or_else(|| "failed".to_owned(), Value::display);
        Err(Exception::new(ErrorKind::UserThrown, message))
    }));
}

fn register_system(env: &Env) {
    define(env, "args", native("args", 0, |interp, _| {
        Ok(Value::list(interp.cli_args().into_iter().map(Value::str).collect()))
    }));
    define(env, "lineSeparator", native("lineSeparator", 0, |_, _| Ok(Value::str("\n"))));
}

fn register_concurrent(env: &Env) {
    define(env, "async", native("async", -1, |interp, mut args| {
        if args.pos.is_empty() {
            return Err(Exception::new(ErrorKind::MissingArgument, "async takes a callable"));
        }
        let callable = args.pos.remove(0);
        crate::concurrent::spawn(interp, crate::concurrent::TaskKind::Future, callable, args.pos)
            .map_err(crate::error::RunError::into_exception)
    }));
    define(env, "launch", native("launch", -1, |interp, mut args| {
        if args.pos.is_empty() {
            return Err(Exception::new(ErrorKind::MissingArgument, "launch takes a callable"));
        }
        let callable = args.pos.remove(0);
        crate::concurrent::spawn(interp, crate::concurrent::TaskKind::Job, callable, args.pos)
            .map_err(crate::error::RunError::into_exception)
    }));
    define(env, "await", native("await", 1, |interp, args| {
        match args.pos.first() {
            Some(Value::Future(task)) => {
                invoke::host_boundary(interp).map_err(crate::error::RunError::into_exception)?;
                task.get()
            }
            Some(other) => Err(Exception::new(
                ErrorKind::TypeOp,
                format!("await expects a Future, got {}", other.type_name()),
            )),
            None => Err(Exception::new(ErrorKind::MissingArgument, "await takes a Future")),
        }
    }));
}

fn string_arg(args: &CallArgs, index: usize, who: &str) -> Result<Arc<str>, Exception> {
    match args.pos.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(Exception::new(
            ErrorKind::TypeOp,
            format!("{who} expects a String, got {}", other.type_name()),
        )),
        None => Err(Exception::new(
            ErrorKind::MissingArgument,
            format!("{who} is missing its argument"),
        )),
    }
}
