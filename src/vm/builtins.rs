use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::value::Value;

use super::{VmError, VmResult};

/// Console handles a builtin may touch.
pub(crate) struct Io<'a> {
    pub input: &'a mut dyn BufRead,
    pub output: &'a mut dyn Write,
}

type BuiltinFn = fn(&mut Io<'_>, Vec<Value>) -> VmResult<Value>;

pub(crate) struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    func: BuiltinFn,
}

const fn fixed(name: &'static str, arity: usize, func: BuiltinFn) -> Builtin {
    Builtin { name, min_args: arity, max_args: arity, func }
}

static BUILTINS: &[Builtin] = &[
    fixed("len", 1, len),
    fixed("push", 2, push),
    fixed("pop", 1, pop),
    fixed("sqrt", 1, |_, a| math1("sqrt", a, f64::sqrt)),
    fixed("abs", 1, |_, a| math1("abs", a, f64::abs)),
    fixed("floor", 1, |_, a| math1("floor", a, f64::floor)),
    fixed("ceil", 1, |_, a| math1("ceil", a, f64::ceil)),
    fixed("round", 1, |_, a| math1("round", a, f64::round)),
    fixed("sin", 1, |_, a| math1("sin", a, f64::sin)),
    fixed("cos", 1, |_, a| math1("cos", a, f64::cos)),
    fixed("tan", 1, |_, a| math1("tan", a, f64::tan)),
    fixed("pow", 2, |_, a| math2("pow", a, f64::powf)),
    fixed("min", 2, |_, a| math2("min", a, f64::min)),
    fixed("max", 2, |_, a| math2("max", a, f64::max)),
    fixed("random", 0, |_, _| Ok(Value::Number(fastrand::f64()))),
    fixed("str", 1, |_, a| Ok(Value::Str(a[0].to_string()))),
    fixed("num", 1, num),
    fixed("type", 1, |_, a| Ok(Value::from(a[0].type_name()))),
    fixed("upper", 1, |_, a| Ok(Value::Str(string_arg("upper", &a[0])?.to_uppercase()))),
    fixed("lower", 1, |_, a| Ok(Value::Str(string_arg("lower", &a[0])?.to_lowercase()))),
    fixed("split", 2, split),
    fixed("join", 2, join),
    fixed("keys", 1, keys),
    fixed("values", 1, values),
    Builtin { name: "input", min_args: 0, max_args: 1, func: input },
    fixed("read", 1, read),
    fixed("write", 2, |_, a| write_file("write", a, false)),
    fixed("append", 2, |_, a| write_file("append", a, true)),
    fixed("exists", 1, |_, a| Ok(Value::Bool(Path::new(string_arg("exists", &a[0])?).exists()))),
    fixed("delete", 1, |_, a| Ok(Value::Bool(fs::remove_file(string_arg("delete", &a[0])?).is_ok()))),
];

pub(crate) fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Check arity, then run the builtin.
pub(crate) fn call(builtin: &Builtin, io: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    if args.len() < builtin.min_args || args.len() > builtin.max_args {
        let expected = if builtin.min_args == builtin.max_args {
            builtin.min_args.to_string()
        } else {
            format!("{}-{}", builtin.min_args, builtin.max_args)
        };
        return Err(VmError::ArityMismatch { name: builtin.name.to_string(), expected, found: args.len() });
    }
    (builtin.func)(io, args)
}

fn mismatch(name: &str, expected: &'static str, found: &Value) -> VmError {
    VmError::TypeMismatch { op: name.to_string(), expected, found: found.type_name() }
}

fn string_arg<'v>(name: &str, v: &'v Value) -> VmResult<&'v str> {
    v.as_str().map_err(|e| VmError::type_mismatch(name, e))
}

fn number_arg(name: &str, v: &Value) -> VmResult<f64> {
    v.as_number().map_err(|e| VmError::type_mismatch(name, e))
}

fn math1(name: &str, args: Vec<Value>, f: fn(f64) -> f64) -> VmResult<Value> {
    Ok(Value::Number(f(number_arg(name, &args[0])?)))
}

fn math2(name: &str, args: Vec<Value>, f: fn(f64, f64) -> f64) -> VmResult<Value> {
    Ok(Value::Number(f(number_arg(name, &args[0])?, number_arg(name, &args[1])?)))
}

fn len(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let n = match &args[0] {
        Value::Array(items) => items.len(),
        Value::Str(s) => s.chars().count(),
        Value::Map(entries) => entries.len(),
        other => return Err(mismatch("len", "array, string or map", other)),
    };
    Ok(Value::Number(n as f64))
}

fn push(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let mut args = args.into_iter();
    let (list, item) = (args.next().unwrap_or_default(), args.next().unwrap_or_default());
    let mut items = list.into_array().map_err(|e| VmError::type_mismatch("push", e))?;
    items.push(item);
    Ok(Value::Array(items))
}

fn pop(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let items = args[0].as_array().map_err(|e| VmError::type_mismatch("pop", e))?;
    Ok(items.last().cloned().unwrap_or(Value::Null))
}

fn num(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let s = string_arg("num", &args[0])?;
    Ok(Value::Number(s.trim().parse::<f64>().unwrap_or(0.0)))
}

fn split(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let s = string_arg("split", &args[0])?;
    let delim = string_arg("split", &args[1])?;
    if delim.is_empty() {
        return Err(VmError::InvalidArgument { name: "split".into(), reason: "delimiter is empty".into() });
    }
    let mut pieces: Vec<Value> = s.split(delim).map(Value::from).collect();
    if pieces.last() == Some(&Value::Str(String::new())) {
        pieces.pop();
    }
    Ok(Value::Array(pieces))
}

fn join(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let items = args[0].as_array().map_err(|e| VmError::type_mismatch("join", e))?;
    let sep = string_arg("join", &args[1])?;
    let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    Ok(Value::Str(parts.join(sep)))
}

fn map_arg<'v>(name: &str, v: &'v Value) -> VmResult<&'v BTreeMap<String, Value>> {
    v.as_map().map_err(|e| VmError::type_mismatch(name, e))
}

fn keys(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let entries = map_arg("keys", &args[0])?;
    Ok(Value::Array(entries.keys().map(|k| Value::from(k.as_str())).collect()))
}

fn values(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let entries = map_arg("values", &args[0])?;
    Ok(Value::Array(entries.values().cloned().collect()))
}

fn input(io: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    if let Some(prompt) = args.first() {
        write!(io.output, "{}", prompt)?;
        io.output.flush()?;
    }
    let mut line = String::new();
    io.input.read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(Value::from(trimmed))
}

fn read(_: &mut Io<'_>, args: Vec<Value>) -> VmResult<Value> {
    let path = string_arg("read", &args[0])?;
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Value::Str(contents)),
        Err(e) => {
            log::debug!("read('{}') failed: {}", path, e);
            Ok(Value::Null)
        }
    }
}

fn write_file(name: &str, args: Vec<Value>, append: bool) -> VmResult<Value> {
    let path = string_arg(name, &args[0])?;
    let data = string_arg(name, &args[1])?;
    let result = if append {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(data.as_bytes()))
    } else {
        fs::write(path, data)
    };
    if let Err(e) = &result {
        log::debug!("{}('{}') failed: {}", name, path, e);
    }
    Ok(Value::Bool(result.is_ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str, args: Vec<Value>) -> VmResult<Value> {
        run_with_input(name, args, "")
    }

    fn run_with_input(name: &str, args: Vec<Value>, input: &str) -> VmResult<Value> {
        let mut reader = input.as_bytes();
        let mut output = Vec::new();
        let mut io = Io { input: &mut reader, output: &mut output };
        call(lookup(name).unwrap(), &mut io, args)
    }

    fn nums(items: &[f64]) -> Value {
        Value::Array(items.iter().map(|n| Value::Number(*n)).collect())
    }

    #[test]
    fn collection_builtins() {
        assert_eq!(run("len", vec![nums(&[1.0, 2.0, 3.0])]).unwrap(), Value::Number(3.0));
        assert_eq!(run("len", vec![Value::from("héllo")]).unwrap(), Value::Number(5.0));
        assert_eq!(run("push", vec![nums(&[1.0, 2.0]), Value::Number(3.0)]).unwrap(), nums(&[1.0, 2.0, 3.0]));
        assert_eq!(run("pop", vec![nums(&[1.0, 2.0])]).unwrap(), Value::Number(2.0));
        assert_eq!(run("pop", vec![nums(&[])]).unwrap(), Value::Null);
    }

    #[test]
    fn string_builtins() {
        let parts = run("split", vec![Value::from("a,b,c"), Value::from(",")]).unwrap();
        assert_eq!(parts, Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")]));
        let trailing = run("split", vec![Value::from("a,b,"), Value::from(",")]).unwrap();
        assert_eq!(trailing, Value::Array(vec![Value::from("a"), Value::from("b")]));
        let joined = run("join", vec![Value::Array(vec![Value::from("a"), Value::from("b")]), Value::from("-")]);
        assert_eq!(joined.unwrap(), Value::from("a-b"));
        assert_eq!(run("join", vec![nums(&[1.0, 2.5]), Value::from("+")]).unwrap(), Value::from("1+2.5"));
        assert_eq!(run("upper", vec![Value::from("abc")]).unwrap(), Value::from("ABC"));
        assert_eq!(run("str", vec![Value::Number(4.0)]).unwrap(), Value::from("4"));
        assert_eq!(run("num", vec![Value::from(" 2.5 ")]).unwrap(), Value::Number(2.5));
        assert_eq!(run("num", vec![Value::from("abc")]).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn split_empty_delimiter_is_invalid() {
        let err = run("split", vec![Value::from("abc"), Value::from("")]).unwrap_err();
        assert!(matches!(err, VmError::InvalidArgument { .. }));
    }

    #[test]
    fn math_builtins() {
        assert_eq!(run("sqrt", vec![Value::Number(16.0)]).unwrap(), Value::Number(4.0));
        assert_eq!(run("round", vec![Value::Number(2.5)]).unwrap(), Value::Number(3.0));
        assert_eq!(run("round", vec![Value::Number(-2.5)]).unwrap(), Value::Number(-3.0));
        assert_eq!(run("pow", vec![Value::Number(2.0), Value::Number(10.0)]).unwrap(), Value::Number(1024.0));
        assert_eq!(run("max", vec![Value::Number(2.0), Value::Number(7.0)]).unwrap(), Value::Number(7.0));
        match run("random", vec![]).unwrap() {
            Value::Number(n) => assert!((0.0..1.0).contains(&n)),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn map_builtins_are_sorted() {
        let mut m = BTreeMap::new();
        m.insert("b".to_string(), Value::Number(2.0));
        m.insert("a".to_string(), Value::Number(1.0));
        let map = Value::Map(m);
        assert_eq!(
            run("keys", vec![map.clone()]).unwrap(),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(run("values", vec![map.clone()]).unwrap(), nums(&[1.0, 2.0]));
        assert_eq!(run("type", vec![map]).unwrap(), Value::from("map"));
        assert_eq!(run("type", vec![Value::Null]).unwrap(), Value::from("null"));
    }

    #[test]
    fn arity_mismatch_is_typed() {
        let err = run("len", vec![]).unwrap_err();
        assert!(matches!(err, VmError::ArityMismatch { ref name, found: 0, .. } if name == "len"));
        let err = run("input", vec![Value::from("a"), Value::from("b")]).unwrap_err();
        assert!(matches!(err, VmError::ArityMismatch { ref expected, .. } if expected == "0-1"));
    }

    #[test]
    fn type_mismatch_is_typed() {
        let err = run("sqrt", vec![Value::from("x")]).unwrap_err();
        assert!(matches!(err, VmError::TypeMismatch { expected: "number", found: "string", .. }));
        let err = run("len", vec![Value::Number(1.0)]).unwrap_err();
        assert!(matches!(err, VmError::TypeMismatch { found: "number", .. }));
    }

    #[test]
    fn input_reads_one_line() {
        let line = run_with_input("input", vec![], "hello\r\nworld\n").unwrap();
        assert_eq!(line, Value::from("hello"));
    }

    #[test]
    fn file_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let p = Value::from(path.to_str().unwrap());
        assert_eq!(run("exists", vec![p.clone()]).unwrap(), Value::Bool(false));
        assert_eq!(run("read", vec![p.clone()]).unwrap(), Value::Null);
        assert_eq!(run("write", vec![p.clone(), Value::from("a")]).unwrap(), Value::Bool(true));
        assert_eq!(run("append", vec![p.clone(), Value::from("b")]).unwrap(), Value::Bool(true));
        assert_eq!(run("read", vec![p.clone()]).unwrap(), Value::from("ab"));
        assert_eq!(run("delete", vec![p.clone()]).unwrap(), Value::Bool(true));
        assert_eq!(run("exists", vec![p]).unwrap(), Value::Bool(false));
    }
}
