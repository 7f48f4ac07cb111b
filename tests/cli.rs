use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn zoby() -> Command {
    Command::new(env!("CARGO_BIN_EXE_zoby"))
}

fn script(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).expect("write script");
    path
}

fn run_source(source: &str, extra: &[&str]) -> Output {
    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "main.zs", source);
    zoby().arg(&path).args(extra).output().expect("failed to run zoby")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- Running source ---

#[test]
fn while_loop_prints_each_value() {
    let out = run_source("x = 1\nwhile (x < 4) { print(x); x = x + 1 }", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "1\n2\n3\n");
}

#[test]
fn function_call_returns_value() {
    let out = run_source("func add(a,b) { return a + b }\nprint(add(2,3))", &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "5\n");
}

#[test]
fn recursion_and_collections() {
    let src = r#"
func fib(n) {
    if (n < 2) { return n }
    return fib(n - 1) + fib(n - 2)
}
xs = []
for (i = 0; i < 8; i = i + 1) { xs = push(xs, fib(i)) }
print(join(split("a,b,c", ","), "-"), len(xs))
m = {name: "zoby", "ver": 4}
print(m["name"], m["missing"], xs[99])
"#;
    let out = run_source(src, &[]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "a-b-c 8\nzoby null 0\n");
}

#[test]
fn no_opt_gives_the_same_output() {
    let src = "x = 2 * 3 + 4\nif (true) { print(x) } else { print(0) }\nprint(7 / 2)";
    let optimized = run_source(src, &[]);
    let plain = run_source(src, &["--no-opt"]);
    assert!(optimized.status.success() && plain.status.success());
    assert_eq!(stdout(&optimized), "10\n3.5\n");
    assert_eq!(stdout(&optimized), stdout(&plain));
}

#[test]
fn input_reads_from_stdin() {
    use std::io::Write;
    use std::process::Stdio;

    let dir = tempfile::tempdir().unwrap();
    let path = script(dir.path(), "ask.zs", "name = input()\nprint(\"hi \" + name)");
    let mut child = zoby()
        .arg(&path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to spawn zoby");
    child.stdin.take().unwrap().write_all(b"ada\n").unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success());
    assert_eq!(stdout(&out), "hi ada\n");
}

// --- Bytecode files ---

#[test]
fn emit_bytecode_then_run_it() {
    let dir = tempfile::tempdir().unwrap();
    let src = script(
        dir.path(),
        "prog.zs",
        "func sq(n) { return n * n }\ntotal = 0\nfor (i = 1; i <= 3; i = i + 1) { total = total + sq(i) }\nprint(total)",
    );
    let zsc = dir.path().join("prog.zsc");

    let out = zoby().arg(&src).arg("--emit-bytecode").arg(&zsc).output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).is_empty(), "emitting must not run the program");
    assert_eq!(&std::fs::read(&zsc).unwrap()[..4], b"ZSC\x04");

    let out = zoby().arg(&zsc).output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "14\n");
}

#[test]
fn corrupt_bytecode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let zsc = dir.path().join("bad.zsc");
    std::fs::write(&zsc, b"NOPE").unwrap();
    let out = zoby().arg(&zsc).arg("--json").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let err: serde_json::Value = serde_json::from_str(stderr(&out).trim()).unwrap();
    assert_eq!(err["code"], "ZBY-B001");
}

// --- Inspection flags ---

#[test]
fn disasm_lists_instructions_without_running() {
    let out = run_source("func f(a) { return a }\nprint(f(1))", &["--disasm"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("== <main> =="), "{text}");
    assert!(text.contains("== f =="), "{text}");
    assert!(text.contains("RET"), "{text}");
    assert!(!text.lines().any(|l| l == "1"), "program ran: {text}");
}

#[test]
fn ast_flag_prints_json() {
    let out = run_source("x = 1 + 2", &["--ast"]);
    assert!(out.status.success());
    let ast: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("AST is JSON");
    assert_eq!(ast["statements"].as_array().unwrap().len(), 1);
}

// --- Errors ---

#[test]
fn runtime_error_exits_with_one() {
    let out = run_source("print(\"before\")\nprint(10 / 0)", &[]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout(&out), "before\n");
    let err = stderr(&out);
    assert!(err.contains("error[ZBY-R004]"), "{err}");
    assert!(err.contains("division by zero"), "{err}");
}

#[test]
fn parse_error_shows_source_line() {
    let out = run_source("x = 1\nif x > 1) { print(x) }", &[]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("ZBY-P001"), "{err}");
    assert!(err.contains("2 | if x > 1) { print(x) }"), "{err}");
}

#[test]
fn json_errors_are_machine_readable() {
    let out = run_source("print(nope(1))", &["--json"]);
    assert_eq!(out.status.code(), Some(1));
    let err: serde_json::Value = serde_json::from_str(stderr(&out).trim()).unwrap();
    assert_eq!(err["severity"], "error");
    assert_eq!(err["code"], "ZBY-C001");
    assert_eq!(err["labels"][0]["line"], 1);
}

#[test]
fn deep_recursion_respects_max_depth() {
    let out = run_source("func f(n) { return f(n + 1) }\nf(0)", &["--max-depth", "50", "--json"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("ZBY-R010"), "{}", stderr(&out));
}

#[test]
fn missing_file_is_reported() {
    let out = zoby().arg("/definitely/not/here.zs").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("cannot read"));
}

#[test]
fn no_args_shows_usage() {
    let out = zoby().output().unwrap();
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Usage"), "{}", stderr(&out));
}

// --- --explain ---

#[test]
fn explain_known_code() {
    let out = zoby().args(["--explain", "ZBY-R004"]).output().unwrap();
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("## ZBY-R004: division by zero"));
}

#[test]
fn explain_is_case_insensitive() {
    let out = zoby().args(["--explain", "zby-p003"]).output().unwrap();
    assert!(out.status.success());
    assert!(stdout(&out).contains("exceptions"));
}

#[test]
fn explain_unknown_code_fails() {
    let out = zoby().args(["--explain", "ZBY-X000"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("unknown error code"));
}

// --- Logging ---

#[test]
fn verbose_logs_go_to_stderr() {
    let out = run_source("print(1)", &["-vv"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "1\n");
    assert!(stderr(&out).contains("[DEBUG"), "{}", stderr(&out));
}

#[test]
fn quiet_by_default() {
    let out = run_source("print(1)", &[]);
    assert!(stderr(&out).is_empty(), "{}", stderr(&out));
}
