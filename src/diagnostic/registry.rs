/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,
    pub long: &'static str,
}

/// Every stable error code zoby can report.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZBY-L001",
        short: "unexpected character",
        long: r#"## ZBY-L001: unexpected character

The source contains a character that does not start any token.

**Example:**

    x = 1 $ 2

`$` is not an operator in zoby. Remove it or replace it with one of
`+ - * / == != < <= > >= and or not`.
"#,
    },
    ErrorEntry {
        code: "ZBY-L002",
        short: "unterminated string literal",
        long: r#"## ZBY-L002: unterminated string literal

A string was opened with `"` but the file ended before the closing quote.

**Example:**

    print("hello)

**Fix:**

    print("hello")
"#,
    },
    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZBY-P001",
        short: "unexpected token",
        long: r#"## ZBY-P001: unexpected token

The parser found a token that cannot appear at this point of a statement
or expression.

**Example:**

    if x > 1) { print(x) }

`if` needs its condition in parentheses: `if (x > 1) { ... }`.
"#,
    },
    ErrorEntry {
        code: "ZBY-P002",
        short: "unexpected end of input",
        long: r#"## ZBY-P002: unexpected end of input

The file ended in the middle of a statement or expression.

**Example:**

    x = (1 +

Usually a missing closing `)`, `]` or `}`, or an operator with no
right-hand side.
"#,
    },
    ErrorEntry {
        code: "ZBY-P003",
        short: "exceptions are not supported",
        long: r#"## ZBY-P003: exceptions are not supported

`try`, `catch` and `throw` are reserved words, but zoby has no exception
handling. Runtime errors always stop the program.

Return a sentinel value (for example `null`) and test it with `if`
instead.
"#,
    },
    ErrorEntry {
        code: "ZBY-P004",
        short: "invalid assignment target",
        long: r#"## ZBY-P004: invalid assignment target

Only a variable or an indexed element can appear on the left of `=`.

**Example:**

    f(1) = 2
    1 + x = 3

**Valid targets:**

    x = 2
    xs[0] = 2
    m["key"] = 2
"#,
    },
    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZBY-C001",
        short: "call to undefined function",
        long: r#"## ZBY-C001: call to undefined function

The call names neither a builtin nor a function defined earlier in the
program. Functions are resolved when the call is compiled, so the
definition must come first.

**Example:**

    print(double(2))
    func double(x) { return x * 2 }

**Fix:** move the `func` above the call.
"#,
    },
    ErrorEntry {
        code: "ZBY-C002",
        short: "too many constants",
        long: r#"## ZBY-C002: too many constants

A single chunk (the main program or one function body) may hold at most
256 distinct constants. Repeated numbers and strings share a slot.

Split large literal tables across functions.
"#,
    },
    ErrorEntry {
        code: "ZBY-C003",
        short: "too many globals",
        long: r#"## ZBY-C003: too many globals

A program may use at most 256 distinct global names. Move working values
into function parameters or collect them in a map.
"#,
    },
    ErrorEntry {
        code: "ZBY-C004",
        short: "too many locals",
        long: r#"## ZBY-C004: too many locals

A function may have at most 255 local slots, counting its parameters and
every variable assigned inside its body.
"#,
    },
    ErrorEntry {
        code: "ZBY-C005",
        short: "too many functions",
        long: r#"## ZBY-C005: too many functions

A program may define at most 255 functions; id 255 is reserved for
builtin calls.
"#,
    },
    ErrorEntry {
        code: "ZBY-C006",
        short: "too many arguments",
        long: r#"## ZBY-C006: too many arguments

A call may pass at most 255 arguments. Pass an array or a map instead.
"#,
    },
    ErrorEntry {
        code: "ZBY-C007",
        short: "collection literal too large",
        long: r#"## ZBY-C007: collection literal too large

An array literal may list at most 255 elements and a map literal at most
255 entries. Build bigger collections with `push` in a loop.
"#,
    },
    ErrorEntry {
        code: "ZBY-C008",
        short: "jump too far",
        long: r#"## ZBY-C008: jump too far

A branch or loop body compiled to more than 32767 bytes, which does not
fit a 16-bit jump offset. Move part of the body into a function.
"#,
    },
    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZBY-R001",
        short: "undefined variable",
        long: r#"## ZBY-R001: undefined variable

A global was read before anything was assigned to it.

**Example:**

    print(total)
    total = 0

**Fix:** assign the variable first.
"#,
    },
    ErrorEntry {
        code: "ZBY-R002",
        short: "undefined function",
        long: r#"## ZBY-R002: undefined function

The bytecode calls a function id or builtin name that does not exist.
Source programs catch this at compile time (ZBY-C001); at runtime it
means a `.zsc` file was edited or built by another tool.
"#,
    },
    ErrorEntry {
        code: "ZBY-R003",
        short: "stack underflow",
        long: r#"## ZBY-R003: stack underflow

An instruction needed more operands than the stack held. The compiler
never produces such code, so the bytecode is damaged.
"#,
    },
    ErrorEntry {
        code: "ZBY-R004",
        short: "division by zero",
        long: r#"## ZBY-R004: division by zero

The right operand of `/` was zero.

**Example:**

    n = 0
    print(10 / n)

Guard the division: `n == 0 ? 0 : 10 / n`.
"#,
    },
    ErrorEntry {
        code: "ZBY-R005",
        short: "type mismatch",
        long: r#"## ZBY-R005: type mismatch

An operator received a value of the wrong type. Arithmetic needs numbers,
except `+`, which joins text when either side is a string. Ordering
compares two numbers or two strings. Indexing needs an array, map or
string.

**Example:**

    print("a" - 1)
"#,
    },
    ErrorEntry {
        code: "ZBY-R006",
        short: "wrong number of arguments",
        long: r#"## ZBY-R006: wrong number of arguments

A function or builtin was called with a different number of arguments
than it accepts.

**Example:**

    func add(a, b) { return a + b }
    print(add(1))
"#,
    },
    ErrorEntry {
        code: "ZBY-R007",
        short: "invalid argument",
        long: r#"## ZBY-R007: invalid argument

A builtin got an argument of the right type but an unusable value.

**Example:**

    print(split("a,b", ""))

`split` needs a non-empty delimiter.
"#,
    },
    ErrorEntry {
        code: "ZBY-R008",
        short: "break outside loop",
        long: r#"## ZBY-R008: break outside loop

`break` appeared where no `while` or `for` loop encloses it.
"#,
    },
    ErrorEntry {
        code: "ZBY-R009",
        short: "continue outside loop",
        long: r#"## ZBY-R009: continue outside loop

`continue` appeared where no `while` or `for` loop encloses it.
"#,
    },
    ErrorEntry {
        code: "ZBY-R010",
        short: "stack overflow",
        long: r#"## ZBY-R010: stack overflow

Calls nested deeper than the VM allows (1000 frames by default). This
is almost always recursion without a base case.

**Example:**

    func f(n) { return f(n + 1) }
    f(0)
"#,
    },
    ErrorEntry {
        code: "ZBY-R011",
        short: "malformed bytecode",
        long: r#"## ZBY-R011: malformed bytecode

The VM met an opcode it does not know, or an instruction whose operands
run past the end of the chunk. Recompile the source; the `.zsc` file may
be corrupt or written by a newer version.
"#,
    },
    ErrorEntry {
        code: "ZBY-R012",
        short: "i/o error",
        long: r#"## ZBY-R012: i/o error

Writing program output or reading from standard input failed, for
example because the output pipe was closed.
"#,
    },
    // ── Bytecode files ───────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZBY-B001",
        short: "malformed bytecode file",
        long: r#"## ZBY-B001: malformed bytecode file

A `.zsc` file failed to load: the magic header is not `ZSC`, the version
is unsupported, a section is truncated, or a chunk does not pass
verification. Regenerate it with `zoby <file> --emit-bytecode <out>`.
"#,
    },
    ErrorEntry {
        code: "ZBY-B002",
        short: "bytecode file i/o error",
        long: r#"## ZBY-B002: bytecode file i/o error

A `.zsc` file could not be read or written. Check the path and its
permissions.
"#,
    },
];

pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_code() {
        let e = lookup("ZBY-R005").expect("ZBY-R005 should be in registry");
        assert_eq!(e.code, "ZBY-R005");
        assert!(!e.short.is_empty());
        assert!(e.long.contains("ZBY-R005"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("ZBY-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn all_codes_have_content() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.starts_with(&format!("## {}", entry.code)), "{} heading", entry.code);
        }
    }

    #[test]
    fn every_layer_is_covered() {
        for prefix in ["ZBY-L", "ZBY-P", "ZBY-C", "ZBY-R", "ZBY-B"] {
            assert!(REGISTRY.iter().any(|e| e.code.starts_with(prefix)), "no {prefix} codes");
        }
        assert_eq!(REGISTRY.len(), 28);
    }
}
