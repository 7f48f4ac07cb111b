use std::io::{BufRead, Write};

use crate::value::{TypeMismatch, Value};

mod builtins;
pub mod chunk;
pub mod compiler;
pub mod persist;

use chunk::*;
pub use chunk::{Chunk, Function, Program};
pub use compiler::{compile, CompileError, CompileOptions};

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String },
    #[error("stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("{op}: expected {expected}, found {found}")]
    TypeMismatch { op: String, expected: &'static str, found: &'static str },
    #[error("{name}: expected {expected} argument(s), got {found}")]
    ArityMismatch { name: String, expected: String, found: usize },
    #[error("{name}: {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("break outside of a loop")]
    BreakOutsideLoop,
    #[error("continue outside of a loop")]
    ContinueOutsideLoop,
    #[error("call depth exceeded {depth}")]
    StackOverflow { depth: usize },
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed instruction at offset {offset}")]
    MalformedInstruction { offset: usize },
}

impl VmError {
    pub fn code(&self) -> &'static str {
        match self {
            VmError::UndefinedVariable { .. } => "ZBY-R001",
            VmError::UndefinedFunction { .. } => "ZBY-R002",
            VmError::StackUnderflow => "ZBY-R003",
            VmError::DivisionByZero => "ZBY-R004",
            VmError::TypeMismatch { .. } => "ZBY-R005",
            VmError::ArityMismatch { .. } => "ZBY-R006",
            VmError::InvalidArgument { .. } => "ZBY-R007",
            VmError::BreakOutsideLoop => "ZBY-R008",
            VmError::ContinueOutsideLoop => "ZBY-R009",
            VmError::StackOverflow { .. } => "ZBY-R010",
            VmError::UnknownOpcode { .. } | VmError::MalformedInstruction { .. } => "ZBY-R011",
            VmError::Io(_) => "ZBY-R012",
        }
    }

    pub(crate) fn type_mismatch(op: &str, e: TypeMismatch) -> Self {
        VmError::TypeMismatch { op: op.to_string(), expected: e.expected, found: e.found }
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// Runtime knobs. `Default` enables the inline cache and allows 1000 nested calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmOptions {
    pub inline_cache: bool,
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { inline_cache: true, max_call_depth: 1000 }
    }
}

struct CallFrame {
    return_ip: usize,
    caller_base: usize,
    /// Function the caller was executing; `None` for main.
    caller: Option<u8>,
}

pub struct Vm<'io> {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Vec<Option<Value>>,
    /// Per-slot copy of the last value read; `None` means invalid.
    cache: Vec<Option<Value>>,
    cache_hits: u64,
    output: &'io mut dyn Write,
    input: &'io mut dyn BufRead,
    options: VmOptions,
}

fn chunk_of(program: &Program, fid: Option<u8>) -> VmResult<&Chunk> {
    match fid {
        None => Ok(&program.main),
        Some(id) => program
            .functions
            .get(id as usize)
            .map(|f| &f.chunk)
            .ok_or_else(|| VmError::UndefinedFunction { name: format!("#{}", id) }),
    }
}

impl<'io> Vm<'io> {
    pub fn new(output: &'io mut dyn Write, input: &'io mut dyn BufRead) -> Self {
        Vm::with_options(output, input, VmOptions::default())
    }

    pub fn with_options(output: &'io mut dyn Write, input: &'io mut dyn BufRead, options: VmOptions) -> Self {
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            globals: Vec::new(),
            cache: Vec::new(),
            cache_hits: 0,
            output,
            input,
            options,
        }
    }

    /// Number of global reads served from the inline cache so far.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Current value of a global after (or during) a run.
    pub fn global(&self, program: &Program, name: &str) -> Option<&Value> {
        let slot = program.global_names.iter().position(|n| n == name)?;
        self.globals.get(slot)?.as_ref()
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or(VmError::StackUnderflow)
    }

    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let len = self.stack.len();
        if len < n {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(len - n))
    }

    fn get_global(&mut self, slot: usize, program: &Program) -> VmResult<Value> {
        if self.options.inline_cache {
            if let Some(Some(v)) = self.cache.get(slot) {
                self.cache_hits += 1;
                return Ok(v.clone());
            }
        }
        let value = self.globals.get(slot).cloned().flatten().ok_or_else(|| VmError::UndefinedVariable {
            name: program.global_names.get(slot).cloned().unwrap_or_else(|| format!("#{}", slot)),
        })?;
        if self.options.inline_cache {
            if self.cache.len() <= slot {
                self.cache.resize(slot + 1, None);
            }
            self.cache[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn set_global(&mut self, slot: usize, value: Value) {
        if self.globals.len() <= slot {
            self.globals.resize(slot + 1, None);
        }
        self.globals[slot] = Some(value);
        if let Some(entry) = self.cache.get_mut(slot) {
            *entry = None;
        }
    }

    /// Execute `program` from the top of its main chunk.
    pub fn run(&mut self, program: &Program) -> VmResult<()> {
        self.stack.clear();
        self.frames.clear();
        self.globals = vec![None; program.global_names.len()];
        self.cache = vec![None; program.global_names.len()];
        if !program.libraries.is_empty() {
            log::debug!("libraries in use: {}", program.libraries.join(", "));
        }
        let result = self.execute(program);
        self.output.flush()?;
        result
    }

    fn execute(&mut self, program: &Program) -> VmResult<()> {
        let mut current: Option<u8> = None;
        let mut chunk = &program.main;
        let mut ip = 0usize;
        let mut base = 0usize;

        loop {
            let Some(&op) = chunk.code.get(ip) else {
                // Fell off the end: main is done, a function returns null.
                let Some(frame) = self.frames.pop() else {
                    return Ok(());
                };
                self.stack.truncate(base);
                base = frame.caller_base;
                ip = frame.return_ip;
                current = frame.caller;
                chunk = chunk_of(program, current)?;
                self.stack.push(Value::Null);
                continue;
            };
            let at = ip;
            ip += 1;

            macro_rules! operand {
                () => {{
                    let byte = *chunk.code.get(ip).ok_or(VmError::MalformedInstruction { offset: at })?;
                    ip += 1;
                    byte
                }};
            }
            macro_rules! jump_target {
                () => {{
                    let hi = operand!();
                    let lo = operand!();
                    let target = ip as isize + i16::from_be_bytes([hi, lo]) as isize;
                    usize::try_from(target).map_err(|_| VmError::MalformedInstruction { offset: at })?
                }};
            }

            match op {
                OP_CONSTANT | OP_STRING => {
                    let k = operand!() as usize;
                    let val = chunk.constants.get(k).cloned().ok_or(VmError::MalformedInstruction { offset: at })?;
                    self.stack.push(val);
                }
                OP_TRUE => self.stack.push(Value::Bool(true)),
                OP_FALSE => self.stack.push(Value::Bool(false)),
                OP_NULL => self.stack.push(Value::Null),
                OP_CONSTANT_0 => self.stack.push(Value::Number(0.0)),
                OP_CONSTANT_1 => self.stack.push(Value::Number(1.0)),
                OP_ARRAY => {
                    let n = operand!() as usize;
                    let items = self.pop_n(n)?;
                    self.stack.push(Value::Array(items));
                }
                OP_HASHMAP => {
                    let n = operand!() as usize;
                    let flat = self.pop_n(n * 2)?;
                    let mut entries = std::collections::BTreeMap::new();
                    let mut it = flat.into_iter();
                    while let (Some(key), Some(value)) = (it.next(), it.next()) {
                        match key {
                            Value::Str(k) => {
                                entries.insert(k, value);
                            }
                            other => {
                                return Err(VmError::TypeMismatch {
                                    op: "map key".into(),
                                    expected: "string",
                                    found: other.type_name(),
                                });
                            }
                        }
                    }
                    self.stack.push(Value::Map(entries));
                }
                OP_INDEX_GET => {
                    let index = self.pop()?;
                    let container = self.pop()?;
                    self.stack.push(index_get(container, &index)?);
                }
                OP_INDEX_SET => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let container = self.pop()?;
                    self.stack.push(index_set(container, &index, value)?);
                }
                OP_ADD => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = match (&a, &b) {
                        (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
                        (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", a, b)),
                        _ => {
                            let found = if matches!(a, Value::Number(_)) { b.type_name() } else { a.type_name() };
                            return Err(VmError::TypeMismatch { op: "+".into(), expected: "number or string", found });
                        }
                    };
                    self.stack.push(result);
                }
                OP_SUBTRACT | OP_MULTIPLY | OP_DIVIDE => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let symbol = match op {
                        OP_SUBTRACT => "-",
                        OP_MULTIPLY => "*",
                        _ => "/",
                    };
                    let (x, y) = numbers(symbol, &a, &b)?;
                    let result = match op {
                        OP_SUBTRACT => x - y,
                        OP_MULTIPLY => x * y,
                        _ if y == 0.0 => return Err(VmError::DivisionByZero),
                        _ => x / y,
                    };
                    self.stack.push(Value::Number(result));
                }
                OP_ADD_INT | OP_SUB_INT | OP_MUL_INT => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let (x, y) = numbers("integer arithmetic", &a, &b)?;
                    let (x, y) = (x as i64, y as i64);
                    let result = match op {
                        OP_ADD_INT => x.wrapping_add(y),
                        OP_SUB_INT => x.wrapping_sub(y),
                        _ => x.wrapping_mul(y),
                    };
                    self.stack.push(Value::Number(result as f64));
                }
                OP_NEGATE => {
                    let v = self.pop()?;
                    let n = v.as_number().map_err(|e| VmError::type_mismatch("unary -", e))?;
                    self.stack.push(Value::Number(-n));
                }
                OP_NOT => {
                    let v = self.pop()?;
                    self.stack.push(Value::Bool(!v.is_truthy()));
                }
                OP_LESS | OP_GREATER | OP_LESS_EQUAL | OP_GREATER_EQUAL => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Bool(compare(op, &a, &b)?));
                }
                OP_EQUAL | OP_NOT_EQUAL => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let eq = a.equals(&b);
                    self.stack.push(Value::Bool(if op == OP_EQUAL { eq } else { !eq }));
                }
                OP_GET_GLOBAL => {
                    let slot = operand!() as usize;
                    let value = self.get_global(slot, program)?;
                    self.stack.push(value);
                }
                OP_SET_GLOBAL => {
                    let slot = operand!() as usize;
                    let value = self.peek()?.clone();
                    self.set_global(slot, value);
                }
                OP_GET_LOCAL => {
                    let slot = base + operand!() as usize;
                    let value = self.stack.get(slot).cloned().ok_or(VmError::StackUnderflow)?;
                    self.stack.push(value);
                }
                OP_SET_LOCAL => {
                    let slot = base + operand!() as usize;
                    let value = self.peek()?.clone();
                    *self.stack.get_mut(slot).ok_or(VmError::StackUnderflow)? = value;
                }
                OP_JUMP => {
                    ip = jump_target!();
                }
                OP_JUMP_IF_FALSE => {
                    let target = jump_target!();
                    if !self.peek()?.is_truthy() {
                        ip = target;
                    }
                }
                OP_BREAK => return Err(VmError::BreakOutsideLoop),
                OP_CONTINUE => return Err(VmError::ContinueOutsideLoop),
                OP_CALL => {
                    let fid = operand!();
                    let argc = operand!() as usize;
                    if fid == BUILTIN_FID {
                        let k = operand!() as usize;
                        let name = match chunk.constants.get(k) {
                            Some(Value::Str(s)) => s.as_str(),
                            _ => return Err(VmError::MalformedInstruction { offset: at }),
                        };
                        let builtin = builtins::lookup(name)
                            .ok_or_else(|| VmError::UndefinedFunction { name: name.to_string() })?;
                        let args = self.pop_n(argc)?;
                        let mut io = builtins::Io { input: &mut *self.input, output: &mut *self.output };
                        let result = builtins::call(builtin, &mut io, args)?;
                        self.stack.push(result);
                        continue;
                    }
                    let function = program
                        .functions
                        .get(fid as usize)
                        .ok_or_else(|| VmError::UndefinedFunction { name: format!("#{}", fid) })?;
                    if argc != function.arity as usize {
                        return Err(VmError::ArityMismatch {
                            name: function.name.clone(),
                            expected: function.arity.to_string(),
                            found: argc,
                        });
                    }
                    if self.frames.len() >= self.options.max_call_depth {
                        return Err(VmError::StackOverflow { depth: self.options.max_call_depth });
                    }
                    if self.stack.len() < argc {
                        return Err(VmError::StackUnderflow);
                    }
                    log::trace!("call {} (depth {})", function.name, self.frames.len() + 1);
                    self.frames.push(CallFrame { return_ip: ip, caller_base: base, caller: current });
                    base = self.stack.len() - argc;
                    current = Some(fid);
                    chunk = &function.chunk;
                    ip = 0;
                }
                OP_RET => {
                    let value = self.pop()?;
                    let Some(frame) = self.frames.pop() else {
                        // return from main halts
                        return Ok(());
                    };
                    self.stack.truncate(base);
                    base = frame.caller_base;
                    ip = frame.return_ip;
                    current = frame.caller;
                    chunk = chunk_of(program, current)?;
                    self.stack.push(value);
                }
                OP_MAKEFRAME => {
                    let slots = operand!() as usize;
                    if self.stack.len() < base + slots {
                        self.stack.resize(base + slots, Value::Null);
                    }
                }
                OP_PRINT => {
                    let argc = operand!() as usize;
                    let args = self.pop_n(argc)?;
                    let line: Vec<String> = args.iter().map(|v| v.to_string()).collect();
                    writeln!(self.output, "{}", line.join(" "))?;
                    self.stack.push(Value::Null);
                }
                OP_POP => {
                    self.pop()?;
                }
                OP_HALT => return Ok(()),
                _ => return Err(VmError::UnknownOpcode { op }),
            }
        }
    }
}

fn numbers(op: &str, a: &Value, b: &Value) -> VmResult<(f64, f64)> {
    let x = a.as_number().map_err(|e| VmError::type_mismatch(op, e))?;
    let y = b.as_number().map_err(|e| VmError::type_mismatch(op, e))?;
    Ok((x, y))
}

/// Ordering over two numbers or two strings. NaN compares false.
fn compare(op: u8, a: &Value, b: &Value) -> VmResult<bool> {
    let ordering = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Number(_), other) => {
            return Err(VmError::TypeMismatch { op: "compare".into(), expected: "number", found: other.type_name() });
        }
        (Value::Str(_), other) => {
            return Err(VmError::TypeMismatch { op: "compare".into(), expected: "string", found: other.type_name() });
        }
        (other, _) => {
            return Err(VmError::TypeMismatch {
                op: "compare".into(),
                expected: "number or string",
                found: other.type_name(),
            });
        }
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        OP_LESS => ordering.is_lt(),
        OP_GREATER => ordering.is_gt(),
        OP_LESS_EQUAL => ordering.is_le(),
        _ => ordering.is_ge(),
    })
}

/// In-range position for a numeric index; fractional indices truncate.
fn position(n: f64, len: usize) -> Option<usize> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let i = n as usize;
    (i < len).then_some(i)
}

fn index_get(container: Value, index: &Value) -> VmResult<Value> {
    match (container, index) {
        (Value::Map(mut entries), Value::Str(key)) => Ok(entries.remove(key).unwrap_or_default()),
        (Value::Array(items), Value::Number(n)) => {
            let len = items.len();
            Ok(position(*n, len).and_then(|i| items.into_iter().nth(i)).unwrap_or(Value::Number(0.0)))
        }
        (Value::Str(s), Value::Number(n)) => {
            let ch = position(*n, s.chars().count()).and_then(|i| s.chars().nth(i));
            Ok(Value::Str(ch.map(String::from).unwrap_or_default()))
        }
        (Value::Map(_), other) => {
            Err(VmError::TypeMismatch { op: "index".into(), expected: "string", found: other.type_name() })
        }
        (Value::Array(_) | Value::Str(_), other) => {
            Err(VmError::TypeMismatch { op: "index".into(), expected: "number", found: other.type_name() })
        }
        (other, _) => Err(VmError::TypeMismatch {
            op: "index".into(),
            expected: "array, map or string",
            found: other.type_name(),
        }),
    }
}

fn index_set(container: Value, index: &Value, value: Value) -> VmResult<Value> {
    match (container, index) {
        (Value::Array(mut items), Value::Number(n)) => {
            if let Some(i) = position(*n, items.len()) {
                items[i] = value;
            }
            Ok(Value::Array(items))
        }
        (Value::Map(mut entries), Value::Str(key)) => {
            entries.insert(key.clone(), value);
            Ok(Value::Map(entries))
        }
        (Value::Array(_), other) => {
            Err(VmError::TypeMismatch { op: "index assignment".into(), expected: "number", found: other.type_name() })
        }
        (Value::Map(_), other) => {
            Err(VmError::TypeMismatch { op: "index assignment".into(), expected: "string", found: other.type_name() })
        }
        (other, _) => Err(VmError::TypeMismatch {
            op: "index assignment".into(),
            expected: "array or map",
            found: other.type_name(),
        }),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
