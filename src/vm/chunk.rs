use std::fmt::Write as _;

use crate::value::Value;

// ── Stack opcodes (one byte, operands inline) ────────────────────────
//
// Numbering is part of the `.zsc` wire format; never renumber.

pub(crate) const OP_CONSTANT: u8 = 0;
pub(crate) const OP_STRING: u8 = 1;
pub(crate) const OP_TRUE: u8 = 2;
pub(crate) const OP_FALSE: u8 = 3;
pub(crate) const OP_NULL: u8 = 4;
pub(crate) const OP_ARRAY: u8 = 5;
pub(crate) const OP_HASHMAP: u8 = 6;
pub(crate) const OP_INDEX_GET: u8 = 7;
pub(crate) const OP_INDEX_SET: u8 = 8;
pub(crate) const OP_ADD: u8 = 9;
pub(crate) const OP_SUBTRACT: u8 = 10;
pub(crate) const OP_MULTIPLY: u8 = 11;
pub(crate) const OP_DIVIDE: u8 = 12;
pub(crate) const OP_NEGATE: u8 = 13;
pub(crate) const OP_NOT: u8 = 14;
pub(crate) const OP_LESS: u8 = 15;
pub(crate) const OP_GREATER: u8 = 16;
pub(crate) const OP_LESS_EQUAL: u8 = 17;
pub(crate) const OP_GREATER_EQUAL: u8 = 18;
pub(crate) const OP_EQUAL: u8 = 19;
pub(crate) const OP_NOT_EQUAL: u8 = 20;
// 21, 22 reserved (AND / OR are compiled to jumps)
pub(crate) const OP_GET_GLOBAL: u8 = 23;
pub(crate) const OP_SET_GLOBAL: u8 = 24;
pub(crate) const OP_GET_LOCAL: u8 = 25;
pub(crate) const OP_SET_LOCAL: u8 = 26;
pub(crate) const OP_JUMP: u8 = 27;
pub(crate) const OP_JUMP_IF_FALSE: u8 = 28;
pub(crate) const OP_BREAK: u8 = 29;
pub(crate) const OP_CONTINUE: u8 = 30;
pub(crate) const OP_CALL: u8 = 31;
pub(crate) const OP_RET: u8 = 32;
pub(crate) const OP_MAKEFRAME: u8 = 33;
// 34 reserved (POPFRAME)
pub(crate) const OP_PRINT: u8 = 35;
pub(crate) const OP_POP: u8 = 36;
pub(crate) const OP_HALT: u8 = 37;
// Integer fast path: operands truncated to i64, wrapping arithmetic
pub(crate) const OP_ADD_INT: u8 = 38;
pub(crate) const OP_SUB_INT: u8 = 39;
pub(crate) const OP_MUL_INT: u8 = 40;
pub(crate) const OP_CONSTANT_0: u8 = 41;
pub(crate) const OP_CONSTANT_1: u8 = 42;
// 43, 44 reserved (cached global access is handled inside GET_GLOBAL)

/// Function id in a CALL instruction meaning "builtin, named by constant k".
pub(crate) const BUILTIN_FID: u8 = 255;

/// Opcode name for disassembly, `None` for unknown or reserved codes.
pub(crate) fn op_name(op: u8) -> Option<&'static str> {
    Some(match op {
        OP_CONSTANT => "CONSTANT",
        OP_STRING => "STRING",
        OP_TRUE => "TRUE",
        OP_FALSE => "FALSE",
        OP_NULL => "NULL",
        OP_ARRAY => "ARRAY",
        OP_HASHMAP => "HASHMAP",
        OP_INDEX_GET => "INDEX_GET",
        OP_INDEX_SET => "INDEX_SET",
        OP_ADD => "ADD",
        OP_SUBTRACT => "SUBTRACT",
        OP_MULTIPLY => "MULTIPLY",
        OP_DIVIDE => "DIVIDE",
        OP_NEGATE => "NEGATE",
        OP_NOT => "NOT",
        OP_LESS => "LESS",
        OP_GREATER => "GREATER",
        OP_LESS_EQUAL => "LESS_EQUAL",
        OP_GREATER_EQUAL => "GREATER_EQUAL",
        OP_EQUAL => "EQUAL",
        OP_NOT_EQUAL => "NOT_EQUAL",
        OP_GET_GLOBAL => "GET_GLOBAL",
        OP_SET_GLOBAL => "SET_GLOBAL",
        OP_GET_LOCAL => "GET_LOCAL",
        OP_SET_LOCAL => "SET_LOCAL",
        OP_JUMP => "JUMP",
        OP_JUMP_IF_FALSE => "JUMP_IF_FALSE",
        OP_BREAK => "BREAK",
        OP_CONTINUE => "CONTINUE",
        OP_CALL => "CALL",
        OP_RET => "RET",
        OP_MAKEFRAME => "MAKEFRAME",
        OP_PRINT => "PRINT",
        OP_POP => "POP",
        OP_HALT => "HALT",
        OP_ADD_INT => "ADD_INT",
        OP_SUB_INT => "SUB_INT",
        OP_MUL_INT => "MUL_INT",
        OP_CONSTANT_0 => "CONSTANT_0",
        OP_CONSTANT_1 => "CONSTANT_1",
        _ => return None,
    })
}

/// Inline operand bytes following `op`. CALL is 2 or 3 depending on its fid,
/// so it is reported here as its minimum and handled by `instruction_len`.
fn operand_len(op: u8) -> usize {
    match op {
        OP_CONSTANT | OP_STRING | OP_ARRAY | OP_HASHMAP | OP_GET_GLOBAL | OP_SET_GLOBAL
        | OP_GET_LOCAL | OP_SET_LOCAL | OP_MAKEFRAME | OP_PRINT => 1,
        OP_JUMP | OP_JUMP_IF_FALSE | OP_CALL => 2,
        _ => 0,
    }
}

// ── Chunk ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub(crate) fn emit(&mut self, byte: u8) -> usize {
        let idx = self.code.len();
        self.code.push(byte);
        idx
    }

    pub(crate) fn emit_op(&mut self, op: u8, operand: u8) -> usize {
        let idx = self.emit(op);
        self.emit(operand);
        idx
    }

    /// Append a constant, reusing an identical scalar already in the pool.
    /// Returns `None` once the pool would exceed 256 entries.
    pub(crate) fn add_constant(&mut self, val: Value) -> Option<u8> {
        let existing = self.constants.iter().position(|c| match (c, &val) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        });
        if let Some(i) = existing {
            return Some(i as u8);
        }
        if self.constants.len() >= 256 {
            return None;
        }
        self.constants.push(val);
        Some((self.constants.len() - 1) as u8)
    }

    /// Emit a forward jump with a placeholder offset; returns the operand position.
    pub(crate) fn emit_jump(&mut self, op: u8) -> usize {
        self.emit(op);
        self.emit(0xFF);
        self.emit(0xFF);
        self.code.len() - 2
    }

    /// Point the jump whose operand sits at `operand_pos` at the current end of code.
    /// Returns `false` when the distance does not fit in an i16.
    pub(crate) fn patch_jump(&mut self, operand_pos: usize) -> bool {
        let offset = self.code.len() as i64 - (operand_pos as i64 + 2);
        let Ok(offset) = i16::try_from(offset) else {
            return false;
        };
        let [hi, lo] = offset.to_be_bytes();
        self.code[operand_pos] = hi;
        self.code[operand_pos + 1] = lo;
        true
    }

    /// Emit a JUMP back to `target`. Returns `false` when the distance does not fit.
    pub(crate) fn emit_loop(&mut self, target: usize) -> bool {
        let offset = target as i64 - (self.code.len() as i64 + 3);
        let Ok(offset) = i16::try_from(offset) else {
            return false;
        };
        let [hi, lo] = offset.to_be_bytes();
        self.emit(OP_JUMP);
        self.emit(hi);
        self.emit(lo);
        true
    }

    /// Length in bytes of the instruction at `ip`, or `None` if it runs past the end.
    pub(crate) fn instruction_len(&self, ip: usize) -> Option<usize> {
        let op = *self.code.get(ip)?;
        let mut len = 1 + operand_len(op);
        if op == OP_CALL && self.code.get(ip + 1) == Some(&BUILTIN_FID) {
            len += 1;
        }
        if ip + len > self.code.len() { None } else { Some(len) }
    }

    pub(crate) fn read_i16(&self, pos: usize) -> i16 {
        i16::from_be_bytes([self.code[pos], self.code[pos + 1]])
    }

    /// Structural check: known opcodes, operands present, constant indices in
    /// range, jumps landing on instruction boundaries.
    pub fn verify(&self) -> Result<(), String> {
        let mut boundaries = vec![false; self.code.len() + 1];
        let mut jumps = Vec::new();
        let mut ip = 0;
        while ip < self.code.len() {
            boundaries[ip] = true;
            let op = self.code[ip];
            if op_name(op).is_none() {
                return Err(format!("unknown opcode {} at offset {}", op, ip));
            }
            let len = self
                .instruction_len(ip)
                .ok_or_else(|| format!("truncated {} at offset {}", op_name(op).unwrap_or("?"), ip))?;
            match op {
                OP_CONSTANT | OP_STRING => {
                    let k = self.code[ip + 1] as usize;
                    if k >= self.constants.len() {
                        return Err(format!("constant index {} out of range at offset {}", k, ip));
                    }
                }
                OP_CALL if self.code[ip + 1] == BUILTIN_FID => {
                    let k = self.code[ip + 3] as usize;
                    if !matches!(self.constants.get(k), Some(Value::Str(_))) {
                        return Err(format!("builtin name constant {} invalid at offset {}", k, ip));
                    }
                }
                OP_JUMP | OP_JUMP_IF_FALSE => {
                    let target = (ip + 3) as i64 + self.read_i16(ip + 1) as i64;
                    jumps.push((ip, target));
                }
                _ => {}
            }
            ip += len;
        }
        boundaries[self.code.len()] = true;
        for (at, target) in jumps {
            let lands = usize::try_from(target).ok().and_then(|t| boundaries.get(t).copied());
            if lands != Some(true) {
                return Err(format!("jump at offset {} lands mid-instruction ({})", at, target));
            }
        }
        Ok(())
    }

    /// Human-readable listing, one instruction per line.
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!("== {} ==\n", name);
        let mut ip = 0;
        while ip < self.code.len() {
            let op = self.code[ip];
            let Some(len) = self.instruction_len(ip) else {
                let _ = writeln!(out, "{:04} <truncated {}>", ip, op);
                break;
            };
            let name = op_name(op).unwrap_or("UNKNOWN");
            let _ = match op {
                OP_CONSTANT | OP_STRING => {
                    let k = self.code[ip + 1];
                    let shown = self.constants.get(k as usize).map(|c| format!("{:?}", c));
                    writeln!(out, "{:04} {:<14} {:>3} ({})", ip, name, k, shown.unwrap_or_default())
                }
                OP_JUMP | OP_JUMP_IF_FALSE => {
                    let offset = self.read_i16(ip + 1);
                    let target = (ip + 3) as i64 + offset as i64;
                    writeln!(out, "{:04} {:<14} {:>3} -> {:04}", ip, name, offset, target)
                }
                OP_CALL if self.code[ip + 1] == BUILTIN_FID => {
                    let k = self.code[ip + 3] as usize;
                    let builtin = match self.constants.get(k) {
                        Some(Value::Str(s)) => s.as_str(),
                        _ => "?",
                    };
                    writeln!(out, "{:04} {:<14} {} argc={}", ip, name, builtin, self.code[ip + 2])
                }
                OP_CALL => writeln!(
                    out,
                    "{:04} {:<14} fn#{} argc={}",
                    ip, name, self.code[ip + 1], self.code[ip + 2]
                ),
                _ if len == 2 => writeln!(out, "{:04} {:<14} {:>3}", ip, name, self.code[ip + 1]),
                _ => writeln!(out, "{:04} {}", ip, name),
            };
            ip += len;
        }
        out
    }

    /// Opcodes in order, skipping operands. Used to inspect compiler output.
    pub fn opcodes(&self) -> Vec<u8> {
        let mut ops = Vec::new();
        let mut ip = 0;
        while let Some(len) = self.instruction_len(ip) {
            ops.push(self.code[ip]);
            ip += len;
        }
        ops
    }
}

// ── Compiled program ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub arity: u8,
    pub params: Vec<String>,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub main: Chunk,
    pub functions: Vec<Function>,
    /// Global names indexed by slot id.
    pub global_names: Vec<String>,
    /// Libraries activated by `use`, in first-use order.
    pub libraries: Vec<String>,
}

impl Program {
    pub fn disassemble(&self) -> String {
        let mut out = self.main.disassemble("<main>");
        for f in &self.functions {
            out.push('\n');
            out.push_str(&f.chunk.disassemble(&f.name));
        }
        out
    }
}
