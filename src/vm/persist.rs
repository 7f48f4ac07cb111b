//! `.zsc` bytecode files.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "ZSC" version:u8
//! chunk                      main code + constants
//! u32 function count
//! v4: functions              name, u8 arity, u8 param count, params, chunk
//! v4: u32 global count, names
//! ```
//!
//! A chunk is `u32 len, code bytes, u32 count, constants`; a constant is a
//! tag byte followed by its payload. Strings are `u32 len` + UTF-8 bytes.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::value::Value;

use super::chunk::{Chunk, Function, Program};

const MAGIC: &[u8; 3] = b"ZSC";
pub const VERSION: u8 = 4;
const LEGACY_VERSION: u8 = 3;

const TAG_NUMBER: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_BOOLEAN: u8 = 2;
const TAG_NULL: u8 = 5;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PersistError {
    pub fn code(&self) -> &'static str {
        match self {
            PersistError::MalformedBytecode(_) => "ZBY-B001",
            PersistError::Io(_) => "ZBY-B002",
        }
    }
}

fn malformed(msg: impl Into<String>) -> PersistError {
    PersistError::MalformedBytecode(msg.into())
}

// ── Writing ──────────────────────────────────────────────────────────

fn wr_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn wr_u32le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn wr_len<W: Write>(w: &mut W, len: usize) -> Result<(), PersistError> {
    let len = u32::try_from(len).map_err(|_| malformed("section longer than u32::MAX"))?;
    Ok(wr_u32le(w, len)?)
}

fn wr_str<W: Write>(w: &mut W, s: &str) -> Result<(), PersistError> {
    wr_len(w, s.len())?;
    Ok(w.write_all(s.as_bytes())?)
}

fn write_chunk<W: Write>(w: &mut W, chunk: &Chunk) -> Result<(), PersistError> {
    wr_len(w, chunk.code.len())?;
    w.write_all(&chunk.code)?;
    wr_len(w, chunk.constants.len())?;
    for constant in &chunk.constants {
        match constant {
            Value::Number(n) => {
                wr_u8(w, TAG_NUMBER)?;
                w.write_all(&n.to_le_bytes())?;
            }
            Value::Str(s) => {
                wr_u8(w, TAG_STRING)?;
                wr_str(w, s)?;
            }
            Value::Bool(b) => {
                wr_u8(w, TAG_BOOLEAN)?;
                wr_u8(w, *b as u8)?;
            }
            Value::Null => wr_u8(w, TAG_NULL)?,
            other => return Err(malformed(format!("{} constants cannot be persisted", other.type_name()))),
        }
    }
    Ok(())
}

/// Serialize `program` in the current (v4) format.
pub fn write_to<W: Write>(program: &Program, w: &mut W) -> Result<(), PersistError> {
    w.write_all(MAGIC)?;
    wr_u8(w, VERSION)?;
    write_chunk(w, &program.main)?;
    wr_len(w, program.functions.len())?;
    for f in &program.functions {
        wr_str(w, &f.name)?;
        wr_u8(w, f.arity)?;
        let params = u8::try_from(f.params.len()).map_err(|_| malformed("too many parameters"))?;
        wr_u8(w, params)?;
        for p in &f.params {
            wr_str(w, p)?;
        }
        write_chunk(w, &f.chunk)?;
    }
    wr_len(w, program.global_names.len())?;
    for name in &program.global_names {
        wr_str(w, name)?;
    }
    Ok(())
}

pub fn to_bytes(program: &Program) -> Result<Vec<u8>, PersistError> {
    let mut buf = Vec::new();
    write_to(program, &mut buf)?;
    Ok(buf)
}

pub fn save(program: &Program, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let bytes = to_bytes(program)?;
    fs::write(path.as_ref(), bytes)?;
    log::debug!("wrote bytecode to {}", path.as_ref().display());
    Ok(())
}

// ── Reading ──────────────────────────────────────────────────────────

struct Reader<R> {
    inner: R,
}

impl<R: Read> Reader<R> {
    fn bytes(&mut self, n: usize, what: &str) -> Result<Vec<u8>, PersistError> {
        let mut buf = Vec::new();
        (&mut self.inner).take(n as u64).read_to_end(&mut buf)?;
        if buf.len() != n {
            return Err(malformed(format!("truncated {}", what)));
        }
        Ok(buf)
    }

    fn rd_u8(&mut self, what: &str) -> Result<u8, PersistError> {
        Ok(self.bytes(1, what)?[0])
    }

    fn rd_u32le(&mut self, what: &str) -> Result<u32, PersistError> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rd_f64le(&mut self, what: &str) -> Result<f64, PersistError> {
        let b = self.bytes(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b);
        Ok(f64::from_le_bytes(raw))
    }

    fn rd_str(&mut self, what: &str) -> Result<String, PersistError> {
        let len = self.rd_u32le(what)? as usize;
        let bytes = self.bytes(len, what)?;
        String::from_utf8(bytes).map_err(|_| malformed(format!("{} is not valid UTF-8", what)))
    }

    fn rd_chunk(&mut self, owner: &str) -> Result<Chunk, PersistError> {
        let code_len = self.rd_u32le("code length")? as usize;
        let code = self.bytes(code_len, "code")?;
        let count = self.rd_u32le("constant count")?;
        let mut constants = Vec::new();
        for _ in 0..count {
            let constant = match self.rd_u8("constant tag")? {
                TAG_NUMBER => Value::Number(self.rd_f64le("number constant")?),
                TAG_STRING => Value::Str(self.rd_str("string constant")?),
                TAG_BOOLEAN => Value::Bool(self.rd_u8("boolean constant")? != 0),
                TAG_NULL => Value::Null,
                tag => return Err(malformed(format!("unknown constant tag {} in {}", tag, owner))),
            };
            constants.push(constant);
        }
        let chunk = Chunk { code, constants };
        chunk.verify().map_err(|e| malformed(format!("{}: {}", owner, e)))?;
        Ok(chunk)
    }
}

/// Deserialize a program. Accepts the current format and legacy v3 files,
/// which carry only the main chunk.
pub fn read_from<R: Read>(r: R) -> Result<Program, PersistError> {
    let mut r = Reader { inner: r };
    let magic = r.bytes(3, "header")?;
    if magic != MAGIC {
        return Err(malformed("bad magic"));
    }
    let version = r.rd_u8("header")?;
    if version != VERSION && version != LEGACY_VERSION {
        return Err(malformed(format!("unsupported version {}", version)));
    }

    let main = r.rd_chunk("<main>")?;
    if main.code.is_empty() {
        return Err(malformed("empty main code section"));
    }
    let function_count = r.rd_u32le("function count")?;

    let mut program = Program { main, ..Program::default() };
    if version == LEGACY_VERSION {
        log::debug!("loaded legacy v3 bytecode ({} functions not stored)", function_count);
        return Ok(program);
    }

    for _ in 0..function_count {
        let name = r.rd_str("function name")?;
        let arity = r.rd_u8("function arity")?;
        let param_count = r.rd_u8("parameter count")?;
        let params = (0..param_count).map(|_| r.rd_str("parameter name")).collect::<Result<Vec<_>, _>>()?;
        let chunk = r.rd_chunk(&name)?;
        program.functions.push(Function { name, arity, params, chunk });
    }
    let global_count = r.rd_u32le("global count")?;
    for _ in 0..global_count {
        program.global_names.push(r.rd_str("global name")?);
    }
    Ok(program)
}

pub fn load(path: impl AsRef<Path>) -> Result<Program, PersistError> {
    let file = fs::File::open(path.as_ref())?;
    let program = read_from(io::BufReader::new(file))?;
    log::debug!(
        "loaded {} ({} functions, {} globals)",
        path.as_ref().display(),
        program.functions.len(),
        program.global_names.len()
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::chunk::*;
    use crate::vm::{compile, CompileOptions, Vm};
    use crate::{lexer, parser};

    fn build(source: &str) -> Program {
        let ast = parser::parse(lexer::lex(source).unwrap()).unwrap();
        compile(&ast, CompileOptions::default()).unwrap()
    }

    fn output(program: &Program) -> String {
        let mut out = Vec::new();
        let mut input = "".as_bytes();
        Vm::new(&mut out, &mut input).run(program).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn round_trip_main_only() {
        let program = build("x = 2.5\ns = \"hi\"\nif (x > 1) { print(s, x, true, null) }");
        let loaded = read_from(to_bytes(&program).unwrap().as_slice()).unwrap();
        assert_eq!(loaded, program);
        assert_eq!(output(&loaded), output(&program));
    }

    #[test]
    fn round_trip_with_functions() {
        let program = build("func sq(n) { return n * n }\nfunc twice(f) { return sq(f) + sq(f) }\nprint(twice(3))");
        let loaded = read_from(to_bytes(&program).unwrap().as_slice()).unwrap();
        assert_eq!(loaded.functions, program.functions);
        assert_eq!(output(&loaded), "18\n");
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.zsc");
        let program = build("print(\"saved\")");
        save(&program, &path).unwrap();
        assert_eq!(output(&load(&path).unwrap()), "saved\n");
    }

    #[test]
    fn header_layout() {
        let bytes = to_bytes(&build("print(7)")).unwrap();
        assert_eq!(&bytes[..4], b"ZSC\x04");
        let code_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        // CONSTANT k, PRINT 1, POP, HALT
        assert_eq!(code_len, 6);
        assert_eq!(bytes[8], OP_CONSTANT);
    }

    #[test]
    fn loads_legacy_v3() {
        let mut bytes = b"ZSC\x03".to_vec();
        let code = [OP_CONSTANT, 0, OP_PRINT, 1, OP_POP, OP_HALT];
        bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&code);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(TAG_STRING);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"old");
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let program = read_from(bytes.as_slice()).unwrap();
        assert!(program.functions.is_empty());
        assert_eq!(output(&program), "old\n");
    }

    fn expect_malformed(bytes: &[u8], needle: &str) {
        match read_from(bytes) {
            Err(PersistError::MalformedBytecode(msg)) => assert!(msg.contains(needle), "{}", msg),
            other => panic!("expected malformed bytecode, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_bad_headers() {
        expect_malformed(b"XYZ\x04", "bad magic");
        expect_malformed(b"ZSC\x09", "unsupported version");
        expect_malformed(b"ZS", "truncated");
    }

    #[test]
    fn rejects_bad_bodies() {
        let good = to_bytes(&build("print(\"abc\")")).unwrap();
        expect_malformed(&good[..good.len() - 3], "truncated");

        let mut empty = b"ZSC\x04".to_vec();
        empty.extend_from_slice(&[0; 12]);
        expect_malformed(&empty, "empty main");

        let mut bad_tag = b"ZSC\x04".to_vec();
        bad_tag.extend_from_slice(&1u32.to_le_bytes());
        bad_tag.push(OP_HALT);
        bad_tag.extend_from_slice(&1u32.to_le_bytes());
        bad_tag.push(9);
        expect_malformed(&bad_tag, "unknown constant tag");

        let mut bad_utf8 = b"ZSC\x04".to_vec();
        bad_utf8.extend_from_slice(&1u32.to_le_bytes());
        bad_utf8.push(OP_HALT);
        bad_utf8.extend_from_slice(&1u32.to_le_bytes());
        bad_utf8.push(TAG_STRING);
        bad_utf8.extend_from_slice(&2u32.to_le_bytes());
        bad_utf8.extend_from_slice(&[0xff, 0xfe]);
        expect_malformed(&bad_utf8, "UTF-8");
    }

    #[test]
    fn rejects_unverifiable_code() {
        let mut bytes = b"ZSC\x04".to_vec();
        let code = [OP_JUMP, 0, 1, OP_GET_GLOBAL, 0, OP_HALT];
        bytes.extend_from_slice(&(code.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&code);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        expect_malformed(&bytes, "mid-instruction");
    }

    #[test]
    fn error_codes() {
        assert_eq!(malformed("x").code(), "ZBY-B001");
        let err = load("/definitely/not/here.zsc").unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
        assert_eq!(err.code(), "ZBY-B002");
    }
}
