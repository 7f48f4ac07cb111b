pub mod ast;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod value;
pub mod vm;

use std::io::{BufRead, Write};

use diagnostic::Diagnostic;
use lexer::LexError;
use parser::ParseError;
use vm::persist::PersistError;
use vm::{CompileError, CompileOptions, Vm, VmError, VmOptions};

/// Any failure along the source-to-output pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ZobyError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] VmError),
    #[error(transparent)]
    Bytecode(#[from] PersistError),
}

impl ZobyError {
    pub fn code(&self) -> &'static str {
        match self {
            ZobyError::Lex(e) => e.code(),
            ZobyError::Parse(e) => e.code,
            ZobyError::Compile(e) => e.code(),
            ZobyError::Runtime(e) => e.code(),
            ZobyError::Bytecode(e) => e.code(),
        }
    }
}

impl From<&ZobyError> for Diagnostic {
    fn from(e: &ZobyError) -> Self {
        match e {
            ZobyError::Lex(e) => e.into(),
            ZobyError::Parse(e) => e.into(),
            ZobyError::Compile(e) => e.into(),
            ZobyError::Runtime(e) => e.into(),
            ZobyError::Bytecode(e) => e.into(),
        }
    }
}

pub fn parse_source(source: &str) -> Result<ast::Program, ZobyError> {
    let tokens = lexer::lex(source)?;
    log::trace!("lexed {} tokens", tokens.len());
    Ok(parser::parse(tokens)?)
}

/// Lex, parse and compile `source` into a runnable program.
pub fn compile_source(source: &str, options: CompileOptions) -> Result<vm::Program, ZobyError> {
    let ast = parse_source(source)?;
    log::trace!("parsed {} top-level statements", ast.statements.len());
    Ok(vm::compile(&ast, options)?)
}

/// Compile with default options and run against the given console handles.
pub fn run_source(source: &str, output: &mut dyn Write, input: &mut dyn BufRead) -> Result<(), ZobyError> {
    let program = compile_source(source, CompileOptions::default())?;
    Vm::with_options(output, input, VmOptions::default()).run(&program)?;
    Ok(())
}
