pub mod ansi;
pub mod json;
pub mod registry;

use crate::ast::Span;
use crate::lexer::{LexError, LexErrorKind};
use crate::parser::ParseError;
use crate::vm::persist::PersistError;
use crate::vm::{CompileError, VmError};

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

/// A uniform error report: what went wrong, where, and what to do about it.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for each layer's error type ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span { start: e.position, end: e.position + e.snippet.len().max(1) };
        let d = Diagnostic::error(e.message()).with_code(e.code());
        match e.kind {
            LexErrorKind::UnexpectedCharacter => d.with_span(span, "not valid here"),
            LexErrorKind::UnterminatedString => {
                let start = Span { start: e.position, end: e.position + 1 };
                d.with_span(start, "string starts here").with_suggestion("close the string with '\"'")
            }
        }
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let d = Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here");
        match e.code {
            "ZBY-P003" => d.with_note("exceptions are reserved words with no runtime support"),
            "ZBY-P004" => d.with_suggestion("assign to a variable (`x = ...`) or an element (`x[i] = ...`)"),
            _ => d,
        }
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let mut d = Diagnostic::error(e.to_string()).with_code(e.code());
        if let Some(span) = e.span() {
            d = d.with_span(span, "called here");
        }
        match e {
            CompileError::UndefinedFunction { .. } => {
                d.with_note("functions must be defined before the code that calls them")
            }
            CompileError::TooManyConstants | CompileError::JumpTooFar => {
                d.with_suggestion("split the code into smaller functions")
            }
            _ => d,
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(e: &VmError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            VmError::UndefinedVariable { name } => {
                d.with_suggestion(format!("assign '{}' before reading it", name))
            }
            VmError::BreakOutsideLoop | VmError::ContinueOutsideLoop => {
                d.with_note("break and continue only work inside while and for loops")
            }
            VmError::StackOverflow { .. } => d.with_note("check for recursion without a base case"),
            VmError::UnknownOpcode { .. } | VmError::MalformedInstruction { .. } => {
                d.with_note("the bytecode may be corrupt or from a newer version")
            }
            _ => d,
        }
    }
}

impl From<&PersistError> for Diagnostic {
    fn from(e: &PersistError) -> Self {
        Diagnostic::error(e.to_string()).with_code(e.code())
    }
}
