use std::fmt::Write as _;

use crate::ast::SourceMap;
use super::{Diagnostic, Label};

/// Renders diagnostics for a terminal, with optional ANSI colour.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn blue(&self, s: &str) -> String {
        self.paint("34", s)
    }

    fn snippet(&self, out: &mut String, label: &Label, source: &str) {
        let map = SourceMap::new(source);
        let (line, col) = map.lookup(label.span.start);
        let text = map.line_text(line);

        let gutter = line.to_string().len();
        let pad = " ".repeat(gutter);
        let bar = self.blue("|");
        let _ = writeln!(out, "{pad}{} {line}:{col}", self.blue("-->"));
        let _ = writeln!(out, "{pad} {bar}");
        let _ = writeln!(out, "{} {bar} {text}", self.blue(&format!("{line:>gutter$}")));

        // Underline stays on the first line of a multi-line span.
        let width = text.chars().count().saturating_sub(col - 1).max(1);
        let len = label.span.end.saturating_sub(label.span.start).clamp(1, width);
        let marks = self.red(&"^".repeat(len));
        let indent = " ".repeat(col - 1);
        if label.message.is_empty() {
            let _ = writeln!(out, "{pad} {bar} {indent}{marks}");
        } else {
            let _ = writeln!(out, "{pad} {bar} {indent}{marks} {}", self.red(&label.message));
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let code = d.code.map(|c| format!("[{c}]")).unwrap_or_default();
        let _ = writeln!(out, "{}{}: {}", self.red("error"), self.bold(&code), self.bold(&d.message));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            self.snippet(&mut out, label, source);
        }

        for note in &d.notes {
            let _ = writeln!(out, "  {} note: {note}", self.blue("="));
        }
        if let Some(suggestion) = &d.suggestion {
            let _ = writeln!(out, "  {} help: {suggestion}", self.blue("="));
        }
        if let Some(code) = d.code {
            let _ = writeln!(out, "  {} run `zoby --explain {code}` for details", self.blue("="));
        }

        out
    }
}
