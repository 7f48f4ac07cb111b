use serde_json::{json, Value};

use crate::ast::SourceMap;
use super::Diagnostic;

/// One-line JSON object for editors and scripts.
pub fn render(d: &Diagnostic) -> String {
    let map = d.source.as_deref().map(SourceMap::new);

    let labels: Vec<Value> = d
        .labels
        .iter()
        .map(|l| {
            let mut obj = json!({
                "start": l.span.start,
                "end": l.span.end,
                "message": l.message,
                "primary": l.is_primary,
            });
            if let Some(map) = &map {
                let (line, col) = map.lookup(l.span.start);
                obj["line"] = json!(line);
                obj["col"] = json!(col);
            }
            obj
        })
        .collect();

    let mut obj = json!({
        "severity": "error",
        "code": d.code,
        "message": d.message,
        "labels": labels,
        "notes": d.notes,
    });
    if let Some(s) = &d.suggestion {
        obj["suggestion"] = json!(s);
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"could not serialize diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn parse(s: &str) -> Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn basic_fields() {
        let v = parse(&render(&Diagnostic::error("division by zero").with_code("ZBY-R004")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["code"], "ZBY-R004");
        assert_eq!(v["message"], "division by zero");
        assert!(v["labels"].as_array().unwrap().is_empty());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn code_is_null_when_absent() {
        let v = parse(&render(&Diagnostic::error("odd")));
        assert!(v["code"].is_null());
    }

    #[test]
    fn labels_carry_line_and_column_with_source() {
        let d = Diagnostic::error("unexpected character '$'")
            .with_span(Span { start: 8, end: 9 }, "not valid here")
            .with_source("x = 1\ny $");
        let v = parse(&render(&d));
        let label = &v["labels"][0];
        assert_eq!(label["start"], 8);
        assert_eq!(label["primary"], true);
        assert_eq!(label["line"], 2);
        assert_eq!(label["col"], 3);
    }

    #[test]
    fn labels_without_source_have_no_position() {
        let d = Diagnostic::error("bad").with_span(Span { start: 5, end: 8 }, "here");
        let label = &parse(&render(&d))["labels"][0];
        assert!(label.get("line").is_none());
    }

    #[test]
    fn notes_and_suggestion() {
        let d = Diagnostic::error("bad").with_note("first").with_note("second").with_suggestion("fix it");
        let v = parse(&render(&d));
        assert_eq!(v["notes"], json!(["first", "second"]));
        assert_eq!(v["suggestion"], "fix it");
    }

    #[test]
    fn quotes_are_escaped() {
        let out = render(&Diagnostic::error("expected \"}\""));
        assert_eq!(parse(&out)["message"], "expected \"}\"");
        assert!(!out.contains('\n'));
    }
}
