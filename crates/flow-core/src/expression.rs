//! Expression Engine: JSONPath-like resolution over a context
//! rooted at `$`, condition evaluation for edges/loops/switch cases, and
//! `{{...}}` template interpolation for log messages.
//!
//! The engine is total: a missing path yields `null`, a type mismatch in a
//! comparison yields `false` — never an error — so graph traversal stays
//! deterministic regardless of upstream shape drift.

use serde_json::Value;

/// A single path segment: a field name or an array index.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Resolves a `$.foo.bar[0]`-style path against `root`. Returns `Value::Null`
/// for any path that doesn't resolve — including through a non-object,
/// non-array, or out-of-bounds step.
pub fn resolve_path(root: &Value, path: &str) -> Value {
    let Some(segments) = parse_path(path) else {
        return Value::Null;
    };
    let mut cur = root;
    for seg in &segments {
        match (seg, cur) {
            (Segment::Field(f), Value::Object(map)) => match map.get(f) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            (Segment::Index(i), Value::Array(arr)) => match arr.get(*i) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    cur.clone()
}

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let path = path.trim();
    let rest = path.strip_prefix('$')?;
    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();
    let mut buf = String::new();

    fn flush(buf: &mut String, segments: &mut Vec<Segment>) {
        if !buf.is_empty() {
            segments.push(Segment::Field(std::mem::take(buf)));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut buf, &mut segments),
            '[' => {
                flush(&mut buf, &mut segments);
                let mut idx_buf = String::new();
                for c2 in chars.by_ref() {
                    if c2 == ']' {
                        break;
                    }
                    idx_buf.push(c2);
                }
                if let Ok(idx) = idx_buf.trim().parse::<usize>() {
                    segments.push(Segment::Index(idx));
                } else {
                    // Non-numeric bracket access (`['foo']`) treated as a field.
                    let cleaned = idx_buf.trim().trim_matches(|c| c == '\'' || c == '"');
                    segments.push(Segment::Field(cleaned.to_string()));
                }
            }
            other => buf.push(other),
        }
    }
    flush(&mut buf, &mut segments);
    Some(segments)
}

/// A parsed, evaluable expression. Kept as an AST rather than re-parsed per
/// evaluation so edge/condition checks in a hot scheduler loop don't re-pay
/// tokenization cost (practically relevant once a run has thousands of
/// edges).
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,
    #[error("unbalanced parentheses in expression: {0}")]
    Unbalanced(String),
}

/// Parses a small boolean-expression grammar:
/// `expr := or_expr`
/// `or_expr := and_expr ( "||" and_expr )*`
/// `and_expr := unary ( "&&" unary )*`
/// `unary := "!" unary | cmp`
/// `cmp := atom ( ("=="|"!="|">="|"<="|">"|"<") atom )?`
/// `atom := "(" or_expr ")" | path | literal`
pub fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let src = src.trim();
    if src.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let tokens = tokenize(src);
    let mut pos = 0;
    let expr = parse_or(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(ExpressionError::Unbalanced(src.to_string()));
    }
    Ok(expr)
}

fn tokenize(src: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            i += 1;
            continue;
        }
        if "!=<>".contains(c) {
            if i + 1 < chars.len() && chars[i + 1] == '=' {
                tokens.push(format!("{}{}", c, '='));
                i += 2;
            } else {
                tokens.push(c.to_string());
                i += 1;
            }
            continue;
        }
        if c == '&' && chars.get(i + 1) == Some(&'&') {
            tokens.push("&&".to_string());
            i += 2;
            continue;
        }
        if c == '|' && chars.get(i + 1) == Some(&'|') {
            tokens.push("||".to_string());
            i += 2;
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            let mut s = String::new();
            i += 1;
            while i < chars.len() && chars[i] != quote {
                s.push(chars[i]);
                i += 1;
            }
            i += 1; // closing quote
            tokens.push(format!("\"{s}\""));
            continue;
        }
        // bare token: path, number, bool, null
        let mut s = String::new();
        while i < chars.len() {
            let c = chars[i];
            if c.is_whitespace() || "()!&|=<>".contains(c) {
                break;
            }
            s.push(c);
            i += 1;
        }
        tokens.push(s);
    }
    tokens
}

fn parse_or(tokens: &[String], pos: &mut usize) -> Result<Expr, ExpressionError> {
    let mut lhs = parse_and(tokens, pos)?;
    while tokens.get(*pos).map(String::as_str) == Some("||") {
        *pos += 1;
        let rhs = parse_and(tokens, pos)?;
        lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_and(tokens: &[String], pos: &mut usize) -> Result<Expr, ExpressionError> {
    let mut lhs = parse_unary(tokens, pos)?;
    while tokens.get(*pos).map(String::as_str) == Some("&&") {
        *pos += 1;
        let rhs = parse_unary(tokens, pos)?;
        lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
}

fn parse_unary(tokens: &[String], pos: &mut usize) -> Result<Expr, ExpressionError> {
    if tokens.get(*pos).map(String::as_str) == Some("!") {
        *pos += 1;
        return Ok(Expr::Not(Box::new(parse_unary(tokens, pos)?)));
    }
    parse_cmp(tokens, pos)
}

fn parse_cmp(tokens: &[String], pos: &mut usize) -> Result<Expr, ExpressionError> {
    let lhs = parse_atom(tokens, pos)?;
    let op = match tokens.get(*pos).map(String::as_str) {
        Some("==") => Some(CmpOp::Eq),
        Some("!=") => Some(CmpOp::Ne),
        Some(">=") => Some(CmpOp::Gte),
        Some("<=") => Some(CmpOp::Lte),
        Some(">") => Some(CmpOp::Gt),
        Some("<") => Some(CmpOp::Lt),
        _ => None,
    };
    let Some(op) = op else {
        return Ok(lhs);
    };
    *pos += 1;
    let rhs = parse_atom(tokens, pos)?;
    Ok(Expr::Cmp(Box::new(lhs), op, Box::new(rhs)))
}

fn parse_atom(tokens: &[String], pos: &mut usize) -> Result<Expr, ExpressionError> {
    let tok = tokens
        .get(*pos)
        .ok_or_else(|| ExpressionError::Unbalanced(tokens.join(" ")))?
        .clone();
    if tok == "(" {
        *pos += 1;
        let inner = parse_or(tokens, pos)?;
        if tokens.get(*pos).map(String::as_str) != Some(")") {
            return Err(ExpressionError::Unbalanced(tokens.join(" ")));
        }
        *pos += 1;
        return Ok(inner);
    }
    *pos += 1;
    if let Some(stripped) = tok.strip_prefix('"') {
        let s = stripped.trim_end_matches('"');
        return Ok(Expr::Literal(Value::String(s.to_string())));
    }
    if tok == "true" {
        return Ok(Expr::Literal(Value::Bool(true)));
    }
    if tok == "false" {
        return Ok(Expr::Literal(Value::Bool(false)));
    }
    if tok == "null" {
        return Ok(Expr::Literal(Value::Null));
    }
    if let Ok(n) = tok.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Ok(Expr::Literal(Value::Number(num)));
        }
    }
    if tok.starts_with('$') {
        return Ok(Expr::Path(tok));
    }
    // Fallback: treat as a bare string literal.
    Ok(Expr::Literal(Value::String(tok)))
}

/// Evaluates a parsed expression against `root`, returning the raw `Value`
/// (condition callers coerce via [`truthy`]).
pub fn eval(expr: &Expr, root: &Value) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(p) => resolve_path(root, p),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, root))),
        Expr::And(a, b) => Value::Bool(truthy(&eval(a, root)) && truthy(&eval(b, root))),
        Expr::Or(a, b) => Value::Bool(truthy(&eval(a, root)) || truthy(&eval(b, root))),
        Expr::Cmp(a, op, b) => Value::Bool(compare(&eval(a, root), *op, &eval(b, root))),
    }
}

/// Parses and evaluates `src` against `root` in one call, returning `false`
/// on a malformed expression rather than surfacing a parse error to the
/// scheduler.
pub fn evaluate_condition(src: &str, root: &Value) -> bool {
    if src.trim().is_empty() {
        return true;
    }
    match parse(src) {
        Ok(expr) => truthy(&eval(&expr, root)),
        Err(_) => false,
    }
}

/// Renders a `{{...}}`-templated string against `root`, used by log
/// message templates. Unresolved placeholders render as `null`'s JSON
/// rendering rules: strings unquoted, everything else via `to_string`.
pub fn render_template(template: &str, root: &Value) -> String {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr_src = String::new();
            let mut closed = false;
            while let Some(c2) = chars.next() {
                if c2 == '}' && chars.peek() == Some(&'}') {
                    chars.next();
                    closed = true;
                    break;
                }
                expr_src.push(c2);
            }
            if closed {
                let value = resolve_path(root, expr_src.trim());
                out.push_str(&value_to_display(&value));
            } else {
                out.push_str("{{");
                out.push_str(&expr_src);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn value_to_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Truthiness: `null`/`false`/missing are falsy; numbers are
/// truthy unless zero; strings/arrays/objects are truthy unless empty.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Total comparison: type mismatches return `false` rather than panicking or
/// erroring.
fn compare(a: &Value, op: CmpOp, b: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        CmpOp::Gt | CmpOp::Gte | CmpOp::Lt | CmpOp::Lte => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => match op {
                CmpOp::Gt => x > y,
                CmpOp::Gte => x >= y,
                CmpOp::Lt => x < y,
                CmpOp::Lte => x <= y,
                _ => unreachable!(),
            },
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => match op {
                    CmpOp::Gt => x > y,
                    CmpOp::Gte => x >= y,
                    CmpOp::Lt => x < y,
                    CmpOp::Lte => x <= y,
                    _ => unreachable!(),
                },
                _ => false,
            },
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    // Numeric literals of different serde_json::Number representations
    // (e.g. 1 vs 1.0) still compare equal for expression purposes.
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path_with_index() {
        let root = json!({"steps": {"a": {"output": {"items": [10, 20, 30]}}}});
        assert_eq!(resolve_path(&root, "$.steps.a.output.items[1]"), json!(20));
    }

    #[test]
    fn missing_path_is_null_not_error() {
        let root = json!({"input": {}});
        assert_eq!(resolve_path(&root, "$.steps.missing.output.x"), Value::Null);
    }

    #[test]
    fn condition_comparison() {
        let root = json!({"input": {"x": 15}});
        assert!(evaluate_condition("$.input.x > 10", &root));
        assert!(!evaluate_condition("$.input.x > 100", &root));
    }

    #[test]
    fn condition_type_mismatch_is_false() {
        let root = json!({"input": {"x": "abc"}});
        assert!(!evaluate_condition("$.input.x > 10", &root));
    }

    #[test]
    fn boolean_combinators() {
        let root = json!({"input": {"x": 15, "y": true}});
        assert!(evaluate_condition("$.input.x > 10 && $.input.y", &root));
        assert!(!evaluate_condition("$.input.x > 10 && !$.input.y", &root));
        assert!(evaluate_condition("$.input.x > 100 || $.input.y", &root));
    }

    #[test]
    fn empty_condition_is_truthy() {
        assert!(evaluate_condition("", &Value::Null));
    }

    #[test]
    fn template_renders_placeholders() {
        let root = json!({"steps": {"s1": {"output": {"name": "Ada"}}}});
        assert_eq!(render_template("hello {{$.steps.s1.output.name}}!", &root), "hello Ada!");
    }
}
