//! Evaluator for `#if`/`#elif` integer-constant expressions.
//!
//! Identifiers are resolved lazily against the macro state and every name
//! actually consulted is recorded in the read set. Short-circuited operands
//! of `&&`, `||` and `?:` are parsed but never evaluated, so their
//! identifiers stay out of the read set. That property is what keeps the
//! variant-cache key minimal.

use crate::diagnostics::Diagnostic;
use crate::macros::{is_ident_cont, is_ident_start, Macro, MacroState};
use std::collections::BTreeSet;
use std::path::Path;

/// Implementation-defined bound on recursive macro-body evaluation.
pub const MAX_EXPANSION_DEPTH: u32 = 200;

pub struct EvalContext<'a> {
    pub state: &'a MacroState,
    pub reads: &'a mut BTreeSet<String>,
    pub diagnostics: &'a mut Vec<Diagnostic>,
    pub path: &'a Path,
    pub line: u32,
    depth: u32,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        state: &'a MacroState,
        reads: &'a mut BTreeSet<String>,
        diagnostics: &'a mut Vec<Diagnostic>,
        path: &'a Path,
        line: u32,
    ) -> Self {
        Self {
            state,
            reads,
            diagnostics,
            path,
            line,
            depth: 0,
        }
    }

    fn diag(&mut self, tag: &str, message: String) {
        self.diagnostics
            .push(Diagnostic::new(self.path, self.line, tag, message));
    }
}

/// Evaluate an expression; malformed input reports a diagnostic and yields 0
/// (the conservative "branch inactive" interpretation).
pub fn eval_expression(expr: &str, ctx: &mut EvalContext) -> i64 {
    let tokens = tokenize(expr);
    if tokens.is_empty() {
        ctx.diag("bad-expression", format!("empty or unparsable expression '{expr}'"));
        return 0;
    }
    let mut parser = Parser {
        src: expr,
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    let value = parser.parse_ternary(true);
    if parser.pos < parser.tokens.len() {
        parser
            .ctx
            .diag("bad-expression", format!("trailing tokens in '{expr}'"));
    }
    value
}

/// Recursively expand object-like macros in free text (used for computed
/// includes), recording every identifier consulted. Runs to a fixpoint with
/// a small iteration bound.
pub fn expand_macros_text(text: &str, ctx: &mut EvalContext) -> String {
    let mut current = text.to_string();
    for _ in 0..10 {
        let mut changed = false;
        let mut out = String::with_capacity(current.len());
        let bytes = current.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'"' || bytes[i] == b'<' {
                // A header-name has formed; leave it alone.
                out.push_str(&current[i..]);
                break;
            }
            if is_ident_start(bytes[i]) {
                let start = i;
                while i < bytes.len() && is_ident_cont(bytes[i]) {
                    i += 1;
                }
                let name = &current[start..i];
                ctx.reads.insert(name.to_string());
                match ctx.state.lookup(name) {
                    Some(Macro::Object { body }) => {
                        out.push_str(body);
                        changed = true;
                    }
                    _ => out.push_str(name),
                }
            } else {
                let ch = current[i..].chars().next().unwrap_or(' ');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
        current = out;
        if !changed {
            break;
        }
    }
    current.trim().to_string()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident,
    Op(&'static str),
    LParen,
    RParen,
    Defined,
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    start: usize,
    end: usize,
}

fn tokenize(expr: &str) -> Vec<Spanned> {
    let bytes = expr.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let start = i;
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if b.is_ascii_digit() {
            let value = if b == b'0' && i + 1 < len && (bytes[i + 1] | 0x20) == b'x' {
                i += 2;
                let digits_start = i;
                while i < len && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                i64::from_str_radix(&expr[digits_start..i], 16).unwrap_or(0)
            } else if b == b'0' && i + 1 < len && (bytes[i + 1] | 0x20) == b'b' {
                i += 2;
                let digits_start = i;
                while i < len && (bytes[i] == b'0' || bytes[i] == b'1') {
                    i += 1;
                }
                i64::from_str_radix(&expr[digits_start..i], 2).unwrap_or(0)
            } else if b == b'0' && i + 1 < len && bytes[i + 1].is_ascii_digit() {
                i += 1;
                let digits_start = i;
                while i < len && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                i64::from_str_radix(&expr[digits_start..i], 8).unwrap_or(0)
            } else {
                while i < len && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                expr[start..i].parse::<i64>().unwrap_or(i64::MAX)
            };
            // Integer suffixes carry no value here.
            while i < len && matches!(bytes[i], b'u' | b'U' | b'l' | b'L') {
                i += 1;
            }
            tokens.push(Spanned {
                tok: Tok::Num(value),
                start,
                end: i,
            });
            continue;
        }

        if b == b'\'' {
            i += 1;
            let value = if i < len && bytes[i] == b'\\' {
                i += 1;
                let c = match bytes.get(i) {
                    Some(b'n') => b'\n',
                    Some(b't') => b'\t',
                    Some(b'r') => b'\r',
                    Some(b'0') => 0,
                    Some(&other) => other,
                    None => 0,
                };
                i += 1;
                c as i64
            } else if i < len {
                let c = bytes[i] as i64;
                i += 1;
                c
            } else {
                0
            };
            if i < len && bytes[i] == b'\'' {
                i += 1;
            }
            tokens.push(Spanned {
                tok: Tok::Num(value),
                start,
                end: i,
            });
            continue;
        }

        if is_ident_start(b) {
            while i < len && is_ident_cont(bytes[i]) {
                i += 1;
            }
            let tok = if &expr[start..i] == "defined" {
                Tok::Defined
            } else {
                Tok::Ident
            };
            tokens.push(Spanned { tok, start, end: i });
            continue;
        }

        let two: Option<&'static str> = if i + 1 < len {
            match (b, bytes[i + 1]) {
                (b'&', b'&') => Some("&&"),
                (b'|', b'|') => Some("||"),
                (b'=', b'=') => Some("=="),
                (b'!', b'=') => Some("!="),
                (b'<', b'=') => Some("<="),
                (b'>', b'=') => Some(">="),
                (b'<', b'<') => Some("<<"),
                (b'>', b'>') => Some(">>"),
                _ => None,
            }
        } else {
            None
        };
        if let Some(op) = two {
            tokens.push(Spanned {
                tok: Tok::Op(op),
                start,
                end: i + 2,
            });
            i += 2;
            continue;
        }

        let one: Option<&'static str> = match b {
            b'+' => Some("+"),
            b'-' => Some("-"),
            b'*' => Some("*"),
            b'/' => Some("/"),
            b'%' => Some("%"),
            b'!' => Some("!"),
            b'~' => Some("~"),
            b'&' => Some("&"),
            b'|' => Some("|"),
            b'^' => Some("^"),
            b'<' => Some("<"),
            b'>' => Some(">"),
            b'?' => Some("?"),
            b':' => Some(":"),
            _ => None,
        };
        match one {
            Some(op) => {
                tokens.push(Spanned {
                    tok: Tok::Op(op),
                    start,
                    end: i + 1,
                });
                i += 1;
            }
            None if b == b'(' => {
                tokens.push(Spanned {
                    tok: Tok::LParen,
                    start,
                    end: i + 1,
                });
                i += 1;
            }
            None if b == b')' => {
                tokens.push(Spanned {
                    tok: Tok::RParen,
                    start,
                    end: i + 1,
                });
                i += 1;
            }
            None => i += 1, // skip unknown byte
        }
    }

    tokens
}

struct Parser<'s, 'c, 'a> {
    src: &'s str,
    tokens: &'s [Spanned],
    pos: usize,
    ctx: &'c mut EvalContext<'a>,
}

impl<'s, 'c, 'a> Parser<'s, 'c, 'a> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|s| &s.tok)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(s)) if *s == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// `live == false` means this subtree was short-circuited away: parse it
    /// for structure, evaluate nothing, record no reads.
    fn parse_ternary(&mut self, live: bool) -> i64 {
        let cond = self.parse_or(live);
        if self.eat_op("?") {
            let (then_live, else_live) = if live {
                (cond != 0, cond == 0)
            } else {
                (false, false)
            };
            let then_val = self.parse_ternary(then_live);
            if !self.eat_op(":") {
                self.ctx
                    .diag("bad-expression", "missing ':' in conditional".to_string());
            }
            let else_val = self.parse_ternary(else_live);
            if !live {
                0
            } else if cond != 0 {
                then_val
            } else {
                else_val
            }
        } else {
            cond
        }
    }

    fn parse_or(&mut self, live: bool) -> i64 {
        let mut left = self.parse_and(live);
        while self.eat_op("||") {
            let right = self.parse_and(live && left == 0);
            if live {
                left = (left != 0 || right != 0) as i64;
            }
        }
        left
    }

    fn parse_and(&mut self, live: bool) -> i64 {
        let mut left = self.parse_bitor(live);
        while self.eat_op("&&") {
            let right = self.parse_bitor(live && left != 0);
            if live {
                left = (left != 0 && right != 0) as i64;
            }
        }
        left
    }

    fn parse_bitor(&mut self, live: bool) -> i64 {
        let mut left = self.parse_bitxor(live);
        while self.eat_op("|") {
            let right = self.parse_bitxor(live);
            left |= right;
        }
        left
    }

    fn parse_bitxor(&mut self, live: bool) -> i64 {
        let mut left = self.parse_bitand(live);
        while self.eat_op("^") {
            let right = self.parse_bitand(live);
            left ^= right;
        }
        left
    }

    fn parse_bitand(&mut self, live: bool) -> i64 {
        let mut left = self.parse_equality(live);
        while self.eat_op("&") {
            let right = self.parse_equality(live);
            left &= right;
        }
        left
    }

    fn parse_equality(&mut self, live: bool) -> i64 {
        let mut left = self.parse_relational(live);
        loop {
            if self.eat_op("==") {
                let right = self.parse_relational(live);
                left = (left == right) as i64;
            } else if self.eat_op("!=") {
                let right = self.parse_relational(live);
                left = (left != right) as i64;
            } else {
                break;
            }
        }
        left
    }

    fn parse_relational(&mut self, live: bool) -> i64 {
        let mut left = self.parse_shift(live);
        loop {
            if self.eat_op("<=") {
                let right = self.parse_shift(live);
                left = (left <= right) as i64;
            } else if self.eat_op(">=") {
                let right = self.parse_shift(live);
                left = (left >= right) as i64;
            } else if self.eat_op("<") {
                let right = self.parse_shift(live);
                left = (left < right) as i64;
            } else if self.eat_op(">") {
                let right = self.parse_shift(live);
                left = (left > right) as i64;
            } else {
                break;
            }
        }
        left
    }

    fn parse_shift(&mut self, live: bool) -> i64 {
        let mut left = self.parse_additive(live);
        loop {
            if self.eat_op("<<") {
                let right = self.parse_additive(live);
                left = left.wrapping_shl(right as u32);
            } else if self.eat_op(">>") {
                let right = self.parse_additive(live);
                left = left.wrapping_shr(right as u32);
            } else {
                break;
            }
        }
        left
    }

    fn parse_additive(&mut self, live: bool) -> i64 {
        let mut left = self.parse_multiplicative(live);
        loop {
            if self.eat_op("+") {
                let right = self.parse_multiplicative(live);
                left = left.wrapping_add(right);
            } else if self.eat_op("-") {
                let right = self.parse_multiplicative(live);
                left = left.wrapping_sub(right);
            } else {
                break;
            }
        }
        left
    }

    fn parse_multiplicative(&mut self, live: bool) -> i64 {
        let mut left = self.parse_unary(live);
        loop {
            if self.eat_op("*") {
                let right = self.parse_unary(live);
                left = left.wrapping_mul(right);
            } else if self.eat_op("/") {
                let right = self.parse_unary(live);
                left = self.divide(left, right, live, false);
            } else if self.eat_op("%") {
                let right = self.parse_unary(live);
                left = self.divide(left, right, live, true);
            } else {
                break;
            }
        }
        left
    }

    fn divide(&mut self, left: i64, right: i64, live: bool, rem: bool) -> i64 {
        if !live {
            return 0;
        }
        if right == 0 {
            self.ctx
                .diag("div-by-zero", "division by zero in conditional expression".to_string());
            return 0;
        }
        if left == i64::MIN && right == -1 {
            return if rem { 0 } else { i64::MIN };
        }
        if rem {
            left % right
        } else {
            left / right
        }
    }

    fn parse_unary(&mut self, live: bool) -> i64 {
        if self.eat_op("!") {
            let v = self.parse_unary(live);
            return (v == 0) as i64;
        }
        if self.eat_op("-") {
            return self.parse_unary(live).wrapping_neg();
        }
        if self.eat_op("+") {
            return self.parse_unary(live);
        }
        if self.eat_op("~") {
            return !self.parse_unary(live);
        }
        self.parse_primary(live)
    }

    fn parse_primary(&mut self, live: bool) -> i64 {
        match self.tokens.get(self.pos) {
            Some(Spanned {
                tok: Tok::Num(n), ..
            }) => {
                let n = *n;
                self.pos += 1;
                n
            }
            Some(Spanned {
                tok: Tok::LParen, ..
            }) => {
                self.pos += 1;
                let v = self.parse_ternary(live);
                if !self.eat(&Tok::RParen) {
                    self.ctx
                        .diag("bad-expression", "missing closing parenthesis".to_string());
                }
                v
            }
            Some(Spanned {
                tok: Tok::Defined, ..
            }) => {
                self.pos += 1;
                self.parse_defined(live)
            }
            Some(Spanned {
                tok: Tok::Ident,
                start,
                end,
            }) => {
                let name = &self.src[*start..*end];
                self.pos += 1;
                self.eval_ident(name, live)
            }
            _ => {
                self.ctx
                    .diag("bad-expression", "unexpected end of expression".to_string());
                self.pos += 1;
                0
            }
        }
    }

    fn parse_defined(&mut self, live: bool) -> i64 {
        let parenthesized = self.eat(&Tok::LParen);
        let name = match self.tokens.get(self.pos) {
            Some(Spanned {
                tok: Tok::Ident,
                start,
                end,
            }) => {
                let name = self.src[*start..*end].to_string();
                self.pos += 1;
                Some(name)
            }
            _ => {
                self.ctx
                    .diag("bad-expression", "'defined' without a macro name".to_string());
                None
            }
        };
        if parenthesized && !self.eat(&Tok::RParen) {
            self.ctx
                .diag("bad-expression", "missing ')' after defined".to_string());
        }
        match name {
            Some(name) if live => {
                self.ctx.reads.insert(name.clone());
                self.ctx.state.is_defined(&name) as i64
            }
            _ => 0,
        }
    }

    fn eval_ident(&mut self, name: &str, live: bool) -> i64 {
        let call_args = if self.peek() == Some(&Tok::LParen) {
            Some(self.take_call_arguments())
        } else {
            None
        };
        if !live {
            return 0;
        }
        match name {
            "true" => return 1,
            "false" => return 0,
            _ => {}
        }
        self.ctx.reads.insert(name.to_string());

        match (self.ctx.state.lookup(name).cloned(), call_args) {
            (None, _) => 0,
            (Some(Macro::Object { body }), _) => {
                // A bare `#define NAME` counts as defined-to-1, matching how
                // compilers' -DNAME behaves in conditionals.
                if body.trim().is_empty() {
                    1
                } else {
                    self.eval_body(&body)
                }
            }
            (Some(Macro::Function { params, body }), Some(raw_args)) => {
                let args = split_top_level_commas(&raw_args);
                let substituted = substitute_params(&body, &params, &args);
                self.eval_body(&substituted)
            }
            (Some(Macro::Function { .. }), None) => 0,
        }
    }

    /// Consume `( ... )` starting at the current LParen and return the raw
    /// source text between the parentheses.
    fn take_call_arguments(&mut self) -> String {
        let inner_start = self.tokens[self.pos].end;
        self.pos += 1;
        let mut depth = 1;
        let mut inner_end = self.src.len();
        while let Some(spanned) = self.tokens.get(self.pos) {
            match spanned.tok {
                Tok::LParen => depth += 1,
                Tok::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        inner_end = spanned.start;
                        self.pos += 1;
                        break;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        self.src[inner_start..inner_end.max(inner_start)].to_string()
    }

    fn eval_body(&mut self, body: &str) -> i64 {
        if self.ctx.depth >= MAX_EXPANSION_DEPTH {
            self.ctx.diag(
                "macro-depth",
                format!("macro expansion deeper than {MAX_EXPANSION_DEPTH} levels"),
            );
            return 0;
        }
        let tokens = tokenize(body);
        if tokens.is_empty() {
            return 0;
        }
        self.ctx.depth += 1;
        let mut inner = Parser {
            src: body,
            tokens: &tokens,
            pos: 0,
            ctx: self.ctx,
        };
        let value = inner.parse_ternary(true);
        self.ctx.depth -= 1;
        value
    }
}

fn split_top_level_commas(src: &str) -> Vec<String> {
    let bytes = src.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(src[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = src[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    args
}

/// Identifier-boundary parameter substitution; no `#`/`##` handling. The
/// analyzer never needs more than value-level expansion in conditionals.
fn substitute_params(body: &str, params: &[String], args: &[String]) -> String {
    let bytes = body.as_bytes();
    let mut out = String::with_capacity(body.len());
    let mut i = 0;
    while i < bytes.len() {
        if is_ident_start(bytes[i]) {
            let start = i;
            while i < bytes.len() && is_ident_cont(bytes[i]) {
                i += 1;
            }
            let ident = &body[start..i];
            match params.iter().position(|p| p == ident) {
                Some(idx) => out.push_str(args.get(idx).map(|s| s.as_str()).unwrap_or("0")),
                None => out.push_str(ident),
            }
        } else {
            let ch = body[i..].chars().next().unwrap_or(' ');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn eval(expr: &str, state: &MacroState) -> (i64, BTreeSet<String>, Vec<Diagnostic>) {
        let mut reads = BTreeSet::new();
        let mut diags = Vec::new();
        let path = PathBuf::from("/test/expr.hpp");
        let mut ctx = EvalContext::new(state, &mut reads, &mut diags, &path, 1);
        let value = eval_expression(expr, &mut ctx);
        (value, reads, diags)
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let state = MacroState::empty();
        assert_eq!(eval("1 + 2 * 3", &state).0, 7);
        assert_eq!(eval("(1 + 2) * 3", &state).0, 9);
        assert_eq!(eval("10 % 4", &state).0, 2);
        assert_eq!(eval("1 << 4", &state).0, 16);
        assert_eq!(eval("0xff & 0x0f", &state).0, 0x0f);
        assert_eq!(eval("1 ? 10 : 20", &state).0, 10);
        assert_eq!(eval("0 ? 10 : 20", &state).0, 20);
        assert_eq!(eval("'A'", &state).0, 65);
        assert_eq!(eval("~0", &state).0, -1);
        assert_eq!(eval("0b101", &state).0, 5);
        assert_eq!(eval("010", &state).0, 8);
        assert_eq!(eval("100UL", &state).0, 100);
    }

    #[test]
    fn test_undefined_identifier_is_zero() {
        let state = MacroState::empty();
        let (value, reads, _) = eval("MISSING + 1", &state);
        assert_eq!(value, 1);
        assert!(reads.contains("MISSING"));
    }

    #[test]
    fn test_macro_body_evaluates_recursively() {
        let mut state = MacroState::empty();
        state.define("INNER".to_string(), Macro::object("3"));
        state.define("OUTER".to_string(), Macro::object("INNER + 1"));
        let (value, reads, _) = eval("OUTER * 2", &state);
        assert_eq!(value, 8);
        assert!(reads.contains("OUTER"));
        assert!(reads.contains("INNER"));
    }

    #[test]
    fn test_defined_operator() {
        let mut state = MacroState::empty();
        state.define("HAVE_IT".to_string(), Macro::object("1"));
        assert_eq!(eval("defined(HAVE_IT)", &state).0, 1);
        assert_eq!(eval("defined HAVE_IT", &state).0, 1);
        assert_eq!(eval("defined(MISSING)", &state).0, 0);
        assert_eq!(eval("!defined(MISSING)", &state).0, 1);
    }

    #[test]
    fn test_short_circuit_keeps_reads_minimal() {
        let state = MacroState::empty();
        let (value, reads, _) = eval("defined(A) && (B + 1)", &state);
        assert_eq!(value, 0);
        assert!(reads.contains("A"));
        assert!(!reads.contains("B"));

        let (value, reads, _) = eval("1 || OTHER", &state);
        assert_eq!(value, 1);
        assert!(!reads.contains("OTHER"));

        let (_, reads, _) = eval("1 ? 2 : DORMANT", &state);
        assert!(!reads.contains("DORMANT"));
    }

    #[test]
    fn test_short_circuit_evaluates_live_side() {
        let mut state = MacroState::empty();
        state.define("A".to_string(), Macro::object("1"));
        state.define("B".to_string(), Macro::object("5"));
        let (value, reads, _) = eval("defined(A) && (B + 1)", &state);
        assert_eq!(value, 1);
        assert!(reads.contains("A"));
        assert!(reads.contains("B"));
    }

    #[test]
    fn test_division_by_zero_yields_zero_with_diagnostic() {
        let state = MacroState::empty();
        let (value, _, diags) = eval("1 / 0", &state);
        assert_eq!(value, 0);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].tag, "div-by-zero");

        // A dormant division must not report anything.
        let (_, _, diags) = eval("0 && (1 / 0)", &state);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_function_like_macro_call() {
        let mut state = MacroState::empty();
        state.define(
            "ADD".to_string(),
            Macro::Function {
                params: vec!["a".to_string(), "b".to_string()],
                body: "((a) + (b))".to_string(),
            },
        );
        let (value, reads, _) = eval("ADD(2, 3) == 5", &state);
        assert_eq!(value, 1);
        assert!(reads.contains("ADD"));
    }

    #[test]
    fn test_expansion_depth_is_bounded() {
        let mut state = MacroState::empty();
        state.define("LOOP".to_string(), Macro::object("LOOP + 1"));
        let (_, _, diags) = eval("LOOP", &state);
        assert!(diags.iter().any(|d| d.tag == "macro-depth"));
    }

    #[test]
    fn test_valueless_define_reads_as_one() {
        let mut state = MacroState::empty();
        state.define("FLAG".to_string(), Macro::object(""));
        assert_eq!(eval("FLAG", &state).0, 1);
    }

    #[test]
    fn test_expand_macros_text_for_computed_include() {
        let mut state = MacroState::empty();
        state.define(
            "PLATFORM_HEADER".to_string(),
            Macro::object("\"linux/cfg.h\""),
        );
        let mut reads = BTreeSet::new();
        let mut diags = Vec::new();
        let path = PathBuf::from("/test/a.cpp");
        let mut ctx = EvalContext::new(&state, &mut reads, &mut diags, &path, 1);
        let expanded = expand_macros_text("PLATFORM_HEADER", &mut ctx);
        assert_eq!(expanded, "\"linux/cfg.h\"");
        assert!(reads.contains("PLATFORM_HEADER"));
    }
}
