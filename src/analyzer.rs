//! Single-pass file analyzer. One forward scan over the bytes produces the
//! directive list, magic-flag tokens, comment spans, and the macro read/write
//! sets. The result depends only on the file content, so it is cacheable by
//! content hash alone; all macro-sensitive interpretation happens later in
//! the preprocessor.

use crate::content::{find_any_byte, ContentHash, FileContent};
use crate::diagnostics::Diagnostic;
use crate::macros::{is_ident_cont, is_ident_start, Macro};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Include,
    IncludeComputed,
    Define,
    Undef,
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
    Endif,
    PragmaOnce,
    Other,
}

#[derive(Debug, Clone)]
pub struct Directive {
    /// 0-based physical line of the `#`.
    pub line: u32,
    pub kind: DirectiveKind,
    /// Joined logical payload after the directive name, comments stripped.
    pub payload: String,
    /// Physical lines consumed beyond the first (backslash continuations).
    pub continuation_lines: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicToken {
    pub line: u32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    pub directives: Vec<Directive>,
    pub magic_tokens: Vec<MagicToken>,
    /// Byte intervals to be ignored by later text lookups.
    pub comment_spans: Vec<(u32, u32)>,
    /// Names appearing in conditional expressions and computed includes.
    pub referenced_macros: BTreeSet<String>,
    /// Names a `#define` or `#undef` appears for.
    pub defined_macros: BTreeSet<String>,
    pub include_guard: Option<String>,
    pub pragma_once: bool,
    pub has_conditionals: bool,
    pub line_count: u32,
    pub diagnostics: Vec<Diagnostic>,
}

/// Memoizes analysis results by content hash. Analysis depends only on the
/// bytes, so entries never invalidate within a run.
#[derive(Default)]
pub struct AnalysisStore {
    map: Mutex<HashMap<ContentHash, Arc<AnalysisResult>>>,
}

impl AnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analysis_of(&self, content: &FileContent) -> Arc<AnalysisResult> {
        if let Some(found) = self.map.lock().get(&content.hash) {
            return Arc::clone(found);
        }
        let computed = Arc::new(analyze(content));
        Arc::clone(
            self.map
                .lock()
                .entry(content.hash)
                .or_insert(computed),
        )
    }
}

pub fn analyze(content: &FileContent) -> AnalysisResult {
    let bytes = &content.bytes;
    let line_count = content.lines.line_count();
    let mut result = AnalysisResult {
        line_count,
        ..Default::default()
    };

    let mut in_block_comment = false;
    let mut block_start: u32 = 0;
    let mut line: u32 = 0;

    while line < line_count {
        let (ls, mut le) = content.lines.line_span(line, bytes.len());
        // Windows line endings leave a trailing \r inside the span.
        if le > ls && bytes[le - 1] == b'\r' {
            le -= 1;
        }
        let mut p = ls;

        if in_block_comment {
            match find_close_comment(&bytes[p..le]) {
                Some(rel) => {
                    result.comment_spans.push((block_start, (p + rel + 2) as u32));
                    in_block_comment = false;
                    p += rel + 2;
                }
                None => {
                    line += 1;
                    continue;
                }
            }
        }

        while p < le && (bytes[p] == b' ' || bytes[p] == b'\t') {
            p += 1;
        }

        if p < le && bytes[p] == b'#' {
            let consumed = scan_directive(content, bytes, line, p, le, &mut result);
            line += consumed;
            continue;
        }

        if p + 1 < le && bytes[p] == b'/' && bytes[p + 1] == b'/' {
            result.comment_spans.push((p as u32, le as u32));
            if p + 2 < le && bytes[p + 2] == b'#' {
                scan_magic(bytes, line, p + 3, le, &mut result);
            }
            line += 1;
            continue;
        }

        // Plain code line: only literals and comment starts matter here.
        while p < le {
            match bytes[p] {
                b'"' | b'\'' => {
                    let quote = bytes[p];
                    match skip_literal(&bytes[p + 1..le], quote) {
                        Some(rel) => p += rel + 2,
                        None => {
                            if quote == b'"' {
                                result.diagnostics.push(Diagnostic::new(
                                    &content.path,
                                    line + 1,
                                    "unterminated-string",
                                    "string literal not closed before end of line",
                                ));
                            }
                            p = le;
                        }
                    }
                }
                b'/' if p + 1 < le && bytes[p + 1] == b'/' => {
                    result.comment_spans.push((p as u32, le as u32));
                    p = le;
                }
                b'/' if p + 1 < le && bytes[p + 1] == b'*' => {
                    match find_close_comment(&bytes[p + 2..le]) {
                        Some(rel) => {
                            result.comment_spans.push((p as u32, (p + rel + 4) as u32));
                            p += rel + 4;
                        }
                        None => {
                            in_block_comment = true;
                            block_start = p as u32;
                            p = le;
                        }
                    }
                }
                _ => match find_any_byte(&bytes[p..le], &[b'"', b'\'', b'/']) {
                    Some(rel) => p += rel.max(1),
                    None => p = le,
                },
            }
        }
        line += 1;
    }

    if in_block_comment {
        result.comment_spans.push((block_start, bytes.len() as u32));
        result.diagnostics.push(Diagnostic::new(
            &content.path,
            content.lines.line_of(block_start) + 1,
            "unterminated-comment",
            "block comment reaches end of file",
        ));
    }

    result.include_guard = detect_include_guard(&result.directives);
    result.pragma_once = result
        .directives
        .iter()
        .any(|d| d.kind == DirectiveKind::PragmaOnce);
    // Computed includes do not count: their expansion is replayed by the
    // walker on every traversal, so the cached entry stays state-free.
    result.has_conditionals = result.directives.iter().any(|d| {
        matches!(
            d.kind,
            DirectiveKind::If | DirectiveKind::Ifdef | DirectiveKind::Ifndef | DirectiveKind::Elif
        )
    });

    result
}

/// Consume a directive starting at `hash_pos`, joining continuation lines.
/// Returns the number of physical lines consumed.
fn scan_directive(
    content: &FileContent,
    bytes: &[u8],
    first_line: u32,
    hash_pos: usize,
    first_le: usize,
    result: &mut AnalysisResult,
) -> u32 {
    let mut logical = String::new();
    let mut continuations: u32 = 0;
    let mut le = first_le;
    let mut start = hash_pos;

    loop {
        let text = std::str::from_utf8(&bytes[start..le]).unwrap_or("");
        let trimmed = text.trim_end();
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            logical.push_str(stripped.trim_end());
            logical.push(' ');
            let next = first_line + continuations + 1;
            if next >= content.lines.line_count() {
                break;
            }
            continuations += 1;
            let (nls, mut nle) = content.lines.line_span(next, bytes.len());
            if nle > nls && bytes[nle - 1] == b'\r' {
                nle -= 1;
            }
            start = nls;
            le = nle;
        } else {
            logical.push_str(trimmed);
            break;
        }
    }

    // Past the '#', allowing the `#  include` spelling.
    let body = logical[1..].trim_start();
    let name_len = body
        .bytes()
        .take_while(|&b| b.is_ascii_alphabetic())
        .count();
    let name = &body[..name_len];
    let payload = strip_directive_comments(body[name_len..].trim());

    let kind = match name {
        "include" => {
            if payload.starts_with('"') || payload.starts_with('<') {
                DirectiveKind::Include
            } else {
                collect_identifiers(&payload, &mut result.referenced_macros);
                DirectiveKind::IncludeComputed
            }
        }
        "define" => {
            if let Some((macro_name, _)) = Macro::parse_define(&payload) {
                result.defined_macros.insert(macro_name);
            }
            DirectiveKind::Define
        }
        "undef" => {
            let macro_name = payload.split_whitespace().next().unwrap_or("");
            if !macro_name.is_empty() {
                result.defined_macros.insert(macro_name.to_string());
            }
            DirectiveKind::Undef
        }
        "if" => {
            collect_identifiers(&payload, &mut result.referenced_macros);
            DirectiveKind::If
        }
        "elif" => {
            collect_identifiers(&payload, &mut result.referenced_macros);
            DirectiveKind::Elif
        }
        "ifdef" => {
            insert_first_identifier(&payload, &mut result.referenced_macros);
            DirectiveKind::Ifdef
        }
        "ifndef" => {
            insert_first_identifier(&payload, &mut result.referenced_macros);
            DirectiveKind::Ifndef
        }
        "else" => DirectiveKind::Else,
        "endif" => DirectiveKind::Endif,
        "pragma" => {
            if payload.trim() == "once" {
                DirectiveKind::PragmaOnce
            } else {
                DirectiveKind::Other
            }
        }
        _ => DirectiveKind::Other,
    };

    result.directives.push(Directive {
        line: first_line,
        kind,
        payload,
        continuation_lines: continuations,
    });

    continuations + 1
}

/// Parse `KEY=value` after a leading `//#`. Anything without an `=` is an
/// ordinary comment, not an annotation.
fn scan_magic(bytes: &[u8], line: u32, start: usize, le: usize, result: &mut AnalysisResult) {
    let text = match std::str::from_utf8(&bytes[start..le]) {
        Ok(t) => t,
        Err(_) => return,
    };
    if let Some((key, value)) = text.split_once('=') {
        let key = key.trim();
        if !key.is_empty() && !key.contains(char::is_whitespace) {
            result.magic_tokens.push(MagicToken {
                line,
                key: key.to_string(),
                value: value.trim().to_string(),
            });
        }
    }
}

/// Strip `//` and `/* */` comments from a directive payload, respecting
/// string literals (so `#define URL "http://x"` keeps its slashes).
fn strip_directive_comments(payload: &str) -> String {
    let bytes = payload.as_bytes();
    let mut out = String::with_capacity(payload.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                let end = skip_literal(&bytes[i + 1..], quote)
                    .map(|rel| i + rel + 2)
                    .unwrap_or(bytes.len());
                out.push_str(&payload[i..end]);
                i = end;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => break,
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                match find_close_comment(&bytes[i + 2..]) {
                    Some(rel) => {
                        out.push(' ');
                        i += rel + 4;
                    }
                    None => break,
                }
            }
            _ => {
                let ch = payload[i..].chars().next().unwrap_or(' ');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out.trim().to_string()
}

/// Position just past the opening of `*/` within `haystack`, if present.
fn find_close_comment(haystack: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = crate::content::find_byte(&haystack[from..], b'*') {
        let pos = from + rel;
        if haystack.get(pos + 1) == Some(&b'/') {
            return Some(pos);
        }
        from = pos + 1;
    }
    None
}

/// Length of a string/char literal body (excluding quotes), honoring `\`
/// escapes. `None` when the literal does not close.
fn skip_literal(haystack: &[u8], quote: u8) -> Option<usize> {
    let mut i = 0;
    while i < haystack.len() {
        match haystack[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn collect_identifiers(expr: &str, into: &mut BTreeSet<String>) {
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if is_ident_start(bytes[i]) {
            let start = i;
            while i < bytes.len() && is_ident_cont(bytes[i]) {
                i += 1;
            }
            let ident = &expr[start..i];
            if ident != "defined" {
                into.insert(ident.to_string());
            }
        } else if bytes[i].is_ascii_digit() {
            // Skip pp-numbers whole so suffixes like 10UL stay out.
            while i < bytes.len() && (is_ident_cont(bytes[i]) || bytes[i] == b'.') {
                i += 1;
            }
        } else {
            i += 1;
        }
    }
}

fn insert_first_identifier(payload: &str, into: &mut BTreeSet<String>) {
    let name: String = payload
        .trim()
        .bytes()
        .take_while(|&b| is_ident_cont(b))
        .map(|b| b as char)
        .collect();
    if !name.is_empty() {
        into.insert(name);
    }
}

/// Traditional include guard: the file opens with `#ifndef G` + `#define G`
/// and the matching `#endif` is the final directive.
fn detect_include_guard(directives: &[Directive]) -> Option<String> {
    let first = directives.first()?;
    if first.kind != DirectiveKind::Ifndef {
        return None;
    }
    let guard: String = first
        .payload
        .trim()
        .bytes()
        .take_while(|&b| is_ident_cont(b))
        .map(|b| b as char)
        .collect();
    if guard.is_empty() {
        return None;
    }
    let second = directives.get(1)?;
    if second.kind != DirectiveKind::Define {
        return None;
    }
    match Macro::parse_define(&second.payload) {
        Some((name, _)) if name == guard => {}
        _ => return None,
    }

    let mut depth = 1i32;
    for (i, d) in directives.iter().enumerate().skip(2) {
        match d.kind {
            DirectiveKind::If | DirectiveKind::Ifdef | DirectiveKind::Ifndef => depth += 1,
            DirectiveKind::Endif => {
                depth -= 1;
                if depth == 0 {
                    return if i == directives.len() - 1 {
                        Some(guard)
                    } else {
                        None
                    };
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentHash, LineIndex};
    use std::path::PathBuf;

    fn fixture(text: &str) -> FileContent {
        let bytes = text.as_bytes().to_vec();
        FileContent {
            path: PathBuf::from("/test/fixture.hpp"),
            hash: ContentHash::of_bytes(&bytes),
            lines: LineIndex::build(&bytes),
            bytes,
        }
    }

    #[test]
    fn test_detects_directives_and_magic() {
        let content = fixture(
            "#ifndef FIXTURE_HPP\n\
             #define FIXTURE_HPP\n\
             //#CXXFLAGS=-std=c++17\n\
             #include \"dep.hpp\"\n\
             #include <vector>\n\
             int x;\n\
             #endif\n",
        );
        let a = analyze(&content);
        assert_eq!(a.directives.len(), 5);
        assert_eq!(a.directives[2].kind, DirectiveKind::Include);
        assert_eq!(a.magic_tokens.len(), 1);
        assert_eq!(a.magic_tokens[0].key, "CXXFLAGS");
        assert_eq!(a.magic_tokens[0].value, "-std=c++17");
        assert_eq!(a.include_guard.as_deref(), Some("FIXTURE_HPP"));
        assert!(a.has_conditionals);
    }

    #[test]
    fn test_computed_include_references_macros() {
        let content = fixture("#include PLATFORM_HEADER\n");
        let a = analyze(&content);
        assert_eq!(a.directives[0].kind, DirectiveKind::IncludeComputed);
        assert!(a.referenced_macros.contains("PLATFORM_HEADER"));
        // The expansion is walk-time work, so this file is still eligible
        // for the invariant cache tier.
        assert!(!a.has_conditionals);
    }

    #[test]
    fn test_commented_include_is_ignored() {
        let content = fixture(
            "// #include \"not_this.hpp\"\n\
             /* #include \"nor_this.hpp\" */\n\
             #include \"this.hpp\"\n",
        );
        let a = analyze(&content);
        assert_eq!(a.directives.len(), 1);
        assert!(a.directives[0].payload.contains("this.hpp"));
        assert_eq!(a.comment_spans.len(), 2);
    }

    #[test]
    fn test_magic_inside_string_is_ignored() {
        let content = fixture("const char* s = \"//#CXXFLAGS=-Onope\";\n");
        let a = analyze(&content);
        assert!(a.magic_tokens.is_empty());
    }

    #[test]
    fn test_line_continuation_joins_directive() {
        let content = fixture("#define LONG_MACRO \\\n    42\nint y;\n");
        let a = analyze(&content);
        assert_eq!(a.directives.len(), 1);
        assert_eq!(a.directives[0].continuation_lines, 1);
        assert!(a.directives[0].payload.contains("42"));
        assert!(a.defined_macros.contains("LONG_MACRO"));
    }

    #[test]
    fn test_read_and_write_sets() {
        let content = fixture(
            "#if defined(A) && B > 2\n\
             #define C 1\n\
             #elif D\n\
             #undef E\n\
             #endif\n",
        );
        let a = analyze(&content);
        let referenced: Vec<&str> = a.referenced_macros.iter().map(|s| s.as_str()).collect();
        assert_eq!(referenced, vec!["A", "B", "D"]);
        let defined: Vec<&str> = a.defined_macros.iter().map(|s| s.as_str()).collect();
        assert_eq!(defined, vec!["C", "E"]);
    }

    #[test]
    fn test_unterminated_block_comment_diagnostic() {
        let content = fixture("int x;\n/* never closed\nint y;\n");
        let a = analyze(&content);
        assert_eq!(a.diagnostics.len(), 1);
        assert_eq!(a.diagnostics[0].tag, "unterminated-comment");
        assert_eq!(a.diagnostics[0].line, 2);
    }

    #[test]
    fn test_pragma_once() {
        let content = fixture("#pragma once\n#include \"x.hpp\"\n");
        let a = analyze(&content);
        assert!(a.pragma_once);
        assert_eq!(a.directives[0].kind, DirectiveKind::PragmaOnce);
    }

    #[test]
    fn test_guard_rejected_when_code_follows_endif() {
        let content = fixture(
            "#ifndef G_H\n\
             #define G_H\n\
             #endif\n\
             #ifdef OTHER\n\
             #endif\n",
        );
        let a = analyze(&content);
        assert_eq!(a.include_guard, None);
    }
}
