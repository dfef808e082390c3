//! Simple preprocessor: walks the analyzer's directive stream with a stack
//! of conditional frames, applies `#define`/`#undef` to the macro state,
//! resolves includes (computed ones too), and emits the active line set.
//! The output is a [`CacheValue`]: everything the cache needs to replay the
//! run without touching the file again.

use crate::analyzer::{AnalysisResult, DirectiveKind};
use crate::content::FileContent;
use crate::diagnostics::Diagnostic;
use crate::eval::{eval_expression, EvalContext};
use crate::macros::{is_ident_cont, DefineOp, Macro, MacroState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeKind {
    Quoted,
    Angled,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeRecord {
    pub kind: IncludeKind,
    /// Header name as written (or as computed), without quotes/brackets.
    pub spec: String,
    /// None when the resolver could not find the header.
    pub resolved: Option<PathBuf>,
    /// 0-based line of the directive.
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicRecord {
    pub key: String,
    pub value: String,
    pub line: u32,
}

/// Complete result of preprocessing one file against one macro state.
/// Immutable once stored; shared by both cache tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheValue {
    /// 0-based lines whose body survives conditional compilation.
    pub active_lines: Vec<u32>,
    pub active_includes: Vec<IncludeRecord>,
    pub active_magic: Vec<MagicRecord>,
    /// Net effect on the macro state, in execution order along the active
    /// path. Replaying this against the input state reproduces the
    /// post-state exactly, `#undef`s included.
    pub defines_delta: Vec<DefineOp>,
    /// Macro names the conditional evaluation actually consulted.
    pub read_set: BTreeSet<String>,
    pub pragma_once: bool,
    pub include_guard: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Callback used to turn an include spec into a path. The walker supplies
/// one that knows the search-path rules; tests can supply stubs.
pub trait IncludeResolver {
    fn resolve(&self, kind: IncludeKind, spec: &str, including_file: &Path) -> Option<PathBuf>;
}

/// A resolver that never finds anything; useful when only the active-line
/// structure of a single file is wanted.
pub struct NullResolver;

impl IncludeResolver for NullResolver {
    fn resolve(&self, _: IncludeKind, _: &str, _: &Path) -> Option<PathBuf> {
        None
    }
}

struct Frame {
    parent_active: bool,
    branch_active: bool,
    any_branch_taken: bool,
    seen_else: bool,
}

impl Frame {
    fn active(&self) -> bool {
        self.parent_active && self.branch_active
    }
}

/// Run the preprocessor over one analyzed file. `state` is updated in place
/// to the post-state; the same mutations are recorded in the returned delta.
pub fn preprocess(
    content: &FileContent,
    analysis: &AnalysisResult,
    state: &mut MacroState,
    resolver: &dyn IncludeResolver,
) -> CacheValue {
    let mut out = CacheValue {
        pragma_once: analysis.pragma_once,
        include_guard: analysis.include_guard.clone(),
        diagnostics: analysis.diagnostics.clone(),
        ..Default::default()
    };
    let mut stack: Vec<Frame> = Vec::new();
    let mut reads: BTreeSet<String> = BTreeSet::new();

    let mut directive_iter = analysis.directives.iter().peekable();
    let mut line: u32 = 0;
    while line < analysis.line_count {
        while matches!(directive_iter.peek(), Some(d) if d.line < line) {
            directive_iter.next();
        }
        let directive = match directive_iter.peek() {
            Some(d) if d.line == line => Some(*d),
            _ => None,
        };
        let Some(directive) = directive else {
            if active(&stack) {
                out.active_lines.push(line);
            }
            line += 1;
            continue;
        };
        directive_iter.next();

        let currently_active = active(&stack);
        match directive.kind {
            DirectiveKind::If => {
                let value = if currently_active {
                    eval_directive_expr(&directive.payload, content, directive.line, state, &mut reads, &mut out)
                } else {
                    0
                };
                stack.push(Frame {
                    parent_active: currently_active,
                    branch_active: value != 0,
                    any_branch_taken: value != 0,
                    seen_else: false,
                });
            }
            DirectiveKind::Ifdef | DirectiveKind::Ifndef => {
                let name = first_ident(&directive.payload);
                let mut defined = false;
                if currently_active {
                    if name.is_empty() {
                        out.diagnostics.push(Diagnostic::new(
                            &content.path,
                            directive.line + 1,
                            "bad-expression",
                            "conditional directive without a macro name",
                        ));
                    } else {
                        reads.insert(name.clone());
                        defined = state.is_defined(&name);
                    }
                }
                let taken = if directive.kind == DirectiveKind::Ifdef {
                    defined
                } else {
                    !name.is_empty() && !defined
                };
                stack.push(Frame {
                    parent_active: currently_active,
                    branch_active: taken,
                    any_branch_taken: taken,
                    seen_else: false,
                });
            }
            DirectiveKind::Elif => match stack.last_mut() {
                Some(frame) => {
                    if frame.seen_else {
                        out.diagnostics.push(Diagnostic::new(
                            &content.path,
                            directive.line + 1,
                            "conditional-stack",
                            "#elif after #else",
                        ));
                        frame.branch_active = false;
                    } else if frame.any_branch_taken || !frame.parent_active {
                        frame.branch_active = false;
                    } else {
                        let value = eval_directive_expr(
                            &directive.payload,
                            content,
                            directive.line,
                            state,
                            &mut reads,
                            &mut out,
                        );
                        frame.branch_active = value != 0;
                        frame.any_branch_taken = value != 0;
                    }
                }
                None => out.diagnostics.push(Diagnostic::new(
                    &content.path,
                    directive.line + 1,
                    "conditional-stack",
                    "#elif without matching #if",
                )),
            },
            DirectiveKind::Else => match stack.last_mut() {
                Some(frame) => {
                    if frame.seen_else {
                        out.diagnostics.push(Diagnostic::new(
                            &content.path,
                            directive.line + 1,
                            "conditional-stack",
                            "duplicate #else",
                        ));
                        frame.branch_active = false;
                    } else {
                        frame.seen_else = true;
                        frame.branch_active = frame.parent_active && !frame.any_branch_taken;
                        frame.any_branch_taken |= frame.branch_active;
                    }
                }
                None => out.diagnostics.push(Diagnostic::new(
                    &content.path,
                    directive.line + 1,
                    "conditional-stack",
                    "#else without matching #if",
                )),
            },
            DirectiveKind::Endif => {
                if stack.pop().is_none() {
                    out.diagnostics.push(Diagnostic::new(
                        &content.path,
                        directive.line + 1,
                        "conditional-stack",
                        "#endif without matching #if",
                    ));
                }
            }
            DirectiveKind::Define => {
                if currently_active {
                    match Macro::parse_define(&directive.payload) {
                        Some((name, def)) => {
                            state.define(name.clone(), def.clone());
                            out.defines_delta.push(DefineOp::Define { name, def });
                        }
                        None => out.diagnostics.push(Diagnostic::new(
                            &content.path,
                            directive.line + 1,
                            "bad-define",
                            format!("cannot parse '#define {}'", directive.payload),
                        )),
                    }
                    mark_active(&mut out, directive.line, directive.continuation_lines, analysis);
                }
            }
            DirectiveKind::Undef => {
                if currently_active {
                    let name = first_ident(&directive.payload);
                    if !name.is_empty() {
                        state.undef(&name);
                        out.defines_delta.push(DefineOp::Undef { name });
                    }
                    mark_active(&mut out, directive.line, directive.continuation_lines, analysis);
                }
            }
            DirectiveKind::Include => {
                if currently_active {
                    let (kind, spec) = parse_header_name(&directive.payload);
                    match spec {
                        Some(spec) => {
                            let resolved = resolver.resolve(kind, &spec, &content.path);
                            out.active_includes.push(IncludeRecord {
                                kind,
                                spec,
                                resolved,
                                line: directive.line,
                            });
                        }
                        None => out.diagnostics.push(Diagnostic::new(
                            &content.path,
                            directive.line + 1,
                            "bad-include",
                            format!("cannot parse include '{}'", directive.payload),
                        )),
                    }
                    mark_active(&mut out, directive.line, directive.continuation_lines, analysis);
                }
            }
            DirectiveKind::IncludeComputed => {
                // Stored with the raw payload: the macros it mentions may be
                // defined by headers included earlier in the traversal, so
                // the walker expands it against the walk state every time.
                // Keeping the expansion out of here keeps this entry a pure
                // function of (content, input state restricted to read set).
                if currently_active {
                    out.active_includes.push(IncludeRecord {
                        kind: IncludeKind::Computed,
                        spec: directive.payload.clone(),
                        resolved: None,
                        line: directive.line,
                    });
                    mark_active(&mut out, directive.line, directive.continuation_lines, analysis);
                }
            }
            DirectiveKind::PragmaOnce | DirectiveKind::Other => {
                // Unknown directives pass through untouched.
                if currently_active {
                    mark_active(&mut out, directive.line, directive.continuation_lines, analysis);
                }
            }
        }

        line += directive.continuation_lines + 1;
    }

    if !stack.is_empty() {
        out.diagnostics.push(Diagnostic::new(
            &content.path,
            analysis.line_count,
            "conditional-stack",
            format!("{} conditional block(s) left open at end of file", stack.len()),
        ));
    }

    // Magic tokens only count when their line survived.
    let active_set: BTreeSet<u32> = out.active_lines.iter().copied().collect();
    for token in &analysis.magic_tokens {
        if active_set.contains(&token.line) {
            out.active_magic.push(MagicRecord {
                key: token.key.clone(),
                value: token.value.clone(),
                line: token.line,
            });
        }
    }

    out.read_set = reads;
    out
}

fn active(stack: &[Frame]) -> bool {
    stack.last().map(|f| f.active()).unwrap_or(true)
}

fn mark_active(out: &mut CacheValue, line: u32, continuations: u32, analysis: &AnalysisResult) {
    for l in line..=(line + continuations).min(analysis.line_count.saturating_sub(1)) {
        out.active_lines.push(l);
    }
}

fn eval_directive_expr(
    payload: &str,
    content: &FileContent,
    line: u32,
    state: &MacroState,
    reads: &mut BTreeSet<String>,
    out: &mut CacheValue,
) -> i64 {
    let mut diags = Vec::new();
    let mut ctx = EvalContext::new(state, reads, &mut diags, &content.path, line + 1);
    let value = eval_expression(payload, &mut ctx);
    out.diagnostics.append(&mut diags);
    value
}

fn first_ident(payload: &str) -> String {
    payload
        .trim()
        .bytes()
        .take_while(|&b| is_ident_cont(b))
        .map(|b| b as char)
        .collect()
}

/// Parse `"name"` or `<name>` out of an include payload.
pub fn parse_header_name(payload: &str) -> (IncludeKind, Option<String>) {
    let payload = payload.trim();
    if let Some(rest) = payload.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return (IncludeKind::Quoted, Some(rest[..end].trim().to_string()));
        }
        return (IncludeKind::Quoted, None);
    }
    if let Some(rest) = payload.strip_prefix('<') {
        if let Some(end) = rest.find('>') {
            return (IncludeKind::Angled, Some(rest[..end].trim().to_string()));
        }
        return (IncludeKind::Angled, None);
    }
    (IncludeKind::Computed, None)
}
