//! Header-dependency walker. Deeply inspects a translation unit to find the
//! headers it pulls in, the extra sources those imply, and the magic flags
//! the whole closure carries.
//!
//! The walk is a pre-order DFS: a file's directives are evaluated against
//! the macro state accumulated so far, its defines are applied, and then its
//! active includes are visited in source order with the evolving state. That
//! ordering is what makes `#undef` in one header visible to every header
//! included after it.

use crate::analyzer::AnalysisStore;
use crate::cache::PreprocessCache;
use crate::config::{implied_source, is_header};
use crate::content::{ContentHash, ContentRegistry, FileContent};
use crate::diagnostics::Diagnostic;
use crate::eval::{expand_macros_text, EvalContext};
use crate::macros::MacroState;
use crate::magic::{MagicFlags, MagicKind};
use crate::preprocessor::{parse_header_name, IncludeKind, IncludeResolver};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Guard-less include cycles and pathological chains abort here.
const MAX_INCLUDE_DEPTH: u32 = 256;

/// An include that could not be found in the search paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedInclude {
    pub spec: String,
    pub from: PathBuf,
    /// 1-based.
    pub line: u32,
}

/// Result of `closure()`: everything reachable from one seed file.
#[derive(Debug, Default)]
pub struct Closure {
    /// Reached files in traversal order, seed first.
    pub files: Vec<PathBuf>,
    pub magic: MagicFlags,
    /// Implementation files discovered from headers plus `SOURCE=` extras.
    pub implied_sources: Vec<PathBuf>,
    pub unresolved: Vec<UnresolvedInclude>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Search-path resolver. Quoted includes try the including file's directory
/// first and then the include dirs; angled includes skip the source-relative
/// probe. `INCLUDE=` magic appends dirs mid-walk.
pub struct SearchPath {
    dirs: Vec<PathBuf>,
    extra: RefCell<Vec<PathBuf>>,
    probes: RefCell<HashMap<(PathBuf, String), Option<PathBuf>>>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            extra: RefCell::new(Vec::new()),
            probes: RefCell::new(HashMap::new()),
        }
    }

    pub fn add_dir(&self, dir: PathBuf) {
        self.extra.borrow_mut().push(dir);
    }

    fn probe(&self, dir: &Path, spec: &str) -> Option<PathBuf> {
        let candidate = dir.join(spec);
        if candidate.is_file() {
            std::fs::canonicalize(&candidate).ok().or(Some(candidate))
        } else {
            None
        }
    }
}

impl IncludeResolver for SearchPath {
    fn resolve(&self, kind: IncludeKind, spec: &str, including_file: &Path) -> Option<PathBuf> {
        let cwd = including_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let key = (cwd.clone(), format!("{kind:?}:{spec}"));
        if let Some(cached) = self.probes.borrow().get(&key) {
            return cached.clone();
        }

        let mut found = None;
        if !matches!(kind, IncludeKind::Angled) {
            found = self.probe(&cwd, spec);
        }
        if found.is_none() {
            for dir in self.dirs.iter().chain(self.extra.borrow().iter()) {
                if let Some(path) = self.probe(dir, spec) {
                    found = Some(path);
                    break;
                }
            }
        }

        // Only hits are cached: a miss may become a hit once magic
        // `INCLUDE=` dirs join the search path mid-walk.
        if found.is_some() {
            self.probes.borrow_mut().insert(key, found.clone());
        }
        found
    }
}

pub struct Hunter<'a> {
    registry: &'a ContentRegistry,
    cache: &'a PreprocessCache,
    analyses: &'a AnalysisStore,
    search: SearchPath,
    initial_state: MacroState,
}

impl<'a> Hunter<'a> {
    pub fn new(
        registry: &'a ContentRegistry,
        cache: &'a PreprocessCache,
        analyses: &'a AnalysisStore,
        include_dirs: Vec<PathBuf>,
        initial_state: MacroState,
    ) -> Self {
        Self {
            registry,
            cache,
            analyses,
            search: SearchPath::new(include_dirs),
            initial_state,
        }
    }

    /// Compute the dependency closure of `seed_file`. A missing seed is the
    /// one unrecoverable input error; everything else degrades to
    /// diagnostics on a best-effort result.
    pub fn closure(&self, seed_file: &Path) -> Result<Closure, crate::diagnostics::EngineError> {
        let seed = self.registry.load(seed_file)?;

        let mut out = Closure::default();
        let mut visited: HashSet<ContentHash> = HashSet::new();
        let mut pending_roots: Vec<PathBuf> = Vec::new();

        let mut state = self.initial_state.snapshot();
        self.visit(
            Arc::clone(&seed),
            &mut state,
            0,
            &mut visited,
            &mut pending_roots,
            &mut out,
        );

        // Implied and SOURCE= files are separate traversal roots: each is
        // preprocessed with the translation unit's initial state, not with
        // whatever post-state the header walk ended on.
        while let Some(root) = pending_roots.pop() {
            let content = match self.registry.load(&root) {
                Ok(c) => c,
                Err(e) => {
                    out.diagnostics.push(Diagnostic::new(
                        &root,
                        0,
                        "missing-source",
                        e.to_string(),
                    ));
                    continue;
                }
            };
            if visited.contains(&content.hash) {
                continue;
            }
            out.implied_sources.push(content.path.clone());
            let mut root_state = self.initial_state.snapshot();
            self.visit(
                content,
                &mut root_state,
                0,
                &mut visited,
                &mut pending_roots,
                &mut out,
            );
        }

        Ok(out)
    }

    fn visit(
        &self,
        content: Arc<FileContent>,
        state: &mut MacroState,
        depth: u32,
        visited: &mut HashSet<ContentHash>,
        pending_roots: &mut Vec<PathBuf>,
        out: &mut Closure,
    ) {
        if depth > MAX_INCLUDE_DEPTH {
            out.diagnostics.push(Diagnostic::new(
                &content.path,
                0,
                "include-depth",
                format!("include nesting deeper than {MAX_INCLUDE_DEPTH}; cycle without guards?"),
            ));
            return;
        }
        if !visited.insert(content.hash) {
            return;
        }
        out.files.push(content.path.clone());

        let analysis = self.analyses.analysis_of(&content);
        let value = self
            .cache
            .lookup_or_preprocess(&content, &analysis, state, &self.search);
        out.diagnostics.extend(value.diagnostics.iter().cloned());

        for record in &value.active_magic {
            out.magic
                .push(&record.key, &record.value, &content.path, record.line + 1);
            match MagicKind::classify(&record.key) {
                MagicKind::Source => {
                    let base = content.path.parent().unwrap_or_else(|| Path::new("."));
                    let resolved = base.join(&record.value);
                    let resolved = std::fs::canonicalize(&resolved).unwrap_or(resolved);
                    pending_roots.push(resolved);
                }
                MagicKind::Include => {
                    let base = content.path.parent().unwrap_or_else(|| Path::new("."));
                    let dir = base.join(&record.value);
                    let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
                    self.search.add_dir(dir);
                }
                _ => {}
            }
        }

        if is_header(&content.path) {
            if let Some(sibling) = implied_source(&content.path) {
                pending_roots.push(sibling);
            }
        }

        for include in &value.active_includes {
            // Computed includes expand here, against the walk state: the
            // macros they name may have been defined by a header visited
            // moments ago, which the cached per-file entry cannot know.
            let resolved = match include.kind {
                IncludeKind::Computed => {
                    match self.expand_computed(&include.spec, &content.path, include.line, state, out)
                    {
                        Some(spec) => self.search.resolve(IncludeKind::Computed, &spec, &content.path),
                        None => continue,
                    }
                }
                // Retry misses: the search path may have grown since the
                // cached entry resolved this file's includes.
                _ => include.resolved.clone().or_else(|| {
                    self.search
                        .resolve(include.kind, &include.spec, &content.path)
                }),
            };
            let Some(resolved) = resolved else {
                out.unresolved.push(UnresolvedInclude {
                    spec: include.spec.clone(),
                    from: content.path.clone(),
                    line: include.line + 1,
                });
                out.diagnostics.push(Diagnostic::new(
                    &content.path,
                    include.line + 1,
                    "unresolved-include",
                    format!("cannot find '{}' in the include paths", include.spec),
                ));
                continue;
            };
            let child = match self.registry.load(&resolved) {
                Ok(c) => c,
                Err(e) => {
                    out.diagnostics.push(Diagnostic::new(
                        &resolved,
                        0,
                        "unreadable-include",
                        e.to_string(),
                    ));
                    continue;
                }
            };
            if visited.contains(&child.hash) {
                continue;
            }

            // Include-guard / pragma-once skip: when the guard symbol is
            // already defined the body would be empty anyway, so the file
            // counts as reached but is not processed.
            let child_analysis = self.analyses.analysis_of(&child);
            if let Some(guard) = &child_analysis.include_guard {
                if state.is_defined(guard) {
                    visited.insert(child.hash);
                    out.files.push(child.path.clone());
                    continue;
                }
            }

            self.visit(child, state, depth + 1, visited, pending_roots, out);
        }
    }

    /// Expand a computed-include payload against the current walk state and
    /// return the header name, or report why it did not form one.
    fn expand_computed(
        &self,
        payload: &str,
        from: &Path,
        line: u32,
        state: &MacroState,
        out: &mut Closure,
    ) -> Option<String> {
        let mut scratch_reads = BTreeSet::new();
        let mut diags = Vec::new();
        let mut ctx = EvalContext::new(state, &mut scratch_reads, &mut diags, from, line + 1);
        let expanded = expand_macros_text(payload, &mut ctx);
        out.diagnostics.append(&mut diags);

        match parse_header_name(&expanded) {
            (_, Some(spec)) => Some(spec),
            (_, None) => {
                out.diagnostics.push(Diagnostic::new(
                    from,
                    line + 1,
                    "empty-computed-include",
                    format!("computed include '{payload}' expanded to '{expanded}'"),
                ));
                out.unresolved.push(UnresolvedInclude {
                    spec: expanded,
                    from: from.to_path_buf(),
                    line: line + 1,
                });
                None
            }
        }
    }
}
