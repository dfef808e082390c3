//! Magic build flags: `//#KEY=value` annotations harvested from comments
//! during dependency analysis. Entries keep traversal order and the first
//! occurrence of a duplicate wins, so a header included from twenty places
//! contributes its flags exactly once.

use crate::diagnostics::EngineError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicKind {
    CxxFlags,
    CppFlags,
    CFlags,
    LinkFlags,
    LdFlags,
    PkgConfig,
    Source,
    Include,
    /// Unknown keys are carried through untouched.
    Other,
}

impl MagicKind {
    pub fn classify(key: &str) -> MagicKind {
        match key {
            "CXXFLAGS" => MagicKind::CxxFlags,
            "CPPFLAGS" => MagicKind::CppFlags,
            "CFLAGS" => MagicKind::CFlags,
            "LINKFLAGS" => MagicKind::LinkFlags,
            "LDFLAGS" => MagicKind::LdFlags,
            "PKG-CONFIG" => MagicKind::PkgConfig,
            "SOURCE" => MagicKind::Source,
            "INCLUDE" => MagicKind::Include,
            _ => MagicKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MagicEntry {
    pub key: String,
    pub kind: MagicKind,
    pub value: String,
    /// File carrying the annotation; relative values resolve against it.
    pub path: PathBuf,
    pub line: u32,
}

/// Ordered multiset of magic entries, partitioned by key on access.
#[derive(Debug, Clone, Default)]
pub struct MagicFlags {
    entries: Vec<MagicEntry>,
    seen: HashSet<(String, String)>,
}

impl MagicFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: &str, path: &Path, line: u32) {
        if !self
            .seen
            .insert((key.to_string(), value.to_string()))
        {
            return;
        }
        self.entries.push(MagicEntry {
            key: key.to_string(),
            kind: MagicKind::classify(key),
            value: value.to_string(),
            path: path.to_path_buf(),
            line,
        });
    }

    pub fn entries(&self) -> &[MagicEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values_of(&self, kind: MagicKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value.as_str())
            .collect()
    }

    pub fn cxxflags(&self) -> Vec<&str> {
        self.values_of(MagicKind::CxxFlags)
    }

    pub fn cppflags(&self) -> Vec<&str> {
        self.values_of(MagicKind::CppFlags)
    }

    pub fn cflags(&self) -> Vec<&str> {
        self.values_of(MagicKind::CFlags)
    }

    /// LDFLAGS is an alias of LINKFLAGS at this level only; extraction and
    /// caching keep the two keys distinct.
    pub fn linkflags(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, MagicKind::LinkFlags | MagicKind::LdFlags))
            .map(|e| e.value.as_str())
            .collect()
    }

    /// Individual package names, in order, deduplicated.
    pub fn pkg_config_packages(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in self.entries.iter().filter(|e| e.kind == MagicKind::PkgConfig) {
            for pkg in entry.value.split_whitespace() {
                if seen.insert(pkg) {
                    out.push(pkg);
                }
            }
        }
        out
    }

    /// `SOURCE=` paths, resolved relative to the annotating file.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.relative_paths(MagicKind::Source)
    }

    /// `INCLUDE=` directories, resolved relative to the annotating file.
    pub fn extra_include_dirs(&self) -> Vec<PathBuf> {
        self.relative_paths(MagicKind::Include)
    }

    fn relative_paths(&self, kind: MagicKind) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| {
                let base = e.path.parent().unwrap_or_else(|| Path::new("."));
                let joined = base.join(&e.value);
                std::fs::canonicalize(&joined).unwrap_or(joined)
            })
            .collect()
    }
}

/// Flags returned by `pkg-config` for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgConfigFlags {
    pub cflags: Vec<String>,
    pub libs: Vec<String>,
}

/// Shell out to `pkg-config --cflags` / `--libs`. A missing tool or unknown
/// package is an external-tool failure; the caller decides whether that is
/// fatal for the translation unit.
pub fn resolve_pkg_config(pkg: &str) -> Result<PkgConfigFlags, EngineError> {
    let mut result = PkgConfigFlags::default();
    for (args, sink) in [
        (["--cflags", pkg], &mut result.cflags),
        (["--libs", pkg], &mut result.libs),
    ] {
        let output = Command::new("pkg-config")
            .args(args)
            .output()
            .map_err(|e| EngineError::Tool(format!("pkg-config: {e}")))?;
        if !output.status.success() {
            return Err(EngineError::Tool(format!(
                "pkg-config failed for '{pkg}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        sink.extend(
            String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .map(|s| s.to_string()),
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_wins() {
        let mut flags = MagicFlags::new();
        let a = PathBuf::from("/src/a.hpp");
        let b = PathBuf::from("/src/b.hpp");
        flags.push("CXXFLAGS", "-O2", &a, 1);
        flags.push("CXXFLAGS", "-O2", &b, 9);
        flags.push("CXXFLAGS", "-g", &b, 10);

        assert_eq!(flags.cxxflags(), vec!["-O2", "-g"]);
        assert_eq!(flags.entries()[0].path, a);
    }

    #[test]
    fn test_ldflags_aliases_linkflags_on_aggregation() {
        let mut flags = MagicFlags::new();
        let p = PathBuf::from("/src/a.hpp");
        flags.push("LINKFLAGS", "-lfoo", &p, 1);
        flags.push("LDFLAGS", "-lbar", &p, 2);
        assert_eq!(flags.linkflags(), vec!["-lfoo", "-lbar"]);
        // The raw keys stay distinct.
        assert_eq!(flags.entries()[0].key, "LINKFLAGS");
        assert_eq!(flags.entries()[1].key, "LDFLAGS");
    }

    #[test]
    fn test_pkg_config_packages_split_and_dedup() {
        let mut flags = MagicFlags::new();
        let p = PathBuf::from("/src/a.hpp");
        flags.push("PKG-CONFIG", "zlib libpng", &p, 1);
        flags.push("PKG-CONFIG", "zlib sdl2", &p, 2);
        assert_eq!(flags.pkg_config_packages(), vec!["zlib", "libpng", "sdl2"]);
    }

    #[test]
    fn test_unknown_key_is_opaque_pass_through() {
        let mut flags = MagicFlags::new();
        let p = PathBuf::from("/src/a.hpp");
        flags.push("FROBNICATE", "yes", &p, 1);
        assert_eq!(flags.entries()[0].kind, MagicKind::Other);
        assert_eq!(flags.entries()[0].value, "yes");
    }

    #[test]
    fn test_source_resolves_relative_to_annotating_file() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("widget.hpp");
        let extra = dir.path().join("extra.cpp");
        std::fs::write(&header, "").unwrap();
        std::fs::write(&extra, "").unwrap();

        let mut flags = MagicFlags::new();
        flags.push("SOURCE", "extra.cpp", &header, 3);
        let sources = flags.sources();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].ends_with("extra.cpp"));
    }
}
