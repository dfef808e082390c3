//! Options record and variant profiles.
//!
//! A variant is a named compiler/flag profile (`gcc.debug`, `clang.release`,
//! ...). Profiles live in `<variant>.toml` files searched across the user
//! config dir, the system config dir, and a `ct.conf.d` directory beside the
//! executable; command-line flags override whatever the profile set.

use crate::diagnostics::EngineError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderDepsMode {
    /// Built-in preprocessor (the default).
    Direct,
    /// Delegate to `$CPP -MM`.
    Cpp,
}

/// Every knob the engine understands, fully enumerated. Nothing else is
/// accepted: unknown profile keys are a configuration error.
#[derive(Debug, Clone)]
pub struct Options {
    pub variant: String,
    pub verbose: u8,
    pub quiet: bool,
    pub headerdeps: HeaderDepsMode,
    pub cpp: Option<String>,
    pub cc: String,
    pub cxx: String,
    pub cppflags: Option<String>,
    pub cflags: String,
    pub cxxflags: String,
    pub include: Vec<PathBuf>,
    pub objdir: Option<PathBuf>,
    pub strict: bool,
    pub pkg_config: Vec<String>,
    pub resolve_pkg_config: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            variant: "debug".to_string(),
            verbose: 0,
            quiet: false,
            headerdeps: HeaderDepsMode::Direct,
            cpp: None,
            cc: "gcc".to_string(),
            cxx: "g++".to_string(),
            cppflags: None,
            cflags: "-fPIC -g -Wall".to_string(),
            cxxflags: "-fPIC -g -Wall".to_string(),
            include: Vec::new(),
            objdir: None,
            strict: false,
            pkg_config: Vec::new(),
            resolve_pkg_config: false,
        }
    }
}

impl Options {
    /// Unset CPP falls back to CXX, the usual substitution.
    pub fn effective_cpp(&self) -> &str {
        self.cpp.as_deref().unwrap_or(&self.cxx)
    }

    /// Unset CPPFLAGS fall back to CXXFLAGS.
    pub fn effective_cppflags(&self) -> &str {
        self.cppflags.as_deref().unwrap_or(&self.cxxflags)
    }

    /// Where cache entries live: `--objdir`, or `bin/<variant>.<hash>/obj`.
    /// The hash covers the compiler/flag configuration, so two differently
    /// configured runs of the same variant never share cache entries.
    pub fn objdir(&self) -> PathBuf {
        if let Some(dir) = &self.objdir {
            return dir.clone();
        }
        let mut hasher = blake3::Hasher::new();
        for part in [
            self.effective_cpp(),
            &self.cc,
            &self.cxx,
            self.effective_cppflags(),
            &self.cflags,
            &self.cxxflags,
        ] {
            hasher.update(part.as_bytes());
            hasher.update(b"\0");
        }
        for dir in &self.include {
            hasher.update(dir.display().to_string().as_bytes());
            hasher.update(b"\0");
        }
        let digest = hasher.finalize().to_hex();
        PathBuf::from("bin")
            .join(format!("{}.{}", self.variant, &digest.as_str()[..8]))
            .join("obj")
    }

    /// Include search paths: `-I` flags harvested from CPPFLAGS plus the
    /// explicit `--include` dirs, in that order.
    pub fn include_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = parse_include_flags(self.effective_cppflags());
        dirs.extend(self.include.iter().cloned());
        dirs
    }

    pub fn apply_profile(&mut self, profile: &VariantProfile) {
        if let Some(v) = &profile.cpp {
            self.cpp = Some(v.clone());
        }
        if let Some(v) = &profile.cc {
            self.cc = v.clone();
        }
        if let Some(v) = &profile.cxx {
            self.cxx = v.clone();
        }
        if let Some(v) = &profile.cppflags {
            self.cppflags = Some(v.clone());
        }
        if let Some(v) = &profile.cflags {
            self.cflags = v.clone();
        }
        if let Some(v) = &profile.cxxflags {
            self.cxxflags = v.clone();
        }
        if let Some(v) = &profile.include {
            self.include.extend(v.iter().map(PathBuf::from));
        }
        if let Some(v) = &profile.pkg_config {
            self.pkg_config.extend(v.iter().cloned());
        }
    }
}

/// On-disk shape of a `<variant>.toml` profile. Unknown keys are rejected
/// rather than silently accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantProfile {
    #[serde(rename = "CPP")]
    pub cpp: Option<String>,
    #[serde(rename = "CC")]
    pub cc: Option<String>,
    #[serde(rename = "CXX")]
    pub cxx: Option<String>,
    #[serde(rename = "CPPFLAGS")]
    pub cppflags: Option<String>,
    #[serde(rename = "CFLAGS")]
    pub cflags: Option<String>,
    #[serde(rename = "CXXFLAGS")]
    pub cxxflags: Option<String>,
    pub include: Option<Vec<String>>,
    #[serde(rename = "pkg-config")]
    pub pkg_config: Option<Vec<String>>,
}

/// Profile search order, lowest priority last: user config, system config,
/// then `ct.conf.d` beside the executable.
pub fn config_directories() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(user) = dirs::config_dir() {
        dirs.push(user.join("ct"));
    }
    dirs.push(PathBuf::from("/etc/xdg/ct"));
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            dirs.push(parent.join("ct.conf.d"));
        }
    }
    dirs
}

/// Load `<variant>.toml` from the first config directory that has it.
pub fn load_variant(variant: &str) -> Result<Option<VariantProfile>, EngineError> {
    for dir in config_directories() {
        let candidate = dir.join(format!("{variant}.toml"));
        if candidate.is_file() {
            let text = std::fs::read_to_string(&candidate).map_err(|e| {
                EngineError::Config(format!("cannot read {}: {e}", candidate.display()))
            })?;
            let profile: VariantProfile = toml::from_str(&text).map_err(|e| {
                EngineError::Config(format!("bad profile {}: {e}", candidate.display()))
            })?;
            return Ok(Some(profile));
        }
    }
    Ok(None)
}

/// All discoverable variant profiles, as `(name, path)` pairs.
pub fn list_variants() -> Vec<(String, PathBuf)> {
    let mut found = Vec::new();
    for dir in config_directories() {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.extension().map(|e| e == "toml").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if !found.iter().any(|(name, _)| name == stem) {
                        found.push((stem.to_string(), path.to_path_buf()));
                    }
                }
            }
        }
    }
    found.sort();
    found
}

/// Harvest `-I <dir>` and `-I<dir>` include paths from a flag string.
pub fn parse_include_flags(flags: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut tokens = flags.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token == "-I" {
            if let Some(dir) = tokens.next() {
                out.push(PathBuf::from(dir));
            }
        } else if let Some(dir) = token.strip_prefix("-I") {
            out.push(PathBuf::from(dir));
        }
    }
    out
}

/// Probe for the sibling implementation file of a header: same stem, one of
/// the usual source extensions.
pub fn implied_source(header: &Path) -> Option<PathBuf> {
    let stem = header.with_extension("");
    for ext in ["cpp", "cc", "cxx", "c"] {
        // Append rather than set_extension: a dotted stem must stay intact.
        let candidate = PathBuf::from(format!("{}.{ext}", stem.display()));
        if candidate.is_file() {
            return std::fs::canonicalize(&candidate).ok().or(Some(candidate));
        }
    }
    None
}

pub fn is_header(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("h" | "hpp" | "hxx" | "hh" | "inl")
    )
}

pub fn is_source(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("cpp" | "cxx" | "cc" | "c")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_fallbacks() {
        let mut opts = Options::default();
        assert_eq!(opts.effective_cpp(), "g++");
        assert_eq!(opts.effective_cppflags(), "-fPIC -g -Wall");
        opts.cpp = Some("cpp".to_string());
        opts.cppflags = Some("-I inc".to_string());
        assert_eq!(opts.effective_cpp(), "cpp");
        assert_eq!(opts.effective_cppflags(), "-I inc");
    }

    #[test]
    fn test_default_objdir_tracks_variant_and_config() {
        let mut opts = Options::default();
        opts.variant = "release".to_string();
        let base = opts.objdir();
        assert!(base.starts_with("bin"));
        assert!(base.to_string_lossy().contains("release."));

        // A different flag set must land in a different directory.
        opts.cxxflags = "-O3".to_string();
        assert_ne!(opts.objdir(), base);

        opts.objdir = Some(PathBuf::from("/explicit/obj"));
        assert_eq!(opts.objdir(), PathBuf::from("/explicit/obj"));
    }

    #[test]
    fn test_parse_include_flags_both_spellings() {
        let dirs = parse_include_flags("-I . -Isub/dir -g -I /abs");
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("."),
                PathBuf::from("sub/dir"),
                PathBuf::from("/abs")
            ]
        );
    }

    #[test]
    fn test_profile_parse_and_unknown_key_rejection() {
        let profile: VariantProfile =
            toml::from_str("CXX = \"clang++\"\nCXXFLAGS = \"-O3\"\n").unwrap();
        assert_eq!(profile.cxx.as_deref(), Some("clang++"));

        let bad = toml::from_str::<VariantProfile>("MYSTERY = 1\n");
        assert!(bad.is_err());
    }

    #[test]
    fn test_profile_overrides_then_cli_style_merge() {
        let mut opts = Options::default();
        let profile: VariantProfile =
            toml::from_str("CXX = \"clang++\"\ninclude = [\"/opt/inc\"]\n").unwrap();
        opts.apply_profile(&profile);
        assert_eq!(opts.cxx, "clang++");
        assert_eq!(opts.include, vec![PathBuf::from("/opt/inc")]);
    }

    #[test]
    fn test_implied_source_probes_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("gadget.hpp");
        let source = dir.path().join("gadget.cc");
        std::fs::write(&header, "").unwrap();
        std::fs::write(&source, "").unwrap();

        let implied = implied_source(&header).unwrap();
        assert!(implied.ends_with("gadget.cc"));
        assert!(implied_source(&dir.path().join("orphan.hpp")).is_none());
    }

    #[test]
    fn test_header_and_source_classification() {
        assert!(is_header(Path::new("a.hpp")));
        assert!(is_header(Path::new("a.h")));
        assert!(!is_header(Path::new("a.cpp")));
        assert!(is_source(Path::new("a.cc")));
        assert!(!is_source(Path::new("a.txt")));
    }
}
