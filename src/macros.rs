//! Macro environment: an immutable core of compiler builtins shared across
//! all files, plus a mutable partition for macros the analyzed sources
//! define themselves. The variant-cache key is derived only from the mutable
//! partition, restricted to the names a file actually reads.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// A macro definition. Function-like bodies are kept as raw text; they are
/// only substituted into `#if` expressions, never fully lexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Macro {
    Object { body: String },
    Function { params: Vec<String>, body: String },
}

impl Macro {
    pub fn object(body: impl Into<String>) -> Self {
        Macro::Object { body: body.into() }
    }

    pub fn body(&self) -> &str {
        match self {
            Macro::Object { body } => body,
            Macro::Function { body, .. } => body,
        }
    }

    /// Parse the payload of a `#define` (everything after the directive
    /// name). A paren immediately after the name means function-like.
    pub fn parse_define(payload: &str) -> Option<(String, Macro)> {
        let payload = payload.trim();
        let bytes = payload.as_bytes();
        if bytes.is_empty() || !is_ident_start(bytes[0]) {
            return None;
        }
        let mut i = 1;
        while i < bytes.len() && is_ident_cont(bytes[i]) {
            i += 1;
        }
        let name = payload[..i].to_string();

        if i < bytes.len() && bytes[i] == b'(' {
            let mut params = Vec::new();
            let mut j = i + 1;
            let mut start = j;
            while j < bytes.len() && bytes[j] != b')' {
                if bytes[j] == b',' {
                    let p = payload[start..j].trim();
                    if !p.is_empty() {
                        params.push(p.to_string());
                    }
                    start = j + 1;
                }
                j += 1;
            }
            if j < bytes.len() {
                let p = payload[start..j].trim();
                if !p.is_empty() {
                    params.push(p.to_string());
                }
                j += 1;
            }
            let body = payload[j.min(payload.len())..].trim().to_string();
            Some((name, Macro::Function { params, body }))
        } else {
            let body = payload[i..].trim().to_string();
            Some((name, Macro::Object { body }))
        }
    }
}

/// Value slot in the mutable partition. `Undefined` masks a core builtin
/// that the sources `#undef`ed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroValue {
    Defined(Macro),
    Undefined,
}

/// One `#define`/`#undef` executed along a file's active path. An ordered
/// list of these reconstructs the post-state from any input state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefineOp {
    Define { name: String, def: Macro },
    Undef { name: String },
}

/// Deterministic 128-bit fingerprint of a macro-state restriction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateFingerprint([u8; 16]);

impl StateFingerprint {
    pub fn to_hex(self) -> String {
        let mut s = String::with_capacity(32);
        for b in self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl fmt::Display for StateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateFingerprint({})", self.to_hex())
    }
}

#[derive(Debug, Clone)]
pub struct MacroState {
    core: Arc<HashMap<String, Macro>>,
    variable: HashMap<String, MacroValue>,
}

impl MacroState {
    pub fn new(core: HashMap<String, Macro>) -> Self {
        Self {
            core: Arc::new(core),
            variable: HashMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// Total lookup: mutable partition first, core second. A masked builtin
    /// reads as undefined.
    pub fn lookup(&self, name: &str) -> Option<&Macro> {
        match self.variable.get(name) {
            Some(MacroValue::Defined(m)) => Some(m),
            Some(MacroValue::Undefined) => None,
            None => self.core.get(name),
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Replaces any prior entry in the mutable partition; core is untouched.
    pub fn define(&mut self, name: String, def: Macro) {
        self.variable.insert(name, MacroValue::Defined(def));
    }

    /// Removes from the mutable partition, or masks the core builtin of the
    /// same name so later lookups see it as undefined.
    pub fn undef(&mut self, name: &str) {
        if self.core.contains_key(name) {
            self.variable
                .insert(name.to_string(), MacroValue::Undefined);
        } else {
            self.variable.remove(name);
        }
    }

    /// Cheap clone; the core partition is shared structurally.
    pub fn snapshot(&self) -> MacroState {
        self.clone()
    }

    pub fn variable(&self) -> &HashMap<String, MacroValue> {
        &self.variable
    }

    /// Re-execute an ordered delta against this state. Used both when the
    /// preprocessor runs fresh and when a cache hit replays a stored delta;
    /// the result is identical by construction. Never merge a delta into a
    /// foreign map any other way: an `#undef` cannot survive a merge.
    pub fn apply_delta(&mut self, delta: &[DefineOp]) {
        for op in delta {
            match op {
                DefineOp::Define { name, def } => self.define(name.clone(), def.clone()),
                DefineOp::Undef { name } => self.undef(name),
            }
        }
    }

    /// Fingerprint of the mutable partition restricted to `names`. Depends
    /// only on the values of those names, never on insertion order or on
    /// keys outside the set; this is what makes variant-cache keys minimal.
    pub fn restricted_fingerprint<'a, I>(&self, names: I) -> StateFingerprint
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sorted: Vec<&str> = names.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = blake3::Hasher::new();
        for name in sorted {
            match self.variable.get(name) {
                Some(MacroValue::Defined(m)) => {
                    hasher.update(name.as_bytes());
                    hasher.update(b"=");
                    if let Macro::Function { params, .. } = m {
                        hasher.update(b"(");
                        hasher.update(params.join(",").as_bytes());
                        hasher.update(b")");
                    }
                    hasher.update(m.body().as_bytes());
                    hasher.update(b"\n");
                }
                Some(MacroValue::Undefined) => {
                    hasher.update(name.as_bytes());
                    hasher.update(b"=#undef\n");
                }
                None => {}
            }
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest.as_bytes()[..16]);
        StateFingerprint(out)
    }

    /// Fingerprint over every name in the mutable partition.
    pub fn full_fingerprint(&self) -> StateFingerprint {
        let names: BTreeSet<&str> = self.variable.keys().map(|s| s.as_str()).collect();
        self.restricted_fingerprint(names)
    }
}

pub fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub fn is_ident_cont(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Build the immutable core for a compiler/variant: platform, architecture,
/// and compiler-family builtins, plus `-DNAME[=VALUE]` definitions harvested
/// from the flag strings. Loaded once and shared across all files.
pub fn builtin_core(cxx: &str, flag_sources: &[&str]) -> HashMap<String, Macro> {
    let mut core = HashMap::new();
    let one = || Macro::object("1");

    if cfg!(target_os = "linux") {
        for name in ["__linux__", "__unix__", "unix"] {
            core.insert(name.to_string(), one());
        }
    } else if cfg!(target_os = "macos") {
        for name in ["__APPLE__", "__MACH__", "__unix__", "unix"] {
            core.insert(name.to_string(), one());
        }
    } else if cfg!(target_os = "windows") {
        for name in ["_WIN32", "WIN32"] {
            core.insert(name.to_string(), one());
        }
    }

    if cfg!(target_arch = "x86_64") {
        for name in ["__x86_64__", "__amd64__", "__LP64__"] {
            core.insert(name.to_string(), one());
        }
    } else if cfg!(target_arch = "aarch64") {
        for name in ["__arm__", "__aarch64__", "__LP64__"] {
            core.insert(name.to_string(), one());
        }
    } else if cfg!(target_arch = "x86") {
        for name in ["__i386__", "__i386"] {
            core.insert(name.to_string(), one());
        }
    }

    let compiler = cxx.to_ascii_lowercase();
    let family: &[&str] = if compiler.contains("clang") {
        &["__clang__", "__clang_major__", "__GNUC__", "__GNUC_MINOR__"]
    } else if compiler.contains("gcc") || compiler.contains("g++") {
        &["__GNUC__", "__GNUG__", "__GNUC_MINOR__", "__GNUC_PATCHLEVEL__"]
    } else if compiler.contains("cl") || compiler.contains("msvc") {
        &["_MSC_VER", "_MSC_FULL_VER", "_WIN32"]
    } else if compiler.contains("icc") || compiler.contains("icx") {
        &["__INTEL_COMPILER", "__ICC", "__GNUC__"]
    } else {
        &["__GNUC__"]
    };
    for name in family {
        core.insert(name.to_string(), one());
    }
    if compiler.contains("++") {
        core.insert("__cplusplus".to_string(), Macro::object("201703L"));
    } else {
        core.insert("__STDC__".to_string(), one());
    }

    for flags in flag_sources {
        for (name, value) in parse_defines_from_flags(flags) {
            core.insert(name, Macro::object(value));
        }
    }

    core
}

/// Extract `-DNAME[=VALUE]` pairs from a flag string. A definition without
/// an explicit value defaults to `1`, matching compiler behavior.
pub fn parse_defines_from_flags(flags: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for token in flags.split_whitespace() {
        if let Some(rest) = token.strip_prefix("-D") {
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('=') {
                Some((name, value)) => out.push((name.to_string(), value.to_string())),
                None => out.push((rest.to_string(), "1".to_string())),
            }
        }
    }
    out
}
