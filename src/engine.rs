//! Engine root: one value owning the content registry, the preprocessing
//! cache, the analysis store, and the configuration snapshot. Nothing in
//! this crate lives in process-wide state; everything long-lived hangs off
//! an `Engine`.

use crate::analyzer::AnalysisStore;
use crate::cache::PreprocessCache;
use crate::config::{is_header, HeaderDepsMode, Options};
use crate::content::ContentRegistry;
use crate::diagnostics::EngineError;
use crate::hunter::{Closure, Hunter};
use crate::macros::{builtin_core, MacroState};
use std::path::Path;
use std::process::Command;

pub struct Engine {
    options: Options,
    registry: ContentRegistry,
    cache: PreprocessCache,
    analyses: AnalysisStore,
    initial_state: MacroState,
}

impl Engine {
    pub fn new(options: Options) -> Self {
        let core = builtin_core(
            &options.cxx,
            &[
                options.effective_cppflags(),
                options.cflags.as_str(),
                options.cxxflags.as_str(),
            ],
        );
        let cache_dir = match options.headerdeps {
            HeaderDepsMode::Direct => Some(options.objdir()),
            // Delegating to $CPP produces nothing worth persisting here.
            HeaderDepsMode::Cpp => None,
        };
        Self {
            cache: PreprocessCache::new(cache_dir),
            registry: ContentRegistry::new(),
            analyses: AnalysisStore::new(),
            initial_state: MacroState::new(core),
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    /// Dependency closure of one translation unit, via the configured
    /// methodology. Extra `--pkg-config` packages from the command line are
    /// folded into the aggregated magic.
    pub fn closure(&self, seed: &Path) -> Result<Closure, EngineError> {
        let mut closure = match self.options.headerdeps {
            HeaderDepsMode::Direct => {
                let hunter = Hunter::new(
                    &self.registry,
                    &self.cache,
                    &self.analyses,
                    self.options.include_dirs(),
                    self.initial_state.snapshot(),
                );
                hunter.closure(seed)?
            }
            HeaderDepsMode::Cpp => self.closure_via_cpp(seed)?,
        };

        for pkg in &self.options.pkg_config {
            closure.magic.push("PKG-CONFIG", pkg, seed, 0);
        }
        Ok(closure)
    }

    /// `--headerdeps=cpp`: ask the real preprocessor for the dependency list
    /// (`$CPP $CPPFLAGS -MM`) and harvest magic flags from the raw text of
    /// every file it names. Slower, but authoritative for exotic code.
    fn closure_via_cpp(&self, seed: &Path) -> Result<Closure, EngineError> {
        let seed_real = std::fs::canonicalize(seed).map_err(|source| EngineError::Input {
            path: seed.to_path_buf(),
            source,
        })?;

        let mut cmd = Command::new(self.options.effective_cpp());
        for flag in self.options.effective_cppflags().split_whitespace() {
            cmd.arg(flag);
        }
        cmd.arg("-MM");
        if is_header(&seed_real) {
            // A bare header gets wrapped in an empty translation unit.
            cmd.args(["-include"])
                .arg(&seed_real)
                .args(["-x", "c++", "/dev/null"]);
        } else {
            cmd.arg(&seed_real);
        }

        let output = cmd
            .output()
            .map_err(|e| EngineError::Tool(format!("{}: {e}", self.options.effective_cpp())))?;
        if !output.status.success() {
            return Err(EngineError::Tool(format!(
                "{} -MM failed for {}: {}",
                self.options.effective_cpp(),
                seed_real.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let deplist = stdout.split_once(':').map(|(_, rest)| rest).unwrap_or("");

        let mut closure = Closure::default();
        closure.files.push(seed_real.clone());
        for token in deplist.split_whitespace() {
            let token = token.trim_matches('\\');
            if token.is_empty() || token == "/dev/null" {
                continue;
            }
            let path = std::fs::canonicalize(token).unwrap_or_else(|_| token.into());
            if path == seed_real || closure.files.contains(&path) {
                continue;
            }
            closure.files.push(path);
        }

        // Magic flags come from the raw file text in this mode; the real
        // preprocessor already decided which files matter.
        for path in closure.files.clone() {
            if let Ok(content) = self.registry.load(&path) {
                let analysis = self.analyses.analysis_of(&content);
                for token in &analysis.magic_tokens {
                    closure
                        .magic
                        .push(&token.key, &token.value, &content.path, token.line + 1);
                }
            }
        }

        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_engine_direct_closure_with_builtin_macros() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        write(
            dir,
            "per_compiler.hpp",
            "#ifdef __GNUC__\n#include \"gcc_only.hpp\"\n#endif\n",
        );
        write(dir, "gcc_only.hpp", "int g;\n");
        let seed = write(dir, "main.cpp", "#include \"per_compiler.hpp\"\nint main(){}\n");

        let mut options = Options::default();
        options.include.push(dir.to_path_buf());
        options.objdir = Some(tmp.path().join("obj"));
        let engine = Engine::new(options);

        let closure = engine.closure(&seed).unwrap();
        let names: Vec<_> = closure
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"gcc_only.hpp".to_string()));
    }

    #[test]
    fn test_engine_missing_seed_is_input_error() {
        let engine = Engine::new(Options::default());
        let err = engine.closure(Path::new("/no/such/file.cpp")).unwrap_err();
        assert!(matches!(err, EngineError::Input { .. }));
    }

    #[test]
    fn test_cli_pkg_config_folds_into_magic() {
        let tmp = tempfile::tempdir().unwrap();
        let seed = write(tmp.path(), "main.cpp", "int main(){}\n");

        let mut options = Options::default();
        options.objdir = Some(tmp.path().join("obj"));
        options.pkg_config.push("zlib".to_string());
        let engine = Engine::new(options);

        let closure = engine.closure(&seed).unwrap();
        assert_eq!(closure.magic.pkg_config_packages(), vec!["zlib"]);
    }
}
