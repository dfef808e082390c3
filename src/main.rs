use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::*;
use cppdeps::config::{list_variants, load_variant, HeaderDepsMode, Options};
use cppdeps::diagnostics::{report, EngineError};
use cppdeps::engine::Engine;
use cppdeps::hunter::Closure;
use cppdeps::magic::{resolve_pkg_config, PkgConfigFlags};
use rayon::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DepsMode {
    /// Built-in preprocessor: fast, understands magic flags natively
    Direct,
    /// Delegate to "$CPP -MM": slower but authoritative
    Cpp,
}

#[derive(Parser)]
#[command(name = "ct-cppdeps")]
#[command(about = "List the header dependencies of C/C++ source files", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Source file(s) to analyze
    #[arg(required_unless_present = "variants")]
    filename: Vec<PathBuf>,

    /// Methodology for determining header dependencies
    #[arg(long, value_enum, default_value = "direct")]
    headerdeps: DepsMode,

    /// Named compiler/flag profile (config name without the .toml)
    #[arg(long, default_value = "debug")]
    variant: String,

    /// Extra include search path (repeatable)
    #[arg(long)]
    include: Vec<PathBuf>,

    /// C preprocessor (defaults to CXX)
    #[arg(long = "CPP")]
    cpp: Option<String>,

    /// C compiler
    #[arg(long = "CC")]
    cc: Option<String>,

    /// C++ compiler
    #[arg(long = "CXX")]
    cxx: Option<String>,

    /// C preprocessor flags (defaults to CXXFLAGS)
    #[arg(long = "CPPFLAGS")]
    cppflags: Option<String>,

    /// C++ compiler flags
    #[arg(long = "CXXFLAGS")]
    cxxflags: Option<String>,

    /// C compiler flags
    #[arg(long = "CFLAGS")]
    cflags: Option<String>,

    /// Additional pkg-config package (repeatable)
    #[arg(long = "pkg-config")]
    pkg_config: Vec<String>,

    /// Shell out to pkg-config and fold the results into the reported
    /// flags and the compile database
    #[arg(long)]
    resolve_pkg_config: bool,

    /// Object directory holding the preprocessing cache
    #[arg(long)]
    objdir: Option<PathBuf>,

    /// Treat unresolved includes as fatal
    #[arg(long)]
    strict: bool,

    /// Also print the aggregated magic flags per translation unit
    #[arg(long)]
    magic: bool,

    /// Write a compile-commands database for the analyzed sources
    #[arg(long, value_name = "PATH")]
    compile_db: Option<PathBuf>,

    /// List the discoverable variant profiles and exit
    #[arg(long)]
    variants: bool,

    /// Output verbosity. Repeat for more
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress diagnostics
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.variants {
        let found = list_variants();
        if found.is_empty() {
            println!("(no variant profiles found)");
        } else {
            for (name, path) in found {
                println!("{name}\t{}", path.display());
            }
        }
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "x".red());
            ExitCode::from(1)
        }
    }
}

fn build_options(cli: &Cli) -> Result<Options> {
    let mut options = Options::default();
    options.variant = cli.variant.clone();
    if let Some(profile) = load_variant(&cli.variant).context("loading variant profile")? {
        options.apply_profile(&profile);
    }

    // Command-line flags override whatever the profile set.
    options.verbose = cli.verbose;
    options.quiet = cli.quiet;
    options.headerdeps = match cli.headerdeps {
        DepsMode::Direct => HeaderDepsMode::Direct,
        DepsMode::Cpp => HeaderDepsMode::Cpp,
    };
    if let Some(v) = &cli.cpp {
        options.cpp = Some(v.clone());
    }
    if let Some(v) = &cli.cc {
        options.cc = v.clone();
    }
    if let Some(v) = &cli.cxx {
        options.cxx = v.clone();
    }
    if let Some(v) = &cli.cppflags {
        options.cppflags = Some(v.clone());
    }
    if let Some(v) = &cli.cxxflags {
        options.cxxflags = v.clone();
    }
    if let Some(v) = &cli.cflags {
        options.cflags = v.clone();
    }
    options.include.extend(cli.include.iter().cloned());
    options.objdir = cli.objdir.clone();
    options.strict = cli.strict;
    options.pkg_config.extend(cli.pkg_config.iter().cloned());
    options.resolve_pkg_config = cli.resolve_pkg_config;
    Ok(options)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let options = build_options(&cli)?;
    let verbose = options.verbose;
    let quiet = options.quiet;
    let strict = options.strict;
    let engine = Engine::new(options);

    if verbose >= 2 {
        eprintln!("{} variant: {}", "i".blue(), engine.options().variant);
        eprintln!(
            "{} include dirs: {:?}",
            "i".blue(),
            engine.options().include_dirs()
        );
    }

    // Translation units are independent; the macro state only threads
    // linearly inside each one.
    let results: Vec<(PathBuf, Result<Closure, EngineError>)> = cli
        .filename
        .par_iter()
        .map(|file| (file.clone(), engine.closure(file)))
        .collect();

    let mut input_error = false;
    let mut failed = false;
    let mut printed: HashSet<PathBuf> = HashSet::new();
    // Resolved pkg-config flags per translation unit, same order as results.
    let mut resolved_pkgs: Vec<Vec<(String, PkgConfigFlags)>> = Vec::with_capacity(results.len());

    for (seed, result) in &results {
        match result {
            Ok(closure) => {
                report(&closure.diagnostics, quiet);
                if strict && !closure.unresolved.is_empty() {
                    failed = true;
                }
                // Resolution is independent of --magic: the flags also feed
                // the compile database.
                let pkgs = if cli.resolve_pkg_config {
                    resolve_packages(closure, quiet, &mut failed)
                } else {
                    Vec::new()
                };
                // files already contains the implied sources' subtrees.
                for path in closure.files.iter().skip(1) {
                    if printed.insert(path.clone()) {
                        println!("{}", path.display());
                    }
                }
                if cli.magic {
                    print_magic(seed, closure, &pkgs);
                }
                resolved_pkgs.push(pkgs);
            }
            Err(e @ EngineError::Input { .. }) => {
                eprintln!("{} {e}", "x".red());
                input_error = true;
                resolved_pkgs.push(Vec::new());
            }
            Err(e) => {
                // Fatal for this translation unit only; the rest proceed.
                eprintln!("{} {}: {e}", "x".red(), seed.display());
                failed = true;
                resolved_pkgs.push(Vec::new());
            }
        }
    }

    if let Some(db_path) = &cli.compile_db {
        write_compile_db(db_path, &results, &resolved_pkgs, &engine)?;
    }

    if verbose >= 1 {
        let (hits, misses) = engine.cache_stats();
        eprintln!("{} cache: {hits} hits, {misses} misses", "i".blue());
    }

    if input_error {
        Ok(ExitCode::from(1))
    } else if failed {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Shell out to pkg-config for every package the closure names. A failed
/// package is fatal for the translation unit: reported and skipped.
fn resolve_packages(
    closure: &Closure,
    quiet: bool,
    failed: &mut bool,
) -> Vec<(String, PkgConfigFlags)> {
    let mut resolved = Vec::new();
    for pkg in closure.magic.pkg_config_packages() {
        match resolve_pkg_config(pkg) {
            Ok(flags) => resolved.push((pkg.to_string(), flags)),
            Err(e) => {
                if !quiet {
                    eprintln!("{} {e}", "!".yellow());
                }
                *failed = true;
            }
        }
    }
    resolved
}

fn print_magic(seed: &PathBuf, closure: &Closure, resolved: &[(String, PkgConfigFlags)]) {
    println!("\n{}", seed.display());
    if closure.magic.is_empty() {
        println!("\t(no magic flags)");
        return;
    }
    for entry in closure.magic.entries() {
        println!("\t{}: {}", entry.key, entry.value);
    }
    for (pkg, flags) in resolved {
        if !flags.cflags.is_empty() {
            println!("\tCXXFLAGS(pkg:{pkg}): {}", flags.cflags.join(" "));
        }
        if !flags.libs.is_empty() {
            println!("\tLINKFLAGS(pkg:{pkg}): {}", flags.libs.join(" "));
        }
    }
}

/// One compile-commands entry per analyzed source (seed plus implied), with
/// the magic CXXFLAGS and any resolved pkg-config flags folded in. IDE
/// tooling reads this directly.
fn write_compile_db(
    db_path: &PathBuf,
    results: &[(PathBuf, Result<Closure, EngineError>)],
    resolved_pkgs: &[Vec<(String, PkgConfigFlags)>],
    engine: &Engine,
) -> Result<()> {
    let directory = std::env::current_dir()?;
    let mut entries = Vec::new();
    for ((seed, result), pkgs) in results.iter().zip(resolved_pkgs) {
        let Ok(closure) = result else { continue };
        for source in std::iter::once(seed).chain(closure.implied_sources.iter()) {
            let mut command = vec![
                engine.options().cxx.clone(),
                engine.options().cxxflags.clone(),
            ];
            for flag in closure.magic.cppflags() {
                command.push(flag.to_string());
            }
            for flag in closure.magic.cxxflags() {
                command.push(flag.to_string());
            }
            for (_, flags) in pkgs {
                command.extend(flags.cflags.iter().cloned());
            }
            for dir in engine.options().include_dirs() {
                command.push(format!("-I{}", dir.display()));
            }
            command.push("-c".to_string());
            command.push(source.display().to_string());
            entries.push(json!({
                "directory": directory.display().to_string(),
                "command": command.join(" "),
                "file": source.display().to_string(),
            }));
        }
    }
    let text = serde_json::to_string_pretty(&entries)?;
    std::fs::write(db_path, text)
        .with_context(|| format!("writing compile database {}", db_path.display()))?;
    Ok(())
}
