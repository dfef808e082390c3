//! Smoke tests for the ct-cppdeps binary. These run the compiled executable
//! against a throwaway project and are skipped when the binary has not been
//! built yet.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn get_binary() -> PathBuf {
    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target"));
    let bin_name = if cfg!(windows) {
        "ct-cppdeps.exe"
    } else {
        "ct-cppdeps"
    };
    target_dir.join("debug").join(bin_name)
}

#[test]
fn test_lists_dependencies_one_per_line() {
    let bin = get_binary();
    if !bin.exists() {
        eprintln!("Skipping test: ct-cppdeps binary not found at {:?}", bin);
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("dep.hpp"), "int dep;\n").unwrap();
    fs::write(dir.join("main.cpp"), "#include \"dep.hpp\"\nint main() {}\n").unwrap();

    let output = Command::new(&bin)
        .arg("main.cpp")
        .arg("--objdir")
        .arg(dir.join("obj"))
        .current_dir(dir)
        .output()
        .expect("Failed to execute ct-cppdeps");

    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "expected exactly one dependency line");
    assert!(lines[0].ends_with("dep.hpp"));
}

#[test]
fn test_strict_mode_fails_on_unresolved_include() {
    let bin = get_binary();
    if !bin.exists() {
        eprintln!("Skipping test: ct-cppdeps binary not found at {:?}", bin);
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("main.cpp"), "#include \"missing.hpp\"\n").unwrap();

    let lenient = Command::new(&bin)
        .arg("main.cpp")
        .arg("--objdir")
        .arg(dir.join("obj"))
        .current_dir(dir)
        .output()
        .expect("Failed to execute ct-cppdeps");
    assert!(lenient.status.success(), "unresolved includes are non-fatal by default");

    let strict = Command::new(&bin)
        .args(["main.cpp", "--strict"])
        .arg("--objdir")
        .arg(dir.join("obj"))
        .current_dir(dir)
        .output()
        .expect("Failed to execute ct-cppdeps");
    assert_eq!(strict.status.code(), Some(2));
}

#[test]
fn test_missing_input_file_exits_one() {
    let bin = get_binary();
    if !bin.exists() {
        eprintln!("Skipping test: ct-cppdeps binary not found at {:?}", bin);
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let output = Command::new(&bin)
        .arg("does_not_exist.cpp")
        .current_dir(tmp.path())
        .output()
        .expect("Failed to execute ct-cppdeps");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_magic_flag_printout() {
    let bin = get_binary();
    if !bin.exists() {
        eprintln!("Skipping test: ct-cppdeps binary not found at {:?}", bin);
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    fs::write(
        dir.join("main.cpp"),
        "//#CXXFLAGS=-std=c++20\n//#LDFLAGS=-lm\nint main() {}\n",
    )
    .unwrap();

    let output = Command::new(&bin)
        .args(["main.cpp", "--magic"])
        .arg("--objdir")
        .arg(dir.join("obj"))
        .current_dir(dir)
        .output()
        .expect("Failed to execute ct-cppdeps");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CXXFLAGS: -std=c++20"));
    assert!(stdout.contains("LDFLAGS: -lm"));
}
