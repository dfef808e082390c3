use cppdeps::analyzer::analyze;
use cppdeps::config::Options;
use cppdeps::content::{ContentHash, FileContent, LineIndex};
use cppdeps::engine::Engine;
use criterion::{criterion_group, criterion_main, Criterion};
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;

fn synthetic_header(conditional_blocks: usize) -> String {
    let mut text = String::from("#ifndef SYNTH_HPP\n#define SYNTH_HPP\n");
    text.push_str("//#CXXFLAGS=-std=c++17\n//#PKG-CONFIG=zlib\n");
    for i in 0..conditional_blocks {
        text.push_str(&format!(
            "#if defined(FEATURE_{i}) && FEATURE_{i} > 1\n\
             int feature_{i}(void); /* enabled */\n\
             #else\n\
             // feature {i} disabled\n\
             #endif\n\
             #define SEEN_{i} {i}\n"
        ));
    }
    text.push_str("#endif\n");
    text
}

fn content_of(text: &str) -> FileContent {
    let bytes = text.as_bytes().to_vec();
    FileContent {
        path: PathBuf::from("/bench/synth.hpp"),
        hash: ContentHash::of_bytes(&bytes),
        lines: LineIndex::build(&bytes),
        bytes,
    }
}

fn bench_analyze(c: &mut Criterion) {
    let text = synthetic_header(200);
    let content = content_of(&text);
    c.bench_function("analyze_200_blocks", |b| {
        b.iter(|| analyze(black_box(&content)))
    });
}

fn bench_closure_warm(c: &mut Criterion) {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    for i in 0..20 {
        let next = if i + 1 < 20 {
            format!("#include \"dep_{}.hpp\"\n", i + 1)
        } else {
            String::new()
        };
        fs::write(
            dir.join(format!("dep_{i}.hpp")),
            format!(
                "#ifndef DEP_{i}_HPP\n#define DEP_{i}_HPP\n{next}#define FROM_{i} 1\n#endif\n"
            ),
        )
        .unwrap();
    }
    let seed = dir.join("main.cpp");
    fs::write(&seed, "#include \"dep_0.hpp\"\nint main() {}\n").unwrap();

    let mut options = Options::default();
    options.include.push(dir.to_path_buf());
    options.objdir = Some(dir.join("obj"));
    let engine = Engine::new(options);
    engine.closure(&seed).unwrap();

    c.bench_function("closure_20_headers_warm", |b| {
        b.iter(|| engine.closure(black_box(&seed)).unwrap())
    });
}

criterion_group!(benches, bench_analyze, bench_closure_warm);
criterion_main!(benches);
