//! Benchmarks for crucible hot paths.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crucible::backend::textpack::TextPackBackend;
use crucible::core::engine::Engine;
use crucible::core::resolver::ReferenceResolver;
use crucible::core::settings::WorkerSettings;
use crucible::core::types::{CompileJob, JobOptions, Message, SourceUnit};
use crucible::transport::codec;
use std::io::Cursor;

fn bench_settings(dir: &std::path::Path) -> WorkerSettings {
    let mut s = WorkerSettings::default();
    s.path.logging = dir.to_path_buf();
    s.path.libraries = dir.join("lib");
    s.path.framework = dir.join("runtime");
    s
}

fn source_unit(index: usize, payload_lines: usize) -> SourceUnit {
    let mut text = format!("unit u{index}\n");
    for line in 0..payload_lines {
        text.push_str(&format!("emit payload line {line}\n"));
    }
    SourceUnit::new(format!("u{index}.tp"), text.into_bytes())
}

fn bench_compile_all_valid(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let settings = bench_settings(dir.path());
    let resolver = ReferenceResolver::new(&settings.path, false);
    let backend = TextPackBackend::new();
    let engine = Engine::new(&settings, &resolver, &backend);

    let mut group = c.benchmark_group("compile_all_valid");
    for units in [1, 8, 64] {
        let job = CompileJob {
            source_files: (0..units).map(|i| source_unit(i, 16)).collect(),
            reference_files: vec![],
            options: JobOptions {
                use_standard_libraries: false,
                ..JobOptions::default()
            },
        };
        group.bench_with_input(BenchmarkId::from_parameter(units), &job, |b, job| {
            b.iter(|| {
                let result = engine.compile(black_box(1), black_box(job)).unwrap();
                black_box(result);
            });
        });
    }
    group.finish();
}

fn bench_compile_with_retries(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let settings = bench_settings(dir.path());
    let resolver = ReferenceResolver::new(&settings.path, false);
    let backend = TextPackBackend::new();
    let engine = Engine::new(&settings, &resolver, &backend);

    // Every fourth unit carries an unknown directive and gets excluded
    let job = CompileJob {
        source_files: (0..32)
            .map(|i| {
                if i % 4 == 0 {
                    SourceUnit::new(
                        format!("bad{i}.tp"),
                        format!("unit b{i}\nfrobnicate\n").into_bytes(),
                    )
                } else {
                    source_unit(i, 8)
                }
            })
            .collect(),
        reference_files: vec![],
        options: JobOptions {
            use_standard_libraries: false,
            ..JobOptions::default()
        },
    };

    c.bench_function("compile_with_retries", |b| {
        b.iter(|| {
            let result = engine.compile(black_box(2), black_box(&job)).unwrap();
            black_box(result);
        });
    });
}

fn bench_frame_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_roundtrip");
    for size_kb in [1, 64, 1024] {
        let job = CompileJob {
            source_files: vec![SourceUnit::new("big.tp", vec![b'x'; size_kb * 1024])],
            reference_files: vec![],
            options: JobOptions::default(),
        };
        let message = Message::compile(1, job);
        group.bench_with_input(BenchmarkId::from_parameter(size_kb), &message, |b, msg| {
            b.iter(|| {
                let mut buf = Vec::new();
                codec::write_frame(&mut buf, black_box(msg)).unwrap();
                let back = codec::read_frame(&mut Cursor::new(&buf)).unwrap();
                black_box(back);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_compile_all_valid,
    bench_compile_with_retries,
    bench_frame_roundtrip
);
criterion_main!(benches);
