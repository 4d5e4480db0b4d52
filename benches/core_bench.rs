//! Benchmarks for whiskdeploy core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fmt::Write;
use std::path::PathBuf;
use whiskdeploy::core::composer::{self, ComposeContext};
use whiskdeploy::core::runtimes::RuntimeCatalog;
use whiskdeploy::core::{params, parser};

fn manifest_with(actions: usize) -> String {
    let mut yaml = String::from("packages:\n  bench:\n    actions:\n");
    for i in 0..actions {
        let _ = write!(
            yaml,
            "      a{i}:\n        code: \"function main() {{ return {{}}; }}\"\n        runtime: nodejs:14\n        inputs:\n          name: world\n          count: {i}\n"
        );
    }
    yaml.push_str("    triggers:\n      tick: {}\n    rules:\n      on-tick:\n        trigger: tick\n        action: a0\n");
    yaml
}

fn bench_parse_compose(c: &mut Criterion) {
    let catalog = RuntimeCatalog::bundled();
    let mut group = c.benchmark_group("parse_compose");
    for actions in [1, 16, 128] {
        let yaml = manifest_with(actions);
        group.bench_with_input(BenchmarkId::from_parameter(actions), &yaml, |b, yaml| {
            b.iter(|| {
                let doc = parser::parse_manifest(black_box(yaml), "manifest.yaml").unwrap();
                let ctx = ComposeContext {
                    namespace: "guest".to_string(),
                    manifest_path: PathBuf::from("manifest.yaml"),
                    project_path: PathBuf::from("."),
                    catalog: &catalog,
                    allow_defaults: false,
                    managed: None,
                };
                black_box(composer::compose(&doc, &ctx).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_param_resolve(c: &mut Criterion) {
    let cases: Vec<(&str, serde_yaml_ng::Value)> = vec![
        ("scalar", serde_yaml_ng::from_str("hello").unwrap()),
        ("env", serde_yaml_ng::from_str("\"${HOME}/data\"").unwrap()),
        (
            "multiline",
            serde_yaml_ng::from_str("type: integer\nvalue: 42\nrequired: true").unwrap(),
        ),
    ];
    let mut group = c.benchmark_group("param_resolve");
    for (label, raw) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(label), raw, |b, raw| {
            b.iter(|| black_box(params::resolve("p", black_box(raw), "manifest.yaml").unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_compose, bench_param_resolve);
criterion_main!(benches);
