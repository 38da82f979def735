//! 解析器性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 纯求解（导入链）基准
//! - 安装并解析一组 bundle 的完整流程基准
//! - 过滤器匹配基准

use std::sync::Arc;

use chips_bundles::resolver::{ConstraintSolver, DefaultSolver, Environment, ResolveContext};
use chips_bundles::resource::{AttrValue, Attributes, Filter};
use chips_bundles::{Deployment, Framework, FrameworkConfig, Resource};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use semver::Version;

// ============================================================================
// 测试辅助
// ============================================================================

/// 创建导入链：第 i 个资源导出 `p{i}` 并导入 `p{i-1}`
fn import_chain(len: usize) -> Vec<Arc<Resource>> {
    (0..len)
        .map(|i| {
            let mut builder = Resource::builder(format!("bench.{i}"), Version::new(1, 0, 0))
                .export_package(format!("p{i}"));
            if i > 0 {
                builder = builder.import_package(format!("p{}", i - 1));
            }
            builder.build().unwrap()
        })
        .collect()
}

// ============================================================================
// 基准
// ============================================================================

fn bench_solver(c: &mut Criterion) {
    let mut group = c.benchmark_group("solver");

    for len in [10usize, 50, 200] {
        let env = Environment::new();
        let chain = import_chain(len);
        env.install_resources(&chain);
        let last = chain.last().cloned().unwrap();
        let context = ResolveContext::new(vec![last], Vec::new());
        let solver = DefaultSolver::new();

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("import_chain", len), &len, |b, _| {
            b.iter(|| black_box(solver.resolve(&env, &context).unwrap()))
        });
    }

    group.finish();
}

fn bench_install_and_resolve(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("framework");
    group.sample_size(20);

    for len in [10usize, 50] {
        group.bench_with_input(BenchmarkId::new("install_resolve", len), &len, |b, &len| {
            b.to_async(&runtime).iter(|| async move {
                let config = FrameworkConfig::builder().inline_delivery().build();
                let framework = Framework::new(config).await.unwrap();
                framework.start().await.unwrap();
                for (i, resource) in import_chain(len).into_iter().enumerate() {
                    framework
                        .install_bundle(Deployment::new(format!("bench:{i}"), resource))
                        .await
                        .unwrap();
                }
                black_box(framework.resolve_bundles(None).await.unwrap());
                framework.shutdown().await.unwrap();
            })
        });
    }

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let filter = Filter::parse("(&(osgi.wiring.package=com.acme.api)(version>=1.2.0))").unwrap();
    let mut attrs = Attributes::new();
    attrs.insert(
        "osgi.wiring.package".to_string(),
        AttrValue::from("com.acme.api"),
    );
    attrs.insert("version".to_string(), AttrValue::from(Version::new(1, 4, 0)));

    c.bench_function("filter_match", |b| {
        b.iter(|| black_box(filter.matches(black_box(&attrs))))
    });
}

criterion_group!(benches, bench_solver, bench_install_and_resolve, bench_filter);
criterion_main!(benches);
