//! 回退加载器集成测试
//!
//! 测试动态导入的模式匹配、候选顺序、按需解析与嵌套查找的终止。

use std::sync::Arc;

use async_trait::async_trait;
use chips_bundles::module::{
    dynamic_load_depth, FallbackLoader, InMemoryModuleGraph, LoadedEntry, Module, ModuleGraph,
    ModuleIdentifier,
};
use chips_bundles::resource::{MemoryContent, Wire};
use chips_bundles::{
    Bundle, BundleState, CoreError, Deployment, Framework, FrameworkConfig, Resource, Result,
};
use parking_lot::Mutex;
use semver::Version;

// ============================================================================
// 测试辅助
// ============================================================================

const THING: &str = "com/acme/impl/Thing.class";

async fn framework_with(graph: Option<Arc<dyn ModuleGraph>>) -> Framework {
    let config = FrameworkConfig::builder().inline_delivery().build();
    let mut builder = Framework::builder(config);
    if let Some(graph) = graph {
        builder = builder.module_graph(graph);
    }
    let framework = builder.build().await.unwrap();
    framework.start().await.unwrap();
    framework
}

async fn install(framework: &Framework, resource: Arc<Resource>) -> Arc<Bundle> {
    let location = format!("mem:{}", resource.canonical_name());
    framework
        .install_bundle(Deployment::new(location, resource))
        .await
        .unwrap()
}

fn provider(name: &str, with_entry: bool) -> Arc<Resource> {
    let mut content = MemoryContent::new();
    if with_entry {
        content = content.with_entry(THING, format!("from {name}"));
    }
    Resource::builder(name, Version::new(1, 0, 0))
        .export_package("com.acme.impl")
        .content(Arc::new(content))
        .build()
        .unwrap()
}

async fn host_loader(framework: &Framework, host: Arc<Resource>) -> FallbackLoader {
    let bundle = install(framework, host).await;
    framework.resolve_bundle(bundle.id()).await.unwrap();
    framework.fallback_loader(bundle.id()).await.unwrap()
}

fn text(entry: &LoadedEntry) -> String {
    String::from_utf8_lossy(&entry.data).into_owned()
}

// ============================================================================
// 动态查找
// ============================================================================

#[tokio::test]
async fn test_wildcard_import_resolves_candidate_on_demand() {
    let framework = framework_with(None).await;
    let host = Resource::builder("host", Version::new(1, 0, 0))
        .dynamic_import("com.acme.*")
        .build()
        .unwrap();
    let loader = host_loader(&framework, host).await;
    let impl_bundle = install(&framework, provider("impl", true)).await;
    assert_eq!(impl_bundle.state(), BundleState::Installed);

    let entry = loader.load_class("com.acme.impl.Thing").await.unwrap();
    assert_eq!(text(&entry), "from impl");
    assert_eq!(entry.path, THING);
    assert_eq!(impl_bundle.state(), BundleState::Resolved);

    // 不匹配模式的路径不查找
    assert!(loader.load_resource("org/other/Thing.class").await.is_none());
}

#[tokio::test]
async fn test_resolved_modules_searched_first() {
    let framework = framework_with(None).await;
    let host = Resource::builder("host", Version::new(1, 0, 0))
        .dynamic_import("*")
        .build()
        .unwrap();
    let loader = host_loader(&framework, host).await;

    let first = install(&framework, provider("first", true)).await;
    framework.resolve_bundle(first.id()).await.unwrap();
    let second = install(&framework, provider("second", true)).await;

    let entry = loader.load_resource(THING).await.unwrap();
    assert_eq!(text(&entry), "from first");
    assert_eq!(second.state(), BundleState::Installed);
}

#[tokio::test]
async fn test_search_continues_past_candidate_without_entry() {
    let framework = framework_with(None).await;
    let host = Resource::builder("host", Version::new(1, 0, 0))
        .dynamic_import("com.acme.impl")
        .build()
        .unwrap();
    let loader = host_loader(&framework, host).await;

    let empty = install(&framework, provider("empty", false)).await;
    framework.resolve_bundle(empty.id()).await.unwrap();
    install(&framework, provider("full", true)).await;

    let entry = loader.load_resource(THING).await.unwrap();
    assert_eq!(text(&entry), "from full");
}

#[tokio::test]
async fn test_named_exporter_must_match() {
    let framework = framework_with(None).await;
    let host = Resource::builder("host", Version::new(1, 0, 0))
        .dynamic_import_from("com.acme.*", Some("wanted"))
        .build()
        .unwrap();
    let loader = host_loader(&framework, host).await;

    install(&framework, provider("unwanted", true)).await;
    assert!(loader.load_resource(THING).await.is_none());

    install(&framework, provider("wanted", true)).await;
    let entry = loader.load_resource(THING).await.unwrap();
    assert_eq!(text(&entry), "from wanted");
}

#[tokio::test]
async fn test_host_exports_and_static_imports_skip_lookup() {
    let framework = framework_with(None).await;
    let api = install(
        &framework,
        Resource::builder("api", Version::new(1, 0, 0))
            .export_package("com.acme.api")
            .content(Arc::new(
                MemoryContent::new().with_entry("com/acme/api/Api.class", "api"),
            ))
            .build()
            .unwrap(),
    )
    .await;
    framework.resolve_bundle(api.id()).await.unwrap();
    install(&framework, provider("impl", true)).await;

    let host = Resource::builder("host", Version::new(1, 0, 0))
        .export_package("com.acme.impl")
        .import_package("com.acme.api")
        .dynamic_import("*")
        .build()
        .unwrap();
    let loader = host_loader(&framework, host).await;

    assert!(loader.find_matching_patterns("com/acme/impl").is_empty());
    assert!(loader.load_resource(THING).await.is_none());
    assert!(loader.load_class("com.acme.api.Api").await.is_none());
}

#[tokio::test]
async fn test_fallback_loader_requires_resolved_host() {
    let framework = framework_with(None).await;
    let bundle = install(
        &framework,
        Resource::builder("host", Version::new(1, 0, 0)).build().unwrap(),
    )
    .await;
    let result = framework.fallback_loader(bundle.id()).await;
    assert!(matches!(result, Err(CoreError::IllegalState { .. })));

    let fragment = install(
        &framework,
        Resource::builder("host.nls", Version::new(1, 0, 0))
            .fragment_host("host")
            .build()
            .unwrap(),
    )
    .await;
    framework.resolve_bundles(None).await.unwrap();
    let result = framework.fallback_loader(fragment.id()).await;
    assert!(matches!(result, Err(CoreError::IllegalState { .. })));
}

// ============================================================================
// 嵌套查找
// ============================================================================

/// 加载条目时回调宿主加载器的模块图
struct ReentrantGraph {
    inner: InMemoryModuleGraph,
    loader: Mutex<Option<Arc<FallbackLoader>>>,
    observed: Mutex<Vec<(usize, bool)>>,
}

#[async_trait]
impl ModuleGraph for ReentrantGraph {
    fn identifier_for(&self, resource: &Resource) -> ModuleIdentifier {
        self.inner.identifier_for(resource)
    }

    async fn register(&self, resource: &Arc<Resource>, wires: &[Wire]) -> Result<ModuleIdentifier> {
        self.inner.register(resource, wires).await
    }

    async fn create_artifact(&self, identifier: &ModuleIdentifier) -> Result<()> {
        self.inner.create_artifact(identifier).await
    }

    async fn lookup(&self, identifier: &ModuleIdentifier) -> Option<Arc<Module>> {
        self.inner.lookup(identifier).await
    }

    async fn load_resource(
        &self,
        identifier: &ModuleIdentifier,
        path: &str,
    ) -> Result<Option<LoadedEntry>> {
        let loader = self.loader.lock().clone();
        if let Some(loader) = loader {
            let depth = dynamic_load_depth(path);
            let nested = loader.load_resource(path).await;
            self.observed.lock().push((depth, nested.is_some()));
        }
        self.inner.load_resource(identifier, path).await
    }

    async fn remove(&self, resource: &Resource) -> Option<Arc<Module>> {
        self.inner.remove(resource).await
    }

    async fn identifiers(&self) -> Vec<ModuleIdentifier> {
        self.inner.identifiers().await
    }
}

#[tokio::test]
async fn test_nested_lookup_terminates() {
    let graph = Arc::new(ReentrantGraph {
        inner: InMemoryModuleGraph::new("test"),
        loader: Mutex::new(None),
        observed: Mutex::new(Vec::new()),
    });
    let framework = framework_with(Some(graph.clone() as Arc<dyn ModuleGraph>)).await;

    let host = Resource::builder("host", Version::new(1, 0, 0))
        .dynamic_import("com.acme.*")
        .build()
        .unwrap();
    let loader = Arc::new(host_loader(&framework, host).await);
    let provider_bundle = install(&framework, provider("impl", true)).await;
    framework.resolve_bundle(provider_bundle.id()).await.unwrap();
    *graph.loader.lock() = Some(loader.clone());

    let entry = loader.load_resource(THING).await.unwrap();
    assert_eq!(text(&entry), "from impl");

    // 嵌套查找在同一路径上直接返回，不再进入模块图
    assert_eq!(*graph.observed.lock(), vec![(1, false)]);
    assert_eq!(dynamic_load_depth(THING), 0);
}
