//! # 框架集成测试
//!
//! 测试框架的完整工作流程：
//! - 创建 → 启动 → 安装 → 启动 bundle → 关闭
//! - 自动启动与启动级别变更
//! - 关闭后的操作

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chips_bundles::events::{FnBundleListener, FnFrameworkListener};
use chips_bundles::resource::MemoryContent;
use chips_bundles::{
    BundleActivator, BundleContext, BundleEventType, BundleId, BundleState, CoreError, Deployment,
    Framework, FrameworkConfig, FrameworkEventType, FrameworkState, Resource, StartOptions,
};
use parking_lot::Mutex;
use semver::Version;

// ============================================================================
// 测试辅助
// ============================================================================

/// 记录启动与停止顺序的激活器
struct RecordingActivator {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl BundleActivator for RecordingActivator {
    async fn start(&self, _context: &BundleContext) -> anyhow::Result<()> {
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&self, _context: &BundleContext) -> anyhow::Result<()> {
        self.log.lock().push(format!("stop:{}", self.name));
        Ok(())
    }
}

fn config() -> FrameworkConfig {
    FrameworkConfig::builder()
        .inline_delivery()
        .system_package("org.osgi.framework")
        .build()
}

fn recording_resource(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Resource> {
    let activator_name = name.to_string();
    let activator_log = log.clone();
    let content = MemoryContent::new().with_activator("Activator", move || {
        Arc::new(RecordingActivator {
            name: activator_name.clone(),
            log: activator_log.clone(),
        }) as Arc<dyn BundleActivator>
    });
    Resource::builder(name, Version::new(1, 0, 0))
        .activator("Activator")
        .content(Arc::new(content))
        .build()
        .unwrap()
}

async fn running_framework() -> Framework {
    let framework = Framework::new(config()).await.unwrap();
    framework.start().await.unwrap();
    framework
}

// ============================================================================
// 创建与启动
// ============================================================================

#[tokio::test]
async fn test_system_bundle_is_active() {
    let framework = Framework::new(config()).await.unwrap();
    assert_eq!(framework.state(), FrameworkState::Created);

    let system = framework.system_bundle().unwrap();
    assert_eq!(system.id(), BundleId::SYSTEM);
    assert_eq!(system.state(), BundleState::Active);
    assert_eq!(system.symbolic_name(), "system.bundle");
    assert!(system.current_revision().is_resolved());
    assert_eq!(
        system.current_revision().exported_packages(),
        vec!["org.osgi.framework".to_string()]
    );
}

#[tokio::test]
async fn test_start_fires_framework_started() {
    let framework = Framework::new(config()).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = seen.clone();
    framework.events().add_framework_listener(
        BundleId::SYSTEM,
        FnFrameworkListener::new(move |event| {
            s.lock().push(event.kind());
            Ok(())
        }),
    );

    framework.start().await.unwrap();
    assert_eq!(framework.state(), FrameworkState::Active);
    assert_eq!(*seen.lock(), vec![FrameworkEventType::Started]);

    // 重复启动
    let result = framework.start().await;
    assert!(matches!(result, Err(CoreError::IllegalState { .. })));
}

// ============================================================================
// 安装
// ============================================================================

#[tokio::test]
async fn test_install_assigns_increasing_ids() {
    let framework = running_framework().await;
    let installed = Arc::new(AtomicUsize::new(0));

    let c = installed.clone();
    framework.events().add_bundle_listener(
        BundleId::SYSTEM,
        FnBundleListener::new(move |event| {
            if event.kind() == BundleEventType::Installed {
                c.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }),
    );

    let a = Resource::builder("a", Version::new(1, 0, 0)).build().unwrap();
    let b = Resource::builder("b", Version::new(1, 0, 0)).build().unwrap();
    let bundle_a = framework.install_bundle(Deployment::new("mem:a", a)).await.unwrap();
    let bundle_b = framework.install_bundle(Deployment::new("mem:b", b)).await.unwrap();

    assert_eq!(bundle_a.id(), BundleId::new(1));
    assert_eq!(bundle_b.id(), BundleId::new(2));
    assert_eq!(bundle_a.state(), BundleState::Installed);
    assert_eq!(framework.bundles().len(), 3);
    assert_eq!(installed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_install_same_location_returns_existing() {
    let framework = running_framework().await;

    let first = Resource::builder("a", Version::new(1, 0, 0)).build().unwrap();
    let second = Resource::builder("a", Version::new(2, 0, 0)).build().unwrap();
    let one = framework.install_bundle(Deployment::new("mem:a", first)).await.unwrap();
    let two = framework.install_bundle(Deployment::new("mem:a", second)).await.unwrap();

    assert_eq!(one.id(), two.id());
    assert_eq!(two.version(), Version::new(1, 0, 0));
    assert!(framework.bundle_by_location("mem:a").is_some());
}

#[tokio::test]
async fn test_install_attached_resource_rejected() {
    let framework = running_framework().await;
    let resource = Resource::builder("a", Version::new(1, 0, 0)).build().unwrap();

    framework
        .install_bundle(Deployment::new("mem:a", resource.clone()))
        .await
        .unwrap();
    let result = framework.install_bundle(Deployment::new("mem:other", resource)).await;
    assert!(matches!(result, Err(CoreError::IllegalState { .. })));
}

#[tokio::test]
async fn test_unknown_bundle_id() {
    let framework = running_framework().await;
    let result = framework.start_bundle(BundleId::new(42), StartOptions::NONE).await;
    assert!(matches!(result, Err(CoreError::BundleNotFound(42))));
}

// ============================================================================
// 自动启动与启动级别
// ============================================================================

#[tokio::test]
async fn test_auto_start_on_framework_start() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let framework = Framework::new(config()).await.unwrap();

    let bundle = framework
        .install_bundle(Deployment::new("mem:a", recording_resource("a", &log)).auto_start(true))
        .await
        .unwrap();
    assert_eq!(bundle.state(), BundleState::Installed);

    framework.start().await.unwrap();
    assert_eq!(bundle.state(), BundleState::Active);
    assert_eq!(*log.lock(), vec!["start:a".to_string()]);
}

#[tokio::test]
async fn test_raise_and_lower_start_level() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let framework = running_framework().await;
    let changed = Arc::new(AtomicUsize::new(0));

    let c = changed.clone();
    framework.events().add_framework_listener(
        BundleId::SYSTEM,
        FnFrameworkListener::new(move |event| {
            if event.kind() == FrameworkEventType::StartLevelChanged {
                c.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }),
    );

    let low = framework
        .install_bundle(Deployment::new("mem:low", recording_resource("low", &log)).with_start_level(2))
        .await
        .unwrap();
    let high = framework
        .install_bundle(Deployment::new("mem:high", recording_resource("high", &log)).with_start_level(3))
        .await
        .unwrap();

    // 持久启动在级别不满足时推迟
    framework.start_bundle(low.id(), StartOptions::NONE).await.unwrap();
    framework.start_bundle(high.id(), StartOptions::NONE).await.unwrap();
    assert_eq!(low.state(), BundleState::Resolved);
    assert_eq!(high.state(), BundleState::Resolved);
    assert!(log.lock().is_empty());

    framework.set_start_level(3).await.unwrap();
    assert_eq!(framework.start_level(), 3);
    assert_eq!(low.state(), BundleState::Active);
    assert_eq!(high.state(), BundleState::Active);

    framework.set_start_level(2).await.unwrap();
    assert_eq!(low.state(), BundleState::Active);
    assert_eq!(high.state(), BundleState::Resolved);

    // 降级停止时保留持久标记，再次升级重新启动
    framework.set_start_level(3).await.unwrap();
    assert_eq!(high.state(), BundleState::Active);

    assert_eq!(
        *log.lock(),
        vec![
            "start:low".to_string(),
            "start:high".to_string(),
            "stop:high".to_string(),
            "start:high".to_string(),
        ]
    );
    assert_eq!(changed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_system_bundle_start_level_is_fixed() {
    let framework = running_framework().await;
    let result = framework.set_bundle_start_level(BundleId::SYSTEM, 5);
    assert!(matches!(result, Err(CoreError::Unsupported(_))));
}

// ============================================================================
// 关闭
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_in_reverse_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let framework = running_framework().await;

    for name in ["a", "b", "c"] {
        let bundle = framework
            .install_bundle(Deployment::new(format!("mem:{name}"), recording_resource(name, &log)))
            .await
            .unwrap();
        framework.start_bundle(bundle.id(), StartOptions::NONE).await.unwrap();
    }
    log.lock().clear();

    framework.shutdown().await.unwrap();
    assert_eq!(framework.state(), FrameworkState::Stopped);
    assert_eq!(
        *log.lock(),
        vec!["stop:c".to_string(), "stop:b".to_string(), "stop:a".to_string()]
    );
    assert_eq!(framework.events().bundle_listener_count(), 0);
}

#[tokio::test]
async fn test_operations_after_shutdown() {
    let framework = running_framework().await;
    framework.shutdown().await.unwrap();

    let resource = Resource::builder("late", Version::new(1, 0, 0)).build().unwrap();
    let result = framework.install_bundle(Deployment::new("mem:late", resource)).await;
    assert!(matches!(result, Err(CoreError::FrameworkInactive)));

    // 重复关闭无副作用
    framework.shutdown().await.unwrap();
}
