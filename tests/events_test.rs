//! 事件分发集成测试
//!
//! 测试服务事件的过滤与 ENDMATCH、钩子、框架 ERROR 事件的合成以及后台投递顺序。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chips_bundles::events::{
    EventHook, FnBundleListener, FnFrameworkListener, FnServiceListener, ListenerHook,
    ListenerInfo, RegisteredService, ServiceState, ShrinkableSet,
};
use chips_bundles::resource::{AttrValue, Attributes};
use chips_bundles::{
    BundleEventType, BundleId, Deployment, Framework, FrameworkConfig, FrameworkEventType,
    FrameworkEvents, LockManager, Resource, ServiceEvent, ServiceEventType, ServiceListener,
};
use parking_lot::Mutex;
use semver::Version;

// ============================================================================
// 测试辅助
// ============================================================================

fn inline_events() -> FrameworkEvents {
    let events = FrameworkEvents::new(LockManager::new(Duration::from_secs(1)), false);
    events.activate();
    events
}

fn color(value: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("color".to_string(), AttrValue::from(value));
    attrs
}

fn service(owner: u64, properties: Attributes) -> Arc<RegisteredService> {
    Arc::new(RegisteredService::new(
        1,
        BundleId::new(owner),
        &["com.acme.Greeter"],
        properties,
    ))
}

fn recording_service_listener(
    seen: &Arc<Mutex<Vec<ServiceEventType>>>,
) -> Arc<dyn ServiceListener> {
    let s = seen.clone();
    FnServiceListener::new(move |event: &ServiceEvent| {
        s.lock().push(event.kind());
        Ok(())
    })
}

/// 从候选中删除指定 bundle 的事件钩子
struct HidingHook {
    hidden: BundleId,
}

impl EventHook for HidingHook {
    fn event(&self, _event: &ServiceEvent, bundles: &mut ShrinkableSet<BundleId>) {
        bundles.remove(&self.hidden);
    }
}

/// 记录通知的监听器钩子
#[derive(Default)]
struct RecordingListenerHook {
    log: Mutex<Vec<(bool, Option<String>, bool)>>,
}

impl ListenerHook for RecordingListenerHook {
    fn added(&self, listeners: &[Arc<ListenerInfo>]) {
        for info in listeners {
            self.log
                .lock()
                .push((true, info.filter().map(str::to_string), info.is_removed()));
        }
    }

    fn removed(&self, listeners: &[Arc<ListenerInfo>]) {
        for info in listeners {
            self.log
                .lock()
                .push((false, info.filter().map(str::to_string), info.is_removed()));
        }
    }
}

// ============================================================================
// 服务事件
// ============================================================================

#[test]
fn test_modified_endmatch() {
    let events = inline_events();
    let seen = Arc::new(Mutex::new(Vec::new()));
    events
        .add_service_listener(
            BundleId::new(2),
            recording_service_listener(&seen),
            Some("(color=red)"),
        )
        .unwrap();

    let svc = service(1, color("red"));
    events.fire_service_event(ServiceEventType::Registered, svc.clone());

    svc.set_properties(color("blue"));
    events.fire_service_event(ServiceEventType::Modified, svc.clone());

    // 修改前后都不匹配时不投递
    svc.set_properties(color("green"));
    events.fire_service_event(ServiceEventType::Modified, svc.clone());

    svc.set_properties(color("red"));
    events.fire_service_event(ServiceEventType::Modified, svc.clone());

    assert_eq!(
        *seen.lock(),
        vec![
            ServiceEventType::Registered,
            ServiceEventType::ModifiedEndmatch,
            ServiceEventType::Modified,
        ]
    );
}

#[test]
fn test_invalid_filter_rejected() {
    let events = inline_events();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let result = events.add_service_listener(
        BundleId::new(2),
        recording_service_listener(&seen),
        Some("(color=red"),
    );
    assert!(result.is_err());
    assert!(events.service_listener_infos(None).is_empty());
}

#[test]
fn test_event_hook_hides_bundle() {
    let events = inline_events();
    let hidden = Arc::new(Mutex::new(Vec::new()));
    let visible = Arc::new(Mutex::new(Vec::new()));
    events
        .add_service_listener(BundleId::new(2), recording_service_listener(&hidden), None)
        .unwrap();
    events
        .add_service_listener(BundleId::new(3), recording_service_listener(&visible), None)
        .unwrap();
    events.hooks().add_event_hook(
        Arc::new(HidingHook {
            hidden: BundleId::new(2),
        }),
        0,
    );

    events.fire_service_event(ServiceEventType::Registered, service(1, color("red")));

    assert!(hidden.lock().is_empty());
    assert_eq!(*visible.lock(), vec![ServiceEventType::Registered]);
}

#[test]
fn test_unassignable_class_skipped_unless_all_services() {
    let events = inline_events();
    let plain = Arc::new(Mutex::new(Vec::new()));
    let all = Arc::new(AtomicUsize::new(0));

    events
        .add_service_listener(BundleId::new(2), recording_service_listener(&plain), None)
        .unwrap();
    let c = all.clone();
    events
        .add_service_listener(
            BundleId::new(2),
            FnServiceListener::all_services(move |_: &ServiceEvent| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
        )
        .unwrap();

    let svc = service(1, color("red"));
    svc.hide_class_from(BundleId::new(2), "com.acme.Greeter");
    assert!(!svc.is_assignable_to(BundleId::new(2), "com.acme.Greeter"));

    events.fire_service_event(ServiceEventType::Registered, svc);
    assert!(plain.lock().is_empty());
    assert_eq!(all.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_service_listener_isolated() {
    let events = inline_events();
    let seen = Arc::new(Mutex::new(Vec::new()));
    events
        .add_service_listener(
            BundleId::new(2),
            FnServiceListener::new(|_: &ServiceEvent| -> anyhow::Result<()> {
                panic!("监听器崩溃")
            }),
            None,
        )
        .unwrap();
    events
        .add_service_listener(BundleId::new(3), recording_service_listener(&seen), None)
        .unwrap();

    events.fire_service_event(ServiceEventType::Registered, service(1, color("red")));
    assert_eq!(*seen.lock(), vec![ServiceEventType::Registered]);
}

#[test]
fn test_listener_hook_sees_replacement() {
    let events = inline_events();
    let hook = Arc::new(RecordingListenerHook::default());
    events.hooks().add_listener_hook(hook.clone(), 0);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = recording_service_listener(&seen);
    events
        .add_service_listener(BundleId::new(2), listener.clone(), Some("(color=red)"))
        .unwrap();
    events
        .add_service_listener(BundleId::new(2), listener.clone(), Some("(color=blue)"))
        .unwrap();

    assert_eq!(
        *hook.log.lock(),
        vec![
            (true, Some("(color=red)".to_string()), false),
            (false, Some("(color=red)".to_string()), true),
            (true, Some("(color=blue)".to_string()), false),
        ]
    );
    let infos = events.service_listener_infos(Some(BundleId::new(2)));
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].filter(), Some("(color=blue)"));

    // 替换后的过滤器生效
    events.fire_service_event(ServiceEventType::Registered, service(1, color("red")));
    assert!(seen.lock().is_empty());

    events.remove_bundle_listeners(BundleId::new(2));
    assert_eq!(hook.log.lock().len(), 4);
    assert!(events.service_listener_infos(None).is_empty());
}

// ============================================================================
// 框架事件
// ============================================================================

#[test]
fn test_listener_failure_fires_error_event() {
    let events = inline_events();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let kinds = Arc::new(Mutex::new(Vec::new()));

    events.add_framework_listener(
        BundleId::new(1),
        FnFrameworkListener::new(|event| {
            if event.kind() == FrameworkEventType::Error {
                return Ok(());
            }
            anyhow::bail!("坏监听器")
        }),
    );
    let e = errors.clone();
    let k = kinds.clone();
    events.add_framework_listener(
        BundleId::new(2),
        FnFrameworkListener::new(move |event| {
            k.lock().push(event.kind());
            if let Some(cause) = event.cause() {
                e.lock().push(cause.to_string());
            }
            Ok(())
        }),
    );

    events.fire_framework_event(BundleId::new(5), FrameworkEventType::Info, None);

    let kinds = kinds.lock();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&FrameworkEventType::Info));
    assert!(kinds.contains(&FrameworkEventType::Error));
    assert_eq!(*errors.lock(), vec!["坏监听器".to_string()]);
}

#[test]
fn test_failing_error_listener_not_resynthesized() {
    let events = inline_events();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    events.add_framework_listener(
        BundleId::new(1),
        FnFrameworkListener::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("总是失败")
        }),
    );

    events.fire_framework_event(
        BundleId::new(1),
        FrameworkEventType::Error,
        Some(anyhow::anyhow!("原始错误")),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// 后台投递
// ============================================================================

#[tokio::test]
async fn test_async_resolved_events_in_wiremap_order() {
    let framework = Framework::new(FrameworkConfig::default()).await.unwrap();
    framework.start().await.unwrap();

    let resolved = Arc::new(Mutex::new(Vec::new()));
    let r = resolved.clone();
    framework.events().add_bundle_listener(
        BundleId::SYSTEM,
        FnBundleListener::new(move |event| {
            if event.kind() == BundleEventType::Resolved {
                r.lock().push(event.bundle().symbolic_name());
            }
            Ok(())
        }),
    );

    let a = Resource::builder("a", Version::new(1, 0, 0))
        .export_package("p")
        .build()
        .unwrap();
    let b = Resource::builder("b", Version::new(1, 0, 0))
        .import_package("p")
        .build()
        .unwrap();
    framework.install_bundle(Deployment::new("mem:a", a.clone())).await.unwrap();
    framework.install_bundle(Deployment::new("mem:b", b.clone())).await.unwrap();

    let context = framework
        .resolver()
        .create_resolve_context(vec![a.clone(), b.clone()], Vec::new());
    let wiremap = framework.resolver().resolve_and_apply(&context).await.unwrap();
    let wires = wiremap.get(b.id()).unwrap();
    assert_eq!(wires.len(), 1);
    assert_eq!(wires[0].provider().id(), a.id());

    tokio::time::timeout(Duration::from_secs(5), async {
        while resolved.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*resolved.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_async_listener_skips_starting() {
    let framework = Framework::new(FrameworkConfig::default()).await.unwrap();
    framework.start().await.unwrap();

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let k = kinds.clone();
    framework.events().add_bundle_listener(
        BundleId::SYSTEM,
        FnBundleListener::new(move |event| {
            k.lock().push(event.kind());
            Ok(())
        }),
    );

    let bundle = framework
        .install_bundle(Deployment::new(
            "mem:a",
            Resource::builder("a", Version::new(1, 0, 0)).build().unwrap(),
        ))
        .await
        .unwrap();
    framework
        .start_bundle(bundle.id(), chips_bundles::StartOptions::NONE)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while kinds.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        *kinds.lock(),
        vec![
            BundleEventType::Installed,
            BundleEventType::Resolved,
            BundleEventType::Started,
        ]
    );
}
