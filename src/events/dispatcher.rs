//! 事件投递子系统
//!
//! 按监听器种类分别维护以所属 bundle 为键的注册表，每种注册表由各自的
//! 可重入锁保护；监听器钩子的通知也在该锁内进行，因此钩子回调中可以再次
//! 注册或注销监听器。
//!
//! # 投递规则
//!
//! - **bundle 事件**：先在触发任务上依次调用同步监听器，其余监听器在后台
//!   任务中调用，且只投递 INSTALLED、RESOLVED、STARTED、STOPPED、UPDATED、
//!   UNRESOLVED、UNINSTALLED
//! - **框架事件**：完全异步；处理非 ERROR 事件失败时会再触发一个携带失败原因的
//!   ERROR 事件
//! - **服务事件**：同步；先由事件钩子（排名高者先）筛选接收 bundle，再按对象类
//!   可赋值性与过滤器筛选，修改后不再匹配的监听器收到 MODIFIED_ENDMATCH
//!
//! 后台投递使用单个任务按顺序处理，保证事件的触发顺序。监听器返回错误或 panic
//! 时只记录日志。

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::event::{
    BundleEvent, BundleEventType, FrameworkEvent, FrameworkEventType, ServiceEvent,
    ServiceEventType,
};
use super::hooks::{HookRegistry, ListenerInfo, ShrinkableSet};
use super::listener::{same_listener, BundleListener, FrameworkListener, ServiceListener};
use super::service::ServiceState;
use crate::bundle::{Bundle, BundleId};
use crate::lock::LockManager;
use crate::resource::Filter;
use crate::utils::{CoreError, Result};

type Job = Box<dyn FnOnce() + Send>;
type Registry<T> = ReentrantMutex<RefCell<BTreeMap<BundleId, Vec<T>>>>;

#[derive(Clone)]
struct BundleRegistration {
    listener: Arc<dyn BundleListener>,
}

#[derive(Clone)]
struct FrameworkRegistration {
    listener: Arc<dyn FrameworkListener>,
}

#[derive(Clone)]
struct ServiceRegistration {
    owner: BundleId,
    listener: Arc<dyn ServiceListener>,
    filter: Option<Filter>,
    info: Arc<ListenerInfo>,
}

struct EventsInner {
    bundle_listeners: Registry<BundleRegistration>,
    framework_listeners: Registry<FrameworkRegistration>,
    service_listeners: Registry<ServiceRegistration>,
    hooks: HookRegistry,
    lock_manager: LockManager,
    async_delivery: bool,
    active: AtomicBool,
    worker: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

/// 框架事件子系统
#[derive(Clone)]
pub struct FrameworkEvents {
    inner: Arc<EventsInner>,
}

impl FrameworkEvents {
    /// 创建事件子系统
    ///
    /// # 参数
    ///
    /// * `lock_manager` - 用于检测触发任务是否持有框架锁
    /// * `async_delivery` - 为 `false` 时异步监听器在触发任务上直接调用
    pub fn new(lock_manager: LockManager, async_delivery: bool) -> Self {
        Self {
            inner: Arc::new(EventsInner {
                bundle_listeners: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
                framework_listeners: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
                service_listeners: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
                hooks: HookRegistry::new(),
                lock_manager,
                async_delivery,
                active: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// 开始接受事件
    pub fn activate(&self) {
        self.inner.active.store(true, Ordering::Release);
        debug!("事件子系统已激活");
    }

    /// 是否接受事件
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// 钩子注册表
    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    /// 停止接受事件并清空全部注册表
    pub fn shutdown(&self) {
        self.inner.active.store(false, Ordering::Release);
        self.remove_all_listeners();
        self.inner.hooks.clear();
        self.inner.worker.lock().take();
        info!("事件子系统已关闭");
    }

    // ==================== 监听器注册 ====================

    /// 注册 bundle 监听器，重复注册同一实例无效果
    pub fn add_bundle_listener(&self, owner: BundleId, listener: Arc<dyn BundleListener>) {
        let guard = self.inner.bundle_listeners.lock();
        let mut map = guard.borrow_mut();
        let list = map.entry(owner).or_default();
        if list.iter().any(|r| same_listener(&r.listener, &listener)) {
            return;
        }
        trace!(bundle_id = %owner, synchronous = listener.is_synchronous(), "注册 bundle 监听器");
        list.push(BundleRegistration { listener });
    }

    /// 注销 bundle 监听器
    pub fn remove_bundle_listener(&self, owner: BundleId, listener: &Arc<dyn BundleListener>) {
        let guard = self.inner.bundle_listeners.lock();
        let mut map = guard.borrow_mut();
        if let Some(list) = map.get_mut(&owner) {
            list.retain(|r| !same_listener(&r.listener, listener));
            if list.is_empty() {
                map.remove(&owner);
            }
        }
    }

    /// 注册框架监听器，重复注册同一实例无效果
    pub fn add_framework_listener(&self, owner: BundleId, listener: Arc<dyn FrameworkListener>) {
        let guard = self.inner.framework_listeners.lock();
        let mut map = guard.borrow_mut();
        let list = map.entry(owner).or_default();
        if list.iter().any(|r| same_listener(&r.listener, &listener)) {
            return;
        }
        trace!(bundle_id = %owner, "注册框架监听器");
        list.push(FrameworkRegistration { listener });
    }

    /// 注销框架监听器
    pub fn remove_framework_listener(&self, owner: BundleId, listener: &Arc<dyn FrameworkListener>) {
        let guard = self.inner.framework_listeners.lock();
        let mut map = guard.borrow_mut();
        if let Some(list) = map.get_mut(&owner) {
            list.retain(|r| !same_listener(&r.listener, listener));
            if list.is_empty() {
                map.remove(&owner);
            }
        }
    }

    /// 注册服务监听器
    ///
    /// 同一 bundle 重复注册同一实例时替换其过滤器：旧注册先以移除通知钩子，
    /// 新注册在对事件可见之前通知钩子。
    ///
    /// # 错误
    ///
    /// 过滤器语法错误时返回 `CoreError::InvalidFilter`
    pub fn add_service_listener(
        &self,
        owner: BundleId,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> Result<()> {
        let parsed = filter.map(Filter::parse).transpose()?;
        let guard = self.inner.service_listeners.lock();

        let replaced = {
            let mut map = guard.borrow_mut();
            map.get_mut(&owner).and_then(|list| {
                let at = list.iter().position(|r| same_listener(&r.listener, &listener))?;
                Some(list.remove(at))
            })
        };
        if let Some(old) = replaced {
            old.info.mark_removed();
            self.notify_listener_hooks(&[old.info], false);
        }

        let info = Arc::new(ListenerInfo::new(owner, filter.map(str::to_string)));
        self.notify_listener_hooks(std::slice::from_ref(&info), true);

        trace!(bundle_id = %owner, filter = ?filter, "注册服务监听器");
        guard
            .borrow_mut()
            .entry(owner)
            .or_default()
            .push(ServiceRegistration {
                owner,
                listener,
                filter: parsed,
                info,
            });
        Ok(())
    }

    /// 注销服务监听器
    pub fn remove_service_listener(&self, owner: BundleId, listener: &Arc<dyn ServiceListener>) {
        let guard = self.inner.service_listeners.lock();
        let removed = {
            let mut map = guard.borrow_mut();
            let Some(list) = map.get_mut(&owner) else {
                return;
            };
            let Some(at) = list.iter().position(|r| same_listener(&r.listener, listener)) else {
                return;
            };
            let removed = list.remove(at);
            if list.is_empty() {
                map.remove(&owner);
            }
            removed
        };
        removed.info.mark_removed();
        self.notify_listener_hooks(&[removed.info], false);
    }

    /// 注销某个 bundle 的全部监听器
    ///
    /// 监听器钩子一次性收到被移除的全部服务监听器。
    pub fn remove_bundle_listeners(&self, owner: BundleId) {
        self.inner.bundle_listeners.lock().borrow_mut().remove(&owner);
        self.inner.framework_listeners.lock().borrow_mut().remove(&owner);

        let guard = self.inner.service_listeners.lock();
        let removed = guard.borrow_mut().remove(&owner).unwrap_or_default();
        self.retire_service_registrations(removed);
        debug!(bundle_id = %owner, "注销 bundle 的全部监听器");
    }

    /// 注销全部监听器
    pub fn remove_all_listeners(&self) {
        self.inner.bundle_listeners.lock().borrow_mut().clear();
        self.inner.framework_listeners.lock().borrow_mut().clear();

        let guard = self.inner.service_listeners.lock();
        let removed: Vec<_> = std::mem::take(&mut *guard.borrow_mut())
            .into_values()
            .flatten()
            .collect();
        self.retire_service_registrations(removed);
    }

    /// 服务监听器信息，`owner` 为 `None` 时返回全部
    pub fn service_listener_infos(&self, owner: Option<BundleId>) -> Vec<Arc<ListenerInfo>> {
        let guard = self.inner.service_listeners.lock();
        let map = guard.borrow();
        map.iter()
            .filter(|(id, _)| owner.map_or(true, |o| o == **id))
            .flat_map(|(_, list)| list.iter().map(|r| r.info.clone()))
            .collect()
    }

    /// 已注册的 bundle 监听器数量
    pub fn bundle_listener_count(&self) -> usize {
        self.inner
            .bundle_listeners
            .lock()
            .borrow()
            .values()
            .map(Vec::len)
            .sum()
    }

    /// 已注册的框架监听器数量
    pub fn framework_listener_count(&self) -> usize {
        self.inner
            .framework_listeners
            .lock()
            .borrow()
            .values()
            .map(Vec::len)
            .sum()
    }

    fn retire_service_registrations(&self, removed: Vec<ServiceRegistration>) {
        if removed.is_empty() {
            return;
        }
        let infos: Vec<Arc<ListenerInfo>> = removed
            .into_iter()
            .map(|r| {
                r.info.mark_removed();
                r.info
            })
            .collect();
        self.notify_listener_hooks(&infos, false);
    }

    fn notify_listener_hooks(&self, infos: &[Arc<ListenerInfo>], added: bool) {
        for hook in self.inner.hooks.listener_hooks() {
            let result = catch_unwind(AssertUnwindSafe(|| {
                if added {
                    hook.added(infos);
                } else {
                    hook.removed(infos);
                }
            }));
            if let Err(payload) = result {
                warn!(added, error = %panic_message(payload.as_ref()), "监听器钩子调用失败");
            }
        }
    }

    // ==================== 事件触发 ====================

    /// 触发 bundle 事件
    pub fn fire_bundle_event(&self, bundle: &Arc<Bundle>, kind: BundleEventType) {
        if !self.is_active() {
            trace!(bundle_id = %bundle.id(), event_type = %kind, "事件子系统未激活，丢弃 bundle 事件");
            return;
        }
        if kind.is_info() {
            info!(bundle_id = %bundle.id(), symbolic_name = %bundle.symbolic_name(), event_type = %kind, "bundle 事件");
        } else {
            debug!(bundle_id = %bundle.id(), symbolic_name = %bundle.symbolic_name(), event_type = %kind, "bundle 事件");
        }

        let mut listeners: Vec<Arc<dyn BundleListener>> = {
            let guard = self.inner.bundle_listeners.lock();
            let map = guard.borrow();
            map.values()
                .flat_map(|list| list.iter().map(|r| r.listener.clone()))
                .collect()
        };
        if listeners.is_empty() {
            return;
        }

        let event = BundleEvent::new(kind, bundle.clone());

        if listeners.iter().any(|l| l.is_synchronous()) && self.inner.lock_manager.holds_locks() {
            debug!(bundle_id = %bundle.id(), event_type = %kind, "在持有框架锁时调用同步监听器");
        }
        listeners.retain(|listener| {
            if listener.is_synchronous() {
                let _ = deliver(|| listener.bundle_changed(&event), "bundle", &kind);
                false
            } else {
                true
            }
        });

        if listeners.is_empty() || !kind.is_async_deliverable() {
            return;
        }
        self.dispatch(Box::new(move || {
            for listener in listeners {
                let _ = deliver(|| listener.bundle_changed(&event), "bundle", &event.kind());
            }
        }));
    }

    /// 触发框架事件
    pub fn fire_framework_event(
        &self,
        bundle: BundleId,
        kind: FrameworkEventType,
        cause: Option<anyhow::Error>,
    ) {
        self.fire_framework(FrameworkEvent::new(kind, bundle, cause));
    }

    fn fire_framework(&self, event: FrameworkEvent) {
        if !self.is_active() {
            trace!(event_type = %event.kind(), "事件子系统未激活，丢弃框架事件");
            return;
        }
        match event.cause() {
            Some(cause) if event.kind().is_info() => {
                info!(bundle_id = %event.bundle(), event_type = %event.kind(), cause = %cause, "框架事件")
            }
            _ if event.kind().is_info() => {
                info!(bundle_id = %event.bundle(), event_type = %event.kind(), "框架事件")
            }
            _ => debug!(bundle_id = %event.bundle(), event_type = %event.kind(), "框架事件"),
        }

        let listeners: Vec<Arc<dyn FrameworkListener>> = {
            let guard = self.inner.framework_listeners.lock();
            let map = guard.borrow();
            map.values()
                .flat_map(|list| list.iter().map(|r| r.listener.clone()))
                .collect()
        };
        if listeners.is_empty() {
            return;
        }

        let events = self.clone();
        self.dispatch(Box::new(move || {
            for listener in listeners {
                let Err(cause) = deliver(|| listener.framework_event(&event), "framework", &event.kind())
                else {
                    continue;
                };
                if event.kind() != FrameworkEventType::Error {
                    events.fire_framework(FrameworkEvent::with_shared_cause(
                        FrameworkEventType::Error,
                        event.bundle(),
                        Arc::new(cause),
                    ));
                }
            }
        }));
    }

    /// 触发服务事件（同步）
    pub fn fire_service_event(&self, kind: ServiceEventType, service: Arc<dyn ServiceState>) {
        if !self.is_active() {
            trace!(event_type = %kind, "事件子系统未激活，丢弃服务事件");
            return;
        }
        debug!(service_id = service.service_id(), event_type = %kind, "服务事件");

        let registrations: Vec<ServiceRegistration> = {
            let guard = self.inner.service_listeners.lock();
            let map = guard.borrow();
            map.values().flat_map(|list| list.iter().cloned()).collect()
        };
        if registrations.is_empty() {
            return;
        }

        let event = ServiceEvent::new(kind, service.clone());

        let mut owners: Vec<BundleId> = registrations.iter().map(|r| r.owner).collect();
        owners.dedup();
        let mut visible = ShrinkableSet::new(owners);
        for hook in self.inner.hooks.event_hooks() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook.event(&event, &mut visible))) {
                warn!(error = %panic_message(payload.as_ref()), "服务事件钩子调用失败");
            }
        }
        let visible = visible.into_inner();

        let properties = service.properties();
        let previous = service.previous_properties();
        let classes = service.object_classes();

        if self.inner.lock_manager.holds_locks() {
            debug!(service_id = service.service_id(), event_type = %kind, "在持有框架锁时调用服务监听器");
        }

        for registration in registrations {
            if !visible.contains(&registration.owner) || registration.info.is_removed() {
                continue;
            }
            if !registration.listener.all_services()
                && !classes
                    .iter()
                    .all(|c| service.is_assignable_to(registration.owner, c))
            {
                trace!(bundle_id = %registration.owner, "服务对象类不可赋值，跳过");
                continue;
            }

            let matches = |attrs: &crate::resource::Attributes| {
                registration.filter.as_ref().map_or(true, |f| f.matches(attrs))
            };
            let delivered = if matches(&properties) {
                event.clone()
            } else if kind == ServiceEventType::Modified && previous.as_ref().is_some_and(|p| matches(p)) {
                event.endmatch()
            } else {
                continue;
            };

            let _ = deliver(
                || registration.listener.service_changed(&delivered),
                "service",
                &delivered.kind(),
            );
        }
    }

    // ==================== 后台投递 ====================

    fn dispatch(&self, job: Job) {
        if !self.inner.async_delivery {
            job();
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            job();
            return;
        };

        let mut worker = self.inner.worker.lock();
        let job = match worker.as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        if let Err(mpsc::error::SendError(job)) = tx.send(job) {
            // 在锁外运行，监听器可能再次触发事件
            drop(worker);
            job();
            return;
        }
        *worker = Some(tx);
        trace!("启动事件投递任务");
    }
}

/// 调用单个监听器，错误与 panic 只记录日志
fn deliver(
    call: impl FnOnce() -> anyhow::Result<()>,
    listener_kind: &str,
    event_type: &dyn std::fmt::Display,
) -> anyhow::Result<()> {
    let result = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("监听器 panic: {}", panic_message(payload.as_ref()))),
    };
    if let Err(e) = &result {
        let err = CoreError::ListenerDelivery(e.to_string());
        warn!(
            listener = listener_kind,
            event_type = %event_type,
            error = %err,
            error_code = err.error_code(),
            "监听器处理事件失败"
        );
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
