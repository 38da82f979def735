//! 服务事件钩子与监听器钩子

use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::event::ServiceEvent;
use crate::bundle::BundleId;
use crate::utils::{generate_id, IdSequence};

/// 只允许删除元素的集合
///
/// 事件钩子通过它从候选接收者中移除 bundle。
#[derive(Debug)]
pub struct ShrinkableSet<T> {
    items: Vec<T>,
}

impl<T: PartialEq> ShrinkableSet<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// 删除元素
    pub fn remove(&mut self, item: &T) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i != item);
        before != self.items.len()
    }

    /// 只保留满足条件的元素
    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.items.retain(f);
    }

    /// 是否包含
    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    /// 遍历
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// 元素数量
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<T> {
        self.items
    }
}

/// 服务事件钩子
///
/// 在服务事件投递前调用，可以从候选 bundle 中删除不应收到事件的 bundle。
pub trait EventHook: Send + Sync {
    /// 过滤接收者
    fn event(&self, event: &ServiceEvent, bundles: &mut ShrinkableSet<BundleId>);
}

/// 服务监听器钩子
pub trait ListenerHook: Send + Sync {
    /// 服务监听器已添加（调用时监听器尚未对事件可见）
    fn added(&self, listeners: &[Arc<ListenerInfo>]);

    /// 服务监听器已移除（调用时 `is_removed()` 已为 `true`）
    fn removed(&self, listeners: &[Arc<ListenerInfo>]);
}

/// 钩子可见的服务监听器信息
pub struct ListenerInfo {
    id: String,
    owner: BundleId,
    filter: Option<String>,
    removed: AtomicBool,
}

impl ListenerInfo {
    pub(crate) fn new(owner: BundleId, filter: Option<String>) -> Self {
        Self {
            id: generate_id(),
            owner,
            filter,
            removed: AtomicBool::new(false),
        }
    }

    /// 唯一标识
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 注册监听器的 bundle
    pub fn owner(&self) -> BundleId {
        self.owner
    }

    /// 过滤器文本
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// 是否已移除
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ListenerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerInfo")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("filter", &self.filter)
            .field("removed", &self.is_removed())
            .finish()
    }
}

// ==================== 钩子注册表 ====================

struct Ranked<T: ?Sized> {
    ranking: i32,
    seq: u64,
    hook: Arc<T>,
}

impl<T: ?Sized> Clone for Ranked<T> {
    fn clone(&self) -> Self {
        Self {
            ranking: self.ranking,
            seq: self.seq,
            hook: self.hook.clone(),
        }
    }
}

/// 钩子注册表
///
/// 钩子按排名从高到低排列，排名相同时先注册的在前。
pub struct HookRegistry {
    event_hooks: RwLock<Vec<Ranked<dyn EventHook>>>,
    listener_hooks: RwLock<Vec<Ranked<dyn ListenerHook>>>,
    seq: IdSequence,
}

impl HookRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            event_hooks: RwLock::new(Vec::new()),
            listener_hooks: RwLock::new(Vec::new()),
            seq: IdSequence::starting_at(0),
        }
    }

    fn insert<T: ?Sized>(list: &mut Vec<Ranked<T>>, entry: Ranked<T>) {
        list.push(entry);
        list.sort_by_key(|r| (Reverse(r.ranking), r.seq));
    }

    /// 注册服务事件钩子
    pub fn add_event_hook(&self, hook: Arc<dyn EventHook>, ranking: i32) {
        let entry = Ranked {
            ranking,
            seq: self.seq.next(),
            hook,
        };
        Self::insert(&mut self.event_hooks.write(), entry);
        debug!(ranking, "注册服务事件钩子");
    }

    /// 注销服务事件钩子
    pub fn remove_event_hook(&self, hook: &Arc<dyn EventHook>) {
        self.event_hooks
            .write()
            .retain(|r| !super::listener::same_listener(&r.hook, hook));
    }

    /// 注册监听器钩子
    pub fn add_listener_hook(&self, hook: Arc<dyn ListenerHook>, ranking: i32) {
        let entry = Ranked {
            ranking,
            seq: self.seq.next(),
            hook,
        };
        Self::insert(&mut self.listener_hooks.write(), entry);
        debug!(ranking, "注册监听器钩子");
    }

    /// 注销监听器钩子
    pub fn remove_listener_hook(&self, hook: &Arc<dyn ListenerHook>) {
        self.listener_hooks
            .write()
            .retain(|r| !super::listener::same_listener(&r.hook, hook));
    }

    /// 服务事件钩子（排名从高到低）
    pub fn event_hooks(&self) -> Vec<Arc<dyn EventHook>> {
        self.event_hooks.read().iter().map(|r| r.hook.clone()).collect()
    }

    /// 监听器钩子（排名从高到低）
    pub fn listener_hooks(&self) -> Vec<Arc<dyn ListenerHook>> {
        self.listener_hooks
            .read()
            .iter()
            .map(|r| r.hook.clone())
            .collect()
    }

    /// 清空
    pub fn clear(&self) {
        self.event_hooks.write().clear();
        self.listener_hooks.write().clear();
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Named(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl EventHook for Named {
        fn event(&self, _event: &ServiceEvent, _bundles: &mut ShrinkableSet<BundleId>) {
            self.1.lock().unwrap().push(self.0);
        }
    }

    #[test]
    fn test_hooks_ordered_by_ranking() {
        let registry = HookRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        registry.add_event_hook(Arc::new(Named("low", calls.clone())), 1);
        registry.add_event_hook(Arc::new(Named("high", calls.clone())), 10);
        registry.add_event_hook(Arc::new(Named("low2", calls.clone())), 1);

        let hooks = registry.event_hooks();
        assert_eq!(hooks.len(), 3);

        let event = ServiceEvent::new(
            super::super::event::ServiceEventType::Registered,
            Arc::new(super::super::service::RegisteredService::new(
                1,
                BundleId::new(1),
                &["a.B"],
                Default::default(),
            )),
        );
        let mut set = ShrinkableSet::new(vec![BundleId::new(1)]);
        for hook in hooks {
            hook.event(&event, &mut set);
        }
        assert_eq!(*calls.lock().unwrap(), vec!["high", "low", "low2"]);
    }

    #[test]
    fn test_shrinkable_set() {
        let mut set = ShrinkableSet::new(vec![1, 2, 3]);
        assert!(set.remove(&2));
        assert!(!set.remove(&9));
        set.retain(|v| *v != 3);
        assert_eq!(set.into_inner(), vec![1]);
    }

    #[test]
    fn test_listener_info_removed_flag() {
        let info = ListenerInfo::new(BundleId::new(2), Some("(a=b)".to_string()));
        assert!(!info.is_removed());
        info.mark_removed();
        assert!(info.is_removed());
        assert_eq!(info.filter(), Some("(a=b)"));
    }
}
