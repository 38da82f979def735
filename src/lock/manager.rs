//! 生命周期锁管理器
//!
//! 为生命周期方法（RESOLVE、START、STOP、UNINSTALL）提供有序、可重入的多项加锁：
//!
//! - 一次请求中的所有锁项要么全部获得，要么全部不获得，避免交叉等待造成死锁
//! - 同一个持有者（逻辑任务）可以重复获得已持有的锁项
//! - 等待超过配置的超时后返回 `CoreError::LockTimeout`
//!
//! 持有者身份由任务本地变量 `LOCK_OWNER` 表示，入口方法通过 [`with_owner`] 建立作用域。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_bundles::lock::{LockManager, LockMethod, FrameworkWiringLock, with_owner};
//! use std::time::Duration;
//!
//! # async fn demo() -> chips_bundles::Result<()> {
//! let manager = LockManager::new(Duration::from_secs(30));
//! let wiring = FrameworkWiringLock::new();
//!
//! with_owner(async {
//!     let _ctx = manager.lock_items(LockMethod::Resolve, &[&wiring]).await?;
//!     // 在锁内修改连线环境
//!     Ok::<_, chips_bundles::CoreError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::utils::{CoreError, IdSequence, Result};

static LOCK_ITEM_IDS: IdSequence = IdSequence::starting_at(1);
static LOCK_OWNER_IDS: IdSequence = IdSequence::starting_at(1);

tokio::task_local! {
    static LOCK_OWNER: u64;
}

/// 在锁持有者作用域中运行 future
///
/// 已处于作用域中时直接运行，保证嵌套调用共享同一个持有者。
pub async fn with_owner<F: Future>(fut: F) -> F::Output {
    if LOCK_OWNER.try_with(|_| ()).is_ok() {
        fut.await
    } else {
        LOCK_OWNER.scope(LOCK_OWNER_IDS.next(), fut).await
    }
}

/// 当前任务的锁持有者 ID
pub fn current_owner() -> Option<u64> {
    LOCK_OWNER.try_with(|owner| *owner).ok()
}

// ==================== 锁方法与锁项 ====================

/// 需要加锁的生命周期方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMethod {
    /// 解析
    Resolve,
    /// 启动
    Start,
    /// 停止
    Stop,
    /// 卸载
    Uninstall,
}

impl fmt::Display for LockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMethod::Resolve => write!(f, "RESOLVE"),
            LockMethod::Start => write!(f, "START"),
            LockMethod::Stop => write!(f, "STOP"),
            LockMethod::Uninstall => write!(f, "UNINSTALL"),
        }
    }
}

/// 锁项句柄
///
/// 每个可加锁对象持有一个，ID 在进程内唯一。
#[derive(Debug)]
pub struct LockSupport {
    id: u64,
    name: String,
}

impl LockSupport {
    /// 创建带名称的锁项句柄
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LOCK_ITEM_IDS.next(),
            name: name.into(),
        }
    }

    /// 锁项 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 锁项名称（用于日志）
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 可加锁对象
pub trait LockableItem: Send + Sync {
    /// 返回锁项句柄
    fn lock_support(&self) -> &LockSupport;
}

/// 框架全局连线锁
///
/// 所有解析以及安装、卸载对连线环境的修改都在该锁下串行执行。
#[derive(Debug)]
pub struct FrameworkWiringLock {
    support: LockSupport,
}

impl FrameworkWiringLock {
    /// 创建连线锁
    pub fn new() -> Self {
        Self {
            support: LockSupport::new("framework-wiring"),
        }
    }
}

impl Default for FrameworkWiringLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LockableItem for FrameworkWiringLock {
    fn lock_support(&self) -> &LockSupport {
        &self.support
    }
}

// ==================== 锁管理器 ====================

#[derive(Debug)]
struct HeldLock {
    owner: u64,
    count: usize,
    method: LockMethod,
}

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<u64, HeldLock>,
}

impl LockTable {
    fn can_acquire(&self, owner: u64, ids: &[u64]) -> bool {
        ids.iter()
            .all(|id| self.held.get(id).map_or(true, |held| held.owner == owner))
    }

    fn acquire(&mut self, owner: u64, method: LockMethod, ids: &[u64]) {
        for id in ids {
            self.held
                .entry(*id)
                .and_modify(|held| held.count += 1)
                .or_insert(HeldLock {
                    owner,
                    count: 1,
                    method,
                });
        }
    }

    fn release(&mut self, ids: &[u64]) {
        for id in ids {
            let drained = match self.held.get_mut(id) {
                Some(held) => {
                    held.count -= 1;
                    held.count == 0
                }
                None => false,
            };
            if drained {
                self.held.remove(id);
            }
        }
    }
}

#[derive(Debug)]
struct LockManagerInner {
    table: Mutex<LockTable>,
    released: Notify,
    timeout: Duration,
}

/// 生命周期锁管理器
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<LockManagerInner>,
}

impl LockManager {
    /// 创建锁管理器
    ///
    /// # 参数
    ///
    /// * `timeout` - 单次加锁请求的最长等待时间
    pub fn new(timeout: Duration) -> Self {
        debug!(timeout_ms = timeout.as_millis() as u64, "创建锁管理器");
        Self {
            inner: Arc::new(LockManagerInner {
                table: Mutex::new(LockTable::default()),
                released: Notify::new(),
                timeout,
            }),
        }
    }

    /// 为给定方法一次性锁定所有锁项
    ///
    /// 锁项按传入顺序记录，全部可用时才一起获得。当前持有者已持有的锁项可重入。
    ///
    /// # 返回
    ///
    /// 返回 `LockContext`，丢弃时释放本次获得的全部锁项
    ///
    /// # 错误
    ///
    /// 等待超时返回 `CoreError::LockTimeout`
    pub async fn lock_items(
        &self,
        method: LockMethod,
        items: &[&dyn LockableItem],
    ) -> Result<LockContext> {
        let owner = current_owner().unwrap_or_else(|| LOCK_OWNER_IDS.next());
        let ids: Vec<u64> = items.iter().map(|item| item.lock_support().id()).collect();
        let deadline = Instant::now() + self.inner.timeout;

        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut table = self.inner.table.lock();
                if table.can_acquire(owner, &ids) {
                    table.acquire(owner, method, &ids);
                    trace!(lock_method = %method, owner, items = ?ids, "获得锁");
                    return Ok(LockContext {
                        manager: self.inner.clone(),
                        method,
                        ids,
                    });
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let names: Vec<String> = items
                    .iter()
                    .map(|item| item.lock_support().name().to_string())
                    .collect();
                warn!(lock_method = %method, items = ?names, "加锁超时");
                return Err(CoreError::LockTimeout {
                    method: method.to_string(),
                    items: names,
                });
            }
        }
    }

    /// 当前持有者是否持有任意锁
    pub fn holds_locks(&self) -> bool {
        match current_owner() {
            Some(owner) => self
                .inner
                .table
                .lock()
                .held
                .values()
                .any(|held| held.owner == owner),
            None => false,
        }
    }

    /// 查询锁项当前被哪个方法持有
    pub fn held_method(&self, item: &dyn LockableItem) -> Option<LockMethod> {
        self.inner
            .table
            .lock()
            .held
            .get(&item.lock_support().id())
            .map(|held| held.method)
    }
}

/// 已获得锁的上下文
///
/// 丢弃时释放所有锁项并唤醒等待者。
#[derive(Debug)]
pub struct LockContext {
    manager: Arc<LockManagerInner>,
    method: LockMethod,
    ids: Vec<u64>,
}

impl LockContext {
    /// 加锁方法
    pub fn method(&self) -> LockMethod {
        self.method
    }
}

impl Drop for LockContext {
    fn drop(&mut self) {
        self.manager.table.lock().release(&self.ids);
        trace!(lock_method = %self.method, items = ?self.ids, "释放锁");
        self.manager.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Item(LockSupport);

    impl LockableItem for Item {
        fn lock_support(&self) -> &LockSupport {
            &self.0
        }
    }

    #[tokio::test]
    async fn test_lock_and_release() {
        let manager = LockManager::new(Duration::from_millis(200));
        let item = Item(LockSupport::new("a"));

        let ctx = with_owner(manager.lock_items(LockMethod::Start, &[&item]))
            .await
            .unwrap();
        assert_eq!(manager.held_method(&item), Some(LockMethod::Start));
        drop(ctx);
        assert_eq!(manager.held_method(&item), None);
    }

    #[tokio::test]
    async fn test_reentrant_for_same_owner() {
        let manager = LockManager::new(Duration::from_millis(200));
        let wiring = FrameworkWiringLock::new();
        let item = Item(LockSupport::new("bundle"));

        with_owner(async {
            let _outer = manager
                .lock_items(LockMethod::Uninstall, &[&wiring, &item])
                .await
                .unwrap();
            assert!(manager.holds_locks());
            let inner = manager.lock_items(LockMethod::Resolve, &[&wiring]).await;
            assert!(inner.is_ok());
        })
        .await;

        assert!(manager.held_method(&wiring).is_none());
    }

    #[tokio::test]
    async fn test_timeout_for_other_owner() {
        let manager = LockManager::new(Duration::from_millis(50));
        let item = Arc::new(Item(LockSupport::new("busy")));

        let _held = with_owner(manager.lock_items(LockMethod::Start, &[item.as_ref()]))
            .await
            .unwrap();

        let other = manager.clone();
        let other_item = item.clone();
        let result = tokio::spawn(async move {
            with_owner(async {
                other
                    .lock_items(LockMethod::Stop, &[other_item.as_ref()])
                    .await
                    .map(|_| ())
            })
            .await
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(CoreError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_waiter_wakes_after_release() {
        let manager = LockManager::new(Duration::from_secs(2));
        let item = Arc::new(Item(LockSupport::new("shared")));
        let acquired = Arc::new(AtomicBool::new(false));

        let held = with_owner(manager.lock_items(LockMethod::Start, &[item.as_ref()]))
            .await
            .unwrap();

        let waiter = {
            let manager = manager.clone();
            let item = item.clone();
            let acquired = acquired.clone();
            tokio::spawn(async move {
                with_owner(async {
                    let _ctx = manager.lock_items(LockMethod::Stop, &[item.as_ref()]).await?;
                    acquired.store(true, Ordering::SeqCst);
                    Ok::<_, CoreError>(())
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!acquired.load(Ordering::SeqCst));
        drop(held);

        waiter.await.unwrap().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_all_or_nothing() {
        let manager = LockManager::new(Duration::from_millis(30));
        let a = Arc::new(Item(LockSupport::new("a")));
        let b = Arc::new(Item(LockSupport::new("b")));

        let _hold_b = with_owner(manager.lock_items(LockMethod::Start, &[b.as_ref()]))
            .await
            .unwrap();

        let other = manager.clone();
        let (a2, b2) = (a.clone(), b.clone());
        let result = tokio::spawn(async move {
            with_owner(async {
                other
                    .lock_items(LockMethod::Resolve, &[a2.as_ref(), b2.as_ref()])
                    .await
                    .map(|_| ())
            })
            .await
        })
        .await
        .unwrap();

        assert!(result.is_err());
        assert!(manager.held_method(a.as_ref()).is_none());
    }
}
