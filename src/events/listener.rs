//! 监听器
//!
//! 监听器回调是同步的，返回错误或 panic 都只会被记录，不会传播给触发方。
//! 监听器身份由 `Arc` 指针决定。

use std::sync::Arc;

use super::event::{BundleEvent, FrameworkEvent, ServiceEvent};

/// bundle 监听器
pub trait BundleListener: Send + Sync {
    /// 处理 bundle 事件
    fn bundle_changed(&self, event: &BundleEvent) -> anyhow::Result<()>;

    /// 是否在触发任务上同步投递
    fn is_synchronous(&self) -> bool {
        false
    }
}

/// 框架监听器
pub trait FrameworkListener: Send + Sync {
    /// 处理框架事件
    fn framework_event(&self, event: &FrameworkEvent) -> anyhow::Result<()>;
}

/// 服务监听器
pub trait ServiceListener: Send + Sync {
    /// 处理服务事件
    fn service_changed(&self, event: &ServiceEvent) -> anyhow::Result<()>;

    /// 是否跳过对象类可赋值检查
    fn all_services(&self) -> bool {
        false
    }
}

// ==================== 闭包适配 ====================

/// 闭包形式的 bundle 监听器
pub struct FnBundleListener<F> {
    callback: F,
    synchronous: bool,
}

impl<F> FnBundleListener<F> {
    /// 异步投递的监听器
    pub fn new(callback: F) -> Arc<Self>
    where
        F: Fn(&BundleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            callback,
            synchronous: false,
        })
    }

    /// 同步投递的监听器
    pub fn synchronous(callback: F) -> Arc<Self>
    where
        F: Fn(&BundleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            callback,
            synchronous: true,
        })
    }
}

impl<F> BundleListener for FnBundleListener<F>
where
    F: Fn(&BundleEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn bundle_changed(&self, event: &BundleEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn is_synchronous(&self) -> bool {
        self.synchronous
    }
}

/// 闭包形式的框架监听器
pub struct FnFrameworkListener<F> {
    callback: F,
}

impl<F> FnFrameworkListener<F> {
    /// 创建监听器
    pub fn new(callback: F) -> Arc<Self>
    where
        F: Fn(&FrameworkEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self { callback })
    }
}

impl<F> FrameworkListener for FnFrameworkListener<F>
where
    F: Fn(&FrameworkEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn framework_event(&self, event: &FrameworkEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }
}

/// 闭包形式的服务监听器
pub struct FnServiceListener<F> {
    callback: F,
    all_services: bool,
}

impl<F> FnServiceListener<F> {
    /// 创建监听器
    pub fn new(callback: F) -> Arc<Self>
    where
        F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            callback,
            all_services: false,
        })
    }

    /// 跳过可赋值检查的监听器
    pub fn all_services(callback: F) -> Arc<Self>
    where
        F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Self {
            callback,
            all_services: true,
        })
    }
}

impl<F> ServiceListener for FnServiceListener<F>
where
    F: Fn(&ServiceEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn service_changed(&self, event: &ServiceEvent) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn all_services(&self) -> bool {
        self.all_services
    }
}

/// 比较两个监听器是否为同一实例
pub(crate) fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
