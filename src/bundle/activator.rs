//! bundle 激活器与 bundle 上下文

use std::sync::Arc;

use async_trait::async_trait;

use super::state::BundleId;
use crate::events::{BundleListener, FrameworkEvents, FrameworkListener, ServiceListener};
use crate::utils::Result;

/// bundle 激活器
///
/// 由 bundle 元数据中声明的类名实例化，bundle 启动时调用 `start`，停止时调用 `stop`。
/// 同一个实例在多次停止与启动之间保留。
#[async_trait]
pub trait BundleActivator: Send + Sync {
    /// 启动
    async fn start(&self, context: &BundleContext) -> anyhow::Result<()>;

    /// 停止
    async fn stop(&self, context: &BundleContext) -> anyhow::Result<()>;
}

/// 传给激活器的 bundle 上下文
///
/// 监听器通过上下文注册时归属于该 bundle。
#[derive(Clone)]
pub struct BundleContext {
    bundle_id: BundleId,
    symbolic_name: String,
    events: FrameworkEvents,
}

impl BundleContext {
    pub(crate) fn new(bundle_id: BundleId, symbolic_name: String, events: FrameworkEvents) -> Self {
        Self {
            bundle_id,
            symbolic_name,
            events,
        }
    }

    /// 所属 bundle ID
    pub fn bundle_id(&self) -> BundleId {
        self.bundle_id
    }

    /// 所属 bundle 符号名
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// 注册 bundle 监听器
    pub fn add_bundle_listener(&self, listener: Arc<dyn BundleListener>) {
        self.events.add_bundle_listener(self.bundle_id, listener);
    }

    /// 注销 bundle 监听器
    pub fn remove_bundle_listener(&self, listener: &Arc<dyn BundleListener>) {
        self.events.remove_bundle_listener(self.bundle_id, listener);
    }

    /// 注册框架监听器
    pub fn add_framework_listener(&self, listener: Arc<dyn FrameworkListener>) {
        self.events.add_framework_listener(self.bundle_id, listener);
    }

    /// 注销框架监听器
    pub fn remove_framework_listener(&self, listener: &Arc<dyn FrameworkListener>) {
        self.events.remove_framework_listener(self.bundle_id, listener);
    }

    /// 注册服务监听器
    ///
    /// # 错误
    ///
    /// 过滤器语法错误时返回 `CoreError::InvalidFilter`
    pub fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> Result<()> {
        self.events
            .add_service_listener(self.bundle_id, listener, filter)
    }

    /// 注销服务监听器
    pub fn remove_service_listener(&self, listener: &Arc<dyn ServiceListener>) {
        self.events.remove_service_listener(self.bundle_id, listener);
    }
}

impl std::fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle_id", &self.bundle_id)
            .field("symbolic_name", &self.symbolic_name)
            .finish()
    }
}
