//! 事件类型
//!
//! bundle 事件、框架事件与服务事件。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::service::ServiceState;
use crate::bundle::{Bundle, BundleId};

// ==================== bundle 事件 ====================

/// bundle 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleEventType {
    /// 已安装
    Installed,
    /// 已解析
    Resolved,
    /// 启动中
    Starting,
    /// 已启动
    Started,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
    /// 已更新
    Updated,
    /// 已取消解析
    Unresolved,
    /// 已卸载
    Uninstalled,
}

impl BundleEventType {
    /// 是否投递给异步监听器
    ///
    /// STARTING 与 STOPPING 只投递给同步监听器。
    pub fn is_async_deliverable(&self) -> bool {
        !matches!(self, BundleEventType::Starting | BundleEventType::Stopping)
    }

    /// 是否以 INFO 级别记录
    pub fn is_info(&self) -> bool {
        matches!(
            self,
            BundleEventType::Installed
                | BundleEventType::Started
                | BundleEventType::Stopped
                | BundleEventType::Uninstalled
        )
    }
}

impl fmt::Display for BundleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleEventType::Installed => "INSTALLED",
            BundleEventType::Resolved => "RESOLVED",
            BundleEventType::Starting => "STARTING",
            BundleEventType::Started => "STARTED",
            BundleEventType::Stopping => "STOPPING",
            BundleEventType::Stopped => "STOPPED",
            BundleEventType::Updated => "UPDATED",
            BundleEventType::Unresolved => "UNRESOLVED",
            BundleEventType::Uninstalled => "UNINSTALLED",
        };
        write!(f, "{}", name)
    }
}

/// bundle 事件
#[derive(Clone)]
pub struct BundleEvent {
    kind: BundleEventType,
    bundle: Arc<Bundle>,
    timestamp: DateTime<Utc>,
}

impl BundleEvent {
    /// 创建事件
    pub fn new(kind: BundleEventType, bundle: Arc<Bundle>) -> Self {
        Self {
            kind,
            bundle,
            timestamp: Utc::now(),
        }
    }

    /// 事件类型
    pub fn kind(&self) -> BundleEventType {
        self.kind
    }

    /// 相关 bundle
    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    /// 触发时间
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Debug for BundleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleEvent")
            .field("kind", &self.kind)
            .field("bundle", &self.bundle.id())
            .finish()
    }
}

// ==================== 框架事件 ====================

/// 框架事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameworkEventType {
    /// 框架已启动
    Started,
    /// 错误
    Error,
    /// 警告
    Warning,
    /// 信息
    Info,
    /// 包刷新完成
    PackagesRefreshed,
    /// 启动级别变更完成
    StartLevelChanged,
    /// 框架已停止
    Stopped,
}

impl FrameworkEventType {
    /// 是否以 INFO 级别记录
    pub fn is_info(&self) -> bool {
        matches!(
            self,
            FrameworkEventType::Error
                | FrameworkEventType::Warning
                | FrameworkEventType::Info
                | FrameworkEventType::PackagesRefreshed
        )
    }
}

impl fmt::Display for FrameworkEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameworkEventType::Started => "STARTED",
            FrameworkEventType::Error => "ERROR",
            FrameworkEventType::Warning => "WARNING",
            FrameworkEventType::Info => "INFO",
            FrameworkEventType::PackagesRefreshed => "PACKAGES_REFRESHED",
            FrameworkEventType::StartLevelChanged => "STARTLEVEL_CHANGED",
            FrameworkEventType::Stopped => "STOPPED",
        };
        write!(f, "{}", name)
    }
}

/// 框架事件
#[derive(Debug, Clone)]
pub struct FrameworkEvent {
    kind: FrameworkEventType,
    bundle: BundleId,
    cause: Option<Arc<anyhow::Error>>,
}

impl FrameworkEvent {
    /// 创建事件
    pub fn new(kind: FrameworkEventType, bundle: BundleId, cause: Option<anyhow::Error>) -> Self {
        Self {
            kind,
            bundle,
            cause: cause.map(Arc::new),
        }
    }

    pub(crate) fn with_shared_cause(
        kind: FrameworkEventType,
        bundle: BundleId,
        cause: Arc<anyhow::Error>,
    ) -> Self {
        Self {
            kind,
            bundle,
            cause: Some(cause),
        }
    }

    /// 事件类型
    pub fn kind(&self) -> FrameworkEventType {
        self.kind
    }

    /// 相关 bundle
    pub fn bundle(&self) -> BundleId {
        self.bundle
    }

    /// 错误原因
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }
}

// ==================== 服务事件 ====================

/// 服务事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventType {
    /// 已注册
    Registered,
    /// 属性已修改
    Modified,
    /// 正在注销
    Unregistering,
    /// 属性修改后不再匹配监听器过滤器
    ModifiedEndmatch,
}

impl fmt::Display for ServiceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceEventType::Registered => "REGISTERED",
            ServiceEventType::Modified => "MODIFIED",
            ServiceEventType::Unregistering => "UNREGISTERING",
            ServiceEventType::ModifiedEndmatch => "MODIFIED_ENDMATCH",
        };
        write!(f, "{}", name)
    }
}

/// 服务事件
#[derive(Clone)]
pub struct ServiceEvent {
    kind: ServiceEventType,
    service: Arc<dyn ServiceState>,
}

impl ServiceEvent {
    /// 创建事件
    pub fn new(kind: ServiceEventType, service: Arc<dyn ServiceState>) -> Self {
        Self { kind, service }
    }

    /// 事件类型
    pub fn kind(&self) -> ServiceEventType {
        self.kind
    }

    /// 相关服务
    pub fn service(&self) -> &Arc<dyn ServiceState> {
        &self.service
    }

    pub(crate) fn endmatch(&self) -> Self {
        Self {
            kind: ServiceEventType::ModifiedEndmatch,
            service: self.service.clone(),
        }
    }
}

impl fmt::Debug for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEvent")
            .field("kind", &self.kind)
            .field("service_id", &self.service.service_id())
            .finish()
    }
}
