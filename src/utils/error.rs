//! 运行时错误类型定义
//!
//! 本模块定义了 bundle 运行时中使用的所有错误类型。

use thiserror::Error;

/// 运行时核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 解析错误 ====================

    /// 需求无法满足
    #[error("无法解析 '{resource}': 需求 {requirement} 没有可用的提供者")]
    Unresolvable {
        resource: String,
        requirement: String,
    },

    /// 单例冲突
    #[error("单例冲突: '{symbolic_name}' 已有其他版本被选中")]
    SingletonConflict { symbolic_name: String },

    /// 本地库解析失败
    #[error("本地库解析失败: '{resource}' - {reason}")]
    NativeCode { resource: String, reason: String },

    /// 解析结果应用失败
    #[error("解析结果应用失败 ({step}): {source}")]
    ApplyFailed {
        step: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    /// 无效的过滤器表达式
    #[error("无效的过滤器: '{filter}' - {reason}")]
    InvalidFilter { filter: String, reason: String },

    // ==================== 生命周期错误 ====================

    /// bundle 未找到
    #[error("bundle 未找到: {0}")]
    BundleNotFound(u64),

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 启动失败
    #[error("无法启动 bundle '{bundle}': {source}")]
    StartFailed {
        bundle: String,
        #[source]
        source: anyhow::Error,
    },

    /// 停止失败
    #[error("无法停止 bundle '{bundle}': {source}")]
    StopFailed {
        bundle: String,
        #[source]
        source: anyhow::Error,
    },

    /// 启动级别不允许启动
    #[error("无法启动 bundle '{bundle}': 启动级别 {bundle_level} 高于框架启动级别 {framework_level}")]
    StartLevel {
        bundle: String,
        bundle_level: u32,
        framework_level: u32,
    },

    /// 激活器无效
    #[error("bundle '{bundle}' 的激活器无效: '{class_name}'")]
    InvalidActivator { bundle: String, class_name: String },

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 非法状态
    #[error("bundle '{bundle}' 状态非法: {state}")]
    IllegalState { bundle: String, state: String },

    /// 加锁超时
    #[error("加锁超时: {method} {items:?}")]
    LockTimeout { method: String, items: Vec<String> },

    // ==================== 监听器错误 ====================

    /// 监听器投递失败
    #[error("监听器投递失败: {0}")]
    ListenerDelivery(String),

    /// 框架已停止
    #[error("框架未处于活动状态")]
    FrameworkInactive,

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue { key: String, reason: String },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 运行时操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 解析与连线
    Resolution,
    /// bundle 生命周期
    Lifecycle,
    /// 监听器与过滤器
    Listener,
    /// 配置
    Config,
    /// 其他内部错误
    Internal,
}

/// 错误码常量
pub mod error_code {
    // 解析错误 (RESOLVE-xxx)
    pub const RESOLVE_UNSATISFIED: &str = "RESOLVE-001";
    pub const RESOLVE_SINGLETON: &str = "RESOLVE-002";
    pub const RESOLVE_NATIVE_CODE: &str = "RESOLVE-003";
    pub const RESOLVE_APPLY: &str = "RESOLVE-004";
    pub const RESOLVE_FILTER: &str = "RESOLVE-005";

    // 生命周期错误 (LIFECYCLE-xxx)
    pub const LIFECYCLE_START: &str = "LIFECYCLE-001";
    pub const LIFECYCLE_STOP: &str = "LIFECYCLE-002";
    pub const LIFECYCLE_START_LEVEL: &str = "LIFECYCLE-003";
    pub const LIFECYCLE_ACTIVATOR: &str = "LIFECYCLE-004";
    pub const LIFECYCLE_UNSUPPORTED: &str = "LIFECYCLE-005";
    pub const LIFECYCLE_ILLEGAL_STATE: &str = "LIFECYCLE-006";
    pub const LIFECYCLE_NOT_FOUND: &str = "LIFECYCLE-007";

    // 锁错误 (LOCK-xxx)
    pub const LOCK_TIMEOUT: &str = "LOCK-001";

    // 监听器错误 (LISTENER-xxx)
    pub const LISTENER_DELIVERY: &str = "LISTENER-001";
    pub const LISTENER_INACTIVE: &str = "LISTENER-002";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Unresolvable { .. }
            | CoreError::SingletonConflict { .. }
            | CoreError::NativeCode { .. }
            | CoreError::ApplyFailed { .. } => ErrorKind::Resolution,
            CoreError::BundleNotFound(_)
            | CoreError::ModuleNotFound(_)
            | CoreError::StartFailed { .. }
            | CoreError::StopFailed { .. }
            | CoreError::StartLevel { .. }
            | CoreError::InvalidActivator { .. }
            | CoreError::Unsupported(_)
            | CoreError::IllegalState { .. }
            | CoreError::LockTimeout { .. } => ErrorKind::Lifecycle,
            CoreError::InvalidFilter { .. }
            | CoreError::ListenerDelivery(_)
            | CoreError::FrameworkInactive => ErrorKind::Listener,
            CoreError::ConfigLoadFailed(_)
            | CoreError::InvalidConfigValue { .. }
            | CoreError::Yaml(_)
            | CoreError::Json(_) => ErrorKind::Config,
            _ => ErrorKind::Internal,
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Unresolvable { .. } => error_code::RESOLVE_UNSATISFIED,
            CoreError::SingletonConflict { .. } => error_code::RESOLVE_SINGLETON,
            CoreError::NativeCode { .. } => error_code::RESOLVE_NATIVE_CODE,
            CoreError::ApplyFailed { .. } => error_code::RESOLVE_APPLY,
            CoreError::InvalidFilter { .. } => error_code::RESOLVE_FILTER,
            CoreError::StartFailed { .. } => error_code::LIFECYCLE_START,
            CoreError::StopFailed { .. } => error_code::LIFECYCLE_STOP,
            CoreError::StartLevel { .. } => error_code::LIFECYCLE_START_LEVEL,
            CoreError::InvalidActivator { .. } => error_code::LIFECYCLE_ACTIVATOR,
            CoreError::Unsupported(_) => error_code::LIFECYCLE_UNSUPPORTED,
            CoreError::IllegalState { .. } => error_code::LIFECYCLE_ILLEGAL_STATE,
            CoreError::BundleNotFound(_) | CoreError::ModuleNotFound(_) => {
                error_code::LIFECYCLE_NOT_FOUND
            }
            CoreError::LockTimeout { .. } => error_code::LOCK_TIMEOUT,
            CoreError::ListenerDelivery(_) => error_code::LISTENER_DELIVERY,
            CoreError::FrameworkInactive => error_code::LISTENER_INACTIVE,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否属于解析错误
    pub fn is_resolution_error(&self) -> bool {
        self.kind() == ErrorKind::Resolution
    }
}
