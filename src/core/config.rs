//! 框架配置
//!
//! 定义运行时的配置结构和加载逻辑，支持 YAML 与 JSON 两种格式。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// 保留日志文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
            max_files: default_max_files(),
        }
    }
}

/// 解析器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// 等待旧的已解析产物拆除的最长时间（毫秒）
    #[serde(default = "default_stale_artifact_timeout_ms")]
    pub stale_artifact_timeout_ms: u64,
}

fn default_stale_artifact_timeout_ms() -> u64 {
    10_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            stale_artifact_timeout_ms: default_stale_artifact_timeout_ms(),
        }
    }
}

impl ResolverConfig {
    /// 旧产物等待超时
    pub fn stale_artifact_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_artifact_timeout_ms)
    }
}

/// 锁管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// 获取锁的超时时间（毫秒）
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl LockConfig {
    /// 加锁超时
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 启动级别配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartLevelConfig {
    /// 框架初始启动级别
    #[serde(default = "default_level")]
    pub initial_framework_level: u32,

    /// 新安装 bundle 的默认启动级别
    #[serde(default = "default_level")]
    pub initial_bundle_level: u32,
}

fn default_level() -> u32 {
    1
}

impl Default for StartLevelConfig {
    fn default() -> Self {
        Self {
            initial_framework_level: default_level(),
            initial_bundle_level: default_level(),
        }
    }
}

/// 事件投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 是否在后台任务中投递异步监听器
    ///
    /// 关闭后异步监听器在触发任务上直接调用。
    #[serde(default = "default_true")]
    pub async_delivery: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            async_delivery: true,
        }
    }
}

/// 模块图配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 模块标识名前缀
    #[serde(default = "default_identifier_prefix")]
    pub identifier_prefix: String,
}

fn default_identifier_prefix() -> String {
    "chips".to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            identifier_prefix: default_identifier_prefix(),
        }
    }
}

/// 框架配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 解析器配置
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// 锁配置
    #[serde(default)]
    pub locks: LockConfig,

    /// 启动级别配置
    #[serde(default)]
    pub start_level: StartLevelConfig,

    /// 事件配置
    #[serde(default)]
    pub events: EventConfig,

    /// 模块图配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 系统 bundle 导出的包
    #[serde(default)]
    pub system_packages: Vec<String>,
}

impl FrameworkConfig {
    /// 创建配置构建器
    pub fn builder() -> FrameworkConfigBuilder {
        FrameworkConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;

        let mut config: FrameworkConfig =
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                serde_json::from_str(&content)?
            } else {
                serde_yaml::from_str(&content)?
            };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> crate::utils::Result<()> {
        if self.modules.identifier_prefix.is_empty() {
            return Err(crate::utils::CoreError::InvalidConfigValue {
                key: "modules.identifier_prefix".to_string(),
                reason: "不能为空".to_string(),
            });
        }
        if self.locks.timeout_ms == 0 {
            return Err(crate::utils::CoreError::InvalidConfigValue {
                key: "locks.timeout_ms".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    ///
    /// 只覆盖非默认值的配置项。
    pub fn merge(&mut self, other: FrameworkConfig) {
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.resolver.stale_artifact_timeout_ms != default_stale_artifact_timeout_ms() {
            self.resolver.stale_artifact_timeout_ms = other.resolver.stale_artifact_timeout_ms;
        }
        if other.locks.timeout_ms != default_lock_timeout_ms() {
            self.locks.timeout_ms = other.locks.timeout_ms;
        }
        if other.start_level.initial_framework_level != default_level() {
            self.start_level.initial_framework_level = other.start_level.initial_framework_level;
        }
        if other.start_level.initial_bundle_level != default_level() {
            self.start_level.initial_bundle_level = other.start_level.initial_bundle_level;
        }
        if !other.events.async_delivery {
            self.events.async_delivery = false;
        }
        if other.modules.identifier_prefix != default_identifier_prefix() {
            self.modules.identifier_prefix = other.modules.identifier_prefix;
        }
        for package in other.system_packages {
            if !self.system_packages.contains(&package) {
                self.system_packages.push(package);
            }
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct FrameworkConfigBuilder {
    config: FrameworkConfig,
}

impl FrameworkConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: FrameworkConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 设置旧产物等待超时（毫秒）
    pub fn stale_artifact_timeout_ms(mut self, ms: u64) -> Self {
        self.config.resolver.stale_artifact_timeout_ms = ms;
        self
    }

    /// 设置加锁超时（毫秒）
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.locks.timeout_ms = ms;
        self
    }

    /// 设置框架初始启动级别
    pub fn initial_start_level(mut self, level: u32) -> Self {
        self.config.start_level.initial_framework_level = level;
        self
    }

    /// 设置 bundle 默认启动级别
    pub fn initial_bundle_start_level(mut self, level: u32) -> Self {
        self.config.start_level.initial_bundle_level = level;
        self
    }

    /// 关闭后台异步投递
    pub fn inline_delivery(mut self) -> Self {
        self.config.events.async_delivery = false;
        self
    }

    /// 设置模块标识名前缀
    pub fn identifier_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.modules.identifier_prefix = prefix.into();
        self
    }

    /// 添加系统包
    pub fn system_package(mut self, package: impl Into<String>) -> Self {
        self.config.system_packages.push(package.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> FrameworkConfig {
        self.config
    }
}
