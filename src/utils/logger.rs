//! 运行时日志
//!
//! 为框架安装全局 tracing 订阅者。控制台与文件各是一个 fmt 层，
//! 文件层经 tracing-appender 非阻塞写入并按时间轮转，级别由
//! `RUST_LOG` 或配置中的级别加过滤指令决定。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_bundles::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let config = LoggerConfig::builder()
//!     .level("debug")
//!     .log_dir("./logs")
//!     .rotation(RotationStrategy::Daily)
//!     .directive("chips_bundles::lock=trace")
//!     .build();
//! let _guard = Logger::init(config).unwrap();
//!
//! tracing::info!(bundle_id = 1, resource = "com.acme.a:1.0.0", "bundle 已安装");
//! ```

use crate::core::config::{FrameworkConfig, LogConfig};
use crate::utils::{CoreError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

// ============================================================================
// 轮转策略
// ============================================================================

/// 日志文件轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单一文件
    Never,
    /// 每分钟
    Minutely,
    /// 每小时
    Hourly,
    /// 每天
    #[default]
    Daily,
}

impl RotationStrategy {
    /// 解析配置中的轮转名称，大小写不敏感，未知名称按每天处理
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "minutely" | "minute" => RotationStrategy::Minutely,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }

    fn rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Minutely => Rotation::MINUTELY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

// ============================================================================
// 配置
// ============================================================================

/// 订阅者配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认级别，`RUST_LOG` 存在时被其覆盖
    pub level: String,
    /// JSON 格式输出
    pub json_format: bool,
    /// 输出到标准输出
    pub console_output: bool,
    /// 日志目录，None 表示不写文件
    pub log_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 轮转策略
    pub rotation: RotationStrategy,
    /// 期望保留的文件数，清理由外部完成
    pub max_files: usize,
    /// 追加的 EnvFilter 指令
    pub directives: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            log_dir: None,
            file_prefix: "chips-bundles".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: 7,
            directives: Vec::new(),
        }
    }
}

impl LoggerConfig {
    /// 创建构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 由框架配置的 `logging` 段转换
    ///
    /// `file_output` 为 false 时忽略 `log_dir`。
    pub fn from_log_config(log: &LogConfig) -> Self {
        Self {
            level: log.level.clone(),
            json_format: log.json_format,
            log_dir: log.log_dir.clone().filter(|_| log.file_output),
            rotation: RotationStrategy::parse(&log.rotation),
            max_files: log.max_files,
            ..Default::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        self.directives
            .iter()
            .filter_map(|d| match d.trim().parse() {
                Ok(directive) => Some(directive),
                Err(e) => {
                    eprintln!("忽略无效的日志过滤指令 {d:?}: {e}");
                    None
                }
            })
            .fold(base, EnvFilter::add_directive)
    }
}

/// [`LoggerConfig`] 构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 默认级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// JSON 输出
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 控制台输出
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 写入文件的目录
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = Some(dir.into());
        self
    }

    /// 文件名前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 保留文件数
    pub fn max_files(mut self, count: usize) -> Self {
        self.config.max_files = count;
        self
    }

    /// 追加一条过滤指令，例如 `chips_bundles::resolver=trace`
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.config.directives.push(directive.into());
        self
    }

    /// 完成构建
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 初始化
// ============================================================================

/// 非阻塞写入器的守卫
///
/// 丢弃时刷新尚未写出的日志，需存活到进程退出。
#[must_use = "丢弃守卫会停止后台写入"]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

impl LogGuard {
    fn empty() -> Self {
        Self { _guards: Vec::new() }
    }
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// 全局订阅者安装入口
pub struct Logger;

impl Logger {
    /// 安装全局订阅者
    ///
    /// # 错误
    ///
    /// 已安装过订阅者（包括其他库安装的）时返回 `CoreError::InitFailed`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if INSTALLED.load(Ordering::SeqCst) {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let mut guard = LogGuard::empty();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(io::stdout());
            guard._guards.push(worker);
            layers.push(fmt_layer(writer, config.json_format, true));
        }

        if let Some(dir) = &config.log_dir {
            let appender = RollingFileAppender::new(
                config.rotation.rotation(),
                dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._guards.push(worker);
            layers.push(fmt_layer(writer, config.json_format, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(config.env_filter())
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {e}")))?;

        INSTALLED.store(true, Ordering::SeqCst);
        tracing::debug!(
            level = %config.level,
            log_dir = ?config.log_dir,
            max_files = config.max_files,
            "日志系统已初始化"
        );
        Ok(guard)
    }

    /// 按框架配置安装订阅者
    pub fn init_from_config(config: &FrameworkConfig) -> Result<LogGuard> {
        Self::init(LoggerConfig::from_log_config(&config.logging))
    }

    /// 安装订阅者，已安装时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_else(|_| LogGuard::empty())
    }
}

fn fmt_layer<W>(writer: W, json: bool, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(ansi && !json);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

// ============================================================================
// 字段名
// ============================================================================

/// 日志中使用的结构化字段名
pub mod fields {
    /// bundle ID
    pub const BUNDLE_ID: &str = "bundle_id";
    /// 资源规范名（`name:version`）
    pub const RESOURCE: &str = "resource";
    /// 模块标识
    pub const MODULE: &str = "module";
    /// 片段资源
    pub const FRAGMENT: &str = "fragment";
    /// 锁方法
    pub const LOCK_METHOD: &str = "lock_method";
    /// 事件类型
    pub const EVENT_TYPE: &str = "event_type";
    /// 服务 ID
    pub const SERVICE_ID: &str = "service_id";
    /// 启动级别
    pub const START_LEVEL: &str = "start_level";
    /// 错误描述
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_parse() {
        assert_eq!(RotationStrategy::parse(" Hourly "), RotationStrategy::Hourly);
        assert_eq!(RotationStrategy::parse("none"), RotationStrategy::Never);
        assert_eq!(RotationStrategy::parse("weekly"), RotationStrategy::Daily);
    }

    #[test]
    fn test_from_log_config_respects_file_output() {
        let mut log = LogConfig {
            level: "warn".to_string(),
            file_output: false,
            log_dir: Some(PathBuf::from("/var/log/chips")),
            json_format: true,
            rotation: "minutely".to_string(),
            max_files: 3,
        };

        let config = LoggerConfig::from_log_config(&log);
        assert_eq!(config.level, "warn");
        assert!(config.json_format);
        assert!(config.log_dir.is_none());
        assert_eq!(config.rotation, RotationStrategy::Minutely);

        log.file_output = true;
        let config = LoggerConfig::from_log_config(&log);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/chips")));
    }

    #[test]
    fn test_builder_collects_directives() {
        let config = LoggerConfig::builder()
            .console_output(false)
            .directive("chips_bundles::resolver=trace")
            .directive("chips_bundles::events=debug")
            .build();
        assert!(!config.console_output);
        assert_eq!(config.directives.len(), 2);
    }

    #[test]
    fn test_try_init_never_fails() {
        let config = FrameworkConfig::default();
        let _first = Logger::try_init(LoggerConfig::from_log_config(&config.logging));
        let _second = Logger::try_init(LoggerConfig::default());
        assert!(Logger::init_from_config(&config).is_err());
    }
}
