//! 工具模块
//!
//! 包含错误类型、ID 生成与日志系统。

pub mod error;
pub mod id;
pub mod logger;

pub use error::{error_code, CoreError, ErrorKind, Result};
pub use id::{generate_id, generate_uuid, is_valid_id, IdSequence};
pub use logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
