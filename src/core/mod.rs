//! 核心模块
//!
//! 包含框架配置、部署描述与框架本身。

pub mod config;
pub mod deployment;
pub mod framework;

pub use config::{
    EventConfig, FrameworkConfig, FrameworkConfigBuilder, LockConfig, LogConfig, ModuleConfig,
    ResolverConfig, StartLevelConfig,
};
pub use deployment::Deployment;
pub use framework::{
    Framework, FrameworkBuilder, FrameworkState, SYSTEM_BUNDLE_LOCATION,
    SYSTEM_BUNDLE_SYMBOLIC_NAME,
};
