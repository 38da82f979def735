//! # Chips Bundles - 薯片动态模块运行时
//!
//! 在进程内托管可独立安装、解析、启动、停止与卸载的 bundle：
//!
//! - **解析与连线**: 把 bundle 的需求与其他 bundle 的能力连接起来
//! - **锁管理**: 生命周期操作与解析之间有序、可重入的加锁
//! - **生命周期**: INSTALLED / RESOLVED / STARTING / ACTIVE / STOPPING / UNINSTALLED 状态机
//! - **回退加载**: 按动态导入在其他 bundle 中查找类与资源
//! - **事件分发**: bundle、框架与服务事件的同步和异步投递
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_bundles::{Deployment, Framework, FrameworkConfig, Logger, Resource, StartOptions};
//! use semver::Version;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FrameworkConfig::default();
//!     let _log_guard = Logger::init_from_config(&config)?;
//!
//!     // 创建并启动框架
//!     let framework = Framework::new(config).await?;
//!     framework.start().await?;
//!
//!     // 安装并启动 bundle
//!     let resource = Resource::builder("com.acme.service", Version::new(1, 0, 0))
//!         .export_package("com.acme.service")
//!         .build()?;
//!     let bundle = framework
//!         .install_bundle(Deployment::new("mem:com.acme.service", resource))
//!         .await?;
//!     framework.start_bundle(bundle.id(), StartOptions::NONE).await?;
//!
//!     framework.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `core` - 框架、配置与部署描述
//! - `resource` - 资源模型：能力、需求、过滤器与连线
//! - `resolver` - 解析器、连线环境与约束求解
//! - `lock` - 锁管理
//! - `bundle` - bundle、状态机与启动级别
//! - `module` - 模块图与回退加载器
//! - `events` - 事件分发与钩子
//! - `utils` - 错误类型、ID 生成与日志

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bundle;
pub mod core;
pub mod events;
pub mod lock;
pub mod module;
pub mod resolver;
pub mod resource;
pub mod utils;

// 重导出常用类型，方便使用
pub use bundle::{
    Bundle, BundleActivator, BundleContext, BundleId, BundleState, StartLevelSupport,
    StartOptions, StopOptions,
};
pub use core::{
    Deployment, Framework, FrameworkBuilder, FrameworkConfig, FrameworkConfigBuilder,
    FrameworkState,
};
pub use events::{
    BundleEvent, BundleEventType, BundleListener, FrameworkEvent, FrameworkEventType,
    FrameworkEvents, FrameworkListener, ServiceEvent, ServiceEventType, ServiceListener,
};
pub use lock::{LockManager, LockMethod};
pub use module::{FallbackLoader, LoadedEntry, ModuleGraph};
pub use resolver::{ResolveContext, Resolver};
pub use resource::{Capability, Filter, Requirement, Resource, ResourceBuilder, Wire};

pub use utils::{error_code, generate_id, generate_uuid, CoreError, Result};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
