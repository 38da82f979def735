//! bundle 与其生命周期
//!
//! 包含 bundle 本身、状态机、激活器接口、启动级别与注册表。

pub mod activator;
#[allow(clippy::module_inception)]
pub mod bundle;
pub mod lifecycle;
pub mod registry;
pub mod start_level;
pub mod state;

pub use activator::{BundleActivator, BundleContext};
pub use bundle::Bundle;
pub use lifecycle::{BundleLifecycle, LifecycleComponents};
pub use registry::BundleRegistry;
pub use start_level::{StartLevelManager, StartLevelSupport};
pub use state::{BundleId, BundleState, StartOptions, StopOptions};
