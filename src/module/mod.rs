//! 模块系统
//!
//! 包含模块图接口与宿主 bundle 的回退加载器。

pub mod fallback;
pub mod graph;

pub use fallback::{dynamic_load_depth, DynamicImport, FallbackLoader, ModuleSource};
pub use graph::{
    package_path, parent_path, InMemoryModuleGraph, LoadedEntry, Module, ModuleGraph,
    ModuleIdentifier,
};
