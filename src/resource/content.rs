//! bundle 内容
//!
//! 存储层在运行时之外，这里只定义读取内容与实例化激活器所需的接口，
//! 并提供一个内存实现。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::bundle::BundleActivator;

/// 激活器工厂
pub type ActivatorFactory = Arc<dyn Fn() -> Arc<dyn BundleActivator> + Send + Sync>;

/// bundle 内容访问接口
pub trait BundleContent: Send + Sync {
    /// 读取条目
    fn entry(&self, path: &str) -> Option<Arc<[u8]>>;

    /// 列出全部条目路径
    fn entry_paths(&self) -> Vec<String>;

    /// 按类名创建激活器实例
    fn create_activator(&self, class_name: &str) -> Option<Arc<dyn BundleActivator>>;
}

/// 内存中的 bundle 内容
#[derive(Default, Clone)]
pub struct MemoryContent {
    entries: BTreeMap<String, Arc<[u8]>>,
    activators: HashMap<String, ActivatorFactory>,
}

impl MemoryContent {
    /// 创建空内容
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加条目
    pub fn with_entry(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        self.entries.insert(path.into(), Arc::from(data));
        self
    }

    /// 注册激活器工厂
    pub fn with_activator<F>(mut self, class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn BundleActivator> + Send + Sync + 'static,
    {
        self.activators.insert(class_name.into(), Arc::new(factory));
        self
    }
}

impl BundleContent for MemoryContent {
    fn entry(&self, path: &str) -> Option<Arc<[u8]>> {
        self.entries.get(path).cloned()
    }

    fn entry_paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn create_activator(&self, class_name: &str) -> Option<Arc<dyn BundleActivator>> {
        self.activators.get(class_name).map(|factory| factory())
    }
}

impl fmt::Debug for MemoryContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryContent")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("activators", &self.activators.keys().collect::<Vec<_>>())
            .finish()
    }
}
