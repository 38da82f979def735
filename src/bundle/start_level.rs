//! 启动级别
//!
//! bundle 只有在自身启动级别不高于框架启动级别时才会真正启动。
//! 持久自动启动标记记录 bundle 是否应在启动级别满足时自动启动。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use super::state::BundleId;
use crate::core::config::StartLevelConfig;

/// 启动级别服务接口
pub trait StartLevelSupport: Send + Sync {
    /// 框架当前启动级别
    fn start_level(&self) -> u32;

    /// 设置框架启动级别
    fn set_start_level(&self, level: u32);

    /// bundle 的启动级别
    fn bundle_start_level(&self, bundle: BundleId) -> u32;

    /// 设置 bundle 的启动级别
    fn set_bundle_start_level(&self, bundle: BundleId, level: u32);

    /// 框架启动级别是否正在变化
    fn is_changing_start_level(&self) -> bool;

    /// 标记启动级别变化开始或结束
    fn set_changing_start_level(&self, changing: bool);

    /// bundle 是否被标记为持久自动启动
    fn is_persistently_started(&self, bundle: BundleId) -> bool;

    /// 设置持久自动启动标记
    fn set_bundle_persistently_started(&self, bundle: BundleId, started: bool);

    /// 清除 bundle 的记录
    fn forget(&self, bundle: BundleId);
}

/// 默认启动级别管理器
#[derive(Debug)]
pub struct StartLevelManager {
    framework_level: AtomicU32,
    initial_bundle_level: AtomicU32,
    changing: AtomicBool,
    bundle_levels: RwLock<HashMap<BundleId, u32>>,
    persistently_started: RwLock<HashSet<BundleId>>,
}

impl StartLevelManager {
    /// 根据配置创建
    pub fn new(config: &StartLevelConfig) -> Self {
        Self {
            framework_level: AtomicU32::new(config.initial_framework_level),
            initial_bundle_level: AtomicU32::new(config.initial_bundle_level),
            changing: AtomicBool::new(false),
            bundle_levels: RwLock::new(HashMap::new()),
            persistently_started: RwLock::new(HashSet::new()),
        }
    }

    /// 新安装 bundle 使用的初始启动级别
    pub fn initial_bundle_start_level(&self) -> u32 {
        self.initial_bundle_level.load(Ordering::Acquire)
    }

    /// 设置新安装 bundle 使用的初始启动级别
    pub fn set_initial_bundle_start_level(&self, level: u32) {
        self.initial_bundle_level.store(level, Ordering::Release);
    }
}

impl Default for StartLevelManager {
    fn default() -> Self {
        Self::new(&StartLevelConfig::default())
    }
}

impl StartLevelSupport for StartLevelManager {
    fn start_level(&self) -> u32 {
        self.framework_level.load(Ordering::Acquire)
    }

    fn set_start_level(&self, level: u32) {
        let previous = self.framework_level.swap(level, Ordering::AcqRel);
        debug!(from = previous, to = level, "框架启动级别变更");
    }

    fn bundle_start_level(&self, bundle: BundleId) -> u32 {
        if bundle.is_system() {
            return 0;
        }
        self.bundle_levels
            .read()
            .get(&bundle)
            .copied()
            .unwrap_or_else(|| self.initial_bundle_start_level())
    }

    fn set_bundle_start_level(&self, bundle: BundleId, level: u32) {
        self.bundle_levels.write().insert(bundle, level);
    }

    fn is_changing_start_level(&self) -> bool {
        self.changing.load(Ordering::Acquire)
    }

    fn set_changing_start_level(&self, changing: bool) {
        self.changing.store(changing, Ordering::Release);
    }

    fn is_persistently_started(&self, bundle: BundleId) -> bool {
        self.persistently_started.read().contains(&bundle)
    }

    fn set_bundle_persistently_started(&self, bundle: BundleId, started: bool) {
        let mut set = self.persistently_started.write();
        if started {
            set.insert(bundle);
        } else {
            set.remove(&bundle);
        }
    }

    fn forget(&self, bundle: BundleId) {
        self.bundle_levels.write().remove(&bundle);
        self.persistently_started.write().remove(&bundle);
    }
}
