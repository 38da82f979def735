//! bundle
//!
//! 可变的生命周期包装：一个当前资源加若干历史修订版、原子状态字段、
//! 锁项句柄，以及活动期间保留的激活器实例。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use tracing::debug;

use super::activator::BundleActivator;
use super::state::{BundleId, BundleState};
use crate::lock::{LockSupport, LockableItem};
use crate::resource::Resource;

/// bundle
pub struct Bundle {
    id: BundleId,
    location: String,
    revisions: RwLock<Vec<Arc<Resource>>>,
    state: AtomicU8,
    lock_support: LockSupport,
    activator: Mutex<Option<Arc<dyn BundleActivator>>>,
    last_modified: RwLock<DateTime<Utc>>,
}

impl Bundle {
    /// 创建处于 INSTALLED 状态的 bundle，并把资源附着到该 bundle
    pub fn new(id: BundleId, location: impl Into<String>, resource: Arc<Resource>) -> Self {
        resource.attach_bundle(id);
        Self {
            id,
            location: location.into(),
            lock_support: LockSupport::new(format!("bundle-{}", id)),
            revisions: RwLock::new(vec![resource]),
            state: AtomicU8::new(BundleState::Installed as u8),
            activator: Mutex::new(None),
            last_modified: RwLock::new(Utc::now()),
        }
    }

    /// bundle ID
    pub fn id(&self) -> BundleId {
        self.id
    }

    /// 安装位置
    pub fn location(&self) -> &str {
        &self.location
    }

    /// 当前资源
    pub fn current_revision(&self) -> Arc<Resource> {
        let revisions = self.revisions.read();
        revisions[revisions.len() - 1].clone()
    }

    /// 全部修订版，当前修订版在最后
    pub fn revisions(&self) -> Vec<Arc<Resource>> {
        self.revisions.read().clone()
    }

    /// 符号名
    pub fn symbolic_name(&self) -> String {
        self.current_revision().symbolic_name().to_string()
    }

    /// 版本
    pub fn version(&self) -> Version {
        self.current_revision().version().clone()
    }

    /// `name:version` 形式的规范名
    pub fn canonical_name(&self) -> String {
        self.current_revision().canonical_name()
    }

    /// 是否为片段
    pub fn is_fragment(&self) -> bool {
        self.current_revision().is_fragment()
    }

    /// 当前状态（最后一次发布的值）
    pub fn state(&self) -> BundleState {
        BundleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 变更状态
    pub(crate) fn change_state(&self, state: BundleState) {
        let previous = BundleState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            *self.last_modified.write() = Utc::now();
            debug!(bundle_id = %self.id, from = %previous, to = %state, "bundle 状态变更");
        }
    }

    /// 最后修改时间
    pub fn last_modified(&self) -> DateTime<Utc> {
        *self.last_modified.read()
    }

    /// 已实例化的激活器
    pub fn activator(&self) -> Option<Arc<dyn BundleActivator>> {
        self.activator.lock().clone()
    }

    pub(crate) fn set_activator(&self, activator: Arc<dyn BundleActivator>) {
        *self.activator.lock() = Some(activator);
    }
}

impl LockableItem for Bundle {
    fn lock_support(&self) -> &LockSupport {
        &self.lock_support
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.canonical_name(), self.id)
    }
}
