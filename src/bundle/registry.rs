//! bundle 注册表
//!
//! 按 ID 与安装位置索引已安装的 bundle。ID 单调递增，卸载后不复用。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::bundle::Bundle;
use super::state::{BundleId, BundleState};
use crate::resource::ResourceId;
use crate::utils::IdSequence;

/// bundle 注册表
pub struct BundleRegistry {
    bundles: RwLock<BTreeMap<BundleId, Arc<Bundle>>>,
    locations: RwLock<HashMap<String, BundleId>>,
    ids: IdSequence,
}

impl BundleRegistry {
    /// 创建空注册表，普通 bundle 的 ID 从 1 开始
    pub fn new() -> Self {
        Self {
            bundles: RwLock::new(BTreeMap::new()),
            locations: RwLock::new(HashMap::new()),
            ids: IdSequence::starting_at(1),
        }
    }

    /// 分配下一个 bundle ID
    pub fn next_id(&self) -> BundleId {
        BundleId::new(self.ids.next())
    }

    /// 登记 bundle
    pub fn insert(&self, bundle: Arc<Bundle>) {
        debug!(bundle_id = %bundle.id(), location = %bundle.location(), "登记 bundle");
        self.locations
            .write()
            .insert(bundle.location().to_string(), bundle.id());
        self.bundles.write().insert(bundle.id(), bundle);
    }

    /// 移除 bundle
    pub fn remove(&self, id: BundleId) -> Option<Arc<Bundle>> {
        let removed = self.bundles.write().remove(&id)?;
        self.locations.write().remove(removed.location());
        Some(removed)
    }

    /// 按 ID 查询
    pub fn get(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.bundles.read().get(&id).cloned()
    }

    /// 按安装位置查询
    pub fn by_location(&self, location: &str) -> Option<Arc<Bundle>> {
        let id = *self.locations.read().get(location)?;
        self.get(id)
    }

    /// 按资源查询所属 bundle
    pub fn by_resource(&self, resource: ResourceId) -> Option<Arc<Bundle>> {
        self.bundles
            .read()
            .values()
            .find(|b| b.revisions().iter().any(|r| r.id() == resource))
            .cloned()
    }

    /// 全部 bundle（ID 升序）
    pub fn all(&self) -> Vec<Arc<Bundle>> {
        self.bundles.read().values().cloned().collect()
    }

    /// 处于指定状态的 bundle（ID 升序）
    pub fn with_state(&self, state: BundleState) -> Vec<Arc<Bundle>> {
        self.bundles
            .read()
            .values()
            .filter(|b| b.state() == state)
            .cloned()
            .collect()
    }

    /// 已登记数量
    pub fn len(&self) -> usize {
        self.bundles.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.bundles.read().is_empty()
    }

    /// 清空
    pub fn clear(&self) {
        self.bundles.write().clear();
        self.locations.write().clear();
    }
}

impl Default for BundleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use semver::Version;

    fn bundle(registry: &BundleRegistry, name: &str) -> Arc<Bundle> {
        let resource = Resource::builder(name, Version::new(1, 0, 0)).build().unwrap();
        Arc::new(Bundle::new(registry.next_id(), format!("mem:{}", name), resource))
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = BundleRegistry::new();
        let a = bundle(&registry, "a");
        registry.insert(a.clone());

        assert_eq!(a.id(), BundleId::new(1));
        assert!(registry.by_location("mem:a").is_some());
        assert!(registry
            .by_resource(a.current_revision().id())
            .is_some());
        assert_eq!(registry.with_state(BundleState::Installed).len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let registry = BundleRegistry::new();
        let a = bundle(&registry, "a");
        registry.insert(a.clone());
        registry.remove(a.id());
        assert!(registry.by_location("mem:a").is_none());

        let b = bundle(&registry, "a");
        assert_eq!(b.id(), BundleId::new(2));
    }
}
