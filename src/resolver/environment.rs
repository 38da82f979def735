//! 连线环境
//!
//! 保存已安装资源（按安装顺序）与当前连线快照。只在框架连线锁内被解析、
//! 安装和卸载修改。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::resource::{Capability, Requirement, Resource, ResourceId, WireMap, Wiring};

#[derive(Default)]
struct EnvironmentState {
    resources: Vec<Arc<Resource>>,
    wirings: HashMap<ResourceId, Arc<Wiring>>,
}

/// 连线环境
#[derive(Default)]
pub struct Environment {
    state: RwLock<EnvironmentState>,
}

impl Environment {
    /// 创建空环境
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装资源，已存在的资源忽略
    pub fn install_resources(&self, resources: &[Arc<Resource>]) {
        let mut state = self.state.write();
        for resource in resources {
            if state.resources.iter().any(|r| r.id() == resource.id()) {
                continue;
            }
            debug!(resource = %resource, "环境安装资源");
            state.resources.push(resource.clone());
        }
    }

    /// 卸载资源并断开其连线快照
    pub fn uninstall_resources(&self, resources: &[Arc<Resource>]) {
        let mut state = self.state.write();
        for resource in resources {
            state.resources.retain(|r| r.id() != resource.id());
            state.wirings.remove(&resource.id());
            let installed = &state.resources;
            resource.detach(|id| installed.iter().find(|r| r.id() == id).cloned());
            debug!(resource = %resource, "环境卸载资源");
        }
    }

    /// 已安装资源（安装顺序）
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        self.state.read().resources.clone()
    }

    /// 按 ID 查询资源
    pub fn resource(&self, id: ResourceId) -> Option<Arc<Resource>> {
        self.state
            .read()
            .resources
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }

    /// 资源的连线快照
    pub fn wiring(&self, id: ResourceId) -> Option<Arc<Wiring>> {
        self.state.read().wirings.get(&id).cloned()
    }

    /// 资源是否已解析
    pub fn is_resolved(&self, id: ResourceId) -> bool {
        self.state.read().wirings.contains_key(&id)
    }

    /// 已解析的资源（安装顺序）
    pub fn resolved_resources(&self) -> Vec<Arc<Resource>> {
        let state = self.state.read();
        state
            .resources
            .iter()
            .filter(|r| state.wirings.contains_key(&r.id()))
            .cloned()
            .collect()
    }

    /// 在全部已安装资源中查找满足需求的能力
    pub fn find_providers(&self, requirement: &Requirement) -> Vec<(Arc<Resource>, Capability)> {
        let state = self.state.read();
        state
            .resources
            .iter()
            .flat_map(|r| {
                r.capabilities(Some(requirement.namespace()))
                    .into_iter()
                    .filter(|c| requirement.matches(c))
                    .map(|c| (r.clone(), c.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// 提交解析结果
    ///
    /// 为解析结果中的每个资源生成新的连线快照；已解析的提供方也会获得包含
    /// 新增提供连线的新快照。每个快照同时附着到对应资源上。
    ///
    /// # 返回
    ///
    /// 返回本次生成的全部快照
    pub fn update_wiring(&self, wiremap: &WireMap) -> HashMap<ResourceId, Arc<Wiring>> {
        let mut state = self.state.write();

        let mut provided: HashMap<ResourceId, Vec<_>> = HashMap::new();
        for (_, wires) in wiremap.iter() {
            for wire in wires {
                provided
                    .entry(wire.provider().id())
                    .or_default()
                    .push(wire.clone());
            }
        }

        let mut updated = HashMap::new();
        for (resource, wires) in wiremap.iter() {
            let provided_wires = provided.remove(&resource.id()).unwrap_or_default();
            let wiring = Arc::new(Wiring::new(resource.id(), wires.to_vec(), provided_wires));
            updated.insert(resource.id(), wiring);
        }

        // 已解析的提供方：沿用旧连线并追加新的提供连线
        for (provider_id, new_wires) in provided {
            let Some(old) = state.wirings.get(&provider_id) else {
                continue;
            };
            let required = old.required_wires(None).into_iter().cloned().collect();
            let mut provided_wires: Vec<_> = old.provided_wires(None).into_iter().cloned().collect();
            provided_wires.extend(new_wires);
            updated.insert(
                provider_id,
                Arc::new(Wiring::new(provider_id, required, provided_wires)),
            );
        }

        for (id, wiring) in &updated {
            state.wirings.insert(*id, wiring.clone());
            if let Some(resource) = state.resources.iter().find(|r| r.id() == *id) {
                resource.set_wiring(Some(wiring.clone()));
            }
            trace!(resource_id = %id, "提交连线快照");
        }

        updated
    }
}
