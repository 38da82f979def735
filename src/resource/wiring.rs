//! 连线
//!
//! `Wire` 只由成功的解析产生；`Wiring` 是某个资源在最近一次解析时的连线快照，
//! 重新解析会生成新的 `Wiring` 对象而不是原地修改。

use std::sync::Arc;

use super::capability::{Capability, Requirement};
use super::resource::{Resource, ResourceId};

/// 连线：需求方的一个需求由提供方的一个能力满足
#[derive(Debug, Clone)]
pub struct Wire {
    requirement: Requirement,
    capability: Capability,
    requirer: Arc<Resource>,
    provider: Arc<Resource>,
}

impl Wire {
    /// 创建连线
    pub fn new(
        requirement: Requirement,
        capability: Capability,
        requirer: Arc<Resource>,
        provider: Arc<Resource>,
    ) -> Self {
        Self {
            requirement,
            capability,
            requirer,
            provider,
        }
    }

    /// 需求
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// 满足需求的能力
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// 需求方
    pub fn requirer(&self) -> &Arc<Resource> {
        &self.requirer
    }

    /// 提供方
    pub fn provider(&self) -> &Arc<Resource> {
        &self.provider
    }

    /// 连线所在命名空间
    pub fn namespace(&self) -> &str {
        self.capability.namespace()
    }
}

impl PartialEq for Wire {
    fn eq(&self, other: &Self) -> bool {
        self.requirement == other.requirement
            && self.capability == other.capability
            && self.requirer.id() == other.requirer.id()
            && self.provider.id() == other.provider.id()
    }
}

/// 资源的连线快照
#[derive(Debug)]
pub struct Wiring {
    resource: ResourceId,
    required: Vec<Wire>,
    provided: Vec<Wire>,
}

impl Wiring {
    /// 创建快照
    pub fn new(resource: ResourceId, required: Vec<Wire>, provided: Vec<Wire>) -> Self {
        Self {
            resource,
            required,
            provided,
        }
    }

    /// 所属资源
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// 作为需求方的连线
    pub fn required_wires(&self, ns: Option<&str>) -> Vec<&Wire> {
        self.required
            .iter()
            .filter(|w| ns.map_or(true, |ns| w.namespace() == ns))
            .collect()
    }

    /// 作为提供方的连线
    pub fn provided_wires(&self, ns: Option<&str>) -> Vec<&Wire> {
        self.provided
            .iter()
            .filter(|w| ns.map_or(true, |ns| w.namespace() == ns))
            .collect()
    }
}

/// 解析结果：资源到其连线列表的有序映射
///
/// 迭代顺序即解析器进入资源的顺序。
#[derive(Debug, Clone, Default)]
pub struct WireMap {
    entries: Vec<(Arc<Resource>, Vec<Wire>)>,
}

impl WireMap {
    /// 创建空映射
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换资源的连线
    pub fn insert(&mut self, resource: Arc<Resource>, wires: Vec<Wire>) {
        match self.entries.iter_mut().find(|(r, _)| r.id() == resource.id()) {
            Some(entry) => entry.1 = wires,
            None => self.entries.push((resource, wires)),
        }
    }

    /// 查询资源的连线
    pub fn get(&self, id: ResourceId) -> Option<&[Wire]> {
        self.entries
            .iter()
            .find(|(r, _)| r.id() == id)
            .map(|(_, wires)| wires.as_slice())
    }

    /// 是否包含资源
    pub fn contains(&self, id: ResourceId) -> bool {
        self.get(id).is_some()
    }

    /// 按顺序迭代
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Resource>, &[Wire])> {
        self.entries.iter().map(|(r, w)| (r, w.as_slice()))
    }

    /// 按顺序列出资源
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        self.entries.iter().map(|(r, _)| r.clone()).collect()
    }

    /// 条目数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
