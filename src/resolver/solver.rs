//! 约束求解器
//!
//! 求解器是纯计算：输入连线环境与解析上下文，输出一组一致的连线，不修改任何状态。
//!
//! 默认实现 [`DefaultSolver`] 采用带回溯的深度优先搜索：
//!
//! - 已解析的资源直接作为提供者，不再重新连线
//! - 未解析的已安装资源被选为提供者时随之一起解析
//! - 依赖环被容忍（进入中的资源视为已满足）
//! - 可选需求无法满足时跳过，可选资源无法解析时整体丢弃
//! - 片段只有在宿主同时解析时才能解析
//! - 同一符号名最多选中一个单例

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use super::context::ResolveContext;
use super::environment::Environment;
use crate::resource::{namespace, Capability, Requirement, Resource, ResourceId, Wire, WireMap};
use crate::utils::{CoreError, Result};

/// 约束求解器接口
pub trait ConstraintSolver: Send + Sync {
    /// 计算解析结果
    ///
    /// # 错误
    ///
    /// 任一必选资源无法解析时返回解析错误
    fn resolve(&self, environment: &Environment, context: &ResolveContext) -> Result<WireMap>;
}

/// 默认回溯求解器
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSolver;

impl DefaultSolver {
    /// 创建求解器
    pub fn new() -> Self {
        Self
    }
}

impl ConstraintSolver for DefaultSolver {
    fn resolve(&self, environment: &Environment, context: &ResolveContext) -> Result<WireMap> {
        let session = Session::new(environment, context);
        let mut state = SolveState::default();

        for resource in context.mandatory() {
            session.resolve_resource(resource, &mut state)?;
        }

        for resource in context.optional() {
            let snapshot = state.clone();
            if let Err(e) = session.resolve_resource(resource, &mut state) {
                debug!(resource = %resource, error = %e, "可选资源无法解析，已丢弃");
                state = snapshot;
            }
        }

        let mut wiremap = WireMap::new();
        for resource in state.order {
            let wires = state.wires.remove(&resource.id()).unwrap_or_default();
            wiremap.insert(resource, wires);
        }
        Ok(wiremap)
    }
}

// ==================== 求解过程 ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    InProgress,
    Resolved,
}

#[derive(Clone, Default)]
struct SolveState {
    status: HashMap<ResourceId, Status>,
    order: Vec<Arc<Resource>>,
    wires: HashMap<ResourceId, Vec<Wire>>,
    singletons: HashMap<String, ResourceId>,
}

struct Session<'a> {
    environment: &'a Environment,
    /// 候选提供者：已解析资源在前，其余已安装的非片段资源与上下文资源在后
    pool: Vec<Arc<Resource>>,
    /// 上下文资源（片段只能附着到这些宿主上）
    context: Vec<Arc<Resource>>,
}

impl<'a> Session<'a> {
    fn new(environment: &'a Environment, context: &ResolveContext) -> Self {
        let mut pool = environment.resolved_resources();
        for resource in environment.resources() {
            if !resource.is_fragment() && !pool.iter().any(|r| r.id() == resource.id()) {
                pool.push(resource);
            }
        }
        let mut members: Vec<Arc<Resource>> = Vec::new();
        for resource in context.mandatory().iter().chain(context.optional()) {
            if !members.iter().any(|r| r.id() == resource.id()) {
                members.push(resource.clone());
            }
            if !pool.iter().any(|r| r.id() == resource.id()) {
                pool.push(resource.clone());
            }
        }
        Self {
            environment,
            pool,
            context: members,
        }
    }

    fn resolve_resource(&self, resource: &Arc<Resource>, state: &mut SolveState) -> Result<()> {
        if self.environment.is_resolved(resource.id()) || state.status.contains_key(&resource.id()) {
            return Ok(());
        }

        if resource.is_singleton() {
            self.check_singleton(resource, state)?;
            state
                .singletons
                .insert(resource.symbolic_name().to_string(), resource.id());
        }

        trace!(resource = %resource, "进入资源");
        state.status.insert(resource.id(), Status::InProgress);
        state.order.push(resource.clone());
        state.wires.insert(resource.id(), Vec::new());

        for requirement in resource.requirements(None) {
            if requirement.is_dynamic() {
                continue;
            }
            if self.satisfied_by_self(resource, requirement) {
                trace!(resource = %resource, requirement = %requirement, "需求由自身导出满足");
                continue;
            }

            match self.satisfy(resource, requirement, state) {
                Some(wire) => {
                    if let Some(wires) = state.wires.get_mut(&resource.id()) {
                        wires.push(wire);
                    }
                }
                None if requirement.is_optional() => {
                    trace!(resource = %resource, requirement = %requirement, "跳过无法满足的可选需求");
                }
                None => {
                    return Err(CoreError::Unresolvable {
                        resource: resource.canonical_name(),
                        requirement: requirement.to_string(),
                    });
                }
            }
        }

        state.status.insert(resource.id(), Status::Resolved);
        Ok(())
    }

    /// 依次尝试候选提供者，失败的尝试整体回滚
    fn satisfy(
        &self,
        requirer: &Arc<Resource>,
        requirement: &Requirement,
        state: &mut SolveState,
    ) -> Option<Wire> {
        for (provider, capability) in self.candidates(requirer, requirement) {
            let snapshot = state.clone();
            match self.resolve_resource(&provider, state) {
                Ok(()) => {
                    return Some(Wire::new(
                        requirement.clone(),
                        capability,
                        requirer.clone(),
                        provider,
                    ))
                }
                Err(e) => {
                    trace!(provider = %provider, error = %e, "候选提供者无法解析，回溯");
                    *state = snapshot;
                }
            }
        }
        None
    }

    /// 包导入可由资源自身的导出满足，不产生连线
    fn satisfied_by_self(&self, resource: &Resource, requirement: &Requirement) -> bool {
        requirement.namespace() == namespace::PACKAGE
            && resource
                .capabilities(Some(requirement.namespace()))
                .into_iter()
                .any(|c| requirement.matches(c))
    }

    fn candidates(
        &self,
        requirer: &Arc<Resource>,
        requirement: &Requirement,
    ) -> Vec<(Arc<Resource>, Capability)> {
        let is_host = requirement.namespace() == namespace::HOST;
        let providers = if is_host { &self.context } else { &self.pool };

        providers
            .iter()
            .filter(|p| p.id() != requirer.id())
            .flat_map(|p| {
                p.capabilities(Some(requirement.namespace()))
                    .into_iter()
                    .filter(|c| requirement.matches(c))
                    .map(|c| (p.clone(), c.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn check_singleton(&self, resource: &Resource, state: &SolveState) -> Result<()> {
        let conflict = match state.singletons.get(resource.symbolic_name()) {
            Some(id) => *id != resource.id(),
            None => self.environment.resolved_resources().iter().any(|r| {
                r.is_singleton()
                    && r.symbolic_name() == resource.symbolic_name()
                    && r.id() != resource.id()
            }),
        };
        if conflict {
            return Err(CoreError::SingletonConflict {
                symbolic_name: resource.symbolic_name().to_string(),
            });
        }
        Ok(())
    }
}
