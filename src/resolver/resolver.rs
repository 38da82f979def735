//! 解析器
//!
//! 在约束求解之前对输入做预处理（单例过滤、可选片段扩展、可选宿主扩展），
//! 求解成功后按固定顺序应用结果：
//!
//! 1. 收集求解器给出的连线
//! 2. 把片段附着到宿主
//! 3. 解析本地库
//! 4. 在模块图中注册非片段资源
//! 5. 为普通 bundle 创建可加载的模块产物
//! 6. 创建已解析产物（必要时等待旧产物拆除）
//! 7. 提交连线快照
//! 8. bundle 状态变为 RESOLVED
//!
//! 全部步骤在框架连线锁内执行；任一步骤失败时后续步骤不再执行，已执行的
//! 步骤不回滚。RESOLVED 事件在释放锁之后按解析结果的顺序触发。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};

use super::artifacts::ResolvedArtifacts;
use super::context::ResolveContext;
use super::environment::Environment;
use super::native::NativeCode;
use super::solver::ConstraintSolver;
use crate::bundle::{Bundle, BundleRegistry, BundleState};
use crate::core::config::ResolverConfig;
use crate::events::{BundleEventType, FrameworkEvents};
use crate::lock::{with_owner, FrameworkWiringLock, LockManager, LockMethod};
use crate::module::ModuleGraph;
use crate::resource::{namespace, Resource, Wire, WireMap};
use crate::utils::{CoreError, Result};

/// 解析器依赖的组件
pub struct ResolverComponents {
    /// 连线环境
    pub environment: Arc<Environment>,
    /// 约束求解器
    pub solver: Arc<dyn ConstraintSolver>,
    /// 锁管理器
    pub locks: LockManager,
    /// 框架连线锁
    pub wiring_lock: Arc<FrameworkWiringLock>,
    /// 模块图
    pub module_graph: Arc<dyn ModuleGraph>,
    /// 本地库解析
    pub native_code: Arc<dyn NativeCode>,
    /// 已解析产物
    pub artifacts: Arc<ResolvedArtifacts>,
    /// bundle 注册表
    pub bundles: Arc<BundleRegistry>,
    /// 事件子系统
    pub events: FrameworkEvents,
}

/// 解析器
pub struct Resolver {
    environment: Arc<Environment>,
    solver: Arc<dyn ConstraintSolver>,
    locks: LockManager,
    wiring_lock: Arc<FrameworkWiringLock>,
    module_graph: Arc<dyn ModuleGraph>,
    native_code: Arc<dyn NativeCode>,
    artifacts: Arc<ResolvedArtifacts>,
    bundles: Arc<BundleRegistry>,
    events: FrameworkEvents,
    config: ResolverConfig,
}

impl Resolver {
    /// 创建解析器
    pub fn new(components: ResolverComponents, config: ResolverConfig) -> Self {
        Self {
            environment: components.environment,
            solver: components.solver,
            locks: components.locks,
            wiring_lock: components.wiring_lock,
            module_graph: components.module_graph,
            native_code: components.native_code,
            artifacts: components.artifacts,
            bundles: components.bundles,
            events: components.events,
            config,
        }
    }

    /// 连线环境
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// 已解析产物
    pub fn artifacts(&self) -> &Arc<ResolvedArtifacts> {
        &self.artifacts
    }

    // ==================== 预处理 ====================

    /// 创建解析上下文
    ///
    /// - 同名单例只保留第一个
    /// - 与必选资源宿主能力匹配的已安装片段作为可选资源加入
    /// - 任一必选资源带可选包导入时，所有处于 INSTALLED 状态的非片段 bundle
    ///   作为可选资源加入
    pub fn create_resolve_context(
        &self,
        mandatory: Vec<Arc<Resource>>,
        optional: Vec<Arc<Resource>>,
    ) -> ResolveContext {
        let mandatory = filter_singletons(mandatory);
        let mut optional: Vec<Arc<Resource>> = optional
            .into_iter()
            .filter(|r| !mandatory.iter().any(|m| m.id() == r.id()))
            .collect();

        let contains = |list: &[Arc<Resource>], resource: &Resource| {
            list.iter().any(|r| r.id() == resource.id())
        };

        let host_capabilities: Vec<_> = mandatory
            .iter()
            .filter_map(|r| r.host_capability())
            .collect();
        if !host_capabilities.is_empty() {
            for fragment in self.environment.resources() {
                let Some(host_req) = fragment.host_requirement() else {
                    continue;
                };
                if contains(&mandatory, &fragment) || contains(&optional, &fragment) {
                    continue;
                }
                if host_capabilities.iter().any(|c| host_req.matches(c)) {
                    trace!(fragment = %fragment, "加入可选片段");
                    optional.push(fragment);
                }
            }
        }

        if mandatory.iter().any(|r| r.has_optional_package_requirement()) {
            for bundle in self.bundles.with_state(BundleState::Installed) {
                let resource = bundle.current_revision();
                if resource.is_fragment()
                    || contains(&mandatory, &resource)
                    || contains(&optional, &resource)
                {
                    continue;
                }
                trace!(resource = %resource, "加入可选宿主");
                optional.push(resource);
            }
        }

        ResolveContext::new(mandatory, optional)
    }

    // ==================== 解析 ====================

    /// 只求解，不应用
    ///
    /// # 错误
    ///
    /// 求解失败返回解析错误；加锁超时返回 `CoreError::LockTimeout`
    pub async fn resolve(&self, context: &ResolveContext) -> Result<WireMap> {
        with_owner(async {
            let _lock = self
                .locks
                .lock_items(LockMethod::Resolve, &[self.wiring_lock.as_ref()])
                .await?;
            self.solver.resolve(&self.environment, context)
        })
        .await
    }

    /// 求解并应用结果
    ///
    /// # 返回
    ///
    /// 返回求解得到的连线映射
    ///
    /// # 错误
    ///
    /// 求解失败返回解析错误；应用步骤 3 到 6 失败返回 `CoreError::ApplyFailed`，
    /// 之前的步骤不回滚
    #[instrument(skip_all, fields(mandatory = context.mandatory().len(), optional = context.optional().len()))]
    pub async fn resolve_and_apply(&self, context: &ResolveContext) -> Result<WireMap> {
        with_owner(async {
            let (wiremap, resolved) = {
                let _lock = self
                    .locks
                    .lock_items(LockMethod::Resolve, &[self.wiring_lock.as_ref()])
                    .await?;
                let wiremap = self.solver.resolve(&self.environment, context)?;
                let resolved = self.apply_resolution_result(&wiremap).await?;
                (wiremap, resolved)
            };

            for bundle in &resolved {
                self.events.fire_bundle_event(bundle, BundleEventType::Resolved);
            }
            Ok::<_, CoreError>(wiremap)
        })
        .await
    }

    /// 解析单个 bundle 的当前资源
    pub async fn resolve_bundle(&self, bundle: &Arc<Bundle>) -> Result<()> {
        if bundle.state() != BundleState::Installed {
            return Ok(());
        }
        let context = self.create_resolve_context(vec![bundle.current_revision()], Vec::new());
        self.resolve_and_apply(&context).await.map(|_| ())
    }

    async fn apply_resolution_result(&self, wiremap: &WireMap) -> Result<Vec<Arc<Bundle>>> {
        // 1. 连线
        let entries: Vec<(Arc<Resource>, Vec<Wire>)> = wiremap
            .iter()
            .map(|(resource, wires)| (resource.clone(), wires.to_vec()))
            .collect();
        trace!(resources = entries.len(), "收集解析结果");

        // 2. 片段附着到宿主
        for (resource, wires) in &entries {
            if !resource.is_fragment() {
                continue;
            }
            for wire in wires.iter().filter(|w| w.namespace() == namespace::HOST) {
                resource.attach_to_host(wire.provider());
                debug!(fragment = %resource, host = %wire.provider(), "片段附着到宿主");
            }
        }

        // 3. 本地库
        for (resource, _) in &entries {
            if resource.native_code().is_none() {
                continue;
            }
            let libraries = self
                .native_code
                .resolve_native_code(resource)
                .map_err(|e| apply_failed("native-code", e))?;
            debug!(resource = %resource, libraries = libraries.len(), "本地库已选定");
            resource.set_native_libraries(libraries);
        }

        let hosts: Vec<&(Arc<Resource>, Vec<Wire>)> =
            entries.iter().filter(|(r, _)| !r.is_fragment()).collect();

        // 4. 注册模块
        let mut identifiers = Vec::with_capacity(hosts.len());
        for (resource, wires) in &hosts {
            let identifier = self
                .module_graph
                .register(resource, wires)
                .await
                .map_err(|e| apply_failed("module-register", e))?;
            identifiers.push((resource.clone(), identifier));
        }

        // 5. 模块产物
        for (resource, identifier) in &identifiers {
            if !is_regular_bundle(resource) {
                continue;
            }
            self.module_graph
                .create_artifact(identifier)
                .await
                .map_err(|e| apply_failed("module-artifact", e))?;
        }

        // 6. 已解析产物
        let timeout = self.config.stale_artifact_timeout();
        for (resource, _) in &identifiers {
            if let Some(bundle_id) = resource.bundle_id().filter(|id| !id.is_system()) {
                self.artifacts.create(bundle_id, timeout).await;
            }
        }

        // 7. 提交连线
        self.environment.update_wiring(wiremap);

        // 8. 状态变更
        let mut resolved = Vec::new();
        let mut seen = HashSet::new();
        for (resource, _) in &entries {
            let Some(bundle) = resource.bundle_id().and_then(|id| self.bundles.get(id)) else {
                continue;
            };
            if !seen.insert(bundle.id()) {
                continue;
            }
            if bundle.state() == BundleState::Installed {
                bundle.change_state(BundleState::Resolved);
                resolved.push(bundle);
            }
        }

        info!(resources = entries.len(), bundles = resolved.len(), "解析结果已应用");
        Ok(resolved)
    }
}

fn apply_failed(step: &'static str, source: CoreError) -> CoreError {
    warn!(step, error = %source, "解析结果应用失败");
    CoreError::ApplyFailed {
        step,
        source: Box::new(source),
    }
}

fn is_regular_bundle(resource: &Resource) -> bool {
    resource.bundle_id().is_some_and(|id| !id.is_system())
}

/// 同名单例只保留第一个
fn filter_singletons(mandatory: Vec<Arc<Resource>>) -> Vec<Arc<Resource>> {
    let mut names = HashSet::new();
    mandatory
        .into_iter()
        .filter(|r| {
            if !r.is_singleton() {
                return true;
            }
            let kept = names.insert(r.symbolic_name().to_string());
            if !kept {
                debug!(resource = %r, "忽略重复的单例");
            }
            kept
        })
        .collect()
}
