//! 框架
//!
//! 运行时的对外入口，持有全部组件：连线环境、解析器、锁管理器、模块图、
//! 启动级别、bundle 注册表与事件子系统。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_bundles::{Deployment, Framework, FrameworkConfig, Resource, StartOptions};
//! use semver::Version;
//!
//! #[tokio::main]
//! async fn main() -> chips_bundles::Result<()> {
//!     let framework = Framework::new(FrameworkConfig::default()).await?;
//!     framework.start().await?;
//!
//!     let resource = Resource::builder("com.acme.api", Version::new(1, 0, 0))
//!         .export_package("com.acme.api")
//!         .build()?;
//!     let bundle = framework
//!         .install_bundle(Deployment::new("mem:com.acme.api", resource))
//!         .await?;
//!     framework.start_bundle(bundle.id(), StartOptions::NONE).await?;
//!
//!     framework.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use semver::Version;
use tracing::{debug, info, instrument, warn};

use super::config::FrameworkConfig;
use super::deployment::Deployment;
use crate::bundle::{
    Bundle, BundleId, BundleLifecycle, BundleRegistry, BundleState, LifecycleComponents,
    StartLevelManager, StartLevelSupport, StartOptions, StopOptions,
};
use crate::events::{BundleEventType, FrameworkEventType, FrameworkEvents};
use crate::lock::{with_owner, FrameworkWiringLock, LockManager, LockMethod};
use crate::module::{FallbackLoader, InMemoryModuleGraph, ModuleGraph, ModuleSource};
use crate::resolver::{
    ConstraintSolver, DefaultSolver, Environment, NativeCode, NativeCodeResolver, Resolver,
    ResolverComponents, ResolvedArtifacts,
};
use crate::resource::Resource;
use crate::utils::{generate_uuid, CoreError, Result};

/// 系统 bundle 的符号名
pub const SYSTEM_BUNDLE_SYMBOLIC_NAME: &str = "system.bundle";
/// 系统 bundle 的安装位置
pub const SYSTEM_BUNDLE_LOCATION: &str = "System Bundle";

// ============================================================================
// 框架状态
// ============================================================================

/// 框架状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkState {
    /// 已创建，尚未启动
    Created,
    /// 启动中
    Starting,
    /// 运行中
    Active,
    /// 停止中
    Stopping,
    /// 已停止
    Stopped,
}

impl FrameworkState {
    /// 是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, FrameworkState::Created)
    }

    /// 是否可以关闭
    pub fn can_shutdown(&self) -> bool {
        matches!(self, FrameworkState::Active | FrameworkState::Created)
    }

    /// 是否还能安装与操作 bundle
    pub fn accepts_operations(&self) -> bool {
        !matches!(self, FrameworkState::Stopping | FrameworkState::Stopped)
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// 框架构建器
///
/// 可以替换模块图、约束求解器、本地库解析与启动级别服务的默认实现。
pub struct FrameworkBuilder {
    config: FrameworkConfig,
    module_graph: Option<Arc<dyn ModuleGraph>>,
    solver: Option<Arc<dyn ConstraintSolver>>,
    native_code: Option<Arc<dyn NativeCode>>,
    start_level: Option<Arc<dyn StartLevelSupport>>,
}

impl FrameworkBuilder {
    /// 以配置创建构建器
    pub fn new(config: FrameworkConfig) -> Self {
        Self {
            config,
            module_graph: None,
            solver: None,
            native_code: None,
            start_level: None,
        }
    }

    /// 使用自定义模块图
    pub fn module_graph(mut self, graph: Arc<dyn ModuleGraph>) -> Self {
        self.module_graph = Some(graph);
        self
    }

    /// 使用自定义约束求解器
    pub fn solver(mut self, solver: Arc<dyn ConstraintSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// 使用自定义本地库解析
    pub fn native_code(mut self, native_code: Arc<dyn NativeCode>) -> Self {
        self.native_code = Some(native_code);
        self
    }

    /// 使用自定义启动级别服务
    pub fn start_level(mut self, start_level: Arc<dyn StartLevelSupport>) -> Self {
        self.start_level = Some(start_level);
        self
    }

    /// 构建框架
    ///
    /// 创建全部组件并安装、解析系统 bundle（ID 0，ACTIVE）。
    ///
    /// # 错误
    ///
    /// 配置无效或系统 bundle 无法解析时返回错误
    pub async fn build(self) -> Result<Framework> {
        let config = self.config;
        config.validate()?;
        info!("初始化 bundle 运行时 v{}", crate::VERSION);

        let locks = LockManager::new(config.locks.timeout());
        let wiring_lock = Arc::new(FrameworkWiringLock::new());
        let events = FrameworkEvents::new(locks.clone(), config.events.async_delivery);
        let environment = Arc::new(Environment::new());
        let bundles = Arc::new(BundleRegistry::new());
        let module_graph: Arc<dyn ModuleGraph> = match self.module_graph {
            Some(graph) => graph,
            None => Arc::new(InMemoryModuleGraph::new(
                config.modules.identifier_prefix.clone(),
            )),
        };
        let start_level: Arc<dyn StartLevelSupport> = match self.start_level {
            Some(start_level) => start_level,
            None => Arc::new(StartLevelManager::new(&config.start_level)),
        };
        let solver: Arc<dyn ConstraintSolver> = match self.solver {
            Some(solver) => solver,
            None => Arc::new(DefaultSolver::new()),
        };
        let native_code: Arc<dyn NativeCode> = match self.native_code {
            Some(native_code) => native_code,
            None => Arc::new(NativeCodeResolver::default()),
        };
        debug!("基础组件初始化完成");

        let resolver = Arc::new(Resolver::new(
            ResolverComponents {
                environment: environment.clone(),
                solver,
                locks: locks.clone(),
                wiring_lock: wiring_lock.clone(),
                module_graph: module_graph.clone(),
                native_code,
                artifacts: Arc::new(ResolvedArtifacts::new()),
                bundles: bundles.clone(),
                events: events.clone(),
            },
            config.resolver.clone(),
        ));
        debug!("解析器初始化完成");

        let lifecycle = BundleLifecycle::new(LifecycleComponents {
            resolver: resolver.clone(),
            locks: locks.clone(),
            wiring_lock: wiring_lock.clone(),
            module_graph: module_graph.clone(),
            start_level: start_level.clone(),
            bundles: bundles.clone(),
            events: events.clone(),
        });

        let inner = Arc::new(FrameworkInner {
            uuid: generate_uuid(),
            config,
            state: RwLock::new(FrameworkState::Created),
            environment,
            bundles,
            locks,
            wiring_lock,
            module_graph,
            start_level,
            events,
            resolver,
            lifecycle,
        });
        inner.install_system_bundle().await?;

        info!(uuid = %inner.uuid, "bundle 运行时初始化完成");
        Ok(Framework { inner })
    }
}

// ============================================================================
// 框架
// ============================================================================

struct FrameworkInner {
    uuid: String,
    config: FrameworkConfig,
    state: RwLock<FrameworkState>,
    environment: Arc<Environment>,
    bundles: Arc<BundleRegistry>,
    locks: LockManager,
    wiring_lock: Arc<FrameworkWiringLock>,
    module_graph: Arc<dyn ModuleGraph>,
    start_level: Arc<dyn StartLevelSupport>,
    events: FrameworkEvents,
    resolver: Arc<Resolver>,
    lifecycle: BundleLifecycle,
}

impl FrameworkInner {
    async fn install_system_bundle(&self) -> Result<()> {
        let mut builder = Resource::builder(
            SYSTEM_BUNDLE_SYMBOLIC_NAME,
            Version::parse(crate::VERSION)?,
        )
        .singleton(true);
        for package in &self.config.system_packages {
            builder = builder.export_package(package.clone());
        }
        let resource = builder.build()?;

        let system = Arc::new(Bundle::new(
            BundleId::SYSTEM,
            SYSTEM_BUNDLE_LOCATION,
            resource.clone(),
        ));
        self.environment.install_resources(&[resource.clone()]);
        self.bundles.insert(system.clone());

        let context = self.resolver.create_resolve_context(vec![resource], Vec::new());
        self.resolver.resolve_and_apply(&context).await?;
        system.change_state(BundleState::Active);
        debug!(packages = self.config.system_packages.len(), "系统 bundle 已就绪");
        Ok(())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.state.read().accepts_operations() {
            Ok(())
        } else {
            Err(CoreError::FrameworkInactive)
        }
    }

    fn bundle(&self, id: BundleId) -> Result<Arc<Bundle>> {
        self.bundles
            .get(id)
            .ok_or(CoreError::BundleNotFound(id.value()))
    }
}

#[async_trait]
impl ModuleSource for FrameworkInner {
    fn module_graph(&self) -> Arc<dyn ModuleGraph> {
        self.module_graph.clone()
    }

    fn installed_resources(&self) -> Vec<Arc<Resource>> {
        self.bundles
            .with_state(BundleState::Installed)
            .into_iter()
            .map(|b| b.current_revision())
            .collect()
    }

    async fn ensure_resolved(&self, resource: &Arc<Resource>) -> bool {
        let Some(bundle) = resource.bundle_id().and_then(|id| self.bundles.get(id)) else {
            return false;
        };
        match self.resolver.resolve_bundle(&bundle).await {
            Ok(()) => resource.is_resolved(),
            Err(e) => {
                debug!(bundle_id = %bundle.id(), error = %e, "按需解析失败");
                false
            }
        }
    }
}

/// 框架
///
/// 克隆得到的是同一个框架实例的句柄。
///
/// # 生命周期
///
/// 1. `new()` / `builder().build()` - 创建组件并安装系统 bundle
/// 2. `start()` - 开始投递事件，启动满足启动级别的自动启动 bundle
/// 3. `shutdown()` - 按 ID 逆序停止 bundle，清空监听器
#[derive(Clone)]
pub struct Framework {
    inner: Arc<FrameworkInner>,
}

impl Framework {
    /// 以默认组件创建框架
    pub async fn new(config: FrameworkConfig) -> Result<Self> {
        FrameworkBuilder::new(config).build().await
    }

    /// 创建构建器
    pub fn builder(config: FrameworkConfig) -> FrameworkBuilder {
        FrameworkBuilder::new(config)
    }

    /// 启动框架
    ///
    /// # 错误
    ///
    /// 框架已启动或已停止时返回 `CoreError::IllegalState`
    #[instrument(skip(self), fields(uuid = %self.inner.uuid))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if !state.can_start() {
                return Err(CoreError::IllegalState {
                    bundle: SYSTEM_BUNDLE_SYMBOLIC_NAME.to_string(),
                    state: format!("{:?}", *state),
                });
            }
            *state = FrameworkState::Starting;
        }

        self.inner.events.activate();
        let level = self.inner.start_level.start_level();
        self.start_eligible_bundles(level).await;

        *self.inner.state.write() = FrameworkState::Active;
        self.inner
            .events
            .fire_framework_event(BundleId::SYSTEM, FrameworkEventType::Started, None);
        info!(start_level = level, "bundle 运行时已启动");
        Ok(())
    }

    /// 关闭框架
    ///
    /// 按 ID 逆序临时停止所有活动 bundle（保留持久自动启动标记），触发框架 STOPPED
    /// 事件后停止接受事件。
    #[instrument(skip(self), fields(uuid = %self.inner.uuid))]
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if !state.can_shutdown() {
                warn!(state = ?*state, "框架不在可关闭状态");
                return Ok(());
            }
            *state = FrameworkState::Stopping;
        }
        info!("开始关闭 bundle 运行时");

        for bundle in self.inner.bundles.all().into_iter().rev() {
            if bundle.id().is_system() || bundle.state() != BundleState::Active {
                continue;
            }
            if let Err(e) = self.inner.lifecycle.stop(&bundle, StopOptions::TRANSIENT).await {
                warn!(bundle_id = %bundle.id(), error = %e, "关闭时停止 bundle 失败");
            }
        }

        self.inner
            .events
            .fire_framework_event(BundleId::SYSTEM, FrameworkEventType::Stopped, None);
        self.inner.events.shutdown();
        *self.inner.state.write() = FrameworkState::Stopped;
        info!("bundle 运行时已关闭");
        Ok(())
    }

    // ==================== 访问器 ====================

    /// 实例 UUID
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// 框架状态
    pub fn state(&self) -> FrameworkState {
        *self.inner.state.read()
    }

    /// 配置
    pub fn config(&self) -> &FrameworkConfig {
        &self.inner.config
    }

    /// 事件子系统
    pub fn events(&self) -> &FrameworkEvents {
        &self.inner.events
    }

    /// 解析器
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.inner.resolver
    }

    /// 连线环境
    pub fn environment(&self) -> &Arc<Environment> {
        &self.inner.environment
    }

    /// 模块图
    pub fn module_graph(&self) -> &Arc<dyn ModuleGraph> {
        &self.inner.module_graph
    }

    /// 锁管理器
    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.locks
    }

    /// 启动级别服务
    pub fn start_level_support(&self) -> &Arc<dyn StartLevelSupport> {
        &self.inner.start_level
    }

    // ==================== 安装 ====================

    /// 安装 bundle
    ///
    /// 相同安装位置已存在 bundle 时直接返回已有 bundle。新 bundle 处于 INSTALLED
    /// 状态，随后触发 INSTALLED 事件。
    ///
    /// # 错误
    ///
    /// - 框架正在关闭时返回 `CoreError::FrameworkInactive`
    /// - 资源已属于其他 bundle 时返回 `CoreError::IllegalState`
    #[instrument(skip(self, deployment), fields(location = %deployment.location()))]
    pub async fn install_bundle(&self, deployment: Deployment) -> Result<Arc<Bundle>> {
        self.inner.ensure_accepting()?;

        let bundle = with_owner(async {
            let _lock = self
                .inner
                .locks
                .lock_items(LockMethod::Resolve, &[self.inner.wiring_lock.as_ref()])
                .await?;

            if let Some(existing) = self.inner.bundles.by_location(deployment.location()) {
                debug!(bundle_id = %existing.id(), "安装位置已存在，返回已有 bundle");
                return Ok(None);
            }
            let resource = deployment.resource().clone();
            if let Some(owner) = resource.bundle_id() {
                return Err(CoreError::IllegalState {
                    bundle: resource.canonical_name(),
                    state: format!("已属于 bundle {}", owner),
                });
            }

            let bundle = Arc::new(Bundle::new(
                self.inner.bundles.next_id(),
                deployment.location(),
                resource.clone(),
            ));
            if let Some(level) = deployment.start_level() {
                self.inner
                    .start_level
                    .set_bundle_start_level(bundle.id(), level);
            }
            if deployment.is_auto_start() {
                self.inner
                    .start_level
                    .set_bundle_persistently_started(bundle.id(), true);
            }
            self.inner.environment.install_resources(&[resource]);
            self.inner.bundles.insert(bundle.clone());
            Ok::<_, CoreError>(Some(bundle))
        })
        .await?;

        let Some(bundle) = bundle else {
            return self
                .inner
                .bundles
                .by_location(deployment.location())
                .ok_or(CoreError::Internal("安装位置索引不一致".to_string()));
        };

        info!(bundle_id = %bundle.id(), symbolic_name = %bundle.symbolic_name(), version = %bundle.version(), "bundle 已安装");
        self.inner
            .events
            .fire_bundle_event(&bundle, BundleEventType::Installed);
        Ok(bundle)
    }

    // ==================== 解析 ====================

    /// 解析 bundle
    ///
    /// `bundles` 为 `None` 时尝试解析所有处于 INSTALLED 状态的 bundle。无法解析的
    /// bundle 保持 INSTALLED。
    ///
    /// # 返回
    ///
    /// 全部目标 bundle 都已解析时返回 `true`
    pub async fn resolve_bundles(&self, bundles: Option<&[Arc<Bundle>]>) -> Result<bool> {
        self.inner.ensure_accepting()?;
        let targets: Vec<Arc<Bundle>> = match bundles {
            Some(list) => list.to_vec(),
            None => self.inner.bundles.with_state(BundleState::Installed),
        };
        let optional: Vec<Arc<Resource>> = targets
            .iter()
            .filter(|b| b.state() == BundleState::Installed)
            .map(|b| b.current_revision())
            .collect();

        if !optional.is_empty() {
            let context = self
                .inner
                .resolver
                .create_resolve_context(Vec::new(), optional);
            self.inner.resolver.resolve_and_apply(&context).await?;
        }

        Ok(targets.iter().all(|b| b.state().is_resolved()))
    }

    /// 解析单个 bundle
    ///
    /// # 错误
    ///
    /// 无法解析时返回解析错误
    pub async fn resolve_bundle(&self, id: BundleId) -> Result<()> {
        self.inner.ensure_accepting()?;
        let bundle = self.inner.bundle(id)?;
        self.inner.resolver.resolve_bundle(&bundle).await
    }

    // ==================== 生命周期 ====================

    /// 启动 bundle
    pub async fn start_bundle(&self, id: BundleId, options: StartOptions) -> Result<()> {
        self.inner.ensure_accepting()?;
        let bundle = self.inner.bundle(id)?;
        self.inner.lifecycle.start(&bundle, options).await
    }

    /// 停止 bundle
    pub async fn stop_bundle(&self, id: BundleId, options: StopOptions) -> Result<()> {
        let bundle = self.inner.bundle(id)?;
        self.inner.lifecycle.stop(&bundle, options).await
    }

    /// 卸载 bundle
    pub async fn uninstall_bundle(&self, id: BundleId) -> Result<()> {
        let bundle = self.inner.bundle(id)?;
        self.inner.lifecycle.uninstall(&bundle).await
    }

    /// 更新 bundle（不支持）
    pub async fn update_bundle(&self, id: BundleId) -> Result<()> {
        let bundle = self.inner.bundle(id)?;
        self.inner.lifecycle.update(&bundle).await
    }

    /// 从输入更新 bundle（不支持）
    pub async fn update_bundle_from(&self, id: BundleId, input: &[u8]) -> Result<()> {
        let bundle = self.inner.bundle(id)?;
        self.inner.lifecycle.update_from(&bundle, input).await
    }

    // ==================== 查询 ====================

    /// 按 ID 查询 bundle
    pub fn bundle(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.inner.bundles.get(id)
    }

    /// 系统 bundle
    pub fn system_bundle(&self) -> Option<Arc<Bundle>> {
        self.inner.bundles.get(BundleId::SYSTEM)
    }

    /// 按安装位置查询 bundle
    pub fn bundle_by_location(&self, location: &str) -> Option<Arc<Bundle>> {
        self.inner.bundles.by_location(location)
    }

    /// 全部 bundle（ID 升序）
    pub fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.inner.bundles.all()
    }

    /// 处于指定状态的 bundle
    pub fn bundles_in_state(&self, state: BundleState) -> Vec<Arc<Bundle>> {
        self.inner.bundles.with_state(state)
    }

    // ==================== 动态加载 ====================

    /// 获取 bundle 的回退加载器
    ///
    /// # 错误
    ///
    /// - bundle 不存在返回 `CoreError::BundleNotFound`
    /// - bundle 未解析或为片段时返回 `CoreError::IllegalState`
    /// - 模块图中没有对应模块时返回 `CoreError::ModuleNotFound`
    pub async fn fallback_loader(&self, id: BundleId) -> Result<FallbackLoader> {
        let bundle = self.inner.bundle(id)?;
        let resource = bundle.current_revision();
        if resource.is_fragment() || !bundle.state().is_resolved() {
            return Err(CoreError::IllegalState {
                bundle: bundle.canonical_name(),
                state: bundle.state().to_string(),
            });
        }

        let identifier = self.inner.module_graph.identifier_for(&resource);
        let module = self
            .inner
            .module_graph
            .lookup(&identifier)
            .await
            .ok_or_else(|| CoreError::ModuleNotFound(identifier.to_string()))?;

        let inner: Arc<dyn ModuleSource> = self.inner.clone();
        Ok(FallbackLoader::new(&module, Arc::downgrade(&inner)))
    }

    // ==================== 启动级别 ====================

    /// 框架启动级别
    pub fn start_level(&self) -> u32 {
        self.inner.start_level.start_level()
    }

    /// 设置 bundle 启动级别
    pub fn set_bundle_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        let bundle = self.inner.bundle(id)?;
        if bundle.id().is_system() {
            return Err(CoreError::Unsupported("修改系统 bundle 的启动级别".to_string()));
        }
        self.inner.start_level.set_bundle_start_level(id, level);
        Ok(())
    }

    /// 修改框架启动级别
    ///
    /// 提升时启动新满足条件的持久自动启动 bundle（ID 升序），降低时停止启动级别
    /// 高于新级别的活动 bundle（ID 降序），完成后触发 STARTLEVEL_CHANGED。
    /// 单个 bundle 的失败以框架 ERROR 事件报告，不中断整个过程。
    #[instrument(skip(self))]
    pub async fn set_start_level(&self, level: u32) -> Result<()> {
        self.inner.ensure_accepting()?;
        let start_level = &self.inner.start_level;
        let current = start_level.start_level();
        start_level.set_changing_start_level(true);

        if level >= current {
            start_level.set_start_level(level);
            self.start_eligible_bundles(level).await;
        } else {
            for bundle in self.inner.bundles.all().into_iter().rev() {
                if bundle.id().is_system()
                    || bundle.state() != BundleState::Active
                    || start_level.bundle_start_level(bundle.id()) <= level
                {
                    continue;
                }
                if let Err(e) = self.inner.lifecycle.stop(&bundle, StopOptions::TRANSIENT).await {
                    self.report_error(bundle.id(), e);
                }
            }
            start_level.set_start_level(level);
        }

        start_level.set_changing_start_level(false);
        info!(from = current, to = level, "框架启动级别已变更");
        self.inner.events.fire_framework_event(
            BundleId::SYSTEM,
            FrameworkEventType::StartLevelChanged,
            None,
        );
        Ok(())
    }

    async fn start_eligible_bundles(&self, level: u32) {
        let start_level = &self.inner.start_level;
        for bundle in self.inner.bundles.all() {
            if bundle.id().is_system()
                || bundle.is_fragment()
                || bundle.state() == BundleState::Active
                || !start_level.is_persistently_started(bundle.id())
                || start_level.bundle_start_level(bundle.id()) > level
            {
                continue;
            }
            if let Err(e) = self.inner.lifecycle.start(&bundle, StartOptions::TRANSIENT).await {
                self.report_error(bundle.id(), e);
            }
        }
    }

    fn report_error(&self, bundle: BundleId, error: CoreError) {
        warn!(bundle_id = %bundle, error = %error, error_code = error.error_code(), "bundle 操作失败");
        self.inner.events.fire_framework_event(
            bundle,
            FrameworkEventType::Error,
            Some(anyhow::Error::new(error)),
        );
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("uuid", &self.inner.uuid)
            .field("state", &self.state())
            .field("bundles", &self.inner.bundles.len())
            .finish()
    }
}
