//! bundle 生命周期
//!
//! 启动、停止与卸载都在锁管理器提供的 bundle 锁内完成，对应的完成事件
//! （STARTED、STOPPED、UNRESOLVED、UNINSTALLED）在释放锁之后触发。
//!
//! ```text
//! INSTALLED ──resolve──▶ RESOLVED ──start──▶ STARTING ──▶ ACTIVE
//!                            ▲                   │           │
//!                            └──── 启动失败 ◀────┘         stop
//!                            ▲                               │
//!                            └────────── STOPPING ◀──────────┘
//! 任意状态 ──uninstall──▶ UNINSTALLED
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use super::activator::{BundleActivator, BundleContext};
use super::bundle::Bundle;
use super::registry::BundleRegistry;
use super::start_level::StartLevelSupport;
use super::state::{BundleState, StartOptions, StopOptions};
use crate::events::{BundleEventType, FrameworkEvents};
use crate::lock::{with_owner, FrameworkWiringLock, LockManager, LockMethod};
use crate::module::ModuleGraph;
use crate::resolver::Resolver;
use crate::utils::{CoreError, Result};

/// 生命周期依赖的组件
pub struct LifecycleComponents {
    /// 解析器
    pub resolver: Arc<Resolver>,
    /// 锁管理器
    pub locks: LockManager,
    /// 框架连线锁
    pub wiring_lock: Arc<FrameworkWiringLock>,
    /// 模块图
    pub module_graph: Arc<dyn ModuleGraph>,
    /// 启动级别
    pub start_level: Arc<dyn StartLevelSupport>,
    /// bundle 注册表
    pub bundles: Arc<BundleRegistry>,
    /// 事件子系统
    pub events: FrameworkEvents,
}

/// bundle 生命周期
pub struct BundleLifecycle {
    resolver: Arc<Resolver>,
    locks: LockManager,
    wiring_lock: Arc<FrameworkWiringLock>,
    module_graph: Arc<dyn ModuleGraph>,
    start_level: Arc<dyn StartLevelSupport>,
    bundles: Arc<BundleRegistry>,
    events: FrameworkEvents,
}

/// 停止的结果：是否发生了状态变更，以及激活器返回的错误
struct StopOutcome {
    stopped: bool,
    error: Option<CoreError>,
}

impl BundleLifecycle {
    /// 创建生命周期管理
    pub fn new(components: LifecycleComponents) -> Self {
        Self {
            resolver: components.resolver,
            locks: components.locks,
            wiring_lock: components.wiring_lock,
            module_graph: components.module_graph,
            start_level: components.start_level,
            bundles: components.bundles,
            events: components.events,
        }
    }

    // ==================== 启动 ====================

    /// 启动 bundle
    ///
    /// 处于 INSTALLED 状态的 bundle 先在 bundle 锁之外解析。已是 ACTIVE 时直接返回。
    /// 持久启动标记总是先记录。启动级别不满足时，临时启动返回错误，否则推迟启动并返回 `Ok`。
    ///
    /// # 错误
    ///
    /// - 解析失败、激活器失败或无效时返回 `CoreError::StartFailed`，状态回到 RESOLVED
    /// - 临时启动且启动级别不满足时返回 `CoreError::StartLevel`
    /// - 已卸载时返回 `CoreError::IllegalState`
    #[instrument(skip(self, bundle), fields(bundle_id = %bundle.id()))]
    pub async fn start(&self, bundle: &Arc<Bundle>, options: StartOptions) -> Result<()> {
        with_owner(async {
            ensure_installed(bundle)?;

            if bundle.state() == BundleState::Installed {
                self.resolver
                    .resolve_bundle(bundle)
                    .await
                    .map_err(|e| CoreError::StartFailed {
                        bundle: bundle.canonical_name(),
                        source: e.into(),
                    })?;
            }

            let started = {
                let _lock = self
                    .locks
                    .lock_items(LockMethod::Start, &[bundle.as_ref()])
                    .await?;
                self.start_internal(bundle, options).await?
            };

            if started {
                self.events.fire_bundle_event(bundle, BundleEventType::Started);
            }
            Ok::<_, CoreError>(())
        })
        .await
    }

    async fn start_internal(&self, bundle: &Arc<Bundle>, options: StartOptions) -> Result<bool> {
        ensure_installed(bundle)?;
        if bundle.state() == BundleState::Active {
            return Ok(false);
        }
        if bundle.is_fragment() {
            return Err(CoreError::IllegalState {
                bundle: bundle.canonical_name(),
                state: "fragment".to_string(),
            });
        }

        // 即使随后被启动级别拒绝也先记录
        self.start_level
            .set_bundle_persistently_started(bundle.id(), true);

        let bundle_level = self.start_level.bundle_start_level(bundle.id());
        let framework_level = self.start_level.start_level();
        if bundle_level > framework_level {
            if options.transient {
                return Err(CoreError::StartLevel {
                    bundle: bundle.canonical_name(),
                    bundle_level,
                    framework_level,
                });
            }
            if self.start_level.is_changing_start_level() || !self.events.is_active() {
                debug!(bundle_id = %bundle.id(), bundle_level, framework_level, "启动级别未满足，推迟启动");
            } else {
                info!(bundle_id = %bundle.id(), bundle_level, framework_level, "启动级别未满足，推迟启动");
            }
            return Ok(false);
        }

        bundle.change_state(BundleState::Starting);
        self.events.fire_bundle_event(bundle, BundleEventType::Starting);

        match self.invoke_start(bundle).await {
            Ok(()) => {
                bundle.change_state(BundleState::Active);
                info!(bundle_id = %bundle.id(), symbolic_name = %bundle.symbolic_name(), "bundle 已启动");
                Ok(true)
            }
            Err(source) => {
                bundle.change_state(BundleState::Resolved);
                warn!(bundle_id = %bundle.id(), error = %source, "bundle 启动失败");
                Err(CoreError::StartFailed {
                    bundle: bundle.canonical_name(),
                    source,
                })
            }
        }
    }

    async fn invoke_start(&self, bundle: &Arc<Bundle>) -> anyhow::Result<()> {
        let Some(activator) = self.activator_for(bundle)? else {
            return Ok(());
        };
        let context = self.context_for(bundle);
        match AssertUnwindSafe(activator.start(&context)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("激活器 start panic")),
        }
    }

    /// 取出已有激活器，或按资源元数据中的类名创建
    fn activator_for(&self, bundle: &Bundle) -> Result<Option<Arc<dyn BundleActivator>>> {
        if let Some(activator) = bundle.activator() {
            return Ok(Some(activator));
        }
        let resource = bundle.current_revision();
        let Some(class_name) = resource.activator() else {
            return Ok(None);
        };
        let activator = resource
            .content()
            .create_activator(class_name)
            .ok_or_else(|| CoreError::InvalidActivator {
                bundle: bundle.canonical_name(),
                class_name: class_name.to_string(),
            })?;
        debug!(bundle_id = %bundle.id(), class_name = %class_name, "激活器已实例化");
        bundle.set_activator(activator.clone());
        Ok(Some(activator))
    }

    fn context_for(&self, bundle: &Bundle) -> BundleContext {
        BundleContext::new(bundle.id(), bundle.symbolic_name(), self.events.clone())
    }

    // ==================== 停止 ====================

    /// 停止 bundle
    ///
    /// 不是 ACTIVE 时直接返回。无论激活器 `stop` 结果如何，状态都会变为 RESOLVED。
    ///
    /// # 错误
    ///
    /// 激活器 `stop` 失败时返回 `CoreError::StopFailed`（在状态变更之后）
    #[instrument(skip(self, bundle), fields(bundle_id = %bundle.id()))]
    pub async fn stop(&self, bundle: &Arc<Bundle>, options: StopOptions) -> Result<()> {
        with_owner(async {
            ensure_installed(bundle)?;
            let outcome = {
                let _lock = self
                    .locks
                    .lock_items(LockMethod::Stop, &[bundle.as_ref()])
                    .await?;
                self.stop_internal(bundle, options).await
            };

            if outcome.stopped {
                self.events.fire_bundle_event(bundle, BundleEventType::Stopped);
            }
            match outcome.error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
        .await
    }

    async fn stop_internal(&self, bundle: &Arc<Bundle>, options: StopOptions) -> StopOutcome {
        if bundle.state() != BundleState::Active {
            return StopOutcome {
                stopped: false,
                error: None,
            };
        }

        if !options.transient {
            self.start_level
                .set_bundle_persistently_started(bundle.id(), false);
        }

        bundle.change_state(BundleState::Stopping);
        self.events.fire_bundle_event(bundle, BundleEventType::Stopping);

        let result = match bundle.activator() {
            Some(activator) => {
                let context = self.context_for(bundle);
                match AssertUnwindSafe(activator.stop(&context)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("激活器 stop panic")),
                }
            }
            None => Ok(()),
        };

        bundle.change_state(BundleState::Resolved);
        info!(bundle_id = %bundle.id(), symbolic_name = %bundle.symbolic_name(), "bundle 已停止");

        StopOutcome {
            stopped: true,
            error: result.err().map(|source| {
                warn!(bundle_id = %bundle.id(), error = %source, "激活器 stop 失败");
                CoreError::StopFailed {
                    bundle: bundle.canonical_name(),
                    source,
                }
            }),
        }
    }

    // ==================== 卸载与更新 ====================

    /// 卸载 bundle
    ///
    /// 在一次加锁请求中先后锁定框架连线锁与 bundle 锁。活动中的 bundle 先被
    /// 临时停止；随后从连线环境与模块图中移除其资源，拆除已解析产物，状态变为
    /// UNINSTALLED。
    ///
    /// # 错误
    ///
    /// 已卸载时返回 `CoreError::IllegalState`
    #[instrument(skip(self, bundle), fields(bundle_id = %bundle.id()))]
    pub async fn uninstall(&self, bundle: &Arc<Bundle>) -> Result<()> {
        with_owner(async {
            ensure_installed(bundle)?;
            if bundle.id().is_system() {
                return Err(CoreError::Unsupported("卸载系统 bundle".to_string()));
            }

            let (stop, was_resolved) = {
                let _lock = self
                    .locks
                    .lock_items(
                        LockMethod::Uninstall,
                        &[self.wiring_lock.as_ref(), bundle.as_ref()],
                    )
                    .await?;
                ensure_installed(bundle)?;

                let stop = self.stop_internal(bundle, StopOptions::TRANSIENT).await;
                let was_resolved = bundle.state().is_resolved();

                let revisions = bundle.revisions();
                self.resolver.environment().uninstall_resources(&revisions);
                let artifacts = self.resolver.artifacts();
                for resource in revisions.iter().filter(|r| !r.is_fragment()) {
                    let retiring = artifacts.begin_removal(bundle.id());
                    self.module_graph.remove(resource).await;
                    if retiring {
                        artifacts.complete_removal(bundle.id());
                    }
                }

                bundle.change_state(BundleState::Uninstalled);
                self.start_level.forget(bundle.id());
                self.bundles.remove(bundle.id());
                (stop, was_resolved)
            };

            info!(bundle_id = %bundle.id(), location = %bundle.location(), "bundle 已卸载");
            if stop.stopped {
                self.events.fire_bundle_event(bundle, BundleEventType::Stopped);
            }
            if was_resolved {
                self.events.fire_bundle_event(bundle, BundleEventType::Unresolved);
            }
            self.events.fire_bundle_event(bundle, BundleEventType::Uninstalled);
            self.events.remove_bundle_listeners(bundle.id());
            Ok(())
        })
        .await
    }

    /// 更新 bundle（不支持）
    pub async fn update(&self, bundle: &Arc<Bundle>) -> Result<()> {
        Err(CoreError::Unsupported(format!("更新 bundle {}", bundle.canonical_name())))
    }

    /// 从输入更新 bundle（不支持）
    pub async fn update_from(&self, bundle: &Arc<Bundle>, _input: &[u8]) -> Result<()> {
        Err(CoreError::Unsupported(format!("更新 bundle {}", bundle.canonical_name())))
    }
}

fn ensure_installed(bundle: &Bundle) -> Result<()> {
    if bundle.state() == BundleState::Uninstalled {
        return Err(CoreError::IllegalState {
            bundle: bundle.canonical_name(),
            state: BundleState::Uninstalled.to_string(),
        });
    }
    Ok(())
}
