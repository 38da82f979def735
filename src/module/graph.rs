//! 模块图
//!
//! 已解析的非片段资源在模块图中注册为模块。模块图本身在运行时之外实现，
//! 这里定义其接口以及一个内存实现 [`InMemoryModuleGraph`]。

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::resource::{namespace, Resource, Wire};
use crate::utils::{CoreError, Result};

/// 模块标识：`<前缀>.<符号名>:<版本>[-rev<n>]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdentifier {
    name: String,
    slot: String,
}

impl ModuleIdentifier {
    /// 为资源生成标识
    pub fn for_resource(prefix: &str, resource: &Resource) -> Self {
        let slot = if resource.revision() > 0 {
            format!("{}-rev{}", resource.version(), resource.revision())
        } else {
            resource.version().to_string()
        };
        Self {
            name: format!("{}.{}", prefix, resource.symbolic_name()),
            slot,
        }
    }

    /// 名称部分
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 槽位（版本）部分
    pub fn slot(&self) -> &str {
        &self.slot
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.slot)
    }
}

/// 从模块中读取到的条目
#[derive(Debug, Clone)]
pub struct LoadedEntry {
    /// 来源模块
    pub module: ModuleIdentifier,
    /// 条目路径
    pub path: String,
    /// 内容
    pub data: Arc<[u8]>,
}

/// 包名转路径：`a.b.c` -> `a/b/c`
pub fn package_path(package: &str) -> String {
    package.replace('.', "/")
}

/// 路径所在目录，没有目录时为空字符串
pub fn parent_path(path: &str) -> &str {
    path.rfind('/').map_or("", |at| &path[..at])
}

/// 模块
pub struct Module {
    identifier: ModuleIdentifier,
    resource: Arc<Resource>,
    wires: Vec<Wire>,
    exported_paths: BTreeSet<String>,
    imported_paths: BTreeSet<String>,
    loadable: AtomicBool,
}

impl Module {
    /// 根据资源与其连线创建模块
    ///
    /// 导出路径包含宿主与已附着片段导出的包；导入路径来自包命名空间的连线。
    pub fn new(identifier: ModuleIdentifier, resource: Arc<Resource>, wires: Vec<Wire>) -> Self {
        let mut exported_paths: BTreeSet<String> = resource
            .exported_packages()
            .iter()
            .map(|p| package_path(p))
            .collect();
        for fragment in resource.fragments() {
            exported_paths.extend(fragment.exported_packages().iter().map(|p| package_path(p)));
        }

        let imported_paths = wires
            .iter()
            .filter(|w| w.namespace() == namespace::PACKAGE)
            .filter_map(|w| w.capability().name().map(package_path))
            .collect();

        Self {
            identifier,
            resource,
            wires,
            exported_paths,
            imported_paths,
            loadable: AtomicBool::new(false),
        }
    }

    /// 模块标识
    pub fn identifier(&self) -> &ModuleIdentifier {
        &self.identifier
    }

    /// 对应资源
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// 创建模块时的连线
    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    /// 导出的路径
    pub fn exported_paths(&self) -> &BTreeSet<String> {
        &self.exported_paths
    }

    /// 静态导入的路径
    pub fn imported_paths(&self) -> &BTreeSet<String> {
        &self.imported_paths
    }

    /// 是否已可加载
    pub fn is_loadable(&self) -> bool {
        self.loadable.load(Ordering::Acquire)
    }

    fn mark_loadable(&self) {
        self.loadable.store(true, Ordering::Release);
    }

    /// 读取本模块（含已附着片段）中的条目，不检查导出
    pub fn entry(&self, path: &str) -> Option<LoadedEntry> {
        let data = self.resource.content().entry(path).or_else(|| {
            self.resource
                .fragments()
                .iter()
                .find_map(|f| f.content().entry(path))
        })?;
        Some(LoadedEntry {
            module: self.identifier.clone(),
            path: path.to_string(),
            data,
        })
    }

    /// 读取导出包中的条目
    pub fn exported_resource(&self, path: &str) -> Option<LoadedEntry> {
        if !self.exported_paths.contains(parent_path(path)) {
            return None;
        }
        self.entry(path)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("identifier", &self.identifier)
            .field("exported_paths", &self.exported_paths)
            .field("imported_paths", &self.imported_paths)
            .finish()
    }
}

/// 模块图接口
#[async_trait]
pub trait ModuleGraph: Send + Sync {
    /// 计算资源对应的模块标识
    fn identifier_for(&self, resource: &Resource) -> ModuleIdentifier;

    /// 注册模块
    async fn register(&self, resource: &Arc<Resource>, wires: &[Wire]) -> Result<ModuleIdentifier>;

    /// 创建可加载的模块产物
    async fn create_artifact(&self, identifier: &ModuleIdentifier) -> Result<()>;

    /// 查询模块
    async fn lookup(&self, identifier: &ModuleIdentifier) -> Option<Arc<Module>>;

    /// 从模块的导出包中读取条目
    ///
    /// 模块不存在时返回错误，模块未导出该路径或尚不可加载时返回 `None`。
    async fn load_resource(
        &self,
        identifier: &ModuleIdentifier,
        path: &str,
    ) -> Result<Option<LoadedEntry>> {
        let module = self
            .lookup(identifier)
            .await
            .ok_or_else(|| CoreError::ModuleNotFound(identifier.to_string()))?;
        if !module.is_loadable() {
            return Ok(None);
        }
        Ok(module.exported_resource(path))
    }

    /// 移除资源对应的模块
    async fn remove(&self, resource: &Resource) -> Option<Arc<Module>>;

    /// 已注册的模块标识（注册顺序）
    async fn identifiers(&self) -> Vec<ModuleIdentifier>;
}

/// 内存模块图
pub struct InMemoryModuleGraph {
    prefix: String,
    /// 模块：identifier -> Module
    modules: Arc<RwLock<HashMap<ModuleIdentifier, Arc<Module>>>>,
    /// 注册顺序
    order: Arc<RwLock<Vec<ModuleIdentifier>>>,
}

impl InMemoryModuleGraph {
    /// 创建模块图
    ///
    /// # 参数
    ///
    /// * `prefix` - 模块标识名前缀
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        info!(prefix = %prefix, "创建模块图");
        Self {
            prefix,
            modules: Arc::new(RwLock::new(HashMap::new())),
            order: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ModuleGraph for InMemoryModuleGraph {
    fn identifier_for(&self, resource: &Resource) -> ModuleIdentifier {
        ModuleIdentifier::for_resource(&self.prefix, resource)
    }

    async fn register(&self, resource: &Arc<Resource>, wires: &[Wire]) -> Result<ModuleIdentifier> {
        let identifier = self.identifier_for(resource);
        let module = Arc::new(Module::new(identifier.clone(), resource.clone(), wires.to_vec()));

        let mut modules = self.modules.write().await;
        if modules.insert(identifier.clone(), module).is_none() {
            self.order.write().await.push(identifier.clone());
        }
        debug!(module = %identifier, "注册模块");
        Ok(identifier)
    }

    async fn create_artifact(&self, identifier: &ModuleIdentifier) -> Result<()> {
        let modules = self.modules.read().await;
        let module = modules
            .get(identifier)
            .ok_or_else(|| CoreError::ModuleNotFound(identifier.to_string()))?;
        module.mark_loadable();
        debug!(module = %identifier, "模块产物已创建");
        Ok(())
    }

    async fn lookup(&self, identifier: &ModuleIdentifier) -> Option<Arc<Module>> {
        self.modules.read().await.get(identifier).cloned()
    }

    async fn remove(&self, resource: &Resource) -> Option<Arc<Module>> {
        let identifier = self.identifier_for(resource);
        let removed = self.modules.write().await.remove(&identifier);
        if removed.is_some() {
            self.order.write().await.retain(|id| id != &identifier);
            debug!(module = %identifier, "移除模块");
        }
        removed
    }

    async fn identifiers(&self) -> Vec<ModuleIdentifier> {
        self.order.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryContent;
    use semver::Version;

    #[test]
    fn test_identifier_format() {
        let r0 = Resource::builder("com.acme.a", Version::new(1, 2, 0)).build().unwrap();
        let r2 = Resource::builder("com.acme.a", Version::new(1, 2, 0))
            .revision(2)
            .build()
            .unwrap();
        assert_eq!(
            ModuleIdentifier::for_resource("chips", &r0).to_string(),
            "chips.com.acme.a:1.2.0"
        );
        assert_eq!(ModuleIdentifier::for_resource("chips", &r2).slot(), "1.2.0-rev2");
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(package_path("a.b.c"), "a/b/c");
        assert_eq!(parent_path("a/b/C.class"), "a/b");
        assert_eq!(parent_path("top.txt"), "");
    }

    #[tokio::test]
    async fn test_register_and_load() {
        let graph = InMemoryModuleGraph::new("chips");
        let content = MemoryContent::new()
            .with_entry("com/acme/api/Thing.class", b"thing".to_vec())
            .with_entry("com/acme/impl/Hidden.class", b"hidden".to_vec());
        let resource = Resource::builder("com.acme.a", Version::new(1, 0, 0))
            .export_package("com.acme.api")
            .content(Arc::new(content))
            .build()
            .unwrap();

        let id = graph.register(&resource, &[]).await.unwrap();
        // 产物创建前不可加载
        assert!(graph.load_resource(&id, "com/acme/api/Thing.class").await.unwrap().is_none());

        graph.create_artifact(&id).await.unwrap();
        let entry = graph
            .load_resource(&id, "com/acme/api/Thing.class")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*entry.data, b"thing");
        assert!(graph
            .load_resource(&id, "com/acme/impl/Hidden.class")
            .await
            .unwrap()
            .is_none());

        assert_eq!(graph.identifiers().await, vec![id.clone()]);
        assert!(graph.remove(&resource).await.is_some());
        assert!(graph.load_resource(&id, "x").await.is_err());
    }
}
