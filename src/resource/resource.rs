//! 资源（bundle 修订版）
//!
//! 资源在安装时创建，除框架附着信息（所属 bundle、连线快照、片段/宿主、
//! 已选本地库）外不可变。更新 bundle 会产生新的资源。

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use semver::Version;

use super::attributes::{AttrValue, Attributes, Directives};
use super::capability::{Capability, Requirement, Resolution};
use super::content::{BundleContent, MemoryContent};
use super::filter::Filter;
use super::namespace;
use super::wiring::Wiring;
use crate::bundle::BundleId;
use crate::resolver::native::{NativeLibrary, NativeLibraryMetaData};
use crate::utils::{IdSequence, Result};

static RESOURCE_IDS: IdSequence = IdSequence::starting_at(1);

/// 资源 ID，进程内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        ResourceId(RESOURCE_IDS.next())
    }

    /// 数值
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// 资源
pub struct Resource {
    id: ResourceId,
    symbolic_name: String,
    version: Version,
    revision: u32,
    singleton: bool,
    capabilities: Vec<Capability>,
    requirements: Vec<Requirement>,
    activator: Option<String>,
    native_code: Option<NativeLibraryMetaData>,
    content: Arc<dyn BundleContent>,

    bundle: OnceLock<BundleId>,
    wiring: RwLock<Option<Arc<Wiring>>>,
    hosts: RwLock<Vec<ResourceId>>,
    fragments: RwLock<Vec<Arc<Resource>>>,
    native_libraries: RwLock<Vec<NativeLibrary>>,
}

impl Resource {
    /// 创建资源构建器
    pub fn builder(symbolic_name: impl Into<String>, version: Version) -> ResourceBuilder {
        ResourceBuilder::new(symbolic_name, version)
    }

    /// 资源 ID
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// 符号名
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// 版本
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// 修订序号
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// 是否为单例
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// 是否为片段
    pub fn is_fragment(&self) -> bool {
        self.host_requirement().is_some()
    }

    /// `name:version` 形式的规范名
    pub fn canonical_name(&self) -> String {
        format!("{}:{}", self.symbolic_name, self.version)
    }

    /// 全部能力，或指定命名空间下的能力
    pub fn capabilities(&self, ns: Option<&str>) -> Vec<&Capability> {
        self.capabilities
            .iter()
            .filter(|c| ns.map_or(true, |ns| c.namespace() == ns))
            .collect()
    }

    /// 全部需求，或指定命名空间下的需求
    pub fn requirements(&self, ns: Option<&str>) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|r| ns.map_or(true, |ns| r.namespace() == ns))
            .collect()
    }

    /// 片段的宿主需求
    pub fn host_requirement(&self) -> Option<&Requirement> {
        self.requirements
            .iter()
            .find(|r| r.namespace() == namespace::HOST)
    }

    /// 宿主能力
    pub fn host_capability(&self) -> Option<&Capability> {
        self.capabilities
            .iter()
            .find(|c| c.namespace() == namespace::HOST)
    }

    /// 导出的包名
    pub fn exported_packages(&self) -> Vec<String> {
        self.capabilities(Some(namespace::PACKAGE))
            .into_iter()
            .filter_map(|c| c.name().map(str::to_string))
            .collect()
    }

    /// 动态导入需求
    pub fn dynamic_imports(&self) -> Vec<&Requirement> {
        self.requirements
            .iter()
            .filter(|r| r.is_dynamic())
            .collect()
    }

    /// 是否带有可选的包导入
    pub fn has_optional_package_requirement(&self) -> bool {
        self.requirements.iter().any(Requirement::is_optional_package)
    }

    /// 激活器名称
    pub fn activator(&self) -> Option<&str> {
        self.activator.as_deref()
    }

    /// 本地库元数据
    pub fn native_code(&self) -> Option<&NativeLibraryMetaData> {
        self.native_code.as_ref()
    }

    /// 资源内容
    pub fn content(&self) -> &Arc<dyn BundleContent> {
        &self.content
    }

    // ==================== 框架附着信息 ====================

    /// 所属 bundle
    pub fn bundle_id(&self) -> Option<BundleId> {
        self.bundle.get().copied()
    }

    pub(crate) fn attach_bundle(&self, bundle: BundleId) {
        let _ = self.bundle.set(bundle);
    }

    /// 当前连线快照
    pub fn wiring(&self) -> Option<Arc<Wiring>> {
        self.wiring.read().clone()
    }

    pub(crate) fn set_wiring(&self, wiring: Option<Arc<Wiring>>) {
        *self.wiring.write() = wiring;
    }

    /// 是否已解析
    pub fn is_resolved(&self) -> bool {
        self.wiring.read().is_some()
    }

    /// 片段已附着的宿主
    pub fn hosts(&self) -> Vec<ResourceId> {
        self.hosts.read().clone()
    }

    /// 宿主上附着的片段
    pub fn fragments(&self) -> Vec<Arc<Resource>> {
        self.fragments.read().clone()
    }

    pub(crate) fn attach_to_host(self: &Arc<Self>, host: &Arc<Resource>) {
        {
            let mut hosts = self.hosts.write();
            if hosts.contains(&host.id) {
                return;
            }
            hosts.push(host.id);
        }
        host.fragments.write().push(self.clone());
    }

    /// 已选中的本地库
    pub fn native_libraries(&self) -> Vec<NativeLibrary> {
        self.native_libraries.read().clone()
    }

    pub(crate) fn set_native_libraries(&self, libraries: Vec<NativeLibrary>) {
        *self.native_libraries.write() = libraries;
    }

    /// 断开附着信息（卸载时调用）
    ///
    /// 同时从对端移除：片段离开宿主的片段列表，宿主离开片段的宿主列表。
    pub(crate) fn detach(&self, host_lookup: impl Fn(ResourceId) -> Option<Arc<Resource>>) {
        self.wiring.write().take();
        for fragment in self.fragments.write().drain(..) {
            fragment.hosts.write().retain(|id| *id != self.id);
        }
        for host in self.hosts.write().drain(..) {
            if let Some(host) = host_lookup(host) {
                host.fragments.write().retain(|f| f.id != self.id);
            }
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("symbolic_name", &self.symbolic_name)
            .field("version", &self.version)
            .field("revision", &self.revision)
            .finish()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

// ==================== 构建器 ====================

struct PendingRequirement {
    namespace: String,
    attributes: Attributes,
    directives: Directives,
    filter: Option<String>,
    resolution: Resolution,
}

/// 资源构建器
///
/// 自动补充身份能力，非片段资源还会补充 bundle 与宿主能力。
///
/// # 示例
///
/// ```
/// use chips_bundles::resource::Resource;
/// use semver::Version;
///
/// let resource = Resource::builder("com.acme.b", Version::new(1, 0, 0))
///     .import_package("com.acme.api")
///     .dynamic_import("com.acme.plugins.*")
///     .build()
///     .unwrap();
/// assert!(!resource.is_fragment());
/// ```
pub struct ResourceBuilder {
    symbolic_name: String,
    version: Version,
    revision: u32,
    singleton: bool,
    capabilities: Vec<(String, Attributes, Directives)>,
    requirements: Vec<PendingRequirement>,
    activator: Option<String>,
    native_code: Option<NativeLibraryMetaData>,
    content: Option<Arc<dyn BundleContent>>,
}

impl ResourceBuilder {
    /// 创建构建器
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version,
            revision: 0,
            singleton: false,
            capabilities: Vec::new(),
            requirements: Vec::new(),
            activator: None,
            native_code: None,
            content: None,
        }
    }

    /// 设置修订序号
    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    /// 标记为单例
    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// 导出包（版本 0.0.0）
    pub fn export_package(self, package: impl Into<String>) -> Self {
        self.export_package_version(package, Version::new(0, 0, 0))
    }

    /// 导出指定版本的包
    pub fn export_package_version(mut self, package: impl Into<String>, version: Version) -> Self {
        let mut attrs = Attributes::new();
        attrs.insert(namespace::PACKAGE.to_string(), AttrValue::String(package.into()));
        attrs.insert(namespace::VERSION_ATTRIBUTE.to_string(), AttrValue::Version(version));
        attrs.insert(
            namespace::BUNDLE_SYMBOLIC_NAME_ATTRIBUTE.to_string(),
            AttrValue::String(self.symbolic_name.clone()),
        );
        attrs.insert(
            namespace::BUNDLE_VERSION_ATTRIBUTE.to_string(),
            AttrValue::Version(self.version.clone()),
        );
        self.capabilities
            .push((namespace::PACKAGE.to_string(), attrs, Directives::new()));
        self
    }

    /// 导入包
    pub fn import_package(self, package: impl Into<String>) -> Self {
        self.package_requirement(package.into(), None, Resolution::Mandatory)
    }

    /// 导入包并附加额外过滤条件，例如 `(version>=1.0)`
    pub fn import_package_filtered(
        self,
        package: impl Into<String>,
        extra: impl Into<String>,
    ) -> Self {
        self.package_requirement(package.into(), Some(extra.into()), Resolution::Mandatory)
    }

    /// 可选导入包
    pub fn optional_import_package(self, package: impl Into<String>) -> Self {
        self.package_requirement(package.into(), None, Resolution::Optional)
    }

    fn package_requirement(
        mut self,
        package: String,
        extra: Option<String>,
        resolution: Resolution,
    ) -> Self {
        let base = format!("({}={})", namespace::PACKAGE, package);
        let filter = match extra {
            Some(extra) => format!("(&{}{})", base, extra),
            None => base,
        };
        let mut attrs = Attributes::new();
        attrs.insert(namespace::PACKAGE.to_string(), AttrValue::String(package));
        self.requirements.push(PendingRequirement {
            namespace: namespace::PACKAGE.to_string(),
            attributes: attrs,
            directives: Directives::new(),
            filter: Some(filter),
            resolution,
        });
        self
    }

    /// 动态导入包模式（`*`、`a.b.*` 或精确包名）
    pub fn dynamic_import(self, pattern: impl Into<String>) -> Self {
        self.dynamic_import_from(pattern, None::<String>)
    }

    /// 动态导入包模式，并限定提供者的符号名
    pub fn dynamic_import_from(
        mut self,
        pattern: impl Into<String>,
        symbolic_name: Option<impl Into<String>>,
    ) -> Self {
        let mut attrs = Attributes::new();
        attrs.insert(namespace::PACKAGE.to_string(), AttrValue::String(pattern.into()));
        if let Some(name) = symbolic_name {
            attrs.insert(
                namespace::BUNDLE_SYMBOLIC_NAME_ATTRIBUTE.to_string(),
                AttrValue::String(name.into()),
            );
        }
        self.requirements.push(PendingRequirement {
            namespace: namespace::PACKAGE.to_string(),
            attributes: attrs,
            directives: Directives::new(),
            filter: None,
            resolution: Resolution::Dynamic,
        });
        self
    }

    /// 依赖其他 bundle
    pub fn require_bundle(mut self, symbolic_name: impl Into<String>) -> Self {
        let name = symbolic_name.into();
        self.requirements.push(PendingRequirement {
            namespace: namespace::BUNDLE.to_string(),
            attributes: Attributes::new(),
            directives: Directives::new(),
            filter: Some(format!("({}={})", namespace::BUNDLE, name)),
            resolution: Resolution::Mandatory,
        });
        self
    }

    /// 声明为片段并指定宿主符号名
    pub fn fragment_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.requirements.push(PendingRequirement {
            namespace: namespace::HOST.to_string(),
            attributes: Attributes::new(),
            directives: Directives::new(),
            filter: Some(format!("({}={})", namespace::HOST, host)),
            resolution: Resolution::Mandatory,
        });
        self
    }

    /// 添加任意能力
    pub fn capability(mut self, ns: impl Into<String>, attributes: Attributes) -> Self {
        self.capabilities
            .push((ns.into(), attributes, Directives::new()));
        self
    }

    /// 添加任意需求
    pub fn requirement(
        mut self,
        ns: impl Into<String>,
        filter: Option<&str>,
        resolution: Resolution,
    ) -> Self {
        self.requirements.push(PendingRequirement {
            namespace: ns.into(),
            attributes: Attributes::new(),
            directives: Directives::new(),
            filter: filter.map(str::to_string),
            resolution,
        });
        self
    }

    /// 设置激活器名称
    pub fn activator(mut self, class_name: impl Into<String>) -> Self {
        self.activator = Some(class_name.into());
        self
    }

    /// 设置本地库元数据
    pub fn native_code(mut self, metadata: NativeLibraryMetaData) -> Self {
        self.native_code = Some(metadata);
        self
    }

    /// 设置资源内容
    pub fn content(mut self, content: Arc<dyn BundleContent>) -> Self {
        self.content = Some(content);
        self
    }

    /// 构建资源
    ///
    /// # 错误
    ///
    /// 需求过滤器语法错误时返回 `CoreError::InvalidFilter`
    pub fn build(self) -> Result<Arc<Resource>> {
        let id = ResourceId::next();
        let is_fragment = self
            .requirements
            .iter()
            .any(|r| r.namespace == namespace::HOST);

        let mut requirements = Vec::with_capacity(self.requirements.len());
        for pending in self.requirements {
            let filter = pending.filter.as_deref().map(Filter::parse).transpose()?;
            requirements.push(Requirement::new(
                pending.namespace,
                pending.attributes,
                pending.directives,
                filter,
                pending.resolution,
                id,
            ));
        }

        let mut capabilities = Vec::new();
        let mut identity = Attributes::new();
        identity.insert(
            namespace::IDENTITY.to_string(),
            AttrValue::String(self.symbolic_name.clone()),
        );
        identity.insert(
            namespace::VERSION_ATTRIBUTE.to_string(),
            AttrValue::Version(self.version.clone()),
        );
        identity.insert(
            namespace::TYPE_ATTRIBUTE.to_string(),
            AttrValue::from(if is_fragment {
                namespace::TYPE_FRAGMENT
            } else {
                namespace::TYPE_BUNDLE
            }),
        );
        let mut identity_directives = Directives::new();
        if self.singleton {
            identity_directives.insert(namespace::SINGLETON_DIRECTIVE.to_string(), "true".to_string());
        }
        capabilities.push(Capability::new(namespace::IDENTITY, identity, identity_directives, id));

        if !is_fragment {
            for ns in [namespace::BUNDLE, namespace::HOST] {
                let mut attrs = Attributes::new();
                attrs.insert(ns.to_string(), AttrValue::String(self.symbolic_name.clone()));
                attrs.insert(
                    namespace::BUNDLE_VERSION_ATTRIBUTE.to_string(),
                    AttrValue::Version(self.version.clone()),
                );
                capabilities.push(Capability::new(ns, attrs, Directives::new(), id));
            }
        }

        capabilities.extend(
            self.capabilities
                .into_iter()
                .map(|(ns, attrs, directives)| Capability::new(ns, attrs, directives, id)),
        );

        Ok(Arc::new(Resource {
            id,
            symbolic_name: self.symbolic_name,
            version: self.version,
            revision: self.revision,
            singleton: self.singleton,
            capabilities,
            requirements,
            activator: self.activator,
            native_code: self.native_code,
            content: self
                .content
                .unwrap_or_else(|| Arc::new(MemoryContent::default())),
            bundle: OnceLock::new(),
            wiring: RwLock::new(None),
            hosts: RwLock::new(Vec::new()),
            fragments: RwLock::new(Vec::new()),
            native_libraries: RwLock::new(Vec::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_adds_identity_capabilities() {
        let resource = Resource::builder("com.acme.a", Version::new(1, 0, 0))
            .export_package("com.acme.api")
            .build()
            .unwrap();

        assert_eq!(resource.capabilities(Some(namespace::IDENTITY)).len(), 1);
        assert!(resource.host_capability().is_some());
        assert_eq!(resource.exported_packages(), vec!["com.acme.api".to_string()]);
        assert_eq!(resource.canonical_name(), "com.acme.a:1.0.0");
    }

    #[test]
    fn test_fragment_has_no_host_capability() {
        let fragment = Resource::builder("com.acme.a.nls", Version::new(1, 0, 0))
            .fragment_host("com.acme.a")
            .build()
            .unwrap();

        assert!(fragment.is_fragment());
        assert!(fragment.host_capability().is_none());
    }

    #[test]
    fn test_import_matches_export() {
        let a = Resource::builder("a", Version::new(1, 0, 0))
            .export_package_version("p", Version::new(1, 5, 0))
            .build()
            .unwrap();
        let b = Resource::builder("b", Version::new(1, 0, 0))
            .import_package_filtered("p", "(version>=1.2)")
            .build()
            .unwrap();
        let c = Resource::builder("c", Version::new(1, 0, 0))
            .import_package_filtered("p", "(version>=2.0)")
            .build()
            .unwrap();

        let export = a.capabilities(Some(namespace::PACKAGE))[0];
        assert!(b.requirements(Some(namespace::PACKAGE))[0].matches(export));
        assert!(!c.requirements(Some(namespace::PACKAGE))[0].matches(export));
    }

    #[test]
    fn test_invalid_requirement_filter() {
        let result = Resource::builder("x", Version::new(1, 0, 0))
            .requirement("custom", Some("(broken"), Resolution::Mandatory)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_dynamic_import_not_optional_package() {
        let resource = Resource::builder("x", Version::new(1, 0, 0))
            .dynamic_import("com.acme.*")
            .build()
            .unwrap();
        assert_eq!(resource.dynamic_imports().len(), 1);
        assert!(!resource.has_optional_package_requirement());
    }
}
