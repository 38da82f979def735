//! 能力/需求命名空间与常用属性名

/// 身份命名空间
pub const IDENTITY: &str = "osgi.identity";

/// 包导出/导入命名空间
pub const PACKAGE: &str = "osgi.wiring.package";

/// bundle 依赖命名空间
pub const BUNDLE: &str = "osgi.wiring.bundle";

/// 片段宿主命名空间
pub const HOST: &str = "osgi.wiring.host";

/// 版本属性
pub const VERSION_ATTRIBUTE: &str = "version";

/// bundle 版本属性
pub const BUNDLE_VERSION_ATTRIBUTE: &str = "bundle-version";

/// bundle 符号名属性
pub const BUNDLE_SYMBOLIC_NAME_ATTRIBUTE: &str = "bundle-symbolic-name";

/// 身份类型属性
pub const TYPE_ATTRIBUTE: &str = "type";

/// 身份类型：bundle
pub const TYPE_BUNDLE: &str = "osgi.bundle";

/// 身份类型：片段
pub const TYPE_FRAGMENT: &str = "osgi.fragment";

/// 单例指令
pub const SINGLETON_DIRECTIVE: &str = "singleton";
