//! 宿主 bundle 的回退加载器
//!
//! 只有当静态连线无法满足类或资源查找时才会被调用。加载器根据宿主的
//! 动态导入模式，先在已解析模块中查找，再在处于 INSTALLED 状态的 bundle 中
//! 查找（按需触发解析）。
//!
//! 动态解析可能再次落回同一个加载器；每个任务维护一个按路径计数的递归
//! 计数器，同一路径只在最外层查找，嵌套查找直接返回 `None`。计数器在最外层
//! 调用时创建，在其结束时销毁。
//!
//! 查找结果不做缓存。

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::graph::{package_path, parent_path, LoadedEntry, Module, ModuleGraph, ModuleIdentifier};
use crate::resource::{namespace, AttrValue, Resource};

tokio::task_local! {
    static DYNAMIC_LOAD_ATTEMPTS: RefCell<HashMap<String, usize>>;
}

/// 回退加载器查询模块的来源
#[async_trait]
pub trait ModuleSource: Send + Sync {
    /// 模块图
    fn module_graph(&self) -> Arc<dyn ModuleGraph>;

    /// 处于 INSTALLED 状态的 bundle 的当前资源（安装顺序）
    fn installed_resources(&self) -> Vec<Arc<Resource>>;

    /// 确保资源已解析
    async fn ensure_resolved(&self, resource: &Arc<Resource>) -> bool;
}

/// 动态导入模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicImport {
    /// `*`、`a.b.*` 或精确包名
    pub pattern: String,
    /// 限定提供者的符号名
    pub symbolic_name: Option<String>,
}

impl DynamicImport {
    fn matches(&self, dir: &str) -> bool {
        if self.pattern == "*" {
            return true;
        }
        match self.pattern.strip_suffix(".*") {
            Some(prefix) => dir.starts_with(&package_path(prefix)),
            None => dir == package_path(&self.pattern),
        }
    }

    fn accepts(&self, candidate: &Resource) -> bool {
        self.symbolic_name
            .as_deref()
            .map_or(true, |name| name == candidate.symbolic_name())
    }
}

/// 路径计数守卫，离开作用域时递减
struct AttemptGuard {
    path: String,
}

impl AttemptGuard {
    /// 递增计数并返回当前深度
    fn enter(path: &str) -> (Self, usize) {
        let depth = DYNAMIC_LOAD_ATTEMPTS.with(|attempts| {
            let mut attempts = attempts.borrow_mut();
            let count = attempts.entry(path.to_string()).or_insert(0);
            *count += 1;
            *count
        });
        (
            Self {
                path: path.to_string(),
            },
            depth,
        )
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let _ = DYNAMIC_LOAD_ATTEMPTS.try_with(|attempts| {
            let mut attempts = attempts.borrow_mut();
            if let Some(count) = attempts.get_mut(&self.path) {
                *count -= 1;
                if *count == 0 {
                    attempts.remove(&self.path);
                }
            }
        });
    }
}

async fn with_attempts<F: Future>(fut: F) -> F::Output {
    if DYNAMIC_LOAD_ATTEMPTS.try_with(|_| ()).is_ok() {
        fut.await
    } else {
        DYNAMIC_LOAD_ATTEMPTS
            .scope(RefCell::new(HashMap::new()), fut)
            .await
    }
}

/// 当前任务中某路径的动态查找深度
pub fn dynamic_load_depth(path: &str) -> usize {
    DYNAMIC_LOAD_ATTEMPTS
        .try_with(|attempts| attempts.borrow().get(path).copied().unwrap_or(0))
        .unwrap_or(0)
}

/// 回退加载器
pub struct FallbackLoader {
    host: Arc<Resource>,
    identifier: ModuleIdentifier,
    exported_paths: BTreeSet<String>,
    imported_paths: BTreeSet<String>,
    dynamic_imports: Vec<DynamicImport>,
    source: Weak<dyn ModuleSource>,
}

impl FallbackLoader {
    /// 为宿主模块创建回退加载器
    pub fn new(host: &Module, source: Weak<dyn ModuleSource>) -> Self {
        let dynamic_imports = host
            .resource()
            .dynamic_imports()
            .into_iter()
            .filter_map(|req| {
                Some(DynamicImport {
                    pattern: req.name()?.to_string(),
                    symbolic_name: req
                        .attributes()
                        .get(namespace::BUNDLE_SYMBOLIC_NAME_ATTRIBUTE)
                        .and_then(AttrValue::as_str)
                        .map(str::to_string),
                })
            })
            .collect();

        Self {
            host: host.resource().clone(),
            identifier: host.identifier().clone(),
            exported_paths: host.exported_paths().clone(),
            imported_paths: host.imported_paths().clone(),
            dynamic_imports,
            source,
        }
    }

    /// 宿主模块标识
    pub fn identifier(&self) -> &ModuleIdentifier {
        &self.identifier
    }

    /// 按类名加载，`a.b.C` 映射为 `a/b/C.class`
    pub async fn load_class(&self, class_name: &str) -> Option<LoadedEntry> {
        let path = format!("{}.class", class_name.replace('.', "/"));
        self.load_class_or_resource(&path).await
    }

    /// 按路径加载资源
    pub async fn load_resource(&self, path: &str) -> Option<LoadedEntry> {
        self.load_class_or_resource(path).await
    }

    /// 通过动态导入查找类或资源
    pub async fn load_class_or_resource(&self, path: &str) -> Option<LoadedEntry> {
        let path = path.trim_start_matches('/');
        let dir = parent_path(path);

        // 已静态导入的路径不做动态查找
        if self.imported_paths.contains(dir) {
            return None;
        }

        let patterns = self.find_matching_patterns(dir);
        if patterns.is_empty() {
            return None;
        }

        with_attempts(async {
            let (_guard, depth) = AttemptGuard::enter(path);
            if depth > 1 {
                trace!(module = %self.identifier, path = %path, depth, "跳过嵌套的动态查找");
                return None;
            }
            let source = self.source.upgrade()?;
            self.search(source.as_ref(), path, dir, &patterns).await
        })
        .await
    }

    /// 与请求目录匹配的动态导入模式
    ///
    /// 宿主自己导出该目录时不匹配任何模式。
    pub fn find_matching_patterns(&self, dir: &str) -> Vec<DynamicImport> {
        if self.exported_paths.contains(dir) {
            return Vec::new();
        }
        self.dynamic_imports
            .iter()
            .filter(|import| import.matches(dir))
            .cloned()
            .collect()
    }

    fn is_valid_candidate(&self, module: &Module, dir: &str, patterns: &[DynamicImport]) -> bool {
        module.exported_paths().contains(dir)
            && patterns.iter().any(|p| p.accepts(module.resource()))
    }

    async fn search(
        &self,
        source: &dyn ModuleSource,
        path: &str,
        dir: &str,
        patterns: &[DynamicImport],
    ) -> Option<LoadedEntry> {
        let graph = source.module_graph();

        for identifier in graph.identifiers().await {
            if identifier == self.identifier {
                continue;
            }
            if let Some(entry) = self.try_candidate(graph.as_ref(), &identifier, path, dir, patterns).await {
                return Some(entry);
            }
        }

        for resource in source.installed_resources() {
            if resource.id() == self.host.id() || resource.is_fragment() {
                continue;
            }
            if !source.ensure_resolved(&resource).await {
                trace!(resource = %resource, "候选 bundle 无法解析");
                continue;
            }
            let identifier = graph.identifier_for(&resource);
            if let Some(entry) = self.try_candidate(graph.as_ref(), &identifier, path, dir, patterns).await {
                return Some(entry);
            }
        }

        debug!(module = %self.identifier, path = %path, "动态查找未找到");
        None
    }

    async fn try_candidate(
        &self,
        graph: &dyn ModuleGraph,
        identifier: &ModuleIdentifier,
        path: &str,
        dir: &str,
        patterns: &[DynamicImport],
    ) -> Option<LoadedEntry> {
        let module = graph.lookup(identifier).await?;
        if !self.is_valid_candidate(&module, dir, patterns) {
            return None;
        }
        match graph.load_resource(identifier, path).await {
            Ok(Some(entry)) => {
                debug!(module = %self.identifier, candidate = %identifier, path = %path, "动态查找命中");
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                trace!(candidate = %identifier, error = %e, "候选模块加载失败");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn import(pattern: &str) -> DynamicImport {
        DynamicImport {
            pattern: pattern.to_string(),
            symbolic_name: None,
        }
    }

    #[test]
    fn test_pattern_matching() {
        assert!(import("*").matches("any/where"));
        assert!(import("com.acme.*").matches("com/acme/sub"));
        assert!(import("com.acme.*").matches("com/acme"));
        assert!(!import("com.acme.*").matches("org/other"));
        assert!(import("com.acme").matches("com/acme"));
        assert!(!import("com.acme").matches("com/acme/sub"));
    }

    #[test]
    fn test_symbolic_name_restriction() {
        let candidate = Resource::builder("provider", Version::new(1, 0, 0)).build().unwrap();
        let restricted = DynamicImport {
            pattern: "*".to_string(),
            symbolic_name: Some("other".to_string()),
        };
        assert!(!restricted.accepts(&candidate));
        assert!(import("*").accepts(&candidate));
    }

    #[tokio::test]
    async fn test_attempt_counter_scoped() {
        with_attempts(async {
            let (outer, depth) = AttemptGuard::enter("a/B.class");
            assert_eq!(depth, 1);
            {
                let (_inner, depth) = AttemptGuard::enter("a/B.class");
                assert_eq!(depth, 2);
            }
            assert_eq!(dynamic_load_depth("a/B.class"), 1);
            drop(outer);
            assert_eq!(dynamic_load_depth("a/B.class"), 0);
        })
        .await;
        assert_eq!(dynamic_load_depth("a/B.class"), 0);
    }
}
