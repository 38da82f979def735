//! 本地库选择
//!
//! 根据当前操作系统与处理器从资源声明的本地库子句中选出匹配项。
//! 库文件的提取不在此处进行。

use crate::resource::Resource;
use crate::utils::{CoreError, Result};

/// 本地库子句
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeClause {
    /// 库文件在 bundle 中的路径
    pub paths: Vec<String>,
    /// 适用的操作系统（空表示任意）
    pub os_names: Vec<String>,
    /// 适用的处理器（空表示任意）
    pub processors: Vec<String>,
}

impl NativeClause {
    /// 创建子句
    pub fn new(paths: &[&str]) -> Self {
        Self {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    /// 限定操作系统
    pub fn os(mut self, name: impl Into<String>) -> Self {
        self.os_names.push(name.into());
        self
    }

    /// 限定处理器
    pub fn processor(mut self, name: impl Into<String>) -> Self {
        self.processors.push(name.into());
        self
    }
}

/// 本地库元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeLibraryMetaData {
    /// 按声明顺序排列的子句
    pub clauses: Vec<NativeClause>,
    /// 带通配子句 `*`，没有匹配子句时不报错
    pub optional: bool,
}

/// 已选中的本地库
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    /// bundle 内路径
    pub library_path: String,
    /// 库名（去掉 lib 前缀与扩展名）
    pub library_name: String,
}

impl NativeLibrary {
    fn from_path(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or(path);
        let stem = file.split('.').next().unwrap_or(file);
        let name = stem.strip_prefix("lib").unwrap_or(stem);
        Self {
            library_path: path.to_string(),
            library_name: name.to_string(),
        }
    }
}

/// 本地库解析接口
pub trait NativeCode: Send + Sync {
    /// 为资源选出本地库
    ///
    /// # 错误
    ///
    /// 没有匹配子句且不可选，或库文件缺失时返回 `CoreError::NativeCode`
    fn resolve_native_code(&self, resource: &Resource) -> Result<Vec<NativeLibrary>>;
}

/// 按平台选择本地库的默认实现
#[derive(Debug, Clone)]
pub struct NativeCodeResolver {
    os: String,
    arch: String,
}

impl Default for NativeCodeResolver {
    fn default() -> Self {
        Self::for_platform(std::env::consts::OS, std::env::consts::ARCH)
    }
}

impl NativeCodeResolver {
    /// 指定平台创建（测试用）
    pub fn for_platform(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    fn os_matches(&self, name: &str) -> bool {
        canonical_os(name) == canonical_os(&self.os)
    }

    fn arch_matches(&self, name: &str) -> bool {
        canonical_arch(name) == canonical_arch(&self.arch)
    }

    fn clause_matches(&self, clause: &NativeClause) -> bool {
        (clause.os_names.is_empty() || clause.os_names.iter().any(|o| self.os_matches(o)))
            && (clause.processors.is_empty()
                || clause.processors.iter().any(|p| self.arch_matches(p)))
    }
}

fn canonical_os(name: &str) -> String {
    match name.to_lowercase().replace(' ', "").as_str() {
        "macos" | "macosx" | "darwin" => "macos".to_string(),
        "win32" | "windows" => "windows".to_string(),
        other => other.to_string(),
    }
}

fn canonical_arch(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "amd64" | "x86_64" | "x86-64" => "x86_64".to_string(),
        "arm64" | "aarch64" => "aarch64".to_string(),
        "i386" | "i686" | "x86" => "x86".to_string(),
        other => other.to_string(),
    }
}

impl NativeCode for NativeCodeResolver {
    fn resolve_native_code(&self, resource: &Resource) -> Result<Vec<NativeLibrary>> {
        let Some(metadata) = resource.native_code() else {
            return Ok(Vec::new());
        };

        let Some(clause) = metadata.clauses.iter().find(|c| self.clause_matches(c)) else {
            if metadata.optional {
                return Ok(Vec::new());
            }
            return Err(CoreError::NativeCode {
                resource: resource.canonical_name(),
                reason: format!("没有匹配 {}/{} 的本地库子句", self.os, self.arch),
            });
        };

        clause
            .paths
            .iter()
            .map(|path| {
                if resource.content().entry(path).is_none() {
                    return Err(CoreError::NativeCode {
                        resource: resource.canonical_name(),
                        reason: format!("本地库文件不存在: {}", path),
                    });
                }
                Ok(NativeLibrary::from_path(path))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryContent;
    use semver::Version;
    use std::sync::Arc;

    fn resource_with(metadata: NativeLibraryMetaData) -> Arc<Resource> {
        let content = MemoryContent::new()
            .with_entry("lib/linux/libfoo.so", vec![0u8; 4])
            .with_entry("lib/win/foo.dll", vec![0u8; 4]);
        Resource::builder("native", Version::new(1, 0, 0))
            .native_code(metadata)
            .content(Arc::new(content))
            .build()
            .unwrap()
    }

    #[test]
    fn test_selects_matching_clause() {
        let metadata = NativeLibraryMetaData {
            clauses: vec![
                NativeClause::new(&["lib/win/foo.dll"]).os("Win32").processor("x86-64"),
                NativeClause::new(&["lib/linux/libfoo.so"]).os("linux").processor("amd64"),
            ],
            optional: false,
        };
        let resolver = NativeCodeResolver::for_platform("linux", "x86_64");
        let libs = resolver.resolve_native_code(&resource_with(metadata)).unwrap();
        assert_eq!(libs.len(), 1);
        assert_eq!(libs[0].library_name, "foo");
        assert_eq!(libs[0].library_path, "lib/linux/libfoo.so");
    }

    #[test]
    fn test_no_match_fails_unless_optional() {
        let clauses = vec![NativeClause::new(&["lib/win/foo.dll"]).os("windows")];
        let resolver = NativeCodeResolver::for_platform("linux", "x86_64");

        let strict = NativeLibraryMetaData {
            clauses: clauses.clone(),
            optional: false,
        };
        assert!(resolver.resolve_native_code(&resource_with(strict)).is_err());

        let optional = NativeLibraryMetaData {
            clauses,
            optional: true,
        };
        assert!(resolver
            .resolve_native_code(&resource_with(optional))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_library_file() {
        let metadata = NativeLibraryMetaData {
            clauses: vec![NativeClause::new(&["lib/absent.so"])],
            optional: false,
        };
        let resolver = NativeCodeResolver::default();
        assert!(resolver.resolve_native_code(&resource_with(metadata)).is_err());
    }
}
