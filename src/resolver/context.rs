//! 解析上下文

use std::sync::Arc;

use crate::resource::Resource;

/// 一次解析的输入：必选资源与可选资源
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    mandatory: Vec<Arc<Resource>>,
    optional: Vec<Arc<Resource>>,
}

impl ResolveContext {
    /// 直接创建上下文（不做预处理）
    pub fn new(mandatory: Vec<Arc<Resource>>, optional: Vec<Arc<Resource>>) -> Self {
        Self {
            mandatory,
            optional,
        }
    }

    /// 必选资源
    pub fn mandatory(&self) -> &[Arc<Resource>] {
        &self.mandatory
    }

    /// 可选资源
    pub fn optional(&self) -> &[Arc<Resource>] {
        &self.optional
    }

    /// 是否已包含该资源
    pub fn contains(&self, resource: &Resource) -> bool {
        self.mandatory
            .iter()
            .chain(&self.optional)
            .any(|r| r.id() == resource.id())
    }
}
