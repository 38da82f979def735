//! 能力与需求

use std::fmt;

use super::attributes::{AttrValue, Attributes, Directives};
use super::filter::Filter;
use super::namespace;
use super::resource::ResourceId;

/// 需求的解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// 必须满足
    Mandatory,
    /// 可选，无法满足时跳过
    Optional,
    /// 动态，运行时按需查找，不参与解析
    Dynamic,
}

/// 能力
///
/// 资源对外提供的一项能力，创建后只读。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    namespace: String,
    attributes: Attributes,
    directives: Directives,
    owner: ResourceId,
}

impl Capability {
    pub(crate) fn new(
        namespace: impl Into<String>,
        attributes: Attributes,
        directives: Directives,
        owner: ResourceId,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            attributes,
            directives,
            owner,
        }
    }

    /// 命名空间
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 属性
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// 指令
    pub fn directives(&self) -> &Directives {
        &self.directives
    }

    /// 所属资源
    pub fn owner(&self) -> ResourceId {
        self.owner
    }

    /// 命名空间同名属性的字符串值（包名、符号名等）
    pub fn name(&self) -> Option<&str> {
        self.attributes.get(&self.namespace).and_then(AttrValue::as_str)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.namespace, self.name().unwrap_or("?"))
    }
}

/// 需求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    namespace: String,
    attributes: Attributes,
    directives: Directives,
    filter: Option<Filter>,
    resolution: Resolution,
    owner: ResourceId,
}

impl Requirement {
    pub(crate) fn new(
        namespace: impl Into<String>,
        attributes: Attributes,
        directives: Directives,
        filter: Option<Filter>,
        resolution: Resolution,
        owner: ResourceId,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            attributes,
            directives,
            filter,
            resolution,
            owner,
        }
    }

    /// 命名空间
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 属性
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// 指令
    pub fn directives(&self) -> &Directives {
        &self.directives
    }

    /// 匹配过滤器
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// 解析方式
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// 所属资源
    pub fn owner(&self) -> ResourceId {
        self.owner
    }

    /// 是否可选
    pub fn is_optional(&self) -> bool {
        self.resolution == Resolution::Optional
    }

    /// 是否动态导入
    pub fn is_dynamic(&self) -> bool {
        self.resolution == Resolution::Dynamic
    }

    /// 命名空间同名属性的字符串值（动态导入的包模式）
    pub fn name(&self) -> Option<&str> {
        self.attributes.get(&self.namespace).and_then(AttrValue::as_str)
    }

    /// 是否可由给定能力满足
    pub fn matches(&self, capability: &Capability) -> bool {
        self.namespace == capability.namespace
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(&capability.attributes))
    }

    /// 是否为可选的包导入
    pub fn is_optional_package(&self) -> bool {
        self.namespace == namespace::PACKAGE && self.is_optional()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}{}", self.namespace, filter),
            None => write!(f, "{}={}", self.namespace, self.name().unwrap_or("*")),
        }
    }
}
