//! 部署描述
//!
//! 存储层交给框架安装的单元：安装位置、资源（含内容），以及可选的启动级别与
//! 自动启动标记。

use std::sync::Arc;

use crate::resource::Resource;

/// 部署
#[derive(Debug, Clone)]
pub struct Deployment {
    location: String,
    resource: Arc<Resource>,
    start_level: Option<u32>,
    auto_start: bool,
}

impl Deployment {
    /// 创建部署
    pub fn new(location: impl Into<String>, resource: Arc<Resource>) -> Self {
        Self {
            location: location.into(),
            resource,
            start_level: None,
            auto_start: false,
        }
    }

    /// 指定 bundle 启动级别
    pub fn with_start_level(mut self, level: u32) -> Self {
        self.start_level = Some(level);
        self
    }

    /// 安装后标记为持久自动启动
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// 安装位置
    pub fn location(&self) -> &str {
        &self.location
    }

    /// 资源
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// 启动级别
    pub fn start_level(&self) -> Option<u32> {
        self.start_level
    }

    /// 是否自动启动
    pub fn is_auto_start(&self) -> bool {
        self.auto_start
    }
}
