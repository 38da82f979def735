//! bundle 标识、状态与生命周期选项

use std::fmt;

use serde::{Deserialize, Serialize};

/// bundle ID，系统 bundle 为 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleId(u64);

impl BundleId {
    /// 系统 bundle
    pub const SYSTEM: BundleId = BundleId(0);

    /// 创建 ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// 数值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 是否为系统 bundle
    pub fn is_system(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// bundle 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BundleState {
    /// 已安装
    Installed = 1,
    /// 已解析
    Resolved = 2,
    /// 启动中
    Starting = 3,
    /// 停止中
    Stopping = 4,
    /// 活动
    Active = 5,
    /// 已卸载（终态）
    Uninstalled = 6,
}

impl BundleState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => BundleState::Installed,
            2 => BundleState::Resolved,
            3 => BundleState::Starting,
            4 => BundleState::Stopping,
            5 => BundleState::Active,
            _ => BundleState::Uninstalled,
        }
    }

    /// 是否处于已解析及之后的状态
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            BundleState::Resolved | BundleState::Starting | BundleState::Stopping | BundleState::Active
        )
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BundleState::Installed => "INSTALLED",
            BundleState::Resolved => "RESOLVED",
            BundleState::Starting => "STARTING",
            BundleState::Stopping => "STOPPING",
            BundleState::Active => "ACTIVE",
            BundleState::Uninstalled => "UNINSTALLED",
        };
        write!(f, "{}", name)
    }
}

/// 启动选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// 临时启动：不修改持久自动启动标记，启动级别不满足时报错
    pub transient: bool,
}

impl StartOptions {
    /// 默认（持久）启动
    pub const NONE: StartOptions = StartOptions { transient: false };
    /// 临时启动
    pub const TRANSIENT: StartOptions = StartOptions { transient: true };
}

/// 停止选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// 临时停止：保留持久自动启动标记
    pub transient: bool,
}

impl StopOptions {
    /// 默认（持久）停止
    pub const NONE: StopOptions = StopOptions { transient: false };
    /// 临时停止
    pub const TRANSIENT: StopOptions = StopOptions { transient: true };
}
