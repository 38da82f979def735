//! 锁管理模块
//!
//! 生命周期操作与解析之间的有序、可重入加锁。

pub mod manager;

pub use manager::{
    current_owner, with_owner, FrameworkWiringLock, LockContext, LockManager, LockMethod,
    LockSupport, LockableItem,
};
