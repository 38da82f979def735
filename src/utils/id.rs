//! 标识符生成
//!
//! - 监听器注册信息使用 10 位 62 进制随机 ID
//! - 框架实例使用 UUID v4
//! - bundle、资源修订版、锁项使用进程内单调递增序号

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// ID 长度
const ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制 ID
///
/// 使用时间戳与随机数异或组合。
///
/// # 示例
///
/// ```
/// use chips_bundles::utils::id::generate_id;
///
/// let id = generate_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let random: u64 = rand::thread_rng().gen();

    let mut value = timestamp ^ random;
    let mut result = String::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        result.push(BASE62_CHARS[(value % 62) as usize] as char);
        value /= 62;
    }
    result.chars().rev().collect()
}

/// 验证 ID 格式是否有效
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// 生成 UUID v4 格式的 ID
///
/// 用于框架实例标识
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 单调递增序号生成器
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    /// 从指定起始值创建
    pub const fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// 取下一个序号
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
