//! 已解析产物跟踪
//!
//! 每个已解析的 bundle 对应一个产物。重新解析时如果旧产物仍在拆除中，
//! 先等待其拆除完成（有超时），超时后照常继续。

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bundle::BundleId;

/// 产物状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// 可用
    Active,
    /// 拆除中
    Removing,
    /// 已拆除
    Removed,
}

/// 已解析产物表
#[derive(Default)]
pub struct ResolvedArtifacts {
    entries: Mutex<HashMap<BundleId, watch::Sender<ArtifactState>>>,
}

impl ResolvedArtifacts {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 bundle 创建产物
    ///
    /// 旧产物处于拆除中时最多等待 `timeout`。
    pub async fn create(&self, bundle: BundleId, timeout: Duration) {
        let pending = {
            let entries = self.entries.lock();
            entries
                .get(&bundle)
                .filter(|tx| *tx.borrow() == ArtifactState::Removing)
                .map(|tx| tx.subscribe())
        };

        if let Some(mut rx) = pending {
            debug!(bundle_id = %bundle, "等待旧产物拆除");
            let waited = tokio::time::timeout(
                timeout,
                rx.wait_for(|state| *state == ArtifactState::Removed),
            )
            .await;
            if waited.is_err() {
                warn!(bundle_id = %bundle, timeout_ms = timeout.as_millis() as u64, "等待旧产物拆除超时，继续创建");
            }
        }

        let (tx, _) = watch::channel(ArtifactState::Active);
        self.entries.lock().insert(bundle, tx);
    }

    /// 标记开始拆除
    ///
    /// # 返回
    ///
    /// 存在可用产物时返回 `true`
    pub fn begin_removal(&self, bundle: BundleId) -> bool {
        match self.entries.lock().get(&bundle) {
            Some(tx) => {
                tx.send_replace(ArtifactState::Removing);
                true
            }
            None => false,
        }
    }

    /// 标记拆除完成并移除记录
    pub fn complete_removal(&self, bundle: BundleId) {
        if let Some(tx) = self.entries.lock().remove(&bundle) {
            tx.send_replace(ArtifactState::Removed);
        }
    }

    /// 查询产物状态
    pub fn state(&self, bundle: BundleId) -> Option<ArtifactState> {
        self.entries.lock().get(&bundle).map(|tx| *tx.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_create_and_remove() {
        let artifacts = ResolvedArtifacts::new();
        let id = BundleId::new(7);

        artifacts.create(id, Duration::from_millis(10)).await;
        assert_eq!(artifacts.state(id), Some(ArtifactState::Active));

        assert!(artifacts.begin_removal(id));
        assert_eq!(artifacts.state(id), Some(ArtifactState::Removing));
        artifacts.complete_removal(id);
        assert_eq!(artifacts.state(id), None);
    }

    #[tokio::test]
    async fn test_waits_for_pending_removal() {
        let artifacts = Arc::new(ResolvedArtifacts::new());
        let id = BundleId::new(3);
        artifacts.create(id, Duration::from_millis(10)).await;
        artifacts.begin_removal(id);

        let remover = artifacts.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            remover.complete_removal(id);
        });

        let started = Instant::now();
        artifacts.create(id, Duration::from_secs(5)).await;
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(artifacts.state(id), Some(ArtifactState::Active));
    }

    #[tokio::test]
    async fn test_wait_times_out_and_proceeds() {
        let artifacts = ResolvedArtifacts::new();
        let id = BundleId::new(4);
        artifacts.create(id, Duration::from_millis(10)).await;
        artifacts.begin_removal(id);

        artifacts.create(id, Duration::from_millis(20)).await;
        assert_eq!(artifacts.state(id), Some(ArtifactState::Active));
    }
}
