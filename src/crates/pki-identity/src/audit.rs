//! # 审计日志
//!
//! 只追加的状态变更记录。互斥锁是唯一的序列化点，
//! 序号在持锁期间分配，因此条目顺序等于追加顺序。

use chrono::Utc;
use parking_lot::Mutex;
use pki_types::{AuditEntry, AuditOperation};
use tracing::debug;

/// 审计日志
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// 创建空的审计日志
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条审计记录
    ///
    /// # 返回值
    ///
    /// 返回分配的序号（从 1 开始）
    pub fn append(&self, operation: AuditOperation, details: serde_json::Value) -> u64 {
        let mut entries = self.entries.lock();
        let sequence = entries.len() as u64 + 1;
        entries.push(AuditEntry {
            sequence,
            timestamp: Utc::now(),
            operation,
            details,
        });
        debug!("审计记录 #{}: {}", sequence, operation);
        sequence
    }

    /// 最近的 `limit` 条记录，`limit == 0` 返回全部
    pub fn entries(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let start = if limit == 0 { 0 } else { entries.len().saturating_sub(limit) };
        entries[start..].to_vec()
    }

    /// 记录总数
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
