//! 策略违规记录

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 违规类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// 密钥生成参数
    KeyGeneration,
    /// 证书参数
    Certificate,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::KeyGeneration => "key_generation",
            ViolationCategory::Certificate => "certificate",
        }
    }
}

/// 一次不合规评估的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub timestamp: DateTime<Utc>,
    pub category: ViolationCategory,
    /// 被评估的参数
    pub details: serde_json::Value,
    /// 违规原因
    pub reasons: Vec<String>,
}

/// 只追加的违规日志
///
/// 不做去重，每次不合规评估追加一条。
#[derive(Debug, Default)]
pub struct ViolationLog {
    records: Mutex<Vec<ViolationRecord>>,
}

impl ViolationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录
    pub fn record(&self, category: ViolationCategory, details: serde_json::Value, reasons: Vec<String>) {
        self.records.lock().push(ViolationRecord {
            timestamp: Utc::now(),
            category,
            details,
            reasons,
        });
    }

    /// 记录总数
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 在持有锁的情况下读取全部记录，保证多项统计来自同一快照
    pub fn with_records<R>(&self, f: impl FnOnce(&[ViolationRecord]) -> R) -> R {
        let records = self.records.lock();
        f(&records)
    }
}

/// 最后 `limit` 条记录，`limit == 0` 返回全部
pub fn tail(records: &[ViolationRecord], limit: usize) -> Vec<ViolationRecord> {
    let start = if limit == 0 { 0 } else { records.len().saturating_sub(limit) };
    records[start..].to_vec()
}

/// 按类别统计给定记录
pub fn count_by_category(records: &[ViolationRecord]) -> BTreeMap<ViolationCategory, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.category).or_insert(0) += 1;
    }
    counts
}
