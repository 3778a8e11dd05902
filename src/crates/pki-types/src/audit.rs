//! 审计日志条目

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 被审计的状态变更操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    GenerateKeyPair,
    CreateCsr,
    IssueCertificate,
    RevokeCertificate,
    RenewCertificate,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::GenerateKeyPair => "generate_key_pair",
            AuditOperation::CreateCsr => "create_csr",
            AuditOperation::IssueCertificate => "issue_certificate",
            AuditOperation::RevokeCertificate => "revoke_certificate",
            AuditOperation::RenewCertificate => "renew_certificate",
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 审计条目
///
/// 序号从 1 开始单调递增，顺序等于操作被接受的顺序。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub details: serde_json::Value,
}
