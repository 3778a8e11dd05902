//! # 引擎错误定义
//!
//! 定义证书生命周期引擎的错误分类。所有公开操作都只返回这些错误之一，
//! 工具层再把它们转换成 `{success: false, error}` 结构。

use error::{ErrorCategory, ErrorInfo, ErrorKind, ErrorSeverity};
use std::fmt;

/// 证书生命周期引擎错误类型
///
/// 每个变体都携带足以说明具体失败原因的信息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkiError {
    /// 未知的密钥、CSR或证书标识
    NotFound {
        /// 资源类型描述，例如 "Certificate"
        resource: &'static str,
        /// 调用方提供的标识
        id: String,
    },

    /// CSR 或证书签名校验失败
    InvalidSignature(String),

    /// 无法解码的 CSR / 证书 / 时间戳
    MalformedRequest(String),

    /// 策略校验未通过，携带完整的违规列表
    PolicyViolation(Vec<String>),

    /// 证书已被吊销
    AlreadyRevoked(String),

    /// 标识符或序列号冲突，对当前操作是致命的
    IdentifierCollision(String),

    /// 不支持的密钥算法
    UnsupportedAlgorithm(String),

    /// 不支持的参数取值
    UnsupportedParameter(String),

    /// 底层加密原语报告的失败
    Crypto(String),
}

impl PkiError {
    /// 构造 NotFound 错误
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        PkiError::NotFound { resource, id: id.into() }
    }

    /// 机器可读的错误种类名称
    pub fn kind(&self) -> &'static str {
        match self {
            PkiError::NotFound { .. } => "NotFound",
            PkiError::InvalidSignature(_) => "InvalidSignature",
            PkiError::MalformedRequest(_) => "MalformedRequest",
            PkiError::PolicyViolation(_) => "PolicyViolation",
            PkiError::AlreadyRevoked(_) => "AlreadyRevoked",
            PkiError::IdentifierCollision(_) => "IdentifierCollision",
            PkiError::UnsupportedAlgorithm(_) => "UnsupportedAlgorithm",
            PkiError::UnsupportedParameter(_) => "UnsupportedParameter",
            PkiError::Crypto(_) => "Crypto",
        }
    }

    /// 策略违规列表（仅 PolicyViolation 有值）
    pub fn violations(&self) -> &[String] {
        match self {
            PkiError::PolicyViolation(violations) => violations,
            _ => &[],
        }
    }

    fn classification(&self) -> (u32, ErrorCategory, ErrorSeverity) {
        match self {
            PkiError::NotFound { .. } => (7001, ErrorCategory::NotFound, ErrorSeverity::Warning),
            PkiError::MalformedRequest(_) => (7002, ErrorCategory::Parse, ErrorSeverity::Warning),
            PkiError::InvalidSignature(_) => (7003, ErrorCategory::Validation, ErrorSeverity::Warning),
            PkiError::PolicyViolation(_) => (7004, ErrorCategory::Policy, ErrorSeverity::Warning),
            PkiError::AlreadyRevoked(_) => (7005, ErrorCategory::Lifecycle, ErrorSeverity::Warning),
            PkiError::IdentifierCollision(_) => (7006, ErrorCategory::Conflict, ErrorSeverity::Critical),
            PkiError::UnsupportedAlgorithm(_) => (7007, ErrorCategory::Validation, ErrorSeverity::Warning),
            PkiError::UnsupportedParameter(_) => (7008, ErrorCategory::Validation, ErrorSeverity::Warning),
            PkiError::Crypto(_) => (7009, ErrorCategory::Encryption, ErrorSeverity::Critical),
        }
    }
}

impl fmt::Display for PkiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkiError::NotFound { resource, id } => write!(f, "{} '{}' not found", resource, id),
            PkiError::InvalidSignature(msg) => write!(f, "Invalid signature: {}", msg),
            PkiError::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            PkiError::PolicyViolation(violations) => {
                write!(f, "Policy violations found: {}", violations.join("; "))
            }
            PkiError::AlreadyRevoked(id) => write!(f, "Certificate '{}' is already revoked", id),
            PkiError::IdentifierCollision(msg) => write!(f, "Identifier collision: {}", msg),
            PkiError::UnsupportedAlgorithm(algorithm) => write!(f, "Unsupported algorithm: {}", algorithm),
            PkiError::UnsupportedParameter(msg) => write!(f, "Unsupported parameter: {}", msg),
            PkiError::Crypto(msg) => write!(f, "Cryptographic operation failed: {}", msg),
        }
    }
}

impl std::error::Error for PkiError {}

impl ErrorKind for PkiError {
    fn error_code(&self) -> u32 {
        self.classification().0
    }

    fn error_message(&self) -> String {
        self.to_string()
    }
}

impl From<PkiError> for ErrorInfo {
    fn from(err: PkiError) -> Self {
        let (_, category, severity) = err.classification();
        ErrorInfo::from_kind(&err)
            .with_category(category)
            .with_severity(severity)
    }
}
