//! # PKI 共享类型定义
//!
//! 定义在策略引擎、证书颁发机构、证书注册表和编排层之间共享的数据类型，
//! 避免子模块之间的循环依赖。
//!
//! - [`key`]: 密钥算法、曲线与密钥句柄
//! - [`certificate`]: 证书、证书签名请求与注册表记录
//! - [`audit`]: 审计日志条目
//! - [`error`]: 统一的错误分类

pub mod audit;
pub mod certificate;
pub mod error;
pub mod key;

pub use audit::{AuditEntry, AuditOperation};
pub use certificate::{
    Certificate, CertificateRecord, CertificateStatus, ExtendedKeyUsage, KeyUsage,
    SigningRequest, StatusFilter, SubjectName,
};
pub use error::PkiError;
pub use key::{EcCurve, KeyAlgorithm, KeyMaterialRef, DEFAULT_EC_CURVE, DEFAULT_RSA_KEY_SIZE};

/// 引擎内部统一结果类型
pub type PkiResult<T> = std::result::Result<T, PkiError>;

/// 把列表渲染为 `[a, b, c]` 形式，用于违规说明
pub fn render_list<T: std::fmt::Display>(items: &[T]) -> String {
    let rendered: Vec<String> = items.iter().map(|item| item.to_string()).collect();
    format!("[{}]", rendered.join(", "))
}
