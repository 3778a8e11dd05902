//! # PKI 身份与证书生命周期模块
//!
//! 提供密钥生成、证书签名请求、证书颁发机构和证书注册表。
//!
//! ## 架构设计
//!
//! - **密钥库** ([`KeyStore`]): 持有私钥，创建和校验 CSR
//! - **颁发机构** ([`CaSigner`]): 自签名根CA，签发和续期证书
//! - **注册表** ([`CertificateRegistry`]): 证书状态机，单写者多读者
//! - **审计日志** ([`AuditLog`]): 所有状态变更的只追加记录
//!
//! ## 安全特性
//!
//! - 私钥从不离开密钥库，也从不写入日志
//! - 序列号对照本CA签发过的全部序列号去重
//! - 吊销是终止状态
//!
//! ## 使用示例
//!
//! ```rust
//! use pki_identity::{AuditLog, AuthorityConfig, CaSigner, CertificateRegistry, KeyStore};
//! use pki_types::SubjectName;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), pki_types::PkiError> {
//! let audit = Arc::new(AuditLog::new());
//! let keystore = KeyStore::new(Arc::clone(&audit));
//! let signer = CaSigner::new(&AuthorityConfig::default())?;
//! let registry = CertificateRegistry::new(Arc::clone(&audit));
//!
//! keystore.generate_key_pair("ECC", "web", None, None).await?;
//! let csr = keystore
//!     .create_csr("web", SubjectName::new("web.example.com"), vec!["web.example.com".into()])
//!     .await?;
//!
//! let certificate = signer.issue(&csr.csr_pem, 90, None, None)?;
//! let record = registry.insert("web", certificate).await?;
//! println!("证书指纹: {}", record.certificate.fingerprint);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod authority;
pub mod csr;
pub mod keystore;
pub mod registry;

pub use audit::AuditLog;
pub use authority::{
    AuthorityCertificate, AuthorityConfig, CaSigner, RandomSerialSource, SerialNumberSource,
    DEMO_CA_NOTICE, MAX_SERIAL_ATTEMPTS,
};
pub use csr::{inspect_request, InspectedRequest};
pub use keystore::{CsrValidation, GeneratedKey, KeyInfo, KeySpec, KeyStore};
pub use registry::{renewed_id_for, CertificateRegistry, RenewalOutcome};
