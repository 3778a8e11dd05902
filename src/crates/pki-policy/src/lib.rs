//! # 合规策略模块
//!
//! 在任何加密操作之前，按组织策略检查密钥参数和证书参数。
//!
//! ## 核心组件
//!
//! - [`Policy`]: 四类策略配置，支持默认值、构建器和反序列化
//! - [`PolicyEngine`]: 评估参数并记录违规
//! - [`ViolationLog`]: 只追加的违规日志
//!
//! ## 使用示例
//!
//! ```rust
//! use pki_policy::{Policy, PolicyEngine};
//!
//! let policy = Policy::builder().with_rsa_min_key_size(3072).build().unwrap();
//! let engine = PolicyEngine::new(policy);
//!
//! let result = engine.evaluate_key_policy("RSA", Some(2048), None);
//! assert!(!result.compliant);
//! assert_eq!(result.violations[0], "RSA key size 2048 below minimum 3072");
//! ```

pub mod config;
pub mod engine;
pub mod violation;

pub use config::{
    CertificatePolicy, KeyGenerationPolicy, LifecyclePolicy, NamingPolicy, Policy, PolicyBuilder,
    PolicyConfigError,
};
pub use engine::{
    parse_timestamp, CertificatePolicyRequest, ComplianceReport, ComplianceResult, ExpiryReport,
    ExpiryStatus, PolicyEngine, ViolationListing,
};
pub use violation::{ViolationCategory, ViolationLog, ViolationRecord};
