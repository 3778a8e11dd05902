//! # 证书生命周期与合规引擎
//!
//! 把证书签名请求变成受管理的证书，跟踪其生命周期，
//! 并让每一次密码学操作都经过可配置的合规策略。
//!
//! ## 核心特性
//!
//! - **合规策略**: 密钥算法、密钥长度、曲线、有效期、命名和用途的策略评估
//! - **证书颁发**: 自签名演示根CA，签发与续期
//! - **生命周期**: 有效、吊销（终止）、被取代三种状态，过期在读取时推导
//! - **审计**: 所有状态变更按接受顺序记录
//! - **工具接口**: 封闭的 JSON 工具集合，适合由上层编排调用
//!
//! ## 模块架构
//!
//! ```text
//! pki-engine/
//! ├── src/
//! │   ├── main.rs         # JSON-lines 标准输入输出入口
//! │   ├── lib.rs          # 库入口
//! │   ├── app.rs          # 配置与生命周期编排器
//! │   ├── tools.rs        # 工具调用分发
//! │   └── crates/
//! │       ├── error/          # 错误处理框架
//! │       ├── pki-types/      # 领域类型定义
//! │       ├── pki-policy/     # 合规策略引擎
//! │       └── pki-identity/   # 密钥库、CA签发器、证书注册表、审计日志
//! ```
//!
//! ## 使用示例
//!
//! ```no_run
//! use pki_engine::app::{AppConfig, IssueRequest, LifecycleOrchestrator};
//! use pki_engine::SubjectName;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = LifecycleOrchestrator::initialize(AppConfig::default()).await?;
//!
//!     engine.generate_key_pair("RSA", "api-key", Some(4096), None).await?;
//!     let subject = SubjectName::new("api.example.com").with_organization("Example");
//!     let csr = engine.create_csr("api-key", subject, vec!["api.example.com".into()]).await?;
//!
//!     let record = engine
//!         .issue_certificate(IssueRequest {
//!             cert_id: "api".into(),
//!             csr_pem: csr.csr_pem,
//!             validity_days: Some(90),
//!             ..IssueRequest::default()
//!         })
//!         .await?;
//!     println!("序列号: {}", record.certificate.serial_number);
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod tools;

use error::ErrorInfo;

pub use app::{AppConfig, IssueRequest, LifecycleOrchestrator};
pub use pki_identity::{AuthorityCertificate, AuthorityConfig, RenewalOutcome};
pub use pki_policy::{CertificatePolicyRequest, ComplianceResult, Policy, PolicyEngine};
pub use pki_types::{
    Certificate, CertificateRecord, CertificateStatus, PkiError, PkiResult, StatusFilter,
    SubjectName,
};
pub use tools::{dispatch, handle_line, ToolCall};

/// 应用程序结果类型
pub type AppResult<T> = std::result::Result<T, ErrorInfo>;
