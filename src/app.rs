//! # 生命周期编排模块
//!
//! 集成策略引擎、密钥库、CA签发器、证书注册表和审计日志，
//! 提供统一的证书生命周期接口。
//!
//! 签发流程: 策略评估 → 签名 → 登记 → 审计，任何一步失败都不会留下部分状态。

use crate::AppResult;
use chrono::Utc;
use error::{ErrorCategory, ErrorInfo};
use pki_identity::{
    inspect_request, AuditLog, AuthorityCertificate, AuthorityConfig, CaSigner,
    CertificateRegistry, CsrValidation, GeneratedKey, KeyInfo, KeyStore, RenewalOutcome,
};
use pki_policy::{
    CertificatePolicyRequest, ComplianceReport, ComplianceResult, ExpiryReport, Policy,
    PolicyEngine, ViolationListing,
};
use pki_types::{
    AuditEntry, CertificateRecord, ExtendedKeyUsage, KeyUsage, PkiError, PkiResult,
    SigningRequest, StatusFilter, SubjectName,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "pki.toml";

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV_VAR: &str = "PKI_CONFIG";

/// 应用程序配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 合规策略
    pub policy: Policy,
    /// CA配置
    pub authority: AuthorityConfig,
    /// 签发和续期未指定有效期时使用的天数
    pub default_validity_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            authority: AuthorityConfig::default(),
            default_validity_days: 365,
        }
    }
}

impl AppConfig {
    /// 验证配置
    pub fn validate(&self) -> AppResult<()> {
        self.policy.validate().map_err(ErrorInfo::from)?;
        if self.default_validity_days <= 0 {
            return Err(ErrorInfo::new(
                7102,
                format!("默认有效期必须大于0: {}", self.default_validity_days),
            )
            .with_category(ErrorCategory::Configuration));
        }
        if self.authority.validity_days == 0 {
            return Err(ErrorInfo::new(7103, "CA有效期必须大于0".to_string())
                .with_category(ErrorCategory::Configuration));
        }
        Ok(())
    }

    /// 从 TOML 文本解析配置
    #[cfg(feature = "config")]
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: AppConfig = toml::from_str(content).map_err(|e| {
            ErrorInfo::new(7104, format!("解析配置文件失败: {}", e))
                .with_category(ErrorCategory::Configuration)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载配置
    #[cfg(feature = "config")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ErrorInfo::from(e).with_context(format!("读取配置文件: {}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        info!("从配置文件加载: {}", path.display());
        Ok(config)
    }

    /// 加载配置
    ///
    /// 依次尝试 `PKI_CONFIG` 指定的路径和 `pki.toml`，都不存在时使用默认配置。
    pub fn load() -> AppResult<Self> {
        #[cfg(feature = "config")]
        {
            let config_path =
                std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

            if std::path::Path::new(&config_path).exists() {
                return Self::from_file(&config_path);
            }
        }

        info!("使用默认配置");
        Ok(Self::default())
    }
}

/// 签发请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub cert_id: String,
    pub csr_pem: String,
    /// 未指定时使用配置中的默认有效期
    pub validity_days: Option<i64>,
    /// 未指定时为 `digitalSignature, keyEncipherment`
    pub key_usages: Option<Vec<String>>,
    pub extended_key_usages: Option<Vec<String>>,
}

/// 证书生命周期编排器
///
/// 持有所有组件，组件之间通过 `Arc` 共享审计日志。
pub struct LifecycleOrchestrator {
    policy: Arc<PolicyEngine>,
    keystore: KeyStore,
    signer: Arc<CaSigner>,
    registry: CertificateRegistry,
    audit: Arc<AuditLog>,
    default_validity_days: i64,
}

impl LifecycleOrchestrator {
    /// 根据配置初始化编排器
    ///
    /// CA密钥在阻塞线程中生成。
    ///
    /// # 参数
    ///
    /// * `config` - 应用程序配置
    ///
    /// # 返回值
    ///
    /// 返回初始化的编排器或错误信息
    pub async fn initialize(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        info!("初始化证书生命周期引擎");

        let authority = config.authority.clone();
        let signer = tokio::task::spawn_blocking(move || CaSigner::new(&authority))
            .await
            .map_err(|e| ErrorInfo::new(7105, format!("CA初始化任务失败: {}", e)))??;

        Ok(Self::with_signer(config, signer))
    }

    /// 使用已创建的签发器组装编排器
    pub fn with_signer(config: AppConfig, signer: CaSigner) -> Self {
        let audit = Arc::new(AuditLog::new());
        info!("证书生命周期引擎就绪 (CA: {})", signer.issuer_name());
        Self {
            policy: Arc::new(PolicyEngine::new(config.policy)),
            keystore: KeyStore::new(Arc::clone(&audit)),
            signer: Arc::new(signer),
            registry: CertificateRegistry::new(Arc::clone(&audit)),
            audit,
            default_validity_days: config.default_validity_days,
        }
    }

    /// 策略引擎
    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// 默认有效期天数
    pub fn default_validity_days(&self) -> i64 {
        self.default_validity_days
    }

    // ---- 密钥与 CSR ----

    /// 生成密钥对
    pub async fn generate_key_pair(
        &self,
        algorithm: &str,
        key_id: &str,
        key_size: Option<u32>,
        curve: Option<&str>,
    ) -> PkiResult<GeneratedKey> {
        self.keystore.generate_key_pair(algorithm, key_id, key_size, curve).await
    }

    /// 创建证书签名请求
    pub async fn create_csr(
        &self,
        key_id: &str,
        subject: SubjectName,
        san_dns: Vec<String>,
    ) -> PkiResult<SigningRequest> {
        self.keystore.create_csr(key_id, subject, san_dns).await
    }

    /// 校验已存储的 CSR
    pub async fn validate_csr(&self, csr_id: &str) -> PkiResult<CsrValidation> {
        self.keystore.validate_csr(csr_id).await
    }

    /// 查询密钥信息
    pub async fn get_key_info(&self, key_id: &str) -> PkiResult<KeyInfo> {
        self.keystore.get_key_info(key_id).await
    }

    // ---- 证书生命周期 ----

    /// 签发证书
    ///
    /// 先解析 CSR 并校验签名，再检查标识是否已占用，然后用 CSR 中的公钥参数
    /// 和主体评估密钥策略与证书策略。两次评估的违规合并后一次性返回。
    pub async fn issue_certificate(&self, request: IssueRequest) -> PkiResult<CertificateRecord> {
        let validity_days = request.validity_days.unwrap_or(self.default_validity_days);
        let inspected = inspect_request(&request.csr_pem)?;

        if self.registry.contains(&request.cert_id).await {
            warn!("证书标识已存在: {}", request.cert_id);
            return Err(PkiError::IdentifierCollision(format!(
                "certificate '{}' already exists",
                request.cert_id
            )));
        }

        let key_usage_names = request
            .key_usages
            .clone()
            .unwrap_or_else(|| KeyUsage::leaf_defaults().iter().map(|u| u.to_string()).collect());
        let extended_key_usage_names = request.extended_key_usages.clone().unwrap_or_default();

        let key_result = self.policy.evaluate_key_policy(
            inspected.key_algorithm.as_str(),
            inspected.key_size,
            inspected.curve.as_ref().map(|c| c.as_str()),
        );
        let certificate_result = self.policy.evaluate_certificate_policy(&CertificatePolicyRequest {
            validity_days,
            common_name: Some(inspected.subject.common_name.clone()),
            organization: inspected.subject.organization.clone(),
            country: inspected.subject.country.clone(),
            key_usages: key_usage_names.clone(),
            extended_key_usages: extended_key_usage_names.clone(),
        });

        let violations: Vec<String> = key_result
            .violations
            .into_iter()
            .chain(certificate_result.violations)
            .collect();
        if !violations.is_empty() {
            warn!("证书签发被策略拒绝: {} ({} 项违规)", request.cert_id, violations.len());
            return Err(PkiError::PolicyViolation(violations));
        }

        let key_usages = parse_usages::<KeyUsage>(&key_usage_names)?;
        let extended_key_usages = parse_usages::<ExtendedKeyUsage>(&extended_key_usage_names)?;

        let certificate = self.signer.issue_inspected(
            &inspected,
            validity_days,
            Some(&key_usages),
            Some(&extended_key_usages),
        )?;
        self.registry.insert(&request.cert_id, certificate).await
    }

    /// 吊销证书
    pub async fn revoke_certificate(&self, cert_id: &str, reason: &str) -> PkiResult<CertificateRecord> {
        self.registry.revoke(cert_id, reason).await
    }

    /// 续期证书
    ///
    /// 新证书沿用原证书的主体、公钥和用途，标识为 `<cert_id>_renewed`。
    pub async fn renew_certificate(
        &self,
        cert_id: &str,
        validity_days: Option<i64>,
    ) -> PkiResult<RenewalOutcome> {
        let validity_days = validity_days.unwrap_or(self.default_validity_days);
        let signer = Arc::clone(&self.signer);
        self.registry
            .renew(cert_id, move |record| signer.renew(&record.certificate, validity_days))
            .await
    }

    /// 读取证书记录
    pub async fn get_certificate(&self, cert_id: &str) -> PkiResult<CertificateRecord> {
        self.registry.get(cert_id).await
    }

    /// 按状态列出证书
    pub async fn list_certificates(&self, filter: StatusFilter) -> Vec<CertificateRecord> {
        self.registry.list(filter, Utc::now()).await
    }

    /// CA证书信息
    pub fn ca_certificate(&self) -> &AuthorityCertificate {
        self.signer.ca_certificate()
    }

    // ---- 策略 ----

    /// 评估密钥参数
    pub fn validate_key_policy(
        &self,
        algorithm: &str,
        key_size: Option<u32>,
        curve: Option<&str>,
    ) -> ComplianceResult {
        self.policy.evaluate_key_policy(algorithm, key_size, curve)
    }

    /// 评估证书参数
    pub fn validate_certificate_policy(&self, request: &CertificatePolicyRequest) -> ComplianceResult {
        self.policy.evaluate_certificate_policy(request)
    }

    /// 检查到期状态
    pub fn check_certificate_expiry(&self, not_valid_after: &str) -> PkiResult<ExpiryReport> {
        self.policy.check_certificate_expiry(not_valid_after)
    }

    /// 读取策略
    pub fn get_policy(&self, category: &str) -> PkiResult<serde_json::Value> {
        self.policy.get_policy(category)
    }

    /// 列出违规记录
    pub fn list_violations(&self, limit: usize) -> ViolationListing {
        self.policy.list_violations(limit)
    }

    /// 合规报告
    pub fn compliance_report(&self, include_violations: bool) -> ComplianceReport {
        self.policy.compliance_report(include_violations)
    }

    // ---- 审计 ----

    /// 最近的审计记录，`limit == 0` 返回全部
    pub fn list_operations(&self, limit: usize) -> Vec<AuditEntry> {
        debug!("读取审计记录: limit={}", limit);
        self.audit.entries(limit)
    }

    /// 审计记录总数
    pub fn operation_count(&self) -> usize {
        self.audit.len()
    }
}

fn parse_usages<T>(names: &[String]) -> PkiResult<Vec<T>>
where
    T: std::str::FromStr<Err = PkiError>,
{
    names.iter().map(|name| name.parse()).collect()
}
