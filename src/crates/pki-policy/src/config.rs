//! # 合规策略配置
//!
//! 提供密钥生成、证书参数、命名规则和生命周期四类合规策略，
//! 支持默认值、构建器模式和 TOML/JSON 反序列化三种创建方式。
//! 策略在引擎实例创建时加载一次，之后只读。

use error::{ErrorCategory, ErrorInfo, ErrorSeverity};
use pki_types::{EcCurve, ExtendedKeyUsage, KeyAlgorithm, KeyUsage};
use serde::{Deserialize, Serialize};

/// 策略配置错误类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyConfigError {
    /// 最小有效期大于最大有效期
    InvalidValidityBounds { min: u32, max: u32 },

    /// 允许的算法列表为空
    NoAllowedAlgorithms,
}

impl std::fmt::Display for PolicyConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyConfigError::InvalidValidityBounds { min, max } => {
                write!(f, "无效的有效期范围: 最小 {} 天大于最大 {} 天", min, max)
            }
            PolicyConfigError::NoAllowedAlgorithms => write!(f, "允许的密钥算法列表不能为空"),
        }
    }
}

impl std::error::Error for PolicyConfigError {}

impl From<PolicyConfigError> for ErrorInfo {
    fn from(err: PolicyConfigError) -> Self {
        ErrorInfo::new(7101, err.to_string())
            .with_category(ErrorCategory::Configuration)
            .with_severity(ErrorSeverity::Error)
    }
}

/// 密钥生成策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyGenerationPolicy {
    /// 允许的密钥算法
    pub allowed_algorithms: Vec<KeyAlgorithm>,
    /// RSA最小密钥长度
    pub rsa_min_key_size: u32,
    /// 允许的RSA密钥长度
    pub rsa_allowed_sizes: Vec<u32>,
    /// 允许的椭圆曲线
    pub ecc_allowed_curves: Vec<EcCurve>,
}

impl Default for KeyGenerationPolicy {
    fn default() -> Self {
        Self {
            allowed_algorithms: vec![KeyAlgorithm::Rsa, KeyAlgorithm::Ecc],
            rsa_min_key_size: 2048,
            rsa_allowed_sizes: vec![2048, 3072, 4096],
            ecc_allowed_curves: vec![EcCurve::Secp256r1, EcCurve::Secp384r1, EcCurve::Secp521r1],
        }
    }
}

/// 证书参数策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificatePolicy {
    /// 最大有效期（天），默认遵循 CA/Browser Forum 基线要求
    pub max_validity_days: u32,
    /// 最小有效期（天）
    pub min_validity_days: u32,
    /// 允许的密钥用途
    pub allowed_key_usages: Vec<KeyUsage>,
    /// 允许的扩展密钥用途
    pub allowed_extended_key_usages: Vec<ExtendedKeyUsage>,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            max_validity_days: 825,
            min_validity_days: 1,
            allowed_key_usages: vec![
                KeyUsage::DigitalSignature,
                KeyUsage::KeyEncipherment,
                KeyUsage::DataEncipherment,
                KeyUsage::KeyAgreement,
                KeyUsage::KeyCertSign,
                KeyUsage::CrlSign,
            ],
            allowed_extended_key_usages: vec![
                ExtendedKeyUsage::ServerAuth,
                ExtendedKeyUsage::ClientAuth,
                ExtendedKeyUsage::CodeSigning,
                ExtendedKeyUsage::EmailProtection,
            ],
        }
    }
}

/// 命名策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPolicy {
    /// 是否要求国家代码
    pub require_country: bool,
    /// 是否要求组织名称
    pub require_organization: bool,
    /// 通用名称最大长度
    pub max_common_name_length: usize,
    /// 允许的国家代码，`None` 表示全部允许
    pub allowed_countries: Option<Vec<String>>,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            require_country: false,
            require_organization: true,
            max_common_name_length: 64,
            allowed_countries: None,
        }
    }
}

/// 生命周期策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
    /// 到期前多少天开始提示续期
    pub renewal_warning_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self { renewal_warning_days: 30 }
    }
}

/// 完整的合规策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub key_generation: KeyGenerationPolicy,
    pub certificate: CertificatePolicy,
    pub naming: NamingPolicy,
    pub lifecycle: LifecyclePolicy,
}

impl Policy {
    /// 策略类别名称，顺序即报告中的顺序
    pub const CATEGORIES: [&'static str; 4] = ["key_generation", "certificate", "naming", "lifecycle"];

    /// 创建策略构建器
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// 验证策略的一致性
    ///
    /// 反序列化得到的策略在使用前必须调用本方法。
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.certificate.min_validity_days > self.certificate.max_validity_days {
            return Err(PolicyConfigError::InvalidValidityBounds {
                min: self.certificate.min_validity_days,
                max: self.certificate.max_validity_days,
            });
        }

        if self.key_generation.allowed_algorithms.is_empty() {
            return Err(PolicyConfigError::NoAllowedAlgorithms);
        }

        Ok(())
    }
}

/// 策略构建器
///
/// 使用构建器模式创建和验证策略，未设置的字段使用默认值。
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    /// 创建新的策略构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置允许的密钥算法
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<KeyAlgorithm>) -> Self {
        self.policy.key_generation.allowed_algorithms = algorithms;
        self
    }

    /// 设置RSA最小密钥长度
    pub fn with_rsa_min_key_size(mut self, size: u32) -> Self {
        self.policy.key_generation.rsa_min_key_size = size;
        self
    }

    /// 设置允许的RSA密钥长度
    pub fn with_rsa_allowed_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.policy.key_generation.rsa_allowed_sizes = sizes;
        self
    }

    /// 设置允许的椭圆曲线
    pub fn with_ecc_allowed_curves(mut self, curves: Vec<EcCurve>) -> Self {
        self.policy.key_generation.ecc_allowed_curves = curves;
        self
    }

    /// 设置有效期范围（天）
    pub fn with_validity_bounds(mut self, min_days: u32, max_days: u32) -> Self {
        self.policy.certificate.min_validity_days = min_days;
        self.policy.certificate.max_validity_days = max_days;
        self
    }

    /// 设置允许的密钥用途
    pub fn with_allowed_key_usages(mut self, usages: Vec<KeyUsage>) -> Self {
        self.policy.certificate.allowed_key_usages = usages;
        self
    }

    /// 设置允许的扩展密钥用途
    pub fn with_allowed_extended_key_usages(mut self, usages: Vec<ExtendedKeyUsage>) -> Self {
        self.policy.certificate.allowed_extended_key_usages = usages;
        self
    }

    /// 是否要求组织名称
    pub fn with_require_organization(mut self, required: bool) -> Self {
        self.policy.naming.require_organization = required;
        self
    }

    /// 是否要求国家代码
    pub fn with_require_country(mut self, required: bool) -> Self {
        self.policy.naming.require_country = required;
        self
    }

    /// 设置通用名称最大长度
    pub fn with_max_common_name_length(mut self, length: usize) -> Self {
        self.policy.naming.max_common_name_length = length;
        self
    }

    /// 设置允许的国家代码
    pub fn with_allowed_countries(mut self, countries: Vec<String>) -> Self {
        self.policy.naming.allowed_countries = Some(countries);
        self
    }

    /// 设置续期提示天数
    pub fn with_renewal_warning_days(mut self, days: i64) -> Self {
        self.policy.lifecycle.renewal_warning_days = days;
        self
    }

    /// 构建并验证策略
    pub fn build(self) -> Result<Policy, PolicyConfigError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
