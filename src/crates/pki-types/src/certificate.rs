//! # 证书相关类型
//!
//! 证书签名请求、已签发证书以及注册表记录。记录的 `expired` 状态从不存储，
//! 只在读取时根据 `not_after` 与当前时间推导。

use crate::error::PkiError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 证书主体名称
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectName {
    /// 通用名称 (CN)
    pub common_name: String,
    /// 组织 (O)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// 组织单位 (OU)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
    /// 国家代码 (C)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// 州/省 (ST)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// 城市 (L)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl SubjectName {
    /// 仅包含通用名称的主体
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Default::default()
        }
    }

    /// 设置组织
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// 设置国家代码
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

impl fmt::Display for SubjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(6);
        if !self.common_name.is_empty() {
            parts.push(format!("CN={}", self.common_name));
        }
        let optional = [
            ("O", &self.organization),
            ("OU", &self.organizational_unit),
            ("C", &self.country),
            ("ST", &self.state),
            ("L", &self.locality),
        ];
        for (tag, value) in optional {
            if let Some(value) = value {
                parts.push(format!("{}={}", tag, value));
            }
        }
        f.write_str(&parts.join(","))
    }
}

/// 密钥用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    #[serde(rename = "digitalSignature")]
    DigitalSignature,
    #[serde(rename = "contentCommitment")]
    ContentCommitment,
    #[serde(rename = "keyEncipherment")]
    KeyEncipherment,
    #[serde(rename = "dataEncipherment")]
    DataEncipherment,
    #[serde(rename = "keyAgreement")]
    KeyAgreement,
    #[serde(rename = "keyCertSign")]
    KeyCertSign,
    #[serde(rename = "cRLSign")]
    CrlSign,
    #[serde(rename = "encipherOnly")]
    EncipherOnly,
    #[serde(rename = "decipherOnly")]
    DecipherOnly,
}

impl KeyUsage {
    /// 线上名称
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "digitalSignature",
            KeyUsage::ContentCommitment => "contentCommitment",
            KeyUsage::KeyEncipherment => "keyEncipherment",
            KeyUsage::DataEncipherment => "dataEncipherment",
            KeyUsage::KeyAgreement => "keyAgreement",
            KeyUsage::KeyCertSign => "keyCertSign",
            KeyUsage::CrlSign => "cRLSign",
            KeyUsage::EncipherOnly => "encipherOnly",
            KeyUsage::DecipherOnly => "decipherOnly",
        }
    }

    /// 签发终端证书时的默认用途
    pub fn leaf_defaults() -> Vec<KeyUsage> {
        vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUsage {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let usage = match s {
            "digitalSignature" => KeyUsage::DigitalSignature,
            "contentCommitment" => KeyUsage::ContentCommitment,
            "keyEncipherment" => KeyUsage::KeyEncipherment,
            "dataEncipherment" => KeyUsage::DataEncipherment,
            "keyAgreement" => KeyUsage::KeyAgreement,
            "keyCertSign" => KeyUsage::KeyCertSign,
            "cRLSign" => KeyUsage::CrlSign,
            "encipherOnly" => KeyUsage::EncipherOnly,
            "decipherOnly" => KeyUsage::DecipherOnly,
            other => return Err(PkiError::UnsupportedParameter(format!("key usage '{}'", other))),
        };
        Ok(usage)
    }
}

/// 扩展密钥用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtendedKeyUsage {
    #[serde(rename = "serverAuth")]
    ServerAuth,
    #[serde(rename = "clientAuth")]
    ClientAuth,
    #[serde(rename = "codeSigning")]
    CodeSigning,
    #[serde(rename = "emailProtection")]
    EmailProtection,
    #[serde(rename = "timeStamping")]
    TimeStamping,
    #[serde(rename = "OCSPSigning")]
    OcspSigning,
}

impl ExtendedKeyUsage {
    /// 线上名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtendedKeyUsage::ServerAuth => "serverAuth",
            ExtendedKeyUsage::ClientAuth => "clientAuth",
            ExtendedKeyUsage::CodeSigning => "codeSigning",
            ExtendedKeyUsage::EmailProtection => "emailProtection",
            ExtendedKeyUsage::TimeStamping => "timeStamping",
            ExtendedKeyUsage::OcspSigning => "OCSPSigning",
        }
    }
}

impl fmt::Display for ExtendedKeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtendedKeyUsage {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let usage = match s {
            "serverAuth" => ExtendedKeyUsage::ServerAuth,
            "clientAuth" => ExtendedKeyUsage::ClientAuth,
            "codeSigning" => ExtendedKeyUsage::CodeSigning,
            "emailProtection" => ExtendedKeyUsage::EmailProtection,
            "timeStamping" => ExtendedKeyUsage::TimeStamping,
            "OCSPSigning" => ExtendedKeyUsage::OcspSigning,
            other => {
                return Err(PkiError::UnsupportedParameter(format!(
                    "extended key usage '{}'",
                    other
                )))
            }
        };
        Ok(usage)
    }
}

/// 证书签名请求
///
/// 创建后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// CSR 标识，形如 `csr_<key_id>`
    pub csr_id: String,
    /// 生成该请求的密钥标识
    pub key_id: String,
    /// 请求主体
    pub subject: SubjectName,
    /// 请求的 DNS 主体备用名称，仅用于展示
    pub san_dns: Vec<String>,
    /// PEM 编码
    pub csr_pem: String,
    /// 自签名是否有效
    pub signature_valid: bool,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

/// 已签发证书
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// 序列号（大写十六进制）
    pub serial_number: String,
    /// 主体
    pub subject: SubjectName,
    /// 颁发者（始终为 CA 身份）
    pub issuer: String,
    /// 生效时间
    pub not_before: DateTime<Utc>,
    /// 失效时间
    pub not_after: DateTime<Utc>,
    /// 密钥用途
    pub key_usages: Vec<KeyUsage>,
    /// 扩展密钥用途
    pub extended_key_usages: Vec<ExtendedKeyUsage>,
    /// DNS 主体备用名称，仅用于展示
    ///
    /// 证书本身的备用名称扩展从 CSR 原样复制，可能还包含 IP、邮箱和 URI。
    pub san_dns: Vec<String>,
    /// 公钥描述，例如 `RSA-4096`
    pub key_algorithm: String,
    /// DER 的 SHA-256 指纹（小写十六进制）
    pub fingerprint: String,
    /// PEM 编码
    pub certificate_pem: String,
    /// 签发所依据的 CSR，续期时用于恢复公钥
    #[serde(default, skip_serializing)]
    pub request_pem: String,
}

impl Certificate {
    /// 有效期长度
    pub fn validity_period(&self) -> Duration {
        self.not_after - self.not_before
    }

    /// 有效期天数
    pub fn validity_days(&self) -> i64 {
        self.validity_period().num_days()
    }

    /// 在给定时刻是否已过期
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }
}

/// 存储的证书状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    /// 有效（初始状态）
    Active,
    /// 已吊销（终止状态）
    Revoked,
    /// 已被续期证书取代
    Superseded,
}

impl CertificateStatus {
    /// 线上名称
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Active => "active",
            CertificateStatus::Revoked => "revoked",
            CertificateStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 证书列表过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    /// 存储为有效且未过期
    Active,
    /// 已吊销
    Revoked,
    /// 已被取代
    Superseded,
    /// 存储为有效但已过期
    Expired,
    /// 全部
    #[default]
    All,
}

impl FromStr for StatusFilter {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(StatusFilter::Active),
            "revoked" => Ok(StatusFilter::Revoked),
            "superseded" => Ok(StatusFilter::Superseded),
            "expired" => Ok(StatusFilter::Expired),
            "all" => Ok(StatusFilter::All),
            other => Err(PkiError::UnsupportedParameter(format!("status filter '{}'", other))),
        }
    }
}

/// 注册表中的证书记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// 证书标识
    pub cert_id: String,
    /// 证书
    pub certificate: Certificate,
    /// 存储状态
    pub status: CertificateStatus,
    /// 签发时间
    pub issued_at: DateTime<Utc>,
    /// 吊销时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// 吊销原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
    /// 续期时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed_at: Option<DateTime<Utc>>,
    /// 取代本记录的新证书标识
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    /// 本记录续期自的旧证书标识
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renewed_from: Option<String>,
}

impl CertificateRecord {
    /// 新签发的有效记录
    pub fn new_active(cert_id: impl Into<String>, certificate: Certificate, issued_at: DateTime<Utc>) -> Self {
        Self {
            cert_id: cert_id.into(),
            certificate,
            status: CertificateStatus::Active,
            issued_at,
            revoked_at: None,
            revocation_reason: None,
            renewed_at: None,
            superseded_by: None,
            renewed_from: None,
        }
    }

    /// 存储为有效但已过 `not_after`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CertificateStatus::Active && self.certificate.is_expired_at(now)
    }

    /// 读取时的有效状态（`active` 记录可能推导为 `expired`）
    pub fn effective_status_at(&self, now: DateTime<Utc>) -> &'static str {
        if self.is_expired_at(now) {
            "expired"
        } else {
            self.status.as_str()
        }
    }

    /// 是否满足过滤条件
    pub fn matches(&self, filter: StatusFilter, now: DateTime<Utc>) -> bool {
        match filter {
            StatusFilter::All => true,
            StatusFilter::Active => self.status == CertificateStatus::Active && !self.is_expired_at(now),
            StatusFilter::Expired => self.is_expired_at(now),
            StatusFilter::Revoked => self.status == CertificateStatus::Revoked,
            StatusFilter::Superseded => self.status == CertificateStatus::Superseded,
        }
    }
}
