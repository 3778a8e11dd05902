//! # 证书颁发机构
//!
//! 引擎启动时创建一次自签名根CA，之后用它把 CSR 签发为终端证书，
//! 以及为已有证书续期。签发器本身不做策略检查。
//!
//! 序列号由 [`SerialNumberSource`] 提供，签发器对照自己签发过的全部序列号
//! 去重，最多尝试 [`MAX_SERIAL_ATTEMPTS`] 次。

use crate::csr::{distinguished_name, inspect_request, request_template, InspectedRequest, RequestTemplate};
use crate::keystore::KeySpec;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;
use pki_types::{
    Certificate, EcCurve, ExtendedKeyUsage, KeyAlgorithm, KeyUsage, PkiError, PkiResult,
    SubjectName,
};
use rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 每次分配序列号的最大尝试次数
pub const MAX_SERIAL_ATTEMPTS: usize = 8;

/// CA证书附带的提示
pub const DEMO_CA_NOTICE: &str = "This is a DEMO CA for testing only - not for production use";

/// 序列号来源
pub trait SerialNumberSource: Send + Sync {
    /// 生成一个候选序列号（大端字节）
    fn next_serial(&self) -> Vec<u8>;
}

/// 随机序列号来源
///
/// 以 UUID v4 作为熵源，最高位清零保证为正数，首字节非零。
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSerialSource;

impl SerialNumberSource for RandomSerialSource {
    fn next_serial(&self) -> Vec<u8> {
        let mut bytes = *uuid::Uuid::new_v4().as_bytes();
        bytes[0] = (bytes[0] & 0x7f) | 0x01;
        bytes.to_vec()
    }
}

/// CA配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub common_name: String,
    pub organization: String,
    pub country: String,
    pub state: String,
    pub locality: String,
    /// CA证书有效期（天）
    pub validity_days: u32,
    pub key_algorithm: KeyAlgorithm,
    pub key_size: Option<u32>,
    pub curve: Option<EcCurve>,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            common_name: "Demo Root CA".to_string(),
            organization: "Demo CA Organization".to_string(),
            country: "US".to_string(),
            state: "Demo State".to_string(),
            locality: "Demo City".to_string(),
            validity_days: 3650,
            key_algorithm: KeyAlgorithm::Ecc,
            key_size: None,
            curve: Some(EcCurve::Secp256r1),
        }
    }
}

impl AuthorityConfig {
    /// CA主体
    pub fn subject(&self) -> SubjectName {
        SubjectName {
            common_name: self.common_name.clone(),
            organization: Some(self.organization.clone()),
            organizational_unit: None,
            country: Some(self.country.clone()),
            state: Some(self.state.clone()),
            locality: Some(self.locality.clone()),
        }
    }
}

/// CA证书信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityCertificate {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_algorithm: String,
    pub fingerprint: String,
    pub certificate_pem: String,
    pub is_ca: bool,
    pub production_ready: bool,
    pub notice: String,
}

struct SignedOutput {
    serial_number: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    certificate_pem: String,
    fingerprint: String,
}

/// CA签发器
pub struct CaSigner {
    issuer: Issuer<'static, KeyPair>,
    identity: AuthorityCertificate,
    serial_source: Arc<dyn SerialNumberSource>,
    issued_serials: Mutex<HashSet<String>>,
}

impl CaSigner {
    /// 使用随机序列号来源创建CA
    pub fn new(config: &AuthorityConfig) -> PkiResult<Self> {
        Self::with_serial_source(config, Arc::new(RandomSerialSource))
    }

    /// 使用指定序列号来源创建CA
    pub fn with_serial_source(
        config: &AuthorityConfig,
        serial_source: Arc<dyn SerialNumberSource>,
    ) -> PkiResult<Self> {
        info!("创建证书颁发机构: {}", config.common_name);

        let spec = KeySpec::resolve(config.key_algorithm, config.key_size, config.curve)?;
        let key_pair = spec.generate()?;
        let subject = config.subject();
        let subject_text = subject.to_string();

        let mut issued_serials = HashSet::new();
        let serial = serial_source.next_serial();
        let serial_number = hex::encode_upper(&serial);
        issued_serials.insert(serial_number.clone());

        let (not_before, not_after) = validity_window(i64::from(config.validity_days))?;
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&subject);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| PkiError::Crypto(format!("CA self-signing failed: {}", e)))?;

        let identity = AuthorityCertificate {
            subject: subject_text.clone(),
            issuer: subject_text,
            serial_number,
            not_before,
            not_after,
            key_algorithm: spec.describe(),
            fingerprint: fingerprint(cert.der()),
            certificate_pem: cert.pem(),
            is_ca: true,
            production_ready: false,
            notice: DEMO_CA_NOTICE.to_string(),
        };

        info!("证书颁发机构创建完成 (指纹: {})", identity.fingerprint);
        Ok(Self {
            issuer: Issuer::new(params, key_pair),
            identity,
            serial_source,
            issued_serials: Mutex::new(issued_serials),
        })
    }

    /// CA证书信息
    pub fn ca_certificate(&self) -> &AuthorityCertificate {
        &self.identity
    }

    /// CA身份，即签发证书的颁发者名称
    pub fn issuer_name(&self) -> &str {
        &self.identity.subject
    }

    /// 签发 PEM 格式的 CSR
    ///
    /// # 参数
    ///
    /// * `csr_pem` - PEM 格式的证书签名请求
    /// * `validity_days` - 有效期天数
    /// * `key_usages` - 密钥用途，未指定时为 `digitalSignature, keyEncipherment`
    /// * `extended_key_usages` - 扩展密钥用途
    pub fn issue(
        &self,
        csr_pem: &str,
        validity_days: i64,
        key_usages: Option<&[KeyUsage]>,
        extended_key_usages: Option<&[ExtendedKeyUsage]>,
    ) -> PkiResult<Certificate> {
        let request = inspect_request(csr_pem)?;
        self.issue_inspected(&request, validity_days, key_usages, extended_key_usages)
    }

    /// 签发已解析并通过签名校验的 CSR
    pub fn issue_inspected(
        &self,
        request: &InspectedRequest,
        validity_days: i64,
        key_usages: Option<&[KeyUsage]>,
        extended_key_usages: Option<&[ExtendedKeyUsage]>,
    ) -> PkiResult<Certificate> {
        let key_usages = match key_usages {
            Some(usages) => usages.to_vec(),
            None => KeyUsage::leaf_defaults(),
        };
        let extended_key_usages = extended_key_usages.map(<[_]>::to_vec).unwrap_or_default();

        let template = request_template(&request.csr_pem)?;
        let signed = self.sign(template, validity_days, &key_usages, &extended_key_usages)?;

        info!("证书签发成功: {} (序列号: {})", request.subject.common_name, signed.serial_number);
        Ok(Certificate {
            serial_number: signed.serial_number,
            subject: request.subject.clone(),
            issuer: self.issuer_name().to_string(),
            not_before: signed.not_before,
            not_after: signed.not_after,
            key_usages,
            extended_key_usages,
            san_dns: request.san_dns.clone(),
            key_algorithm: request.key_description(),
            fingerprint: signed.fingerprint,
            certificate_pem: signed.certificate_pem,
            request_pem: request.csr_pem.clone(),
        })
    }

    /// 为已有证书续期
    ///
    /// 主体、公钥和备用名称从存储的 CSR 恢复，用途沿用原证书，
    /// 序列号和有效期重新生成。不修改原证书。
    pub fn renew(&self, existing: &Certificate, validity_days: i64) -> PkiResult<Certificate> {
        let template = request_template(&existing.request_pem)?;
        let signed = self.sign(
            template,
            validity_days,
            &existing.key_usages,
            &existing.extended_key_usages,
        )?;

        info!(
            "证书续期成功: {} -> {}",
            existing.serial_number, signed.serial_number
        );
        Ok(Certificate {
            serial_number: signed.serial_number,
            subject: existing.subject.clone(),
            issuer: self.issuer_name().to_string(),
            not_before: signed.not_before,
            not_after: signed.not_after,
            key_usages: existing.key_usages.clone(),
            extended_key_usages: existing.extended_key_usages.clone(),
            san_dns: existing.san_dns.clone(),
            key_algorithm: existing.key_algorithm.clone(),
            fingerprint: signed.fingerprint,
            certificate_pem: signed.certificate_pem,
            request_pem: existing.request_pem.clone(),
        })
    }

    /// 签发器已分配的序列号数量（包括CA自身）
    pub fn issued_serial_count(&self) -> usize {
        self.issued_serials.lock().len()
    }

    fn sign(
        &self,
        template: RequestTemplate,
        validity_days: i64,
        key_usages: &[KeyUsage],
        extended_key_usages: &[ExtendedKeyUsage],
    ) -> PkiResult<SignedOutput> {
        let (not_before, not_after) = validity_window(validity_days)?;
        let serial = self.allocate_serial()?;
        let serial_number = hex::encode_upper(&serial);

        let RequestTemplate { mut params, public_key } = template;
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = key_usages.iter().map(key_usage_purpose).collect();
        params.extended_key_usages = extended_key_usages.iter().map(extended_key_usage_purpose).collect();

        let cert = params
            .signed_by(&public_key, &self.issuer)
            .map_err(|e| PkiError::Crypto(format!("certificate signing failed: {}", e)))?;

        debug!("签名完成: 序列号 {}", serial_number);
        Ok(SignedOutput {
            serial_number,
            not_before,
            not_after,
            fingerprint: fingerprint(cert.der()),
            certificate_pem: cert.pem(),
        })
    }

    /// 分配一个本CA从未使用过的序列号
    fn allocate_serial(&self) -> PkiResult<Vec<u8>> {
        let mut issued = self.issued_serials.lock();
        for attempt in 1..=MAX_SERIAL_ATTEMPTS {
            let serial = self.serial_source.next_serial();
            if issued.insert(hex::encode_upper(&serial)) {
                return Ok(serial);
            }
            warn!("序列号冲突，第 {} 次尝试", attempt);
        }
        Err(PkiError::IdentifierCollision(format!(
            "no unique serial number after {} attempts",
            MAX_SERIAL_ATTEMPTS
        )))
    }
}

/// 以当前时间（整秒）为起点的有效期
pub fn validity_window(validity_days: i64) -> PkiResult<(DateTime<Utc>, DateTime<Utc>)> {
    if validity_days < 0 {
        return Err(PkiError::UnsupportedParameter(format!(
            "validity_days {} must not be negative",
            validity_days
        )));
    }
    let span = Duration::try_days(validity_days).ok_or_else(|| {
        PkiError::UnsupportedParameter(format!("validity_days {} out of range", validity_days))
    })?;
    let not_before = Utc::now().trunc_subsecs(0);
    let not_after = not_before.checked_add_signed(span).ok_or_else(|| {
        PkiError::UnsupportedParameter(format!("validity_days {} out of range", validity_days))
    })?;
    Ok((not_before, not_after))
}

fn to_offset(timestamp: DateTime<Utc>) -> PkiResult<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(timestamp.timestamp())
        .map_err(|e| PkiError::UnsupportedParameter(format!("validity window out of range: {}", e)))
}

/// DER 的 SHA-256 指纹
fn fingerprint(der: &[u8]) -> String {
    format!("{:x}", Sha256::digest(der))
}

fn key_usage_purpose(usage: &KeyUsage) -> KeyUsagePurpose {
    match usage {
        KeyUsage::DigitalSignature => KeyUsagePurpose::DigitalSignature,
        KeyUsage::ContentCommitment => KeyUsagePurpose::ContentCommitment,
        KeyUsage::KeyEncipherment => KeyUsagePurpose::KeyEncipherment,
        KeyUsage::DataEncipherment => KeyUsagePurpose::DataEncipherment,
        KeyUsage::KeyAgreement => KeyUsagePurpose::KeyAgreement,
        KeyUsage::KeyCertSign => KeyUsagePurpose::KeyCertSign,
        KeyUsage::CrlSign => KeyUsagePurpose::CrlSign,
        KeyUsage::EncipherOnly => KeyUsagePurpose::EncipherOnly,
        KeyUsage::DecipherOnly => KeyUsagePurpose::DecipherOnly,
    }
}

fn extended_key_usage_purpose(usage: &ExtendedKeyUsage) -> ExtendedKeyUsagePurpose {
    match usage {
        ExtendedKeyUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsage::CodeSigning => ExtendedKeyUsagePurpose::CodeSigning,
        ExtendedKeyUsage::EmailProtection => ExtendedKeyUsagePurpose::EmailProtection,
        ExtendedKeyUsage::TimeStamping => ExtendedKeyUsagePurpose::TimeStamping,
        ExtendedKeyUsage::OcspSigning => ExtendedKeyUsagePurpose::OcspSigning,
    }
}
