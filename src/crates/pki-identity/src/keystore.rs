//! # 密钥库
//!
//! 生成并持有非对称密钥对，基于这些密钥创建和校验证书签名请求。
//! 私钥只存在于密钥库内部，对外只暴露 [`KeyMaterialRef`] 句柄和公钥 PEM。
//!
//! 密钥生成在阻塞线程池中执行，不持有任何锁。

use crate::audit::AuditLog;
use crate::csr::{distinguished_name, dns_alt_names, read_request};
use chrono::{DateTime, Utc};
use pki_types::key::SUPPORTED_RSA_KEY_SIZES;
use pki_types::{
    AuditOperation, EcCurve, KeyAlgorithm, KeyMaterialRef, PkiError, PkiResult, SigningRequest,
    SubjectName, DEFAULT_EC_CURVE, DEFAULT_RSA_KEY_SIZE,
};
use rcgen::{
    CertificateParams, KeyPair, RsaKeySize, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
    PKCS_ECDSA_P521_SHA512, PKCS_RSA_SHA256,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 解析后的密钥生成参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// RSA，位数
    Rsa(u32),
    /// 椭圆曲线
    Ec(EcCurve),
}

impl KeySpec {
    /// 应用默认值并检查参数
    ///
    /// 未指定的RSA长度和曲线使用与策略警告相同的共享默认值。
    pub fn resolve(
        algorithm: KeyAlgorithm,
        key_size: Option<u32>,
        curve: Option<EcCurve>,
    ) -> PkiResult<Self> {
        match algorithm {
            KeyAlgorithm::Rsa => {
                let size = key_size.unwrap_or(DEFAULT_RSA_KEY_SIZE);
                if !SUPPORTED_RSA_KEY_SIZES.contains(&size) {
                    return Err(PkiError::UnsupportedParameter(format!(
                        "Invalid RSA key size: {}. Must be 2048, 3072, or 4096.",
                        size
                    )));
                }
                Ok(KeySpec::Rsa(size))
            }
            KeyAlgorithm::Ecc => Ok(KeySpec::Ec(curve.unwrap_or(DEFAULT_EC_CURVE))),
        }
    }

    /// 生成密钥对
    pub fn generate(&self) -> PkiResult<KeyPair> {
        let generated = match self {
            KeySpec::Rsa(size) => {
                let rsa_size = match size {
                    2048 => RsaKeySize::_2048,
                    3072 => RsaKeySize::_3072,
                    4096 => RsaKeySize::_4096,
                    other => {
                        return Err(PkiError::UnsupportedParameter(format!(
                            "Invalid RSA key size: {}",
                            other
                        )))
                    }
                };
                KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, rsa_size)
            }
            KeySpec::Ec(EcCurve::Secp256r1) => KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256),
            KeySpec::Ec(EcCurve::Secp384r1) => KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384),
            KeySpec::Ec(EcCurve::Secp521r1) => KeyPair::generate_for(&PKCS_ECDSA_P521_SHA512),
        };
        generated.map_err(|e| PkiError::Crypto(format!("key generation failed: {}", e)))
    }

    /// 密钥描述，例如 `RSA-4096`
    pub fn describe(&self) -> String {
        match self {
            KeySpec::Rsa(size) => format!("RSA-{}", size),
            KeySpec::Ec(curve) => format!("ECC-{}", curve),
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            KeySpec::Rsa(_) => KeyAlgorithm::Rsa,
            KeySpec::Ec(_) => KeyAlgorithm::Ecc,
        }
    }

    /// 构造对外的密钥句柄
    pub fn key_ref(&self, key_id: &str, created_at: DateTime<Utc>) -> KeyMaterialRef {
        let (key_size, curve) = match self {
            KeySpec::Rsa(size) => (Some(*size), None),
            KeySpec::Ec(curve) => (None, Some(*curve)),
        };
        KeyMaterialRef {
            key_id: key_id.to_string(),
            algorithm: self.algorithm(),
            key_size,
            curve,
            created_at,
        }
    }
}

/// 密钥生成结果
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedKey {
    pub key: KeyMaterialRef,
    pub public_key_pem: String,
}

/// 密钥信息查询结果
#[derive(Debug, Clone, Serialize)]
pub struct KeyInfo {
    pub key: KeyMaterialRef,
    pub public_key_pem: String,
    /// 是否已为该密钥创建 CSR
    pub has_csr: bool,
}

/// CSR 校验结果
#[derive(Debug, Clone, Serialize)]
pub struct CsrValidation {
    pub csr_id: String,
    pub signature_valid: bool,
    pub subject: SubjectName,
    pub san_dns: Vec<String>,
    /// 公钥描述，例如 `ECC-SECP256R1`
    pub public_key_algorithm: String,
}

struct StoredKey {
    info: KeyMaterialRef,
    key_pair: Arc<KeyPair>,
    public_key_pem: String,
}

#[derive(Default)]
struct KeyStoreState {
    keys: HashMap<String, StoredKey>,
    requests: HashMap<String, SigningRequest>,
}

/// 密钥库
pub struct KeyStore {
    state: RwLock<KeyStoreState>,
    audit: Arc<AuditLog>,
}

/// CSR 标识
pub fn csr_id_for(key_id: &str) -> String {
    format!("csr_{}", key_id)
}

impl KeyStore {
    /// 创建空的密钥库
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            state: RwLock::new(KeyStoreState::default()),
            audit,
        }
    }

    /// 生成密钥对
    ///
    /// # 参数
    ///
    /// * `algorithm` - `RSA` 或 `ECC`
    /// * `key_id` - 调用方指定的密钥标识，不能与已有密钥重复
    /// * `key_size` - RSA密钥长度，默认 2048
    /// * `curve` - 椭圆曲线名称，默认 SECP256R1
    pub async fn generate_key_pair(
        &self,
        algorithm: &str,
        key_id: &str,
        key_size: Option<u32>,
        curve: Option<&str>,
    ) -> PkiResult<GeneratedKey> {
        let algorithm: KeyAlgorithm = algorithm.parse()?;
        let curve = curve.map(str::parse::<EcCurve>).transpose()?;
        let spec = KeySpec::resolve(algorithm, key_size, curve)?;

        if self.state.read().await.keys.contains_key(key_id) {
            return Err(PkiError::IdentifierCollision(format!("key '{}' already exists", key_id)));
        }

        info!("生成密钥对: {} ({:?})", key_id, spec);
        let key_pair = tokio::task::spawn_blocking(move || spec.generate())
            .await
            .map_err(|e| PkiError::Crypto(format!("key generation task failed: {}", e)))??;
        let public_key_pem = key_pair.public_key_pem();

        let mut state = self.state.write().await;
        if state.keys.contains_key(key_id) {
            warn!("密钥标识在生成期间被占用: {}", key_id);
            return Err(PkiError::IdentifierCollision(format!("key '{}' already exists", key_id)));
        }

        let info = spec.key_ref(key_id, Utc::now());
        state.keys.insert(
            key_id.to_string(),
            StoredKey {
                info: info.clone(),
                key_pair: Arc::new(key_pair),
                public_key_pem: public_key_pem.clone(),
            },
        );
        self.audit.append(
            AuditOperation::GenerateKeyPair,
            json!({
                "key_id": key_id,
                "algorithm": info.algorithm,
                "key_size": info.key_size,
                "curve": info.curve,
            }),
        );
        drop(state);

        info!("密钥对生成成功: {} ({})", key_id, info.describe());
        Ok(GeneratedKey {
            key: info,
            public_key_pem,
        })
    }

    /// 基于已有密钥创建证书签名请求
    ///
    /// CSR 标识为 `csr_<key_id>`，每个密钥只能创建一个。
    pub async fn create_csr(
        &self,
        key_id: &str,
        subject: SubjectName,
        san_dns: Vec<String>,
    ) -> PkiResult<SigningRequest> {
        let csr_id = csr_id_for(key_id);
        let key_pair = {
            let state = self.state.read().await;
            let stored = state
                .keys
                .get(key_id)
                .ok_or_else(|| PkiError::not_found("Key", key_id))?;
            if state.requests.contains_key(&csr_id) {
                return Err(PkiError::IdentifierCollision(format!("CSR '{}' already exists", csr_id)));
            }
            Arc::clone(&stored.key_pair)
        };

        debug!("为密钥 {} 创建CSR: {}", key_id, subject);
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(&subject);
        params.subject_alt_names = dns_alt_names(&san_dns)?;
        let csr_pem = params
            .serialize_request(key_pair.as_ref())
            .map_err(|e| PkiError::Crypto(format!("CSR signing failed: {}", e)))?
            .pem()
            .map_err(|e| PkiError::Crypto(format!("CSR encoding failed: {}", e)))?;

        let request = SigningRequest {
            csr_id: csr_id.clone(),
            key_id: key_id.to_string(),
            subject,
            san_dns,
            csr_pem,
            signature_valid: true,
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        if state.requests.contains_key(&csr_id) {
            return Err(PkiError::IdentifierCollision(format!("CSR '{}' already exists", csr_id)));
        }
        state.requests.insert(csr_id.clone(), request.clone());
        self.audit.append(
            AuditOperation::CreateCsr,
            json!({
                "csr_id": csr_id,
                "key_id": key_id,
                "common_name": request.subject.common_name,
                "organization": request.subject.organization,
            }),
        );
        drop(state);

        info!("CSR创建成功: {}", csr_id);
        Ok(request)
    }

    /// 重新解析已存储的 CSR 并校验其自签名
    pub async fn validate_csr(&self, csr_id: &str) -> PkiResult<CsrValidation> {
        let csr_pem = {
            let state = self.state.read().await;
            state
                .requests
                .get(csr_id)
                .map(|request| request.csr_pem.clone())
                .ok_or_else(|| PkiError::not_found("CSR", csr_id))?
        };

        let (request, signature_valid) = read_request(&csr_pem)?;
        debug!("CSR校验完成: {} (签名有效: {})", csr_id, signature_valid);
        Ok(CsrValidation {
            csr_id: csr_id.to_string(),
            signature_valid,
            public_key_algorithm: request.key_description(),
            subject: request.subject,
            san_dns: request.san_dns,
        })
    }

    /// 查询密钥信息
    pub async fn get_key_info(&self, key_id: &str) -> PkiResult<KeyInfo> {
        let state = self.state.read().await;
        let stored = state
            .keys
            .get(key_id)
            .ok_or_else(|| PkiError::not_found("Key", key_id))?;
        Ok(KeyInfo {
            key: stored.info.clone(),
            public_key_pem: stored.public_key_pem.clone(),
            has_csr: state.requests.contains_key(&csr_id_for(key_id)),
        })
    }

    /// 已生成的密钥数量
    pub async fn key_count(&self) -> usize {
        self.state.read().await.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::inspect_request;

    fn keystore() -> (KeyStore, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new());
        (KeyStore::new(Arc::clone(&audit)), audit)
    }

    #[tokio::test]
    async fn test_generate_ecc_with_default_curve() {
        let (store, audit) = keystore();
        let generated = store
            .generate_key_pair("ECC", "edge", None, None)
            .await
            .expect("生成密钥失败");

        assert_eq!(generated.key.curve, Some(DEFAULT_EC_CURVE), "未指定曲线时使用默认值");
        assert!(generated.public_key_pem.contains("PUBLIC KEY"));
        assert_eq!(audit.len(), 1, "生成密钥应该记录审计");
        assert_eq!(store.key_count().await, 1);
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_parameters() {
        let (store, audit) = keystore();

        let err = store.generate_key_pair("DSA", "k", None, None).await.expect_err("DSA应该被拒绝");
        assert!(matches!(err, PkiError::UnsupportedAlgorithm(_)));

        let err = store
            .generate_key_pair("RSA", "k", Some(1024), None)
            .await
            .expect_err("1024位应该被拒绝");
        assert_eq!(
            err,
            PkiError::UnsupportedParameter("Invalid RSA key size: 1024. Must be 2048, 3072, or 4096.".to_string())
        );

        let err = store
            .generate_key_pair("ECC", "k", None, Some("P-999"))
            .await
            .expect_err("未知曲线应该被拒绝");
        assert!(matches!(err, PkiError::UnsupportedParameter(_)));

        assert!(audit.is_empty(), "失败的操作不应该记录审计");
    }

    #[tokio::test]
    async fn test_duplicate_key_id_collides() {
        let (store, _) = keystore();
        store.generate_key_pair("ECC", "dup", None, None).await.expect("生成密钥失败");
        let err = store
            .generate_key_pair("ECC", "dup", None, Some("SECP384R1"))
            .await
            .expect_err("重复标识应该失败");
        assert!(matches!(err, PkiError::IdentifierCollision(_)));
    }

    #[tokio::test]
    async fn test_create_and_validate_csr() {
        let (store, audit) = keystore();
        store
            .generate_key_pair("ECC", "web", None, Some("SECP384R1"))
            .await
            .expect("生成密钥失败");

        let subject = SubjectName::new("web.example.com")
            .with_organization("Example")
            .with_country("US");
        let request = store
            .create_csr("web", subject.clone(), vec!["web.example.com".to_string()])
            .await
            .expect("创建CSR失败");
        assert_eq!(request.csr_id, "csr_web");

        let inspected = inspect_request(&request.csr_pem).expect("解析CSR失败");
        assert_eq!(inspected.subject, subject);
        assert_eq!(inspected.san_dns, vec!["web.example.com".to_string()]);

        let validation = store.validate_csr("csr_web").await.expect("校验CSR失败");
        assert!(validation.signature_valid);
        assert_eq!(validation.public_key_algorithm, "ECC-SECP384R1");

        let info = store.get_key_info("web").await.expect("查询密钥失败");
        assert!(info.has_csr);
        assert_eq!(audit.len(), 2, "生成密钥和创建CSR各记录一次");

        let err = store
            .create_csr("web", SubjectName::new("again"), Vec::new())
            .await
            .expect_err("重复CSR应该失败");
        assert!(matches!(err, PkiError::IdentifierCollision(_)));
    }

    #[tokio::test]
    async fn test_unknown_identifiers() {
        let (store, _) = keystore();
        let err = store
            .create_csr("missing", SubjectName::new("x"), Vec::new())
            .await
            .expect_err("未知密钥应该失败");
        assert_eq!(err.to_string(), "Key 'missing' not found");

        assert!(matches!(store.validate_csr("csr_missing").await, Err(PkiError::NotFound { .. })));
        assert!(matches!(store.get_key_info("missing").await, Err(PkiError::NotFound { .. })));
    }

    #[test]
    fn test_key_spec_defaults() {
        assert_eq!(
            KeySpec::resolve(KeyAlgorithm::Rsa, None, None).expect("解析失败"),
            KeySpec::Rsa(DEFAULT_RSA_KEY_SIZE)
        );
        assert_eq!(
            KeySpec::resolve(KeyAlgorithm::Ecc, None, Some(EcCurve::Secp521r1)).expect("解析失败"),
            KeySpec::Ec(EcCurve::Secp521r1)
        );
        KeySpec::Ec(EcCurve::Secp521r1).generate().expect("生成P-521密钥失败");
    }

    #[tokio::test]
    async fn test_p521_csr_signature_is_valid() {
        let (store, _) = keystore();
        let generated = store
            .generate_key_pair("ECC", "p521", None, Some("SECP521R1"))
            .await
            .expect("生成密钥失败");
        assert_eq!(generated.key.curve, Some(EcCurve::Secp521r1));

        let request = store
            .create_csr("p521", SubjectName::new("p521.example.com"), vec!["p521.example.com".to_string()])
            .await
            .expect("创建CSR失败");
        let inspected = inspect_request(&request.csr_pem).expect("有效的P-521签名不应该被拒绝");
        assert_eq!(inspected.key_description(), "ECC-SECP521R1");

        let validation = store.validate_csr("csr_p521").await.expect("校验CSR失败");
        assert!(validation.signature_valid, "P-521 CSR签名应该有效");
    }
}
