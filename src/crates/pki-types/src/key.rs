//! 密钥算法与密钥句柄类型

use crate::error::PkiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 未指定时使用的RSA密钥长度，密钥生成与策略校验共用
pub const DEFAULT_RSA_KEY_SIZE: u32 = 2048;

/// 未指定时使用的椭圆曲线，密钥生成与策略校验共用
pub const DEFAULT_EC_CURVE: EcCurve = EcCurve::Secp256r1;

/// 支持生成的RSA密钥长度
pub const SUPPORTED_RSA_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];

/// 密钥算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA
    #[serde(rename = "RSA")]
    Rsa,
    /// 椭圆曲线
    #[serde(rename = "ECC")]
    Ecc,
}

impl KeyAlgorithm {
    /// 线上名称
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Ecc => "ECC",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RSA" => Ok(KeyAlgorithm::Rsa),
            "ECC" => Ok(KeyAlgorithm::Ecc),
            other => Err(PkiError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// 椭圆曲线
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcCurve {
    /// NIST P-256
    #[serde(rename = "SECP256R1")]
    Secp256r1,
    /// NIST P-384
    #[serde(rename = "SECP384R1")]
    Secp384r1,
    /// NIST P-521
    #[serde(rename = "SECP521R1")]
    Secp521r1,
}

impl EcCurve {
    /// 线上名称
    pub fn as_str(&self) -> &'static str {
        match self {
            EcCurve::Secp256r1 => "SECP256R1",
            EcCurve::Secp384r1 => "SECP384R1",
            EcCurve::Secp521r1 => "SECP521R1",
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EcCurve {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SECP256R1" => Ok(EcCurve::Secp256r1),
            "SECP384R1" => Ok(EcCurve::Secp384r1),
            "SECP521R1" => Ok(EcCurve::Secp521r1),
            other => Err(PkiError::UnsupportedParameter(format!("curve '{}'", other))),
        }
    }
}

/// 密钥句柄
///
/// 只描述密钥的公开属性，私钥材料留在密钥库内部，从不序列化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterialRef {
    /// 调用方指定的密钥标识
    pub key_id: String,
    /// 密钥算法
    pub algorithm: KeyAlgorithm,
    /// RSA密钥长度（仅RSA）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    /// 椭圆曲线（仅ECC）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve: Option<EcCurve>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl KeyMaterialRef {
    /// 人类可读的密钥描述，例如 `RSA-4096` 或 `ECC-SECP256R1`
    pub fn describe(&self) -> String {
        describe_key(self.algorithm, self.key_size, self.curve)
    }
}

/// 渲染密钥描述字符串
pub fn describe_key(algorithm: KeyAlgorithm, key_size: Option<u32>, curve: Option<EcCurve>) -> String {
    match (algorithm, key_size, curve) {
        (KeyAlgorithm::Rsa, Some(size), _) => format!("RSA-{}", size),
        (KeyAlgorithm::Ecc, _, Some(curve)) => format!("ECC-{}", curve),
        (algorithm, _, _) => algorithm.to_string(),
    }
}
