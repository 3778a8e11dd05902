//! # 证书签名请求解析
//!
//! 解码 PEM 格式的 CSR，校验自签名，提取主体、DNS 备用名称和公钥参数。
//! 解码失败返回 `MalformedRequest`，签名校验失败返回 `InvalidSignature`，
//! 无法校验的签名算法返回 `UnsupportedParameter`。
//!
//! 签发时使用 [`request_template`]，它把 CSR 中的完整备用名称扩展
//! （DNS、IP、邮箱、URI）和公钥原样带入证书参数。

use aws_lc_rs::signature::{UnparsedPublicKey, ECDSA_P521_SHA512_ASN1};
use pki_types::key::describe_key;
use pki_types::{EcCurve, KeyAlgorithm, PkiError, PkiResult, SubjectName};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, PublicKeyData, SanType, SignatureAlgorithm,
    PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_ECDSA_P521_SHA512, PKCS_RSA_SHA256,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::error::X509Error;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::{AttributeTypeAndValue, SubjectPublicKeyInfo, X509Name};

/// CSR 的 PEM 标签
pub const CSR_PEM_TAG: &str = "CERTIFICATE REQUEST";

/// ecdsa-with-SHA512
const ECDSA_WITH_SHA512_OID: &str = "1.2.840.10045.4.3.4";

/// 解析后的签名请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedRequest {
    /// 请求主体
    pub subject: SubjectName,
    /// DNS 主体备用名称，保持请求中的顺序
    ///
    /// 仅用于展示和策略输入。签发时以 CSR 中的完整备用名称扩展为准。
    pub san_dns: Vec<String>,
    /// 公钥算法
    pub key_algorithm: KeyAlgorithm,
    /// RSA 模数位数
    pub key_size: Option<u32>,
    /// 椭圆曲线
    pub curve: Option<EcCurve>,
    /// 原始 PEM
    pub csr_pem: String,
}

impl InspectedRequest {
    /// 公钥描述，例如 `RSA-4096`
    pub fn key_description(&self) -> String {
        describe_key(self.key_algorithm, self.key_size, self.curve)
    }
}

/// 解码 CSR 的 PEM 外壳
pub fn decode_request_pem(csr_pem: &str) -> PkiResult<Vec<u8>> {
    let block = pem::parse(csr_pem.trim())
        .map_err(|e| PkiError::MalformedRequest(format!("CSR is not valid PEM: {}", e)))?;

    if block.tag() != CSR_PEM_TAG {
        return Err(PkiError::MalformedRequest(format!(
            "expected PEM block '{}', found '{}'",
            CSR_PEM_TAG,
            block.tag()
        )));
    }

    Ok(block.into_contents())
}

/// CSR 中的公钥，按密钥类型对应 rcgen 的签名算法
#[derive(Debug, Clone)]
pub struct RequestPublicKey {
    der: Vec<u8>,
    algorithm: &'static SignatureAlgorithm,
}

impl PublicKeyData for RequestPublicKey {
    fn der_bytes(&self) -> &[u8] {
        &self.der
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        self.algorithm
    }
}

/// 由 CSR 构造的证书模板
///
/// `params` 只包含主体和备用名称，序列号、有效期和用途由签发方填写。
#[derive(Debug)]
pub struct RequestTemplate {
    pub params: CertificateParams,
    pub public_key: RequestPublicKey,
}

/// 解析 CSR 并要求自签名有效
pub fn inspect_request(csr_pem: &str) -> PkiResult<InspectedRequest> {
    let (request, signature_valid) = read_request(csr_pem)?;
    if !signature_valid {
        return Err(PkiError::InvalidSignature(
            "CSR self-signature verification failed".to_string(),
        ));
    }
    Ok(request)
}

/// 解析 CSR，签名校验结果作为返回值的一部分
///
/// # 返回值
///
/// 返回解析结果和签名是否有效
pub fn read_request(csr_pem: &str) -> PkiResult<(InspectedRequest, bool)> {
    let der = decode_request_pem(csr_pem)?;
    let (_, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| PkiError::MalformedRequest(format!("CSR DER decoding failed: {}", e)))?;

    let info = &csr.certification_request_info;
    let subject = subject_from_name(&info.subject)?;
    let (key_algorithm, key_size, curve) = public_key_parameters(&info.subject_pki)?;
    let signature_valid = verify_request_signature(&csr, curve)?;

    let request = InspectedRequest {
        subject,
        san_dns: requested_dns_names(&csr),
        key_algorithm,
        key_size,
        curve,
        csr_pem: csr_pem.to_string(),
    };
    Ok((request, signature_valid))
}

/// 由 CSR 构造待签发的证书模板
///
/// 自签名无效时返回 `InvalidSignature`。
pub fn request_template(csr_pem: &str) -> PkiResult<RequestTemplate> {
    let der = decode_request_pem(csr_pem)?;
    let (_, csr) = X509CertificationRequest::from_der(&der)
        .map_err(|e| PkiError::MalformedRequest(format!("CSR DER decoding failed: {}", e)))?;

    let info = &csr.certification_request_info;
    let (key_algorithm, _, curve) = public_key_parameters(&info.subject_pki)?;
    if !verify_request_signature(&csr, curve)? {
        return Err(PkiError::InvalidSignature(
            "CSR self-signature verification failed".to_string(),
        ));
    }

    let algorithm: &'static SignatureAlgorithm = match (key_algorithm, curve) {
        (KeyAlgorithm::Rsa, _) => &PKCS_RSA_SHA256,
        (KeyAlgorithm::Ecc, Some(EcCurve::Secp384r1)) => &PKCS_ECDSA_P384_SHA384,
        (KeyAlgorithm::Ecc, Some(EcCurve::Secp521r1)) => &PKCS_ECDSA_P521_SHA512,
        (KeyAlgorithm::Ecc, _) => &PKCS_ECDSA_P256_SHA256,
    };

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(&subject_from_name(&info.subject)?);
    params.subject_alt_names = requested_alt_names(&csr)?;

    Ok(RequestTemplate {
        params,
        public_key: RequestPublicKey {
            der: info.subject_pki.subject_public_key.data.to_vec(),
            algorithm,
        },
    })
}

/// 校验 CSR 自签名
///
/// P-521 + SHA-512 由 aws-lc 校验，其他无法校验的算法返回 `UnsupportedParameter`。
fn verify_request_signature(
    csr: &X509CertificationRequest<'_>,
    curve: Option<EcCurve>,
) -> PkiResult<bool> {
    match csr.verify_signature() {
        Ok(()) => Ok(true),
        Err(X509Error::SignatureUnsupportedAlgorithm) => {
            let algorithm = csr.signature_algorithm.algorithm.to_id_string();
            if curve == Some(EcCurve::Secp521r1) && algorithm == ECDSA_WITH_SHA512_OID {
                let info = &csr.certification_request_info;
                let key = UnparsedPublicKey::new(
                    &ECDSA_P521_SHA512_ASN1,
                    info.subject_pki.subject_public_key.data.as_ref(),
                );
                return Ok(key.verify(info.raw, csr.signature_value.data.as_ref()).is_ok());
            }
            Err(PkiError::UnsupportedParameter(format!(
                "CSR signature algorithm {} cannot be verified",
                algorithm
            )))
        }
        Err(_) => Ok(false),
    }
}

/// 把主体名称转换为 rcgen 的可分辨名称
pub fn distinguished_name(subject: &SubjectName) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, subject.common_name.as_str());
    let optional = [
        (DnType::OrganizationName, &subject.organization),
        (DnType::OrganizationalUnitName, &subject.organizational_unit),
        (DnType::CountryName, &subject.country),
        (DnType::StateOrProvinceName, &subject.state),
        (DnType::LocalityName, &subject.locality),
    ];
    for (dn_type, value) in optional {
        if let Some(value) = value {
            dn.push(dn_type, value.as_str());
        }
    }
    dn
}

/// 把 DNS 名称列表转换为 rcgen 的备用名称
pub fn dns_alt_names(names: &[String]) -> PkiResult<Vec<SanType>> {
    names
        .iter()
        .map(|name| {
            name.clone()
                .try_into()
                .map(SanType::DnsName)
                .map_err(|e| PkiError::UnsupportedParameter(format!("DNS name '{}': {}", name, e)))
        })
        .collect()
}

fn first_attribute<'b, 'a: 'b>(
    mut values: impl Iterator<Item = &'b AttributeTypeAndValue<'a>>,
) -> PkiResult<Option<String>> {
    match values.next() {
        None => Ok(None),
        Some(attribute) => attribute
            .as_str()
            .map(|value| Some(value.to_string()))
            .map_err(|e| PkiError::MalformedRequest(format!("subject attribute decoding failed: {}", e))),
    }
}

fn subject_from_name(name: &X509Name<'_>) -> PkiResult<SubjectName> {
    Ok(SubjectName {
        common_name: first_attribute(name.iter_common_name())?.unwrap_or_default(),
        organization: first_attribute(name.iter_organization())?,
        organizational_unit: first_attribute(name.iter_organizational_unit())?,
        country: first_attribute(name.iter_country())?,
        state: first_attribute(name.iter_state_or_province())?,
        locality: first_attribute(name.iter_locality())?,
    })
}

fn requested_dns_names(csr: &X509CertificationRequest<'_>) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for general_name in &san.general_names {
                    if let GeneralName::DNSName(dns) = general_name {
                        names.push(dns.to_string());
                    }
                }
            }
        }
    }
    names
}

fn requested_alt_names(csr: &X509CertificationRequest<'_>) -> PkiResult<Vec<SanType>> {
    let mut names = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for general_name in &san.general_names {
                    names.push(alt_name(general_name)?);
                }
            }
        }
    }
    Ok(names)
}

fn alt_name(name: &GeneralName<'_>) -> PkiResult<SanType> {
    let invalid = |e: rcgen::Error| PkiError::MalformedRequest(format!("subject alternative name: {}", e));
    match name {
        GeneralName::DNSName(dns) => Ok(SanType::DnsName((*dns).try_into().map_err(invalid)?)),
        GeneralName::RFC822Name(email) => Ok(SanType::Rfc822Name((*email).try_into().map_err(invalid)?)),
        GeneralName::URI(uri) => Ok(SanType::URI((*uri).try_into().map_err(invalid)?)),
        GeneralName::IPAddress(octets) => {
            let address = if let Ok(v4) = <[u8; 4]>::try_from(*octets) {
                IpAddr::V4(Ipv4Addr::from(v4))
            } else if let Ok(v6) = <[u8; 16]>::try_from(*octets) {
                IpAddr::V6(Ipv6Addr::from(v6))
            } else {
                return Err(PkiError::MalformedRequest(format!(
                    "IP address of {} bytes in subject alternative name",
                    octets.len()
                )));
            };
            Ok(SanType::IpAddress(address))
        }
        other => Err(PkiError::UnsupportedParameter(format!(
            "subject alternative name {:?}",
            other
        ))),
    }
}

fn public_key_parameters(
    spki: &SubjectPublicKeyInfo<'_>,
) -> PkiResult<(KeyAlgorithm, Option<u32>, Option<EcCurve>)> {
    let parsed = spki
        .parsed()
        .map_err(|e| PkiError::MalformedRequest(format!("public key decoding failed: {}", e)))?;

    match parsed {
        PublicKey::RSA(rsa) => Ok((KeyAlgorithm::Rsa, Some(modulus_bits(rsa.modulus)), None)),
        PublicKey::EC(point) => {
            let curve = match point.key_size() {
                256 => EcCurve::Secp256r1,
                384 => EcCurve::Secp384r1,
                521 | 528 => EcCurve::Secp521r1,
                other => {
                    return Err(PkiError::UnsupportedParameter(format!(
                        "EC public key of {} bits",
                        other
                    )))
                }
            };
            Ok((KeyAlgorithm::Ecc, None, Some(curve)))
        }
        _ => Err(PkiError::UnsupportedAlgorithm(spki.algorithm.algorithm.to_id_string())),
    }
}

/// RSA 模数的有效位数
fn modulus_bits(modulus: &[u8]) -> u32 {
    let significant: &[u8] = match modulus.iter().position(|byte| *byte != 0) {
        Some(start) => &modulus[start..],
        None => return 0,
    };
    (significant.len() as u32 - 1) * 8 + (8 - significant[0].leading_zeros())
}
