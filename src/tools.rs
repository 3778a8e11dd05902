//! # 工具调用分发
//!
//! 封闭的工具集合，线上格式为 `{"tool": <名称>, "input": {...}}`。
//! 每次调用返回一个 JSON 对象：成功时带 `success: true` 和操作结果字段，
//! 失败时为 `{success: false, error, error_code, category}`。
//!
//! 未知工具名或缺少必填参数在解码阶段即被拒绝（`MalformedRequest`）。

use crate::app::{IssueRequest, LifecycleOrchestrator};
use chrono::Utc;
use error::ErrorInfo;
use pki_policy::CertificatePolicyRequest;
use pki_types::{CertificateRecord, PkiError, PkiResult, StatusFilter, SubjectName};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

fn default_reason() -> String {
    "unspecified".to_string()
}

fn default_status() -> String {
    "all".to_string()
}

fn default_policy_category() -> String {
    "all".to_string()
}

fn default_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// 工具调用
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", content = "input", rename_all = "snake_case")]
pub enum ToolCall {
    GenerateKeyPair {
        algorithm: String,
        key_id: String,
        key_size: Option<u32>,
        curve: Option<String>,
    },
    CreateCsr {
        key_id: String,
        common_name: String,
        organization: Option<String>,
        organizational_unit: Option<String>,
        country: Option<String>,
        state: Option<String>,
        locality: Option<String>,
        #[serde(default)]
        san_dns: Vec<String>,
    },
    ValidateCsr {
        csr_id: String,
    },
    GetKeyInfo {
        key_id: String,
    },
    IssueCertificate {
        csr_pem: String,
        cert_id: String,
        /// 未指定时使用配置的默认有效期（365 天）
        validity_days: Option<i64>,
        key_usage: Option<Vec<String>>,
        extended_key_usage: Option<Vec<String>>,
    },
    RevokeCertificate {
        cert_id: String,
        #[serde(default = "default_reason")]
        reason: String,
    },
    RenewCertificate {
        cert_id: String,
        validity_days: Option<i64>,
    },
    GetCertificate {
        cert_id: String,
    },
    ListCertificates {
        #[serde(default = "default_status")]
        status: String,
    },
    GetCaCertificate {},
    ValidateKeyPolicy {
        algorithm: String,
        key_size: Option<u32>,
        curve: Option<String>,
    },
    ValidateCertificatePolicy {
        validity_days: i64,
        common_name: Option<String>,
        organization: Option<String>,
        country: Option<String>,
        #[serde(default)]
        key_usage: Vec<String>,
        #[serde(default)]
        extended_key_usage: Vec<String>,
    },
    CheckCertificateExpiry {
        not_valid_after: String,
    },
    GetPolicy {
        #[serde(default = "default_policy_category")]
        policy_category: String,
    },
    ListViolations {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    ComplianceReport {
        #[serde(default = "default_true")]
        include_violations: bool,
    },
    ListOperations {
        #[serde(default = "default_limit")]
        limit: usize,
    },
}

#[derive(Deserialize)]
struct RawCall {
    tool: String,
    #[serde(default)]
    input: Value,
}

impl ToolCall {
    /// 解码一条工具调用
    ///
    /// 省略 `input` 等价于空对象。
    pub fn decode(text: &str) -> PkiResult<Self> {
        let raw: RawCall = serde_json::from_str(text)
            .map_err(|e| PkiError::MalformedRequest(format!("invalid tool call: {}", e)))?;
        Self::from_parts(&raw.tool, raw.input)
    }

    /// 由工具名和参数对象构造调用
    pub fn from_parts(tool: &str, input: Value) -> PkiResult<Self> {
        let input = if input.is_null() { json!({}) } else { input };
        serde_json::from_value(json!({ "tool": tool, "input": input }))
            .map_err(|e| PkiError::MalformedRequest(format!("tool '{}': {}", tool, e)))
    }

    /// 工具名称
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::GenerateKeyPair { .. } => "generate_key_pair",
            ToolCall::CreateCsr { .. } => "create_csr",
            ToolCall::ValidateCsr { .. } => "validate_csr",
            ToolCall::GetKeyInfo { .. } => "get_key_info",
            ToolCall::IssueCertificate { .. } => "issue_certificate",
            ToolCall::RevokeCertificate { .. } => "revoke_certificate",
            ToolCall::RenewCertificate { .. } => "renew_certificate",
            ToolCall::GetCertificate { .. } => "get_certificate",
            ToolCall::ListCertificates { .. } => "list_certificates",
            ToolCall::GetCaCertificate {} => "get_ca_certificate",
            ToolCall::ValidateKeyPolicy { .. } => "validate_key_policy",
            ToolCall::ValidateCertificatePolicy { .. } => "validate_certificate_policy",
            ToolCall::CheckCertificateExpiry { .. } => "check_certificate_expiry",
            ToolCall::GetPolicy { .. } => "get_policy",
            ToolCall::ListViolations { .. } => "list_violations",
            ToolCall::ComplianceReport { .. } => "compliance_report",
            ToolCall::ListOperations { .. } => "list_operations",
        }
    }
}

/// 执行工具调用并生成响应
pub async fn dispatch(orchestrator: &LifecycleOrchestrator, call: ToolCall) -> Value {
    let tool = call.name();
    debug!("执行工具: {}", tool);
    match execute(orchestrator, call).await {
        Ok(payload) => success(payload),
        Err(err) => {
            warn!("工具 {} 执行失败: {}", tool, err);
            failure(&err)
        }
    }
}

/// 解码并执行一行 JSON 文本
pub async fn handle_line(orchestrator: &LifecycleOrchestrator, line: &str) -> Value {
    match ToolCall::decode(line) {
        Ok(call) => dispatch(orchestrator, call).await,
        Err(err) => {
            warn!("工具调用解码失败: {}", err);
            failure(&err)
        }
    }
}

/// 错误响应
pub fn failure(err: &PkiError) -> Value {
    let info = ErrorInfo::from(err.clone());
    let mut response = json!({
        "success": false,
        "error": err.to_string(),
        "error_code": info.code(),
        "category": info.category().as_str(),
        "error_kind": err.kind(),
    });
    if let PkiError::PolicyViolation(violations) = err {
        response["violations"] = json!(violations);
    }
    response
}

fn success(payload: Value) -> Value {
    let mut response = json!({ "success": true });
    if let (Some(fields), Value::Object(payload)) = (response.as_object_mut(), payload) {
        fields.extend(payload);
    }
    response
}

/// 证书记录的线上表示，`status` 为读取时推导的有效状态
fn certificate_view(record: &CertificateRecord, include_pem: bool) -> Value {
    let certificate = &record.certificate;
    let mut view = json!({
        "cert_id": record.cert_id,
        "status": record.effective_status_at(Utc::now()),
        "serial_number": certificate.serial_number,
        "subject": certificate.subject.to_string(),
        "issuer": certificate.issuer,
        "not_valid_before": certificate.not_before,
        "not_valid_after": certificate.not_after,
        "key_algorithm": certificate.key_algorithm,
        "key_usage": certificate.key_usages,
        "extended_key_usage": certificate.extended_key_usages,
        "san_dns": certificate.san_dns,
        "fingerprint": certificate.fingerprint,
        "issued_at": record.issued_at,
        "revoked_at": record.revoked_at,
        "revocation_reason": record.revocation_reason,
        "renewed_at": record.renewed_at,
        "superseded_by": record.superseded_by,
        "renewed_from": record.renewed_from,
    });
    if include_pem {
        view["certificate_pem"] = json!(certificate.certificate_pem);
    }
    view
}

async fn execute(orchestrator: &LifecycleOrchestrator, call: ToolCall) -> PkiResult<Value> {
    match call {
        ToolCall::GenerateKeyPair { algorithm, key_id, key_size, curve } => {
            let generated = orchestrator
                .generate_key_pair(&algorithm, &key_id, key_size, curve.as_deref())
                .await?;
            Ok(json!({
                "key_id": generated.key.key_id,
                "algorithm": generated.key.algorithm,
                "key_size": generated.key.key_size,
                "curve": generated.key.curve,
                "public_key_pem": generated.public_key_pem,
                "message": format!("{} key pair generated", generated.key.describe()),
            }))
        }
        ToolCall::CreateCsr {
            key_id,
            common_name,
            organization,
            organizational_unit,
            country,
            state,
            locality,
            san_dns,
        } => {
            let subject = SubjectName {
                common_name,
                organization,
                organizational_unit,
                country,
                state,
                locality,
            };
            let request = orchestrator.create_csr(&key_id, subject, san_dns).await?;
            Ok(json!({
                "csr_id": request.csr_id,
                "key_id": request.key_id,
                "subject": request.subject.to_string(),
                "san_dns": request.san_dns,
                "csr_pem": request.csr_pem,
            }))
        }
        ToolCall::ValidateCsr { csr_id } => {
            let validation = orchestrator.validate_csr(&csr_id).await?;
            Ok(json!({
                "csr_id": validation.csr_id,
                "valid": validation.signature_valid,
                "signature_valid": validation.signature_valid,
                "subject": validation.subject.to_string(),
                "san_dns": validation.san_dns,
                "public_key_algorithm": validation.public_key_algorithm,
            }))
        }
        ToolCall::GetKeyInfo { key_id } => {
            let info = orchestrator.get_key_info(&key_id).await?;
            Ok(json!({
                "key_id": info.key.key_id,
                "algorithm": info.key.algorithm,
                "key_size": info.key.key_size,
                "curve": info.key.curve,
                "created_at": info.key.created_at,
                "public_key_pem": info.public_key_pem,
                "has_csr": info.has_csr,
            }))
        }
        ToolCall::IssueCertificate {
            csr_pem,
            cert_id,
            validity_days,
            key_usage,
            extended_key_usage,
        } => {
            let record = orchestrator
                .issue_certificate(IssueRequest {
                    cert_id,
                    csr_pem,
                    validity_days,
                    key_usages: key_usage,
                    extended_key_usages: extended_key_usage,
                })
                .await?;
            Ok(certificate_view(&record, true))
        }
        ToolCall::RevokeCertificate { cert_id, reason } => {
            let record = orchestrator.revoke_certificate(&cert_id, &reason).await?;
            Ok(json!({
                "cert_id": record.cert_id,
                "status": record.status,
                "serial_number": record.certificate.serial_number,
                "revoked_at": record.revoked_at,
                "reason": record.revocation_reason,
            }))
        }
        ToolCall::RenewCertificate { cert_id, validity_days } => {
            let outcome = orchestrator.renew_certificate(&cert_id, validity_days).await?;
            let renewed = &outcome.renewed;
            Ok(json!({
                "old_cert_id": outcome.previous.cert_id,
                "new_cert_id": renewed.cert_id,
                "serial_number": renewed.certificate.serial_number,
                "not_valid_before": renewed.certificate.not_before,
                "not_valid_after": renewed.certificate.not_after,
                "fingerprint": renewed.certificate.fingerprint,
                "certificate_pem": renewed.certificate.certificate_pem,
            }))
        }
        ToolCall::GetCertificate { cert_id } => {
            let record = orchestrator.get_certificate(&cert_id).await?;
            Ok(certificate_view(&record, true))
        }
        ToolCall::ListCertificates { status } => {
            let filter: StatusFilter = status.parse()?;
            let records = orchestrator.list_certificates(filter).await;
            let certificates: Vec<Value> =
                records.iter().map(|record| certificate_view(record, false)).collect();
            Ok(json!({
                "status_filter": status,
                "count": certificates.len(),
                "certificates": certificates,
            }))
        }
        ToolCall::GetCaCertificate {} => {
            let ca = orchestrator.ca_certificate();
            Ok(json!({
                "subject": ca.subject,
                "issuer": ca.issuer,
                "serial_number": ca.serial_number,
                "not_valid_before": ca.not_before,
                "not_valid_after": ca.not_after,
                "key_algorithm": ca.key_algorithm,
                "fingerprint": ca.fingerprint,
                "certificate_pem": ca.certificate_pem,
                "is_ca": ca.is_ca,
                "production_ready": ca.production_ready,
                "notice": ca.notice,
            }))
        }
        ToolCall::ValidateKeyPolicy { algorithm, key_size, curve } => {
            let result = orchestrator.validate_key_policy(&algorithm, key_size, curve.as_deref());
            Ok(json!({
                "compliant": result.compliant,
                "violations": result.violations,
                "warnings": result.warnings,
                "message": result.message(),
            }))
        }
        ToolCall::ValidateCertificatePolicy {
            validity_days,
            common_name,
            organization,
            country,
            key_usage,
            extended_key_usage,
        } => {
            let result = orchestrator.validate_certificate_policy(&CertificatePolicyRequest {
                validity_days,
                common_name,
                organization,
                country,
                key_usages: key_usage,
                extended_key_usages: extended_key_usage,
            });
            Ok(json!({
                "compliant": result.compliant,
                "violations": result.violations,
                "warnings": result.warnings,
                "message": result.message(),
            }))
        }
        ToolCall::CheckCertificateExpiry { not_valid_after } => {
            let report = orchestrator.check_certificate_expiry(&not_valid_after)?;
            Ok(json!({
                "status": report.status,
                "days_until_expiry": report.days_until_expiry,
                "expiry_date": report.expiry_date,
                "needs_renewal": report.needs_renewal,
                "message": report.message(),
            }))
        }
        ToolCall::GetPolicy { policy_category } => {
            let policy = orchestrator.get_policy(&policy_category)?;
            Ok(json!({
                "policy_category": policy_category,
                "policy": policy,
            }))
        }
        ToolCall::ListViolations { limit } => {
            let listing = orchestrator.list_violations(limit);
            Ok(json!({
                "total_violations": listing.total_violations,
                "violations": listing.violations,
            }))
        }
        ToolCall::ComplianceReport { include_violations } => {
            let report = orchestrator.compliance_report(include_violations);
            Ok(json!({ "report": report }))
        }
        ToolCall::ListOperations { limit } => {
            let operations = orchestrator.list_operations(limit);
            Ok(json!({
                "total_operations": orchestrator.operation_count(),
                "operations": operations,
            }))
        }
    }
}
