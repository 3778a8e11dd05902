//! # 合规策略引擎
//!
//! 根据 [`Policy`] 评估密钥参数和证书参数，生成 [`ComplianceResult`]。
//! 每次不合规评估都会向违规日志追加一条记录。评估本身不修改输入，
//! 对同一输入重复评估得到相同的结论。
//!
//! 另外提供证书到期检查、策略查询、违规列表和合规报告。

use crate::config::Policy;
use crate::violation::{count_by_category, tail, ViolationCategory, ViolationLog, ViolationRecord};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use pki_types::{render_list, PkiError, PkiResult, DEFAULT_EC_CURVE, DEFAULT_RSA_KEY_SIZE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 合规报告中附带的最近违规条数
const REPORT_RECENT_VIOLATIONS: usize = 10;

/// 一次评估的结论
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub compliant: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
}

impl ComplianceResult {
    fn from_findings(violations: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            compliant: violations.is_empty(),
            violations,
            warnings,
        }
    }

    /// 人类可读的结论
    pub fn message(&self) -> &'static str {
        if self.compliant {
            "Compliant with policy"
        } else {
            "Policy violations found"
        }
    }
}

/// 证书参数评估请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePolicyRequest {
    pub validity_days: i64,
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub country: Option<String>,
    /// 密钥用途线上名称，未知名称按不允许处理
    pub key_usages: Vec<String>,
    pub extended_key_usages: Vec<String>,
}

impl CertificatePolicyRequest {
    pub fn new(validity_days: i64) -> Self {
        Self {
            validity_days,
            ..Default::default()
        }
    }
}

/// 到期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    Valid,
    ExpiringSoon,
    Expired,
}

impl ExpiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryStatus::Valid => "valid",
            ExpiryStatus::ExpiringSoon => "expiring_soon",
            ExpiryStatus::Expired => "expired",
        }
    }
}

/// 到期检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryReport {
    pub status: ExpiryStatus,
    /// 向下取整的剩余天数，已过期时为负
    pub days_until_expiry: i64,
    /// 调用方传入的原始时间字符串
    pub expiry_date: String,
    pub needs_renewal: bool,
}

impl ExpiryReport {
    pub fn message(&self) -> String {
        format!(
            "Certificate {} ({} days remaining)",
            self.status.as_str(),
            self.days_until_expiry
        )
    }
}

/// 违规列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationListing {
    pub total_violations: usize,
    pub violations: Vec<ViolationRecord>,
}

/// 合规报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub total_violations: usize,
    pub violations_by_category: BTreeMap<ViolationCategory, usize>,
    /// `COMPLIANT` 或 `NON-COMPLIANT`
    pub compliance_status: String,
    pub policies_enforced: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_violations: Option<Vec<ViolationRecord>>,
}

/// 合规策略引擎
///
/// 策略只读，违规日志是唯一的可变状态。
#[derive(Debug)]
pub struct PolicyEngine {
    policy: Arc<Policy>,
    violations: ViolationLog,
}

impl PolicyEngine {
    /// 使用给定策略创建引擎
    pub fn new(policy: Policy) -> Self {
        Self {
            policy: Arc::new(policy),
            violations: ViolationLog::new(),
        }
    }

    /// 当前策略
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// 违规日志
    pub fn violation_log(&self) -> &ViolationLog {
        &self.violations
    }

    /// 评估密钥生成参数
    ///
    /// # 参数
    ///
    /// * `algorithm` - 算法名称，未知名称记为不允许
    /// * `key_size` - RSA密钥长度
    /// * `curve` - 椭圆曲线名称
    pub fn evaluate_key_policy(
        &self,
        algorithm: &str,
        key_size: Option<u32>,
        curve: Option<&str>,
    ) -> ComplianceResult {
        let key_policy = &self.policy.key_generation;
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        if !key_policy.allowed_algorithms.iter().any(|a| a.as_str() == algorithm) {
            violations.push(format!(
                "Algorithm '{}' not allowed. Allowed: {}",
                algorithm,
                render_list(&key_policy.allowed_algorithms)
            ));
        }

        if algorithm == "RSA" {
            match key_size {
                None => warnings.push(format!(
                    "Key size not specified, will use default ({})",
                    DEFAULT_RSA_KEY_SIZE
                )),
                Some(size) if size < key_policy.rsa_min_key_size => violations.push(format!(
                    "RSA key size {} below minimum {}",
                    size, key_policy.rsa_min_key_size
                )),
                Some(size) if !key_policy.rsa_allowed_sizes.contains(&size) => {
                    violations.push(format!(
                        "RSA key size {} not in allowed sizes: {}",
                        size,
                        render_list(&key_policy.rsa_allowed_sizes)
                    ))
                }
                Some(_) => {}
            }
        }

        if algorithm == "ECC" {
            match curve {
                None => warnings.push(format!(
                    "Curve not specified, will use default ({})",
                    DEFAULT_EC_CURVE
                )),
                Some(curve) if !key_policy.ecc_allowed_curves.iter().any(|c| c.as_str() == curve) => {
                    violations.push(format!(
                        "ECC curve '{}' not allowed. Allowed: {}",
                        curve,
                        render_list(&key_policy.ecc_allowed_curves)
                    ))
                }
                Some(_) => {}
            }
        }

        if !violations.is_empty() {
            warn!("密钥参数不合规: {} 项违规", violations.len());
            self.violations.record(
                ViolationCategory::KeyGeneration,
                json!({
                    "algorithm": algorithm,
                    "key_size": key_size,
                    "curve": curve,
                }),
                violations.clone(),
            );
        } else {
            debug!("密钥参数合规: {}", algorithm);
        }

        ComplianceResult::from_findings(violations, warnings)
    }

    /// 评估证书参数
    ///
    /// 各项规则独立检查，返回全部违规项。
    pub fn evaluate_certificate_policy(&self, request: &CertificatePolicyRequest) -> ComplianceResult {
        let cert_policy = &self.policy.certificate;
        let naming = &self.policy.naming;
        let mut violations = Vec::new();

        let max_days = i64::from(cert_policy.max_validity_days);
        let min_days = i64::from(cert_policy.min_validity_days);
        if request.validity_days > max_days {
            violations.push(format!(
                "Validity period {} days exceeds maximum {} days",
                request.validity_days, max_days
            ));
        }
        if request.validity_days < min_days {
            violations.push(format!(
                "Validity period {} days below minimum {} day(s)",
                request.validity_days, min_days
            ));
        }

        let organization = non_empty(&request.organization);
        let country = non_empty(&request.country);

        if naming.require_organization && organization.is_none() {
            violations.push("Organization name is required by policy".to_string());
        }
        if naming.require_country && country.is_none() {
            violations.push("Country code is required by policy".to_string());
        }

        if let Some(common_name) = non_empty(&request.common_name) {
            let length = common_name.chars().count();
            if length > naming.max_common_name_length {
                violations.push(format!(
                    "Common name length {} exceeds maximum {}",
                    length, naming.max_common_name_length
                ));
            }
        }

        if let (Some(allowed), Some(country)) = (&naming.allowed_countries, country) {
            if !allowed.is_empty() && !allowed.iter().any(|c| c == country) {
                violations.push(format!(
                    "Country '{}' not in allowed list: {}",
                    country,
                    render_list(allowed)
                ));
            }
        }

        let invalid_usages: Vec<&str> = request
            .key_usages
            .iter()
            .map(String::as_str)
            .filter(|usage| !cert_policy.allowed_key_usages.iter().any(|a| a.as_str() == *usage))
            .collect();
        if !invalid_usages.is_empty() {
            violations.push(format!(
                "Invalid key usages: {}. Allowed: {}",
                render_list(&invalid_usages),
                render_list(&cert_policy.allowed_key_usages)
            ));
        }

        let invalid_extended: Vec<&str> = request
            .extended_key_usages
            .iter()
            .map(String::as_str)
            .filter(|usage| {
                !cert_policy
                    .allowed_extended_key_usages
                    .iter()
                    .any(|a| a.as_str() == *usage)
            })
            .collect();
        if !invalid_extended.is_empty() {
            violations.push(format!(
                "Invalid extended key usages: {}. Allowed: {}",
                render_list(&invalid_extended),
                render_list(&cert_policy.allowed_extended_key_usages)
            ));
        }

        if !violations.is_empty() {
            warn!("证书参数不合规: {} 项违规", violations.len());
            self.violations.record(
                ViolationCategory::Certificate,
                json!({
                    "validity_days": request.validity_days,
                    "common_name": request.common_name,
                }),
                violations.clone(),
            );
        } else {
            debug!("证书参数合规: {} 天", request.validity_days);
        }

        ComplianceResult::from_findings(violations, Vec::new())
    }

    /// 检查证书到期状态
    pub fn check_certificate_expiry(&self, not_valid_after: &str) -> PkiResult<ExpiryReport> {
        self.check_certificate_expiry_at(not_valid_after, Utc::now())
    }

    /// 以给定时刻为基准检查证书到期状态
    ///
    /// 纯函数，不修改任何状态。
    pub fn check_certificate_expiry_at(
        &self,
        not_valid_after: &str,
        now: DateTime<Utc>,
    ) -> PkiResult<ExpiryReport> {
        let expiry = parse_timestamp(not_valid_after)?;
        let days_until_expiry = floor_days(expiry - now);
        let warning_days = self.policy.lifecycle.renewal_warning_days;

        let status = if days_until_expiry < 0 {
            ExpiryStatus::Expired
        } else if days_until_expiry <= warning_days {
            ExpiryStatus::ExpiringSoon
        } else {
            ExpiryStatus::Valid
        };

        Ok(ExpiryReport {
            status,
            days_until_expiry,
            expiry_date: not_valid_after.to_string(),
            needs_renewal: status == ExpiryStatus::ExpiringSoon,
        })
    }

    /// 读取策略
    ///
    /// # 参数
    ///
    /// * `category` - `key_generation`、`certificate`、`naming`、`lifecycle` 或 `all`
    pub fn get_policy(&self, category: &str) -> PkiResult<serde_json::Value> {
        let policy = &*self.policy;
        let value = match category {
            "all" => serde_json::to_value(policy),
            "key_generation" => serde_json::to_value(&policy.key_generation),
            "certificate" => serde_json::to_value(&policy.certificate),
            "naming" => serde_json::to_value(&policy.naming),
            "lifecycle" => serde_json::to_value(&policy.lifecycle),
            other => return Err(PkiError::not_found("Policy category", other)),
        };
        value.map_err(|e| PkiError::MalformedRequest(format!("policy serialization failed: {}", e)))
    }

    /// 列出最近的违规记录，`limit == 0` 返回全部
    pub fn list_violations(&self, limit: usize) -> ViolationListing {
        self.violations.with_records(|records| ViolationListing {
            total_violations: records.len(),
            violations: tail(records, limit),
        })
    }

    /// 生成合规报告
    pub fn compliance_report(&self, include_violations: bool) -> ComplianceReport {
        self.violations.with_records(|records| {
            let total_violations = records.len();
            let recent_violations = if include_violations && total_violations > 0 {
                Some(tail(records, REPORT_RECENT_VIOLATIONS))
            } else {
                None
            };

            ComplianceReport {
                generated_at: Utc::now(),
                total_violations,
                violations_by_category: count_by_category(records),
                compliance_status: if total_violations == 0 {
                    "COMPLIANT".to_string()
                } else {
                    "NON-COMPLIANT".to_string()
                },
                policies_enforced: Policy::CATEGORIES.iter().map(|c| c.to_string()).collect(),
                recent_violations,
            }
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// 向下取整的天数
fn floor_days(delta: Duration) -> i64 {
    let days = delta.num_days();
    if delta < Duration::days(days) {
        days - 1
    } else {
        days
    }
}

/// 解析 ISO-8601 时间
///
/// 接受 `Z` 后缀、显式时区偏移，以及按 UTC 解释的无时区时间或日期。
pub fn parse_timestamp(value: &str) -> PkiResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(PkiError::MalformedRequest(format!(
        "invalid timestamp '{}'",
        value
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(Policy::default())
    }

    #[test]
    fn test_rsa_below_minimum_skips_allowed_sizes_check() {
        let engine = PolicyEngine::new(Policy::builder().with_rsa_min_key_size(3072).build().expect("构建策略失败"));
        let result = engine.evaluate_key_policy("RSA", Some(2048), None);

        assert!(!result.compliant);
        assert_eq!(result.violations, vec!["RSA key size 2048 below minimum 3072".to_string()]);
        assert_eq!(engine.violation_log().len(), 1, "不合规评估应该追加一条记录");
    }

    #[test]
    fn test_rsa_size_not_in_allowed_set() {
        let result = engine().evaluate_key_policy("RSA", Some(2500), None);
        assert_eq!(
            result.violations,
            vec!["RSA key size 2500 not in allowed sizes: [2048, 3072, 4096]".to_string()]
        );
    }

    #[test]
    fn test_missing_parameters_only_warn() {
        let engine = engine();
        let rsa = engine.evaluate_key_policy("RSA", None, None);
        assert!(rsa.compliant);
        assert_eq!(rsa.warnings, vec!["Key size not specified, will use default (2048)".to_string()]);

        let ecc = engine.evaluate_key_policy("ECC", None, None);
        assert!(ecc.compliant);
        assert_eq!(ecc.warnings, vec!["Curve not specified, will use default (SECP256R1)".to_string()]);
        assert!(engine.violation_log().is_empty(), "警告不应该记录违规");
    }

    #[test]
    fn test_unknown_algorithm_and_curve() {
        let engine = engine();
        let result = engine.evaluate_key_policy("DSA", Some(1024), None);
        assert_eq!(result.violations, vec!["Algorithm 'DSA' not allowed. Allowed: [RSA, ECC]".to_string()]);

        let result = engine.evaluate_key_policy("ECC", None, Some("brainpoolP256r1"));
        assert_eq!(
            result.violations,
            vec!["ECC curve 'brainpoolP256r1' not allowed. Allowed: [SECP256R1, SECP384R1, SECP521R1]".to_string()]
        );
    }

    #[test]
    fn test_certificate_rules_accumulate() {
        let engine = engine();
        let request = CertificatePolicyRequest {
            validity_days: 1000,
            common_name: Some("a".repeat(70)),
            organization: Some(String::new()),
            country: None,
            key_usages: vec!["digitalSignature".to_string(), "encipherOnly".to_string(), "bogus".to_string()],
            extended_key_usages: vec!["timeStamping".to_string()],
        };

        let result = engine.evaluate_certificate_policy(&request);
        assert_eq!(
            result.violations,
            vec![
                "Validity period 1000 days exceeds maximum 825 days".to_string(),
                "Organization name is required by policy".to_string(),
                "Common name length 70 exceeds maximum 64".to_string(),
                "Invalid key usages: [encipherOnly, bogus]. Allowed: [digitalSignature, keyEncipherment, dataEncipherment, keyAgreement, keyCertSign, cRLSign]".to_string(),
                "Invalid extended key usages: [timeStamping]. Allowed: [serverAuth, clientAuth, codeSigning, emailProtection]".to_string(),
            ]
        );
        assert_eq!(engine.violation_log().len(), 1, "一次评估只追加一条记录");
    }

    #[test]
    fn test_country_rules() {
        let policy = Policy::builder()
            .with_require_country(true)
            .with_allowed_countries(vec!["US".to_string(), "DE".to_string()])
            .build()
            .expect("构建策略失败");
        let engine = PolicyEngine::new(policy);

        let mut request = CertificatePolicyRequest::new(90);
        request.organization = Some("Example".to_string());
        let result = engine.evaluate_certificate_policy(&request);
        assert_eq!(result.violations, vec!["Country code is required by policy".to_string()]);

        request.country = Some("FR".to_string());
        let result = engine.evaluate_certificate_policy(&request);
        assert_eq!(result.violations, vec!["Country 'FR' not in allowed list: [US, DE]".to_string()]);

        request.country = Some("DE".to_string());
        assert!(engine.evaluate_certificate_policy(&request).compliant);
    }

    #[test]
    fn test_validity_bounds_round_trip() {
        let policy = Policy::builder().with_validity_bounds(30, 90).build().expect("构建策略失败");
        let engine = PolicyEngine::new(policy);
        let with_org = |days| CertificatePolicyRequest {
            organization: Some("Example".to_string()),
            ..CertificatePolicyRequest::new(days)
        };

        assert!(engine.evaluate_certificate_policy(&with_org(30)).compliant, "下界应该合规");
        assert!(engine.evaluate_certificate_policy(&with_org(90)).compliant, "上界应该合规");
        assert_eq!(
            engine.evaluate_certificate_policy(&with_org(91)).violations,
            vec!["Validity period 91 days exceeds maximum 90 days".to_string()]
        );
        assert_eq!(
            engine.evaluate_certificate_policy(&with_org(29)).violations,
            vec!["Validity period 29 days below minimum 30 day(s)".to_string()]
        );
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let engine = engine();
        let request = CertificatePolicyRequest::new(0);
        let first = engine.evaluate_certificate_policy(&request);
        let second = engine.evaluate_certificate_policy(&request);
        assert_eq!(first, second);
        assert_eq!(engine.violation_log().len(), 2, "违规记录不去重");
    }

    #[test]
    fn test_expiry_status_boundaries() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("构造时间失败");

        let report = engine.check_certificate_expiry_at("2025-01-31T00:00:00Z", now).expect("解析失败");
        assert_eq!(report.status, ExpiryStatus::ExpiringSoon);
        assert_eq!(report.days_until_expiry, 30);
        assert!(report.needs_renewal);

        let report = engine.check_certificate_expiry_at("2025-02-01T00:00:00+00:00", now).expect("解析失败");
        assert_eq!(report.status, ExpiryStatus::Valid);
        assert!(!report.needs_renewal);

        let report = engine.check_certificate_expiry_at("2024-12-31T12:00:00", now).expect("解析失败");
        assert_eq!(report.status, ExpiryStatus::Expired);
        assert_eq!(report.days_until_expiry, -1, "剩余天数向下取整");
        assert_eq!(report.message(), "Certificate expired (-1 days remaining)");
    }

    #[test]
    fn test_expiry_check_is_pure() {
        let engine = engine();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("构造时间失败");
        let first = engine.check_certificate_expiry_at("2025-06-10", now).expect("解析失败");
        let second = engine.check_certificate_expiry_at("2025-06-10", now).expect("解析失败");
        assert_eq!(first, second);
        assert!(engine.violation_log().is_empty());
    }

    #[test]
    fn test_malformed_timestamp() {
        let result = engine().check_certificate_expiry("next tuesday");
        assert!(matches!(result, Err(PkiError::MalformedRequest(_))));
    }

    #[test]
    fn test_get_policy_categories() {
        let engine = engine();
        let naming = engine.get_policy("naming").expect("读取策略失败");
        assert_eq!(naming["max_common_name_length"], 64);

        let all = engine.get_policy("all").expect("读取策略失败");
        assert_eq!(all["lifecycle"]["renewal_warning_days"], 30);

        let err = engine.get_policy("crypto").expect_err("未知类别应该失败");
        assert_eq!(err.to_string(), "Policy category 'crypto' not found");
    }

    #[test]
    fn test_compliance_report() {
        let engine = engine();
        let report = engine.compliance_report(true);
        assert_eq!(report.compliance_status, "COMPLIANT");
        assert!(report.recent_violations.is_none(), "无违规时不附带列表");

        for _ in 0..12 {
            engine.evaluate_key_policy("DSA", None, None);
        }
        engine.evaluate_certificate_policy(&CertificatePolicyRequest::new(0));

        let report = engine.compliance_report(true);
        assert_eq!(report.compliance_status, "NON-COMPLIANT");
        assert_eq!(report.total_violations, 13);
        assert_eq!(report.violations_by_category.get(&ViolationCategory::KeyGeneration), Some(&12));
        assert_eq!(report.recent_violations.as_ref().map(Vec::len), Some(10));
        assert_eq!(report.policies_enforced.len(), 4);

        assert!(engine.compliance_report(false).recent_violations.is_none());

        let listing = engine.list_violations(3);
        assert_eq!(listing.total_violations, 13);
        assert_eq!(listing.violations.len(), 3);
        assert_eq!(engine.list_violations(0).violations.len(), 13);
    }
}
