//! 集成测试模块
//!
//! 测试策略引擎、密钥库、CA签发器、证书注册表和审计日志之间的协同工作。

use pki_engine::app::{AppConfig, IssueRequest, LifecycleOrchestrator};
use pki_engine::tools::handle_line;
use pki_engine::{PkiError, Policy, StatusFilter, SubjectName};
use pki_types::{AuditOperation, CertificateStatus};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use x509_parser::prelude::{FromDer, X509Certificate};

/// 解析证书 PEM，返回 (有效期秒数, 主体CN, 公钥DER)
fn inspect_certificate(certificate_pem: &str) -> (i64, String, Vec<u8>) {
    let block = pem::parse(certificate_pem).expect("解析证书PEM失败");
    let (_, cert) = X509Certificate::from_der(block.contents()).expect("解析证书DER失败");
    let validity = cert.validity();
    let seconds = validity.not_after.timestamp() - validity.not_before.timestamp();
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    (seconds, common_name, cert.public_key().raw.to_vec())
}

async fn engine_with(config: AppConfig) -> LifecycleOrchestrator {
    LifecycleOrchestrator::initialize(config).await.expect("引擎初始化失败")
}

async fn request_for(
    engine: &LifecycleOrchestrator,
    key_id: &str,
    algorithm: &str,
    key_size: Option<u32>,
    common_name: &str,
) -> String {
    engine
        .generate_key_pair(algorithm, key_id, key_size, None)
        .await
        .expect("生成密钥失败");
    let subject = SubjectName::new(common_name).with_organization("Example Corp");
    engine
        .create_csr(key_id, subject, vec![common_name.to_string()])
        .await
        .expect("创建CSR失败")
        .csr_pem
}

fn issue(cert_id: &str, csr_pem: String, validity_days: i64) -> IssueRequest {
    IssueRequest {
        cert_id: cert_id.to_string(),
        csr_pem,
        validity_days: Some(validity_days),
        ..IssueRequest::default()
    }
}

/// RSA 2048 密钥在最小长度 3072 的策略下被拒绝，不留下任何证书
#[tokio::test]
async fn test_scenario_a_weak_key_rejected() {
    let policy = Policy::builder()
        .with_rsa_min_key_size(3072)
        .build()
        .expect("构建策略失败");
    let engine = engine_with(AppConfig {
        policy,
        ..AppConfig::default()
    })
    .await;

    let csr_pem = request_for(&engine, "weak", "RSA", Some(2048), "weak.example.com").await;
    let operations_before = engine.operation_count();

    let err = engine
        .issue_certificate(issue("weak", csr_pem, 90))
        .await
        .expect_err("弱密钥应该被拒绝");

    match &err {
        PkiError::PolicyViolation(violations) => {
            assert!(
                violations.iter().any(|v| v.contains("below minimum 3072")),
                "违规列表应该包含最小长度说明: {:?}",
                violations
            );
        }
        other => panic!("期望 PolicyViolation，实际为: {:?}", other),
    }

    assert!(engine.list_certificates(StatusFilter::All).await.is_empty(), "不应该创建证书");
    assert_eq!(engine.operation_count(), operations_before, "失败的签发不应该记录审计");
    assert_eq!(engine.list_violations(0).total_violations, 1);
}

/// RSA 4096 签发 90 天证书，随后续期 180 天，再重复吊销
#[tokio::test]
async fn test_scenarios_b_c_d_lifecycle() {
    let engine = engine_with(AppConfig::default()).await;
    let csr_pem = request_for(&engine, "api-key", "RSA", Some(4096), "api.example.com").await;

    // 场景 B: 签发
    let record = engine
        .issue_certificate(issue("api", csr_pem, 90))
        .await
        .expect("签发失败");
    assert_eq!(record.status, CertificateStatus::Active);
    assert_eq!(record.certificate.key_algorithm, "RSA-4096");
    assert_eq!(record.certificate.validity_days(), 90);
    assert_eq!(record.certificate.issuer, engine.ca_certificate().subject);

    let (seconds, common_name, original_key) = inspect_certificate(&record.certificate.certificate_pem);
    assert_eq!(seconds, 90 * 86_400, "有效期应该正好是90天");
    assert_eq!(common_name, "api.example.com");

    // 场景 C: 续期
    let outcome = engine.renew_certificate("api", Some(180)).await.expect("续期失败");
    assert_eq!(outcome.previous.status, CertificateStatus::Superseded);
    assert_eq!(outcome.previous.superseded_by.as_deref(), Some("api_renewed"));
    assert_eq!(outcome.renewed.cert_id, "api_renewed");
    assert_eq!(outcome.renewed.renewed_from.as_deref(), Some("api"));
    assert_eq!(outcome.renewed.certificate.subject, record.certificate.subject);
    assert_ne!(outcome.renewed.certificate.serial_number, record.certificate.serial_number);

    let (seconds, common_name, renewed_key) =
        inspect_certificate(&outcome.renewed.certificate.certificate_pem);
    assert_eq!(seconds, 180 * 86_400, "续期后有效期应该正好是180天");
    assert_eq!(common_name, "api.example.com");
    assert_eq!(renewed_key, original_key, "续期必须保留原公钥");

    let stored = engine.get_certificate("api").await.expect("读取旧证书失败");
    assert_eq!(stored.status, CertificateStatus::Superseded);

    // 已被取代的证书再次续期会在派生标识上冲突
    let err = engine.renew_certificate("api", Some(30)).await.expect_err("重复续期应该失败");
    assert!(matches!(err, PkiError::IdentifierCollision(_)));

    // 场景 D: 重复吊销
    let revoked = engine
        .revoke_certificate("api_renewed", "keyCompromise")
        .await
        .expect("吊销失败");
    assert_eq!(revoked.status, CertificateStatus::Revoked);
    let operations = engine.operation_count();

    let err = engine
        .revoke_certificate("api_renewed", "keyCompromise")
        .await
        .expect_err("重复吊销应该失败");
    assert_eq!(err, PkiError::AlreadyRevoked("api_renewed".to_string()));
    assert_eq!(engine.operation_count(), operations, "重复吊销不应该记录审计");

    let err = engine.renew_certificate("api_renewed", None).await.expect_err("已吊销证书不能续期");
    assert!(matches!(err, PkiError::AlreadyRevoked(_)));

    let operations: Vec<AuditOperation> = engine
        .list_operations(0)
        .into_iter()
        .map(|entry| entry.operation)
        .collect();
    assert_eq!(
        operations,
        vec![
            AuditOperation::GenerateKeyPair,
            AuditOperation::CreateCsr,
            AuditOperation::IssueCertificate,
            AuditOperation::RenewCertificate,
            AuditOperation::RevokeCertificate,
        ]
    );
}

/// 并发签发时序列号唯一，审计序号连续且无重复
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_audit_ordering() {
    let engine = Arc::new(engine_with(AppConfig::default()).await);
    let count = 16;

    let mut requests = Vec::with_capacity(count);
    for i in 0..count {
        let csr = request_for(&engine, &format!("key-{}", i), "ECC", None, &format!("svc{}.example.com", i)).await;
        requests.push(csr);
    }
    let base = engine.operation_count();

    let tasks = requests.into_iter().enumerate().map(|(i, csr_pem)| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.issue_certificate(issue(&format!("svc-{}", i), csr_pem, 30)).await })
    });
    let results = futures::future::join_all(tasks).await;

    let mut serials = HashSet::new();
    for result in results {
        let record = result.expect("任务失败").expect("签发失败");
        assert!(serials.insert(record.certificate.serial_number), "序列号必须唯一");
    }
    assert!(!serials.contains(&engine.ca_certificate().serial_number), "不能与CA序列号重复");

    let entries = engine.list_operations(0);
    assert_eq!(entries.len(), base + count);
    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, index as u64 + 1, "审计序号必须连续");
    }
    let issued = entries
        .iter()
        .filter(|entry| entry.operation == AuditOperation::IssueCertificate)
        .count();
    assert_eq!(issued, count);
}

/// 并发吊销同一证书只有一次成功
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_revocation_is_single_winner() {
    let engine = Arc::new(engine_with(AppConfig::default()).await);
    let csr_pem = request_for(&engine, "web-key", "ECC", None, "web.example.com").await;
    engine.issue_certificate(issue("web", csr_pem, 30)).await.expect("签发失败");
    let base = engine.operation_count();

    let tasks = (0..8).map(|_| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.revoke_certificate("web", "superseded").await })
    });
    let results = futures::future::join_all(tasks).await;

    let successes = results
        .into_iter()
        .map(|result| result.expect("任务失败"))
        .filter(|outcome| match outcome {
            Ok(_) => true,
            Err(err) => {
                assert!(matches!(err, PkiError::AlreadyRevoked(_)));
                false
            }
        })
        .count();
    assert_eq!(successes, 1, "只能有一次吊销成功");
    assert_eq!(engine.operation_count(), base + 1);
}

/// 状态过滤：有效、吊销、取代互不重叠
#[tokio::test]
async fn test_list_by_status() {
    let engine = engine_with(AppConfig::default()).await;
    for name in ["a", "b", "c"] {
        let csr_pem = request_for(&engine, name, "ECC", None, &format!("{}.example.com", name)).await;
        engine.issue_certificate(issue(name, csr_pem, 30)).await.expect("签发失败");
    }
    engine.revoke_certificate("b", "unspecified").await.expect("吊销失败");
    engine.renew_certificate("c", Some(60)).await.expect("续期失败");

    let ids = |records: Vec<pki_engine::CertificateRecord>| {
        records.into_iter().map(|r| r.cert_id).collect::<Vec<_>>()
    };
    assert_eq!(ids(engine.list_certificates(StatusFilter::All).await), vec!["a", "b", "c", "c_renewed"]);
    assert_eq!(ids(engine.list_certificates(StatusFilter::Active).await), vec!["a", "c_renewed"]);
    assert_eq!(ids(engine.list_certificates(StatusFilter::Revoked).await), vec!["b"]);
    assert_eq!(ids(engine.list_certificates(StatusFilter::Superseded).await), vec!["c"]);
    assert!(engine.list_certificates(StatusFilter::Expired).await.is_empty());
}

/// 重复的证书标识在签名之前被拒绝
#[tokio::test]
async fn test_duplicate_cert_id_rejected() {
    let engine = engine_with(AppConfig::default()).await;
    let first = request_for(&engine, "k1", "ECC", None, "one.example.com").await;
    let second = request_for(&engine, "k2", "ECC", None, "two.example.com").await;

    engine.issue_certificate(issue("svc", first, 30)).await.expect("签发失败");
    let err = engine
        .issue_certificate(issue("svc", second, 30))
        .await
        .expect_err("重复标识应该失败");
    assert!(matches!(err, PkiError::IdentifierCollision(_)));
    assert_eq!(engine.list_certificates(StatusFilter::All).await.len(), 1);
}

/// 从 TOML 文件加载策略
#[tokio::test]
async fn test_config_file_loading() {
    let mut file = tempfile::NamedTempFile::new().expect("创建临时文件失败");
    writeln!(
        file,
        r#"
default_validity_days = 30

[policy.key_generation]
rsa_min_key_size = 3072

[policy.certificate]
max_validity_days = 397

[authority]
common_name = "Integration Root CA"
organization = "Integration"
"#
    )
    .expect("写入配置失败");

    let config = AppConfig::from_file(file.path()).expect("加载配置失败");
    assert_eq!(config.policy.certificate.max_validity_days, 397);

    let engine = engine_with(config).await;
    assert!(engine.ca_certificate().subject.starts_with("CN=Integration Root CA,O=Integration"));
    assert_eq!(engine.default_validity_days(), 30);

    let result = engine.validate_key_policy("RSA", Some(2048), None);
    assert!(!result.compliant);
    assert_eq!(result.violations, vec!["RSA key size 2048 below minimum 3072".to_string()]);

    let csr_pem = request_for(&engine, "k", "ECC", None, "svc.example.com").await;
    let record = engine
        .issue_certificate(IssueRequest {
            cert_id: "svc".to_string(),
            csr_pem,
            ..IssueRequest::default()
        })
        .await
        .expect("签发失败");
    assert_eq!(record.certificate.validity_days(), 30, "应该使用配置的默认有效期");
}

/// 通过 JSON 工具接口完成完整流程
#[tokio::test]
async fn test_tool_interface_round_trip() {
    let engine = engine_with(AppConfig::default()).await;

    let call = |tool: &str, input: Value| json!({"tool": tool, "input": input}).to_string();

    let response = handle_line(
        &engine,
        &call("generate_key_pair", json!({"algorithm": "ECC", "key_id": "web", "curve": "SECP384R1"})),
    )
    .await;
    assert_eq!(response["success"], json!(true), "{}", response);
    assert_eq!(response["curve"], json!("SECP384R1"));

    let response = handle_line(
        &engine,
        &call(
            "create_csr",
            json!({"key_id": "web", "common_name": "web.example.com", "organization": "Example", "san_dns": ["web.example.com"]}),
        ),
    )
    .await;
    assert_eq!(response["csr_id"], json!("csr_web"));
    let csr_pem = response["csr_pem"].as_str().expect("缺少 csr_pem").to_string();

    let response = handle_line(&engine, &call("validate_csr", json!({"csr_id": "csr_web"}))).await;
    assert_eq!(response["valid"], json!(true));
    assert_eq!(response["public_key_algorithm"], json!("ECC-SECP384R1"));

    let response = handle_line(
        &engine,
        &call(
            "issue_certificate",
            json!({"csr_pem": csr_pem, "cert_id": "web", "validity_days": 90, "extended_key_usage": ["serverAuth"]}),
        ),
    )
    .await;
    assert_eq!(response["success"], json!(true), "{}", response);
    assert_eq!(response["status"], json!("active"));
    assert_eq!(response["key_usage"], json!(["digitalSignature", "keyEncipherment"]));
    assert_eq!(response["extended_key_usage"], json!(["serverAuth"]));

    let response = handle_line(&engine, &call("revoke_certificate", json!({"cert_id": "web"}))).await;
    assert_eq!(response["reason"], json!("unspecified"));

    let response = handle_line(&engine, &call("revoke_certificate", json!({"cert_id": "web"}))).await;
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error_code"], json!(7005));
    assert_eq!(response["category"], json!("lifecycle"));

    let response = handle_line(&engine, &call("list_certificates", json!({"status": "revoked"}))).await;
    assert_eq!(response["count"], json!(1));

    let response = handle_line(&engine, &call("list_certificates", json!({"status": "lost"}))).await;
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error_kind"], json!("UnsupportedParameter"));

    let response = handle_line(&engine, &call("get_certificate", json!({"cert_id": "nope"}))).await;
    assert_eq!(response["error"], json!("Certificate 'nope' not found"));
    assert_eq!(response["error_code"], json!(7001));

    let response = handle_line(&engine, r#"{"tool": "get_ca_certificate"}"#).await;
    assert_eq!(response["production_ready"], json!(false));
    assert_eq!(
        response["notice"],
        json!("This is a DEMO CA for testing only - not for production use")
    );

    let response = handle_line(&engine, &call("list_operations", json!({"limit": 0}))).await;
    assert_eq!(response["total_operations"], json!(4));
    assert_eq!(response["operations"][3]["operation"], json!("revoke_certificate"));

    let response = handle_line(&engine, r#"{"tool": "shutdown"}"#).await;
    assert_eq!(response["error_kind"], json!("MalformedRequest"));
}

/// 策略相关工具
#[tokio::test]
async fn test_policy_tools() {
    let engine = engine_with(AppConfig::default()).await;

    let response = handle_line(
        &engine,
        r#"{"tool": "validate_certificate_policy", "input": {"validity_days": 1000, "common_name": "x.example.com"}}"#,
    )
    .await;
    assert_eq!(response["compliant"], json!(false));
    assert_eq!(response["message"], json!("Policy violations found"));

    let response = handle_line(
        &engine,
        r#"{"tool": "check_certificate_expiry", "input": {"not_valid_after": "2000-01-01T00:00:00Z"}}"#,
    )
    .await;
    assert_eq!(response["status"], json!("expired"));
    assert_eq!(response["needs_renewal"], json!(false));

    let response = handle_line(&engine, r#"{"tool": "get_policy", "input": {"policy_category": "naming"}}"#).await;
    assert_eq!(response["policy"]["require_organization"], json!(true));

    let response = handle_line(&engine, r#"{"tool": "get_policy", "input": {"policy_category": "secrets"}}"#).await;
    assert_eq!(response["error_code"], json!(7001));

    let response = handle_line(&engine, r#"{"tool": "compliance_report"}"#).await;
    assert_eq!(response["report"]["compliance_status"], json!("NON-COMPLIANT"));
    assert_eq!(response["report"]["total_violations"], json!(1));

    let response = handle_line(&engine, r#"{"tool": "list_violations"}"#).await;
    assert_eq!(response["total_violations"], json!(1));
    assert_eq!(response["violations"][0]["category"], json!("certificate"));
}
