//! # 证书注册表
//!
//! 证书标识到 [`CertificateRecord`] 的权威映射，负责生命周期状态机：
//!
//! - `active`：签发后的初始状态
//! - `revoked`：终止状态，不可再吊销或续期
//! - `superseded`：续期后的旧记录，`superseded_by` 指向新记录
//!
//! `expired` 不存储，读取时根据 `not_after` 推导。
//!
//! 所有变更在同一个写锁内完成，并在释放写锁之前追加审计记录，
//! 因此审计顺序等于变更被接受的顺序。

use crate::audit::AuditLog;
use chrono::{DateTime, Utc};
use pki_types::{
    AuditOperation, Certificate, CertificateRecord, CertificateStatus, PkiError, PkiResult,
    StatusFilter,
};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 续期结果
#[derive(Debug, Clone, Serialize)]
pub struct RenewalOutcome {
    /// 已被取代的旧记录
    pub previous: CertificateRecord,
    /// 新记录
    pub renewed: CertificateRecord,
}

/// 续期证书的标识
pub fn renewed_id_for(cert_id: &str) -> String {
    format!("{}_renewed", cert_id)
}

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<String, CertificateRecord>,
    /// 插入顺序
    order: Vec<String>,
    serials: HashSet<String>,
}

impl RegistryState {
    fn check_insertable(&self, cert_id: &str, serial_number: &str) -> PkiResult<()> {
        if self.records.contains_key(cert_id) {
            return Err(PkiError::IdentifierCollision(format!(
                "certificate '{}' already exists",
                cert_id
            )));
        }
        if self.serials.contains(serial_number) {
            return Err(PkiError::IdentifierCollision(format!(
                "serial number {} already registered",
                serial_number
            )));
        }
        Ok(())
    }

    fn insert(&mut self, record: CertificateRecord) {
        self.serials.insert(record.certificate.serial_number.clone());
        self.order.push(record.cert_id.clone());
        self.records.insert(record.cert_id.clone(), record);
    }
}

/// 证书注册表
#[derive(Debug)]
pub struct CertificateRegistry {
    state: RwLock<RegistryState>,
    audit: Arc<AuditLog>,
}

impl CertificateRegistry {
    /// 创建空的注册表
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            audit,
        }
    }

    /// 标识是否已被占用
    pub async fn contains(&self, cert_id: &str) -> bool {
        self.state.read().await.records.contains_key(cert_id)
    }

    /// 登记新签发的证书
    ///
    /// 标识和序列号都必须唯一，否则返回 `IdentifierCollision`。
    pub async fn insert(&self, cert_id: &str, certificate: Certificate) -> PkiResult<CertificateRecord> {
        let mut state = self.state.write().await;
        state.check_insertable(cert_id, &certificate.serial_number)?;

        let record = CertificateRecord::new_active(cert_id, certificate, Utc::now());
        state.insert(record.clone());
        self.audit.append(
            AuditOperation::IssueCertificate,
            json!({
                "cert_id": cert_id,
                "serial_number": record.certificate.serial_number,
                "subject": record.certificate.subject.to_string(),
                "not_after": record.certificate.not_after,
            }),
        );
        drop(state);

        info!("证书已登记: {} (序列号: {})", cert_id, record.certificate.serial_number);
        Ok(record)
    }

    /// 读取证书记录
    pub async fn get(&self, cert_id: &str) -> PkiResult<CertificateRecord> {
        self.state
            .read()
            .await
            .records
            .get(cert_id)
            .cloned()
            .ok_or_else(|| PkiError::not_found("Certificate", cert_id))
    }

    /// 按插入顺序列出满足过滤条件的记录
    pub async fn list(&self, filter: StatusFilter, now: DateTime<Utc>) -> Vec<CertificateRecord> {
        let state = self.state.read().await;
        let records: Vec<CertificateRecord> = state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|record| record.matches(filter, now))
            .cloned()
            .collect();
        debug!("列出证书: {:?} -> {} 个", filter, records.len());
        records
    }

    /// 已登记的证书数量
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 吊销证书
    ///
    /// 已吊销的证书返回 `AlreadyRevoked`，且不修改状态、不记录审计。
    pub async fn revoke(&self, cert_id: &str, reason: &str) -> PkiResult<CertificateRecord> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(cert_id)
            .ok_or_else(|| PkiError::not_found("Certificate", cert_id))?;

        if record.status == CertificateStatus::Revoked {
            warn!("证书已被吊销: {}", cert_id);
            return Err(PkiError::AlreadyRevoked(cert_id.to_string()));
        }

        let previous_status = record.status;
        record.status = CertificateStatus::Revoked;
        record.revoked_at = Some(Utc::now());
        record.revocation_reason = Some(reason.to_string());
        let record = record.clone();

        self.audit.append(
            AuditOperation::RevokeCertificate,
            json!({
                "cert_id": cert_id,
                "serial_number": record.certificate.serial_number,
                "reason": reason,
                "previous_status": previous_status,
            }),
        );
        drop(state);

        info!("证书已吊销: {} (原因: {})", cert_id, reason);
        Ok(record)
    }

    /// 续期证书
    ///
    /// 读锁下读取旧记录，在不持有任何锁的情况下调用 `sign` 生成新证书，
    /// 然后在写锁下重新校验并原子地完成状态迁移。
    ///
    /// # 参数
    ///
    /// * `cert_id` - 旧证书标识，新证书标识为 `<cert_id>_renewed`
    /// * `sign` - 根据旧记录生成新证书
    pub async fn renew<F>(&self, cert_id: &str, sign: F) -> PkiResult<RenewalOutcome>
    where
        F: FnOnce(&CertificateRecord) -> PkiResult<Certificate>,
    {
        let renewed_id = renewed_id_for(cert_id);
        let current = self.get(cert_id).await?;
        Self::check_renewable(&current)?;
        if self.contains(&renewed_id).await {
            return Err(PkiError::IdentifierCollision(format!(
                "certificate '{}' already exists",
                renewed_id
            )));
        }

        let certificate = sign(&current)?;

        let mut state = self.state.write().await;
        let current = state
            .records
            .get(cert_id)
            .ok_or_else(|| PkiError::not_found("Certificate", cert_id))?;
        Self::check_renewable(current)?;
        state.check_insertable(&renewed_id, &certificate.serial_number)?;

        let now = Utc::now();
        let mut renewed = CertificateRecord::new_active(renewed_id.clone(), certificate, now);
        renewed.renewed_from = Some(cert_id.to_string());

        let previous = match state.records.get_mut(cert_id) {
            Some(previous) => {
                previous.status = CertificateStatus::Superseded;
                previous.superseded_by = Some(renewed_id.clone());
                previous.renewed_at = Some(now);
                previous.clone()
            }
            None => return Err(PkiError::not_found("Certificate", cert_id)),
        };
        state.insert(renewed.clone());

        self.audit.append(
            AuditOperation::RenewCertificate,
            json!({
                "old_cert_id": cert_id,
                "new_cert_id": renewed_id,
                "old_serial_number": previous.certificate.serial_number,
                "new_serial_number": renewed.certificate.serial_number,
                "not_after": renewed.certificate.not_after,
            }),
        );
        drop(state);

        info!("证书已续期: {} -> {}", cert_id, renewed_id);
        Ok(RenewalOutcome { previous, renewed })
    }

    fn check_renewable(record: &CertificateRecord) -> PkiResult<()> {
        if record.status == CertificateStatus::Revoked {
            return Err(PkiError::AlreadyRevoked(record.cert_id.clone()));
        }
        Ok(())
    }
}
