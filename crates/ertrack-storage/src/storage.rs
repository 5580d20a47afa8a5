//! 记录存储接口

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ertrack_core::{AdmissionRecord, Result};

/// 入院记录存储
///
/// 每次读取都返回当前完整的记录集，不做缓存。
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 读取全部记录；单行损坏时跳过该行，整体不可读时返回 `DataUnavailable`
    async fn load_all(&self) -> Result<Vec<AdmissionRecord>>;

    /// 登记新患者，`Patient_ID` 重复时返回 `Conflict`
    async fn append(&self, record: AdmissionRecord) -> Result<()>;

    /// 办理出院并返回更新后的记录
    async fn discharge(&self, patient_id: &str, at: NaiveDateTime) -> Result<AdmissionRecord>;
}
