//! 内存记录存储，用于测试和演示

use crate::storage::RecordStore;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use ertrack_core::{AdmissionRecord, ErError, Result};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<AdmissionRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<AdmissionRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_all(&self) -> Result<Vec<AdmissionRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn append(&self, record: AdmissionRecord) -> Result<()> {
        record.validate()?;

        let mut records = self.records.write().await;
        if records.iter().any(|r| r.patient_id == record.patient_id) {
            return Err(ErError::Conflict(format!(
                "patient {} already exists",
                record.patient_id
            )));
        }
        records.push(record);
        Ok(())
    }

    async fn discharge(&self, patient_id: &str, at: NaiveDateTime) -> Result<AdmissionRecord> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.patient_id == patient_id)
            .ok_or_else(|| ErError::NotFound(format!("patient {} not found", patient_id)))?;

        record.discharge(at)?;
        Ok(record.clone())
    }
}
