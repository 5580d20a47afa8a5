//! CSV文件存储

use crate::storage::RecordStore;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ertrack_core::{AdmissionRecord, ErError, Result, CSV_HEADER};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 基于CSV文件的记录存储
///
/// 写操作互斥执行；读操作不加锁，可能读到写入前后的任一版本。
pub struct CsvRecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时写入表头创建空文件，返回是否新建
    pub async fn ensure_exists(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        blocking(move || create_with_header(&path)).await
    }
}

#[async_trait]
impl RecordStore for CsvRecordStore {
    async fn load_all(&self) -> Result<Vec<AdmissionRecord>> {
        let path = self.path.clone();
        blocking(move || read_records(&path)).await
    }

    async fn append(&self, record: AdmissionRecord) -> Result<()> {
        record.validate()?;

        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let patient_id = record.patient_id.clone();
        blocking(move || append_record(&path, &record)).await?;

        info!("Patient {} added to {}", patient_id, self.path.display());
        Ok(())
    }

    async fn discharge(&self, patient_id: &str, at: NaiveDateTime) -> Result<AdmissionRecord> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let id = patient_id.to_string();
        let record = blocking(move || discharge_record(&path, &id, at)).await?;

        info!("Patient {} discharged at {}", patient_id, at);
        Ok(record)
    }
}

/// 把记录按标准表头写入新文件（当前患者名单导出）
pub fn export_records(path: impl AsRef<Path>, records: &[AdmissionRecord]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .map_err(|e| storage_error(path, e))?;

    writer
        .write_record(CSV_HEADER)
        .map_err(|e| storage_error(path, e))?;
    for record in records {
        writer
            .write_record(project(record, CSV_HEADER.iter().copied()))
            .map_err(|e| storage_error(path, e))?;
    }
    writer.flush()?;

    debug!("Exported {} records to {}", records.len(), path.display());
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ErError::Internal(format!("storage task failed: {}", e)))?
}

fn storage_error(path: &Path, e: csv::Error) -> ErError {
    ErError::Storage(format!("{}: {}", path.display(), e))
}

fn project<'a>(record: &AdmissionRecord, columns: impl Iterator<Item = &'a str>) -> Vec<String> {
    columns
        .map(|column| record.field(column.trim()).unwrap_or_default())
        .collect()
}

fn create_with_header(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(path)?;
    writeln!(file, "{}", CSV_HEADER.join(","))?;
    info!("Created record file {}", path.display());
    Ok(true)
}

fn open_reader(path: &Path) -> Result<(csv::Reader<File>, StringRecord)> {
    let file = File::open(path).map_err(|e| {
        ErError::data_unavailable(format!("cannot open {}: {}", path.display(), e))
    })?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| ErError::data_unavailable(format!("cannot read header of {}: {}", path.display(), e)))?
        .clone();
    if !headers.iter().any(|h| h == "Patient_ID") {
        return Err(ErError::data_unavailable(format!(
            "{} has no Patient_ID column",
            path.display()
        )));
    }

    Ok((reader, headers))
}

fn read_records(path: &Path) -> Result<Vec<AdmissionRecord>> {
    let (mut reader, headers) = open_reader(path)?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (index, row) in reader.records().enumerate() {
        match row.and_then(|r| r.deserialize::<AdmissionRecord>(Some(&headers))) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                // 表头占第1行
                warn!("Skipping malformed row {} in {}: {}", index + 2, path.display(), e);
            }
        }
    }

    debug!(
        "Loaded {} records from {} ({} skipped)",
        records.len(),
        path.display(),
        skipped
    );
    Ok(records)
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn append_record(path: &Path, record: &AdmissionRecord) -> Result<()> {
    create_with_header(path)?;

    let existing = read_records(path)?;
    if existing.iter().any(|r| r.patient_id == record.patient_id) {
        return Err(ErError::Conflict(format!(
            "patient {} already exists",
            record.patient_id
        )));
    }

    let (_, headers) = open_reader(path)?;
    let needs_newline = !ends_with_newline(path)?;

    let mut file = OpenOptions::new().append(true).open(path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer
        .write_record(project(record, headers.iter()))
        .map_err(|e| storage_error(path, e))?;
    writer.flush()?;
    Ok(())
}

fn discharge_record(path: &Path, patient_id: &str, at: NaiveDateTime) -> Result<AdmissionRecord> {
    let (_, headers) = open_reader(path)?;

    // 改写时不裁剪空白、不解码，其余行按字节原样写回
    let mut raw = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| storage_error(path, e))?;
    let raw_headers = raw
        .byte_headers()
        .map_err(|e| storage_error(path, e))?
        .clone();
    let mut rows = raw
        .byte_records()
        .collect::<std::result::Result<Vec<ByteRecord>, _>>()
        .map_err(|e| storage_error(path, e))?;

    let id_col = column_index(&headers, "Patient_ID")?;
    let leave_cols = [
        column_index(&headers, "Leave_Date")?,
        column_index(&headers, "Leave_Time")?,
    ];

    let position = rows
        .iter()
        .position(|row| {
            row.get(id_col)
                .and_then(|field| std::str::from_utf8(field).ok())
                .map(str::trim)
                == Some(patient_id)
        })
        .ok_or_else(|| ErError::NotFound(format!("patient {} not found", patient_id)))?;

    let mut fields = StringRecord::from_byte_record(rows[position].clone()).map_err(|e| {
        ErError::Storage(format!("record for patient {} is not valid UTF-8: {}", patient_id, e))
    })?;
    fields.trim();
    let mut record: AdmissionRecord = fields.deserialize(Some(&headers)).map_err(|e| {
        ErError::Storage(format!("record for patient {} is malformed: {}", patient_id, e))
    })?;
    record.discharge(at)?;

    let width = headers.len().max(rows[position].len());
    let mut updated = ByteRecord::new();
    for i in 0..width {
        if leave_cols.contains(&i) {
            updated.push_field(record.field(&headers[i]).unwrap_or_default().as_bytes());
        } else {
            updated.push_field(rows[position].get(i).unwrap_or_default());
        }
    }
    rows[position] = updated;

    let tmp_path = tmp_path_for(path);
    {
        let mut writer = WriterBuilder::new()
            .flexible(true)
            .from_path(&tmp_path)
            .map_err(|e| storage_error(&tmp_path, e))?;
        writer
            .write_byte_record(&raw_headers)
            .map_err(|e| storage_error(&tmp_path, e))?;
        for row in &rows {
            writer
                .write_byte_record(row)
                .map_err(|e| storage_error(&tmp_path, e))?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;

    Ok(record)
}

fn column_index(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ErError::Storage(format!("missing column {}", name)))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
Patient_ID,Hospital_ID,Urban_Rural,Gender,Age,Blood_Group,Triage_Level,Factor,Entry_Date,Entry_Time,Leave_Date,Leave_Time
P000001,H001,Urban,Male,45,A+,High,Accident,2025-03-16,23:00,NULL,NULL
P000002,H002,Rural,Female,31,O-,Low,Weather,2025-03-17,02:00:00,2025-03-17,05:00:00
broken-row-without-enough-columns
P000003,H001,Urban,Other,8,B+,Medium,Event,2025-03-17,10:00,,
";

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample_store(dir: &TempDir) -> CsvRecordStore {
        let path = dir.path().join("pat.csv");
        fs::write(&path, SAMPLE).unwrap();
        CsvRecordStore::new(path)
    }

    #[tokio::test]
    async fn test_load_skips_malformed_rows() {
        let dir = TempDir::new().unwrap();
        let store = sample_store(&dir);

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_admitted());
        assert!(!records[1].is_admitted());
        assert!(records[2].is_admitted());
        assert_eq!(records[1].leave_timestamp(), Some(at(17, 5, 0)));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = CsvRecordStore::new(dir.path().join("missing.csv"));

        let result = store.load_all().await;
        assert!(matches!(result, Err(ErError::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn test_file_without_header_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pat.csv");
        fs::write(&path, "").unwrap();

        let result = CsvRecordStore::new(path).load_all().await;
        assert!(matches!(result, Err(ErError::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn test_append_creates_file_and_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = CsvRecordStore::new(dir.path().join("data").join("pat.csv"));

        let record = AdmissionRecord::new("P1", "H001", at(17, 8, 0));
        store.append(record.clone()).await.unwrap();
        let result = store.append(record).await;
        assert!(matches!(result, Err(ErError::Conflict(_))));

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry_timestamp(), Some(at(17, 8, 0)));
        assert!(records[0].is_admitted());
    }

    #[tokio::test]
    async fn test_append_rejects_invalid_record() {
        let dir = TempDir::new().unwrap();
        let store = sample_store(&dir);

        let mut record = AdmissionRecord::new("P9", "H001", at(17, 8, 0));
        record.entry_time = "soon".to_string();
        assert!(matches!(store.append(record).await, Err(ErError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_append_after_missing_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pat.csv");
        fs::write(&path, SAMPLE.trim_end()).unwrap();
        let store = CsvRecordStore::new(&path);

        store
            .append(AdmissionRecord::new("P4", "H003", at(17, 11, 0)))
            .await
            .unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].patient_id, "P4");
        assert_eq!(records[3].hospital_id, "H003");
    }

    #[tokio::test]
    async fn test_discharge_rewrites_only_target_row() {
        let dir = TempDir::new().unwrap();
        let store = sample_store(&dir);

        let record = store.discharge("P000003", at(17, 14, 30)).await.unwrap();
        assert_eq!(record.leave_timestamp(), Some(at(17, 14, 30)));

        let contents = fs::read_to_string(store.path()).unwrap();
        assert!(contents.contains("broken-row-without-enough-columns"));
        assert!(contents.contains("P000003,H001,Urban,Other,8,B+,Medium,Event,2025-03-17,10:00,2025-03-17,14:30:00"));

        let records = store.load_all().await.unwrap();
        assert_eq!(records.iter().filter(|r| r.is_admitted()).count(), 1);
    }

    #[tokio::test]
    async fn test_discharge_unknown_and_repeated() {
        let dir = TempDir::new().unwrap();
        let store = sample_store(&dir);

        let missing = store.discharge("P404", at(17, 14, 30)).await;
        assert!(matches!(missing, Err(ErError::NotFound(_))));

        let repeated = store.discharge("P000002", at(17, 14, 30)).await;
        assert!(matches!(repeated, Err(ErError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_discharge_before_entry_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = sample_store(&dir);

        let result = store.discharge("P000003", at(17, 9, 0)).await;
        assert!(matches!(result, Err(ErError::InvalidInput(_))));

        let contents = fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents, SAMPLE);
        let records = store.load_all().await.unwrap();
        assert!(records.iter().all(|r| r.validate().is_ok()));
    }

    #[tokio::test]
    async fn test_discharge_keeps_undecodable_and_padded_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pat.csv");
        let mut bytes = SAMPLE.as_bytes().to_vec();
        bytes.extend_from_slice(
            b"P000004,H\xff1,Urban,Male,50,A-,Low,Event,2025-03-17,11:00,NULL,NULL\n",
        );
        bytes.extend_from_slice(
            b"P000005,  H002 ,Rural,Female,60,AB+,High,Accident,2025-03-17,12:00,NULL,NULL\n",
        );
        fs::write(&path, &bytes).unwrap();
        let store = CsvRecordStore::new(&path);

        assert_eq!(store.load_all().await.unwrap().len(), 4);

        let record = store.discharge("P000001", at(17, 14, 0)).await.unwrap();
        assert_eq!(record.leave_timestamp(), Some(at(17, 14, 0)));

        let rewritten = fs::read(&path).unwrap();
        let needle: &[u8] = b"P000004,H\xff1,Urban";
        assert!(rewritten.windows(needle.len()).any(|w| w == needle));
        let padded: &[u8] = b"P000005,  H002 ,Rural";
        assert!(rewritten.windows(padded.len()).any(|w| w == padded));

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records.iter().filter(|r| r.is_admitted()).count(), 2);
    }

    #[tokio::test]
    async fn test_ensure_exists_only_once() {
        let dir = TempDir::new().unwrap();
        let store = CsvRecordStore::new(dir.path().join("pat.csv"));

        assert!(store.ensure_exists().await.unwrap());
        assert!(!store.ensure_exists().await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_export_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.csv");
        let records = vec![AdmissionRecord::new("P1", "H001", at(17, 8, 0))];

        export_records(&path, &records).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some("P1,H001,,,,,,,2025-03-17,08:00:00,NULL,NULL")
        );
    }
}
