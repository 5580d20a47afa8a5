//! 核心数据模型定义

use crate::error::{ErError, Result};
use crate::utils::{is_null_field, parse_timestamp, DATE_FORMAT, TIME_FORMAT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// CSV文件的标准表头顺序
pub const CSV_HEADER: [&str; 12] = [
    "Patient_ID",
    "Hospital_ID",
    "Urban_Rural",
    "Gender",
    "Age",
    "Blood_Group",
    "Triage_Level",
    "Factor",
    "Entry_Date",
    "Entry_Time",
    "Leave_Date",
    "Leave_Time",
];

/// 空值在CSV中的写法
pub const NULL_FIELD: &str = "NULL";

/// 患者入院记录
///
/// 字段名与CSV表头一一对应，JSON接口也使用同一套名称。人口学字段对
/// 在院人数计算不透明，只做原样保存。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    #[serde(rename = "Patient_ID")]
    pub patient_id: String,
    #[serde(rename = "Hospital_ID", default)]
    pub hospital_id: String,
    #[serde(rename = "Urban_Rural", default)]
    pub urban_rural: String,
    #[serde(rename = "Gender", default)]
    pub gender: String,
    #[serde(rename = "Age", default, deserialize_with = "lenient_text")]
    pub age: String,
    #[serde(rename = "Blood_Group", default)]
    pub blood_group: String,
    #[serde(rename = "Triage_Level", default)]
    pub triage_level: String,
    #[serde(rename = "Factor", default)]
    pub factor: String,
    #[serde(rename = "Entry_Date")]
    pub entry_date: String,
    #[serde(rename = "Entry_Time")]
    pub entry_time: String,
    #[serde(
        rename = "Leave_Date",
        default,
        deserialize_with = "nullable",
        serialize_with = "null_as_text"
    )]
    pub leave_date: Option<String>,
    #[serde(
        rename = "Leave_Time",
        default,
        deserialize_with = "nullable",
        serialize_with = "null_as_text"
    )]
    pub leave_time: Option<String>,
}

impl AdmissionRecord {
    /// 以入院时间创建一条在院记录，人口学字段留空
    pub fn new(patient_id: impl Into<String>, hospital_id: impl Into<String>, entry: NaiveDateTime) -> Self {
        Self {
            patient_id: patient_id.into(),
            hospital_id: hospital_id.into(),
            urban_rural: String::new(),
            gender: String::new(),
            age: String::new(),
            blood_group: String::new(),
            triage_level: String::new(),
            factor: String::new(),
            entry_date: entry.format(DATE_FORMAT).to_string(),
            entry_time: entry.format(TIME_FORMAT).to_string(),
            leave_date: None,
            leave_time: None,
        }
    }

    /// 附带出院时间
    pub fn with_leave(mut self, leave: NaiveDateTime) -> Self {
        self.set_leave(leave);
        self
    }

    /// 入院时间戳，无法解析时为 `None`
    pub fn entry_timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.entry_date, &self.entry_time)
    }

    /// 出院时间戳，在院或无法解析时为 `None`
    pub fn leave_timestamp(&self) -> Option<NaiveDateTime> {
        match (&self.leave_date, &self.leave_time) {
            (Some(date), Some(time)) => parse_timestamp(date, time),
            _ => None,
        }
    }

    /// 出院日期和时间都为空才视为在院
    pub fn is_admitted(&self) -> bool {
        self.leave_date.is_none() && self.leave_time.is_none()
    }

    /// 校验新登记的记录
    pub fn validate(&self) -> Result<()> {
        if self.patient_id.trim().is_empty() {
            return Err(ErError::invalid_input("Patient_ID must not be empty"));
        }

        let entry = self.entry_timestamp().ok_or_else(|| {
            ErError::invalid_input(format!(
                "unparseable entry timestamp '{} {}'",
                self.entry_date, self.entry_time
            ))
        })?;

        if self.is_admitted() {
            return Ok(());
        }

        let leave = self.leave_timestamp().ok_or_else(|| {
            ErError::invalid_input("Leave_Date and Leave_Time must both be valid or both be NULL")
        })?;
        if leave < entry {
            return Err(ErError::invalid_input(format!(
                "leave timestamp {} precedes entry timestamp {}",
                leave, entry
            )));
        }

        Ok(())
    }

    /// 办理出院，出院时间不得早于入院时间
    pub fn discharge(&mut self, at: NaiveDateTime) -> Result<()> {
        if !self.is_admitted() {
            return Err(ErError::Conflict(format!(
                "patient {} is already discharged",
                self.patient_id
            )));
        }
        if let Some(entry) = self.entry_timestamp() {
            if at < entry {
                return Err(ErError::invalid_input(format!(
                    "discharge time {} precedes entry timestamp {} for patient {}",
                    at, entry, self.patient_id
                )));
            }
        }
        self.set_leave(at);
        Ok(())
    }

    fn set_leave(&mut self, leave: NaiveDateTime) {
        self.leave_date = Some(leave.format(DATE_FORMAT).to_string());
        self.leave_time = Some(leave.format(TIME_FORMAT).to_string());
    }

    /// 按CSV列名取值，空出院字段写作 `NULL`
    pub fn field(&self, column: &str) -> Option<String> {
        let value = match column {
            "Patient_ID" => self.patient_id.clone(),
            "Hospital_ID" => self.hospital_id.clone(),
            "Urban_Rural" => self.urban_rural.clone(),
            "Gender" => self.gender.clone(),
            "Age" => self.age.clone(),
            "Blood_Group" => self.blood_group.clone(),
            "Triage_Level" => self.triage_level.clone(),
            "Factor" => self.factor.clone(),
            "Entry_Date" => self.entry_date.clone(),
            "Entry_Time" => self.entry_time.clone(),
            "Leave_Date" => self.leave_date.clone().unwrap_or_else(|| NULL_FIELD.to_string()),
            "Leave_Time" => self.leave_time.clone().unwrap_or_else(|| NULL_FIELD.to_string()),
            _ => return None,
        };
        Some(value)
    }
}

/// 当前在院的记录
pub fn admitted(records: &[AdmissionRecord]) -> Vec<AdmissionRecord> {
    records.iter().filter(|r| r.is_admitted()).cloned().collect()
}

/// 某医院的全部记录
pub fn for_hospital(records: &[AdmissionRecord], hospital_id: &str) -> Vec<AdmissionRecord> {
    records
        .iter()
        .filter(|r| r.hospital_id == hospital_id)
        .cloned()
        .collect()
}

fn nullable<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !is_null_field(v)))
}

fn null_as_text<S>(value: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.as_deref().unwrap_or(NULL_FIELD))
}

/// 接受字符串或数字（前端提交的年龄可能是数字）
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Text>::deserialize(deserializer)? {
        Some(Text::Str(s)) => s,
        Some(Text::Int(i)) => i.to_string(),
        Some(Text::Float(f)) => f.to_string(),
        None => String::new(),
    })
}
