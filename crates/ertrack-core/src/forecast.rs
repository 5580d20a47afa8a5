//! 日就诊量预测
//!
//! 使用离线训练好的线性回归模型（JSON导出）预测某月每天的急诊就诊人数。
//! 每天的特征为 `Entry_Day`、`Entry_Month`、`Entry_Weekday`（周一为0），
//! 模型中其它列一律按0计算。
//!
//! 模型文件只描述线性模型：`{"intercept": f64, "coefficients": {列名: f64}}`。
//! 随机森林等树模型无法用这种格式表达，pickle 模型文件不能直接转换，
//! 需要离线重新训练一个线性模型再导出为JSON。

use crate::error::{ErError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const FEATURE_DAY: &str = "Entry_Day";
pub const FEATURE_MONTH: &str = "Entry_Month";
pub const FEATURE_WEEKDAY: &str = "Entry_Weekday";

/// 线性回归模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeModel {
    pub intercept: f64,
    /// 列名到系数的映射
    pub coefficients: BTreeMap<String, f64>,
}

/// 单日预测值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub day: u32,
    pub weekday: u32,
    pub predicted: f64,
}

/// 月度预测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyForecast {
    pub year: i32,
    pub month: u32,
    pub days: Vec<DayForecast>,
}

impl VolumeModel {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 从模型文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ErError::data_unavailable(format!("cannot read model file {}: {}", path.display(), e))
        })?;
        let model = Self::from_json(&json).map_err(|e| {
            ErError::data_unavailable(format!("invalid model file {}: {}", path.display(), e))
        })?;

        info!(
            "Loaded volume model from {} ({} coefficients)",
            path.display(),
            model.coefficients.len()
        );
        Ok(model)
    }

    fn feature(date: NaiveDate, column: &str) -> f64 {
        match column {
            FEATURE_DAY => date.day() as f64,
            FEATURE_MONTH => date.month() as f64,
            FEATURE_WEEKDAY => date.weekday().num_days_from_monday() as f64,
            _ => 0.0,
        }
    }

    /// 预测某一天的就诊人数
    pub fn predict_day(&self, date: NaiveDate) -> f64 {
        self.coefficients
            .iter()
            .fold(self.intercept, |acc, (column, coef)| {
                acc + coef * Self::feature(date, column)
            })
    }

    /// 预测整月
    pub fn predict_month(&self, year: i32, month: u32) -> Result<MonthlyForecast> {
        if !(1..=12).contains(&month) {
            return Err(ErError::invalid_input(format!(
                "month must be between 1 and 12, got {}",
                month
            )));
        }

        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| ErError::invalid_input(format!("invalid year {}", year)))?;

        let days = first
            .iter_days()
            .take_while(|d| d.month() == month)
            .map(|date| DayForecast {
                day: date.day(),
                weekday: date.weekday().num_days_from_monday(),
                predicted: self.predict_day(date),
            })
            .collect();

        Ok(MonthlyForecast { year, month, days })
    }
}
