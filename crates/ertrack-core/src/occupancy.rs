//! 在院人数重建
//!
//! 根据入院/出院时间戳，按固定宽度的时间桶重建某一天的在院人数曲线。
//! 第0个桶（午夜）以前一天结转的人数为起点，之后每个边界 `t` 累加
//! `[t-W, t)` 区间内的入院数并减去出院数。
//!
//! 计算是纯函数：不做IO，不缓存状态，每次调用都从记录重新算起。

use crate::error::{ErError, Result};
use crate::models::AdmissionRecord;
use crate::utils::{bucket_label, minute_of_day, MINUTES_PER_DAY};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// 时间桶宽度（分钟），必须为正且能整除1440
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BucketWidth(u32);

impl BucketWidth {
    pub const HOURLY: BucketWidth = BucketWidth(60);
    pub const HALF_HOURLY: BucketWidth = BucketWidth(30);

    pub fn new(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(ErError::invalid_input("bucket width must be positive"));
        }
        if minutes > MINUTES_PER_DAY || MINUTES_PER_DAY % minutes != 0 {
            return Err(ErError::invalid_input(format!(
                "bucket width {} does not evenly divide a day",
                minutes
            )));
        }
        Ok(Self(minutes))
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    /// 边界点数量，含午夜起点
    pub fn bucket_count(self) -> usize {
        (MINUTES_PER_DAY / self.0) as usize + 1
    }

    /// 某一时刻所在区间对应的边界序号（区间 `[t-W, t)` 归入边界 `t`）
    fn closing_index(self, time: NaiveTime) -> usize {
        (minute_of_day(time) / self.0) as usize + 1
    }
}

impl TryFrom<u32> for BucketWidth {
    type Error = ErError;

    fn try_from(minutes: u32) -> Result<Self> {
        Self::new(minutes)
    }
}

impl From<BucketWidth> for u32 {
    fn from(width: BucketWidth) -> u32 {
        width.0
    }
}

impl Default for BucketWidth {
    fn default() -> Self {
        Self::HOURLY
    }
}

/// 重建参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyRequest {
    /// 目标日期
    pub date: NaiveDate,
    /// 桶宽
    pub width: BucketWidth,
    /// 实时模式截止时刻，之后的桶沿用最后一个计算值
    pub cutoff: Option<NaiveTime>,
}

impl OccupancyRequest {
    /// 整天重建
    pub fn full_day(date: NaiveDate, width: BucketWidth) -> Self {
        Self {
            date,
            width,
            cutoff: None,
        }
    }

    /// 相对当前时刻构造请求：当天进入实时模式，未来日期视为无效输入
    pub fn as_of(date: NaiveDate, width: BucketWidth, now: NaiveDateTime) -> Result<Self> {
        let today = now.date();
        if date > today {
            return Err(ErError::invalid_input(format!(
                "date {} is in the future",
                date
            )));
        }

        let cutoff = (date == today).then(|| now.time());
        Ok(Self {
            date,
            width,
            cutoff,
        })
    }
}

/// 按时间桶划分的在院人数序列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketedSeries {
    /// ISO日期
    pub date: NaiveDate,
    pub bucket_width_minutes: u32,
    /// 午夜结转人数
    pub initial_count: i64,
    /// `HH:MM` 标签，最后一个为 `24:00`
    pub bucket_labels: Vec<String>,
    pub counts: Vec<i64>,
    /// 每个边界对应区间内的入院数（第0项恒为0）
    pub entries: Vec<u32>,
    /// 每个边界对应区间内的出院数（第0项恒为0）
    pub discharges: Vec<u32>,
    /// 最后一个实际计算的边界序号，其后为填充值
    pub computed_through: usize,
}

impl BucketedSeries {
    /// 是否出现负数（数据不一致的信号）
    pub fn has_negative(&self) -> bool {
        self.counts.iter().any(|c| *c < 0)
    }

    pub fn last_count(&self) -> i64 {
        self.counts.last().copied().unwrap_or(self.initial_count)
    }
}

/// 前一天结转到午夜的人数
///
/// 等于前一天的入院数减去前一天的出院数。
pub fn carry_over_count(records: &[AdmissionRecord], date: NaiveDate) -> i64 {
    let prev = date - Duration::days(1);

    let entries = records
        .iter()
        .filter_map(AdmissionRecord::entry_timestamp)
        .filter(|ts| ts.date() == prev)
        .count() as i64;
    let discharges = records
        .iter()
        .filter_map(AdmissionRecord::leave_timestamp)
        .filter(|ts| ts.date() == prev)
        .count() as i64;

    entries - discharges
}

/// 重建某一天的在院人数序列
pub fn reconstruct(records: &[AdmissionRecord], request: &OccupancyRequest) -> BucketedSeries {
    let width = request.width;
    let len = width.bucket_count();
    let last_index = len - 1;

    let mut entries = vec![0u32; len];
    let mut discharges = vec![0u32; len];

    for ts in records.iter().filter_map(AdmissionRecord::entry_timestamp) {
        if ts.date() == request.date {
            entries[width.closing_index(ts.time())] += 1;
        }
    }
    for ts in records.iter().filter_map(AdmissionRecord::leave_timestamp) {
        if ts.date() == request.date {
            discharges[width.closing_index(ts.time())] += 1;
        }
    }

    let computed_through = match request.cutoff {
        Some(cutoff) => ((minute_of_day(cutoff) / width.minutes()) as usize).min(last_index),
        None => last_index,
    };

    let initial_count = carry_over_count(records, request.date);
    let mut counts = Vec::with_capacity(len);
    let mut running = initial_count;
    counts.push(running);

    for k in 1..len {
        if k <= computed_through {
            running += entries[k] as i64 - discharges[k] as i64;
        } else {
            entries[k] = 0;
            discharges[k] = 0;
        }
        counts.push(running);
    }

    let bucket_labels = (0..len as u32)
        .map(|k| bucket_label(k * width.minutes()))
        .collect();

    BucketedSeries {
        date: request.date,
        bucket_width_minutes: width.minutes(),
        initial_count,
        bucket_labels,
        counts,
        entries,
        discharges,
        computed_through,
    }
}

/// 一次刷新得到的在院状态
///
/// 由刷新任务整体替换，读者总是看到最近一次完整计算的结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub generated_at: NaiveDateTime,
    /// 生成时在院（未出院）的记录数
    pub admitted_now: usize,
    pub series: Vec<BucketedSeries>,
}

impl OccupancySnapshot {
    /// 以 `now` 所在日期按实时模式计算各桶宽的序列
    pub fn compute(records: &[AdmissionRecord], widths: &[BucketWidth], now: NaiveDateTime) -> Self {
        let series = widths
            .iter()
            .map(|width| {
                let request = OccupancyRequest {
                    date: now.date(),
                    width: *width,
                    cutoff: Some(now.time()),
                };
                reconstruct(records, &request)
            })
            .collect();

        Self {
            generated_at: now,
            admitted_now: records.iter().filter(|r| r.is_admitted()).count(),
            series,
        }
    }

    pub fn series_for(&self, width: BucketWidth) -> Option<&BucketedSeries> {
        self.series
            .iter()
            .find(|s| s.bucket_width_minutes == width.minutes())
    }
}
