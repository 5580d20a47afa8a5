//! 通用工具函数

use crate::error::{ErError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// 完整时间戳格式（带秒）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// 省略秒的时间戳格式
pub const TIMESTAMP_FORMAT_SHORT: &str = "%Y-%m-%d %H:%M";
/// 日期格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// 写回CSV时使用的时间格式
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// 一天的分钟数
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// 将日期和时间两列拼接后解析为时间戳
///
/// 先尝试 `YYYY-MM-DD HH:MM:SS`，失败后回退到 `YYYY-MM-DD HH:MM`。
/// 任一部分为空或无法解析时返回 `None`。
pub fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = date.trim();
    let time = time.trim();
    if date.is_empty() || time.is_empty() {
        return None;
    }

    let joined = format!("{} {}", date, time);
    NaiveDateTime::parse_from_str(&joined, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&joined, TIMESTAMP_FORMAT_SHORT))
        .ok()
}

/// 解析 `YYYY-MM-DD` 日期
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| ErError::invalid_input(format!("invalid date '{}': {}", value, e)))
}

/// 一天中的分钟偏移
pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// 将分钟偏移格式化为 `HH:MM` 标签，1440 显示为 `24:00`
pub fn bucket_label(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// 判断字段是否表示空值（空串或 `NULL`）
pub fn is_null_field(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("null")
}
