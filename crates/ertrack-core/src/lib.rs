//! # ER Tracking Core
//!
//! 急诊患者追踪系统的核心模块，提供入院记录模型、错误定义、时间解析工具、
//! 在院人数重建以及日就诊量预测。

pub mod error;
pub mod forecast;
pub mod models;
pub mod occupancy;
pub mod utils;

pub use error::{ErError, Result};
pub use forecast::{DayForecast, MonthlyForecast, VolumeModel};
pub use models::*;
pub use occupancy::{
    carry_over_count, reconstruct, BucketWidth, BucketedSeries, OccupancyRequest,
    OccupancySnapshot,
};
