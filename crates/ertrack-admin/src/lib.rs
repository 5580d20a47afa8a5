//! # ER Tracking 管理模块
//!
//! 提供配置管理、日志初始化以及在院人数的定时刷新。

pub mod config;
pub mod logging;
pub mod refresh;

pub use config::{ConfigManager, ErConfig, LogFormat};
pub use logging::init_logging;
pub use refresh::{LatestOccupancy, OccupancyRefresher};
