//! # ER Tracking Web API
//!
//! 基于 axum 的HTTP接口：在院人数曲线、患者登记/出院、当前患者名单和
//! 就诊量预测。

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{resolve_addr, AppState, WebServer};
