//! HTTP处理器

use crate::error::{ApiError, ApiResult};
use crate::server::SharedState;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
};
use chrono::{Datelike, Local, NaiveDateTime};
use ertrack_core::{
    admitted, for_hospital, reconstruct, utils::parse_date, AdmissionRecord, BucketWidth,
    BucketedSeries, ErError, MonthlyForecast, OccupancyRequest,
};
use ertrack_storage::export_records;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// 在院人数查询参数
#[derive(Debug, Deserialize)]
pub struct OccupancyQueryParams {
    /// `YYYY-MM-DD`，默认今天
    pub date: Option<String>,
    /// 桶宽（分钟），默认60
    pub width: Option<u32>,
}

/// 预测查询参数
#[derive(Debug, Deserialize)]
pub struct PredictQueryParams {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn bucket_width(width: Option<u32>) -> ApiResult<BucketWidth> {
    Ok(width.map(BucketWidth::new).transpose()?.unwrap_or_default())
}

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "ER Tracking API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1"
        }
    }))
}

/// 健康检查处理器
pub async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let last_refresh = state
        .latest
        .get()
        .await
        .map(|snapshot| snapshot.generated_at.to_string());

    Json(json!({
        "status": "healthy",
        "timestamp": Local::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "last_refresh": last_refresh,
        "forecast_model_loaded": state.forecaster.is_some()
    }))
}

/// 当天实时曲线，优先返回刷新任务发布的结果
pub async fn graph_data(
    State(state): State<SharedState>,
    Query(params): Query<OccupancyQueryParams>,
) -> ApiResult<Json<BucketedSeries>> {
    let width = bucket_width(params.width)?;
    let now = now();

    if let Some(snapshot) = state.latest.get().await {
        if snapshot.generated_at.date() == now.date() {
            if let Some(series) = snapshot.series_for(width) {
                return Ok(Json(series.clone()));
            }
        }
    }

    debug!("No published {}-minute series, computing on demand", width.minutes());
    let request = OccupancyRequest::as_of(now.date(), width, now)?;
    let records = state.store.load_all().await?;
    Ok(Json(reconstruct(&records, &request)))
}

/// 任意（非未来）日期的在院人数曲线
pub async fn occupancy(
    State(state): State<SharedState>,
    Query(params): Query<OccupancyQueryParams>,
) -> ApiResult<Json<BucketedSeries>> {
    let width = bucket_width(params.width)?;
    let now = now();
    let date = match params.date.as_deref() {
        Some(value) => parse_date(value)?,
        None => now.date(),
    };
    let request = OccupancyRequest::as_of(date, width, now)?;

    let records = state.store.load_all().await?;
    let series = reconstruct(&records, &request);
    if series.has_negative() {
        warn!("Negative occupancy reconstructed for {}", date);
    }

    Ok(Json(series))
}

/// 当前在院人数
pub async fn admitted_patients(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let records = state.store.load_all().await?;
    let count = records.iter().filter(|r| r.is_admitted()).count();

    Ok(Json(json!({ "num_admitted_patients": count })))
}

/// 当前在院患者名单
pub async fn list_patients(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let records = state.store.load_all().await?;
    let current = admitted(&records);

    if let Some(path) = state.list_export_file.clone() {
        let snapshot = current.clone();
        let exported = tokio::task::spawn_blocking(move || export_records(&path, &snapshot))
            .await
            .map_err(|e| ErError::Internal(format!("export task failed: {}", e)))?;
        if let Err(e) = exported {
            warn!("Failed to export current patient list: {}", e);
        }
    }

    Ok(Json(json!({
        "status": "success",
        "count": current.len(),
        "current_patients": current
    })))
}

/// 某医院的患者记录
pub async fn hospital_patients(
    State(state): State<SharedState>,
    Path(hospital_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let records = state.store.load_all().await?;
    let patients = for_hospital(&records, &hospital_id);
    let admitted_count = patients.iter().filter(|r| r.is_admitted()).count();

    Ok(Json(json!({
        "hospital_id": hospital_id,
        "count": patients.len(),
        "admitted": admitted_count,
        "patients": patients
    })))
}

/// 登记新患者
pub async fn add_patient(
    State(state): State<SharedState>,
    Json(record): Json<AdmissionRecord>,
) -> ApiResult<impl IntoResponse> {
    let patient_id = record.patient_id.clone();
    state.store.append(record).await?;

    info!("Patient {} added", patient_id);
    Ok(Json(json!({
        "status": "success",
        "message": "Patient added successfully"
    })))
}

/// 办理出院
pub async fn discharge_patient(
    State(state): State<SharedState>,
    Path(patient_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = state.store.discharge(&patient_id, now()).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Patient {} discharged successfully", patient_id),
        "Leave_Date": record.leave_date,
        "Leave_Time": record.leave_time
    })))
}

/// 月度就诊量预测
pub async fn predict(
    State(state): State<SharedState>,
    Query(params): Query<PredictQueryParams>,
) -> ApiResult<Json<MonthlyForecast>> {
    let model = state
        .forecaster
        .as_ref()
        .ok_or_else(|| ApiError(ErError::data_unavailable("no forecast model loaded")))?;

    let today = Local::now().date_naive();
    let month = params.month.unwrap_or_else(|| today.month());
    let year = params.year.unwrap_or_else(|| today.year());

    Ok(Json(model.predict_month(year, month)?))
}
