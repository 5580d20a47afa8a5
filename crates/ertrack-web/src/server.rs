//! Web服务器

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use ertrack_admin::{config::WebConfig, LatestOccupancy};
use ertrack_core::{ErError, Result, VolumeModel};
use ertrack_storage::RecordStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::handlers::{
    add_patient, admitted_patients, api_root, discharge_patient, graph_data, health,
    hospital_patients, list_patients, occupancy, predict,
};

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    /// 患者记录存储
    pub store: Arc<dyn RecordStore>,
    /// 刷新任务发布的最新快照
    pub latest: LatestOccupancy,
    /// 就诊量预测模型，未配置时为空
    pub forecaster: Option<Arc<VolumeModel>>,
    /// `/list` 导出文件
    pub list_export_file: Option<PathBuf>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>, latest: LatestOccupancy) -> Self {
        Self {
            store,
            latest,
            forecaster: None,
            list_export_file: None,
        }
    }

    pub fn with_forecaster(mut self, model: VolumeModel) -> Self {
        self.forecaster = Some(Arc::new(model));
        self
    }

    pub fn with_list_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.list_export_file = Some(path.into());
        self
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, web: &WebConfig) -> Self {
        let app = Self::create_app(Arc::new(state), web);

        Self { addr, app }
    }

    pub fn create_app(state: SharedState, web: &WebConfig) -> Router {
        Router::new()
            // 根路径
            .route("/", get(api_root))

            // 健康检查
            .route("/health", get(health))

            // API路由
            .nest("/api/v1", api_routes())
            .with_state(state)

            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .option_layer(cors_layer(web)),
            )
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;

        Ok(())
    }
}

/// 解析监听地址，主机名（如 `localhost`）取第一个解析结果
pub async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ErError::invalid_input(format!("host {} did not resolve to any address", host)))
}

/// API v1 路由
fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(api_root))
        .route("/graph-data", get(graph_data))
        .route("/occupancy", get(occupancy))
        .route("/admitted-patients", get(admitted_patients))
        .route("/list", get(list_patients))
        .route("/hospitals/:hospital_id/patients", get(hospital_patients))
        .route("/add-patient", post(add_patient))
        .route("/discharge/:patient_id", post(discharge_patient))
        .route("/predict", get(predict))
}

fn cors_layer(web: &WebConfig) -> Option<CorsLayer> {
    if !web.enable_cors {
        return None;
    }

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if web.cors_allowed_origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }

    let origins: Vec<HeaderValue> = web
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    Some(layer.allow_origin(AllowOrigin::list(origins)))
}
