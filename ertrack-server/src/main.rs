//! 急诊追踪服务器主程序

use anyhow::{Context, Result};
use clap::Parser;
use ertrack_admin::{init_logging, ConfigManager, OccupancyRefresher};
use ertrack_core::VolumeModel;
use ertrack_storage::{CsvRecordStore, RecordStore};
use ertrack_web::{resolve_addr, AppState, WebServer};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 急诊追踪服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "ertrack-server")]
#[command(about = "ER 患者追踪与在院人数服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 患者记录CSV文件
    #[arg(short, long)]
    data_file: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,

    /// 打印合并后的配置并退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut manager = ConfigManager::load(args.config.as_deref())?;
    manager.update(|config| {
        if let Some(host) = args.host.clone() {
            config.server.host = host;
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(data_file) = args.data_file.clone() {
            config.storage.data_file = data_file;
        }
        if let Some(level) = args.log_level.clone() {
            config.logging.level = level;
        }
    })?;

    if args.print_config {
        println!("{}", manager.to_toml()?);
        return Ok(());
    }

    // 配置来源在订阅器安装后记录
    let source = manager.source();
    let config = manager.into_config();
    init_logging(&config.logging)?;

    info!("启动急诊追踪服务器...");
    info!("  配置来源: {}", source);
    info!("  服务名称: {}", config.server.name);
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  数据文件: {}", config.storage.data_file);

    // 记录存储
    let csv_store = CsvRecordStore::new(&config.storage.data_file);
    if config.storage.create_if_missing && csv_store.ensure_exists().await? {
        info!("Created empty data file {}", config.storage.data_file);
    }
    let store: Arc<dyn RecordStore> = Arc::new(csv_store);

    // 在院人数刷新任务
    let refresher = OccupancyRefresher::from_config(store.clone(), &config.occupancy)?;
    let mut state = AppState::new(store, refresher.latest());
    let _refresh_task = refresher.spawn();

    // 预测模型加载失败不影响其它接口
    if let Some(model_file) = &config.forecast.model_file {
        match VolumeModel::load(model_file) {
            Ok(model) => state = state.with_forecaster(model),
            Err(e) => warn!("Forecast disabled: {}", e),
        }
    }

    if let Some(export) = &config.storage.list_export_file {
        state = state.with_list_export(export);
    }

    let addr = resolve_addr(&config.server.host, config.server.port)
        .await
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let server = WebServer::new(addr, state, &config.web);
    if let Err(e) = server.run().await {
        error!("服务器启动失败: {}", e);
        return Err(e.into());
    }

    Ok(())
}
