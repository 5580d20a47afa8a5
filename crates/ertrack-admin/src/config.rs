//! 配置管理
//!
//! 配置按以下顺序叠加：内置默认值、TOML配置文件、`ERTRACK__` 前缀的
//! 环境变量（层级用 `__` 分隔，例如 `ERTRACK__SERVER__PORT=8080`）。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use ertrack_core::BucketWidth;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: ErConfig,
    /// 配置文件路径
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 系统完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ErConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 记录存储配置
    pub storage: StorageConfig,
    /// 在院人数刷新配置
    pub occupancy: OccupancyConfig,
    /// 就诊量预测配置
    pub forecast: ForecastConfig,
    /// Web服务配置
    pub web: WebConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务器名称
    pub name: String,
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 记录存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 患者记录CSV文件
    pub data_file: String,
    /// 当前患者名单导出文件
    pub list_export_file: Option<String>,
    /// 文件不存在时自动创建（仅写表头）
    pub create_if_missing: bool,
}

/// 在院人数刷新配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    /// 刷新间隔（秒）
    pub refresh_interval_secs: u64,
    /// 需要预先计算的桶宽（分钟）
    pub bucket_widths: Vec<u32>,
}

/// 就诊量预测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ForecastConfig {
    /// JSON格式的回归模型文件
    pub model_file: Option<String>,
}

/// Web服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// 启用CORS
    pub enable_cors: bool,
    /// CORS允许的源，`*` 表示任意
    pub cors_allowed_origins: Vec<String>,
}

/// 日志格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（EnvFilter语法）
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: String,
    /// 验证函数
    validator: fn(&ErConfig) -> Result<()>,
    /// 错误消息
    error_message: String,
}

impl ConfigManager {
    /// 加载并验证配置，`config_path` 为空时只使用默认值和环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config,
            config_path: config_path.map(str::to_string),
            validator,
        })
    }

    fn load_config(config_path: Option<&str>) -> Result<ErConfig> {
        let defaults = Config::try_from(&ErConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("ERTRACK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("occupancy.bucket_widths")
                    .with_list_parse_key("web.cors_allowed_origins"),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: ErConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub fn config(&self) -> &ErConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    /// 配置来源说明，供日志初始化之后输出
    pub fn source(&self) -> String {
        match &self.config_path {
            Some(path) => format!("{} + environment", path),
            None => "defaults + environment".to_string(),
        }
    }

    /// 修改配置并重新验证，验证失败时保持原配置
    pub fn update(&mut self, apply: impl FnOnce(&mut ErConfig)) -> Result<()> {
        let mut candidate = self.config.clone();
        apply(&mut candidate);
        self.validator.validate(&candidate)?;
        self.config = candidate;
        Ok(())
    }

    /// 以TOML形式输出当前配置
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config).context("Failed to serialize configuration")
    }

    pub fn into_config(self) -> ErConfig {
        self.config
    }
}

impl OccupancyConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn widths(&self) -> ertrack_core::Result<Vec<BucketWidth>> {
        self.bucket_widths
            .iter()
            .map(|minutes| BucketWidth::new(*minutes))
            .collect()
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.port".to_string(),
                validator: |config| {
                    if config.server.port == 0 {
                        Err(anyhow::anyhow!("Server port cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid server port".to_string(),
            },
            ValidationRule {
                field_path: "storage.data_file".to_string(),
                validator: |config| {
                    if config.storage.data_file.trim().is_empty() {
                        Err(anyhow::anyhow!("Data file path cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid data file".to_string(),
            },
            ValidationRule {
                field_path: "occupancy.refresh_interval_secs".to_string(),
                validator: |config| {
                    if config.occupancy.refresh_interval_secs == 0 {
                        Err(anyhow::anyhow!("Refresh interval cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid refresh interval".to_string(),
            },
            ValidationRule {
                field_path: "occupancy.bucket_widths".to_string(),
                validator: |config| {
                    if config.occupancy.bucket_widths.is_empty() {
                        return Err(anyhow::anyhow!("At least one bucket width is required"));
                    }
                    config.occupancy.widths()?;
                    Ok(())
                },
                error_message: "Invalid bucket widths".to_string(),
            },
            ValidationRule {
                field_path: "logging.level".to_string(),
                validator: |config| {
                    EnvFilter::try_new(&config.logging.level)?;
                    Ok(())
                },
                error_message: "Invalid log level".to_string(),
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ErConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "ER-Tracking".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5001,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: "pat.csv".to_string(),
            list_export_file: None,
            create_if_missing: true,
        }
    }
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
            bucket_widths: vec![60, 30],
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ErConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.occupancy.widths().unwrap(), vec![BucketWidth::HOURLY, BucketWidth::HALF_HOURLY]);
        assert_eq!(config.occupancy.refresh_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ertrack.toml");
        fs::write(
            &path,
            r#"
[server]
port = 8080

[storage]
data_file = "/var/lib/ertrack/pat.csv"
list_export_file = "/var/lib/ertrack/list.csv"

[occupancy]
bucket_widths = [15]

[logging]
format = "json"
"#,
        )
        .unwrap();

        let manager = ConfigManager::load(path.to_str()).unwrap();
        let config = manager.config();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.data_file, "/var/lib/ertrack/pat.csv");
        assert_eq!(config.storage.list_export_file.as_deref(), Some("/var/lib/ertrack/list.csv"));
        assert_eq!(config.occupancy.bucket_widths, vec![15]);
        assert_eq!(config.occupancy.refresh_interval_secs, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_rejects_bad_bucket_width() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ertrack.toml");
        fs::write(&path, "[occupancy]\nbucket_widths = [60, 7]\n").unwrap();

        assert!(ConfigManager::load(path.to_str()).is_err());
    }

    #[test]
    fn test_update_keeps_old_config_on_failure() {
        let mut manager = ConfigManager {
            config: ErConfig::default(),
            config_path: None,
            validator: ConfigValidator::new(),
        };

        assert!(manager.update(|c| c.server.port = 0).is_err());
        assert_eq!(manager.config().server.port, 5001);

        manager.update(|c| c.server.port = 9000).unwrap();
        assert_eq!(manager.config().server.port, 9000);
    }

    #[test]
    fn test_source_describes_origin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ertrack.toml");
        fs::write(&path, "[server]\nport = 8080\n").unwrap();
        let path = path.to_str().unwrap();

        let manager = ConfigManager::load(Some(path)).unwrap();
        assert_eq!(manager.config_path(), Some(path));
        assert_eq!(manager.source(), format!("{} + environment", path));

        let defaults = ConfigManager {
            config: ErConfig::default(),
            config_path: None,
            validator: ConfigValidator::new(),
        };
        assert_eq!(defaults.source(), "defaults + environment");
    }

    #[test]
    fn test_to_toml_round_trip() {
        let manager = ConfigManager {
            config: ErConfig::default(),
            config_path: None,
            validator: ConfigValidator::new(),
        };

        let rendered = manager.to_toml().unwrap();
        let parsed: ErConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, ErConfig::default());
    }
}
