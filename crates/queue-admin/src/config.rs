//! 配置管理
//!
//! 提供候诊队列系统的统一配置管理，支持TOML文件、环境变量覆盖和配置验证

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use queue_core::utils::normalize_department;
use queue_workflow::{QueueSettings, ServiceProfile, WaitEstimator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// 环境变量前缀，例如 `QUEUE__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "QUEUE";
/// 环境变量层级分隔符
pub const ENV_SEPARATOR: &str = "__";

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<QueueSystemConfig>>,
    /// 配置文件路径，未指定时只使用默认值与环境变量
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 候诊队列系统完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSystemConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 队列配置
    pub queue: QueueConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 队列配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 默认平均就诊时长（分钟）
    pub default_average_service_minutes: u32,
    /// 默认等待时间估算方式
    pub estimator: WaitEstimator,
    /// 科室级覆盖
    pub departments: HashMap<String, DepartmentConfig>,
    /// 启动时挂接存储订阅的科室
    pub watch_departments: Vec<String>,
}

/// 科室配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentConfig {
    /// 平均就诊时长（分钟）
    pub average_service_minutes: u32,
    /// 等待时间估算方式，未设置时沿用默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimator: Option<WaitEstimator>,
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
}

impl QueueSystemConfig {
    /// 转换为队列引擎使用的设置
    pub fn queue_settings(&self) -> QueueSettings {
        let default_profile = ServiceProfile {
            average_service_minutes: self.queue.default_average_service_minutes,
            estimator: self.queue.estimator,
        };

        let mut settings = QueueSettings {
            default_profile: default_profile.clone(),
            ..Default::default()
        };
        for (name, department) in &self.queue.departments {
            settings = settings.with_department(
                name,
                ServiceProfile {
                    average_service_minutes: department.average_service_minutes,
                    estimator: department.estimator.unwrap_or(default_profile.estimator),
                },
            );
        }
        settings
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
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
    validator: fn(&QueueSystemConfig) -> Result<()>,
    /// 错误消息
    error_message: String,
}

impl ConfigManager {
    /// 从配置文件创建配置管理器
    pub fn new(config_path: &str) -> Result<Self> {
        let config = Self::load_config(Some(config_path))?;
        Self::with_config(config, Some(config_path.to_string()))
    }

    /// 不使用配置文件，只读取默认值与环境变量
    pub fn from_env() -> Result<Self> {
        let config = Self::load_config(None)?;
        Self::with_config(config, None)
    }

    fn with_config(config: QueueSystemConfig, config_path: Option<String>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            validator,
        })
    }

    /// 加载配置：默认值 → 配置文件 → 环境变量
    fn load_config(config_path: Option<&str>) -> Result<QueueSystemConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: QueueSystemConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub async fn get_config(&self) -> QueueSystemConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 配置文件路径
    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    /// 更新配置，验证通过后写回配置文件
    pub async fn update_config(&self, new_config: QueueSystemConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if self.config_path.is_some() {
            self.save_config().await?;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .context("No configuration file to save to")?;

        let config_str = {
            let config = self.config.read().await;
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?
        };

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path);
        Ok(())
    }

    /// 重新加载配置，验证失败时保留当前配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;

        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded");
        Ok(())
    }

    /// 验证配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
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
                field_path: "queue.default_average_service_minutes".to_string(),
                validator: |config| {
                    if config.queue.default_average_service_minutes == 0 {
                        Err(anyhow::anyhow!("Average service duration cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid default average service duration".to_string(),
            },
            ValidationRule {
                field_path: "queue.departments".to_string(),
                validator: |config| {
                    for (name, department) in &config.queue.departments {
                        if normalize_department(name).is_empty() {
                            return Err(anyhow::anyhow!("Department name cannot be empty"));
                        }
                        if department.average_service_minutes == 0 {
                            return Err(anyhow::anyhow!(
                                "Average service duration of {} cannot be 0",
                                name
                            ));
                        }
                    }
                    Ok(())
                },
                error_message: "Invalid department configuration".to_string(),
            },
            ValidationRule {
                field_path: "queue.watch_departments".to_string(),
                validator: |config| {
                    if config
                        .queue
                        .watch_departments
                        .iter()
                        .any(|name| normalize_department(name).is_empty())
                    {
                        Err(anyhow::anyhow!("Watched department name cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid watched departments".to_string(),
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &QueueSystemConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!(
                    "Configuration validation failed for {}: {}",
                    rule.field_path, e
                );
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        info!("Configuration validation passed");
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
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_average_service_minutes: ServiceProfile::default().average_service_minutes,
            estimator: WaitEstimator::default(),
            departments: HashMap::new(),
            watch_departments: Vec::new(),
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
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
host = "127.0.0.1"
port = 9100

[queue]
default_average_service_minutes = 12
estimator = "flat"
watch_departments = ["cardiology"]

[queue.departments.cardiology]
average_service_minutes = 20
estimator = "include_active_remaining"

[queue.departments.ent]
average_service_minutes = 8

[logging]
level = "debug"
format = "json"
"#;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("queue.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, SAMPLE);

        let manager = ConfigManager::new(&path).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.bind_address(), "127.0.0.1:9100");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.queue.watch_departments, vec!["cardiology".to_string()]);

        let settings = config.queue_settings();
        assert_eq!(settings.profile_for("cardiology").average_service_minutes, 20);
        assert_eq!(
            settings.profile_for("cardiology").estimator,
            WaitEstimator::IncludeActiveRemaining
        );
        assert_eq!(settings.profile_for("ent").average_service_minutes, 8);
        assert_eq!(settings.profile_for("ent").estimator, WaitEstimator::Flat);
        assert_eq!(settings.profile_for("radiology").average_service_minutes, 12);
    }

    #[tokio::test]
    async fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[server]\nport = 7000\n");

        let config = ConfigManager::new(&path).unwrap().get_config().await;
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_rules() {
        let validator = ConfigValidator::new();
        assert!(validator.validate(&QueueSystemConfig::default()).is_ok());

        let mut config = QueueSystemConfig::default();
        config.server.port = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = QueueSystemConfig::default();
        config.queue.departments.insert(
            "ent".to_string(),
            DepartmentConfig {
                average_service_minutes: 0,
                estimator: None,
            },
        );
        assert!(validator.validate(&config).is_err());

        let mut config = QueueSystemConfig::default();
        config.queue.watch_departments.push("  ".to_string());
        assert!(validator.validate(&config).is_err());
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[queue]\ndefault_average_service_minutes = 0\n");
        assert!(ConfigManager::new(&path).is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, SAMPLE);
        let manager = ConfigManager::new(&path).unwrap();

        let mut config = manager.get_config().await;
        config.queue.default_average_service_minutes = 25;
        manager.update_config(config.clone()).await.unwrap();

        manager.reload_config().await.unwrap();
        let reloaded = manager.get_config().await;
        assert_eq!(reloaded.queue.default_average_service_minutes, 25);
        assert_eq!(reloaded.queue.departments, config.queue.departments);

        let mut broken = reloaded.clone();
        broken.server.port = 0;
        assert!(manager.update_config(broken).await.is_err());
        assert_eq!(manager.get_config().await.server.port, 9100);
    }
}
