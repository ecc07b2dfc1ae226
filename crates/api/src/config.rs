//! 应用配置
//!
//! TOML配置文件加载，`ESCALATOR__`前缀的环境变量可覆盖任意字段，
//! 如 `ESCALATOR__CRON__SECRET`。

use escalator_errors::{EscalatorError, EscalatorResult};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub cron: CronConfig,
    pub resend: ResendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// 外部定时触发器携带的共享密钥
#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendConfig {
    pub api_key: String,
    #[serde(default = "default_from_address")]
    pub from: String,
}

fn default_max_connections() -> u32 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_from_address() -> String {
    "AccountaList <noreply@accountalist.com>".to_string()
}

impl AppConfig {
    pub fn load(path: &str) -> EscalatorResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ESCALATOR").separator("__"))
            .build()
            .map_err(|e| EscalatorError::Configuration(e.to_string()))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| EscalatorError::Configuration(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> EscalatorResult<()> {
        if self.database.url.is_empty() {
            return Err(EscalatorError::config_error("database.url 不能为空"));
        }
        if self.cron.secret.is_empty() {
            return Err(EscalatorError::config_error("cron.secret 不能为空"));
        }
        if self.resend.api_key.is_empty() {
            return Err(EscalatorError::config_error("resend.api_key 不能为空"));
        }
        Ok(())
    }
}
