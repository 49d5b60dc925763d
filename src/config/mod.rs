use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::info;

pub mod profile;
pub mod settings;

pub use profile::{MetricTagConfig, MetricsConfig, ProfileDefinition, SymbolConfig};
pub use settings::Settings;

/// Главная конфигурация приложения
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Определения метрик, тегов и метаданных
    #[serde(flatten)]
    pub profile: ProfileDefinition,
    /// Базовые настройки
    #[serde(flatten)]
    pub settings: Settings,
}

impl AppConfig {
    /// Загружает конфигурацию из YAML файла
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Не удалось прочитать конфигурацию {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Разбирает конфигурацию, применяет переменные окружения и проверяет ее
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: AppConfig =
            serde_yml::from_str(content).context("Не удалось разобрать YAML конфигурацию")?;

        config.apply_env_overrides();
        config.settings.normalize();
        config
            .settings
            .validate()
            .context("Некорректные настройки")?;
        config
            .profile
            .prepare()
            .context("Некорректные определения метрик")?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.settings.connection.timeout_secs = self.get_timeout();
        self.settings.auth.v2_community_string = self.get_community();
        self.settings.auth.v3_user = self.get_username();
        self.settings.auth.v3_auth_key = self.get_auth_password();
        self.settings.auth.v3_priv_key = self.get_privacy_password();
        self.settings.workers = self.get_workers();
    }

    /// Получает timeout из переменной окружения или из настроек
    pub fn get_timeout(&self) -> u64 {
        env::var("SNMP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.settings.connection.timeout_secs)
    }

    /// Получает community для SNMPv1/v2c
    pub fn get_community(&self) -> String {
        env::var("SNMP_COMMUNITY").unwrap_or_else(|_| self.settings.auth.v2_community_string.clone())
    }

    /// Получает username для SNMPv3
    pub fn get_username(&self) -> String {
        env::var("SNMP_USERNAME").unwrap_or_else(|_| self.settings.auth.v3_user.clone())
    }

    /// Получает auth password для SNMPv3
    pub fn get_auth_password(&self) -> String {
        env::var("SNMP_AUTH_PASSWORD").unwrap_or_else(|_| self.settings.auth.v3_auth_key.clone())
    }

    /// Получает privacy password для SNMPv3
    pub fn get_privacy_password(&self) -> String {
        env::var("SNMP_PRIVACY_PASSWORD").unwrap_or_else(|_| self.settings.auth.v3_priv_key.clone())
    }

    /// Получает размер пула обработчиков
    pub fn get_workers(&self) -> usize {
        env::var("SNMP_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.settings.workers)
    }

    pub fn debug_config(&self) {
        info!(
            version = self.settings.snmp_version,
            port = self.settings.port,
            timeout = self.settings.connection.timeout_secs,
            workers = self.settings.workers,
            devices = self.settings.specific_devices.len(),
            subnets = self.settings.auto_discovery.len(),
            metrics = self.profile.metrics.len(),
            user_profiles = self.settings.user_profiles.len(),
            "Конфигурация SNMP"
        );
    }
}
