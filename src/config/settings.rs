use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::discovery::Subnet;
use crate::error::{ConfigError, SessionError};
use crate::snmp::{Credentials, SessionOptions, SnmpVersion, UsmParams, v3};

pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_WORKERS: usize = 100;
pub const DEFAULT_DEVICE_NAMESPACE: &str = "default";

/// Базовые настройки приложения
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Версия протокола: 1, 2 или 3
    pub snmp_version: u8,
    pub port: u16,
    /// Настройки подключения
    #[serde(flatten)]
    pub connection: ConnectionSettings,
    /// Настройки аутентификации
    #[serde(flatten)]
    pub auth: AuthSettings,

    /// Размер пула обработчиков заданий
    pub workers: usize,
    pub specific_devices: Vec<String>,
    /// Подсети в формате CIDR для автообнаружения
    pub auto_discovery: Vec<String>,
    pub discovery_ignored_ip: Vec<String>,

    pub discovery_interval: String,
    pub object_interval: String,
    pub metric_interval: String,

    pub oid_batch_size: usize,
    pub bulk_max_repetitions: u32,
    pub device_namespace: String,

    /// Теги, добавляемые ко всем точкам
    pub tags: BTreeMap<String, String>,
    pub tags_ignore: Vec<String>,
    pub tags_ignore_regexp: Vec<String>,
    pub key_mapping: BTreeMap<String, String>,
    pub oid_keys: BTreeMap<String, String>,

    pub enable_picking_data: bool,
    #[serde(flatten)]
    pub picking: PickingSettings,

    /// Устройства приходят снимками внешнего реестра сервисов
    pub service_discovery: bool,
    pub module_regexps: Vec<ModuleRegexp>,
    pub instance_ip_key: String,
    pub user_profiles: Vec<UserProfileConfig>,

    /// Адрес HTTP сервера состояния, например `0.0.0.0:8080`
    pub http_listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Таймаут для SNMP операций (секунды)
    pub timeout_secs: u64,
    /// Количество повторов при ошибках
    pub retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Community string для v1/v2c
    pub v2_community_string: String,
    pub v3_user: String,
    pub v3_auth_protocol: String,
    pub v3_auth_key: String,
    pub v3_priv_protocol: String,
    pub v3_priv_key: String,
    pub v3_context_engine_id: String,
    pub v3_context_name: String,
}

/// Списки полей, которые оставляются в метриках при `enable_picking_data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PickingSettings {
    pub status: Vec<String>,
    pub speed: Vec<String>,
    pub cpu: Vec<String>,
    pub mem: Vec<String>,
    pub extra: Vec<String>,
}

/// Правило сопоставления записи service discovery с типом устройства.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleRegexp {
    pub module: String,
    pub matches: Vec<FieldMatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMatch {
    pub field: String,
    pub regexp: String,
}

/// Пользовательский профиль и адреса устройств, к которым он относится.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfileConfig {
    /// Путь к YAML файлу профиля
    pub profile_name: String,
    pub ip_list: Vec<String>,
    /// Класс устройства: server, printer, ...
    pub class: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            retries: 3,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            snmp_version: 2,
            port: DEFAULT_PORT,
            connection: ConnectionSettings::default(),
            auth: AuthSettings::default(),
            workers: DEFAULT_WORKERS,
            specific_devices: Vec::new(),
            auto_discovery: Vec::new(),
            discovery_ignored_ip: Vec::new(),
            discovery_interval: "1h".to_string(),
            object_interval: "5m".to_string(),
            metric_interval: "10s".to_string(),
            oid_batch_size: crate::collector::DEFAULT_OID_BATCH_SIZE,
            bulk_max_repetitions: crate::collector::DEFAULT_BULK_MAX_REPETITIONS,
            device_namespace: DEFAULT_DEVICE_NAMESPACE.to_string(),
            tags: BTreeMap::new(),
            tags_ignore: Vec::new(),
            tags_ignore_regexp: Vec::new(),
            key_mapping: BTreeMap::new(),
            oid_keys: BTreeMap::new(),
            enable_picking_data: false,
            picking: PickingSettings::default(),
            service_discovery: false,
            module_regexps: Vec::new(),
            instance_ip_key: "ip".to_string(),
            user_profiles: Vec::new(),
            http_listen: None,
        }
    }
}

impl Settings {
    /// Подставляет значения по умолчанию вместо пустых.
    pub fn normalize(&mut self) {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.device_namespace.is_empty() {
            self.device_namespace = DEFAULT_DEVICE_NAMESPACE.to_string();
        }
        if self.discovery_interval.is_empty() {
            self.discovery_interval = "1h".to_string();
        }
        if self.object_interval.is_empty() {
            self.object_interval = "5m".to_string();
        }
        if self.metric_interval.is_empty() {
            self.metric_interval = "10s".to_string();
        }
        if self.oid_batch_size == 0 {
            self.oid_batch_size = crate::collector::DEFAULT_OID_BATCH_SIZE;
        }
        if self.bulk_max_repetitions == 0 {
            self.bulk_max_repetitions = crate::collector::DEFAULT_BULK_MAX_REPETITIONS;
        }
        self.specific_devices.retain(|ip| !ip.is_empty());
        self.auto_discovery.retain(|cidr| !cidr.is_empty());
        self.discovery_ignored_ip.retain(|ip| !ip.is_empty());
    }

    /// Проверки, без которых сбор не запускается.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.snmp_version, 1..=3) {
            return Err(ConfigError::InvalidVersion);
        }
        for cidr in &self.auto_discovery {
            Subnet::parse(cidr)?;
        }
        for ip in &self.specific_devices {
            ip.parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidIp(ip.clone()))?;
        }
        self.discovery_interval()?;
        self.object_interval()?;
        self.metric_interval()?;
        Ok(())
    }

    pub fn discovery_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.discovery_interval)
    }

    pub fn object_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.object_interval)
    }

    pub fn metric_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.metric_interval)
    }

    /// Имена полей для фильтрации метрик, `None` если фильтр выключен.
    pub fn picked_fields(&self) -> Option<HashSet<String>> {
        if !self.enable_picking_data {
            return None;
        }
        let p = &self.picking;
        Some(
            p.status
                .iter()
                .chain(&p.speed)
                .chain(&p.cpu)
                .chain(&p.mem)
                .chain(&p.extra)
                .cloned()
                .collect(),
        )
    }

    /// Компилирует `tags_ignore_regexp`; ошибочные выражения пропускаются.
    pub fn tags_ignore_rules(&self) -> Vec<Regex> {
        self.tags_ignore_regexp
            .iter()
            .filter_map(|s| match Regex::new(s) {
                Ok(re) => Some(re),
                Err(e) => {
                    error!(regexp = %s, error = %e, "Не удалось разобрать регулярное выражение");
                    None
                }
            })
            .collect()
    }

    /// Параметры подключения к устройству `ip`.
    ///
    /// `community` позволяет профилю переопределить community из настроек.
    pub fn session_options(
        &self,
        ip: &str,
        community: Option<&str>,
    ) -> Result<SessionOptions, SessionError> {
        let version = SnmpVersion::from_number(self.snmp_version)?;
        let community = community
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.auth.v2_community_string);

        let credentials = match version {
            SnmpVersion::V1 | SnmpVersion::V2c if !community.is_empty() => {
                Credentials::Community(community.to_string())
            }
            SnmpVersion::V3 if !self.auth.v3_user.is_empty() => {
                // проверяем протоколы заранее, чтобы ошибка была видна при старте
                v3::parse_auth_protocol(&self.auth.v3_auth_protocol)?;
                v3::parse_privacy_protocol(&self.auth.v3_priv_protocol)?;
                Credentials::Usm(UsmParams {
                    user: self.auth.v3_user.clone(),
                    auth_protocol: self.auth.v3_auth_protocol.clone(),
                    auth_key: self.auth.v3_auth_key.clone(),
                    priv_protocol: self.auth.v3_priv_protocol.clone(),
                    priv_key: self.auth.v3_priv_key.clone(),
                    context_engine_id: self.auth.v3_context_engine_id.clone(),
                    context_name: self.auth.v3_context_name.clone(),
                })
            }
            _ => return Err(SessionError::NoAuthentication),
        };

        Ok(SessionOptions {
            ip: ip.to_string(),
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            version,
            credentials,
            timeout_secs: self.connection.timeout_secs,
            retries: self.connection.retries,
        })
    }
}

/// Разбирает длительность вида `10s`, `5m`, `1h30m`, `500ms`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(value.to_string());
    let mut rest = value.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount * 60),
            "h" => Duration::from_secs(amount * 3600),
            _ => return Err(invalid()),
        };
        total += unit;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ten seconds").is_err());
    }

    #[test]
    fn rejects_bad_version_and_addresses() {
        let mut settings = Settings {
            snmp_version: 4,
            ..Default::default()
        };
        assert_eq!(
            settings.validate().unwrap_err().to_string(),
            "`snmp_version` must be 1 or 2 or 3"
        );

        settings.snmp_version = 2;
        settings.specific_devices = vec!["10.0.0.300".into()];
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidIp(_))));

        settings.specific_devices.clear();
        settings.auto_discovery = vec!["10.0.0.0/33".into()];
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn builds_session_options() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.session_options("10.0.0.1", None).unwrap_err().to_string(),
            "no authentication mechanism specified"
        );

        settings.auth.v2_community_string = "public".into();
        let options = settings.session_options("10.0.0.1", Some("private")).unwrap();
        assert_eq!(options.credentials, Credentials::Community("private".into()));
        assert_eq!(options.target(), "10.0.0.1:161");

        settings.snmp_version = 3;
        settings.auth.v3_user = "admin".into();
        settings.auth.v3_auth_protocol = "md4".into();
        assert_eq!(
            settings.session_options("10.0.0.1", None).unwrap_err().to_string(),
            "unsupported authentication protocol: md4"
        );

        settings.snmp_version = 5;
        assert_eq!(
            settings.session_options("10.0.0.1", None).unwrap_err().to_string(),
            "SNMP version not supported: 5"
        );
    }

    #[test]
    fn reads_flat_yaml() {
        let settings: Settings = serde_yml::from_str(
            r#"
snmp_version: 3
v3_user: admin
v3_auth_protocol: SHA
timeout_secs: 2
enable_picking_data: true
cpu: [cpuUsage]
auto_discovery: ["10.0.0.0/30"]
"#,
        )
        .unwrap();
        assert_eq!(settings.auth.v3_user, "admin");
        assert_eq!(settings.connection.timeout_secs, 2);
        assert_eq!(settings.connection.retries, 3);
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert!(settings.picked_fields().unwrap().contains("cpuUsage"));
        settings.validate().unwrap();
    }
}
