use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::user_profile::{KeyRules, UserProfileDefinition, collect_user_points};
use super::{FetchOptions, OidConfig, ResultValueStore, SnmpCollector};
use crate::config::profile::{ProfileDefinition, parse_column_oids, parse_scalar_oids};
use crate::config::settings::Settings;
use crate::error::SessionError;
use crate::formatter::aggregate::{AGENT_HOST_KEY, AGENT_VERSION_KEY};
use crate::formatter::{Point, SNMP_METRIC_NAME, SNMP_OBJECT_NAME, Shape, aggregate_device_data};
use crate::metrics::{BandwidthState, MetricReporter, build_device_meta, get_scalar_tags};
use crate::snmp::Session;
use crate::snmp::session::DEVICE_REACHABLE_GET_NEXT_OID;

pub const SUBNET_TAG_KEY: &str = "autodiscovery_subnet";

/// Общие для всех устройств параметры сбора.
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    pub namespace: String,
    pub input_tags: BTreeMap<String, String>,
    pub oid_batch_size: usize,
    pub bulk_max_repetitions: u32,
    pub picked_fields: Option<HashSet<String>>,
    pub key_rules: KeyRules,
    pub agent_host: String,
    pub agent_version: String,
}

impl DeviceOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            namespace: settings.device_namespace.clone(),
            input_tags: settings.tags.clone(),
            oid_batch_size: settings.oid_batch_size,
            bulk_max_repetitions: settings.bulk_max_repetitions,
            picked_fields: settings.picked_fields(),
            key_rules: KeyRules::from_settings(settings),
            agent_host: std::env::var("HOSTNAME").unwrap_or_default(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Результат одного опроса: доступность, базовые теги и значения.
pub struct ValuesAndTags {
    pub reachable: bool,
    pub tags: Vec<String>,
    pub values: Option<ResultValueStore>,
    pub error: Option<anyhow::Error>,
}

/// Краткое описание устройства для HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Состояние одного устройства: сессия, набор OID и профиль.
///
/// Сессия закрывается в `close`; после этого любой опрос получает
/// `SessionError::Closed`.
pub struct DeviceInfo {
    pub ip: String,
    /// Подсеть автообнаружения; пусто для устройств из конфигурации.
    pub subnet: String,
    session: Mutex<Option<Box<dyn Session>>>,
    profile: Arc<ProfileDefinition>,
    oid_config: OidConfig,
    options: Arc<DeviceOptions>,
    user_profile: Option<UserProfileDefinition>,
}

impl DeviceInfo {
    pub fn new(
        ip: impl Into<String>,
        subnet: impl Into<String>,
        session: Box<dyn Session>,
        profile: Arc<ProfileDefinition>,
        options: Arc<DeviceOptions>,
    ) -> Self {
        let mut oid_config = OidConfig::default();
        oid_config.add_scalar_oids(parse_scalar_oids(
            &profile.metrics,
            &profile.metric_tags,
            &profile.metadata,
            true,
        ));
        oid_config.add_column_oids(parse_column_oids(&profile.metrics, &profile.metadata, true));

        Self {
            ip: ip.into(),
            subnet: subnet.into(),
            session: Mutex::new(Some(session)),
            profile,
            oid_config,
            options,
            user_profile: None,
        }
    }

    /// Устройство с уже подготовленным пользовательским профилем.
    pub fn with_user_profile(
        ip: impl Into<String>,
        session: Box<dyn Session>,
        definition: UserProfileDefinition,
        options: Arc<DeviceOptions>,
    ) -> Self {
        Self {
            ip: ip.into(),
            subnet: String::new(),
            session: Mutex::new(Some(session)),
            profile: Arc::new(ProfileDefinition::default()),
            oid_config: OidConfig::default(),
            options,
            user_profile: Some(definition),
        }
    }

    pub fn oid_config(&self) -> &OidConfig {
        &self.oid_config
    }

    pub fn user_profile(&self) -> Option<&UserProfileDefinition> {
        self.user_profile.as_ref()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            ip: self.ip.clone(),
            subnet: self.subnet.clone(),
            name: self.user_profile.as_ref().map(|d| d.name.clone()),
            profile: self.user_profile.as_ref().map(|d| d.profile_name.clone()),
        }
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            oid_config: self.oid_config.clone(),
            oid_batch_size: self.options.oid_batch_size,
            bulk_max_repetitions: self.options.bulk_max_repetitions,
        }
    }

    /// Проверяет доступность устройства и опрашивает все OID профиля.
    pub async fn get_values_and_tags(&self) -> ValuesAndTags {
        let mut result = ValuesAndTags {
            reachable: false,
            tags: vec![
                format!("device_namespace:{}", self.options.namespace),
                format!("snmp_device:{}", self.ip),
            ],
            values: None,
            error: None,
        };

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            result.error = Some(SessionError::Closed.into());
            return result;
        };

        if let Err(e) = session
            .get_next(&[DEVICE_REACHABLE_GET_NEXT_OID.to_string()])
            .await
        {
            result.error = Some(anyhow::Error::new(e).context(format!(
                "check device reachable: failed ({})",
                self.ip
            )));
            return result;
        }
        result.reachable = true;

        match SnmpCollector::fetch(session.as_mut(), &self.fetch_options()).await {
            Ok(values) => {
                result
                    .tags
                    .extend(get_scalar_tags(&self.profile.metric_tags, &values));
                result.values = Some(values);
            }
            Err(e) => result.error = Some(e.context("failed to fetch values")),
        }
        result
    }

    /// Собирает записи object или metric по профилю метрик.
    pub async fn collect(
        &self,
        bandwidth: &BandwidthState,
        collect_object: bool,
        time: DateTime<Utc>,
    ) -> Vec<Point> {
        let ValuesAndTags {
            reachable,
            mut tags,
            values,
            error,
        } = self.get_values_and_tags().await;

        if let Some(e) = error {
            if is_session_closed(&e) && !self.subnet.is_empty() {
                // устройство уже удалено автообнаружением
                return Vec::new();
            }
            warn!(ip = %self.ip, error = %format!("{:#}", e), "Не удалось собрать значения");
        }

        let options = &self.options;
        for (k, v) in &options.input_tags {
            tags.push(format!("{}:{}", k, v));
        }
        tags.push(format!("ip:{}", self.ip));
        tags.push(format!("{}:{}", AGENT_HOST_KEY, options.agent_host));
        tags.push(format!("{}:{}", AGENT_VERSION_KEY, options.agent_version));
        if !self.subnet.is_empty() {
            tags.push(format!("{}:{}", SUBNET_TAG_KEY, self.subnet));
        }

        let timestamp = time.timestamp_millis() as f64 / 1000.0;
        let mut reporter = MetricReporter::new(bandwidth, timestamp);
        if collect_object {
            // базу скорости ведет только сбор метрик
            reporter = reporter.without_rate_updates();
        }
        if let Some(values) = &values {
            reporter.report_metrics(&self.profile.metrics, values, &tags);
        }
        let data = reporter.into_data();

        let (measurement, shape) = if collect_object {
            let empty = ResultValueStore::default();
            let device_meta = build_device_meta(
                &self.profile.metadata,
                values.as_ref().unwrap_or(&empty),
                reachable,
            );
            (
                SNMP_OBJECT_NAME,
                Shape::Object {
                    device_meta,
                    custom_tags: &options.input_tags,
                },
            )
        } else {
            (
                SNMP_METRIC_NAME,
                Shape::Metric {
                    picked_fields: options.picked_fields.as_ref(),
                },
            )
        };

        let points: Vec<Point> = aggregate_device_data(&data, shape)
            .into_iter()
            .map(|row| Point::new(measurement, row, time))
            .collect();
        debug!(ip = %self.ip, collect_object, points = points.len(), "Сбор завершен");
        points
    }

    /// Собирает записи по пользовательскому профилю.
    pub async fn collect_user(&self, collect_object: bool, time: DateTime<Utc>) -> Result<Vec<Point>> {
        let definition = self
            .user_profile
            .as_ref()
            .ok_or_else(|| anyhow!("device {} has no user profile", self.ip))?;

        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(SessionError::Closed)?;
        collect_user_points(
            session.as_mut(),
            definition,
            &self.options.key_rules,
            &self.ip,
            time,
            collect_object,
        )
        .await
    }

    /// Закрывает сессию; повторный вызов ничего не делает.
    pub async fn close(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        if let Err(e) = session.close().await {
            warn!(ip = %self.ip, error = %e, "failed to close session");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.session.lock().await.is_none()
    }
}

fn is_session_closed(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|cause| matches!(cause.downcast_ref::<SessionError>(), Some(SessionError::Closed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::snmp::PduValue;
    use crate::snmp::mock::MockSession;

    const CONFIG: &str = r#"
snmp_version: 2
v2_community_string: public
device_namespace: lab
tags:
  site: dc1
metrics:
  - MIB: IF-MIB
    table:
      OID: 1.3.6.1.2.1.2.2
      name: ifTable
    symbols:
      - OID: 1.3.6.1.2.1.2.2.1.14
        name: ifInErrors
    metric_tags:
      - tag: interface
        column:
          OID: 1.3.6.1.2.1.31.1.1.1.1
          name: ifName
"#;

    fn agent() -> MockSession {
        let mock = MockSession::default();
        mock.set_agent_value("1.3.6.1.2.1.1.1.0", PduValue::OctetString(b"Linux box".to_vec()))
            .set_agent_value("1.3.6.1.2.1.1.3.0", PduValue::TimeTicks(4200))
            .set_agent_value("1.3.6.1.2.1.1.5.0", PduValue::OctetString(b"edge-1".to_vec()))
            .set_agent_value("1.3.6.1.2.1.2.2.1.14.1", PduValue::Counter32(3))
            .set_agent_value("1.3.6.1.2.1.2.2.1.14.2", PduValue::Counter32(7))
            .set_agent_value("1.3.6.1.2.1.31.1.1.1.1.1", PduValue::OctetString(b"eth0".to_vec()))
            .set_agent_value("1.3.6.1.2.1.31.1.1.1.1.2", PduValue::OctetString(b"eth1".to_vec()));
        mock
    }

    fn device(session: MockSession, subnet: &str) -> DeviceInfo {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let options = Arc::new(DeviceOptions::from_settings(&config.settings));
        DeviceInfo::new(
            "10.0.0.1",
            subnet,
            Box::new(session),
            Arc::new(config.profile),
            options,
        )
    }

    fn time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn collects_metric_rows_per_interface() {
        let device = device(agent(), "10.0.0.0/30");
        let bandwidth = BandwidthState::new();

        let points = device.collect(&bandwidth, false, time()).await;

        let eth1 = points
            .iter()
            .find(|p| p.tags.get("interface").map(String::as_str) == Some("eth1"))
            .unwrap();
        assert_eq!(eth1.measurement, SNMP_METRIC_NAME);
        assert_eq!(eth1.field_f64("ifInErrors"), Some(7.0));
        assert_eq!(eth1.tags["host"], "10.0.0.1");
        assert_eq!(eth1.tags["device_namespace"], "lab");
        assert_eq!(eth1.tags["site"], "dc1");
        assert_eq!(eth1.tags[SUBNET_TAG_KEY], "10.0.0.0/30");
        assert!(!eth1.tags.contains_key(AGENT_HOST_KEY));
        assert_eq!(eth1.time, time());

        let uptime = points
            .iter()
            .find(|p| p.fields.contains_key("sysUpTimeInstance"))
            .unwrap();
        assert_eq!(uptime.field_f64("sysUpTimeInstance"), Some(4200.0));
    }

    #[tokio::test]
    async fn collects_single_object_record() {
        let device = device(agent(), "");
        let bandwidth = BandwidthState::new();

        let points = device.collect(&bandwidth, true, time()).await;

        assert_eq!(points.len(), 1);
        let object = &points[0];
        assert_eq!(object.measurement, SNMP_OBJECT_NAME);
        assert_eq!(object.tags["ip"], "10.0.0.1");
        assert_eq!(object.tags["site"], "dc1");
        let meta = object.field_str("device_meta").unwrap();
        assert!(meta.contains("name:edge-1"));
        assert!(meta.ends_with("status:reachable"));
        assert!(object.field_str("interfaces").unwrap().contains("eth0"));
    }

    #[tokio::test]
    async fn unreachable_device_produces_nothing() {
        let device = device(MockSession::default(), "");
        let bandwidth = BandwidthState::new();

        let values = device.get_values_and_tags().await;
        assert!(!values.reachable);
        assert!(values.error.is_some());
        assert_eq!(values.tags, vec!["device_namespace:lab", "snmp_device:10.0.0.1"]);

        assert!(device.collect(&bandwidth, false, time()).await.is_empty());
    }

    #[tokio::test]
    async fn closed_device_reports_closed_session() {
        let mock = agent();
        let device = device(mock.clone(), "10.0.0.0/30");
        device.close().await;
        device.close().await;

        assert!(mock.is_closed());
        assert!(device.is_closed().await);
        let values = device.get_values_and_tags().await;
        assert!(is_session_closed(values.error.as_ref().unwrap()));
        assert!(device.collect(&BandwidthState::new(), true, time()).await.is_empty());
    }
}
