#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use snmp_collector::collector::user_profile::{ProfileProvider, ProfileStore, YamlProfileProvider};
use snmp_collector::config::AppConfig;
use snmp_collector::config::settings::UserProfileConfig;
use snmp_collector::feeder::MemoryFeeder;
use snmp_collector::service::Collector;
use snmp_collector::snmp::PduValue;
use snmp_collector::snmp::mock::{MockSession, MockSessionFactory};
use tokio_util::sync::CancellationToken;

pub const PROFILE: &str = r#"
zabbix_export:
  templates:
    - name: Template Net
      items:
        - name: Uptime
          snmp_oid: .1.3.6.1.2.1.1.3.0
          key: 'system.net.uptime[sysUpTime.0]'
        - name: Location
          snmp_oid: 1.3.6.1.2.1.1.6.0
          key: 'system.location[sysLocation.0]'
"#;

/// Профиль из строки; тип устройства задается тестом.
pub struct InlineProvider {
    pub device_type: &'static str,
}

impl ProfileProvider for InlineProvider {
    fn read_profile(&self, config: &UserProfileConfig) -> anyhow::Result<ProfileStore> {
        let mut definition = YamlProfileProvider::parse(PROFILE)?;
        definition.zabbix_export.format_oids();
        definition.profile_name = config.profile_name.clone();
        definition.class = config.class.clone();
        definition.device_type = self.device_type.to_string();
        Ok(ProfileStore {
            file_name: config.profile_name.clone(),
            ip_list: config.ip_list.clone(),
            definition,
        })
    }
}

pub fn agent() -> MockSession {
    let mock = MockSession::default();
    mock.set_agent_value("1.3.6.1.2.1.1.1.0", PduValue::OctetString(b"Linux box".to_vec()))
        .set_agent_value("1.3.6.1.2.1.1.2.0", PduValue::ObjectIdentifier("1.3.6.1.4.1.9.1.1".into()))
        .set_agent_value("1.3.6.1.2.1.1.3.0", PduValue::TimeTicks(204572431))
        .set_agent_value("1.3.6.1.2.1.1.5.0", PduValue::OctetString(b"edge-1".to_vec()))
        .set_agent_value("1.3.6.1.2.1.1.6.0", PduValue::OctetString(b"Shenzhen China".to_vec()))
        .set_agent_value("1.3.6.1.2.1.2.2.1.14.1", PduValue::Counter32(3))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.1.1", PduValue::OctetString(b"eth0".to_vec()));
    mock
}

pub struct Harness {
    pub collector: Arc<Collector>,
    pub factory: MockSessionFactory,
    pub feeder: MemoryFeeder,
    pub exit: CancellationToken,
}

pub async fn harness(yaml: &str, factory: MockSessionFactory, device_type: &'static str) -> Harness {
    let config = AppConfig::from_yaml(yaml).unwrap();
    let feeder = MemoryFeeder::new();
    let exit = CancellationToken::new();
    let collector = Collector::new(
        config,
        Arc::new(factory.clone()),
        Arc::new(feeder.clone()),
        &InlineProvider { device_type },
        exit.clone(),
    )
    .await
    .unwrap();
    Harness {
        collector,
        factory,
        feeder,
        exit,
    }
}

/// Ждет выполнения условия не дольше двух секунд.
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
