use chrono::{DateTime, Utc};

use super::{UNKNOWN, UserProfileDefinition, YamlProfileProvider};
use crate::snmp::PduValue;
use crate::snmp::mock::MockSession;

const PROFILE: &str = r#"
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
        - name: Temperature
          snmp_oid: 1.3.6.1.4.1.9.9.13.1.3.1.3.1
          key: sensor.temp.value
          preprocessing:
            - type: DISCARD_UNCHANGED_HEARTBEAT
              parameters:
                - 6h
            - type: MULTIPLIER
              parameters:
                - '0.1'
        - name: Missing
          snmp_oid: 1.3.6.1.4.1.9.9.999.0
          key: missing.value
      discovery_rules:
        - name: Interfaces
          snmp_oid: 'discovery[{#IFOPERSTATUS},1.3.6.1.2.1.2.2.1.8,{#IFNAME},1.3.6.1.2.1.31.1.1.1.1]'
          filter:
            evaltype: AND
            conditions:
              - macro: '{#IFOPERSTATUS}'
                value: '1'
                formulaid: A
              - macro: '{#IFNAME}'
                value: '^lo'
                operator: NOT_MATCHES_REGEX
                formulaid: B
          item_prototypes:
            - name: 'Interface {#IFNAME}: Bits received'
              snmp_oid: '1.3.6.1.2.1.31.1.1.1.6.{#SNMPINDEX}'
              key: 'net.if.in[ifHCInOctets.{#SNMPINDEX}]'
              tags:
                - tag: component
                  value: network
                - tag: component
                  value: interface
                - tag: interface
                  value: '{#IFNAME}'
"#;

pub(super) fn agent() -> MockSession {
    let mock = MockSession::default();
    mock.set_agent_value("1.3.6.1.2.1.1.2.0", PduValue::ObjectIdentifier(".1.3.6.1.4.1.9.1.1".into()))
        .set_agent_value("1.3.6.1.2.1.1.3.0", PduValue::TimeTicks(204572431))
        .set_agent_value("1.3.6.1.2.1.1.5.0", PduValue::OctetString(b"core-sw".to_vec()))
        .set_agent_value("1.3.6.1.2.1.1.6.0", PduValue::OctetString(b"Shenzhen China".to_vec()))
        .set_agent_value("1.3.6.1.2.1.2.2.1.8.1", PduValue::Integer(1))
        .set_agent_value("1.3.6.1.2.1.2.2.1.8.2", PduValue::Integer(1))
        .set_agent_value("1.3.6.1.2.1.2.2.1.8.3", PduValue::Integer(2))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.1.1", PduValue::OctetString(b"lo".to_vec()))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.1.2", PduValue::OctetString(b"eth0".to_vec()))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.1.3", PduValue::OctetString(b"eth1".to_vec()))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.6.1", PduValue::Counter64(100))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.6.2", PduValue::Counter64(200))
        .set_agent_value("1.3.6.1.2.1.31.1.1.1.6.3", PduValue::Counter64(300))
        .set_agent_value("1.3.6.1.4.1.9.9.13.1.3.1.3.1", PduValue::Gauge32(415));
    mock
}

pub(super) fn definition() -> UserProfileDefinition {
    let mut definition = YamlProfileProvider::parse(PROFILE).unwrap();
    definition.zabbix_export.format_oids();
    definition.class = "switch".into();
    definition.device_type = UNKNOWN.into();
    definition
}

pub(super) fn time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}
