//! Записи устройств с пользовательским профилем.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, warn};

use super::{
    HOST_UPTIME_OID, Item, ItemKind, KeyRules, NET_UPTIME_OID, UserProfileDefinition, format_oid,
    kind_to_string, packet_value,
};
use crate::collector::types::{ResultValue, Value};
use crate::formatter::json::{Fields, Point, TagField, Tags};
use crate::snmp::Session;
use crate::snmp::session::DEVICE_REACHABLE_GET_NEXT_OID;

/// Максимум OID в одном GET при сборе прототипов.
const MAX_OIDS_PER_GET: usize = 60;

/// Собирает записи устройства с пользовательским профилем.
///
/// Для объекта возвращается одна запись, для метрик по записи на элемент и
/// на каждую строку прототипов.
pub async fn collect_user_points(
    session: &mut dyn Session,
    definition: &UserProfileDefinition,
    rules: &KeyRules,
    ip: &str,
    time: DateTime<Utc>,
    collect_object: bool,
) -> Result<Vec<Point>> {
    session
        .get_next(&[DEVICE_REACHABLE_GET_NEXT_OID.to_string()])
        .await
        .with_context(|| format!("check {} device reachable: failed", ip))?;

    if collect_object {
        let point = user_object_point(session, definition, rules, ip, time).await;
        return Ok(vec![point]);
    }

    let mut points = user_metric_points(session, definition, rules, ip, time).await;
    for item in &definition.discovery_items {
        points.extend(user_discovery_points(session, definition, rules, item, ip, time).await);
    }
    Ok(points)
}

fn add_device_tags(tags: &mut Tags, definition: &UserProfileDefinition, rules: &KeyRules) {
    rules.add_tag(tags, "name", &definition.name);
    rules.add_tag(tags, "sys_name", &definition.sys_name);
    rules.add_tag(tags, "sys_object_id", &definition.sys_object_id);
    rules.add_tag(tags, "device_type", &definition.device_type);
}

async fn user_object_point(
    session: &mut dyn Session,
    definition: &UserProfileDefinition,
    rules: &KeyRules,
    ip: &str,
    time: DateTime<Utc>,
) -> Point {
    let defaults = [
        Item::new(NET_UPTIME_OID, "netUptime"),
        Item::new(HOST_UPTIME_OID, "uptime"),
    ];
    let items: &[Item] = if definition.items.is_empty() {
        &defaults
    } else {
        &definition.items
    };

    let mut fields = Fields::new();
    for item in items {
        if item.snmp_oid.is_empty() || item.key.is_empty() {
            continue;
        }
        match session.get(&[item.snmp_oid.clone()]).await {
            Ok(packet) => {
                if let Some(ItemKind::Numeric(f)) = packet_value(&packet) {
                    fields.insert(item.key.clone(), json!(f));
                }
            }
            Err(e) => debug!(oid = %item.snmp_oid, error = %e, "get snmp: failed"),
        }
    }

    let mut tags = Tags::new();
    rules.add_tag(&mut tags, "ip", ip);
    add_device_tags(&mut tags, definition, rules);
    for (k, v) in &definition.input_tags {
        rules.add_tag(&mut tags, k, v);
    }

    for item in &definition.string_items {
        if item.snmp_oid.is_empty() || item.key.is_empty() {
            continue;
        }
        match session.get(&[item.snmp_oid.clone()]).await {
            Ok(packet) => {
                if let Some(kind) = packet_value(&packet) {
                    fields.insert(item.key.clone(), json!(kind_to_string(kind)));
                }
            }
            Err(e) => debug!(oid = %item.snmp_oid, error = %e, "get snmp: failed"),
        }
    }

    Point::new(definition.class_name(), TagField { tags, fields }, time)
}

async fn user_metric_points(
    session: &mut dyn Session,
    definition: &UserProfileDefinition,
    rules: &KeyRules,
    ip: &str,
    time: DateTime<Utc>,
) -> Vec<Point> {
    let mut points = Vec::new();

    for item in &definition.items {
        if item.snmp_oid.is_empty() || item.key.is_empty() {
            continue;
        }
        let packet = match session.get(&[item.snmp_oid.clone()]).await {
            Ok(packet) => packet,
            Err(e) => {
                debug!(oid = %item.snmp_oid, error = %e, "get snmp: failed");
                continue;
            }
        };
        let Some(ItemKind::Numeric(f)) = packet_value(&packet) else {
            continue;
        };

        let mut tags = Tags::new();
        rules.add_tag(&mut tags, "ip", ip);
        rules.add_tag(&mut tags, "oid", &item.snmp_oid);
        add_device_tags(&mut tags, definition, rules);
        for (k, v) in item.item_tags() {
            rules.add_tag(&mut tags, &k, &v);
        }
        for (k, v) in &definition.input_tags {
            rules.add_tag(&mut tags, k, v);
        }

        let fields = Fields::from([(item.key.clone(), json!(item.preprocess(f)))]);
        points.push(Point::new(
            definition.class_name(),
            TagField { tags, fields },
            time,
        ));
    }

    points
}

async fn user_discovery_points(
    session: &mut dyn Session,
    definition: &UserProfileDefinition,
    rules: &KeyRules,
    item: &Item,
    ip: &str,
    time: DateTime<Utc>,
) -> Vec<Point> {
    if item.oids.is_empty() || item.key.is_empty() {
        return Vec::new();
    }

    let mut points = Vec::new();
    for chunk in item.oids.chunks(MAX_OIDS_PER_GET) {
        let packet = match session.get(chunk).await {
            Ok(packet) => packet,
            Err(e) => {
                warn!(ip, oid = %item.snmp_oid, error = %e, "SNMP session.Get failed");
                return Vec::new();
            }
        };

        for varbind in &packet.variables {
            let f = match ResultValue::from_varbind(varbind) {
                Ok((_, ResultValue { value: Value::Float(f), .. })) => f,
                Ok(_) => continue,
                Err(e) => {
                    debug!(oid = %varbind.oid, error = %e, "Значение прототипа не разобрано");
                    continue;
                }
            };
            let index = get_snmp_index(&varbind.oid);

            let mut tags = Tags::new();
            rules.add_tag(&mut tags, "ip", ip);
            if index.is_empty() {
                rules.add_tag(&mut tags, "oid", &item.snmp_oid);
            } else {
                rules.add_tag(&mut tags, "oid", &format!("{}.{}", item.snmp_oid, index));
                // теги из макросов, например DISK_NAME=raid1-sys
                for (name, values) in &item.macros {
                    if let Some(v) = values.get(&index) {
                        rules.add_tag(&mut tags, &rules.tag_name(name), v);
                    }
                }
            }
            add_device_tags(&mut tags, definition, rules);
            for (k, v) in item.item_tags() {
                rules.add_tag(&mut tags, &k, &v);
            }
            for (k, v) in &definition.input_tags {
                rules.add_tag(&mut tags, k, v);
            }

            let fields = Fields::from([(item.key.clone(), json!(item.preprocess(f)))]);
            points.push(Point::new(
                definition.class_name(),
                TagField { tags, fields },
                time,
            ));
        }
    }

    points
}

/// Индекс строки: последняя дуга OID, если она числовая.
fn get_snmp_index(oid: &str) -> String {
    let oid = format_oid(oid);
    let last = oid.rsplit('.').next().unwrap_or_default();
    if last.parse::<i64>().is_ok() {
        last.to_string()
    } else {
        debug!(oid, "get snmpIndex fail");
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::testing::{agent, definition, time};
    use super::*;

    #[tokio::test]
    async fn collects_object_and_metric_points() {
        let mock = agent();
        let mut session = mock.clone();
        let mut definition = definition();
        definition.input_tags.insert("site".into(), "sz".into());
        let rules = KeyRules {
            key_mapping: BTreeMap::from([("IFNAME".to_string(), "interface".to_string())]),
            tags_ignore: vec!["sys_object_id".into()],
            ..Default::default()
        };
        definition.pre_process(&mut session, "10.0.0.1", &rules).await.unwrap();

        let object = collect_user_points(&mut session, &definition, &rules, "10.0.0.1", time(), true)
            .await
            .unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(object[0].measurement, "snmp_switch");
        assert_eq!(object[0].field_f64("system_net_uptime"), Some(204572431.0));
        assert_eq!(object[0].field_str("system_location"), Some("Shenzhen China"));
        assert_eq!(object[0].tags["site"], "sz");
        assert!(!object[0].tags.contains_key("sys_object_id"));

        let metrics = collect_user_points(&mut session, &definition, &rules, "10.0.0.1", time(), false)
            .await
            .unwrap();
        assert_eq!(metrics.len(), 3);
        let temp = metrics
            .iter()
            .find(|p| p.fields.contains_key("sensor_temp_value"))
            .unwrap();
        assert!((temp.field_f64("sensor_temp_value").unwrap() - 41.5).abs() < 1e-9);

        let row = metrics.iter().find(|p| p.fields.contains_key("net_if_in")).unwrap();
        assert_eq!(row.field_f64("net_if_in"), Some(200.0));
        assert_eq!(row.tags["oid"], "1.3.6.1.2.1.31.1.1.1.6.2");
        assert_eq!(row.tags["interface"], "eth0");
        assert_eq!(row.tags["component"], "network|interface");
        assert_eq!(row.time, time());
    }

    #[tokio::test]
    async fn object_point_falls_back_to_uptime() {
        let mock = agent();
        let mut session = mock.clone();
        let definition = UserProfileDefinition::default();

        let points = collect_user_points(
            &mut session,
            &definition,
            &KeyRules::default(),
            "10.0.0.1",
            time(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(points[0].measurement, "snmp_unknown");
        assert_eq!(points[0].field_f64("netUptime"), Some(204572431.0));
        assert!(!points[0].fields.contains_key("uptime"));
    }

    #[test]
    fn row_index_is_numeric_last_arc() {
        assert_eq!(get_snmp_index(".1.3.6.1.2.1.31.1.1.1.6.2."), "2");
        assert_eq!(get_snmp_index("1.3.6.1.x"), "");
    }
}
