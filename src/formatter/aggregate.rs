//! Группировка точек по набору тегов и формирование строк object/metric.

use std::collections::{BTreeMap, HashMap, HashSet};

use md5::{Digest, Md5};
use serde_json::{Value, json};

use super::json::{
    CpuAttribute, Fields, InterfaceAttribute, JsonFormatter, MemAttribute, MemPoolNameAttribute,
    SensorAttribute, TagField, Tags,
};
use crate::metrics::MetricData;

pub const AGENT_HOST_KEY: &str = "agent_host";
pub const AGENT_VERSION_KEY: &str = "agent_version";

const RESERVED_KEYS: [&str; 6] = ["device_vendor", "host", "ip", "name", "snmp_host", "snmp_profile"];

/// Что нужно построить из собранных точек.
pub enum Shape<'a> {
    /// Одна запись об устройстве с атрибутами в JSON полях.
    Object {
        device_meta: String,
        custom_tags: &'a BTreeMap<String, String>,
    },
    /// Запись на каждую группу тегов, опционально только выбранные поля.
    Metric {
        picked_fields: Option<&'a HashSet<String>>,
    },
}

/// Группирует точки по MD5 тегов и строит строки нужного вида.
pub fn aggregate_device_data(data: &[MetricData], shape: Shape<'_>) -> Vec<TagField> {
    let groups = aggregate_hash(data);
    if groups.is_empty() {
        return Vec::new();
    }

    let rows = groups.into_iter().map(|group| {
        let mut tags = get_datakit_style_tags(group.tags);
        let ip = tags.get("ip").cloned().unwrap_or_default();
        tags.insert("host".to_string(), ip.clone());
        tags.insert("name".to_string(), ip);
        (tags, group.fields)
    });

    match shape {
        Shape::Object {
            device_meta,
            custom_tags,
        } => vec![object_row(rows, device_meta, custom_tags)],
        Shape::Metric { picked_fields } => rows
            .filter(|(_, fields)| match picked_fields {
                Some(picked) => fields.keys().any(|name| {
                    let name = replace_metrics_name(name).unwrap_or_else(|| name.clone());
                    picked.contains(&name)
                }),
                None => true,
            })
            .map(|(tags, fields)| normalize_field_tags(TagField { tags, fields }))
            .collect(),
    }
}

struct Group<'a> {
    tags: &'a [String],
    fields: Fields,
}

pub fn calc_tags_hash(tags: &[String]) -> String {
    let mut hasher = Md5::new();
    for tag in tags {
        hasher.update(tag.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Для одинакового имени в группе остается наибольшее значение.
fn aggregate_hash(data: &[MetricData]) -> Vec<Group<'_>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();

    for item in data {
        let hash = calc_tags_hash(&item.tags);
        let position = *positions.entry(hash).or_insert_with(|| {
            groups.push(Group {
                tags: &item.tags,
                fields: Fields::new(),
            });
            groups.len() - 1
        });

        let fields = &mut groups[position].fields;
        match fields.get(&item.name).and_then(Value::as_f64) {
            Some(current) if current >= item.value => {}
            _ => {
                fields.insert(item.name.clone(), json!(item.value));
            }
        }
    }
    groups
}

/// `k:v` -> map, служебные теги агента отбрасываются.
pub fn get_datakit_style_tags(tags: &[String]) -> Tags {
    let mut out = Tags::new();
    for tag in tags {
        let parts: Vec<&str> = tag.split(':').collect();
        if let [key, value] = parts.as_slice() {
            if *key == AGENT_HOST_KEY || *key == AGENT_VERSION_KEY {
                continue;
            }
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

fn is_reserved_key(key: &str, custom_tags: &BTreeMap<String, String>) -> bool {
    custom_tags.contains_key(key) || RESERVED_KEYS.contains(&key)
}

#[derive(Default)]
struct ObjectAttributes {
    interfaces: Vec<InterfaceAttribute>,
    sensors: Vec<SensorAttribute>,
    mems: Vec<MemAttribute>,
    mem_pool_names: Vec<MemPoolNameAttribute>,
    cpus: Vec<CpuAttribute>,
    all: Vec<TagField>,
}

fn object_row(
    rows: impl Iterator<Item = (Tags, Fields)>,
    device_meta: String,
    custom_tags: &BTreeMap<String, String>,
) -> TagField {
    let mut object_tags = Tags::new();
    let mut attrs = ObjectAttributes::default();

    for (tags, fields) in rows {
        let mut unknown_tags = Tags::new();
        for (key, value) in &tags {
            if is_reserved_key(key, custom_tags) {
                object_tags
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            } else {
                unknown_tags.insert(key.clone(), value.clone());
            }
        }
        if unknown_tags.is_empty() {
            continue;
        }

        let tag = |key: &str| tags.get(key).cloned().unwrap_or_default();
        if let Some(interface) = tags.get("interface") {
            attrs.interfaces.push(InterfaceAttribute {
                interface: interface.clone(),
                interface_alias: tag("interface_alias"),
                fields: fields.clone(),
            });
        } else if let Some(sensor_id) = tags.get("sensor_id") {
            attrs.sensors.push(SensorAttribute {
                sensor_id: sensor_id.clone(),
                sensor_type: tag("sensor_type"),
                fields: fields.clone(),
            });
        } else if let Some(mem) = tags.get("mem") {
            attrs.mems.push(MemAttribute {
                mem: mem.clone(),
                fields: fields.clone(),
            });
        } else if let Some(pool) = tags.get("mem_pool_name") {
            attrs.mem_pool_names.push(MemPoolNameAttribute {
                mem_pool_name: pool.clone(),
                fields: fields.clone(),
            });
        } else if let Some(cpu) = tags.get("cpu") {
            attrs.cpus.push(CpuAttribute {
                cpu: cpu.clone(),
                fields: fields.clone(),
            });
        }

        attrs.all.push(TagField {
            tags: unknown_tags,
            fields,
        });
    }

    let mut object_fields = Fields::new();
    object_fields.insert("interfaces".into(), JsonFormatter::to_field(&attrs.interfaces));
    object_fields.insert("sensors".into(), JsonFormatter::to_field(&attrs.sensors));
    object_fields.insert("mems".into(), JsonFormatter::to_field(&attrs.mems));
    object_fields.insert("mem_pool_names".into(), JsonFormatter::to_field(&attrs.mem_pool_names));
    object_fields.insert("cpus".into(), JsonFormatter::to_field(&attrs.cpus));
    object_fields.insert("all".into(), JsonFormatter::to_field(&attrs.all));
    object_fields.insert("device_meta".into(), Value::String(device_meta));

    normalize_field_tags(TagField {
        tags: object_tags,
        fields: object_fields,
    })
}

/// Переименовывает ключи тегов и полей через `replace_metrics_name`.
pub fn normalize_field_tags(row: TagField) -> TagField {
    let rename = |key: String| replace_metrics_name(&key).unwrap_or(key);
    TagField {
        tags: row.tags.into_iter().map(|(k, v)| (rename(k), v)).collect(),
        fields: row.fields.into_iter().map(|(k, v)| (rename(k), v)).collect(),
    }
}

/// С `_` точки заменяются на `_`, иначе имя переводится в camelCase по точкам.
///
/// `None`, если имя не изменилось.
pub fn replace_metrics_name(name: &str) -> Option<String> {
    if name.contains('_') {
        return name.contains('.').then(|| name.replace('.', "_"));
    }
    if !name.contains('.') {
        return None;
    }

    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '.' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    Some(out)
}
