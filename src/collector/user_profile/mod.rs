//! Устройства с пользовательскими профилями в стиле Zabbix.
//!
//! Профиль описывает отдельные элементы (`items`) и правила обнаружения
//! (`discovery_rules`), где индексы строк берутся из макросов `{#NAME}`.
//! Перед сбором профиль "прогревается" на устройстве: элементы делятся на
//! числовые и строковые, макросы раскрываются обходом их OID.

mod collect;
mod keys;
mod macros;
mod store;
#[cfg(test)]
mod testing;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::types::{ResultValue, Value};
use crate::snmp::session::{DEVICE_REACHABLE_GET_NEXT_OID, SYS_NAME_OID, SYS_OBJECT_ID_OID};
use crate::snmp::{Session, SnmpPacket};

pub use collect::collect_user_points;
pub use keys::{KeyRules, format_key, format_name};
pub use macros::{Macro, Macros, format_macro_names, macros_filter};
pub use store::{
    MIN_SAME_PREFIX_ARCS, ProfileProvider, ProfileStore, YamlProfileProvider, compare_stores,
    load_user_profiles, same_prefix_long, try_device,
};

pub const NET_UPTIME_OID: &str = "1.3.6.1.2.1.1.3.0";
pub const HOST_UPTIME_OID: &str = "1.3.6.1.2.1.25.1.1.0";

pub const UNKNOWN: &str = "unknown";

const MULTIPLIER_STEP: &str = "MULTIPLIER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfileDefinition {
    pub zabbix_export: ZabbixExport,

    pub profile_name: String,
    pub class: String,
    pub device_type: String,
    pub community: String,
    pub name: String,
    pub sys_name: String,
    pub sys_object_id: String,
    pub input_tags: BTreeMap<String, String>,

    /// Элементы с числовым значением
    #[serde(skip)]
    pub items: Vec<Item>,
    /// Элементы со строковым значением, например `system.contact`
    #[serde(skip)]
    pub string_items: Vec<Item>,
    #[serde(skip)]
    pub discovery_items: Vec<Item>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixExport {
    pub templates: Vec<Template>,
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub name: String,
    pub items: Vec<Item>,
    pub discovery_rules: Vec<DiscoveryRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    pub name: String,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryRule {
    pub name: String,
    /// `discovery[{#SNMPVALUE},1.3.6...,{#IFNAME},1.3.6...]`
    pub snmp_oid: String,
    pub filter: Filter,
    pub item_prototypes: Vec<Item>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub evaltype: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    #[serde(rename = "macro")]
    pub macro_name: String,
    pub value: String,
    pub formulaid: String,
    /// Пусто или `NOT_MATCHES_REGEX`
    pub operator: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub snmp_oid: String,
    pub key: String,
    pub value_type: String,
    pub units: String,
    pub preprocessing: Vec<Step>,
    pub tags: Vec<ItemTag>,
    /// Полные OID прототипа; если пусты, заполняются обходом.
    pub oids: Vec<String>,

    #[serde(skip)]
    pub macros: Macros,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: String,
    pub parameters: Vec<String>,
    #[serde(skip)]
    pub parameter: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemTag {
    pub tag: String,
    pub value: String,
}

impl Item {
    fn new(oid: &str, key: &str) -> Self {
        Self {
            snmp_oid: oid.to_string(),
            key: key.to_string(),
            ..Default::default()
        }
    }

    /// Оставляет только первый шаг `MULTIPLIER` с числовым параметром.
    pub fn apply_preprocessing(&mut self) {
        let step = self.preprocessing.iter().find_map(|step| {
            if step.step_type != MULTIPLIER_STEP {
                return None;
            }
            let parameter = step.parameters.first()?.trim().parse::<f64>().ok()?;
            Some(Step {
                step_type: step.step_type.clone(),
                parameters: step.parameters.clone(),
                parameter,
            })
        });
        self.preprocessing = step.into_iter().collect();
    }

    /// Применяет шаги предобработки: `x * 0.1` для `MULTIPLIER 0.1`.
    pub fn preprocess(&self, value: f64) -> f64 {
        self.preprocessing
            .iter()
            .filter(|step| step.step_type == MULTIPLIER_STEP)
            .fold(value, |acc, step| acc * step.parameter)
    }

    /// Теги элемента; повторяющиеся ключи склеиваются через `|`.
    pub fn item_tags(&self) -> BTreeMap<String, String> {
        let mut tags: BTreeMap<String, String> = BTreeMap::new();
        for tag in &self.tags {
            tags.entry(tag.tag.clone())
                .and_modify(|v| {
                    v.push('|');
                    v.push_str(&tag.value);
                })
                .or_insert_with(|| tag.value.clone());
        }
        tags
    }
}

impl ZabbixExport {
    /// `.1.3.6.1.4.1.18334.1.1` -> `1.3.6.1.4.1.18334.1.1`
    pub fn format_oids(&mut self) {
        for item in self.all_items_mut() {
            item.snmp_oid = format_oid(&item.snmp_oid).to_string();
        }
    }

    fn all_items_mut(&mut self) -> impl Iterator<Item = &mut Item> {
        let host_items = self.hosts.iter_mut().flat_map(|h| h.items.iter_mut());
        let template_items = self.templates.iter_mut().flat_map(|t| {
            let prototypes = t
                .discovery_rules
                .iter_mut()
                .flat_map(|r| r.item_prototypes.iter_mut());
            t.items.iter_mut().chain(prototypes)
        });
        host_items.chain(template_items)
    }

    fn all_oids(&self) -> impl Iterator<Item = &str> {
        let host_items = self.hosts.iter().flat_map(|h| h.items.iter());
        let template_items = self.templates.iter().flat_map(|t| {
            let prototypes = t
                .discovery_rules
                .iter()
                .flat_map(|r| r.item_prototypes.iter());
            t.items.iter().chain(prototypes)
        });
        host_items.chain(template_items).map(|i| i.snmp_oid.as_str())
    }
}

impl UserProfileDefinition {
    /// Имя измерения: `snmp_<class>` или `snmp_unknown`.
    pub fn class_name(&self) -> String {
        if self.class.is_empty() {
            format!("snmp_{}", UNKNOWN)
        } else {
            format!("snmp_{}", self.class)
        }
    }

    /// Подготавливает профиль к сбору на конкретном устройстве.
    pub async fn pre_process(
        &mut self,
        session: &mut dyn Session,
        ip: &str,
        rules: &KeyRules,
    ) -> Result<()> {
        session
            .get_next(&[DEVICE_REACHABLE_GET_NEXT_OID.to_string()])
            .await
            .with_context(|| format!("check {} device reachable: failed", ip))?;

        self.sys_name = get_string_value(session, SYS_NAME_OID).await;
        self.sys_object_id = get_string_value(session, SYS_OBJECT_ID_OID).await;
        self.name = format!("{}_{}", ip, self.sys_name);

        self.items.clear();
        self.string_items.clear();
        self.discovery_items.clear();

        let export = self.zabbix_export.clone();
        for host in &export.hosts {
            let (items, string_items) = fill_items(session, &host.items, rules).await;
            self.items.extend(items);
            self.string_items.extend(string_items);
        }

        for template in &export.templates {
            let (items, string_items) = fill_items(session, &template.items, rules).await;
            self.items.extend(items);
            self.string_items.extend(string_items);

            for rule in &template.discovery_rules {
                let names = format_macro_names(&rule.snmp_oid);
                let mut macros = macros::get_macros(session, &names).await;
                if !rule.filter.conditions.is_empty() {
                    macros = macros_filter(&macros, &rule.filter);
                }

                for prototype in &rule.item_prototypes {
                    if let Some(item) =
                        format_discovery_item(session, prototype, &macros, rules).await
                    {
                        self.discovery_items.push(item);
                    }
                }
            }
        }

        debug!(
            ip,
            items = self.items.len(),
            string_items = self.string_items.len(),
            discovery_items = self.discovery_items.len(),
            "Профиль подготовлен"
        );
        Ok(())
    }
}

enum ItemKind {
    Numeric(f64),
    Text(String),
}

/// Тип значения первой переменной ответа; `None` если значения нет.
fn packet_value(packet: &SnmpPacket) -> Option<ItemKind> {
    if packet.error_status != 0 {
        return None;
    }
    let varbind = packet.variables.first()?;
    match ResultValue::from_varbind(varbind) {
        Ok((_, value)) => Some(match value.value {
            Value::Float(f) => ItemKind::Numeric(f),
            Value::Text(s) => ItemKind::Text(s),
            Value::Bytes(b) => ItemKind::Text(String::from_utf8_lossy(&b).into_owned()),
        }),
        Err(e) => {
            debug!(error = %e, "Значение не разобрано");
            None
        }
    }
}

fn kind_to_string(kind: ItemKind) -> String {
    match kind {
        ItemKind::Numeric(f) => f.to_string(),
        ItemKind::Text(s) => s,
    }
}

async fn get_string_value(session: &mut dyn Session, oid: &str) -> String {
    match session.get(&[oid.to_string()]).await {
        Ok(packet) => packet_value(&packet)
            .map(kind_to_string)
            .unwrap_or_else(|| UNKNOWN.to_string()),
        Err(e) => {
            debug!(oid, error = %e, "get snmp: failed");
            UNKNOWN.to_string()
        }
    }
}

/// Делит элементы на числовые и строковые по ответу устройства.
async fn fill_items(
    session: &mut dyn Session,
    items: &[Item],
    rules: &KeyRules,
) -> (Vec<Item>, Vec<Item>) {
    let mut numeric = Vec::new();
    let mut strings = Vec::new();

    for item in items {
        if item.snmp_oid.is_empty() || item.key.is_empty() {
            continue;
        }

        let mut item = item.clone();
        item.key = rules.field_name(&format_key(&item.key), &item.snmp_oid);
        item.snmp_oid = format_oid(&item.snmp_oid).to_string();

        let packet = match session.get(&[item.snmp_oid.clone()]).await {
            Ok(packet) => packet,
            Err(e) => {
                debug!(oid = %item.snmp_oid, error = %e, "get snmp: failed");
                continue;
            }
        };

        item.apply_preprocessing();
        match packet_value(&packet) {
            Some(ItemKind::Numeric(_)) => numeric.push(item),
            Some(ItemKind::Text(_)) => strings.push(item),
            None => {}
        }
    }

    (numeric, strings)
}

/// Раскрывает прототип: OID строк, для индексов которых есть макрос.
async fn format_discovery_item(
    session: &mut dyn Session,
    prototype: &Item,
    macros: &Macros,
    rules: &KeyRules,
) -> Option<Item> {
    if prototype.snmp_oid.is_empty() {
        return None;
    }

    let mut item = prototype.clone();
    // теги вида {#IFALIAS} не раскрываются
    item.tags.retain(|tag| !tag.value.starts_with("{#"));

    let oid = get_oid(&item.snmp_oid);
    if oid.is_empty() {
        return None;
    }
    item.key = rules.field_name(&format_key(&item.key), &oid);
    item.snmp_oid = oid;
    item.macros = macros.clone();

    let varbinds = match session.walk_all(&item.snmp_oid).await {
        Ok(varbinds) => varbinds,
        Err(e) => {
            debug!(oid = %item.snmp_oid, error = %e, "walk snmp: failed");
            return None;
        }
    };
    if varbinds.is_empty() {
        return None;
    }

    if item.oids.is_empty() {
        item.oids = varbinds
            .iter()
            .map(|v| format_oid(&v.oid).to_string())
            .filter(|oid| valid_oid(oid, macros))
            .collect();
    }
    if item.oids.is_empty() {
        return None;
    }

    item.apply_preprocessing();
    Some(item)
}

/// `1.3.6.1.2.1.2.2.1.13.{#SNMPINDEX}` -> `1.3.6.1.2.1.2.2.1.13`
fn get_oid(s: &str) -> String {
    let head = s.split('{').next().unwrap_or_default();
    format_oid(head).to_string()
}

/// Последняя дуга OID должна быть индексом хотя бы одного макроса.
fn valid_oid(oid: &str, macros: &Macros) -> bool {
    let Some((_, key)) = oid.rsplit_once('.') else {
        return false;
    };
    macros.values().any(|m| m.contains_key(key))
}

fn format_oid(s: &str) -> &str {
    s.trim_matches('.')
}
