use std::collections::BTreeMap;
use std::sync::Mutex;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::settings::ModuleRegexp;
use crate::error::ConfigError;

/// Запись внешнего реестра сервисов.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRecord {
    pub id: String,
    pub meta: BTreeMap<String, String>,
}

impl ServiceRecord {
    pub fn new(id: impl Into<String>, meta: &[(&str, &str)]) -> Self {
        Self {
            id: id.into(),
            meta: meta
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Устройство, найденное через реестр сервисов.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub ip: String,
    /// Пустая строка, если ни одно правило не подошло
    pub device_type: String,
    pub tags: BTreeMap<String, String>,
}

/// Изменения относительно предыдущего снимка.
#[derive(Debug, Default, PartialEq)]
pub struct SnapshotDiff {
    pub added: Vec<DiscoveredService>,
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

struct ModuleRule {
    module: String,
    matches: Vec<(String, Regex)>,
}

#[derive(Default)]
struct SnapshotState {
    last_index: Option<u64>,
    known: BTreeMap<String, DiscoveredService>,
}

/// Сопоставляет снимки реестра с известными устройствами.
pub struct ServiceDiscovery {
    instance_ip_key: String,
    rules: Vec<ModuleRule>,
    state: Mutex<SnapshotState>,
}

impl ServiceDiscovery {
    pub fn new(
        instance_ip_key: impl Into<String>,
        module_regexps: &[ModuleRegexp],
    ) -> Result<Self, ConfigError> {
        let rules = module_regexps
            .iter()
            .map(|rule| {
                let matches = rule
                    .matches
                    .iter()
                    .map(|m| {
                        // правило должно совпасть со значением целиком
                        Regex::new(&format!("^(?:{})$", m.regexp))
                            .map(|re| (m.field.clone(), re))
                            .map_err(|source| ConfigError::Regex {
                                field: "module_regexps",
                                pattern: m.regexp.clone(),
                                source,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ModuleRule {
                    module: rule.module.clone(),
                    matches,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            instance_ip_key: instance_ip_key.into(),
            rules,
            state: Mutex::new(SnapshotState::default()),
        })
    }

    /// Тип устройства по первому правилу, все условия которого выполнены.
    pub fn match_module(&self, record: &ServiceRecord) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| {
                rule.matches.iter().all(|(field, re)| {
                    record
                        .meta
                        .get(field)
                        .is_some_and(|value| re.is_match(value))
                })
            })
            .map(|rule| rule.module.as_str())
    }

    /// Применяет снимок `(index, records)`.
    ///
    /// Повтор того же индекса ничего не меняет. Адреса, отсутствующие в снимке,
    /// попадают в `removed`; новые и изменившиеся записи в `added`.
    pub fn apply_snapshot(&self, index: u64, records: &[ServiceRecord]) -> SnapshotDiff {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last_index == Some(index) {
            debug!(index, "Снимок реестра не изменился");
            return SnapshotDiff::default();
        }
        state.last_index = Some(index);

        let mut current = BTreeMap::new();
        for record in records {
            let Some(ip) = record
                .meta
                .get(&self.instance_ip_key)
                .filter(|ip| !ip.is_empty())
            else {
                warn!(
                    id = %record.id,
                    key = %self.instance_ip_key,
                    "В записи реестра нет адреса устройства"
                );
                continue;
            };
            let service = DiscoveredService {
                ip: ip.clone(),
                device_type: self.match_module(record).unwrap_or_default().to_string(),
                tags: record.meta.clone(),
            };
            current.insert(ip.clone(), service);
        }

        let removed = state
            .known
            .keys()
            .filter(|ip| !current.contains_key(*ip))
            .cloned()
            .collect();
        let added = current
            .values()
            .filter(|service| state.known.get(&service.ip) != Some(*service))
            .cloned()
            .collect();
        state.known = current;

        SnapshotDiff { added, removed }
    }
}
