//! Имена полей и тегов пользовательских профилей.

use std::collections::BTreeMap;

use regex::Regex;

use crate::config::settings::Settings;
use crate::formatter::json::Tags;

/// Правила переименования полей и фильтрации тегов.
#[derive(Debug, Clone, Default)]
pub struct KeyRules {
    pub key_mapping: BTreeMap<String, String>,
    pub oid_keys: BTreeMap<String, String>,
    pub tags_ignore: Vec<String>,
    pub tags_ignore_rules: Vec<Regex>,
}

impl KeyRules {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            key_mapping: settings.key_mapping.clone(),
            oid_keys: settings.oid_keys.clone(),
            tags_ignore: settings.tags_ignore.clone(),
            tags_ignore_rules: settings.tags_ignore_rules(),
        }
    }

    /// Имя поля: сначала `oid_keys` по OID, затем `key_mapping` по имени.
    pub fn field_name(&self, name: &str, oid: &str) -> String {
        self.oid_keys
            .get(oid)
            .or_else(|| self.key_mapping.get(name))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn tag_name(&self, name: &str) -> String {
        self.key_mapping
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Добавляет тег, если он не запрещен; уже записанный ключ не перезаписывается.
    pub fn add_tag(&self, tags: &mut Tags, key: &str, value: &str) {
        if self.tags_ignore.iter().any(|s| s == key)
            || self.tags_ignore_rules.iter().any(|r| r.is_match(key))
        {
            return;
        }
        tags.entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
}

/// `system.hw.model[entPhysicalDescr.{#SNMPINDEX}]` -> `system_hw_model`
pub fn format_key(s: &str) -> String {
    if let Some(idx) = s.find('[') {
        return format_name(&s[..idx]);
    }
    if let Some(idx) = s.find('{') {
        return format_name(&s[..idx]);
    }
    format_name(s)
}

pub fn format_name(s: &str) -> String {
    let s: String = s
        .chars()
        .filter(|c| !matches!(c, '#' | ':' | '(' | ')' | '[' | ']' | '{' | '}'))
        .map(|c| if c == '-' || c == '.' { ' ' } else { c })
        .collect();
    s.trim()
        .replace("   ", " ")
        .replace("  ", " ")
        .replace(' ', "_")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_keys() {
        assert_eq!(format_key("system.location[sysLocation.0]"), "system_location");
        assert_eq!(format_key("vm.memory.pused{#SNMPINDEX}"), "vm_memory_pused");
        assert_eq!(format_key("Free-Memory (bytes)"), "free_memory_bytes");
        assert_eq!(format_name("a . b"), "a_b");
    }

    #[test]
    fn ignored_tags_are_skipped() {
        let rules = KeyRules {
            tags_ignore: vec!["sys_name".into()],
            tags_ignore_rules: vec![Regex::new("^tmp_").unwrap()],
            ..Default::default()
        };
        let mut tags = Tags::new();
        rules.add_tag(&mut tags, "sys_name", "edge-1");
        rules.add_tag(&mut tags, "tmp_value", "1");
        rules.add_tag(&mut tags, "ip", "10.0.0.1");
        rules.add_tag(&mut tags, "ip", "10.0.0.2");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["ip"], "10.0.0.1");
    }
}
