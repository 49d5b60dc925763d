use std::collections::{BTreeMap, HashMap};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

pub const METADATA_DEVICE_RESOURCE: &str = "device";
pub const METADATA_INTERFACE_RESOURCE: &str = "interface";

/// Описание одного OID (скаляра или колонки таблицы).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    #[serde(rename = "OID")]
    pub oid: String,
    pub name: String,

    pub extract_value: String,
    #[serde(skip)]
    pub extract_value_compiled: Option<Regex>,

    pub match_pattern: String,
    pub match_value: String,
    #[serde(skip)]
    pub match_pattern_compiled: Option<Regex>,

    pub scale_factor: f64,
    pub format: String,
}

impl SymbolConfig {
    pub fn new(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Диапазон сегментов индекса, 0-based, включительно.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricIndexTransform {
    pub start: u32,
    pub end: u32,
}

/// Правило получения тегов для строки таблицы или для всего устройства.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricTagConfig {
    pub tag: String,

    /// Номер сегмента индекса строки, начиная с 1.
    pub index: u32,

    pub column: SymbolConfig,

    #[serde(rename = "OID")]
    pub oid: String,
    #[serde(rename = "symbol")]
    pub name: String,

    pub index_transform: Vec<MetricIndexTransform>,

    #[serde(deserialize_with = "string_map")]
    pub mapping: BTreeMap<String, String>,

    #[serde(rename = "match")]
    pub match_pattern: String,
    #[serde(deserialize_with = "string_map")]
    pub tags: BTreeMap<String, String>,

    #[serde(skip)]
    pub pattern: Option<Regex>,
}

impl MetricTagConfig {
    /// Теги для значения: `tag:value` либо набор тегов по регулярному выражению.
    pub fn get_tags(&self, value: &str) -> Vec<String> {
        let mut tags = Vec::new();
        if !self.tag.is_empty() {
            tags.push(format!("{}:{}", self.tag, value));
        } else if !self.match_pattern.is_empty() {
            let Some(pattern) = &self.pattern else {
                tracing::warn!(pattern = %self.match_pattern, "match pattern must be present");
                return tags;
            };
            if pattern.is_match(value) {
                for (key, template) in &self.tags {
                    let template = normalize_regex_replace_value(template);
                    let replaced = regex_replace_value(value, pattern, &template);
                    if replaced.is_empty() {
                        tracing::debug!(
                            "pattern `{}` failed to match `{}` with template `{}`",
                            pattern.as_str(),
                            value,
                            template
                        );
                        continue;
                    }
                    tags.push(format!("{}:{}", key, replaced));
                }
            }
        }
        tags
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfigOption {
    /// Позиция флага в строке, начиная с 1.
    pub placement: u32,
    pub metric_suffix: String,
}

/// Описание метрики: либо скаляр (`symbol`), либо колонки таблицы (`symbols`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub symbol: SymbolConfig,

    // старый синтаксис: name/OID на верхнем уровне
    #[serde(rename = "OID")]
    pub oid: String,
    pub name: String,

    pub symbols: Vec<SymbolConfig>,

    pub static_tags: Vec<String>,
    pub metric_tags: Vec<MetricTagConfig>,

    pub forced_type: String,
    pub options: MetricsConfigOption,
}

impl MetricsConfig {
    pub fn is_column(&self) -> bool {
        !self.symbols.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        !self.symbol.oid.is_empty() && !self.symbol.name.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataField {
    pub symbol: SymbolConfig,
    pub symbols: Vec<SymbolConfig>,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataResourceConfig {
    pub fields: BTreeMap<String, MetadataField>,
    pub id_tags: Vec<MetricTagConfig>,
}

pub type MetadataConfig = BTreeMap<String, MetadataResourceConfig>;

/// Набор определений метрик, тегов и метаданных для устройства.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDefinition {
    pub metrics: Vec<MetricsConfig>,
    pub metric_tags: Vec<MetricTagConfig>,
    pub metadata: MetadataConfig,
}

impl ProfileDefinition {
    /// Нормализует старый синтаксис, добавляет uptime и метаданные по умолчанию,
    /// затем компилирует регулярные выражения.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        normalize_metrics(&mut self.metrics);
        self.metrics.push(uptime_metric_config());
        update_metadata_definition_with_legacy_fallback(&mut self.metadata);

        let mut errors = validate_enrich_metrics(&mut self.metrics);
        errors.extend(validate_enrich_metric_tags(&mut self.metric_tags));
        errors.extend(validate_enrich_metadata(&mut self.metadata));
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors.join("\n")));
        }
        Ok(())
    }
}

impl fmt::Display for SymbolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.oid)
    }
}

pub fn uptime_metric_config() -> MetricsConfig {
    MetricsConfig {
        symbol: SymbolConfig::new("1.3.6.1.2.1.1.3.0", "sysUpTimeInstance"),
        ..Default::default()
    }
}

/// Метаданные для ресурсов, которые не описаны в профиле.
pub fn legacy_metadata_config() -> MetadataConfig {
    let mut device = MetadataResourceConfig::default();
    for (field, oid, name) in [
        ("description", "1.3.6.1.2.1.1.1.0", "sysDescr"),
        ("name", "1.3.6.1.2.1.1.5.0", "sysName"),
        ("sys_object_id", "1.3.6.1.2.1.1.2.0", "sysObjectID"),
    ] {
        device.fields.insert(
            field.to_string(),
            MetadataField {
                symbol: SymbolConfig::new(oid, name),
                ..Default::default()
            },
        );
    }

    let mut interface = MetadataResourceConfig::default();
    for (field, oid, name) in [
        ("name", "1.3.6.1.2.1.31.1.1.1.1", "ifName"),
        ("description", "1.3.6.1.2.1.2.2.1.2", "ifDescr"),
        ("admin_status", "1.3.6.1.2.1.2.2.1.7", "ifAdminStatus"),
        ("oper_status", "1.3.6.1.2.1.2.2.1.8", "ifOperStatus"),
        ("alias", "1.3.6.1.2.1.31.1.1.1.18", "ifAlias"),
    ] {
        interface.fields.insert(
            field.to_string(),
            MetadataField {
                symbol: SymbolConfig::new(oid, name),
                ..Default::default()
            },
        );
    }
    let mut mac = SymbolConfig::new("1.3.6.1.2.1.2.2.1.6", "ifPhysAddress");
    mac.format = "mac_address".to_string();
    interface.fields.insert(
        "mac_address".to_string(),
        MetadataField {
            symbol: mac,
            ..Default::default()
        },
    );
    interface.id_tags.push(MetricTagConfig {
        tag: "interface".to_string(),
        column: SymbolConfig::new("1.3.6.1.2.1.31.1.1.1.1", "ifName"),
        ..Default::default()
    });

    let mut config = MetadataConfig::new();
    config.insert(METADATA_DEVICE_RESOURCE.to_string(), device);
    config.insert(METADATA_INTERFACE_RESOURCE.to_string(), interface);
    config
}

pub fn update_metadata_definition_with_legacy_fallback(config: &mut MetadataConfig) {
    for (resource, resource_config) in legacy_metadata_config() {
        config.entry(resource).or_insert(resource_config);
    }
}

/// Сейчас только ресурс `device` строится на скалярных OID.
pub fn is_metadata_resource_with_scalar_oids(resource: &str) -> bool {
    resource == METADATA_DEVICE_RESOURCE
}

/// Переносит `name`/`OID` верхнего уровня в `symbol`.
pub fn normalize_metrics(metrics: &mut [MetricsConfig]) {
    for metric in metrics.iter_mut() {
        if metric.symbol.name.is_empty()
            && metric.symbol.oid.is_empty()
            && !metric.name.is_empty()
            && !metric.oid.is_empty()
        {
            metric.symbol.name = std::mem::take(&mut metric.name);
            metric.symbol.oid = std::mem::take(&mut metric.oid);
        }
    }
}

pub fn parse_scalar_oids(
    metrics: &[MetricsConfig],
    metric_tags: &[MetricTagConfig],
    metadata: &MetadataConfig,
    collect_device_metadata: bool,
) -> Vec<String> {
    let mut oids: Vec<String> = metrics.iter().map(|m| m.symbol.oid.clone()).collect();
    oids.extend(metric_tags.iter().map(|t| t.oid.clone()));
    if collect_device_metadata {
        for (resource, config) in metadata {
            if !is_metadata_resource_with_scalar_oids(resource) {
                continue;
            }
            for field in config.fields.values() {
                oids.push(field.symbol.oid.clone());
                oids.extend(field.symbols.iter().map(|s| s.oid.clone()));
            }
        }
    }
    oids
}

pub fn parse_column_oids(
    metrics: &[MetricsConfig],
    metadata: &MetadataConfig,
    collect_device_metadata: bool,
) -> Vec<String> {
    let mut oids = Vec::new();
    for metric in metrics {
        oids.extend(metric.symbols.iter().map(|s| s.oid.clone()));
        oids.extend(metric.metric_tags.iter().map(|t| t.column.oid.clone()));
    }
    if collect_device_metadata {
        for (resource, config) in metadata {
            if is_metadata_resource_with_scalar_oids(resource) {
                continue;
            }
            for field in config.fields.values() {
                oids.push(field.symbol.oid.clone());
                oids.extend(field.symbols.iter().map(|s| s.oid.clone()));
            }
            oids.extend(config.id_tags.iter().map(|t| t.column.oid.clone()));
        }
    }
    oids
}

fn valid_metadata_fields(resource: &str) -> Option<&'static [&'static str]> {
    match resource {
        METADATA_DEVICE_RESOURCE => Some(&[
            "name",
            "description",
            "sys_object_id",
            "location",
            "serial_number",
            "vendor",
            "version",
            "product_name",
            "model",
            "os_name",
            "os_version",
            "os_hostname",
        ]),
        METADATA_INTERFACE_RESOURCE => Some(&[
            "name",
            "alias",
            "description",
            "mac_address",
            "admin_status",
            "oper_status",
        ]),
        _ => None,
    }
}

/// Проверяет метрики и сохраняет скомпилированные выражения.
pub fn validate_enrich_metrics(metrics: &mut [MetricsConfig]) -> Vec<String> {
    let mut errors = Vec::new();
    for metric in metrics.iter_mut() {
        let (scalar, column) = (metric.is_scalar(), metric.is_column());
        if !scalar && !column {
            errors.push(ConfigError::MissingSymbol.to_string());
        }
        if scalar && column {
            errors.push(ConfigError::BothSymbols.to_string());
        }
        if scalar {
            errors.extend(validate_enrich_symbol(&mut metric.symbol));
        }
        if column {
            for symbol in metric.symbols.iter_mut() {
                errors.extend(validate_enrich_symbol(symbol));
            }
            if metric.metric_tags.is_empty() {
                let names: Vec<String> = metric.symbols.iter().map(|s| s.to_string()).collect();
                errors.push(ConfigError::MissingMetricTags(names.join(", ")).to_string());
            }
            for tag in metric.metric_tags.iter_mut() {
                errors.extend(validate_enrich_metric_tag(tag));
            }
        }
    }
    errors
}

pub fn validate_enrich_metric_tags(metric_tags: &mut [MetricTagConfig]) -> Vec<String> {
    metric_tags
        .iter_mut()
        .flat_map(validate_enrich_metric_tag)
        .collect()
}

pub fn validate_enrich_metadata(metadata: &mut MetadataConfig) -> Vec<String> {
    let mut errors = Vec::new();
    for (resource, config) in metadata.iter_mut() {
        match valid_metadata_fields(resource) {
            None => errors.push(format!("invalid resource: {}", resource)),
            Some(valid) => {
                for (name, field) in config.fields.iter_mut() {
                    if !valid.contains(&name.as_str()) {
                        errors.push(format!("invalid resource ({}) field: {}", resource, name));
                        continue;
                    }
                    for symbol in field.symbols.iter_mut() {
                        errors.extend(validate_enrich_symbol(symbol));
                    }
                    if !field.symbol.oid.is_empty() {
                        errors.extend(validate_enrich_symbol(&mut field.symbol));
                    }
                }
            }
        }
        if resource == METADATA_DEVICE_RESOURCE && !config.id_tags.is_empty() {
            errors.push("device resource does not support custom id_tags".to_string());
        }
        for tag in config.id_tags.iter_mut() {
            errors.extend(validate_enrich_metric_tag(tag));
        }
    }
    errors
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Regex {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

pub fn validate_enrich_symbol(symbol: &mut SymbolConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if symbol.name.is_empty() {
        errors.push(
            ConfigError::SymbolNameMissing {
                name: symbol.name.clone(),
                oid: symbol.oid.clone(),
            }
            .to_string(),
        );
    }
    if symbol.oid.is_empty() {
        errors.push(
            ConfigError::SymbolOidMissing {
                name: symbol.name.clone(),
                oid: symbol.oid.clone(),
            }
            .to_string(),
        );
    }
    if !symbol.extract_value.is_empty() {
        match compile("extract_value", &symbol.extract_value) {
            Ok(re) => symbol.extract_value_compiled = Some(re),
            Err(e) => errors.push(e.to_string()),
        }
    }
    if !symbol.match_pattern.is_empty() {
        match compile("match_pattern", &symbol.match_pattern) {
            Ok(re) => symbol.match_pattern_compiled = Some(re),
            Err(e) => errors.push(e.to_string()),
        }
    }
    errors
}

pub fn validate_enrich_metric_tag(tag: &mut MetricTagConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if !tag.column.oid.is_empty() || !tag.column.name.is_empty() {
        errors.extend(validate_enrich_symbol(&mut tag.column));
    }
    if !tag.match_pattern.is_empty() {
        match compile("match", &tag.match_pattern) {
            Ok(re) => tag.pattern = Some(re),
            Err(e) => errors.push(e.to_string()),
        }
        if tag.tags.is_empty() {
            errors.push(ConfigError::MatchWithoutTags(tag.match_pattern.clone()).to_string());
        }
    }
    for transform in &tag.index_transform {
        if transform.start > transform.end {
            errors.push(
                ConfigError::InvalidTransform {
                    start: transform.start,
                    end: transform.end,
                }
                .to_string(),
            );
        }
    }
    errors
}

/// Первое совпадение `pattern` в `value`, раскрытое по шаблону.
pub fn regex_replace_value(value: &str, pattern: &Regex, template: &str) -> String {
    let mut result = String::new();
    if let Some(caps) = pattern.captures(value) {
        caps.expand(template, &mut result);
    }
    result
}

/// `\1` -> `${1}` для совместимости с шаблонами в стиле Python.
pub fn normalize_regex_replace_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            out.push_str("${");
            out.push_str(&digits);
            out.push('}');
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Bool(v) => v.to_string(),
            Scalar::Text(v) => v,
        }
    }
}

/// YAML допускает числовые ключи (`0: unknown`), приводим все к строкам.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<Scalar, Scalar>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k.into_string(), v.into_string()))
        .collect())
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Scalar {}

impl std::hash::Hash for Scalar {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Scalar {
    fn key(&self) -> String {
        match self {
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Bool(v) => v.to_string(),
            Scalar::Text(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_legacy_symbol_syntax() {
        let mut metrics = vec![MetricsConfig {
            oid: "1.2.3".into(),
            name: "abc".into(),
            ..Default::default()
        }];
        normalize_metrics(&mut metrics);
        assert_eq!(metrics[0].symbol.oid, "1.2.3");
        assert_eq!(metrics[0].symbol.name, "abc");
        assert!(metrics[0].oid.is_empty());
        assert!(metrics[0].name.is_empty());
    }

    #[test]
    fn validates_metrics() {
        let mut metrics = vec![
            MetricsConfig {
                symbol: SymbolConfig {
                    oid: "1.2.3".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            MetricsConfig {
                symbols: vec![SymbolConfig::new("1.2.3.1", "col")],
                ..Default::default()
            },
            MetricsConfig {
                symbol: SymbolConfig {
                    oid: "1.2.3".into(),
                    name: "bad".into(),
                    extract_value: "(".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        let errors = validate_enrich_metrics(&mut metrics);
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors[0].contains("either a table symbol or a scalar symbol must be provided"));
        assert!(errors[1].contains("doesn't have a 'metric_tags' section"));
        assert!(errors[2].starts_with("cannot compile `extract_value` (`(`)"));
    }

    #[test]
    fn validates_symbols() {
        let mut symbol = SymbolConfig {
            oid: "1.2".into(),
            ..Default::default()
        };
        assert_eq!(
            validate_enrich_symbol(&mut symbol),
            vec!["symbol name missing: name=`` oid=`1.2`".to_string()]
        );

        let mut symbol = SymbolConfig {
            name: "abc".into(),
            ..Default::default()
        };
        assert_eq!(
            validate_enrich_symbol(&mut symbol),
            vec!["symbol oid missing: name=`abc` oid=``".to_string()]
        );
    }

    #[test]
    fn validates_metric_tags() {
        let mut tags = vec![MetricTagConfig {
            match_pattern: "(\\w)".into(),
            index_transform: vec![MetricIndexTransform { start: 3, end: 1 }],
            ..Default::default()
        }];
        let errors = validate_enrich_metric_tags(&mut tags);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("`tags` mapping must be provided"));
        assert!(errors[1].contains("transform rule end should be greater than start"));
        assert!(tags[0].pattern.is_some());
    }

    #[test]
    fn validates_metadata() {
        let mut metadata = MetadataConfig::new();
        metadata.insert("unknown".into(), MetadataResourceConfig::default());
        let mut device = MetadataResourceConfig::default();
        device.fields.insert("weird".into(), MetadataField::default());
        metadata.insert("device".into(), device);

        let errors = validate_enrich_metadata(&mut metadata);
        assert!(errors.contains(&"invalid resource (device) field: weird".to_string()));
        assert!(errors.contains(&"invalid resource: unknown".to_string()));
    }

    #[test]
    fn collects_scalar_and_column_oids() {
        let mut profile = ProfileDefinition {
            metrics: vec![MetricsConfig {
                symbols: vec![SymbolConfig::new("1.3.6.1.2.1.2.2.1.10", "ifInOctets")],
                metric_tags: vec![MetricTagConfig {
                    tag: "interface".into(),
                    column: SymbolConfig::new("1.3.6.1.2.1.31.1.1.1.1", "ifName"),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            metric_tags: vec![MetricTagConfig {
                tag: "location".into(),
                oid: "1.3.6.1.2.1.1.6.0".into(),
                name: "sysLocation".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        profile.prepare().unwrap();

        let scalars = parse_scalar_oids(&profile.metrics, &profile.metric_tags, &profile.metadata, true);
        assert!(scalars.contains(&"1.3.6.1.2.1.1.3.0".to_string()));
        assert!(scalars.contains(&"1.3.6.1.2.1.1.6.0".to_string()));
        assert!(scalars.contains(&"1.3.6.1.2.1.1.5.0".to_string()));

        let columns = parse_column_oids(&profile.metrics, &profile.metadata, true);
        assert!(columns.contains(&"1.3.6.1.2.1.2.2.1.10".to_string()));
        assert!(columns.contains(&"1.3.6.1.2.1.2.2.1.6".to_string()));
        assert!(!parse_column_oids(&profile.metrics, &profile.metadata, false)
            .contains(&"1.3.6.1.2.1.2.2.1.6".to_string()));
    }

    #[test]
    fn expands_tags_from_match() {
        let mut tag: MetricTagConfig = serde_yml::from_str(
            r#"
column:
  OID: 1.2.3.4.8.1.2
  name: cpiPduName
match: '([A-z0-9]*)-([A-z]*[-A-z]*)-([A-z0-9]*)'
tags:
  tag1: '${1}'
  tag2: '\1'
"#,
        )
        .unwrap();
        assert!(validate_enrich_metric_tag(&mut tag).is_empty());

        let mut tags = tag.get_tags("f5-vm-aa.c.-integrations-lab.internal");
        tags.sort();
        assert_eq!(tags, vec!["tag1:f5", "tag2:f5"]);
        assert!(tag.get_tags("....").is_empty());
    }

    #[test]
    fn reads_numeric_mapping_keys() {
        let tag: MetricTagConfig = serde_yml::from_str(
            r#"
index: 1
tag: ipversion
mapping:
  0: unknown
  1: ipv4
  16: dns
"#,
        )
        .unwrap();
        assert_eq!(tag.mapping.get("16").map(String::as_str), Some("dns"));
        assert_eq!(tag.index, 1);
    }

    #[test]
    fn normalizes_backreferences() {
        assert_eq!(normalize_regex_replace_value(r"\1-\2"), "${1}-${2}");
        assert_eq!(normalize_regex_replace_value("$1"), "$1");
    }
}
