use tracing::debug;

use crate::collector::ResultValueStore;
use crate::config::MetricTagConfig;
use crate::config::profile::MetricIndexTransform;

use super::symbol::{get_column_value_from_symbol, get_scalar_value_from_symbol};

/// Теги строки таблицы с индексом `full_index`.
pub fn get_tags_from_metric_tag_config_list(
    metric_tags: &[MetricTagConfig],
    full_index: &str,
    values: &ResultValueStore,
) -> Vec<String> {
    let mut row_tags = Vec::new();
    let indexes: Vec<&str> = full_index.split('.').collect();

    for metric_tag in metric_tags {
        if metric_tag.index > 0 {
            let position = (metric_tag.index - 1) as usize;
            let Some(segment) = indexes.get(position) else {
                debug!(
                    "error getting tags. index `{}` not found in indexes `{:?}`",
                    metric_tag.index, indexes
                );
                continue;
            };
            let tag_value = if metric_tag.mapping.is_empty() {
                segment.to_string()
            } else {
                match metric_tag.mapping.get(*segment) {
                    Some(mapped) => mapped.clone(),
                    None => {
                        debug!("error getting tags. mapping for `{}` does not exist", segment);
                        continue;
                    }
                }
            };
            row_tags.extend(metric_tag.get_tags(&tag_value));
        }

        if !metric_tag.column.oid.is_empty() {
            let column_values = match get_column_value_from_symbol(values, &metric_tag.column) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "error getting column value");
                    continue;
                }
            };

            let new_index = if metric_tag.index_transform.is_empty() {
                full_index.to_string()
            } else {
                match transform_index(&indexes, &metric_tag.index_transform) {
                    Some(transformed) => transformed.join("."),
                    None => {
                        debug!(
                            "error transforming index `{:?}` with rules `{:?}`",
                            indexes, metric_tag.index_transform
                        );
                        continue;
                    }
                }
            };

            match column_values.get(&new_index) {
                Some(value) => row_tags.extend(metric_tag.get_tags(&value.to_string_value())),
                None => debug!(
                    "index not found for column value: tag={}, index={}",
                    metric_tag.tag, new_index
                ),
            }
        }
    }
    row_tags
}

/// Собирает новый индекс из сегментов по правилам `transform_rules`.
pub fn transform_index(
    indexes: &[&str],
    transform_rules: &[MetricIndexTransform],
) -> Option<Vec<String>> {
    if transform_rules.is_empty() {
        return None;
    }
    let mut new_index = Vec::new();
    for rule in transform_rules {
        let (start, end) = (rule.start as usize, rule.end as usize);
        if end + 1 > indexes.len() {
            return None;
        }
        new_index.extend(indexes[start..=end].iter().map(|s| s.to_string()));
    }
    Some(new_index)
}

/// Теги устройства из глобальных скалярных `metric_tags`.
pub fn get_scalar_tags(metric_tags: &[MetricTagConfig], values: &ResultValueStore) -> Vec<String> {
    let mut tags = Vec::new();
    for metric_tag in metric_tags {
        if metric_tag.oid.is_empty() {
            continue;
        }
        let symbol = crate::config::SymbolConfig::new(&metric_tag.oid, &metric_tag.name);
        match get_scalar_value_from_symbol(values, &symbol) {
            Ok(value) => tags.extend(metric_tag.get_tags(&value.to_string_value())),
            Err(e) => debug!(tag = %metric_tag.tag, error = %e, "failed to get scalar value for tag"),
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::collector::ResultValue;
    use crate::config::SymbolConfig;
    use crate::config::profile::validate_enrich_metric_tag;

    fn store() -> ResultValueStore {
        let mut store = ResultValueStore::default();
        store
            .scalar_values
            .insert("1.3.6.1.2.1.1.5.0".into(), ResultValue::text("router-1"));
        store.column_values.insert(
            "1.2.3.4.8.1.2".into(),
            HashMap::from([("1".to_string(), ResultValue::text("eth0"))]),
        );
        store.column_values.insert(
            "1.2.3.4.8.1.3".into(),
            HashMap::from([("1.10".to_string(), ResultValue::text("tbl"))]),
        );
        store
    }

    fn tag(configure: impl FnOnce(&mut MetricTagConfig)) -> MetricTagConfig {
        let mut tag = MetricTagConfig::default();
        configure(&mut tag);
        assert!(validate_enrich_metric_tag(&mut tag).is_empty());
        tag
    }

    #[test]
    fn index_tags_with_and_without_mapping() {
        let tags = vec![
            tag(|t| {
                t.tag = "ipversion".into();
                t.index = 1;
                t.mapping = BTreeMap::from([("1".into(), "ipv4".into()), ("2".into(), "ipv6".into())]);
            }),
            tag(|t| {
                t.tag = "second".into();
                t.index = 2;
            }),
            tag(|t| {
                t.tag = "missing".into();
                t.index = 5;
            }),
        ];
        assert_eq!(
            get_tags_from_metric_tag_config_list(&tags, "1.7", &store()),
            vec!["ipversion:ipv4", "second:7"]
        );
        // значения нет в mapping
        assert_eq!(
            get_tags_from_metric_tag_config_list(&tags, "3.7", &store()),
            vec!["second:7"]
        );
    }

    #[test]
    fn column_tags_with_index_transform() {
        let tags = vec![
            tag(|t| {
                t.tag = "interface".into();
                t.column = SymbolConfig::new("1.2.3.4.8.1.2", "ifName");
                t.index_transform = vec![MetricIndexTransform { start: 1, end: 1 }];
            }),
            tag(|t| {
                t.tag = "table".into();
                t.column = SymbolConfig::new("1.2.3.4.8.1.3", "tblName");
            }),
        ];
        assert_eq!(
            get_tags_from_metric_tag_config_list(&tags, "1.10", &store()),
            vec!["table:tbl"]
        );
        assert_eq!(
            get_tags_from_metric_tag_config_list(&tags, "10.1", &store()),
            vec!["interface:eth0"]
        );
    }

    #[test]
    fn transforms_index() {
        let rules = [
            MetricIndexTransform { start: 2, end: 3 },
            MetricIndexTransform { start: 0, end: 0 },
        ];
        assert_eq!(
            transform_index(&["1", "2", "3", "4"], &rules),
            Some(vec!["3".to_string(), "4".to_string(), "1".to_string()])
        );
        assert_eq!(transform_index(&["1", "2", "3"], &rules), None);
        assert_eq!(transform_index(&["1"], &[]), None);
    }

    #[test]
    fn scalar_tags_from_global_metric_tags() {
        let tags = vec![
            tag(|t| {
                t.tag = "snmp_host".into();
                t.oid = "1.3.6.1.2.1.1.5.0".into();
                t.name = "sysName".into();
            }),
            tag(|t| {
                t.tag = "absent".into();
                t.oid = "1.3.6.1.2.1.1.99.0".into();
                t.name = "absent".into();
            }),
        ];
        assert_eq!(get_scalar_tags(&tags, &store()), vec!["snmp_host:router-1"]);
    }
}
