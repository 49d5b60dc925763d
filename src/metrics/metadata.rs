use tracing::debug;

use crate::collector::ResultValueStore;
use crate::config::profile::{METADATA_DEVICE_RESOURCE, MetadataConfig, MetadataField};

use super::symbol::get_scalar_value_from_symbol;

pub const DEVICE_REACHABLE: &str = "reachable";
pub const DEVICE_UNREACHABLE: &str = "unreachable";

/// Поля ресурса `device` в виде `key:value`, плюс статус доступности.
pub fn device_metadata_tags(
    metadata: &MetadataConfig,
    values: &ResultValueStore,
    reachable: bool,
) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(device) = metadata.get(METADATA_DEVICE_RESOURCE) {
        for (key, field) in &device.fields {
            match field_value(field, values) {
                Some(value) if !value.is_empty() => tags.push(format!("{}:{}", key, value)),
                _ => debug!(field = %key, "device metadata field has no value"),
            }
        }
    }
    let status = if reachable {
        DEVICE_REACHABLE
    } else {
        DEVICE_UNREACHABLE
    };
    tags.push(format!("status:{}", status));
    tags
}

/// Значение поля `device_meta` объекта.
pub fn build_device_meta(metadata: &MetadataConfig, values: &ResultValueStore, reachable: bool) -> String {
    device_metadata_tags(metadata, values, reachable).join(", ")
}

fn field_value(field: &MetadataField, values: &ResultValueStore) -> Option<String> {
    if !field.value.is_empty() {
        return Some(field.value.clone());
    }
    if !field.symbol.oid.is_empty() {
        return get_scalar_value_from_symbol(values, &field.symbol)
            .map(|v| v.to_string_value())
            .ok();
    }
    field.symbols.iter().find_map(|symbol| {
        get_scalar_value_from_symbol(values, symbol)
            .map(|v| v.to_string_value())
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ResultValue;
    use crate::config::SymbolConfig;
    use crate::config::profile::legacy_metadata_config;

    #[test]
    fn builds_device_meta_from_legacy_fields() {
        let mut values = ResultValueStore::default();
        values
            .scalar_values
            .insert("1.3.6.1.2.1.1.5.0".into(), ResultValue::bytes(b"core-sw".to_vec()));
        values
            .scalar_values
            .insert("1.3.6.1.2.1.1.1.0".into(), ResultValue::text("Cisco IOS"));

        let meta = build_device_meta(&legacy_metadata_config(), &values, true);
        assert!(meta.contains("name:core-sw"));
        assert!(meta.contains("description:Cisco IOS"));
        assert!(meta.ends_with("status:reachable"));
    }

    #[test]
    fn first_available_symbol_is_used() {
        let mut metadata = MetadataConfig::new();
        let device = metadata.entry(METADATA_DEVICE_RESOURCE.to_string()).or_default();
        device.fields.insert(
            "vendor".into(),
            MetadataField {
                value: "cisco".into(),
                ..Default::default()
            },
        );
        device.fields.insert(
            "serial_number".into(),
            MetadataField {
                symbols: vec![
                    SymbolConfig::new("1.9.9.1.0", "missing"),
                    SymbolConfig::new("1.9.9.2.0", "serial"),
                ],
                ..Default::default()
            },
        );

        let mut values = ResultValueStore::default();
        values
            .scalar_values
            .insert("1.9.9.2.0".into(), ResultValue::text("FOX123"));

        assert_eq!(
            device_metadata_tags(&metadata, &values, false),
            vec!["serial_number:FOX123", "vendor:cisco", "status:unreachable"]
        );
    }
}
