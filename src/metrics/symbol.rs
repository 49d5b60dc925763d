use std::collections::HashMap;

use tracing::debug;

use crate::collector::{ResultValue, ResultValueStore, Value};
use crate::config::SymbolConfig;
use crate::config::profile::regex_replace_value;
use crate::error::ValueError;

/// Скалярное значение символа после пост-обработки.
pub fn get_scalar_value_from_symbol(
    values: &ResultValueStore,
    symbol: &SymbolConfig,
) -> Result<ResultValue, ValueError> {
    let value = values.get_scalar_value(&symbol.oid)?;
    process_value_using_symbol_config(value.clone(), symbol)
}

/// Значения колонки символа по индексам строк.
///
/// Строки, которые не прошли пост-обработку, пропускаются.
pub fn get_column_value_from_symbol(
    values: &ResultValueStore,
    symbol: &SymbolConfig,
) -> Result<HashMap<String, ResultValue>, ValueError> {
    let column = values.get_column_values(&symbol.oid)?;
    let mut result = HashMap::with_capacity(column.len());
    for (index, value) in column {
        match process_value_using_symbol_config(value.clone(), symbol) {
            Ok(processed) => {
                result.insert(index.clone(), processed);
            }
            Err(e) => debug!(
                symbol = %symbol,
                index = %index,
                error = %e,
                "error processing value"
            ),
        }
    }
    Ok(result)
}

/// Применяет `extract_value`, `match`, затем `format`.
///
/// `scale_factor` применяется позже, при отправке метрики.
pub fn process_value_using_symbol_config(
    mut value: ResultValue,
    symbol: &SymbolConfig,
) -> Result<ResultValue, ValueError> {
    if let Some(pattern) = &symbol.extract_value_compiled {
        value = extract_value(value, pattern)?;
    }

    if let Some(pattern) = &symbol.match_pattern_compiled {
        let source = value.to_string_value();
        if !pattern.is_match(&source) {
            return Err(ValueError::MatchFailed {
                pattern: symbol.match_pattern.clone(),
                value: source,
            });
        }
        let replaced = regex_replace_value(&source, pattern, &symbol.match_value);
        if replaced.is_empty() {
            return Err(ValueError::TemplateIncompatible {
                pattern: symbol.match_pattern.clone(),
                value: source,
                template: symbol.match_value.clone(),
            });
        }
        value.value = Value::Text(replaced);
    }

    if !symbol.format.is_empty() {
        value = format_value(value, &symbol.format)?;
    }

    Ok(value)
}

fn extract_value(value: ResultValue, pattern: &regex::Regex) -> Result<ResultValue, ValueError> {
    let source = match &value.value {
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).to_string(),
        Value::Float(_) => return Ok(value),
    };

    let Some(captures) = pattern.captures(&source) else {
        return Err(ValueError::ExtractNoMatch {
            pattern: pattern.as_str().to_string(),
            value: source,
        });
    };
    let Some(group) = captures.get(1) else {
        return Err(ValueError::ExtractNoGroup {
            pattern: pattern.as_str().to_string(),
            value: source,
        });
    };

    Ok(ResultValue {
        submission_type: value.submission_type,
        value: Value::Text(group.as_str().to_string()),
    })
}

/// Преобразует значение в заданный формат. Сейчас поддерживается только `mac_address`.
pub fn format_value(value: ResultValue, format: &str) -> Result<ResultValue, ValueError> {
    match &value.value {
        Value::Bytes(bytes) => match format {
            "mac_address" => {
                let mac = bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(":");
                Ok(ResultValue {
                    submission_type: value.submission_type,
                    value: Value::Text(mac),
                })
            }
            other => Err(ValueError::UnknownFormat {
                format: other.to_string(),
                kind: value.value.kind(),
            }),
        },
        other => Err(ValueError::FormatUnsupported {
            format: format.to_string(),
            kind: other.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::profile::validate_enrich_symbol;

    fn symbol(configure: impl FnOnce(&mut SymbolConfig)) -> SymbolConfig {
        let mut symbol = SymbolConfig::new("1.2.3", "mySymbol");
        configure(&mut symbol);
        assert!(validate_enrich_symbol(&mut symbol).is_empty());
        symbol
    }

    #[test]
    fn extracts_first_group() {
        let symbol = symbol(|s| s.extract_value = r"(\d+)C".into());
        let value = process_value_using_symbol_config(ResultValue::text("22C"), &symbol).unwrap();
        assert_eq!(value, ResultValue::text("22"));

        let value =
            process_value_using_symbol_config(ResultValue::bytes(b"101C".to_vec()), &symbol).unwrap();
        assert_eq!(value.to_f64().unwrap(), 101.0);

        let value = process_value_using_symbol_config(ResultValue::float(10.0), &symbol).unwrap();
        assert_eq!(value, ResultValue::float(10.0));
    }

    #[test]
    fn extract_errors() {
        let symbol = symbol(|s| s.extract_value = r"(\d+)C".into());
        let err = process_value_using_symbol_config(ResultValue::text("abc"), &symbol).unwrap_err();
        assert_eq!(
            err.to_string(),
            r"extract value extractValuePattern does not match (extractValuePattern=(\d+)C, srcValue=abc)"
        );

        let symbol = self::symbol(|s| s.extract_value = r"\d+C".into());
        let err = process_value_using_symbol_config(ResultValue::text("22C"), &symbol).unwrap_err();
        assert_eq!(
            err.to_string(),
            r"extract value pattern des not contain any matching group (extractValuePattern=\d+C, srcValue=22C)"
        );
    }

    #[test]
    fn match_and_template() {
        let symbol = symbol(|s| {
            s.match_pattern = r"(\w+)\.(\w+)".into();
            s.match_value = "$2-$1".into();
        });
        let value =
            process_value_using_symbol_config(ResultValue::text("abc.xyz"), &symbol).unwrap();
        assert_eq!(value, ResultValue::text("xyz-abc"));

        let err = process_value_using_symbol_config(ResultValue::text("nodot"), &symbol).unwrap_err();
        assert_eq!(
            err.to_string(),
            r"match pattern `(\w+)\.(\w+)` does not match string `nodot`"
        );
    }

    #[test]
    fn formats_mac_address() {
        let symbol = symbol(|s| s.format = "mac_address".into());
        let value = process_value_using_symbol_config(
            ResultValue::bytes(vec![0x82, 0xa5, 0x6e, 0xa5, 0xc8, 0x01]),
            &symbol,
        )
        .unwrap();
        assert_eq!(value, ResultValue::text("82:a5:6e:a5:c8:01"));

        let symbol = self::symbol(|s| s.format = "unknown_format".into());
        let err = process_value_using_symbol_config(ResultValue::bytes(vec![0x82]), &symbol)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown format `unknown_format` (value type `bytes`)"
        );
    }

    #[test]
    fn column_rows_with_errors_are_skipped() {
        let symbol = symbol(|s| s.extract_value = r"(\d+)C".into());
        let mut store = ResultValueStore::default();
        store.column_values.insert(
            "1.2.3".into(),
            HashMap::from([
                ("1".to_string(), ResultValue::text("10C")),
                ("2".to_string(), ResultValue::text("no value")),
            ]),
        );

        let values = get_column_value_from_symbol(&store, &symbol).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["1"], ResultValue::text("10"));

        let missing = SymbolConfig::new("9.9", "missing");
        assert!(matches!(
            get_column_value_from_symbol(&store, &missing),
            Err(ValueError::ColumnNotFound(_))
        ));
    }
}
