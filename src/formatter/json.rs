use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

pub const SNMP_OBJECT_NAME: &str = "snmp_object";
pub const SNMP_METRIC_NAME: &str = "snmp_metric";

pub type Tags = BTreeMap<String, String>;
pub type Fields = BTreeMap<String, Value>;

/// Категория записей, которые получает приемник.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Object,
    Metric,
    CustomObject,
}

/// Одна выходная запись
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: Tags,
    pub fields: Fields,
    pub time: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, row: TagField, time: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: row.tags,
            fields: row.fields,
            time,
        }
    }

    pub fn field_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Строка агрегации: теги и поля одной группы.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagField {
    pub tags: Tags,
    pub fields: Fields,
}

// атрибуты объекта, сериализуются в JSON строки полей

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceAttribute {
    pub interface: String,
    pub interface_alias: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorAttribute {
    pub sensor_id: String,
    pub sensor_type: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemAttribute {
    pub mem: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemPoolNameAttribute {
    pub mem_pool_name: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuAttribute {
    pub cpu: String,
    pub fields: Fields,
}

/// JSON форматтер для выходных записей
pub struct JsonFormatter;

impl JsonFormatter {
    /// Сериализует значение в JSON строку поля; при ошибке поле пустое
    pub fn to_field<T: Serialize>(value: &T) -> Value {
        match serde_json::to_string(value) {
            Ok(s) => Value::String(s),
            Err(e) => {
                error!(error = %e, "Ошибка сериализации в JSON");
                Value::Null
            }
        }
    }

    /// Сериализует запись в компактный JSON
    pub fn to_json_compact(point: &Point) -> anyhow::Result<String> {
        serde_json::to_string(point).map_err(|e| anyhow::anyhow!("Ошибка сериализации в JSON: {}", e))
    }
}
