use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::ValueError;
use crate::snmp::{PduValue, Varbind, trim_oid};

/// Подсказка о типе отправки для счетчиков.
pub const SUBMISSION_COUNTER: &str = "counter";

/// Полезная нагрузка значения.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Float(_) => "float64",
            Value::Text(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }
}

/// Значение из ответа агента вместе с типом отправки.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_type: Option<String>,
    pub value: Value,
}

impl ResultValue {
    pub fn float(v: f64) -> Self {
        Self {
            submission_type: None,
            value: Value::Float(v),
        }
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self {
            submission_type: None,
            value: Value::Text(v.into()),
        }
    }

    pub fn bytes(v: impl Into<Vec<u8>>) -> Self {
        Self {
            submission_type: None,
            value: Value::Bytes(v.into()),
        }
    }

    pub fn counter(v: f64) -> Self {
        Self {
            submission_type: Some(SUBMISSION_COUNTER.to_string()),
            value: Value::Float(v),
        }
    }

    /// Преобразует переменную PDU; возвращает обрезанный OID и значение.
    pub fn from_varbind(varbind: &Varbind) -> Result<(String, ResultValue), ValueError> {
        let oid = trim_oid(&varbind.oid).to_string();
        let value = match &varbind.value {
            PduValue::Integer(v) => Self::float(*v as f64),
            PduValue::Gauge32(v) | PduValue::TimeTicks(v) => Self::float(*v as f64),
            PduValue::Counter32(v) => Self::counter(*v as f64),
            PduValue::Counter64(v) => Self::counter(*v as f64),
            PduValue::Boolean(b) => Self::float(if *b { 1.0 } else { 0.0 }),
            PduValue::OctetString(bytes) | PduValue::Opaque(bytes) => Self::bytes(bytes.clone()),
            PduValue::ObjectIdentifier(value) => Self::text(trim_oid(value)),
            PduValue::IpAddress(addr) => {
                Self::text(format!("{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3]))
            }
            other => {
                return Err(ValueError::UnsupportedPdu {
                    oid: varbind.oid.clone(),
                    kind: other.type_name(),
                });
            }
        };
        Ok((oid, value))
    }

    pub fn to_f64(&self) -> Result<f64, ValueError> {
        match &self.value {
            Value::Float(v) => Ok(*v),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ValueError::NotANumber(s.clone())),
            Value::Bytes(b) => {
                let s = String::from_utf8_lossy(b);
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| ValueError::NotANumber(s.to_string()))
            }
        }
    }

    /// Строковое представление; непечатные байты кодируются как `0x..`.
    pub fn to_string_value(&self) -> String {
        match &self.value {
            Value::Float(v) => format!("{}", *v as i64),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => bytes_to_string(b),
        }
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_value())
    }
}

fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.chars().all(is_printable) => s.to_string(),
        _ => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("0x{}", hex)
        }
    }
}

fn is_printable(c: char) -> bool {
    !c.is_control() || matches!(c, '\n' | '\r' | '\t')
}

pub type ScalarResultValues = HashMap<String, ResultValue>;
pub type ColumnResultValues = HashMap<String, HashMap<String, ResultValue>>;

/// Результат одного цикла опроса устройства.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultValueStore {
    pub scalar_values: ScalarResultValues,
    pub column_values: ColumnResultValues,
}

impl ResultValueStore {
    pub fn get_scalar_value(&self, oid: &str) -> Result<&ResultValue, ValueError> {
        self.scalar_values
            .get(oid)
            .ok_or_else(|| ValueError::ScalarNotFound(oid.to_string()))
    }

    pub fn get_column_values(
        &self,
        oid: &str,
    ) -> Result<&HashMap<String, ResultValue>, ValueError> {
        self.column_values
            .get(oid)
            .ok_or_else(|| ValueError::ColumnNotFound(oid.to_string()))
    }

    pub fn get_column_value(&self, oid: &str, index: &str) -> Result<&ResultValue, ValueError> {
        self.get_column_values(oid)?
            .get(index)
            .ok_or_else(|| ValueError::ColumnIndexNotFound {
                oid: oid.to_string(),
                index: index.to_string(),
            })
    }

    /// Значение колонки как float; любая ошибка дает 0.
    pub fn get_column_value_as_float(&self, oid: &str, index: &str) -> f64 {
        self.get_column_value(oid, index)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0)
    }

    /// Индексы строк колонки, отсортированные лексикографически.
    pub fn get_column_indexes(&self, oid: &str) -> Result<Vec<String>, ValueError> {
        let mut indexes: Vec<String> = self.get_column_values(oid)?.keys().cloned().collect();
        indexes.sort();
        Ok(indexes)
    }
}
