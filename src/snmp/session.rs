use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// OID, по которому проверяется доступность устройства.
pub const DEVICE_REACHABLE_GET_NEXT_OID: &str = "1.3.6.1.2.1.1";

pub const SYS_OBJECT_ID_OID: &str = "1.3.6.1.2.1.1.2.0";
pub const SYS_NAME_OID: &str = "1.3.6.1.2.1.1.5.0";

/// Код ошибки `noSuchName` из SNMPv1.
pub const ERROR_STATUS_NO_SUCH_NAME: u32 = 2;

/// Версия протокола SNMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

impl SnmpVersion {
    pub fn from_number(version: u8) -> Result<Self, SessionError> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2c),
            3 => Ok(Self::V3),
            other => Err(SessionError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "1"),
            Self::V2c => write!(f, "2c"),
            Self::V3 => write!(f, "3"),
        }
    }
}

/// Значение одной переменной PDU, не зависящее от транспорта.
#[derive(Debug, Clone, PartialEq)]
pub enum PduValue {
    Integer(i64),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    OctetString(Vec<u8>),
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Opaque(Vec<u8>),
    Boolean(bool),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl PduValue {
    /// Значения-заглушки, которыми агент сообщает об отсутствии OID.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            PduValue::NoSuchObject | PduValue::NoSuchInstance | PduValue::EndOfMibView
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PduValue::Integer(_) => "Integer",
            PduValue::Counter32(_) => "Counter32",
            PduValue::Gauge32(_) => "Gauge32",
            PduValue::TimeTicks(_) => "TimeTicks",
            PduValue::Counter64(_) => "Counter64",
            PduValue::OctetString(_) => "OctetString",
            PduValue::ObjectIdentifier(_) => "ObjectIdentifier",
            PduValue::IpAddress(_) => "IPAddress",
            PduValue::Opaque(_) => "Opaque",
            PduValue::Boolean(_) => "Boolean",
            PduValue::Null => "Null",
            PduValue::NoSuchObject => "NoSuchObject",
            PduValue::NoSuchInstance => "NoSuchInstance",
            PduValue::EndOfMibView => "EndOfMibView",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Varbind {
    pub oid: String,
    pub value: PduValue,
}

impl Varbind {
    pub fn new(oid: impl Into<String>, value: PduValue) -> Self {
        Self {
            oid: oid.into(),
            value,
        }
    }
}

/// Ответ агента на один запрос.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnmpPacket {
    pub error_status: u32,
    pub error_index: u32,
    pub variables: Vec<Varbind>,
}

impl SnmpPacket {
    pub fn with_variables(variables: Vec<Varbind>) -> Self {
        Self {
            variables,
            ..Default::default()
        }
    }
}

/// Параметры безопасности USM для SNMPv3.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsmParams {
    pub user: String,
    pub auth_protocol: String,
    pub auth_key: String,
    pub priv_protocol: String,
    pub priv_key: String,
    pub context_engine_id: String,
    pub context_name: String,
}

/// Учетные данные: либо community, либо пользователь USM.
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Community(String),
    Usm(UsmParams),
}

/// Полностью провалидированные параметры подключения к одному устройству.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub ip: String,
    pub port: u16,
    pub version: SnmpVersion,
    pub credentials: Credentials,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl SessionOptions {
    pub fn target(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Примитивы протокола, которые нужны движку опроса.
#[async_trait]
pub trait Session: Send {
    async fn get(&mut self, oids: &[String]) -> Result<SnmpPacket, SessionError>;

    async fn get_next(&mut self, oids: &[String]) -> Result<SnmpPacket, SessionError>;

    async fn get_bulk(
        &mut self,
        oids: &[String],
        max_repetitions: u32,
    ) -> Result<SnmpPacket, SessionError>;

    fn version(&self) -> SnmpVersion;

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    /// Обходит поддерево `root` через GetNext (v1) или GetBulk.
    async fn walk_all(&mut self, root: &str) -> Result<Vec<Varbind>, SessionError> {
        let root = root.trim_start_matches('.').to_string();
        let prefix = format!("{}.", root);
        let mut current = root.clone();
        let mut results = Vec::new();

        loop {
            let request = [current.clone()];
            let packet = match self.version() {
                SnmpVersion::V1 => self.get_next(&request).await?,
                _ => self.get_bulk(&request, 10).await?,
            };

            let mut advanced = false;
            for varbind in packet.variables {
                let oid = varbind.oid.trim_start_matches('.').to_string();
                if varbind.value.is_missing() || !oid.starts_with(&prefix) {
                    return Ok(results);
                }
                if crate::snmp::oid::compare_oids(&oid, &current).is_le() {
                    // агент вернул OID не по порядку
                    return Ok(results);
                }
                current = oid.clone();
                advanced = true;
                results.push(Varbind::new(oid, varbind.value));
            }

            if !advanced {
                return Ok(results);
            }
        }
    }
}

/// Создает сессии по параметрам подключения.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError>;
}
