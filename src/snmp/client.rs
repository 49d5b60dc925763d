use async_trait::async_trait;
use snmp2::{AsyncSession, Oid, Pdu, Value};
use tokio::time::{Duration, timeout};
use tracing::debug;

use super::oid::parse_oid;
use super::session::{
    Credentials, ERROR_STATUS_NO_SUCH_NAME, PduValue, Session, SessionFactory, SessionOptions,
    SnmpPacket, SnmpVersion, Varbind,
};
use super::{v2c, v3};
use crate::error::SessionError;

#[derive(Debug, Clone, Copy)]
enum Operation {
    Get,
    GetNext,
    GetBulk(u32),
}

/// SNMP клиент поверх `snmp2::AsyncSession`.
///
/// GET и GETNEXT по нескольким OID выполняются как последовательность
/// одиночных запросов; индекс ошибки пересчитывается относительно исходного
/// списка, поэтому логика повторов для SNMPv1 работает без изменений.
pub struct SnmpClient {
    session: AsyncSession,
    version: SnmpVersion,
    timeout: Duration,
    retries: u32,
}

impl SnmpClient {
    pub async fn connect(options: &SessionOptions) -> Result<Self, SessionError> {
        let target = options.target();
        let session = match (&options.credentials, options.version) {
            (Credentials::Community(community), SnmpVersion::V1 | SnmpVersion::V2c) => {
                v2c::open_community_session(&target, community.as_bytes(), options.version).await?
            }
            (Credentials::Usm(params), SnmpVersion::V3) => {
                v3::open_usm_session(&target, params).await?
            }
            _ => return Err(SessionError::NoAuthentication),
        };

        Ok(Self {
            session,
            version: options.version,
            timeout: Duration::from_secs(options.timeout_secs.max(1)),
            retries: options.retries,
        })
    }

    async fn exchange(
        &mut self,
        operation: Operation,
        oids: &[Oid<'static>],
    ) -> Result<SnmpPacket, SessionError> {
        let mut attempt = 0;
        loop {
            let result = match operation {
                Operation::Get => timeout(self.timeout, self.session.get(&oids[0]))
                    .await
                    .map(|r| r.map(convert_pdu).map_err(|e| e.to_string())),
                Operation::GetNext => timeout(self.timeout, self.session.getnext(&oids[0]))
                    .await
                    .map(|r| r.map(convert_pdu).map_err(|e| e.to_string())),
                Operation::GetBulk(max_repetitions) => {
                    let refs: Vec<&Oid<'static>> = oids.iter().collect();
                    timeout(self.timeout, self.session.getbulk(&refs, 0, max_repetitions))
                        .await
                        .map(|r| r.map(convert_pdu).map_err(|e| e.to_string()))
                }
            };

            match result {
                Ok(Ok(packet)) => return Ok(packet),
                Ok(Err(e)) => return Err(SessionError::Transport(e)),
                Err(_) if attempt < self.retries => {
                    attempt += 1;
                    debug!(attempt, ?operation, "таймаут SNMP запроса, повторяем");
                }
                Err(_) => return Err(SessionError::Timeout { retries: self.retries }),
            }
        }
    }

    async fn fan_out(
        &mut self,
        operation: Operation,
        oids: &[String],
    ) -> Result<SnmpPacket, SessionError> {
        let mut merged = SnmpPacket::default();

        for (i, oid) in oids.iter().enumerate() {
            let parsed = parse_oid(oid)?;
            let single = self.exchange(operation, &[parsed]).await?;

            if single.error_status == 0 {
                merged.variables.extend(single.variables);
                continue;
            }

            match operation {
                // в v1 GETNEXT за пределами MIB возвращает noSuchName
                Operation::GetNext if single.error_status == ERROR_STATUS_NO_SUCH_NAME => {
                    merged.variables.push(Varbind::new(oid.clone(), PduValue::EndOfMibView));
                }
                _ => {
                    merged.error_status = single.error_status;
                    merged.error_index = (i + 1) as u32;
                    merged.variables = oids
                        .iter()
                        .map(|o| Varbind::new(o.clone(), PduValue::Null))
                        .collect();
                    return Ok(merged);
                }
            }
        }

        Ok(merged)
    }
}

#[async_trait]
impl Session for SnmpClient {
    async fn get(&mut self, oids: &[String]) -> Result<SnmpPacket, SessionError> {
        self.fan_out(Operation::Get, oids).await
    }

    async fn get_next(&mut self, oids: &[String]) -> Result<SnmpPacket, SessionError> {
        self.fan_out(Operation::GetNext, oids).await
    }

    async fn get_bulk(
        &mut self,
        oids: &[String],
        max_repetitions: u32,
    ) -> Result<SnmpPacket, SessionError> {
        let parsed = oids
            .iter()
            .map(|oid| parse_oid(oid.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        if parsed.is_empty() {
            return Ok(SnmpPacket::default());
        }
        self.exchange(Operation::GetBulk(max_repetitions), &parsed).await
    }

    fn version(&self) -> SnmpVersion {
        self.version
    }
}

fn convert_pdu(pdu: Pdu<'_>) -> SnmpPacket {
    SnmpPacket {
        error_status: pdu.error_status,
        error_index: pdu.error_index,
        variables: pdu
            .varbinds
            .into_iter()
            .map(|(oid, value)| Varbind::new(oid.to_string(), convert_value(value)))
            .collect(),
    }
}

fn convert_value(value: Value<'_>) -> PduValue {
    match value {
        Value::Integer(v) => PduValue::Integer(v),
        Value::Counter32(v) => PduValue::Counter32(v),
        Value::Unsigned32(v) => PduValue::Gauge32(v),
        Value::Timeticks(v) => PduValue::TimeTicks(v),
        Value::Counter64(v) => PduValue::Counter64(v),
        Value::OctetString(bytes) => PduValue::OctetString(bytes.to_vec()),
        Value::Opaque(bytes) => PduValue::Opaque(bytes.to_vec()),
        Value::ObjectIdentifier(oid) => PduValue::ObjectIdentifier(oid.to_string()),
        Value::IpAddress(addr) => PduValue::IpAddress(addr),
        Value::Boolean(b) => PduValue::Boolean(b),
        Value::NoSuchObject => PduValue::NoSuchObject,
        Value::NoSuchInstance => PduValue::NoSuchInstance,
        Value::EndOfMibView => PduValue::EndOfMibView,
        _ => PduValue::Null,
    }
}

/// Фабрика реальных сессий на `snmp2`.
#[derive(Debug, Default, Clone)]
pub struct Snmp2SessionFactory;

#[async_trait]
impl SessionFactory for Snmp2SessionFactory {
    async fn connect(&self, options: &SessionOptions) -> Result<Box<dyn Session>, SessionError> {
        let client = SnmpClient::connect(options).await?;
        Ok(Box::new(client))
    }
}
