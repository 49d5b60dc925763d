use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use tracing::debug;

use super::create_string_batches;
use super::types::{ResultValue, ScalarResultValues};
use crate::snmp::session::ERROR_STATUS_NO_SUCH_NAME;
use crate::snmp::{Session, SnmpPacket, SnmpVersion, format_oids, trim_oid};

/// Модуль для сбора скалярных SNMP значений
pub struct ScalarCollector;

impl ScalarCollector {
    /// Собирает скаляры пачками по `batch_size` OID на один GET.
    pub async fn fetch_with_batching(
        session: &mut dyn Session,
        oids: &[String],
        batch_size: usize,
    ) -> Result<ScalarResultValues> {
        let batches = create_string_batches(oids, batch_size).context("failed to create oid batches")?;

        let mut values = ScalarResultValues::with_capacity(oids.len());
        for batch in batches {
            let results = Self::fetch(session, &batch)
                .await
                .context("failed to fetch scalar oids")?;
            values.extend(results);
        }

        Ok(values)
    }

    /// Один GET по списку OID плюс повтор с суффиксом `.0`.
    pub async fn fetch(session: &mut dyn Session, oids: &[String]) -> Result<ScalarResultValues> {
        let packet = Self::get_with_v1_retry(session, oids.to_vec()).await?;
        let mut values = Self::packet_to_values(&packet);
        Self::retry_failed_oids(session, &packet, &mut values).await;
        Ok(values)
    }

    /// Для SNMPv1 убирает OID с `noSuchName` и повторяет запрос, пока
    /// он не пройдет или список не опустеет.
    async fn get_with_v1_retry(
        session: &mut dyn Session,
        mut oids: Vec<String>,
    ) -> Result<SnmpPacket> {
        loop {
            let packet = session
                .get(&oids)
                .await
                .with_context(|| format!("fetch scalar: error getting oids `{}`", format_oids(&oids)))?;

            if session.version() != SnmpVersion::V1
                || packet.error_status != ERROR_STATUS_NO_SUCH_NAME
            {
                return Ok(packet);
            }

            let zero_based = packet.error_index as i64 - 1;
            if zero_based < 0 || zero_based as usize >= oids.len() {
                bail!(
                    "invalid ErrorIndex `{}` when fetching oids `{}`",
                    packet.error_index,
                    format_oids(&oids)
                );
            }

            let removed = oids.remove(zero_based as usize);
            debug!(oid = %removed, "noSuchName, OID исключен из запроса");

            if oids.is_empty() {
                // все OID отклонены агентом; пустой результат не считается ошибкой
                debug!("после повторов SNMPv1 не осталось OID для запроса");
                return Ok(SnmpPacket::default());
            }
        }
    }

    fn packet_to_values(packet: &SnmpPacket) -> ScalarResultValues {
        let mut values = ScalarResultValues::with_capacity(packet.variables.len());
        for varbind in &packet.variables {
            if varbind.value.is_missing() {
                continue;
            }
            match ResultValue::from_varbind(varbind) {
                Ok((oid, value)) => {
                    values.insert(oid, value);
                }
                Err(e) => debug!(error = %e, "пропускаем значение"),
            }
        }
        values
    }

    async fn retry_failed_oids(
        session: &mut dyn Session,
        packet: &SnmpPacket,
        values: &mut ScalarResultValues,
    ) {
        let mut retry_oids = BTreeMap::new();
        for varbind in &packet.variables {
            let oid = trim_oid(&varbind.oid);
            let no_such = matches!(
                varbind.value,
                crate::snmp::PduValue::NoSuchObject | crate::snmp::PduValue::NoSuchInstance
            );
            if no_such && !oid.ends_with(".0") {
                retry_oids.insert(oid.to_string(), format!("{}.0", oid));
            }
        }
        if retry_oids.is_empty() {
            return;
        }

        let mut fetch_oids: Vec<String> = retry_oids.values().cloned().collect();
        fetch_oids.sort();

        match Self::get_with_v1_retry(session, fetch_oids).await {
            Ok(retry_packet) => {
                let retry_values = Self::packet_to_values(&retry_packet);
                for (initial, actual) in &retry_oids {
                    if let Some(value) = retry_values.get(actual) {
                        values.insert(initial.clone(), value.clone());
                    }
                }
            }
            Err(e) => debug!(error = %format!("{:#}", e), oids = ?retry_oids, "повтор с `.0` не удался"),
        }
    }
}
