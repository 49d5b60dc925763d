use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::create_string_batches;
use super::types::{ColumnResultValues, ResultValue};
use crate::snmp::{Session, SnmpPacket, SnmpVersion, format_oids, trim_oid};

/// Способ обхода таблиц.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    UseGetBulk,
    UseGetNext,
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStrategy::UseGetBulk => write!(f, "useGetBulk"),
            FetchStrategy::UseGetNext => write!(f, "useGetNext"),
        }
    }
}

/// Модуль для сбора табличных SNMP данных
pub struct TableCollector;

impl TableCollector {
    /// Обходит колонки пачками. `oids` отображает колонку на OID, с которого
    /// начинается обход (обычно это сама колонка).
    pub async fn fetch_with_batching(
        session: &mut dyn Session,
        oids: &HashMap<String, String>,
        batch_size: usize,
        max_repetitions: u32,
        strategy: FetchStrategy,
    ) -> Result<ColumnResultValues> {
        let mut columns: Vec<String> = oids.keys().cloned().collect();
        columns.sort();

        let batches =
            create_string_batches(&columns, batch_size).context("failed to create column oid batches")?;

        let mut values = ColumnResultValues::with_capacity(oids.len());
        for batch in batches {
            let to_fetch: BTreeMap<String, String> = batch
                .iter()
                .filter_map(|column| oids.get(column).map(|next| (column.clone(), next.clone())))
                .collect();

            let results = Self::fetch(session, to_fetch, max_repetitions, strategy)
                .await
                .context("failed to fetch column oids")?;
            merge_column_values(&mut values, results);
        }

        Ok(values)
    }

    /// Обходит одну пачку колонок до конца всех колонок.
    ///
    /// Ошибка первого запроса прерывает обход; ошибка на последующих
    /// итерациях логируется, собранные к этому моменту строки сохраняются.
    pub async fn fetch(
        session: &mut dyn Session,
        oids: BTreeMap<String, String>,
        max_repetitions: u32,
        strategy: FetchStrategy,
    ) -> Result<ColumnResultValues> {
        let mut values = ColumnResultValues::with_capacity(oids.len());
        let mut processed: HashSet<String> = HashSet::new();
        let mut current = oids;
        let mut first_request = true;

        while !current.is_empty() {
            debug!(
                max_repetitions,
                strategy = %strategy,
                oids = ?current,
                "fetch column: request oids"
            );

            let mut columns = Vec::with_capacity(current.len());
            let mut requests = Vec::with_capacity(current.len());
            for (column, next) in &current {
                if !processed.insert(next.clone()) {
                    debug!(oid = %next, "fetch column: OID already processed");
                    continue;
                }
                columns.push(column.clone());
                requests.push(next.clone());
            }
            if columns.is_empty() {
                break;
            }
            columns.sort();
            requests.sort();

            let packet = match Self::request(session, &requests, max_repetitions, strategy).await {
                Ok(packet) => packet,
                Err(e) if first_request => return Err(e),
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "обход таблицы прерван, сохраняем частичный результат");
                    break;
                }
            };
            first_request = false;

            let (new_values, next_oids) = Self::packet_to_column_values(&columns, &packet);
            merge_column_values(&mut values, new_values);
            current = next_oids;
        }

        Ok(values)
    }

    async fn request(
        session: &mut dyn Session,
        oids: &[String],
        max_repetitions: u32,
        strategy: FetchStrategy,
    ) -> Result<SnmpPacket> {
        if strategy == FetchStrategy::UseGetBulk && session.version() != SnmpVersion::V1 {
            let packet = session.get_bulk(oids, max_repetitions).await.with_context(|| {
                format!("fetch column: failed getting oids `{}` using GetBulk", format_oids(oids))
            })?;
            debug!(count = packet.variables.len(), "fetch column: GetBulk results");
            return Ok(packet);
        }

        let packet = session.get_next(oids).await.with_context(|| {
            format!("fetch column: failed getting oids `{}` using GetNext", format_oids(oids))
        })?;
        debug!(count = packet.variables.len(), "fetch column: GetNext results");
        Ok(packet)
    }

    /// Раскладывает переменные ответа по колонкам: i-я переменная относится к
    /// колонке `columns[i % columns.len()]`. Колонка, вышедшая за свое
    /// поддерево, в следующую итерацию не попадает.
    fn packet_to_column_values(
        columns: &[String],
        packet: &SnmpPacket,
    ) -> (ColumnResultValues, BTreeMap<String, String>) {
        let mut values = ColumnResultValues::new();
        let mut next_oids = BTreeMap::new();

        for (i, varbind) in packet.variables.iter().enumerate() {
            if varbind.value.is_missing() {
                continue;
            }
            let column = &columns[i % columns.len()];
            let oid = trim_oid(&varbind.oid);
            let prefix = format!("{}.", column);

            let Some(index) = oid.strip_prefix(prefix.as_str()) else {
                next_oids.remove(column);
                continue;
            };

            match ResultValue::from_varbind(varbind) {
                Ok((_, value)) => {
                    values
                        .entry(column.clone())
                        .or_default()
                        .insert(index.to_string(), value);
                    next_oids.insert(column.clone(), oid.to_string());
                }
                Err(e) => debug!(error = %e, "пропускаем значение колонки"),
            }
        }

        (values, next_oids)
    }
}

fn merge_column_values(target: &mut ColumnResultValues, source: ColumnResultValues) {
    for (column, rows) in source {
        target.entry(column).or_default().extend(rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::mock::{MockRequest, MockSession};
    use crate::snmp::{PduValue, Varbind};

    fn ticks(vars: &[(&str, u32)]) -> SnmpPacket {
        SnmpPacket::with_variables(
            vars.iter()
                .map(|(o, v)| Varbind::new(*o, PduValue::TimeTicks(*v)))
                .collect(),
        )
    }

    fn columns(list: &[&str]) -> HashMap<String, String> {
        list.iter().map(|c| (c.to_string(), c.to_string())).collect()
    }

    fn column(values: &ColumnResultValues, oid: &str) -> Vec<(String, f64)> {
        let mut rows: Vec<(String, f64)> = values[oid]
            .iter()
            .map(|(k, v)| (k.clone(), v.to_f64().unwrap()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    #[tokio::test]
    async fn walks_columns_with_get_bulk() {
        let mock = MockSession::default();
        mock.on(
            MockRequest::get_bulk(&["1.1.1", "1.1.2"], 10),
            ticks(&[
                ("1.1.1.1", 11),
                ("1.1.2.1", 21),
                ("1.1.1.2", 12),
                ("1.1.2.2", 22),
                ("1.1.1.3", 13),
                ("1.1.3.1", 31),
            ]),
        );
        mock.on(
            MockRequest::get_bulk(&["1.1.1.3"], 10),
            ticks(&[("1.1.1.4", 14), ("1.1.1.5", 15)]),
        );
        mock.on(MockRequest::get_bulk(&["1.1.1.5"], 10), ticks(&[("1.1.3.1", 34)]));

        let mut session = mock.clone();
        let values = TableCollector::fetch_with_batching(
            &mut session,
            &columns(&["1.1.1", "1.1.2"]),
            100,
            10,
            FetchStrategy::UseGetBulk,
        )
        .await
        .unwrap();

        assert_eq!(
            column(&values, "1.1.1"),
            vec![
                ("1".into(), 11.0),
                ("2".into(), 12.0),
                ("3".into(), 13.0),
                ("4".into(), 14.0),
                ("5".into(), 15.0)
            ]
        );
        assert_eq!(column(&values, "1.1.2"), vec![("1".into(), 21.0), ("2".into(), 22.0)]);
    }

    #[tokio::test]
    async fn v1_uses_get_next_per_batch() {
        let mock = MockSession::new(SnmpVersion::V1);
        mock.on(
            MockRequest::get_next(&["1.1.1", "1.1.2"]),
            ticks(&[("1.1.1.1", 11), ("1.1.2.1", 21)]),
        );
        mock.on(
            MockRequest::get_next(&["1.1.1.1", "1.1.2.1"]),
            ticks(&[("1.1.1.2", 12), ("1.1.9.1", 91)]),
        );
        mock.on(MockRequest::get_next(&["1.1.1.2"]), ticks(&[("1.1.9.2", 91)]));
        mock.on(MockRequest::get_next(&["1.1.3"]), ticks(&[("1.1.3.1", 31)]));
        mock.on(MockRequest::get_next(&["1.1.3.1"]), ticks(&[("1.1.9.1", 91)]));

        let mut session = mock.clone();
        let values = TableCollector::fetch_with_batching(
            &mut session,
            &columns(&["1.1.1", "1.1.2", "1.1.3"]),
            2,
            10,
            FetchStrategy::UseGetBulk,
        )
        .await
        .unwrap();

        assert_eq!(column(&values, "1.1.1"), vec![("1".into(), 11.0), ("2".into(), 12.0)]);
        assert_eq!(column(&values, "1.1.2"), vec![("1".into(), 21.0)]);
        assert_eq!(column(&values, "1.1.3"), vec![("1".into(), 31.0)]);
        assert!(mock.calls().iter().all(|c| matches!(c, MockRequest::GetNext(_))));
    }

    #[tokio::test]
    async fn stops_on_already_processed_oids() {
        let mock = MockSession::default();
        mock.on(
            MockRequest::get_bulk(&["1.1.1", "1.1.2"], 10),
            ticks(&[
                ("1.1.1.1", 11),
                ("1.1.2.1", 21),
                ("1.1.1.2", 12),
                ("1.1.2.2", 22),
                ("1.1.1.3", 13),
                ("1.1.2.3", 23),
            ]),
        );
        mock.on(
            MockRequest::get_bulk(&["1.1.1.3", "1.1.2.3"], 10),
            ticks(&[("1.1.1.4", 14), ("1.1.2.4", 24), ("1.1.1.5", 15), ("1.1.2.5", 25)]),
        );
        mock.on(
            MockRequest::get_bulk(&["1.1.1.5", "1.1.2.5"], 10),
            ticks(&[("1.1.1.4", 14), ("1.1.2.6", 26), ("1.1.1.5", 15), ("1.1.2.5", 25)]),
        );

        let mut session = mock.clone();
        let values = TableCollector::fetch_with_batching(
            &mut session,
            &columns(&["1.1.1", "1.1.2"]),
            100,
            10,
            FetchStrategy::UseGetBulk,
        )
        .await
        .unwrap();

        assert_eq!(values["1.1.1"].len(), 5);
        assert_eq!(values["1.1.2"].len(), 6);
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn keeps_partial_rows_when_a_later_request_fails() {
        let mock = MockSession::default();
        mock.on(
            MockRequest::get_bulk(&["1.1.1"], 10),
            ticks(&[("1.1.1.1", 11), ("1.1.1.2", 12)]),
        );
        mock.on_error(MockRequest::get_bulk(&["1.1.1.2"], 10), "timeout");

        let mut session = mock.clone();
        let values = TableCollector::fetch_with_batching(
            &mut session,
            &columns(&["1.1.1"]),
            10,
            10,
            FetchStrategy::UseGetBulk,
        )
        .await
        .unwrap();

        assert_eq!(values["1.1.1"].len(), 2);
    }

    #[tokio::test]
    async fn first_request_error_aborts_the_batch() {
        let mock = MockSession::default();
        mock.on_error(MockRequest::get_next(&["1.1", "2.2"]), "getnext error");

        let mut session = mock.clone();
        let err = TableCollector::fetch_with_batching(
            &mut session,
            &columns(&["1.1", "2.2"]),
            10,
            10,
            FetchStrategy::UseGetNext,
        )
        .await
        .unwrap_err();

        assert_eq!(
            format!("{:#}", err),
            "failed to fetch column oids: fetch column: failed getting oids `[1.1 2.2]` using GetNext: getnext error"
        );
    }
}
