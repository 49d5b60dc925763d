use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use tracing::debug;

pub mod device_info;
pub mod scalar_collector;
pub mod table_collector;
pub mod types;
pub mod user_profile;

pub use device_info::{DeviceInfo, DeviceOptions};
pub use scalar_collector::ScalarCollector;
pub use table_collector::{FetchStrategy, TableCollector};
pub use types::{ResultValue, ResultValueStore, Value};

use crate::snmp::Session;

pub const DEFAULT_OID_BATCH_SIZE: usize = 5;
pub const DEFAULT_BULK_MAX_REPETITIONS: u32 = 10;

/// Набор OID, которые нужно опросить на устройстве.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OidConfig {
    pub scalar_oids: Vec<String>,
    pub column_oids: Vec<String>,
}

impl OidConfig {
    pub fn add_scalar_oids<I, S>(&mut self, oids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_if_not_present(&mut self.scalar_oids, oids);
    }

    pub fn add_column_oids<I, S>(&mut self, oids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_if_not_present(&mut self.column_oids, oids);
    }

    pub fn is_empty(&self) -> bool {
        self.scalar_oids.is_empty() && self.column_oids.is_empty()
    }
}

fn add_if_not_present<I, S>(target: &mut Vec<String>, oids: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for oid in oids {
        let oid = oid.as_ref();
        if oid.is_empty() || target.iter().any(|o| o == oid) {
            continue;
        }
        target.push(oid.to_string());
    }
    target.sort();
}

/// Параметры одного опроса.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub oid_config: OidConfig,
    pub oid_batch_size: usize,
    pub bulk_max_repetitions: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            oid_config: OidConfig::default(),
            oid_batch_size: DEFAULT_OID_BATCH_SIZE,
            bulk_max_repetitions: DEFAULT_BULK_MAX_REPETITIONS,
        }
    }
}

/// Делит список на пачки фиксированного размера.
pub fn create_string_batches(items: &[String], size: usize) -> Result<Vec<Vec<String>>> {
    if size == 0 {
        bail!("batch size must be positive. invalid size: {}", size);
    }
    Ok(items.chunks(size).map(|chunk| chunk.to_vec()).collect())
}

/// Коллектор для сбора SNMP данных
pub struct SnmpCollector;

impl SnmpCollector {
    /// Собирает все скаляры и колонки в одно хранилище значений.
    ///
    /// Колонки сначала обходятся через GetBulk; если это не удалось, весь
    /// обход колонок повторяется через GetNext.
    pub async fn fetch(session: &mut dyn Session, options: &FetchOptions) -> Result<ResultValueStore> {
        let scalar_values = ScalarCollector::fetch_with_batching(
            session,
            &options.oid_config.scalar_oids,
            options.oid_batch_size,
        )
        .await
        .context("failed to fetch scalar oids with batching")?;

        let oids: HashMap<String, String> = options
            .oid_config
            .column_oids
            .iter()
            .map(|oid| (oid.clone(), oid.clone()))
            .collect();

        let column_values = match TableCollector::fetch_with_batching(
            session,
            &oids,
            options.oid_batch_size,
            options.bulk_max_repetitions,
            FetchStrategy::UseGetBulk,
        )
        .await
        {
            Ok(values) => values,
            Err(e) => {
                debug!(error = %format!("{:#}", e), "failed to fetch oids with GetBulk batching");
                TableCollector::fetch_with_batching(
                    session,
                    &oids,
                    options.oid_batch_size,
                    options.bulk_max_repetitions,
                    FetchStrategy::UseGetNext,
                )
                .await
                .context("failed to fetch oids with GetNext batching")?
            }
        };

        Ok(ResultValueStore {
            scalar_values,
            column_values,
        })
    }
}
