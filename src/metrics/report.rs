use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use tracing::debug;

use crate::collector::{ResultValue, ResultValueStore};
use crate::config::profile::MetricsConfigOption;
use crate::config::{MetricsConfig, SymbolConfig};
use crate::error::ValueError;

use super::bandwidth::BandwidthState;
use super::memory::is_memory_metric;
use super::symbol::{get_column_value_from_symbol, get_scalar_value_from_symbol};
use super::tags::get_tags_from_metric_tag_config_list;

pub const IF_HIGH_SPEED_OID: &str = "1.3.6.1.2.1.31.1.1.1.15";

/// Одна точка данных после всех преобразований.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricData {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
}

/// Значение символа вместе с тегами и правилами отправки.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub value: ResultValue,
    pub tags: Vec<String>,
    pub symbol: SymbolConfig,
    pub forced_type: String,
    pub options: MetricsConfigOption,
}

impl MetricSample {
    pub fn gauge(name: &str, value: f64, tags: Vec<String>) -> Self {
        Self::forced(name, value, tags, "gauge")
    }

    fn forced(name: &str, value: f64, tags: Vec<String>, forced_type: &str) -> Self {
        Self {
            value: ResultValue::float(value),
            tags,
            symbol: SymbolConfig::new("", name),
            forced_type: forced_type.to_string(),
            options: MetricsConfigOption::default(),
        }
    }
}

pub type ScalarSamples = HashMap<String, MetricSample>;
pub type ColumnSamples = HashMap<String, HashMap<String, MetricSample>>;

/// Превращает значения опроса в точки `MetricData` по определениям метрик.
pub struct MetricReporter<'a> {
    bandwidth: &'a BandwidthState,
    timestamp: f64,
    record_rates: bool,
    data: Vec<MetricData>,
}

impl<'a> MetricReporter<'a> {
    /// `timestamp` в секундах используется для расчета скорости.
    pub fn new(bandwidth: &'a BandwidthState, timestamp: f64) -> Self {
        Self {
            bandwidth,
            timestamp,
            record_rates: true,
            data: Vec::new(),
        }
    }

    /// Скорость считается от прошлого наблюдения, но базовая точка не обновляется.
    pub fn without_rate_updates(mut self) -> Self {
        self.record_rates = false;
        self
    }

    pub fn data(&self) -> &[MetricData] {
        &self.data
    }

    pub fn into_data(self) -> Vec<MetricData> {
        self.data
    }

    pub fn report_metrics(
        &mut self,
        metrics: &[MetricsConfig],
        values: &ResultValueStore,
        tags: &[String],
    ) {
        let mut scalar_samples = ScalarSamples::new();
        let mut column_samples = ColumnSamples::new();

        for metric in metrics {
            if metric.is_scalar() {
                let Ok(sample) = self.report_scalar_metrics(metric, values, tags) else {
                    continue;
                };
                if is_memory_metric(&sample.symbol.name) {
                    scalar_samples.insert(sample.symbol.name.clone(), sample);
                }
            } else if metric.is_column() {
                for (name, rows) in self.report_column_metrics(metric, values, tags) {
                    if is_memory_metric(&name) {
                        column_samples.insert(name, rows);
                    }
                }
            }
        }

        if let Err(e) = self.try_report_memory_usage(&scalar_samples, &column_samples) {
            debug!(error = %e, "failed to report memory usage");
        }
    }

    pub fn report_scalar_metrics(
        &mut self,
        metric: &MetricsConfig,
        values: &ResultValueStore,
        tags: &[String],
    ) -> Result<MetricSample, ValueError> {
        let value = get_scalar_value_from_symbol(values, &metric.symbol).inspect_err(|e| {
            debug!(error = %e, "report scalar: error getting scalar value");
        })?;

        let mut scalar_tags = tags.to_vec();
        scalar_tags.extend(metric.static_tags.iter().cloned());

        let sample = MetricSample {
            value,
            tags: scalar_tags,
            symbol: metric.symbol.clone(),
            forced_type: metric.forced_type.clone(),
            options: metric.options.clone(),
        };
        self.send_metric(&sample);
        Ok(sample)
    }

    pub fn report_column_metrics(
        &mut self,
        metric: &MetricsConfig,
        values: &ResultValueStore,
        tags: &[String],
    ) -> ColumnSamples {
        let mut row_tags_cache: HashMap<String, Vec<String>> = HashMap::new();
        let mut samples = ColumnSamples::new();

        for symbol in &metric.symbols {
            let metric_values = match get_column_value_from_symbol(values, symbol) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "report column: error getting column value");
                    continue;
                }
            };

            let mut indexes: Vec<&String> = metric_values.keys().collect();
            indexes.sort();
            for full_index in indexes {
                let row_tags = row_tags_cache
                    .entry(full_index.clone())
                    .or_insert_with(|| {
                        let mut row_tags = tags.to_vec();
                        row_tags.extend(metric.static_tags.iter().cloned());
                        row_tags.extend(get_tags_from_metric_tag_config_list(
                            &metric.metric_tags,
                            full_index,
                            values,
                        ));
                        row_tags
                    })
                    .clone();

                let sample = MetricSample {
                    value: metric_values[full_index].clone(),
                    tags: row_tags.clone(),
                    symbol: symbol.clone(),
                    forced_type: metric.forced_type.clone(),
                    options: metric.options.clone(),
                };
                self.send_metric(&sample);
                samples
                    .entry(symbol.name.clone())
                    .or_default()
                    .insert(full_index.clone(), sample);

                if let Err(e) = self.try_send_bandwidth_usage_metric(symbol, full_index, values, &row_tags)
                {
                    debug!(error = %e, "failed to send bandwidth usage metric");
                }
            }
        }
        samples
    }

    /// Загрузка интерфейса в процентах по `ifHCInOctets`/`ifHCOutOctets` и `ifHighSpeed`.
    pub fn try_send_bandwidth_usage_metric(
        &mut self,
        symbol: &SymbolConfig,
        full_index: &str,
        values: &ResultValueStore,
        tags: &[String],
    ) -> Result<()> {
        let usage_name = match symbol.name.as_str() {
            "ifHCInOctets" => "ifBandwidthInUsage",
            "ifHCOutOctets" => "ifBandwidthOutUsage",
            _ => return Ok(()),
        };

        let speed_values = values.get_column_values(IF_HIGH_SPEED_OID).map_err(|_| {
            anyhow!(
                "bandwidth usage: missing `ifHighSpeed` metric, skipping metric. fullIndex={}",
                full_index
            )
        })?;
        let octets_values = values.get_column_values(&symbol.oid).map_err(|_| {
            anyhow!(
                "bandwidth usage: missing `{}` metric, skipping metric. fullIndex={}",
                symbol.name,
                full_index
            )
        })?;

        let octets = octets_values.get(full_index).ok_or_else(|| {
            anyhow!(
                "bandwidth usage: missing value for `{}`, skipping this row. fullIndex={}",
                symbol.name,
                full_index
            )
        })?;
        let speed = speed_values.get(full_index).ok_or_else(|| {
            anyhow!(
                "bandwidth usage: missing `ifHighSpeed` metric, skipping this row. fullIndex={}",
                full_index
            )
        })?;

        let octets = octets.to_f64()?;
        let speed = speed.to_f64()?;
        if speed == 0.0 {
            bail!(
                "bandwidth usage: zero or invalid speed, skipping this row. ifHighSpeed={} fullIndex={}",
                speed,
                full_index
            );
        }

        let usage = octets * 8.0 / (speed * 1e6) * 100.0;
        let sample = MetricSample::forced(
            &format!("{}.rate", usage_name),
            usage,
            tags.to_vec(),
            "counter",
        );
        self.send_metric(&sample);
        Ok(())
    }

    pub fn send_metric(&mut self, sample: &MetricSample) {
        let mut name = sample.symbol.name.clone();
        let mut forced_type = sample.forced_type.clone();

        let value = if forced_type == "flag_stream" {
            let raw = sample.value.to_string_value();
            match get_flag_stream_value(sample.options.placement, &raw) {
                Ok(v) => {
                    name = format!("{}.{}", name, sample.options.metric_suffix);
                    forced_type = "gauge".to_string();
                    v
                }
                Err(e) => {
                    debug!(metric = %name, error = %e, "failed to get flag stream value");
                    return;
                }
            }
        } else {
            match sample.value.to_f64() {
                Ok(v) => v,
                Err(e) => {
                    debug!(metric = %name, error = %e, "metric has a non-numeric value");
                    return;
                }
            }
        };

        if forced_type.is_empty() {
            forced_type = sample
                .value
                .submission_type
                .clone()
                .unwrap_or_else(|| "gauge".to_string());
        }

        let value = if sample.symbol.scale_factor != 0.0 {
            value * sample.symbol.scale_factor
        } else {
            value
        };

        match forced_type.as_str() {
            "gauge" | "monotonic_count" => self.emit(name, value, &sample.tags),
            "counter" => {
                if BandwidthState::is_bandwidth_metric(&name) {
                    let rate = if self.record_rates {
                        self.bandwidth.calculate(&sample.tags, &name, value, self.timestamp)
                    } else {
                        self.bandwidth.peek(&sample.tags, &name, value, self.timestamp)
                    };
                    match rate {
                        Some(rate) => self.emit(name, rate, &sample.tags),
                        None => debug!(metric = %name, "rate is not available yet"),
                    }
                } else {
                    self.emit(name, value, &sample.tags);
                }
            }
            "percent" => self.emit(name, value * 100.0, &sample.tags),
            "monotonic_count_and_rate" => {
                self.emit(format!("{}.rate", name), value, &sample.tags);
                self.emit(name, value, &sample.tags);
            }
            other => debug!(metric = %name, forced_type = %other, "metric type not supported"),
        }
    }

    fn emit(&mut self, name: String, value: f64, tags: &[String]) {
        self.data.push(MetricData {
            name,
            value,
            tags: tags.to_vec(),
        });
    }
}

/// Флаг `0`/`1` в позиции `placement` (с 1) строки `value`.
pub fn get_flag_stream_value(placement: u32, value: &str) -> Result<f64, ValueError> {
    let index = (placement as usize).wrapping_sub(1);
    match value.as_bytes().get(index) {
        Some(b'1') => Ok(1.0),
        Some(_) => Ok(0.0),
        None => Err(ValueError::FlagStreamIndex {
            index,
            value: value.to_string(),
        }),
    }
}
