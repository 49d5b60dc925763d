use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::error::ValueError;

use super::report::{ColumnSamples, MetricReporter, MetricSample, ScalarSamples};

pub const MEMORY_USAGE: &str = "memory.usage";
pub const MEMORY_USED: &str = "memory.used";
pub const MEMORY_FREE: &str = "memory.free";
pub const MEMORY_TOTAL: &str = "memory.total";

/// Метрики, из которых вычисляется `memory.usage`.
pub fn is_memory_metric(name: &str) -> bool {
    matches!(name, MEMORY_USAGE | MEMORY_USED | MEMORY_FREE | MEMORY_TOTAL)
}

pub fn evaluate_memory_usage(used: f64, total: f64) -> Result<f64, ValueError> {
    if total == 0.0 {
        return Err(ValueError::ZeroTotalMemory);
    }
    Ok(100.0 * used / total)
}

fn missing_memory_metrics(used: bool, free: bool, total: bool) -> String {
    [("used", used), ("free", free), ("total", total)]
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

impl MetricReporter<'_> {
    /// Вычисляет `memory.usage`, если устройство отдает только used/free/total.
    pub fn try_report_memory_usage(
        &mut self,
        scalar_samples: &ScalarSamples,
        column_samples: &ColumnSamples,
    ) -> Result<()> {
        if scalar_samples.keys().any(|name| is_memory_metric(name)) {
            self.try_send_scalar_memory_usage(scalar_samples)
        } else {
            self.try_send_column_memory_usage(column_samples)
        }
    }

    fn try_send_scalar_memory_usage(&mut self, samples: &ScalarSamples) -> Result<()> {
        if samples.contains_key(MEMORY_USAGE) {
            return Ok(());
        }
        let used = samples.get(MEMORY_USED);
        let free = samples.get(MEMORY_FREE);
        let total = samples.get(MEMORY_TOTAL);

        let (usage, tags) = match (used, free, total) {
            (Some(used), _, Some(total)) => (
                evaluate_memory_usage(used.value.to_f64()?, total.value.to_f64()?)?,
                &used.tags,
            ),
            (Some(used), Some(free), None) => {
                let used_value = used.value.to_f64()?;
                (
                    evaluate_memory_usage(used_value, used_value + free.value.to_f64()?)?,
                    &used.tags,
                )
            }
            (None, Some(free), Some(total)) => {
                let total_value = total.value.to_f64()?;
                (
                    evaluate_memory_usage(total_value - free.value.to_f64()?, total_value)?,
                    &free.tags,
                )
            }
            _ => {
                return Err(anyhow!(
                    "missing {} memory metrics, skipping scalar memory usage",
                    missing_memory_metrics(used.is_some(), free.is_some(), total.is_some())
                ));
            }
        };

        self.send_metric(&MetricSample::gauge(MEMORY_USAGE, usage, tags.clone()));
        Ok(())
    }

    fn try_send_column_memory_usage(&mut self, samples: &ColumnSamples) -> Result<()> {
        if samples.contains_key(MEMORY_USAGE) {
            return Ok(());
        }
        let used = samples.get(MEMORY_USED);
        let free = samples.get(MEMORY_FREE);
        let total = samples.get(MEMORY_TOTAL);

        match (used, free, total) {
            (Some(used), _, Some(total)) => {
                for (index, used) in sorted(used) {
                    let total = total.get(index).ok_or_else(|| {
                        anyhow!(
                            "missing `{}` metric, skipping memory usage for row with index: {}",
                            MEMORY_TOTAL,
                            index
                        )
                    })?;
                    let usage = evaluate_memory_usage(used.value.to_f64()?, total.value.to_f64()?)?;
                    self.send_metric(&MetricSample::gauge(MEMORY_USAGE, usage, used.tags.clone()));
                }
            }
            (Some(used), Some(free), None) => {
                for (index, used) in sorted(used) {
                    let free = free.get(index).ok_or_else(|| {
                        anyhow!(
                            "missing `{}` metric, skipping memory usage for row with index: {}",
                            MEMORY_FREE,
                            index
                        )
                    })?;
                    let used_value = used.value.to_f64()?;
                    let usage = evaluate_memory_usage(used_value, used_value + free.value.to_f64()?)?;
                    self.send_metric(&MetricSample::gauge(MEMORY_USAGE, usage, used.tags.clone()));
                }
            }
            (None, Some(free), Some(total)) => {
                for (index, free) in sorted(free) {
                    let total = total.get(index).ok_or_else(|| {
                        anyhow!(
                            "missing `{}` metric, skipping memory usage for row with index: {}",
                            MEMORY_TOTAL,
                            index
                        )
                    })?;
                    let total_value = total.value.to_f64()?;
                    let usage =
                        evaluate_memory_usage(total_value - free.value.to_f64()?, total_value)?;
                    self.send_metric(&MetricSample::gauge(MEMORY_USAGE, usage, free.tags.clone()));
                }
            }
            _ => {
                return Err(anyhow!(
                    "missing {} memory metrics, skipping column memory usage",
                    missing_memory_metrics(used.is_some(), free.is_some(), total.is_some())
                ));
            }
        }
        Ok(())
    }
}

fn sorted(rows: &HashMap<String, MetricSample>) -> Vec<(&String, &MetricSample)> {
    let mut rows: Vec<_> = rows.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::BandwidthState;

    fn samples(pairs: &[(&str, f64)]) -> ScalarSamples {
        pairs
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    MetricSample::gauge(name, *value, vec!["mem:scalar".into()]),
                )
            })
            .collect()
    }

    fn rows(name: &str, pairs: &[(&str, f64)]) -> HashMap<String, MetricSample> {
        pairs
            .iter()
            .map(|(index, value)| {
                (
                    index.to_string(),
                    MetricSample::gauge(name, *value, vec![format!("mem:{}", index)]),
                )
            })
            .collect()
    }

    #[test]
    fn scalar_used_and_total() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        reporter
            .try_report_memory_usage(
                &samples(&[(MEMORY_USED, 50.0), (MEMORY_TOTAL, 200.0)]),
                &ColumnSamples::new(),
            )
            .unwrap();
        let data = reporter.into_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].name, MEMORY_USAGE);
        assert_eq!(data[0].value, 25.0);
        assert_eq!(data[0].tags, vec!["mem:scalar"]);
    }

    #[test]
    fn scalar_free_and_total() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        reporter
            .try_report_memory_usage(
                &samples(&[(MEMORY_FREE, 150.0), (MEMORY_TOTAL, 200.0)]),
                &ColumnSamples::new(),
            )
            .unwrap();
        assert_eq!(reporter.data()[0].value, 25.0);
    }

    #[test]
    fn scalar_only_used_is_reported() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        let err = reporter
            .try_report_memory_usage(&samples(&[(MEMORY_USED, 50.0)]), &ColumnSamples::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing free, total memory metrics, skipping scalar memory usage"
        );
        assert!(reporter.data().is_empty());
    }

    #[test]
    fn explicit_usage_wins() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        reporter
            .try_report_memory_usage(
                &samples(&[(MEMORY_USAGE, 12.0), (MEMORY_USED, 50.0), (MEMORY_TOTAL, 200.0)]),
                &ColumnSamples::new(),
            )
            .unwrap();
        assert!(reporter.data().is_empty());
    }

    #[test]
    fn zero_total_is_an_error() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        let err = reporter
            .try_report_memory_usage(
                &samples(&[(MEMORY_USED, 50.0), (MEMORY_TOTAL, 0.0)]),
                &ColumnSamples::new(),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot evaluate memory usage, total memory is 0");
    }

    #[test]
    fn column_rows() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        let columns = ColumnSamples::from([
            (
                MEMORY_USED.to_string(),
                rows(MEMORY_USED, &[("123", 100.0), ("567", 200.0)]),
            ),
            (
                MEMORY_TOTAL.to_string(),
                rows(MEMORY_TOTAL, &[("123", 200.0), ("567", 2000.0)]),
            ),
        ]);
        reporter
            .try_report_memory_usage(&ScalarSamples::new(), &columns)
            .unwrap();

        let data = reporter.into_data();
        assert_eq!(data.len(), 2);
        assert_eq!((data[0].value, data[0].tags[0].as_str()), (50.0, "mem:123"));
        assert_eq!((data[1].value, data[1].tags[0].as_str()), (10.0, "mem:567"));
    }

    #[test]
    fn column_missing_row() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        let columns = ColumnSamples::from([
            (MEMORY_USED.to_string(), rows(MEMORY_USED, &[("1", 10.0)])),
            (MEMORY_TOTAL.to_string(), rows(MEMORY_TOTAL, &[("2", 20.0)])),
        ]);
        let err = reporter
            .try_report_memory_usage(&ScalarSamples::new(), &columns)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing `memory.total` metric, skipping memory usage for row with index: 1"
        );
    }

    #[test]
    fn nothing_collected() {
        let state = BandwidthState::new();
        let mut reporter = MetricReporter::new(&state, 0.0);
        let err = reporter
            .try_report_memory_usage(&ScalarSamples::new(), &ColumnSamples::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing used, free, total memory metrics, skipping column memory usage"
        );
    }
}
