//! Получение тегированных метрик из значений опроса.

pub mod bandwidth;
pub mod memory;
pub mod metadata;
pub mod report;
pub mod symbol;
pub mod tags;

pub use bandwidth::BandwidthState;
pub use metadata::build_device_meta;
pub use report::{MetricData, MetricReporter, MetricSample};
pub use tags::{get_scalar_tags, get_tags_from_metric_tag_config_list};
