pub mod aggregate;
pub mod json;

pub use aggregate::{Shape, aggregate_device_data, replace_metrics_name};
pub use json::{Category, JsonFormatter, Point, SNMP_METRIC_NAME, SNMP_OBJECT_NAME, TagField};
