//! Перечисление адресов для обнаружения устройств.

pub mod service;
pub mod subnet;

pub use service::{DiscoveredService, ServiceDiscovery, ServiceRecord, SnapshotDiff};
pub use subnet::{Subnet, increment_ip};
