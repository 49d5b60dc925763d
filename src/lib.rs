//! Сбор телеметрии с сетевых устройств по SNMP.

pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod feeder;
pub mod formatter;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod service;
pub mod snmp;
