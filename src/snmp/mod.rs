pub mod client;
pub mod mock;
pub mod oid;
pub mod session;
pub mod v2c;
pub mod v3;

pub use client::{Snmp2SessionFactory, SnmpClient};
pub use oid::{format_oids, parse_oid, trim_oid};
pub use session::{
    Credentials, PduValue, Session, SessionFactory, SessionOptions, SnmpPacket, SnmpVersion,
    UsmParams, Varbind,
};
