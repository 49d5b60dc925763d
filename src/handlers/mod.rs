pub mod devices;
pub mod health;

pub use devices::devices;
pub use health::health;
