pub mod config;
pub mod controller;

pub use config::{Postq, find_config_file};
pub use controller::{Controller, SHUTDOWN_BROADCAST};
