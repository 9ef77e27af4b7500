// Public API - engine, data types and snapshot codec
pub mod config;
pub mod error;
pub mod export;
pub mod monitor;
pub mod probe;
pub mod state;

// Binary support - argument parsing and saved defaults
pub mod cli;
pub mod prefs;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use monitor::{Monitor, ProbeEvent};
