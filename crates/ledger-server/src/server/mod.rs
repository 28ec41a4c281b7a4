pub mod config;
pub mod service;
pub mod source;
pub mod telemetry;
