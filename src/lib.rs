pub mod attach;
pub mod bridge;
pub mod capture;
pub mod config;
pub mod session;
pub mod spawn;
pub mod telemetry;
pub mod term;
