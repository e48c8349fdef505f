//! Model routing engine: adapters, metering, configuration and errors

pub mod adapter;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod models;
pub mod router;
pub mod token_estimator;
pub mod transport;
pub mod usage;
