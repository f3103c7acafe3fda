pub mod analytics;
pub mod auth;
pub mod gateway;
pub mod monitor;

#[cfg(feature = "http-api")]
pub mod http;
