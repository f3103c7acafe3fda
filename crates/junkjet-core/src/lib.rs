pub mod error;
pub mod config;
pub mod session;
pub mod chatbot;
pub mod service;
pub mod util;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
