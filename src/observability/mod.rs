//! Logging setup for embedding applications

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
