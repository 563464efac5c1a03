//! Common infrastructure for the CareLink crates
//!
//! - [`logging`]: subscriber setup and contextual spans
//! - [`config`]: layered settings loading (TOML file plus environment)
//! - [`errors`]: shared error type and context helpers

pub mod config;
pub mod errors;
pub mod logging;

pub use config::load_settings;
pub use errors::context::{ErrorContext, ErrorExt, ResultExt};
pub use errors::types::{Error, Result};
pub use logging::context::LogContext;
pub use logging::setup::{LoggingConfig, log_welcome, parse_log_level, setup_logging};
