//! Environment variable constants used throughout the application.
//!
//! Centralized definition of all `HOOKD_*` environment variables to ensure
//! consistency and avoid hardcoded strings.

/// Configuration file path override (CLI arg default env)
pub const HOOKD_CONFIG: &str = "HOOKD_CONFIG";
