//! Shared configuration for the autocert daemon.

pub mod config;

pub use config::{Config, ConfigError, Directory};
