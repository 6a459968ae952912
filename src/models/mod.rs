//! Data models and structures for the network prober

pub mod config;
pub mod probe;

// Re-export main model types
pub use self::config::{Config, ProbeEntry};
pub use probe::{FailureReason, ProbeOutcome, ProbeSpec, ProbeVariant, DNS_PORT};
