//! Shared types, error model, and configuration for portcall.
//!
//! This crate is the foundation depended on by all other portcall crates.
//! It provides:
//! - [`PortcallError`]: the unified error type
//! - Domain types ([`NormalizedRecord`], [`Direction`], [`LocationType`], hierarchy keys)
//! - Configuration ([`AppConfig`], [`CrawlConfig`], [`UrlTemplate`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CarrierConfig, CarrierTemplates, CrawlConfig, CrawlDefaults, OutputConfig,
    UrlTemplate, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{PortcallError, Result};
pub use types::{
    CallPortKey, Direction, LocationType, NormalizedRecord, RECORD_HEADER, RouteServiceKey,
    ServiceGroupKey, TimeValue, related_id, rotation_order,
};
