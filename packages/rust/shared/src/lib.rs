//! Shared types, error model, and configuration for IntakeSync.
//!
//! This crate is the foundation depended on by all other IntakeSync crates.
//! It provides:
//! - [`IntakeSyncError`], the unified error type
//! - Domain types ([`CanonicalRequestRecord`], [`RequestType`], staging headers)
//! - The versioned intake [`SchemaMapping`]
//! - Configuration ([`AppConfig`], [`NotionConfig`], config loading)

pub mod config;
pub mod error;
pub mod schema;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LedgerConfig, NotionConfig, NotionSettings, StagingConfig, StagingPolicy,
    WorkbookConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_notion,
};
pub use error::{IntakeSyncError, Result};
pub use schema::{
    CURRENT_SCHEMA_VERSION, CanonicalField, FieldRule, FieldSource, SchemaMapping,
};
pub use types::{
    AMOUNT_HEADER, CanonicalRequestRecord, RequestType, STAGING_HEADERS,
};
