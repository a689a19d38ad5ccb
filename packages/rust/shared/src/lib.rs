//! Shared types, error model, and configuration for docfill.
//!
//! This crate is the foundation depended on by all other docfill crates.
//! It provides:
//! - [`DocfillError`]: the unified error type
//! - Domain types ([`Variable`], [`Answers`], [`Session`], [`SessionToken`])
//! - Configuration ([`AppConfig`], [`OracleConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, OracleConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{DocfillError, Result};
pub use types::{
    Answers, ArtifactRef, FILLED_SUFFIX, MAX_UPLOAD_BYTES, Session, SessionState, SessionToken,
    SourceFormat, Variable, VariableList,
};
