//! Common utilities and shared types for clubdesk.
//!
//! This crate provides foundational components used across all clubdesk crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`],
//!   plus the document store error taxonomy via [`StoreError`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use clubdesk_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.generate();
//!     println!("Generated ID: {id} (batch size {})", config.migration.batch_size);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;

pub use config::{
    Config, LoggingConfig, MigrationConfig, RateLimitDefaults, RetryConfig, StoreConfig,
    VoteStorageConfig,
};
pub use error::{AppError, AppResult, StoreError, StoreErrorCode, StoreOperation};
pub use id::IdGenerator;
