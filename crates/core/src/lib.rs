//! Core business logic for clubdesk.

pub mod context;
pub mod services;

pub use context::AppContext;
pub use services::*;
