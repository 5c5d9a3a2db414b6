//! # Tenantry Identity Core
//!
//! Identity and access control for a multi-tenant platform: organizations
//! and their owners, role-gated invitations, signed sessions revocable by
//! credential version, and password recovery.
//!
//! ## Module Organization
//!
//! - `services`: The account lifecycle operations
//! - `auth`: Password hashing, tokens, sessions and role checks
//! - `models`: Organizations and users
//! - `db`: Transactional store seam with PostgreSQL and in-memory backends
//! - `notify`: Post-commit mail queue and background dispatcher
//! - `deadline`: Cancellable per-operation deadlines
//! - `config`: Configuration loading
//! - `error`: The error taxonomy shared by every operation
//! - `telemetry`: Tracing setup

pub mod auth;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod models;
pub mod notify;
pub mod services;
pub mod telemetry;

pub use config::{ConfigError, IdentityConfig};
pub use deadline::Deadline;
pub use error::{ErrorKind, IdentityError, IdentityResult};
pub use services::{Identity, IdentityContext};

/// Current version of the identity core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
