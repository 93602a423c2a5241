//! # Rowscope Core
//!
//! Boundary types shared between the authentication subsystem and the
//! scoping engine. The authentication side produces [`Claims`]; the engine in
//! `rowscope-authz` consumes them. Nothing in this crate performs I/O.

pub mod claims;
pub mod error;

// Re-export commonly used types
pub use claims::{Claims, DeclaredScope};
pub use error::{CoreError, Result};

/// Identifier of an authenticated principal
pub type PrincipalId = String;

/// Identifier of an organizational unit (branch office, regional team, ...)
pub type UnitId = String;

/// Per-request correlation token
pub type RequestId = uuid::Uuid;
