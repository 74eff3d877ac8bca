//! # Redlab Config
//!
//! Settings management for redlab.
//! Supports layered configuration from files, `.env` and environment
//! variables, validation of every value at startup, and rendering of the
//! Redis ACL file from the same settings.

mod acl;
mod loader;
mod settings;
mod validation;

pub use acl::*;
pub use loader::*;
pub use settings::*;
pub use validation::*;
