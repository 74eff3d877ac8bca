//! # Redlab Core
//!
//! Error definitions shared by the redlab crates.

pub mod error;
pub mod result;

pub use error::*;
pub use result::*;
